//! Capability-checked access to a device's feature dictionary.
//!
//! Cameras expose their configuration as a directory of named, typed nodes.
//! Whether a node can be read or written depends on the model, the firmware
//! and the current acquisition state, so every access is preceded by a
//! capability check. A refused access becomes a [`ParameterError`] naming the
//! node; it never reaches the transport.
//!
//! Backends implement the raw [`ParameterDirectory`] trait. Callers go through
//! [`ParameterAccess`], which adds the capability checks, kind checks and
//! enumeration name resolution:
//!
//! ```rust,ignore
//! let mut params = device.params(Nodemap::Device);
//! params.set_enum_by_name(sfnc::ACQUISITION_MODE, "Continuous")?;
//! let payload: i64 = params.get(sfnc::PAYLOAD_SIZE)?;
//! let max_offset = params.max_float(sfnc::SCAN3D_COORDINATE_OFFSET)?;
//! ```

use crate::error::{DeviceFault, ParameterError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Node kind as declared by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterKind {
    /// Boolean node.
    Bool,
    /// Integer node.
    Int,
    /// Floating-point node.
    Float,
    /// String node.
    String,
    /// Enumeration node, addressed by entry name or integer code.
    Enumeration,
}

impl fmt::Display for ParameterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ParameterKind::Bool => "boolean",
            ParameterKind::Int => "integer",
            ParameterKind::Float => "float",
            ParameterKind::String => "string",
            ParameterKind::Enumeration => "enumeration",
        };
        f.write_str(label)
    }
}

/// A parameter value in one of the six supported shapes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParameterValue {
    /// Boolean value.
    Bool(bool),
    /// Integer value or enumeration code.
    Int(i64),
    /// Floating-point value.
    Float(f64),
    /// String value or enumeration entry name.
    String(String),
    /// Enumeration selected by its integer entry code.
    EnumCode(i64),
    /// Enumeration selected by its symbolic entry name.
    EnumName(String),
}

impl ParameterValue {
    /// Node kind this value can be stored in.
    #[must_use]
    pub fn kind(&self) -> ParameterKind {
        match self {
            ParameterValue::Bool(_) => ParameterKind::Bool,
            ParameterValue::Int(_) => ParameterKind::Int,
            ParameterValue::Float(_) => ParameterKind::Float,
            ParameterValue::String(_) => ParameterKind::String,
            ParameterValue::EnumCode(_) | ParameterValue::EnumName(_) => {
                ParameterKind::Enumeration
            }
        }
    }
}

impl fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParameterValue::Bool(v) => write!(f, "{v}"),
            ParameterValue::Int(v) | ParameterValue::EnumCode(v) => write!(f, "{v}"),
            ParameterValue::Float(v) => write!(f, "{v}"),
            ParameterValue::String(v) | ParameterValue::EnumName(v) => f.write_str(v),
        }
    }
}

/// Which shape a read should produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    /// A boolean.
    Bool,
    /// An integer.
    Int,
    /// A float.
    Float,
    /// A string node's text.
    String,
    /// An enumeration's integer code.
    EnumCode,
    /// An enumeration's entry name.
    EnumName,
}

impl ValueKind {
    fn node_kind(self) -> ParameterKind {
        match self {
            ValueKind::Bool => ParameterKind::Bool,
            ValueKind::Int => ParameterKind::Int,
            ValueKind::Float => ParameterKind::Float,
            ValueKind::String => ParameterKind::String,
            ValueKind::EnumCode | ValueKind::EnumName => ParameterKind::Enumeration,
        }
    }
}

/// Current access rights of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Access {
    /// The node can be read now.
    pub readable: bool,
    /// The node can be written now.
    pub writable: bool,
}

impl Access {
    /// Readable, not writable.
    pub const READ_ONLY: Access = Access {
        readable: true,
        writable: false,
    };
    /// Readable and writable.
    pub const READ_WRITE: Access = Access {
        readable: true,
        writable: true,
    };
    /// Writable, not readable.
    pub const WRITE_ONLY: Access = Access {
        readable: false,
        writable: true,
    };
    /// Present but locked.
    pub const NONE: Access = Access {
        readable: false,
        writable: false,
    };
}

/// What a directory knows about one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterDescriptor {
    /// Feature name.
    pub name: String,
    /// Value type.
    pub kind: ParameterKind,
    /// Current access rights.
    pub access: Access,
}

/// One entry of an enumeration node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumEntry {
    /// Symbolic entry name.
    pub name: String,
    /// Integer value of the entry.
    pub code: i64,
    /// Entries can exist but be unavailable in the current device state.
    pub available: bool,
}

/// Raw feature dictionary of one device, implemented by backends.
///
/// Implementations may assume the caller has already checked access rights and
/// node kinds; [`ParameterAccess`] guarantees it. Enumerations are read and
/// written as [`ParameterValue::EnumCode`].
pub trait ParameterDirectory: Send {
    /// Descriptor of `name`, or `None` if the node does not exist.
    fn descriptor(&self, name: &str) -> Option<ParameterDescriptor>;

    fn read(&self, name: &str) -> Result<ParameterValue, DeviceFault>;

    fn write(&mut self, name: &str, value: ParameterValue) -> Result<(), DeviceFault>;

    fn enum_entries(&self, name: &str) -> Result<Vec<EnumEntry>, DeviceFault>;

    /// Inclusive `(min, max)` of an integer node.
    fn int_range(&self, name: &str) -> Result<(i64, i64), DeviceFault>;

    /// Inclusive `(min, max)` of a float node.
    fn float_range(&self, name: &str) -> Result<(f64, f64), DeviceFault>;
}

/// Rust types that map onto a non-enumeration node kind.
pub trait ParameterType: Sized {
    const KIND: ParameterKind;

    fn into_value(self) -> ParameterValue;

    fn from_value(value: ParameterValue) -> Option<Self>;
}

impl ParameterType for bool {
    const KIND: ParameterKind = ParameterKind::Bool;

    fn into_value(self) -> ParameterValue {
        ParameterValue::Bool(self)
    }

    fn from_value(value: ParameterValue) -> Option<Self> {
        match value {
            ParameterValue::Bool(v) => Some(v),
            _ => None,
        }
    }
}

impl ParameterType for i64 {
    const KIND: ParameterKind = ParameterKind::Int;

    fn into_value(self) -> ParameterValue {
        ParameterValue::Int(self)
    }

    fn from_value(value: ParameterValue) -> Option<Self> {
        match value {
            ParameterValue::Int(v) => Some(v),
            _ => None,
        }
    }
}

impl ParameterType for f64 {
    const KIND: ParameterKind = ParameterKind::Float;

    fn into_value(self) -> ParameterValue {
        ParameterValue::Float(self)
    }

    fn from_value(value: ParameterValue) -> Option<Self> {
        match value {
            ParameterValue::Float(v) => Some(v),
            _ => None,
        }
    }
}

impl ParameterType for String {
    const KIND: ParameterKind = ParameterKind::String;

    fn into_value(self) -> ParameterValue {
        ParameterValue::String(self)
    }

    fn from_value(value: ParameterValue) -> Option<Self> {
        match value {
            ParameterValue::String(v) => Some(v),
            _ => None,
        }
    }
}

/// Checked façade over a [`ParameterDirectory`].
///
/// No method ever reads an unreadable node or writes an unwritable one.
pub struct ParameterAccess<'a> {
    dir: &'a mut dyn ParameterDirectory,
}

impl<'a> ParameterAccess<'a> {
    /// Wrap a raw directory.
    pub fn new(dir: &'a mut dyn ParameterDirectory) -> Self {
        Self { dir }
    }

    /// Whether the node exists on this device.
    #[must_use]
    pub fn is_available(&self, name: &str) -> bool {
        self.dir.descriptor(name).is_some()
    }

    /// Whether the node exists and is readable.
    #[must_use]
    pub fn can_read(&self, name: &str) -> bool {
        self.dir
            .descriptor(name)
            .is_some_and(|d| d.access.readable)
    }

    /// Whether the node exists and is writable.
    #[must_use]
    pub fn can_write(&self, name: &str) -> bool {
        self.dir
            .descriptor(name)
            .is_some_and(|d| d.access.writable)
    }

    fn checked(
        &self,
        name: &str,
        kind: ParameterKind,
        write: bool,
    ) -> Result<ParameterDescriptor, ParameterError> {
        let desc = self
            .dir
            .descriptor(name)
            .ok_or_else(|| ParameterError::NotAvailable { name: name.into() })?;
        if write && !desc.access.writable {
            return Err(ParameterError::NotWritable { name: name.into() });
        }
        if !write && !desc.access.readable {
            return Err(ParameterError::NotReadable { name: name.into() });
        }
        if desc.kind != kind {
            return Err(ParameterError::TypeMismatch {
                name: name.into(),
                expected: kind,
                actual: desc.kind,
            });
        }
        Ok(desc)
    }

    fn transport(name: &str) -> impl FnOnce(DeviceFault) -> ParameterError + '_ {
        move |source| ParameterError::Transport {
            name: name.into(),
            source,
        }
    }

    /// Typed read of a boolean, integer, float or string node.
    pub fn get<T: ParameterType>(&self, name: &str) -> Result<T, ParameterError> {
        self.checked(name, T::KIND, false)?;
        let value = self.dir.read(name).map_err(Self::transport(name))?;
        let actual = value.kind();
        T::from_value(value).ok_or_else(|| ParameterError::TypeMismatch {
            name: name.into(),
            expected: T::KIND,
            actual,
        })
    }

    /// Typed write of a boolean, integer, float or string node.
    pub fn set<T: ParameterType>(&mut self, name: &str, value: T) -> Result<(), ParameterError> {
        self.checked(name, T::KIND, true)?;
        self.dir
            .write(name, value.into_value())
            .map_err(Self::transport(name))
    }

    /// Read `name` in the requested shape.
    pub fn get_value(&self, name: &str, kind: ValueKind) -> Result<ParameterValue, ParameterError> {
        match kind {
            ValueKind::Bool => self.get::<bool>(name).map(ParameterValue::Bool),
            ValueKind::Int => self.get::<i64>(name).map(ParameterValue::Int),
            ValueKind::Float => self.get::<f64>(name).map(ParameterValue::Float),
            ValueKind::String => self.get::<String>(name).map(ParameterValue::String),
            ValueKind::EnumCode => self.get_enum_code(name).map(ParameterValue::EnumCode),
            ValueKind::EnumName => self.get_enum_name(name).map(ParameterValue::EnumName),
        }
    }

    /// Write `value` to `name`, resolving enumeration names to codes.
    pub fn set_value(&mut self, name: &str, value: ParameterValue) -> Result<(), ParameterError> {
        match value {
            ParameterValue::Bool(v) => self.set(name, v),
            ParameterValue::Int(v) => self.set(name, v),
            ParameterValue::Float(v) => self.set(name, v),
            ParameterValue::String(v) => self.set(name, v),
            ParameterValue::EnumCode(code) => self.set_enum_code(name, code),
            ParameterValue::EnumName(entry) => self.set_enum_by_name(name, &entry),
        }
    }

    /// Integer code of the current enumeration entry.
    pub fn get_enum_code(&self, name: &str) -> Result<i64, ParameterError> {
        self.checked(name, ParameterKind::Enumeration, false)?;
        match self.dir.read(name).map_err(Self::transport(name))? {
            ParameterValue::EnumCode(code) => Ok(code),
            other => Err(ParameterError::TypeMismatch {
                name: name.into(),
                expected: ParameterKind::Enumeration,
                actual: other.kind(),
            }),
        }
    }

    /// Symbolic name of the current enumeration entry.
    pub fn get_enum_name(&self, name: &str) -> Result<String, ParameterError> {
        let code = self.get_enum_code(name)?;
        let entries = self.dir.enum_entries(name).map_err(Self::transport(name))?;
        entries
            .into_iter()
            .find(|e| e.code == code)
            .map(|e| e.name)
            .ok_or_else(|| ParameterError::UnknownEntry {
                name: name.into(),
                entry: code.to_string(),
            })
    }

    /// Select an enumeration entry by integer code.
    pub fn set_enum_code(&mut self, name: &str, code: i64) -> Result<(), ParameterError> {
        self.checked(name, ParameterKind::Enumeration, true)?;
        self.dir
            .write(name, ParameterValue::EnumCode(code))
            .map_err(Self::transport(name))
    }

    /// Select an enumeration entry by name; the entry must be available.
    pub fn set_enum_by_name(&mut self, name: &str, entry: &str) -> Result<(), ParameterError> {
        self.checked(name, ParameterKind::Enumeration, true)?;
        let code = self
            .dir
            .enum_entries(name)
            .map_err(Self::transport(name))?
            .into_iter()
            .find(|e| e.name == entry && e.available)
            .map(|e| e.code)
            .ok_or_else(|| ParameterError::UnknownEntry {
                name: name.into(),
                entry: entry.into(),
            })?;
        self.dir
            .write(name, ParameterValue::EnumCode(code))
            .map_err(Self::transport(name))
    }

    /// Whether `entry` exists and is currently selectable on enumeration `name`.
    #[must_use]
    pub fn has_enum_entry(&self, name: &str, entry: &str) -> bool {
        if self.checked(name, ParameterKind::Enumeration, false).is_err() {
            return false;
        }
        self.dir
            .enum_entries(name)
            .map(|entries| entries.iter().any(|e| e.name == entry && e.available))
            .unwrap_or(false)
    }

    /// Lower bound of an integer node.
    pub fn min_int(&self, name: &str) -> Result<i64, ParameterError> {
        self.checked(name, ParameterKind::Int, false)?;
        self.dir
            .int_range(name)
            .map(|(min, _)| min)
            .map_err(Self::transport(name))
    }

    /// Upper bound of an integer node.
    pub fn max_int(&self, name: &str) -> Result<i64, ParameterError> {
        self.checked(name, ParameterKind::Int, false)?;
        self.dir
            .int_range(name)
            .map(|(_, max)| max)
            .map_err(Self::transport(name))
    }

    /// Upper bound of a float node.
    pub fn max_float(&self, name: &str) -> Result<f64, ParameterError> {
        self.checked(name, ParameterKind::Float, false)?;
        self.dir
            .float_range(name)
            .map(|(_, max)| max)
            .map_err(Self::transport(name))
    }

    /// Lower bound of a float node.
    pub fn min_float(&self, name: &str) -> Result<f64, ParameterError> {
        self.checked(name, ParameterKind::Float, false)?;
        self.dir
            .float_range(name)
            .map(|(min, _)| min)
            .map_err(Self::transport(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::Arc;

    /// Directory that panics on any access the façade should have refused.
    #[derive(Default)]
    struct StrictDirectory {
        nodes: HashMap<String, (ParameterDescriptor, ParameterValue)>,
        entries: HashMap<String, Vec<EnumEntry>>,
        writes: Arc<Mutex<Vec<(String, ParameterValue)>>>,
    }

    impl StrictDirectory {
        fn node(mut self, name: &str, access: Access, value: ParameterValue) -> Self {
            let desc = ParameterDescriptor {
                name: name.into(),
                kind: value.kind(),
                access,
            };
            self.nodes.insert(name.into(), (desc, value));
            self
        }

        fn entries(mut self, name: &str, entries: &[(&str, i64, bool)]) -> Self {
            self.entries.insert(
                name.into(),
                entries
                    .iter()
                    .map(|(n, c, a)| EnumEntry {
                        name: (*n).into(),
                        code: *c,
                        available: *a,
                    })
                    .collect(),
            );
            self
        }
    }

    impl ParameterDirectory for StrictDirectory {
        fn descriptor(&self, name: &str) -> Option<ParameterDescriptor> {
            self.nodes.get(name).map(|(d, _)| d.clone())
        }

        fn read(&self, name: &str) -> Result<ParameterValue, DeviceFault> {
            let (desc, value) = &self.nodes[name];
            assert!(desc.access.readable, "read of unreadable node {name}");
            Ok(value.clone())
        }

        fn write(&mut self, name: &str, value: ParameterValue) -> Result<(), DeviceFault> {
            let (desc, current) = self.nodes.get_mut(name).unwrap();
            assert!(desc.access.writable, "write of unwritable node {name}");
            *current = value.clone();
            self.writes.lock().push((name.into(), value));
            Ok(())
        }

        fn enum_entries(&self, name: &str) -> Result<Vec<EnumEntry>, DeviceFault> {
            Ok(self.entries.get(name).cloned().unwrap_or_default())
        }

        fn int_range(&self, _name: &str) -> Result<(i64, i64), DeviceFault> {
            Ok((16, 9000))
        }

        fn float_range(&self, _name: &str) -> Result<(f64, f64), DeviceFault> {
            Ok((0.0, 255.5))
        }
    }

    fn directory() -> StrictDirectory {
        StrictDirectory::default()
            .node("Locked", Access::READ_ONLY, ParameterValue::Int(4))
            .node("Secret", Access::WRITE_ONLY, ParameterValue::Float(0.0))
            .node("Gain", Access::READ_WRITE, ParameterValue::Float(1.5))
            .node("Reverse", Access::READ_WRITE, ParameterValue::Bool(false))
            .node("Mode", Access::READ_WRITE, ParameterValue::EnumCode(0))
            .entries(
                "Mode",
                &[("SingleFrame", 0, true), ("Continuous", 2, true), ("Burst", 3, false)],
            )
    }

    #[test]
    fn refused_accesses_never_reach_the_directory() {
        let mut dir = directory();
        let mut params = ParameterAccess::new(&mut dir);

        assert_eq!(
            params.set("Locked", 5_i64),
            Err(ParameterError::NotWritable {
                name: "Locked".into()
            })
        );
        assert_eq!(
            params.get::<f64>("Secret"),
            Err(ParameterError::NotReadable {
                name: "Secret".into()
            })
        );
        assert!(matches!(
            params.get::<bool>("Missing"),
            Err(ParameterError::NotAvailable { .. })
        ));
    }

    #[test]
    fn kind_mismatch_is_reported() {
        let mut dir = directory();
        let params = ParameterAccess::new(&mut dir);
        assert_eq!(
            params.get::<i64>("Gain"),
            Err(ParameterError::TypeMismatch {
                name: "Gain".into(),
                expected: ParameterKind::Int,
                actual: ParameterKind::Float,
            })
        );
    }

    #[test]
    fn typed_round_trip_through_value_enum() {
        let mut dir = directory();
        let mut params = ParameterAccess::new(&mut dir);
        params
            .set_value("Gain", ParameterValue::Float(3.25))
            .unwrap();
        params
            .set_value("Reverse", ParameterValue::Bool(true))
            .unwrap();
        assert_eq!(
            params.get_value("Gain", ValueKind::Float).unwrap(),
            ParameterValue::Float(3.25)
        );
        assert!(params.get::<bool>("Reverse").unwrap());
    }

    #[test]
    fn enum_names_resolve_to_codes() {
        let mut dir = directory();
        let writes = Arc::clone(&dir.writes);
        let mut params = ParameterAccess::new(&mut dir);

        params.set_enum_by_name("Mode", "Continuous").unwrap();
        assert_eq!(params.get_enum_code("Mode").unwrap(), 2);
        assert_eq!(params.get_enum_name("Mode").unwrap(), "Continuous");
        assert_eq!(
            writes.lock().last().cloned(),
            Some(("Mode".into(), ParameterValue::EnumCode(2)))
        );
    }

    #[test]
    fn unavailable_enum_entries_are_rejected() {
        let mut dir = directory();
        let mut params = ParameterAccess::new(&mut dir);
        assert_eq!(
            params.set_enum_by_name("Mode", "Burst"),
            Err(ParameterError::UnknownEntry {
                name: "Mode".into(),
                entry: "Burst".into()
            })
        );
        assert!(params.has_enum_entry("Mode", "SingleFrame"));
        assert!(!params.has_enum_entry("Mode", "Burst"));
        assert!(!params.has_enum_entry("Locked", "SingleFrame"));
    }

    #[test]
    fn range_queries_check_readability() {
        let mut dir = directory();
        let params = ParameterAccess::new(&mut dir);
        assert_eq!(params.max_float("Gain").unwrap(), 255.5);
        assert_eq!(params.max_int("Locked").unwrap(), 9000);
        assert_eq!(params.min_int("Locked").unwrap(), 16);
        assert!(matches!(
            params.max_float("Secret"),
            Err(ParameterError::NotReadable { .. })
        ));
    }

    #[test]
    fn capability_queries() {
        let mut dir = directory();
        let params = ParameterAccess::new(&mut dir);
        assert!(params.can_read("Locked"));
        assert!(!params.can_write("Locked"));
        assert!(params.can_write("Secret"));
        assert!(!params.can_read("Secret"));
        assert!(!params.can_read("Missing"));
        assert!(params.is_available("Gain"));
    }
}

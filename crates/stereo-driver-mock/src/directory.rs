//! In-memory feature dictionary for simulated cameras.
//!
//! In strict mode (the default) any read of an unreadable node or write of an
//! unwritable one panics, so tests can prove the capability-checked façade
//! never lets such an access through.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use stereo_core::{
    sfnc, Access, DeviceFault, EnumEntry, ParameterDescriptor, ParameterDirectory, ParameterKind,
    ParameterValue,
};

/// One recorded access.
#[derive(Debug, Clone, PartialEq)]
pub enum AccessRecord {
    /// A read of the named node.
    Read(String),
    /// A write of a value to the named node.
    Write(String, ParameterValue),
}

#[derive(Debug, Clone)]
struct MockNode {
    kind: ParameterKind,
    access: Access,
    value: ParameterValue,
    int_range: (i64, i64),
    float_range: (f64, f64),
    entries: Vec<EnumEntry>,
}

/// Shared handle onto a directory's access log.
pub type AccessLog = Arc<Mutex<Vec<AccessRecord>>>;

/// In-memory parameter directory with access rights, enumerations and component selectors.
///
/// Strict by default: reading an unreadable node or writing an unwritable one
/// panics, so a test fails at the offending access.
#[derive(Debug, Clone)]
pub struct MockDirectory {
    nodes: HashMap<String, MockNode>,
    /// `ComponentEnable` is selected by (`SourceSelector`, `ComponentSelector`).
    component_enable: HashMap<(String, String), bool>,
    strict: bool,
    log: AccessLog,
}

impl Default for MockDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDirectory {
    /// An empty, strict directory.
    #[must_use]
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
            component_enable: HashMap::new(),
            strict: true,
            log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Panic on refused accesses (default) or report them as faults.
    #[must_use]
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    fn insert(&mut self, name: &str, node: MockNode) {
        self.nodes.insert(name.to_string(), node);
    }

    /// Add an integer node bounded by `range`.
    #[must_use]
    pub fn with_int(mut self, name: &str, value: i64, range: (i64, i64), access: Access) -> Self {
        self.insert(
            name,
            MockNode {
                kind: ParameterKind::Int,
                access,
                value: ParameterValue::Int(value),
                int_range: range,
                float_range: (0.0, 0.0),
                entries: Vec::new(),
            },
        );
        self
    }

    /// Add a float node bounded by `range`.
    #[must_use]
    pub fn with_float(mut self, name: &str, value: f64, range: (f64, f64), access: Access) -> Self {
        self.insert(
            name,
            MockNode {
                kind: ParameterKind::Float,
                access,
                value: ParameterValue::Float(value),
                int_range: (0, 0),
                float_range: range,
                entries: Vec::new(),
            },
        );
        self
    }

    /// Add a boolean node.
    #[must_use]
    pub fn with_bool(mut self, name: &str, value: bool, access: Access) -> Self {
        self.insert(
            name,
            MockNode {
                kind: ParameterKind::Bool,
                access,
                value: ParameterValue::Bool(value),
                int_range: (0, 0),
                float_range: (0.0, 0.0),
                entries: Vec::new(),
            },
        );
        self
    }

    /// Add a string node.
    #[must_use]
    pub fn with_string(mut self, name: &str, value: &str, access: Access) -> Self {
        self.insert(
            name,
            MockNode {
                kind: ParameterKind::String,
                access,
                value: ParameterValue::String(value.to_string()),
                int_range: (0, 0),
                float_range: (0.0, 0.0),
                entries: Vec::new(),
            },
        );
        self
    }

    /// Enumeration whose entry codes are the entry positions.
    #[must_use]
    pub fn with_enum(mut self, name: &str, entries: &[&str], current: &str, access: Access) -> Self {
        let entries: Vec<EnumEntry> = entries
            .iter()
            .enumerate()
            .map(|(code, entry)| EnumEntry {
                name: (*entry).to_string(),
                code: code as i64,
                available: true,
            })
            .collect();
        let code = entries
            .iter()
            .find(|e| e.name == current)
            .map_or(0, |e| e.code);
        self.insert(
            name,
            MockNode {
                kind: ParameterKind::Enumeration,
                access,
                value: ParameterValue::EnumCode(code),
                int_range: (0, 0),
                float_range: (0.0, 0.0),
                entries,
            },
        );
        self
    }

    /// Change the access rights of an existing node.
    pub fn set_access(&mut self, name: &str, access: Access) {
        if let Some(node) = self.nodes.get_mut(name) {
            node.access = access;
        }
    }

    /// Make an enumeration entry unavailable.
    pub fn disable_entry(&mut self, name: &str, entry: &str) {
        if let Some(node) = self.nodes.get_mut(name) {
            for e in node.entries.iter_mut().filter(|e| e.name == entry) {
                e.available = false;
            }
        }
    }

    /// Drop a node, as if the device lacked the feature.
    pub fn remove(&mut self, name: &str) {
        self.nodes.remove(name);
    }

    /// Current value without access checks or logging.
    #[must_use]
    pub fn peek(&self, name: &str) -> Option<ParameterValue> {
        self.nodes.get(name).map(|n| n.value.clone())
    }

    /// Current entry name of an enumeration without access checks.
    #[must_use]
    pub fn peek_enum(&self, name: &str) -> Option<String> {
        let node = self.nodes.get(name)?;
        let ParameterValue::EnumCode(code) = node.value else {
            return None;
        };
        node.entries
            .iter()
            .find(|e| e.code == code)
            .map(|e| e.name.clone())
    }

    /// Overwrite a value without access checks or logging.
    pub fn poke(&mut self, name: &str, value: ParameterValue) {
        if let Some(node) = self.nodes.get_mut(name) {
            node.value = value;
        }
    }

    /// Transmit flag of one (source, component) pair.
    #[must_use]
    pub fn component_enabled(&self, source: &str, component: &str) -> bool {
        self.component_enable
            .get(&(source.to_string(), component.to_string()))
            .copied()
            .unwrap_or(false)
    }

    /// Shared log of every access to this nodemap.
    #[must_use]
    pub fn access_log(&self) -> AccessLog {
        Arc::clone(&self.log)
    }

    fn selected_component(&self) -> Option<(String, String)> {
        Some((
            self.peek_enum(sfnc::SOURCE_SELECTOR)?,
            self.peek_enum(sfnc::COMPONENT_SELECTOR)?,
        ))
    }

    fn refuse(&self, message: String) -> DeviceFault {
        assert!(!self.strict, "{message}");
        DeviceFault::rejected(message)
    }
}

impl ParameterDirectory for MockDirectory {
    fn descriptor(&self, name: &str) -> Option<ParameterDescriptor> {
        self.nodes.get(name).map(|n| ParameterDescriptor {
            name: name.to_string(),
            kind: n.kind,
            access: n.access,
        })
    }

    fn read(&self, name: &str) -> Result<ParameterValue, DeviceFault> {
        let node = self
            .nodes
            .get(name)
            .ok_or_else(|| self.refuse(format!("read of missing node {name}")))?;
        if !node.access.readable {
            return Err(self.refuse(format!("read of unreadable node {name}")));
        }
        self.log.lock().push(AccessRecord::Read(name.to_string()));

        if name == sfnc::COMPONENT_ENABLE {
            if let Some((source, component)) = self.selected_component() {
                return Ok(ParameterValue::Bool(
                    self.component_enabled(&source, &component),
                ));
            }
        }
        Ok(node.value.clone())
    }

    fn write(&mut self, name: &str, value: ParameterValue) -> Result<(), DeviceFault> {
        let node = match self.nodes.get(name) {
            Some(node) => node.clone(),
            None => return Err(self.refuse(format!("write of missing node {name}"))),
        };
        if !node.access.writable {
            return Err(self.refuse(format!("write of unwritable node {name}")));
        }
        if value.kind() != node.kind {
            return Err(DeviceFault::rejected(format!(
                "{name} is {}, got {}",
                node.kind,
                value.kind()
            )));
        }
        match value {
            ParameterValue::Int(v) if v < node.int_range.0 || v > node.int_range.1 => {
                return Err(DeviceFault::rejected(format!("{name}={v} out of range")));
            }
            ParameterValue::Float(v) if v < node.float_range.0 || v > node.float_range.1 => {
                return Err(DeviceFault::rejected(format!("{name}={v} out of range")));
            }
            ParameterValue::EnumCode(code) if !node.entries.iter().any(|e| e.code == code) => {
                return Err(DeviceFault::rejected(format!("{name} has no entry {code}")));
            }
            _ => {}
        }
        self.log
            .lock()
            .push(AccessRecord::Write(name.to_string(), value.clone()));

        if name == sfnc::COMPONENT_ENABLE {
            if let (Some(key), ParameterValue::Bool(enabled)) = (self.selected_component(), &value)
            {
                self.component_enable.insert(key, *enabled);
            }
        }
        if let Some(node) = self.nodes.get_mut(name) {
            node.value = value;
        }
        Ok(())
    }

    fn enum_entries(&self, name: &str) -> Result<Vec<EnumEntry>, DeviceFault> {
        self.nodes
            .get(name)
            .map(|n| n.entries.clone())
            .ok_or_else(|| DeviceFault::rejected(format!("no enumeration {name}")))
    }

    fn int_range(&self, name: &str) -> Result<(i64, i64), DeviceFault> {
        self.nodes
            .get(name)
            .map(|n| n.int_range)
            .ok_or_else(|| DeviceFault::rejected(format!("no integer {name}")))
    }

    fn float_range(&self, name: &str) -> Result<(f64, f64), DeviceFault> {
        self.nodes
            .get(name)
            .map(|n| n.float_range)
            .ok_or_else(|| DeviceFault::rejected(format!("no float {name}")))
    }
}

//! Error types shared by device backends and the acquisition worker.
//!
//! The taxonomy follows how far a failure propagates:
//!
//! - **`ParameterError`** - a single feature access was refused (`NotReadable`,
//!   `NotWritable`, ...). Fatal to the configuration sequence that issued it.
//! - **`DeviceFault`** - the transport or device reported a failure. Caught at
//!   the worker boundary and never allowed to terminate the process.
//! - **`CaptureError`** - one bounded wait for a capture event failed. The
//!   iteration is skipped and the capture loop continues.
//! - **`StereoError`** / **`DecompressError`** - an external computational
//!   service failed on one event.
//!
//! Worker-fatal outcomes (`ConfigurationFailed`, `AllocationFailed`) are not
//! errors here: they are reported as the worker's run result.

use std::time::Duration;
use thiserror::Error;

// =============================================================================
// Device Faults
// =============================================================================

/// Coarse class of a [`DeviceFault`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// The device stopped answering.
    Communication,
    /// The device reported a failure of its own.
    Hardware,
    /// The request was understood and refused.
    Rejected,
    /// The device has no such feature.
    NotSupported,
    /// The request does not fit the device's current state.
    InvalidState,
}

impl std::fmt::Display for FaultKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            FaultKind::Communication => "communication",
            FaultKind::Hardware => "hardware",
            FaultKind::Rejected => "rejected",
            FaultKind::NotSupported => "not_supported",
            FaultKind::InvalidState => "invalid_state",
        };
        write!(f, "{}", label)
    }
}

/// A failure reported by the device or its transport layer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind} fault: {message}")]
pub struct DeviceFault {
    /// What class of failure it was.
    pub kind: FaultKind,
    /// Backend's description.
    pub message: String,
}

impl DeviceFault {
    /// A fault of any kind.
    pub fn new(kind: FaultKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// The link to the device failed.
    pub fn communication(message: impl Into<String>) -> Self {
        Self::new(FaultKind::Communication, message)
    }

    /// The device refused a request.
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::new(FaultKind::Rejected, message)
    }

    /// The call is not allowed in the device's current lifecycle state.
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::new(FaultKind::InvalidState, message)
    }
}

// =============================================================================
// Parameter Errors
// =============================================================================

/// A refused access to one named device parameter.
///
/// Every variant carries the parameter name so a failed configuration step can
/// be reported without further context.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParameterError {
    #[error("parameter '{name}' is not available on this device")]
    NotAvailable { name: String },

    #[error("unable to read '{name}': parameter is not readable")]
    NotReadable { name: String },

    #[error("unable to set '{name}': parameter is not writable")]
    NotWritable { name: String },

    #[error("parameter '{name}' is {actual}, not {expected}")]
    TypeMismatch {
        name: String,
        expected: crate::parameter::ParameterKind,
        actual: crate::parameter::ParameterKind,
    },

    #[error("'{entry}' is not an available entry of '{name}'")]
    UnknownEntry { name: String, entry: String },

    #[error("transport fault accessing '{name}': {source}")]
    Transport {
        name: String,
        #[source]
        source: DeviceFault,
    },
}

impl ParameterError {
    /// Name of the parameter the failed access targeted.
    #[must_use]
    pub fn parameter(&self) -> &str {
        match self {
            ParameterError::NotAvailable { name }
            | ParameterError::NotReadable { name }
            | ParameterError::NotWritable { name }
            | ParameterError::TypeMismatch { name, .. }
            | ParameterError::UnknownEntry { name, .. }
            | ParameterError::Transport { name, .. } => name,
        }
    }
}

// =============================================================================
// Capture Errors
// =============================================================================

/// Failure of one bounded wait for a capture event.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("no capture event within {0:?}")]
    Timeout(Duration),

    #[error("device is not streaming")]
    NotStreaming,

    #[error(transparent)]
    Transport(#[from] DeviceFault),
}

// =============================================================================
// External Service Errors
// =============================================================================

/// Failure of the stereo service on one event.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StereoError {
    #[error("plane geometry mismatch: {0}")]
    Geometry(String),

    #[error("unsupported pixel format for {component}: {format}")]
    PixelFormat { component: String, format: String },

    #[error("stereo service failed: {0}")]
    Service(String),
}

/// Failure of the decompressor on one payload.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecompressError {
    #[error("payload is not compressed")]
    NotCompressed,

    #[error("output buffer holds {capacity} bytes, decoded image needs {required}")]
    OutputTooSmall { capacity: usize, required: usize },

    #[error("decompression failed: {0}")]
    Codec(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parameter_errors_name_the_parameter() {
        let err = ParameterError::NotWritable {
            name: "AcquisitionMode".into(),
        };
        assert_eq!(err.parameter(), "AcquisitionMode");
        assert!(err.to_string().contains("AcquisitionMode"));

        let err = ParameterError::Transport {
            name: "PayloadSize".into(),
            source: DeviceFault::communication("link down"),
        };
        assert!(err.to_string().contains("PayloadSize"));
        assert!(err.to_string().contains("link down"));
    }

    #[test]
    fn fault_display_has_kind() {
        let fault = DeviceFault::rejected("buffers too small");
        assert_eq!(fault.to_string(), "rejected fault: buffers too small");
    }
}

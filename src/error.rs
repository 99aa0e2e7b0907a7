//! Process-level error type.
//!
//! `AppError` covers the faults that stop a run before any worker starts:
//! unreadable or invalid configuration, an unwritable output directory, a
//! failed enumeration, or no devices at all. Everything that happens inside a
//! worker is reported per device instead (see [`crate::outcome`]).

use std::path::PathBuf;
use stereo_core::DeviceFault;
use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, AppError>;

/// Failures that end a run before or after the workers.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("Output directory {} is not writable: {source}", path.display())]
    OutputNotWritable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Device enumeration failed: {0}")]
    Enumeration(#[source] DeviceFault),

    #[error("No devices detected")]
    NoDevices,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to write run summary: {0}")]
    Summary(#[from] crate::persistence::PersistError),
}

impl From<figment::Error> for AppError {
    fn from(err: figment::Error) -> Self {
        AppError::Config(Box::new(err))
    }
}

//! Simulated stereo cameras for stereo-daq
//!
//! This crate provides a complete stand-in for a camera transport so the
//! acquisition pipeline can run without hardware.
//!
//! # Available Mocks
//!
//! - [`MockDeviceSystem`] - enumerates and opens simulated cameras
//! - [`MockStereoCamera`] - stereo (five components) or mono camera with
//!   GenICam-style feature dictionaries, caller buffer support and run-length
//!   "lossless compression"
//! - [`MockDirectory`] - strict in-memory feature dictionary
//! - [`MockStereoService`] - counting stereo service
//! - [`MockDecompressor`] - decoder for the mock transfer encoding
//!
//! # Error Injection
//!
//! ```rust,ignore
//! use stereo_driver_mock::{ErrorConfig, ErrorScenario, MockStereoCamera};
//!
//! let camera = MockStereoCamera::builder()
//!     .serial("22010001")
//!     .error_config(ErrorConfig::scenario(ErrorScenario::TimeoutAt { iteration: 2 }))
//!     .build();
//! ```

pub mod common;
mod directory;
mod pattern;
mod services;
mod stereo_camera;
mod system;

pub use common::{ErrorConfig, ErrorScenario, InjectedEventFault, MockMode, MockRng};
pub use directory::{AccessLog, AccessRecord, MockDirectory};
pub use pattern::{disparity_plane, rle_decode, rle_encode, sensor_plane};
pub use services::{MockDecompressor, MockStereoService};
pub use stereo_camera::{MockDeviceStats, MockLifecycle, MockStereoCamera, MockStereoCameraBuilder};
pub use system::{MockDeviceConfig, MockDeviceSystem};

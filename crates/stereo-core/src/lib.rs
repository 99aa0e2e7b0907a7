//! Core types and traits for multi-camera stereo acquisition.
//!
//! This crate holds everything device backends, the acquisition worker and
//! the external computational services agree on:
//!
//! - [`parameter`] - capability-checked access to a device's feature dictionary
//! - [`sfnc`] - standard feature and enumeration entry names
//! - [`component`] / [`event`] - stream components, capture events, payloads
//! - [`validation`] - the multi-stream completeness check
//! - [`device`] - the `Device` / `DeviceSystem` boundary
//! - [`stereo`] / [`decompress`] - external stereo and GPU service boundaries
//! - [`error`] - the shared error taxonomy
//!
//! Buffer memory types are re-exported from `stereo-pool`.

pub mod cancel;
pub mod component;
pub mod decompress;
pub mod device;
pub mod error;
pub mod event;
pub mod parameter;
pub mod sfnc;
pub mod stereo;
pub mod validation;

pub use cancel::CancellationFlag;
pub use component::{ComponentKind, StreamConfigError, StreamTransmitConfig};
pub use decompress::{DecodedImage, Decompressor};
pub use device::{Device, DeviceInfo, DeviceSystem, Nodemap};
pub use error::{
    CaptureError, DecompressError, DeviceFault, FaultKind, ParameterError, StereoError,
};
pub use event::{CaptureEvent, ComponentPayload, PayloadStatus, PixelFormat};
pub use parameter::{
    Access, EnumEntry, ParameterAccess, ParameterDescriptor, ParameterDirectory, ParameterKind,
    ParameterType, ParameterValue, ValueKind,
};
pub use stereo::{
    filter_speckles, CloudPoint, DisparityMap, PointCloud, SpeckleParams, SpeckleStats,
    StereoCalibration, StereoService,
};
pub use stereo_pool::{BufferOwnership, PinnedRegion, TransportClass};
pub use validation::{validate, ComponentIssue, IncompleteReport, Validation};

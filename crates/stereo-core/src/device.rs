//! Device and device-system boundaries.
//!
//! A [`DeviceSystem`] enumerates the cameras visible to the process and opens
//! handles to them. Each [`Device`] handle is owned by exactly one acquisition
//! worker and moved onto that worker's thread, hence the `Send` bound.
//!
//! The trait mirrors the lifecycle a worker drives:
//!
//! ```text
//! init -> configure via params() -> attach_buffers -> begin_acquisition
//!      -> (next_event -> release_event)* -> end_acquisition
//!      -> detach_buffers -> deinit
//! ```

use crate::error::{CaptureError, DeviceFault};
use crate::event::CaptureEvent;
use crate::parameter::{ParameterAccess, ParameterDirectory};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use stereo_pool::{BufferOwnership, PinnedRegion, TransportClass};

/// Identity of an enumerated device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Position in the enumeration order.
    pub index: usize,
    /// Serial number; unique per camera.
    pub serial_number: String,
    /// Vendor model string; eligibility rules may match its prefix.
    pub model_name: String,
    /// Link the camera is attached through.
    pub transport: TransportClass,
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} {} (serial {}, {})",
            self.index, self.model_name, self.serial_number, self.transport
        )
    }
}

/// The three feature dictionaries a device exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Nodemap {
    /// Camera features (acquisition, image format, stereo processing).
    Device,
    /// Host-side stream settings (buffer handling).
    Stream,
    /// Transport-layer device information (type, serial, heartbeat).
    TransportLayer,
}

/// One opened camera.
pub trait Device: Send {
    /// Identity captured at enumeration.
    fn info(&self) -> &DeviceInfo;

    fn is_initialized(&self) -> bool;

    /// Connect to the camera. Calling it on an initialised device is a no-op.
    fn init(&mut self) -> Result<(), DeviceFault>;

    /// Disconnect. Buffers must be detached first.
    fn deinit(&mut self) -> Result<(), DeviceFault>;

    /// Raw feature dictionary; prefer [`Device::params`].
    fn parameters(&mut self, map: Nodemap) -> &mut dyn ParameterDirectory;

    /// Capability-checked access to one of the device's dictionaries.
    fn params(&mut self, map: Nodemap) -> ParameterAccess<'_> {
        ParameterAccess::new(self.parameters(map))
    }

    /// Largest packet the link to this device can carry (GigE).
    fn discover_max_packet_size(&mut self) -> Result<i64, DeviceFault>;

    /// Stream into caller-provided memory. On success ownership is `Caller`.
    fn attach_buffers(&mut self, region: Arc<PinnedRegion>) -> Result<(), DeviceFault>;

    /// Drop the device's reference to the region and return to system buffers.
    fn detach_buffers(&mut self) -> Result<(), DeviceFault>;

    fn buffer_ownership(&self) -> BufferOwnership;

    fn begin_acquisition(&mut self) -> Result<(), DeviceFault>;

    fn end_acquisition(&mut self) -> Result<(), DeviceFault>;

    fn is_streaming(&self) -> bool;

    /// Wait at most `timeout` for the next event.
    fn next_event(&mut self, timeout: Duration) -> Result<CaptureEvent, CaptureError>;

    /// Hand an event's buffer back to the stream.
    fn release_event(&mut self, event: CaptureEvent) -> Result<(), DeviceFault>;
}

/// Process-wide access to the installed transports.
pub trait DeviceSystem: Send + Sync {
    fn library_version(&self) -> String;

    fn enumerate(&self) -> Result<Vec<DeviceInfo>, DeviceFault>;

    fn open(&self, info: &DeviceInfo) -> Result<Box<dyn Device>, DeviceFault>;
}

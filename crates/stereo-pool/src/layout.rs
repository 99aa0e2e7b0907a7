//! Buffer sizing rules per transport class.

use crate::error::PoolError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Buffer size quantum required by USB3 Vision transports.
pub const USB3_ALIGNMENT: usize = 1024;

/// Physical transport a device is attached through.
///
/// Reported by the transport-layer `DeviceType` feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TransportClass {
    /// GigE Vision; buffers are not rounded.
    #[default]
    #[serde(rename = "gige")]
    GigEVision,
    /// USB3 Vision; buffers are rounded to whole kilobytes.
    #[serde(rename = "usb3")]
    Usb3Vision,
    /// Any other transport; buffers are not rounded.
    Other,
}

impl TransportClass {
    /// Size quantum every stream buffer must be a multiple of.
    #[must_use]
    pub fn alignment_quantum(self) -> usize {
        match self {
            TransportClass::Usb3Vision => USB3_ALIGNMENT,
            TransportClass::GigEVision | TransportClass::Other => 1,
        }
    }

    /// Map a `DeviceType` enumeration entry name to a transport class.
    #[must_use]
    pub fn from_device_type(entry: &str) -> Self {
        match entry {
            "GigEVision" => TransportClass::GigEVision,
            "USB3Vision" => TransportClass::Usb3Vision,
            _ => TransportClass::Other,
        }
    }

    /// `DeviceType` enumeration entry name for this class.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            TransportClass::GigEVision => "GigEVision",
            TransportClass::Usb3Vision => "USB3Vision",
            TransportClass::Other => "Other",
        }
    }
}

impl fmt::Display for TransportClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Round `value` up to the next multiple of `quantum`.
///
/// A quantum of 0 or 1 returns `value` unchanged.
#[must_use]
pub fn round_up(value: usize, quantum: usize) -> usize {
    if quantum <= 1 {
        return value;
    }
    value.div_ceil(quantum) * quantum
}

/// Shape of a contiguous stream buffer region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferLayout {
    payload_size: usize,
    buffer_size: usize,
    buffer_count: usize,
}

impl BufferLayout {
    /// Derive the layout for `buffer_count` frames of `payload_size` bytes.
    ///
    /// The per-buffer size is the payload rounded up to the transport quantum.
    pub fn for_payload(
        payload_size: usize,
        buffer_count: usize,
        transport: TransportClass,
    ) -> Result<Self, PoolError> {
        if payload_size == 0 {
            return Err(PoolError::InvalidLayout {
                reason: "payload size is zero".into(),
            });
        }
        if buffer_count == 0 {
            return Err(PoolError::InvalidLayout {
                reason: "buffer count is zero".into(),
            });
        }
        let buffer_size = round_up(payload_size, transport.alignment_quantum());
        if buffer_size.checked_mul(buffer_count).is_none() {
            return Err(PoolError::InvalidLayout {
                reason: format!("{buffer_count} x {buffer_size} bytes overflows"),
            });
        }
        Ok(Self {
            payload_size,
            buffer_size,
            buffer_count,
        })
    }

    /// Payload size the device reported.
    #[must_use]
    pub fn payload_size(&self) -> usize {
        self.payload_size
    }

    /// Size of one slot after alignment.
    #[must_use]
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Number of slots in the region.
    #[must_use]
    pub fn buffer_count(&self) -> usize {
        self.buffer_count
    }

    /// Total bytes of the contiguous region.
    #[must_use]
    pub fn total_bytes(&self) -> usize {
        self.buffer_size * self.buffer_count
    }
}

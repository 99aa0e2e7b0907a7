//! Capture events and the component payloads they carry.

use crate::component::ComponentKind;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Pixel layout of a payload after any decompression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    /// 8-bit grayscale.
    Mono8,
    /// 16-bit grayscale, little-endian.
    Mono16,
    /// 8-bit Bayer mosaic, RGGB.
    BayerRG8,
    /// Packed 8-bit RGB.
    Rgb8,
    /// 16-bit sub-pixel disparity.
    Coord3dC16,
}

impl PixelFormat {
    /// Bytes one pixel occupies.
    #[must_use]
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Mono8 | PixelFormat::BayerRG8 => 1,
            PixelFormat::Mono16 | PixelFormat::Coord3dC16 => 2,
            PixelFormat::Rgb8 => 3,
        }
    }

    /// `PixelFormat` enumeration entry name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            PixelFormat::Mono8 => "Mono8",
            PixelFormat::Mono16 => "Mono16",
            PixelFormat::BayerRG8 => "BayerRG8",
            PixelFormat::Rgb8 => "RGB8",
            PixelFormat::Coord3dC16 => "Coord3D_C16",
        }
    }

    /// Parse a `PixelFormat` enumeration entry name.
    #[must_use]
    pub fn from_entry(entry: &str) -> Option<Self> {
        [
            PixelFormat::Mono8,
            PixelFormat::Mono16,
            PixelFormat::BayerRG8,
            PixelFormat::Rgb8,
            PixelFormat::Coord3dC16,
        ]
        .into_iter()
        .find(|format| format.as_str() == entry)
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Completeness of one payload as reported by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PayloadStatus {
    /// Every packet arrived.
    Complete,
    /// The transport lost data; `reason` says how.
    Incomplete { reason: String },
}

impl PayloadStatus {
    /// The payload arrived whole.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        matches!(self, PayloadStatus::Complete)
    }
}

/// One image plane of a capture event.
#[derive(Debug, Clone)]
pub struct ComponentPayload {
    /// Which plane this is.
    pub kind: ComponentKind,
    /// Transport completeness.
    pub status: PayloadStatus,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Layout of the decoded pixels.
    pub pixel_format: PixelFormat,
    /// Payload bytes are in a compressed transfer encoding.
    pub compressed: bool,
    /// Plane bytes; 16-bit samples are little-endian.
    pub data: Bytes,
}

impl ComponentPayload {
    /// A complete, uncompressed payload.
    pub fn complete(
        kind: ComponentKind,
        width: u32,
        height: u32,
        pixel_format: PixelFormat,
        data: impl Into<Bytes>,
    ) -> Self {
        Self {
            kind,
            status: PayloadStatus::Complete,
            width,
            height,
            pixel_format,
            compressed: false,
            data: data.into(),
        }
    }

    /// Every payload of the event arrived whole.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.status.is_complete()
    }

    /// Bytes an uncompressed plane of this geometry occupies.
    #[must_use]
    pub fn decoded_len(&self) -> usize {
        self.width as usize * self.height as usize * self.pixel_format.bytes_per_pixel()
    }
}

/// One retrieval from a device: zero or more component payloads.
///
/// Obtained from [`Device::next_event`](crate::device::Device::next_event) and
/// handed back by value to
/// [`Device::release_event`](crate::device::Device::release_event), so an
/// event cannot be released twice.
#[derive(Debug)]
pub struct CaptureEvent {
    frame_id: u64,
    timestamp_ns: u64,
    buffer_slot: Option<usize>,
    payloads: Vec<ComponentPayload>,
}

impl CaptureEvent {
    /// An event with no timestamp and no buffer slot.
    #[must_use]
    pub fn new(frame_id: u64, payloads: Vec<ComponentPayload>) -> Self {
        Self {
            frame_id,
            timestamp_ns: 0,
            buffer_slot: None,
            payloads,
        }
    }

    /// Device timestamp in nanoseconds.
    #[must_use]
    pub fn with_timestamp(mut self, timestamp_ns: u64) -> Self {
        self.timestamp_ns = timestamp_ns;
        self
    }

    /// Record which slot of the attached region holds this event.
    #[must_use]
    pub fn with_buffer_slot(mut self, slot: usize) -> Self {
        self.buffer_slot = Some(slot);
        self
    }

    /// Device frame counter.
    #[must_use]
    pub fn frame_id(&self) -> u64 {
        self.frame_id
    }

    /// Device timestamp in nanoseconds.
    #[must_use]
    pub fn timestamp_ns(&self) -> u64 {
        self.timestamp_ns
    }

    /// Slot of the attached region holding this event, if any.
    #[must_use]
    pub fn buffer_slot(&self) -> Option<usize> {
        self.buffer_slot
    }

    /// Payloads in transmit order.
    #[must_use]
    pub fn payloads(&self) -> &[ComponentPayload] {
        &self.payloads
    }

    /// First payload of `kind`, if present.
    #[must_use]
    pub fn component(&self, kind: ComponentKind) -> Option<&ComponentPayload> {
        self.payloads.iter().find(|p| p.kind == kind)
    }
}

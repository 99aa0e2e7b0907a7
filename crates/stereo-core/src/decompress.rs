//! Boundary to the GPU decompression kernel.

use crate::error::DecompressError;
use crate::event::{ComponentPayload, PixelFormat};

/// Geometry of an image written into the caller's output buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedImage {
    /// Decoded width in pixels.
    pub width: u32,
    /// Decoded height in pixels.
    pub height: u32,
    /// Layout of the decoded pixels.
    pub pixel_format: PixelFormat,
    /// Bytes of the output buffer that hold the image.
    pub len: usize,
}

/// Decompresses one payload into a preallocated, pinned output buffer.
///
/// Implementations must not allocate the output themselves; the caller sizes
/// the buffer once per worker and reuses it for every event.
pub trait Decompressor: Send + Sync {
    /// Short decoder name for logs and the run summary.
    fn name(&self) -> &str;

    /// Decode `payload` into `output`, which is at least `payload.decoded_len()` bytes.
    fn decompress(
        &self,
        payload: &ComponentPayload,
        output: &mut [u8],
    ) -> Result<DecodedImage, DecompressError>;
}

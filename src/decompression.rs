//! Hand-off of compressed payloads to the GPU decompression kernel.
//!
//! Each worker owns one [`DecompressionStage`]. Its pinned output buffer is
//! allocated once, sized for the largest decoded plane, and reused for every
//! call. Every call is timed so the run summary can report throughput.

use crate::outcome::DecompressionTally;
use bytes::Bytes;
use std::sync::Arc;
use std::time::{Duration, Instant};
use stereo_core::{ComponentPayload, DecompressError, Decompressor, PixelFormat};
use stereo_pool::{BufferLayout, PinnedAllocator, PinnedRegion, PoolError, TransportClass};
use tracing::{debug, warn};

/// A decoder plus the pinned output buffer it decodes into, reused for every event of one worker.
pub struct DecompressionStage {
    decoder: Arc<dyn Decompressor>,
    output: PinnedRegion,
    calls: u64,
    failures: u64,
    decoded_bytes: u64,
    total: Duration,
}

impl DecompressionStage {
    /// Allocate the output buffer for planes of `width × height` in `format`.
    pub fn new(
        decoder: Arc<dyn Decompressor>,
        allocator: &dyn PinnedAllocator,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> Result<Self, PoolError> {
        let bytes = width as usize * height as usize * format.bytes_per_pixel();
        let layout = BufferLayout::for_payload(bytes, 1, TransportClass::Other)?;
        let output = allocator.allocate(layout)?;
        debug!(
            decoder = decoder.name(),
            bytes,
            pinned = output.is_pinned(),
            "decompression output allocated"
        );
        Ok(Self {
            decoder,
            output,
            calls: 0,
            failures: 0,
            decoded_bytes: 0,
            total: Duration::ZERO,
        })
    }

    /// Capacity of the output buffer in bytes.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.output.layout().buffer_size()
    }

    /// Decode one compressed payload into the output buffer.
    ///
    /// Returns an owned, complete payload so it can outlive the next call.
    pub fn decompress(
        &mut self,
        payload: &ComponentPayload,
    ) -> Result<ComponentPayload, DecompressError> {
        if !payload.compressed {
            return Err(DecompressError::NotCompressed);
        }
        let capacity = self.capacity();
        let output = self
            .output
            .slot_mut(0)
            .ok_or(DecompressError::OutputTooSmall {
                capacity: 0,
                required: payload.decoded_len(),
            })?;

        let started = Instant::now();
        let result = self.decoder.decompress(payload, output);
        let elapsed = started.elapsed();
        self.calls += 1;
        self.total += elapsed;

        match result {
            Ok(image) => {
                if image.len > capacity {
                    self.failures += 1;
                    return Err(DecompressError::OutputTooSmall {
                        capacity,
                        required: image.len,
                    });
                }
                self.decoded_bytes += image.len as u64;
                debug!(
                    component = %payload.kind,
                    bytes = image.len,
                    elapsed_us = elapsed.as_micros() as u64,
                    "payload decompressed"
                );
                Ok(ComponentPayload::complete(
                    payload.kind,
                    image.width,
                    image.height,
                    image.pixel_format,
                    Bytes::copy_from_slice(&output[..image.len]),
                ))
            }
            Err(err) => {
                self.failures += 1;
                warn!(component = %payload.kind, error = %err, "decompression failed");
                Err(err)
            }
        }
    }

    /// Calls, failures and average time so far.
    #[must_use]
    pub fn tally(&self) -> DecompressionTally {
        let average = if self.calls == 0 {
            Duration::ZERO
        } else {
            self.total / u32::try_from(self.calls).unwrap_or(u32::MAX)
        };
        let secs = self.total.as_secs_f64();
        let megabytes_per_second = if secs > 0.0 {
            self.decoded_bytes as f64 / (1024.0 * 1024.0) / secs
        } else {
            0.0
        };
        DecompressionTally {
            decoder: self.decoder.name().to_string(),
            calls: self.calls,
            failures: self.failures,
            total: self.total,
            average,
            megabytes_per_second,
        }
    }
}

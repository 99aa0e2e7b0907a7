//! Stand-ins for the external stereo and GPU decompression services.

use crate::pattern::rle_decode;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use stereo_core::{
    stereo, CloudPoint, ComponentPayload, DecodedImage, DecompressError, Decompressor,
    DisparityMap, PointCloud, SpeckleParams, SpeckleStats, StereoCalibration, StereoError,
    StereoService,
};

/// Stereo service that filters speckles in-process and fabricates a point
/// cloud in image coordinates, counting every call.
#[derive(Debug, Default)]
pub struct MockStereoService {
    speckle_calls: AtomicU64,
    point_cloud_calls: AtomicU64,
}

impl MockStereoService {
    /// A service that has not been called yet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Speckle filter calls so far.
    #[must_use]
    pub fn speckle_calls(&self) -> u64 {
        self.speckle_calls.load(Ordering::SeqCst)
    }

    /// Point cloud calls so far.
    #[must_use]
    pub fn point_cloud_calls(&self) -> u64 {
        self.point_cloud_calls.load(Ordering::SeqCst)
    }
}

impl StereoService for MockStereoService {
    fn filter_speckles(
        &self,
        disparity: &mut DisparityMap,
        params: &SpeckleParams,
    ) -> Result<SpeckleStats, StereoError> {
        self.speckle_calls.fetch_add(1, Ordering::SeqCst);
        stereo::filter_speckles(disparity, params)
    }

    /// Points are placed at `(u - cu, v - cv, disparity)`; no camera model is
    /// applied.
    fn compute_point_cloud(
        &self,
        disparity: &DisparityMap,
        reference: &ComponentPayload,
        calibration: &StereoCalibration,
    ) -> Result<PointCloud, StereoError> {
        self.point_cloud_calls.fetch_add(1, Ordering::SeqCst);
        if reference.width != disparity.width || reference.height != disparity.height {
            return Err(StereoError::Geometry(format!(
                "reference {}x{} does not match disparity {}x{}",
                reference.width, reference.height, disparity.width, disparity.height
            )));
        }
        let width = disparity.width as usize;
        let invalid = calibration.invalid_data_value as u16;
        let points = disparity
            .values
            .iter()
            .enumerate()
            .filter(|&(_, &d)| !(calibration.invalid_data_flag && d == invalid))
            .map(|(idx, &d)| CloudPoint {
                x: ((idx % width) as f64 - calibration.principal_point_u) as f32,
                y: ((idx / width) as f64 - calibration.principal_point_v) as f32,
                z: (f64::from(d) * calibration.coordinate_scale) as f32,
                intensity: reference.data.get(idx).copied().unwrap_or(0),
            })
            .collect();
        Ok(PointCloud { points })
    }
}

/// Decompressor for the mock cameras' run-length transfer encoding.
#[derive(Debug, Default)]
pub struct MockDecompressor {
    latency: Duration,
    calls: AtomicU64,
}

impl MockDecompressor {
    /// A decompressor that has not been called yet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long per call, as a kernel launch would.
    #[must_use]
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency,
            calls: AtomicU64::new(0),
        }
    }

    /// Decode calls so far, failed ones included.
    #[must_use]
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Decompressor for MockDecompressor {
    fn name(&self) -> &str {
        "mock-rle"
    }

    fn decompress(
        &self,
        payload: &ComponentPayload,
        output: &mut [u8],
    ) -> Result<DecodedImage, DecompressError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !payload.compressed {
            return Err(DecompressError::NotCompressed);
        }
        let required = payload.decoded_len();
        if output.len() < required {
            return Err(DecompressError::OutputTooSmall {
                capacity: output.len(),
                required,
            });
        }
        if !self.latency.is_zero() {
            std::thread::sleep(self.latency);
        }
        let len = rle_decode(&payload.data, &mut output[..required]).map_err(DecompressError::Codec)?;
        if len != required {
            return Err(DecompressError::Codec(format!(
                "decoded {len} bytes, expected {required}"
            )));
        }
        Ok(DecodedImage {
            width: payload.width,
            height: payload.height,
            pixel_format: payload.pixel_format,
            len,
        })
    }
}

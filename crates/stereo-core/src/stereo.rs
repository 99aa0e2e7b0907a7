//! Boundary to the stereo computational service.
//!
//! Disparity post-filtering and 3-D reconstruction are numeric services the
//! acquisition core consumes but does not own. The core decides *whether* to
//! call them (see the conditioning stage) and supplies the calibration read
//! back from the device.

use crate::component::ComponentKind;
use crate::error::StereoError;
use crate::event::{ComponentPayload, PixelFormat};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Calibration scalars read back from the camera before capture.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StereoCalibration {
    /// Distance between the optical centres, in meters.
    pub baseline: f64,
    /// Focal length in pixels.
    pub focal_length: f64,
    /// Principal point column.
    pub principal_point_u: f64,
    /// Principal point row.
    pub principal_point_v: f64,
    /// Raw disparity value × scale = disparity in pixels.
    pub coordinate_scale: f64,
    /// Added to scaled disparity, in pixels.
    pub coordinate_offset: f64,
    /// Invalid pixels carry `invalid_data_value`.
    pub invalid_data_flag: bool,
    /// Raw marker of invalid disparity pixels.
    pub invalid_data_value: f64,
}

impl Default for StereoCalibration {
    fn default() -> Self {
        Self {
            baseline: 0.0,
            focal_length: 0.0,
            principal_point_u: 0.0,
            principal_point_v: 0.0,
            coordinate_scale: 1.0 / 64.0,
            coordinate_offset: 0.0,
            invalid_data_flag: true,
            invalid_data_value: 0.0,
        }
    }
}

/// Inputs of the speckle filter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpeckleParams {
    /// Regions with fewer pixels than this are invalidated.
    pub max_region_size: usize,
    /// Largest disparity step, in pixels, between joined neighbours.
    pub threshold: f64,
    /// Raw-to-pixel disparity scale.
    pub scale: f64,
    /// Raw marker written to invalidated pixels; pixels holding it are ignored.
    pub invalid_value: u16,
}

/// What one speckle filter pass removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct SpeckleStats {
    /// Connected regions below the size limit.
    pub regions_removed: usize,
    /// Pixels set to the invalid marker.
    pub pixels_invalidated: usize,
}

/// Owned 16-bit disparity plane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisparityMap {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Raw disparities, row-major; `width × height` values.
    pub values: Vec<u16>,
}

impl DisparityMap {
    /// Decode a little-endian 16-bit disparity payload.
    pub fn from_payload(payload: &ComponentPayload) -> Result<Self, StereoError> {
        if payload.pixel_format != PixelFormat::Coord3dC16 || payload.compressed {
            return Err(StereoError::PixelFormat {
                component: payload.kind.to_string(),
                format: payload.pixel_format.to_string(),
            });
        }
        let expected = payload.decoded_len();
        if payload.data.len() != expected {
            return Err(StereoError::Geometry(format!(
                "{} bytes for a {}x{} disparity plane, expected {expected}",
                payload.data.len(),
                payload.width,
                payload.height
            )));
        }
        let values = payload
            .data
            .chunks_exact(2)
            .map(|b| u16::from_le_bytes([b[0], b[1]]))
            .collect();
        Ok(Self {
            width: payload.width,
            height: payload.height,
            values,
        })
    }

    /// Encode back into a payload of the disparity component.
    #[must_use]
    pub fn to_payload(&self) -> ComponentPayload {
        let data: Vec<u8> = self.values.iter().flat_map(|v| v.to_le_bytes()).collect();
        ComponentPayload::complete(
            ComponentKind::DisparitySensor1,
            self.width,
            self.height,
            PixelFormat::Coord3dC16,
            data,
        )
    }
}

/// One reconstructed point, in the reference camera frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CloudPoint {
    /// Horizontal position.
    pub x: f32,
    /// Vertical position.
    pub y: f32,
    /// Depth along the optical axis.
    pub z: f32,
    /// Gray value of the reference pixel.
    pub intensity: u8,
}

/// Points of one event; invalid pixels are skipped.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PointCloud {
    /// Row-major order of the source pixels.
    pub points: Vec<CloudPoint>,
}

impl PointCloud {
    /// Number of points.
    #[must_use]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// True when no pixel produced a point.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Stereo post-processing and reconstruction.
pub trait StereoService: Send + Sync {
    /// Invalidate small disparity regions in place.
    fn filter_speckles(
        &self,
        disparity: &mut DisparityMap,
        params: &SpeckleParams,
    ) -> Result<SpeckleStats, StereoError> {
        filter_speckles(disparity, params)
    }

    /// Reconstruct 3-D points from disparity and the rectified reference plane.
    fn compute_point_cloud(
        &self,
        disparity: &DisparityMap,
        reference: &ComponentPayload,
        calibration: &StereoCalibration,
    ) -> Result<PointCloud, StereoError>;
}

/// Remove connected disparity regions smaller than `params.max_region_size`.
///
/// Neighbours (4-connected) belong to one region when their disparities, in
/// pixels, differ by at most `params.threshold`. A map whose value count does
/// not match its dimensions is refused and left untouched.
pub fn filter_speckles(
    map: &mut DisparityMap,
    params: &SpeckleParams,
) -> Result<SpeckleStats, StereoError> {
    let width = map.width as usize;
    let height = map.height as usize;
    if map.values.len() != width * height {
        return Err(StereoError::Geometry(format!(
            "{} disparity values for a {width}x{height} plane",
            map.values.len()
        )));
    }
    let mut stats = SpeckleStats::default();
    if width == 0 || height == 0 || params.max_region_size == 0 {
        return Ok(stats);
    }

    let max_step = params.threshold / params.scale.max(f64::EPSILON);
    let mut labels = vec![0u32; width * height];
    let mut region = Vec::new();
    let mut queue = VecDeque::new();
    let mut next_label = 0u32;

    for start in 0..map.values.len() {
        if labels[start] != 0 || map.values[start] == params.invalid_value {
            continue;
        }
        next_label += 1;
        labels[start] = next_label;
        region.clear();
        queue.push_back(start);

        while let Some(idx) = queue.pop_front() {
            region.push(idx);
            let value = f64::from(map.values[idx]);
            let (x, y) = (idx % width, idx / width);
            let neighbours = [
                (x > 0).then(|| idx - 1),
                (x + 1 < width).then(|| idx + 1),
                (y > 0).then(|| idx - width),
                (y + 1 < height).then(|| idx + width),
            ];
            for n in neighbours.into_iter().flatten() {
                if labels[n] == 0
                    && map.values[n] != params.invalid_value
                    && (f64::from(map.values[n]) - value).abs() <= max_step
                {
                    labels[n] = next_label;
                    queue.push_back(n);
                }
            }
        }

        if region.len() < params.max_region_size {
            stats.regions_removed += 1;
            stats.pixels_invalidated += region.len();
            for &idx in &region {
                map.values[idx] = params.invalid_value;
            }
        }
    }
    Ok(stats)
}

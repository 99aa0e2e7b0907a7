//! Post-capture conditioning of the disparity plane.
//!
//! Whether the speckle filter runs is decided here; the filter itself belongs
//! to the [`StereoService`]. A skipped pass leaves the plane untouched and
//! carries the reason so the worker can log and count it.

use crate::config::StereoSettings;
use std::fmt;
use stereo_core::{
    DisparityMap, SpeckleParams, SpeckleStats, StereoCalibration, StereoError, StereoService,
    StreamTransmitConfig,
};

/// Why the speckle filter did not run on an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The filter is switched off.
    PostProcessingDisabled,
    /// The disparity component is not transmitted.
    DisparityDisabled,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::PostProcessingDisabled => f.write_str("disparity post-processing is disabled"),
            SkipReason::DisparityDisabled => {
                f.write_str("disparity component is not enabled for transmission")
            }
        }
    }
}

/// What conditioning did to one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditioningOutcome {
    /// The filter ran.
    Applied(SpeckleStats),
    /// The filter did not run.
    Skipped(SkipReason),
}

/// Filter knobs fixed for a run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Conditioning {
    /// Run the filter at all.
    pub post_process: bool,
    /// Regions smaller than this many pixels are invalidated.
    pub max_region_size: usize,
    /// Largest disparity step, in pixels, inside one region.
    pub threshold: f64,
}

impl Conditioning {
    /// Knobs taken from the stereo settings.
    #[must_use]
    pub fn from_settings(settings: &StereoSettings) -> Self {
        Self {
            post_process: settings.post_process,
            max_region_size: settings.max_speckle_size,
            threshold: settings.speckle_threshold,
        }
    }

    /// Why the filter will not run for this configuration, if it will not.
    #[must_use]
    pub fn skip_reason(&self, enabled: &StreamTransmitConfig) -> Option<SkipReason> {
        if !self.post_process {
            Some(SkipReason::PostProcessingDisabled)
        } else if !enabled.disparity_sensor1 {
            Some(SkipReason::DisparityDisabled)
        } else {
            None
        }
    }

    /// Filter parameters in the device's disparity units.
    #[must_use]
    pub fn params(&self, calibration: &StereoCalibration) -> SpeckleParams {
        let invalid = calibration.invalid_data_value.clamp(0.0, f64::from(u16::MAX));
        SpeckleParams {
            max_region_size: self.max_region_size,
            threshold: self.threshold,
            scale: calibration.coordinate_scale,
            invalid_value: invalid.round() as u16,
        }
    }

    /// Condition `plane` in place, or leave it unchanged with a reason.
    pub fn condition(
        &self,
        service: &dyn StereoService,
        plane: &mut DisparityMap,
        enabled: &StreamTransmitConfig,
        calibration: &StereoCalibration,
    ) -> Result<ConditioningOutcome, StereoError> {
        if let Some(reason) = self.skip_reason(enabled) {
            return Ok(ConditioningOutcome::Skipped(reason));
        }
        let stats = service.filter_speckles(plane, &self.params(calibration))?;
        Ok(ConditioningOutcome::Applied(stats))
    }
}

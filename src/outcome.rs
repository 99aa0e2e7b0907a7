//! What a worker reports back to the orchestrator.
//!
//! Expected outcomes of a device run (not eligible, a configuration step
//! refused, capture could not start) are values of [`DeviceRunResult`].
//! [`WorkerFault`] is reserved for runs that produced no result at all: the
//! device could not be opened or the worker thread died.

use crate::worker::WorkerState;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use stereo_core::{BufferOwnership, DeviceFault, DeviceInfo, StereoCalibration};
use thiserror::Error;

/// Configuration step that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigStage {
    /// Opening the device nodemap.
    Initialize,
    /// Disabling the GigE heartbeat.
    Heartbeat,
    /// Setting continuous acquisition.
    AcquisitionMode,
    /// Stream buffer handling and count.
    StreamBuffering,
    /// Width, height and pixel format.
    ImageFormat,
    /// Lossless compression mode.
    Compression,
    /// Per-component transmit flags.
    Components,
    /// Packet size and throughput limit.
    LinkThroughput,
    /// Block matching parameters.
    StereoProcessing,
    /// Reading back the 3D calibration.
    Calibration,
    /// Exposure and gain.
    ExposureGain,
    /// Hardware trigger and line routing.
    Trigger,
    /// Allocating and attaching the buffer pool.
    Buffers,
    /// Preparing the host decoder.
    Decompression,
}

impl ConfigStage {
    /// Human-readable stage name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ConfigStage::Initialize => "initialize",
            ConfigStage::Heartbeat => "heartbeat",
            ConfigStage::AcquisitionMode => "acquisition mode",
            ConfigStage::StreamBuffering => "stream buffering",
            ConfigStage::ImageFormat => "image format",
            ConfigStage::Compression => "compression",
            ConfigStage::Components => "stream components",
            ConfigStage::LinkThroughput => "link throughput",
            ConfigStage::StereoProcessing => "stereo processing",
            ConfigStage::Calibration => "calibration read-back",
            ConfigStage::ExposureGain => "exposure/gain",
            ConfigStage::Trigger => "trigger",
            ConfigStage::Buffers => "buffers",
            ConfigStage::Decompression => "decompression output",
        }
    }
}

impl fmt::Display for ConfigStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal status of one device run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DeviceRunResult {
    /// Every requested iteration ran.
    Success,
    /// The device was skipped without being configured.
    DeviceNotEligible { reason: String },
    /// A configuration step failed before capture.
    ConfigurationFailed { stage: ConfigStage, reason: String },
    /// Capture stopped on a device fault.
    CaptureFailed { reason: String },
}

impl DeviceRunResult {
    /// True only for `Success`.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, DeviceRunResult::Success)
    }

    pub(crate) fn configuration(stage: ConfigStage, reason: impl fmt::Display) -> Self {
        DeviceRunResult::ConfigurationFailed {
            stage,
            reason: reason.to_string(),
        }
    }

    pub(crate) fn capture(reason: impl fmt::Display) -> Self {
        DeviceRunResult::CaptureFailed {
            reason: reason.to_string(),
        }
    }
}

impl fmt::Display for DeviceRunResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceRunResult::Success => f.write_str("success"),
            DeviceRunResult::DeviceNotEligible { reason } => write!(f, "not eligible: {reason}"),
            DeviceRunResult::ConfigurationFailed { stage, reason } => {
                write!(f, "configuration failed at {stage}: {reason}")
            }
            DeviceRunResult::CaptureFailed { reason } => write!(f, "capture failed: {reason}"),
        }
    }
}

/// A worker that produced no run result.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WorkerFault {
    #[error("device {serial} could not be opened: {source}")]
    Open {
        serial: String,
        #[source]
        source: DeviceFault,
    },

    #[error("worker for device {serial} panicked: {message}")]
    Panicked { serial: String, message: String },

    #[error("worker for device {serial} was aborted")]
    Aborted { serial: String },
}

/// Speckle filter decisions over a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConditioningTally {
    /// Events the filter ran on.
    pub applied: u64,
    /// Events the filter was not asked to run on.
    pub skipped: u64,
    /// Events whose disparity plane could not be filtered.
    pub failed: u64,
    /// Speckle regions removed over all events.
    pub regions_removed: u64,
    /// Pixels invalidated over all events.
    pub pixels_invalidated: u64,
    /// Why the most recent skip happened.
    pub last_skip_reason: Option<String>,
}

/// Timing of the decompression stage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecompressionTally {
    /// Decompressor name.
    pub decoder: String,
    /// Decode attempts.
    pub calls: u64,
    /// Decode attempts that failed.
    pub failures: u64,
    /// Time spent decoding.
    #[serde(with = "humantime_serde")]
    pub total: Duration,
    /// Mean time per decode.
    #[serde(with = "humantime_serde")]
    pub average: Duration,
    /// Decoded output throughput.
    pub megabytes_per_second: f64,
}

/// Everything a worker observed, for logs, tests and the run summary.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerReport {
    /// Device this worker drove.
    pub device: DeviceInfo,
    /// Terminal status.
    pub result: DeviceRunResult,
    /// Every state entered, in order.
    pub states: Vec<WorkerState>,
    /// `Closed` unless the worker was aborted.
    pub final_state: WorkerState,
    /// Buffer ownership the device reported after close.
    pub final_ownership: BufferOwnership,
    /// The stream buffers were freed.
    pub pool_released: bool,
    /// Capture iterations attempted.
    pub events_requested: u64,
    /// Waits that returned an event.
    pub events_retrieved: u64,
    /// Events handed back to the device.
    pub events_released: u64,
    /// Releases the device refused.
    pub release_failures: u64,
    /// Events with every enabled component complete.
    pub usable: u64,
    /// Events that failed validation.
    pub incomplete: u64,
    /// Waits that timed out.
    pub timeouts: u64,
    /// Waits that failed on the transport.
    pub transport_errors: u64,
    /// Speckle filter decisions.
    pub conditioning: ConditioningTally,
    /// Present when decompression was enabled.
    pub decompression: Option<DecompressionTally>,
    /// Planes of usable events dropped because they could not be decoded.
    pub decode_failures: u64,
    /// Point clouds computed.
    pub point_clouds: u64,
    /// Files written for this device.
    pub artifacts: Vec<PathBuf>,
    /// Calibration read back during configuration.
    pub calibration: Option<StereoCalibration>,
    /// Teardown steps that failed.
    pub cleanup_errors: Vec<String>,
    /// The run stopped early on cancellation.
    pub cancelled: bool,
    /// Wall time from open to close.
    #[serde(with = "humantime_serde")]
    pub elapsed: Duration,
}

impl WorkerReport {
    pub(crate) fn new(device: DeviceInfo) -> Self {
        Self {
            device,
            result: DeviceRunResult::Success,
            states: vec![WorkerState::Idle],
            final_state: WorkerState::Idle,
            final_ownership: BufferOwnership::System,
            pool_released: true,
            events_requested: 0,
            events_retrieved: 0,
            events_released: 0,
            release_failures: 0,
            usable: 0,
            incomplete: 0,
            timeouts: 0,
            transport_errors: 0,
            conditioning: ConditioningTally::default(),
            decompression: None,
            decode_failures: 0,
            point_clouds: 0,
            artifacts: Vec::new(),
            calibration: None,
            cleanup_errors: Vec::new(),
            cancelled: false,
            elapsed: Duration::ZERO,
        }
    }

    /// Whether the worker ever entered `state`.
    #[must_use]
    pub fn visited(&self, state: WorkerState) -> bool {
        self.states.contains(&state)
    }
}

/// The joined outcome of one device.
#[derive(Debug, Clone)]
pub struct DeviceOutcome {
    /// Enumerated identity.
    pub device: DeviceInfo,
    /// Report of the worker, or why there is none.
    pub outcome: Result<WorkerReport, WorkerFault>,
}

impl DeviceOutcome {
    /// The run result, or the fault that prevented one.
    pub fn result(&self) -> Result<&DeviceRunResult, &WorkerFault> {
        self.outcome.as_ref().map(|report| &report.result)
    }

    /// True when a report exists and its result is `Success`.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self.result(), Ok(DeviceRunResult::Success))
    }

    /// One line per device for the end-of-run listing.
    #[must_use]
    pub fn describe(&self) -> String {
        match &self.outcome {
            Ok(report) => format!(
                "{}: {} ({}/{} usable, {} timeouts, {} released)",
                self.device.serial_number,
                report.result,
                report.usable,
                report.events_requested,
                report.timeouts,
                report.events_released
            ),
            Err(fault) => format!("{}: {fault}", self.device.serial_number),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stereo_core::TransportClass;

    fn info() -> DeviceInfo {
        DeviceInfo {
            index: 0,
            serial_number: "21010001".into(),
            model_name: "BX-S".into(),
            transport: TransportClass::GigEVision,
        }
    }

    #[test]
    fn configuration_failure_names_stage() {
        let result = DeviceRunResult::configuration(ConfigStage::AcquisitionMode, "not writable");
        assert_eq!(
            result.to_string(),
            "configuration failed at acquisition mode: not writable"
        );
        assert!(!result.is_success());
    }

    #[test]
    fn only_ok_success_counts() {
        let mut ok = DeviceOutcome {
            device: info(),
            outcome: Ok(WorkerReport::new(info())),
        };
        assert!(ok.is_success());

        if let Ok(report) = ok.outcome.as_mut() {
            report.result = DeviceRunResult::DeviceNotEligible {
                reason: "mono".into(),
            };
        }
        assert!(!ok.is_success());

        let fault = DeviceOutcome {
            device: info(),
            outcome: Err(WorkerFault::Aborted {
                serial: "21010001".into(),
            }),
        };
        assert!(!fault.is_success());
        assert!(fault.describe().contains("aborted"));
    }

    #[test]
    fn result_serializes_with_status_tag() {
        let json = serde_json::to_value(DeviceRunResult::configuration(
            ConfigStage::Buffers,
            "out of memory",
        ))
        .unwrap();
        assert_eq!(json["status"], "configuration_failed");
        assert_eq!(json["stage"], "buffers");
    }
}

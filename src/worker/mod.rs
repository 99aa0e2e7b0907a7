//! Per-device acquisition worker.
//!
//! One worker owns one opened device for the whole run and drives it through
//! the [`WorkerState`] machine on a blocking thread:
//!
//! 1. initialise and check eligibility
//! 2. run the configuration sequence ([`configure`])
//! 3. allocate the stream buffer pool and lend it to the device
//! 4. capture `N` events, validating and processing each usable one
//! 5. stop, then close: detach and release buffers, deinitialise
//!
//! Close always runs, whatever happened before it. Per-iteration problems
//! (timeouts, transport errors, incomplete events) are counted and skipped;
//! every retrieved event is released exactly once.

mod configure;
mod state;

pub use configure::{configure, Configured, LinkTuning, StepFailure};
pub use state::{InvalidTransition, StateTracker, WorkerState};

use crate::conditioning::Conditioning;
use crate::config::{AppConfig, CameraSettings, EligibilityRule, StereoSettings};
use crate::decompression::DecompressionStage;
use crate::outcome::{ConfigStage, DeviceRunResult, WorkerReport};
use crate::persistence::ArtifactWriter;
use crate::pipeline::EventPipeline;
use std::sync::Arc;
use std::time::{Duration, Instant};
use stereo_core::sfnc::{self, entry};
use stereo_core::{
    validate, BufferOwnership, CancellationFlag, CaptureError, CaptureEvent, Decompressor, Device,
    Nodemap, StereoService, StreamTransmitConfig, Validation,
};
use stereo_pool::{BufferLayout, PinnedAllocator, StreamBufferPool};
use tracing::{debug, error, info, info_span, warn};

/// How long a single capture iteration may wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitPolicy {
    /// Give up on an iteration after this long.
    Bounded(Duration),
    /// Wait in slices until an event arrives or the run is cancelled.
    Indefinite { slice: Duration },
}

/// Run parameters shared by every worker.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// Capture iterations.
    pub frames: u32,
    /// How long one iteration waits for an event.
    pub wait: WaitPolicy,
    /// Stream buffers in the pool.
    pub buffer_count: usize,
    /// Devices the worker agrees to drive.
    pub eligibility: EligibilityRule,
    /// Disable the GigE heartbeat for the run.
    pub diagnostic: bool,
    /// Arm the Line0 trigger.
    pub external_trigger: bool,
    /// Components requested from the device.
    pub components: StreamTransmitConfig,
    /// Reconstruct a point cloud per usable event.
    pub point_cloud: bool,
    /// Request compression and decode on the host.
    pub decompress: bool,
    /// Image settings.
    pub camera: CameraSettings,
    /// Matching and filter settings.
    pub stereo: StereoSettings,
}

impl WorkerSettings {
    /// Settings derived from a validated configuration.
    #[must_use]
    pub fn from_config(config: &AppConfig) -> Self {
        let acquisition = &config.acquisition;
        let wait = if acquisition.wait_indefinitely {
            WaitPolicy::Indefinite {
                slice: acquisition.wait_slice,
            }
        } else {
            WaitPolicy::Bounded(acquisition.wait_timeout())
        };
        Self {
            frames: acquisition.frames,
            wait,
            buffer_count: acquisition.buffer_count,
            eligibility: acquisition.eligibility.clone(),
            diagnostic: acquisition.diagnostic,
            external_trigger: acquisition.external_trigger,
            components: acquisition.components,
            point_cloud: acquisition.point_cloud,
            decompress: config.decompression.enabled,
            camera: config.camera.clone(),
            stereo: config.stereo.clone(),
        }
    }

    /// Speckle filter knobs.
    #[must_use]
    pub fn conditioning(&self) -> Conditioning {
        Conditioning::from_settings(&self.stereo)
    }
}

/// Collaborators a worker uses but does not own.
#[derive(Clone)]
pub struct WorkerServices {
    /// Allocates stream and decode buffers.
    pub allocator: Arc<dyn PinnedAllocator>,
    /// Speckle filter and point cloud service.
    pub stereo: Arc<dyn StereoService>,
    /// Required when `decompress` is set.
    pub decompressor: Option<Arc<dyn Decompressor>>,
    /// Absent in runs that save nothing.
    pub writer: Option<ArtifactWriter>,
}

/// Whether `device` may take part in a run under `rule`.
///
/// Returns the reason when it may not.
pub fn check_eligibility(rule: &EligibilityRule, device: &mut dyn Device) -> Result<(), String> {
    match rule {
        EligibilityRule::Any => Ok(()),
        EligibilityRule::ModelPrefix(prefix) => {
            let model = &device.info().model_name;
            if model.starts_with(prefix.as_str()) {
                Ok(())
            } else {
                Err(format!("model '{model}' does not start with '{prefix}'"))
            }
        }
        EligibilityRule::StereoCapable => {
            if device
                .params(Nodemap::Device)
                .has_enum_entry(sfnc::COMPONENT_SELECTOR, entry::DISPARITY)
            {
                Ok(())
            } else {
                Err("device does not produce disparity".to_string())
            }
        }
    }
}

/// Drives one device from open to close.
pub struct AcquisitionWorker {
    device: Box<dyn Device>,
    settings: WorkerSettings,
    services: WorkerServices,
    cancel: CancellationFlag,
    state: StateTracker,
    report: WorkerReport,
}

impl AcquisitionWorker {
    /// A worker in `Idle`; nothing touches the device until [`AcquisitionWorker::run`].
    pub fn new(
        device: Box<dyn Device>,
        settings: WorkerSettings,
        services: WorkerServices,
        cancel: CancellationFlag,
    ) -> Self {
        let report = WorkerReport::new(device.info().clone());
        Self {
            device,
            settings,
            services,
            cancel,
            state: StateTracker::new(),
            report,
        }
    }

    /// Run to completion. Never panics on device faults; every failure ends
    /// up in the report.
    pub fn run(mut self) -> WorkerReport {
        let serial = self.device.info().serial_number.clone();
        let span = info_span!("worker", serial = %serial);
        let _guard = span.enter();
        let started = Instant::now();

        let mut pool = None;
        let mut configured = None;
        let result = self.execute(&mut pool, &mut configured);
        self.close(pool, configured.as_ref());

        self.report.result = match result {
            DeviceRunResult::Success if !self.report.cleanup_errors.is_empty() => {
                DeviceRunResult::capture(format!(
                    "cleanup failed: {}",
                    self.report.cleanup_errors.join("; ")
                ))
            }
            other => other,
        };
        self.report.states = self.state.history().to_vec();
        self.report.final_state = self.state.current();
        self.report.elapsed = started.elapsed();

        if self.report.result.is_success() {
            info!(
                usable = self.report.usable,
                timeouts = self.report.timeouts,
                decode_failures = self.report.decode_failures,
                released = self.report.events_released,
                elapsed_ms = self.report.elapsed.as_millis() as u64,
                "device run complete"
            );
        } else {
            warn!(result = %self.report.result, "device run did not succeed");
        }
        self.report
    }

    fn enter(&mut self, next: WorkerState) {
        if let Err(err) = self.state.advance(next) {
            error!(error = %err, "worker state machine violated");
        }
    }

    fn fail(&mut self, result: DeviceRunResult) -> DeviceRunResult {
        error!(%result, "device run failed");
        self.enter(WorkerState::Failed);
        result
    }

    fn execute(
        &mut self,
        pool: &mut Option<StreamBufferPool>,
        configured: &mut Option<Configured>,
    ) -> DeviceRunResult {
        // Idle -> Opened
        if let Err(fault) = self.device.init() {
            return self.fail(DeviceRunResult::configuration(ConfigStage::Initialize, fault));
        }
        self.enter(WorkerState::Opened);
        self.log_device_information();

        if let Err(reason) = check_eligibility(&self.settings.eligibility, self.device.as_mut()) {
            info!(%reason, "device not eligible, skipping");
            self.enter(WorkerState::Stopped);
            return DeviceRunResult::DeviceNotEligible { reason };
        }

        // Opened -> Configured
        let setup = match configure(self.device.as_mut(), &self.settings) {
            Ok(setup) => setup,
            Err(failure) => {
                return self.fail(DeviceRunResult::configuration(failure.stage, failure.reason));
            }
        };
        self.report.calibration = setup.calibration;
        let setup = configured.insert(setup).clone();
        self.enter(WorkerState::Configured);

        let decompression = match self.decompression_stage(&setup) {
            Ok(stage) => stage,
            Err(failure) => {
                return self.fail(DeviceRunResult::configuration(failure.stage, failure.reason));
            }
        };

        // Configured -> BuffersAttached
        if let Err(failure) = self.attach_buffers(pool) {
            return self.fail(DeviceRunResult::configuration(failure.stage, failure.reason));
        }
        self.enter(WorkerState::BuffersAttached);

        // BuffersAttached -> Capturing
        if let Err(fault) = self.device.begin_acquisition() {
            return self.fail(DeviceRunResult::capture(format!(
                "begin acquisition: {fault}"
            )));
        }
        self.enter(WorkerState::Capturing);

        let mut pipeline = EventPipeline::new(
            self.device.info().serial_number.clone(),
            setup.components,
            setup.calibration,
            self.settings.conditioning(),
            Arc::clone(&self.services.stereo),
        )
        .with_point_cloud(self.settings.point_cloud)
        .with_decompression(decompression)
        .with_writer(self.services.writer.clone());

        let result = self.capture(&mut pipeline, &setup.components);

        self.report.conditioning = pipeline.conditioning_tally().clone();
        self.report.decompression = pipeline.decompression_tally();
        self.report.decode_failures = pipeline.decode_failures();
        self.report.point_clouds = pipeline.point_clouds();
        if self.report.decode_failures > 0 {
            warn!(
                planes = self.report.decode_failures,
                "planes dropped because they could not be decoded"
            );
        }

        // Capturing -> Stopped
        if let Err(fault) = self.device.end_acquisition() {
            self.record_cleanup("end acquisition", fault);
        }
        self.enter(WorkerState::Stopped);
        result
    }

    fn log_device_information(&mut self) {
        let info = self.device.info().clone();
        let tl = self.device.params(Nodemap::TransportLayer);
        let model = tl
            .get::<String>(sfnc::DEVICE_MODEL_NAME)
            .unwrap_or(info.model_name);
        let serial = tl
            .get::<String>(sfnc::DEVICE_SERIAL_NUMBER)
            .unwrap_or(info.serial_number);
        info!(
            index = info.index,
            %serial,
            %model,
            transport = %info.transport,
            "device opened"
        );
    }

    fn decompression_stage(
        &self,
        setup: &Configured,
    ) -> Result<Option<DecompressionStage>, StepFailure> {
        if !self.settings.decompress {
            return Ok(None);
        }
        let decoder = self.services.decompressor.clone().ok_or_else(|| {
            StepFailure::new(ConfigStage::Decompression, "no decompressor is installed")
        })?;
        DecompressionStage::new(
            decoder,
            self.services.allocator.as_ref(),
            setup.width,
            setup.height,
            setup.pixel_format,
        )
        .map(Some)
        .map_err(|err| StepFailure::new(ConfigStage::Decompression, err))
    }

    fn attach_buffers(&mut self, slot: &mut Option<StreamBufferPool>) -> Result<(), StepFailure> {
        let stage = ConfigStage::Buffers;
        let payload = self
            .device
            .params(Nodemap::Device)
            .get::<i64>(sfnc::PAYLOAD_SIZE)
            .map_err(|err| StepFailure::new(stage, err))?;
        let payload =
            usize::try_from(payload).map_err(|_| StepFailure::new(stage, "negative payload size"))?;
        let layout = BufferLayout::for_payload(
            payload,
            self.settings.buffer_count,
            self.device.info().transport,
        )
        .map_err(|err| StepFailure::new(stage, err))?;

        let pool = slot.insert(
            StreamBufferPool::allocate(self.services.allocator.as_ref(), layout)
                .map_err(|err| StepFailure::new(stage, err))?,
        );
        let region = pool.lend().map_err(|err| StepFailure::new(stage, err))?;
        self.device
            .attach_buffers(region)
            .map_err(|fault| StepFailure::new(stage, format!("attach rejected: {fault}")))?;

        if self.device.buffer_ownership() != BufferOwnership::Caller {
            return Err(StepFailure::new(
                stage,
                "device did not switch to caller-owned buffers",
            ));
        }
        debug!(
            payload,
            buffer_size = layout.buffer_size(),
            buffer_count = layout.buffer_count(),
            "stream buffers attached"
        );
        Ok(())
    }

    fn capture(
        &mut self,
        pipeline: &mut EventPipeline,
        enabled: &StreamTransmitConfig,
    ) -> DeviceRunResult {
        info!(frames = self.settings.frames, "capture started");
        for iteration in 0..u64::from(self.settings.frames) {
            if self.cancel.is_cancelled() {
                self.report.cancelled = true;
                info!(iteration, "capture cancelled");
                break;
            }
            self.report.events_requested += 1;

            let event = match self.wait_for_event() {
                None => {
                    self.report.cancelled = true;
                    info!(iteration, "capture cancelled while waiting");
                    break;
                }
                Some(Ok(event)) => event,
                Some(Err(CaptureError::Timeout(timeout))) => {
                    self.report.timeouts += 1;
                    warn!(iteration, ?timeout, "capture timed out, iteration skipped");
                    continue;
                }
                Some(Err(CaptureError::Transport(fault))) => {
                    self.report.transport_errors += 1;
                    warn!(iteration, error = %fault, "transport error, iteration skipped");
                    continue;
                }
                Some(Err(err @ CaptureError::NotStreaming)) => {
                    return DeviceRunResult::capture(err);
                }
            };
            self.report.events_retrieved += 1;

            let processed = match validate(&event, enabled) {
                Validation::Usable => {
                    self.report.usable += 1;
                    Some(pipeline.process(&event, iteration))
                }
                Validation::Incomplete(report) => {
                    self.report.incomplete += 1;
                    warn!(iteration, %report, "incomplete capture event discarded");
                    None
                }
            };
            self.release(event);

            match processed {
                Some(Ok(processed)) => self.report.artifacts.extend(processed.artifacts),
                Some(Err(err)) => {
                    error!(iteration, error = %err, "failed to save capture event");
                    return DeviceRunResult::capture(err);
                }
                None => {}
            }
        }
        if self.report.cancelled {
            return DeviceRunResult::capture(format!(
                "cancelled after {} of {} iterations",
                self.report.events_requested, self.settings.frames
            ));
        }
        DeviceRunResult::Success
    }

    /// `None` when the run was cancelled before an event arrived.
    fn wait_for_event(&mut self) -> Option<Result<CaptureEvent, CaptureError>> {
        match self.settings.wait {
            WaitPolicy::Bounded(timeout) => Some(self.device.next_event(timeout)),
            WaitPolicy::Indefinite { slice } => loop {
                if self.cancel.is_cancelled() {
                    return None;
                }
                match self.device.next_event(slice) {
                    Err(CaptureError::Timeout(_)) => continue,
                    other => return Some(other),
                }
            },
        }
    }

    fn release(&mut self, event: CaptureEvent) {
        let frame = event.frame_id();
        match self.device.release_event(event) {
            Ok(()) => self.report.events_released += 1,
            Err(fault) => {
                self.report.release_failures += 1;
                warn!(frame, error = %fault, "failed to release capture event");
            }
        }
    }

    fn record_cleanup(&mut self, step: &str, err: impl std::fmt::Display) {
        warn!(step, error = %err, "cleanup step failed");
        self.report.cleanup_errors.push(format!("{step}: {err}"));
    }

    /// Undo everything the run set up, in reverse order. Always ends `Closed`.
    fn close(&mut self, pool: Option<StreamBufferPool>, configured: Option<&Configured>) {
        if self.device.is_streaming() {
            if let Err(fault) = self.device.end_acquisition() {
                self.record_cleanup("end acquisition", fault);
            }
        }

        if let Some(setup) = configured {
            if setup.trigger_armed {
                if let Err(err) = self
                    .device
                    .params(Nodemap::Device)
                    .set_enum_by_name(sfnc::TRIGGER_MODE, entry::OFF)
                {
                    self.record_cleanup("disable trigger", err);
                }
            }
            if setup.heartbeat_disabled {
                if let Err(err) = self
                    .device
                    .params(Nodemap::TransportLayer)
                    .set(sfnc::GEV_HEARTBEAT_DISABLE, false)
                {
                    self.record_cleanup("reset heartbeat", err);
                }
            }
        }

        if let Some(mut pool) = pool {
            if self.device.buffer_ownership() == BufferOwnership::Caller {
                if let Err(fault) = self.device.detach_buffers() {
                    self.record_cleanup("detach buffers", fault);
                }
            }
            if let Err(err) = pool.release() {
                self.record_cleanup("release buffers", err);
            }
            self.report.pool_released = pool.is_released();
        }

        if let Err(fault) = self.device.deinit() {
            self.record_cleanup("close device", fault);
        }
        self.report.final_ownership = self.device.buffer_ownership();

        if self.state.current() != WorkerState::Failed
            && self.state.current() != WorkerState::Stopped
        {
            // Only reachable if execute returned without settling the state.
            self.enter(WorkerState::Failed);
        }
        self.enter(WorkerState::Closed);
        debug!("device closed");
    }
}

//! Run orchestration: one context, one blocking worker per device, one join.
//!
//! [`AcquisitionContext::init`] enumerates the device system once. [`run`]
//! then spawns every worker before joining any of them, and reduces the join
//! to one [`DeviceOutcome`] per enumerated device, keeping the device identity
//! even when its worker panicked.
//!
//! [`run`]: AcquisitionContext::run

use crate::config::AppConfig;
use crate::error::{AppError, AppResult};
use crate::outcome::{DeviceOutcome, WorkerFault, WorkerReport};
use crate::persistence::{ensure_writable, ArtifactWriter};
use crate::worker::{AcquisitionWorker, WorkerServices, WorkerSettings};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use stereo_core::{
    CancellationFlag, Decompressor, DeviceInfo, DeviceSystem, StereoService, StreamTransmitConfig,
};
use stereo_pool::HostAllocator;
use tokio::task::JoinError;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Process-wide acquisition state, created once per run.
pub struct AcquisitionContext {
    system: Arc<dyn DeviceSystem>,
    library_version: String,
    devices: Vec<DeviceInfo>,
}

impl AcquisitionContext {
    /// Enumerate the device system. Fails when no device is present.
    pub fn init(system: Arc<dyn DeviceSystem>) -> AppResult<Self> {
        let library_version = system.library_version();
        info!(%library_version, "device system initialised");

        let devices = system.enumerate().map_err(AppError::Enumeration)?;
        if devices.is_empty() {
            return Err(AppError::NoDevices);
        }
        info!(count = devices.len(), "devices detected");
        for device in &devices {
            info!(%device, "detected");
        }

        Ok(Self {
            system,
            library_version,
            devices,
        })
    }

    /// Version reported by the device system.
    #[must_use]
    pub fn library_version(&self) -> &str {
        &self.library_version
    }

    /// Devices found at `init`, in enumeration order.
    #[must_use]
    pub fn devices(&self) -> &[DeviceInfo] {
        &self.devices
    }

    /// Run one worker per device and wait for all of them.
    pub async fn run(
        &self,
        settings: &WorkerSettings,
        services: &WorkerServices,
        cancel: &CancellationFlag,
    ) -> Vec<DeviceOutcome> {
        let handles: Vec<_> = self
            .devices
            .iter()
            .cloned()
            .map(|info| {
                let system = Arc::clone(&self.system);
                let settings = settings.clone();
                let services = services.clone();
                let cancel = cancel.clone();
                tokio::task::spawn_blocking(move || -> Result<WorkerReport, WorkerFault> {
                    let device = system.open(&info).map_err(|source| WorkerFault::Open {
                        serial: info.serial_number.clone(),
                        source,
                    })?;
                    Ok(AcquisitionWorker::new(device, settings, services, cancel).run())
                })
            })
            .collect();

        join_all(handles)
            .await
            .into_iter()
            .zip(self.devices.iter().cloned())
            .map(|(joined, device)| {
                let outcome = joined.unwrap_or_else(|err| Err(join_fault(&device, err)));
                if let Err(fault) = &outcome {
                    error!(serial = %device.serial_number, %fault, "worker produced no result");
                }
                DeviceOutcome { device, outcome }
            })
            .collect()
    }

    /// Release the device system.
    pub fn shutdown(self) {
        info!(devices = self.devices.len(), "device system released");
    }
}

fn join_fault(device: &DeviceInfo, err: JoinError) -> WorkerFault {
    let serial = device.serial_number.clone();
    if err.is_panic() {
        let payload = err.into_panic();
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        WorkerFault::Panicked { serial, message }
    } else {
        WorkerFault::Aborted { serial }
    }
}

/// External implementations a run plugs in.
#[derive(Clone)]
pub struct Backends {
    /// Enumerates and opens cameras.
    pub system: Arc<dyn DeviceSystem>,
    /// Speckle filter and point cloud service.
    pub stereo: Arc<dyn StereoService>,
    /// Needed only when decompression is enabled.
    pub decompressor: Option<Arc<dyn Decompressor>>,
}

/// One device's line in the run summary.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceSummary {
    /// Enumerated identity.
    pub device: DeviceInfo,
    /// The device run ended in `Success`.
    pub success: bool,
    /// Run result or fault, as displayed.
    pub status: String,
    /// Absent when the worker faulted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<WorkerReport>,
}

impl From<&DeviceOutcome> for DeviceSummary {
    fn from(outcome: &DeviceOutcome) -> Self {
        Self {
            device: outcome.device.clone(),
            success: outcome.is_success(),
            status: match &outcome.outcome {
                Ok(report) => report.result.to_string(),
                Err(fault) => fault.to_string(),
            },
            report: outcome.outcome.as_ref().ok().cloned(),
        }
    }
}

/// Everything written to `run_summary.json`.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    /// Unique per run.
    pub run_id: Uuid,
    /// Application name from the configuration.
    pub application: String,
    /// Device system version.
    pub library_version: String,
    /// When enumeration began.
    pub started_at: DateTime<Utc>,
    /// When the last worker finished.
    pub finished_at: DateTime<Utc>,
    /// Events requested per device.
    pub frames: u32,
    /// Components requested from every device.
    pub components: StreamTransmitConfig,
    /// Devices that ended in `Success`.
    pub succeeded: usize,
    /// Every other device.
    pub failed: usize,
    /// One entry per device, in enumeration order.
    pub devices: Vec<DeviceSummary>,
}

/// Result of [`run_acquisition`].
#[derive(Debug)]
pub struct RunReport {
    /// What was written to the summary file.
    pub summary: RunSummary,
    /// One per enumerated device, in enumeration order.
    pub outcomes: Vec<DeviceOutcome>,
    /// Where the summary was written, if it was.
    pub summary_path: Option<PathBuf>,
}

impl RunReport {
    /// True only if every device ended in `Success`.
    #[must_use]
    pub fn all_succeeded(&self) -> bool {
        !self.outcomes.is_empty() && self.outcomes.iter().all(DeviceOutcome::is_success)
    }
}

/// A complete run: check the output directory, enumerate, capture on every device, summarise.
///
/// Process-level faults return `Err` before any worker starts; per-device
/// failures are inside the returned report.
pub async fn run_acquisition(
    config: &AppConfig,
    backends: Backends,
    cancel: CancellationFlag,
) -> AppResult<RunReport> {
    config.validate().map_err(AppError::Configuration)?;

    let output_dir = config.storage.output_dir.clone();
    ensure_writable(&output_dir).map_err(|source| AppError::OutputNotWritable {
        path: output_dir.clone(),
        source,
    })?;
    let writer = ArtifactWriter::new(&output_dir, config.storage.prefix.clone());

    let context = AcquisitionContext::init(backends.system)?;
    let settings = WorkerSettings::from_config(config);
    let services = WorkerServices {
        allocator: Arc::new(HostAllocator::new(config.acquisition.pin_policy)),
        stereo: backends.stereo,
        decompressor: backends.decompressor,
        writer: config.storage.save_images.then(|| writer.clone()),
    };

    let run_id = Uuid::new_v4();
    let started_at = Utc::now();
    info!(
        %run_id,
        devices = context.devices().len(),
        frames = settings.frames,
        components = %settings.components,
        output = %output_dir.display(),
        "acquisition run started"
    );

    let outcomes = context.run(&settings, &services, &cancel).await;

    let devices: Vec<DeviceSummary> = outcomes.iter().map(DeviceSummary::from).collect();
    let succeeded = devices.iter().filter(|d| d.success).count();
    let summary = RunSummary {
        run_id,
        application: config.application.name.clone(),
        library_version: context.library_version().to_string(),
        started_at,
        finished_at: Utc::now(),
        frames: settings.frames,
        components: settings.components,
        succeeded,
        failed: devices.len() - succeeded,
        devices,
    };
    context.shutdown();

    for outcome in &outcomes {
        if outcome.is_success() {
            info!("{}", outcome.describe());
        } else {
            warn!("{}", outcome.describe());
        }
    }

    let summary_path = if config.storage.write_summary {
        Some(writer.write_summary(&summary)?)
    } else {
        None
    };

    Ok(RunReport {
        summary,
        outcomes,
        summary_path,
    })
}

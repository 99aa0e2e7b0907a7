//! # Stereo DAQ
//!
//! Concurrent acquisition from every detected stereo camera into caller-owned
//! pinned buffers. One blocking worker per device drives the camera through
//! open, configure, attach, capture and close; the orchestrator joins all of
//! them and reports one outcome per device.
//!
//! ## Crate Structure
//!
//! - **`config`**: figment-loaded [`config::AppConfig`] with validation.
//! - **`cli`**: clap flags layered on top of the configuration.
//! - **`logging`**: `tracing-subscriber` initialisation.
//! - **`worker`**: per-device state machine and configuration sequence.
//! - **`pipeline`**: per-event decompression, conditioning, reconstruction and saving.
//! - **`conditioning`**: speckle filtering of the disparity plane.
//! - **`decompression`**: GPU decode stage with reusable pinned output.
//! - **`persistence`**: deterministic artifact names, PNG/PGM/PLY writers, run summary.
//! - **`orchestrator`**: [`orchestrator::AcquisitionContext`] and [`orchestrator::run_acquisition`].
//! - **`outcome`**: per-device results and faults.
//! - **`error`**: process-level [`error::AppError`].
//!
//! Device-facing types live in `stereo-core`; buffer pools in `stereo-pool`.

pub mod cli;
pub mod conditioning;
pub mod config;
pub mod decompression;
pub mod error;
pub mod logging;
pub mod orchestrator;
pub mod outcome;
pub mod persistence;
pub mod pipeline;
pub mod worker;

pub use config::AppConfig;
pub use error::{AppError, AppResult};
pub use orchestrator::{run_acquisition, AcquisitionContext, Backends, RunReport, RunSummary};
pub use outcome::{DeviceOutcome, DeviceRunResult, WorkerFault, WorkerReport};
pub use worker::{AcquisitionWorker, WorkerServices, WorkerSettings, WorkerState};

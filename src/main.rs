//! CLI Entry Point for stereo_daq
//!
//! Loads the configuration, layers the command-line flags on top, then captures
//! from every detected camera concurrently and exits non-zero unless every
//! device succeeded.
//!
//! # Usage
//!
//! Capture five events per device with raw and disparity components:
//! ```bash
//! stereo_daq -n 5 -A -C -E -F
//! ```
//!
//! Use a different configuration and write artifacts elsewhere:
//! ```bash
//! stereo_daq --config rigs/bench.toml --output-dir /data/run42
//! ```

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use std::process::ExitCode;
use stereo_core::CancellationFlag;
use stereo_daq::cli::Cli;
use stereo_daq::config::AppConfig;
use stereo_daq::logging;
use stereo_daq::orchestrator::{run_acquisition, Backends};
use tracing::{info, warn};

#[cfg(not(test))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let mut config = AppConfig::load_from(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    if let Err(err) = cli.apply(&mut config) {
        Cli::command()
            .error(clap::error::ErrorKind::ArgumentConflict, err)
            .exit();
    }

    logging::init_from_config(&config).map_err(anyhow::Error::msg)?;
    info!(
        application = %config.application.name,
        config = %cli.config.display(),
        "starting"
    );

    let cancel = CancellationFlag::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, stopping after the current iteration");
                cancel.cancel();
            }
        });
    }

    let backends = backends(&config)?;
    let report = run_acquisition(&config, backends, cancel).await?;

    info!(
        succeeded = report.summary.succeeded,
        failed = report.summary.failed,
        summary = ?report.summary_path,
        "run finished"
    );
    Ok(if report.all_succeeded() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

#[cfg(feature = "mock")]
fn backends(config: &AppConfig) -> Result<Backends> {
    use std::sync::Arc;
    use stereo_driver_mock::{MockDecompressor, MockDeviceConfig, MockDeviceSystem, MockStereoService};

    let devices = config
        .enabled_devices()
        .into_iter()
        .filter(|device| device.driver == "mock")
        .map(|device| {
            device
                .config
                .clone()
                .try_into::<MockDeviceConfig>()
                .with_context(|| format!("device {} has an invalid mock configuration", device.id))
        })
        .collect::<Result<Vec<_>>>()?;
    info!(count = devices.len(), "using simulated cameras");

    Ok(Backends {
        system: Arc::new(MockDeviceSystem::from_config(&devices)),
        stereo: Arc::new(MockStereoService::new()),
        decompressor: Some(Arc::new(MockDecompressor::new())),
    })
}

#[cfg(not(feature = "mock"))]
fn backends(_config: &AppConfig) -> Result<Backends> {
    anyhow::bail!("no device backend compiled in; rebuild with `--features mock`")
}

//! Command-line surface of the `stereo_daq` binary.
//!
//! Component flags follow the camera vendor's sample tools: `-A` through `-E`
//! enable one stream component each, `-F` requests point clouds and `-G` the
//! speckle filter. Passing any of them replaces the configured selection with
//! exactly the flags given; passing none keeps the configuration file's choice.

use crate::config::{AppConfig, DEFAULT_CONFIG_PATH};
use crate::logging::OutputFormat;
use clap::Parser;
use std::path::PathBuf;
use stereo_core::{ComponentKind, StreamConfigError, StreamTransmitConfig};
use thiserror::Error;

/// Command-line arguments of `stereo_daq`.
#[derive(Parser, Debug, Clone)]
#[command(name = "stereo_daq")]
#[command(about = "Concurrent capture from every detected stereo camera", long_about = None)]
pub struct Cli {
    /// Capture events per device
    #[arg(short = 'n', long)]
    pub frames: Option<u32>,

    /// Enable RawSensor1
    #[arg(short = 'A')]
    pub raw_sensor1: bool,

    /// Enable RawSensor2
    #[arg(short = 'B')]
    pub raw_sensor2: bool,

    /// Enable RectifiedSensor1
    #[arg(short = 'C')]
    pub rectified_sensor1: bool,

    /// Enable RectifiedSensor2
    #[arg(short = 'D')]
    pub rectified_sensor2: bool,

    /// Enable DisparitySensor1
    #[arg(short = 'E')]
    pub disparity_sensor1: bool,

    /// Compute and save a point cloud per event (needs -C and -E)
    #[arg(short = 'F')]
    pub point_cloud: bool,

    /// Run the speckle filter on the disparity plane
    #[arg(short = 'G')]
    pub speckle_filter: bool,

    /// Configuration file
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Directory receiving images, point clouds and the run summary
    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    /// trace, debug, info, warn or error
    #[arg(long)]
    pub log_level: Option<String>,

    /// Human-readable or JSON log lines
    #[arg(long, value_enum)]
    pub log_format: Option<OutputFormat>,

    /// Disable the GigE heartbeat for the duration of the run
    #[arg(long)]
    pub diagnostic: bool,

    /// Wait for a hardware trigger on Line0 before each frame
    #[arg(long)]
    pub trigger: bool,

    /// Request lossless compression and decode on the GPU stage
    #[arg(long)]
    pub decompress: bool,
}

/// A flag combination refused before any device is opened.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UsageError {
    #[error("-n must be at least 1")]
    ZeroFrames,

    #[error("no stream component selected; pass at least one of -A -B -C -D -E")]
    NoComponents,

    #[error("-F (point cloud) requires both -C (RectifiedSensor1) and -E (DisparitySensor1)")]
    PointCloudNeedsDisparityAndRect1,

    #[error("invalid component selection: {0}")]
    Stream(#[from] StreamConfigError),
}

impl Cli {
    fn selection_flags(&self) -> [(ComponentKind, bool); 5] {
        [
            (ComponentKind::RawSensor1, self.raw_sensor1),
            (ComponentKind::RawSensor2, self.raw_sensor2),
            (ComponentKind::RectifiedSensor1, self.rectified_sensor1),
            (ComponentKind::RectifiedSensor2, self.rectified_sensor2),
            (ComponentKind::DisparitySensor1, self.disparity_sensor1),
        ]
    }

    /// True when any of `-A` through `-G` was passed.
    #[must_use]
    pub fn selects_components(&self) -> bool {
        self.point_cloud
            || self.speckle_filter
            || self.selection_flags().iter().any(|&(_, on)| on)
    }

    /// Overlay the flags on a loaded configuration.
    ///
    /// Runs before any device is touched; an `Err` is a usage error.
    pub fn apply(&self, config: &mut AppConfig) -> Result<(), UsageError> {
        if let Some(frames) = self.frames {
            if frames == 0 {
                return Err(UsageError::ZeroFrames);
            }
            config.acquisition.frames = frames;
        }

        if self.selects_components() {
            let mut components = StreamTransmitConfig::default();
            for (kind, on) in self.selection_flags() {
                components.set(kind, on);
            }
            config.acquisition.components = components;
            config.acquisition.point_cloud = self.point_cloud;
            config.stereo.post_process = self.speckle_filter;
        }

        let acq = &config.acquisition;
        if acq.components.is_empty() {
            return Err(UsageError::NoComponents);
        }
        if acq.point_cloud
            && !(acq.components.rectified_sensor1 && acq.components.disparity_sensor1)
        {
            return Err(UsageError::PointCloudNeedsDisparityAndRect1);
        }
        acq.components.validate()?;

        if let Some(dir) = &self.output_dir {
            config.storage.output_dir = dir.clone();
        }
        if let Some(level) = &self.log_level {
            config.application.log_level = level.clone();
        }
        if let Some(format) = self.log_format {
            config.application.log_format = format;
        }
        config.acquisition.diagnostic |= self.diagnostic;
        config.acquisition.external_trigger |= self.trigger;
        config.decompression.enabled |= self.decompress;
        Ok(())
    }
}

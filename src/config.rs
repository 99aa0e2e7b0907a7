//! Configuration System using Figment
//!
//! This module provides strongly-typed configuration loading for an acquisition run.
//! Configuration is loaded from:
//! 1. a TOML file (base configuration, `config/stereo_daq.toml` by default)
//! 2. Environment variables (prefixed with `STEREO_DAQ_`, sections separated by `__`)
//!
//! Command-line flags are applied on top by [`crate::cli::Cli::apply`].
//!
//! # Example
//! ```no_run
//! use stereo_daq::config::AppConfig;
//!
//! let config = AppConfig::load()?;
//! println!("Frames per device: {}", config.acquisition.frames);
//! # Ok::<(), figment::Error>(())
//! ```

use crate::logging::OutputFormat;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use stereo_core::{ComponentKind, StreamTransmitConfig};
use stereo_pool::PinPolicy;

/// Default configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/stereo_daq.toml";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Application settings
    pub application: ApplicationConfig,
    /// Capture loop and stream settings
    pub acquisition: AcquisitionConfig,
    /// Camera image settings
    pub camera: CameraSettings,
    /// Stereo processing and disparity post-processing
    pub stereo: StereoSettings,
    /// GPU decompression stage
    pub decompression: DecompressionConfig,
    /// Artifact persistence
    pub storage: StorageConfig,
    /// Simulated or otherwise configured devices
    pub devices: Vec<DeviceDefinition>,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log output format
    pub log_format: OutputFormat,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "Stereo DAQ".to_string(),
            log_level: "info".to_string(),
            log_format: OutputFormat::Pretty,
        }
    }
}

/// Which enumerated devices a run accepts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EligibilityRule {
    /// Every device is captured from.
    Any,
    /// Model name must start with the prefix.
    ModelPrefix(String),
    /// The device must expose a disparity component.
    #[default]
    StereoCapable,
}

/// Capture loop, buffering and component selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    /// Capture events requested per device.
    pub frames: u32,
    /// Bound of one wait for a capture event.
    #[serde(with = "humantime_serde")]
    pub event_timeout: Duration,
    /// Bound of one wait while an external trigger drives the camera.
    #[serde(with = "humantime_serde")]
    pub trigger_timeout: Duration,
    /// Wait for triggered events without an overall bound, in slices of `wait_slice`.
    pub wait_indefinitely: bool,
    /// Length of one wait while waiting indefinitely.
    #[serde(with = "humantime_serde")]
    pub wait_slice: Duration,
    /// Stream buffers allocated per device.
    pub buffer_count: usize,
    /// Whether stream buffers must, may or must not be page-locked.
    pub pin_policy: PinPolicy,
    /// Which enumerated devices take part in the run.
    pub eligibility: EligibilityRule,
    /// Diagnostic runs disable the GigE heartbeat for the duration of the run.
    pub diagnostic: bool,
    /// Camera waits for a GPIO trigger on Line0.
    pub external_trigger: bool,
    /// Stream components transmitted by every device.
    pub components: StreamTransmitConfig,
    /// Compute and save a point cloud per usable event.
    pub point_cloud: bool,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            frames: 3,
            event_timeout: Duration::from_secs(2),
            trigger_timeout: Duration::from_secs(5),
            wait_indefinitely: false,
            wait_slice: Duration::from_millis(250),
            buffer_count: 10,
            pin_policy: PinPolicy::BestEffort,
            eligibility: EligibilityRule::StereoCapable,
            diagnostic: false,
            external_trigger: false,
            components: StreamTransmitConfig::with(&[
                ComponentKind::RectifiedSensor1,
                ComponentKind::DisparitySensor1,
            ]),
            point_cloud: true,
        }
    }
}

impl AcquisitionConfig {
    /// Bound of one wait in the current trigger mode.
    #[must_use]
    pub fn wait_timeout(&self) -> Duration {
        if self.external_trigger {
            self.trigger_timeout
        } else {
            self.event_timeout
        }
    }
}

/// Image settings written before capture. Absent values leave the device as is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraSettings {
    /// `PixelFormat` entry name, e.g. `Mono8`.
    pub pixel_format: Option<String>,
    /// Image width in pixels.
    pub width: Option<i64>,
    /// Image height in pixels.
    pub height: Option<i64>,
    /// Fixed exposure in microseconds; absent selects continuous auto exposure.
    pub exposure_time_us: Option<f64>,
    /// Fixed gain in dB; absent selects continuous auto gain.
    pub gain_db: Option<f64>,
    /// Tune packet size and throughput limit on GigE devices.
    pub tune_link_throughput: bool,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            pixel_format: None,
            width: None,
            height: None,
            exposure_time_us: None,
            gain_db: None,
            tune_link_throughput: true,
        }
    }
}

/// On-camera matching parameters and host-side disparity filtering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StereoSettings {
    /// Run the speckle filter on the disparity plane.
    pub post_process: bool,
    /// Regions below this many pixels are speckles.
    pub max_speckle_size: usize,
    /// Disparity step, in pixels, still considered the same surface.
    pub speckle_threshold: f64,
    /// Clamped to the device maximum before it is written.
    pub coordinate_offset: f64,
    /// Written to `UniquenessRatio` when it differs.
    pub uniqueness_ratio: i64,
    /// Written to `SmallPenalty` when it differs.
    pub small_penalty: i64,
    /// Written to `LargePenalty` when it differs.
    pub large_penalty: i64,
}

impl Default for StereoSettings {
    fn default() -> Self {
        Self {
            post_process: true,
            max_speckle_size: 40,
            speckle_threshold: 4.0,
            coordinate_offset: 0.0,
            uniqueness_ratio: 10,
            small_penalty: 5,
            large_penalty: 60,
        }
    }
}

/// GPU decompression of compressed image planes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecompressionConfig {
    /// Request lossless compression and decode every event on the GPU stage.
    pub enabled: bool,
}

/// Artifact persistence configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Output directory for data files
    pub output_dir: PathBuf,
    /// File name prefix of every artifact
    pub prefix: String,
    /// Save one image per enabled component per usable event
    pub save_images: bool,
    /// Write `run_summary.json` at the end of the run
    pub write_summary: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("."),
            prefix: "StereoAcquisition".to_string(),
            save_images: true,
            write_summary: true,
        }
    }
}

/// Device definition in configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceDefinition {
    /// Unique device identifier
    pub id: String,
    /// Backend that provides the device (e.g., "mock")
    #[serde(default = "default_driver")]
    pub driver: String,
    /// Whether this device is enabled
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Backend-specific configuration (dynamic)
    #[serde(default = "empty_table")]
    pub config: toml::Value,
}

fn default_driver() -> String {
    "mock".to_string()
}

fn default_enabled() -> bool {
    true
}

fn empty_table() -> toml::Value {
    toml::Value::Table(toml::map::Map::new())
}

const KNOWN_DRIVERS: [&str; 1] = ["mock"];

impl AppConfig {
    /// Load configuration from the default file and environment variables
    ///
    /// Environment variables override configuration with prefix `STEREO_DAQ_`.
    /// Example: `STEREO_DAQ_ACQUISITION__FRAMES=10`
    pub fn load() -> Result<Self, figment::Error> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    ///
    /// A missing file contributes nothing, so defaults and environment apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("STEREO_DAQ_").split("__"))
            .extract()
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), String> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            ));
        }

        let acq = &self.acquisition;
        if acq.frames == 0 {
            return Err("acquisition.frames must be greater than 0".to_string());
        }
        if acq.event_timeout.is_zero() || acq.trigger_timeout.is_zero() || acq.wait_slice.is_zero()
        {
            return Err("acquisition timeouts must be greater than 0".to_string());
        }
        if acq.buffer_count == 0 {
            return Err("acquisition.buffer_count must be greater than 0".to_string());
        }
        if acq.wait_indefinitely && !acq.external_trigger {
            return Err(
                "acquisition.wait_indefinitely requires acquisition.external_trigger".to_string(),
            );
        }
        acq.components.validate().map_err(|e| e.to_string())?;
        if acq.point_cloud
            && !(acq.components.disparity_sensor1 && acq.components.rectified_sensor1)
        {
            return Err(
                "point cloud output needs both the disparity and rectified sensor 1 components"
                    .to_string(),
            );
        }

        if self.stereo.speckle_threshold < 0.0 {
            return Err(format!(
                "Invalid speckle_threshold {}. Must be >= 0",
                self.stereo.speckle_threshold
            ));
        }
        if self.camera.exposure_time_us.is_some_and(|e| e <= 0.0) {
            return Err("camera.exposure_time_us must be positive".to_string());
        }
        if self.camera.gain_db.is_some_and(|g| g < 0.0) {
            return Err("camera.gain_db must not be negative".to_string());
        }

        let prefix = &self.storage.prefix;
        if prefix.is_empty() || prefix.contains(['/', '\\']) {
            return Err(format!("Invalid storage prefix '{prefix}'"));
        }

        // Validate device IDs are unique
        let mut ids = std::collections::HashSet::new();
        for device in &self.devices {
            if !ids.insert(&device.id) {
                return Err(format!("Duplicate device ID: {}", device.id));
            }
            if !KNOWN_DRIVERS.contains(&device.driver.as_str()) {
                return Err(format!(
                    "Unknown driver '{}' for device {}. Must be one of: {}",
                    device.driver,
                    device.id,
                    KNOWN_DRIVERS.join(", ")
                ));
            }
        }

        Ok(())
    }

    /// Get all enabled devices
    pub fn enabled_devices(&self) -> Vec<&DeviceDefinition> {
        self.devices.iter().filter(|dev| dev.enabled).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.acquisition.frames, 3);
        assert_eq!(config.stereo.max_speckle_size, 40);
        assert!(config.acquisition.components.rectified_sensor1);
        assert!(config.acquisition.components.disparity_sensor1);
        assert!(!config.acquisition.components.raw_sensor1);
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.application.log_level = "verbose".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.acquisition.frames = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.acquisition.components = StreamTransmitConfig::with(&[ComponentKind::RawSensor1]);
        assert!(config
            .validate()
            .unwrap_err()
            .contains("point cloud output needs"));
        config.acquisition.point_cloud = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn unbounded_wait_needs_external_trigger() {
        let mut config = AppConfig::default();
        config.acquisition.wait_indefinitely = true;
        assert!(config
            .validate()
            .unwrap_err()
            .contains("wait_indefinitely requires"));

        config.acquisition.external_trigger = true;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn duplicate_device_ids_rejected() {
        let device = DeviceDefinition {
            id: "cam".into(),
            driver: "mock".into(),
            enabled: true,
            config: empty_table(),
        };
        let config = AppConfig {
            devices: vec![device.clone(), device],
            ..AppConfig::default()
        };
        assert!(config.validate().unwrap_err().contains("Duplicate device ID"));
    }

    #[test]
    fn load_from_toml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[application]
log_level = "debug"
log_format = "json"

[acquisition]
frames = 7
event_timeout = "1s 500ms"
eligibility = {{ model_prefix = "BX" }}

[acquisition.components]
raw_sensor1 = true
rectified_sensor1 = true
disparity_sensor1 = true

[storage]
prefix = "Bench"

[[devices]]
id = "left"
config = {{ serial = "1001", transport = "usb3" }}

[[devices]]
id = "spare"
enabled = false
"#
        )
        .unwrap();

        let config = AppConfig::load_from(file.path()).unwrap();
        assert_eq!(config.application.log_format, OutputFormat::Json);
        assert_eq!(config.acquisition.frames, 7);
        assert_eq!(config.acquisition.event_timeout, Duration::from_millis(1500));
        assert_eq!(
            config.acquisition.eligibility,
            EligibilityRule::ModelPrefix("BX".into())
        );
        assert!(config.acquisition.components.raw_sensor1);
        assert!(!config.acquisition.components.raw_sensor2);
        assert_eq!(config.storage.prefix, "Bench");
        assert!(config.storage.save_images);
        assert_eq!(config.enabled_devices().len(), 1);
        assert_eq!(config.devices[0].driver, "mock");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load_from(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.acquisition, AcquisitionConfig::default());
    }
}

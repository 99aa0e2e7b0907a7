//! Simulated device system: enumeration and one-shot opening of mock cameras.

use crate::common::{ErrorConfig, MockMode};
use crate::stereo_camera::{MockDeviceStats, MockStereoCamera};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use stereo_core::{Device, DeviceFault, DeviceInfo, DeviceSystem, TransportClass};
use tracing::info;

/// One simulated camera, as described in a configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MockDeviceConfig {
    /// Serial number; must be unique within the system.
    pub serial: String,
    /// Model name.
    pub model: String,
    /// Transport reported to the host.
    pub transport: TransportClass,
    /// Image width in pixels.
    pub width: u32,
    /// Image height in pixels.
    pub height: u32,
    /// False builds a mono camera.
    pub stereo: bool,
    /// Capture timing and failure behaviour.
    pub mode: MockMode,
    /// Chaos-mode seed.
    pub seed: Option<u64>,
    /// Milliseconds between frames in realistic mode.
    #[serde(with = "duration_ms")]
    pub frame_interval: Duration,
}

impl Default for MockDeviceConfig {
    fn default() -> Self {
        Self {
            serial: "00000000".into(),
            model: "Simulated Stereo Camera".into(),
            transport: TransportClass::GigEVision,
            width: 64,
            height: 48,
            stereo: true,
            mode: MockMode::Instant,
            seed: None,
            frame_interval: Duration::from_millis(33),
        }
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

/// Device system over a fixed set of mock cameras.
///
/// Each camera can be opened once; its counters stay reachable through
/// [`MockDeviceSystem::stats`] after the handle has moved to a worker.
pub struct MockDeviceSystem {
    infos: Vec<DeviceInfo>,
    cameras: Mutex<HashMap<String, MockStereoCamera>>,
    stats: HashMap<String, Arc<MockDeviceStats>>,
}

impl MockDeviceSystem {
    /// Enumerate `cameras` in the given order, renumbering their indices.
    pub fn new(cameras: Vec<MockStereoCamera>) -> Self {
        let mut infos = Vec::with_capacity(cameras.len());
        let mut stats = HashMap::new();
        let mut by_serial = HashMap::new();
        for (index, camera) in cameras.into_iter().enumerate() {
            let mut info = camera.info().clone();
            info.index = index;
            stats.insert(info.serial_number.clone(), camera.stats());
            by_serial.insert(info.serial_number.clone(), camera);
            infos.push(info);
        }
        Self {
            infos,
            cameras: Mutex::new(by_serial),
            stats,
        }
    }

    /// Build cameras from configuration entries.
    pub fn from_config(devices: &[MockDeviceConfig]) -> Self {
        let cameras = devices
            .iter()
            .enumerate()
            .map(|(index, cfg)| {
                let mut builder = MockStereoCamera::builder()
                    .index(index)
                    .serial(cfg.serial.clone())
                    .model(cfg.model.clone())
                    .transport(cfg.transport)
                    .resolution(cfg.width, cfg.height)
                    .stereo(cfg.stereo)
                    .mode(cfg.mode)
                    .frame_interval(cfg.frame_interval);
                if let Some(seed) = cfg.seed {
                    builder = builder.seed(seed);
                }
                if cfg.mode != MockMode::Chaos {
                    builder = builder.error_config(ErrorConfig::none());
                }
                builder.build()
            })
            .collect();
        Self::new(cameras)
    }

    /// Counters of the camera with `serial`.
    #[must_use]
    pub fn stats(&self, serial: &str) -> Option<Arc<MockDeviceStats>> {
        self.stats.get(serial).cloned()
    }
}

impl DeviceSystem for MockDeviceSystem {
    fn library_version(&self) -> String {
        format!("mock {}", env!("CARGO_PKG_VERSION"))
    }

    fn enumerate(&self) -> Result<Vec<DeviceInfo>, DeviceFault> {
        info!(count = self.infos.len(), "mock devices enumerated");
        Ok(self.infos.clone())
    }

    fn open(&self, info: &DeviceInfo) -> Result<Box<dyn Device>, DeviceFault> {
        let camera = self
            .cameras
            .lock()
            .remove(&info.serial_number)
            .ok_or_else(|| {
                DeviceFault::invalid_state(format!(
                    "device {} is unknown or already open",
                    info.serial_number
                ))
            })?;
        Ok(Box::new(camera))
    }
}

//! Image components a stereo camera can transmit, and which ones are enabled.

use crate::sfnc::entry;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// One image plane kind inside a capture event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentKind {
    /// Unrectified image of sensor 1.
    RawSensor1,
    /// Unrectified image of sensor 2.
    RawSensor2,
    /// Rectified image of sensor 1, the reference for disparity.
    RectifiedSensor1,
    /// Rectified image of sensor 2.
    RectifiedSensor2,
    /// Disparity is only produced relative to sensor 1.
    DisparitySensor1,
}

impl ComponentKind {
    /// Every kind, in the order a device transmits them.
    pub const ALL: [ComponentKind; 5] = [
        ComponentKind::RawSensor1,
        ComponentKind::RawSensor2,
        ComponentKind::RectifiedSensor1,
        ComponentKind::RectifiedSensor2,
        ComponentKind::DisparitySensor1,
    ];

    /// `SourceSelector` entry addressing this component.
    #[must_use]
    pub fn source_entry(self) -> &'static str {
        match self {
            ComponentKind::RawSensor1
            | ComponentKind::RectifiedSensor1
            | ComponentKind::DisparitySensor1 => entry::SENSOR1,
            ComponentKind::RawSensor2 | ComponentKind::RectifiedSensor2 => entry::SENSOR2,
        }
    }

    /// `ComponentSelector` entry addressing this component.
    #[must_use]
    pub fn component_entry(self) -> &'static str {
        match self {
            ComponentKind::RawSensor1 | ComponentKind::RawSensor2 => entry::RAW,
            ComponentKind::RectifiedSensor1 | ComponentKind::RectifiedSensor2 => entry::RECTIFIED,
            ComponentKind::DisparitySensor1 => entry::DISPARITY,
        }
    }

    /// Label used in artifact file names.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            ComponentKind::RawSensor1 => "RawSensor1",
            ComponentKind::RawSensor2 => "RawSensor2",
            ComponentKind::RectifiedSensor1 => "RectSensor1",
            ComponentKind::RectifiedSensor2 => "RectSensor2",
            ComponentKind::DisparitySensor1 => "Disparity",
        }
    }

    /// True for raw and rectified planes.
    #[must_use]
    pub fn is_image(self) -> bool {
        !matches!(self, ComponentKind::DisparitySensor1)
    }
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A component selection the device cannot stream.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StreamConfigError {
    #[error("no stream component is enabled")]
    NothingEnabled,

    #[error("disparity requires at least one raw or rectified component")]
    DisparityWithoutImage,
}

/// Per-component transmit flags written to the device before capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamTransmitConfig {
    /// Unrectified image of the first sensor.
    pub raw_sensor1: bool,
    /// Unrectified image of the second sensor.
    pub raw_sensor2: bool,
    /// Rectified image of the first sensor.
    pub rectified_sensor1: bool,
    /// Rectified image of the second sensor.
    pub rectified_sensor2: bool,
    /// Disparity map relative to the first sensor.
    pub disparity_sensor1: bool,
}

impl StreamTransmitConfig {
    /// Build a configuration from the listed components.
    #[must_use]
    pub fn with(kinds: &[ComponentKind]) -> Self {
        let mut config = Self::default();
        for &kind in kinds {
            config.set(kind, true);
        }
        config
    }

    /// Every component enabled.
    #[must_use]
    pub fn all() -> Self {
        Self::with(&ComponentKind::ALL)
    }

    /// Whether `kind` is transmitted.
    #[must_use]
    pub fn is_enabled(&self, kind: ComponentKind) -> bool {
        match kind {
            ComponentKind::RawSensor1 => self.raw_sensor1,
            ComponentKind::RawSensor2 => self.raw_sensor2,
            ComponentKind::RectifiedSensor1 => self.rectified_sensor1,
            ComponentKind::RectifiedSensor2 => self.rectified_sensor2,
            ComponentKind::DisparitySensor1 => self.disparity_sensor1,
        }
    }

    /// Switch one component on or off.
    pub fn set(&mut self, kind: ComponentKind, enabled: bool) {
        let flag = match kind {
            ComponentKind::RawSensor1 => &mut self.raw_sensor1,
            ComponentKind::RawSensor2 => &mut self.raw_sensor2,
            ComponentKind::RectifiedSensor1 => &mut self.rectified_sensor1,
            ComponentKind::RectifiedSensor2 => &mut self.rectified_sensor2,
            ComponentKind::DisparitySensor1 => &mut self.disparity_sensor1,
        };
        *flag = enabled;
    }

    /// Enabled kinds in transmit order.
    pub fn enabled(&self) -> impl Iterator<Item = ComponentKind> + '_ {
        ComponentKind::ALL
            .into_iter()
            .filter(|&kind| self.is_enabled(kind))
    }

    /// True when nothing is enabled.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.enabled().next().is_none()
    }

    /// Check the prerequisites between components.
    pub fn validate(&self) -> Result<(), StreamConfigError> {
        if self.is_empty() {
            return Err(StreamConfigError::NothingEnabled);
        }
        let has_image = ComponentKind::ALL
            .into_iter()
            .any(|kind| kind.is_image() && self.is_enabled(kind));
        if self.disparity_sensor1 && !has_image {
            return Err(StreamConfigError::DisparityWithoutImage);
        }
        Ok(())
    }
}

impl fmt::Display for StreamTransmitConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, kind) in ComponentKind::ALL.into_iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{}={}", kind.label(), u8::from(self.is_enabled(kind)))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disparity_alone_is_rejected() {
        let config = StreamTransmitConfig::with(&[ComponentKind::DisparitySensor1]);
        assert_eq!(
            config.validate(),
            Err(StreamConfigError::DisparityWithoutImage)
        );

        let config = StreamTransmitConfig::with(&[
            ComponentKind::DisparitySensor1,
            ComponentKind::RawSensor2,
        ]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn empty_config_is_rejected() {
        assert_eq!(
            StreamTransmitConfig::default().validate(),
            Err(StreamConfigError::NothingEnabled)
        );
    }

    #[test]
    fn selectors_address_sensor_pairs() {
        assert_eq!(ComponentKind::DisparitySensor1.source_entry(), "Sensor1");
        assert_eq!(ComponentKind::RectifiedSensor2.source_entry(), "Sensor2");
        assert_eq!(ComponentKind::RawSensor2.component_entry(), "Raw");
        assert_eq!(ComponentKind::RectifiedSensor1.component_entry(), "Rectified");
    }

    #[test]
    fn enabled_iterates_in_transmit_order() {
        let config = StreamTransmitConfig::with(&[
            ComponentKind::DisparitySensor1,
            ComponentKind::RawSensor1,
        ]);
        let kinds: Vec<_> = config.enabled().collect();
        assert_eq!(
            kinds,
            vec![ComponentKind::RawSensor1, ComponentKind::DisparitySensor1]
        );
        assert_eq!(
            config.to_string(),
            "RawSensor1=1 RawSensor2=0 RectSensor1=0 RectSensor2=0 Disparity=1"
        );
    }
}

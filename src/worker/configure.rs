//! The configuration sequence run between open and buffer attachment.
//!
//! Every step goes through the capability-checked [`ParameterAccess`] façade
//! and the first refused access aborts the sequence, naming the step and the
//! parameter. Steps that only apply to some devices (heartbeat, link tuning,
//! stereo processing) are skipped when the device does not expose them.

use super::WorkerSettings;
use crate::outcome::ConfigStage;
use std::fmt;
use stereo_core::sfnc::{self, entry};
use stereo_core::{
    ComponentKind, Device, Nodemap, ParameterAccess, ParameterError, PixelFormat,
    StereoCalibration, StreamTransmitConfig, TransportClass,
};
use tracing::{debug, info, warn};

/// A configuration step that could not be completed.
#[derive(Debug, Clone, PartialEq)]
pub struct StepFailure {
    /// Step that failed.
    pub stage: ConfigStage,
    /// What the device or the check reported.
    pub reason: String,
}

impl StepFailure {
    /// A failure of `stage`.
    pub fn new(stage: ConfigStage, reason: impl fmt::Display) -> Self {
        Self {
            stage,
            reason: reason.to_string(),
        }
    }
}

impl fmt::Display for StepFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.stage, self.reason)
    }
}

/// Attach the failing stage to any displayable error.
pub(crate) trait AtStage<T> {
    fn at(self, stage: ConfigStage) -> Result<T, StepFailure>;
}

impl<T, E: fmt::Display> AtStage<T> for Result<T, E> {
    fn at(self, stage: ConfigStage) -> Result<T, StepFailure> {
        self.map_err(|err| StepFailure::new(stage, err))
    }
}

/// Values chosen while tuning the GigE link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkTuning {
    /// Packet size written, in bytes.
    pub packet_size: i64,
    /// Limit written, when the node is writable.
    pub throughput_limit: Option<i64>,
}

/// What the device looks like once configured.
#[derive(Debug, Clone, PartialEq)]
pub struct Configured {
    /// Components as read back from the device.
    pub components: StreamTransmitConfig,
    /// Image width read back.
    pub width: u32,
    /// Image height read back.
    pub height: u32,
    /// Image pixel format read back.
    pub pixel_format: PixelFormat,
    /// Absent on mono cameras.
    pub calibration: Option<StereoCalibration>,
    /// Absent off GigE or when tuning is disabled.
    pub link: Option<LinkTuning>,
    /// Coordinate offset actually written, after clamping.
    pub coordinate_offset: Option<f64>,
    /// Restore the heartbeat at close.
    pub heartbeat_disabled: bool,
    /// Restore free-running mode at close.
    pub trigger_armed: bool,
}

/// Run every configuration step in order.
pub fn configure(
    device: &mut dyn Device,
    settings: &WorkerSettings,
) -> Result<Configured, StepFailure> {
    let transport = device.info().transport;

    let heartbeat_disabled = if transport == TransportClass::GigEVision {
        heartbeat(device, settings.diagnostic)?
    } else {
        false
    };

    device
        .params(Nodemap::Device)
        .set_enum_by_name(sfnc::ACQUISITION_MODE, entry::CONTINUOUS)
        .at(ConfigStage::AcquisitionMode)?;

    {
        let mut stream = device.params(Nodemap::Stream);
        stream
            .set_enum_by_name(sfnc::STREAM_BUFFER_HANDLING_MODE, entry::OLDEST_FIRST)
            .at(ConfigStage::StreamBuffering)?;
        stream
            .set_enum_by_name(sfnc::STREAM_BUFFER_COUNT_MODE, entry::MANUAL)
            .at(ConfigStage::StreamBuffering)?;
    }

    let (width, height, pixel_format) = image_format(&mut device.params(Nodemap::Device), settings)?;
    compression(&mut device.params(Nodemap::Device), settings.decompress)?;
    let components = stream_components(&mut device.params(Nodemap::Device), &settings.components)?;

    let link = if settings.camera.tune_link_throughput && transport == TransportClass::GigEVision {
        link_throughput(device)?
    } else {
        None
    };

    let (coordinate_offset, calibration) = if components.disparity_sensor1 {
        let mut params = device.params(Nodemap::Device);
        let offset = stereo_processing(&mut params, settings)?;
        let calibration = read_calibration(&params).at(ConfigStage::Calibration)?;
        info!(
            baseline = calibration.baseline,
            focal_length = calibration.focal_length,
            scale = calibration.coordinate_scale,
            offset = calibration.coordinate_offset,
            "stereo calibration read back"
        );
        (Some(offset), Some(calibration))
    } else {
        (None, None)
    };

    exposure_gain(&mut device.params(Nodemap::Device), settings)?;

    let trigger_armed = if settings.external_trigger {
        arm_trigger(&mut device.params(Nodemap::Device)).at(ConfigStage::Trigger)?;
        info!("external trigger armed on Line0, exposure active on Line1");
        true
    } else {
        false
    };

    Ok(Configured {
        components,
        width,
        height,
        pixel_format,
        calibration,
        link,
        coordinate_offset,
        heartbeat_disabled,
        trigger_armed,
    })
}

/// Disable the heartbeat for diagnostic runs, reset it otherwise.
///
/// Returns whether the heartbeat is now disabled.
fn heartbeat(device: &mut dyn Device, diagnostic: bool) -> Result<bool, StepFailure> {
    let mut tl = device.params(Nodemap::TransportLayer);
    if !tl.can_write(sfnc::GEV_HEARTBEAT_DISABLE) {
        warn!("heartbeat node is not writable, leaving it unchanged");
        return Ok(false);
    }
    tl.set(sfnc::GEV_HEARTBEAT_DISABLE, diagnostic)
        .at(ConfigStage::Heartbeat)?;
    if diagnostic {
        warn!("heartbeat disabled for a diagnostic run; power-cycle the camera if the run is interrupted");
    }
    Ok(diagnostic)
}

fn image_format(
    params: &mut ParameterAccess<'_>,
    settings: &WorkerSettings,
) -> Result<(u32, u32, PixelFormat), StepFailure> {
    let stage = ConfigStage::ImageFormat;
    if let Some(format) = &settings.camera.pixel_format {
        params.set_enum_by_name(sfnc::PIXEL_FORMAT, format).at(stage)?;
    }
    if let Some(width) = settings.camera.width {
        params.set(sfnc::WIDTH, width).at(stage)?;
    }
    if let Some(height) = settings.camera.height {
        params.set(sfnc::HEIGHT, height).at(stage)?;
    }

    let width = params.get::<i64>(sfnc::WIDTH).at(stage)?;
    let height = params.get::<i64>(sfnc::HEIGHT).at(stage)?;
    let entry_name = params.get_enum_name(sfnc::PIXEL_FORMAT).at(stage)?;
    let pixel_format = PixelFormat::from_entry(&entry_name)
        .ok_or_else(|| StepFailure::new(stage, format!("unsupported pixel format {entry_name}")))?;
    let width = u32::try_from(width).at(stage)?;
    let height = u32::try_from(height).at(stage)?;
    debug!(width, height, %pixel_format, "image format");
    Ok((width, height, pixel_format))
}

fn compression(params: &mut ParameterAccess<'_>, decompress: bool) -> Result<(), StepFailure> {
    let stage = ConfigStage::Compression;
    if decompress {
        params
            .set_enum_by_name(sfnc::IMAGE_COMPRESSION_MODE, entry::LOSSLESS)
            .at(stage)?;
        if params.can_write(sfnc::LOSSLESS_COMPRESSION_BLOCK_SIZE) {
            let min = params.min_int(sfnc::LOSSLESS_COMPRESSION_BLOCK_SIZE).at(stage)?;
            params
                .set(sfnc::LOSSLESS_COMPRESSION_BLOCK_SIZE, min)
                .at(stage)?;
            debug!(block_size = min, "lossless compression enabled");
        }
    } else if params.can_write(sfnc::IMAGE_COMPRESSION_MODE) {
        params
            .set_enum_by_name(sfnc::IMAGE_COMPRESSION_MODE, entry::OFF)
            .at(stage)?;
    }
    Ok(())
}

/// Write the transmit flag of every component and read the result back.
fn stream_components(
    params: &mut ParameterAccess<'_>,
    requested: &StreamTransmitConfig,
) -> Result<StreamTransmitConfig, StepFailure> {
    let stage = ConfigStage::Components;
    requested.validate().at(stage)?;

    if !params.is_available(sfnc::SOURCE_SELECTOR) || !params.is_available(sfnc::COMPONENT_SELECTOR)
    {
        // Single-sensor devices stream their raw image unconditionally.
        let mono = StreamTransmitConfig::with(&[ComponentKind::RawSensor1]);
        if *requested != mono {
            return Err(StepFailure::new(
                stage,
                ParameterError::NotAvailable {
                    name: sfnc::COMPONENT_SELECTOR.into(),
                },
            ));
        }
        return Ok(mono);
    }

    let mut readback = StreamTransmitConfig::default();
    for kind in ComponentKind::ALL {
        let enable = requested.is_enabled(kind);
        let selectable = params.has_enum_entry(sfnc::SOURCE_SELECTOR, kind.source_entry())
            && params.has_enum_entry(sfnc::COMPONENT_SELECTOR, kind.component_entry());
        if !selectable {
            if enable {
                return Err(StepFailure::new(
                    stage,
                    format!("device cannot transmit {kind}"),
                ));
            }
            continue;
        }

        params
            .set_enum_by_name(sfnc::SOURCE_SELECTOR, kind.source_entry())
            .at(stage)?;
        params
            .set_enum_by_name(sfnc::COMPONENT_SELECTOR, kind.component_entry())
            .at(stage)?;
        params.set(sfnc::COMPONENT_ENABLE, enable).at(stage)?;

        let actual = params.get::<bool>(sfnc::COMPONENT_ENABLE).at(stage)?;
        if actual != enable {
            return Err(StepFailure::new(
                stage,
                format!("{kind} transmit reads back {actual}, wrote {enable}"),
            ));
        }
        readback.set(kind, actual);
    }
    info!(components = %readback, "stream components configured");
    Ok(readback)
}

/// Packet size and throughput limit for GigE links.
fn link_throughput(device: &mut dyn Device) -> Result<Option<LinkTuning>, StepFailure> {
    let stage = ConfigStage::LinkThroughput;
    if !device.params(Nodemap::Device).can_write(sfnc::GEV_SCPS_PACKET_SIZE) {
        debug!("packet size not writable, link tuning skipped");
        return Ok(None);
    }

    let discovered = device.discover_max_packet_size().at(stage)?;
    let mut params = device.params(Nodemap::Device);
    let node_max = params.max_int(sfnc::GEV_SCPS_PACKET_SIZE).at(stage)?;
    let packet_size = discovered.min(node_max);
    params
        .set(sfnc::GEV_SCPS_PACKET_SIZE, packet_size)
        .at(stage)?;

    let throughput_limit = if params.can_write(sfnc::DEVICE_LINK_THROUGHPUT_LIMIT)
        && params.can_read(sfnc::DEVICE_LINK_CURRENT_THROUGHPUT)
    {
        let current = params
            .get::<i64>(sfnc::DEVICE_LINK_CURRENT_THROUGHPUT)
            .at(stage)?;
        let min = params.min_int(sfnc::DEVICE_LINK_THROUGHPUT_LIMIT).at(stage)?;
        let limit = current.max(min);
        params
            .set(sfnc::DEVICE_LINK_THROUGHPUT_LIMIT, limit)
            .at(stage)?;
        Some(limit)
    } else {
        None
    };

    info!(packet_size, discovered, ?throughput_limit, "link throughput tuned");
    Ok(Some(LinkTuning {
        packet_size,
        throughput_limit,
    }))
}

/// Write SGBM settings that differ from the device's; returns the offset used.
fn stereo_processing(
    params: &mut ParameterAccess<'_>,
    settings: &WorkerSettings,
) -> Result<f64, StepFailure> {
    let stage = ConfigStage::StereoProcessing;
    let stereo = &settings.stereo;

    let max_offset = params.max_float(sfnc::SCAN3D_COORDINATE_OFFSET).at(stage)?;
    let offset = if stereo.coordinate_offset > max_offset {
        warn!(
            requested = stereo.coordinate_offset,
            max = max_offset,
            "coordinate offset above device maximum, clamped"
        );
        max_offset
    } else {
        stereo.coordinate_offset
    };

    let current = params.get::<f64>(sfnc::SCAN3D_COORDINATE_OFFSET).at(stage)?;
    if (current - offset).abs() > f64::EPSILON {
        params
            .set(sfnc::SCAN3D_COORDINATE_OFFSET, offset)
            .at(stage)?;
    }

    for (name, wanted) in [
        (sfnc::UNIQUENESS_RATIO, stereo.uniqueness_ratio),
        (sfnc::SMALL_PENALTY, stereo.small_penalty),
        (sfnc::LARGE_PENALTY, stereo.large_penalty),
    ] {
        let current = params.get::<i64>(name).at(stage)?;
        if current != wanted {
            params.set(name, wanted).at(stage)?;
            debug!(parameter = name, from = current, to = wanted, "stereo setting written");
        }
    }
    Ok(offset)
}

fn read_calibration(params: &ParameterAccess<'_>) -> Result<StereoCalibration, ParameterError> {
    Ok(StereoCalibration {
        baseline: params.get(sfnc::SCAN3D_BASELINE)?,
        focal_length: params.get(sfnc::SCAN3D_FOCAL_LENGTH)?,
        principal_point_u: params.get(sfnc::SCAN3D_PRINCIPAL_POINT_U)?,
        principal_point_v: params.get(sfnc::SCAN3D_PRINCIPAL_POINT_V)?,
        coordinate_scale: params.get(sfnc::SCAN3D_COORDINATE_SCALE)?,
        coordinate_offset: params.get(sfnc::SCAN3D_COORDINATE_OFFSET)?,
        invalid_data_flag: params.get(sfnc::SCAN3D_INVALID_DATA_FLAG)?,
        invalid_data_value: params.get(sfnc::SCAN3D_INVALID_DATA_VALUE)?,
    })
}

/// Fixed values switch the auto mode off; absent values select `Continuous`.
fn exposure_gain(
    params: &mut ParameterAccess<'_>,
    settings: &WorkerSettings,
) -> Result<(), StepFailure> {
    let stage = ConfigStage::ExposureGain;
    for (auto, value_node, value) in [
        (sfnc::EXPOSURE_AUTO, sfnc::EXPOSURE_TIME, settings.camera.exposure_time_us),
        (sfnc::GAIN_AUTO, sfnc::GAIN, settings.camera.gain_db),
    ] {
        match value {
            Some(value) => {
                params.set_enum_by_name(auto, entry::OFF).at(stage)?;
                params.set(value_node, value).at(stage)?;
                debug!(parameter = value_node, value, "fixed value");
            }
            None if params.can_write(auto) => {
                params.set_enum_by_name(auto, entry::CONTINUOUS).at(stage)?;
            }
            None => {}
        }
    }
    Ok(())
}

/// Hardware trigger on Line0 with exposure-active output on Line1.
fn arm_trigger(params: &mut ParameterAccess<'_>) -> Result<(), ParameterError> {
    params.set_enum_by_name(sfnc::TRIGGER_MODE, entry::OFF)?;
    params.set_enum_by_name(sfnc::TRIGGER_SOURCE, entry::LINE0)?;
    params.set_enum_by_name(sfnc::TRIGGER_SELECTOR, entry::FRAME_START)?;
    params.set_enum_by_name(sfnc::LINE_SELECTOR, entry::LINE1)?;
    params.set_enum_by_name(sfnc::LINE_SOURCE, entry::EXPOSURE_ACTIVE)?;
    params.set_enum_by_name(sfnc::TRIGGER_MODE, entry::ON)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use stereo_core::{Access, ParameterValue};
    use stereo_driver_mock::MockStereoCamera;

    fn settings() -> WorkerSettings {
        WorkerSettings::from_config(&AppConfig::default())
    }

    fn initialized(camera: MockStereoCamera) -> MockStereoCamera {
        let mut camera = camera;
        camera.init().unwrap();
        camera
    }

    #[test]
    fn default_sequence_configures_stereo_camera() {
        let mut camera = initialized(MockStereoCamera::builder().resolution(32, 16).build());
        let configured = configure(&mut camera, &settings()).unwrap();

        assert_eq!(
            configured.components,
            StreamTransmitConfig::with(&[
                ComponentKind::RectifiedSensor1,
                ComponentKind::DisparitySensor1
            ])
        );
        assert_eq!((configured.width, configured.height), (32, 16));
        assert_eq!(configured.pixel_format, PixelFormat::Mono8);
        assert!(configured.calibration.is_some());
        assert!(!configured.trigger_armed);
        assert!(!configured.heartbeat_disabled);

        let device = camera.nodemap(Nodemap::Device);
        assert_eq!(device.peek_enum(sfnc::ACQUISITION_MODE).as_deref(), Some("Continuous"));
        assert!(device.component_enabled("Sensor1", "Disparity"));
        assert!(!device.component_enabled("Sensor2", "Raw"));
        let stream = camera.nodemap(Nodemap::Stream);
        assert_eq!(
            stream.peek_enum(sfnc::STREAM_BUFFER_HANDLING_MODE).as_deref(),
            Some("OldestFirst")
        );
        assert_eq!(stream.peek_enum(sfnc::STREAM_BUFFER_COUNT_MODE).as_deref(), Some("Manual"));
    }

    #[test]
    fn unwritable_acquisition_mode_names_the_stage() {
        let mut camera = initialized(
            MockStereoCamera::builder()
                .configure_nodemap(Nodemap::Device, |dir| {
                    dir.set_access(sfnc::ACQUISITION_MODE, Access::READ_ONLY);
                })
                .build(),
        );
        let failure = configure(&mut camera, &settings()).unwrap_err();
        assert_eq!(failure.stage, ConfigStage::AcquisitionMode);
        assert!(failure.reason.contains("AcquisitionMode"));
    }

    #[test]
    fn throughput_limit_never_below_node_minimum() {
        let mut camera = initialized(
            MockStereoCamera::builder()
                .configure_nodemap(Nodemap::Device, |dir| {
                    dir.poke(
                        sfnc::DEVICE_LINK_CURRENT_THROUGHPUT,
                        ParameterValue::Int(5_000_000),
                    );
                })
                .build(),
        );
        let configured = configure(&mut camera, &settings()).unwrap();
        assert_eq!(
            configured.link,
            Some(LinkTuning {
                packet_size: 9000,
                throughput_limit: Some(10_000_000),
            })
        );
        let device = camera.nodemap(Nodemap::Device);
        assert_eq!(
            device.peek(sfnc::DEVICE_LINK_THROUGHPUT_LIMIT),
            Some(ParameterValue::Int(10_000_000))
        );
    }

    #[test]
    fn throughput_limit_follows_current_throughput() {
        let mut camera = initialized(MockStereoCamera::builder().build());
        let configured = configure(&mut camera, &settings()).unwrap();
        assert_eq!(
            configured.link.and_then(|l| l.throughput_limit),
            Some(110_000_000)
        );
    }

    #[test]
    fn coordinate_offset_is_clamped() {
        let mut camera = initialized(MockStereoCamera::builder().build());
        let mut settings = settings();
        settings.stereo.coordinate_offset = 1000.0;

        let configured = configure(&mut camera, &settings).unwrap();
        assert_eq!(configured.coordinate_offset, Some(768.0));
        assert_eq!(
            configured.calibration.map(|c| c.coordinate_offset),
            Some(768.0)
        );
        assert_eq!(
            camera
                .nodemap(Nodemap::Device)
                .peek(sfnc::SCAN3D_COORDINATE_OFFSET),
            Some(ParameterValue::Float(768.0))
        );
    }

    #[test]
    fn unchanged_stereo_settings_are_not_written() {
        let mut camera = initialized(MockStereoCamera::builder().build());
        let log = camera.nodemap(Nodemap::Device).access_log();
        configure(&mut camera, &settings()).unwrap();

        let writes: Vec<String> = log
            .lock()
            .iter()
            .filter_map(|record| match record {
                stereo_driver_mock::AccessRecord::Write(name, _) => Some(name.clone()),
                stereo_driver_mock::AccessRecord::Read(_) => None,
            })
            .collect();
        assert!(!writes.iter().any(|n| n == sfnc::UNIQUENESS_RATIO));
        assert!(!writes.iter().any(|n| n == sfnc::SCAN3D_COORDINATE_OFFSET));
    }

    #[test]
    fn mono_camera_accepts_only_raw_sensor1() {
        let mut camera = initialized(MockStereoCamera::builder().stereo(false).build());
        let mut settings = settings();
        settings.components = StreamTransmitConfig::with(&[ComponentKind::RawSensor1]);
        let configured = configure(&mut camera, &settings).unwrap();
        assert_eq!(configured.components, settings.components);
        assert!(configured.calibration.is_none());

        let mut camera = initialized(MockStereoCamera::builder().stereo(false).build());
        let failure = configure(&mut camera, &self::settings()).unwrap_err();
        assert_eq!(failure.stage, ConfigStage::Components);
    }

    #[test]
    fn trigger_sequence_ends_armed() {
        let mut camera = initialized(MockStereoCamera::builder().build());
        let mut settings = settings();
        settings.external_trigger = true;
        let configured = configure(&mut camera, &settings).unwrap();
        assert!(configured.trigger_armed);

        let device = camera.nodemap(Nodemap::Device);
        assert_eq!(device.peek_enum(sfnc::TRIGGER_MODE).as_deref(), Some("On"));
        assert_eq!(device.peek_enum(sfnc::TRIGGER_SOURCE).as_deref(), Some("Line0"));
        assert_eq!(device.peek_enum(sfnc::LINE_SELECTOR).as_deref(), Some("Line1"));
        assert_eq!(device.peek_enum(sfnc::LINE_SOURCE).as_deref(), Some("ExposureActive"));
    }

    #[test]
    fn fixed_exposure_turns_auto_off() {
        let mut camera = initialized(MockStereoCamera::builder().build());
        let mut settings = settings();
        settings.camera.exposure_time_us = Some(5000.0);
        configure(&mut camera, &settings).unwrap();

        let device = camera.nodemap(Nodemap::Device);
        assert_eq!(device.peek_enum(sfnc::EXPOSURE_AUTO).as_deref(), Some("Off"));
        assert_eq!(device.peek(sfnc::EXPOSURE_TIME), Some(ParameterValue::Float(5000.0)));
        assert_eq!(device.peek_enum(sfnc::GAIN_AUTO).as_deref(), Some("Continuous"));
    }

    #[test]
    fn diagnostic_run_disables_heartbeat() {
        let mut camera = initialized(MockStereoCamera::builder().build());
        let mut settings = settings();
        settings.diagnostic = true;
        let configured = configure(&mut camera, &settings).unwrap();
        assert!(configured.heartbeat_disabled);
        assert_eq!(
            camera.nodemap(Nodemap::TransportLayer).peek(sfnc::GEV_HEARTBEAT_DISABLE),
            Some(ParameterValue::Bool(true))
        );
    }

    #[test]
    fn decompression_selects_lossless_with_smallest_block() {
        let mut camera = initialized(MockStereoCamera::builder().build());
        let mut settings = settings();
        settings.decompress = true;
        configure(&mut camera, &settings).unwrap();

        let device = camera.nodemap(Nodemap::Device);
        assert_eq!(device.peek_enum(sfnc::IMAGE_COMPRESSION_MODE).as_deref(), Some("Lossless"));
        assert_eq!(
            device.peek(sfnc::LOSSLESS_COMPRESSION_BLOCK_SIZE),
            Some(ParameterValue::Int(256))
        );
    }
}

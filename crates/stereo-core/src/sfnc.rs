//! Standard feature names used to configure stereo and mono cameras.
//!
//! Names follow the GenICam Standard Features Naming Convention.

// Device identification (transport-layer device nodemap)
/// Enumeration; stereo cameras report a 3D entry.
pub const DEVICE_TYPE: &str = "DeviceType";
/// Serial number string.
pub const DEVICE_SERIAL_NUMBER: &str = "DeviceSerialNumber";
/// Model name string.
pub const DEVICE_MODEL_NAME: &str = "DeviceModelName";

// Heartbeat (GigE only)
/// Boolean; true stops the control channel heartbeat.
pub const GEV_HEARTBEAT_DISABLE: &str = "GevGVCPHeartbeatDisable";

// Acquisition control
/// Enumeration, set to `Continuous`.
pub const ACQUISITION_MODE: &str = "AcquisitionMode";
/// Bytes of one complete multi-component frame.
pub const PAYLOAD_SIZE: &str = "PayloadSize";

// Stream nodemap
/// Enumeration, set to `OldestFirst`.
pub const STREAM_BUFFER_HANDLING_MODE: &str = "StreamBufferHandlingMode";
/// Enumeration, set to `Manual`.
pub const STREAM_BUFFER_COUNT_MODE: &str = "StreamBufferCountMode";

// Image format control
/// Image width in pixels.
pub const WIDTH: &str = "Width";
/// Image height in pixels.
pub const HEIGHT: &str = "Height";
/// Enumeration of image pixel formats.
pub const PIXEL_FORMAT: &str = "PixelFormat";
/// Enumeration; `Lossless` makes the device compress image planes.
pub const IMAGE_COMPRESSION_MODE: &str = "ImageCompressionMode";
/// Integer block size of the lossless codec.
pub const LOSSLESS_COMPRESSION_BLOCK_SIZE: &str = "LosslessCompressionBlockSize";

// Multi-component streams
/// Selects the sensor the component nodes address.
pub const SOURCE_SELECTOR: &str = "SourceSelector";
/// Selects the component the enable node addresses.
pub const COMPONENT_SELECTOR: &str = "ComponentSelector";
/// Boolean transmit flag of the selected component.
pub const COMPONENT_ENABLE: &str = "ComponentEnable";

// Exposure and gain
/// Enumeration, `Off` for manual exposure.
pub const EXPOSURE_AUTO: &str = "ExposureAuto";
/// Exposure time in microseconds.
pub const EXPOSURE_TIME: &str = "ExposureTime";
/// Enumeration, `Off` for manual gain.
pub const GAIN_AUTO: &str = "GainAuto";
/// Gain in dB.
pub const GAIN: &str = "Gain";

// Link throughput (GigE)
/// Stream channel packet size in bytes.
pub const GEV_SCPS_PACKET_SIZE: &str = "GevSCPSPacketSize";
/// Bandwidth the device currently uses, in bytes per second.
pub const DEVICE_LINK_CURRENT_THROUGHPUT: &str = "DeviceLinkCurrentThroughput";
/// Upper bound on the device's bandwidth, in bytes per second.
pub const DEVICE_LINK_THROUGHPUT_LIMIT: &str = "DeviceLinkThroughputLimit";

// 3D scan calibration
/// Raw disparity to pixel factor.
pub const SCAN3D_COORDINATE_SCALE: &str = "Scan3dCoordinateScale";
/// Disparity offset in pixels.
pub const SCAN3D_COORDINATE_OFFSET: &str = "Scan3dCoordinateOffset";
/// Focal length in pixels.
pub const SCAN3D_FOCAL_LENGTH: &str = "Scan3dFocalLength";
/// Stereo baseline in meters.
pub const SCAN3D_BASELINE: &str = "Scan3dBaseline";
/// Principal point, horizontal.
pub const SCAN3D_PRINCIPAL_POINT_U: &str = "Scan3dPrincipalPointU";
/// Principal point, vertical.
pub const SCAN3D_PRINCIPAL_POINT_V: &str = "Scan3dPrincipalPointV";
/// Boolean; true when invalid pixels carry a marker value.
pub const SCAN3D_INVALID_DATA_FLAG: &str = "Scan3dInvalidDataFlag";
/// Marker value of invalid disparity pixels.
pub const SCAN3D_INVALID_DATA_VALUE: &str = "Scan3dInvalidDataValue";

// Semi-global block matching
/// Margin by which the best match must beat the second best, in percent.
pub const UNIQUENESS_RATIO: &str = "UniquenessRatio";
/// Penalty for disparity changes of one pixel.
pub const SMALL_PENALTY: &str = "SmallPenalty";
/// Penalty for disparity changes above one pixel.
pub const LARGE_PENALTY: &str = "LargePenalty";

// Trigger and digital I/O
/// Enumeration, `On` to wait for a trigger.
pub const TRIGGER_MODE: &str = "TriggerMode";
/// Input line the trigger listens on.
pub const TRIGGER_SOURCE: &str = "TriggerSource";
/// Selects which trigger the other trigger nodes address.
pub const TRIGGER_SELECTOR: &str = "TriggerSelector";
/// Selects the I/O line the line nodes address.
pub const LINE_SELECTOR: &str = "LineSelector";
/// Signal routed to the selected output line.
pub const LINE_SOURCE: &str = "LineSource";

/// Enumeration entry names.
#[allow(missing_docs)]
pub mod entry {
    pub const CONTINUOUS: &str = "Continuous";
    pub const OFF: &str = "Off";
    pub const ON: &str = "On";
    pub const OLDEST_FIRST: &str = "OldestFirst";
    pub const MANUAL: &str = "Manual";
    pub const LOSSLESS: &str = "Lossless";

    pub const SENSOR1: &str = "Sensor1";
    pub const SENSOR2: &str = "Sensor2";
    pub const RAW: &str = "Raw";
    pub const RECTIFIED: &str = "Rectified";
    pub const DISPARITY: &str = "Disparity";

    pub const LINE0: &str = "Line0";
    pub const LINE1: &str = "Line1";
    pub const FRAME_START: &str = "FrameStart";
    pub const EXPOSURE_ACTIVE: &str = "ExposureActive";
}

//! Simulated stereo (and mono) camera implementing [`Device`].

use crate::common::{ErrorConfig, InjectedEventFault, MockMode};
use crate::directory::MockDirectory;
use crate::pattern::{disparity_plane, rle_encode, sensor_plane};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use stereo_pool::PoolError;
use stereo_core::{
    sfnc, Access, BufferOwnership, CaptureError, CaptureEvent, ComponentKind, ComponentPayload,
    Device, DeviceFault, DeviceInfo, FaultKind, Nodemap, ParameterDirectory, ParameterValue,
    PayloadStatus, PinnedRegion, PixelFormat, TransportClass,
};
use tracing::{debug, info, warn};

/// Counters a test can read after the camera has been moved to a worker.
#[derive(Debug, Default)]
pub struct MockDeviceStats {
    /// Device nodemap initialisations.
    pub init_calls: AtomicU64,
    /// Device nodemap releases.
    pub deinit_calls: AtomicU64,
    /// Acquisition starts.
    pub begin_calls: AtomicU64,
    /// Acquisition stops.
    pub end_calls: AtomicU64,
    /// Pools attached.
    pub attach_calls: AtomicU64,
    /// Pools detached.
    pub detach_calls: AtomicU64,
    /// Calls to `next_event`.
    pub wait_calls: AtomicU64,
    /// Events handed out by `next_event`.
    pub events_delivered: AtomicU64,
    /// Events given back through `release_event`.
    pub events_released: AtomicU64,
    /// Releases of events that were not outstanding.
    pub invalid_releases: AtomicU64,
    /// Waits that timed out.
    pub timeouts: AtomicU64,
    /// Waits that failed on the transport.
    pub transport_faults: AtomicU64,
    lifecycle: Mutex<MockLifecycle>,
}

/// Last observed device state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MockLifecycle {
    /// Between `init` and `deinit`.
    pub initialized: bool,
    /// Between `begin_acquisition` and `end_acquisition`.
    pub streaming: bool,
    /// Buffer ownership the device reports.
    pub ownership: BufferOwnership,
    /// The device still references a caller region.
    pub holds_region: bool,
}

impl MockDeviceStats {
    /// State at the last lifecycle call.
    #[must_use]
    pub fn lifecycle(&self) -> MockLifecycle {
        *self.lifecycle.lock()
    }

    /// Shorthand for `events_delivered`.
    #[must_use]
    pub fn delivered(&self) -> u64 {
        self.events_delivered.load(Ordering::SeqCst)
    }

    /// Shorthand for `events_released`.
    #[must_use]
    pub fn released(&self) -> u64 {
        self.events_released.load(Ordering::SeqCst)
    }

    /// Waits that timed out so far.
    #[must_use]
    pub fn timeouts(&self) -> u64 {
        self.timeouts.load(Ordering::SeqCst)
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::SeqCst);
    }
}

/// Builder for [`MockStereoCamera`].
pub struct MockStereoCameraBuilder {
    index: usize,
    serial: String,
    model: String,
    transport: TransportClass,
    width: u32,
    height: u32,
    stereo: bool,
    mode: MockMode,
    errors: Option<ErrorConfig>,
    seed: Option<u64>,
    frame_interval: Duration,
    customize: Vec<(Nodemap, Box<dyn FnOnce(&mut MockDirectory) + Send>)>,
}

impl MockStereoCameraBuilder {
    fn new() -> Self {
        Self {
            index: 0,
            serial: "00000000".into(),
            model: "Simulated Stereo Camera".into(),
            transport: TransportClass::GigEVision,
            width: 64,
            height: 48,
            stereo: true,
            mode: MockMode::Instant,
            errors: None,
            seed: None,
            frame_interval: Duration::from_millis(33),
            customize: Vec::new(),
        }
    }

    /// Enumeration index.
    pub fn index(mut self, index: usize) -> Self {
        self.index = index;
        self
    }

    /// Serial number reported by the device.
    pub fn serial(mut self, serial: impl Into<String>) -> Self {
        self.serial = serial.into();
        self
    }

    /// Model name reported by the device.
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Transport the device claims to use.
    pub fn transport(mut self, transport: TransportClass) -> Self {
        self.transport = transport;
        self
    }

    /// Image size; disparity has the same size.
    pub fn resolution(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// A mono camera has no component selectors and no stereo features.
    pub fn stereo(mut self, stereo: bool) -> Self {
        self.stereo = stereo;
        self
    }

    /// Capture timing and failure behaviour.
    pub fn mode(mut self, mode: MockMode) -> Self {
        self.mode = mode;
        self
    }

    /// Scripted failures; overrides the mode's default.
    pub fn error_config(mut self, errors: ErrorConfig) -> Self {
        self.errors = Some(errors);
        self
    }

    /// Seed of the chaos-mode generator.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Time between frames in realistic mode.
    pub fn frame_interval(mut self, interval: Duration) -> Self {
        self.frame_interval = interval;
        self
    }

    /// Adjust one of the generated dictionaries before the camera is built.
    pub fn configure_nodemap(
        mut self,
        map: Nodemap,
        f: impl FnOnce(&mut MockDirectory) + Send + 'static,
    ) -> Self {
        self.customize.push((map, Box::new(f)));
        self
    }

    /// Finish the camera with its nodemaps populated.
    pub fn build(self) -> MockStereoCamera {
        MockStereoCamera::from_builder(self)
    }
}

/// Simulated camera.
///
/// Delivers one event per `next_event` call, with a payload per enabled
/// component, and tracks every delivered event until it is released.
pub struct MockStereoCamera {
    info: DeviceInfo,
    stereo: bool,
    mode: MockMode,
    frame_interval: Duration,
    errors: ErrorConfig,
    device_map: MockDirectory,
    stream_map: MockDirectory,
    tl_map: MockDirectory,
    region: Option<Arc<PinnedRegion>>,
    ownership: BufferOwnership,
    initialized: bool,
    streaming: bool,
    iteration: u64,
    next_frame_id: u64,
    outstanding: HashSet<u64>,
    stats: Arc<MockDeviceStats>,
}

impl MockStereoCamera {
    /// A GigE stereo camera at 64x48 unless told otherwise.
    pub fn builder() -> MockStereoCameraBuilder {
        MockStereoCameraBuilder::new()
    }

    fn from_builder(builder: MockStereoCameraBuilder) -> Self {
        let errors = match (builder.errors, builder.mode) {
            (Some(errors), _) => errors,
            (None, MockMode::Chaos) => ErrorConfig::chaos(0.1, 0.05, builder.seed),
            (None, _) => ErrorConfig::none(),
        };

        let mut device_map =
            device_nodemap(builder.width, builder.height, builder.stereo, builder.transport);
        let mut stream_map = stream_nodemap();
        let mut tl_map = tl_nodemap(&builder.serial, &builder.model, builder.transport);
        for (map, f) in builder.customize {
            match map {
                Nodemap::Device => f(&mut device_map),
                Nodemap::Stream => f(&mut stream_map),
                Nodemap::TransportLayer => f(&mut tl_map),
            }
        }

        Self {
            info: DeviceInfo {
                index: builder.index,
                serial_number: builder.serial,
                model_name: builder.model,
                transport: builder.transport,
            },
            stereo: builder.stereo,
            mode: builder.mode,
            frame_interval: builder.frame_interval,
            errors,
            device_map,
            stream_map,
            tl_map,
            region: None,
            ownership: BufferOwnership::System,
            initialized: false,
            streaming: false,
            iteration: 0,
            next_frame_id: 0,
            outstanding: HashSet::new(),
            stats: Arc::new(MockDeviceStats::default()),
        }
    }

    /// Shared counters, valid after the camera is moved.
    #[must_use]
    pub fn stats(&self) -> Arc<MockDeviceStats> {
        Arc::clone(&self.stats)
    }

    /// Direct access to a dictionary, bypassing capability checks.
    pub fn nodemap(&mut self, map: Nodemap) -> &mut MockDirectory {
        match map {
            Nodemap::Device => &mut self.device_map,
            Nodemap::Stream => &mut self.stream_map,
            Nodemap::TransportLayer => &mut self.tl_map,
        }
    }

    fn publish(&self) {
        *self.stats.lifecycle.lock() = MockLifecycle {
            initialized: self.initialized,
            streaming: self.streaming,
            ownership: self.ownership,
            holds_region: self.region.is_some(),
        };
    }

    fn geometry(&self) -> (u32, u32) {
        let read = |name: &str| match self.device_map.peek(name) {
            Some(ParameterValue::Int(v)) => u32::try_from(v).unwrap_or(0),
            _ => 0,
        };
        (read(sfnc::WIDTH), read(sfnc::HEIGHT))
    }

    fn enabled_components(&self) -> Vec<ComponentKind> {
        if !self.stereo {
            return vec![ComponentKind::RawSensor1];
        }
        ComponentKind::ALL
            .into_iter()
            .filter(|kind| {
                self.device_map
                    .component_enabled(kind.source_entry(), kind.component_entry())
            })
            .collect()
    }

    fn compression_enabled(&self) -> bool {
        self.device_map.peek_enum(sfnc::IMAGE_COMPRESSION_MODE).as_deref() == Some("Lossless")
    }

    fn image_format(&self) -> PixelFormat {
        match self.device_map.peek_enum(sfnc::PIXEL_FORMAT).as_deref() {
            Some("BayerRG8") => PixelFormat::BayerRG8,
            _ => PixelFormat::Mono8,
        }
    }

    fn synthesize(&self, frame_id: u64, faults: &[InjectedEventFault]) -> Vec<ComponentPayload> {
        let (width, height) = self.geometry();
        let compress = self.compression_enabled();
        let format = self.image_format();

        self.enabled_components()
            .into_iter()
            .filter(|kind| !faults.contains(&InjectedEventFault::Missing(*kind)))
            .map(|kind| {
                let mut payload = match kind {
                    ComponentKind::DisparitySensor1 => {
                        let plane = disparity_plane(width, height, frame_id);
                        let data: Vec<u8> = plane.iter().flat_map(|v| v.to_le_bytes()).collect();
                        ComponentPayload::complete(kind, width, height, PixelFormat::Coord3dC16, data)
                    }
                    _ => {
                        let sensor = if kind.source_entry() == sfnc::entry::SENSOR2 { 2 } else { 1 };
                        let plane = sensor_plane(width, height, frame_id, sensor);
                        if compress {
                            let mut p = ComponentPayload::complete(
                                kind,
                                width,
                                height,
                                format,
                                rle_encode(&plane),
                            );
                            p.compressed = true;
                            p
                        } else {
                            ComponentPayload::complete(kind, width, height, format, plane)
                        }
                    }
                };
                if faults.contains(&InjectedEventFault::Incomplete(kind)) {
                    payload.status = PayloadStatus::Incomplete {
                        reason: "missing packets".into(),
                    };
                }
                if payload.compressed && faults.contains(&InjectedEventFault::Corrupt(kind)) {
                    // An odd length is never a valid run-length stream.
                    let len = payload.data.len().saturating_sub(1);
                    payload.data = payload.data.slice(..len);
                }
                payload
            })
            .collect()
    }

    fn require_initialized(&self, op: &str) -> Result<(), DeviceFault> {
        if self.initialized {
            Ok(())
        } else {
            Err(DeviceFault::invalid_state(format!(
                "{op} on uninitialized device {}",
                self.info.serial_number
            )))
        }
    }
}

impl Device for MockStereoCamera {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn init(&mut self) -> Result<(), DeviceFault> {
        if self.initialized {
            return Ok(());
        }
        self.errors.check_operation("init")?;
        MockDeviceStats::bump(&self.stats.init_calls);
        self.initialized = true;
        self.publish();
        info!(serial = %self.info.serial_number, "mock camera initialized");
        Ok(())
    }

    fn deinit(&mut self) -> Result<(), DeviceFault> {
        MockDeviceStats::bump(&self.stats.deinit_calls);
        if self.streaming {
            warn!(serial = %self.info.serial_number, "deinit while streaming, stopping");
            self.end_acquisition()?;
        }
        self.region = None;
        self.ownership = BufferOwnership::System;
        self.initialized = false;
        self.publish();
        self.errors.check_operation("deinit")
    }

    fn parameters(&mut self, map: Nodemap) -> &mut dyn ParameterDirectory {
        self.nodemap(map)
    }

    fn discover_max_packet_size(&mut self) -> Result<i64, DeviceFault> {
        self.require_initialized("discover_max_packet_size")?;
        match self.info.transport {
            TransportClass::GigEVision => Ok(9000),
            _ => Err(DeviceFault::new(
                FaultKind::NotSupported,
                "packet size discovery requires GigE Vision",
            )),
        }
    }

    fn attach_buffers(&mut self, region: Arc<PinnedRegion>) -> Result<(), DeviceFault> {
        MockDeviceStats::bump(&self.stats.attach_calls);
        self.require_initialized("attach_buffers")?;
        self.errors.check_operation("attach_buffers")?;
        if self.streaming {
            return Err(DeviceFault::invalid_state("cannot attach buffers while streaming"));
        }
        let payload = match self.device_map.peek(sfnc::PAYLOAD_SIZE) {
            Some(ParameterValue::Int(v)) => usize::try_from(v).unwrap_or(0),
            _ => 0,
        };
        let layout = region.layout();
        if layout.buffer_size() < payload {
            return Err(DeviceFault::rejected(format!(
                "buffer size {} below payload size {payload}",
                layout.buffer_size()
            )));
        }
        let quantum = self.info.transport.alignment_quantum();
        if layout.buffer_size() % quantum != 0 {
            return Err(DeviceFault::rejected(format!(
                "buffer size {} is not a multiple of {quantum}",
                layout.buffer_size()
            )));
        }
        debug!(
            serial = %self.info.serial_number,
            buffers = layout.buffer_count(),
            "caller buffers attached"
        );
        self.region = Some(region);
        self.ownership = BufferOwnership::Caller;
        self.publish();
        Ok(())
    }

    fn detach_buffers(&mut self) -> Result<(), DeviceFault> {
        MockDeviceStats::bump(&self.stats.detach_calls);
        if self.streaming {
            return Err(DeviceFault::invalid_state("cannot detach buffers while streaming"));
        }
        self.region = None;
        self.ownership = BufferOwnership::System;
        self.publish();
        self.errors.check_operation("detach_buffers")
    }

    fn buffer_ownership(&self) -> BufferOwnership {
        self.ownership
    }

    fn begin_acquisition(&mut self) -> Result<(), DeviceFault> {
        MockDeviceStats::bump(&self.stats.begin_calls);
        self.require_initialized("begin_acquisition")?;
        self.errors.check_operation("begin_acquisition")?;
        if self.streaming {
            return Err(DeviceFault::invalid_state("acquisition already started"));
        }
        self.streaming = true;
        self.publish();
        Ok(())
    }

    fn end_acquisition(&mut self) -> Result<(), DeviceFault> {
        MockDeviceStats::bump(&self.stats.end_calls);
        if !self.streaming {
            return Err(DeviceFault::invalid_state("acquisition not started"));
        }
        self.streaming = false;
        if !self.outstanding.is_empty() {
            warn!(
                serial = %self.info.serial_number,
                outstanding = self.outstanding.len(),
                "acquisition ended with unreleased events"
            );
            self.outstanding.clear();
        }
        self.publish();
        self.errors.check_operation("end_acquisition")
    }

    fn is_streaming(&self) -> bool {
        self.streaming
    }

    fn next_event(&mut self, timeout: Duration) -> Result<CaptureEvent, CaptureError> {
        if !self.streaming {
            return Err(CaptureError::NotStreaming);
        }
        MockDeviceStats::bump(&self.stats.wait_calls);
        let iteration = self.iteration;
        self.iteration += 1;

        let faults = self.errors.event_faults(iteration);
        if faults.contains(&InjectedEventFault::Timeout) {
            MockDeviceStats::bump(&self.stats.timeouts);
            if self.mode == MockMode::Realistic {
                std::thread::sleep(timeout);
            }
            return Err(CaptureError::Timeout(timeout));
        }
        if faults.contains(&InjectedEventFault::Transport) {
            MockDeviceStats::bump(&self.stats.transport_faults);
            return Err(DeviceFault::communication("stream packet resend failed").into());
        }
        if self.mode == MockMode::Realistic {
            std::thread::sleep(self.frame_interval.min(timeout));
        }

        let slot = match &self.region {
            Some(region) => Some(region.claim_slot().ok_or_else(|| {
                DeviceFault::new(FaultKind::Hardware, "no free stream buffer")
            })?),
            None => None,
        };

        let frame_id = self.next_frame_id;
        self.next_frame_id += 1;
        let payloads = self.synthesize(frame_id, &faults);
        if let (Some(region), Some(slot)) = (&self.region, slot) {
            if let Err(err) = fill_slot(region, slot, &payloads) {
                region.return_slot(slot);
                return Err(DeviceFault::new(FaultKind::Hardware, err.to_string()).into());
            }
        }
        let mut event = CaptureEvent::new(frame_id, payloads)
            .with_timestamp(frame_id * self.frame_interval.as_nanos() as u64);
        if let Some(slot) = slot {
            event = event.with_buffer_slot(slot);
        }
        self.outstanding.insert(frame_id);
        MockDeviceStats::bump(&self.stats.events_delivered);
        Ok(event)
    }

    fn release_event(&mut self, event: CaptureEvent) -> Result<(), DeviceFault> {
        if !self.outstanding.remove(&event.frame_id()) {
            MockDeviceStats::bump(&self.stats.invalid_releases);
            return Err(DeviceFault::invalid_state(format!(
                "event {} is not outstanding",
                event.frame_id()
            )));
        }
        if let (Some(region), Some(slot)) = (&self.region, event.buffer_slot()) {
            region.return_slot(slot);
        }
        MockDeviceStats::bump(&self.stats.events_released);
        Ok(())
    }
}

/// Lay the component payloads out back to back in `slot`, as the transport
/// would have written them.
fn fill_slot(
    region: &PinnedRegion,
    slot: usize,
    payloads: &[ComponentPayload],
) -> Result<usize, PoolError> {
    let frame: Vec<u8> = payloads
        .iter()
        .flat_map(|p| p.data.iter().copied())
        .collect();
    region.write_slot(slot, &frame)
}

fn device_nodemap(width: u32, height: u32, stereo: bool, transport: TransportClass) -> MockDirectory {
    let rw = Access::READ_WRITE;
    let ro = Access::READ_ONLY;
    let (w, h) = (i64::from(width), i64::from(height));
    // Images plus one 16-bit disparity plane.
    let payload = if stereo { w * h * 6 } else { w * h };

    let mut dir = MockDirectory::new()
        .with_enum(
            sfnc::ACQUISITION_MODE,
            &["SingleFrame", "MultiFrame", "Continuous"],
            "SingleFrame",
            rw,
        )
        .with_int(sfnc::PAYLOAD_SIZE, payload, (0, payload), ro)
        .with_int(sfnc::WIDTH, w, (16, w), rw)
        .with_int(sfnc::HEIGHT, h, (16, h), rw)
        .with_enum(sfnc::PIXEL_FORMAT, &["Mono8", "BayerRG8", "Mono16"], "Mono8", rw)
        .with_enum(sfnc::IMAGE_COMPRESSION_MODE, &["Off", "Lossless"], "Off", rw)
        .with_int(sfnc::LOSSLESS_COMPRESSION_BLOCK_SIZE, 1024, (256, 4096), rw)
        .with_enum(sfnc::EXPOSURE_AUTO, &["Off", "Once", "Continuous"], "Continuous", rw)
        .with_float(sfnc::EXPOSURE_TIME, 20_000.0, (10.0, 1_000_000.0), rw)
        .with_enum(sfnc::GAIN_AUTO, &["Off", "Once", "Continuous"], "Continuous", rw)
        .with_float(sfnc::GAIN, 0.0, (0.0, 47.9), rw)
        .with_enum(sfnc::TRIGGER_MODE, &["Off", "On"], "Off", rw)
        .with_enum(sfnc::TRIGGER_SOURCE, &["Software", "Line0", "Line2", "Line3"], "Software", rw)
        .with_enum(sfnc::TRIGGER_SELECTOR, &["FrameStart", "AcquisitionStart"], "FrameStart", rw)
        .with_enum(sfnc::LINE_SELECTOR, &["Line0", "Line1", "Line2", "Line3"], "Line0", rw)
        .with_enum(sfnc::LINE_SOURCE, &["Off", "ExposureActive", "UserOutput0"], "Off", rw);

    if transport == TransportClass::GigEVision {
        dir = dir
            .with_int(sfnc::GEV_SCPS_PACKET_SIZE, 1500, (576, 9000), rw)
            .with_int(sfnc::DEVICE_LINK_CURRENT_THROUGHPUT, 110_000_000, (0, 125_000_000), ro)
            .with_int(
                sfnc::DEVICE_LINK_THROUGHPUT_LIMIT,
                125_000_000,
                (10_000_000, 125_000_000),
                rw,
            );
    }

    if stereo {
        dir = dir
            .with_enum(sfnc::SOURCE_SELECTOR, &["Sensor1", "Sensor2"], "Sensor1", rw)
            .with_enum(
                sfnc::COMPONENT_SELECTOR,
                &["Raw", "Rectified", "Disparity"],
                "Raw",
                rw,
            )
            .with_bool(sfnc::COMPONENT_ENABLE, false, rw)
            .with_float(sfnc::SCAN3D_COORDINATE_SCALE, 1.0 / 64.0, (0.0, 1.0), ro)
            .with_float(sfnc::SCAN3D_COORDINATE_OFFSET, 0.0, (0.0, 768.0), rw)
            .with_float(sfnc::SCAN3D_FOCAL_LENGTH, 1290.5, (0.0, 1e6), ro)
            .with_float(sfnc::SCAN3D_BASELINE, 0.12, (0.0, 10.0), ro)
            .with_float(sfnc::SCAN3D_PRINCIPAL_POINT_U, f64::from(width) / 2.0, (0.0, 1e5), ro)
            .with_float(sfnc::SCAN3D_PRINCIPAL_POINT_V, f64::from(height) / 2.0, (0.0, 1e5), ro)
            .with_bool(sfnc::SCAN3D_INVALID_DATA_FLAG, true, ro)
            .with_float(sfnc::SCAN3D_INVALID_DATA_VALUE, 0.0, (0.0, 65535.0), ro)
            .with_int(sfnc::UNIQUENESS_RATIO, 10, (0, 100), rw)
            .with_int(sfnc::SMALL_PENALTY, 5, (1, 1000), rw)
            .with_int(sfnc::LARGE_PENALTY, 60, (1, 1000), rw);
    }
    dir
}

fn stream_nodemap() -> MockDirectory {
    MockDirectory::new()
        .with_enum(
            sfnc::STREAM_BUFFER_HANDLING_MODE,
            &["OldestFirst", "OldestFirstOverwrite", "NewestOnly", "NewestFirst"],
            "NewestFirst",
            Access::READ_WRITE,
        )
        .with_enum(sfnc::STREAM_BUFFER_COUNT_MODE, &["Auto", "Manual"], "Auto", Access::READ_WRITE)
}

fn tl_nodemap(serial: &str, model: &str, transport: TransportClass) -> MockDirectory {
    let mut dir = MockDirectory::new()
        .with_enum(
            sfnc::DEVICE_TYPE,
            &["GigEVision", "USB3Vision"],
            transport.as_str(),
            Access::READ_ONLY,
        )
        .with_string(sfnc::DEVICE_SERIAL_NUMBER, serial, Access::READ_ONLY)
        .with_string(sfnc::DEVICE_MODEL_NAME, model, Access::READ_ONLY);
    if transport == TransportClass::GigEVision {
        dir = dir.with_bool(sfnc::GEV_HEARTBEAT_DISABLE, false, Access::READ_WRITE);
    }
    dir
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorScenario;
    use stereo_pool::{BufferLayout, HostAllocator, StreamBufferPool};

    fn enable(camera: &mut MockStereoCamera, kinds: &[ComponentKind]) {
        for kind in kinds {
            let mut params = camera.params(Nodemap::Device);
            params
                .set_enum_by_name(sfnc::SOURCE_SELECTOR, kind.source_entry())
                .unwrap();
            params
                .set_enum_by_name(sfnc::COMPONENT_SELECTOR, kind.component_entry())
                .unwrap();
            params.set(sfnc::COMPONENT_ENABLE, true).unwrap();
        }
    }

    #[test]
    fn delivers_enabled_components_only() {
        let mut camera = MockStereoCamera::builder().resolution(32, 16).build();
        camera.init().unwrap();
        enable(
            &mut camera,
            &[ComponentKind::RectifiedSensor1, ComponentKind::DisparitySensor1],
        );
        camera.begin_acquisition().unwrap();

        let event = camera.next_event(Duration::from_millis(10)).unwrap();
        let kinds: Vec<_> = event.payloads().iter().map(|p| p.kind).collect();
        assert_eq!(
            kinds,
            vec![ComponentKind::RectifiedSensor1, ComponentKind::DisparitySensor1]
        );
        let disparity = event.component(ComponentKind::DisparitySensor1).unwrap();
        assert_eq!(disparity.data.len(), 32 * 16 * 2);
        camera.release_event(event).unwrap();
        camera.end_acquisition().unwrap();
    }

    #[test]
    fn releasing_unknown_event_is_a_fault() {
        let mut camera = MockStereoCamera::builder().stereo(false).build();
        camera.init().unwrap();
        camera.begin_acquisition().unwrap();
        let stats = camera.stats();

        let bogus = CaptureEvent::new(99, Vec::new());
        assert!(camera.release_event(bogus).is_err());
        assert_eq!(stats.invalid_releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn injected_timeout_skips_one_wait() {
        let mut camera = MockStereoCamera::builder()
            .stereo(false)
            .error_config(ErrorConfig::scenario(ErrorScenario::TimeoutAt { iteration: 1 }))
            .build();
        camera.init().unwrap();
        camera.begin_acquisition().unwrap();

        let timeout = Duration::from_millis(5);
        assert!(camera.next_event(timeout).is_ok());
        assert_eq!(
            camera.next_event(timeout).unwrap_err(),
            CaptureError::Timeout(timeout)
        );
        assert!(camera.next_event(timeout).is_ok());
        assert_eq!(camera.stats().timeouts(), 1);
    }

    #[test]
    fn attach_rejects_undersized_buffers() {
        let mut camera = MockStereoCamera::builder()
            .stereo(false)
            .resolution(64, 64)
            .build();
        camera.init().unwrap();

        let layout = BufferLayout::for_payload(100, 2, TransportClass::GigEVision).unwrap();
        let mut pool = StreamBufferPool::allocate(&HostAllocator::unpinned(), layout).unwrap();
        let err = camera.attach_buffers(pool.lend().unwrap()).unwrap_err();
        assert_eq!(err.kind, FaultKind::Rejected);
        assert_eq!(camera.buffer_ownership(), BufferOwnership::System);
    }

    #[test]
    fn slots_cycle_through_attached_region() {
        let mut camera = MockStereoCamera::builder()
            .stereo(false)
            .resolution(16, 16)
            .build();
        camera.init().unwrap();
        let layout = BufferLayout::for_payload(256, 2, TransportClass::GigEVision).unwrap();
        let mut pool = StreamBufferPool::allocate(&HostAllocator::unpinned(), layout).unwrap();
        camera.attach_buffers(pool.lend().unwrap()).unwrap();
        assert_eq!(camera.buffer_ownership(), BufferOwnership::Caller);

        camera.begin_acquisition().unwrap();
        for expected_slot in [0, 1, 0, 1] {
            let event = camera.next_event(Duration::from_millis(5)).unwrap();
            assert_eq!(event.buffer_slot(), Some(expected_slot));
            camera.release_event(event).unwrap();
        }
        camera.end_acquisition().unwrap();
        camera.detach_buffers().unwrap();
        pool.release().unwrap();
    }

    #[test]
    fn frames_land_in_the_claimed_slot() {
        let mut camera = MockStereoCamera::builder().resolution(16, 8).build();
        camera.init().unwrap();
        enable(
            &mut camera,
            &[ComponentKind::RectifiedSensor1, ComponentKind::DisparitySensor1],
        );
        let payload = match camera.nodemap(Nodemap::Device).peek(sfnc::PAYLOAD_SIZE) {
            Some(ParameterValue::Int(v)) => usize::try_from(v).unwrap(),
            other => panic!("unexpected payload size {other:?}"),
        };
        let layout = BufferLayout::for_payload(payload, 2, TransportClass::GigEVision).unwrap();
        let mut pool = StreamBufferPool::allocate(&HostAllocator::unpinned(), layout).unwrap();
        let region = pool.lend().unwrap();
        camera.attach_buffers(Arc::clone(&region)).unwrap();

        camera.begin_acquisition().unwrap();
        for _ in 0..3 {
            let event = camera.next_event(Duration::from_millis(5)).unwrap();
            let frame: Vec<u8> = event
                .payloads()
                .iter()
                .flat_map(|p| p.data.iter().copied())
                .collect();
            assert!(!frame.is_empty());
            let slot = region.slot(event.buffer_slot().unwrap()).unwrap();
            assert_eq!(&slot[..frame.len()], frame.as_slice());
            drop(slot);
            camera.release_event(event).unwrap();
        }
        camera.end_acquisition().unwrap();
        camera.detach_buffers().unwrap();
        drop(region);
        pool.release().unwrap();
    }
}

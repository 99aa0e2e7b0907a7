//! End-to-end runs of the orchestrator against simulated cameras.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use stereo_core::{
    sfnc, Access, BufferOwnership, CancellationFlag, ComponentKind, Device, DeviceFault,
    DeviceInfo, DeviceSystem, Nodemap, StreamTransmitConfig,
};
use stereo_daq::config::{AppConfig, EligibilityRule};
use stereo_daq::orchestrator::{run_acquisition, AcquisitionContext, Backends};
use stereo_daq::outcome::ConfigStage;
use stereo_daq::{AppError, DeviceRunResult, WorkerFault, WorkerState};
use stereo_driver_mock::{
    ErrorConfig, ErrorScenario, MockDecompressor, MockDeviceSystem, MockStereoCamera,
    MockStereoService,
};
use tempfile::TempDir;

fn camera(serial: &str) -> MockStereoCamera {
    MockStereoCamera::builder()
        .serial(serial)
        .resolution(32, 24)
        .build()
}

fn config(output: &Path) -> AppConfig {
    let mut config = AppConfig::default();
    config.acquisition.event_timeout = Duration::from_millis(50);
    config.storage.output_dir = output.to_path_buf();
    config
}

fn backends(system: Arc<dyn DeviceSystem>) -> (Backends, Arc<MockStereoService>) {
    let stereo = Arc::new(MockStereoService::new());
    (
        Backends {
            system,
            stereo: stereo.clone(),
            decompressor: None,
        },
        stereo,
    )
}

#[tokio::test]
async fn two_devices_capture_concurrently() {
    let out = TempDir::new().unwrap();
    let mut config = config(out.path());
    config.acquisition.components = StreamTransmitConfig::all();

    let system = Arc::new(MockDeviceSystem::new(vec![
        camera("30000001"),
        camera("30000002"),
    ]));
    let (backends, stereo) = backends(system.clone());

    let report = run_acquisition(&config, backends, CancellationFlag::new())
        .await
        .unwrap();

    assert!(report.all_succeeded());
    assert_eq!(report.outcomes.len(), 2);
    let mut released = 0;
    for outcome in &report.outcomes {
        let worker = outcome.outcome.as_ref().unwrap();
        assert_eq!(worker.final_state, WorkerState::Closed);
        assert_eq!(worker.final_ownership, BufferOwnership::System);
        assert_eq!(worker.conditioning.applied, 3);
        released += worker.events_released;

        let stats = system.stats(&outcome.device.serial_number).unwrap();
        assert_eq!(stats.released(), 3);
        assert!(!stats.lifecycle().initialized);
    }
    assert_eq!(released, 6);
    assert_eq!(stereo.speckle_calls(), 6);
}

#[tokio::test]
async fn outcomes_keep_enumeration_order() {
    let out = TempDir::new().unwrap();
    let system = Arc::new(MockDeviceSystem::new(vec![
        camera("30000003"),
        camera("30000001"),
        camera("30000002"),
    ]));
    let (backends, _) = backends(system);

    let report = run_acquisition(&config(out.path()), backends, CancellationFlag::new())
        .await
        .unwrap();

    let serials: Vec<_> = report
        .outcomes
        .iter()
        .map(|o| o.device.serial_number.as_str())
        .collect();
    assert_eq!(serials, ["30000003", "30000001", "30000002"]);
}

#[tokio::test]
async fn mono_device_is_skipped_while_stereo_device_captures() {
    let out = TempDir::new().unwrap();
    let mono = MockStereoCamera::builder()
        .serial("30000010")
        .model("Simulated Mono Camera")
        .stereo(false)
        .build();
    let system = Arc::new(MockDeviceSystem::new(vec![mono, camera("30000011")]));
    let (backends, _) = backends(system.clone());

    let report = run_acquisition(&config(out.path()), backends, CancellationFlag::new())
        .await
        .unwrap();

    assert!(!report.all_succeeded());
    let mono = report.outcomes[0].outcome.as_ref().unwrap();
    assert!(matches!(mono.result, DeviceRunResult::DeviceNotEligible { .. }));
    assert_eq!(
        mono.states,
        [
            WorkerState::Idle,
            WorkerState::Opened,
            WorkerState::Stopped,
            WorkerState::Closed
        ]
    );
    assert_eq!(system.stats("30000010").unwrap().delivered(), 0);

    let stereo = report.outcomes[1].outcome.as_ref().unwrap();
    assert_eq!(stereo.result, DeviceRunResult::Success);
    assert_eq!(stereo.usable, 3);
    assert_eq!(report.summary.succeeded, 1);
    assert_eq!(report.summary.failed, 1);
}

#[tokio::test]
async fn any_rule_admits_mono_device() {
    let out = TempDir::new().unwrap();
    let mut config = config(out.path());
    config.acquisition.eligibility = EligibilityRule::Any;
    config.acquisition.components = StreamTransmitConfig::with(&[ComponentKind::RawSensor1]);
    config.acquisition.point_cloud = false;

    let mono = MockStereoCamera::builder()
        .serial("30000012")
        .stereo(false)
        .build();
    let (backends, _) = backends(Arc::new(MockDeviceSystem::new(vec![mono])));

    let report = run_acquisition(&config, backends, CancellationFlag::new())
        .await
        .unwrap();
    assert!(report.all_succeeded());
    let worker = report.outcomes[0].outcome.as_ref().unwrap();
    assert_eq!(worker.conditioning.applied, 0);
    assert_eq!(worker.conditioning.skipped, 3);
}

#[tokio::test]
async fn single_timeout_does_not_fail_the_device() {
    let out = TempDir::new().unwrap();
    let mut config = config(out.path());
    config.acquisition.frames = 5;

    let flaky = MockStereoCamera::builder()
        .serial("30000020")
        .error_config(ErrorConfig::scenario(ErrorScenario::TimeoutAt {
            iteration: 1,
        }))
        .build();
    let system = Arc::new(MockDeviceSystem::new(vec![flaky]));
    let (backends, _) = backends(system.clone());

    let report = run_acquisition(&config, backends, CancellationFlag::new())
        .await
        .unwrap();

    assert!(report.all_succeeded());
    let worker = report.outcomes[0].outcome.as_ref().unwrap();
    assert_eq!(worker.timeouts, 1);
    assert_eq!(worker.events_released, 4);
    assert_eq!(system.stats("30000020").unwrap().released(), 4);
}

#[tokio::test]
async fn configuration_failure_leaves_device_closed() {
    let out = TempDir::new().unwrap();
    let locked = MockStereoCamera::builder()
        .serial("30000030")
        .configure_nodemap(Nodemap::Device, |dir| {
            dir.set_access(sfnc::ACQUISITION_MODE, Access::READ_ONLY);
        })
        .build();
    let system = Arc::new(MockDeviceSystem::new(vec![locked, camera("30000031")]));
    let (backends, _) = backends(system.clone());

    let report = run_acquisition(&config(out.path()), backends, CancellationFlag::new())
        .await
        .unwrap();

    let failed = report.outcomes[0].outcome.as_ref().unwrap();
    assert!(matches!(
        failed.result,
        DeviceRunResult::ConfigurationFailed {
            stage: ConfigStage::AcquisitionMode,
            ..
        }
    ));
    assert_eq!(failed.final_state, WorkerState::Closed);
    assert_eq!(failed.final_ownership, BufferOwnership::System);
    let lifecycle = system.stats("30000030").unwrap().lifecycle();
    assert_eq!(lifecycle.ownership, BufferOwnership::System);
    assert!(!lifecycle.holds_region);

    assert!(report.outcomes[1].is_success());
}

#[tokio::test]
async fn artifacts_and_summary_are_written() {
    let out = TempDir::new().unwrap();
    let mut config = config(out.path());
    config.acquisition.frames = 2;
    let (backends, _) = backends(Arc::new(MockDeviceSystem::new(vec![camera("30000040")])));

    let report = run_acquisition(&config, backends, CancellationFlag::new())
        .await
        .unwrap();
    assert!(report.all_succeeded());

    for counter in 0..2 {
        for (label, ext) in [("RectSensor1", "png"), ("Disparity", "pgm")] {
            let name = format!("StereoAcquisition_30000040_{label}_{counter}.{ext}");
            let path = out.path().join(&name);
            assert!(path.is_file(), "{name} missing");
            image::open(&path).unwrap_or_else(|err| panic!("{name} unreadable: {err}"));
        }
        let cloud = format!("StereoAcquisition_30000040_PointCloud_{counter}.ply");
        assert!(out.path().join(&cloud).is_file(), "{cloud} missing");
    }
    let worker = report.outcomes[0].outcome.as_ref().unwrap();
    assert_eq!(worker.artifacts.len(), 6);
    assert_eq!(worker.point_clouds, 2);

    let path = report.summary_path.clone().unwrap();
    let summary: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
    assert_eq!(summary["frames"], 2);
    assert_eq!(summary["succeeded"], 1);
    assert_eq!(summary["devices"][0]["device"]["serial_number"], "30000040");
    assert_eq!(summary["devices"][0]["report"]["result"]["status"], "success");
}

#[tokio::test]
async fn images_can_be_disabled() {
    let out = TempDir::new().unwrap();
    let mut config = config(out.path());
    config.storage.save_images = false;
    config.storage.write_summary = false;
    let (backends, _) = backends(Arc::new(MockDeviceSystem::new(vec![camera("30000041")])));

    let report = run_acquisition(&config, backends, CancellationFlag::new())
        .await
        .unwrap();
    assert!(report.all_succeeded());
    assert!(report.summary_path.is_none());
    assert_eq!(std::fs::read_dir(out.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn unwritable_output_stops_before_enumeration() {
    let out = TempDir::new().unwrap();
    let blocker = out.path().join("not_a_dir");
    std::fs::write(&blocker, b"x").unwrap();
    let config = config(&blocker.join("captures"));

    let system = Arc::new(MockDeviceSystem::new(vec![camera("30000050")]));
    let (backends, _) = backends(system.clone());

    let err = run_acquisition(&config, backends, CancellationFlag::new())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::OutputNotWritable { .. }));
    assert_eq!(system.stats("30000050").unwrap().init_calls.load(std::sync::atomic::Ordering::SeqCst), 0);
}

#[tokio::test]
async fn no_devices_is_a_process_error() {
    let out = TempDir::new().unwrap();
    let (backends, _) = backends(Arc::new(MockDeviceSystem::new(Vec::new())));

    let err = run_acquisition(&config(out.path()), backends, CancellationFlag::new())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NoDevices));
}

#[tokio::test]
async fn invalid_configuration_is_rejected() {
    let out = TempDir::new().unwrap();
    let mut config = config(out.path());
    config.acquisition.components = StreamTransmitConfig::with(&[ComponentKind::RawSensor1]);
    let (backends, _) = backends(Arc::new(MockDeviceSystem::new(vec![camera("30000060")])));

    let err = run_acquisition(&config, backends, CancellationFlag::new())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Configuration(_)));
}

#[tokio::test]
async fn cancelled_run_reports_capture_failure() {
    let out = TempDir::new().unwrap();
    let cancel = CancellationFlag::new();
    cancel.cancel();
    let (backends, _) = backends(Arc::new(MockDeviceSystem::new(vec![camera("30000070")])));

    let report = run_acquisition(&config(out.path()), backends, cancel)
        .await
        .unwrap();
    let worker = report.outcomes[0].outcome.as_ref().unwrap();
    assert!(matches!(worker.result, DeviceRunResult::CaptureFailed { .. }));
    assert!(worker.cancelled);
    assert_eq!(worker.final_state, WorkerState::Closed);
}

/// Delegates to a mock system but panics while opening one device.
struct PanickingOpen {
    inner: MockDeviceSystem,
    serial: &'static str,
}

impl DeviceSystem for PanickingOpen {
    fn library_version(&self) -> String {
        self.inner.library_version()
    }

    fn enumerate(&self) -> Result<Vec<DeviceInfo>, DeviceFault> {
        self.inner.enumerate()
    }

    fn open(&self, info: &DeviceInfo) -> Result<Box<dyn Device>, DeviceFault> {
        if info.serial_number == self.serial {
            panic!("driver crashed opening {}", info.serial_number);
        }
        self.inner.open(info)
    }
}

#[tokio::test]
async fn panicking_worker_is_isolated() {
    let out = TempDir::new().unwrap();
    let system = Arc::new(PanickingOpen {
        inner: MockDeviceSystem::new(vec![camera("30000080"), camera("30000081")]),
        serial: "30000080",
    });
    let (backends, _) = backends(system);

    let report = run_acquisition(&config(out.path()), backends, CancellationFlag::new())
        .await
        .unwrap();

    match &report.outcomes[0].outcome {
        Err(WorkerFault::Panicked { serial, message }) => {
            assert_eq!(serial, "30000080");
            assert!(message.contains("driver crashed"));
        }
        other => panic!("expected a panic fault, got {other:?}"),
    }
    assert_eq!(report.outcomes[0].device.serial_number, "30000080");
    assert!(report.outcomes[1].is_success());
    assert!(!report.all_succeeded());
}

#[tokio::test]
async fn context_reports_enumerated_devices() {
    let system = Arc::new(MockDeviceSystem::new(vec![camera("30000090")]));
    let context = AcquisitionContext::init(system).unwrap();
    assert_eq!(context.devices().len(), 1);
    assert!(context.library_version().starts_with("mock"));
    context.shutdown();
}

#[tokio::test]
async fn decode_failures_reach_the_summary() {
    let out = TempDir::new().unwrap();
    let mut config = config(out.path());
    config.acquisition.frames = 2;
    config.decompression.enabled = true;
    let camera = MockStereoCamera::builder()
        .serial("30000050")
        .resolution(32, 24)
        .error_config(ErrorConfig::scenario(ErrorScenario::CorruptAt {
            iteration: 0,
            component: ComponentKind::RectifiedSensor1,
        }))
        .build();
    let (mut backends, _) = backends(Arc::new(MockDeviceSystem::new(vec![camera])));
    backends.decompressor = Some(Arc::new(MockDecompressor::new()));

    let report = run_acquisition(&config, backends, CancellationFlag::new())
        .await
        .unwrap();
    assert!(report.all_succeeded());
    let worker = report.outcomes[0].outcome.as_ref().unwrap();
    assert_eq!(worker.decode_failures, 1);
    assert!(!out.path().join("StereoAcquisition_30000050_RectSensor1_0.png").exists());
    assert!(out.path().join("StereoAcquisition_30000050_RectSensor1_1.png").is_file());

    let summary: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(report.summary_path.clone().unwrap()).unwrap(),
    )
    .unwrap();
    assert_eq!(summary["devices"][0]["report"]["decode_failures"], 1);
}

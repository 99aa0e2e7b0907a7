//! Per-event processing of usable capture events.
//!
//! A usable event passes through, in order: decompression of compressed
//! planes, conditioning of the disparity plane, point cloud reconstruction and
//! persistence. Failures of the external services are counted and logged per
//! event; only a failed save is returned to the caller.

use crate::conditioning::{Conditioning, ConditioningOutcome};
use crate::decompression::DecompressionStage;
use crate::outcome::{ConditioningTally, DecompressionTally};
use crate::persistence::{ArtifactWriter, PersistError};
use std::path::PathBuf;
use std::sync::Arc;
use stereo_core::{
    CaptureEvent, ComponentKind, ComponentPayload, DisparityMap, PointCloud, StereoCalibration,
    StereoService, StreamTransmitConfig,
};
use tracing::{debug, info, warn};

/// What one usable event turned into.
#[derive(Debug, Default)]
pub struct ProcessedEvent {
    /// Enabled planes, decompressed and conditioned.
    pub planes: Vec<ComponentPayload>,
    /// Absent when there was no disparity plane.
    pub conditioning: Option<ConditioningOutcome>,
    /// Present when reconstruction was requested and succeeded.
    pub point_cloud: Option<PointCloud>,
    /// Files written for this event.
    pub artifacts: Vec<PathBuf>,
}

/// Per-worker processing of usable events, with running tallies.
pub struct EventPipeline {
    serial: String,
    enabled: StreamTransmitConfig,
    calibration: StereoCalibration,
    conditioning: Conditioning,
    point_cloud: bool,
    stereo: Arc<dyn StereoService>,
    decompression: Option<DecompressionStage>,
    writer: Option<ArtifactWriter>,
    tally: ConditioningTally,
    point_clouds: u64,
    decode_failures: u64,
}

impl EventPipeline {
    /// A pipeline with no decompression, no point clouds and no writer.
    pub fn new(
        serial: impl Into<String>,
        enabled: StreamTransmitConfig,
        calibration: Option<StereoCalibration>,
        conditioning: Conditioning,
        stereo: Arc<dyn StereoService>,
    ) -> Self {
        Self {
            serial: serial.into(),
            enabled,
            calibration: calibration.unwrap_or_default(),
            conditioning,
            point_cloud: false,
            stereo,
            decompression: None,
            writer: None,
            tally: ConditioningTally::default(),
            point_clouds: 0,
            decode_failures: 0,
        }
    }

    /// Reconstruct a point cloud for every event that carries disparity and
    /// the rectified sensor 1 plane.
    #[must_use]
    pub fn with_point_cloud(mut self, enabled: bool) -> Self {
        self.point_cloud = enabled;
        self
    }

    /// Decode compressed planes before anything else.
    #[must_use]
    pub fn with_decompression(mut self, stage: Option<DecompressionStage>) -> Self {
        self.decompression = stage;
        self
    }

    /// Save planes and point clouds of every processed event.
    #[must_use]
    pub fn with_writer(mut self, writer: Option<ArtifactWriter>) -> Self {
        self.writer = writer;
        self
    }

    /// Speckle filter decisions so far.
    #[must_use]
    pub fn conditioning_tally(&self) -> &ConditioningTally {
        &self.tally
    }

    /// Decode statistics, when decompression is enabled.
    #[must_use]
    pub fn decompression_tally(&self) -> Option<DecompressionTally> {
        self.decompression.as_ref().map(DecompressionStage::tally)
    }

    /// Point clouds computed so far.
    #[must_use]
    pub fn point_clouds(&self) -> u64 {
        self.point_clouds
    }

    /// Planes dropped because they could not be decompressed.
    #[must_use]
    pub fn decode_failures(&self) -> u64 {
        self.decode_failures
    }

    /// Process one validated event. `counter` numbers its artifacts.
    pub fn process(
        &mut self,
        event: &CaptureEvent,
        counter: u64,
    ) -> Result<ProcessedEvent, PersistError> {
        let mut processed = ProcessedEvent {
            planes: self.collect_planes(event),
            ..ProcessedEvent::default()
        };

        let disparity = self.condition(&mut processed);

        if self.point_cloud {
            processed.point_cloud = self.reconstruct(disparity.as_ref(), &processed.planes, event);
        }

        if let Some(writer) = &self.writer {
            for plane in &processed.planes {
                processed
                    .artifacts
                    .push(writer.write_plane(&self.serial, counter, plane)?);
            }
            if let Some(cloud) = &processed.point_cloud {
                processed
                    .artifacts
                    .push(writer.write_point_cloud(&self.serial, counter, cloud)?);
            }
        }
        Ok(processed)
    }

    fn collect_planes(&mut self, event: &CaptureEvent) -> Vec<ComponentPayload> {
        let mut planes = Vec::new();
        for kind in self.enabled.enabled() {
            let Some(payload) = event.component(kind) else {
                continue;
            };
            if !payload.compressed {
                planes.push(payload.clone());
                continue;
            }
            match self.decompression.as_mut().map(|stage| stage.decompress(payload)) {
                Some(Ok(plane)) => planes.push(plane),
                Some(Err(err)) => {
                    self.decode_failures += 1;
                    warn!(frame = event.frame_id(), component = %kind, error = %err, "plane dropped");
                }
                None => {
                    self.decode_failures += 1;
                    warn!(
                        frame = event.frame_id(),
                        component = %kind,
                        "compressed plane received without a decompression stage"
                    );
                }
            }
        }
        planes
    }

    /// Condition the disparity plane in place; returns the conditioned map.
    fn condition(&mut self, processed: &mut ProcessedEvent) -> Option<DisparityMap> {
        if let Some(reason) = self.conditioning.skip_reason(&self.enabled) {
            self.record(ConditioningOutcome::Skipped(reason));
            processed.conditioning = Some(ConditioningOutcome::Skipped(reason));
            return processed
                .planes
                .iter()
                .find(|p| p.kind == ComponentKind::DisparitySensor1)
                .and_then(|p| DisparityMap::from_payload(p).ok());
        }

        let slot = processed
            .planes
            .iter()
            .position(|p| p.kind == ComponentKind::DisparitySensor1)?;
        let mut map = match DisparityMap::from_payload(&processed.planes[slot]) {
            Ok(map) => map,
            Err(err) => {
                self.tally.failed += 1;
                warn!(error = %err, "disparity plane cannot be conditioned");
                return None;
            }
        };

        match self.conditioning.condition(
            self.stereo.as_ref(),
            &mut map,
            &self.enabled,
            &self.calibration,
        ) {
            Ok(outcome) => {
                self.record(outcome);
                processed.conditioning = Some(outcome);
                processed.planes[slot] = map.to_payload();
                Some(map)
            }
            Err(err) => {
                self.tally.failed += 1;
                warn!(error = %err, "speckle filter failed, plane left unfiltered");
                DisparityMap::from_payload(&processed.planes[slot]).ok()
            }
        }
    }

    fn record(&mut self, outcome: ConditioningOutcome) {
        match outcome {
            ConditioningOutcome::Applied(stats) => {
                self.tally.applied += 1;
                self.tally.regions_removed += stats.regions_removed as u64;
                self.tally.pixels_invalidated += stats.pixels_invalidated as u64;
                debug!(
                    regions = stats.regions_removed,
                    pixels = stats.pixels_invalidated,
                    "speckle filter applied"
                );
            }
            ConditioningOutcome::Skipped(reason) => {
                if self.tally.skipped == 0 {
                    info!(%reason, "disparity conditioning skipped");
                }
                self.tally.skipped += 1;
                self.tally.last_skip_reason = Some(reason.to_string());
            }
        }
    }

    fn reconstruct(
        &mut self,
        disparity: Option<&DisparityMap>,
        planes: &[ComponentPayload],
        event: &CaptureEvent,
    ) -> Option<PointCloud> {
        let disparity = disparity?;
        let reference = planes
            .iter()
            .find(|p| p.kind == ComponentKind::RectifiedSensor1)?;
        match self
            .stereo
            .compute_point_cloud(disparity, reference, &self.calibration)
        {
            Ok(cloud) => {
                self.point_clouds += 1;
                debug!(frame = event.frame_id(), points = cloud.len(), "point cloud computed");
                Some(cloud)
            }
            Err(err) => {
                warn!(frame = event.frame_id(), error = %err, "point cloud reconstruction failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stereo_core::PixelFormat;
    use stereo_driver_mock::{disparity_plane, rle_encode, sensor_plane, MockDecompressor, MockStereoService};
    use stereo_pool::HostAllocator;

    const W: u32 = 16;
    const H: u32 = 8;

    fn event(compressed: bool) -> CaptureEvent {
        let plane = sensor_plane(W, H, 0, 1);
        let mut rect = if compressed {
            ComponentPayload::complete(
                ComponentKind::RectifiedSensor1,
                W,
                H,
                PixelFormat::Mono8,
                rle_encode(&plane),
            )
        } else {
            ComponentPayload::complete(ComponentKind::RectifiedSensor1, W, H, PixelFormat::Mono8, plane)
        };
        rect.compressed = compressed;
        let disparity: Vec<u8> = disparity_plane(W, H, 0)
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect();
        CaptureEvent::new(
            0,
            vec![
                rect,
                ComponentPayload::complete(
                    ComponentKind::DisparitySensor1,
                    W,
                    H,
                    PixelFormat::Coord3dC16,
                    disparity,
                ),
            ],
        )
    }

    fn enabled() -> StreamTransmitConfig {
        StreamTransmitConfig::with(&[ComponentKind::RectifiedSensor1, ComponentKind::DisparitySensor1])
    }

    fn conditioning(post_process: bool) -> Conditioning {
        Conditioning {
            post_process,
            max_region_size: 40,
            threshold: 4.0,
        }
    }

    #[test]
    fn usable_event_is_conditioned_reconstructed_and_saved() {
        let dir = tempfile::tempdir().unwrap();
        let service = Arc::new(MockStereoService::new());
        let mut pipeline = EventPipeline::new(
            "42",
            enabled(),
            Some(StereoCalibration::default()),
            conditioning(true),
            service.clone(),
        )
        .with_point_cloud(true)
        .with_writer(Some(ArtifactWriter::new(dir.path(), "Test")));

        let processed = pipeline.process(&event(false), 3).unwrap();
        assert!(matches!(
            processed.conditioning,
            Some(ConditioningOutcome::Applied(_))
        ));
        assert!(processed.point_cloud.is_some());
        assert_eq!(processed.artifacts.len(), 3);
        assert!(dir.path().join("Test_42_RectSensor1_3.png").is_file());
        assert!(dir.path().join("Test_42_Disparity_3.pgm").is_file());
        assert!(dir.path().join("Test_42_PointCloud_3.ply").is_file());
        assert_eq!(service.speckle_calls(), 1);
        assert_eq!(service.point_cloud_calls(), 1);
        assert_eq!(pipeline.conditioning_tally().applied, 1);
    }

    #[test]
    fn disabled_post_processing_counts_skips() {
        let service = Arc::new(MockStereoService::new());
        let mut pipeline = EventPipeline::new("42", enabled(), None, conditioning(false), service.clone());
        for counter in 0..3 {
            pipeline.process(&event(false), counter).unwrap();
        }
        let tally = pipeline.conditioning_tally();
        assert_eq!(tally.skipped, 3);
        assert_eq!(tally.applied, 0);
        assert_eq!(
            tally.last_skip_reason.as_deref(),
            Some("disparity post-processing is disabled")
        );
        assert_eq!(service.speckle_calls(), 0);
    }

    #[test]
    fn compressed_planes_are_decoded_before_saving() {
        let dir = tempfile::tempdir().unwrap();
        let stage = DecompressionStage::new(
            Arc::new(MockDecompressor::new()),
            &HostAllocator::unpinned(),
            W,
            H,
            PixelFormat::Mono8,
        )
        .unwrap();
        let mut pipeline = EventPipeline::new(
            "42",
            enabled(),
            None,
            conditioning(true),
            Arc::new(MockStereoService::new()),
        )
        .with_decompression(Some(stage))
        .with_writer(Some(ArtifactWriter::new(dir.path(), "Test")));

        let processed = pipeline.process(&event(true), 0).unwrap();
        let rect = &processed.planes[0];
        assert!(!rect.compressed);
        assert_eq!(rect.data.as_ref(), sensor_plane(W, H, 0, 1).as_slice());
        assert_eq!(pipeline.decompression_tally().map(|t| t.calls), Some(1));
    }

    #[test]
    fn compressed_plane_without_stage_is_dropped() {
        let mut pipeline = EventPipeline::new(
            "42",
            enabled(),
            None,
            conditioning(true),
            Arc::new(MockStereoService::new()),
        );
        let processed = pipeline.process(&event(true), 0).unwrap();
        assert_eq!(processed.planes.len(), 1);
        assert_eq!(pipeline.decode_failures(), 1);
    }

    #[test]
    fn unwritable_output_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut pipeline = EventPipeline::new(
            "42",
            enabled(),
            None,
            conditioning(true),
            Arc::new(MockStereoService::new()),
        )
        .with_writer(Some(ArtifactWriter::new(dir.path().join("missing"), "Test")));
        assert!(pipeline.process(&event(false), 0).is_err());
    }
}

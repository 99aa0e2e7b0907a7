//! Artifact files written for usable capture events.
//!
//! File names are deterministic:
//! `{prefix}_{serial}_{Component}_{counter}.{ext}`, e.g.
//! `StereoAcquisition_21010001_Disparity_2.pgm`.
//!
//! Raw and rectified planes are written as PNG, the 16-bit disparity plane as
//! binary PGM so external tools read the raw sub-pixel values. Point clouds are
//! ASCII PLY.

use image::codecs::png::PngEncoder;
use image::codecs::pnm::{PnmEncoder, PnmSubtype, SampleEncoding};
use image::{GrayImage, ImageBuffer, Luma, RgbImage};
use serde::Serialize;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use stereo_core::{ComponentPayload, PixelFormat, PointCloud};
use thiserror::Error;
use tracing::debug;

/// Name of the end-of-run summary file.
pub const SUMMARY_FILE: &str = "run_summary.json";

const WRITE_CHECK_FILE: &str = ".stereo_daq_write_check";

type Gray16Image = ImageBuffer<Luma<u16>, Vec<u16>>;

/// A file that could not be written.
#[derive(Error, Debug)]
pub enum PersistError {
    #[error("failed to write {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{component} payload is still compressed")]
    Compressed { component: String },

    #[error("{component} holds {actual} bytes, a {width}x{height} {format} plane needs {expected}")]
    Geometry {
        component: String,
        width: u32,
        height: u32,
        format: PixelFormat,
        expected: usize,
        actual: usize,
    },

    #[error("failed to encode image {}: {source}", path.display())]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("failed to encode {}: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Check that `dir` exists (creating it if needed) and accepts new files.
pub fn ensure_writable(dir: &Path) -> io::Result<()> {
    fs::create_dir_all(dir)?;
    let check = dir.join(WRITE_CHECK_FILE);
    File::create(&check)?.write_all(b"ok")?;
    fs::remove_file(&check)
}

/// Deterministic artifact file name.
#[must_use]
pub fn artifact_name(prefix: &str, serial: &str, label: &str, counter: u64, ext: &str) -> String {
    format!("{prefix}_{serial}_{label}_{counter}.{ext}")
}

/// Writes artifacts of one run into one directory.
#[derive(Debug, Clone)]
pub struct ArtifactWriter {
    dir: PathBuf,
    prefix: String,
}

impl ArtifactWriter {
    /// Writer for `dir`, naming every file with `prefix`.
    pub fn new(dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            prefix: prefix.into(),
        }
    }

    /// Directory every file is written to.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Save one image plane; returns the written path.
    pub fn write_plane(
        &self,
        serial: &str,
        counter: u64,
        payload: &ComponentPayload,
    ) -> Result<PathBuf, PersistError> {
        if payload.compressed {
            return Err(PersistError::Compressed {
                component: payload.kind.to_string(),
            });
        }
        let geometry = || PersistError::Geometry {
            component: payload.kind.to_string(),
            width: payload.width,
            height: payload.height,
            format: payload.pixel_format,
            expected: payload.decoded_len(),
            actual: payload.data.len(),
        };
        if payload.data.len() != payload.decoded_len() {
            return Err(geometry());
        }

        let ext = match payload.pixel_format {
            PixelFormat::Coord3dC16 => "pgm",
            _ => "png",
        };
        let path = self.path_for(serial, payload.kind.label(), counter, ext);
        let io_err = |source| PersistError::Io {
            path: path.clone(),
            source,
        };
        let mut out = BufWriter::new(File::create(&path).map_err(io_err)?);
        let (width, height) = (payload.width, payload.height);

        let encoded = match payload.pixel_format {
            PixelFormat::Mono8 | PixelFormat::BayerRG8 => {
                let img: GrayImage = ImageBuffer::from_raw(width, height, payload.data.to_vec())
                    .ok_or_else(geometry)?;
                img.write_with_encoder(PngEncoder::new(&mut out))
            }
            PixelFormat::Rgb8 => {
                let img: RgbImage = ImageBuffer::from_raw(width, height, payload.data.to_vec())
                    .ok_or_else(geometry)?;
                img.write_with_encoder(PngEncoder::new(&mut out))
            }
            PixelFormat::Mono16 => {
                let img = gray16(payload).ok_or_else(geometry)?;
                img.write_with_encoder(PngEncoder::new(&mut out))
            }
            PixelFormat::Coord3dC16 => {
                let img = gray16(payload).ok_or_else(geometry)?;
                let encoder = PnmEncoder::new(&mut out)
                    .with_subtype(PnmSubtype::Graymap(SampleEncoding::Binary));
                img.write_with_encoder(encoder)
            }
        };
        encoded.map_err(|source| PersistError::Image {
            path: path.clone(),
            source,
        })?;
        out.flush().map_err(io_err)?;

        debug!(path = %path.display(), "image plane saved");
        Ok(path)
    }

    /// Save a point cloud as ASCII PLY; returns the written path.
    pub fn write_point_cloud(
        &self,
        serial: &str,
        counter: u64,
        cloud: &PointCloud,
    ) -> Result<PathBuf, PersistError> {
        let path = self.path_for(serial, "PointCloud", counter, "ply");
        self.write_with(&path, |out| {
            writeln!(out, "ply")?;
            writeln!(out, "format ascii 1.0")?;
            writeln!(out, "element vertex {}", cloud.len())?;
            writeln!(out, "property float x")?;
            writeln!(out, "property float y")?;
            writeln!(out, "property float z")?;
            writeln!(out, "property uchar intensity")?;
            writeln!(out, "end_header")?;
            for p in &cloud.points {
                writeln!(out, "{} {} {} {}", p.x, p.y, p.z, p.intensity)?;
            }
            Ok(())
        })?;
        debug!(path = %path.display(), points = cloud.len(), "point cloud saved");
        Ok(path)
    }

    /// Write `summary` as pretty JSON to [`SUMMARY_FILE`].
    pub fn write_summary<T: Serialize>(&self, summary: &T) -> Result<PathBuf, PersistError> {
        let path = self.dir.join(SUMMARY_FILE);
        let file = File::create(&path).map_err(|source| PersistError::Io {
            path: path.clone(),
            source,
        })?;
        let mut out = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut out, summary).map_err(|source| PersistError::Json {
            path: path.clone(),
            source,
        })?;
        out.flush().map_err(|source| PersistError::Io {
            path: path.clone(),
            source,
        })?;
        Ok(path)
    }

    fn path_for(&self, serial: &str, label: &str, counter: u64, ext: &str) -> PathBuf {
        self.dir
            .join(artifact_name(&self.prefix, serial, label, counter, ext))
    }

    fn write_with(
        &self,
        path: &Path,
        body: impl FnOnce(&mut BufWriter<File>) -> io::Result<()>,
    ) -> Result<(), PersistError> {
        let io_err = |source| PersistError::Io {
            path: path.to_path_buf(),
            source,
        };
        let mut out = BufWriter::new(File::create(path).map_err(io_err)?);
        body(&mut out).map_err(io_err)?;
        out.flush().map_err(io_err)
    }
}

/// 16-bit samples arrive little-endian on the wire.
fn gray16(payload: &ComponentPayload) -> Option<Gray16Image> {
    let samples = payload
        .data
        .chunks_exact(2)
        .map(|chunk| u16::from_le_bytes([chunk[0], chunk[1]]))
        .collect();
    ImageBuffer::from_raw(payload.width, payload.height, samples)
}

#[cfg(test)]
mod tests {
    use super::*;
    use stereo_core::{CloudPoint, ComponentKind};

    #[test]
    fn names_are_deterministic() {
        assert_eq!(
            artifact_name("StereoAcquisition", "21010001", "Disparity", 2, "pgm"),
            "StereoAcquisition_21010001_Disparity_2.pgm"
        );
    }

    #[test]
    fn writability_check_creates_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a/b");
        ensure_writable(&nested).unwrap();
        assert!(nested.is_dir());
        assert_eq!(fs::read_dir(&nested).unwrap().count(), 0);
    }

    #[test]
    fn image_planes_are_png() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ArtifactWriter::new(dir.path(), "Test");
        let payload = ComponentPayload::complete(
            ComponentKind::RectifiedSensor1,
            3,
            2,
            PixelFormat::Mono8,
            vec![1u8, 2, 3, 4, 5, 6],
        );
        let path = writer.write_plane("42", 0, &payload).unwrap();
        assert_eq!(path.file_name().unwrap(), "Test_42_RectSensor1_0.png");

        let decoded = image::open(&path).unwrap().to_luma8();
        assert_eq!(decoded.dimensions(), (3, 2));
        assert_eq!(decoded.as_raw(), &[1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn raw_bayer_and_rgb_planes_are_png() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ArtifactWriter::new(dir.path(), "Test");

        let bayer = ComponentPayload::complete(
            ComponentKind::RawSensor2,
            2,
            2,
            PixelFormat::BayerRG8,
            vec![10u8, 20, 30, 40],
        );
        let path = writer.write_plane("42", 3, &bayer).unwrap();
        assert_eq!(path.file_name().unwrap(), "Test_42_RawSensor2_3.png");
        assert_eq!(image::open(&path).unwrap().to_luma8().as_raw(), &[10, 20, 30, 40]);

        let rgb = ComponentPayload::complete(
            ComponentKind::RawSensor1,
            1,
            2,
            PixelFormat::Rgb8,
            vec![1u8, 2, 3, 4, 5, 6],
        );
        let path = writer.write_plane("42", 3, &rgb).unwrap();
        assert_eq!(path.file_name().unwrap(), "Test_42_RawSensor1_3.png");
        let decoded = image::open(&path).unwrap().to_rgb8();
        assert_eq!(decoded.dimensions(), (1, 2));
        assert_eq!(decoded.as_raw(), &[1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn disparity_plane_is_16_bit_pgm() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ArtifactWriter::new(dir.path(), "Test");
        let payload = ComponentPayload::complete(
            ComponentKind::DisparitySensor1,
            2,
            1,
            PixelFormat::Coord3dC16,
            [0x0102u16, 0x0a0b]
                .iter()
                .flat_map(|v| v.to_le_bytes())
                .collect::<Vec<u8>>(),
        );
        let path = writer.write_plane("42", 5, &payload).unwrap();
        assert_eq!(path.file_name().unwrap(), "Test_42_Disparity_5.pgm");

        let bytes = fs::read(&path).unwrap();
        assert!(bytes.starts_with(b"P5"));
        let decoded = image::open(&path).unwrap().to_luma16();
        assert_eq!(decoded.dimensions(), (2, 1));
        assert_eq!(decoded.as_raw(), &[0x0102, 0x0a0b]);
    }

    #[test]
    fn truncated_plane_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ArtifactWriter::new(dir.path(), "Test");
        let payload = ComponentPayload::complete(
            ComponentKind::RawSensor1,
            4,
            4,
            PixelFormat::Mono8,
            vec![0u8; 10],
        );
        assert!(matches!(
            writer.write_plane("42", 0, &payload),
            Err(PersistError::Geometry { expected: 16, actual: 10, .. })
        ));
    }

    #[test]
    fn point_cloud_is_ascii_ply() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ArtifactWriter::new(dir.path(), "Test");
        let cloud = PointCloud {
            points: vec![
                CloudPoint {
                    x: -1.0,
                    y: 0.5,
                    z: 20.0,
                    intensity: 7,
                },
                CloudPoint {
                    x: 0.0,
                    y: 0.0,
                    z: 1.25,
                    intensity: 255,
                },
            ],
        };
        let path = writer.write_point_cloud("42", 1, &cloud).unwrap();
        assert_eq!(path.file_name().unwrap(), "Test_42_PointCloud_1.ply");
        let text = fs::read_to_string(path).unwrap();
        assert!(text.contains("element vertex 2\n"));
        assert!(text.ends_with("end_header\n-1 0.5 20 7\n0 0 1.25 255\n"));
    }

    #[test]
    fn missing_directory_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ArtifactWriter::new(dir.path().join("gone"), "Test");
        let payload =
            ComponentPayload::complete(ComponentKind::RawSensor1, 1, 1, PixelFormat::Mono8, vec![0u8]);
        assert!(matches!(
            writer.write_plane("42", 0, &payload),
            Err(PersistError::Io { .. })
        ));
    }
}

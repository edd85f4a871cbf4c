//! Incident snapshots.
//!
//! The frame that triggered an alert is saved as a JPEG so the event's
//! `image_path` points at real evidence. Pixel-less frames (detector replays)
//! get a path but no file.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};

use crate::frame::Frame;

/// `{dir}/{camera}_{YYYYmmdd_HHMMSS}_{sequence}.jpg`
pub fn snapshot_path(dir: &Path, camera_id: &str, frame: &Frame) -> PathBuf {
    let local: DateTime<Local> = frame.captured_at.into();
    dir.join(format!(
        "{}_{}_{}.jpg",
        camera_id,
        local.format("%Y%m%d_%H%M%S"),
        frame.sequence
    ))
}

pub trait SnapshotWriter: Send {
    /// Returns false when nothing was written.
    fn write(&mut self, frame: &Frame, path: &Path) -> Result<bool>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct JpegSnapshotWriter;

impl SnapshotWriter for JpegSnapshotWriter {
    fn write(&mut self, frame: &Frame, path: &Path) -> Result<bool> {
        if !frame.has_pixels() {
            return Ok(false);
        }
        let image = image::RgbImage::from_raw(frame.width, frame.height, frame.pixels().to_vec())
            .ok_or_else(|| {
                anyhow!(
                    "frame buffer does not match {}x{}",
                    frame.width,
                    frame.height
                )
            })?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        image
            .save_with_format(path, image::ImageFormat::Jpeg)
            .with_context(|| format!("failed to write snapshot {}", path.display()))?;
        Ok(true)
    }
}

/// Writer for deployments where snapshots are captured elsewhere.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoSnapshots;

impl SnapshotWriter for NoSnapshots {
    fn write(&mut self, _frame: &Frame, _path: &Path) -> Result<bool> {
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::SystemTime;

    #[test]
    fn path_carries_camera_time_and_sequence() {
        let frame = Frame::blank(4, 4, 42, SystemTime::now());
        let path = snapshot_path(Path::new("snaps"), "dock", &frame);
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("dock_"));
        assert!(name.ends_with("_42.jpg"));
        // dock_ + YYYYmmdd_HHMMSS + _42.jpg
        assert_eq!(name.len(), "dock_".len() + 15 + "_42.jpg".len());
    }

    #[test]
    fn jpeg_writer_saves_rgb_frames() {
        let dir = tempfile::tempdir().unwrap();
        let frame = Frame::new(vec![128u8; 8 * 8 * 3], 8, 8, 1, SystemTime::now()).unwrap();
        let path = dir.path().join("nested").join("shot.jpg");
        assert!(JpegSnapshotWriter.write(&frame, &path).unwrap());
        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn pixel_less_frames_are_not_written() {
        let dir = tempfile::tempdir().unwrap();
        let frame = Frame::blank(8, 8, 1, SystemTime::now());
        let path = dir.path().join("shot.jpg");
        assert!(!JpegSnapshotWriter.write(&frame, &path).unwrap());
        assert!(!path.exists());
    }
}

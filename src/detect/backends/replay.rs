//! Detection replay backend.
//!
//! Reads pre-recorded detector output, one JSON array of detections per line:
//!
//! ```text
//! [{"bbox": [700, 300, 900, 800], "label": "Person", "confidence": 0.91}]
//! []
//! ```
//!
//! Each `detect` call consumes one line. Blank lines are frames with no
//! detections. A line that is not a JSON array fails that frame; a single
//! malformed entry inside the array is logged and dropped.

use anyhow::{anyhow, Context, Result};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::Detection;
use crate::frame::Frame;

pub struct ReplayBackend {
    lines: Box<dyn Iterator<Item = std::io::Result<String>> + Send>,
    line_no: u64,
    exhausted: bool,
}

impl ReplayBackend {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("failed to open detection replay {}", path.display()))?;
        Ok(Self::from_reader(BufReader::new(file)))
    }

    pub fn from_reader<R: BufRead + Send + 'static>(reader: R) -> Self {
        Self {
            lines: Box::new(reader.lines()),
            line_no: 0,
            exhausted: false,
        }
    }

    /// Number of frames replayed so far.
    pub fn frames_replayed(&self) -> u64 {
        self.line_no
    }
}

impl DetectorBackend for ReplayBackend {
    fn name(&self) -> &'static str {
        "replay"
    }

    fn detect(&mut self, _frame: &Frame) -> Result<Vec<Detection>> {
        if self.exhausted {
            return Ok(Vec::new());
        }
        let Some(line) = self.lines.next() else {
            self.exhausted = true;
            return Ok(Vec::new());
        };
        self.line_no += 1;
        let line = line.with_context(|| format!("replay read failed at line {}", self.line_no))?;
        if line.trim().is_empty() {
            return Ok(Vec::new());
        }
        let entries: Vec<serde_json::Value> = serde_json::from_str(&line)
            .map_err(|e| anyhow!("replay line {}: invalid detections: {}", self.line_no, e))?;

        let mut detections = Vec::with_capacity(entries.len());
        for (index, entry) in entries.into_iter().enumerate() {
            match serde_json::from_value::<Detection>(entry) {
                Ok(det) => detections.push(det),
                Err(e) => log::warn!(
                    "replay line {}: detection {} dropped: {}",
                    self.line_no,
                    index,
                    e
                ),
            }
        }
        Ok(detections)
    }

    fn is_exhausted(&self) -> bool {
        self.exhausted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn frame() -> Frame {
        Frame::blank(640, 480, 0, std::time::SystemTime::now())
    }

    #[test]
    fn replays_one_line_per_frame() {
        let data = concat!(
            r#"[{"bbox": [1, 2, 30, 40], "label": "Person", "confidence": 0.9}]"#,
            "\n",
            "\n",
            r#"[{"bbox": [5, 5, 9, 9], "label": "Hardhat", "confidence": 0.7}, "#,
            r#"{"bbox": [1, 1, 2, 2], "label": "vest", "confidence": 0.4}]"#,
            "\n"
        );
        let mut backend = ReplayBackend::from_reader(Cursor::new(data));

        let first = backend.detect(&frame()).unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].label, "Person");

        assert!(backend.detect(&frame()).unwrap().is_empty());
        assert_eq!(backend.detect(&frame()).unwrap().len(), 2);
        assert!(!backend.is_exhausted());

        assert!(backend.detect(&frame()).unwrap().is_empty());
        assert!(backend.is_exhausted());
        assert_eq!(backend.frames_replayed(), 3);
    }

    #[test]
    fn malformed_line_is_an_error_for_that_frame_only() {
        let data = "not json\n[]\n";
        let mut backend = ReplayBackend::from_reader(Cursor::new(data));
        let err = backend.detect(&frame()).unwrap_err();
        assert!(err.to_string().contains("replay line 1"));
        assert!(backend.detect(&frame()).unwrap().is_empty());
        assert!(!backend.is_exhausted());
    }

    #[test]
    fn bad_entry_does_not_discard_the_rest_of_the_line() {
        let data = concat!(
            r#"[{"bbox": [1, 2, 30, 40], "label": "Person", "confidence": 0.9}, "#,
            r#"{"bbox": [1, 2, 3], "label": "helmet", "confidence": 0.8}, "#,
            r#"{"label": "vest"}, "#,
            r#"{"bbox": [5, 5, 9, 9], "label": "Hardhat", "confidence": 0.7}]"#,
            "\n"
        );
        let mut backend = ReplayBackend::from_reader(Cursor::new(data));
        let dets = backend.detect(&frame()).unwrap();
        let labels: Vec<&str> = dets.iter().map(|d| d.label.as_str()).collect();
        assert_eq!(labels, vec!["Person", "Hardhat"]);
    }
}

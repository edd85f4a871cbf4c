use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use super::ViolationSink;
use crate::ViolationEvent;

/// Appends a plain-text block per violation, the format site staff read:
///
/// ```text
/// Time: 2024-03-01 08:15:00
/// Username: Dana
/// Employee ID: E7
/// Exception Type: no_helmet
/// Incident Image: snapshots/dock_20240301_081500_4.jpg
/// ```
pub struct NotificationLog {
    path: PathBuf,
}

impl NotificationLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

pub fn format_block(ev: &ViolationEvent) -> String {
    format!(
        "Time: {}\nUsername: {}\nEmployee ID: {}\nException Type: {}\nIncident Image: {}\n\n",
        ev.timestamp, ev.identity_name, ev.identity_id, ev.violation, ev.image_path
    )
}

impl ViolationSink for NotificationLog {
    fn name(&self) -> &'static str {
        "notification-log"
    }

    fn publish(&mut self, ev: &ViolationEvent) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("failed to open notification log {}", self.path.display()))?;
        file.write_all(format_block(ev).as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Zone;

    #[test]
    fn appends_one_block_per_event() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log").join("notifications.txt");
        let mut sink = NotificationLog::new(&path);
        let mut ev = ViolationEvent {
            timestamp: "2024-03-01 08:15:00".into(),
            epoch_s: 1_709_280_900,
            identity_name: "Dana".into(),
            identity_id: "E7".into(),
            violation: "no_helmet".into(),
            image_path: "snapshots/dock_1.jpg".into(),
            camera_id: "dock".into(),
            zone: Zone::Right,
            confidence: 0.8,
        };
        sink.publish(&ev).unwrap();
        ev.violation = "no_pvc_suit".into();
        sink.publish(&ev).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.starts_with(
            "Time: 2024-03-01 08:15:00\nUsername: Dana\nEmployee ID: E7\nException Type: no_helmet\nIncident Image: snapshots/dock_1.jpg\n\n"
        ));
        assert_eq!(content.matches("Exception Type:").count(), 2);
        assert!(content.contains("Exception Type: no_pvc_suit\n"));
    }
}

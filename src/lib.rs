//! PPE Zone Compliance Kernel
//!
//! This crate implements the per-frame compliance engine for PPE monitoring.
//!
//! # Architecture
//!
//! Each frame flows through the same fixed sequence:
//!
//! 1. **Canonicalize**: raw detector labels become canonical PPE classes.
//! 2. **Classify**: each person's box centre is placed LEFT / RIGHT / ON_LINE of the divider.
//! 3. **Resolve**: PPE item centres are attributed to the person boxes that contain them.
//! 4. **Evaluate**: each person's owned set is checked against their zone's requirements.
//! 5. **Identify**: non-compliant persons are matched against the face gallery (lazily).
//! 6. **Gate**: (identity, violation) pairs inside the cooldown window are suppressed.
//!
//! # Module Structure
//!
//! - `canon`: alias table and canonical classes
//! - `zone`: divider geometry and per-zone requirements
//! - `ownership`: person/PPE association
//! - `compliance`: missing-category evaluation
//! - `identity`: face gallery and nearest-neighbour matching
//! - `alert`: cooldown gate shared across stream workers
//! - `pipeline`: frame orchestrator and stream worker
//! - `detect`, `frame`: detector boundary and frame sources
//! - `storage`, `transport`: violation persistence and notification sinks
//! - `snapshot`: incident frame capture
//! - `config`: daemon configuration

use anyhow::{anyhow, Result};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};

pub mod alert;
pub mod canon;
pub mod compliance;
pub mod config;
pub mod detect;
pub mod frame;
pub mod identity;
pub mod ownership;
pub mod pipeline;
pub mod snapshot;
pub mod storage;
pub mod transport;
pub mod zone;

pub use alert::{AlertGate, AlertKey, DEFAULT_ALERT_COOLDOWN};
pub use canon::{AliasTable, CanonicalClass};
pub use compliance::{evaluate, ComplianceResult};
pub use detect::{BoundingBox, Detection, DetectorBackend, Point, ReplayBackend, StaticBackend};
pub use frame::{Frame, FrameSource, SyntheticFrameSource};
pub use identity::{
    FaceEmbedder, Gallery, Identity, IdentityMatch, KnownIdentity, NoFaceEmbedder, SharedGallery,
    DEFAULT_MATCH_THRESHOLD,
};
pub use ownership::{resolve, OwnershipPolicy, PersonEntity, PpeItem};
pub use pipeline::{
    dispatch, DividerSetting, FrameOrchestrator, FrameReport, PersonOutcome, SkipReason, Skipped,
    StreamWorker, WorkerStats, ZoneRules,
};
pub use snapshot::{JpegSnapshotWriter, NoSnapshots, SnapshotWriter};
pub use storage::{InMemoryViolationStore, SqliteViolationStore, StoredViolation, ViolationStore};
pub use transport::{FanoutSink, MqttNotifier, MqttSettings, NotificationLog, ViolationSink};
pub use zone::{classify, Divider, Zone, ZoneRequirements};

/// Identity label used when no gallery entry matches.
pub const UNKNOWN_IDENTITY: &str = "Unknown";

/// Timestamp layout for violation events (local time).
pub const EVENT_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

// -------------------- Violation Events --------------------

/// A deduplicated, identity-attributed violation handed to persistence and notification.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ViolationEvent {
    /// Local time of the frame, `YYYY-MM-DD HH:MM:SS`.
    pub timestamp: String,
    /// Seconds since the unix epoch for the same instant.
    pub epoch_s: u64,
    pub identity_name: String,
    pub identity_id: String,
    /// Canonical negative label, e.g. `no_helmet`.
    pub violation: String,
    pub image_path: String,
    pub camera_id: String,
    pub zone: Zone,
    pub confidence: f32,
}

// -------------------- Stream ID Discipline --------------------

/// Stream identifiers end up in file names and MQTT topics, so they are
/// restricted to `[a-z0-9_-]{1,64}`.
pub fn validate_stream_id(stream_id: &str) -> Result<()> {
    static STREAM_ID_RE: OnceLock<regex::Regex> = OnceLock::new();
    let re = STREAM_ID_RE.get_or_init(|| regex::Regex::new(r"^[a-z0-9_-]{1,64}$").unwrap());

    if !re.is_match(stream_id) {
        return Err(anyhow!(
            "stream id {:?} must match ^[a-z0-9_-]{{1,64}}$",
            stream_id
        ));
    }
    Ok(())
}

// -------------------- Time Helpers --------------------

pub fn format_local_timestamp(at: SystemTime) -> String {
    let local: DateTime<Local> = at.into();
    local.format(EVENT_TIMESTAMP_FORMAT).to_string()
}

pub fn epoch_seconds(at: SystemTime) -> u64 {
    at.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

pub(crate) fn now_s() -> Result<u64> {
    Ok(SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn stream_ids_are_allowlisted() {
        assert!(validate_stream_id("cam_01").is_ok());
        assert!(validate_stream_id("loading-dock").is_ok());
        assert!(validate_stream_id("").is_err());
        assert!(validate_stream_id("Cam 1").is_err());
        assert!(validate_stream_id("../etc").is_err());
        assert!(validate_stream_id(&"a".repeat(65)).is_err());
    }

    #[test]
    fn timestamp_has_second_resolution_layout() {
        let at = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        let formatted = format_local_timestamp(at);
        assert_eq!(formatted.len(), "2023-11-14 22:13:20".len());
        assert_eq!(&formatted[4..5], "-");
        assert_eq!(&formatted[10..11], " ");
        assert_eq!(epoch_seconds(at), 1_700_000_000);
    }
}

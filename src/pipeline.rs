//! Per-frame orchestration.
//!
//! `FrameOrchestrator` drives one frame's detections through
//! canonicalize -> classify -> resolve -> evaluate -> identify -> gate and
//! produces a `FrameReport`. `StreamWorker` loops it over a frame source for
//! one camera.
//!
//! Failures are contained per detection or per person: a malformed box, a
//! failed embedding, or a gallery dimension mismatch is logged, recorded in
//! the report, and the rest of the frame proceeds.

use anyhow::{anyhow, Result};
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::alert::{AlertGate, AlertKey, DEFAULT_ALERT_COOLDOWN};
use crate::canon::{AliasTable, CanonicalClass};
use crate::compliance::{evaluate_in_zone, ComplianceResult};
use crate::detect::{Detection, DetectorBackend};
use crate::frame::{Frame, FrameSource};
use crate::identity::{
    FaceEmbedder, Gallery, IdentityMatch, SharedGallery, DEFAULT_MATCH_THRESHOLD,
};
use crate::ownership::{resolve, OwnershipPolicy, PersonEntity, PpeItem};
use crate::snapshot::{snapshot_path, SnapshotWriter};
use crate::transport::ViolationSink;
use crate::zone::{classify, Divider, ZoneRequirements};
use crate::{epoch_seconds, format_local_timestamp, validate_stream_id, ViolationEvent};

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum DividerSetting {
    Fixed(Divider),
    /// Vertical line at half the first frame's width.
    DynamicMidline,
}

impl DividerSetting {
    pub fn resolve(&self, width: u32, height: u32) -> Divider {
        match self {
            DividerSetting::Fixed(divider) => *divider,
            DividerSetting::DynamicMidline => Divider::midline(width, height),
        }
    }
}

/// Static per-site rules shared by every stream.
#[derive(Clone, Debug)]
pub struct ZoneRules {
    pub aliases: AliasTable,
    pub divider: DividerSetting,
    pub requirements: ZoneRequirements,
    pub ownership: OwnershipPolicy,
    pub match_threshold: f32,
    pub alert_cooldown: Duration,
}

impl ZoneRules {
    pub fn new(divider: DividerSetting, requirements: ZoneRequirements) -> Self {
        Self {
            aliases: AliasTable::default(),
            divider,
            requirements,
            ownership: OwnershipPolicy::default(),
            match_threshold: DEFAULT_MATCH_THRESHOLD,
            alert_cooldown: DEFAULT_ALERT_COOLDOWN,
        }
    }
}

/// Why part of a frame was dropped or degraded.
#[derive(Clone, Debug, PartialEq)]
pub enum SkipReason {
    /// Detection failed validation (box, label, or confidence).
    InvalidDetection(String),
    /// The face pipeline errored; the person is attributed to Unknown.
    EmbeddingFailed(String),
    /// The embedding did not fit the gallery; the person is attributed to Unknown.
    GalleryMismatch(String),
    /// The shared gallery could not be read; the person is attributed to Unknown.
    GalleryUnavailable(String),
    /// The alert gate could not be consulted; the alert is dropped.
    GateUnavailable(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::InvalidDetection(e) => write!(f, "invalid detection: {}", e),
            SkipReason::EmbeddingFailed(e) => write!(f, "embedding failed: {}", e),
            SkipReason::GalleryMismatch(e) => write!(f, "gallery mismatch: {}", e),
            SkipReason::GalleryUnavailable(e) => write!(f, "gallery unavailable: {}", e),
            SkipReason::GateUnavailable(e) => write!(f, "alert gate unavailable: {}", e),
        }
    }
}

/// `index` is the detection index for `InvalidDetection`, the person id otherwise.
#[derive(Clone, Debug, PartialEq)]
pub struct Skipped {
    pub index: usize,
    pub reason: SkipReason,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PersonOutcome {
    pub result: ComplianceResult,
    /// Only populated for non-compliant persons.
    pub identity: Option<IdentityMatch>,
}

#[derive(Clone, Debug)]
pub struct FrameReport {
    pub sequence: u64,
    pub divider: Divider,
    pub persons: Vec<PersonEntity>,
    pub outcomes: Vec<PersonOutcome>,
    pub unowned_items: usize,
    pub events: Vec<ViolationEvent>,
    pub suppressed: usize,
    pub skipped: Vec<Skipped>,
}

impl FrameReport {
    pub fn violators(&self) -> impl Iterator<Item = &PersonOutcome> {
        self.outcomes.iter().filter(|o| !o.result.compliant)
    }
}

pub struct FrameOrchestrator {
    camera_id: String,
    rules: Arc<ZoneRules>,
    gate: Arc<AlertGate>,
    gallery: SharedGallery,
    snapshot_dir: PathBuf,
    divider: Option<Divider>,
}

impl FrameOrchestrator {
    pub fn new(
        camera_id: &str,
        rules: Arc<ZoneRules>,
        gate: Arc<AlertGate>,
        gallery: SharedGallery,
        snapshot_dir: impl Into<PathBuf>,
    ) -> Result<Self> {
        validate_stream_id(camera_id)?;
        if let DividerSetting::Fixed(divider) = &rules.divider {
            divider.validate()?;
        }
        if rules.match_threshold.is_nan() || rules.match_threshold <= 0.0 {
            return Err(anyhow!("match threshold must be greater than zero"));
        }
        Ok(Self {
            camera_id: camera_id.to_string(),
            rules,
            gate,
            gallery,
            snapshot_dir: snapshot_dir.into(),
            divider: None,
        })
    }

    pub fn camera_id(&self) -> &str {
        &self.camera_id
    }

    /// Divider in effect, once the first frame has fixed it.
    pub fn divider(&self) -> Option<Divider> {
        self.divider
    }

    pub fn process_frame(
        &mut self,
        frame: &Frame,
        detections: &[Detection],
        embedder: &mut dyn FaceEmbedder,
    ) -> FrameReport {
        let rules = Arc::clone(&self.rules);
        let divider = *self
            .divider
            .get_or_insert_with(|| rules.divider.resolve(frame.width, frame.height));

        let mut skipped = Vec::new();
        let mut persons = Vec::new();
        let mut items = Vec::new();

        for (index, det) in detections.iter().enumerate() {
            let checked = det
                .validate()
                .and_then(|()| det.bbox.validate_within(frame.width, frame.height));
            if let Err(e) = checked {
                log::warn!(
                    "{}: frame {} detection {} skipped: {}",
                    self.camera_id,
                    frame.sequence,
                    index,
                    e
                );
                skipped.push(Skipped {
                    index,
                    reason: SkipReason::InvalidDetection(e.to_string()),
                });
                continue;
            }
            let class = rules.aliases.canonicalize(&det.label);
            if class.is_person() {
                let zone = classify(det.bbox.center(), &divider);
                persons.push(PersonEntity::new(persons.len(), det.bbox, det.confidence, zone));
            } else {
                items.push(PpeItem {
                    class,
                    center: det.bbox.center(),
                    confidence: det.confidence,
                });
            }
        }

        let unowned_items = resolve(&mut persons, &items, rules.ownership);

        let mut gallery: Option<Arc<Gallery>> = None;
        let mut outcomes = Vec::with_capacity(persons.len());
        let mut events = Vec::new();
        let mut suppressed = 0;
        let image_path = snapshot_path(&self.snapshot_dir, &self.camera_id, frame);

        for person in &persons {
            let result = evaluate_in_zone(person, &rules.requirements);
            if result.compliant {
                outcomes.push(PersonOutcome {
                    result,
                    identity: None,
                });
                continue;
            }

            let identity = self.identify(frame, person, embedder, &mut gallery, &mut skipped);

            for violation in result.violations() {
                let key = AlertKey::new(identity.identity.name(), violation.as_str());
                match self.gate.should_fire(&key, frame.captured_at, rules.alert_cooldown) {
                    Ok(true) => {
                        log::info!(
                            "{}: {} ({}) {} in {} zone",
                            self.camera_id,
                            identity.identity.name(),
                            identity.identity.employee_id(),
                            violation,
                            person.zone
                        );
                        events.push(self.violation_event(
                            frame,
                            person,
                            &identity,
                            &violation,
                            &image_path,
                        ));
                    }
                    Ok(false) => {
                        log::debug!(
                            "{}: {} / {} within cooldown",
                            self.camera_id,
                            key.identity,
                            key.violation
                        );
                        suppressed += 1;
                    }
                    Err(e) => {
                        log::error!(
                            "{}: alert gate error for person {}: {:#}",
                            self.camera_id,
                            person.id,
                            e
                        );
                        skipped.push(Skipped {
                            index: person.id,
                            reason: SkipReason::GateUnavailable(e.to_string()),
                        });
                    }
                }
            }

            outcomes.push(PersonOutcome {
                result,
                identity: Some(identity),
            });
        }

        FrameReport {
            sequence: frame.sequence,
            divider,
            persons,
            outcomes,
            unowned_items,
            events,
            suppressed,
            skipped,
        }
    }

    /// Face lookup for one non-compliant person. Every failure degrades to Unknown.
    fn identify(
        &self,
        frame: &Frame,
        person: &PersonEntity,
        embedder: &mut dyn FaceEmbedder,
        gallery: &mut Option<Arc<Gallery>>,
        skipped: &mut Vec<Skipped>,
    ) -> IdentityMatch {
        let embedding = match embedder.embed(frame, &person.bbox) {
            Ok(Some(embedding)) => embedding,
            Ok(None) => return IdentityMatch::unknown(),
            Err(e) => {
                log::warn!(
                    "{}: embedding failed for person {}: {:#}",
                    self.camera_id,
                    person.id,
                    e
                );
                skipped.push(Skipped {
                    index: person.id,
                    reason: SkipReason::EmbeddingFailed(e.to_string()),
                });
                return IdentityMatch::unknown();
            }
        };

        // One snapshot per frame so every person sees the same gallery.
        if gallery.is_none() {
            match self.gallery.snapshot() {
                Ok(snapshot) => *gallery = Some(snapshot),
                Err(e) => {
                    log::error!("{}: {:#}", self.camera_id, e);
                    skipped.push(Skipped {
                        index: person.id,
                        reason: SkipReason::GalleryUnavailable(e.to_string()),
                    });
                    return IdentityMatch::unknown();
                }
            }
        }
        let Some(snapshot) = gallery.as_ref() else {
            return IdentityMatch::unknown();
        };

        match snapshot.match_embedding(&embedding, self.rules.match_threshold) {
            Ok(found) => found,
            Err(e) => {
                log::warn!(
                    "{}: identity match failed for person {}: {:#}",
                    self.camera_id,
                    person.id,
                    e
                );
                skipped.push(Skipped {
                    index: person.id,
                    reason: SkipReason::GalleryMismatch(e.to_string()),
                });
                IdentityMatch::unknown()
            }
        }
    }

    fn violation_event(
        &self,
        frame: &Frame,
        person: &PersonEntity,
        identity: &IdentityMatch,
        violation: &CanonicalClass,
        image_path: &std::path::Path,
    ) -> ViolationEvent {
        ViolationEvent {
            timestamp: format_local_timestamp(frame.captured_at),
            epoch_s: epoch_seconds(frame.captured_at),
            identity_name: identity.identity.name().to_string(),
            identity_id: identity.identity.employee_id().to_string(),
            violation: violation.to_string(),
            image_path: image_path.display().to_string(),
            camera_id: self.camera_id.clone(),
            zone: person.zone,
            confidence: person.confidence,
        }
    }
}

/// Hand a frame's events to the sink. Sink failures are logged only; the
/// gate has already recorded the alert.
pub fn dispatch(report: &FrameReport, sink: &mut dyn ViolationSink) -> usize {
    let mut delivered = 0;
    for ev in &report.events {
        match sink.publish(ev) {
            Ok(()) => delivered += 1,
            Err(e) => log::error!(
                "sink {} failed for {} / {} on {}: {:#}",
                sink.name(),
                ev.identity_name,
                ev.violation,
                ev.camera_id,
                e
            ),
        }
    }
    delivered
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub frames: u64,
    pub detector_errors: u64,
    pub events: u64,
    pub suppressed: u64,
    pub skipped: u64,
}

/// One camera: frames in, events out, strictly sequential.
pub struct StreamWorker {
    orchestrator: FrameOrchestrator,
    source: Box<dyn FrameSource>,
    detector: Box<dyn DetectorBackend>,
    embedder: Box<dyn FaceEmbedder>,
    snapshots: Box<dyn SnapshotWriter>,
    sink: Box<dyn ViolationSink>,
    stats: WorkerStats,
}

impl StreamWorker {
    pub fn new(
        orchestrator: FrameOrchestrator,
        source: Box<dyn FrameSource>,
        detector: Box<dyn DetectorBackend>,
        embedder: Box<dyn FaceEmbedder>,
        snapshots: Box<dyn SnapshotWriter>,
        sink: Box<dyn ViolationSink>,
    ) -> Self {
        Self {
            orchestrator,
            source,
            detector,
            embedder,
            snapshots,
            sink,
            stats: WorkerStats::default(),
        }
    }

    pub fn stats(&self) -> WorkerStats {
        self.stats
    }

    /// Process one frame. `Ok(None)` when the stream or the detector is exhausted.
    pub fn step(&mut self) -> Result<Option<FrameReport>> {
        if self.detector.is_exhausted() {
            return Ok(None);
        }
        let Some(frame) = self.source.next_frame()? else {
            return Ok(None);
        };
        self.stats.frames += 1;

        let detections = match self.detector.detect(&frame) {
            Ok(detections) => detections,
            Err(e) => {
                log::warn!(
                    "{}: detector {} failed on frame {}: {:#}",
                    self.orchestrator.camera_id(),
                    self.detector.name(),
                    frame.sequence,
                    e
                );
                self.stats.detector_errors += 1;
                Vec::new()
            }
        };
        if self.detector.is_exhausted() {
            return Ok(None);
        }

        let report = self
            .orchestrator
            .process_frame(&frame, &detections, self.embedder.as_mut());

        if let Some(first) = report.events.first() {
            let path = std::path::Path::new(&first.image_path);
            if let Err(e) = self.snapshots.write(&frame, path) {
                log::warn!("{}: snapshot not saved: {:#}", self.orchestrator.camera_id(), e);
            }
        }

        dispatch(&report, self.sink.as_mut());
        self.stats.events += report.events.len() as u64;
        self.stats.suppressed += report.suppressed as u64;
        self.stats.skipped += report.skipped.len() as u64;
        Ok(Some(report))
    }

    /// Run until the stream ends or `running` is cleared. The flag is checked
    /// between frames only.
    pub fn run(&mut self, running: &AtomicBool) -> Result<WorkerStats> {
        self.detector.warm_up()?;
        log::info!(
            "{}: worker started (detector: {})",
            self.orchestrator.camera_id(),
            self.detector.name()
        );
        while running.load(Ordering::SeqCst) {
            if self.step()?.is_none() {
                break;
            }
        }
        log::info!(
            "{}: worker stopped after {} frames ({} events, {} suppressed, {} skipped)",
            self.orchestrator.camera_id(),
            self.stats.frames,
            self.stats.events,
            self.stats.suppressed,
            self.stats.skipped
        );
        Ok(self.stats)
    }
}

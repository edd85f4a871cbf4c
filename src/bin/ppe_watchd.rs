//! ppe_watchd - PPE zone-compliance daemon
//!
//! This daemon:
//! 1. Loads the site configuration (`PPE_CONFIG`) and the face gallery
//! 2. Starts one worker thread per configured stream
//! 3. Shares one alert gate and one gallery across all workers
//! 4. Persists violations to SQLite, the notification log and MQTT
//! 5. Enforces retention and reloads the gallery when its file changes

use anyhow::{anyhow, Context, Result};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use ppe_zone_kernel::config::{EngineConfig, StreamSettings};
use ppe_zone_kernel::{
    AlertGate, FaceEmbedder, FanoutSink, FrameOrchestrator, Gallery, JpegSnapshotWriter,
    MqttNotifier, MqttSettings, NoFaceEmbedder, NotificationLog, ReplayBackend, SharedGallery,
    SqliteViolationStore, StreamWorker, SyntheticFrameSource, ViolationStore, WorkerStats,
    ZoneRules,
};

const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(10);

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cfg = EngineConfig::load()?;
    if cfg.streams.is_empty() {
        return Err(anyhow!("no streams configured (add \"streams\" to PPE_CONFIG)"));
    }

    let rules = Arc::new(cfg.rules()?);
    let gate = Arc::new(AlertGate::new(cfg.eviction_factor));
    let (gallery, reload_path) =
        daemon_gallery(cfg.gallery_path.as_deref(), face_embedder().as_ref())?;
    let mut gallery_mtime = reload_path.and_then(modified_at);

    let mut store = SqliteViolationStore::open(&cfg.db_path)?;
    log::info!("ppe_watchd writing violations to {}", cfg.db_path);
    log::info!(
        "divider={:?} cooldown={}s threshold={} ownership={:?}",
        rules.divider,
        rules.alert_cooldown.as_secs(),
        rules.match_threshold,
        rules.ownership
    );

    let running = Arc::new(AtomicBool::new(true));
    let (tx, rx) = mpsc::channel();
    {
        let running = Arc::clone(&running);
        ctrlc::set_handler(move || {
            running.store(false, Ordering::SeqCst);
            let _ = tx.send(());
        })
        .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;
    }

    let mut handles = Vec::with_capacity(cfg.streams.len());
    for stream in &cfg.streams {
        let worker = build_worker(&cfg, stream, &rules, &gate, &gallery)?;
        let running = Arc::clone(&running);
        let stream_id = stream.id.clone();
        let handle = std::thread::Builder::new()
            .name(format!("stream-{}", stream.id))
            .spawn(move || run_worker(worker, &running, &stream_id))
            .with_context(|| format!("failed to spawn worker for {}", stream.id))?;
        handles.push((stream.id.clone(), handle));
    }
    log::info!("ppe_watchd running {} streams", handles.len());

    loop {
        match rx.recv_timeout(MAINTENANCE_INTERVAL) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                log::info!("shutdown signal received, stopping workers...");
                break;
            }
            Err(RecvTimeoutError::Timeout) => {}
        }

        match store.enforce_retention(cfg.retention) {
            Ok(0) => {}
            Ok(removed) => log::info!("retention removed {} violations", removed),
            Err(e) => log::error!("retention failed: {:#}", e),
        }
        if let Err(e) = gate.sweep(SystemTime::now()) {
            log::error!("alert gate sweep failed: {:#}", e);
        }
        if let Some(path) = reload_path {
            let mtime = modified_at(path);
            if mtime.is_some() && mtime != gallery_mtime {
                match gallery.rebuild(path) {
                    Ok(_) => gallery_mtime = mtime,
                    Err(e) => log::warn!("gallery reload failed, keeping previous: {:#}", e),
                }
            }
        }

        if handles.iter().all(|(_, handle)| handle.is_finished()) {
            log::info!("all streams finished");
            break;
        }
    }

    running.store(false, Ordering::SeqCst);
    for (stream_id, handle) in handles {
        match handle.join() {
            Ok(Some(stats)) => log::info!(
                "{}: {} frames, {} events, {} suppressed",
                stream_id,
                stats.frames,
                stats.events,
                stats.suppressed
            ),
            Ok(None) => {}
            Err(_) => log::error!("{}: worker panicked", stream_id),
        }
    }
    Ok(())
}

fn build_worker(
    cfg: &EngineConfig,
    stream: &StreamSettings,
    rules: &Arc<ZoneRules>,
    gate: &Arc<AlertGate>,
    gallery: &SharedGallery,
) -> Result<StreamWorker> {
    let orchestrator = FrameOrchestrator::new(
        &stream.id,
        Arc::clone(rules),
        Arc::clone(gate),
        gallery.clone(),
        cfg.snapshot_dir.clone(),
    )?;
    let source = SyntheticFrameSource::new(stream.width, stream.height, stream.target_fps)?;
    let detector = ReplayBackend::open(&stream.detections_path)?;

    // SQLite connections are per thread; WAL lets the workers write concurrently.
    let mut sink = FanoutSink::new().with(Box::new(SqliteViolationStore::open(&cfg.db_path)?));
    if let Some(path) = &cfg.notification_log {
        sink.push(Box::new(NotificationLog::new(path.clone())));
    }
    if let Some(mqtt) = &cfg.mqtt {
        let settings = MqttSettings {
            client_id: format!("{}-{}", mqtt.client_id, stream.id),
            ..mqtt.clone()
        };
        sink.push(Box::new(MqttNotifier::connect(&settings)?));
    }

    Ok(StreamWorker::new(
        orchestrator,
        Box::new(source),
        Box::new(detector),
        face_embedder(),
        Box::new(JpegSnapshotWriter),
        Box::new(sink),
    ))
}

fn run_worker(
    mut worker: StreamWorker,
    running: &AtomicBool,
    stream_id: &str,
) -> Option<WorkerStats> {
    match worker.run(running) {
        Ok(stats) => Some(stats),
        Err(e) => {
            log::error!("{}: worker stopped with error: {:#}", stream_id, e);
            None
        }
    }
}

/// No face pipeline ships with the daemon; library users wire their own.
fn face_embedder() -> Box<dyn FaceEmbedder> {
    Box::new(NoFaceEmbedder)
}

/// Loads the gallery only when the embedder can use it. Also returns the
/// path to watch for reloads.
fn daemon_gallery<'a>(
    path: Option<&'a Path>,
    embedder: &dyn FaceEmbedder,
) -> Result<(SharedGallery, Option<&'a Path>)> {
    if !embedder.produces_embeddings() {
        log::warn!("no face embedder configured; every violation will be attributed to Unknown");
        if let Some(path) = path {
            log::warn!("gallery {} ignored without a face embedder", path.display());
        }
        return Ok((SharedGallery::default(), None));
    }
    let gallery = SharedGallery::new(load_gallery(path)?);
    Ok((gallery, path))
}

fn load_gallery(path: Option<&Path>) -> Result<Gallery> {
    let Some(path) = path else {
        log::warn!("no gallery configured; every violation will be attributed to Unknown");
        return Ok(Gallery::empty());
    };
    let gallery = Gallery::load_json(path)?;
    log::info!(
        "gallery loaded from {} ({} identities)",
        path.display(),
        gallery.len()
    );
    Ok(gallery)
}

fn modified_at(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

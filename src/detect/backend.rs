use anyhow::Result;

use crate::detect::result::Detection;
use crate::frame::Frame;

/// Detector backend trait.
///
/// The kernel treats a detector as a pure function per frame: pixels in,
/// labelled boxes out. Model loading, thresholds and NMS belong to the
/// backend, not to the compliance engine.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a frame.
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>>;

    /// True once a finite backend (e.g. a replay) has nothing left to emit.
    fn is_exhausted(&self) -> bool {
        false
    }

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

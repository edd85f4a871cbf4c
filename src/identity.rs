//! Face identity matching.
//!
//! The face detector and embedding network live outside the kernel behind
//! [`FaceEmbedder`]. The kernel owns the gallery of known embeddings and the
//! nearest-neighbour decision.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, RwLock};

use crate::detect::BoundingBox;
use crate::frame::Frame;
use crate::UNKNOWN_IDENTITY;

/// Maximum Euclidean distance (exclusive) for a gallery match.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.6;

/// One enrolled person.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KnownIdentity {
    pub name: String,
    pub employee_id: String,
    pub embedding: Vec<f32>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum Identity {
    Known { name: String, employee_id: String },
    Unknown,
}

impl Identity {
    pub fn name(&self) -> &str {
        match self {
            Identity::Known { name, .. } => name,
            Identity::Unknown => UNKNOWN_IDENTITY,
        }
    }

    pub fn employee_id(&self) -> &str {
        match self {
            Identity::Known { employee_id, .. } => employee_id,
            Identity::Unknown => UNKNOWN_IDENTITY,
        }
    }

    pub fn is_known(&self) -> bool {
        matches!(self, Identity::Known { .. })
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct IdentityMatch {
    pub identity: Identity,
    /// Distance to the nearest gallery entry, `f32::INFINITY` for an empty gallery.
    pub distance: f32,
}

impl IdentityMatch {
    pub fn unknown() -> Self {
        Self {
            identity: Identity::Unknown,
            distance: f32::INFINITY,
        }
    }
}

/// Known embeddings, all of the same dimension.
#[derive(Clone, Debug, Default)]
pub struct Gallery {
    entries: Vec<KnownIdentity>,
    dimension: Option<usize>,
}

impl Gallery {
    pub fn new(entries: Vec<KnownIdentity>) -> Result<Self> {
        let mut dimension = None;
        for entry in &entries {
            if entry.embedding.is_empty() {
                return Err(anyhow!("gallery entry '{}' has an empty embedding", entry.name));
            }
            if entry.embedding.iter().any(|v| !v.is_finite()) {
                return Err(anyhow!(
                    "gallery entry '{}' has non-finite embedding values",
                    entry.name
                ));
            }
            match dimension {
                None => dimension = Some(entry.embedding.len()),
                Some(d) if d != entry.embedding.len() => {
                    return Err(anyhow!(
                        "gallery entry '{}' has dimension {}, expected {}",
                        entry.name,
                        entry.embedding.len(),
                        d
                    ));
                }
                Some(_) => {}
            }
        }
        Ok(Self { entries, dimension })
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Load a JSON array of `{name, employee_id, embedding}` records.
    pub fn load_json(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read gallery {}", path.display()))?;
        let entries: Vec<KnownIdentity> = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse gallery {}", path.display()))?;
        Self::new(entries)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    /// Nearest-neighbour match. The nearest entry is accepted only when its
    /// distance is strictly below `threshold`; ties keep the earliest entry.
    pub fn match_embedding(&self, query: &[f32], threshold: f32) -> Result<IdentityMatch> {
        let Some(dimension) = self.dimension else {
            return Ok(IdentityMatch::unknown());
        };
        if query.len() != dimension {
            return Err(anyhow!(
                "query embedding has dimension {}, gallery has {}",
                query.len(),
                dimension
            ));
        }

        let mut best: Option<(usize, f64)> = None;
        for (idx, entry) in self.entries.iter().enumerate() {
            let d = euclidean_distance(query, &entry.embedding);
            if best.map_or(true, |(_, best_d)| d < best_d) {
                best = Some((idx, d));
            }
        }

        let Some((idx, distance)) = best else {
            return Ok(IdentityMatch::unknown());
        };
        let distance = distance as f32;
        let identity = if distance < threshold {
            let entry = &self.entries[idx];
            Identity::Known {
                name: entry.name.clone(),
                employee_id: entry.employee_id.clone(),
            }
        } else {
            Identity::Unknown
        };
        Ok(IdentityMatch { identity, distance })
    }
}

/// L2 distance, accumulated in f64. Slices must have equal length.
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let d = f64::from(*x) - f64::from(*y);
            d * d
        })
        .sum::<f64>()
        .sqrt()
}

/// Gallery shared by all stream workers.
///
/// Readers take a cheap snapshot; a rebuild swaps the whole gallery at once
/// so no match ever observes a half-loaded set.
#[derive(Clone, Debug, Default)]
pub struct SharedGallery {
    inner: Arc<RwLock<Arc<Gallery>>>,
}

impl SharedGallery {
    pub fn new(gallery: Gallery) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(gallery))),
        }
    }

    pub fn snapshot(&self) -> Result<Arc<Gallery>> {
        let guard = self
            .inner
            .read()
            .map_err(|_| anyhow!("gallery lock poisoned"))?;
        Ok(Arc::clone(&guard))
    }

    pub fn replace(&self, gallery: Gallery) -> Result<()> {
        let mut guard = self
            .inner
            .write()
            .map_err(|_| anyhow!("gallery lock poisoned"))?;
        *guard = Arc::new(gallery);
        Ok(())
    }

    /// Reload from disk. On error the previous gallery stays in place.
    pub fn rebuild(&self, path: &Path) -> Result<usize> {
        let gallery = Gallery::load_json(path)?;
        let count = gallery.len();
        self.replace(gallery)?;
        log::info!("gallery rebuilt from {} ({} identities)", path.display(), count);
        Ok(count)
    }
}

#[cfg(test)]
impl SharedGallery {
    /// Panics a writer while it holds the lock.
    pub(crate) fn poison(&self) {
        let inner = Arc::clone(&self.inner);
        let _ = std::thread::spawn(move || {
            let _guard = inner.write();
            panic!("gallery writer died");
        })
        .join();
    }
}

/// Face detection plus embedding for one person crop.
///
/// `Ok(None)` means no face was found in the crop.
pub trait FaceEmbedder: Send {
    fn embed(&mut self, frame: &Frame, person: &BoundingBox) -> Result<Option<Vec<f32>>>;

    /// False when this embedder never produces embeddings, so a gallery
    /// would never be consulted.
    fn produces_embeddings(&self) -> bool {
        true
    }
}

/// Embedder for deployments without a face pipeline: every person is Unknown.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoFaceEmbedder;

impl FaceEmbedder for NoFaceEmbedder {
    fn embed(&mut self, _frame: &Frame, _person: &BoundingBox) -> Result<Option<Vec<f32>>> {
        Ok(None)
    }

    fn produces_embeddings(&self) -> bool {
        false
    }
}

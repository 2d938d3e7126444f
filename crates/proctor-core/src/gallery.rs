//! Registered-identity gallery.
//!
//! Holds the enrolled embeddings together with a row-normalized copy that the
//! matcher dots against. Loaded once at startup; never mutated afterwards.

use crate::types::l2_norm;
use ndarray::{Array2, Axis};
use ndarray_npy::ReadNpyError;
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("cannot read embeddings {path}: {source}")]
    Embeddings {
        path: String,
        #[source]
        source: ReadNpyError,
    },
    #[error("cannot read labels {path}: {source}")]
    Labels {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("labels {path} are not a JSON array of strings: {source}")]
    LabelsFormat {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("gallery shape mismatch: {embeddings} embeddings, {labels} labels")]
    LengthMismatch { embeddings: usize, labels: usize },
    #[error("gallery is empty")]
    Empty,
    #[error("gallery embeddings have zero dimension")]
    ZeroDimension,
    #[error("gallery entry {index} ({label}) has a zero or non-finite norm")]
    DegenerateEntry { index: usize, label: String },
}

/// Loaded embedding data. Rows of `normalized` are unit length.
#[derive(Debug)]
struct Entries {
    labels: Vec<String>,
    embeddings: Array2<f32>,
    normalized: Array2<f32>,
}

#[derive(Debug)]
enum State {
    Ready(Entries),
    Unavailable { reason: String },
}

/// Read-only set of known identity embeddings.
#[derive(Debug)]
pub struct Gallery {
    state: State,
}

impl Gallery {
    /// Load a gallery from an `.npy` embedding matrix (N × D, f32 or f64) and
    /// a labels file (JSON array, or one label per line).
    pub fn load(
        embeddings_path: impl AsRef<Path>,
        labels_path: impl AsRef<Path>,
    ) -> Result<Self, GalleryError> {
        let embeddings_path = embeddings_path.as_ref();
        let labels_path = labels_path.as_ref();

        let embeddings = read_embeddings(embeddings_path)?;
        let labels = read_labels(labels_path)?;

        let gallery = Self::from_parts(embeddings, labels)?;
        tracing::info!(
            embeddings = %embeddings_path.display(),
            labels = %labels_path.display(),
            entries = gallery.len(),
            identities = gallery.identities(),
            dim = gallery.dimension(),
            "gallery loaded"
        );
        Ok(gallery)
    }

    /// Build a gallery from co-indexed rows and labels, normalizing each row.
    pub fn from_parts(embeddings: Array2<f32>, labels: Vec<String>) -> Result<Self, GalleryError> {
        let (rows, dim) = embeddings.dim();
        if rows != labels.len() {
            return Err(GalleryError::LengthMismatch {
                embeddings: rows,
                labels: labels.len(),
            });
        }
        if rows == 0 {
            return Err(GalleryError::Empty);
        }
        if dim == 0 {
            return Err(GalleryError::ZeroDimension);
        }

        let mut normalized = embeddings.clone();
        for (index, mut row) in normalized.axis_iter_mut(Axis(0)).enumerate() {
            let norm = l2_norm(row.iter());
            if !norm.is_finite() || norm == 0.0 {
                return Err(GalleryError::DegenerateEntry {
                    index,
                    label: labels[index].clone(),
                });
            }
            row.mapv_inplace(|v| (f64::from(v) / norm) as f32);
        }

        Ok(Self {
            state: State::Ready(Entries {
                labels,
                embeddings,
                normalized,
            }),
        })
    }

    /// A gallery that failed to load. Every match against it reports `DB_ERROR`.
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            state: State::Unavailable {
                reason: reason.into(),
            },
        }
    }

    /// Load, or fall back to an unavailable gallery on any error.
    pub fn load_or_unavailable(
        embeddings_path: impl AsRef<Path>,
        labels_path: impl AsRef<Path>,
    ) -> Self {
        match Self::load(embeddings_path, labels_path) {
            Ok(g) => g,
            Err(e) => {
                tracing::warn!(error = %e, "gallery unavailable; matches will report DB_ERROR");
                Self::unavailable(e.to_string())
            }
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.state, State::Ready(_))
    }

    /// Why the gallery is unavailable, if it is.
    pub fn reason(&self) -> Option<&str> {
        match &self.state {
            State::Ready(_) => None,
            State::Unavailable { reason } => Some(reason),
        }
    }

    /// Number of entries (0 when unavailable).
    pub fn len(&self) -> usize {
        self.entries().map_or(0, |e| e.labels.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Embedding dimensionality D (0 when unavailable).
    pub fn dimension(&self) -> usize {
        self.entries().map_or(0, |e| e.embeddings.ncols())
    }

    /// Number of distinct labels.
    pub fn identities(&self) -> usize {
        self.entries().map_or(0, |e| {
            e.labels.iter().map(String::as_str).collect::<HashSet<_>>().len()
        })
    }

    pub fn labels(&self) -> &[String] {
        self.entries().map_or(&[], |e| &e.labels)
    }

    /// Raw embedding matrix as loaded.
    pub fn embeddings(&self) -> Option<&Array2<f32>> {
        self.entries().map(|e| &e.embeddings)
    }

    /// Row-normalized embedding matrix.
    pub fn normalized(&self) -> Option<&Array2<f32>> {
        self.entries().map(|e| &e.normalized)
    }

    fn entries(&self) -> Option<&Entries> {
        match &self.state {
            State::Ready(e) => Some(e),
            State::Unavailable { .. } => None,
        }
    }
}

fn read_embeddings(path: &Path) -> Result<Array2<f32>, GalleryError> {
    let wrap = |source| GalleryError::Embeddings {
        path: path.display().to_string(),
        source,
    };

    match ndarray_npy::read_npy::<_, Array2<f32>>(path) {
        Ok(arr) => Ok(arr),
        Err(ReadNpyError::WrongDescriptor(_)) => {
            let arr: Array2<f64> = ndarray_npy::read_npy(path).map_err(wrap)?;
            Ok(arr.mapv(|v| v as f32))
        }
        Err(e) => Err(wrap(e)),
    }
}

fn read_labels(path: &Path) -> Result<Vec<String>, GalleryError> {
    let text = std::fs::read_to_string(path).map_err(|source| GalleryError::Labels {
        path: path.display().to_string(),
        source,
    })?;

    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

    if is_json {
        serde_json::from_str(&text).map_err(|source| GalleryError::LabelsFormat {
            path: path.display().to_string(),
            source,
        })
    } else {
        Ok(text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }
}

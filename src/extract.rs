//! Embedding extractor boundary
//!
//! The face-embedding model is an external collaborator: an opaque function
//! from a pixel buffer to a fixed-length vector, plus a localization-only
//! detection pass. This module defines the contract the rest of the service
//! consumes; backends plug in behind [`FaceExtractor`].
//!
//! "No face in this frame" is an ordinary outcome, not an error, so
//! extraction returns an explicit [`Extraction`] value that every caller has
//! to match on. Streaming sessions map [`Extraction::NoFace`] to a sentinel
//! result; enrollment rejects it outright.
//!
//! Both operations are synchronous, stateless, and safe to invoke repeatedly
//! with independent frames. Handlers run them on the blocking thread pool.

use image::RgbImage;
use thiserror::Error;

/// Embedding length of the reference VGG-Face deployment.
pub const DEFAULT_EMBEDDING_DIM: usize = 4096;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("extractor backend unavailable: {0}")]
    Unavailable(String),

    #[error("extractor backend failed: {0}")]
    Backend(String),
}

/// Outcome of an embedding extraction over one frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Extraction {
    /// Embedding of the most prominent face in the frame.
    Face(Vec<f32>),
    /// No face was localized in the frame.
    NoFace,
}

/// Localization-only detection report for the auto-capture signal path.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub found: bool,
    /// Detector confidence in `[0, 1]` for the best detection; `0.0` when
    /// nothing was found.
    pub confidence: f32,
}

impl Detection {
    pub const fn none() -> Self {
        Self {
            found: false,
            confidence: 0.0,
        }
    }
}

/// Pluggable face embedding backend.
pub trait FaceExtractor: Send + Sync {
    /// Length of every embedding this backend produces.
    fn embedding_dim(&self) -> usize;

    /// Whether the backend has a real model behind it. Degraded backends
    /// stay wired into the server but report every frame as faceless.
    fn available(&self) -> bool {
        true
    }

    /// Produce the embedding for the most prominent face in the frame,
    /// or [`Extraction::NoFace`] when none is localized.
    fn extract(&self, frame: &RgbImage) -> Result<Extraction, ExtractError>;

    /// Localize only; never computes an embedding.
    fn detect(&self, frame: &RgbImage) -> Result<Detection, ExtractError>;
}

/// Backend used when no model is configured. The server stays online and
/// every frame reports no face, mirroring a search-only degraded mode.
pub struct NullExtractor {
    dim: usize,
}

impl NullExtractor {
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }
}

impl FaceExtractor for NullExtractor {
    fn embedding_dim(&self) -> usize {
        self.dim
    }

    fn available(&self) -> bool {
        false
    }

    fn extract(&self, _frame: &RgbImage) -> Result<Extraction, ExtractError> {
        Ok(Extraction::NoFace)
    }

    fn detect(&self, _frame: &RgbImage) -> Result<Detection, ExtractError> {
        Ok(Detection::none())
    }
}

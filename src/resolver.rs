//! Identity resolution
//!
//! Exact nearest-neighbor matching of a probe embedding against every
//! enrolled embedding, in Euclidean space, under a distance threshold.
//!
//! The distance is computed exactly once per candidate, here; callers never
//! re-derive it. O(N·d) per probe is the honest implementation at roster
//! scale. An approximate index (e.g. HNSW) can replace the scan behind this
//! same function contract without touching any caller.

use thiserror::Error;

use crate::metric::l2_distance;

/// Default match threshold for the reference VGG-Face deployment, in L2
/// distance over the extractor's output scale. Extractor-specific; always
/// configurable, never a constant of nature.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 1.2;

#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("embedding dimension mismatch: probe has {probe}, '{identity}' has {candidate}")]
    DimensionMismatch {
        identity: String,
        probe: usize,
        candidate: usize,
    },
}

/// Outcome of resolving one probe embedding.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Closest enrolled identity, strictly inside the threshold.
    Match { identity: String, distance: f32 },
    /// Empty store, or nothing close enough.
    Unknown,
}

/// Resolve `probe` against `(identity, embedding)` candidates.
///
/// Returns [`Resolution::Match`] for the candidate with strictly minimal
/// Euclidean distance when that distance is `< threshold`, otherwise
/// [`Resolution::Unknown`]. Ties on distance break toward the
/// lexicographically lowest identity key, so results are deterministic.
pub fn resolve(
    probe: &[f32],
    candidates: &[(String, Vec<f32>)],
    threshold: f32,
) -> Result<Resolution, ResolveError> {
    let mut best: Option<(&str, f32)> = None;

    for (identity, embedding) in candidates {
        if embedding.len() != probe.len() {
            return Err(ResolveError::DimensionMismatch {
                identity: identity.clone(),
                probe: probe.len(),
                candidate: embedding.len(),
            });
        }

        let distance = l2_distance(probe, embedding);
        best = match best {
            None => Some((identity, distance)),
            Some((best_id, best_distance)) => {
                if distance < best_distance
                    || (distance == best_distance && identity.as_str() < best_id)
                {
                    Some((identity, distance))
                } else {
                    Some((best_id, best_distance))
                }
            }
        };
    }

    Ok(match best {
        Some((identity, distance)) if distance < threshold => Resolution::Match {
            identity: identity.to_string(),
            distance,
        },
        _ => Resolution::Unknown,
    })
}

//! Persistent embedding store
//!
//! Maps identity keys to their reference embeddings. Identities are
//! provisioned by an external system (here: the `provision` CLI command);
//! enrollment only fills or overwrites the embedding slot of an existing
//! identity, never creates one.
//!
//! # Concurrency Model
//!
//! A `parking_lot::RwLock` guards an in-memory mirror of the snapshot file:
//! recognition reads (`get_all_with_embedding`) run concurrently, while an
//! `upsert` takes the write lock, persists the updated snapshot to a temp
//! file, atomically renames it over the store path, and only then commits
//! the mirror. A failed persist restores the previous value, so no reader
//! ever observes a half-written embedding.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("identity '{0}' not found")]
    IdentityNotFound(String),

    #[error("identity '{0}' already provisioned")]
    IdentityExists(String),

    #[error("embedding dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt store snapshot: {0}")]
    Corrupt(#[from] serde_json::Error),
}

#[derive(Deserialize)]
struct Snapshot {
    dim: usize,
    identities: BTreeMap<String, Option<Vec<f32>>>,
}

#[derive(Serialize)]
struct SnapshotRef<'a> {
    dim: usize,
    identities: &'a BTreeMap<String, Option<Vec<f32>>>,
}

/// Identity-keyed embedding store backed by an atomically-replaced JSON
/// snapshot file.
pub struct IdentityStore {
    path: PathBuf,
    dim: usize,
    inner: RwLock<BTreeMap<String, Option<Vec<f32>>>>,
}

impl IdentityStore {
    /// Open a store at `path` with the configured embedding dimension.
    ///
    /// A missing file starts an empty store; the file is created on the
    /// first write. An existing snapshot must carry the same dimension.
    pub fn open<P: AsRef<Path>>(path: P, dim: usize) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();

        let identities = if path.exists() {
            let bytes = std::fs::read(&path)?;
            let snapshot: Snapshot = serde_json::from_slice(&bytes)?;
            if snapshot.dim != dim {
                return Err(StoreError::DimensionMismatch {
                    expected: dim,
                    got: snapshot.dim,
                });
            }
            for embedding in snapshot.identities.values().flatten() {
                if embedding.len() != dim {
                    return Err(StoreError::DimensionMismatch {
                        expected: dim,
                        got: embedding.len(),
                    });
                }
            }
            snapshot.identities
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            path,
            dim,
            inner: RwLock::new(identities),
        })
    }

    /// Embedding dimension every stored and queried vector must have.
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Create an identity record with no embedding yet.
    pub fn provision(&self, identity: &str) -> Result<(), StoreError> {
        let mut map = self.inner.write();
        if map.contains_key(identity) {
            return Err(StoreError::IdentityExists(identity.to_string()));
        }
        map.insert(identity.to_string(), None);
        if let Err(e) = self.persist_locked(&map) {
            map.remove(identity);
            return Err(e);
        }
        Ok(())
    }

    /// Store or overwrite the embedding of a provisioned identity.
    ///
    /// Fails with [`StoreError::IdentityNotFound`] (no mutation) when the
    /// key was never provisioned.
    pub fn upsert(&self, identity: &str, embedding: Vec<f32>) -> Result<(), StoreError> {
        if embedding.len() != self.dim {
            return Err(StoreError::DimensionMismatch {
                expected: self.dim,
                got: embedding.len(),
            });
        }

        let mut map = self.inner.write();
        let previous = match map.get_mut(identity) {
            Some(slot) => slot.replace(embedding),
            None => return Err(StoreError::IdentityNotFound(identity.to_string())),
        };
        if let Err(e) = self.persist_locked(&map) {
            if let Some(slot) = map.get_mut(identity) {
                *slot = previous;
            }
            return Err(e);
        }
        Ok(())
    }

    /// Every identity that has a non-null embedding.
    pub fn get_all_with_embedding(&self) -> Vec<(String, Vec<f32>)> {
        self.inner
            .read()
            .iter()
            .filter_map(|(identity, embedding)| {
                embedding
                    .as_ref()
                    .map(|e| (identity.clone(), e.clone()))
            })
            .collect()
    }

    /// Whether the identity has been provisioned (enrolled or not).
    pub fn contains(&self, identity: &str) -> bool {
        self.inner.read().contains_key(identity)
    }

    /// Number of provisioned identities.
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    /// Number of identities with an enrolled embedding.
    pub fn enrolled_len(&self) -> usize {
        self.inner
            .read()
            .values()
            .filter(|e| e.is_some())
            .count()
    }

    // Serialize under the caller's write lock, then atomically swap the file.
    fn persist_locked(
        &self,
        map: &BTreeMap<String, Option<Vec<f32>>>,
    ) -> Result<(), StoreError> {
        let snapshot = SnapshotRef {
            dim: self.dim,
            identities: map,
        };
        let json = serde_json::to_vec(&snapshot)?;

        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

//! Dense vector index
//!
//! An in-memory inner-product index over unit vectors with a JSON on-disk
//! representation. Row ids are monotonically increasing integers; on unit
//! vectors the inner product is cosine similarity.

use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("vector dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("index error: {0}")]
    Other(String),
}

#[derive(Serialize, Deserialize)]
struct IndexFile {
    dim: usize,
    vectors: Vec<Vec<f32>>,
}

pub struct VectorIndex {
    dim: usize,
    vectors: Vec<Vec<f32>>,
}

impl VectorIndex {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            vectors: Vec::new(),
        }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    /// Append a vector; the returned id is its permanent row number.
    pub fn add(&mut self, vector: Vec<f32>) -> Result<u64, IndexError> {
        if vector.len() != self.dim {
            return Err(IndexError::DimensionMismatch {
                expected: self.dim,
                got: vector.len(),
            });
        }
        let id = self.vectors.len() as u64;
        self.vectors.push(vector);
        Ok(id)
    }

    pub fn vector(&self, id: u64) -> Option<&[f32]> {
        self.vectors.get(id as usize).map(Vec::as_slice)
    }

    /// Top-k rows by inner product, descending.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<(u64, f32)> {
        if query.len() != self.dim || k == 0 {
            return Vec::new();
        }
        let mut scored: Vec<(u64, f32)> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(id, v)| {
                let dot: f32 = v.iter().zip(query.iter()).map(|(a, b)| a * b).sum();
                (id as u64, dot)
            })
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(k);
        scored
    }

    /// Drop every row. Ids restart from zero; only `rebuild_index` calls
    /// this, and it rewrites all store references in the same pass.
    pub fn clear(&mut self) {
        self.vectors.clear();
    }

    pub fn save(&self, path: &Path) -> Result<(), IndexError> {
        let parent = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(parent)?;
        let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
        serde_json::to_writer(&mut tmp, &IndexFile {
            dim: self.dim,
            vectors: self.vectors.clone(),
        })?;
        tmp.write_all(b"\n")?;
        tmp.persist(path)
            .map_err(|e| IndexError::Other(format!("failed to persist index: {e}")))?;
        info!(path = %path.display(), rows = self.vectors.len(), "index saved");
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, IndexError> {
        let raw = std::fs::read_to_string(path)?;
        let file: IndexFile = serde_json::from_str(&raw)?;
        for v in &file.vectors {
            if v.len() != file.dim {
                return Err(IndexError::DimensionMismatch {
                    expected: file.dim,
                    got: v.len(),
                });
            }
        }
        Ok(Self {
            dim: file.dim,
            vectors: file.vectors,
        })
    }

    /// Load the index, or synthesize an empty one when the file is absent
    /// or corrupt; `rebuild_index` restores the rows from the store.
    pub fn load_or_empty(path: &Path, dim: usize) -> Self {
        if !path.exists() {
            info!(path = %path.display(), "no index file, starting empty");
            return Self::new(dim);
        }
        match Self::load(path) {
            Ok(index) if index.dim == dim => {
                info!(path = %path.display(), rows = index.len(), "index loaded");
                index
            }
            Ok(index) => {
                warn!(
                    expected = dim,
                    got = index.dim,
                    "index dimension mismatch, starting empty"
                );
                Self::new(dim)
            }
            Err(e) => {
                warn!(error = %e, path = %path.display(), "failed to load index, starting empty");
                Self::new(dim)
            }
        }
    }
}

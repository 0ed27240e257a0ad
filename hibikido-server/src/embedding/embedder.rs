//! Text embedding
//!
//! Maps free text to a fixed-dimension unit vector. The production
//! implementation runs a sentence-embedding model through fastembed; the
//! trait seam lets tests substitute a deterministic embedder.

use std::sync::Mutex;

use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("empty embedding text")]
    EmptyText,

    #[error("unknown embedding model: {0}")]
    UnknownModel(String),

    #[error("embedding inference failed: {0}")]
    Inference(String),
}

/// Text → unit vector. The same text must yield the same vector across
/// calls; concurrent calls are permitted.
pub trait TextEmbedder: Send + Sync {
    fn dim(&self) -> usize;
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;
}

/// Sentence-embedding model behind fastembed.
pub struct SentenceEmbedder {
    // Inference is serialized per call; callers may embed concurrently.
    model: Mutex<TextEmbedding>,
    dim: usize,
    model_name: String,
}

impl SentenceEmbedder {
    pub fn new(model_name: &str) -> Result<Self, EmbeddingError> {
        let (model, dim) = resolve_model(model_name)?;
        info!(model = model_name, dim, "loading embedding model");
        let embedding = TextEmbedding::try_new(
            InitOptions::new(model).with_show_download_progress(false),
        )
        .map_err(|e| EmbeddingError::Inference(e.to_string()))?;
        Ok(Self {
            model: Mutex::new(embedding),
            dim,
            model_name: model_name.to_string(),
        })
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }
}

impl TextEmbedder for SentenceEmbedder {
    fn dim(&self) -> usize {
        self.dim
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(EmbeddingError::EmptyText);
        }
        let mut vectors = {
            let mut model = self
                .model
                .lock()
                .map_err(|_| EmbeddingError::Inference("embedder poisoned".to_string()))?;
            model
                .embed(vec![trimmed], None)
                .map_err(|e| EmbeddingError::Inference(e.to_string()))?
        };
        let vector = vectors
            .pop()
            .ok_or_else(|| EmbeddingError::Inference("model returned no vector".to_string()))?;
        Ok(normalize_unit(vector))
    }
}

fn resolve_model(name: &str) -> Result<(EmbeddingModel, usize), EmbeddingError> {
    match name {
        "all-MiniLM-L6-v2" | "sentence-transformers/all-MiniLM-L6-v2" => {
            Ok((EmbeddingModel::AllMiniLML6V2, 384))
        }
        "all-MiniLM-L12-v2" | "sentence-transformers/all-MiniLM-L12-v2" => {
            Ok((EmbeddingModel::AllMiniLML12V2, 384))
        }
        "bge-small-en-v1.5" | "BAAI/bge-small-en-v1.5" => {
            Ok((EmbeddingModel::BGESmallENV15, 384))
        }
        other => Err(EmbeddingError::UnknownModel(other.to_string())),
    }
}

/// Scale to unit length. Model outputs are normalized already; this pins
/// the invariant regardless of backend.
fn normalize_unit(mut v: Vec<f32>) -> Vec<f32> {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
    v
}

//! Semantic retrieval: embedder, vector index, retriever

pub mod embedder;
pub mod index;
pub mod retriever;

pub use embedder::{EmbeddingError, SentenceEmbedder, TextEmbedder};
pub use index::{IndexError, VectorIndex};
pub use retriever::{Hit, HitCollection, RebuildStats};

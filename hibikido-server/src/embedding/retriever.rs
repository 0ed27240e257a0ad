//! Retrieval pipeline
//!
//! Turns a query string into an ordered list of candidate hits by running
//! the embedder over the query, the index over the embedding, and the
//! store over the resulting row ids. Also owns the full index rebuild,
//! which is the only operation allowed to reassign row ids.

use hibikido_common::db::Store;
use hibikido_common::text::{compose_embedding_text, compose_preset_embedding_text};
use serde_json::json;
use tracing::{info, warn};

use super::embedder::{EmbeddingError, TextEmbedder};
use super::index::VectorIndex;

/// Which collection a hit was resolved from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HitCollection {
    Segments,
    Presets,
}

impl HitCollection {
    pub fn as_str(&self) -> &'static str {
        match self {
            HitCollection::Segments => "segments",
            HitCollection::Presets => "presets",
        }
    }
}

/// One retrieval candidate, carrying everything needed to announce it.
#[derive(Debug, Clone)]
pub struct Hit {
    pub score: f32,
    pub collection: HitCollection,
    pub entity_id: u64,
    pub path: String,
    pub description: String,
    pub start: f64,
    pub end: f64,
    pub metadata_json: String,
    pub bark_raw: Vec<f32>,
    pub bark_norm: f32,
    pub duration: f64,
}

/// Search the index and resolve hits through the store. Hits scoring
/// below `min_score` are dropped; order is score-descending.
pub fn search(
    store: &Store,
    index: &VectorIndex,
    embedder: &dyn TextEmbedder,
    query: &str,
    top_k: usize,
    min_score: f32,
) -> Result<Vec<Hit>, EmbeddingError> {
    if index.is_empty() {
        return Ok(Vec::new());
    }
    let query_vector = embedder.embed(query)?;
    Ok(resolve(store, index, &query_vector, top_k, min_score))
}

/// Resolve an already-embedded query against the index and store.
pub fn resolve(
    store: &Store,
    index: &VectorIndex,
    query_vector: &[f32],
    top_k: usize,
    min_score: f32,
) -> Vec<Hit> {
    let mut hits = Vec::new();

    for (row, score) in index.search(query_vector, top_k) {
        if score < min_score {
            continue;
        }
        if let Some(segment) = store.segment_by_index_id(row) {
            hits.push(Hit {
                score,
                collection: HitCollection::Segments,
                entity_id: segment.id,
                path: segment.source_path.clone(),
                description: segment.description.clone(),
                start: segment.start,
                end: segment.end,
                metadata_json: json!({ "segment_id": segment.id.to_string() }).to_string(),
                bark_raw: segment.bark_raw.clone(),
                bark_norm: segment.bark_norm,
                duration: segment.duration,
            });
        } else if let Some(preset) = store.preset_by_index_id(row) {
            hits.push(Hit {
                score,
                collection: HitCollection::Presets,
                entity_id: preset.id,
                path: preset.effect_path.clone(),
                description: preset.description.clone(),
                start: 0.0,
                end: 1.0,
                metadata_json: json!({
                    "preset_id": preset.id.to_string(),
                    "effect_path": preset.effect_path,
                    "parameters": preset.parameters,
                })
                .to_string(),
                bark_raw: Vec::new(),
                bark_norm: 0.0,
                duration: 0.0,
            });
        } else {
            warn!(row, "index row has no store entity");
        }
    }
    hits
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RebuildStats {
    pub segments_indexed: usize,
    pub presets_indexed: usize,
    pub errors: usize,
}

/// Rebuild the index from the store: clear it, re-derive each entity's
/// embedding text, re-embed, and rewrite every `index_id` in one pass.
/// Entities with empty embedding text end up un-indexed.
pub fn rebuild(
    store: &mut Store,
    index: &mut VectorIndex,
    embedder: &dyn TextEmbedder,
) -> RebuildStats {
    let mut stats = RebuildStats::default();
    index.clear();

    // Re-derive segment embedding texts from current descriptions
    let segment_texts: Vec<(u64, String)> = store
        .segments
        .iter()
        .map(|segment| {
            let recording_description = store
                .recording_by_path(&segment.source_path)
                .map(|r| r.description.clone())
                .unwrap_or_default();
            (
                segment.id,
                compose_embedding_text(&segment.description, &recording_description, &[]),
            )
        })
        .collect();

    for (segment_id, text) in segment_texts {
        let new_index_id = embed_row(index, embedder, &text, &mut stats);
        if new_index_id.is_some() {
            stats.segments_indexed += 1;
        }
        if let Some(segment) = store.segments.get_mut(segment_id) {
            segment.embedding_text = text;
            segment.index_id = new_index_id;
        }
    }

    let preset_texts: Vec<(u64, String)> = store
        .presets
        .iter()
        .map(|preset| {
            let effect_description = store
                .effect_by_path(&preset.effect_path)
                .map(|e| e.description.clone())
                .unwrap_or_default();
            (
                preset.id,
                compose_preset_embedding_text(&preset.description, &effect_description),
            )
        })
        .collect();

    for (preset_id, text) in preset_texts {
        let new_index_id = embed_row(index, embedder, &text, &mut stats);
        if new_index_id.is_some() {
            stats.presets_indexed += 1;
        }
        if let Some(preset) = store.presets.get_mut(preset_id) {
            preset.embedding_text = text;
            preset.index_id = new_index_id;
        }
    }

    info!(
        segments = stats.segments_indexed,
        presets = stats.presets_indexed,
        errors = stats.errors,
        "index rebuilt"
    );
    stats
}

fn embed_row(
    index: &mut VectorIndex,
    embedder: &dyn TextEmbedder,
    text: &str,
    stats: &mut RebuildStats,
) -> Option<u64> {
    if text.trim().is_empty() {
        return None;
    }
    let vector = match embedder.embed(text) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "embedding failed during rebuild");
            stats.errors += 1;
            return None;
        }
    };
    match index.add(vector) {
        Ok(id) => Some(id),
        Err(e) => {
            warn!(error = %e, "index add failed during rebuild");
            stats.errors += 1;
            None
        }
    }
}

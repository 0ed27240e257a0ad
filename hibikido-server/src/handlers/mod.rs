//! Command handlers
//!
//! The controller glues the store, index, embedder, analyzer and
//! orchestrator together behind the inbound command set. Ingest commands
//! are atomic: analysis and embedding run before any state is touched, so
//! a failure persists nothing.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use hibikido_common::config::ServerConfig;
use hibikido_common::db::models::{Effect, Preset, Recording, Segment};
use hibikido_common::db::Store;
use hibikido_common::text::{compose_embedding_text, compose_preset_embedding_text};
use hibikido_common::{Error, Result};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::analysis::{Analysis, AudioAnalyzer};
use crate::embedding::{retriever, TextEmbedder, VectorIndex};
use crate::orchestrator::{Announcement, Orchestrator};
use crate::osc::transport::StatsSnapshot;
use crate::osc::{Command, Outbound};
use crate::semantic::DescriptionGenerator;

/// Whether the dispatch loop keeps running after a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

pub struct Controller {
    config: ServerConfig,
    store: Arc<Mutex<Store>>,
    index: Arc<Mutex<VectorIndex>>,
    embedder: Arc<dyn TextEmbedder>,
    analyzer: Arc<AudioAnalyzer>,
    orchestrator: Arc<Orchestrator>,
    outbound: mpsc::UnboundedSender<Outbound>,
    generator: Option<DescriptionGenerator>,
    session_id: u64,
}

impl Controller {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: ServerConfig,
        store: Arc<Mutex<Store>>,
        index: Arc<Mutex<VectorIndex>>,
        embedder: Arc<dyn TextEmbedder>,
        orchestrator: Arc<Orchestrator>,
        outbound: mpsc::UnboundedSender<Outbound>,
    ) -> Self {
        let generator = config
            .semantic
            .api_key
            .clone()
            .map(DescriptionGenerator::new);
        let session_id = store.lock().unwrap().open_session();
        Self {
            config,
            store,
            index,
            embedder,
            analyzer: Arc::new(AudioAnalyzer::new()),
            orchestrator,
            outbound,
            generator,
            session_id,
        }
    }

    /// Execute one command, sending replies on the outbound channel.
    pub async fn handle(&self, command: Command) -> Flow {
        let result = match command {
            Command::Invoke { text } => self.handle_invoke(&text).await,
            Command::AddRecording { path, description } => {
                self.handle_add_recording(&path, &description).await
            }
            Command::AddSegment {
                path,
                description,
                start,
                end,
            } => self.handle_add_segment(&path, &description, start, end).await,
            Command::AddEffect { path, metadata } => self.handle_add_effect(&path, &metadata).await,
            Command::AddPreset {
                description,
                metadata,
            } => self.handle_add_preset(&description, &metadata).await,
            Command::RebuildIndex => self.handle_rebuild_index().await,
            Command::Stats => self.handle_stats(),
            Command::ListSegments { limit } => self.handle_list_segments(limit),
            Command::GetSegmentField { id, field_path } => {
                self.handle_get_segment_field(id, &field_path)
            }
            Command::GenerateDescription {
                collection,
                id,
                force,
            } => self.handle_generate_description(&collection, id, force).await,
            Command::Save => self.handle_save(),
            Command::Stop => {
                self.send(Outbound::Confirm("stopping".to_string()));
                return Flow::Stop;
            }
        };

        match result {
            Ok(Some(confirmation)) => self.send(Outbound::Confirm(confirmation)),
            Ok(None) => {}
            Err(e) => {
                warn!(error = %e, "command failed");
                self.send(Outbound::Error(e.to_string()));
            }
        }
        Flow::Continue
    }

    fn send(&self, message: Outbound) {
        if self.outbound.send(message).is_err() {
            warn!("outbound channel closed");
        }
    }

    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    async fn handle_invoke(&self, text: &str) -> Result<Option<String>> {
        info!(invocation = text, "invoke");
        let query_vector = self.embed_blocking(text.to_string()).await?;

        let hits = {
            let store = self.store.lock().unwrap();
            let index = self.index.lock().unwrap();
            retriever::resolve(
                &store,
                &index,
                &query_vector,
                self.config.search.top_k,
                self.config.search.min_score,
            )
        };

        // Only segment hits are announced; preset hits stay on a dormant
        // channel.
        let segment_hits: Vec<_> = hits
            .into_iter()
            .filter(|h| h.collection == retriever::HitCollection::Segments)
            .collect();

        let queued = segment_hits.len();
        let now = self.orchestrator.clock().now();
        self.store
            .lock()
            .unwrap()
            .log_invocation(self.session_id, text, now, queued as u32);

        // Confirm first: manifests then stream out as niches permit
        self.send(Outbound::Confirm(format!(
            "invoked: {queued} resonances queued"
        )));

        for (i, hit) in segment_hits.into_iter().enumerate() {
            self.orchestrator.enqueue(Announcement {
                index: i as u32,
                collection: hit.collection.as_str().to_string(),
                score: hit.score,
                path: hit.path,
                description: hit.description,
                start: hit.start,
                end: hit.end,
                metadata_json: hit.metadata_json,
                segment_id: hit.entity_id,
                bark_raw: hit.bark_raw,
                bark_norm: hit.bark_norm,
                duration: hit.duration,
            });
        }

        Ok(None)
    }

    async fn handle_add_recording(&self, path: &str, description: &str) -> Result<Option<String>> {
        info!(path, "add_recording");
        {
            let store = self.store.lock().unwrap();
            if store.recording_by_path(path).is_some() {
                return Err(Error::InvalidInput(format!(
                    "recording already exists: {path}"
                )));
            }
        }

        // Analyze and embed before touching any state
        let analysis = self.analyze_blocking(self.resolve_audio_path(path), 0.0, 1.0).await?;
        let embedding_text = compose_embedding_text(description, description, &[]);
        let vector = self.embed_blocking(embedding_text.clone()).await?;

        {
            let mut store = self.store.lock().unwrap();
            let mut index = self.index.lock().unwrap();

            // Index first: a failed add must leave the store untouched
            let index_id = index
                .add(vector)
                .map_err(|e| Error::Internal(format!("add_recording failed: {e}")))?;

            store.add_recording(Recording {
                id: 0,
                path: path.to_string(),
                description: description.to_string(),
                duration: analysis.duration,
                features: Some(analysis.features.clone()),
                ai_description: None,
                created_at: Utc::now(),
            })?;
            // The auto-segment inherits the recording description
            store
                .segments
                .insert(segment_record(path, description, 0.0, 1.0, embedding_text, index_id, &analysis));

            store.save_all()?;
            index
                .save(&self.config.embedding.index_file)
                .map_err(|e| Error::Internal(format!("failed to save index: {e}")))?;
        }

        Ok(Some(format!(
            "added recording: {path} with auto-segment"
        )))
    }

    async fn handle_add_segment(
        &self,
        path: &str,
        description: &str,
        start: f64,
        end: f64,
    ) -> Result<Option<String>> {
        info!(path, start, end, "add_segment");
        let recording_description = {
            let store = self.store.lock().unwrap();
            store
                .recording_by_path(path)
                .map(|r| r.description.clone())
                .ok_or_else(|| Error::NotFound(format!("recording not found: {path}")))?
        };

        let analysis = self
            .analyze_blocking(self.resolve_audio_path(path), start, end)
            .await?;
        let embedding_text = compose_embedding_text(description, &recording_description, &[]);
        let vector = self.embed_blocking(embedding_text.clone()).await?;

        {
            let mut store = self.store.lock().unwrap();
            let mut index = self.index.lock().unwrap();
            let index_id = index
                .add(vector)
                .map_err(|e| Error::Internal(format!("add_segment failed: {e}")))?;
            store
                .segments
                .insert(segment_record(path, description, start, end, embedding_text, index_id, &analysis));
            store.save_all()?;
            index
                .save(&self.config.embedding.index_file)
                .map_err(|e| Error::Internal(format!("failed to save index: {e}")))?;
        }

        Ok(Some(format!("added segment for {path} [{start}-{end}]")))
    }

    async fn handle_add_effect(
        &self,
        path: &str,
        metadata: &serde_json::Value,
    ) -> Result<Option<String>> {
        info!(path, "add_effect");
        let name = metadata
            .get("name")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| {
                PathBuf::from(path)
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_else(|| path.to_string())
            });
        let description = metadata
            .get("description")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| format!("effect: {name}"));

        {
            let store = self.store.lock().unwrap();
            if store.effect_by_path(path).is_some() {
                return Err(Error::InvalidInput(format!("effect already exists: {path}")));
            }
        }

        // Default preset rides along with every effect
        let preset_description = format!("default preset: {description}");
        let embedding_text = compose_preset_embedding_text(&preset_description, &description);
        let vector = self.embed_blocking(embedding_text.clone()).await?;

        {
            let mut store = self.store.lock().unwrap();
            let mut index = self.index.lock().unwrap();

            // Index first: a failed add must leave the store untouched
            let index_id = index
                .add(vector)
                .map_err(|e| Error::Internal(format!("add_effect failed: {e}")))?;

            store.add_effect(Effect {
                id: 0,
                path: path.to_string(),
                name,
                description: description.clone(),
                created_at: Utc::now(),
            })?;

            store.presets.insert(Preset {
                id: 0,
                effect_path: path.to_string(),
                description: preset_description,
                parameters: Vec::new(),
                embedding_text,
                index_id: Some(index_id),
                created_at: Utc::now(),
            });

            store.save_all()?;
            index
                .save(&self.config.embedding.index_file)
                .map_err(|e| Error::Internal(format!("failed to save index: {e}")))?;
        }

        Ok(Some(format!("added effect: {path} with default preset")))
    }

    async fn handle_add_preset(
        &self,
        description: &str,
        metadata: &serde_json::Value,
    ) -> Result<Option<String>> {
        let effect_path = metadata
            .get("effect_path")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| Error::InvalidInput("effect_path required in metadata".to_string()))?;
        info!(effect_path, "add_preset");

        let parameters: Vec<f32> = metadata
            .get("parameters")
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_f64())
                    .map(|v| v as f32)
                    .collect()
            })
            .unwrap_or_default();

        let effect_description = {
            let store = self.store.lock().unwrap();
            store
                .effect_by_path(&effect_path)
                .map(|e| e.description.clone())
                .ok_or_else(|| Error::NotFound(format!("effect not found: {effect_path}")))?
        };

        let embedding_text = compose_preset_embedding_text(description, &effect_description);
        let vector = self.embed_blocking(embedding_text.clone()).await?;

        {
            let mut store = self.store.lock().unwrap();
            let mut index = self.index.lock().unwrap();
            let index_id = index
                .add(vector)
                .map_err(|e| Error::Internal(format!("add_preset failed: {e}")))?;
            store.presets.insert(Preset {
                id: 0,
                effect_path: effect_path.clone(),
                description: description.to_string(),
                parameters,
                embedding_text,
                index_id: Some(index_id),
                created_at: Utc::now(),
            });
            store.save_all()?;
            index
                .save(&self.config.embedding.index_file)
                .map_err(|e| Error::Internal(format!("failed to save index: {e}")))?;
        }

        Ok(Some(format!("added preset for {effect_path}")))
    }

    async fn handle_rebuild_index(&self) -> Result<Option<String>> {
        info!("rebuild_index");
        let store = self.store.clone();
        let index = self.index.clone();
        let embedder = self.embedder.clone();
        let index_file = self.config.embedding.index_file.clone();

        let stats = tokio::task::spawn_blocking(move || -> Result<retriever::RebuildStats> {
            let mut store = store.lock().unwrap();
            let mut index = index.lock().unwrap();
            let stats = retriever::rebuild(&mut store, &mut index, embedder.as_ref());
            store.save_all()?;
            index
                .save(&index_file)
                .map_err(|e| Error::Internal(format!("failed to save index: {e}")))?;
            Ok(stats)
        })
        .await
        .map_err(|e| Error::Internal(format!("rebuild task failed: {e}")))??;

        let mut message = format!(
            "index rebuilt: {} segments, {} presets",
            stats.segments_indexed, stats.presets_indexed
        );
        if stats.errors > 0 {
            message.push_str(&format!(" ({} errors)", stats.errors));
        }
        Ok(Some(message))
    }

    fn handle_stats(&self) -> Result<Option<String>> {
        let (store_stats, embeddings) = {
            let store = self.store.lock().unwrap();
            let index = self.index.lock().unwrap();
            (store.stats(), index.len())
        };
        let snapshot = StatsSnapshot {
            recordings: store_stats.recordings,
            segments: store_stats.segments,
            effects: store_stats.effects,
            presets: store_stats.presets,
            embeddings,
            active_niches: self.orchestrator.active_niches(),
            queued: self.orchestrator.queued(),
        };
        self.send(Outbound::StatsResult(snapshot));

        Ok(Some(format!(
            "database: {} recordings, {} segments, {} effects, {} presets. index: {} embeddings. orchestrator: {} active, {} queued",
            snapshot.recordings,
            snapshot.segments,
            snapshot.effects,
            snapshot.presets,
            snapshot.embeddings,
            snapshot.active_niches,
            snapshot.queued,
        )))
    }

    fn handle_list_segments(&self, limit: usize) -> Result<Option<String>> {
        let store = self.store.lock().unwrap();
        let mut listed = 0usize;
        for segment in store.segments.iter().take(limit) {
            self.send(Outbound::Confirm(format!(
                "segment {}: {}",
                segment.id, segment.description
            )));
            listed += 1;
        }
        Ok(Some(format!("listed {listed} segments")))
    }

    fn handle_get_segment_field(&self, id: u64, field_path: &str) -> Result<Option<String>> {
        let value = self.store.lock().unwrap().segment_field(id, field_path)?;
        self.send(Outbound::SegmentField {
            id,
            field_path: field_path.to_string(),
            value: value.to_string(),
        });
        Ok(None)
    }

    async fn handle_generate_description(
        &self,
        collection: &str,
        id: u64,
        force: bool,
    ) -> Result<Option<String>> {
        // Sent verbatim: this reply text is part of the wire contract
        let generator = match self.generator.as_ref() {
            Some(generator) => generator,
            None => {
                self.send(Outbound::Error(
                    "description generation unavailable".to_string(),
                ));
                return Ok(None);
            }
        };

        let (features, existing) = {
            let store = self.store.lock().unwrap();
            match collection {
                "segments" => {
                    let segment = store
                        .segments
                        .get(id)
                        .ok_or_else(|| Error::NotFound(format!("segment {id}")))?;
                    (segment.features.clone(), segment.ai_description.clone())
                }
                "recordings" => {
                    let recording = store
                        .recordings
                        .get(id)
                        .ok_or_else(|| Error::NotFound(format!("recording {id}")))?;
                    (recording.features.clone(), recording.ai_description.clone())
                }
                other => {
                    return Err(Error::InvalidInput(format!("unknown collection: {other}")))
                }
            }
        };

        if existing.is_some() && !force {
            return Ok(Some(format!(
                "description exists for {collection} {id} (use \"force\" to regenerate)"
            )));
        }
        let features = features.ok_or_else(|| {
            Error::InvalidInput(format!("{collection} {id} has no stored analysis"))
        })?;

        let description = generator
            .generate(&features)
            .await
            .map_err(|e| Error::Internal(format!("generate_description failed: {e}")))?;

        {
            let mut store = self.store.lock().unwrap();
            match collection {
                "segments" => {
                    if let Some(segment) = store.segments.get_mut(id) {
                        segment.ai_description = Some(description.clone());
                    }
                }
                _ => {
                    if let Some(recording) = store.recordings.get_mut(id) {
                        recording.ai_description = Some(description.clone());
                    }
                }
            }
            store.save_all()?;
        }

        Ok(Some(format!(
            "generated description for {collection} {id}: {description}"
        )))
    }

    fn handle_save(&self) -> Result<Option<String>> {
        self.store.lock().unwrap().save_all()?;
        self.index
            .lock()
            .unwrap()
            .save(&self.config.embedding.index_file)
            .map_err(|e| Error::Internal(format!("index save failed: {e}")))?;
        Ok(Some("saved database and index".to_string()))
    }

    /// Persist everything on shutdown.
    pub fn persist(&self) -> Result<()> {
        self.store.lock().unwrap().save_all()?;
        self.index
            .lock()
            .unwrap()
            .save(&self.config.embedding.index_file)
            .map_err(|e| Error::Internal(format!("index save failed: {e}")))?;
        Ok(())
    }

    fn resolve_audio_path(&self, relative: &str) -> PathBuf {
        self.config.audio.audio_directory.join(relative)
    }

    async fn analyze_blocking(&self, path: PathBuf, start: f64, end: f64) -> Result<Analysis> {
        let analyzer = self.analyzer.clone();
        tokio::task::spawn_blocking(move || analyzer.analyze_file(&path, start, end))
            .await
            .map_err(|e| Error::Internal(format!("analysis task failed: {e}")))?
            .map_err(|e| Error::InvalidInput(format!("analysis failed: {e}")))
    }

    async fn embed_blocking(&self, text: String) -> Result<Vec<f32>> {
        let embedder = self.embedder.clone();
        tokio::task::spawn_blocking(move || embedder.embed(&text))
            .await
            .map_err(|e| Error::Internal(format!("embedding task failed: {e}")))?
            .map_err(|e| Error::InvalidInput(format!("embedding failed: {e}")))
    }
}

fn segment_record(
    path: &str,
    description: &str,
    start: f64,
    end: f64,
    embedding_text: String,
    index_id: u64,
    analysis: &Analysis,
) -> Segment {
    Segment {
        id: 0,
        source_path: path.to_string(),
        start,
        end,
        description: description.to_string(),
        ai_description: None,
        embedding_text,
        index_id: Some(index_id),
        features: Some(analysis.features.clone()),
        bark_raw: analysis.bark_raw.clone(),
        bark_norm: analysis.bark_norm,
        onsets_low_mid: analysis.onsets_low_mid.clone(),
        onsets_mid: analysis.onsets_mid.clone(),
        onsets_high_mid: analysis.onsets_high_mid.clone(),
        duration: analysis.duration,
        created_at: Utc::now(),
    }
}

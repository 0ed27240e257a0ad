//! Document store
//!
//! Durable catalog of recordings, segments, effects, presets and sessions.
//! One JSON document per collection inside the configured `data_dir`;
//! writes go through temp-file + rename so on-disk state stays consistent.

pub mod collection;
pub mod models;

use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use crate::{Error, Result};
use self::collection::Collection;
use self::models::{Effect, Invocation, Preset, Recording, Segment, Session};

/// Counts reported by `stats`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreStats {
    pub recordings: usize,
    pub segments: usize,
    pub effects: usize,
    pub presets: usize,
}

pub struct Store {
    data_dir: PathBuf,
    pub recordings: Collection<Recording>,
    pub segments: Collection<Segment>,
    pub effects: Collection<Effect>,
    pub presets: Collection<Preset>,
    pub sessions: Collection<Session>,
}

impl Store {
    /// Open (or create) the store rooted at `data_dir`.
    pub fn open(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        let store = Self {
            data_dir: data_dir.to_path_buf(),
            recordings: Collection::open(data_dir.join("recordings.json"))?,
            segments: Collection::open(data_dir.join("segments.json"))?,
            effects: Collection::open(data_dir.join("effects.json"))?,
            presets: Collection::open(data_dir.join("presets.json"))?,
            sessions: Collection::open(data_dir.join("sessions.json"))?,
        };
        info!(
            data_dir = %data_dir.display(),
            recordings = store.recordings.len(),
            segments = store.segments.len(),
            "store opened"
        );
        Ok(store)
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Add a recording. The path is the unique identifier; adding a path
    /// that already exists is an input error.
    pub fn add_recording(&mut self, recording: Recording) -> Result<u64> {
        if self.recording_by_path(&recording.path).is_some() {
            return Err(Error::InvalidInput(format!(
                "recording already exists: {}",
                recording.path
            )));
        }
        Ok(self.recordings.insert(recording))
    }

    pub fn recording_by_path(&self, path: &str) -> Option<&Recording> {
        self.recordings.find(|r| r.path == path)
    }

    pub fn segment_by_index_id(&self, index_id: u64) -> Option<&Segment> {
        self.segments.find(|s| s.index_id == Some(index_id))
    }

    pub fn add_effect(&mut self, effect: Effect) -> Result<u64> {
        if self.effect_by_path(&effect.path).is_some() {
            return Err(Error::InvalidInput(format!(
                "effect already exists: {}",
                effect.path
            )));
        }
        Ok(self.effects.insert(effect))
    }

    pub fn effect_by_path(&self, path: &str) -> Option<&Effect> {
        self.effects.find(|e| e.path == path)
    }

    pub fn preset_by_index_id(&self, index_id: u64) -> Option<&Preset> {
        self.presets.find(|p| p.index_id == Some(index_id))
    }

    /// Open a fresh session log and return its id.
    pub fn open_session(&mut self) -> u64 {
        self.sessions.insert(Session {
            id: 0,
            session_key: Uuid::new_v4().to_string(),
            invocations: Vec::new(),
            created_at: Utc::now(),
        })
    }

    /// Append an invocation to the session log.
    pub fn log_invocation(&mut self, session_id: u64, text: &str, time: f64, hits: u32) {
        if let Some(session) = self.sessions.get_mut(session_id) {
            session.invocations.push(Invocation {
                text: text.to_string(),
                time,
                hits,
            });
        }
    }

    /// Project a dotted field path out of a segment record, e.g.
    /// `features.spectral_centroid_mean` or `bark_norm`.
    pub fn segment_field(&self, id: u64, field_path: &str) -> Result<serde_json::Value> {
        let segment = self
            .segments
            .get(id)
            .ok_or_else(|| Error::NotFound(format!("segment {id}")))?;
        let mut value = serde_json::to_value(segment)?;
        for key in field_path.split('.') {
            value = match value {
                serde_json::Value::Object(mut map) => map
                    .remove(key)
                    .ok_or_else(|| Error::NotFound(format!("field {field_path}")))?,
                serde_json::Value::Array(mut items) => {
                    let idx: usize = key
                        .parse()
                        .map_err(|_| Error::NotFound(format!("field {field_path}")))?;
                    if idx >= items.len() {
                        return Err(Error::NotFound(format!("field {field_path}")));
                    }
                    items.swap_remove(idx)
                }
                _ => return Err(Error::NotFound(format!("field {field_path}"))),
            };
        }
        Ok(value)
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            recordings: self.recordings.len(),
            segments: self.segments.len(),
            effects: self.effects.len(),
            presets: self.presets.len(),
        }
    }

    /// Persist every collection.
    pub fn save_all(&self) -> Result<()> {
        self.recordings.save()?;
        self.segments.save()?;
        self.effects.save()?;
        self.presets.save()?;
        self.sessions.save()?;
        Ok(())
    }
}

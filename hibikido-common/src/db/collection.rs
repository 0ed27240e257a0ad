//! Generic JSON-backed collection
//!
//! Each collection is one JSON document on disk: an array of records keyed
//! by a small integer id. Records live in memory; `save` rewrites the
//! document atomically (temp file + rename) so a crash mid-write never
//! leaves a torn document behind.

use std::io::Write;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use super::models::Record;
use crate::{Error, Result};

pub struct Collection<T> {
    path: PathBuf,
    records: Vec<T>,
    next_id: u64,
}

impl<T: Record + Serialize + DeserializeOwned> Collection<T> {
    /// Load the collection from `path`, or start empty when the document
    /// does not exist yet.
    pub fn open(path: PathBuf) -> Result<Self> {
        let records: Vec<T> = if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            serde_json::from_str(&raw)?
        } else {
            Vec::new()
        };
        let next_id = records.iter().map(|r| r.id() + 1).max().unwrap_or(1);
        debug!(
            path = %path.display(),
            count = records.len(),
            "opened collection"
        );
        Ok(Self {
            path,
            records,
            next_id,
        })
    }

    /// Insert a record, assigning the next integer id. Returns the id.
    pub fn insert(&mut self, mut record: T) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        record.set_id(id);
        self.records.push(record);
        id
    }

    pub fn get(&self, id: u64) -> Option<&T> {
        self.records.iter().find(|r| r.id() == id)
    }

    pub fn get_mut(&mut self, id: u64) -> Option<&mut T> {
        self.records.iter_mut().find(|r| r.id() == id)
    }

    pub fn find<P: Fn(&T) -> bool>(&self, predicate: P) -> Option<&T> {
        self.records.iter().find(|r| predicate(r))
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.records.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.records.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Persist the collection: serialize to a temp file in the same
    /// directory, then rename over the document.
    pub fn save(&self) -> Result<()> {
        let parent = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(parent)?;

        let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
        serde_json::to_writer_pretty(&mut tmp, &self.records)?;
        tmp.write_all(b"\n")?;
        tmp.persist(&self.path)
            .map_err(|e| Error::Internal(format!("failed to persist {}: {e}", self.path.display())))?;
        debug!(path = %self.path.display(), count = self.records.len(), "saved collection");
        Ok(())
    }
}

//! Configuration loading
//!
//! The server is configured from a single JSON file whose path is passed on
//! startup. Every section has compiled defaults, so a partial (or absent)
//! file still yields a runnable configuration.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Top-level server configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub database: DatabaseConfig,
    pub embedding: EmbeddingConfig,
    pub transport: TransportConfig,
    pub search: SearchConfig,
    pub orchestrator: OrchestratorConfig,
    pub audio: AudioConfig,
    pub semantic: SemanticConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Directory holding one JSON document per collection
    pub data_dir: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("hibikido-data/database"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Sentence embedding model identifier
    pub model_name: String,
    /// Serialized vector index file
    pub index_file: PathBuf,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model_name: "all-MiniLM-L6-v2".to_string(),
            index_file: PathBuf::from("hibikido-data/hibikido.index"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub listen_ip: String,
    pub listen_port: u16,
    pub send_ip: String,
    pub send_port: u16,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            listen_ip: "127.0.0.1".to_string(),
            listen_port: 9000,
            send_ip: "127.0.0.1".to_string(),
            send_port: 9001,
        }
    }
}

impl TransportConfig {
    pub fn listen_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.listen_ip, self.listen_port)
            .parse()
            .map_err(|e| Error::Config(format!("invalid listen address: {e}")))
    }

    pub fn send_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.send_ip, self.send_port)
            .parse()
            .map_err(|e| Error::Config(format!("invalid send address: {e}")))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Maximum number of hits returned per invocation
    pub top_k: usize,
    /// Hits scoring below this are discarded
    pub min_score: f32,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            top_k: 10,
            min_score: 0.3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Bark-band cosine similarity at or above which two sounds conflict
    pub bark_similarity_threshold: f32,
    /// Period of the background niche-expiry tick
    pub tick_interval_seconds: f64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            bark_similarity_threshold: 0.5,
            tick_interval_seconds: 0.1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Root directory for relative recording paths
    pub audio_directory: PathBuf,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            audio_directory: PathBuf::from("hibikido-data/audio"),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SemanticConfig {
    /// API key for the optional description-generation collaborator
    pub api_key: Option<String>,
}

impl ServerConfig {
    /// Load configuration from a JSON file, falling back to defaults for
    /// absent sections and keys.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read {}: {e}", path.display())))?;
        serde_json::from_str(&raw)
            .map_err(|e| Error::Config(format!("failed to parse {}: {e}", path.display())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_contract() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.search.top_k, 10);
        assert!((cfg.search.min_score - 0.3).abs() < 1e-6);
        assert!((cfg.orchestrator.bark_similarity_threshold - 0.5).abs() < 1e-6);
        assert!((cfg.orchestrator.tick_interval_seconds - 0.1).abs() < 1e-9);
        assert_eq!(cfg.transport.listen_port, 9000);
        assert_eq!(cfg.transport.send_port, 9001);
        assert_eq!(cfg.embedding.model_name, "all-MiniLM-L6-v2");
        assert!(cfg.semantic.api_key.is_none());
    }

    #[test]
    fn partial_file_keeps_defaults_elsewhere() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"search": {{"top_k": 3}}, "orchestrator": {{"bark_similarity_threshold": 0.8}}}}"#
        )
        .unwrap();

        let cfg = ServerConfig::load(file.path()).unwrap();
        assert_eq!(cfg.search.top_k, 3);
        // min_score untouched by the partial section
        assert!((cfg.search.min_score - 0.3).abs() < 1e-6);
        assert!((cfg.orchestrator.bark_similarity_threshold - 0.8).abs() < 1e-6);
        assert_eq!(cfg.transport.listen_port, 9000);
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = ServerConfig::load(Path::new("/nonexistent/hibikido.json")).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn addresses_parse() {
        let cfg = ServerConfig::default();
        assert!(cfg.transport.listen_addr().is_ok());
        assert!(cfg.transport.send_addr().is_ok());
    }
}

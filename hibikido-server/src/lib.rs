//! hibikido-server - Semantic Audio Retrieval & Orchestration
//!
//! A client sends a free-text invocation over OSC; the server retrieves
//! matching audio segments by sentence-embedding similarity and gates each
//! match on Bark-band spectral occupancy before announcing it back for
//! playback. Components:
//!
//! - `analysis`: PCM decode, feature extraction, Bark bands, onset bands
//! - `embedding`: text embedder, vector index, retriever
//! - `orchestrator`: niche registry + FIFO manifestation queue
//! - `osc`: datagram transport (inbound commands, outbound messages)
//! - `handlers`: command implementations gluing the above together
//! - `semantic`: optional AI description generation
//! - `server`: wiring and lifecycle

pub mod analysis;
pub mod embedding;
pub mod handlers;
pub mod orchestrator;
pub mod osc;
pub mod semantic;
pub mod server;

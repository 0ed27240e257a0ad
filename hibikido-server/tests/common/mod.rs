//! Shared harness for the end-to-end command tests: a deterministic
//! embedder, a hand-driven clock, WAV fixtures, and a fully wired
//! controller with a captured outbound channel.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use hibikido_common::config::ServerConfig;
use hibikido_common::db::Store;
use hibikido_server::embedding::{EmbeddingError, TextEmbedder, VectorIndex};
use hibikido_server::handlers::Controller;
use hibikido_server::orchestrator::{clock::Clock, Orchestrator};
use hibikido_server::osc::Outbound;
use tokio::sync::mpsc;

/// Deterministic bag-of-words embedder: hashes words into buckets,
/// unit-normalized. Same text → same vector, related texts overlap.
pub struct HashEmbedder {
    dim: usize,
}

impl HashEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }
}

impl TextEmbedder for HashEmbedder {
    fn dim(&self) -> usize {
        self.dim
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if text.trim().is_empty() {
            return Err(EmbeddingError::EmptyText);
        }
        let mut v = vec![0.0f32; self.dim];
        for word in text.to_lowercase().split_whitespace() {
            let mut h: u64 = 1469598103934665603;
            for b in word.bytes() {
                h ^= b as u64;
                h = h.wrapping_mul(1099511628211);
            }
            v[(h % self.dim as u64) as usize] += 1.0;
        }
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in v.iter_mut() {
                *x /= norm;
            }
        }
        Ok(v)
    }
}

/// Hand-driven monotonic clock.
pub struct TestClock {
    seconds: AtomicU64,
}

impl TestClock {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            seconds: AtomicU64::new(0),
        })
    }

    pub fn advance(&self, seconds: f64) {
        let now = f64::from_bits(self.seconds.load(Ordering::SeqCst));
        self.seconds
            .store((now + seconds).to_bits(), Ordering::SeqCst);
    }
}

impl Clock for TestClock {
    fn now(&self) -> f64 {
        f64::from_bits(self.seconds.load(Ordering::SeqCst))
    }
}

/// Write a mono 16-bit sine fixture.
pub fn write_sine_wav(path: &Path, freq: f32, duration_s: f32, sample_rate: u32) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    let n = (duration_s * sample_rate as f32) as u32;
    for t in 0..n {
        let sample =
            (t as f32 * freq * 2.0 * std::f32::consts::PI / sample_rate as f32).sin() * 0.8;
        writer
            .write_sample((sample * i16::MAX as f32) as i16)
            .unwrap();
    }
    writer.finalize().unwrap();
}

pub struct Harness {
    pub controller: Controller,
    pub orchestrator: Arc<Orchestrator>,
    pub clock: Arc<TestClock>,
    pub outbound: mpsc::UnboundedReceiver<Outbound>,
    pub config: ServerConfig,
}

/// Wire a controller exactly the way the server does, but with the test
/// embedder and clock, rooted in `root`.
pub fn harness(root: &Path) -> Harness {
    harness_with_index_dim(root, 64)
}

/// Same wiring with an explicit index dimension; passing one that differs
/// from the embedder's forces every `index.add` to fail, for exercising
/// the ingest atomicity paths.
pub fn harness_with_index_dim(root: &Path, index_dim: usize) -> Harness {
    let mut config = ServerConfig::default();
    config.database.data_dir = root.join("database");
    config.audio.audio_directory = root.join("audio");
    config.embedding.index_file = root.join("hibikido.index");

    let embedder: Arc<dyn TextEmbedder> = Arc::new(HashEmbedder::new(64));
    let store = Arc::new(Mutex::new(Store::open(&config.database.data_dir).unwrap()));
    let index = Arc::new(Mutex::new(VectorIndex::load_or_empty(
        &config.embedding.index_file,
        index_dim,
    )));

    let clock = TestClock::new();
    let clock_handle: Arc<dyn Clock> = clock.clone();
    let orchestrator = Arc::new(Orchestrator::new(
        config.orchestrator.bark_similarity_threshold,
        clock_handle,
    ));

    let (tx, rx) = mpsc::unbounded_channel::<Outbound>();
    {
        let sink = tx.clone();
        orchestrator.on_manifest(Box::new(move |announcement| {
            sink.send(Outbound::Manifest(announcement.clone()))
                .map_err(|_| anyhow::anyhow!("outbound closed"))?;
            sink.send(Outbound::Niche {
                segment_id: announcement.segment_id,
                bark_raw: announcement.bark_raw.clone(),
            })
            .map_err(|_| anyhow::anyhow!("outbound closed"))?;
            Ok(())
        }));
    }

    let controller = Controller::new(
        config.clone(),
        store,
        index,
        embedder,
        orchestrator.clone(),
        tx,
    );

    Harness {
        controller,
        orchestrator,
        clock,
        outbound: rx,
        config,
    }
}

/// Drain every message currently buffered on the outbound channel.
pub fn drain(rx: &mut mpsc::UnboundedReceiver<Outbound>) -> Vec<Outbound> {
    let mut messages = Vec::new();
    while let Ok(msg) = rx.try_recv() {
        messages.push(msg);
    }
    messages
}

pub fn confirms(messages: &[Outbound]) -> Vec<String> {
    messages
        .iter()
        .filter_map(|m| match m {
            Outbound::Confirm(text) => Some(text.clone()),
            _ => None,
        })
        .collect()
}

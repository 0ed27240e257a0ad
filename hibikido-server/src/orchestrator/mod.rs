//! Orchestrator
//!
//! Holds the FIFO of pending announcements and the registry of active
//! niches (time-bounded occupancies of the Bark spectral space). An
//! announcement manifests only when its Bark vector does not collide with
//! any active niche; a conflicting queue head blocks the whole queue until
//! the colliding niche expires. There is no cancellation: once queued, an
//! announcement eventually manifests.

pub mod clock;

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tracing::{debug, error, info};

use crate::analysis::bark::{cosine, normalize};
pub use self::clock::{Clock, MonotonicClock};

/// A retrieval result authorized for (eventual) outbound emission.
#[derive(Debug, Clone)]
pub struct Announcement {
    /// Position of this hit within its invocation's batch
    pub index: u32,
    /// Source collection tag: `segments` or `presets`
    pub collection: String,
    pub score: f32,
    pub path: String,
    pub description: String,
    /// Normalized range within the source recording
    pub start: f64,
    pub end: f64,
    /// Opaque JSON blob passed through to the client
    pub metadata_json: String,
    /// Segment identity, used for same-segment conflict detection
    pub segment_id: u64,
    pub bark_raw: Vec<f32>,
    pub bark_norm: f32,
    /// Seconds the niche stays occupied once manifested
    pub duration: f64,
}

/// An active occupancy of the spectral space.
struct Niche {
    segment_id: u64,
    /// Unit-normalized Bark vector (zero vector for spectrally empty)
    bark_unit: Vec<f32>,
    end_time: f64,
}

pub type ManifestCallback = Box<dyn Fn(&Announcement) -> anyhow::Result<()> + Send + Sync>;

#[derive(Default)]
struct State {
    queue: VecDeque<Announcement>,
    niches: Vec<Niche>,
    callback: Option<ManifestCallback>,
}

pub struct Orchestrator {
    state: Mutex<State>,
    clock: Arc<dyn Clock>,
    bark_similarity_threshold: f32,
}

impl Orchestrator {
    pub fn new(bark_similarity_threshold: f32, clock: Arc<dyn Clock>) -> Self {
        info!(
            threshold = bark_similarity_threshold,
            "orchestrator initialized"
        );
        Self {
            state: Mutex::new(State::default()),
            clock,
            bark_similarity_threshold,
        }
    }

    /// Register the sink receiving manifested announcements. Called
    /// synchronously from whichever thread runs `tick`; must not block.
    pub fn on_manifest(&self, callback: ManifestCallback) {
        self.state.lock().unwrap().callback = Some(callback);
    }

    /// Append to the FIFO and immediately attempt to drain it.
    pub fn enqueue(&self, announcement: Announcement) {
        {
            let mut state = self.state.lock().unwrap();
            debug!(
                segment = announcement.segment_id,
                score = announcement.score,
                queued = state.queue.len() + 1,
                "announcement queued"
            );
            state.queue.push_back(announcement);
        }
        self.tick();
    }

    /// Expire elapsed niches, then drain the queue head-first. Idempotent;
    /// a conflicting head leaves the whole tail untouched.
    ///
    /// Emission happens under the state lock so concurrent ticks cannot
    /// interleave out of FIFO order; the callback must be non-blocking and
    /// must not call back into the orchestrator.
    pub fn tick(&self) {
        let mut state = self.state.lock().unwrap();
        let now = self.clock.now();

        let before = state.niches.len();
        state.niches.retain(|n| n.end_time > now);
        let expired = before - state.niches.len();
        if expired > 0 {
            debug!(expired, active = state.niches.len(), "niches expired");
        }

        while let Some(head) = state.queue.front() {
            if self.conflicts(&state.niches, head) {
                break;
            }
            let announcement = state.queue.pop_front().unwrap();
            state.niches.push(Niche {
                segment_id: announcement.segment_id,
                bark_unit: normalize(&announcement.bark_raw),
                end_time: now + announcement.duration,
            });
            debug!(
                segment = announcement.segment_id,
                score = announcement.score,
                "manifested"
            );
            // The niche is registered regardless of delivery: a failing
            // sink must not wedge the queue head.
            if let Some(callback) = state.callback.as_ref() {
                if let Err(e) = callback(&announcement) {
                    error!(error = %e, segment = announcement.segment_id, "manifest emission failed");
                }
            }
        }
    }

    /// Conflict iff any active niche is too close in Bark space, or the
    /// same segment is already sounding. Spectrally empty announcements
    /// never conflict.
    fn conflicts(&self, niches: &[Niche], announcement: &Announcement) -> bool {
        if niches
            .iter()
            .any(|n| n.segment_id == announcement.segment_id)
        {
            return true;
        }
        if announcement.bark_norm == 0.0 {
            return false;
        }
        let unit = normalize(&announcement.bark_raw);
        niches
            .iter()
            .any(|n| cosine(&unit, &n.bark_unit) >= self.bark_similarity_threshold)
    }

    pub fn active_niches(&self) -> usize {
        self.state.lock().unwrap().niches.len()
    }

    pub fn queued(&self) -> usize {
        self.state.lock().unwrap().queue.len()
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }
}

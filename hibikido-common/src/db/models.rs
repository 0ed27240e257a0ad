//! Record types for the document store
//!
//! These are the durable entities. Every collection is an array of one of
//! these records, keyed by a small integer id assigned by the collection.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Number of Bark critical bands carried on every analyzed segment.
pub const NUM_BARK_BANDS: usize = 24;

/// Per-entity trait used by [`super::collection::Collection`] for id
/// assignment and lookup.
pub trait Record {
    fn id(&self) -> u64;
    fn set_id(&mut self, id: u64);
}

macro_rules! impl_record {
    ($ty:ty) => {
        impl Record for $ty {
            fn id(&self) -> u64 {
                self.id
            }
            fn set_id(&mut self, id: u64) {
                self.id = id;
            }
        }
    };
}

/// Fractional energy distribution over the eight perceptual frequency bands.
/// Values sum to 1 for any non-silent signal.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BandEnergy {
    pub sub_bass: f32,
    pub bass: f32,
    pub low_mid: f32,
    pub mid: f32,
    pub upper_mid: f32,
    pub presence: f32,
    pub brilliance: f32,
    pub air: f32,
}

impl BandEnergy {
    pub fn as_array(&self) -> [f32; 8] {
        [
            self.sub_bass,
            self.bass,
            self.low_mid,
            self.mid,
            self.upper_mid,
            self.presence,
            self.brilliance,
            self.air,
        ]
    }

    /// Name of the band holding the largest energy share.
    pub fn dominant(&self) -> &'static str {
        const NAMES: [&str; 8] = [
            "sub_bass",
            "bass",
            "low_mid",
            "mid",
            "upper_mid",
            "presence",
            "brilliance",
            "air",
        ];
        let values = self.as_array();
        let mut best = 3; // mid, the fallback for silence
        for (i, v) in values.iter().enumerate() {
            if *v > values[best] {
                best = i;
            }
        }
        NAMES[best]
    }
}

/// Unified feature record produced by the feature extractor.
///
/// All values are finite; NaNs produced during analysis are scrubbed to
/// zero before a record is stored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Features {
    pub duration: f64,
    pub sample_rate: u32,

    // Basic level statistics
    pub rms_mean: f32,
    pub rms_std: f32,

    // Spectral shape
    pub spectral_centroid_mean: f32,
    pub spectral_centroid_std: f32,
    pub spectral_rolloff_mean: f32,
    pub spectral_rolloff_std: f32,
    pub spectral_bandwidth_mean: f32,
    pub spectral_bandwidth_std: f32,
    pub zero_crossing_rate_mean: f32,
    pub spectral_flux_mean: f32,
    pub spectral_flux_std: f32,

    // Temporal envelope
    pub attack_time: f32,
    pub decay_time: f32,
    pub sustained_level: f32,
    pub dynamic_range: f32,
    pub onset_rate: f32,
    pub tempo: f32,

    // Harmonic content
    pub harmonic_ratio: f32,
    pub percussive_ratio: f32,
    pub pitch_salience: f32,

    // Perceptual qualities
    pub spectral_entropy_mean: f32,
    pub spectral_entropy_std: f32,
    pub spectral_irregularity_mean: f32,
    pub spectral_irregularity_std: f32,
    pub roughness: f32,

    // Energy distribution
    pub band_energy: BandEnergy,
    pub dominant_band: String,

    // Framewise vector means
    pub mfcc_means: Vec<f32>,
    pub chroma_means: Vec<f32>,
    pub spectral_contrast_means: Vec<f32>,
}

/// Metadata for a source audio file. Created by `add_recording`, never
/// implicitly deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recording {
    pub id: u64,
    /// Path relative to the configured audio root
    pub path: String,
    pub description: String,
    pub duration: f64,
    pub features: Option<Features>,
    pub ai_description: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl_record!(Recording);

/// A time slice of a recording, the unit of retrieval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Segment {
    pub id: u64,
    /// Parent recording, referenced by path
    pub source_path: String,
    /// Normalized start, in [0, 1)
    pub start: f64,
    /// Normalized end, in (start, 1]
    pub end: f64,
    pub description: String,
    pub ai_description: Option<String>,
    /// The exact string that was embedded for this segment
    pub embedding_text: String,
    /// Row in the vector index, absent while un-indexed
    pub index_id: Option<u64>,
    pub features: Option<Features>,
    /// 24 non-negative Bark band energies
    pub bark_raw: Vec<f32>,
    /// L2 norm of `bark_raw`; zero means spectrally empty
    pub bark_norm: f32,
    /// Onset timestamps (seconds from segment start), ascending
    pub onsets_low_mid: Vec<f32>,
    pub onsets_mid: Vec<f32>,
    pub onsets_high_mid: Vec<f32>,
    pub duration: f64,
    pub created_at: DateTime<Utc>,
}

impl_record!(Segment);

/// A processing plug-in descriptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Effect {
    pub id: u64,
    pub path: String,
    pub name: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

impl_record!(Effect);

/// A parameterization of an effect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Preset {
    pub id: u64,
    pub effect_path: String,
    pub description: String,
    pub parameters: Vec<f32>,
    pub embedding_text: String,
    pub index_id: Option<u64>,
    pub created_at: DateTime<Utc>,
}

impl_record!(Preset);

/// One invocation inside a session log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invocation {
    pub text: String,
    /// Seconds on the server's monotonic clock
    pub time: f64,
    /// Number of announcements the invocation queued
    pub hits: u32,
}

/// Append-only, time-ordered log of invocations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: u64,
    /// Stable external identifier for the session
    pub session_key: String,
    pub invocations: Vec<Invocation>,
    pub created_at: DateTime<Utc>,
}

impl_record!(Session);

//! Audio analysis
//!
//! `AudioAnalyzer` composes PCM decode, feature extraction, Bark band
//! analysis and multi-band onset detection over one PCM slice, so all
//! derived data agrees on the same samples.

pub mod bark;
pub mod energy;
pub mod features;
pub mod pcm;
pub mod spectrum;

use std::path::Path;

use hibikido_common::db::models::Features;
use tracing::debug;

use self::bark::BarkAnalyzer;
use self::energy::EnergyAnalyzer;
use self::features::FeatureExtractor;
use self::pcm::{AnalysisError, PcmBuffer};
use self::spectrum::Stft;

/// Unified analysis record for one segment slice.
#[derive(Debug, Clone)]
pub struct Analysis {
    pub features: Features,
    pub bark_raw: Vec<f32>,
    pub bark_norm: f32,
    pub onsets_low_mid: Vec<f32>,
    pub onsets_mid: Vec<f32>,
    pub onsets_high_mid: Vec<f32>,
    pub duration: f64,
}

pub struct AudioAnalyzer {
    stft: Stft,
}

impl AudioAnalyzer {
    pub fn new() -> Self {
        Self { stft: Stft::new() }
    }

    /// Load a file, slice it to the normalized range, and run the full
    /// analysis stack on the slice.
    pub fn analyze_file(
        &self,
        path: &Path,
        start: f64,
        end: f64,
    ) -> Result<Analysis, AnalysisError> {
        let pcm = pcm::load_mono(path)?;
        let slice = if start == 0.0 && end == 1.0 {
            pcm
        } else {
            pcm.slice_normalized(start, end)?
        };
        Ok(self.analyze_buffer(&slice))
    }

    /// Analyze a PCM slice that is already in memory.
    pub fn analyze_buffer(&self, pcm: &PcmBuffer) -> Analysis {
        let features = FeatureExtractor::extract(&self.stft, pcm);
        let bark = BarkAnalyzer::analyze(&self.stft, pcm);
        let onsets = EnergyAnalyzer::analyze(pcm);

        debug!(
            duration = bark.duration,
            bark_norm = bark.norm,
            onsets_mid = onsets.mid.len(),
            "analysis complete"
        );

        Analysis {
            features,
            bark_raw: bark.raw,
            bark_norm: bark.norm,
            onsets_low_mid: onsets.low_mid,
            onsets_mid: onsets.mid,
            onsets_high_mid: onsets.high_mid,
            duration: bark.duration,
        }
    }
}

impl Default for AudioAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

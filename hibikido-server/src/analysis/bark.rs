//! Bark band analysis
//!
//! Computes a 24-band energy vector over the Bark critical bands from the
//! frame-averaged short-time power spectrum. The raw vector and its L2
//! norm are stored separately; cosine similarity between normalized
//! vectors is the orchestrator's conflict operator.

use super::pcm::PcmBuffer;
use super::spectrum::{bin_frequencies, Stft};

/// Bark critical band edges in Hz: 24 bands covering 0 Hz to ~15.5 kHz.
pub const BARK_BAND_EDGES_HZ: [f32; 25] = [
    0.0, 100.0, 200.0, 300.0, 400.0, 510.0, 630.0, 770.0, 920.0, 1080.0, 1270.0, 1480.0, 1720.0,
    2000.0, 2320.0, 2700.0, 3150.0, 3700.0, 4400.0, 5300.0, 6400.0, 7700.0, 9500.0, 12000.0,
    15500.0,
];

pub const NUM_BARK_BANDS: usize = BARK_BAND_EDGES_HZ.len() - 1;

#[derive(Debug, Clone)]
pub struct BarkAnalysis {
    /// Raw per-band energies (non-negative, not normalized)
    pub raw: Vec<f32>,
    /// L2 norm of `raw`; zero for a silent buffer
    pub norm: f32,
    /// Duration of the analyzed slice in seconds
    pub duration: f64,
}

impl BarkAnalysis {
    /// Unit-length copy of the raw vector, or the zero vector when silent.
    pub fn unit(&self) -> Vec<f32> {
        normalize(&self.raw)
    }
}

pub struct BarkAnalyzer;

impl BarkAnalyzer {
    /// Analyze a PCM slice into a Bark band energy vector.
    pub fn analyze(stft: &Stft, pcm: &PcmBuffer) -> BarkAnalysis {
        let frames = stft.power_frames(&pcm.samples);
        let raw = Self::band_energies(&frames, pcm.sample_rate);
        let norm = l2_norm(&raw);
        BarkAnalysis {
            raw,
            norm,
            duration: pcm.duration(),
        }
    }

    /// Sum the frame-averaged power into the 24 Bark bands.
    fn band_energies(frames: &[Vec<f32>], sample_rate: u32) -> Vec<f32> {
        let freqs = bin_frequencies(sample_rate);
        let num_bins = freqs.len();

        let mut avg_power = vec![0.0f32; num_bins];
        if !frames.is_empty() {
            for frame in frames {
                for (acc, v) in avg_power.iter_mut().zip(frame.iter()) {
                    *acc += v;
                }
            }
            for v in avg_power.iter_mut() {
                *v /= frames.len() as f32;
            }
        }

        let mut energies = Vec::with_capacity(NUM_BARK_BANDS);
        for band in 0..NUM_BARK_BANDS {
            let low = BARK_BAND_EDGES_HZ[band];
            let high = BARK_BAND_EDGES_HZ[band + 1];
            let bin_low = freqs.partition_point(|&f| f < low);
            let bin_high = freqs.partition_point(|&f| f < high);
            let energy: f32 = if bin_high > bin_low {
                avg_power[bin_low..bin_high].iter().sum()
            } else {
                0.0
            };
            energies.push(if energy.is_finite() { energy } else { 0.0 });
        }
        energies
    }
}

/// L2 norm of a vector.
pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Normalize to unit length; the zero vector stays zero.
pub fn normalize(v: &[f32]) -> Vec<f32> {
    let norm = l2_norm(v);
    if norm == 0.0 {
        return vec![0.0; v.len()];
    }
    v.iter().map(|x| x / norm).collect()
}

/// Cosine similarity, clipped to [-1, 1]. Zero vectors compare as 0.
pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    let norm_a = l2_norm(a);
    let norm_b = l2_norm(b);
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    (dot / (norm_a * norm_b)).clamp(-1.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine_pcm(freq: f32, sample_rate: u32, duration_s: f32) -> PcmBuffer {
        let n = (duration_s * sample_rate as f32) as usize;
        PcmBuffer {
            samples: (0..n)
                .map(|t| {
                    (t as f32 * freq * 2.0 * std::f32::consts::PI / sample_rate as f32).sin()
                })
                .collect(),
            sample_rate,
        }
    }

    #[test]
    fn sine_energy_lands_in_its_band() {
        let stft = Stft::new();
        let analysis = BarkAnalyzer::analyze(&stft, &sine_pcm(440.0, 32_000, 1.0));
        assert_eq!(analysis.raw.len(), NUM_BARK_BANDS);
        assert!(analysis.norm > 0.0);

        // 440 Hz falls in band 4 (400–510 Hz)
        let peak_band = analysis
            .raw
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .unwrap()
            .0;
        assert_eq!(peak_band, 4);
    }

    #[test]
    fn silence_is_the_zero_vector() {
        let stft = Stft::new();
        let pcm = PcmBuffer {
            samples: vec![0.0; 32_000],
            sample_rate: 32_000,
        };
        let analysis = BarkAnalyzer::analyze(&stft, &pcm);
        assert_eq!(analysis.norm, 0.0);
        assert!(analysis.raw.iter().all(|&v| v == 0.0));
        assert!(analysis.unit().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn norm_matches_raw_vector() {
        let stft = Stft::new();
        let analysis = BarkAnalyzer::analyze(&stft, &sine_pcm(880.0, 32_000, 0.5));
        assert!((l2_norm(&analysis.raw) - analysis.norm).abs() < 1e-6);
        assert!((l2_norm(&analysis.unit()) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn cosine_of_same_tone_is_one() {
        let stft = Stft::new();
        let a = BarkAnalyzer::analyze(&stft, &sine_pcm(440.0, 32_000, 1.0));
        let b = BarkAnalyzer::analyze(&stft, &sine_pcm(440.0, 32_000, 2.0));
        assert!(cosine(&a.raw, &b.raw) > 0.99);
    }

    #[test]
    fn cosine_of_distant_tones_is_low() {
        let stft = Stft::new();
        let low = BarkAnalyzer::analyze(&stft, &sine_pcm(150.0, 32_000, 1.0));
        let high = BarkAnalyzer::analyze(&stft, &sine_pcm(8000.0, 32_000, 1.0));
        assert!(cosine(&low.raw, &high.raw) < 0.5);
    }

    #[test]
    fn cosine_bounds_and_zero_vectors() {
        let zero = vec![0.0f32; NUM_BARK_BANDS];
        let ones = vec![1.0f32; NUM_BARK_BANDS];
        assert_eq!(cosine(&zero, &ones), 0.0);
        let c = cosine(&ones, &ones);
        assert!((-1.0..=1.0).contains(&c));
        assert!((c - 1.0).abs() < 1e-6);
    }

    #[test]
    fn deterministic() {
        let stft = Stft::new();
        let pcm = sine_pcm(523.25, 32_000, 1.0);
        let a = BarkAnalyzer::analyze(&stft, &pcm);
        let b = BarkAnalyzer::analyze(&stft, &pcm);
        assert_eq!(a.raw, b.raw);
        assert_eq!(a.norm, b.norm);
    }
}

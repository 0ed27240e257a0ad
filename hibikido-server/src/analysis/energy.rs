//! Multi-band onset detection
//!
//! Each band is isolated with a 4th-order IIR bandpass (two cascaded RBJ
//! biquads), reduced to a frame-RMS envelope, turned into a half-wave
//! rectified novelty curve, and peak-picked with an IQR-adaptive threshold
//! and a 30 ms minimum inter-onset interval.

use super::pcm::PcmBuffer;
use super::spectrum::{FRAME_SIZE, HOP_SIZE};

/// Onset bands: low-mid, mid, high-mid (Hz).
pub const ONSET_BANDS_HZ: [(f32, f32); 3] = [
    (150.0, 2000.0),
    (500.0, 4000.0),
    (2000.0, 8000.0),
];

/// Minimum spacing between reported onsets.
pub const MIN_ONSET_SPACING_S: f32 = 0.030;

/// Onset timestamps per band, seconds from the start of the analyzed
/// slice, strictly ascending.
#[derive(Debug, Clone, Default)]
pub struct OnsetBands {
    pub low_mid: Vec<f32>,
    pub mid: Vec<f32>,
    pub high_mid: Vec<f32>,
}

pub struct EnergyAnalyzer;

impl EnergyAnalyzer {
    pub fn analyze(pcm: &PcmBuffer) -> OnsetBands {
        let bands: Vec<Vec<f32>> = ONSET_BANDS_HZ
            .iter()
            .map(|&(low, high)| {
                let filtered = bandpass(&pcm.samples, pcm.sample_rate, low, high);
                detect_onsets(&filtered, pcm.sample_rate)
            })
            .collect();
        let mut it = bands.into_iter();
        OnsetBands {
            low_mid: it.next().unwrap_or_default(),
            mid: it.next().unwrap_or_default(),
            high_mid: it.next().unwrap_or_default(),
        }
    }
}

/// Onset detection on an (already filtered) signal: frame-RMS envelope,
/// rectified flux novelty, IQR threshold, 30 ms spacing.
pub fn detect_onsets(samples: &[f32], sample_rate: u32) -> Vec<f32> {
    let novelty = onset_strength(samples);
    if novelty.is_empty() {
        return Vec::new();
    }

    let (q1, q3) = quartiles(&novelty);
    let peak = novelty.iter().cloned().fold(0.0f32, f32::max);
    // Sparse material degenerates the IQR to zero; a small floor keeps
    // secondary wiggles of a single attack from counting twice
    let threshold = (q3 + 1.5 * (q3 - q1)).max(0.05 * peak);

    let min_frames = ((MIN_ONSET_SPACING_S * sample_rate as f32) / HOP_SIZE as f32).ceil() as usize;
    let min_frames = min_frames.max(1);

    let mut onsets = Vec::new();
    let mut last_frame: Option<usize> = None;
    for i in 0..novelty.len() {
        let v = novelty[i];
        if v <= threshold || v <= 0.0 {
            continue;
        }
        let prev = if i > 0 { novelty[i - 1] } else { 0.0 };
        let next = if i + 1 < novelty.len() { novelty[i + 1] } else { 0.0 };
        if v < prev || v < next {
            continue;
        }
        if let Some(last) = last_frame {
            if i - last < min_frames {
                continue;
            }
        }
        last_frame = Some(i);
        onsets.push((i * HOP_SIZE) as f32 / sample_rate as f32);
    }
    onsets
}

/// Onset strength envelope: half-wave rectified frame-RMS flux, lightly
/// smoothed. Also feeds the tempo estimator.
pub fn onset_strength(samples: &[f32]) -> Vec<f32> {
    let rms = frame_rms(samples);
    if rms.len() < 2 {
        // A lone loud frame still counts as an onset at t = 0
        return rms.into_iter().collect();
    }
    let mut flux = Vec::with_capacity(rms.len());
    flux.push(rms[0]);
    for i in 1..rms.len() {
        flux.push((rms[i] - rms[i - 1]).max(0.0));
    }
    smooth3(&flux)
}

fn frame_rms(samples: &[f32]) -> Vec<f32> {
    if samples.is_empty() {
        return Vec::new();
    }
    let mut rms = Vec::new();
    let mut start = 0usize;
    while start < samples.len() {
        let end = (start + FRAME_SIZE).min(samples.len());
        let frame = &samples[start..end];
        let sum_squares: f32 = frame.iter().map(|s| s * s).sum();
        rms.push((sum_squares / frame.len() as f32).sqrt());
        if end == samples.len() {
            break;
        }
        start += HOP_SIZE;
    }
    rms
}

fn smooth3(values: &[f32]) -> Vec<f32> {
    let n = values.len();
    (0..n)
        .map(|i| {
            let lo = i.saturating_sub(1);
            let hi = (i + 2).min(n);
            values[lo..hi].iter().sum::<f32>() / (hi - lo) as f32
        })
        .collect()
}

/// First and third quartile by linear interpolation on the sorted values.
fn quartiles(values: &[f32]) -> (f32, f32) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    (percentile(&sorted, 0.25), percentile(&sorted, 0.75))
}

fn percentile(sorted: &[f32], p: f32) -> f32 {
    if sorted.len() == 1 {
        return sorted[0];
    }
    let rank = p * (sorted.len() - 1) as f32;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f32;
    sorted[lo] * (1.0 - frac) + sorted[hi] * frac
}

/// 4th-order bandpass: two cascaded RBJ biquads at the band's geometric
/// center with Q derived from the bandwidth. The upper edge is clamped
/// below Nyquist.
pub fn bandpass(samples: &[f32], sample_rate: u32, low_hz: f32, high_hz: f32) -> Vec<f32> {
    let nyquist = sample_rate as f32 / 2.0;
    let high = high_hz.min(0.95 * nyquist);
    if high <= low_hz {
        return vec![0.0; samples.len()];
    }
    let f0 = (low_hz * high).sqrt();
    let q = (f0 / (high - low_hz)).max(0.1);

    let mut first = Biquad::bandpass(sample_rate as f32, f0, q);
    let mut second = Biquad::bandpass(sample_rate as f32, f0, q);

    samples
        .iter()
        .map(|&x| second.process(first.process(x)))
        .collect()
}

/// Single RBJ bandpass biquad, Direct Form II Transposed.
struct Biquad {
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
    z1: f64,
    z2: f64,
}

impl Biquad {
    /// Constant-peak-gain bandpass per the RBJ Audio EQ Cookbook.
    fn bandpass(sample_rate: f32, f0: f32, q: f32) -> Self {
        let w0 = 2.0 * std::f64::consts::PI * f0 as f64 / sample_rate as f64;
        let cos_w0 = w0.cos();
        let alpha = w0.sin() / (2.0 * q as f64);

        let b0 = alpha;
        let b1 = 0.0;
        let b2 = -alpha;
        let a0 = 1.0 + alpha;
        let a1 = -2.0 * cos_w0;
        let a2 = 1.0 - alpha;

        Self {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: a1 / a0,
            a2: a2 / a0,
            z1: 0.0,
            z2: 0.0,
        }
    }

    #[inline]
    fn process(&mut self, x: f32) -> f32 {
        let x = x as f64;
        let y = self.b0 * x + self.z1;
        self.z1 = self.b1 * x - self.a1 * y + self.z2;
        self.z2 = self.b2 * x - self.a2 * y;
        y as f32
    }
}

//! Short-time Fourier transform shared by the analyzers
//!
//! Hann window, frame 2048, hop 512. Feature extraction, Bark analysis and
//! onset detection all consume the same frames so they agree on one slice.

use std::sync::Arc;

use realfft::{RealFftPlanner, RealToComplex};
use rustfft::num_complex::Complex;

/// Analysis frame length in samples.
pub const FRAME_SIZE: usize = 2048;
/// Hop between successive frames in samples.
pub const HOP_SIZE: usize = 512;
/// Spectrum bins per frame (FRAME_SIZE / 2 + 1).
pub const NUM_BINS: usize = FRAME_SIZE / 2 + 1;

pub struct Stft {
    fft: Arc<dyn RealToComplex<f32>>,
    window: Vec<f32>,
}

impl Stft {
    pub fn new() -> Self {
        let fft = RealFftPlanner::<f32>::new().plan_fft_forward(FRAME_SIZE);
        let window = hann_window(FRAME_SIZE);
        Self { fft, window }
    }

    /// Magnitude spectrogram: one `NUM_BINS`-long frame per hop. Signals
    /// shorter than one frame are zero-padded to a single frame.
    pub fn magnitude_frames(&self, samples: &[f32]) -> Vec<Vec<f32>> {
        let mut frames = Vec::new();
        let mut input = self.fft.make_input_vec();
        let mut output: Vec<Complex<f32>> = self.fft.make_output_vec();

        let mut start = 0usize;
        loop {
            let end = start + FRAME_SIZE;
            if start > 0 && end > samples.len() {
                break;
            }
            let available = samples.len().saturating_sub(start).min(FRAME_SIZE);
            for i in 0..FRAME_SIZE {
                let s = if i < available { samples[start + i] } else { 0.0 };
                input[i] = s * self.window[i];
            }
            if self.fft.process(&mut input, &mut output).is_ok() {
                frames.push(output.iter().map(|c| c.norm()).collect());
            }
            start += HOP_SIZE;
            if start >= samples.len() {
                break;
            }
        }
        frames
    }

    /// Power spectrogram (squared magnitudes).
    pub fn power_frames(&self, samples: &[f32]) -> Vec<Vec<f32>> {
        let mut frames = self.magnitude_frames(samples);
        for frame in &mut frames {
            for v in frame.iter_mut() {
                *v *= *v;
            }
        }
        frames
    }
}

impl Default for Stft {
    fn default() -> Self {
        Self::new()
    }
}

/// Center frequency in Hz of each spectrum bin.
pub fn bin_frequencies(sample_rate: u32) -> Vec<f32> {
    (0..NUM_BINS)
        .map(|i| i as f32 * sample_rate as f32 / FRAME_SIZE as f32)
        .collect()
}

/// Time in seconds of the start of frame `idx`.
pub fn frame_time(idx: usize, sample_rate: u32) -> f32 {
    (idx * HOP_SIZE) as f32 / sample_rate as f32
}

fn hann_window(n: usize) -> Vec<f32> {
    (0..n)
        .map(|i| {
            let phase = 2.0 * std::f32::consts::PI * i as f32 / n as f32;
            0.5 * (1.0 - phase.cos())
        })
        .collect()
}

/// Mean of a slice, zero when empty.
pub fn mean(values: &[f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f32>() / values.len() as f32
}

/// Population standard deviation, zero when empty.
pub fn std_dev(values: &[f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    (values.iter().map(|v| (v - m) * (v - m)).sum::<f32>() / values.len() as f32).sqrt()
}

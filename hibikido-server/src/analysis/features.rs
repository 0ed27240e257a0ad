//! Comprehensive audio feature extraction
//!
//! Produces the unified per-segment feature record: spectral shape, MFCC /
//! chroma / contrast means, temporal envelope, harmonic balance,
//! perceptual qualities and the 8-band energy distribution. Every output
//! is finite; NaNs are scrubbed to zero before the record leaves here.

use hibikido_common::db::models::{BandEnergy, Features};

use super::energy::{detect_onsets, onset_strength};
use super::pcm::PcmBuffer;
use super::spectrum::{bin_frequencies, mean, std_dev, Stft, FRAME_SIZE, HOP_SIZE};

const EPS: f32 = 1e-10;

/// Rolloff threshold: frequency below which 85% of spectral energy lies.
const ROLLOFF_FRACTION: f32 = 0.85;

/// Number of MFCC coefficients reported.
const NUM_MFCC: usize = 13;
/// Mel filters feeding the MFCC DCT.
const NUM_MEL_FILTERS: usize = 26;
/// Spectral contrast bands.
const NUM_CONTRAST_BANDS: usize = 7;
/// Median filter length for harmonic/percussive separation.
const HPSS_KERNEL: usize = 17;

/// Perceptual frequency band edges (Hz); the last band runs to Nyquist.
const BAND_EDGES_HZ: [f32; 8] = [20.0, 60.0, 250.0, 500.0, 2000.0, 4000.0, 6000.0, 10000.0];

pub struct FeatureExtractor;

impl FeatureExtractor {
    pub fn extract(stft: &Stft, pcm: &PcmBuffer) -> Features {
        let sr = pcm.sample_rate;
        let duration = pcm.duration();

        let mag = stft.magnitude_frames(&pcm.samples);
        let power: Vec<Vec<f32>> = mag
            .iter()
            .map(|f| f.iter().map(|v| v * v).collect())
            .collect();
        let freqs = bin_frequencies(sr);

        // Frame-level RMS at 50% hop for the basic level statistics
        let rms_50 = frame_rms(&pcm.samples, FRAME_SIZE, FRAME_SIZE / 2);
        // RMS envelope at the STFT hop for the temporal descriptors
        let envelope = frame_rms(&pcm.samples, FRAME_SIZE, HOP_SIZE);

        let (centroids, rolloffs, bandwidths) = spectral_shape(&mag, &power, &freqs);
        let zcr = zero_crossing_rates(&pcm.samples);
        let flux = spectral_flux(&mag);
        let (entropies, irregularities) = perceptual_frames(&mag, &power);

        let temporal = TemporalEnvelope::from_envelope(&envelope, sr);

        let onsets = detect_onsets(&pcm.samples, sr);
        let onset_rate = if duration > 0.0 {
            onsets.len() as f32 / duration as f32
        } else {
            0.0
        };
        let tempo = estimate_tempo(&pcm.samples, sr);

        let (harmonic_ratio, percussive_ratio) = harmonic_percussive_ratio(&mag);
        let pitch_salience = pitch_salience(&pcm.samples, sr);

        let avg_power = average_spectrum(&power);
        let band_energy = band_energies(&avg_power, &freqs);
        let dominant_band = band_energy.dominant().to_string();
        let roughness = roughness(&average_spectrum(&mag), &freqs);

        let features = Features {
            duration,
            sample_rate: sr,
            rms_mean: mean(&rms_50),
            rms_std: std_dev(&rms_50),
            spectral_centroid_mean: mean(&centroids),
            spectral_centroid_std: std_dev(&centroids),
            spectral_rolloff_mean: mean(&rolloffs),
            spectral_rolloff_std: std_dev(&rolloffs),
            spectral_bandwidth_mean: mean(&bandwidths),
            spectral_bandwidth_std: std_dev(&bandwidths),
            zero_crossing_rate_mean: mean(&zcr),
            spectral_flux_mean: mean(&flux),
            spectral_flux_std: std_dev(&flux),
            attack_time: temporal.attack_time,
            decay_time: temporal.decay_time,
            sustained_level: temporal.sustained_level,
            dynamic_range: temporal.dynamic_range,
            onset_rate,
            tempo,
            harmonic_ratio,
            percussive_ratio,
            pitch_salience,
            spectral_entropy_mean: mean(&entropies),
            spectral_entropy_std: std_dev(&entropies),
            spectral_irregularity_mean: mean(&irregularities),
            spectral_irregularity_std: std_dev(&irregularities),
            roughness,
            band_energy,
            dominant_band,
            mfcc_means: mfcc_means(&power, &freqs, sr),
            chroma_means: chroma_means(&power, &freqs),
            spectral_contrast_means: contrast_means(&mag, &freqs, sr),
        };
        scrub(features)
    }
}

/// Per-frame spectral centroid, rolloff (0.85) and bandwidth.
fn spectral_shape(
    mag: &[Vec<f32>],
    power: &[Vec<f32>],
    freqs: &[f32],
) -> (Vec<f32>, Vec<f32>, Vec<f32>) {
    let mut centroids = Vec::with_capacity(mag.len());
    let mut rolloffs = Vec::with_capacity(mag.len());
    let mut bandwidths = Vec::with_capacity(mag.len());

    for (m, p) in mag.iter().zip(power.iter()) {
        let mag_sum: f32 = m.iter().sum();
        let centroid = if mag_sum > 0.0 {
            m.iter()
                .zip(freqs.iter())
                .map(|(v, f)| v * f)
                .sum::<f32>()
                / mag_sum
        } else {
            0.0
        };
        centroids.push(centroid);

        let power_sum: f32 = p.iter().sum();
        let mut rolloff = 0.0;
        if power_sum > 0.0 {
            let target = ROLLOFF_FRACTION * power_sum;
            let mut cumulative = 0.0;
            for (v, f) in p.iter().zip(freqs.iter()) {
                cumulative += v;
                if cumulative >= target {
                    rolloff = *f;
                    break;
                }
            }
        }
        rolloffs.push(rolloff);

        let bandwidth = if mag_sum > 0.0 {
            (m.iter()
                .zip(freqs.iter())
                .map(|(v, f)| v * (f - centroid) * (f - centroid))
                .sum::<f32>()
                / mag_sum)
                .sqrt()
        } else {
            0.0
        };
        bandwidths.push(bandwidth);
    }

    (centroids, rolloffs, bandwidths)
}

fn frame_rms(samples: &[f32], frame: usize, hop: usize) -> Vec<f32> {
    if samples.is_empty() {
        return Vec::new();
    }
    let mut rms = Vec::new();
    let mut start = 0usize;
    while start < samples.len() {
        let end = (start + frame).min(samples.len());
        let chunk = &samples[start..end];
        let sum_squares: f32 = chunk.iter().map(|s| s * s).sum();
        rms.push((sum_squares / chunk.len() as f32).sqrt());
        if end == samples.len() {
            break;
        }
        start += hop;
    }
    rms
}

fn zero_crossing_rates(samples: &[f32]) -> Vec<f32> {
    if samples.len() < 2 {
        return vec![0.0];
    }
    let mut rates = Vec::new();
    let mut start = 0usize;
    while start + FRAME_SIZE <= samples.len() || start == 0 {
        let end = (start + FRAME_SIZE).min(samples.len());
        let frame = &samples[start..end];
        let crossings = frame
            .windows(2)
            .filter(|w| (w[0] >= 0.0) != (w[1] >= 0.0))
            .count();
        rates.push(crossings as f32 / frame.len().max(1) as f32);
        start += HOP_SIZE;
        if start >= samples.len() {
            break;
        }
    }
    rates
}

/// Squared magnitude difference between successive frames.
fn spectral_flux(mag: &[Vec<f32>]) -> Vec<f32> {
    mag.windows(2)
        .map(|pair| {
            pair[1]
                .iter()
                .zip(pair[0].iter())
                .map(|(b, a)| (b - a) * (b - a))
                .sum()
        })
        .collect()
}

/// Per-frame spectral entropy (-Σ p ln p) and irregularity
/// (Σ|X_i − X_{i−1}|² / Σ|X_i|²).
fn perceptual_frames(mag: &[Vec<f32>], power: &[Vec<f32>]) -> (Vec<f32>, Vec<f32>) {
    let mut entropies = Vec::with_capacity(power.len());
    let mut irregularities = Vec::with_capacity(mag.len());

    for p in power {
        let total: f32 = p.iter().sum();
        if total > 0.0 {
            let h: f32 = p
                .iter()
                .filter(|&&v| v > 0.0)
                .map(|&v| {
                    let prob = v / total;
                    -prob * prob.ln()
                })
                .sum();
            entropies.push(h);
        } else {
            entropies.push(0.0);
        }
    }

    for m in mag {
        let denom: f32 = m.iter().map(|v| v * v).sum();
        if denom > 0.0 {
            let num: f32 = m.windows(2).map(|w| (w[1] - w[0]) * (w[1] - w[0])).sum();
            irregularities.push(num / denom);
        } else {
            irregularities.push(0.0);
        }
    }

    (entropies, irregularities)
}

struct TemporalEnvelope {
    attack_time: f32,
    decay_time: f32,
    sustained_level: f32,
    dynamic_range: f32,
}

impl TemporalEnvelope {
    /// Attack: first non-silent frame to 0.9 × peak. Decay: peak to −20 dB
    /// relative to peak (or end of signal). Sustain: median RMS over the
    /// middle 60%. Dynamic range: peak over noise floor, in dB.
    fn from_envelope(envelope: &[f32], sample_rate: u32) -> Self {
        let hop_s = HOP_SIZE as f32 / sample_rate as f32;
        let peak = envelope.iter().cloned().fold(0.0f32, f32::max);
        if envelope.is_empty() || peak <= 0.0 {
            return Self {
                attack_time: 0.0,
                decay_time: 0.0,
                sustained_level: 0.0,
                dynamic_range: 0.0,
            };
        }

        let silence = 0.1 * peak;
        let attack_start = envelope.iter().position(|&v| v > silence).unwrap_or(0);
        let attack_end = envelope
            .iter()
            .position(|&v| v >= 0.9 * peak)
            .unwrap_or(attack_start);
        let attack_time = attack_end.saturating_sub(attack_start) as f32 * hop_s;

        let peak_idx = envelope
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap_or(0);
        let decay_target = 0.1 * peak; // −20 dB
        let decay_idx = envelope[peak_idx..]
            .iter()
            .position(|&v| v <= decay_target)
            .map(|offset| peak_idx + offset)
            .unwrap_or(envelope.len() - 1);
        let decay_time = decay_idx.saturating_sub(peak_idx) as f32 * hop_s;

        let mid_start = (envelope.len() as f32 * 0.2) as usize;
        let mid_end = ((envelope.len() as f32 * 0.8) as usize).max(mid_start + 1);
        let sustained_level = median(&envelope[mid_start..mid_end.min(envelope.len())]);

        let floor = envelope
            .iter()
            .cloned()
            .filter(|&v| v > 0.0)
            .fold(peak, f32::min)
            .max(1e-5);
        let dynamic_range = 20.0 * (peak / floor).log10();

        Self {
            attack_time,
            decay_time,
            sustained_level,
            dynamic_range,
        }
    }
}

fn median(values: &[f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Tempo via autocorrelation of the onset strength, scanned over 30–300 BPM.
fn estimate_tempo(samples: &[f32], sample_rate: u32) -> f32 {
    let strength = onset_strength(samples);
    if strength.len() < 8 {
        return 0.0;
    }
    let energy: f32 = strength.iter().map(|v| v * v).sum();
    if energy <= 0.0 {
        return 0.0;
    }

    let frames_per_second = sample_rate as f32 / HOP_SIZE as f32;
    let min_lag = ((60.0 / 300.0) * frames_per_second).floor().max(1.0) as usize;
    let max_lag = (((60.0 / 30.0) * frames_per_second).ceil() as usize).min(strength.len() - 1);
    if min_lag >= max_lag {
        return 0.0;
    }

    let mut best_lag = 0usize;
    let mut best_r = 0.0f32;
    for lag in min_lag..=max_lag {
        let r: f32 = strength
            .iter()
            .zip(strength[lag..].iter())
            .map(|(a, b)| a * b)
            .sum::<f32>()
            / energy;
        if r > best_r {
            best_r = r;
            best_lag = lag;
        }
    }
    if best_lag == 0 || best_r < 0.05 {
        return 0.0;
    }
    60.0 * frames_per_second / best_lag as f32
}

/// Median-filter harmonic/percussive balance on the magnitude spectrogram.
fn harmonic_percussive_ratio(mag: &[Vec<f32>]) -> (f32, f32) {
    if mag.is_empty() {
        return (0.0, 0.0);
    }
    let num_frames = mag.len();
    let num_bins = mag[0].len();
    let half = HPSS_KERNEL / 2;

    let mut harmonic_energy = 0.0f64;
    let mut percussive_energy = 0.0f64;

    let mut window = Vec::with_capacity(HPSS_KERNEL);
    for t in 0..num_frames {
        for k in 0..num_bins {
            // Median across time (harmonic components persist)
            window.clear();
            let t_lo = t.saturating_sub(half);
            let t_hi = (t + half + 1).min(num_frames);
            for frame in mag.iter().take(t_hi).skip(t_lo) {
                window.push(frame[k]);
            }
            let h = median(&window);

            // Median across frequency (percussive components are broadband)
            window.clear();
            let k_lo = k.saturating_sub(half);
            let k_hi = (k + half + 1).min(num_bins);
            window.extend_from_slice(&mag[t][k_lo..k_hi]);
            let p = median(&window);

            let power = (mag[t][k] * mag[t][k]) as f64;
            if h >= p {
                harmonic_energy += power;
            } else {
                percussive_energy += power;
            }
        }
    }

    let total = harmonic_energy + percussive_energy;
    if total <= 0.0 {
        return (0.0, 0.0);
    }
    (
        (harmonic_energy / total) as f32,
        (percussive_energy / total) as f32,
    )
}

/// Peak of the normalized autocorrelation in the plausible-pitch lag range
/// (50–2000 Hz). Bounded excerpt keeps the scan cheap on long files.
fn pitch_salience(samples: &[f32], sample_rate: u32) -> f32 {
    const MAX_SAMPLES: usize = 1 << 17;
    let excerpt = if samples.len() > MAX_SAMPLES {
        let start = (samples.len() - MAX_SAMPLES) / 2;
        &samples[start..start + MAX_SAMPLES]
    } else {
        samples
    };

    let r0: f32 = excerpt.iter().map(|v| v * v).sum();
    if r0 <= 0.0 {
        return 0.0;
    }

    let min_lag = (sample_rate as f32 / 2000.0).floor().max(1.0) as usize;
    let max_lag = ((sample_rate as f32 / 50.0).ceil() as usize).min(excerpt.len() / 2);
    if min_lag >= max_lag {
        return 0.0;
    }

    let mut best = 0.0f32;
    for lag in min_lag..=max_lag {
        let r: f32 = excerpt
            .iter()
            .zip(excerpt[lag..].iter())
            .map(|(a, b)| a * b)
            .sum::<f32>()
            / r0;
        if r > best {
            best = r;
        }
    }
    best.clamp(0.0, 1.0)
}

fn average_spectrum(frames: &[Vec<f32>]) -> Vec<f32> {
    if frames.is_empty() {
        return Vec::new();
    }
    let num_bins = frames[0].len();
    let mut avg = vec![0.0f32; num_bins];
    for frame in frames {
        for (acc, v) in avg.iter_mut().zip(frame.iter()) {
            *acc += v;
        }
    }
    for v in avg.iter_mut() {
        *v /= frames.len() as f32;
    }
    avg
}

/// Fractional power in the 8 perceptual bands, summing to 1.
fn band_energies(avg_power: &[f32], freqs: &[f32]) -> BandEnergy {
    let mut sums = [0.0f32; 8];
    for (&p, &f) in avg_power.iter().zip(freqs.iter()) {
        let band = match f {
            f if f < BAND_EDGES_HZ[0] => continue,
            f if f < BAND_EDGES_HZ[1] => 0,
            f if f < BAND_EDGES_HZ[2] => 1,
            f if f < BAND_EDGES_HZ[3] => 2,
            f if f < BAND_EDGES_HZ[4] => 3,
            f if f < BAND_EDGES_HZ[5] => 4,
            f if f < BAND_EDGES_HZ[6] => 5,
            f if f < BAND_EDGES_HZ[7] => 6,
            _ => 7,
        };
        sums[band] += p;
    }
    let total: f32 = sums.iter().sum();
    if total > 0.0 {
        for v in sums.iter_mut() {
            *v /= total;
        }
    }
    BandEnergy {
        sub_bass: sums[0],
        bass: sums[1],
        low_mid: sums[2],
        mid: sums[3],
        upper_mid: sums[4],
        presence: sums[5],
        brilliance: sums[6],
        air: sums[7],
    }
}

/// Plomp–Levelt pairwise dissonance over the strongest spectral partials.
fn roughness(avg_mag: &[f32], freqs: &[f32]) -> f32 {
    const NUM_PARTIALS: usize = 10;

    // Local maxima of the averaged spectrum, strongest first
    let mut peaks: Vec<(f32, f32)> = Vec::new();
    for i in 1..avg_mag.len().saturating_sub(1) {
        if avg_mag[i] > avg_mag[i - 1] && avg_mag[i] >= avg_mag[i + 1] && avg_mag[i] > EPS {
            peaks.push((freqs[i], avg_mag[i]));
        }
    }
    peaks.sort_by(|a, b| b.1.total_cmp(&a.1));
    peaks.truncate(NUM_PARTIALS);
    if peaks.len() < 2 {
        return 0.0;
    }

    let mut weighted = 0.0f32;
    let mut amplitude = 0.0f32;
    for i in 0..peaks.len() {
        for j in (i + 1)..peaks.len() {
            let (f1, a1) = peaks[i];
            let (f2, a2) = peaks[j];
            let fmin = f1.min(f2);
            let s = 0.24 / (0.0207 * fmin + 18.96);
            let d = s * (f1 - f2).abs();
            let dissonance = (-3.51 * d).exp() - (-5.75 * d).exp();
            weighted += a1 * a2 * dissonance.max(0.0);
            amplitude += a1 * a2;
        }
    }
    if amplitude > 0.0 {
        weighted / amplitude
    } else {
        0.0
    }
}

/// 13 MFCC means from a 26-filter mel bank (DCT-II over log energies).
fn mfcc_means(power: &[Vec<f32>], freqs: &[f32], sample_rate: u32) -> Vec<f32> {
    if power.is_empty() {
        return vec![0.0; NUM_MFCC];
    }
    let filterbank = mel_filterbank(freqs, sample_rate);
    let mut sums = vec![0.0f32; NUM_MFCC];

    for frame in power {
        let mut log_energies = [0.0f32; NUM_MEL_FILTERS];
        for (m, filter) in filterbank.iter().enumerate() {
            let energy: f32 = filter
                .iter()
                .map(|&(bin, weight)| frame[bin] * weight)
                .sum();
            log_energies[m] = (energy + EPS).ln();
        }
        for (c, sum) in sums.iter_mut().enumerate() {
            let mut acc = 0.0f32;
            for (m, &le) in log_energies.iter().enumerate() {
                let angle = std::f32::consts::PI * c as f32 * (m as f32 + 0.5)
                    / NUM_MEL_FILTERS as f32;
                acc += le * angle.cos();
            }
            *sum += acc;
        }
    }

    sums.iter().map(|s| s / power.len() as f32).collect()
}

/// Triangular mel filters as sparse (bin, weight) lists.
fn mel_filterbank(freqs: &[f32], sample_rate: u32) -> Vec<Vec<(usize, f32)>> {
    let hz_to_mel = |hz: f32| 2595.0 * (1.0 + hz / 700.0).log10();
    let mel_to_hz = |mel: f32| 700.0 * (10f32.powf(mel / 2595.0) - 1.0);

    let mel_max = hz_to_mel(sample_rate as f32 / 2.0);
    let centers: Vec<f32> = (0..NUM_MEL_FILTERS + 2)
        .map(|i| mel_to_hz(mel_max * i as f32 / (NUM_MEL_FILTERS + 1) as f32))
        .collect();

    (0..NUM_MEL_FILTERS)
        .map(|m| {
            let (lo, center, hi) = (centers[m], centers[m + 1], centers[m + 2]);
            freqs
                .iter()
                .enumerate()
                .filter_map(|(bin, &f)| {
                    let weight = if f > lo && f <= center {
                        (f - lo) / (center - lo).max(EPS)
                    } else if f > center && f < hi {
                        (hi - f) / (hi - center).max(EPS)
                    } else {
                        return None;
                    };
                    Some((bin, weight))
                })
                .collect()
        })
        .collect()
}

/// 12 chroma means: per-frame pitch-class power, max-normalized.
fn chroma_means(power: &[Vec<f32>], freqs: &[f32]) -> Vec<f32> {
    if power.is_empty() {
        return vec![0.0; 12];
    }
    // Pitch class per bin, None below the musical range
    let classes: Vec<Option<usize>> = freqs
        .iter()
        .map(|&f| {
            if f < 27.5 {
                return None;
            }
            let midi = 69.0 + 12.0 * (f / 440.0).log2();
            Some((midi.round() as i64).rem_euclid(12) as usize)
        })
        .collect();

    let mut sums = [0.0f32; 12];
    for frame in power {
        let mut chroma = [0.0f32; 12];
        for (v, class) in frame.iter().zip(classes.iter()) {
            if let Some(c) = class {
                chroma[*c] += v;
            }
        }
        let peak = chroma.iter().cloned().fold(0.0f32, f32::max);
        if peak > 0.0 {
            for (sum, v) in sums.iter_mut().zip(chroma.iter()) {
                *sum += v / peak;
            }
        }
    }
    sums.iter().map(|s| s / power.len() as f32).collect()
}

/// 7-band spectral contrast means: peak-to-valley spread in dB per
/// octave-spaced band.
fn contrast_means(mag: &[Vec<f32>], freqs: &[f32], sample_rate: u32) -> Vec<f32> {
    if mag.is_empty() {
        return vec![0.0; NUM_CONTRAST_BANDS];
    }
    // Octave bands from 200 Hz up, first band covering everything below
    let mut edges = vec![0.0f32, 200.0];
    while edges.len() < NUM_CONTRAST_BANDS + 1 {
        let next = edges.last().unwrap() * 2.0;
        edges.push(next.min(sample_rate as f32 / 2.0));
    }

    let band_bins: Vec<(usize, usize)> = edges
        .windows(2)
        .map(|e| {
            let lo = freqs.partition_point(|&f| f < e[0]);
            let hi = freqs.partition_point(|&f| f < e[1]).max(lo + 1);
            (lo, hi.min(freqs.len()))
        })
        .collect();

    let mut sums = vec![0.0f32; NUM_CONTRAST_BANDS];
    for frame in mag {
        for (band, &(lo, hi)) in band_bins.iter().enumerate() {
            if lo >= frame.len() {
                continue;
            }
            let mut bins: Vec<f32> = frame[lo..hi.min(frame.len())].to_vec();
            if bins.is_empty() {
                continue;
            }
            bins.sort_by(|a, b| a.total_cmp(b));
            let quantile = (bins.len() / 5).max(1);
            let valley = bins[..quantile].iter().sum::<f32>() / quantile as f32;
            let peak = bins[bins.len() - quantile..].iter().sum::<f32>() / quantile as f32;
            sums[band] += 20.0 * ((peak + EPS) / (valley + EPS)).log10();
        }
    }
    sums.iter().map(|s| s / mag.len() as f32).collect()
}

/// Replace non-finite values with zero across the whole record.
fn scrub(mut features: Features) -> Features {
    fn fix(v: &mut f32) {
        if !v.is_finite() {
            *v = 0.0;
        }
    }
    fn fix_vec(v: &mut [f32]) {
        v.iter_mut().for_each(fix);
    }

    if !features.duration.is_finite() {
        features.duration = 0.0;
    }
    for v in [
        &mut features.rms_mean,
        &mut features.rms_std,
        &mut features.spectral_centroid_mean,
        &mut features.spectral_centroid_std,
        &mut features.spectral_rolloff_mean,
        &mut features.spectral_rolloff_std,
        &mut features.spectral_bandwidth_mean,
        &mut features.spectral_bandwidth_std,
        &mut features.zero_crossing_rate_mean,
        &mut features.spectral_flux_mean,
        &mut features.spectral_flux_std,
        &mut features.attack_time,
        &mut features.decay_time,
        &mut features.sustained_level,
        &mut features.dynamic_range,
        &mut features.onset_rate,
        &mut features.tempo,
        &mut features.harmonic_ratio,
        &mut features.percussive_ratio,
        &mut features.pitch_salience,
        &mut features.spectral_entropy_mean,
        &mut features.spectral_entropy_std,
        &mut features.spectral_irregularity_mean,
        &mut features.spectral_irregularity_std,
        &mut features.roughness,
        &mut features.band_energy.sub_bass,
        &mut features.band_energy.bass,
        &mut features.band_energy.low_mid,
        &mut features.band_energy.mid,
        &mut features.band_energy.upper_mid,
        &mut features.band_energy.presence,
        &mut features.band_energy.brilliance,
        &mut features.band_energy.air,
    ] {
        fix(v);
    }
    fix_vec(&mut features.mfcc_means);
    fix_vec(&mut features.chroma_means);
    fix_vec(&mut features.spectral_contrast_means);
    features
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: u32 = 32_000;

    fn sine_pcm(freq: f32, duration_s: f32) -> PcmBuffer {
        let n = (duration_s * SR as f32) as usize;
        PcmBuffer {
            samples: (0..n)
                .map(|t| {
                    (t as f32 * freq * 2.0 * std::f32::consts::PI / SR as f32).sin() * 0.8
                })
                .collect(),
            sample_rate: SR,
        }
    }

    fn assert_all_finite(f: &Features) {
        let json = serde_json::to_value(f).unwrap();
        fn walk(v: &serde_json::Value) {
            match v {
                serde_json::Value::Number(n) => assert!(n.as_f64().unwrap().is_finite()),
                serde_json::Value::Array(items) => items.iter().for_each(walk),
                serde_json::Value::Object(map) => map.values().for_each(walk),
                _ => {}
            }
        }
        walk(&json);
    }

    #[test]
    fn sine_centroid_near_its_frequency() {
        let stft = Stft::new();
        let features = FeatureExtractor::extract(&stft, &sine_pcm(440.0, 2.0));

        assert!((features.duration - 2.0).abs() < 0.01);
        assert!(
            (features.spectral_centroid_mean - 440.0).abs() < 60.0,
            "centroid = {}",
            features.spectral_centroid_mean
        );
        assert!(features.rms_mean > 0.3 && features.rms_mean < 0.7);
        // A pure tone is strongly harmonic and pitched
        assert!(features.harmonic_ratio > 0.5);
        assert!(features.pitch_salience > 0.8);
        assert_all_finite(&features);
    }

    #[test]
    fn vector_descriptors_have_fixed_shape() {
        let stft = Stft::new();
        let features = FeatureExtractor::extract(&stft, &sine_pcm(440.0, 1.0));
        assert_eq!(features.mfcc_means.len(), NUM_MFCC);
        assert_eq!(features.chroma_means.len(), 12);
        assert_eq!(features.spectral_contrast_means.len(), NUM_CONTRAST_BANDS);
    }

    #[test]
    fn band_energies_sum_to_one() {
        let stft = Stft::new();
        let features = FeatureExtractor::extract(&stft, &sine_pcm(1000.0, 1.0));
        let sum: f32 = features.band_energy.as_array().iter().sum();
        assert!((sum - 1.0).abs() < 1e-3, "sum = {sum}");
        // 1 kHz lies in the 500–2000 Hz band
        assert_eq!(features.dominant_band, "mid");
        assert!(features.band_energy.mid > 0.8);
    }

    #[test]
    fn chroma_peaks_at_the_tone_pitch_class() {
        let stft = Stft::new();
        // A4 = 440 Hz = pitch class 9
        let features = FeatureExtractor::extract(&stft, &sine_pcm(440.0, 1.0));
        let peak_class = features
            .chroma_means
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .unwrap()
            .0;
        assert_eq!(peak_class, 9);
    }

    #[test]
    fn silence_yields_finite_zeroed_record() {
        let stft = Stft::new();
        let pcm = PcmBuffer {
            samples: vec![0.0; SR as usize],
            sample_rate: SR,
        };
        let features = FeatureExtractor::extract(&stft, &pcm);
        assert_eq!(features.rms_mean, 0.0);
        assert_eq!(features.onset_rate, 0.0);
        assert_eq!(features.tempo, 0.0);
        assert_eq!(features.pitch_salience, 0.0);
        assert_all_finite(&features);
    }

    #[test]
    fn deterministic_across_runs() {
        let stft = Stft::new();
        let pcm = sine_pcm(523.25, 1.0);
        let a = FeatureExtractor::extract(&stft, &pcm);
        let b = FeatureExtractor::extract(&stft, &pcm);
        assert_eq!(a, b);
    }

    #[test]
    fn pulse_train_has_onsets_and_tempo() {
        // 120 BPM click train: 100 ms noise bursts every 0.5 s
        let n = 4 * SR as usize;
        let mut samples = vec![0.0f32; n];
        for beat in 0..8 {
            let start = beat * SR as usize / 2;
            for (i, sample) in samples[start..start + 3200].iter_mut().enumerate() {
                // Deterministic wideband burst
                let t = (start + i) as f32;
                *sample = ((t * 0.37).sin() * (t * 1.93).cos()).signum() * 0.8;
            }
        }
        let pcm = PcmBuffer {
            samples,
            sample_rate: SR,
        };

        let stft = Stft::new();
        let features = FeatureExtractor::extract(&stft, &pcm);
        assert!(features.onset_rate > 0.5, "onset_rate = {}", features.onset_rate);
        // Autocorrelation may lock onto a harmonic of the beat period
        assert!(features.tempo > 0.0);
        assert_all_finite(&features);
    }
}

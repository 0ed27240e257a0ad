//! Decoded-audio access
//!
//! Loads an audio file into a mono f32 buffer via symphonia and slices it
//! to a normalized time range. Everything downstream (features, Bark,
//! onsets) runs on the same slice.

use std::fs::File;
use std::path::Path;

use symphonia::core::audio::{AudioBufferRef, Signal};
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use thiserror::Error;

/// Audio analysis errors
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("failed to read audio file: {0}")]
    Read(String),

    #[error("unsupported audio format: {0}")]
    UnsupportedFormat(String),

    #[error("invalid time range: start={start} end={end}")]
    InvalidRange { start: f64, end: f64 },

    #[error("empty audio slice: start={start} end={end}")]
    EmptySlice { start: f64, end: f64 },

    #[error("analysis failed: {0}")]
    Failed(String),
}

/// A mono PCM buffer and its sample rate.
#[derive(Debug, Clone)]
pub struct PcmBuffer {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl PcmBuffer {
    pub fn duration(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }

    /// Slice to a normalized range [start, end] ⊂ [0, 1].
    pub fn slice_normalized(&self, start: f64, end: f64) -> Result<PcmBuffer, AnalysisError> {
        if !(0.0..1.0).contains(&start) || end <= start || end > 1.0 {
            return Err(AnalysisError::InvalidRange { start, end });
        }
        let n = self.samples.len();
        let first = (start * n as f64) as usize;
        let last = ((end * n as f64) as usize).min(n);
        if last <= first {
            return Err(AnalysisError::EmptySlice { start, end });
        }
        Ok(PcmBuffer {
            samples: self.samples[first..last].to_vec(),
            sample_rate: self.sample_rate,
        })
    }
}

/// Decode a file to mono f32 samples.
pub fn load_mono(path: &Path) -> Result<PcmBuffer, AnalysisError> {
    let file = File::open(path).map_err(|e| AnalysisError::Read(e.to_string()))?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension() {
        hint.with_extension(ext.to_str().unwrap_or(""));
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| AnalysisError::UnsupportedFormat(e.to_string()))?;

    let mut format = probed.format;
    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| AnalysisError::UnsupportedFormat("no valid audio track".to_string()))?;

    let track_id = track.id;
    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| AnalysisError::UnsupportedFormat("unknown sample rate".to_string()))?;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| AnalysisError::UnsupportedFormat(e.to_string()))?;

    let mut samples = Vec::new();
    loop {
        match format.next_packet() {
            Ok(packet) if packet.track_id() == track_id => match decoder.decode(&packet) {
                Ok(decoded) => extract_mono(&decoded, &mut samples)?,
                // Recoverable decode errors: skip the packet
                Err(_) => continue,
            },
            Ok(_) => continue,
            Err(_) => break,
        }
    }

    if samples.is_empty() {
        return Err(AnalysisError::Failed(format!(
            "no samples decoded from {}",
            path.display()
        )));
    }

    Ok(PcmBuffer {
        samples,
        sample_rate,
    })
}

/// Average all channels of a decoded buffer into mono.
fn extract_mono(buffer: &AudioBufferRef, out: &mut Vec<f32>) -> Result<(), AnalysisError> {
    macro_rules! mix_down {
        ($buf:expr, $to_f32:expr) => {{
            let channels = $buf.spec().channels.count();
            let frames = $buf.frames();
            out.reserve(frames);
            for frame in 0..frames {
                let mut sum = 0.0f32;
                for ch in 0..channels {
                    sum += $to_f32($buf.chan(ch)[frame]);
                }
                out.push(sum / channels as f32);
            }
        }};
    }

    match buffer {
        AudioBufferRef::F32(buf) => mix_down!(buf, |s: f32| s),
        AudioBufferRef::F64(buf) => mix_down!(buf, |s: f64| s as f32),
        AudioBufferRef::S16(buf) => mix_down!(buf, |s: i16| s as f32 / 32768.0),
        AudioBufferRef::S32(buf) => mix_down!(buf, |s: i32| s as f32 / 2_147_483_648.0),
        _ => {
            return Err(AnalysisError::UnsupportedFormat(
                "unsupported sample format".to_string(),
            ))
        }
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn write_sine_wav(
        path: &Path,
        freq: f32,
        duration_s: f32,
        sample_rate: u32,
    ) {
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

    #[test]
    fn loads_mono_wav() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sine.wav");
        write_sine_wav(&path, 440.0, 2.0, 32_000);

        let pcm = load_mono(&path).unwrap();
        assert_eq!(pcm.sample_rate, 32_000);
        assert!((pcm.duration() - 2.0).abs() < 0.01);
    }

    #[test]
    fn stereo_is_mixed_down() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stereo.wav");
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 44_100,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for t in 0..44_100 {
            let sample = (t as f32 * 440.0 * 2.0 * std::f32::consts::PI / 44_100.0).sin();
            let s = (sample * i16::MAX as f32) as i16;
            writer.write_sample(s).unwrap();
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();

        let pcm = load_mono(&path).unwrap();
        assert!((pcm.duration() - 1.0).abs() < 0.01);
    }

    #[test]
    fn slice_respects_normalized_range() {
        let pcm = PcmBuffer {
            samples: vec![0.0; 32_000],
            sample_rate: 32_000,
        };
        let half = pcm.slice_normalized(0.25, 0.75).unwrap();
        assert_eq!(half.samples.len(), 16_000);

        assert!(matches!(
            pcm.slice_normalized(0.5, 0.5),
            Err(AnalysisError::InvalidRange { .. })
        ));
        assert!(matches!(
            pcm.slice_normalized(-0.1, 0.5),
            Err(AnalysisError::InvalidRange { .. })
        ));
        assert!(matches!(
            pcm.slice_normalized(0.5, 1.1),
            Err(AnalysisError::InvalidRange { .. })
        ));
    }

    #[test]
    fn missing_file_is_read_error() {
        let err = load_mono(Path::new("/nonexistent/file.wav")).unwrap_err();
        assert!(matches!(err, AnalysisError::Read(_)));
    }
}

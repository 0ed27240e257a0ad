//! AI description generation
//!
//! Optional collaborator that turns a stored feature record into a short
//! evocative description via the Anthropic messages API. Only constructed
//! when `semantic.api_key` is configured; without it the command replies
//! with an error and nothing else changes.

use hibikido_common::db::models::Features;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

const API_URL: &str = "https://api.anthropic.com/v1/messages";
const MODEL: &str = "claude-3-5-sonnet-20241022";

#[derive(Debug, Error)]
pub enum SemanticError {
    #[error("description request failed: {0}")]
    Request(String),

    #[error("description API returned status {0}")]
    Status(u16),

    #[error("empty description returned")]
    Empty,
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    text: Option<String>,
}

pub struct DescriptionGenerator {
    client: reqwest::Client,
    api_key: String,
}

impl DescriptionGenerator {
    pub fn new(api_key: String) -> Self {
        info!("description generation enabled");
        Self {
            client: reqwest::Client::new(),
            api_key,
        }
    }

    /// Ask for a 15-20 word description of the analyzed sound.
    pub async fn generate(&self, features: &Features) -> Result<String, SemanticError> {
        let prompt = build_prompt(features);
        debug!("requesting description");

        let response = self
            .client
            .post(API_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&serde_json::json!({
                "model": MODEL,
                "max_tokens": 100,
                "messages": [{ "role": "user", "content": prompt }],
            }))
            .send()
            .await
            .map_err(|e| SemanticError::Request(e.to_string()))?;

        if !response.status().is_success() {
            return Err(SemanticError::Status(response.status().as_u16()));
        }

        let body: MessagesResponse = response
            .json()
            .await
            .map_err(|e| SemanticError::Request(e.to_string()))?;
        let description = body
            .content
            .first()
            .and_then(|block| block.text.as_deref())
            .map(str::trim)
            .unwrap_or_default()
            .to_string();
        if description.is_empty() {
            return Err(SemanticError::Empty);
        }
        Ok(description)
    }
}

fn build_prompt(f: &Features) -> String {
    let analysis = format!(
        "Audio file analysis:\n\
         - Duration: {:.2}s\n\
         - Tempo: {:.1} BPM\n\
         - Spectral centroid: {:.1} Hz (brightness)\n\
         - RMS energy: {:.4} (loudness)\n\
         - Harmonic ratio: {:.3} (tonal vs noisy)\n\
         - Percussive ratio: {:.3} (rhythmic elements)\n\
         - Onset rate: {:.2} events/second\n\
         - Attack time: {:.3}s (onset sharpness)\n\
         - Decay time: {:.3}s (fade characteristics)\n\
         - Sustained level: {:.4} (body/resonance)\n\
         - Dynamic range: {:.1} dB (amplitude variation)\n\
         - Dominant frequency band: {} (energy concentration)\n\
         - Spectral irregularity: {:.4} (texture roughness)\n\
         - Pitch salience: {:.3} (melodic vs textural character)\n\
         - Spectral entropy: {:.2} (chaos vs order)\n\
         - Roughness coefficient: {:.4} (sensory dissonance)",
        f.duration,
        f.tempo,
        f.spectral_centroid_mean,
        f.rms_mean,
        f.harmonic_ratio,
        f.percussive_ratio,
        f.onset_rate,
        f.attack_time,
        f.decay_time,
        f.sustained_level,
        f.dynamic_range,
        f.dominant_band,
        f.spectral_irregularity_mean,
        f.pitch_salience,
        f.spectral_entropy_mean,
        f.roughness,
    );

    format!(
        "You are describing a sound file to a deaf person using exactly 15-20 words. \
         Create an evocative, poetic description that captures the essence and character \
         of the sound based on this technical analysis:\n\n{analysis}\n\n\
         Focus on texture, mood, movement, and sonic character. Use vivid, sensory \
         language that would help someone imagine the sound.\n\n\
         Respond with only the 15-20 word description, nothing else."
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_includes_key_descriptors() {
        let features = Features {
            duration: 2.0,
            spectral_centroid_mean: 440.0,
            dominant_band: "mid".to_string(),
            ..Default::default()
        };
        let prompt = build_prompt(&features);
        assert!(prompt.contains("440.0 Hz"));
        assert!(prompt.contains("Dominant frequency band: mid"));
        assert!(prompt.contains("15-20 word"));
    }
}

//! Embedding text composition
//!
//! The string embedded for a segment is a deterministic function of its
//! own description, the parent recording's description, and any
//! batch-provided tags: non-empty parts joined with a single space,
//! lowercased, whitespace collapsed. Changing this function invalidates
//! the vector index; `rebuild_index` re-derives every row from it.

/// Compose the canonical embedding text for a segment.
///
/// Consecutive duplicate parts are dropped so that an auto-segment whose
/// description mirrors its recording does not double its own words.
pub fn compose_embedding_text(
    segment_description: &str,
    recording_description: &str,
    tags: &[String],
) -> String {
    let mut parts: Vec<String> = Vec::new();
    let mut push = |raw: &str| {
        let cleaned = normalize(raw);
        if cleaned.is_empty() {
            return;
        }
        if parts.last().map(String::as_str) == Some(cleaned.as_str()) {
            return;
        }
        parts.push(cleaned);
    };

    push(segment_description);
    push(recording_description);
    for tag in tags {
        push(tag);
    }

    parts.join(" ")
}

/// Compose the canonical embedding text for a preset: preset description
/// then effect description, same joining rule as segments.
pub fn compose_preset_embedding_text(
    preset_description: &str,
    effect_description: &str,
) -> String {
    compose_embedding_text(preset_description, effect_description, &[])
}

/// Lowercase and collapse runs of whitespace to single spaces.
fn normalize(text: &str) -> String {
    text.split_whitespace()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_lowercased_with_single_spaces() {
        let text = compose_embedding_text(
            "Metallic   Scraping",
            "Field Recording\tof a bridge",
            &["industrial".to_string()],
        );
        assert_eq!(text, "metallic scraping field recording of a bridge industrial");
    }

    #[test]
    fn empty_parts_are_skipped() {
        let text = compose_embedding_text("", "Drone", &["  ".to_string()]);
        assert_eq!(text, "drone");
    }

    #[test]
    fn duplicate_adjacent_parts_collapse() {
        // Auto-segments inherit the recording description verbatim
        let text = compose_embedding_text("Atmospheric Drone", "atmospheric drone", &[]);
        assert_eq!(text, "atmospheric drone");
    }

    #[test]
    fn deterministic() {
        let a = compose_embedding_text("a B", "c", &["d".to_string()]);
        let b = compose_embedding_text("a B", "c", &["d".to_string()]);
        assert_eq!(a, b);
    }
}

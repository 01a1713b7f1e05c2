//! Converts settled recognition results into ordered dialogue segments.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::matchers::{default_matchers, SegmentMatcher};
use super::roles::{batch_has_self_marker, resolve_role};
use crate::pipeline::recognition::{ImageItem, OcrResult, SpeakerSide};

/// A segment's trimmed text must exceed this many characters.
pub const MIN_SEGMENT_CHARS: usize = 3;

/// One candidate dialogue line surfaced for user selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextSegment {
    /// Unique within the batch, assigned in list order.
    pub id: u32,
    pub text: String,
    pub selected: bool,
    /// Provenance label naming the originating image.
    pub source: String,
    pub speaker_side: SpeakerSide,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speaker_name: Option<String>,
}

/// Collect segments for a whole batch: image-intake order, then
/// in-image order. Only `Done` items contribute; earlier images'
/// segments are never revisited while later ones are produced.
pub fn segment_batch(items: &[ImageItem]) -> Vec<TextSegment> {
    let two_party = batch_has_self_marker(
        items
            .iter()
            .filter_map(|i| i.result.as_ref())
            .flat_map(|r| r.structured_messages.iter()),
    );
    let matchers = default_matchers();

    let mut segments = Vec::new();
    let mut next_id = 0u32;
    for item in items {
        let Some(result) = item.result.as_ref() else {
            continue;
        };
        for (text, side, name) in segment_result(result, two_party, &matchers) {
            segments.push(TextSegment {
                id: next_id,
                text,
                selected: true,
                source: item.label.clone(),
                speaker_side: side,
                speaker_name: name,
            });
            next_id += 1;
        }
    }

    debug!(segments = segments.len(), two_party, "batch segmented");
    segments
}

/// Segment one image's result: structured bypass when the service
/// already attributed speakers, heuristic splitting otherwise. Every
/// candidate is trimmed; anything at or under `MIN_SEGMENT_CHARS`
/// characters is dropped.
pub fn segment_result(
    result: &OcrResult,
    two_party: bool,
    matchers: &[Box<dyn SegmentMatcher>],
) -> Vec<(String, SpeakerSide, Option<String>)> {
    if !result.structured_messages.is_empty() {
        return result
            .structured_messages
            .iter()
            .filter_map(|message| {
                let text = message.text.trim();
                if text.chars().count() <= MIN_SEGMENT_CHARS {
                    return None;
                }
                let (side, name) = resolve_role(message, two_party);
                Some((text.to_string(), side, Some(name)))
            })
            .collect();
    }

    let mut candidates = Vec::new();
    for matcher in matchers {
        if let Some(parts) = matcher.split(&result.text) {
            debug!(matcher = matcher.name(), parts = parts.len(), "flat text split");
            candidates = parts;
            break;
        }
    }

    candidates
        .into_iter()
        .filter_map(|raw| {
            let trimmed = raw.trim();
            (trimmed.chars().count() > MIN_SEGMENT_CHARS)
                .then(|| (trimmed.to_string(), SpeakerSide::Left, None))
        })
        .collect()
}

//! Batch-wide speaker-role resolution for structured messages.
//!
//! Role mapping is decided once per batch, not per image: a transcript
//! only gets a self/other split when at least one message anywhere in
//! the batch carries an explicit self marker. Without one, a single
//! screenshot of the other party's messages would otherwise be
//! misattributed.

use crate::pipeline::recognition::{SpeakerSide, StructuredMessage};

/// The recognition service's self-referential label (the device owner).
pub const SELF_LABEL: &str = "我";

/// Label for the other party.
pub const OTHER_LABEL: &str = "对方";

/// True when any structured message in the batch marks the device owner:
/// a right-side bubble, or the self-referential speaker name.
pub fn batch_has_self_marker<'a>(
    mut messages: impl Iterator<Item = &'a StructuredMessage>,
) -> bool {
    messages.any(|m| {
        m.speaker_side == Some(SpeakerSide::Right)
            || m.speaker_name.as_deref() == Some(SELF_LABEL)
    })
}

/// Resolve one message's role under the batch-wide policy.
///
/// Two-party batches take sides literally, defaulting untagged entries
/// to the other party; otherwise everything maps to left/other,
/// regardless of per-message tags.
pub fn resolve_role(message: &StructuredMessage, two_party: bool) -> (SpeakerSide, String) {
    if !two_party {
        return (SpeakerSide::Left, OTHER_LABEL.to_string());
    }
    let side = message.speaker_side.unwrap_or(SpeakerSide::Left);
    let name = message.speaker_name.clone().unwrap_or_else(|| {
        match side {
            SpeakerSide::Right => SELF_LABEL.to_string(),
            SpeakerSide::Left => OTHER_LABEL.to_string(),
        }
    });
    (side, name)
}

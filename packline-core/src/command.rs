//! Voice command phrases and transcript parsing.
//!
//! Recognition transcripts arrive as live, monotonically-improving strings
//! (possibly partial). Parsing is case-insensitive substring containment —
//! first matching phrase wins for the listening turn.

/// The two fixed command phrases a listening turn understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceCommand {
    /// "next item" — complete the current item and move on.
    NextItem,
    /// "repeat item" — announce the current step again.
    RepeatItem,
}

pub const NEXT_ITEM_PHRASE: &str = "next item";
pub const REPEAT_ITEM_PHRASE: &str = "repeat item";

/// Parse a transcript for a known command phrase.
///
/// Returns the first phrase contained in the transcript, checking advance
/// before repeat so "next item repeat item" still moves forward.
pub fn parse_transcript(transcript: &str) -> Option<VoiceCommand> {
    let lowered = transcript.to_lowercase();
    if lowered.contains(NEXT_ITEM_PHRASE) {
        Some(VoiceCommand::NextItem)
    } else if lowered.contains(REPEAT_ITEM_PHRASE) {
        Some(VoiceCommand::RepeatItem)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_next_item_case_insensitively() {
        assert_eq!(parse_transcript("Next Item"), Some(VoiceCommand::NextItem));
        assert_eq!(
            parse_transcript("uh NEXT ITEM please"),
            Some(VoiceCommand::NextItem)
        );
    }

    #[test]
    fn recognizes_repeat_item_inside_partial_transcript() {
        assert_eq!(
            parse_transcript("could you repeat ite"),
            None,
            "partial phrase must not fire"
        );
        assert_eq!(
            parse_transcript("could you repeat item"),
            Some(VoiceCommand::RepeatItem)
        );
    }

    #[test]
    fn unknown_speech_yields_no_command() {
        assert_eq!(parse_transcript("what was that again"), None);
        assert_eq!(parse_transcript(""), None);
    }

    #[test]
    fn first_match_wins_when_both_phrases_appear() {
        assert_eq!(
            parse_transcript("repeat item no wait next item"),
            Some(VoiceCommand::NextItem)
        );
    }
}

//! Completion detection over raw stream chunks.
//!
//! Backends expose no structured "generation finished" signal, so completion
//! is inferred from well-known substrings in the streamed JSON lines. Matching
//! is case-sensitive and per chunk; a marker split across two chunks is missed,
//! which the stream-end and fallback paths absorb.

/// A versioned set of completion markers.
#[derive(Clone, Copy, Debug)]
pub struct MarkerSet {
    /// Bumped whenever the marker list changes.
    pub version: u32,
    /// Substrings that indicate a finished generation.
    pub markers: &'static [&'static str],
}

impl MarkerSet {
    /// Whether any marker occurs in `text`.
    pub fn matches(&self, text: &str) -> bool {
        self.markers.iter().any(|m| text.contains(m))
    }
}

/// Markers recognised by [`detect`].
pub const COMPLETION_MARKERS: MarkerSet = MarkerSet {
    version: 1,
    markers: &[
        // result messages
        r#""type":"result""#,
        r#""type": "result""#,
        // stop reasons
        r#""stop_reason":"end_turn""#,
        r#""stop_reason": "end_turn""#,
        // message stop
        r#""type":"message_stop""#,
        r#""type": "message_stop""#,
        // stream closed
        r#""type":"closed""#,
        r#""type": "closed""#,
    ],
};

/// Whether `chunk` contains a completion marker.
///
/// Invalid UTF-8 is decoded lossily, so a marker next to a broken multi-byte
/// sequence is still found.
pub fn detect(chunk: &[u8]) -> bool {
    if chunk.is_empty() {
        return false;
    }
    COMPLETION_MARKERS.matches(&String::from_utf8_lossy(chunk))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_message_is_completion() {
        let chunk = br#"data: {"type":"claude_message","data":{"type":"result","subtype":"success"}}"#;
        assert!(detect(chunk));
    }

    #[test]
    fn every_marker_is_detected() {
        for marker in COMPLETION_MARKERS.markers {
            let chunk = format!("data: {{{marker}}}\n\n");
            assert!(detect(chunk.as_bytes()), "marker {marker} not detected");
        }
    }

    #[test]
    fn ordinary_prose_is_not_completion() {
        assert!(!detect(b"data: {\"type\":\"assistant\",\"text\":\"the result is 42\"}\n\n"));
        assert!(!detect(b"hello world"));
    }

    #[test]
    fn empty_chunk_is_not_completion() {
        assert!(!detect(b""));
    }

    #[test]
    fn matching_is_case_sensitive() {
        assert!(!detect(br#"{"TYPE":"RESULT"}"#));
        assert!(!detect(br#"{"type":"Result"}"#));
    }

    #[test]
    fn invalid_utf8_around_marker_still_matches() {
        let mut chunk = vec![0xff, 0xfe];
        chunk.extend_from_slice(br#"{"type":"message_stop"}"#);
        chunk.push(0xc3);
        assert!(detect(&chunk));
    }

    #[test]
    fn marker_set_is_versioned() {
        assert!(COMPLETION_MARKERS.version >= 1);
        assert!(!COMPLETION_MARKERS.markers.is_empty());
    }
}

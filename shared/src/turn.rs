use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Phase of the conversational turn owned by the interrupt controller.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TurnState {
    #[default]
    Idle,
    Listening,
    Processing,
    Responding,
    Interrupted,
    Continuation,
}

impl TurnState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnState::Idle => "idle",
            TurnState::Listening => "listening",
            TurnState::Processing => "processing",
            TurnState::Responding => "responding",
            TurnState::Interrupted => "interrupted",
            TurnState::Continuation => "continuation",
        }
    }
}

impl fmt::Display for TurnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A transcribed piece of speech belonging to the current turn.
///
/// Segments are immutable once created; fields are only readable.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct BufferSegment {
    text: String,
    captured_at: DateTime<Utc>,
    is_interrupt: bool,
}

impl BufferSegment {
    pub fn new(text: impl Into<String>, is_interrupt: bool) -> Self {
        Self::captured_at(text, Utc::now(), is_interrupt)
    }

    pub fn captured_at(text: impl Into<String>, at: DateTime<Utc>, is_interrupt: bool) -> Self {
        Self {
            text: text.into(),
            captured_at: at,
            is_interrupt,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.captured_at
    }

    pub fn is_interrupt(&self) -> bool {
        self.is_interrupt
    }
}

/// Produced once per barge-in and handed to the caller.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct InterruptEvent {
    /// 16-bit mono PCM captured from the triggering chunk onwards.
    #[serde(skip)]
    pub captured_audio: Vec<u8>,
    pub energy_at_detection: f32,
    pub detected_at: DateTime<Utc>,
    /// Milliseconds between the start of playback and detection.
    pub detected_after_ms: u64,
    /// Length of `captured_audio`.
    pub duration_ms: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct TranscriptionResult {
    pub text: String,
    pub confidence: f32,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub duration_ms: u64,
}

impl TranscriptionResult {
    pub fn new(text: impl Into<String>, confidence: f32) -> Self {
        Self {
            text: text.into(),
            confidence,
            ..Default::default()
        }
    }
}

/// Notifications published by the controller to its owner.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEvent {
    StateChanged { from: TurnState, to: TurnState },
    SegmentAppended { text: String, is_interrupt: bool },
    InterruptDetected { energy: f32, detected_after_ms: u64 },
    ContinuationExpired,
    ContinuationCancelled,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_test::{assert_tokens, Token};

    #[test]
    fn test_turn_state_tokens() {
        assert_tokens(
            &TurnState::Idle,
            &[Token::UnitVariant {
                name: "TurnState",
                variant: "IDLE",
            }],
        );
        assert_tokens(
            &TurnState::Continuation,
            &[Token::UnitVariant {
                name: "TurnState",
                variant: "CONTINUATION",
            }],
        );
    }

    #[test]
    fn test_turn_state_default_and_display() {
        assert_eq!(TurnState::default(), TurnState::Idle);
        assert_eq!(TurnState::Interrupted.to_string(), "interrupted");
    }

    #[test]
    fn test_buffer_segment_accessors() {
        let at = Utc::now();
        let segment = BufferSegment::captured_at("in Austin", at, true);
        assert_eq!(segment.text(), "in Austin");
        assert_eq!(segment.timestamp(), at);
        assert!(segment.is_interrupt());
    }

    #[test]
    fn test_interrupt_event_json_omits_audio() {
        let event = InterruptEvent {
            captured_audio: vec![1, 2, 3, 4],
            energy_at_detection: 812.5,
            detected_at: Utc::now(),
            detected_after_ms: 200,
            duration_ms: 60,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(!json.contains("captured_audio"));
        assert!(json.contains("\"detected_after_ms\":200"));

        let parsed: InterruptEvent = serde_json::from_str(&json).unwrap();
        assert!(parsed.captured_audio.is_empty());
        assert_eq!(parsed.energy_at_detection, 812.5);
    }

    #[test]
    fn test_turn_event_serialization() {
        let event = TurnEvent::StateChanged {
            from: TurnState::Responding,
            to: TurnState::Interrupted,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(
            json,
            r#"{"type":"state_changed","from":"RESPONDING","to":"INTERRUPTED"}"#
        );

        let json = serde_json::to_string(&TurnEvent::ContinuationExpired).unwrap();
        assert_eq!(json, r#"{"type":"continuation_expired"}"#);
    }

    #[test]
    fn test_transcription_result_defaults_missing_fields() {
        let parsed: TranscriptionResult =
            serde_json::from_str(r#"{"text":"hold on","confidence":0.8}"#).unwrap();
        assert_eq!(parsed, TranscriptionResult::new("hold on", 0.8));
    }
}

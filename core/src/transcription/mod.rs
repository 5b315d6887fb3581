pub mod fake;
#[cfg(feature = "whisper")]
pub mod whisper;

pub use fake::FakeTranscriber;
pub use shared::TranscriptionResult;
#[cfg(feature = "whisper")]
pub use whisper::WhisperTranscriber;

use crate::error::TurnResult;
use regex::Regex;
use std::sync::OnceLock;

/// Speech-to-text backend.
pub trait Transcriber: Send + Sync {
    /// `audio` is 16-bit mono PCM at `sample_rate`.
    fn transcribe(&self, audio: &[u8], sample_rate: u32) -> TurnResult<TranscriptionResult>;
}

fn annotation_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\[.*?\]|\{.*?\}|\(.*?\)").expect("annotation pattern is valid")
    })
}

/// Cleans up raw transcriber output: drops bracketed annotations such as
/// `[BLANK_AUDIO]`, collapses immediately repeated words and whitespace.
pub fn post_process_transcription(text: &str) -> String {
    let stripped = annotation_pattern().replace_all(text, " ");

    let mut deduped: Vec<&str> = Vec::new();
    for word in stripped.split_whitespace() {
        if deduped.last() != Some(&word) {
            deduped.push(word);
        }
    }
    let cleaned = deduped.join(" ");

    tracing::debug!("Post-processed: '{}' -> '{}'", text.trim(), cleaned);
    cleaned
}

use super::{Transcriber, TranscriptionResult};
use crate::error::{TurnError, TurnResult};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

/// Returns queued results in order, then empty text.
#[derive(Default)]
pub struct FakeTranscriber {
    queue: Mutex<VecDeque<TurnResult<TranscriptionResult>>>,
    calls: Mutex<Vec<(usize, u32)>>,
}

impl FakeTranscriber {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn replying(texts: impl IntoIterator<Item = &'static str>) -> Self {
        let fake = Self::new();
        for text in texts {
            fake.push_text(text);
        }
        fake
    }

    pub fn push_text(&self, text: &str) {
        self.queue().push_back(Ok(TranscriptionResult::new(text, 0.9)));
    }

    pub fn push_failure(&self, message: &str) {
        self.queue()
            .push_back(Err(TurnError::Transcription(message.to_string())));
    }

    /// `(byte length, sample rate)` of every audio buffer received.
    pub fn calls(&self) -> Vec<(usize, u32)> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn queue(&self) -> MutexGuard<'_, VecDeque<TurnResult<TranscriptionResult>>> {
        self.queue.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Transcriber for FakeTranscriber {
    fn transcribe(&self, audio: &[u8], sample_rate: u32) -> TurnResult<TranscriptionResult> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((audio.len(), sample_rate));

        let mut result = self
            .queue()
            .pop_front()
            .unwrap_or_else(|| Ok(TranscriptionResult::default()))?;
        result.duration_ms = shared::audio::pcm16_duration_ms(audio.len(), sample_rate);
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replies_in_order_then_empty() {
        let fake = FakeTranscriber::replying(["in Austin", "hold on"]);
        assert_eq!(fake.transcribe(&[0; 3200], 16000).unwrap().text, "in Austin");
        assert_eq!(fake.transcribe(&[], 16000).unwrap().text, "hold on");
        assert_eq!(fake.transcribe(&[], 16000).unwrap().text, "");
        assert_eq!(fake.calls(), vec![(3200, 16000), (0, 16000), (0, 16000)]);
    }

    #[test]
    fn test_failure_and_duration() {
        let fake = FakeTranscriber::new();
        fake.push_failure("model crashed");
        fake.push_text("ok");
        assert!(matches!(
            fake.transcribe(&[], 16000),
            Err(TurnError::Transcription(_))
        ));
        assert_eq!(fake.transcribe(&[0; 32000], 16000).unwrap().duration_ms, 1000);
    }
}

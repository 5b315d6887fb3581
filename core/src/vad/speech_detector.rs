use tracing::{debug, info};

use super::energy::AudioEnergyAnalyzer;
use shared::AudioChunk;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SpeechState {
    Idle,
    Speaking,
    SilenceDetected,
}

/// Records one utterance and ends it after a run of silence.
///
/// Silence and length are measured in audio time (chunk durations), so the
/// outcome does not depend on how quickly chunks are delivered.
pub struct SpeechDetector {
    state: SpeechState,
    analyzer: AudioEnergyAnalyzer,
    speech_buffer: Vec<u8>,
    silence_ms: u64,
    recorded_ms: u64,
    silence_timeout_ms: u64,
    max_utterance_ms: u64,
}

impl SpeechDetector {
    pub fn new(analyzer: AudioEnergyAnalyzer, silence_timeout_ms: u64, max_utterance_ms: u64) -> Self {
        debug!(
            "SpeechDetector initialized: threshold={:.1}, silence_timeout_ms={}, max_utterance_ms={}",
            analyzer.threshold(),
            silence_timeout_ms,
            max_utterance_ms
        );

        Self {
            state: SpeechState::Idle,
            analyzer,
            speech_buffer: Vec::new(),
            silence_ms: 0,
            recorded_ms: 0,
            silence_timeout_ms,
            max_utterance_ms,
        }
    }

    /// Continues an utterance that is already in progress, e.g. speech that
    /// triggered a barge-in.
    pub fn resume_with(&mut self, captured: &[u8], captured_ms: u64) {
        self.speech_buffer.extend_from_slice(captured);
        self.recorded_ms = captured_ms;
        self.silence_ms = 0;
        self.state = SpeechState::Speaking;
    }

    /// Feeds one chunk. Returns the finished utterance once silence has lasted
    /// for the timeout or the utterance hit its maximum length. The returned
    /// buffer may be empty when nothing but silence was heard.
    pub fn process_chunk(&mut self, chunk: &AudioChunk) -> Option<Vec<u8>> {
        let vad_result = self.analyzer.detect(&chunk.data);
        let chunk_ms = chunk.duration_ms();

        match self.state {
            SpeechState::Idle => {
                if vad_result.is_speech {
                    self.state = SpeechState::Speaking;
                    self.silence_ms = 0;
                    self.record(chunk, chunk_ms);
                    debug!("State transition: Idle → Speaking");
                } else {
                    self.silence_ms += chunk_ms;
                }
            }
            SpeechState::Speaking => {
                self.record(chunk, chunk_ms);
                if !vad_result.is_speech {
                    self.state = SpeechState::SilenceDetected;
                    self.silence_ms = chunk_ms;
                    debug!("State transition: Speaking → SilenceDetected");
                }
            }
            SpeechState::SilenceDetected => {
                self.record(chunk, chunk_ms);
                if vad_result.is_speech {
                    self.state = SpeechState::Speaking;
                    self.silence_ms = 0;
                    debug!("State transition: SilenceDetected → Speaking (false alarm)");
                } else {
                    self.silence_ms += chunk_ms;
                }
            }
        }

        if self.silence_ms >= self.silence_timeout_ms {
            info!(
                "Utterance complete after {} ms of silence ({} ms recorded)",
                self.silence_ms, self.recorded_ms
            );
            return Some(self.finish());
        }
        if self.recorded_ms >= self.max_utterance_ms {
            info!("Utterance reached maximum length of {} ms", self.max_utterance_ms);
            return Some(self.finish());
        }
        None
    }

    /// Ends the utterance early and returns what was recorded so far.
    pub fn finish(&mut self) -> Vec<u8> {
        let speech = std::mem::take(&mut self.speech_buffer);
        self.state = SpeechState::Idle;
        self.silence_ms = 0;
        self.recorded_ms = 0;
        speech
    }

    pub fn is_speaking(&self) -> bool {
        matches!(
            self.state,
            SpeechState::Speaking | SpeechState::SilenceDetected
        )
    }

    pub fn state(&self) -> SpeechState {
        self.state
    }

    fn record(&mut self, chunk: &AudioChunk, chunk_ms: u64) {
        self.speech_buffer.extend_from_slice(&chunk.data);
        self.recorded_ms += chunk_ms;
    }
}

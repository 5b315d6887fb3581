use super::keyword::ControlPhrases;
use tracing::debug;

pub const DEFAULT_ENERGY_THRESHOLD: f32 = 750.0;

/// RMS energy voice-activity signal plus spoken control-phrase matching.
#[derive(Debug, Clone)]
pub struct AudioEnergyAnalyzer {
    threshold: f32,
    phrases: ControlPhrases,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VadResult {
    pub is_speech: bool,
    pub energy: f32,
}

impl Default for AudioEnergyAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioEnergyAnalyzer {
    pub fn new() -> Self {
        Self::with_threshold(DEFAULT_ENERGY_THRESHOLD)
    }

    pub fn with_threshold(threshold: f32) -> Self {
        Self {
            threshold,
            phrases: ControlPhrases::default(),
        }
    }

    pub fn with_phrases(mut self, phrases: ControlPhrases) -> Self {
        self.phrases = phrases;
        self
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// RMS amplitude of little-endian 16-bit mono PCM.
    ///
    /// Buffers shorter than one sample yield 0.0; a trailing odd byte is
    /// ignored.
    pub fn energy(&self, chunk: &[u8]) -> f32 {
        if chunk.len() < 2 {
            return 0.0;
        }
        let (sum, count) = chunk
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f64)
            .fold((0.0f64, 0usize), |(sum, n), s| (sum + s * s, n + 1));
        (sum / count as f64).sqrt() as f32
    }

    pub fn detect(&self, chunk: &[u8]) -> VadResult {
        let energy = self.energy(chunk);
        let is_speech = energy > self.threshold;

        debug!(
            "Audio energy: {:.1}, threshold: {:.1}, is_speech: {}",
            energy, self.threshold, is_speech
        );

        VadResult { is_speech, energy }
    }

    pub fn keyword_match(&self, text: &str) -> bool {
        self.phrases.matches(text)
    }
}

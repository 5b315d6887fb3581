use super::{Transcriber, TranscriptionResult};
use crate::error::{TurnError, TurnResult};
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info, warn};
use whisper_rs::{
    FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters, WhisperState,
};

/// Whisper wants at least one second of audio.
const MIN_AUDIO_SECONDS: usize = 1;

pub struct WhisperTranscriber {
    _context: WhisperContext,
    state: Mutex<WhisperState>,
    language: String,
    use_beam_search: bool,
}

impl WhisperTranscriber {
    pub fn load(model_path: &Path, language: &str, sampling_strategy: &str) -> TurnResult<Self> {
        info!("Loading Whisper model from: {:?}", model_path);

        let path = model_path
            .to_str()
            .ok_or_else(|| TurnError::Config(format!("Invalid model path: {:?}", model_path)))?;
        let context = WhisperContext::new_with_params(path, WhisperContextParameters::default())
            .map_err(|e| TurnError::Transcription(format!("Failed to load Whisper model: {}", e)))?;
        let state = context
            .create_state()
            .map_err(|e| TurnError::Transcription(format!("Failed to create Whisper state: {}", e)))?;

        let use_beam_search = match sampling_strategy.to_lowercase().as_str() {
            "greedy" => false,
            "beam" => true,
            other => {
                warn!("Unknown sampling strategy '{}', defaulting to greedy", other);
                false
            }
        };

        info!("Whisper model and state loaded successfully");
        Ok(Self {
            _context: context,
            state: Mutex::new(state),
            language: language.to_string(),
            use_beam_search,
        })
    }

    fn sampling_strategy(&self) -> SamplingStrategy {
        if self.use_beam_search {
            SamplingStrategy::BeamSearch {
                beam_size: 5,
                patience: 1.0,
            }
        } else {
            SamplingStrategy::Greedy { best_of: 1 }
        }
    }
}

fn to_padded_f32(audio: &[u8], sample_rate: u32) -> Vec<f32> {
    let mut samples: Vec<f32> = shared::audio::pcm16_to_samples(audio)
        .into_iter()
        .map(|s| s as f32 / i16::MAX as f32)
        .collect();
    let min_samples = sample_rate as usize * MIN_AUDIO_SECONDS;
    if samples.len() < min_samples {
        samples.resize(min_samples, 0.0);
    }
    samples
}

impl Transcriber for WhisperTranscriber {
    fn transcribe(&self, audio: &[u8], sample_rate: u32) -> TurnResult<TranscriptionResult> {
        let samples = to_padded_f32(audio, sample_rate);
        debug!("Transcribing {} samples with language: {}", samples.len(), self.language);

        let mut params = FullParams::new(self.sampling_strategy());
        params.set_print_special(false);
        params.set_print_progress(false);
        params.set_print_realtime(false);
        params.set_print_timestamps(false);
        params.set_language(Some(&self.language));

        let mut state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        state
            .full(params, &samples)
            .map_err(|e| TurnError::Transcription(format!("Transcription failed: {}", e)))?;

        let mut text = String::new();
        for i in 0..state.full_n_segments() {
            if let Some(segment) = state.get_segment(i) {
                if let Ok(piece) = segment.to_str() {
                    text.push_str(piece);
                    text.push(' ');
                }
            }
        }

        let result = TranscriptionResult {
            text: text.trim().to_string(),
            confidence: 1.0,
            language: Some(self.language.clone()),
            duration_ms: shared::audio::pcm16_duration_ms(audio.len(), sample_rate),
        };
        debug!("Transcription: '{}' ({} ms)", result.text, result.duration_ms);
        Ok(result)
    }
}

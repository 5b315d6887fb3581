pub mod audio;
pub mod buffer;
pub mod config;
pub mod continuation;
pub mod controller;
pub mod error;
pub mod transcription;
pub mod vad;

pub use audio::{AudioCapture, AudioPlayback};
pub use buffer::RequestBuffer;
pub use config::Config;
pub use continuation::{ContinuationWindow, ExpireCallback};
pub use controller::InterruptController;
pub use error::{TurnError, TurnResult};
pub use shared::{BufferSegment, InterruptEvent, TurnEvent, TurnState};
pub use transcription::Transcriber;
pub use vad::{AudioEnergyAnalyzer, ControlPhrases, SpeechDetector};

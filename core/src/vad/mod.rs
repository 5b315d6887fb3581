pub mod energy;
pub mod keyword;
pub mod speech_detector;

pub use energy::{AudioEnergyAnalyzer, VadResult};
pub use keyword::ControlPhrases;
pub use speech_detector::SpeechDetector;

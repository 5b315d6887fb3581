pub mod audio;
pub mod turn;

pub use audio::{AudioChunk, FormatError};
pub use turn::{BufferSegment, InterruptEvent, TranscriptionResult, TurnEvent, TurnState};

//! Audio device seams used by the controller.
//!
//! The controller only ever talks to these traits. `CpalCapture` and
//! `RodioPlayback` drive real hardware; the `fake` module provides
//! deterministic stand-ins for tests.

pub mod capture;
pub mod fake;
pub mod playback;

pub use capture::CpalCapture;
pub use fake::{FakeCapture, FakePlayback};
pub use playback::RodioPlayback;
pub use shared::AudioChunk;

use crate::error::TurnResult;
use std::time::Duration;

/// Microphone input producing 16-bit mono PCM chunks.
///
/// Methods take `&self` so a single handle can be shared between the caller
/// and the monitor thread.
pub trait AudioCapture: Send + Sync {
    fn start(&self) -> TurnResult<()>;

    /// Idempotent.
    fn stop(&self) -> TurnResult<()>;

    fn is_active(&self) -> bool;

    /// Waits up to `timeout` for the next chunk. `Ok(None)` means nothing
    /// arrived in time or the device is not running.
    fn read_chunk(&self, timeout: Duration) -> TurnResult<Option<AudioChunk>>;

    /// Blocking chunk iterator that ends once the device is stopped.
    fn stream(&self) -> CaptureStream<'_>
    where
        Self: Sized,
    {
        CaptureStream::new(self)
    }
}

pub trait AudioPlayback: Send + Sync {
    /// Starts playing 16-bit mono PCM and returns immediately.
    fn play_async(&self, audio: &[u8], sample_rate: u32) -> TurnResult<()>;

    /// Idempotent; takes effect within the playback-stop timeout.
    fn stop(&self) -> TurnResult<()>;

    fn is_playing(&self) -> bool;
}

const STREAM_POLL: Duration = Duration::from_millis(100);

pub struct CaptureStream<'a> {
    capture: &'a dyn AudioCapture,
}

impl<'a> CaptureStream<'a> {
    pub fn new(capture: &'a dyn AudioCapture) -> Self {
        Self { capture }
    }
}

impl Iterator for CaptureStream<'_> {
    type Item = TurnResult<AudioChunk>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.capture.read_chunk(STREAM_POLL) {
                Ok(Some(chunk)) => return Some(Ok(chunk)),
                Ok(None) if self.capture.is_active() => continue,
                Ok(None) => return None,
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_ends_when_capture_stops() {
        let capture = FakeCapture::with_amplitudes(16000, 10, vec![0, 1000, 0]);
        capture.start().unwrap();

        let mut seen = 0;
        for chunk in capture.stream() {
            chunk.unwrap();
            seen += 1;
            if seen == 3 {
                capture.stop().unwrap();
            }
        }

        assert_eq!(seen, 3);
        assert!(!capture.is_active());
    }

    #[test]
    fn test_stream_on_inactive_capture_is_empty() {
        let capture = FakeCapture::silent(16000, 10);
        assert_eq!(capture.stream().count(), 0);
    }
}

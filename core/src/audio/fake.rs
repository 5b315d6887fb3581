//! Deterministic capture and playback devices.
//!
//! `FakeCapture` replays a script of per-chunk amplitudes in real time, so
//! timing-dependent controller behaviour can be exercised without hardware.
//! The script position survives stop/start, which models one continuous
//! stream of user speech across capture sessions.

use super::{AudioCapture, AudioChunk, AudioPlayback};
use crate::error::{TurnError, TurnResult};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

const MAX_SLEEP: Duration = Duration::from_millis(5);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Default)]
struct CaptureInner {
    script: VecDeque<i16>,
    active: bool,
    session_start: Option<Instant>,
    session_chunks: u32,
    total_chunks: usize,
    start_count: usize,
    stop_count: usize,
    overlapping_starts: usize,
    fail_reads_after: Option<usize>,
    malformed_after: Option<usize>,
    fail_next_start: Option<String>,
}

pub struct FakeCapture {
    sample_rate: u32,
    chunk_ms: u64,
    inner: Mutex<CaptureInner>,
}

impl FakeCapture {
    /// Every chunk is silence.
    pub fn silent(sample_rate: u32, chunk_ms: u64) -> Self {
        Self::with_amplitudes(sample_rate, chunk_ms, Vec::new())
    }

    /// One amplitude per chunk, in order; silence once the script runs out.
    pub fn with_amplitudes(sample_rate: u32, chunk_ms: u64, amplitudes: Vec<i16>) -> Self {
        Self {
            sample_rate,
            chunk_ms: chunk_ms.max(1),
            inner: Mutex::new(CaptureInner {
                script: amplitudes.into(),
                ..Default::default()
            }),
        }
    }

    pub fn push_amplitudes(&self, amplitudes: impl IntoIterator<Item = i16>) {
        lock(&self.inner).script.extend(amplitudes);
    }

    /// Reads fail with a device error once `chunks` chunks have been delivered.
    pub fn fail_reads_after(&self, chunks: usize) {
        lock(&self.inner).fail_reads_after = Some(chunks);
    }

    /// Chunks delivered after the first `chunks` report a zero sample rate.
    pub fn malformed_after(&self, chunks: usize) {
        lock(&self.inner).malformed_after = Some(chunks);
    }

    pub fn fail_next_start(&self, message: impl Into<String>) {
        lock(&self.inner).fail_next_start = Some(message.into());
    }

    pub fn start_count(&self) -> usize {
        lock(&self.inner).start_count
    }

    pub fn stop_count(&self) -> usize {
        lock(&self.inner).stop_count
    }

    /// Number of `start()` calls made while the device was already running.
    pub fn overlapping_starts(&self) -> usize {
        lock(&self.inner).overlapping_starts
    }

    pub fn chunks_delivered(&self) -> usize {
        lock(&self.inner).total_chunks
    }

    pub fn chunk_duration(&self) -> Duration {
        Duration::from_millis(self.chunk_ms)
    }

    fn make_chunk(&self, amplitude: i16, timestamp_ms: u64) -> AudioChunk {
        let count = (self.sample_rate as u64 * self.chunk_ms / 1000).max(1) as usize;
        let samples: Vec<i16> = (0..count)
            .map(|i| if i % 2 == 0 { amplitude } else { amplitude.saturating_neg() })
            .collect();
        AudioChunk::from_samples(&samples, self.sample_rate, timestamp_ms)
    }
}

impl AudioCapture for FakeCapture {
    fn start(&self) -> TurnResult<()> {
        let mut inner = lock(&self.inner);
        if let Some(message) = inner.fail_next_start.take() {
            return Err(TurnError::AudioDevice(message));
        }
        if inner.active {
            inner.overlapping_starts += 1;
            return Err(TurnError::AudioDevice("capture already active".to_string()));
        }
        inner.active = true;
        inner.session_start = Some(Instant::now());
        inner.session_chunks = 0;
        inner.start_count += 1;
        Ok(())
    }

    fn stop(&self) -> TurnResult<()> {
        let mut inner = lock(&self.inner);
        if inner.active {
            inner.active = false;
            inner.stop_count += 1;
        }
        Ok(())
    }

    fn is_active(&self) -> bool {
        lock(&self.inner).active
    }

    fn read_chunk(&self, timeout: Duration) -> TurnResult<Option<AudioChunk>> {
        let deadline = Instant::now() + timeout;
        loop {
            let wait = {
                let mut inner = lock(&self.inner);
                let started = match (inner.active, inner.session_start) {
                    (true, Some(started)) => started,
                    _ => return Ok(None),
                };
                if inner.fail_reads_after.is_some_and(|n| inner.total_chunks >= n) {
                    return Err(TurnError::AudioDevice("simulated read failure".to_string()));
                }

                let offset = Duration::from_millis(self.chunk_ms * (inner.session_chunks as u64 + 1));
                let due = started + offset;
                let now = Instant::now();
                if now >= due {
                    let amplitude = inner.script.pop_front().unwrap_or(0);
                    let mut chunk = self.make_chunk(amplitude, offset.as_millis() as u64);
                    if inner.malformed_after.is_some_and(|n| inner.total_chunks >= n) {
                        chunk.sample_rate = 0;
                    }
                    inner.session_chunks += 1;
                    inner.total_chunks += 1;
                    return Ok(Some(chunk));
                }
                if now >= deadline {
                    return Ok(None);
                }
                due.min(deadline) - now
            };
            thread::sleep(wait.min(MAX_SLEEP));
        }
    }
}

#[derive(Default)]
struct PlaybackInner {
    started_at: Option<Instant>,
    duration: Duration,
    stopped: bool,
    play_calls: usize,
    stop_calls: usize,
    last_stop: Option<Instant>,
    fail_next_play: Option<String>,
}

/// Playback whose length is derived from the byte count of the audio.
#[derive(Default)]
pub struct FakePlayback {
    inner: Mutex<PlaybackInner>,
}

impl FakePlayback {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next_play(&self, message: impl Into<String>) {
        lock(&self.inner).fail_next_play = Some(message.into());
    }

    pub fn play_calls(&self) -> usize {
        lock(&self.inner).play_calls
    }

    pub fn stop_calls(&self) -> usize {
        lock(&self.inner).stop_calls
    }

    pub fn last_stop(&self) -> Option<Instant> {
        lock(&self.inner).last_stop
    }
}

impl AudioPlayback for FakePlayback {
    fn play_async(&self, audio: &[u8], sample_rate: u32) -> TurnResult<()> {
        let mut inner = lock(&self.inner);
        if let Some(message) = inner.fail_next_play.take() {
            return Err(TurnError::Playback(message));
        }
        inner.play_calls += 1;
        inner.stopped = false;
        inner.started_at = Some(Instant::now());
        inner.duration =
            Duration::from_millis(shared::audio::pcm16_duration_ms(audio.len(), sample_rate));
        Ok(())
    }

    fn stop(&self) -> TurnResult<()> {
        let mut inner = lock(&self.inner);
        inner.stop_calls += 1;
        inner.stopped = true;
        inner.last_stop = Some(Instant::now());
        Ok(())
    }

    fn is_playing(&self) -> bool {
        let inner = lock(&self.inner);
        match inner.started_at {
            Some(started) => !inner.stopped && started.elapsed() < inner.duration,
            None => false,
        }
    }
}

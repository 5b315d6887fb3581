// Shared helpers for turntaker integration tests
//
// - Scripted controller harness built on the fake devices
// - PCM buffers of a given length
// - A capture device that hands over speech only once it is stopped
// - Prompts and output formatting for the hardware tests

#![allow(dead_code)]

use std::io::{self, Write};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;
use turntaker::audio::{AudioCapture, AudioChunk, FakeCapture, FakePlayback};
use turntaker::transcription::FakeTranscriber;
use turntaker::{Config, InterruptController, TurnResult};

pub const SAMPLE_RATE: u32 = 16000;
pub const CHUNK_MS: u64 = 50;

/// Loud enough to clear the default 750 threshold.
pub const LOUD: i16 = 3000;

pub struct Harness {
    pub capture: Arc<FakeCapture>,
    pub playback: Arc<FakePlayback>,
    pub transcriber: Arc<FakeTranscriber>,
    pub controller: InterruptController,
}

/// Controller over fakes. The microphone replays `amplitudes`, one per
/// 50 ms chunk, then stays silent.
pub fn harness(config: Config, amplitudes: Vec<i16>) -> Harness {
    init_tracing();
    let capture = Arc::new(FakeCapture::with_amplitudes(SAMPLE_RATE, CHUNK_MS, amplitudes));
    let playback = Arc::new(FakePlayback::new());
    let transcriber = Arc::new(FakeTranscriber::new());
    let controller = InterruptController::new(
        &config,
        capture.clone(),
        playback.clone(),
        transcriber.clone(),
    )
    .expect("default-derived config is valid");

    Harness {
        capture,
        playback,
        transcriber,
        controller,
    }
}

#[derive(Default)]
struct LateState {
    active: bool,
    late_chunks: usize,
}

/// Capture whose reads block for as long as the device runs. Once stopped,
/// each session still hands back `late_chunks` loud chunks, the way a driver
/// flushes audio buffered before the stop.
pub struct LateChunkCapture {
    late_chunks: usize,
    state: Mutex<LateState>,
    stopped: Condvar,
}

impl LateChunkCapture {
    pub fn new(late_chunks: usize) -> Self {
        Self {
            late_chunks,
            state: Mutex::new(LateState::default()),
            stopped: Condvar::new(),
        }
    }
}

impl AudioCapture for LateChunkCapture {
    fn start(&self) -> TurnResult<()> {
        let mut state = self.state.lock().unwrap();
        state.active = true;
        state.late_chunks = self.late_chunks;
        Ok(())
    }

    fn stop(&self) -> TurnResult<()> {
        self.state.lock().unwrap().active = false;
        self.stopped.notify_all();
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.state.lock().unwrap().active
    }

    fn read_chunk(&self, _timeout: Duration) -> TurnResult<Option<AudioChunk>> {
        let mut state = self
            .stopped
            .wait_while(self.state.lock().unwrap(), |s| s.active)
            .unwrap();
        if state.late_chunks == 0 {
            return Ok(None);
        }
        state.late_chunks -= 1;
        let samples = vec![LOUD; (SAMPLE_RATE as u64 * CHUNK_MS / 1000) as usize];
        Ok(Some(AudioChunk::from_samples(&samples, SAMPLE_RATE, 0)))
    }
}

/// `silent` quiet chunks followed by `loud` chunks at [`LOUD`].
pub fn quiet_then_loud(silent: usize, loud: usize) -> Vec<i16> {
    let mut script = vec![0; silent];
    script.extend(std::iter::repeat(LOUD).take(loud));
    script
}

/// Silent 16-bit mono PCM lasting `ms` milliseconds.
pub fn response_audio(ms: u64) -> Vec<u8> {
    vec![0u8; (SAMPLE_RATE as u64 * ms / 1000) as usize * 2]
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// Ask user to confirm an action
pub fn confirm_action(prompt: &str) -> bool {
    print!(
        "\n[CONFIRM] {}\nPress 'y' to confirm, any other key to skip: ",
        prompt
    );
    io::stdout().flush().unwrap();

    let mut input = String::new();
    io::stdin().read_line(&mut input).unwrap();

    input.trim().to_lowercase() == "y"
}

pub fn print_header(title: &str) {
    println!("\n{}", "=".repeat(60));
    println!("  {}", title);
    println!("{}", "=".repeat(60));
}

pub fn print_success(message: &str) {
    println!("\n✓ {}", message);
}

pub fn print_error(message: &str) {
    println!("\n✗ {}", message);
}

pub fn print_info(message: &str) {
    println!("\nℹ {}", message);
}

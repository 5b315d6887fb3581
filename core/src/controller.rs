//! Turn state machine and barge-in handling.
//!
//! ```text
//!  IDLE ──set_initial_request──▶ LISTENING ──begin_processing──▶ PROCESSING
//!    ▲                                                               │
//!    │                                                       start_monitoring
//!    │        playback done, no interrupt                            ▼
//!    ├─────────────────────────────────────────────────────────  RESPONDING
//!    │                                                               │ energy > threshold
//!    │   window closes      start_continuation_window                ▼
//!    └──────────────── CONTINUATION ◀──────────── (any)         INTERRUPTED
//! ```
//!
//! `reset()` returns to IDLE from every state.

use crate::audio::{AudioCapture, AudioPlayback};
use crate::buffer::RequestBuffer;
use crate::config::{Config, InterruptConfig};
use crate::continuation::{ContinuationWindow, ExpireCallback};
use crate::error::{TurnError, TurnResult};
use crate::transcription::{post_process_transcription, Transcriber};
use crate::vad::{AudioEnergyAnalyzer, ControlPhrases, SpeechDetector};
use chrono::{DateTime, Utc};
use shared::audio::pcm16_duration_ms;
use shared::{InterruptEvent, TurnEvent, TurnState};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Extra time allowed for an interrupt recording beyond its audio budget.
const RECORDING_GRACE: Duration = Duration::from_secs(1);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Barge-in flag and the audio captured since, guarded together.
#[derive(Default)]
struct InterruptCapture {
    interrupted: bool,
    audio: Vec<u8>,
    sample_rate: u32,
    energy: f32,
    detected_at: Option<Instant>,
    detected_wall: Option<DateTime<Utc>>,
}

/// State shared with the monitor and continuation timer threads.
#[derive(Default)]
struct Core {
    state: Mutex<TurnState>,
    interrupt: Mutex<InterruptCapture>,
    events: Mutex<Option<Sender<TurnEvent>>>,
}

impl Core {
    fn state(&self) -> TurnState {
        *lock(&self.state)
    }

    fn transition(&self, to: TurnState) {
        let from = std::mem::replace(&mut *lock(&self.state), to);
        if from != to {
            info!("Turn state: {} → {}", from, to);
            self.emit(TurnEvent::StateChanged { from, to });
        }
    }

    /// Moves to `to` only if currently in `from`.
    fn transition_if(&self, from: TurnState, to: TurnState) -> bool {
        {
            let mut state = lock(&self.state);
            if *state != from {
                return false;
            }
            *state = to;
        }
        info!("Turn state: {} → {}", from, to);
        self.emit(TurnEvent::StateChanged { from, to });
        true
    }

    fn emit(&self, event: TurnEvent) {
        let mut events = lock(&self.events);
        let disconnected = match events.as_ref() {
            Some(tx) => tx.send(event).is_err(),
            None => false,
        };
        if disconnected {
            debug!("Turn event receiver dropped");
            *events = None;
        }
    }
}

enum MonitorSignal {
    Interrupted,
    DeviceError(String),
}

struct MonitorHandle {
    stop: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

struct MonitorContext {
    capture: Arc<dyn AudioCapture>,
    playback: Arc<dyn AudioPlayback>,
    analyzer: AudioEnergyAnalyzer,
    core: Arc<Core>,
    stop: Arc<AtomicBool>,
    signal_tx: Sender<MonitorSignal>,
    read_timeout: Duration,
    consecutive_chunks: u32,
}

/// Stops monitoring when dropped, including while unwinding from a panicking
/// interrupt callback.
struct MonitorGuard<'a> {
    controller: &'a InterruptController,
}

impl Drop for MonitorGuard<'_> {
    fn drop(&mut self) {
        self.controller.stop_monitoring();
    }
}

/// Owns the turn state machine and the single capture device handle.
pub struct InterruptController {
    config: InterruptConfig,
    default_sample_rate: u32,
    analyzer: AudioEnergyAnalyzer,
    capture: Arc<dyn AudioCapture>,
    playback: Arc<dyn AudioPlayback>,
    transcriber: Arc<dyn Transcriber>,
    core: Arc<Core>,
    buffer: RequestBuffer,
    continuation: ContinuationWindow,
    monitor: Mutex<Option<MonitorHandle>>,
    signals: Mutex<Option<Receiver<MonitorSignal>>>,
    last_capture_stop: Mutex<Option<Instant>>,
    last_interrupt_text: Mutex<Option<String>>,
    events_taken: AtomicBool,
}

impl InterruptController {
    pub fn new(
        config: &Config,
        capture: Arc<dyn AudioCapture>,
        playback: Arc<dyn AudioPlayback>,
        transcriber: Arc<dyn Transcriber>,
    ) -> TurnResult<Self> {
        config.validate()?;

        let analyzer = AudioEnergyAnalyzer::with_threshold(config.interrupt.energy_threshold)
            .with_phrases(ControlPhrases::new(&config.keywords.phrases));

        info!(
            "Interrupt controller ready: threshold={:.1}, silence_timeout_ms={}, continuation={:.1}s",
            config.interrupt.energy_threshold,
            config.interrupt.silence_timeout_ms,
            config.continuation.duration_seconds
        );

        Ok(Self {
            config: config.interrupt.clone(),
            default_sample_rate: config.audio.sample_rate,
            analyzer,
            capture,
            playback,
            transcriber,
            core: Arc::new(Core::default()),
            buffer: RequestBuffer::new(),
            continuation: ContinuationWindow::new(config.continuation.duration_seconds),
            monitor: Mutex::new(None),
            signals: Mutex::new(None),
            last_capture_stop: Mutex::new(None),
            last_interrupt_text: Mutex::new(None),
            events_taken: AtomicBool::new(false),
        })
    }

    pub fn state(&self) -> TurnState {
        self.core.state()
    }

    pub fn request_buffer(&self) -> &RequestBuffer {
        &self.buffer
    }

    pub fn combined_text(&self) -> String {
        self.buffer.combined_text()
    }

    pub fn analyzer(&self) -> &AudioEnergyAnalyzer {
        &self.analyzer
    }

    pub fn is_control_phrase(&self, text: &str) -> bool {
        self.analyzer.keyword_match(text)
    }

    /// Cleaned text of the most recent interrupt utterance, if any.
    pub fn last_interrupt_text(&self) -> Option<String> {
        lock(&self.last_interrupt_text).clone()
    }

    /// Returns the turn event stream. Only the first call gets a receiver;
    /// events raised before it are not kept.
    pub fn take_event_receiver(&self) -> Option<Receiver<TurnEvent>> {
        if self.events_taken.swap(true, Ordering::SeqCst) {
            return None;
        }
        let (tx, rx) = mpsc::channel();
        *lock(&self.core.events) = Some(tx);
        Some(rx)
    }

    /// Starts a turn with its first transcribed segment.
    ///
    /// From CONTINUATION the text joins the turn that is still open;
    /// from IDLE any stale segments are dropped first.
    pub fn set_initial_request(&self, text: &str) {
        match self.state() {
            TurnState::Continuation => {
                self.continuation.cancel();
                info!("Follow-up received inside continuation window");
            }
            TurnState::Idle => self.buffer.clear(),
            other => warn!("Initial request recorded while {}", other),
        }
        self.append_segment(text, false);
        self.core.transition(TurnState::Listening);
    }

    pub fn begin_processing(&self) {
        let state = self.state();
        if state != TurnState::Listening {
            warn!("begin_processing called while {}", state);
        }
        self.core.transition(TurnState::Processing);
    }

    pub fn is_monitoring(&self) -> bool {
        lock(&self.monitor)
            .as_ref()
            .map(|m| !m.thread.is_finished())
            .unwrap_or(false)
    }

    pub fn interrupt_detected(&self) -> bool {
        lock(&self.core.interrupt).interrupted
    }

    /// Opens the capture device and spawns the monitor thread. The turn
    /// enters RESPONDING.
    pub fn start_monitoring(&self) -> TurnResult<()> {
        self.stop_monitoring();
        self.open_capture()?;
        *lock(&self.core.interrupt) = InterruptCapture::default();

        let stop = Arc::new(AtomicBool::new(false));
        let (signal_tx, signal_rx) = mpsc::channel();
        let context = MonitorContext {
            capture: Arc::clone(&self.capture),
            playback: Arc::clone(&self.playback),
            analyzer: self.analyzer.clone(),
            core: Arc::clone(&self.core),
            stop: Arc::clone(&stop),
            signal_tx,
            read_timeout: self.config.poll_interval(),
            consecutive_chunks: self.config.consecutive_chunks,
        };

        let thread = match thread::Builder::new()
            .name("turntaker-monitor".to_string())
            .spawn(move || run_monitor(context))
        {
            Ok(thread) => thread,
            Err(e) => {
                self.close_capture();
                return Err(TurnError::Monitor(format!("failed to spawn monitor: {}", e)));
            }
        };

        *lock(&self.monitor) = Some(MonitorHandle { stop, thread });
        *lock(&self.signals) = Some(signal_rx);
        self.core.transition(TurnState::Responding);
        info!("Barge-in monitoring started");
        Ok(())
    }

    /// Stops the monitor thread and the capture device. Waits at most the
    /// configured join timeout for the thread to exit.
    pub fn stop_monitoring(&self) {
        let handle = lock(&self.monitor).take();
        let Some(handle) = handle else {
            return;
        };

        {
            // The monitor re-checks the flag under this lock before acting
            // on a chunk, so nothing read from here on can trip a barge-in.
            let _interrupt = lock(&self.core.interrupt);
            handle.stop.store(true, Ordering::SeqCst);
        }
        self.close_capture();

        let deadline = Instant::now() + self.config.monitor_join_timeout();
        while !handle.thread.is_finished() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        if handle.thread.is_finished() {
            if handle.thread.join().is_err() {
                error!("Monitor thread panicked");
            }
        } else {
            warn!(
                "Monitor thread did not exit within {:?}; detaching",
                self.config.monitor_join_timeout()
            );
        }
        lock(&self.signals).take();
        info!("Barge-in monitoring stopped");
    }

    /// Plays `audio` while watching the microphone for barge-in.
    ///
    /// Blocks until playback ends or the user interrupts. On interrupt the
    /// playback is stopped, `on_interrupt` runs on this thread and the event
    /// is returned. Monitoring and the capture device are shut down on every
    /// exit path.
    pub fn play_with_monitoring(
        &self,
        audio: &[u8],
        sample_rate: u32,
        on_interrupt: Option<&mut dyn FnMut(&InterruptEvent)>,
    ) -> TurnResult<Option<InterruptEvent>> {
        if let Err(e) = self.start_monitoring() {
            warn!("Barge-in monitoring unavailable, playing without it: {}", e);
            *lock(&self.core.interrupt) = InterruptCapture::default();
            self.core.transition(TurnState::Responding);
        }
        let guard = MonitorGuard { controller: self };

        if let Err(e) = self.playback.play_async(audio, sample_rate) {
            drop(guard);
            self.core.transition(TurnState::Idle);
            return Err(e);
        }
        let started = Instant::now();
        debug!(
            "Playback started: {} ms of audio",
            pcm16_duration_ms(audio.len(), sample_rate)
        );

        if !self.wait_for_playback_or_interrupt() {
            drop(guard);
            if self.discard_late_interrupt() {
                return Ok(None);
            }
            if self.state() != TurnState::Responding {
                // Turn was reset from elsewhere while we were playing.
                self.stop_playback();
                return Ok(None);
            }
            self.core.transition_if(TurnState::Responding, TurnState::Idle);
            info!("Playback finished without interruption");
            return Ok(None);
        }

        self.stop_playback();
        self.core.transition(TurnState::Interrupted);
        let event = self.build_event(started, sample_rate);
        self.core.emit(TurnEvent::InterruptDetected {
            energy: event.energy_at_detection,
            detected_after_ms: event.detected_after_ms,
        });

        if let Some(callback) = on_interrupt {
            callback(&event);
        }
        drop(guard);
        Ok(Some(event))
    }

    /// Drops a barge-in the monitor raised after playback had already ended.
    fn discard_late_interrupt(&self) -> bool {
        {
            let mut interrupt = lock(&self.core.interrupt);
            if !interrupt.interrupted {
                return false;
            }
            *interrupt = InterruptCapture::default();
        }
        debug!("Ignoring speech detected after playback finished");
        self.core.transition_if(TurnState::Interrupted, TurnState::Idle);
        self.core.transition_if(TurnState::Responding, TurnState::Idle);
        true
    }

    /// For callers that drive playback themselves after `start_monitoring()`.
    /// Stops monitoring and reports whether the user barged in.
    pub fn playback_finished(&self) -> bool {
        self.stop_monitoring();
        if self.interrupt_detected() {
            self.core.transition(TurnState::Interrupted);
            true
        } else {
            self.core.transition_if(TurnState::Responding, TurnState::Idle);
            false
        }
    }

    /// Records the rest of the interrupting utterance until `timeout_ms` of
    /// silence, transcribes it and appends it to the request buffer.
    ///
    /// Returns the combined request text, or `None` when no barge-in audio
    /// exists or nothing intelligible was said.
    pub fn wait_for_interrupt_complete(&self, timeout_ms: u64) -> Option<String> {
        self.stop_monitoring();

        let (prefix, sample_rate) = {
            let mut interrupt = lock(&self.core.interrupt);
            if !interrupt.interrupted || interrupt.audio.is_empty() {
                warn!("No interrupt audio captured; nothing to complete");
                return None;
            }
            let rate = if interrupt.sample_rate > 0 {
                interrupt.sample_rate
            } else {
                self.default_sample_rate
            };
            (std::mem::take(&mut interrupt.audio), rate)
        };

        let mut detector =
            SpeechDetector::new(self.analyzer.clone(), timeout_ms, self.config.max_utterance_ms);
        detector.resume_with(&prefix, pcm16_duration_ms(prefix.len(), sample_rate));
        let audio = self.record_follow_on(&mut detector, timeout_ms);

        if self.state() != TurnState::Interrupted {
            info!("Turn was reset while recording interrupt speech");
            return None;
        }
        *lock(&self.core.interrupt) = InterruptCapture::default();

        let text = match self.transcriber.transcribe(&audio, sample_rate) {
            Ok(result) => post_process_transcription(&result.text),
            Err(e) => {
                warn!("Interrupt transcription failed: {}", e);
                String::new()
            }
        };

        if text.is_empty() {
            info!("No additional speech captured");
            self.core.transition(TurnState::Idle);
            return None;
        }

        info!("Interrupt speech: '{}'", text);
        *lock(&self.last_interrupt_text) = Some(text.clone());
        self.append_segment(&text, true);
        self.core.transition(TurnState::Processing);
        Some(self.buffer.combined_text())
    }

    /// Opens the wake-word-free follow-up window. Closing it, by timeout or
    /// `cancel_continuation_window`, returns the turn to IDLE.
    pub fn start_continuation_window(&self, on_expire: Option<ExpireCallback>) {
        self.stop_monitoring();
        self.core.transition(TurnState::Continuation);

        let core = Arc::clone(&self.core);
        let callback: ExpireCallback = Arc::new(move || {
            core.transition_if(TurnState::Continuation, TurnState::Idle);
            core.emit(TurnEvent::ContinuationExpired);
            if let Some(user) = &on_expire {
                user();
            }
        });
        self.continuation.start(Some(callback));
    }

    pub fn cancel_continuation_window(&self) {
        let was_active = self.continuation.is_active();
        self.continuation.cancel();
        if was_active {
            self.core.emit(TurnEvent::ContinuationCancelled);
        }
        self.core.transition_if(TurnState::Continuation, TurnState::Idle);
    }

    pub fn is_continuation_active(&self) -> bool {
        self.continuation.is_active()
    }

    /// Returns to IDLE from any state: stops monitoring, closes the
    /// continuation window and drops all buffered speech and audio.
    pub fn reset(&self) {
        self.stop_monitoring();
        self.continuation.cancel();
        self.close_capture();
        self.buffer.clear();
        *lock(&self.core.interrupt) = InterruptCapture::default();
        lock(&self.last_interrupt_text).take();
        self.core.transition(TurnState::Idle);
        debug!("Controller reset");
    }

    fn append_segment(&self, text: &str, is_interrupt: bool) {
        self.buffer.append(text, is_interrupt);
        self.core.emit(TurnEvent::SegmentAppended {
            text: text.to_string(),
            is_interrupt,
        });
    }

    /// Blocks until the monitor reports a barge-in (`true`) or playback ends
    /// or the turn leaves RESPONDING (`false`).
    fn wait_for_playback_or_interrupt(&self) -> bool {
        let poll = self.config.poll_interval();
        let mut signals = lock(&self.signals).take();
        loop {
            match signals.as_ref().map(|rx| rx.recv_timeout(poll)) {
                Some(Ok(MonitorSignal::Interrupted)) => return true,
                Some(Ok(MonitorSignal::DeviceError(e))) => {
                    warn!("Barge-in detection lost for this response: {}", e);
                }
                Some(Err(RecvTimeoutError::Timeout)) => {}
                Some(Err(RecvTimeoutError::Disconnected)) => signals = None,
                None => thread::sleep(poll),
            }

            if self.interrupt_detected() {
                return true;
            }
            if self.state() != TurnState::Responding || !self.playback.is_playing() {
                // The monitor sets the flag before it stops playback.
                return self.interrupt_detected();
            }
        }
    }

    fn build_event(&self, playback_started: Instant, fallback_rate: u32) -> InterruptEvent {
        let interrupt = lock(&self.core.interrupt);
        let rate = if interrupt.sample_rate > 0 {
            interrupt.sample_rate
        } else {
            fallback_rate
        };
        let detected_after = interrupt
            .detected_at
            .map(|at| at.saturating_duration_since(playback_started))
            .unwrap_or_default();

        InterruptEvent {
            captured_audio: interrupt.audio.clone(),
            energy_at_detection: interrupt.energy,
            detected_at: interrupt.detected_wall.unwrap_or_else(Utc::now),
            detected_after_ms: detected_after.as_millis() as u64,
            duration_ms: pcm16_duration_ms(interrupt.audio.len(), rate),
        }
    }

    fn record_follow_on(&self, detector: &mut SpeechDetector, timeout_ms: u64) -> Vec<u8> {
        if let Err(e) = self.open_capture() {
            warn!("Could not reopen capture for interrupt speech: {}", e);
            return detector.finish();
        }

        let budget = Duration::from_millis(timeout_ms + self.config.max_utterance_ms);
        let deadline = Instant::now() + budget + RECORDING_GRACE;
        let read_timeout = self.config.poll_interval();

        let audio = loop {
            if Instant::now() >= deadline {
                warn!("Interrupt recording exceeded {:?}", budget);
                break detector.finish();
            }
            if self.state() != TurnState::Interrupted {
                break detector.finish();
            }
            match self.capture.read_chunk(read_timeout) {
                Ok(Some(chunk)) => {
                    if let Err(e) = chunk.validate() {
                        let e = TurnError::from(e);
                        error!("Malformed chunk while recording interrupt speech: {}", e);
                        break detector.finish();
                    }
                    if let Some(done) = detector.process_chunk(&chunk) {
                        break done;
                    }
                }
                Ok(None) if !self.capture.is_active() => {
                    warn!("Capture stopped while recording interrupt speech");
                    break detector.finish();
                }
                Ok(None) => {}
                Err(e) => {
                    error!("Capture failed while recording interrupt speech: {}", e);
                    break detector.finish();
                }
            }
        };

        self.close_capture();
        audio
    }

    /// Stop, let the device settle if it was stopped very recently, then start.
    fn open_capture(&self) -> TurnResult<()> {
        if self.capture.is_active() {
            self.close_capture();
        }
        let last_stop = *lock(&self.last_capture_stop);
        if let Some(stopped) = last_stop {
            let settle = self.config.settle_delay();
            let since = stopped.elapsed();
            if since < settle {
                thread::sleep(settle - since);
            }
        }
        self.capture.start()
    }

    fn close_capture(&self) {
        if !self.capture.is_active() {
            return;
        }
        if let Err(e) = self.capture.stop() {
            warn!("Failed to stop capture: {}", e);
        }
        *lock(&self.last_capture_stop) = Some(Instant::now());
    }

    fn stop_playback(&self) {
        if let Err(e) = self.playback.stop() {
            warn!("Failed to stop playback: {}", e);
        }
    }
}

impl Drop for InterruptController {
    fn drop(&mut self) {
        self.stop_monitoring();
        self.continuation.cancel();
        self.close_capture();
    }
}

fn run_monitor(ctx: MonitorContext) {
    debug!("Monitor thread started");
    let mut streak = 0u32;
    let mut pending: Vec<u8> = Vec::new();

    while !ctx.stop.load(Ordering::SeqCst) {
        let chunk = match ctx.capture.read_chunk(ctx.read_timeout) {
            Ok(Some(chunk)) => chunk,
            Ok(None) if !ctx.capture.is_active() => {
                debug!("Capture inactive, monitor exiting");
                break;
            }
            Ok(None) => continue,
            Err(e) => {
                error!("Monitor stopping after capture error: {}", e);
                let _ = ctx.signal_tx.send(MonitorSignal::DeviceError(e.to_string()));
                break;
            }
        };
        if let Err(e) = chunk.validate() {
            let e = TurnError::from(e);
            error!("Monitor stopping after malformed chunk: {}", e);
            let _ = ctx.signal_tx.send(MonitorSignal::DeviceError(e.to_string()));
            break;
        }

        let mut interrupt = lock(&ctx.core.interrupt);
        if ctx.stop.load(Ordering::SeqCst) {
            debug!("Discarding chunk read after stop");
            break;
        }
        if interrupt.interrupted {
            interrupt.audio.extend_from_slice(&chunk.data);
            continue;
        }

        let result = ctx.analyzer.detect(&chunk.data);
        if !result.is_speech {
            streak = 0;
            pending.clear();
            continue;
        }
        streak += 1;
        pending.extend_from_slice(&chunk.data);
        if streak < ctx.consecutive_chunks {
            continue;
        }

        interrupt.interrupted = true;
        interrupt.audio = std::mem::take(&mut pending);
        interrupt.sample_rate = chunk.sample_rate;
        interrupt.energy = result.energy;
        interrupt.detected_at = Some(Instant::now());
        interrupt.detected_wall = Some(Utc::now());
        drop(interrupt);

        info!("Barge-in detected (energy {:.1})", result.energy);
        if let Err(e) = ctx.playback.stop() {
            warn!("Failed to stop playback on barge-in: {}", e);
        }
        ctx.core
            .transition_if(TurnState::Responding, TurnState::Interrupted);
        let _ = ctx.signal_tx.send(MonitorSignal::Interrupted);
    }
    debug!("Monitor thread exiting");
}

//! Grace period after a response during which a follow-up needs no wake word.

use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub const DEFAULT_CONTINUATION_SECONDS: f64 = 5.0;

pub type ExpireCallback = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct WindowState {
    active: bool,
    generation: u64,
}

#[derive(Default)]
struct Shared {
    state: Mutex<WindowState>,
    wake: Condvar,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, WindowState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Cancellable countdown with a single expiry callback.
///
/// At most one timer thread is armed at a time. The timer decides to fire
/// under the same lock `cancel()` takes, and `cancel()` joins the timer
/// thread, so no callback runs after `cancel()` returns. The window is marked
/// inactive before the callback is invoked.
pub struct ContinuationWindow {
    duration: Duration,
    shared: Arc<Shared>,
    timer: Mutex<Option<JoinHandle<()>>>,
    callback: Mutex<Option<ExpireCallback>>,
}

impl Default for ContinuationWindow {
    fn default() -> Self {
        Self::new(DEFAULT_CONTINUATION_SECONDS)
    }
}

impl ContinuationWindow {
    pub fn new(duration_seconds: f64) -> Self {
        Self {
            duration: Duration::from_secs_f64(duration_seconds.max(0.0)),
            shared: Arc::new(Shared::default()),
            timer: Mutex::new(None),
            callback: Mutex::new(None),
        }
    }

    pub fn duration_seconds(&self) -> f64 {
        self.duration.as_secs_f64()
    }

    pub fn is_active(&self) -> bool {
        self.shared.state().active
    }

    /// Arms the countdown, replacing any timer that is already running.
    pub fn start(&self, on_expire: Option<ExpireCallback>) {
        self.cancel();
        *self.callback.lock().unwrap_or_else(|p| p.into_inner()) = on_expire.clone();

        let generation = {
            let mut state = self.shared.state();
            state.generation += 1;
            state.active = true;
            state.generation
        };

        let shared = Arc::clone(&self.shared);
        let duration = self.duration;
        let spawned = thread::Builder::new()
            .name("turntaker-continuation".to_string())
            .spawn(move || run_timer(shared, generation, duration, on_expire));

        match spawned {
            Ok(handle) => {
                *self.timer.lock().unwrap_or_else(|p| p.into_inner()) = Some(handle);
                info!("Continuation window open for {:.1}s", duration.as_secs_f64());
            }
            Err(e) => {
                warn!("Failed to spawn continuation timer: {}", e);
                self.shared.state().active = false;
            }
        }
    }

    /// Disarms without firing. Safe to call when inactive or from inside the
    /// expiry callback.
    pub fn cancel(&self) {
        {
            let mut state = self.shared.state();
            if state.active {
                state.active = false;
                state.generation += 1;
                debug!("Continuation window cancelled");
            }
        }
        self.shared.wake.notify_all();

        let handle = self.timer.lock().unwrap_or_else(|p| p.into_inner()).take();
        if let Some(handle) = handle {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }

    /// Cancels and re-arms with the most recently supplied callback.
    pub fn reset(&self) {
        let callback = self.callback.lock().unwrap_or_else(|p| p.into_inner()).clone();
        self.start(callback);
    }
}

impl Drop for ContinuationWindow {
    fn drop(&mut self) {
        self.cancel();
    }
}

fn run_timer(shared: Arc<Shared>, generation: u64, duration: Duration, on_expire: Option<ExpireCallback>) {
    let deadline = Instant::now() + duration;
    let mut state = shared.state();
    loop {
        if state.generation != generation || !state.active {
            return;
        }
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        state = shared
            .wake
            .wait_timeout(state, deadline - now)
            .map(|(guard, _)| guard)
            .unwrap_or_else(|poisoned| poisoned.into_inner().0);
    }
    state.active = false;
    drop(state);

    info!("Continuation window expired");
    if let Some(callback) = on_expire {
        callback();
    }
}

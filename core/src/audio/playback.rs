//! Speaker output through rodio.
//!
//! `rodio::OutputStream` is not `Send`, so it lives on a dedicated thread for
//! the lifetime of `RodioPlayback`. Only the stream handle crosses threads.

use super::AudioPlayback;
use crate::error::{TurnError, TurnResult};
use rodio::buffer::SamplesBuffer;
use rodio::{OutputStream, OutputStreamHandle, Sink};
use std::sync::mpsc;
use std::sync::{Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub struct RodioPlayback {
    handle: OutputStreamHandle,
    sink: Mutex<Option<Sink>>,
    stop_timeout: Duration,
    shutdown_tx: Option<mpsc::Sender<()>>,
    output_thread: Option<JoinHandle<()>>,
}

impl RodioPlayback {
    pub fn new(stop_timeout: Duration) -> TurnResult<Self> {
        info!("Initializing audio playback");

        let (handle_tx, handle_rx) = mpsc::channel();
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let output_thread = thread::Builder::new()
            .name("turntaker-output".to_string())
            .spawn(move || match OutputStream::try_default() {
                Ok((_stream, handle)) => {
                    let _ = handle_tx.send(Ok(handle));
                    // Keeps `_stream` alive until shutdown or drop of the sender.
                    let _ = shutdown_rx.recv();
                }
                Err(e) => {
                    let _ = handle_tx.send(Err(TurnError::Playback(e.to_string())));
                }
            })?;

        let handle = handle_rx
            .recv()
            .map_err(|_| TurnError::Playback("output thread exited".to_string()))??;

        info!("Audio playback initialized");
        Ok(Self {
            handle,
            sink: Mutex::new(None),
            stop_timeout,
            shutdown_tx: Some(shutdown_tx),
            output_thread: Some(output_thread),
        })
    }

    fn sink(&self) -> MutexGuard<'_, Option<Sink>> {
        self.sink.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl AudioPlayback for RodioPlayback {
    fn play_async(&self, audio: &[u8], sample_rate: u32) -> TurnResult<()> {
        let samples = shared::audio::pcm16_to_samples(audio);
        debug!("Playing {} samples at {}Hz", samples.len(), sample_rate);

        let sink = Sink::try_new(&self.handle).map_err(|e| TurnError::Playback(e.to_string()))?;
        sink.append(SamplesBuffer::new(1, sample_rate, samples));
        sink.play();

        if let Some(previous) = self.sink().replace(sink) {
            previous.stop();
        }
        Ok(())
    }

    fn stop(&self) -> TurnResult<()> {
        let Some(sink) = self.sink().take() else {
            return Ok(());
        };
        sink.stop();

        let deadline = Instant::now() + self.stop_timeout;
        while !sink.empty() {
            if Instant::now() >= deadline {
                warn!("Playback did not drain within {:?}", self.stop_timeout);
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }

        info!("Audio playback stopped");
        Ok(())
    }

    fn is_playing(&self) -> bool {
        self.sink()
            .as_ref()
            .map(|sink| !sink.empty() && !sink.is_paused())
            .unwrap_or(false)
    }
}

impl Drop for RodioPlayback {
    fn drop(&mut self) {
        if let Some(sink) = self.sink().take() {
            sink.stop();
        }
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(thread) = self.output_thread.take() {
            let _ = thread.join();
        }
    }
}

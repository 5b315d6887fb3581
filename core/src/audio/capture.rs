use super::{AudioCapture, AudioChunk};
use crate::error::{TurnError, TurnResult};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, StreamConfig};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

struct CaptureSession {
    stop_tx: Sender<()>,
    thread: JoinHandle<()>,
}

/// Microphone capture through cpal.
///
/// The cpal stream is not `Send`, so each session builds and owns it on a
/// dedicated thread; chunks reach readers through a channel.
pub struct CpalCapture {
    device_name: String,
    sample_rate: u32,
    channels: u16,
    chunk_samples: usize,
    session: Mutex<Option<CaptureSession>>,
    chunks: Mutex<Option<Receiver<AudioChunk>>>,
    active: Arc<AtomicBool>,
    failed: Arc<AtomicBool>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl CpalCapture {
    /// `channels` is the device channel count to ask for; other layouts are
    /// used only when the device offers nothing matching. Chunks are always
    /// downmixed to mono.
    pub fn new(device_name: &str, sample_rate: u32, channels: u16, chunk_ms: u32) -> TurnResult<Self> {
        let device = find_device(device_name)?;
        tracing::info!("Audio capture initialized");
        tracing::info!("Using input device: {}", device.name()?);

        Ok(Self {
            device_name: device_name.to_string(),
            sample_rate,
            channels,
            chunk_samples: (sample_rate as usize * chunk_ms as usize / 1000).max(1),
            session: Mutex::new(None),
            chunks: Mutex::new(None),
            active: Arc::new(AtomicBool::new(false)),
            failed: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn list_input_devices() -> TurnResult<Vec<String>> {
        let host = cpal::default_host();
        Ok(host.input_devices()?.filter_map(|d| d.name().ok()).collect())
    }

    fn run_session(
        device_name: String,
        sample_rate: u32,
        channels: u16,
        chunk_samples: usize,
        chunk_tx: Sender<AudioChunk>,
        ready_tx: Sender<TurnResult<()>>,
        stop_rx: Receiver<()>,
        failed: Arc<AtomicBool>,
    ) {
        let stream = match build_stream(&device_name, sample_rate, channels, chunk_samples, chunk_tx, failed) {
            Ok(stream) => stream,
            Err(e) => {
                let _ = ready_tx.send(Err(e));
                return;
            }
        };
        if let Err(e) = stream.play() {
            let _ = ready_tx.send(Err(e.into()));
            return;
        }
        let _ = ready_tx.send(Ok(()));

        // Either an explicit stop or the owner going away ends the session.
        let _ = stop_rx.recv();
        drop(stream);
    }
}

impl AudioCapture for CpalCapture {
    fn start(&self) -> TurnResult<()> {
        let mut session = lock(&self.session);
        if session.is_some() {
            return Err(TurnError::AudioDevice("capture already running".to_string()));
        }

        let (chunk_tx, chunk_rx) = mpsc::channel();
        let (ready_tx, ready_rx) = mpsc::channel();
        let (stop_tx, stop_rx) = mpsc::channel();
        self.failed.store(false, Ordering::SeqCst);

        let device_name = self.device_name.clone();
        let sample_rate = self.sample_rate;
        let channels = self.channels;
        let chunk_samples = self.chunk_samples;
        let failed = Arc::clone(&self.failed);
        let thread = thread::Builder::new()
            .name("turntaker-capture".to_string())
            .spawn(move || {
                Self::run_session(
                    device_name,
                    sample_rate,
                    channels,
                    chunk_samples,
                    chunk_tx,
                    ready_tx,
                    stop_rx,
                    failed,
                )
            })?;

        let ready = ready_rx
            .recv()
            .map_err(|_| TurnError::AudioDevice("capture thread exited".to_string()))
            .and_then(|result| result);
        if let Err(e) = ready {
            let _ = thread.join();
            return Err(e);
        }

        *lock(&self.chunks) = Some(chunk_rx);
        *session = Some(CaptureSession { stop_tx, thread });
        self.active.store(true, Ordering::SeqCst);
        tracing::info!("Audio capture started");
        Ok(())
    }

    fn stop(&self) -> TurnResult<()> {
        self.active.store(false, Ordering::SeqCst);
        if let Some(session) = lock(&self.session).take() {
            let _ = session.stop_tx.send(());
            if session.thread.join().is_err() {
                return Err(TurnError::AudioDevice("capture thread panicked".to_string()));
            }
            tracing::info!("Audio capture stopped");
        }
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn read_chunk(&self, timeout: Duration) -> TurnResult<Option<AudioChunk>> {
        if self.failed.load(Ordering::SeqCst) {
            return Err(TurnError::AudioStream("input stream reported an error".to_string()));
        }
        let chunks = lock(&self.chunks);
        let Some(rx) = chunks.as_ref() else {
            return Ok(None);
        };
        match rx.recv_timeout(timeout) {
            Ok(chunk) => Ok(Some(chunk)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) if !self.is_active() => Ok(None),
            Err(RecvTimeoutError::Disconnected) => {
                Err(TurnError::AudioStream("capture stream closed".to_string()))
            }
        }
    }
}

impl Drop for CpalCapture {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

fn find_device(device_name: &str) -> TurnResult<Device> {
    let host = cpal::default_host();
    if device_name.is_empty() || device_name == "default" {
        return host
            .default_input_device()
            .ok_or_else(|| TurnError::AudioDevice("No default input device found".to_string()));
    }
    host.input_devices()?
        .find(|d| d.name().map(|n| n == device_name).unwrap_or(false))
        .ok_or_else(|| TurnError::AudioDevice(format!("Input device '{}' not found", device_name)))
}

/// Picks a config at `sample_rate` with `channels` channels, falling back to
/// the first other layout at that rate. Returns the config and its sample format.
fn select_config(
    device: &Device,
    sample_rate: u32,
    channels: u16,
) -> TurnResult<(StreamConfig, SampleFormat)> {
    let mut options = Vec::new();
    for supported in device.supported_input_configs()? {
        tracing::debug!("Supported config: {:?}", supported);
        if supported.min_sample_rate().0 > sample_rate || supported.max_sample_rate().0 < sample_rate {
            continue;
        }
        let format = supported.sample_format();
        let config: StreamConfig = supported.with_sample_rate(cpal::SampleRate(sample_rate)).into();
        options.push((config.channels, (config, format)));
    }
    choose_by_channels(options, channels)
        .ok_or_else(|| TurnError::AudioDevice("No suitable audio configuration found".to_string()))
}

fn choose_by_channels<T>(options: Vec<(u16, T)>, preferred: u16) -> Option<T> {
    let mut fallback = None;
    for (channels, option) in options {
        if channels == preferred {
            return Some(option);
        }
        fallback.get_or_insert(option);
    }
    fallback
}

fn build_stream(
    device_name: &str,
    sample_rate: u32,
    preferred_channels: u16,
    chunk_samples: usize,
    chunk_tx: Sender<AudioChunk>,
    failed: Arc<AtomicBool>,
) -> TurnResult<cpal::Stream> {
    let device = find_device(device_name)?;
    let (config, sample_format) = select_config(&device, sample_rate, preferred_channels)?;
    let channels = config.channels as usize;
    if config.channels != preferred_channels {
        tracing::warn!(
            "Device has no {}-channel input at {}Hz; using {} channel(s)",
            preferred_channels,
            sample_rate,
            channels
        );
    }

    tracing::info!(
        "Configuring audio stream: {}Hz, {} channel(s), {:?}",
        sample_rate,
        channels,
        sample_format
    );

    let mut chunker = Chunker::new(sample_rate, chunk_samples, channels, chunk_tx);
    let error_callback = move |err: cpal::StreamError| {
        tracing::error!("Audio stream error: {}", err);
        failed.store(true, Ordering::SeqCst);
    };

    let stream = match sample_format {
        SampleFormat::F32 => device.build_input_stream(
            &config,
            move |data: &[f32], _: &_| {
                chunker.push(data.iter().map(|&s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16))
            },
            error_callback,
            None,
        )?,
        SampleFormat::I16 => device.build_input_stream(
            &config,
            move |data: &[i16], _: &_| chunker.push(data.iter().copied()),
            error_callback,
            None,
        )?,
        SampleFormat::U16 => device.build_input_stream(
            &config,
            move |data: &[u16], _: &_| {
                chunker.push(data.iter().map(|&s| (s as i32 - 32768) as i16))
            },
            error_callback,
            None,
        )?,
        format => {
            return Err(TurnError::AudioDevice(format!(
                "Unsupported sample format: {:?}",
                format
            )));
        }
    };
    Ok(stream)
}

/// Downmixes interleaved frames to mono and cuts fixed-size chunks.
struct Chunker {
    sample_rate: u32,
    chunk_samples: usize,
    channels: usize,
    frame: Vec<i32>,
    pending: Vec<i16>,
    started: Instant,
    tx: Sender<AudioChunk>,
}

impl Chunker {
    fn new(sample_rate: u32, chunk_samples: usize, channels: usize, tx: Sender<AudioChunk>) -> Self {
        Self {
            sample_rate,
            chunk_samples,
            channels: channels.max(1),
            frame: Vec::with_capacity(channels.max(1)),
            pending: Vec::with_capacity(chunk_samples),
            started: Instant::now(),
            tx,
        }
    }

    fn push(&mut self, samples: impl Iterator<Item = i16>) {
        for sample in samples {
            self.frame.push(sample as i32);
            if self.frame.len() < self.channels {
                continue;
            }
            let mixed = self.frame.iter().sum::<i32>() / self.channels as i32;
            self.frame.clear();
            self.pending.push(mixed as i16);

            if self.pending.len() >= self.chunk_samples {
                let chunk = AudioChunk::from_samples(
                    &self.pending,
                    self.sample_rate,
                    self.started.elapsed().as_millis() as u64,
                );
                self.pending.clear();
                // Receiver gone means the session is shutting down.
                let _ = self.tx.send(chunk);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunker_downmixes_and_splits() {
        let (tx, rx) = mpsc::channel();
        let mut chunker = Chunker::new(16000, 2, 2, tx);
        chunker.push([100i16, 300, -50, -150, 10, 10].into_iter());

        let chunk = rx.try_recv().unwrap();
        assert_eq!(chunk.samples(), vec![200, -100]);
        assert!(rx.try_recv().is_err());

        chunker.push([20i16, 20].into_iter());
        assert_eq!(rx.try_recv().unwrap().samples(), vec![10, 20]);
    }

    #[test]
    fn test_channel_preference() {
        let options = vec![(2, "stereo"), (1, "mono"), (4, "quad")];
        assert_eq!(choose_by_channels(options.clone(), 1), Some("mono"));
        assert_eq!(choose_by_channels(options.clone(), 4), Some("quad"));
        assert_eq!(choose_by_channels(options, 6), Some("stereo"));
        assert_eq!(choose_by_channels(Vec::<(u16, &str)>::new(), 1), None);
    }

    #[test]
    #[ignore = "Requires microphone"]
    fn test_cpal_capture_delivers_chunks() {
        let capture = CpalCapture::new("default", 16000, 1, 30).expect("no input device");
        capture.start().unwrap();
        let chunk = capture.read_chunk(Duration::from_secs(2)).unwrap();
        capture.stop().unwrap();
        assert!(chunk.is_some());
        assert!(!capture.is_active());
    }
}

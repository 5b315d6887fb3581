use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, level_filters::LevelFilter, warn};
use tracing_subscriber::EnvFilter;
use turntaker::audio::{AudioCapture, CpalCapture, RodioPlayback};
use turntaker::config::{load_config, load_config_from};
use turntaker::transcription::TranscriptionResult;
use turntaker::{AudioEnergyAnalyzer, Config, InterruptController, Transcriber, TurnResult};

#[derive(Parser)]
#[command(name = "turntaker")]
#[command(about = "Barge-in and turn-taking tools for voice pipelines")]
struct Cli {
    /// Config file to use instead of the default location
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Live microphone energy meter for tuning the interrupt threshold
    Energy {
        #[arg(long, default_value_t = 10)]
        seconds: u64,
    },
    /// Play a tone and report whether speech interrupted it
    BargeIn {
        #[arg(long, default_value_t = 5)]
        seconds: u32,
        #[arg(long, default_value_t = 440.0)]
        frequency: f32,
    },
    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(LevelFilter::INFO)
        .with_target(false)
        .with_env_filter(EnvFilter::from_default_env().add_directive(LevelFilter::INFO.into()))
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };

    match cli.command {
        Commands::Energy { seconds } => run_energy(config, seconds).await,
        Commands::BargeIn { seconds, frequency } => run_barge_in(config, seconds, frequency).await,
        Commands::Config => {
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

async fn run_energy(config: Config, seconds: u64) -> Result<()> {
    let stop = Arc::new(AtomicBool::new(false));
    let worker_stop = Arc::clone(&stop);

    let mut meter = tokio::task::spawn_blocking(move || -> Result<()> {
        let capture = CpalCapture::new(
            &config.audio.device,
            config.audio.sample_rate,
            config.audio.channels,
            config.audio.chunk_ms,
        )?;
        let analyzer = AudioEnergyAnalyzer::with_threshold(config.interrupt.energy_threshold);

        capture.start()?;
        info!("Measuring energy for {}s (threshold {:.1})", seconds, analyzer.threshold());
        let deadline = Instant::now() + Duration::from_secs(seconds);
        while Instant::now() < deadline && !worker_stop.load(Ordering::SeqCst) {
            if let Some(chunk) = capture.read_chunk(Duration::from_millis(100))? {
                let result = analyzer.detect(&chunk.data);
                let bar = "#".repeat((result.energy / 100.0).min(60.0) as usize);
                println!(
                    "{:>8.1} {} {}",
                    result.energy,
                    if result.is_speech { "*" } else { " " },
                    bar
                );
            }
        }
        capture.stop()?;
        Ok(())
    });

    tokio::select! {
        result = &mut meter => result.context("energy meter task failed")?,
        _ = tokio::signal::ctrl_c() => {
            warn!("Ctrl-C received, stopping meter");
            stop.store(true, Ordering::SeqCst);
            meter.await.context("energy meter task failed")?
        }
    }
}

async fn run_barge_in(config: Config, seconds: u32, frequency: f32) -> Result<()> {
    let capture = CpalCapture::new(
        &config.audio.device,
        config.audio.sample_rate,
        config.audio.channels,
        config.audio.chunk_ms,
    )?;
    let playback = RodioPlayback::new(config.interrupt.playback_stop_timeout())?;
    let controller = Arc::new(InterruptController::new(
        &config,
        Arc::new(capture),
        Arc::new(playback),
        Arc::new(NoTranscription),
    )?);

    let sample_rate = config.audio.sample_rate;
    let audio = tone(sample_rate, seconds, frequency);
    let worker = Arc::clone(&controller);
    let mut session =
        tokio::task::spawn_blocking(move || worker.play_with_monitoring(&audio, sample_rate, None));

    info!("Playing {}s tone at {} Hz; speak to interrupt", seconds, frequency);
    let outcome = tokio::select! {
        result = &mut session => result.context("barge-in task failed")??,
        _ = tokio::signal::ctrl_c() => {
            warn!("Ctrl-C received, abandoning playback");
            controller.reset();
            session.await.context("barge-in task failed")??
        }
    };

    match outcome {
        Some(event) => println!("{}", serde_json::to_string_pretty(&event)?),
        None => println!("no interrupt"),
    }
    controller.reset();
    Ok(())
}

/// `barge-in` only reports detection; interrupt speech is never transcribed.
struct NoTranscription;

impl Transcriber for NoTranscription {
    fn transcribe(&self, _audio: &[u8], _sample_rate: u32) -> TurnResult<TranscriptionResult> {
        Ok(TranscriptionResult::new("", 0.0))
    }
}

fn sample_count(sample_rate: u32, seconds: u32) -> u64 {
    u64::from(sample_rate) * u64::from(seconds)
}

/// Sine tone as 16-bit mono PCM.
fn tone(sample_rate: u32, seconds: u32, frequency: f32) -> Vec<u8> {
    let samples: Vec<i16> = (0..sample_count(sample_rate, seconds))
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            ((t * frequency * std::f32::consts::TAU).sin() * 8000.0) as i16
        })
        .collect();
    shared::audio::samples_to_pcm16(&samples)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tone_length_matches_duration() {
        let audio = tone(16000, 2, 440.0);
        assert_eq!(audio.len(), 16000 * 2 * 2);
        assert_eq!(shared::audio::pcm16_duration_ms(audio.len(), 16000), 2000);
    }

    #[test]
    fn test_sample_count_does_not_overflow() {
        assert_eq!(sample_count(16000, 5), 80_000);
        assert_eq!(
            sample_count(u32::MAX, u32::MAX),
            u64::from(u32::MAX) * u64::from(u32::MAX)
        );
    }

    #[test]
    fn test_no_transcription_is_empty() {
        let result = NoTranscription.transcribe(&[0u8; 320], 16000).unwrap();
        assert!(result.text.is_empty());
    }

    #[test]
    fn test_cli_parses_subcommands() {
        let cli = Cli::parse_from(["turntaker", "barge-in", "--seconds", "3"]);
        assert!(matches!(
            cli.command,
            Commands::BargeIn { seconds: 3, .. }
        ));

        let cli = Cli::parse_from(["turntaker", "--config", "/tmp/t.toml", "energy"]);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/t.toml")));
        assert!(matches!(cli.command, Commands::Energy { seconds: 10 }));
    }
}

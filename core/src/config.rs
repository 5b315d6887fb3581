use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{TurnError, TurnResult};

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Default)]
pub struct Config {
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub interrupt: InterruptConfig,
    #[serde(default)]
    pub continuation: ContinuationConfig,
    #[serde(default)]
    pub keywords: KeywordsConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct AudioConfig {
    #[serde(default = "default_device")]
    pub device: String,
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    #[serde(default = "default_channels")]
    pub channels: u16,
    #[serde(default = "default_chunk_ms")]
    pub chunk_ms: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            device: default_device(),
            sample_rate: default_sample_rate(),
            channels: default_channels(),
            chunk_ms: default_chunk_ms(),
        }
    }
}

fn default_device() -> String {
    "default".to_string()
}
fn default_sample_rate() -> u32 {
    16000
}
fn default_channels() -> u16 {
    1
}
fn default_chunk_ms() -> u32 {
    30
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct InterruptConfig {
    /// RMS level above which captured audio counts as barge-in.
    #[serde(default = "default_energy_threshold")]
    pub energy_threshold: f32,
    #[serde(default = "default_silence_timeout")]
    pub silence_timeout_ms: u64,
    #[serde(default = "default_playback_stop_timeout")]
    pub playback_stop_timeout_ms: u64,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// Pause between stopping and restarting the capture device.
    #[serde(default = "default_settle_delay")]
    pub settle_delay_ms: u64,
    #[serde(default = "default_monitor_join_timeout")]
    pub monitor_join_timeout_ms: u64,
    #[serde(default = "default_max_utterance")]
    pub max_utterance_ms: u64,
    /// Over-threshold chunks in a row needed to trigger. 1 = first loud chunk.
    #[serde(default = "default_consecutive_chunks")]
    pub consecutive_chunks: u32,
}

impl Default for InterruptConfig {
    fn default() -> Self {
        Self {
            energy_threshold: default_energy_threshold(),
            silence_timeout_ms: default_silence_timeout(),
            playback_stop_timeout_ms: default_playback_stop_timeout(),
            poll_interval_ms: default_poll_interval(),
            settle_delay_ms: default_settle_delay(),
            monitor_join_timeout_ms: default_monitor_join_timeout(),
            max_utterance_ms: default_max_utterance(),
            consecutive_chunks: default_consecutive_chunks(),
        }
    }
}

impl InterruptConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn monitor_join_timeout(&self) -> Duration {
        Duration::from_millis(self.monitor_join_timeout_ms)
    }

    pub fn playback_stop_timeout(&self) -> Duration {
        Duration::from_millis(self.playback_stop_timeout_ms)
    }
}

fn default_energy_threshold() -> f32 {
    750.0
}
fn default_silence_timeout() -> u64 {
    2000
}
fn default_playback_stop_timeout() -> u64 {
    500
}
fn default_poll_interval() -> u64 {
    50
}
fn default_settle_delay() -> u64 {
    100
}
fn default_monitor_join_timeout() -> u64 {
    1000
}
fn default_max_utterance() -> u64 {
    15000
}
fn default_consecutive_chunks() -> u32 {
    1
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ContinuationConfig {
    #[serde(default = "default_continuation_seconds")]
    pub duration_seconds: f64,
}

impl Default for ContinuationConfig {
    fn default() -> Self {
        Self {
            duration_seconds: default_continuation_seconds(),
        }
    }
}

fn default_continuation_seconds() -> f64 {
    5.0
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct KeywordsConfig {
    #[serde(default = "default_phrases")]
    pub phrases: Vec<String>,
}

impl Default for KeywordsConfig {
    fn default() -> Self {
        Self {
            phrases: default_phrases(),
        }
    }
}

fn default_phrases() -> Vec<String> {
    crate::vad::keyword::DEFAULT_CONTROL_PHRASES
        .iter()
        .map(|p| p.to_string())
        .collect()
}

impl Config {
    pub fn validate(&self) -> TurnResult<()> {
        if self.audio.sample_rate == 0 {
            return Err(TurnError::Config("audio.sample_rate must be positive".into()));
        }
        if self.audio.channels == 0 {
            return Err(TurnError::Config("audio.channels must be positive".into()));
        }
        if self.audio.chunk_ms == 0 {
            return Err(TurnError::Config("audio.chunk_ms must be positive".into()));
        }
        if !(self.interrupt.energy_threshold > 0.0) {
            return Err(TurnError::Config(
                "interrupt.energy_threshold must be positive".into(),
            ));
        }
        if self.interrupt.silence_timeout_ms == 0 {
            return Err(TurnError::Config(
                "interrupt.silence_timeout_ms must be positive".into(),
            ));
        }
        if self.interrupt.poll_interval_ms == 0 {
            return Err(TurnError::Config(
                "interrupt.poll_interval_ms must be positive".into(),
            ));
        }
        if self.interrupt.consecutive_chunks == 0 {
            return Err(TurnError::Config(
                "interrupt.consecutive_chunks must be at least 1".into(),
            ));
        }
        if !(self.continuation.duration_seconds > 0.0) {
            return Err(TurnError::Config(
                "continuation.duration_seconds must be positive".into(),
            ));
        }
        Ok(())
    }
}

pub fn load_config() -> Result<Config> {
    let Some(config_path) = get_config_path() else {
        tracing::warn!("No config directory available, using defaults");
        return Ok(Config::default());
    };

    if !config_path.exists() {
        tracing::info!("Config file not found at {:?}, using defaults", config_path);
        return Ok(Config::default());
    }

    load_config_from(&config_path)
}

pub fn load_config_from(path: &Path) -> Result<Config> {
    tracing::info!("Loading config from {:?}", path);
    let config_str = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read config file: {}", e))?;

    let config: Config = toml::from_str(&config_str)
        .map_err(|e| anyhow::anyhow!("Failed to parse config file: {}", e))?;
    config.validate()?;

    tracing::info!("Config loaded successfully");
    Ok(config)
}

pub fn get_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("turntaker").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.audio.device, "default");
        assert_eq!(config.audio.sample_rate, 16000);
        assert_eq!(config.audio.channels, 1);
        assert_eq!(config.audio.chunk_ms, 30);

        assert_eq!(config.interrupt.energy_threshold, 750.0);
        assert_eq!(config.interrupt.silence_timeout_ms, 2000);
        assert_eq!(config.interrupt.playback_stop_timeout_ms, 500);
        assert_eq!(config.interrupt.poll_interval_ms, 50);
        assert_eq!(config.interrupt.settle_delay_ms, 100);
        assert_eq!(config.interrupt.monitor_join_timeout_ms, 1000);
        assert_eq!(config.interrupt.max_utterance_ms, 15000);
        assert_eq!(config.interrupt.consecutive_chunks, 1);

        assert_eq!(config.continuation.duration_seconds, 5.0);
        assert_eq!(config.keywords.phrases.len(), 7);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_toml_serialization() {
        let config = Config::default();
        let toml_str = toml::to_string(&config).unwrap();

        assert!(toml_str.contains("[audio]"));
        assert!(toml_str.contains("[interrupt]"));
        assert!(toml_str.contains("[continuation]"));
        assert!(toml_str.contains("[keywords]"));
    }

    #[test]
    fn test_config_toml_round_trip() {
        let config = Config::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(config, parsed);
    }

    #[test]
    fn test_config_with_custom_values() {
        let toml_str = r#"
            [audio]
            device = "USB Headset"
            sample_rate = 48000
            channels = 2
            chunk_ms = 20

            [interrupt]
            energy_threshold = 1200.0
            silence_timeout_ms = 1500
            consecutive_chunks = 2

            [continuation]
            duration_seconds = 8.5

            [keywords]
            phrases = ["stop", "pause"]
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();

        assert_eq!(config.audio.device, "USB Headset");
        assert_eq!(config.audio.sample_rate, 48000);
        assert_eq!(config.audio.channels, 2);
        assert_eq!(config.audio.chunk_ms, 20);
        assert_eq!(config.interrupt.energy_threshold, 1200.0);
        assert_eq!(config.interrupt.silence_timeout_ms, 1500);
        assert_eq!(config.interrupt.consecutive_chunks, 2);
        assert_eq!(config.continuation.duration_seconds, 8.5);
        assert_eq!(config.keywords.phrases, vec!["stop", "pause"]);
    }

    #[test]
    fn test_config_with_missing_fields_uses_defaults() {
        let toml_str = r#"
            [audio]
            device = "partial"

            [interrupt]
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();

        assert_eq!(config.audio.device, "partial");
        assert_eq!(config.audio.sample_rate, 16000);
        assert_eq!(config.interrupt.energy_threshold, 750.0);
        assert_eq!(config.interrupt.poll_interval_ms, 50);
        assert_eq!(config.continuation.duration_seconds, 5.0);
    }

    #[test]
    fn test_config_with_invalid_toml() {
        let toml_str = "invalid toml content [unclosed";
        let result: Result<Config, _> = toml::from_str(toml_str);
        assert!(result.is_err());
    }

    #[test]
    fn test_config_with_invalid_types() {
        let toml_str = r#"
            [interrupt]
            energy_threshold = "loud"
        "#;
        let result: Result<Config, _> = toml::from_str(toml_str);
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.interrupt.energy_threshold = 0.0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.interrupt.consecutive_chunks = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.continuation.duration_seconds = f64::NAN;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.audio.sample_rate = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.audio.channels = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duration_helpers() {
        let interrupt = InterruptConfig::default();
        assert_eq!(interrupt.poll_interval(), Duration::from_millis(50));
        assert_eq!(interrupt.settle_delay(), Duration::from_millis(100));
        assert_eq!(interrupt.monitor_join_timeout(), Duration::from_secs(1));
        assert_eq!(interrupt.playback_stop_timeout(), Duration::from_millis(500));
    }

    #[test]
    fn test_load_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[interrupt]\nenergy_threshold = 900.0").unwrap();

        let config = load_config_from(file.path()).unwrap();
        assert_eq!(config.interrupt.energy_threshold, 900.0);
        assert_eq!(config.audio.sample_rate, 16000);
    }

    #[test]
    fn test_load_config_from_file_rejects_invalid_values() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[continuation]\nduration_seconds = -1.0").unwrap();
        assert!(load_config_from(file.path()).is_err());
    }

    #[test]
    fn test_load_config_from_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_config_from(&dir.path().join("absent.toml")).is_err());
    }

    #[test]
    fn test_config_path_ends_with_project_file() {
        if let Some(path) = get_config_path() {
            assert!(path.ends_with("turntaker/config.toml"));
        }
    }
}

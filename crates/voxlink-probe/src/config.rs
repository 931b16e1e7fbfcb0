//! Probe configuration loading from file and environment variables.

use serde::Deserialize;
use std::path::PathBuf;
use thiserror::Error;
use voxlink_observe::DEFAULT_MONITOR_URL;
use voxlink_voice::{RecognitionConfig, SynthesisBackend, SynthesisConfig};

/// Top-level probe configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Synthesis backend to exercise.
    #[serde(default)]
    pub synthesis: SynthesisConfig,

    /// Recognition backend. Skipped when absent.
    #[serde(default)]
    pub recognition: Option<RecognitionConfig>,

    #[serde(default)]
    pub metrics: MetricsConfig,

    #[serde(default)]
    pub probe: ProbeConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Where metric events are forwarded.
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    /// WebSocket URL of the monitoring endpoint.
    #[serde(default = "default_metrics_url")]
    pub url: String,
}

/// What the probe does once the adapters are up.
#[derive(Debug, Clone, Deserialize)]
pub struct ProbeConfig {
    /// Text to synthesize.
    #[serde(default = "default_text")]
    pub text: String,

    /// Where the synthesized audio is written.
    #[serde(default = "default_output")]
    pub output: PathBuf,

    /// Raw mono PCM16 file to transcribe.
    #[serde(default)]
    pub recognize_input: Option<PathBuf>,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "voxlink_voice=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

fn default_metrics_url() -> String {
    DEFAULT_MONITOR_URL.to_string()
}

fn default_text() -> String {
    "你好，这是一次语音合成测试。".to_string()
}

fn default_output() -> PathBuf {
    PathBuf::from("probe.wav")
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            url: default_metrics_url(),
        }
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            text: default_text(),
            output: default_output(),
            recognize_input: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `VOXLINK_TTS_BACKEND` overrides `synthesis.backend` (`kokoro`, `index_tts`, `speech_api`)
/// - `VOXLINK_TTS_URL` overrides `synthesis.base_url`
/// - `VOXLINK_ASR_URL` overrides `recognition.base_url`, enabling recognition
/// - `VOXLINK_METRICS_URL` overrides `metrics.url`
/// - `VOXLINK_LOG_LEVEL` overrides `logging.level`
/// - `VOXLINK_LOG_JSON` overrides `logging.json` (set to "true" to enable)
///
/// The recognition credential itself is read by the adapter from
/// `DASHSCOPE_API_KEY` when the file does not carry one.
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

/// Applies `VOXLINK_*` overrides read through `var`.
pub(crate) fn apply_env_overrides(config: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(backend) = var("VOXLINK_TTS_BACKEND") {
        match parse_backend(&backend) {
            Some(parsed) => config.synthesis.backend = parsed,
            None => tracing::warn!(value = %backend, "ignoring unknown VOXLINK_TTS_BACKEND"),
        }
    }
    if let Some(url) = var("VOXLINK_TTS_URL") {
        config.synthesis.base_url = Some(url);
    }
    if let Some(url) = var("VOXLINK_ASR_URL") {
        config
            .recognition
            .get_or_insert_with(RecognitionConfig::default)
            .base_url = Some(url);
    }
    if let Some(url) = var("VOXLINK_METRICS_URL") {
        config.metrics.url = url;
    }
    if let Some(level) = var("VOXLINK_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = var("VOXLINK_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }
}

fn parse_backend(value: &str) -> Option<SynthesisBackend> {
    match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
        "kokoro" => Some(SynthesisBackend::Kokoro),
        "index_tts" | "indextts" => Some(SynthesisBackend::IndexTts),
        "speech_api" => Some(SynthesisBackend::SpeechApi),
        _ => None,
    }
}

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use voxlink_types::ResponseFormat;

fn default_connect_timeout_secs() -> f64 {
    15.0
}

fn default_read_timeout_secs() -> f64 {
    30.0
}

fn default_write_timeout_secs() -> f64 {
    5.0
}

fn default_pool_timeout_secs() -> f64 {
    5.0
}

fn default_max_connections() -> usize {
    50
}

fn default_idle_timeout_secs() -> f64 {
    120.0
}

fn default_timeout_seconds() -> f64 {
    30.0
}

fn default_asr_model() -> String {
    "qwen3-asr-flash".to_string()
}

fn default_asr_language() -> String {
    "zh".to_string()
}

fn default_enable_itn() -> bool {
    true
}

fn default_asr_sample_rate() -> u32 {
    16_000
}

pub(crate) fn secs(value: f64) -> Duration {
    if value.is_finite() && value > 0.0 {
        Duration::from_secs_f64(value)
    } else {
        Duration::ZERO
    }
}

/// Timeout tiers and pool ceilings for one adapter's HTTP client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportConfig {
    /// TCP/TLS connect bound.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: f64,
    /// Bound on each read from the response body.
    #[serde(default = "default_read_timeout_secs")]
    pub read_timeout_secs: f64,
    /// Bound on sending the request. Added to the read tier to cap a whole request.
    #[serde(default = "default_write_timeout_secs")]
    pub write_timeout_secs: f64,
    /// How long a call waits for a free connection slot.
    #[serde(default = "default_pool_timeout_secs")]
    pub pool_timeout_secs: f64,
    /// Maximum number of requests in flight at once.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Maximum idle keep-alive connections kept per host.
    #[serde(default = "default_max_connections")]
    pub max_idle_per_host: usize,
    /// How long an idle keep-alive connection is kept.
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: f64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout_secs(),
            read_timeout_secs: default_read_timeout_secs(),
            write_timeout_secs: default_write_timeout_secs(),
            pool_timeout_secs: default_pool_timeout_secs(),
            max_connections: default_max_connections(),
            max_idle_per_host: default_max_connections(),
            idle_timeout_secs: default_idle_timeout_secs(),
        }
    }
}

impl TransportConfig {
    pub fn connect_timeout(&self) -> Duration {
        secs(self.connect_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        secs(self.read_timeout_secs)
    }

    /// Whole-request bound: the write tier plus the read tier.
    pub fn request_timeout(&self) -> Duration {
        secs(self.write_timeout_secs) + secs(self.read_timeout_secs)
    }

    pub fn pool_timeout(&self) -> Duration {
        secs(self.pool_timeout_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        secs(self.idle_timeout_secs)
    }
}

/// Which synthesis backend a [`SynthesisConfig`] targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SynthesisBackend {
    /// Kokoro server: query-string GET, float WAVE normalized to PCM16.
    #[default]
    Kokoro,
    /// Local IndexTTS server: query-string GET, body streamed through.
    IndexTts,
    /// OpenAI-compatible `/audio/speech` endpoint: JSON POST.
    SpeechApi,
}

/// Construction parameters for a synthesis adapter.
///
/// Unset fields fall back to the defaults of the selected backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SynthesisConfig {
    #[serde(default)]
    pub backend: SynthesisBackend,
    pub base_url: Option<String>,
    /// Voice or speaker identifier.
    pub voice: Option<String>,
    pub speed: Option<f32>,
    pub volume: Option<f32>,
    pub response_format: Option<ResponseFormat>,
    /// English voice for bilingual backends.
    pub voice_en: Option<String>,
    /// Chinese voice for bilingual backends.
    pub voice_zh: Option<String>,
    /// Read bound for a synthesis call; overrides `transport.read_timeout_secs`.
    pub timeout_seconds: Option<f64>,
    #[serde(default)]
    pub transport: TransportConfig,
}

impl SynthesisConfig {
    pub fn new(backend: SynthesisBackend) -> Self {
        Self {
            backend,
            ..Self::default()
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_voice(mut self, voice: impl Into<String>) -> Self {
        self.voice = Some(voice.into());
        self
    }

    /// Transport settings with the synthesis read bound applied.
    pub fn effective_transport(&self) -> TransportConfig {
        let mut transport = self.transport.clone();
        transport.read_timeout_secs = self.timeout_seconds.unwrap_or(default_timeout_seconds());
        transport
    }
}

/// Construction parameters for a recognition adapter.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognitionConfig {
    #[serde(default = "default_asr_model")]
    pub model: String,
    #[serde(default = "default_asr_language")]
    pub language: String,
    /// Inverse text normalization: spoken numbers and dates come back written.
    #[serde(default = "default_enable_itn")]
    pub enable_itn: bool,
    /// System prompt sent alongside the audio.
    #[serde(default)]
    pub prompt: String,
    /// Credential. Falls back to `DASHSCOPE_API_KEY` when unset.
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    /// Sample rate of requests built with [`RecognitionConfig::request`].
    #[serde(default = "default_asr_sample_rate")]
    pub sample_rate: u32,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: f64,
    #[serde(default)]
    pub transport: TransportConfig,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            model: default_asr_model(),
            language: default_asr_language(),
            enable_itn: default_enable_itn(),
            prompt: String::new(),
            api_key: None,
            base_url: None,
            sample_rate: default_asr_sample_rate(),
            timeout_seconds: default_timeout_seconds(),
            transport: TransportConfig::default(),
        }
    }
}

impl fmt::Debug for RecognitionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecognitionConfig")
            .field("model", &self.model)
            .field("language", &self.language)
            .field("enable_itn", &self.enable_itn)
            .field("prompt", &self.prompt)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("base_url", &self.base_url)
            .field("sample_rate", &self.sample_rate)
            .field("timeout_seconds", &self.timeout_seconds)
            .field("transport", &self.transport)
            .finish()
    }
}

impl RecognitionConfig {
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Wraps raw mono PCM16 audio in a request at the configured sample rate.
    pub fn request(&self, audio: impl Into<bytes::Bytes>) -> crate::stt::RecognitionRequest {
        crate::stt::RecognitionRequest::new(audio).with_format(self.sample_rate, 1)
    }

    /// Transport settings with the recognition timeout applied to the read tier.
    pub fn effective_transport(&self) -> TransportConfig {
        let mut transport = self.transport.clone();
        transport.read_timeout_secs = self.timeout_seconds;
        transport
    }
}

//! Speech-to-text adapters.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;

use async_trait::async_trait;
use base64::Engine;
use bytes::Bytes;
use reqwest::Method;
use serde_json::{json, Value};
use tracing::{debug, instrument};
use url::Url;
use voxlink_observe::{MetricEvent, Metrics, MetricsHook, SttMetrics};
use voxlink_types::Transcript;

use crate::config::RecognitionConfig;
use crate::error::VoiceError;
use crate::transport::{header_value, HttpTransport};
use crate::tts::base_url;

/// Environment variable consulted when no credential is configured.
pub const DASHSCOPE_API_KEY_ENV: &str = "DASHSCOPE_API_KEY";

/// Beijing region endpoint.
pub const DASHSCOPE_BASE_URL: &str = "https://dashscope.aliyuncs.com";

/// Singapore region endpoint.
pub const DASHSCOPE_INTL_BASE_URL: &str = "https://dashscope-intl.aliyuncs.com";

const PROVIDER: &str = "dashscope";
const GENERATION_PATH: &str = "api/v1/services/aigc/multimodal-generation/generation";
const TRANSCRIPT_POINTER: &str = "/output/choices/0/message/content/0/text";

/// Recognition settings applied to a call.
#[derive(Debug, Clone, PartialEq)]
pub struct RecognitionOptions {
    pub model: String,
    pub language: String,
    pub enable_itn: bool,
    pub prompt: String,
}

impl RecognitionOptions {
    pub fn apply(&mut self, update: &RecognitionOptionsUpdate) {
        if let Some(model) = &update.model {
            self.model = model.clone();
        }
        if let Some(language) = &update.language {
            self.language = language.clone();
        }
        if let Some(enable_itn) = update.enable_itn {
            self.enable_itn = enable_itn;
        }
        if let Some(prompt) = &update.prompt {
            self.prompt = prompt.clone();
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecognitionOptionsUpdate {
    pub model: Option<String>,
    pub language: Option<String>,
    pub enable_itn: Option<bool>,
    pub prompt: Option<String>,
}

impl RecognitionOptionsUpdate {
    pub fn language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn enable_itn(mut self, enable_itn: bool) -> Self {
        self.enable_itn = Some(enable_itn);
        self
    }

    pub fn prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }
}

/// Raw little-endian PCM16 audio to transcribe.
#[derive(Debug, Clone, PartialEq)]
pub struct RecognitionRequest {
    pub audio: Bytes,
    pub sample_rate: u32,
    pub channels: u16,
    /// Overrides the adapter language for this call.
    pub language: Option<String>,
}

impl RecognitionRequest {
    pub fn new(audio: impl Into<Bytes>) -> Self {
        Self {
            audio: audio.into(),
            sample_rate: 16_000,
            channels: 1,
            language: None,
        }
    }

    pub fn with_format(mut self, sample_rate: u32, channels: u16) -> Self {
        self.sample_rate = sample_rate;
        self.channels = channels;
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    /// Playback length in seconds, or 0 when the format is degenerate.
    pub fn audio_duration(&self) -> f64 {
        let bytes_per_second = u64::from(self.sample_rate) * u64::from(self.channels) * 2;
        if bytes_per_second == 0 {
            return 0.0;
        }
        self.audio.len() as f64 / bytes_per_second as f64
    }
}

#[async_trait]
pub trait RecognitionAdapter: Send + Sync {
    fn provider(&self) -> &'static str;

    fn options(&self) -> RecognitionOptions;

    /// Changes the options used by calls issued from now on.
    fn update_options(&self, update: RecognitionOptionsUpdate);

    /// Transcribes one complete utterance.
    async fn recognize(&self, request: RecognitionRequest) -> Result<Transcript, VoiceError>;

    /// Releases the connection pool. Idempotent.
    async fn close(&self);
}

/// Qwen3-ASR through the DashScope multimodal generation API.
///
/// Audio is sent inline as a base64 `data:` URI; the transcript is read from
/// the first content item of the first choice. A response without that path
/// is an empty transcript, not an error.
pub struct DashScopeAsr {
    api_key: String,
    endpoint: Url,
    transport: HttpTransport,
    options: RwLock<RecognitionOptions>,
    metrics: Option<MetricsHook>,
}

impl std::fmt::Debug for DashScopeAsr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DashScopeAsr")
            .field("api_key", &"[REDACTED]")
            .field("endpoint", &self.endpoint.as_str())
            .field("transport", &self.transport)
            .field("options", &self.options())
            .finish_non_exhaustive()
    }
}

impl DashScopeAsr {
    /// Builds the adapter. Fails with [`VoiceError::Config`] when neither the
    /// config nor `DASHSCOPE_API_KEY` supplies a credential.
    pub fn new(config: RecognitionConfig) -> Result<Self, VoiceError> {
        let api_key = resolve_api_key(config.api_key.as_deref())?;
        let base = base_url(config.base_url.as_deref().unwrap_or(DASHSCOPE_BASE_URL))?;
        let endpoint = base
            .join(GENERATION_PATH)
            .map_err(|e| VoiceError::Config(format!("invalid endpoint: {}", e)))?;
        let transport = HttpTransport::new(&config.effective_transport())?;

        Ok(Self {
            api_key,
            endpoint,
            transport,
            options: RwLock::new(RecognitionOptions {
                model: config.model,
                language: config.language,
                enable_itn: config.enable_itn,
                prompt: config.prompt,
            }),
            metrics: None,
        })
    }

    /// Same as [`new`](Self::new) against the Singapore region.
    pub fn with_singapore(mut config: RecognitionConfig) -> Result<Self, VoiceError> {
        config.base_url = Some(DASHSCOPE_INTL_BASE_URL.to_string());
        Self::new(config)
    }

    pub fn with_metrics(mut self, hook: MetricsHook) -> Self {
        self.metrics = Some(hook);
        self
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn payload(options: &RecognitionOptions, request: &RecognitionRequest, language: &str) -> Value {
        let audio = base64::engine::general_purpose::STANDARD.encode(&request.audio);
        let mut asr_options = json!({ "enable_itn": options.enable_itn });
        if !language.is_empty() {
            asr_options["language"] = json!(language);
        }

        json!({
            "model": options.model,
            "input": {
                "messages": [
                    {
                        "role": "system",
                        "content": [{ "text": options.prompt }]
                    },
                    {
                        "role": "user",
                        "content": [{
                            "audio": format!(
                                "data:audio/pcm;rate={};base64,{}",
                                request.sample_rate, audio
                            )
                        }]
                    }
                ]
            },
            "parameters": { "asr_options": asr_options }
        })
    }
}

#[async_trait]
impl RecognitionAdapter for DashScopeAsr {
    fn provider(&self) -> &'static str {
        PROVIDER
    }

    fn options(&self) -> RecognitionOptions {
        self.options
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn update_options(&self, update: RecognitionOptionsUpdate) {
        self.options
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .apply(&update);
    }

    #[instrument(skip_all, fields(provider = PROVIDER, bytes = request.audio.len()))]
    async fn recognize(&self, request: RecognitionRequest) -> Result<Transcript, VoiceError> {
        if request.audio.is_empty() {
            return Err(VoiceError::InvalidRequest(
                "recognition audio is empty".to_string(),
            ));
        }
        let options = self.options();
        let language = request
            .language
            .clone()
            .unwrap_or_else(|| options.language.clone());
        let started = Instant::now();

        let builder = self
            .transport
            .request(Method::POST, self.endpoint.clone())?
            .bearer_auth(&self.api_key)
            .json(&Self::payload(&options, &request, &language));
        let (response, _permit) = self.transport.send(builder).await?.into_parts();
        let request_id = header_value(response.headers(), "x-request-id");
        let body = response.bytes().await?;
        let result: Value = serde_json::from_slice(&body)
            .map_err(|e| VoiceError::Connection(format!("malformed recognition response: {}", e)))?;

        let text = extract_transcript(&result);
        let duration = started.elapsed().as_secs_f64();
        debug!(
            request_id = %request_id,
            chars = text.chars().count(),
            duration,
            "recognition completed"
        );

        if let Some(hook) = &self.metrics {
            hook(MetricEvent::new(Metrics::Stt(SttMetrics {
                provider: PROVIDER.to_string(),
                request_id: request_id.clone(),
                duration,
                audio_duration: request.audio_duration(),
                streamed: false,
            })));
        }

        Ok(Transcript {
            text,
            language,
            request_id,
        })
    }

    async fn close(&self) {
        self.transport.close().await;
    }
}

/// Builds the DashScope adapter, forwarding metrics to `metrics` when given.
pub fn create_recognizer(
    config: RecognitionConfig,
    metrics: Option<MetricsHook>,
) -> Result<Arc<dyn RecognitionAdapter>, VoiceError> {
    let asr = DashScopeAsr::new(config)?;
    Ok(match metrics {
        Some(hook) => Arc::new(asr.with_metrics(hook)),
        None => Arc::new(asr),
    })
}

/// Picks the configured credential, falling back to `DASHSCOPE_API_KEY`.
pub fn resolve_api_key(configured: Option<&str>) -> Result<String, VoiceError> {
    let key = match configured {
        Some(key) => key.trim().to_string(),
        None => std::env::var(DASHSCOPE_API_KEY_ENV)
            .map(|key| key.trim().to_string())
            .unwrap_or_default(),
    };
    if key.is_empty() {
        return Err(VoiceError::Config(format!(
            "{} is required. Set api_key in the recognition config or the {} environment variable",
            DASHSCOPE_API_KEY_ENV, DASHSCOPE_API_KEY_ENV
        )));
    }
    Ok(key)
}

/// Reads the transcript text from a generation response, or `""` when absent.
pub fn extract_transcript(result: &Value) -> String {
    result
        .pointer(TRANSCRIPT_POINTER)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

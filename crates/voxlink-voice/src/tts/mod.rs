//! Text-to-speech adapters.
//!
//! Every backend implements [`SynthesisAdapter`]. Adapters are built from a
//! [`SynthesisConfig`], usually through [`create_synthesizer`], and may serve
//! concurrent calls. Options are copied at call start, so an
//! [`update_options`](SynthesisAdapter::update_options) never leaks into a
//! call that is already running.

mod indextts;
mod kokoro;
mod speech_api;

pub use indextts::IndexTts;
pub use kokoro::KokoroTts;
pub use speech_api::SpeechApiTts;

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use reqwest::Response;
use tokio::sync::mpsc;
use url::Url;
use voxlink_observe::{MetricEvent, Metrics, MetricsHook, TtsMetrics};
use voxlink_types::{AudioBuffer, AudioInfo, ResponseFormat};

use crate::config::{SynthesisBackend, SynthesisConfig};
use crate::error::VoiceError;
use crate::transport::HttpTransport;

/// Maximum text input size for TTS (64 KiB).
pub const MAX_TTS_INPUT_BYTES: usize = 64 * 1024;

/// How many leading bytes of a forwarded body are kept to read its header.
const HEADER_PREFIX_BYTES: usize = 512;

/// Voice settings applied to a synthesis call.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisOptions {
    pub voice: String,
    pub speed: f32,
    pub volume: f32,
    pub response_format: ResponseFormat,
    pub voice_en: String,
    pub voice_zh: String,
}

impl SynthesisOptions {
    pub fn apply(&mut self, update: &OptionsUpdate) {
        if let Some(voice) = &update.voice {
            self.voice = voice.clone();
        }
        if let Some(speed) = update.speed {
            self.speed = speed;
        }
        if let Some(volume) = update.volume {
            self.volume = volume;
        }
        if let Some(format) = update.response_format {
            self.response_format = format;
        }
        if let Some(voice_en) = &update.voice_en {
            self.voice_en = voice_en.clone();
        }
        if let Some(voice_zh) = &update.voice_zh {
            self.voice_zh = voice_zh.clone();
        }
    }
}

/// A partial change to [`SynthesisOptions`]. Unset fields are left alone.
///
/// Backends ignore fields they have no use for.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OptionsUpdate {
    pub voice: Option<String>,
    pub speed: Option<f32>,
    pub volume: Option<f32>,
    pub response_format: Option<ResponseFormat>,
    pub voice_en: Option<String>,
    pub voice_zh: Option<String>,
}

impl OptionsUpdate {
    pub fn voice(mut self, voice: impl Into<String>) -> Self {
        self.voice = Some(voice.into());
        self
    }

    pub fn speed(mut self, speed: f32) -> Self {
        self.speed = Some(speed);
        self
    }

    pub fn volume(mut self, volume: f32) -> Self {
        self.volume = Some(volume);
        self
    }

    pub fn response_format(mut self, format: ResponseFormat) -> Self {
        self.response_format = Some(format);
        self
    }

    pub fn voice_en(mut self, voice: impl Into<String>) -> Self {
        self.voice_en = Some(voice.into());
        self
    }

    pub fn voice_zh(mut self, voice: impl Into<String>) -> Self {
        self.voice_zh = Some(voice.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Text to speak plus per-call option overrides.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SynthesisRequest {
    pub text: String,
    pub overrides: OptionsUpdate,
}

impl SynthesisRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            overrides: OptionsUpdate::default(),
        }
    }

    pub fn with_overrides(mut self, overrides: OptionsUpdate) -> Self {
        self.overrides = overrides;
        self
    }
}

impl From<&str> for SynthesisRequest {
    fn from(text: &str) -> Self {
        Self::new(text)
    }
}

impl From<String> for SynthesisRequest {
    fn from(text: String) -> Self {
        Self::new(text)
    }
}

#[async_trait]
pub trait SynthesisAdapter: Send + Sync {
    /// Provider label used in logs and metrics.
    fn provider(&self) -> &'static str;

    /// Current adapter-level options.
    fn options(&self) -> SynthesisOptions;

    /// Changes the options used by calls issued from now on.
    fn update_options(&self, update: OptionsUpdate);

    /// Synthesizes `request` into one fully buffered audio payload.
    async fn synthesize(&self, request: SynthesisRequest) -> Result<AudioBuffer, VoiceError>;

    /// Pushes audio to `chunks` as it arrives and returns its description.
    ///
    /// Chunks are pushed in byte order and are never empty. Backends that
    /// cannot stream push the whole buffer as a single chunk.
    async fn synthesize_chunked(
        &self,
        request: SynthesisRequest,
        chunks: mpsc::Sender<Bytes>,
    ) -> Result<AudioInfo, VoiceError> {
        let audio = self.synthesize(request).await?;
        if !audio.is_empty() {
            chunks
                .send(audio.data.clone())
                .await
                .map_err(|_| receiver_dropped())?;
        }
        Ok(audio.info)
    }

    /// Opens a pooled connection in the background. Failures are ignored.
    fn prewarm(&self);

    /// Cancels any prewarm and releases the connection pool. Idempotent.
    async fn close(&self);
}

/// Builds the adapter selected by `config.backend`.
pub fn create_synthesizer(
    config: &SynthesisConfig,
    metrics: Option<MetricsHook>,
) -> Result<Arc<dyn SynthesisAdapter>, VoiceError> {
    let adapter: Arc<dyn SynthesisAdapter> = match config.backend {
        SynthesisBackend::Kokoro => {
            let tts = KokoroTts::new(config)?;
            Arc::new(match metrics {
                Some(hook) => tts.with_metrics(hook),
                None => tts,
            })
        }
        SynthesisBackend::IndexTts => {
            let tts = IndexTts::new(config)?;
            Arc::new(match metrics {
                Some(hook) => tts.with_metrics(hook),
                None => tts,
            })
        }
        SynthesisBackend::SpeechApi => {
            let tts = SpeechApiTts::new(config)?;
            Arc::new(match metrics {
                Some(hook) => tts.with_metrics(hook),
                None => tts,
            })
        }
    };
    Ok(adapter)
}

/// State every HTTP synthesis backend carries.
pub(crate) struct AdapterCore {
    pub provider: &'static str,
    pub base_url: Url,
    pub transport: HttpTransport,
    options: RwLock<SynthesisOptions>,
    metrics: Option<MetricsHook>,
}

impl std::fmt::Debug for AdapterCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterCore")
            .field("provider", &self.provider)
            .field("base_url", &self.base_url.as_str())
            .field("transport", &self.transport)
            .field("metrics", &self.metrics.is_some())
            .finish_non_exhaustive()
    }
}

impl AdapterCore {
    pub fn new(
        provider: &'static str,
        config: &SynthesisConfig,
        default_base_url: &str,
        options: SynthesisOptions,
    ) -> Result<Self, VoiceError> {
        let base_url = base_url(config.base_url.as_deref().unwrap_or(default_base_url))?;
        let transport = HttpTransport::new(&config.effective_transport())?;
        Ok(Self {
            provider,
            base_url,
            transport,
            options: RwLock::new(options),
            metrics: None,
        })
    }

    pub fn set_metrics(&mut self, hook: MetricsHook) {
        self.metrics = Some(hook);
    }

    pub fn options(&self) -> SynthesisOptions {
        self.options
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Copies the options and applies per-call overrides to the copy.
    pub fn snapshot(&self, overrides: &OptionsUpdate) -> SynthesisOptions {
        let mut options = self.options();
        options.apply(overrides);
        options
    }

    pub fn update_options(&self, update: &OptionsUpdate) {
        self.options
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .apply(update);
    }

    pub fn report(&self, metrics: TtsMetrics) {
        if let Some(hook) = &self.metrics {
            hook(MetricEvent::new(Metrics::Tts(metrics)));
        }
    }
}

/// Parses a configured base URL so that relative joins append to its path.
pub(crate) fn base_url(raw: &str) -> Result<Url, VoiceError> {
    let normalized = format!("{}/", raw.trim_end_matches('/'));
    Url::parse(&normalized)
        .map_err(|e| VoiceError::Config(format!("invalid base URL {:?}: {}", raw, e)))
}

/// Formats a float query parameter the way the servers expect (`1.0`, not `1`).
///
/// Very small or large magnitudes come out in exponent form without a padded
/// exponent (`1e-7`, where Python writes `1e-07`). Speeds and volumes never
/// get there.
pub(crate) fn query_number(value: f32) -> String {
    format!("{:?}", value)
}

/// Rejects text that must never reach a backend.
pub(crate) fn validate_text(text: &str) -> Result<(), VoiceError> {
    if text.trim().is_empty() {
        return Err(VoiceError::InvalidRequest(
            "synthesis text is empty".to_string(),
        ));
    }
    if text.len() > MAX_TTS_INPUT_BYTES {
        return Err(VoiceError::InvalidRequest(format!(
            "text exceeds maximum size: {} bytes (limit: {} bytes)",
            text.len(),
            MAX_TTS_INPUT_BYTES
        )));
    }
    Ok(())
}

/// Wall-clock timings of one call.
#[derive(Debug, Clone, Copy)]
pub(crate) struct CallTimer {
    started: Instant,
    first_chunk: Option<Instant>,
}

impl CallTimer {
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
            first_chunk: None,
        }
    }

    pub fn mark_first_chunk(&mut self) {
        self.first_chunk.get_or_insert_with(Instant::now);
    }

    pub fn ttfb(&self) -> f64 {
        self.first_chunk
            .map(|at| at.duration_since(self.started).as_secs_f64())
            .unwrap_or_else(|| self.elapsed())
    }

    pub fn elapsed(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    pub fn tts_metrics(
        &self,
        provider: &str,
        request_id: &str,
        text: &str,
        audio_duration: f64,
        streamed: bool,
    ) -> TtsMetrics {
        TtsMetrics {
            provider: provider.to_string(),
            request_id: request_id.to_string(),
            ttfb: self.ttfb(),
            duration: self.elapsed(),
            audio_duration,
            characters_count: text.chars().count(),
            streamed,
        }
    }
}

/// Reads a whole response body, recording when the first bytes arrived.
pub(crate) async fn collect_body(
    response: Response,
    timer: &mut CallTimer,
) -> Result<Bytes, VoiceError> {
    let mut body = BytesMut::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if chunk.is_empty() {
            continue;
        }
        timer.mark_first_chunk();
        body.extend_from_slice(&chunk);
    }
    Ok(body.freeze())
}

/// What [`forward_body`] saw of a body it never held whole.
#[derive(Debug, Default)]
pub(crate) struct ForwardedBody {
    pub len: usize,
    pub head: Vec<u8>,
}

/// Pushes each non-empty body chunk to `chunks` in arrival order.
pub(crate) async fn forward_body(
    response: Response,
    timer: &mut CallTimer,
    chunks: &mpsc::Sender<Bytes>,
) -> Result<ForwardedBody, VoiceError> {
    let mut seen = ForwardedBody::default();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if chunk.is_empty() {
            continue;
        }
        timer.mark_first_chunk();
        seen.len += chunk.len();
        if seen.head.len() < HEADER_PREFIX_BYTES {
            let take = (HEADER_PREFIX_BYTES - seen.head.len()).min(chunk.len());
            seen.head.extend_from_slice(&chunk[..take]);
        }
        chunks.send(chunk).await.map_err(|_| receiver_dropped())?;
    }
    Ok(seen)
}

fn receiver_dropped() -> VoiceError {
    VoiceError::Connection("audio chunk receiver was dropped".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> SynthesisOptions {
        SynthesisOptions {
            voice: "alice".to_string(),
            speed: 1.0,
            volume: 1.0,
            response_format: ResponseFormat::Wav,
            voice_en: "en".to_string(),
            voice_zh: "zh".to_string(),
        }
    }

    #[test]
    fn apply_only_touches_given_fields() {
        let mut opts = options();
        opts.apply(&OptionsUpdate::default().speed(1.25).voice_zh("zm_029"));
        assert_eq!(opts.voice, "alice");
        assert_eq!(opts.speed, 1.25);
        assert_eq!(opts.voice_zh, "zm_029");
        assert_eq!(opts.response_format, ResponseFormat::Wav);
    }

    #[test]
    fn empty_update_is_empty() {
        assert!(OptionsUpdate::default().is_empty());
        assert!(!OptionsUpdate::default().volume(0.5).is_empty());
    }

    #[test]
    fn validate_text_bounds() {
        assert!(validate_text("hello").is_ok());
        assert!(matches!(
            validate_text(""),
            Err(VoiceError::InvalidRequest(_))
        ));
        assert!(matches!(
            validate_text("  \n"),
            Err(VoiceError::InvalidRequest(_))
        ));
        let long = "a".repeat(MAX_TTS_INPUT_BYTES + 1);
        assert!(matches!(
            validate_text(&long),
            Err(VoiceError::InvalidRequest(_))
        ));
        assert!(validate_text(&"a".repeat(MAX_TTS_INPUT_BYTES)).is_ok());
    }

    #[test]
    fn base_url_keeps_path_prefix() {
        let url = base_url("http://localhost:6006/v1").unwrap();
        assert_eq!(
            url.join("audio/speech").unwrap().as_str(),
            "http://localhost:6006/v1/audio/speech"
        );
        let url = base_url("http://localhost:9880///").unwrap();
        assert_eq!(url.as_str(), "http://localhost:9880/");
        assert!(matches!(base_url("not a url"), Err(VoiceError::Config(_))));
    }

    #[test]
    fn query_numbers_keep_decimal_point() {
        assert_eq!(query_number(1.0), "1.0");
        assert_eq!(query_number(0.75), "0.75");
        assert_eq!(query_number(1e-7), "1e-7");
    }

    #[test]
    fn metrics_count_characters_not_bytes() {
        let timer = CallTimer::start();
        let metrics = timer.tts_metrics("kokoro-tts", "", "你好", 0.5, false);
        assert_eq!(metrics.characters_count, 2);
        assert!(metrics.ttfb <= metrics.duration);
    }

    #[test]
    fn snapshot_applies_overrides_to_a_copy() {
        let core = AdapterCore::new(
            "kokoro-tts",
            &SynthesisConfig::default(),
            "http://localhost:9880",
            options(),
        )
        .unwrap();
        let snap = core.snapshot(&OptionsUpdate::default().voice("bob"));
        assert_eq!(snap.voice, "bob");
        assert_eq!(core.options().voice, "alice");

        core.update_options(&OptionsUpdate::default().voice("carol"));
        assert_eq!(snap.voice, "bob");
        assert_eq!(core.options().voice, "carol");
    }
}

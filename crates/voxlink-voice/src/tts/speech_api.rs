use async_trait::async_trait;
use reqwest::Method;
use serde::Serialize;
use tracing::{debug, instrument};
use url::Url;
use voxlink_observe::MetricsHook;
use voxlink_types::{AudioBuffer, AudioInfo, ResponseFormat};

use super::{
    collect_body, validate_text, AdapterCore, CallTimer, OptionsUpdate,
    SynthesisAdapter, SynthesisOptions, SynthesisRequest,
};
use crate::config::SynthesisConfig;
use crate::error::VoiceError;
use crate::transport::header_value;
use crate::wav;

const PROVIDER: &str = "speech-api";
const DEFAULT_BASE_URL: &str = "http://localhost:6006";
const SAMPLE_RATE: u32 = 24_000;
const NUM_CHANNELS: u16 = 1;

const DEFAULT_VOICE: &str = "default";

/// Sent as `model`; the servers this targets ignore it.
const MODEL: &str = "tts-1";

#[derive(Debug, Serialize)]
struct SpeechBody<'a> {
    model: &'a str,
    input: &'a str,
    voice: &'a str,
    response_format: ResponseFormat,
    speed: f32,
}

/// Adapter for OpenAI-compatible `/audio/speech` endpoints.
///
/// The response body is the encoded audio in the requested format and is
/// returned untouched.
#[derive(Debug)]
pub struct SpeechApiTts {
    core: AdapterCore,
    speech_url: Url,
    health_url: Url,
}

impl SpeechApiTts {
    pub fn new(config: &SynthesisConfig) -> Result<Self, VoiceError> {
        let options = SynthesisOptions {
            voice: config
                .voice
                .clone()
                .unwrap_or_else(|| DEFAULT_VOICE.to_string()),
            speed: config.speed.unwrap_or(1.0),
            volume: config.volume.unwrap_or(1.0),
            response_format: config.response_format.unwrap_or_default(),
            voice_en: config.voice_en.clone().unwrap_or_default(),
            voice_zh: config.voice_zh.clone().unwrap_or_default(),
        };
        let core = AdapterCore::new(PROVIDER, config, DEFAULT_BASE_URL, options)?;
        let join = |path: &str| {
            core.base_url
                .join(path)
                .map_err(|e| VoiceError::Config(format!("invalid {} URL: {}", path, e)))
        };
        let speech_url = join("audio/speech")?;
        let health_url = join("health")?;
        Ok(Self {
            core,
            speech_url,
            health_url,
        })
    }

    pub fn with_metrics(mut self, hook: MetricsHook) -> Self {
        self.core.set_metrics(hook);
        self
    }
}

#[async_trait]
impl SynthesisAdapter for SpeechApiTts {
    fn provider(&self) -> &'static str {
        PROVIDER
    }

    fn options(&self) -> SynthesisOptions {
        self.core.options()
    }

    fn update_options(&self, update: OptionsUpdate) {
        self.core.update_options(&update);
    }

    #[instrument(skip_all, fields(provider = PROVIDER, chars = request.text.chars().count()))]
    async fn synthesize(&self, request: SynthesisRequest) -> Result<AudioBuffer, VoiceError> {
        validate_text(&request.text)?;
        let options = self.core.snapshot(&request.overrides);
        let mut timer = CallTimer::start();

        let body = SpeechBody {
            model: MODEL,
            input: &request.text,
            voice: &options.voice,
            response_format: options.response_format,
            speed: options.speed,
        };
        let builder = self
            .core
            .transport
            .request(Method::POST, self.speech_url.clone())?
            .json(&body);
        let (response, _permit) = self.core.transport.send(builder).await?.into_parts();
        let request_id = header_value(response.headers(), "x-request-id");
        let audio = collect_body(response, &mut timer).await?;

        let audio_duration = match options.response_format {
            ResponseFormat::Wav => wav::pcm16_duration(&audio).unwrap_or(0.0),
            _ => 0.0,
        };
        debug!(
            bytes = audio.len(),
            format = %options.response_format,
            audio_duration,
            "synthesis completed"
        );
        self.core.report(timer.tts_metrics(
            PROVIDER,
            &request_id,
            &request.text,
            audio_duration,
            false,
        ));

        let info = AudioInfo::new(
            SAMPLE_RATE,
            NUM_CHANNELS,
            options.response_format.mime_type(),
        )
        .with_request_id(request_id);
        Ok(AudioBuffer::new(audio, info))
    }

    fn prewarm(&self) {
        match self
            .core
            .transport
            .request(Method::GET, self.health_url.clone())
        {
            Ok(builder) => self.core.transport.prewarm(builder),
            Err(e) => debug!(error = %e, "skipping prewarm"),
        }
    }

    async fn close(&self) {
        self.core.transport.close().await;
    }
}

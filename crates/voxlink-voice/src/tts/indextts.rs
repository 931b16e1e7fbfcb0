use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Method;
use tokio::sync::mpsc;
use tracing::{debug, instrument};
use url::Url;
use voxlink_observe::MetricsHook;
use voxlink_types::{AudioBuffer, AudioInfo, ResponseFormat, MIME_WAV};

use super::{
    collect_body, forward_body, query_number, validate_text, AdapterCore, CallTimer,
    OptionsUpdate, SynthesisAdapter, SynthesisOptions, SynthesisRequest,
};
use crate::config::SynthesisConfig;
use crate::error::VoiceError;
use crate::transport::header_value;
use crate::wav;

const PROVIDER: &str = "local-indextts";
const DEFAULT_BASE_URL: &str = "http://localhost:9880";
const SAMPLE_RATE: u32 = 24_000;
const NUM_CHANNELS: u16 = 1;

const DEFAULT_SPEAKER: &str = "忧伤女声.pt";
const DEFAULT_VOLUME: f32 = 1.0;

const PREWARM_TEXT: &str = "测试";

/// Local IndexTTS server adapter.
///
/// Sends `GET /?text=&speaker=&volume=` and streams the body. The server
/// already produces 16-bit WAVE at 24 kHz mono, so bytes are passed through.
#[derive(Debug)]
pub struct IndexTts {
    core: AdapterCore,
}

impl IndexTts {
    pub fn new(config: &SynthesisConfig) -> Result<Self, VoiceError> {
        let options = SynthesisOptions {
            voice: config
                .voice
                .clone()
                .unwrap_or_else(|| DEFAULT_SPEAKER.to_string()),
            speed: config.speed.unwrap_or(1.0),
            volume: config.volume.unwrap_or(DEFAULT_VOLUME),
            response_format: ResponseFormat::Wav,
            voice_en: config.voice_en.clone().unwrap_or_default(),
            voice_zh: config.voice_zh.clone().unwrap_or_default(),
        };
        Ok(Self {
            core: AdapterCore::new(PROVIDER, config, DEFAULT_BASE_URL, options)?,
        })
    }

    pub fn with_metrics(mut self, hook: MetricsHook) -> Self {
        self.core.set_metrics(hook);
        self
    }

    fn request_url(&self, text: &str, options: &SynthesisOptions) -> Url {
        let mut url = self.core.base_url.clone();
        url.query_pairs_mut()
            .append_pair("text", text)
            .append_pair("speaker", &options.voice)
            .append_pair("volume", &query_number(options.volume));
        url
    }

    fn audio_info(request_id: String) -> AudioInfo {
        AudioInfo::new(SAMPLE_RATE, NUM_CHANNELS, MIME_WAV).with_request_id(request_id)
    }
}

#[async_trait]
impl SynthesisAdapter for IndexTts {
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

        let builder = self
            .core
            .transport
            .request(Method::GET, self.request_url(&request.text, &options))?;
        let (response, _permit) = self.core.transport.send(builder).await?.into_parts();
        let request_id = header_value(response.headers(), "x-request-id");
        let body = collect_body(response, &mut timer).await?;

        let audio_duration = wav::pcm16_duration(&body).unwrap_or(0.0);
        debug!(bytes = body.len(), audio_duration, "synthesis completed");
        self.core.report(timer.tts_metrics(
            PROVIDER,
            &request_id,
            &request.text,
            audio_duration,
            false,
        ));

        Ok(AudioBuffer::new(body, Self::audio_info(request_id)))
    }

    #[instrument(skip_all, fields(provider = PROVIDER, chars = request.text.chars().count()))]
    async fn synthesize_chunked(
        &self,
        request: SynthesisRequest,
        chunks: mpsc::Sender<Bytes>,
    ) -> Result<AudioInfo, VoiceError> {
        validate_text(&request.text)?;
        let options = self.core.snapshot(&request.overrides);
        let mut timer = CallTimer::start();

        let builder = self
            .core
            .transport
            .request(Method::GET, self.request_url(&request.text, &options))?;
        let (response, _permit) = self.core.transport.send(builder).await?.into_parts();
        let request_id = header_value(response.headers(), "x-request-id");
        let seen = forward_body(response, &mut timer, &chunks).await?;

        let audio_duration = wav::pcm16_duration_from_prefix(&seen.head, seen.len).unwrap_or(0.0);
        debug!(bytes = seen.len, audio_duration, "streamed synthesis completed");
        self.core.report(timer.tts_metrics(
            PROVIDER,
            &request_id,
            &request.text,
            audio_duration,
            true,
        ));

        Ok(Self::audio_info(request_id))
    }

    fn prewarm(&self) {
        let url = self.request_url(PREWARM_TEXT, &self.core.options());
        match self.core.transport.request(Method::GET, url) {
            Ok(builder) => self.core.transport.prewarm(builder),
            Err(e) => debug!(error = %e, "skipping prewarm"),
        }
    }

    async fn close(&self) {
        self.core.transport.close().await;
    }
}

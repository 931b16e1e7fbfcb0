use async_trait::async_trait;
use reqwest::Method;
use tracing::{debug, instrument};
use url::Url;
use voxlink_observe::MetricsHook;
use voxlink_types::{AudioBuffer, AudioInfo, ResponseFormat, MIME_WAV};

use super::{
    collect_body, query_number, validate_text, AdapterCore, CallTimer, OptionsUpdate,
    SynthesisAdapter, SynthesisOptions, SynthesisRequest,
};
use crate::config::SynthesisConfig;
use crate::error::VoiceError;
use crate::transport::header_value;
use crate::wav;

const PROVIDER: &str = "kokoro-tts";
const DEFAULT_BASE_URL: &str = "http://localhost:9880";
const SAMPLE_RATE: u32 = 24_000;
const NUM_CHANNELS: u16 = 1;

const DEFAULT_SPEAKER: &str = "assets/woman-01-zh.wav";
const DEFAULT_SPEAKER_EN: &str = "am_adam_男.pt";
const DEFAULT_SPEAKER_ZH: &str = "zm_029.pt";
const DEFAULT_SPEED: f32 = 1.0;

const PREWARM_TEXT: &str = "test";

/// Kokoro server adapter.
///
/// Sends `GET /?text=&speaker=&speed=&speaker_en=&speaker_zh=` and reads the
/// whole body. Kokoro answers with float WAVE files, which are rewritten to
/// PCM16 before they are returned.
#[derive(Debug)]
pub struct KokoroTts {
    core: AdapterCore,
}

impl KokoroTts {
    pub fn new(config: &SynthesisConfig) -> Result<Self, VoiceError> {
        let options = SynthesisOptions {
            voice: config
                .voice
                .clone()
                .unwrap_or_else(|| DEFAULT_SPEAKER.to_string()),
            speed: config.speed.unwrap_or(DEFAULT_SPEED),
            volume: config.volume.unwrap_or(1.0),
            response_format: ResponseFormat::Wav,
            voice_en: config
                .voice_en
                .clone()
                .unwrap_or_else(|| DEFAULT_SPEAKER_EN.to_string()),
            voice_zh: config
                .voice_zh
                .clone()
                .unwrap_or_else(|| DEFAULT_SPEAKER_ZH.to_string()),
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
            .append_pair("speed", &query_number(options.speed))
            .append_pair("speaker_en", &options.voice_en)
            .append_pair("speaker_zh", &options.voice_zh);
        url
    }
}

#[async_trait]
impl SynthesisAdapter for KokoroTts {
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

        let normalized = wav::normalize(&body, SAMPLE_RATE, NUM_CHANNELS);
        let audio_duration = wav::pcm16_duration(&normalized.data).unwrap_or(0.0);
        debug!(
            bytes = normalized.data.len(),
            transcoded = normalized.transcoded,
            sample_rate = normalized.sample_rate,
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

        let info = AudioInfo::new(normalized.sample_rate, normalized.channels, MIME_WAV)
            .with_request_id(request_id);
        Ok(AudioBuffer::new(normalized.data, info))
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

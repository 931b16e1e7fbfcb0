//! HTTP adapters for speech synthesis and recognition backends.
//!
//! Callers hold an `Arc<dyn SynthesisAdapter>` or `Arc<dyn RecognitionAdapter>`
//! and never see which backend sits behind it. Each adapter owns one pooled
//! [`HttpTransport`], normalizes returned audio to 16-bit PCM where needed,
//! and reports a metric event per successful call through an optional
//! [`MetricsHook`](voxlink_observe::MetricsHook).
//!
//! | Backend | Request | Body handling |
//! |---------|---------|---------------|
//! | [`KokoroTts`] | `GET /?text=...` | buffered, float WAVE rewritten to PCM16 |
//! | [`IndexTts`] | `GET /?text=...` | streamed chunk by chunk |
//! | [`SpeechApiTts`] | `POST /audio/speech` | buffered, returned as-is |
//! | [`DashScopeAsr`] | `POST .../generation` | JSON transcript |
//!
//! Failed calls surface as [`VoiceError::Status`], [`VoiceError::Timeout`] or
//! [`VoiceError::Connection`].

pub mod config;
pub mod error;
pub mod stt;
pub mod transport;
pub mod tts;
pub mod wav;

pub use config::{RecognitionConfig, SynthesisBackend, SynthesisConfig, TransportConfig};
pub use error::VoiceError;
pub use stt::{
    create_recognizer, DashScopeAsr, RecognitionAdapter, RecognitionOptions,
    RecognitionOptionsUpdate, RecognitionRequest,
};
pub use transport::HttpTransport;
pub use tts::{
    create_synthesizer, IndexTts, KokoroTts, OptionsUpdate, SpeechApiTts, SynthesisAdapter,
    SynthesisOptions, SynthesisRequest, MAX_TTS_INPUT_BYTES,
};

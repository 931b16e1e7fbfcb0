//! Telemetry pipeline for voxlink voice sessions.
//!
//! Synthesis and recognition adapters report per-call performance through a
//! [`MetricsHook`]. A [`MetricsReporter`] owns the session's forwarding task
//! and its [`MetricsSink`], which streams one JSON record per event to a
//! monitoring endpoint over a persistent WebSocket.
//!
//! # Metric kinds
//!
//! | Kind | `metric_type` | Payload |
//! |------|---------------|---------|
//! | LLM | `llm` | prompt/completion tokens, tokens per second, time to first token |
//! | STT | `stt` | duration, audio duration, streamed, real-time factor |
//! | TTS | `tts` | time to first byte, duration, audio duration, streamed, real-time factor |
//! | EOU | `eou` | end-of-utterance delay, transcription delay |
//!
//! # Wire record
//!
//! ```json
//! {"timestamp":"2025-01-01T00:00:00.000000Z","metric_type":"tts","session_id":"...","data":{...}}
//! ```
//!
//! Delivery is best effort. An unreachable endpoint costs one connection
//! attempt per event and the event is dropped; producers never see an error.
//!
//! # Usage
//!
//! ```rust,ignore
//! use voxlink_observe::{MetricsReporter, MetricsSink, DEFAULT_MONITOR_URL};
//!
//! let reporter = MetricsReporter::spawn(MetricsSink::new(session_id, DEFAULT_MONITOR_URL));
//! reporter.start().await;
//! let tts = KokoroTts::new(&config)?.with_metrics(reporter.hook());
//! // ...
//! tts.close().await;
//! reporter.shutdown().await;
//! ```

mod error;
mod event;
mod reporter;
mod sink;

pub use error::ObserveError;
pub use event::{
    real_time_factor, EouMetrics, LlmMetrics, MetricEnvelope, MetricEvent, MetricKind, Metrics,
    ParseMetricKindError, SttMetrics, TtsMetrics,
};
pub use reporter::{MetricsHook, MetricsReporter};
pub use sink::{MetricsSink, DEFAULT_MONITOR_URL};

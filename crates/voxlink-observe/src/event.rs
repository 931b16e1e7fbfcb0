//! Metric kinds, payloads, and the wire envelope sent to the monitoring endpoint.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Metric kinds a voice session produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    /// Language-model completion.
    Llm,
    /// Speech recognition.
    Stt,
    /// Speech synthesis.
    Tts,
    /// End-of-utterance detection.
    Eou,
}

impl MetricKind {
    /// Returns the `metric_type` label used on the wire.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Llm => "llm",
            Self::Stt => "stt",
            Self::Tts => "tts",
            Self::Eou => "eou",
        }
    }
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MetricKind {
    type Err = ParseMetricKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "llm" => Ok(Self::Llm),
            "stt" => Ok(Self::Stt),
            "tts" => Ok(Self::Tts),
            "eou" => Ok(Self::Eou),
            _ => Err(ParseMetricKindError(s.to_string())),
        }
    }
}

/// Error returned when parsing an unknown metric kind string.
#[derive(Debug, Clone)]
pub struct ParseMetricKindError(pub String);

impl std::fmt::Display for ParseMetricKindError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown metric kind: {}", self.0)
    }
}

impl std::error::Error for ParseMetricKindError {}

/// Processing time divided by audio time.
///
/// Returns `0.0` whenever the ratio is undefined (no audio, negative or
/// non-finite inputs), so the result is always a finite number.
pub fn real_time_factor(duration: f64, audio_duration: f64) -> f64 {
    if !audio_duration.is_finite() || audio_duration <= 0.0 || !duration.is_finite() {
        return 0.0;
    }
    let rtf = duration / audio_duration;
    if rtf.is_finite() {
        rtf
    } else {
        0.0
    }
}

/// Token accounting for one language-model completion.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LlmMetrics {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub tokens_per_second: f64,
    /// Time to first token, in seconds.
    pub ttft: f64,
}

/// Timing of one recognition call. All durations are in seconds.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SttMetrics {
    pub provider: String,
    pub request_id: String,
    /// Wall-clock time spent in the call.
    pub duration: f64,
    /// Playback length of the submitted audio.
    pub audio_duration: f64,
    pub streamed: bool,
}

impl SttMetrics {
    pub fn real_time_factor(&self) -> f64 {
        real_time_factor(self.duration, self.audio_duration)
    }
}

/// Timing of one synthesis call. All durations are in seconds.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TtsMetrics {
    pub provider: String,
    pub request_id: String,
    /// Time until the first body byte arrived.
    pub ttfb: f64,
    /// Wall-clock time spent in the call.
    pub duration: f64,
    /// Playback length of the returned audio, `0.0` when it could not be decoded.
    pub audio_duration: f64,
    pub characters_count: usize,
    pub streamed: bool,
}

impl TtsMetrics {
    pub fn real_time_factor(&self) -> f64 {
        real_time_factor(self.duration, self.audio_duration)
    }
}

/// End-of-utterance delays, in seconds.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EouMetrics {
    pub end_of_utterance_delay: f64,
    pub transcription_delay: f64,
}

/// Kind-specific metric payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Metrics {
    Llm(LlmMetrics),
    Stt(SttMetrics),
    Tts(TtsMetrics),
    Eou(EouMetrics),
}

impl Metrics {
    pub fn kind(&self) -> MetricKind {
        match self {
            Self::Llm(_) => MetricKind::Llm,
            Self::Stt(_) => MetricKind::Stt,
            Self::Tts(_) => MetricKind::Tts,
            Self::Eou(_) => MetricKind::Eou,
        }
    }

    /// Builds the `data` object of the wire record.
    ///
    /// Recognition and synthesis payloads carry the derived
    /// `real_time_factor` next to the raw timings.
    pub fn data(&self) -> Value {
        match self {
            Self::Llm(m) => json!({
                "prompt_tokens": m.prompt_tokens,
                "completion_tokens": m.completion_tokens,
                "tokens_per_second": m.tokens_per_second,
                "ttft": m.ttft,
            }),
            Self::Stt(m) => json!({
                "provider": m.provider,
                "request_id": m.request_id,
                "duration": m.duration,
                "audio_duration": m.audio_duration,
                "streamed": m.streamed,
                "real_time_factor": m.real_time_factor(),
            }),
            Self::Tts(m) => json!({
                "provider": m.provider,
                "request_id": m.request_id,
                "ttfb": m.ttfb,
                "duration": m.duration,
                "audio_duration": m.audio_duration,
                "characters_count": m.characters_count,
                "streamed": m.streamed,
                "real_time_factor": m.real_time_factor(),
            }),
            Self::Eou(m) => json!({
                "end_of_utterance_delay": m.end_of_utterance_delay,
                "transcription_delay": m.transcription_delay,
            }),
        }
    }
}

/// A metric stamped with the time its unit of work completed.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricEvent {
    pub timestamp: DateTime<Utc>,
    pub metrics: Metrics,
}

impl MetricEvent {
    /// Stamps `metrics` with the current time.
    pub fn new(metrics: Metrics) -> Self {
        Self {
            timestamp: Utc::now(),
            metrics,
        }
    }

    pub fn kind(&self) -> MetricKind {
        self.metrics.kind()
    }

    /// Wraps the event for transmission on behalf of `session_id`.
    pub fn envelope(&self, session_id: &str) -> MetricEnvelope {
        MetricEnvelope {
            timestamp: format_timestamp(self.timestamp),
            metric_type: self.kind(),
            session_id: session_id.to_string(),
            data: self.metrics.data(),
        }
    }
}

impl From<Metrics> for MetricEvent {
    fn from(metrics: Metrics) -> Self {
        Self::new(metrics)
    }
}

/// One self-describing record on the monitoring connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricEnvelope {
    /// RFC 3339 completion time of the unit of work.
    pub timestamp: String,
    pub metric_type: MetricKind,
    pub session_id: String,
    pub data: Value,
}

pub(crate) fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

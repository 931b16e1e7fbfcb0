//! Shared types for the voxlink media adapter layer.
//!
//! This crate provides the data model exchanged between the synthesis and
//! recognition adapters and their callers: canonical audio buffers, the
//! response formats a synthesis backend may be asked for, and recognition
//! transcripts.
//!
//! No crate in the workspace depends on anything *except* `voxlink-types` for
//! cross-cutting type definitions, which keeps the adapters and the
//! telemetry pipeline independent of each other.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// MIME type of a RIFF/WAVE container.
pub const MIME_WAV: &str = "audio/wav";

/// Audio encodings a synthesis backend can be asked to return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseFormat {
    /// RIFF/WAVE container.
    #[default]
    Wav,
    /// MPEG layer III.
    Mp3,
    /// Opus in an Ogg container.
    Opus,
    /// Advanced Audio Coding.
    Aac,
    /// Free Lossless Audio Codec.
    Flac,
    /// Headerless PCM samples.
    Pcm,
}

impl ResponseFormat {
    /// Returns the wire label used in request bodies.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Wav => "wav",
            Self::Mp3 => "mp3",
            Self::Opus => "opus",
            Self::Aac => "aac",
            Self::Flac => "flac",
            Self::Pcm => "pcm",
        }
    }

    /// Returns the MIME type audio of this format is tagged with.
    pub fn mime_type(self) -> String {
        format!("audio/{}", self.as_str())
    }
}

impl std::fmt::Display for ResponseFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ResponseFormat {
    type Err = ParseResponseFormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "wav" => Ok(Self::Wav),
            "mp3" => Ok(Self::Mp3),
            "opus" => Ok(Self::Opus),
            "aac" => Ok(Self::Aac),
            "flac" => Ok(Self::Flac),
            "pcm" => Ok(Self::Pcm),
            _ => Err(ParseResponseFormatError(s.to_string())),
        }
    }
}

/// Error returned when parsing an unknown response format string.
#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown response format: {0}")]
pub struct ParseResponseFormatError(pub String);

/// Describes a stream of audio without carrying its samples.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioInfo {
    /// Samples per second per channel.
    pub sample_rate: u32,
    /// Interleaved channel count.
    pub channels: u16,
    /// Container/codec tag, e.g. `audio/wav`.
    pub mime_type: String,
    /// Backend request identifier; empty when the backend did not supply one.
    pub request_id: String,
}

impl AudioInfo {
    pub fn new(sample_rate: u32, channels: u16, mime_type: impl Into<String>) -> Self {
        Self {
            sample_rate,
            channels,
            mime_type: mime_type.into(),
            request_id: String::new(),
        }
    }

    /// Sets the backend request identifier.
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }
}

/// A fully buffered piece of synthesized audio.
///
/// The payload is a [`Bytes`] handle, so once an `AudioBuffer` is handed to a
/// caller it cannot be mutated and clones share the same allocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioBuffer {
    pub data: Bytes,
    pub info: AudioInfo,
}

impl AudioBuffer {
    pub fn new(data: impl Into<Bytes>, info: AudioInfo) -> Self {
        Self {
            data: data.into(),
            info,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn sample_rate(&self) -> u32 {
        self.info.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.info.channels
    }

    pub fn mime_type(&self) -> &str {
        &self.info.mime_type
    }
}

/// Final transcript of a single-shot recognition call.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Transcript {
    /// Recognized text. Empty when the backend returned no hypothesis.
    pub text: String,
    /// Language the recognition was requested in.
    pub language: String,
    /// Backend request identifier; empty when not supplied.
    #[serde(default)]
    pub request_id: String,
}

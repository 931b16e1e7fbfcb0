//! RIFF/WAVE inspection and float-to-PCM16 normalization.
//!
//! Some synthesis servers answer with 32-bit IEEE float WAVE files, while
//! downstream audio transports only accept 16-bit PCM. [`normalize`] rewrites
//! float containers into canonical PCM16 containers and leaves every other
//! input untouched. It never fails: anything it cannot parse comes back as-is.

use tracing::debug;

/// WAVE format code for integer PCM.
const FORMAT_PCM: u16 = 1;

/// WAVE format code for IEEE float samples.
const FORMAT_IEEE_FLOAT: u16 = 3;

/// Size of the canonical RIFF + `fmt ` + `data` header.
pub const CANONICAL_HEADER_LEN: usize = 44;

/// Result of [`normalize`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedWav {
    pub data: Vec<u8>,
    pub sample_rate: u32,
    pub channels: u16,
    /// Whether the samples were rewritten from float to PCM16.
    pub transcoded: bool,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
enum WavError {
    #[error("not a RIFF/WAVE container")]
    NotWave,
    #[error("truncated `{0}` chunk")]
    Truncated(&'static str),
    #[error("missing `{0}` chunk")]
    Missing(&'static str),
    #[error("data length {0} is not a whole number of float samples")]
    Misaligned(usize),
    #[error("{0} cannot be expressed in a PCM16 header")]
    Unrepresentable(&'static str),
}

/// Fields of a `fmt ` chunk that matter here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Format {
    audio_format: u16,
    channels: u16,
    sample_rate: u32,
    bits_per_sample: u16,
}

/// Derived fields of a canonical PCM16 header, all known to fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Pcm16Header {
    sample_rate: u32,
    channels: u16,
    block_align: u16,
    byte_rate: u32,
    data_size: u32,
}

impl Pcm16Header {
    fn new(sample_rate: u32, channels: u16, sample_count: usize) -> Result<Self, WavError> {
        if channels == 0 {
            return Err(WavError::Unrepresentable("zero channels"));
        }
        let block_align = channels
            .checked_mul(2)
            .ok_or(WavError::Unrepresentable("block align"))?;
        let byte_rate = sample_rate
            .checked_mul(u32::from(block_align))
            .ok_or(WavError::Unrepresentable("byte rate"))?;
        let data_size = sample_count
            .checked_mul(2)
            .and_then(|len| u32::try_from(len).ok())
            .filter(|len| *len <= u32::MAX - 36)
            .ok_or(WavError::Unrepresentable("data length"))?;
        Ok(Self {
            sample_rate,
            channels,
            block_align,
            byte_rate,
            data_size,
        })
    }
}

/// Where things are inside a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Layout {
    format: Option<Format>,
    /// Offset and declared length of the `data` body.
    data: Option<(usize, usize)>,
}

/// Converts 32-bit float WAVE bytes into a canonical PCM16 WAVE container.
///
/// Returns the input unchanged, with `default_rate` and `default_channels`
/// unless a `fmt ` chunk says otherwise, when the input is not float32
/// or cannot be parsed. Samples are clamped to `[-1.0, 1.0]` and scaled with
/// `round(x * 32767)`, rounding half away from zero; NaN becomes silence.
pub fn normalize(bytes: &[u8], default_rate: u32, default_channels: u16) -> NormalizedWav {
    let passthrough = |sample_rate, channels| NormalizedWav {
        data: bytes.to_vec(),
        sample_rate,
        channels,
        transcoded: false,
    };

    let layout = match scan(bytes) {
        Ok(layout) => layout,
        Err(e) => {
            debug!(error = %e, len = bytes.len(), "passing audio through unchanged");
            return passthrough(default_rate, default_channels);
        }
    };

    let (sample_rate, channels) = layout
        .format
        .map(|f| (f.sample_rate, f.channels))
        .unwrap_or((default_rate, default_channels));

    match float_samples(bytes, &layout) {
        Ok(Some((header, samples))) => {
            let pcm: Vec<i16> = samples.map(float_to_pcm16).collect();
            NormalizedWav {
                data: write_pcm16(&pcm, header),
                sample_rate,
                channels,
                transcoded: true,
            }
        }
        Ok(None) => passthrough(sample_rate, channels),
        Err(e) => {
            debug!(error = %e, len = bytes.len(), "passing audio through unchanged");
            passthrough(default_rate, default_channels)
        }
    }
}

/// Converts one float sample to a signed 16-bit sample.
pub fn float_to_pcm16(sample: f32) -> i16 {
    if sample.is_nan() {
        return 0;
    }
    (sample.clamp(-1.0, 1.0) * 32767.0).round() as i16
}

/// Builds a canonical 44-byte-header PCM16 WAVE container around `samples`.
///
/// Returns `None` when the header fields would not fit: zero channels, a byte
/// rate beyond `u32`, or more data than a RIFF size field can describe.
pub fn encode_pcm16(samples: &[i16], sample_rate: u32, channels: u16) -> Option<Vec<u8>> {
    let header = Pcm16Header::new(sample_rate, channels, samples.len()).ok()?;
    Some(write_pcm16(samples, header))
}

fn write_pcm16(samples: &[i16], header: Pcm16Header) -> Vec<u8> {
    let mut out = Vec::with_capacity(CANONICAL_HEADER_LEN + samples.len() * 2);
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + header.data_size).to_le_bytes());
    out.extend_from_slice(b"WAVE");

    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&FORMAT_PCM.to_le_bytes());
    out.extend_from_slice(&header.channels.to_le_bytes());
    out.extend_from_slice(&header.sample_rate.to_le_bytes());
    out.extend_from_slice(&header.byte_rate.to_le_bytes());
    out.extend_from_slice(&header.block_align.to_le_bytes());
    out.extend_from_slice(&16u16.to_le_bytes());

    out.extend_from_slice(b"data");
    out.extend_from_slice(&header.data_size.to_le_bytes());
    for sample in samples {
        out.extend_from_slice(&sample.to_le_bytes());
    }
    out
}

/// Playback length in seconds of a complete PCM16 WAVE buffer.
pub fn pcm16_duration(bytes: &[u8]) -> Option<f64> {
    let layout = scan(bytes).ok()?;
    let (offset, len) = layout.data?;
    let available = bytes.len().saturating_sub(offset);
    if len > available {
        return None;
    }
    pcm16_seconds(layout.format?, len)
}

/// Playback length in seconds of a PCM16 WAVE stream of `total_len` bytes,
/// given only its first bytes.
///
/// Used when the body was forwarded chunk by chunk and never held whole.
pub fn pcm16_duration_from_prefix(prefix: &[u8], total_len: usize) -> Option<f64> {
    let layout = scan(prefix).ok()?;
    let (offset, len) = layout.data?;
    let streamed = total_len.saturating_sub(offset);
    pcm16_seconds(layout.format?, len.min(streamed))
}

fn pcm16_seconds(format: Format, data_len: usize) -> Option<f64> {
    if format.audio_format != FORMAT_PCM || format.bits_per_sample != 16 {
        return None;
    }
    let bytes_per_second = u64::from(format.sample_rate) * u64::from(format.channels) * 2;
    if bytes_per_second == 0 {
        return None;
    }
    Some(data_len as f64 / bytes_per_second as f64)
}

/// Returns the float samples, with the header they will be written under,
/// when the container is float32 and intact. `None` when it holds some other
/// encoding.
fn float_samples<'a>(
    bytes: &'a [u8],
    layout: &Layout,
) -> Result<Option<(Pcm16Header, impl Iterator<Item = f32> + 'a)>, WavError> {
    let format = layout.format.ok_or(WavError::Missing("fmt "))?;
    let (offset, len) = layout.data.ok_or(WavError::Missing("data"))?;

    if format.audio_format != FORMAT_IEEE_FLOAT || format.bits_per_sample != 32 {
        return Ok(None);
    }

    let body = offset
        .checked_add(len)
        .and_then(|end| bytes.get(offset..end))
        .ok_or(WavError::Truncated("data"))?;
    if body.len() % 4 != 0 {
        return Err(WavError::Misaligned(body.len()));
    }
    let header = Pcm16Header::new(format.sample_rate, format.channels, body.len() / 4)?;

    let samples = body
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]));
    Ok(Some((header, samples)))
}

/// Walks the chunk list up to and including `data`.
fn scan(bytes: &[u8]) -> Result<Layout, WavError> {
    if bytes.len() < 12 || &bytes[0..4] != b"RIFF" || &bytes[8..12] != b"WAVE" {
        return Err(WavError::NotWave);
    }

    let mut layout = Layout {
        format: None,
        data: None,
    };
    let mut pos = 12usize;

    while pos + 8 <= bytes.len() {
        let id = &bytes[pos..pos + 4];
        let size = read_u32(bytes, pos + 4) as usize;
        pos += 8;

        match id {
            b"fmt " => {
                let body = bytes.get(pos..pos + 16).ok_or(WavError::Truncated("fmt "))?;
                layout.format = Some(Format {
                    audio_format: u16::from_le_bytes([body[0], body[1]]),
                    channels: u16::from_le_bytes([body[2], body[3]]),
                    sample_rate: u32::from_le_bytes([body[4], body[5], body[6], body[7]]),
                    bits_per_sample: u16::from_le_bytes([body[14], body[15]]),
                });
            }
            b"data" => {
                layout.data = Some((pos, size));
                break;
            }
            _ => {}
        }

        // Chunk bodies are padded to an even length.
        pos = match size.checked_add(size & 1).and_then(|padded| pos.checked_add(padded)) {
            Some(next) => next,
            None => break,
        };
    }

    Ok(layout)
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

//! One synthesis and optional recognition round trip with metrics forwarded
//! to the monitoring endpoint.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;
use voxlink_observe::{MetricsHook, MetricsReporter, MetricsSink};
use voxlink_types::AudioBuffer;
use voxlink_voice::{
    create_recognizer, create_synthesizer, RecognitionAdapter, SynthesisAdapter,
    SynthesisRequest, VoiceError,
};

use crate::config::Config;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error(transparent)]
    Voice(#[from] VoiceError),

    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// What a probe run produced.
#[derive(Debug, Clone)]
pub struct ProbeReport {
    pub session_id: String,
    pub output: PathBuf,
    pub audio: AudioBuffer,
    pub transcript: Option<String>,
}

/// Runs the probe under a fresh session id.
///
/// The metrics reporter is shut down, and the adapters closed, whether or not
/// the round trip succeeded.
pub async fn run(config: &Config) -> Result<ProbeReport, ProbeError> {
    let session_id = Uuid::new_v4().to_string();
    let reporter =
        MetricsReporter::spawn(MetricsSink::new(session_id.clone(), config.metrics.url.clone()));
    reporter.start().await;

    let result = round_trip(config, reporter.hook()).await;
    reporter.shutdown().await;

    let (audio, transcript) = result?;
    info!(
        session_id = %session_id,
        bytes = audio.len(),
        output = %config.probe.output.display(),
        "probe finished"
    );
    Ok(ProbeReport {
        session_id,
        output: config.probe.output.clone(),
        audio,
        transcript,
    })
}

async fn round_trip(
    config: &Config,
    hook: MetricsHook,
) -> Result<(AudioBuffer, Option<String>), ProbeError> {
    let tts = create_synthesizer(&config.synthesis, Some(hook.clone()))?;
    tts.prewarm();
    let synthesized = synthesize_to_file(tts.as_ref(), &config.probe.text, &config.probe.output).await;
    tts.close().await;
    let audio = synthesized?;

    let transcript = match (&config.recognition, &config.probe.recognize_input) {
        (Some(recognition), Some(input)) => {
            let asr = create_recognizer(recognition.clone(), Some(hook))?;
            let pcm = tokio::fs::read(input).await.map_err(|source| ProbeError::Io {
                path: input.clone(),
                source,
            })?;
            let recognized = asr.recognize(recognition.request(pcm)).await;
            asr.close().await;
            let transcript = recognized?;
            info!(
                text = %transcript.text,
                language = %transcript.language,
                request_id = %transcript.request_id,
                "transcript received"
            );
            Some(transcript.text)
        }
        (Some(_), None) => {
            warn!("recognition configured without probe.recognize_input, skipping");
            None
        }
        _ => None,
    };

    Ok((audio, transcript))
}

async fn synthesize_to_file(
    tts: &dyn SynthesisAdapter,
    text: &str,
    output: &Path,
) -> Result<AudioBuffer, ProbeError> {
    let audio = tts.synthesize(SynthesisRequest::new(text)).await?;
    info!(
        provider = tts.provider(),
        bytes = audio.len(),
        sample_rate = audio.sample_rate(),
        mime = audio.mime_type(),
        request_id = %audio.info.request_id,
        "synthesized audio"
    );
    tokio::fs::write(output, &audio.data)
        .await
        .map_err(|source| ProbeError::Io {
            path: output.to_path_buf(),
            source,
        })?;
    Ok(audio)
}

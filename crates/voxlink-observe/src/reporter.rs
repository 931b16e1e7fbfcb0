//! Fan-in from metric producers to a session's [`MetricsSink`].
//!
//! Producers receive a [`MetricsHook`] at construction and call it
//! synchronously when a unit of work completes. The hook only enqueues; a
//! single forwarder task owned by the [`MetricsReporter`] drains the queue
//! into the sink, so a slow or unreachable monitoring endpoint never stalls
//! a synthesis or recognition call.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::event::{MetricEvent, Metrics};
use crate::sink::MetricsSink;

/// Callback handed to metric producers.
pub type MetricsHook = Arc<dyn Fn(MetricEvent) + Send + Sync>;

/// Owns the forwarder task for one voice session.
#[derive(Debug)]
pub struct MetricsReporter {
    sink: Arc<MetricsSink>,
    tx: mpsc::UnboundedSender<MetricEvent>,
    shutdown_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl MetricsReporter {
    /// Spawns the forwarder task. Must be called inside a Tokio runtime.
    pub fn spawn(sink: MetricsSink) -> Self {
        let sink = Arc::new(sink);
        let (tx, rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(forward(Arc::clone(&sink), rx, shutdown_rx));
        Self {
            sink,
            tx,
            shutdown_tx,
            task,
        }
    }

    /// Connects the sink eagerly so the first metric does not pay for the handshake.
    ///
    /// A failure is logged; the sink retries on the next send.
    pub async fn start(&self) {
        if let Err(e) = self.sink.connect().await {
            warn!(url = %self.sink.url(), error = %e, "failed to connect to monitoring endpoint");
        }
        info!(session_id = %self.sink.session_id(), "metrics reporting started");
    }

    /// Returns a hook that enqueues events for this session.
    pub fn hook(&self) -> MetricsHook {
        let tx = self.tx.clone();
        Arc::new(move |event: MetricEvent| {
            if tx.send(event).is_err() {
                debug!("metrics reporter stopped, dropping event");
            }
        })
    }

    pub fn sink(&self) -> &Arc<MetricsSink> {
        &self.sink
    }

    /// Flushes events already enqueued, disconnects the sink, and joins the task.
    ///
    /// Hooks still held by producers keep working but their events are dropped.
    pub async fn shutdown(self) {
        let session_id = self.sink.session_id().to_string();
        let _ = self.shutdown_tx.send(());
        drop(self.tx);
        if let Err(e) = self.task.await {
            warn!(error = %e, "metrics forwarder task failed");
        }
        info!(session_id = %session_id, "metrics reporting stopped");
    }
}

async fn forward(
    sink: Arc<MetricsSink>,
    mut rx: mpsc::UnboundedReceiver<MetricEvent>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            biased;
            event = rx.recv() => match event {
                Some(event) => {
                    log_summary(sink.session_id(), &event);
                    sink.send(&event).await;
                }
                None => break,
            },
            _ = &mut shutdown_rx => {
                rx.close();
                while let Some(event) = rx.recv().await {
                    log_summary(sink.session_id(), &event);
                    sink.send(&event).await;
                }
                break;
            }
        }
    }
    sink.disconnect().await;
}

fn log_summary(session_id: &str, event: &MetricEvent) {
    let session: String = session_id.chars().take(8).collect();
    match &event.metrics {
        Metrics::Llm(m) => info!(
            session = %session,
            prompt_tokens = m.prompt_tokens,
            completion_tokens = m.completion_tokens,
            tokens_per_second = m.tokens_per_second,
            ttft = m.ttft,
            "llm metrics"
        ),
        Metrics::Stt(m) => info!(
            session = %session,
            provider = %m.provider,
            duration = m.duration,
            audio_duration = m.audio_duration,
            real_time_factor = m.real_time_factor(),
            streamed = m.streamed,
            "stt metrics"
        ),
        Metrics::Tts(m) => info!(
            session = %session,
            provider = %m.provider,
            ttfb = m.ttfb,
            duration = m.duration,
            audio_duration = m.audio_duration,
            real_time_factor = m.real_time_factor(),
            streamed = m.streamed,
            "tts metrics"
        ),
        Metrics::Eou(m) => info!(
            session = %session,
            end_of_utterance_delay = m.end_of_utterance_delay,
            transcription_delay = m.transcription_delay,
            "eou metrics"
        ),
    }
}

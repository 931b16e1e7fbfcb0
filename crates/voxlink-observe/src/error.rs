//! Error types for the telemetry pipeline.

use std::time::Duration;

/// Errors that can occur while talking to the monitoring endpoint.
///
/// These never reach a metric producer: [`MetricsSink::send`](crate::MetricsSink::send)
/// logs and drops them. They are returned from the explicit
/// [`MetricsSink::connect`](crate::MetricsSink::connect) only.
#[derive(Debug, thiserror::Error)]
pub enum ObserveError {
    /// The WebSocket handshake or a frame write failed.
    #[error("monitoring socket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// The connection attempt did not complete within the configured bound.
    #[error("monitoring endpoint did not answer within {0:?}")]
    ConnectTimeout(Duration),

    /// JSON serialization of a metric envelope failed.
    #[error("metric serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

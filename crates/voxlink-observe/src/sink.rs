//! Best-effort delivery of metric envelopes to a monitoring endpoint.
//!
//! The sink keeps at most one WebSocket open. It is created lazily on the
//! first send (or by an explicit [`MetricsSink::connect`]), dropped on any
//! write failure or when the endpoint closes it, and re-opened by the next
//! send. A send that cannot reach the endpoint drops its event: telemetry is
//! never queued and never allowed to fail the caller.

use std::time::Duration;

use chrono::Utc;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::error::ObserveError;
use crate::event::{format_timestamp, MetricEnvelope, MetricEvent, MetricKind};

/// Default monitoring endpoint.
pub const DEFAULT_MONITOR_URL: &str = "ws://localhost:8001/ws";

/// Upper bound for the WebSocket handshake.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Upper bound for writing a single frame.
const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(5);

type MonitorSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// An open socket: the write half plus the task reading the other half.
struct Connection {
    writer: SplitSink<MonitorSocket, Message>,
    reader: JoinHandle<()>,
}

impl Connection {
    fn new(socket: MonitorSocket, url: &str) -> Self {
        let (writer, incoming) = socket.split();
        let reader = tokio::spawn(watch_incoming(incoming, url.to_string()));
        Self { writer, reader }
    }

    /// False once the endpoint closed the socket or reading from it failed.
    fn is_open(&self) -> bool {
        !self.reader.is_finished()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// Drains frames the endpoint sends. Reading is what lets tungstenite answer
/// pings; the task ends when the socket is closed from the other side.
async fn watch_incoming(mut incoming: SplitStream<MonitorSocket>, url: String) {
    while let Some(frame) = incoming.next().await {
        match frame {
            Ok(Message::Close(frame)) => {
                info!(url = %url, ?frame, "monitoring endpoint closed the connection");
                return;
            }
            Ok(Message::Ping(data)) => {
                debug!(bytes = data.len(), "monitoring endpoint ping");
            }
            Ok(_) => {}
            Err(e) => {
                warn!(url = %url, error = %e, "monitoring socket read failed");
                return;
            }
        }
    }
    debug!(url = %url, "monitoring socket stream ended");
}

/// Per-session connection to the monitoring endpoint.
pub struct MetricsSink {
    session_id: String,
    url: String,
    connect_timeout: Duration,
    send_timeout: Duration,
    socket: Mutex<Option<Connection>>,
}

impl std::fmt::Debug for MetricsSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsSink")
            .field("session_id", &self.session_id)
            .field("url", &self.url)
            .field("connect_timeout", &self.connect_timeout)
            .field("send_timeout", &self.send_timeout)
            .finish_non_exhaustive()
    }
}

impl MetricsSink {
    /// Creates a disconnected sink that tags every record with `session_id`.
    pub fn new(session_id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            url: url.into(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            send_timeout: DEFAULT_SEND_TIMEOUT,
            socket: Mutex::new(None),
        }
    }

    /// Overrides the handshake and frame-write bounds.
    pub fn with_timeouts(mut self, connect_timeout: Duration, send_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self.send_timeout = send_timeout;
        self
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn is_connected(&self) -> bool {
        self.socket.lock().await.as_ref().is_some_and(Connection::is_open)
    }

    /// Opens the connection ahead of the first send.
    ///
    /// Does nothing when a connection is already open.
    pub async fn connect(&self) -> Result<(), ObserveError> {
        let mut socket = self.socket.lock().await;
        if socket.as_ref().is_some_and(Connection::is_open) {
            return Ok(());
        }
        *socket = Some(self.open().await?);
        info!(url = %self.url, session_id = %self.session_id, "connected to monitoring endpoint");
        Ok(())
    }

    /// Closes the connection. Safe to call when already disconnected.
    pub async fn disconnect(&self) {
        let Some(mut connection) = self.socket.lock().await.take() else {
            return;
        };
        if let Err(e) = connection.writer.close().await {
            debug!(error = %e, "monitoring socket close failed");
        }
        info!(url = %self.url, session_id = %self.session_id, "disconnected from monitoring endpoint");
    }

    /// Sends one event. Never fails; undeliverable events are logged and dropped.
    pub async fn send(&self, event: &MetricEvent) {
        let envelope = event.envelope(&self.session_id);
        self.deliver(&envelope).await;
    }

    /// Sends an ad-hoc payload stamped with the current time.
    pub async fn send_metric(&self, kind: MetricKind, data: Value) {
        let envelope = MetricEnvelope {
            timestamp: format_timestamp(Utc::now()),
            metric_type: kind,
            session_id: self.session_id.clone(),
            data,
        };
        self.deliver(&envelope).await;
    }

    async fn deliver(&self, envelope: &MetricEnvelope) {
        let text = match serde_json::to_string(envelope) {
            Ok(text) => text,
            Err(e) => {
                error!(error = %e, metric_type = %envelope.metric_type, "failed to encode metric");
                return;
            }
        };

        let mut guard = self.socket.lock().await;
        if guard.as_ref().is_some_and(|connection| !connection.is_open()) {
            warn!(
                url = %self.url,
                metric_type = %envelope.metric_type,
                "monitoring connection lost, reconnecting"
            );
            *guard = None;
        }
        if guard.is_none() {
            match self.open().await {
                Ok(socket) => {
                    info!(url = %self.url, session_id = %self.session_id, "connected to monitoring endpoint");
                    *guard = Some(socket);
                }
                Err(e) => {
                    warn!(
                        url = %self.url,
                        metric_type = %envelope.metric_type,
                        error = %e,
                        "monitoring endpoint unreachable, dropping metric"
                    );
                    return;
                }
            }
        }
        let Some(connection) = guard.as_mut() else {
            return;
        };

        let frame = Message::Text(text.into());
        match tokio::time::timeout(self.send_timeout, connection.writer.send(frame)).await {
            Ok(Ok(())) => {
                debug!(metric_type = %envelope.metric_type, "metric sent");
            }
            Ok(Err(e)) => {
                error!(error = %e, metric_type = %envelope.metric_type, "failed to send metric");
                *guard = None;
            }
            Err(_) => {
                error!(
                    timeout_ms = self.send_timeout.as_millis() as u64,
                    metric_type = %envelope.metric_type,
                    "timed out sending metric"
                );
                *guard = None;
            }
        }
    }

    async fn open(&self) -> Result<Connection, ObserveError> {
        let (socket, _response) =
            tokio::time::timeout(self.connect_timeout, connect_async(self.url.as_str()))
                .await
                .map_err(|_| ObserveError::ConnectTimeout(self.connect_timeout))??;
        Ok(Connection::new(socket, &self.url))
    }
}

//! Pooled HTTP client shared by every call on one adapter instance.
//!
//! Each adapter owns exactly one [`HttpTransport`]. All concurrent calls on
//! that adapter go through its `reqwest::Client`, whose connection pool keeps
//! idle connections warm between calls. A semaphore caps how many requests
//! may be in flight at once; a caller that cannot obtain a slot within the
//! pool timeout fails with [`VoiceError::Timeout`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use reqwest::header::HeaderMap;
use reqwest::{Client, Method, RequestBuilder, Response};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::TransportConfig;
use crate::error::VoiceError;

/// Maximum number of redirects followed for a single request.
const MAX_REDIRECTS: usize = 10;

/// Longest error body kept in a [`VoiceError::Status`].
const MAX_ERROR_BODY_BYTES: usize = 4 * 1024;

/// A successful response together with the pool slot it occupies.
///
/// Keep the permit alive until the body has been read.
pub struct PooledResponse {
    response: Response,
    permit: OwnedSemaphorePermit,
}

impl PooledResponse {
    pub fn into_parts(self) -> (Response, OwnedSemaphorePermit) {
        (self.response, self.permit)
    }
}

pub struct HttpTransport {
    client: Mutex<Option<Client>>,
    permits: Arc<Semaphore>,
    pool_timeout: Duration,
    closed: AtomicBool,
    prewarm: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("available_permits", &self.permits.available_permits())
            .field("pool_timeout", &self.pool_timeout)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl HttpTransport {
    pub fn new(config: &TransportConfig) -> Result<Self, VoiceError> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout())
            .read_timeout(config.read_timeout())
            .timeout(config.request_timeout())
            .pool_max_idle_per_host(config.max_idle_per_host)
            .pool_idle_timeout(config.idle_timeout())
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .build()
            .map_err(|e| VoiceError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client: Mutex::new(Some(client)),
            permits: Arc::new(Semaphore::new(config.max_connections.max(1))),
            pool_timeout: config.pool_timeout(),
            closed: AtomicBool::new(false),
            prewarm: Mutex::new(None),
        })
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Starts building a request on the pooled client.
    pub fn request(&self, method: Method, url: url::Url) -> Result<RequestBuilder, VoiceError> {
        let client = self
            .client
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(closed_error)?;
        Ok(client.request(method, url))
    }

    /// Sends `request` once a pool slot is free.
    ///
    /// Non-success statuses are turned into [`VoiceError::Status`] carrying the
    /// response body.
    pub async fn send(&self, request: RequestBuilder) -> Result<PooledResponse, VoiceError> {
        let permit = tokio::time::timeout(
            self.pool_timeout,
            Arc::clone(&self.permits).acquire_owned(),
        )
        .await
        .map_err(|_| {
            VoiceError::Timeout(format!(
                "no connection slot available after {} ms",
                self.pool_timeout.as_millis()
            ))
        })?
        .map_err(|_| closed_error())?;

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.bytes().await.unwrap_or_default();
            let body = &body[..body.len().min(MAX_ERROR_BODY_BYTES)];
            return Err(VoiceError::Status {
                code: status.as_u16(),
                body: String::from_utf8_lossy(body).into_owned(),
            });
        }

        Ok(PooledResponse { response, permit })
    }

    /// Fires `request` in the background to open a pooled connection early.
    ///
    /// The outcome is ignored. A previous prewarm still in flight is aborted.
    pub fn prewarm(&self, request: RequestBuilder) {
        if self.is_closed() {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            debug!("no async runtime, skipping prewarm");
            return;
        };

        let handle = runtime.spawn(async move {
            match request.send().await {
                Ok(response) => debug!(status = response.status().as_u16(), "prewarm completed"),
                Err(e) => debug!(error = %e, "prewarm failed"),
            }
        });

        let previous = self
            .prewarm
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    /// Cancels any outstanding prewarm, waits for it to stop, and releases the pool.
    ///
    /// Only the first call does anything.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let prewarm = self
            .prewarm
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = prewarm {
            handle.abort();
            let _ = handle.await;
        }

        self.permits.close();
        drop(
            self.client
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take(),
        );
        info!("HTTP transport closed");
    }
}

/// Reads a header as a string, returning an empty string when absent.
pub fn header_value(headers: &HeaderMap, name: &str) -> String {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

fn closed_error() -> VoiceError {
    VoiceError::Connection("transport is closed".to_string())
}

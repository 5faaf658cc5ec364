//! HTTP Tick Sink
//!
//! Forwards each tick as JSON to `POST {receiver}/ticks`. One attempt per
//! tick, bounded by the client timeout.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use crate::application::ports::{SinkError, TickSink};
use crate::domain::tick::Tick;

/// Default per-request timeout.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(2);

/// [`TickSink`] posting to the stream receiver.
#[derive(Debug, Clone)]
pub struct HttpTickSink {
    client: Client,
    endpoint: String,
}

impl HttpTickSink {
    /// Create a sink for the receiver at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns `SinkError::Network` if the HTTP client cannot be built.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, SinkError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SinkError::Network(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: format!("{}/ticks", base_url.trim_end_matches('/')),
        })
    }

    /// Full endpoint URL.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl TickSink for HttpTickSink {
    async fn send(&self, tick: &Tick) -> Result<(), SinkError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(tick)
            .send()
            .await
            .map_err(|e| SinkError::Network(e.to_string()))?;

        if response.status().is_success() {
            return Ok(());
        }
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Err(SinkError::Rejected { status, body })
    }
}

//! HTTP remote backend.
//!
//! Async reqwest client speaking the envelope protocol:
//! `POST {base}/settings`, `GET {base}/settings`, `GET {base}/health`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use tracing::debug;

use crate::error::{Result, SyncError};
use crate::models::{ResponseEnvelope, SaveRequest};
use crate::remote::RemoteBackend;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const PING_TIMEOUT: Duration = Duration::from_secs(3);

// == Http Remote ==
#[derive(Debug, Clone)]
pub struct HttpRemote {
    http: Client,
    base_url: String,
    token: Option<String>,
}

impl HttpRemote {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Result<Self> {
        let http = Client::builder()
            .user_agent(format!("settings_sync/{}", env!("CARGO_PKG_VERSION")))
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| SyncError::Network(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Turns any response into an envelope; non-2xx is a network error.
    async fn envelope(response: Response) -> Result<ResponseEnvelope> {
        let status = response.status();
        if !status.is_success() {
            let detail = response
                .json::<ResponseEnvelope>()
                .await
                .ok()
                .and_then(|env| env.message)
                .unwrap_or_else(|| status.canonical_reason().unwrap_or("error").to_string());
            return Err(SyncError::Network(format!("HTTP {}: {}", status.as_u16(), detail)));
        }
        response
            .json::<ResponseEnvelope>()
            .await
            .map_err(|e| SyncError::Network(format!("invalid response body: {}", e)))
    }
}

#[async_trait]
impl RemoteBackend for HttpRemote {
    async fn save(&self, request: &SaveRequest) -> Result<ResponseEnvelope> {
        let response = self
            .authorize(self.http.post(self.url("/settings")).json(request))
            .send()
            .await
            .map_err(|e| SyncError::Network(e.to_string()))?;
        Self::envelope(response).await
    }

    async fn load(&self) -> Result<ResponseEnvelope> {
        let response = self
            .authorize(self.http.get(self.url("/settings")))
            .send()
            .await
            .map_err(|e| SyncError::Network(e.to_string()))?;
        Self::envelope(response).await
    }

    async fn ping(&self) -> bool {
        match self
            .http
            .get(self.url("/health"))
            .timeout(PING_TIMEOUT)
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!("Reachability probe failed: {}", e);
                false
            }
        }
    }
}

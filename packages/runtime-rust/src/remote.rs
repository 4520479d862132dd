//! Remote routing for paths with no local endpoint.

use std::time::Duration;

use anyhow::Context as _;
use async_trait::async_trait;
use courier_core::{MessageResult, Request};

/// Header carrying the correlation id on outbound calls.
pub const CORRELATION_HEADER: &str = "x-correlation-id";
/// Header carrying the session id on outbound calls.
pub const SESSION_HEADER: &str = "x-session-id";

/// Routes requests the local catalog cannot serve.
///
/// The gateway asks each registered router, in registration order, whether
/// it can route a request and hands it to the first that claims it.
#[async_trait]
pub trait RemoteRouter: Send + Sync {
    fn name(&self) -> &str;

    fn can_route(&self, request: &Request) -> bool;

    /// # Errors
    ///
    /// Transport or decoding failures; the gateway reports them as
    /// `DispatchError::RemoteFailure`.
    async fn route(&self, request: &Request, timeout: Option<Duration>) -> anyhow::Result<MessageResult>;
}

// ---------------------------------------------------------------------------
// HttpRemoteRouter
// ---------------------------------------------------------------------------

/// Forwards requests to another runtime over HTTP.
///
/// Claims every path starting with one of its prefixes and POSTs the JSON
/// body to `{base_url}/{path}`. The peer answers with a serialized
/// [`MessageResult`].
#[derive(Debug, Clone)]
pub struct HttpRemoteRouter {
    name: String,
    base_url: String,
    prefixes: Vec<String>,
    client: reqwest::Client,
}

impl HttpRemoteRouter {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            prefixes: Vec::new(),
            client: reqwest::Client::new(),
        }
    }

    /// Claims paths starting with `prefix`.
    #[must_use]
    pub fn claim(mut self, prefix: impl Into<String>) -> Self {
        self.prefixes.push(prefix.into());
        self
    }

    #[must_use]
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

#[async_trait]
impl RemoteRouter for HttpRemoteRouter {
    fn name(&self) -> &str {
        &self.name
    }

    fn can_route(&self, request: &Request) -> bool {
        request
            .path()
            .is_some_and(|path| self.prefixes.iter().any(|p| path.starts_with(p.as_str())))
    }

    async fn route(&self, request: &Request, timeout: Option<Duration>) -> anyhow::Result<MessageResult> {
        let path = request
            .path()
            .context("remote routing requires a path")?;
        let url = self.url(path);
        let body = request
            .message()
            .body()
            .to_json()
            .context("request body is not representable as JSON")?;

        let mut call = self
            .client
            .post(&url)
            .header(CORRELATION_HEADER, request.correlation_id().to_string())
            .header(SESSION_HEADER, request.session_id())
            .json(&body);
        if let Some(timeout) = timeout {
            call = call.timeout(timeout);
        }

        tracing::debug!(router = %self.name, %url, "forwarding request");
        let response = call
            .send()
            .await
            .with_context(|| format!("POST {url} failed"))?
            .error_for_status()?;
        let result = response
            .json::<MessageResult>()
            .await
            .with_context(|| format!("POST {url} returned an unreadable result"))?;
        Ok(result)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

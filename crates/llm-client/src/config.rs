use std::fmt;
use std::time::Duration;

use crate::decoder::DecodeErrorPolicy;
use crate::errors::ClientError;
use crate::session::SessionOptions;

/// Default platform endpoint.
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com";

/// Configuration for `Client`.
#[derive(Clone)]
pub struct ClientConfig {
    /// API key used for bearer auth.
    pub api_key: String,
    /// Base URL of the API (proxies and local test servers override this).
    pub base_url: String,
    /// Optional organization header.
    pub organization: Option<String>,
    /// Optional project header.
    pub project: Option<String>,
    /// Total timeout for plain (non-streaming) requests.
    ///
    /// Streaming bodies are never timed out by the client; cancel the session
    /// instead.
    pub timeout: Duration,
    /// Connection establishment timeout, applied to every request.
    pub connect_timeout: Duration,
    /// Bounded event buffer between the producer task and the consumer.
    pub stream_buffer_capacity: usize,
    /// Upper bound on bytes read from a non-success response body.
    pub max_error_body_bytes: usize,
    /// Upper bound on a single SSE line.
    pub max_line_bytes: usize,
    /// What a stream session does with events that fail to decode.
    pub decode_error_policy: DecodeErrorPolicy,
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("api_key", &"[REDACTED]")
            .field("base_url", &self.base_url)
            .field("organization", &self.organization)
            .field("project", &self.project)
            .field("timeout", &self.timeout)
            .field("connect_timeout", &self.connect_timeout)
            .field("stream_buffer_capacity", &self.stream_buffer_capacity)
            .field("max_error_body_bytes", &self.max_error_body_bytes)
            .field("max_line_bytes", &self.max_line_bytes)
            .field("decode_error_policy", &self.decode_error_policy)
            .finish()
    }
}

impl ClientConfig {
    /// Creates a config with defaults and the given API key.
    pub fn new(api_key: impl Into<String>) -> Self {
        let session = SessionOptions::default();
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            organization: None,
            project: None,
            timeout: Duration::from_secs(120),
            connect_timeout: Duration::from_secs(30),
            stream_buffer_capacity: session.buffer_capacity,
            max_error_body_bytes: 64 * 1024,
            max_line_bytes: session.max_line_bytes,
            decode_error_policy: session.decode_error_policy,
        }
    }

    /// Builds a config from `OPENAI_API_KEY`, `OPENAI_BASE_URL`,
    /// `OPENAI_ORG_ID` and `OPENAI_PROJECT_ID`.
    pub fn from_env() -> Result<Self, ClientError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ClientError> {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let Some(api_key) = non_empty("OPENAI_API_KEY") else {
            return Err(ClientError::Config("missing OPENAI_API_KEY".into()));
        };
        let mut config = Self::new(api_key);
        if let Some(base_url) = non_empty("OPENAI_BASE_URL") {
            config.base_url = base_url;
        }
        config.organization = non_empty("OPENAI_ORG_ID");
        config.project = non_empty("OPENAI_PROJECT_ID");
        Ok(config)
    }

    /// Overrides the API base URL.
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Sets the organization header.
    pub fn organization(mut self, organization: impl Into<String>) -> Self {
        self.organization = Some(organization.into());
        self
    }

    /// Sets the project header.
    pub fn project(mut self, project: impl Into<String>) -> Self {
        self.project = Some(project.into());
        self
    }

    /// Overrides the plain-request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Overrides the connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the bounded stream buffer size.
    pub fn stream_buffer_capacity(mut self, capacity: usize) -> Self {
        self.stream_buffer_capacity = capacity;
        self
    }

    /// Sets how many bytes of a failed response body are kept.
    pub fn max_error_body_bytes(mut self, limit: usize) -> Self {
        self.max_error_body_bytes = limit;
        self
    }

    /// Sets the SSE line length limit.
    pub fn max_line_bytes(mut self, limit: usize) -> Self {
        self.max_line_bytes = limit;
        self
    }

    /// Sets the decode error policy for stream sessions.
    pub fn decode_error_policy(mut self, policy: DecodeErrorPolicy) -> Self {
        self.decode_error_policy = policy;
        self
    }

    pub(crate) fn validate(&self) -> Result<(), ClientError> {
        if self.api_key.trim().is_empty() {
            return Err(ClientError::Config("api_key must not be empty".into()));
        }
        let base = self.base_url.trim();
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            return Err(ClientError::Config(format!(
                "base_url must be an http(s) URL, got `{}`",
                self.base_url
            )));
        }
        if self.stream_buffer_capacity == 0 {
            return Err(ClientError::Config(
                "stream_buffer_capacity must be greater than 0".into(),
            ));
        }
        if self.max_line_bytes == 0 {
            return Err(ClientError::Config(
                "max_line_bytes must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    pub(crate) fn endpoint(&self, path: &str) -> String {
        format!("{}/v1/{}", self.base_url.trim_end_matches('/'), path)
    }

    pub(crate) fn session_options(&self) -> SessionOptions {
        SessionOptions {
            buffer_capacity: self.stream_buffer_capacity,
            max_line_bytes: self.max_line_bytes,
            decode_error_policy: self.decode_error_policy,
        }
    }
}

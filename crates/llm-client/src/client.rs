use futures::StreamExt as _;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::errors::ClientError;
use crate::session::StreamSession;
use crate::types::{
    ApiErrorObject, ChatCompletion, ChatCompletionRequest, Completion, CompletionRequest,
    ModerationRequest, ModerationResponse, Response, ResponseRequest,
};

const EVENT_STREAM: &str = "text/event-stream";
const ORGANIZATION_HEADER: &str = "OpenAI-Organization";
const PROJECT_HEADER: &str = "OpenAI-Project";

/// Result of [`Client::send_response`].
#[derive(Debug)]
pub enum ResponseReply {
    /// `stream = true`: a live event session.
    Stream(StreamSession),
    /// `stream = false`: the finished response object.
    Complete(Response),
}

/// HTTP client for the platform API.
///
/// Cheap to clone; clones share the connection pool.
#[derive(Debug, Clone)]
pub struct Client {
    http: reqwest::Client,
    config: ClientConfig,
}

impl Client {
    /// Creates a client from explicit configuration.
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        config.validate()?;
        // Streaming bodies carry no total timeout; plain requests set one per call.
        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| ClientError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { http, config })
    }

    /// Creates a client using `OPENAI_API_KEY` and related variables.
    pub fn from_env() -> Result<Self, ClientError> {
        Self::new(ClientConfig::from_env()?)
    }

    /// Returns the configuration this client was built with.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Sends a response request, streaming when `request.stream` is set.
    pub async fn send_response(&self, request: ResponseRequest) -> Result<ResponseReply, ClientError> {
        if request.stream {
            self.stream_response(request).await.map(ResponseReply::Stream)
        } else {
            self.create_response(request).await.map(ResponseReply::Complete)
        }
    }

    /// Opens a streamed response.
    ///
    /// Handshake failures are returned here: transport errors, a non-success
    /// status, or a reply that is not an event stream. Everything after that is
    /// reported through the session.
    pub async fn stream_response(&self, request: ResponseRequest) -> Result<StreamSession, ClientError> {
        self.stream_response_with_cancel(request, CancellationToken::new())
            .await
    }

    /// Like [`stream_response`](Self::stream_response), tied to a caller token.
    ///
    /// Cancelling `cancel` aborts the handshake or, once the session exists,
    /// stops its producer.
    pub async fn stream_response_with_cancel(
        &self,
        mut request: ResponseRequest,
        cancel: CancellationToken,
    ) -> Result<StreamSession, ClientError> {
        request.stream = true;
        request.validate()?;
        let payload = encode(&request)?;
        debug!(model = %request.model, previous_response_id = ?request.previous_response_id, "opening response stream");

        let builder = self
            .post("responses")
            .header(ACCEPT, EVENT_STREAM)
            .body(payload);
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ClientError::Cancelled),
            sent = builder.send() => sent.map_err(ClientError::from_reqwest)?,
        };
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ClientError::Cancelled),
            checked = self.check_stream_accepted(response) => checked?,
        };

        Ok(StreamSession::spawn(
            response.bytes_stream(),
            self.config.session_options(),
            cancel.child_token(),
        ))
    }

    /// Creates a response and waits for the whole object.
    pub async fn create_response(&self, mut request: ResponseRequest) -> Result<Response, ClientError> {
        request.stream = false;
        request.validate()?;
        debug!(model = %request.model, "creating response");
        self.post_json("responses", &request).await
    }

    /// Creates a chat completion (`v1/chat/completions`).
    pub async fn create_chat_completion(
        &self,
        request: &ChatCompletionRequest,
    ) -> Result<ChatCompletion, ClientError> {
        if request.model.trim().is_empty() {
            return Err(ClientError::Validation("model must not be empty".into()));
        }
        debug!(model = %request.model, messages = request.messages.len(), "creating chat completion");
        self.post_json("chat/completions", request).await
    }

    /// Creates a legacy text completion (`v1/completions`).
    pub async fn create_completion(&self, request: &CompletionRequest) -> Result<Completion, ClientError> {
        if request.model.trim().is_empty() {
            return Err(ClientError::Validation("model must not be empty".into()));
        }
        debug!(model = %request.model, "creating completion");
        self.post_json("completions", request).await
    }

    /// Classifies input with the moderation endpoint.
    pub async fn create_moderation(
        &self,
        request: &ModerationRequest,
    ) -> Result<ModerationResponse, ClientError> {
        debug!(model = ?request.model, "creating moderation");
        self.post_json("moderations", request).await
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        let mut builder = self
            .http
            .post(self.config.endpoint(path))
            .bearer_auth(&self.config.api_key)
            .header(CONTENT_TYPE, "application/json");
        if let Some(organization) = &self.config.organization {
            builder = builder.header(ORGANIZATION_HEADER, organization);
        }
        if let Some(project) = &self.config.project {
            builder = builder.header(PROJECT_HEADER, project);
        }
        builder
    }

    async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, ClientError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let payload = encode(body)?;
        let response = self
            .post(path)
            .timeout(self.config.timeout)
            .body(payload)
            .send()
            .await
            .map_err(ClientError::from_reqwest)?;
        let response = self.check_status(response).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| ClientError::transport(format!("failed to read response body: {e}")))?;

        let value: serde_json::Value = serde_json::from_slice(&bytes)
            .map_err(|e| ClientError::Decode(format!("invalid JSON reply from {path}: {e}")))?;
        if let Some(err) = api_error(&value) {
            warn!(path, message = %err, "server reported error in successful reply");
            return Err(err);
        }
        serde_json::from_value(value)
            .map_err(|e| ClientError::Decode(format!("unexpected reply shape from {path}: {e}")))
    }

    /// A 2xx reply is only a stream when it is served as `text/event-stream`.
    async fn check_stream_accepted(
        &self,
        response: reqwest::Response,
    ) -> Result<reqwest::Response, ClientError> {
        let response = self.check_status(response).await?;
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();
        if content_type.contains(EVENT_STREAM) {
            return Ok(response);
        }

        let status = response.status().as_u16();
        let body = read_bounded(response, self.config.max_error_body_bytes).await;
        warn!(status, content_type = %content_type, "stream request answered without an event stream");
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(&body)
            && let Some(err) = api_error(&value)
        {
            return Err(err);
        }
        Err(ClientError::Decode(format!(
            "expected {EVENT_STREAM} reply, got `{content_type}` with status {status}"
        )))
    }

    async fn check_status(&self, response: reqwest::Response) -> Result<reqwest::Response, ClientError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = read_bounded(response, self.config.max_error_body_bytes).await;
        warn!(status = status.as_u16(), "request rejected");
        Err(ClientError::http(status.as_u16(), body))
    }
}

fn encode<B: Serialize + ?Sized>(body: &B) -> Result<Vec<u8>, ClientError> {
    serde_json::to_vec(body).map_err(|e| ClientError::Encode(format!("failed to serialize request: {e}")))
}

/// Reads at most `limit` bytes of a body, lossily decoded.
async fn read_bounded(response: reqwest::Response, limit: usize) -> String {
    let mut body = Vec::new();
    let mut chunks = response.bytes_stream();
    while let Some(Ok(chunk)) = chunks.next().await {
        let remaining = limit.saturating_sub(body.len());
        if chunk.len() >= remaining {
            body.extend_from_slice(&chunk[..remaining]);
            break;
        }
        body.extend_from_slice(&chunk);
    }
    String::from_utf8_lossy(&body).into_owned()
}

/// A non-empty `error.message` fails the call regardless of HTTP status.
fn api_error(value: &serde_json::Value) -> Option<ClientError> {
    let error = value.get("error").filter(|e| !e.is_null())?;
    let error: ApiErrorObject = serde_json::from_value(error.clone()).ok()?;
    if error.message.trim().is_empty() {
        return None;
    }
    Some(ClientError::api(error))
}

use std::fmt;

use crate::types::ApiErrorObject;

/// Terminal failure event that ended a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServerFailureKind {
    /// `response.failed`
    Failed,
    /// `response.incomplete`
    Incomplete,
    /// `error`
    Error,
}

impl fmt::Display for ServerFailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Failed => "response.failed",
            Self::Incomplete => "response.incomplete",
            Self::Error => "error",
        })
    }
}

/// A frame that could not be turned into a typed event.
///
/// Non-fatal by default: the session drops the frame and keeps reading.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// The data payload was not valid JSON.
    #[error("invalid JSON in `{event}` frame: {message}")]
    InvalidJson { event: String, message: String },
    /// The payload's `type` disagrees with the frame's event name.
    #[error("frame `{event}` carried mismatched type `{found}`")]
    TypeMismatch { event: String, found: String },
    /// The JSON did not match the payload shape registered for the event.
    #[error("unexpected shape for `{event}`: {message}")]
    Shape { event: String, message: String },
}

impl DecodeError {
    /// Returns the event name of the offending frame.
    pub fn event_name(&self) -> &str {
        match self {
            Self::InvalidJson { event, .. }
            | Self::TypeMismatch { event, .. }
            | Self::Shape { event, .. } => event,
        }
    }
}

/// Terminal error of a stream session, read through `StreamSession::err`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    /// Reading the response body failed.
    #[error("transport error: {0}")]
    Transport(String),
    /// The byte stream was not valid server-sent-event framing.
    #[error("frame error: {0}")]
    Frame(String),
    /// An event failed to decode under `DecodeErrorPolicy::Fail`, or a terminal
    /// event could not be decoded.
    #[error(transparent)]
    Decode(DecodeError),
    /// The server ended the stream with a terminal failure event.
    #[error("server reported {kind}: {message}")]
    Server {
        kind: ServerFailureKind,
        message: String,
        code: Option<String>,
    },
    /// The caller cancelled the session.
    #[error("stream cancelled")]
    Cancelled,
}

impl StreamError {
    pub(crate) fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    pub(crate) fn frame(message: impl Into<String>) -> Self {
        Self::Frame(message.into())
    }

    pub(crate) fn server(
        kind: ServerFailureKind,
        message: impl Into<String>,
        code: Option<String>,
    ) -> Self {
        Self::Server {
            kind,
            message: message.into(),
            code,
        }
    }

    /// Returns true when the session ended because the caller cancelled it.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Errors returned synchronously by `Client` calls.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    /// Invalid client configuration.
    #[error("config error: {0}")]
    Config(String),
    /// The request cannot be sent as built.
    #[error("validation error: {0}")]
    Validation(String),
    /// The request body could not be serialized.
    #[error("encode error: {0}")]
    Encode(String),
    /// Network or HTTP layer failure.
    #[error("transport error: {0}")]
    Transport(String),
    /// The server answered with a non-success status before any streaming began.
    #[error("request failed with status {status}: {message}")]
    Http {
        status: u16,
        message: String,
        body: String,
    },
    /// A JSON reply carried a non-empty `error.message`.
    #[error("api error: {message}")]
    Api {
        message: String,
        kind: Option<String>,
        code: Option<String>,
        param: Option<String>,
    },
    /// A successful reply did not match the expected JSON shape.
    #[error("decode error: {0}")]
    Decode(String),
    /// The caller cancelled the request before it completed.
    #[error("cancelled")]
    Cancelled,
}

impl ClientError {
    pub(crate) fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    pub(crate) fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Transport(format!("request timed out: {err}"))
        } else {
            Self::Transport(format!("request failed: {err}"))
        }
    }

    /// Builds an HTTP error, preferring the server's `error.message` when the
    /// body carries one.
    pub(crate) fn http(status: u16, body: String) -> Self {
        let message = extract_error_message(&body)
            .unwrap_or_else(|| format!("server returned status {status}"));
        Self::Http {
            status,
            message,
            body,
        }
    }

    pub(crate) fn api(error: ApiErrorObject) -> Self {
        let code = error.code_string();
        Self::Api {
            message: error.message,
            kind: error.kind,
            code,
            param: error.param,
        }
    }

    /// HTTP status for `Http` errors.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether a caller-side retry policy may reasonably retry this error.
    ///
    /// The client never retries on its own.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Http { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

pub(crate) fn extract_error_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    value
        .get("error")
        .and_then(|e| e.get("message"))
        .and_then(|v| v.as_str())
        .filter(|m| !m.trim().is_empty())
        .map(ToOwned::to_owned)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_error_prefers_server_message() {
        let err = ClientError::http(429, r#"{"error":{"message":"rate limit"}}"#.into());
        assert!(matches!(&err, ClientError::Http { status: 429, message, .. } if message == "rate limit"));
        assert!(err.is_retryable());
        assert_eq!(err.status(), Some(429));
    }

    #[test]
    fn http_error_falls_back_to_status_text() {
        let err = ClientError::http(400, "<html>bad</html>".into());
        assert!(
            matches!(&err, ClientError::Http { message, body, .. } if message.contains("400") && body == "<html>bad</html>")
        );
        assert!(!err.is_retryable());
    }

    #[test]
    fn server_failure_kind_displays_wire_name() {
        let err = StreamError::server(ServerFailureKind::Failed, "boom", None);
        assert_eq!(err.to_string(), "server reported response.failed: boom");
        assert!(!err.is_cancelled());
        assert!(StreamError::Cancelled.is_cancelled());
    }
}

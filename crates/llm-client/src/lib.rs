//! Async client for a hosted LLM platform's HTTP/JSON API.
//!
//! The centre of the crate is the streaming response adapter: a
//! `v1/responses` server-sent-event body is framed, decoded into
//! [`ResponseEvent`] values and handed to the caller through a bounded
//! channel owned by a [`StreamSession`]. Plain request/response endpoints
//! (responses, chat completions, completions, moderations) share the same
//! [`Client`].
//!
//! # Streaming
//!
//! ```no_run
//! use llm_client::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let client = Client::from_env()?;
//! let mut session = client
//!     .stream_response(ResponseRequest::new("gpt-4.1-mini", "Say hello"))
//!     .await?;
//!
//! while let Some(event) = session.next_event().await {
//!     if let Some(delta) = event.text_delta() {
//!         print!("{delta}");
//!     }
//! }
//! if let Some(err) = session.err() {
//!     eprintln!("stream failed: {err}");
//! }
//! # Ok(())
//! # }
//! ```

/// HTTP client, streaming dispatcher and plain endpoints.
pub mod client;
/// Client configuration.
pub mod config;
/// Frame-to-event decoding.
pub mod decoder;
/// Public error types.
pub mod errors;
/// Stream event schema and wire-name registry.
pub mod events;
/// Optional `tracing` subscriber setup for binaries.
pub mod observability;
/// Common imports for typical usage.
pub mod prelude;
/// Producer task and consumer handle for streamed responses.
pub mod session;
/// Server-sent-event framing.
pub mod sse;
/// JSON wire types.
pub mod types;

pub use client::{Client, ResponseReply};
pub use config::ClientConfig;
pub use decoder::{DecodeErrorPolicy, EventDecoder};
pub use errors::{ClientError, DecodeError, ServerFailureKind, StreamError};
pub use events::{EventKind, ResponseEvent, Terminality};
pub use session::{AbortHandle, SessionOptions, SessionState, StreamSession};
pub use tokio_util::sync::CancellationToken;

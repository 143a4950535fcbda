//! Common imports for typical client usage.
pub use crate::types::{
    ChatCompletionRequest, ChatMessage, Conversation, FinishReason, InputMessage,
    ModerationRequest, Response, ResponseRequest, TextFormat,
};
pub use crate::{
    AbortHandle, CancellationToken, Client, ClientConfig, ClientError, EventKind, ResponseEvent,
    ResponseReply, StreamError, StreamSession,
};

//! JSON wire types for requests and replies.

mod chat;
mod moderation;
mod request;
mod response;

pub use chat::{
    ChatChoice, ChatCompletion, ChatCompletionRequest, ChatMessage, ChatRole, Completion,
    CompletionChoice, CompletionRequest, FinishReason,
};
pub use moderation::{ModerationInput, ModerationRequest, ModerationResponse, ModerationResult};
pub use request::{
    Conversation, InputMessage, ReasoningConfig, ReasoningEffort, ResponseInput, ResponseRequest,
    Role, TextConfig, TextFormat,
};
pub use response::{ApiErrorObject, ContentPart, IncompleteDetails, OutputItem, Response, Usage};

pub(crate) use response::code_string;

//! Typed events of a streamed response.
//!
//! Every kind the client understands is listed once in the table at the
//! bottom of this module. The table generates [`EventKind`], [`ResponseEvent`]
//! and the wire-name registry so the three can never drift apart.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{ServerFailureKind, StreamError};
use crate::types::{code_string, ApiErrorObject, ContentPart, OutputItem, Response};

/// How an event kind affects the life of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Terminality {
    NonTerminal,
    Success,
    Failure,
}

/// Builds a typed event from the JSON payload of a frame.
pub type EventConstructor = fn(Value) -> Result<ResponseEvent, serde_json::Error>;

/// Registry entry for one wire name.
#[derive(Debug, Clone, Copy)]
pub struct RegistryEntry {
    pub kind: EventKind,
    pub construct: EventConstructor,
}

/// Incremental text (or bytes, encoded as text) for one content slot.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeltaEvent {
    #[serde(default)]
    pub sequence_number: u64,
    #[serde(default)]
    pub item_id: String,
    #[serde(default)]
    pub output_index: u32,
    #[serde(default, alias = "summary_index")]
    pub content_index: u32,
    #[serde(default)]
    pub delta: String,
}

/// Final value for one content slot.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DoneEvent {
    #[serde(default)]
    pub sequence_number: u64,
    #[serde(default)]
    pub item_id: String,
    #[serde(default)]
    pub output_index: u32,
    #[serde(default, alias = "summary_index")]
    pub content_index: u32,
    #[serde(
        default,
        alias = "refusal",
        alias = "arguments",
        alias = "transcript",
        alias = "code"
    )]
    pub text: String,
    /// Function name, on function-call argument events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Full response object attached to lifecycle events.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ResponseSnapshot {
    #[serde(default)]
    pub sequence_number: u64,
    #[serde(default)]
    pub response: Response,
}

impl ResponseSnapshot {
    fn incomplete_reason(&self) -> String {
        self.response
            .incomplete_details
            .as_ref()
            .and_then(|d| d.reason.clone())
            .unwrap_or_else(|| "response incomplete".to_string())
    }
}

/// `response.failed`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FailedEvent {
    #[serde(default)]
    pub sequence_number: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<Response>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiErrorObject>,
}

impl FailedEvent {
    fn error_object(&self) -> Option<&ApiErrorObject> {
        self.error
            .as_ref()
            .filter(|e| !e.message.trim().is_empty())
            .or_else(|| self.response.as_ref().and_then(Response::failure))
    }

    /// Top-level error message, then `response.error.message`.
    pub fn error_message(&self) -> String {
        self.error_object()
            .map(|e| e.message.clone())
            .unwrap_or_else(|| "response failed".to_string())
    }

    /// Error code from the same object as [`error_message`](Self::error_message).
    pub fn error_code(&self) -> Option<String> {
        self.error_object().and_then(ApiErrorObject::code_string)
    }
}

/// Stream-level `error` event.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ErrorEvent {
    #[serde(default)]
    pub sequence_number: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<Value>,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub param: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiErrorObject>,
}

impl ErrorEvent {
    /// Returns the top-level message, then `error.message`.
    pub fn message(&self) -> &str {
        if !self.message.trim().is_empty() {
            return &self.message;
        }
        match &self.error {
            Some(err) if !err.message.trim().is_empty() => &err.message,
            _ => "stream error",
        }
    }

    /// Returns the error code as a string, if any.
    pub fn code(&self) -> Option<String> {
        code_string(self.code.as_ref())
            .or_else(|| self.error.as_ref().and_then(ApiErrorObject::code_string))
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct OutputItemEvent {
    #[serde(default)]
    pub sequence_number: u64,
    #[serde(default)]
    pub output_index: u32,
    #[serde(default)]
    pub item: OutputItem,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ContentPartEvent {
    #[serde(default)]
    pub sequence_number: u64,
    #[serde(default)]
    pub item_id: String,
    #[serde(default)]
    pub output_index: u32,
    #[serde(default, alias = "summary_index")]
    pub content_index: u32,
    #[serde(default)]
    pub part: ContentPart,
}

/// Progress of a hosted tool call (search, interpreter, MCP, image generation).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ToolCallEvent {
    #[serde(default)]
    pub sequence_number: u64,
    #[serde(default)]
    pub item_id: String,
    #[serde(default)]
    pub output_index: u32,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AnnotationEvent {
    #[serde(default)]
    pub sequence_number: u64,
    #[serde(default)]
    pub item_id: String,
    #[serde(default)]
    pub output_index: u32,
    #[serde(default)]
    pub content_index: u32,
    #[serde(default)]
    pub annotation_index: u32,
    #[serde(default)]
    pub annotation: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ImagePartialEvent {
    #[serde(default)]
    pub sequence_number: u64,
    #[serde(default)]
    pub item_id: String,
    #[serde(default)]
    pub output_index: u32,
    #[serde(default)]
    pub partial_image_index: u32,
    #[serde(default)]
    pub partial_image_b64: String,
}

/// An event whose name is not in the registry.
#[derive(Debug, Clone, PartialEq)]
pub struct UnknownEvent {
    pub name: String,
    pub sequence_number: u64,
    /// Parsed payload, or a JSON string holding the data when it is not JSON.
    pub raw: Value,
}

macro_rules! response_events {
    ($( $kind:ident($payload:ty) = $wire:literal => $terminality:ident, )+) => {
        /// Kind of a [`ResponseEvent`].
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum EventKind {
            $( $kind, )+
            Unknown,
        }

        impl EventKind {
            /// Every registered kind (excludes `Unknown`).
            pub const ALL: &'static [EventKind] = &[$( EventKind::$kind, )+];

            /// Wire name, `None` for `Unknown`.
            pub fn wire_name(self) -> Option<&'static str> {
                match self {
                    $( Self::$kind => Some($wire), )+
                    Self::Unknown => None,
                }
            }

            /// Returns how this kind affects the end of a stream.
            pub fn terminality(self) -> Terminality {
                match self {
                    $( Self::$kind => Terminality::$terminality, )+
                    Self::Unknown => Terminality::NonTerminal,
                }
            }
        }

        /// One decoded stream event.
        #[derive(Debug, Clone, PartialEq)]
        pub enum ResponseEvent {
            $( $kind($payload), )+
            Unknown(UnknownEvent),
        }

        impl ResponseEvent {
            /// Returns the kind of this event.
            pub fn kind(&self) -> EventKind {
                match self {
                    $( Self::$kind(_) => EventKind::$kind, )+
                    Self::Unknown(_) => EventKind::Unknown,
                }
            }

            /// Server-assigned sequence number, `0` when the payload had none.
            pub fn sequence_number(&self) -> u64 {
                match self {
                    $( Self::$kind(payload) => payload.sequence_number, )+
                    Self::Unknown(event) => event.sequence_number,
                }
            }
        }

        static REGISTRY: Lazy<HashMap<&'static str, RegistryEntry>> = Lazy::new(|| {
            let mut registry = HashMap::new();
            $(
                registry.insert(
                    $wire,
                    RegistryEntry {
                        kind: EventKind::$kind,
                        construct: |value| {
                            serde_json::from_value::<$payload>(value).map(ResponseEvent::$kind)
                        },
                    },
                );
            )+
            registry
        });
    };
}

response_events! {
    Created(ResponseSnapshot) = "response.created" => NonTerminal,
    InProgress(ResponseSnapshot) = "response.in_progress" => NonTerminal,
    Queued(ResponseSnapshot) = "response.queued" => NonTerminal,
    OutputItemAdded(OutputItemEvent) = "response.output_item.added" => NonTerminal,
    OutputItemDone(OutputItemEvent) = "response.output_item.done" => NonTerminal,
    ContentPartAdded(ContentPartEvent) = "response.content_part.added" => NonTerminal,
    ContentPartDone(ContentPartEvent) = "response.content_part.done" => NonTerminal,

    OutputTextDelta(DeltaEvent) = "response.output_text.delta" => NonTerminal,
    OutputTextDone(DoneEvent) = "response.output_text.done" => NonTerminal,
    OutputTextAnnotationAdded(AnnotationEvent) = "response.output_text.annotation.added" => NonTerminal,
    RefusalDelta(DeltaEvent) = "response.refusal.delta" => NonTerminal,
    RefusalDone(DoneEvent) = "response.refusal.done" => NonTerminal,
    FunctionCallArgumentsDelta(DeltaEvent) = "response.function_call_arguments.delta" => NonTerminal,
    FunctionCallArgumentsDone(DoneEvent) = "response.function_call_arguments.done" => NonTerminal,
    ReasoningTextDelta(DeltaEvent) = "response.reasoning_text.delta" => NonTerminal,
    ReasoningTextDone(DoneEvent) = "response.reasoning_text.done" => NonTerminal,
    ReasoningSummaryPartAdded(ContentPartEvent) = "response.reasoning_summary_part.added" => NonTerminal,
    ReasoningSummaryPartDone(ContentPartEvent) = "response.reasoning_summary_part.done" => NonTerminal,
    ReasoningSummaryTextDelta(DeltaEvent) = "response.reasoning_summary_text.delta" => NonTerminal,
    ReasoningSummaryTextDone(DoneEvent) = "response.reasoning_summary_text.done" => NonTerminal,

    AudioDelta(DeltaEvent) = "response.audio.delta" => NonTerminal,
    AudioDone(ToolCallEvent) = "response.audio.done" => NonTerminal,
    AudioTranscriptDelta(DeltaEvent) = "response.audio.transcript.delta" => NonTerminal,
    AudioTranscriptDone(DoneEvent) = "response.audio.transcript.done" => NonTerminal,
    ImageGenerationInProgress(ToolCallEvent) = "response.image_generation_call.in_progress" => NonTerminal,
    ImageGenerationGenerating(ToolCallEvent) = "response.image_generation_call.generating" => NonTerminal,
    ImageGenerationPartial(ImagePartialEvent) = "response.image_generation_call.partial_image" => NonTerminal,
    ImageGenerationCompleted(ToolCallEvent) = "response.image_generation_call.completed" => NonTerminal,
    WebSearchInProgress(ToolCallEvent) = "response.web_search_call.in_progress" => NonTerminal,
    WebSearchSearching(ToolCallEvent) = "response.web_search_call.searching" => NonTerminal,
    WebSearchCompleted(ToolCallEvent) = "response.web_search_call.completed" => NonTerminal,
    FileSearchInProgress(ToolCallEvent) = "response.file_search_call.in_progress" => NonTerminal,
    FileSearchSearching(ToolCallEvent) = "response.file_search_call.searching" => NonTerminal,
    FileSearchCompleted(ToolCallEvent) = "response.file_search_call.completed" => NonTerminal,
    CodeInterpreterInProgress(ToolCallEvent) = "response.code_interpreter_call.in_progress" => NonTerminal,
    CodeInterpreterInterpreting(ToolCallEvent) = "response.code_interpreter_call.interpreting" => NonTerminal,
    CodeInterpreterCompleted(ToolCallEvent) = "response.code_interpreter_call.completed" => NonTerminal,
    CodeInterpreterCodeDelta(DeltaEvent) = "response.code_interpreter_call_code.delta" => NonTerminal,
    CodeInterpreterCodeDone(DoneEvent) = "response.code_interpreter_call_code.done" => NonTerminal,
    McpToolCallInProgress(ToolCallEvent) = "response.mcp_call.in_progress" => NonTerminal,
    McpToolCallCompleted(ToolCallEvent) = "response.mcp_call.completed" => NonTerminal,
    McpToolCallFailed(ToolCallEvent) = "response.mcp_call.failed" => NonTerminal,
    McpToolCallArgumentsDelta(DeltaEvent) = "response.mcp_call_arguments.delta" => NonTerminal,
    McpToolCallArgumentsDone(DoneEvent) = "response.mcp_call_arguments.done" => NonTerminal,
    McpListToolsInProgress(ToolCallEvent) = "response.mcp_list_tools.in_progress" => NonTerminal,
    McpListToolsCompleted(ToolCallEvent) = "response.mcp_list_tools.completed" => NonTerminal,
    McpListToolsFailed(ToolCallEvent) = "response.mcp_list_tools.failed" => NonTerminal,

    Completed(ResponseSnapshot) = "response.completed" => Success,
    Failed(FailedEvent) = "response.failed" => Failure,
    Incomplete(ResponseSnapshot) = "response.incomplete" => Failure,
    Error(ErrorEvent) = "error" => Failure,
}

impl EventKind {
    /// Looks a wire name up in the registry; unregistered names are `Unknown`.
    pub fn from_wire_name(name: &str) -> Self {
        lookup(name).map_or(Self::Unknown, |entry| entry.kind)
    }

    /// Returns true for kinds that end a stream.
    pub fn is_terminal(self) -> bool {
        self.terminality() != Terminality::NonTerminal
    }
}

impl ResponseEvent {
    /// Returns true when this event ends the stream.
    pub fn is_terminal(&self) -> bool {
        self.kind().is_terminal()
    }

    /// Text of an `OutputTextDelta`.
    pub fn text_delta(&self) -> Option<&str> {
        match self {
            Self::OutputTextDelta(delta) => Some(&delta.delta),
            _ => None,
        }
    }

    /// The response object carried by lifecycle snapshots.
    pub fn response(&self) -> Option<&Response> {
        match self {
            Self::Created(s)
            | Self::InProgress(s)
            | Self::Queued(s)
            | Self::Completed(s)
            | Self::Incomplete(s) => Some(&s.response),
            Self::Failed(failed) => failed.response.as_ref(),
            _ => None,
        }
    }

    /// The error a terminal failure event ends its stream with.
    pub fn terminal_error(&self) -> Option<StreamError> {
        match self {
            Self::Failed(failed) => Some(StreamError::server(
                ServerFailureKind::Failed,
                failed.error_message(),
                failed.error_code(),
            )),
            Self::Incomplete(snapshot) => Some(StreamError::server(
                ServerFailureKind::Incomplete,
                snapshot.incomplete_reason(),
                None,
            )),
            Self::Error(error) => Some(StreamError::server(
                ServerFailureKind::Error,
                error.message(),
                error.code(),
            )),
            _ => None,
        }
    }
}

/// The wire name registry.
pub fn registry() -> &'static HashMap<&'static str, RegistryEntry> {
    &REGISTRY
}

/// Returns the registry entry for a wire name.
pub fn lookup(name: &str) -> Option<RegistryEntry> {
    REGISTRY.get(name).copied()
}

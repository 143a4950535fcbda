use serde_json::Value;

use crate::errors::DecodeError;
use crate::events::{self, ResponseEvent, UnknownEvent};
use crate::sse::{SseFrame, DEFAULT_EVENT_NAME};

/// What a stream session does with a frame that fails to decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DecodeErrorPolicy {
    /// Log the error, count it, and keep reading.
    #[default]
    Skip,
    /// End the stream with `StreamError::Decode`.
    Fail,
}

/// Turns SSE frames into typed events.
#[derive(Debug, Clone, Copy, Default)]
pub struct EventDecoder;

impl EventDecoder {
    /// Decodes one frame; see [`decode_event`].
    pub fn decode(&self, frame: &SseFrame) -> Result<ResponseEvent, DecodeError> {
        decode_event(&frame.event, &frame.data)
    }
}

/// Decodes one `(event name, data)` pair.
///
/// Unregistered names never fail: they become [`ResponseEvent::Unknown`].
pub fn decode_event(name: &str, data: &str) -> Result<ResponseEvent, DecodeError> {
    let parsed = serde_json::from_str::<Value>(data);
    let name = resolve_name(name, parsed.as_ref().ok()).to_owned();

    let Some(entry) = events::lookup(&name) else {
        let raw = parsed.unwrap_or_else(|_| Value::String(data.to_string()));
        let sequence_number = raw
            .get("sequence_number")
            .and_then(Value::as_u64)
            .unwrap_or(0);
        return Ok(ResponseEvent::Unknown(UnknownEvent {
            name,
            sequence_number,
            raw,
        }));
    };

    let value = parsed.map_err(|e| DecodeError::InvalidJson {
        event: name.clone(),
        message: e.to_string(),
    })?;
    let Some(object) = value.as_object() else {
        return Err(DecodeError::Shape {
            event: name,
            message: "payload is not a JSON object".into(),
        });
    };
    match object.get("type") {
        None => {}
        Some(Value::String(found)) if *found == name => {}
        Some(Value::String(found)) => {
            return Err(DecodeError::TypeMismatch {
                found: found.clone(),
                event: name,
            });
        }
        Some(other) => {
            return Err(DecodeError::Shape {
                event: name,
                message: format!("`type` must be a string, got {other}"),
            });
        }
    }

    (entry.construct)(value).map_err(|e| DecodeError::Shape {
        event: name,
        message: e.to_string(),
    })
}

/// Servers that omit `event:` put the name in the payload's `type`.
fn resolve_name<'a>(name: &'a str, parsed: Option<&'a Value>) -> &'a str {
    if name != DEFAULT_EVENT_NAME {
        return name;
    }
    parsed
        .and_then(|v| v.get("type"))
        .and_then(Value::as_str)
        .unwrap_or(name)
}

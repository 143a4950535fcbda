use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Response object returned by `v1/responses` and carried by snapshot events.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Response {
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub output: Vec<OutputItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiErrorObject>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub incomplete_details: Option<IncompleteDetails>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_response_id: Option<String>,
}

impl Response {
    /// Concatenated text of all assistant message items, falling back to the
    /// top-level `output_text` when no message text is present.
    pub fn output_text(&self) -> String {
        let text: String = self
            .output
            .iter()
            .filter(|item| item.is_message())
            .map(OutputItem::text)
            .collect();
        if text.is_empty() {
            self.output_text.clone().unwrap_or_default()
        } else {
            text
        }
    }

    /// The response's error object when it carries a non-empty message.
    pub fn failure(&self) -> Option<&ApiErrorObject> {
        self.error.as_ref().filter(|e| !e.message.trim().is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IncompleteDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Token accounting. Accepts both the completions and responses field names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default, alias = "input_tokens")]
    pub prompt_tokens: u64,
    #[serde(default, alias = "output_tokens")]
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

/// Server error object, `{message, type, param, code}`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ApiErrorObject {
    #[serde(default)]
    pub message: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub param: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<Value>,
}

impl ApiErrorObject {
    /// `code` rendered as a string; servers send both strings and numbers.
    pub fn code_string(&self) -> Option<String> {
        code_string(self.code.as_ref())
    }
}

pub(crate) fn code_string(code: Option<&Value>) -> Option<String> {
    match code? {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

/// One entry of `Response::output`.
///
/// Item types the client has no dedicated fields for keep their remaining
/// keys in `extra`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct OutputItem {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub content: Vec<ContentPart>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub summary: Vec<ContentPart>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl OutputItem {
    /// Returns true for assistant `message` items.
    pub fn is_message(&self) -> bool {
        self.kind == "message"
    }

    /// Returns true for `function_call` items.
    pub fn is_function_call(&self) -> bool {
        self.kind == "function_call"
    }

    /// Concatenated `output_text` parts.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter(|part| part.kind == "output_text" || part.kind.is_empty())
            .filter_map(|part| part.text.as_deref())
            .collect()
    }
}

/// Content part of a message (or summary part of a reasoning item).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ContentPart {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refusal: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub annotations: Vec<Value>,
}

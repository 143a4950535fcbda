use std::collections::BTreeMap;

use serde_json::Value;

use crate::errors::ClientError;
use crate::types::Response;

/// Reasoning effort hint (when supported by the selected model).
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningEffort {
    Low,
    Medium,
    High,
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ReasoningConfig {
    pub effort: ReasoningEffort,
}

/// Message role for structured input.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    Developer,
    User,
    Assistant,
}

/// One structured input message.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct InputMessage {
    pub role: Role,
    pub content: String,
}

impl InputMessage {
    /// Creates a message with an explicit role.
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }
}

/// `input` of a response request: a bare string or a list of messages.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(untagged)]
pub enum ResponseInput {
    Text(String),
    Messages(Vec<InputMessage>),
}

impl ResponseInput {
    fn is_empty(&self) -> bool {
        match self {
            Self::Text(text) => text.trim().is_empty(),
            Self::Messages(messages) => messages.is_empty(),
        }
    }
}

impl From<&str> for ResponseInput {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for ResponseInput {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<Vec<InputMessage>> for ResponseInput {
    fn from(value: Vec<InputMessage>) -> Self {
        Self::Messages(value)
    }
}

/// Output format under `text.format`.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TextFormat {
    Text,
    JsonObject,
    JsonSchema {
        name: String,
        schema: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        strict: Option<bool>,
    },
}

impl TextFormat {
    /// Structured output constrained by a JSON schema.
    pub fn json_schema(name: impl Into<String>, schema: Value, strict: bool) -> Self {
        Self::JsonSchema {
            name: name.into(),
            schema,
            description: None,
            strict: Some(strict),
        }
    }
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TextConfig {
    pub format: TextFormat,
}

/// Body of `POST v1/responses`.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ResponseRequest {
    pub model: String,
    pub input: ResponseInput,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_response_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<TextConfig>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<ReasoningConfig>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub stream: bool,
}

impl ResponseRequest {
    /// Creates a non-streaming request for `model`.
    pub fn new(model: impl Into<String>, input: impl Into<ResponseInput>) -> Self {
        Self {
            model: model.into(),
            input: input.into(),
            instructions: None,
            previous_response_id: None,
            text: None,
            tools: Vec::new(),
            temperature: None,
            max_output_tokens: None,
            store: None,
            reasoning: None,
            metadata: BTreeMap::new(),
            stream: false,
        }
    }

    /// Sets the system-level instructions.
    pub fn instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    /// Continues the conversation that produced `id`.
    pub fn previous_response_id(mut self, id: impl Into<String>) -> Self {
        self.previous_response_id = Some(id.into());
        self
    }

    /// Sets the output `text.format`.
    pub fn text_format(mut self, format: TextFormat) -> Self {
        self.text = Some(TextConfig { format });
        self
    }

    /// Shorthand for `text_format(TextFormat::json_schema(..))`.
    pub fn json_schema(self, name: impl Into<String>, schema: Value, strict: bool) -> Self {
        self.text_format(TextFormat::json_schema(name, schema, strict))
    }

    /// Adds a raw tool definition.
    pub fn tool(mut self, tool: Value) -> Self {
        self.tools.push(tool);
        self
    }

    /// Sets the sampling temperature.
    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Caps the number of generated tokens.
    pub fn max_output_tokens(mut self, max: u32) -> Self {
        self.max_output_tokens = Some(max);
        self
    }

    /// Sets whether the server stores the response.
    pub fn store(mut self, store: bool) -> Self {
        self.store = Some(store);
        self
    }

    /// Sets the reasoning effort for reasoning models.
    pub fn reasoning_effort(mut self, effort: ReasoningEffort) -> Self {
        self.reasoning = Some(ReasoningConfig { effort });
        self
    }

    /// Adds one metadata entry.
    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Requests a server-sent-event stream instead of a single reply.
    pub fn stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    pub(crate) fn validate(&self) -> Result<(), ClientError> {
        if self.model.trim().is_empty() {
            return Err(ClientError::Validation("model must not be empty".into()));
        }
        if self.input.is_empty() {
            return Err(ClientError::Validation("input must not be empty".into()));
        }
        Ok(())
    }
}

/// Chains requests through `previous_response_id`.
///
/// Only the last response id is remembered; history lives on the server.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Conversation {
    model: String,
    instructions: Option<String>,
    last_response_id: Option<String>,
}

impl Conversation {
    /// Starts a conversation with no prior response.
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            instructions: None,
            last_response_id: None,
        }
    }

    /// Sets instructions sent with every request.
    pub fn instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    /// Builds the next request, linked to the last recorded response.
    pub fn request(&self, input: impl Into<ResponseInput>) -> ResponseRequest {
        let mut request = ResponseRequest::new(self.model.clone(), input);
        request.instructions = self.instructions.clone();
        request.previous_response_id = self.last_response_id.clone();
        request
    }

    /// Remembers the id of `response` for the next request.
    pub fn record(&mut self, response: &Response) {
        self.record_id(response.id.clone());
    }

    /// Remembers a response id obtained elsewhere, such as from a stream.
    pub fn record_id(&mut self, id: impl Into<String>) {
        let id = id.into();
        if !id.is_empty() {
            self.last_response_id = Some(id);
        }
    }

    /// Returns the id the next request will continue from.
    pub fn last_response_id(&self) -> Option<&str> {
        self.last_response_id.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn serializes_minimal_request() {
        let request = ResponseRequest::new("gpt-test", "hello").stream(true);
        let value = serde_json::to_value(&request).expect("serialize");
        assert_eq!(
            value,
            json!({"model": "gpt-test", "input": "hello", "stream": true})
        );
    }

    #[test]
    fn serializes_json_schema_format() {
        let schema = json!({"type": "object", "properties": {"x": {"type": "integer"}}});
        let request = ResponseRequest::new("gpt-test", vec![InputMessage::user("hi")])
            .json_schema("point", schema.clone(), true)
            .reasoning_effort(ReasoningEffort::Low);
        let value = serde_json::to_value(&request).expect("serialize");
        assert_eq!(
            value["text"]["format"],
            json!({"type": "json_schema", "name": "point", "schema": schema, "strict": true})
        );
        assert_eq!(value["input"], json!([{"role": "user", "content": "hi"}]));
        assert_eq!(value["reasoning"], json!({"effort": "low"}));
    }

    #[test]
    fn validate_rejects_empty_model_and_input() {
        assert!(matches!(
            ResponseRequest::new(" ", "hi").validate(),
            Err(ClientError::Validation(_))
        ));
        assert!(matches!(
            ResponseRequest::new("gpt-test", "").validate(),
            Err(ClientError::Validation(_))
        ));
        assert!(ResponseRequest::new("gpt-test", "hi").validate().is_ok());
    }

    #[test]
    fn conversation_links_last_response_id() {
        let mut conversation = Conversation::new("gpt-test").instructions("be brief");
        let first = conversation.request("hi");
        assert_eq!(first.previous_response_id, None);
        assert_eq!(first.instructions.as_deref(), Some("be brief"));

        conversation.record_id("resp_1");
        conversation.record_id("");
        let second = conversation.request("again");
        assert_eq!(second.previous_response_id.as_deref(), Some("resp_1"));
        assert_eq!(conversation.last_response_id(), Some("resp_1"));
    }
}

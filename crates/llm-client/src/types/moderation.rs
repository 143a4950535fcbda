use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ModerationInput {
    Text(String),
    Batch(Vec<String>),
}

/// Body of `POST v1/moderations`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModerationRequest {
    pub input: ModerationInput,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl ModerationRequest {
    /// Creates a request for one input string.
    pub fn new(input: impl Into<String>) -> Self {
        Self {
            input: ModerationInput::Text(input.into()),
            model: None,
        }
    }

    /// Creates a request classifying several inputs at once.
    pub fn batch(inputs: Vec<String>) -> Self {
        Self {
            input: ModerationInput::Batch(inputs),
            model: None,
        }
    }

    /// Selects the moderation model.
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ModerationResult {
    #[serde(default)]
    pub flagged: bool,
    #[serde(default)]
    pub categories: BTreeMap<String, bool>,
    #[serde(default)]
    pub category_scores: BTreeMap<String, f64>,
}

impl ModerationResult {
    /// Names of the categories marked true.
    pub fn flagged_categories(&self) -> impl Iterator<Item = &str> {
        self.categories
            .iter()
            .filter(|(_, flagged)| **flagged)
            .map(|(name, _)| name.as_str())
    }
}

/// Reply of `v1/moderations`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ModerationResponse {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub results: Vec<ModerationResult>,
}

impl ModerationResponse {
    /// Returns true when any result is flagged.
    pub fn flagged(&self) -> bool {
        self.results.iter().any(|r| r.flagged)
    }
}

//! Questions
//!
//! A typed prompt plus the rule that turns raw user text into an answer.
//! Questions are persisted verbatim into the continuation record so the
//! answer to a pending prompt is always checked against what the user saw.

use serde::{Deserialize, Serialize};

use crate::response::Response;

/// Question type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionKind {
    /// Answer must be one of the option labels
    Choice,
    /// Free text
    Short,
    /// Options are suggestions, any text is accepted
    LooseChoice,
}

/// One selectable option: the button label and the value it maps to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChoiceOption {
    pub label: String,
    pub value: String,
}

impl ChoiceOption {
    pub fn new(label: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            value: value.into(),
        }
    }

    /// Option whose label is also its value
    pub fn same(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            label: text.clone(),
            value: text,
        }
    }
}

/// Answer rejected by a question
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("選項不正確: {0}")]
    NotAnOption(String),

    #[error("請勿輸入控制字元")]
    ControlCharacter,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub kind: QuestionKind,
    pub key: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub options: Vec<ChoiceOption>,
}

impl Question {
    /// Free-text question keyed by its title
    pub fn short(title: &str) -> Self {
        Self {
            kind: QuestionKind::Short,
            key: title.to_string(),
            title: title.to_string(),
            description: String::new(),
            options: Vec::new(),
        }
    }

    pub fn choice(key: &str, title: &str, options: Vec<ChoiceOption>) -> Self {
        Self {
            kind: QuestionKind::Choice,
            key: key.to_string(),
            title: title.to_string(),
            description: String::new(),
            options,
        }
    }

    pub fn loose_choice(key: &str, title: &str, options: Vec<ChoiceOption>) -> Self {
        Self {
            kind: QuestionKind::LooseChoice,
            key: key.to_string(),
            title: title.to_string(),
            description: String::new(),
            options,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Choice kinds must carry at least one option
    pub fn is_well_formed(&self) -> bool {
        match self.kind {
            QuestionKind::Short => true,
            QuestionKind::Choice | QuestionKind::LooseChoice => !self.options.is_empty(),
        }
    }

    /// Check raw user text and map it to the answer value
    pub fn validate(&self, text: &str) -> Result<String, ValidationError> {
        match self.kind {
            QuestionKind::Choice => self
                .options
                .iter()
                .find(|opt| opt.label == text)
                .map(|opt| opt.value.clone())
                .ok_or_else(|| ValidationError::NotAnOption(text.to_string())),
            QuestionKind::LooseChoice => Ok(text.to_string()),
            QuestionKind::Short => {
                // Multi-line chat messages are fine
                if text.chars().any(|c| c.is_control() && c != '\n' && c != '\t') {
                    return Err(ValidationError::ControlCharacter);
                }
                Ok(text.to_string())
            }
        }
    }

    /// Prompt shown to the user
    pub fn to_response(&self) -> Response {
        let mut text = self.title.clone();
        if !self.description.is_empty() {
            text.push('\n');
            text.push_str(&self.description);
        }

        match self.kind {
            QuestionKind::Short => Response::text(text),
            QuestionKind::Choice | QuestionKind::LooseChoice => Response::choice(
                text,
                self.options.iter().map(|opt| opt.label.clone()).collect(),
            ),
        }
    }
}

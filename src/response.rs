//! Outbound Responses
//!
//! What the engine hands back to the transport for every inbound message:
//! plain text, or text plus an ordered list of choice buttons whose press
//! re-delivers the label as the next inbound message.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Response to send back through the messaging channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    /// Response content
    pub text: String,

    /// Button labels, rendered as quick replies (empty for plain text)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub choices: Vec<String>,
}

impl Response {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            choices: Vec::new(),
        }
    }

    pub fn choice(text: impl Into<String>, choices: Vec<String>) -> Self {
        Self {
            text: text.into(),
            choices,
        }
    }

    /// Does this response carry buttons?
    pub fn is_choice(&self) -> bool {
        !self.choices.is_empty()
    }

    /// Flatten a JSON summary into an indented text response
    pub fn summary(data: &Value) -> Self {
        Self::text(json_to_text(data, 0).trim())
    }
}

/// Render JSON as the flat `key: value` text the bot replies with.
///
/// Objects become one line per key, nested values indent by two spaces,
/// scalar arrays are joined with commas and object arrays are numbered
/// from zero.
pub fn json_to_text(data: &Value, indent: usize) -> String {
    match data {
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        Value::Object(map) => {
            let mut txt = String::new();
            for (key, value) in map {
                txt.push('\n');
                txt.push_str(&" ".repeat(indent));
                txt.push_str(key);
                txt.push_str(": ");
                txt.push_str(&json_to_text(value, indent + 2));
            }
            txt
        }
        Value::Array(items) => {
            let mut txt = String::new();
            let mut remaining = items.len();
            for (rank, value) in items.iter().enumerate() {
                if value.is_object() || value.is_array() {
                    txt.push_str(&" ".repeat(indent));
                    txt.push_str(&format!("{}. ", rank));
                    txt.push_str(&json_to_text(value, indent + 2));
                    txt.push('\n');
                } else {
                    txt.push_str(&json_to_text(value, indent + 2));
                    remaining -= 1;
                    if remaining > 0 {
                        txt.push(',');
                    }
                }
            }
            txt
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_summary_keeps_key_order() {
        let resp = Response::summary(&json!({
            "名稱": "Team1",
            "加入問題": ["A", "B"],
        }));
        assert_eq!(resp.text, "名稱: Team1\n加入問題: A,B");
        assert!(!resp.is_choice());
    }

    #[test]
    fn test_object_array_is_numbered() {
        let text = json_to_text(&json!([{"姓名": "a"}, {"姓名": "b"}]), 0);
        assert!(text.contains("0. \n  姓名: a"));
        assert!(text.contains("1. \n  姓名: b"));
    }

    #[test]
    fn test_choice_serializes_buttons() {
        let resp = Response::choice("pick", vec!["x".to_string()]);
        let value = serde_json::to_value(&resp).unwrap();
        assert_eq!(value["choices"][0], "x");

        let plain = serde_json::to_value(Response::text("hi")).unwrap();
        assert!(plain.get("choices").is_none());
    }
}

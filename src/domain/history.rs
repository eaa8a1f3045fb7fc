use serde::{Deserialize, Serialize};

use super::Answers;

/// Every response one user sent to one report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct History {
    pub id: String,
    pub report: String,
    pub user: String,
    #[serde(default)]
    pub history: Vec<Answers>,
}

impl History {
    pub fn key(report_id: &str, user_id: &str) -> String {
        format!("history-{}-{}", report_id, user_id)
    }

    pub fn new(report_id: &str, user_id: &str) -> Self {
        Self {
            id: Self::key(report_id, user_id),
            report: report_id.to_string(),
            user: user_id.to_string(),
            history: Vec::new(),
        }
    }

    pub fn add_response(&mut self, answers: Answers) {
        self.history.push(answers);
    }
}

//! Attendance Domain
//!
//! Aggregates the commands work on:
//! - `User` (`user-<identity>`): profile and joined teams
//! - `Team` (`team-<uuid>`): members, join questions, report index
//! - `Token` (`token-<uuid>`): what a join token grants
//! - `Report` (`report-<uuid>`): questions and latest response per member
//! - `History` (`history-<report>-<user>`): every response a member sent

mod history;
mod report;
mod team;
mod token;
mod user;

pub use history::History;
pub use report::Report;
pub use team::{Member, Team, TeamReport};
pub use token::{Token, TokenAction};
pub use user::{Membership, User};

use serde::{Deserialize, Serialize};
use std::fmt;

/// A member's role within a team
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Member,
}

impl Role {
    /// Label shown to users
    pub fn label(&self) -> &'static str {
        match self {
            Role::Admin => "管理員",
            Role::Member => "一般使用者",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Admin => write!(f, "admin"),
            Role::Member => write!(f, "member"),
        }
    }
}

/// Answers keyed by question title, in the order they were asked
pub type Answers = serde_json::Map<String, serde_json::Value>;

/// Turn `ask_many` output into an ordered answer map
pub fn answers_from(pairs: Vec<(String, String)>) -> Answers {
    pairs
        .into_iter()
        .map(|(key, value)| (key, serde_json::Value::String(value)))
        .collect()
}

/// Timestamp stamped on report responses
pub fn now_text() -> String {
    chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

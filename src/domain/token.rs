use serde::{Deserialize, Serialize};

use super::Role;

/// What redeeming a token does
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenAction {
    JoinTeamAdmin,
    JoinTeamMember,
}

impl TokenAction {
    pub fn role(&self) -> Role {
        match self {
            TokenAction::JoinTeamAdmin => Role::Admin,
            TokenAction::JoinTeamMember => Role::Member,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub id: String,
    pub action: TokenAction,
    pub team: String,
}

impl Token {
    pub const PREFIX: &'static str = "token-";

    pub fn new(id: &str, action: TokenAction, team: &str) -> Self {
        Self {
            id: id.to_string(),
            action,
            team: team.to_string(),
        }
    }

    /// Whether user text can name a token at all
    pub fn looks_like_token(text: &str) -> bool {
        text.starts_with(Self::PREFIX) && text.len() > Self::PREFIX.len()
    }
}

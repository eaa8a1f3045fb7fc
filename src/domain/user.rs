use serde::{Deserialize, Serialize};

use super::Role;
use crate::error::{Error, Result};
use crate::messenger::Profile;
use crate::question::{ChoiceOption, Question};

/// A team the user belongs to, with the roles held there
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
    pub id: String,
    pub name: String,
    pub roles: Vec<Role>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub identity: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub profile: Option<Profile>,
    #[serde(default)]
    pub teams: Vec<Membership>,
}

impl User {
    pub fn key(identity: &str) -> String {
        format!("user-{}", identity)
    }

    pub fn new(identity: &str) -> Self {
        Self {
            id: Self::key(identity),
            identity: identity.to_string(),
            name: None,
            profile: None,
            teams: Vec::new(),
        }
    }

    /// Display name, falling back to the identity
    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.identity)
    }

    pub fn update_profile(&mut self, profile: Profile) {
        self.name = Some(profile.display_name.clone());
        self.profile = Some(profile);
    }

    pub fn membership(&self, team_id: &str) -> Option<&Membership> {
        self.teams.iter().find(|t| t.id == team_id)
    }

    pub fn is_admin_of(&self, team_id: &str) -> bool {
        self.membership(team_id)
            .map(|t| t.roles.contains(&Role::Admin))
            .unwrap_or(false)
    }

    /// Record `role` in a team; holding it already is an error
    pub fn join(&mut self, team_id: &str, team_name: &str, role: Role) -> Result<()> {
        match self.teams.iter_mut().find(|t| t.id == team_id) {
            Some(joined) => {
                if joined.roles.contains(&role) {
                    return Err(Error::user(format!("你已經是此團隊的{}", role.label())));
                }
                joined.roles.push(role);
            }
            None => self.teams.push(Membership {
                id: team_id.to_string(),
                name: team_name.to_string(),
                roles: vec![role],
            }),
        }
        Ok(())
    }

    /// Returns false if the user was not in the team
    pub fn leave_team(&mut self, team_id: &str) -> bool {
        let before = self.teams.len();
        self.teams.retain(|t| t.id != team_id);
        self.teams.len() != before
    }

    /// "Which team" question, labels numbered from 1
    pub fn team_question(&self, admin_only: bool) -> Question {
        let options = self
            .teams
            .iter()
            .filter(|t| !admin_only || t.roles.contains(&Role::Admin))
            .enumerate()
            .map(|(i, t)| ChoiceOption::new(format!("({}) {}", i + 1, t.name), t.id.clone()))
            .collect();
        Question::choice("team_id", "選擇團隊", options)
    }
}

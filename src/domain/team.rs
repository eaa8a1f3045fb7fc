use serde::{Deserialize, Serialize};

use super::{Answers, Report, Role, User};
use crate::error::{Error, Result};
use crate::question::Question;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Member {
    /// User aggregate id
    pub id: String,
    pub identity: String,
    pub name: String,
    pub roles: Vec<Role>,
    /// Answers to the team's join questions (members only)
    #[serde(default)]
    pub answers: Answers,
    #[serde(default)]
    pub kicked: bool,
}

/// Entry in a team's report index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamReport {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub ended: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Team {
    pub id: String,
    pub name: String,
    pub join_questions: Vec<Question>,
    #[serde(default)]
    pub join_admin_token: String,
    #[serde(default)]
    pub join_member_token: String,
    #[serde(default)]
    pub members: Vec<Member>,
    #[serde(default)]
    pub reports: Vec<TeamReport>,
}

impl Team {
    pub const PREFIX: &'static str = "team-";

    pub fn new(id: &str, name: &str, join_questions: Vec<Question>) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            join_questions,
            join_admin_token: String::new(),
            join_member_token: String::new(),
            members: Vec::new(),
            reports: Vec::new(),
        }
    }

    /// Add `user` with `role`. A kicked user rejoins from scratch.
    pub fn join(&mut self, user: &User, role: Role, answers: Answers) -> Result<()> {
        match self.members.iter_mut().find(|m| m.id == user.id) {
            Some(member) if member.kicked => {
                member.name = user.name().to_string();
                member.roles = vec![role];
                member.answers = answers;
                member.kicked = false;
            }
            Some(member) => {
                if member.roles.contains(&role) {
                    return Err(Error::user(format!("你已經是此團隊的{}", role.label())));
                }
                member.roles.push(role);
                if role == Role::Member {
                    member.answers = answers;
                }
            }
            None => self.members.push(Member {
                id: user.id.clone(),
                identity: user.identity.clone(),
                name: user.name().to_string(),
                roles: vec![role],
                answers,
                kicked: false,
            }),
        }
        Ok(())
    }

    /// Mark a member as kicked; their record stays for old reports
    pub fn kick(&mut self, user_id: &str) -> Result<()> {
        match self.members.iter_mut().find(|m| m.id == user_id && !m.kicked) {
            Some(member) => {
                member.kicked = true;
                Ok(())
            }
            None => Err(Error::user("找不到此成員")),
        }
    }

    /// Members still in the team, in join order
    pub fn active_members(&self) -> impl Iterator<Item = &Member> {
        self.members.iter().filter(|m| !m.kicked)
    }

    pub fn member(&self, user_id: &str) -> Option<&Member> {
        self.members.iter().find(|m| m.id == user_id)
    }

    /// Identities to notify about team events
    pub fn member_identities(&self) -> Vec<String> {
        self.active_members().map(|m| m.identity.clone()).collect()
    }

    pub fn add_report(&mut self, report: &Report) {
        self.reports.push(TeamReport {
            id: report.id.clone(),
            name: report.name.clone(),
            ended: false,
        });
    }

    pub fn end_report(&mut self, report_id: &str) -> Result<()> {
        let report = self
            .reports
            .iter_mut()
            .find(|r| r.id == report_id)
            .ok_or_else(|| Error::internal(format!("{} not indexed by {}", report_id, self.id)))?;
        if report.ended {
            return Err(Error::user("此回報已結束"));
        }
        report.ended = true;
        Ok(())
    }

    pub fn list_reports(&self, only_open: bool) -> impl Iterator<Item = &TeamReport> {
        self.reports.iter().filter(move |r| !only_open || !r.ended)
    }

    pub fn join_titles(&self) -> Vec<String> {
        self.join_questions.iter().map(|q| q.title.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::answers_from;

    fn team() -> Team {
        Team::new("team-1", "Team1", vec![Question::short("學號")])
    }

    #[test]
    fn test_join_roles_accumulate() {
        let mut team = team();
        let user = User::new("u1");
        team.join(&user, Role::Admin, Answers::new()).unwrap();
        assert!(team.join(&user, Role::Admin, Answers::new()).is_err());

        let answers = answers_from(vec![("學號".to_string(), "42".to_string())]);
        team.join(&user, Role::Member, answers).unwrap();
        let member = team.member(&user.id).unwrap();
        assert_eq!(member.roles, vec![Role::Admin, Role::Member]);
        assert_eq!(member.answers["學號"], "42");
    }

    #[test]
    fn test_kicked_member_rejoins_fresh() {
        let mut team = team();
        let user = User::new("u1");
        team.join(&user, Role::Member, Answers::new()).unwrap();
        team.kick(&user.id).unwrap();
        assert_eq!(team.active_members().count(), 0);
        assert!(team.kick(&user.id).is_err());

        team.join(&user, Role::Member, Answers::new()).unwrap();
        assert_eq!(team.active_members().count(), 1);
        assert_eq!(team.members.len(), 1);
    }

    #[test]
    fn test_end_report_twice_fails() {
        let mut team = team();
        team.reports.push(TeamReport {
            id: "report-1".to_string(),
            name: "4/26".to_string(),
            ended: false,
        });
        team.end_report("report-1").unwrap();
        assert!(matches!(team.end_report("report-1"), Err(Error::UserInput(_))));
        assert_eq!(team.list_reports(true).count(), 0);
        assert_eq!(team.list_reports(false).count(), 1);
    }
}

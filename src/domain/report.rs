use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{Answers, Team};
use crate::error::{Error, Result};
use crate::question::Question;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub id: String,
    pub name: String,
    pub team: String,
    pub team_name: String,
    #[serde(default)]
    pub ended: bool,
    pub questions: Vec<Question>,
    /// Latest response per user id
    #[serde(default)]
    pub responses: BTreeMap<String, Answers>,
}

impl Report {
    pub const PREFIX: &'static str = "report-";

    pub fn new(id: &str, name: &str, team: &Team, questions: Vec<Question>) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            team: team.id.clone(),
            team_name: team.name.clone(),
            ended: false,
            questions,
            responses: BTreeMap::new(),
        }
    }

    /// Replace the user's response; closed reports refuse it
    pub fn add_response(&mut self, user_id: &str, answers: Answers) -> Result<()> {
        if self.ended {
            return Err(Error::user("此回報已結束"));
        }
        self.responses.insert(user_id.to_string(), answers);
        Ok(())
    }

    pub fn end(&mut self) -> Result<()> {
        if self.ended {
            return Err(Error::user("此回報已結束"));
        }
        self.ended = true;
        Ok(())
    }

    pub fn response(&self, user_id: &str) -> Option<&Answers> {
        self.responses.get(user_id)
    }

    pub fn titles(&self) -> Vec<String> {
        self.questions.iter().map(|q| q.title.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::answers_from;

    #[test]
    fn test_closed_report_refuses_responses() {
        let team = Team::new("team-1", "Team1", Vec::new());
        let mut report = Report::new("report-1", "4/26", &team, vec![Question::short("地點")]);
        let answers = answers_from(vec![("地點".to_string(), "home".to_string())]);

        report.add_response("user-u1", answers.clone()).unwrap();
        report.end().unwrap();
        assert!(report.end().is_err());
        assert!(matches!(
            report.add_response("user-u1", answers),
            Err(Error::UserInput(_))
        ));
        assert_eq!(report.response("user-u1").unwrap()["地點"], "home");
    }
}

//! Attendance Commands
//!
//! Team management and roll-call reports. Each command re-runs from its first
//! line every turn; anything that writes happens after its last `ask`.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::aggregate::Aggregate;
use crate::command::{Command, CommandRegistry, RegistryError};
use crate::context::Context;
use crate::domain::{
    answers_from, now_text, Answers, History, Report, Role, Team, Token, TokenAction, User,
};
use crate::error::{Error, Result};
use crate::question::{ChoiceOption, Question};
use crate::response::Response;

/// Slot prefix for a team's join questions
const JOIN_PREFIX: &str = "join-";

/// Slot prefix for a report's questions
const RESPONSE_PREFIX: &str = "response-";

/// Build the registry with every attendance command
pub fn registry() -> std::result::Result<CommandRegistry, RegistryError> {
    let mut registry = CommandRegistry::new();
    registry.register(&["create team", "新增團隊"], Arc::new(CreateTeam))?;
    registry.register(&["join team", "加入團隊"], Arc::new(JoinTeam))?;
    registry.register(&["list member", "列出團隊成員"], Arc::new(ListMember))?;
    registry.register(&["kick member", "踢除隊員"], Arc::new(KickMember))?;
    registry.register(&["leave team", "離開團隊"], Arc::new(LeaveTeam))?;
    registry.register(&["create report", "新增回報"], Arc::new(CreateReport))?;
    registry.register(&["response report", "回報"], Arc::new(ResponseReport))?;
    registry.register(&["inspect report", "檢視回報"], Arc::new(InspectReport))?;
    registry.register(&["end report", "結束回報"], Arc::new(EndReport))?;
    Ok(registry)
}

/// Current user document (a fresh one for first-time users)
async fn load_user(user: &mut Aggregate<User>, identity: &str) -> Result<User> {
    Ok(user.get_or_insert_with(|| User::new(identity)).await?.clone())
}

/// Ask a choice question unless there is nothing to choose. A single
/// candidate is taken as-is and memoized.
async fn pick(ctx: &mut Context, question: Question, none: &str) -> Result<String> {
    if ctx.has_slot(&question.key, "") {
        return ctx.ask(question).await;
    }
    match question.options.len() {
        0 => Err(Error::user(none)),
        1 => {
            let value = question.options[0].value.clone();
            ctx.record_answer(&question, "", &value);
            Ok(value)
        }
        _ => ctx.ask(question).await,
    }
}

async fn choose_team(ctx: &mut Context, me: &User, admin_only: bool) -> Result<String> {
    let none = if admin_only {
        "你在你的團隊中都沒有管理員權限"
    } else {
        "你還沒有加入任何團隊"
    };
    pick(ctx, me.team_question(admin_only), none).await
}

async fn choose_report(ctx: &mut Context, me: &User, only_open: bool) -> Result<String> {
    let mut options = Vec::new();
    if !ctx.has_slot("report_id", "") {
        for membership in &me.teams {
            let mut handle = ctx.aggregate::<Team>(&membership.id);
            let Some(team) = handle.try_get().await? else {
                continue;
            };
            for report in team.list_reports(only_open) {
                let label = format!("({}) {}", options.len() + 1, report.name);
                options.push(ChoiceOption::new(label, report.id.clone()));
            }
        }
    }
    let question = Question::choice("report_id", "選擇回報", options);
    pick(ctx, question, "目前在你的團隊中都沒有需要回報的").await
}

async fn issue_token(ctx: &Context, action: TokenAction, team_id: &str) -> Result<String> {
    let mut token = ctx
        .create::<Token>(Token::PREFIX, |id| Token::new(id, action, team_id))
        .await?;
    token.save().await?;
    Ok(token.id().to_string())
}

/// Add the current user to `team`. The team side is written first, under its
/// lock, since that is where a concurrent join could collide.
async fn join_team(
    ctx: &Context,
    user: &mut Aggregate<User>,
    team: &mut Aggregate<Team>,
    role: Role,
    answers: Answers,
) -> Result<()> {
    let identity = ctx.identity().to_string();
    let profile = ctx.profile().await;

    let mut me = load_user(user, &identity).await?;
    if let Some(profile) = profile.clone() {
        me.update_profile(profile);
    }

    let team_name = team
        .update(|t| {
            t.join(&me, role, answers)?;
            Ok(t.name.clone())
        })
        .await?;

    let team_id = team.id().to_string();
    user.upsert(
        || User::new(&identity),
        |u| {
            if let Some(profile) = profile {
                u.update_profile(profile);
            }
            u.join(&team_id, &team_name, role)
        },
    )
    .await
}

/// `create team`: name the team, list what members fill in when joining
pub struct CreateTeam;

#[async_trait]
impl Command for CreateTeam {
    async fn run(&self, user: &mut Aggregate<User>, ctx: &mut Context) -> Result<Response> {
        let name = ctx.ask(Question::short("團隊名稱")).await?;
        let items = ctx
            .continue_ask(
                "項目",
                "請輸入加入團隊所需填寫的項目 (可自行填寫)",
                &["學號", "姓名", "電話"],
            )
            .await?;
        let questions = items.iter().map(|item| Question::short(item)).collect();

        let mut team = ctx
            .create::<Team>(Team::PREFIX, |id| Team::new(id, &name, questions))
            .await?;
        let admin_token = issue_token(ctx, TokenAction::JoinTeamAdmin, team.id()).await?;
        let member_token = issue_token(ctx, TokenAction::JoinTeamMember, team.id()).await?;
        {
            let doc = team.get_mut().await?;
            doc.join_admin_token = admin_token;
            doc.join_member_token = member_token;
        }
        team.save().await?;

        join_team(ctx, user, &mut team, Role::Admin, Answers::new()).await?;

        let doc = team.get().await?;
        Ok(Response::summary(&json!({
            "名稱": doc.name,
            "加入token": doc.join_member_token,
            "加入token(for 管理者)": doc.join_admin_token,
            "加入問題": doc.join_titles(),
        })))
    }
}

/// `join team`: redeem a token, answer the team's join questions
pub struct JoinTeam;

#[async_trait]
impl Command for JoinTeam {
    async fn run(&self, user: &mut Aggregate<User>, ctx: &mut Context) -> Result<Response> {
        let text = ctx.ask(Question::short("請輸入token")).await?;
        if !Token::looks_like_token(&text) {
            return Err(Error::user("Token 不正確"));
        }
        let mut token = ctx.aggregate::<Token>(&text);
        let Some(token) = token.try_get().await?.cloned() else {
            return Err(Error::user("Token 不正確"));
        };
        let role = token.action.role();

        let mut team = ctx.aggregate::<Team>(&token.team);
        let joined = team.get().await?.clone();
        let me = load_user(user, ctx.identity()).await?;
        if let Some(member) = joined.member(&me.id) {
            if !member.kicked && member.roles.contains(&role) {
                return Err(Error::user(format!("你已經是此團隊的{}", role.label())));
            }
        }

        let answers = match role {
            Role::Admin => Answers::new(),
            Role::Member => answers_from(ctx.ask_many(&joined.join_questions, JOIN_PREFIX).await?),
        };

        join_team(ctx, user, &mut team, role, answers.clone()).await?;

        let me = load_user(user, ctx.identity()).await?;
        let mut summary = json!({
            "已成功加入": joined.name,
            "角色": role.label(),
            "姓名": me.name(),
        });
        if let Value::Object(map) = &mut summary {
            map.extend(answers);
        }
        Ok(Response::summary(&summary))
    }
}

/// `list member` (admin)
pub struct ListMember;

#[async_trait]
impl Command for ListMember {
    async fn run(&self, user: &mut Aggregate<User>, ctx: &mut Context) -> Result<Response> {
        let me = load_user(user, ctx.identity()).await?;
        let team_id = choose_team(ctx, &me, true).await?;

        let mut team = ctx.aggregate::<Team>(&team_id);
        let members: Vec<Value> = team
            .get()
            .await?
            .active_members()
            .map(|m| {
                json!({
                    "姓名": m.name,
                    "權限": m.roles,
                    "加入資料": m.answers,
                })
            })
            .collect();
        Ok(Response::summary(&Value::Array(members)))
    }
}

/// `kick member` (admin): pick a member by number
pub struct KickMember;

#[async_trait]
impl Command for KickMember {
    async fn run(&self, user: &mut Aggregate<User>, ctx: &mut Context) -> Result<Response> {
        let me = load_user(user, ctx.identity()).await?;
        let team_id = choose_team(ctx, &me, true).await?;
        let mut team = ctx.aggregate::<Team>(&team_id);

        // The numbering the admin sees is frozen in the stored question
        let mut question = Question::choice("user_id", "請輸入編號", Vec::new());
        if !ctx.has_slot("user_id", "") {
            let doc = team.get().await?;
            let members: Vec<_> = doc.active_members().collect();
            question.options = members
                .iter()
                .enumerate()
                .map(|(i, m)| ChoiceOption::new((i + 1).to_string(), m.id.clone()))
                .collect();
            question.description = members
                .iter()
                .enumerate()
                .map(|(i, m)| format!("{}. {}", i + 1, m.name))
                .collect::<Vec<_>>()
                .join("\n");
        }
        let target = ctx.ask(question).await?;

        let (name, identity) = team
            .update(|t| {
                t.kick(&target)?;
                let member = t
                    .member(&target)
                    .ok_or_else(|| Error::internal(format!("{} vanished from {}", target, t.id)))?;
                Ok((member.name.clone(), member.identity.clone()))
            })
            .await?;

        let mut kicked = ctx.aggregate::<User>(&target);
        kicked
            .upsert(
                || User::new(&identity),
                |u| {
                    u.leave_team(&team_id);
                    Ok(())
                },
            )
            .await?;

        Ok(Response::summary(&json!({ "踢除": name })))
    }
}

/// `leave team`
pub struct LeaveTeam;

#[async_trait]
impl Command for LeaveTeam {
    async fn run(&self, user: &mut Aggregate<User>, ctx: &mut Context) -> Result<Response> {
        let me = load_user(user, ctx.identity()).await?;
        let team_id = choose_team(ctx, &me, false).await?;

        let mut team = ctx.aggregate::<Team>(&team_id);
        let team_name = team
            .update(|t| {
                t.kick(&me.id)?;
                Ok(t.name.clone())
            })
            .await?;

        let identity = ctx.identity().to_string();
        user.upsert(
            || User::new(&identity),
            |u| {
                u.leave_team(&team_id);
                Ok(())
            },
        )
        .await?;

        Ok(Response::summary(&json!({ "離開": team_name })))
    }
}

/// `create report` (admin): title and questions, then tell the team
pub struct CreateReport;

#[async_trait]
impl Command for CreateReport {
    async fn run(&self, user: &mut Aggregate<User>, ctx: &mut Context) -> Result<Response> {
        let me = load_user(user, ctx.identity()).await?;
        let team_id = choose_team(ctx, &me, true).await?;
        let name = ctx.ask(Question::short("回報標題")).await?;
        let items = ctx
            .continue_ask("項目", "請輸入回報所需填寫的項目 (可自行填寫)", &["地點", "喝酒"])
            .await?;
        let questions = items.iter().map(|item| Question::short(item)).collect();

        let mut team = ctx.aggregate::<Team>(&team_id);
        let snapshot = team.get().await?.clone();
        let mut report = ctx
            .create::<Report>(Report::PREFIX, |id| Report::new(id, &name, &snapshot, questions))
            .await?;
        report.save().await?;

        let doc = report.get().await?.clone();
        let (team_name, members) = team
            .update(|t| {
                t.add_report(&doc);
                Ok((t.name.clone(), t.member_identities()))
            })
            .await?;

        ctx.notify(&members, &format!("{} 的 {} 已開始", team_name, doc.name))
            .await;

        Ok(Response::summary(&json!({
            "回報名稱": doc.name,
            "回報問題": items,
        })))
    }
}

/// `response report`: answer an open report
pub struct ResponseReport;

#[async_trait]
impl Command for ResponseReport {
    async fn run(&self, user: &mut Aggregate<User>, ctx: &mut Context) -> Result<Response> {
        let me = load_user(user, ctx.identity()).await?;
        let report_id = choose_report(ctx, &me, true).await?;

        let mut report = ctx.aggregate::<Report>(&report_id);
        let questions = report.get().await?.questions.clone();
        let mut answers = answers_from(ctx.ask_many(&questions, RESPONSE_PREFIX).await?);
        answers.insert("time".to_string(), Value::String(now_text()));

        // Closed reports are refused here, before any history is written
        let report_name = report
            .update(|r| {
                r.add_response(&me.id, answers.clone())?;
                Ok(r.name.clone())
            })
            .await?;

        let mut history = ctx.aggregate::<History>(&History::key(&report_id, &me.id));
        history
            .upsert(
                || History::new(&report_id, &me.id),
                |h| {
                    h.add_response(answers.clone());
                    Ok(())
                },
            )
            .await?;

        let mut summary = json!({ "回報": report_name });
        if let Value::Object(map) = &mut summary {
            map.extend(answers);
        }
        Ok(Response::summary(&summary))
    }
}

/// `inspect report`: admins see everyone (optionally filtered), members
/// see their own row
pub struct InspectReport;

#[async_trait]
impl Command for InspectReport {
    async fn run(&self, user: &mut Aggregate<User>, ctx: &mut Context) -> Result<Response> {
        let me = load_user(user, ctx.identity()).await?;
        let report_id = choose_report(ctx, &me, false).await?;

        let report = ctx.aggregate::<Report>(&report_id).get().await?.clone();
        let team = ctx.aggregate::<Team>(&report.team).get().await?.clone();
        let is_admin = me.is_admin_of(&report.team);

        let mut filter: Option<(bool, String, String)> = None;
        if is_admin {
            let mode = ctx
                .ask(Question::choice(
                    "filter",
                    "篩選機制",
                    vec![
                        ChoiceOption::new("全部", "all"),
                        ChoiceOption::new("包含", "include"),
                        ChoiceOption::new("排除", "exclude"),
                    ],
                ))
                .await?;

            if mode != "all" {
                let mut titles = report.titles();
                for title in team.join_titles() {
                    if !titles.contains(&title) {
                        titles.push(title);
                    }
                }
                if titles.is_empty() && !ctx.has_slot("item", "") {
                    return Err(Error::user("此回報沒有可篩選的項目"));
                }
                let item = ctx
                    .ask(Question::choice(
                        "item",
                        "對象",
                        titles.into_iter().map(ChoiceOption::same).collect(),
                    ))
                    .await?;
                let value = ctx.ask(Question::short("值")).await?;
                filter = Some((mode == "include", item, value));
            }
        }

        let user_ids: BTreeSet<String> = if is_admin {
            report
                .responses
                .keys()
                .cloned()
                .chain(team.active_members().map(|m| m.id.clone()))
                .collect()
        } else {
            [me.id.clone()].into()
        };

        let mut rows: Vec<Answers> = user_ids
            .iter()
            .map(|user_id| {
                let mut row = Answers::new();
                let name = team.member(user_id).map(|m| m.name.as_str()).unwrap_or(user_id.as_str());
                row.insert("成員".to_string(), Value::String(name.to_string()));
                if let Some(member) = team.member(user_id) {
                    row.extend(member.answers.clone());
                }
                if let Some(response) = report.response(user_id) {
                    row.extend(response.clone());
                }
                row
            })
            .filter(|row| match &filter {
                None => true,
                Some((include, item, value)) => {
                    let field = row.get(item).and_then(Value::as_str).unwrap_or("");
                    field.contains(value.as_str()) == *include
                }
            })
            .collect();
        rows.sort_by(|a, b| {
            let key = |row: &Answers| row.get("成員").and_then(Value::as_str).unwrap_or("").to_string();
            key(a).cmp(&key(b))
        });

        Ok(Response::summary(&Value::Array(
            rows.into_iter().map(Value::Object).collect(),
        )))
    }
}

/// `end report` (admin of the report's team)
pub struct EndReport;

#[async_trait]
impl Command for EndReport {
    async fn run(&self, user: &mut Aggregate<User>, ctx: &mut Context) -> Result<Response> {
        let me = load_user(user, ctx.identity()).await?;
        let report_id = choose_report(ctx, &me, true).await?;

        let mut report = ctx.aggregate::<Report>(&report_id);
        let team_id = report.get().await?.team.clone();
        if !me.is_admin_of(&team_id) {
            return Err(Error::user("你不是此回報的管理員"));
        }

        let (name, team_name) = report
            .update(|r| {
                r.end()?;
                Ok((r.name.clone(), r.team_name.clone()))
            })
            .await?;

        let mut team = ctx.aggregate::<Team>(&team_id);
        let members = team
            .update(|t| {
                t.end_report(&report_id)?;
                Ok(t.member_identities())
            })
            .await?;

        ctx.notify(&members, &format!("{} 的 {} 已結束", team_name, name))
            .await;

        Ok(Response::text(format!("{} 已結束", name)))
    }
}

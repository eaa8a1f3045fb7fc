//! Suspension Engine
//!
//! `Context` is what a command sees during one turn. Its `ask` family lets
//! a command read as straight-line code while the transport only ever
//! delivers one message at a time:
//!
//! 1. **Answered**: the recorded answer is returned, no prompt, no I/O
//! 2. **Pending**: this turn's text is validated against the stored question,
//!    recorded and returned
//! 3. **New**: the question is stored and the command unwinds with
//!    [`Error::Suspended`] carrying the prompt
//!
//! Every turn replays the command from its first line. Code before the next
//! unanswered `ask` must therefore depend only on recorded answers, and
//! once-only side effects belong after the last `ask`.

use std::sync::Arc;
use tracing::{debug, warn};

use crate::aggregate::{Aggregate, Document};
use crate::error::{Error, Result};
use crate::messenger::{Messenger, Profile};
use crate::question::{ChoiceOption, Question};
use crate::store::{KeyValueStore, LockConfig};
use crate::talk::{LoopState, Talk};

/// Option that ends a `continue_ask` loop
pub const LOOP_DONE: &str = "結束";

/// Slot key used by every `continue_ask` iteration
const LOOP_QUESTION_KEY: &str = "continue_text";

pub struct Context {
    identity: String,
    text: String,
    /// Set once this turn's text has answered a pending question
    consumed: bool,
    talk: Talk,
    store: Arc<dyn KeyValueStore>,
    lock_config: LockConfig,
    messenger: Arc<dyn Messenger>,
}

impl Context {
    pub fn new(
        identity: &str,
        text: &str,
        talk: Talk,
        store: Arc<dyn KeyValueStore>,
        lock_config: LockConfig,
        messenger: Arc<dyn Messenger>,
    ) -> Self {
        Self {
            identity: identity.to_string(),
            text: text.to_string(),
            consumed: false,
            talk,
            store,
            lock_config,
            messenger,
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// This turn's incoming text
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn talk(&self) -> &Talk {
        &self.talk
    }

    pub fn into_talk(self) -> Talk {
        self.talk
    }

    /// Ask one question, resuming or suspending as needed
    pub async fn ask(&mut self, question: Question) -> Result<String> {
        self.ask_with(question, "", false).await
    }

    /// Ask with an explicit batch prefix. With `clear`, the slot is forgotten
    /// as soon as it is answered so the same `(prefix, key)` can be asked
    /// again in a loop.
    pub async fn ask_with(&mut self, question: Question, prefix: &str, clear: bool) -> Result<String> {
        let slot = Talk::slot(prefix, &question.key);

        if let Some(answer) = self.talk.answer(&slot) {
            return Ok(answer.to_string());
        }

        if let Some(asked) = self.talk.question(&slot) {
            if self.consumed {
                // The text already answered an earlier slot this turn
                return Err(Error::Suspended(asked.to_response()));
            }
            let answer = asked.validate(&self.text)?;
            self.consumed = true;

            if clear {
                self.talk.remove_slot(&slot);
            } else {
                self.talk.set_answer(&slot, &answer);
            }
            self.talk.save().await?;
            debug!("{} answered {}", self.identity, slot);
            return Ok(answer);
        }

        if !question.is_well_formed() {
            return Err(Error::internal(format!("question {} has no options", slot)));
        }

        let prompt = question.to_response();
        self.talk.set_question(&slot, question);
        self.talk.save().await?;
        debug!("{} asked {}", self.identity, slot);
        Err(Error::Suspended(prompt))
    }

    /// Ask several questions in order; answers come back in the same order
    pub async fn ask_many(&mut self, questions: &[Question], prefix: &str) -> Result<Vec<(String, String)>> {
        let mut answers = Vec::with_capacity(questions.len());
        for question in questions {
            let key = question.key.clone();
            let answer = self.ask_with(question.clone(), prefix, false).await?;
            answers.push((key, answer));
        }
        Ok(answers)
    }

    /// Collect free-form items until the user picks [`LOOP_DONE`].
    ///
    /// Suggestions are offered as buttons; duplicates are ignored. Once
    /// finished, later replays return the collected items directly.
    pub async fn continue_ask(
        &mut self,
        title: &str,
        description: &str,
        suggestions: &[&str],
    ) -> Result<Vec<String>> {
        let name = format!("continue-{}", title);
        let prefix = format!("{}-", name);

        loop {
            let mut state: LoopState = self.talk.loop_state(&name);
            if state.finished {
                return Ok(state.items);
            }

            let options = suggestions
                .iter()
                .map(|s| ChoiceOption::same(*s))
                .chain(std::iter::once(ChoiceOption::same(LOOP_DONE)))
                .collect();
            let question = Question::loose_choice(LOOP_QUESTION_KEY, title, options)
                .with_description(description);

            let answer = self.ask_with(question, &prefix, true).await?;
            if answer == LOOP_DONE {
                state.finished = true;
                let items = state.items.clone();
                self.talk.set_loop_state(&name, state);
                return Ok(items);
            }
            if state.items.contains(&answer) {
                continue;
            }
            state.items.push(answer);
            self.talk.set_loop_state(&name, state);
        }
    }

    /// Memoize an answer the command chose itself, so replays take the
    /// same path even if the inputs behind the choice change
    pub fn record_answer(&mut self, question: &Question, prefix: &str, value: &str) {
        let slot = Talk::slot(prefix, &question.key);
        self.talk.set_answer(&slot, value);
    }

    /// The stored copy of an asked question
    pub fn question(&self, key: &str, prefix: &str) -> Option<&Question> {
        self.talk.question(&Talk::slot(prefix, key))
    }

    /// Whether `(prefix, key)` was already asked or answered in this conversation
    pub fn has_slot(&self, key: &str, prefix: &str) -> bool {
        let slot = Talk::slot(prefix, key);
        self.talk.answer(&slot).is_some() || self.talk.question(&slot).is_some()
    }

    pub fn store(&self) -> Arc<dyn KeyValueStore> {
        self.store.clone()
    }

    /// Lazy handle on an existing aggregate
    pub fn aggregate<D: Document>(&self, id: &str) -> Aggregate<D> {
        Aggregate::load(self.store.clone(), self.lock_config.clone(), id)
    }

    /// New aggregate under a fresh id (not saved yet)
    pub async fn create<D: Document>(
        &self,
        prefix: &str,
        build: impl FnOnce(&str) -> D + Send,
    ) -> Result<Aggregate<D>> {
        Aggregate::create(self.store.clone(), self.lock_config.clone(), prefix, build).await
    }

    /// Profile of the current user, if the platform provides one
    pub async fn profile(&self) -> Option<Profile> {
        match self.messenger.profile(&self.identity).await {
            Ok(profile) => profile,
            Err(e) => {
                warn!("Profile lookup for {} failed: {}", self.identity, e);
                None
            }
        }
    }

    /// Push a text to several users. Failures are logged, not raised:
    /// the command's own work is already committed.
    pub async fn notify(&self, identities: &[String], text: &str) {
        if identities.is_empty() {
            return;
        }
        if let Err(e) = self.messenger.multicast(identities, text).await {
            warn!("Notify {} users failed: {}", identities.len(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messenger::NullMessenger;
    use crate::question::ValidationError;
    use crate::store::MemoryStore;

    async fn turn(store: &Arc<dyn KeyValueStore>, text: &str) -> Context {
        let talk = Talk::load(store.clone(), "u1", None).await.unwrap();
        Context::new(
            "u1",
            text,
            talk,
            store.clone(),
            LockConfig::default(),
            Arc::new(NullMessenger),
        )
    }

    fn color() -> Question {
        Question::choice(
            "color",
            "顏色",
            vec![ChoiceOption::new("紅", "red"), ChoiceOption::new("藍", "blue")],
        )
    }

    #[tokio::test]
    async fn test_ask_suspends_then_resumes() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());

        let mut ctx = turn(&store, "start").await;
        match ctx.ask(color()).await {
            Err(Error::Suspended(prompt)) => assert_eq!(prompt.choices, vec!["紅", "藍"]),
            other => panic!("expected suspension, got {:?}", other),
        }

        let mut ctx = turn(&store, "藍").await;
        assert_eq!(ctx.ask(color()).await.unwrap(), "blue");
        // Memoized: asking again returns the same value with no prompt
        assert_eq!(ctx.ask(color()).await.unwrap(), "blue");

        let mut ctx = turn(&store, "whatever").await;
        assert_eq!(ctx.ask(color()).await.unwrap(), "blue");
    }

    #[tokio::test]
    async fn test_empty_answer_is_memoized() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let mut ctx = turn(&store, "").await;
        assert!(ctx.ask(Question::short("備註")).await.is_err());

        let mut ctx = turn(&store, "").await;
        assert_eq!(ctx.ask(Question::short("備註")).await.unwrap(), "");
        let mut ctx = turn(&store, "later").await;
        assert_eq!(ctx.ask(Question::short("備註")).await.unwrap(), "");
    }

    #[tokio::test]
    async fn test_validation_uses_stored_question() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let mut ctx = turn(&store, "start").await;
        let _ = ctx.ask(color()).await;

        // The replayed question lost an option; the prompt the user saw wins
        let narrowed = Question::choice("color", "顏色", vec![ChoiceOption::new("紅", "red")]);
        let mut ctx = turn(&store, "藍").await;
        assert_eq!(ctx.ask(narrowed).await.unwrap(), "blue");
    }

    #[tokio::test]
    async fn test_invalid_answer_keeps_slot() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let mut ctx = turn(&store, "start").await;
        let _ = ctx.ask(color()).await;
        let before = turn(&store, "").await.talk().record().clone();

        let mut ctx = turn(&store, "綠").await;
        let err = ctx.ask(color()).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Validation(ValidationError::NotAnOption(_))
        ));
        let after = turn(&store, "").await.talk().record().clone();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_text_answers_only_one_slot_per_turn() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let mut talk = Talk::load(store.clone(), "u1", None).await.unwrap();
        talk.set_question("a", Question::short("a"));
        talk.set_question("b", Question::short("b"));
        talk.save().await.unwrap();

        let mut ctx = turn(&store, "x").await;
        assert_eq!(ctx.ask(Question::short("a")).await.unwrap(), "x");
        assert!(matches!(
            ctx.ask(Question::short("b")).await,
            Err(Error::Suspended(_))
        ));
    }

    #[tokio::test]
    async fn test_choice_without_options_is_internal() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let mut ctx = turn(&store, "start").await;
        let empty = Question::choice("team_id", "選擇團隊", Vec::new());
        assert!(matches!(ctx.ask(empty).await, Err(Error::Internal(_))));
    }

    #[tokio::test]
    async fn test_continue_ask_collects_unique_items() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());

        let mut result = None;
        for text in ["start", "A", "B", "A", LOOP_DONE] {
            let mut ctx = turn(&store, text).await;
            match ctx.continue_ask("項目", "", &["A", "B"]).await {
                Ok(items) => result = Some(items),
                Err(Error::Suspended(prompt)) => {
                    assert_eq!(prompt.choices, vec!["A", "B", LOOP_DONE]);
                }
                Err(e) => panic!("unexpected error: {}", e),
            }
            // Persist whatever the turn left in memory, as a suspension would
            ctx.into_talk().save().await.unwrap();
        }

        assert_eq!(result.unwrap(), vec!["A", "B"]);
    }

    #[tokio::test]
    async fn test_finished_loop_is_memoized_for_later_asks() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let inputs = ["start", "x", LOOP_DONE, "final"];
        let mut last = None;

        for text in inputs {
            let mut ctx = turn(&store, text).await;
            let outcome = async {
                let items = ctx.continue_ask("項目", "", &[]).await?;
                let note = ctx.ask(Question::short("備註")).await?;
                Ok::<_, Error>((items, note))
            }
            .await;
            if let Ok(done) = outcome {
                last = Some(done);
            }
        }

        let (items, note) = last.unwrap();
        assert_eq!(items, vec!["x"]);
        assert_eq!(note, "final");
    }
}

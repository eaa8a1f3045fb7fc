//! Continuation Store
//!
//! Keeps, per identity, which command is in progress and every question
//! asked and answered so far. This record is the only memory a command has
//! between messages: each turn replays the command from the top and the
//! recorded answers let it skip straight to the next open question.
//!
//! Structure (`talk-<identity>`):
//! ```text
//! keyword:   command keyword being continued
//! questions: prefix+key -> Question (prompt already sent)
//! answers:   prefix+key -> validated answer
//! loops:     loop name  -> items collected so far, finished flag
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::question::Question;
use crate::store::{get_doc, set_doc, KeyValueStore, StoreError};

/// Accumulator for an open-ended `continue_ask` loop
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopState {
    pub items: Vec<String>,
    pub finished: bool,
}

/// Persisted continuation record
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TalkRecord {
    #[serde(default)]
    pub keyword: String,
    #[serde(default)]
    pub questions: BTreeMap<String, Question>,
    #[serde(default)]
    pub answers: BTreeMap<String, String>,
    #[serde(default)]
    pub loops: BTreeMap<String, LoopState>,
    /// Unix timestamp of the last write
    #[serde(default)]
    pub updated_at: i64,
}

impl TalkRecord {
    /// Anything recorded besides the keyword means a command is mid-way
    pub fn is_active(&self) -> bool {
        !self.questions.is_empty() || !self.answers.is_empty() || !self.loops.is_empty()
    }
}

/// Handle on one identity's continuation record
#[derive(Clone)]
pub struct Talk {
    id: String,
    record: TalkRecord,
    /// Whether the record was read from the store (vs. started fresh)
    existed: bool,
    store: Arc<dyn KeyValueStore>,
}

impl Talk {
    /// Store key for an identity
    pub fn key(identity: &str) -> String {
        format!("talk-{}", identity)
    }

    /// Slot key for a question within a batch
    pub fn slot(prefix: &str, key: &str) -> String {
        format!("{}{}", prefix, key)
    }

    /// Load the record for `identity`, dropping it if older than `ttl`
    pub async fn load(
        store: Arc<dyn KeyValueStore>,
        identity: &str,
        ttl: Option<Duration>,
    ) -> Result<Self, StoreError> {
        let id = Self::key(identity);
        let mut record: Option<TalkRecord> = get_doc(store.as_ref(), &id).await?;

        if let (Some(existing), Some(ttl)) = (&record, ttl) {
            let age = chrono::Utc::now().timestamp() - existing.updated_at;
            if age > ttl.as_secs() as i64 {
                info!(
                    "Dropping stale talk {} ({}s old, keyword {:?})",
                    id, age, existing.keyword
                );
                store.delete(&id).await?;
                record = None;
            }
        }

        let existed = record.is_some();
        Ok(Self {
            id,
            record: record.unwrap_or_default(),
            existed,
            store,
        })
    }

    pub fn record(&self) -> &TalkRecord {
        &self.record
    }

    pub fn is_active(&self) -> bool {
        self.record.is_active()
    }

    /// Keyword of the command to continue
    pub fn keyword(&self) -> &str {
        &self.record.keyword
    }

    pub fn set_keyword(&mut self, keyword: &str) {
        self.record.keyword = keyword.to_string();
    }

    pub fn question(&self, slot: &str) -> Option<&Question> {
        self.record.questions.get(slot)
    }

    pub fn answer(&self, slot: &str) -> Option<&str> {
        self.record.answers.get(slot).map(String::as_str)
    }

    pub fn set_question(&mut self, slot: &str, question: Question) {
        self.record.questions.insert(slot.to_string(), question);
    }

    pub fn set_answer(&mut self, slot: &str, answer: &str) {
        self.record.answers.insert(slot.to_string(), answer.to_string());
    }

    /// Forget both the prompt and the answer of a slot
    pub fn remove_slot(&mut self, slot: &str) {
        self.record.questions.remove(slot);
        self.record.answers.remove(slot);
    }

    pub fn loop_state(&self, name: &str) -> LoopState {
        self.record.loops.get(name).cloned().unwrap_or_default()
    }

    pub fn set_loop_state(&mut self, name: &str, state: LoopState) {
        self.record.loops.insert(name.to_string(), state);
    }

    /// Save this record to the store
    pub async fn save(&mut self) -> Result<(), StoreError> {
        self.record.updated_at = chrono::Utc::now().timestamp();
        set_doc(self.store.as_ref(), &self.id, &self.record).await?;
        self.existed = true;
        debug!(
            "Saved {} ({} questions, {} answers)",
            self.id,
            self.record.questions.len(),
            self.record.answers.len()
        );
        Ok(())
    }

    /// Remove this record from the store
    pub async fn clear(&mut self) -> Result<(), StoreError> {
        if self.existed {
            self.store.delete(&self.id).await?;
            self.existed = false;
        }
        self.record = TalkRecord::default();
        Ok(())
    }

    /// Put the store back to exactly what this handle held when loaded
    pub async fn write_back(&self) -> Result<(), StoreError> {
        if self.existed {
            set_doc(self.store.as_ref(), &self.id, &self.record).await
        } else {
            self.store.delete(&self.id).await
        }
    }
}

//! Command Registry and Dispatcher
//!
//! Turns one inbound `(identity, text)` into one `Response`:
//! 1. Load the identity's continuation record
//! 2. Pick the command: the recorded keyword mid-conversation, else the text
//! 3. Run it against the user's aggregate and a fresh `Context`
//! 4. Completed → clear the record; suspended → return the prompt;
//!    failed → put the record back as it was before the turn

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::aggregate::Aggregate;
use crate::config::Config;
use crate::context::Context;
use crate::domain::User;
use crate::error::{Error, Result};
use crate::messenger::Messenger;
use crate::response::Response;
use crate::store::KeyValueStore;
use crate::talk::Talk;

/// Reply for text that names no command
pub const UNKNOWN_COMMAND: &str = "無法辨識的指令";

/// Reply when the store or a lock failed; the record was restored
pub const RETRY_LATER: &str = "系統忙碌中，請重新傳送訊息";

/// Reply for defects
pub const INTERNAL_FAILURE: &str = "系統發生錯誤";

/// A conversational command. `run` is replayed from the top on every turn
/// until it returns without suspending.
#[async_trait]
pub trait Command: Send + Sync {
    async fn run(&self, user: &mut Aggregate<User>, ctx: &mut Context) -> Result<Response>;
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Keyword already registered: {0}")]
    DuplicateKeyword(String),
}

/// Keyword → command table, built once at startup
#[derive(Default)]
pub struct CommandRegistry {
    commands: HashMap<String, Arc<dyn Command>>,
    /// Registration order, for help text
    keywords: Vec<String>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one command under every keyword in `keywords`
    pub fn register(&mut self, keywords: &[&str], command: Arc<dyn Command>) -> std::result::Result<(), RegistryError> {
        if let Some(taken) = keywords.iter().find(|k| self.commands.contains_key(**k)) {
            return Err(RegistryError::DuplicateKeyword(taken.to_string()));
        }
        for keyword in keywords {
            self.commands.insert(keyword.to_string(), command.clone());
            self.keywords.push(keyword.to_string());
        }
        Ok(())
    }

    pub fn get(&self, keyword: &str) -> Option<Arc<dyn Command>> {
        self.commands.get(keyword).cloned()
    }

    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

/// Runs turns against an immutable registry
pub struct Dispatcher {
    registry: CommandRegistry,
    store: Arc<dyn KeyValueStore>,
    messenger: Arc<dyn Messenger>,
    config: Config,
}

impl Dispatcher {
    pub fn new(
        registry: CommandRegistry,
        store: Arc<dyn KeyValueStore>,
        messenger: Arc<dyn Messenger>,
        config: Config,
    ) -> Self {
        Self {
            registry,
            store,
            messenger,
            config,
        }
    }

    pub fn registry(&self) -> &CommandRegistry {
        &self.registry
    }

    pub fn store(&self) -> Arc<dyn KeyValueStore> {
        self.store.clone()
    }

    /// Run one turn. `Suspended` never escapes: it becomes the prompt.
    pub async fn dispatch(&self, identity: &str, text: &str) -> Result<Response> {
        debug!("{}: {}", identity, text);

        let mut talk = Talk::load(self.store.clone(), identity, self.config.talk_ttl).await?;
        let snapshot = talk.clone();

        let keyword = if talk.is_active() {
            talk.keyword().to_string()
        } else {
            text.to_string()
        };

        let Some(command) = self.registry.get(&keyword) else {
            if talk.is_active() {
                warn!("{} was in unregistered command {:?}, starting over", identity, keyword);
                talk.clear().await?;
            }
            return Ok(Response::text(UNKNOWN_COMMAND));
        };

        talk.set_keyword(&keyword);
        let mut user: Aggregate<User> =
            Aggregate::load(self.store.clone(), self.config.lock.clone(), &User::key(identity));
        let mut ctx = Context::new(
            identity,
            text,
            talk,
            self.store.clone(),
            self.config.lock.clone(),
            self.messenger.clone(),
        );

        match command.run(&mut user, &mut ctx).await {
            Ok(response) => {
                ctx.into_talk().clear().await?;
                debug!("bot -> {}: {:?}", identity, response.text);
                Ok(response)
            }
            Err(Error::Suspended(prompt)) => {
                debug!("bot asks {}: {:?}", identity, prompt.text);
                Ok(prompt)
            }
            Err(e) => {
                if let Err(restore) = snapshot.write_back().await {
                    warn!("Could not restore talk of {}: {}", identity, restore);
                }
                Err(e)
            }
        }
    }

    /// Run one turn and turn every failure into something to show the user
    pub async fn handle(&self, identity: &str, text: &str) -> Response {
        match self.dispatch(identity, text).await {
            Ok(response) => response,
            Err(e) if e.is_recoverable() => {
                debug!("{} rejected: {}", identity, e);
                Response::text(e.to_string())
            }
            Err(Error::Store(e)) => {
                warn!("Store failure for {}: {}", identity, e);
                Response::text(RETRY_LATER)
            }
            Err(e) => {
                error!("Command failed for {} on {:?}: {}", identity, text, e);
                Response::text(INTERNAL_FAILURE)
            }
        }
    }
}

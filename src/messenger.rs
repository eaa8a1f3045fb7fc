//! Messenger Boundary
//!
//! Outbound calls a command may make besides its reply: looking up a user's
//! display profile and pushing a text to several users at once. The
//! messaging platform implements this trait; the engine ships a no-op one.

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Public profile of a platform user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub display_name: String,
    #[serde(default)]
    pub picture_url: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
}

#[async_trait]
pub trait Messenger: Send + Sync {
    /// Look up a user's profile (None if the platform has none)
    async fn profile(&self, identity: &str) -> Result<Option<Profile>>;

    /// Push the same text to every identity
    async fn multicast(&self, identities: &[String], text: &str) -> Result<()>;
}

/// Messenger that sends nothing (REPL, tests, webhook-only deployments)
#[derive(Debug, Default)]
pub struct NullMessenger;

#[async_trait]
impl Messenger for NullMessenger {
    async fn profile(&self, _identity: &str) -> Result<Option<Profile>> {
        Ok(None)
    }

    async fn multicast(&self, identities: &[String], text: &str) -> Result<()> {
        debug!("Dropping multicast to {} users: {}", identities.len(), text);
        Ok(())
    }
}

/// Messenger that remembers what it was asked to send
#[derive(Debug, Default)]
pub struct RecordingMessenger {
    sent: Mutex<Vec<(Vec<String>, String)>>,
}

impl RecordingMessenger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every multicast so far, oldest first
    pub fn sent(&self) -> Vec<(Vec<String>, String)> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl Messenger for RecordingMessenger {
    async fn profile(&self, identity: &str) -> Result<Option<Profile>> {
        Ok(Some(Profile {
            display_name: identity.to_string(),
            picture_url: None,
            language: None,
        }))
    }

    async fn multicast(&self, identities: &[String], text: &str) -> Result<()> {
        self.sent.lock().push((identities.to_vec(), text.to_string()));
        Ok(())
    }
}

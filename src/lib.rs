//! Rollcall
//!
//! Team attendance bot built on a replayable conversation engine.
//!
//! # Features
//!
//! - **Suspendable Commands**: `ask` reads like a blocking prompt; the turn
//!   unwinds and the command is replayed when the answer arrives
//! - **Continuation Store**: per-identity record of asked and answered questions
//! - **Locked Aggregates**: lease locks around shared read-modify-write
//! - **Pluggable Storage**: in-memory, SQLite or Redis
//! - **Webhook Server**: axum `POST /callback`
//!
//! # Architecture
//!
//! ```text
//! Platform ──► /callback ──► Dispatcher ──► Command::run(user, ctx)
//!                               │                 │
//!                               │                 ├── ctx.ask / ask_many / continue_ask
//!                               │                 └── Aggregate::update (lease lock)
//!                               └── Talk (talk-<identity>)
//!                                        │
//!                                  KeyValueStore (Memory / SQLite / Redis)
//! ```

pub mod aggregate;
pub mod command;
pub mod commands;
pub mod config;
pub mod context;
pub mod domain;
pub mod error;
pub mod messenger;
pub mod question;
pub mod response;
pub mod server;
pub mod store;
pub mod talk;

pub use aggregate::{Aggregate, Document};
pub use command::{Command, CommandRegistry, Dispatcher, RegistryError};
pub use config::{Config, StoreBackend};
pub use context::{Context, LOOP_DONE};
pub use error::{Error, Result};
pub use messenger::{Messenger, NullMessenger, Profile, RecordingMessenger};
pub use question::{ChoiceOption, Question, QuestionKind, ValidationError};
pub use response::Response;
pub use store::{KeyValueStore, LockConfig, LockLease, MemoryStore, RedisStore, SqliteStore, StoreError};
pub use talk::{Talk, TalkRecord};

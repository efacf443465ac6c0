//! Record store seams.
//!
//! The engine never owns a database. Hosts hand it implementations of these traits; the crate
//! ships an in-memory store (tests, ephemeral hosts) and a SQLite store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::types::{Attempt, Problem, SessionState, UserSettings};

pub mod keys;
pub mod memory;
pub mod migrate;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("migration error: {0}")]
    Migration(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait ProblemStore: Send + Sync {
    async fn get_problem(&self, id: &str) -> StoreResult<Option<Problem>>;

    async fn all_problems(&self) -> StoreResult<Vec<Problem>>;

    async fn put_problem(&self, problem: &Problem) -> StoreResult<()>;

    /// Writes every problem or none of them.
    async fn put_problems(&self, problems: &[Problem]) -> StoreResult<()>;
}

#[async_trait]
pub trait AttemptStore: Send + Sync {
    async fn put_attempt(&self, attempt: &Attempt) -> StoreResult<()>;

    /// Attempts for one problem, ascending by `attempt_date`.
    async fn attempts_for_problem(&self, problem_id: &str) -> StoreResult<Vec<Attempt>>;

    async fn latest_attempt_date(&self) -> StoreResult<Option<DateTime<Utc>>>;
}

#[async_trait]
pub trait MetaStore: Send + Sync {
    async fn get_meta(&self, key: &str) -> StoreResult<Option<String>>;

    /// Atomically replaces the value under `key` when it currently equals `expected`
    /// (`None` meaning absent). `value = None` deletes the key. Returns whether the swap happened.
    async fn compare_and_set(
        &self,
        key: &str,
        expected: Option<&str>,
        value: Option<&str>,
    ) -> StoreResult<bool>;
}

#[async_trait]
pub trait SessionStateStore: Send + Sync {
    /// Raw stored record, possibly in a legacy schema. See [`migrate::migrate_session_state`].
    async fn load_session_state(&self) -> StoreResult<Option<Value>>;

    async fn save_session_state(&self, state: &SessionState) -> StoreResult<()>;
}

#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn load_settings(&self) -> StoreResult<Option<UserSettings>>;

    async fn save_settings(&self, settings: &UserSettings) -> StoreResult<()>;
}

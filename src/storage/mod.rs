//! # Storage Module
//!
//! Store collaborators behind the cache layer.
//!
//! Two kinds of store back the in-memory caches:
//!
//! - [`DurableStore`]: system of record for guild configuration, the user
//!   blacklist, per-user todo lists and the archived daily command stats.
//!   Every cache mutation is written here first.
//! - [`FastStore`]: low-latency counter maps holding the live command stats.
//!   Only bulk snapshots are written, never single increments.
//!
//! Both traits take owned arguments and report failures as [`StoreError`].
//! Nothing in this layer retries; the caller decides what to tell the user.
//!
//! [`JsonStore`] implements both traits on top of a data directory.

pub mod json;

pub use json::JsonStore;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("record not found: {0}")]
    NotFound(String),
    #[error("record already exists: {0}")]
    Conflict(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Guild configuration row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuildConfigRow {
    pub guild_id: u64,
    pub prefixes: Vec<String>,
}

/// Blacklisted user row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlacklistRow {
    pub user_id: u64,
    pub reason: String,
}

/// Per-user todo row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TodoRow {
    pub user_id: u64,
    pub tasks: Vec<String>,
}

/// Immutable record written once per day by the stats rollover.
///
/// `commands` and `users` hold the counters of `date`. The `overall_*` maps
/// are a snapshot of the all-time counters at rollover time, so the all-time
/// view can be rebuilt if the fast store loses its data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsArchive {
    pub date: NaiveDate,
    pub commands: HashMap<String, u64>,
    pub users: HashMap<String, u64>,
    #[serde(default)]
    pub overall_commands: HashMap<String, u64>,
    #[serde(default)]
    pub overall_users: HashMap<String, u64>,
}

/// The four counter maps kept in the fast store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CounterMap {
    CommandsToday,
    CommandsOverall,
    UsersToday,
    UsersOverall,
}

impl CounterMap {
    pub const ALL: [CounterMap; 4] = [
        CounterMap::CommandsToday,
        CounterMap::CommandsOverall,
        CounterMap::UsersToday,
        CounterMap::UsersOverall,
    ];

    pub fn key(self) -> &'static str {
        match self {
            CounterMap::CommandsToday => "top_commands_today",
            CounterMap::CommandsOverall => "top_commands_overall",
            CounterMap::UsersToday => "top_users_today",
            CounterMap::UsersOverall => "top_users_overall",
        }
    }

    pub fn is_today(self) -> bool {
        matches!(self, CounterMap::CommandsToday | CounterMap::UsersToday)
    }
}

/// Relational system of record.
///
/// Element updates (`append_*`, `remove_*`, `clear_*`) fail with
/// [`StoreError::NotFound`] when the row does not exist. `update_*` upserts.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DurableStore: Send + Sync {
    async fn load_guild_configs(&self) -> StoreResult<Vec<GuildConfigRow>>;
    async fn fetch_guild_config(&self, guild_id: u64) -> StoreResult<Option<GuildConfigRow>>;
    async fn insert_guild_config(&self, guild_id: u64) -> StoreResult<()>;
    async fn append_prefix(&self, guild_id: u64, prefix: String) -> StoreResult<()>;
    async fn remove_prefix(&self, guild_id: u64, prefix: String) -> StoreResult<()>;
    async fn clear_prefixes(&self, guild_id: u64) -> StoreResult<()>;
    async fn update_guild_config(&self, row: GuildConfigRow) -> StoreResult<()>;
    async fn delete_guild_config(&self, guild_id: u64) -> StoreResult<()>;

    async fn load_blacklist(&self) -> StoreResult<Vec<BlacklistRow>>;
    async fn insert_blacklist(&self, row: BlacklistRow) -> StoreResult<()>;
    async fn delete_blacklist(&self, user_id: u64) -> StoreResult<()>;

    async fn load_todos(&self) -> StoreResult<Vec<TodoRow>>;
    async fn fetch_todo(&self, user_id: u64) -> StoreResult<Option<TodoRow>>;
    async fn insert_todo(&self, user_id: u64) -> StoreResult<()>;
    async fn append_task(&self, user_id: u64, task: String) -> StoreResult<()>;
    async fn remove_task(&self, user_id: u64, task: String) -> StoreResult<()>;
    async fn clear_tasks(&self, user_id: u64) -> StoreResult<()>;
    async fn update_todo(&self, row: TodoRow) -> StoreResult<()>;
    async fn delete_todo(&self, user_id: u64) -> StoreResult<()>;

    async fn insert_stats_archive(&self, archive: StatsArchive) -> StoreResult<()>;
    async fn latest_stats_archive(&self) -> StoreResult<Option<StatsArchive>>;
}

/// Key-value store for live counters.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FastStore: Send + Sync {
    async fn get_all(&self, map: CounterMap) -> StoreResult<HashMap<String, u64>>;
    /// Overwrites the given keys, leaving other keys of the map untouched.
    async fn merge_set(&self, map: CounterMap, entries: HashMap<String, u64>) -> StoreResult<()>;
    async fn clear(&self, map: CounterMap) -> StoreResult<()>;
}

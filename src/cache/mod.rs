//! # Cache Module
//!
//! In-memory state shared by every command handler, kept consistent with the
//! durable and fast stores.
//!
//! ## Sub-caches
//!
//! | Cache | Store | Policy |
//! |---|---|---|
//! | [`GuildConfigCache`] | durable | write-through + full dump at shutdown, empty configs deleted |
//! | [`Blacklist`] | durable | write-through only |
//! | [`TodoCache`] | durable | write-through + full dump at shutdown, empty lists deleted |
//! | [`CommandStats`] | fast (+ durable archive) | memory-only increments, periodic flush, daily rollover |
//!
//! Reads are plain map lookups and never wait on I/O. Writers serialize per
//! key (see [`keyed::KeyedCache`]) and write the durable store before memory,
//! so memory never runs ahead of the store. A crash between the two leaves
//! memory stale until the next [`CacheManager::load_all`].
//!
//! ## Example
//!
//! ```ignore
//! let store = Arc::new(JsonStore::new(config.data_dir.clone()).await?);
//! let cache = CacheManager::new(store.clone(), store);
//! cache.load_all().await?;
//!
//! cache.guilds.add_prefix(1234, "pb").await?;
//! cache.stats.record("play", 42);
//!
//! cache.dump_all().await?;
//! ```

pub mod blacklist;
pub mod command_stats;
pub mod guild_config;
pub mod keyed;
pub mod todos;

pub use blacklist::Blacklist;
pub use command_stats::CommandStats;
pub use guild_config::{GuildConfig, GuildConfigCache};
pub use todos::TodoCache;

use std::sync::Arc;
use tracing::info;

use crate::storage::{DurableStore, FastStore, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("store operation failed: {0}")]
    Store(#[from] StoreError),
    #[error("<@{0}> ya está bloqueado.")]
    AlreadyBlacklisted(u64),
}

pub type CacheResult<T> = Result<T, CacheError>;

/// Owner of the four process-wide sub-caches.
///
/// Built once at startup and handed to the command layer behind an [`Arc`].
pub struct CacheManager {
    pub guilds: GuildConfigCache,
    pub blacklist: Blacklist,
    pub todos: TodoCache,
    pub stats: CommandStats,
}

impl CacheManager {
    pub fn new(durable: Arc<dyn DurableStore>, fast: Arc<dyn FastStore>) -> Self {
        Self {
            guilds: GuildConfigCache::new(durable.clone()),
            blacklist: Blacklist::new(durable.clone()),
            todos: TodoCache::new(durable.clone()),
            stats: CommandStats::new(durable, fast),
        }
    }

    /// Bulk-loads every sub-cache. Must finish before commands are served.
    pub async fn load_all(&self) -> CacheResult<()> {
        let guilds = self.guilds.load().await?;
        self.stats.load().await?;
        let blacklisted = self.blacklist.load().await?;
        let todos = self.todos.load().await?;

        info!(
            "🗃️ Cache cargado: {} guilds, {} usuarios bloqueados, {} listas de tareas",
            guilds, blacklisted, todos
        );
        Ok(())
    }

    /// Full memory → store flush, run at shutdown.
    pub async fn dump_all(&self) -> CacheResult<()> {
        self.guilds.dump().await?;
        self.stats.flush().await?;
        self.todos.dump().await?;
        info!("💾 Cache volcado completamente");
        Ok(())
    }
}

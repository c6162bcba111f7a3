use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{keyed::KeyedCache, CacheResult};
use crate::storage::{DurableStore, GuildConfigRow};

/// Per-guild configuration held in memory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuildConfig {
    /// Ordered, duplicate-free command prefixes.
    pub prefixes: Vec<String>,
}

impl GuildConfig {
    pub fn is_empty(&self) -> bool {
        self.prefixes.is_empty()
    }
}

/// Write-through cache of guild configurations.
///
/// Every mutation hits the durable store first and is mirrored in memory only
/// once the store call succeeded. Configurations whose prefix list becomes
/// empty are deleted from both layers.
pub struct GuildConfigCache {
    entries: KeyedCache<u64, GuildConfig>,
    store: Arc<dyn DurableStore>,
}

impl GuildConfigCache {
    pub fn new(store: Arc<dyn DurableStore>) -> Self {
        Self {
            entries: KeyedCache::new(),
            store,
        }
    }

    pub async fn load(&self) -> CacheResult<usize> {
        let rows = self.store.load_guild_configs().await?;
        self.entries.replace_all(
            rows.into_iter()
                .map(|row| (row.guild_id, GuildConfig { prefixes: row.prefixes })),
        );
        Ok(self.entries.len())
    }

    pub fn get(&self, guild_id: u64) -> Option<GuildConfig> {
        self.entries.get(&guild_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Creates an empty configuration, or returns the existing one.
    pub async fn create(&self, guild_id: u64) -> CacheResult<GuildConfig> {
        let _guard = self.entries.lock(&guild_id).await;
        self.create_locked(guild_id).await
    }

    /// Adds a prefix, creating the configuration on first write.
    ///
    /// Returns `false` when the prefix was already configured.
    pub async fn add_prefix(&self, guild_id: u64, prefix: &str) -> CacheResult<bool> {
        let _guard = self.entries.lock(&guild_id).await;
        let created = !self.entries.contains(&guild_id);
        let config = self.create_locked(guild_id).await?;
        if config.prefixes.iter().any(|p| p == prefix) {
            return Ok(false);
        }

        if let Err(e) = self.store.append_prefix(guild_id, prefix.to_string()).await {
            // Never leave behind the empty record created above.
            if created {
                if let Err(rollback) = self.delete_locked(guild_id).await {
                    warn!("⚠️ No se pudo revertir la configuración de guild {}: {:?}", guild_id, rollback);
                    self.entries.remove(&guild_id);
                }
            }
            return Err(e.into());
        }
        self.entries
            .update(&guild_id, |config| config.prefixes.push(prefix.to_string()));

        info!("➕ Prefijo '{}' agregado en guild {}", prefix, guild_id);
        Ok(true)
    }

    /// Removes a prefix. Returns `false` when it wasn't configured.
    pub async fn remove_prefix(&self, guild_id: u64, prefix: &str) -> CacheResult<bool> {
        let _guard = self.entries.lock(&guild_id).await;
        let configured = self
            .entries
            .get(&guild_id)
            .map_or(false, |config| config.prefixes.iter().any(|p| p == prefix));
        if !configured {
            return Ok(false);
        }

        self.store
            .remove_prefix(guild_id, prefix.to_string())
            .await?;
        self.entries
            .update(&guild_id, |config| config.prefixes.retain(|p| p != prefix));

        self.cleanup_locked(guild_id).await?;
        Ok(true)
    }

    pub async fn clear_prefixes(&self, guild_id: u64) -> CacheResult<()> {
        let _guard = self.entries.lock(&guild_id).await;
        if !self.entries.contains(&guild_id) {
            return Ok(());
        }

        self.store.clear_prefixes(guild_id).await?;
        self.entries
            .update(&guild_id, |config| config.prefixes.clear());

        self.cleanup_locked(guild_id).await?;
        Ok(())
    }

    /// Drops the configuration from both layers, e.g. when the bot leaves.
    pub async fn delete(&self, guild_id: u64) -> CacheResult<()> {
        let _guard = self.entries.lock(&guild_id).await;
        self.delete_locked(guild_id).await
    }

    /// Writes every cached configuration back to the durable store.
    pub async fn dump(&self) -> CacheResult<usize> {
        let mut written = 0;
        for guild_id in self.entries.keys() {
            let _guard = self.entries.lock(&guild_id).await;
            let Some(config) = self.entries.get(&guild_id) else {
                continue;
            };
            self.store
                .update_guild_config(GuildConfigRow {
                    guild_id,
                    prefixes: config.prefixes,
                })
                .await?;
            written += 1;
        }
        debug!("💾 {} configuraciones de guild volcadas", written);
        Ok(written)
    }

    async fn create_locked(&self, guild_id: u64) -> CacheResult<GuildConfig> {
        if let Some(existing) = self.entries.get(&guild_id) {
            return Ok(existing);
        }

        self.store.insert_guild_config(guild_id).await?;
        let config = GuildConfig::default();
        self.entries.insert(guild_id, config.clone());

        info!("📝 Configuración creada para guild {}", guild_id);
        Ok(config)
    }

    async fn cleanup_locked(&self, guild_id: u64) -> CacheResult<()> {
        if self.entries.get(&guild_id).map_or(false, |c| c.is_empty()) {
            self.delete_locked(guild_id).await?;
        }
        Ok(())
    }

    async fn delete_locked(&self, guild_id: u64) -> CacheResult<()> {
        self.store.delete_guild_config(guild_id).await?;
        if self.entries.remove(&guild_id).is_some() {
            info!("🗑️ Configuración eliminada para guild {}", guild_id);
        }
        Ok(())
    }
}

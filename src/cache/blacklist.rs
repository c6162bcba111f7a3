use std::sync::Arc;
use tracing::info;

use super::{keyed::KeyedCache, CacheError, CacheResult};
use crate::storage::{BlacklistRow, DurableStore};

/// Users refused by the command layer, keyed by user id with the reason.
///
/// Pure write-through: there is no bulk dump, every add/remove goes to the
/// durable store before memory.
pub struct Blacklist {
    entries: KeyedCache<u64, String>,
    store: Arc<dyn DurableStore>,
}

impl Blacklist {
    pub fn new(store: Arc<dyn DurableStore>) -> Self {
        Self {
            entries: KeyedCache::new(),
            store,
        }
    }

    pub async fn load(&self) -> CacheResult<usize> {
        let rows = self.store.load_blacklist().await?;
        self.entries
            .replace_all(rows.into_iter().map(|row| (row.user_id, row.reason)));
        Ok(self.entries.len())
    }

    pub fn is_blacklisted(&self, user_id: u64) -> bool {
        self.entries.contains(&user_id)
    }

    pub fn reason(&self, user_id: u64) -> Option<String> {
        self.entries.get(&user_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub async fn add(&self, user_id: u64, reason: &str) -> CacheResult<()> {
        let _guard = self.entries.lock(&user_id).await;
        if self.entries.contains(&user_id) {
            return Err(CacheError::AlreadyBlacklisted(user_id));
        }

        self.store
            .insert_blacklist(BlacklistRow {
                user_id,
                reason: reason.to_string(),
            })
            .await?;
        self.entries.insert(user_id, reason.to_string());

        info!("⛔ Usuario {} agregado a la lista negra: {}", user_id, reason);
        Ok(())
    }

    /// Returns `false` when the user wasn't blacklisted.
    pub async fn remove(&self, user_id: u64) -> CacheResult<bool> {
        let _guard = self.entries.lock(&user_id).await;
        if !self.entries.contains(&user_id) {
            return Ok(false);
        }

        self.store.delete_blacklist(user_id).await?;
        self.entries.remove(&user_id);

        info!("✅ Usuario {} eliminado de la lista negra", user_id);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MockDurableStore, StoreError};

    #[tokio::test]
    async fn add_then_remove() {
        let mut store = MockDurableStore::new();
        store.expect_insert_blacklist().times(1).returning(|_| Ok(()));
        store.expect_delete_blacklist().times(1).returning(|_| Ok(()));
        let blacklist = Blacklist::new(Arc::new(store));

        blacklist.add(42, "spam").await.unwrap();
        assert!(blacklist.is_blacklisted(42));
        assert_eq!(blacklist.reason(42).as_deref(), Some("spam"));

        assert!(matches!(
            blacklist.add(42, "again").await,
            Err(CacheError::AlreadyBlacklisted(42))
        ));

        assert!(blacklist.remove(42).await.unwrap());
        assert!(!blacklist.remove(42).await.unwrap());
        assert!(!blacklist.is_blacklisted(42));
    }

    #[tokio::test]
    async fn store_failure_does_not_blacklist() {
        let mut store = MockDurableStore::new();
        store
            .expect_insert_blacklist()
            .returning(|_| Err(StoreError::Unavailable("pool closed".into())));
        let blacklist = Blacklist::new(Arc::new(store));

        assert!(blacklist.add(1, "x").await.is_err());
        assert!(!blacklist.is_blacklisted(1));
    }

    #[tokio::test]
    async fn load_replaces_memory() {
        let mut store = MockDurableStore::new();
        store.expect_load_blacklist().returning(|| {
            Ok(vec![BlacklistRow {
                user_id: 7,
                reason: "abuse".into(),
            }])
        });
        let blacklist = Blacklist::new(Arc::new(store));

        assert_eq!(blacklist.load().await.unwrap(), 1);
        assert!(blacklist.is_blacklisted(7));
    }
}

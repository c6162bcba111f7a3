use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{keyed::KeyedCache, CacheResult};
use crate::storage::{DurableStore, TodoRow};

/// Write-through cache of per-user todo lists.
///
/// Same policy as the guild configuration cache: durable write first, then
/// memory; lists that become empty are removed from both layers.
pub struct TodoCache {
    entries: KeyedCache<u64, Vec<String>>,
    store: Arc<dyn DurableStore>,
}

impl TodoCache {
    pub fn new(store: Arc<dyn DurableStore>) -> Self {
        Self {
            entries: KeyedCache::new(),
            store,
        }
    }

    pub async fn load(&self) -> CacheResult<usize> {
        let rows = self.store.load_todos().await?;
        self.entries
            .replace_all(rows.into_iter().map(|row| (row.user_id, row.tasks)));
        Ok(self.entries.len())
    }

    pub fn get(&self, user_id: u64) -> Option<Vec<String>> {
        self.entries.get(&user_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub async fn create(&self, user_id: u64) -> CacheResult<Vec<String>> {
        let _guard = self.entries.lock(&user_id).await;
        self.create_locked(user_id).await
    }

    /// Appends a task, creating the list on first use.
    pub async fn add_task(&self, user_id: u64, task: &str) -> CacheResult<usize> {
        let _guard = self.entries.lock(&user_id).await;
        let created = !self.entries.contains(&user_id);
        self.create_locked(user_id).await?;

        if let Err(e) = self.store.append_task(user_id, task.to_string()).await {
            // Never leave behind the empty list created above.
            if created {
                if let Err(rollback) = self.delete_locked(user_id).await {
                    warn!("⚠️ No se pudo revertir la lista de usuario {}: {:?}", user_id, rollback);
                    self.entries.remove(&user_id);
                }
            }
            return Err(e.into());
        }
        let len = self
            .entries
            .update(&user_id, |tasks| {
                tasks.push(task.to_string());
                tasks.len()
            })
            .unwrap_or_default();

        debug!("📝 Tarea agregada para usuario {}", user_id);
        Ok(len)
    }

    /// Removes every occurrence of `task`. Returns how many were removed.
    pub async fn remove_task(&self, user_id: u64, task: &str) -> CacheResult<usize> {
        let _guard = self.entries.lock(&user_id).await;
        let matching = self
            .entries
            .get(&user_id)
            .map_or(0, |tasks| tasks.iter().filter(|t| *t == task).count());
        if matching == 0 {
            return Ok(0);
        }

        self.store.remove_task(user_id, task.to_string()).await?;
        self.entries
            .update(&user_id, |tasks| tasks.retain(|t| t != task));

        self.cleanup_locked(user_id).await?;
        Ok(matching)
    }

    pub async fn clear_tasks(&self, user_id: u64) -> CacheResult<()> {
        let _guard = self.entries.lock(&user_id).await;
        if !self.entries.contains(&user_id) {
            return Ok(());
        }

        self.store.clear_tasks(user_id).await?;
        self.entries.update(&user_id, |tasks| tasks.clear());

        self.cleanup_locked(user_id).await
    }

    pub async fn dump(&self) -> CacheResult<usize> {
        let mut written = 0;
        for user_id in self.entries.keys() {
            let _guard = self.entries.lock(&user_id).await;
            let Some(tasks) = self.entries.get(&user_id) else {
                continue;
            };
            self.store.update_todo(TodoRow { user_id, tasks }).await?;
            written += 1;
        }
        debug!("💾 {} listas de tareas volcadas", written);
        Ok(written)
    }

    async fn create_locked(&self, user_id: u64) -> CacheResult<Vec<String>> {
        if let Some(existing) = self.entries.get(&user_id) {
            return Ok(existing);
        }

        self.store.insert_todo(user_id).await?;
        self.entries.insert(user_id, Vec::new());
        Ok(Vec::new())
    }

    async fn cleanup_locked(&self, user_id: u64) -> CacheResult<()> {
        if self.entries.get(&user_id).map_or(false, |tasks| tasks.is_empty()) {
            self.delete_locked(user_id).await?;
            info!("🗑️ Lista de tareas vacía eliminada para usuario {}", user_id);
        }
        Ok(())
    }

    async fn delete_locked(&self, user_id: u64) -> CacheResult<()> {
        self.store.delete_todo(user_id).await?;
        self.entries.remove(&user_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{JsonStore, MockDurableStore, StoreError};
    use pretty_assertions::assert_eq;

    async fn json_cache() -> (tempfile::TempDir, Arc<JsonStore>, TodoCache) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(JsonStore::new(dir.path().to_path_buf()).await.unwrap());
        let cache = TodoCache::new(store.clone());
        (dir, store, cache)
    }

    #[tokio::test]
    async fn tasks_keep_insertion_order() {
        let (_dir, store, cache) = json_cache().await;

        cache.add_task(1, "write tests").await.unwrap();
        cache.add_task(1, "ship").await.unwrap();

        let expected = vec!["write tests".to_string(), "ship".to_string()];
        assert_eq!(cache.get(1), Some(expected.clone()));
        assert_eq!(store.fetch_todo(1).await.unwrap().unwrap().tasks, expected);
    }

    #[tokio::test]
    async fn removing_last_task_collects_the_list() {
        let (_dir, store, cache) = json_cache().await;

        cache.add_task(2, "only").await.unwrap();
        assert_eq!(cache.remove_task(2, "only").await.unwrap(), 1);

        assert_eq!(cache.get(2), None);
        assert_eq!(store.fetch_todo(2).await.unwrap(), None);
    }

    #[tokio::test]
    async fn removing_unknown_task_is_a_no_op() {
        let (_dir, _store, cache) = json_cache().await;

        cache.add_task(3, "a").await.unwrap();
        assert_eq!(cache.remove_task(3, "b").await.unwrap(), 0);
        assert_eq!(cache.get(3), Some(vec!["a".to_string()]));
    }

    #[tokio::test]
    async fn clear_collects_the_list() {
        let (_dir, store, cache) = json_cache().await;

        cache.add_task(4, "a").await.unwrap();
        cache.add_task(4, "b").await.unwrap();
        cache.clear_tasks(4).await.unwrap();

        assert_eq!(cache.get(4), None);
        assert_eq!(store.fetch_todo(4).await.unwrap(), None);
    }

    #[tokio::test]
    async fn failed_remove_keeps_the_task() {
        let mut store = MockDurableStore::new();
        store.expect_insert_todo().returning(|_| Ok(()));
        store.expect_append_task().returning(|_, _| Ok(()));
        store
            .expect_remove_task()
            .returning(|_, _| Err(StoreError::Unavailable("down".into())));
        let cache = TodoCache::new(Arc::new(store));

        cache.add_task(5, "keep me").await.unwrap();
        assert!(cache.remove_task(5, "keep me").await.is_err());
        assert_eq!(cache.get(5), Some(vec!["keep me".to_string()]));
    }

    #[tokio::test]
    async fn failed_first_append_leaves_no_empty_list() {
        let mut store = MockDurableStore::new();
        store.expect_insert_todo().returning(|_| Ok(()));
        store
            .expect_append_task()
            .returning(|_, _| Err(StoreError::Unavailable("connection reset".into())));
        store
            .expect_delete_todo()
            .withf(|user_id| *user_id == 6)
            .times(1)
            .returning(|_| Ok(()));
        let cache = TodoCache::new(Arc::new(store));

        assert!(cache.add_task(6, "lost").await.is_err());
        assert_eq!(cache.get(6), None);
        assert_eq!(cache.dump().await.unwrap(), 0);
    }
}

use chrono::NaiveDate;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::CacheResult;
use crate::storage::{CounterMap, DurableStore, FastStore, StatsArchive};

/// Point-in-time copy of the four counter maps.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub commands_today: HashMap<String, u64>,
    pub commands_overall: HashMap<String, u64>,
    pub users_today: HashMap<String, u64>,
    pub users_overall: HashMap<String, u64>,
}

impl CounterSnapshot {
    pub fn map(&self, map: CounterMap) -> &HashMap<String, u64> {
        match map {
            CounterMap::CommandsToday => &self.commands_today,
            CounterMap::CommandsOverall => &self.commands_overall,
            CounterMap::UsersToday => &self.users_today,
            CounterMap::UsersOverall => &self.users_overall,
        }
    }

    fn map_mut(&mut self, map: CounterMap) -> &mut HashMap<String, u64> {
        match map {
            CounterMap::CommandsToday => &mut self.commands_today,
            CounterMap::CommandsOverall => &mut self.commands_overall,
            CounterMap::UsersToday => &mut self.users_today,
            CounterMap::UsersOverall => &mut self.users_overall,
        }
    }
}

/// Command usage counters.
///
/// Two speeds: [`record`](CommandStats::record) only touches memory, while
/// [`flush`](CommandStats::flush) pushes the whole snapshot to the fast store
/// on a timer. Once a day [`rollover`](CommandStats::rollover) archives the
/// "today" maps in the durable store and resets them. Flushes and
/// rollovers never overlap, so a flush can't write archived counts back.
pub struct CommandStats {
    counters: Mutex<CounterSnapshot>,
    persist: tokio::sync::Mutex<()>,
    durable: Arc<dyn DurableStore>,
    fast: Arc<dyn FastStore>,
}

impl CommandStats {
    pub fn new(durable: Arc<dyn DurableStore>, fast: Arc<dyn FastStore>) -> Self {
        Self {
            counters: Mutex::new(CounterSnapshot::default()),
            persist: tokio::sync::Mutex::new(()),
            durable,
            fast,
        }
    }

    /// Loads the live counters from the fast store.
    ///
    /// When the fast store has no all-time counters at all, they are seeded
    /// from the snapshot carried by the latest daily archive.
    pub async fn load(&self) -> CacheResult<()> {
        let mut loaded = CounterSnapshot::default();
        for map in CounterMap::ALL {
            *loaded.map_mut(map) = self.fast.get_all(map).await?;
        }

        if loaded.commands_overall.is_empty() && loaded.users_overall.is_empty() {
            if let Some(archive) = self.durable.latest_stats_archive().await? {
                warn!(
                    "⚠️ Contadores globales vacíos, restaurando desde el archivo del {}",
                    archive.date
                );
                loaded.commands_overall = archive.overall_commands;
                loaded.users_overall = archive.overall_users;
            }
        }

        let mut counters = self.counters.lock();
        for map in CounterMap::ALL {
            add_all(counters.map_mut(map), loaded.map(map));
        }
        info!(
            "📊 Estadísticas cargadas: {} comandos distintos",
            counters.commands_overall.len()
        );
        Ok(())
    }

    /// Counts one invocation of `command` by `user_id`.
    pub fn record(&self, command: &str, user_id: u64) {
        let user = user_id.to_string();
        let mut counters = self.counters.lock();
        *counters.commands_today.entry(command.to_string()).or_default() += 1;
        *counters.commands_overall.entry(command.to_string()).or_default() += 1;
        *counters.users_today.entry(user.clone()).or_default() += 1;
        *counters.users_overall.entry(user).or_default() += 1;
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        self.counters.lock().clone()
    }

    /// Highest counts of one map, descending, ties by key.
    pub fn top(&self, map: CounterMap, limit: usize) -> Vec<(String, u64)> {
        let mut entries: Vec<(String, u64)> = {
            let counters = self.counters.lock();
            counters
                .map(map)
                .iter()
                .map(|(k, v)| (k.clone(), *v))
                .collect()
        };
        entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        entries.truncate(limit);
        entries
    }

    /// Pushes the full in-memory snapshot to the fast store.
    pub async fn flush(&self) -> CacheResult<()> {
        let _persist = self.persist.lock().await;
        let snapshot = self.snapshot();
        for map in CounterMap::ALL {
            let entries = snapshot.map(map);
            if entries.is_empty() {
                continue;
            }
            self.fast.merge_set(map, entries.clone()).await?;
        }
        debug!("💾 Estadísticas de comandos volcadas");
        Ok(())
    }

    /// Archives the "today" counters under `day` and resets them.
    ///
    /// Only the archived amounts are subtracted, so invocations recorded while
    /// the archive was being written carry over to the next day. The all-time
    /// counters are never modified here.
    pub async fn rollover(&self, day: NaiveDate) -> CacheResult<StatsArchive> {
        let _persist = self.persist.lock().await;
        let snapshot = self.snapshot();
        let archive = StatsArchive {
            date: day,
            commands: snapshot.commands_today,
            users: snapshot.users_today,
            overall_commands: snapshot.commands_overall,
            overall_users: snapshot.users_overall,
        };

        self.durable.insert_stats_archive(archive.clone()).await?;

        {
            let mut counters = self.counters.lock();
            subtract_all(&mut counters.commands_today, &archive.commands);
            subtract_all(&mut counters.users_today, &archive.users);
        }

        let remaining = self.snapshot();
        for map in [CounterMap::CommandsToday, CounterMap::UsersToday] {
            self.fast.clear(map).await?;
            let entries = remaining.map(map);
            if !entries.is_empty() {
                self.fast.merge_set(map, entries.clone()).await?;
            }
        }

        info!(
            "🌅 Rollover diario: {} comandos y {} usuarios archivados para {}",
            archive.commands.len(),
            archive.users.len(),
            day
        );
        Ok(archive)
    }
}

fn add_all(into: &mut HashMap<String, u64>, from: &HashMap<String, u64>) {
    for (key, count) in from {
        *into.entry(key.clone()).or_default() += count;
    }
}

fn subtract_all(from: &mut HashMap<String, u64>, archived: &HashMap<String, u64>) {
    for (key, count) in archived {
        if let Some(current) = from.get_mut(key) {
            *current = current.saturating_sub(*count);
            if *current == 0 {
                from.remove(key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{JsonStore, MockDurableStore, MockFastStore, StoreError, StoreResult};
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use tokio::sync::Notify;

    /// Fast store whose first write of today's commands blocks until released.
    struct GatedFastStore {
        inner: Arc<JsonStore>,
        gated: AtomicBool,
        entered: Notify,
        release: Notify,
    }

    #[async_trait]
    impl FastStore for GatedFastStore {
        async fn get_all(&self, map: CounterMap) -> StoreResult<HashMap<String, u64>> {
            self.inner.get_all(map).await
        }

        async fn merge_set(&self, map: CounterMap, entries: HashMap<String, u64>) -> StoreResult<()> {
            if map == CounterMap::CommandsToday && self.gated.swap(false, Ordering::SeqCst) {
                self.entered.notify_one();
                self.release.notified().await;
            }
            self.inner.merge_set(map, entries).await
        }

        async fn clear(&self, map: CounterMap) -> StoreResult<()> {
            self.inner.clear(map).await
        }
    }

    async fn json_stats() -> (tempfile::TempDir, Arc<JsonStore>, CommandStats) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(JsonStore::new(dir.path().to_path_buf()).await.unwrap());
        let stats = CommandStats::new(store.clone(), store.clone());
        (dir, store, stats)
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, d).unwrap()
    }

    #[test]
    fn record_bumps_all_four_counters() {
        let stats = CommandStats::new(
            Arc::new(MockDurableStore::new()),
            Arc::new(MockFastStore::new()),
        );

        stats.record("play", 1);
        stats.record("play", 2);
        stats.record("skip", 1);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.commands_today.get("play"), Some(&2));
        assert_eq!(snapshot.commands_overall.get("skip"), Some(&1));
        assert_eq!(snapshot.users_today.get("1"), Some(&2));
        assert_eq!(snapshot.users_overall.get("2"), Some(&1));
        assert_eq!(
            stats.top(CounterMap::CommandsToday, 1),
            vec![("play".to_string(), 2)]
        );
    }

    #[tokio::test]
    async fn rollover_archives_and_resets_only_today() {
        let (_dir, store, stats) = json_stats().await;
        stats.record("play", 1);
        stats.record("queue", 2);
        let overall_before = stats.snapshot().commands_overall;

        let archive = stats.rollover(day(1)).await.unwrap();

        let snapshot = stats.snapshot();
        assert!(snapshot.commands_today.is_empty());
        assert!(snapshot.users_today.is_empty());
        assert_eq!(snapshot.commands_overall, overall_before);
        assert_eq!(archive.commands.get("play"), Some(&1));
        assert_eq!(archive.overall_commands, overall_before);
        assert_eq!(store.latest_stats_archive().await.unwrap(), Some(archive));
    }

    #[tokio::test]
    async fn rollover_clears_today_in_the_fast_store() {
        let (_dir, store, stats) = json_stats().await;
        stats.record("play", 1);
        stats.flush().await.unwrap();

        stats.rollover(day(2)).await.unwrap();

        assert!(store.get_all(CounterMap::CommandsToday).await.unwrap().is_empty());
        assert_eq!(
            store
                .get_all(CounterMap::CommandsOverall)
                .await
                .unwrap()
                .get("play"),
            Some(&1)
        );
    }

    #[tokio::test]
    async fn rollover_waits_for_a_running_flush() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(JsonStore::new(dir.path().to_path_buf()).await.unwrap());
        let fast = Arc::new(GatedFastStore {
            inner: store.clone(),
            gated: AtomicBool::new(true),
            entered: Notify::new(),
            release: Notify::new(),
        });
        let stats = Arc::new(CommandStats::new(store.clone(), fast.clone()));
        stats.record("play", 1);

        let flush = tokio::spawn({
            let stats = stats.clone();
            async move { stats.flush().await }
        });
        fast.entered.notified().await;

        let rollover = tokio::spawn({
            let stats = stats.clone();
            async move { stats.rollover(day(5)).await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!rollover.is_finished());

        fast.release.notify_one();
        flush.await.unwrap().unwrap();
        let archive = rollover.await.unwrap().unwrap();

        // The flushed counts were archived once and are gone from "today".
        assert_eq!(archive.commands.get("play"), Some(&1));
        assert!(store.get_all(CounterMap::CommandsToday).await.unwrap().is_empty());
        assert!(store.get_all(CounterMap::UsersToday).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_archive_keeps_today_counters() {
        let mut durable = MockDurableStore::new();
        durable
            .expect_insert_stats_archive()
            .returning(|_| Err(StoreError::Unavailable("db down".into())));
        let stats = CommandStats::new(Arc::new(durable), Arc::new(MockFastStore::new()));
        stats.record("help", 3);

        assert!(stats.rollover(day(3)).await.is_err());
        assert_eq!(stats.snapshot().commands_today.get("help"), Some(&1));
    }

    #[tokio::test]
    async fn flush_then_load_restores_counters() {
        let (_dir, store, stats) = json_stats().await;
        stats.record("play", 9);
        stats.flush().await.unwrap();

        let restarted = CommandStats::new(store.clone(), store);
        restarted.load().await.unwrap();

        assert_eq!(restarted.snapshot(), stats.snapshot());
    }

    #[tokio::test]
    async fn empty_fast_store_seeds_overall_from_latest_archive() {
        let (_dir, store, stats) = json_stats().await;
        stats.record("play", 5);
        stats.rollover(day(4)).await.unwrap();
        for map in CounterMap::ALL {
            store.clear(map).await.unwrap();
        }

        let restarted = CommandStats::new(store.clone(), store);
        restarted.load().await.unwrap();

        let snapshot = restarted.snapshot();
        assert_eq!(snapshot.commands_overall.get("play"), Some(&1));
        assert_eq!(snapshot.users_overall.get("5"), Some(&1));
        assert!(snapshot.commands_today.is_empty());
    }
}

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{
    BlacklistRow, CounterMap, DurableStore, FastStore, GuildConfigRow, StatsArchive, StoreError,
    StoreResult, TodoRow,
};

const GUILDS_DIR: &str = "guilds";
const TODOS_DIR: &str = "todos";
const STATS_DIR: &str = "command_stats";
const COUNTERS_DIR: &str = "counters";
const BLACKLIST_FILE: &str = "blacklist.json";

/// Store basado en archivos JSON
///
/// Layout under `data_dir`:
///
/// ```text
/// guilds/guild_<id>.json
/// todos/user_<id>.json
/// blacklist.json
/// command_stats/<yyyy-mm-dd>.json
/// counters/<map>.json
/// ```
///
/// Every read-modify-write goes through `write_lock`, so two writers never
/// interleave on the same file.
pub struct JsonStore {
    data_dir: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonStore {
    pub async fn new(data_dir: PathBuf) -> StoreResult<Self> {
        for dir in [GUILDS_DIR, TODOS_DIR, STATS_DIR, COUNTERS_DIR] {
            fs::create_dir_all(data_dir.join(dir)).await?;
        }

        info!("📁 Storage inicializado en: {}", data_dir.display());

        Ok(Self {
            data_dir,
            write_lock: Mutex::new(()),
        })
    }

    fn guild_path(&self, guild_id: u64) -> PathBuf {
        self.data_dir.join(GUILDS_DIR).join(format!("guild_{}.json", guild_id))
    }

    fn todo_path(&self, user_id: u64) -> PathBuf {
        self.data_dir.join(TODOS_DIR).join(format!("user_{}.json", user_id))
    }

    fn blacklist_path(&self) -> PathBuf {
        self.data_dir.join(BLACKLIST_FILE)
    }

    fn archive_path(&self, date: NaiveDate) -> PathBuf {
        self.data_dir
            .join(STATS_DIR)
            .join(format!("{}.json", date.format("%Y-%m-%d")))
    }

    fn counter_path(&self, map: CounterMap) -> PathBuf {
        self.data_dir.join(COUNTERS_DIR).join(format!("{}.json", map.key()))
    }

    async fn read_blacklist(&self) -> StoreResult<Vec<BlacklistRow>> {
        Ok(read_json(&self.blacklist_path()).await?.unwrap_or_default())
    }

    /// Read-modify-write of a guild row that must already exist.
    async fn modify_guild<F>(&self, guild_id: u64, f: F) -> StoreResult<()>
    where
        F: FnOnce(&mut GuildConfigRow),
    {
        let _guard = self.write_lock.lock().await;
        let path = self.guild_path(guild_id);
        let mut row: GuildConfigRow = read_json(&path)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("guild {}", guild_id)))?;
        f(&mut row);
        write_json(&path, &row).await
    }

    async fn modify_todo<F>(&self, user_id: u64, f: F) -> StoreResult<()>
    where
        F: FnOnce(&mut TodoRow),
    {
        let _guard = self.write_lock.lock().await;
        let path = self.todo_path(user_id);
        let mut row: TodoRow = read_json(&path)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("todo {}", user_id)))?;
        f(&mut row);
        write_json(&path, &row).await
    }
}

#[async_trait]
impl DurableStore for JsonStore {
    async fn load_guild_configs(&self) -> StoreResult<Vec<GuildConfigRow>> {
        let rows = load_dir(&self.data_dir.join(GUILDS_DIR), "guild_").await?;
        if !rows.is_empty() {
            info!("📂 Cargadas {} configuraciones de servidor", rows.len());
        }
        Ok(rows)
    }

    async fn fetch_guild_config(&self, guild_id: u64) -> StoreResult<Option<GuildConfigRow>> {
        read_json(&self.guild_path(guild_id)).await
    }

    async fn insert_guild_config(&self, guild_id: u64) -> StoreResult<()> {
        let _guard = self.write_lock.lock().await;
        let path = self.guild_path(guild_id);
        if fs::try_exists(&path).await? {
            return Err(StoreError::Conflict(format!("guild {}", guild_id)));
        }
        let row = GuildConfigRow {
            guild_id,
            prefixes: Vec::new(),
        };
        write_json(&path, &row).await
    }

    async fn append_prefix(&self, guild_id: u64, prefix: String) -> StoreResult<()> {
        self.modify_guild(guild_id, |row| {
            if !row.prefixes.contains(&prefix) {
                row.prefixes.push(prefix);
            }
        })
        .await
    }

    async fn remove_prefix(&self, guild_id: u64, prefix: String) -> StoreResult<()> {
        self.modify_guild(guild_id, |row| row.prefixes.retain(|p| p != &prefix))
            .await
    }

    async fn clear_prefixes(&self, guild_id: u64) -> StoreResult<()> {
        self.modify_guild(guild_id, |row| row.prefixes.clear()).await
    }

    async fn update_guild_config(&self, row: GuildConfigRow) -> StoreResult<()> {
        let _guard = self.write_lock.lock().await;
        write_json(&self.guild_path(row.guild_id), &row).await
    }

    async fn delete_guild_config(&self, guild_id: u64) -> StoreResult<()> {
        let _guard = self.write_lock.lock().await;
        remove_if_exists(&self.guild_path(guild_id)).await
    }

    async fn load_blacklist(&self) -> StoreResult<Vec<BlacklistRow>> {
        self.read_blacklist().await
    }

    async fn insert_blacklist(&self, row: BlacklistRow) -> StoreResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut rows = self.read_blacklist().await?;
        if rows.iter().any(|r| r.user_id == row.user_id) {
            return Err(StoreError::Conflict(format!("blacklisted user {}", row.user_id)));
        }
        rows.push(row);
        write_json(&self.blacklist_path(), &rows).await
    }

    async fn delete_blacklist(&self, user_id: u64) -> StoreResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut rows = self.read_blacklist().await?;
        rows.retain(|r| r.user_id != user_id);
        write_json(&self.blacklist_path(), &rows).await
    }

    async fn load_todos(&self) -> StoreResult<Vec<TodoRow>> {
        load_dir(&self.data_dir.join(TODOS_DIR), "user_").await
    }

    async fn fetch_todo(&self, user_id: u64) -> StoreResult<Option<TodoRow>> {
        read_json(&self.todo_path(user_id)).await
    }

    async fn insert_todo(&self, user_id: u64) -> StoreResult<()> {
        let _guard = self.write_lock.lock().await;
        let path = self.todo_path(user_id);
        if fs::try_exists(&path).await? {
            return Err(StoreError::Conflict(format!("todo {}", user_id)));
        }
        let row = TodoRow {
            user_id,
            tasks: Vec::new(),
        };
        write_json(&path, &row).await
    }

    async fn append_task(&self, user_id: u64, task: String) -> StoreResult<()> {
        self.modify_todo(user_id, |row| row.tasks.push(task)).await
    }

    async fn remove_task(&self, user_id: u64, task: String) -> StoreResult<()> {
        self.modify_todo(user_id, |row| row.tasks.retain(|t| t != &task))
            .await
    }

    async fn clear_tasks(&self, user_id: u64) -> StoreResult<()> {
        self.modify_todo(user_id, |row| row.tasks.clear()).await
    }

    async fn update_todo(&self, row: TodoRow) -> StoreResult<()> {
        let _guard = self.write_lock.lock().await;
        write_json(&self.todo_path(row.user_id), &row).await
    }

    async fn delete_todo(&self, user_id: u64) -> StoreResult<()> {
        let _guard = self.write_lock.lock().await;
        remove_if_exists(&self.todo_path(user_id)).await
    }

    async fn insert_stats_archive(&self, archive: StatsArchive) -> StoreResult<()> {
        let _guard = self.write_lock.lock().await;
        let path = self.archive_path(archive.date);
        if fs::try_exists(&path).await? {
            return Err(StoreError::Conflict(format!("stats archive {}", archive.date)));
        }
        write_json(&path, &archive).await?;
        info!("🗄️ Estadísticas archivadas para {}", archive.date);
        Ok(())
    }

    async fn latest_stats_archive(&self) -> StoreResult<Option<StatsArchive>> {
        let mut files = fs::read_dir(self.data_dir.join(STATS_DIR)).await?;
        let mut latest: Option<NaiveDate> = None;

        while let Some(entry) = files.next_entry().await? {
            let path = entry.path();
            let date = path
                .file_stem()
                .and_then(|n| n.to_str())
                .and_then(|n| NaiveDate::parse_from_str(n, "%Y-%m-%d").ok());
            if let Some(date) = date {
                if latest.map_or(true, |current| date > current) {
                    latest = Some(date);
                }
            }
        }

        match latest {
            Some(date) => read_json(&self.archive_path(date)).await,
            None => Ok(None),
        }
    }
}

#[async_trait]
impl FastStore for JsonStore {
    async fn get_all(&self, map: CounterMap) -> StoreResult<HashMap<String, u64>> {
        Ok(read_json(&self.counter_path(map)).await?.unwrap_or_default())
    }

    async fn merge_set(&self, map: CounterMap, entries: HashMap<String, u64>) -> StoreResult<()> {
        let _guard = self.write_lock.lock().await;
        let path = self.counter_path(map);
        let mut current: HashMap<String, u64> = read_json(&path).await?.unwrap_or_default();
        let written = entries.len();
        current.extend(entries);
        write_json(&path, &current).await?;
        debug!("💾 {} contadores escritos en {}", written, map.key());
        Ok(())
    }

    async fn clear(&self, map: CounterMap) -> StoreResult<()> {
        let _guard = self.write_lock.lock().await;
        remove_if_exists(&self.counter_path(map)).await
    }
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> StoreResult<Option<T>> {
    match fs::read_to_string(path).await {
        Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn write_json<T: Serialize>(path: &Path, value: &T) -> StoreResult<()> {
    let content = serde_json::to_string_pretty(value)?;
    fs::write(path, content).await?;
    Ok(())
}

async fn remove_if_exists(path: &Path) -> StoreResult<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Loads every `<prefix><id>.json` row of a directory.
async fn load_dir<T: DeserializeOwned>(dir: &Path, prefix: &str) -> StoreResult<Vec<T>> {
    let mut files = fs::read_dir(dir).await?;
    let mut rows = Vec::new();

    while let Some(entry) = files.next_entry().await? {
        let path = entry.path();
        if path.extension().map_or(true, |ext| ext != "json") {
            continue;
        }
        let is_row = path
            .file_stem()
            .and_then(|n| n.to_str())
            .and_then(|n| n.strip_prefix(prefix))
            .map_or(false, |id| id.parse::<u64>().is_ok());
        if !is_row {
            continue;
        }
        if let Some(row) = read_json(&path).await? {
            rows.push(row);
        }
    }

    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    async fn store() -> (tempfile::TempDir, JsonStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::new(dir.path().to_path_buf()).await.unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn guild_rows_round_trip_through_element_updates() {
        let (_dir, store) = store().await;

        store.insert_guild_config(1).await.unwrap();
        store.append_prefix(1, "pb".into()).await.unwrap();
        store.append_prefix(1, "!".into()).await.unwrap();
        store.append_prefix(1, "pb".into()).await.unwrap();
        store.remove_prefix(1, "!".into()).await.unwrap();

        let row = store.fetch_guild_config(1).await.unwrap().unwrap();
        assert_eq!(row.prefixes, vec!["pb".to_string()]);

        let all = store.load_guild_configs().await.unwrap();
        assert_eq!(all, vec![row]);
    }

    #[tokio::test]
    async fn insert_twice_conflicts_and_updates_on_missing_rows_fail() {
        let (_dir, store) = store().await;

        store.insert_guild_config(7).await.unwrap();
        assert!(matches!(
            store.insert_guild_config(7).await,
            Err(StoreError::Conflict(_))
        ));
        assert!(matches!(
            store.append_task(99, "x".into()).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let (_dir, store) = store().await;

        store.insert_todo(3).await.unwrap();
        store.delete_todo(3).await.unwrap();
        store.delete_todo(3).await.unwrap();
        assert_eq!(store.fetch_todo(3).await.unwrap(), None);
    }

    #[tokio::test]
    async fn blacklist_rejects_duplicate_users() {
        let (_dir, store) = store().await;
        let row = BlacklistRow {
            user_id: 5,
            reason: "spam".into(),
        };

        store.insert_blacklist(row.clone()).await.unwrap();
        assert!(store.insert_blacklist(row.clone()).await.is_err());
        assert_eq!(store.load_blacklist().await.unwrap(), vec![row]);

        store.delete_blacklist(5).await.unwrap();
        assert!(store.load_blacklist().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn merge_set_keeps_unrelated_keys() {
        let (_dir, store) = store().await;
        let map = CounterMap::CommandsOverall;

        store
            .merge_set(map, HashMap::from([("play".into(), 3), ("skip".into(), 1)]))
            .await
            .unwrap();
        store
            .merge_set(map, HashMap::from([("play".into(), 5)]))
            .await
            .unwrap();

        let counters = store.get_all(map).await.unwrap();
        assert_eq!(counters.get("play"), Some(&5));
        assert_eq!(counters.get("skip"), Some(&1));

        store.clear(map).await.unwrap();
        assert!(store.get_all(map).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn latest_archive_is_the_newest_date() {
        let (_dir, store) = store().await;
        let archive = |day: u32| StatsArchive {
            date: NaiveDate::from_ymd_opt(2024, 3, day).unwrap(),
            commands: HashMap::from([("play".into(), u64::from(day))]),
            users: HashMap::new(),
            overall_commands: HashMap::new(),
            overall_users: HashMap::new(),
        };

        store.insert_stats_archive(archive(2)).await.unwrap();
        store.insert_stats_archive(archive(9)).await.unwrap();
        assert!(store.insert_stats_archive(archive(9)).await.is_err());

        let latest = store.latest_stats_archive().await.unwrap().unwrap();
        assert_eq!(latest, archive(9));
    }
}

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::models::Response;

use super::partition::PartitionFile;
use super::{CacheError, CachedEntry, Partition};

/// Where a lookup searches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchScope<'a> {
    /// A single partition; never creates it
    Named(&'a str),
    /// Every partition in creation order, first hit wins
    All,
}

/// Process-wide set of named partitions.
///
/// Shared by the strategy engine, lifecycle, background tasks and messaging.
/// Partitions are kept in creation order.
pub struct CacheStorage {
    partitions: RwLock<Vec<Arc<Partition>>>,
    dir: Option<PathBuf>,
}

impl Default for CacheStorage {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl CacheStorage {
    /// Storage that lives only as long as the process.
    pub fn in_memory() -> Self {
        Self {
            partitions: RwLock::new(Vec::new()),
            dir: None,
        }
    }

    /// Storage mirrored to `<dir>/<partition>.json`, loading what is already there.
    pub fn persistent(dir: PathBuf) -> Result<Self, CacheError> {
        std::fs::create_dir_all(&dir)?;

        let mut loaded = Vec::new();
        for dir_entry in std::fs::read_dir(&dir)? {
            let path = dir_entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
                continue;
            };

            let parsed = std::fs::read_to_string(&path)
                .map_err(CacheError::from)
                .and_then(|contents| Ok(serde_json::from_str::<PartitionFile>(&contents)?));

            match parsed {
                Ok(file) => loaded.push(Arc::new(Partition::from_file(&name, file, path))),
                Err(e) => warn!(partition = %name, error = %e, "Skipping unreadable partition file"),
            }
        }
        loaded.sort_by_key(|p| p.created_at());
        info!(count = loaded.len(), dir = ?dir, "Loaded cache partitions");

        Ok(Self {
            partitions: RwLock::new(loaded),
            dir: Some(dir),
        })
    }

    fn validate_name(name: &str) -> Result<(), CacheError> {
        if name.is_empty() || name.contains('/') || name.contains('\\') || name.contains("..") {
            return Err(CacheError::InvalidName(name.to_string()));
        }
        Ok(())
    }

    /// Open a partition, creating it if absent. Idempotent.
    pub async fn open(&self, name: &str) -> Result<Arc<Partition>, CacheError> {
        if let Some(existing) = self.get(name).await {
            return Ok(existing);
        }
        Self::validate_name(name)?;

        let mut partitions = self.partitions.write().await;
        // Another task may have created it between the read and write locks
        if let Some(existing) = partitions.iter().find(|p| p.name() == name) {
            return Ok(Arc::clone(existing));
        }

        let mirror = self.dir.as_ref().map(|d| d.join(format!("{}.json", name)));
        let partition = Arc::new(Partition::new(name, mirror));
        partition.persist().await?;
        partitions.push(Arc::clone(&partition));
        debug!(partition = name, "Cache partition created");
        Ok(partition)
    }

    /// Look up a partition without creating it.
    pub async fn get(&self, name: &str) -> Option<Arc<Partition>> {
        self.partitions
            .read()
            .await
            .iter()
            .find(|p| p.name() == name)
            .cloned()
    }

    pub async fn has(&self, name: &str) -> bool {
        self.get(name).await.is_some()
    }

    pub async fn lookup(&self, scope: MatchScope<'_>, key: &str) -> Option<CachedEntry> {
        match scope {
            MatchScope::Named(name) => self.get(name).await?.get(key).await,
            MatchScope::All => {
                let partitions: Vec<Arc<Partition>> = self.partitions.read().await.clone();
                for partition in partitions {
                    if let Some(entry) = partition.get(key).await {
                        return Some(entry);
                    }
                }
                None
            }
        }
    }

    /// Store a response in `partition` (opened if needed), replacing any entry under `key`.
    pub async fn put(&self, partition: &str, key: &str, response: Response) -> Result<(), CacheError> {
        self.open(partition).await?.put(key, response).await
    }

    /// Delete a whole partition. Returns whether it existed.
    pub async fn delete(&self, name: &str) -> Result<bool, CacheError> {
        let mut partitions = self.partitions.write().await;
        let Some(index) = partitions.iter().position(|p| p.name() == name) else {
            return Ok(false);
        };

        // File first: a partition whose file survives would come back on reload
        if let Some(path) = partitions[index].mirror() {
            if path.exists() {
                std::fs::remove_file(path)?;
            }
        }
        partitions.remove(index);
        debug!(partition = name, "Cache partition deleted");
        Ok(true)
    }

    /// Delete every partition whose name is not in `current`.
    ///
    /// Best-effort: a failed deletion is logged and the rest continue.
    /// Returns the number of partitions deleted.
    pub async fn delete_all_except(&self, current: &HashSet<String>) -> usize {
        let stale: Vec<String> = self
            .keys()
            .await
            .into_iter()
            .filter(|name| !current.contains(name))
            .collect();

        let mut deleted = 0;
        for name in stale {
            match self.delete(&name).await {
                Ok(true) => {
                    info!(partition = %name, "Deleted stale cache partition");
                    deleted += 1;
                }
                Ok(false) => {}
                Err(e) => warn!(partition = %name, error = %e, "Failed to delete stale cache partition"),
            }
        }
        deleted
    }

    /// Partition names in creation order.
    pub async fn keys(&self) -> Vec<String> {
        self.partitions
            .read()
            .await
            .iter()
            .map(|p| p.name().to_string())
            .collect()
    }

    /// Total number of entries across every partition.
    pub async fn entry_count(&self) -> usize {
        let partitions: Vec<Arc<Partition>> = self.partitions.read().await.clone();
        let mut total = 0;
        for partition in partitions {
            total += partition.len().await;
        }
        total
    }

    /// Hold the partition list exclusively, stalling every other storage call.
    #[cfg(test)]
    pub(crate) async fn lock_partitions(&self) -> tokio::sync::RwLockWriteGuard<'_, Vec<Arc<Partition>>> {
        self.partitions.write().await
    }

    /// Newest write time across every partition.
    pub async fn last_updated(&self) -> Option<DateTime<Utc>> {
        let partitions: Vec<Arc<Partition>> = self.partitions.read().await.clone();
        let mut newest = None;
        for partition in partitions {
            newest = newest.max(partition.last_updated().await);
        }
        newest
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("fincache-test-{}-{}", std::process::id(), name));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    #[tokio::test]
    async fn test_open_is_idempotent() {
        let storage = CacheStorage::in_memory();
        let a = storage.open("fincache-static-v1").await.unwrap();
        let b = storage.open("fincache-static-v1").await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(storage.keys().await, vec!["fincache-static-v1".to_string()]);
    }

    #[tokio::test]
    async fn test_invalid_names_rejected() {
        let storage = CacheStorage::in_memory();
        for name in ["", "../etc", "a/b", "a\\b"] {
            assert!(matches!(storage.open(name).await, Err(CacheError::InvalidName(_))));
        }
    }

    #[tokio::test]
    async fn test_lookup_named_does_not_create() {
        let storage = CacheStorage::in_memory();
        assert!(storage.lookup(MatchScope::Named("missing"), "k").await.is_none());
        assert!(!storage.has("missing").await);
    }

    #[tokio::test]
    async fn test_lookup_all_uses_creation_order() {
        let storage = CacheStorage::in_memory();
        storage.put("first", "k", Response::text("one")).await.unwrap();
        storage.put("second", "k", Response::text("two")).await.unwrap();
        storage.put("second", "only", Response::text("x")).await.unwrap();

        let hit = storage.lookup(MatchScope::All, "k").await.unwrap();
        assert_eq!(hit.response.body_text(), "one");
        assert!(storage.lookup(MatchScope::All, "only").await.is_some());
        assert!(storage.lookup(MatchScope::All, "nope").await.is_none());
    }

    #[tokio::test]
    async fn test_delete_all_except_keeps_current() {
        let storage = CacheStorage::in_memory();
        for name in ["A", "B", "C"] {
            storage.open(name).await.unwrap();
        }
        let current: HashSet<String> = ["A", "B"].iter().map(|s| s.to_string()).collect();

        let deleted = storage.delete_all_except(&current).await;
        assert_eq!(deleted, 1);
        assert_eq!(storage.keys().await, vec!["A".to_string(), "B".to_string()]);

        // Nothing left to delete the second time
        assert_eq!(storage.delete_all_except(&current).await, 0);
    }

    #[tokio::test]
    async fn test_entry_count_and_last_updated() {
        let storage = CacheStorage::in_memory();
        assert_eq!(storage.entry_count().await, 0);
        assert!(storage.last_updated().await.is_none());

        storage.put("s", "a", Response::text("a")).await.unwrap();
        storage.put("d", "b", Response::text("b")).await.unwrap();
        storage.put("d", "c", Response::text("c")).await.unwrap();
        // Overwrite does not add an entry
        storage.put("d", "c", Response::text("c2")).await.unwrap();

        assert_eq!(storage.entry_count().await, 3);
        assert!(storage.last_updated().await.is_some());
    }

    #[tokio::test]
    async fn test_persistent_storage_survives_reload() {
        let dir = temp_dir("reload");
        {
            let storage = CacheStorage::persistent(dir.clone()).unwrap();
            storage.put("fincache-static-v1", "https://app.example.com/", Response::text("shell")).await.unwrap();
            storage.put("fincache-dynamic-v1", "/api/exchange-rates", Response::text("{}")).await.unwrap();
            storage.put("fincache-dynamic-v0", "old", Response::text("old")).await.unwrap();
            assert!(storage.delete("fincache-dynamic-v0").await.unwrap());
        }

        let reloaded = CacheStorage::persistent(dir.clone()).unwrap();
        let names: HashSet<String> = reloaded.keys().await.into_iter().collect();
        assert_eq!(names.len(), 2);
        assert!(names.contains("fincache-static-v1"));
        assert!(names.contains("fincache-dynamic-v1"));
        let entry = reloaded
            .lookup(MatchScope::Named("fincache-static-v1"), "https://app.example.com/")
            .await
            .unwrap();
        assert_eq!(entry.response.body_text(), "shell");

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_empty_partition_is_persisted_on_open() {
        let dir = temp_dir("empty");
        {
            let storage = CacheStorage::persistent(dir.clone()).unwrap();
            storage.open("fincache-static-v1").await.unwrap();
        }

        let reloaded = CacheStorage::persistent(dir.clone()).unwrap();
        assert_eq!(reloaded.keys().await, vec!["fincache-static-v1".to_string()]);
        assert_eq!(reloaded.entry_count().await, 0);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_failed_put_is_not_served() {
        let dir = temp_dir("unwritable");
        let storage = CacheStorage::persistent(dir.clone()).unwrap();
        storage.open("fincache-dynamic-v1").await.unwrap();
        std::fs::remove_dir_all(&dir).unwrap();

        assert!(storage.put("fincache-dynamic-v1", "k", Response::text("v")).await.is_err());
        assert!(storage.lookup(MatchScope::Named("fincache-dynamic-v1"), "k").await.is_none());
        assert_eq!(storage.entry_count().await, 0);
    }

    #[tokio::test]
    async fn test_failed_file_removal_keeps_partition() {
        let dir = temp_dir("undeletable");
        let storage = CacheStorage::persistent(dir.clone()).unwrap();
        storage.put("fincache-static-v0", "k", Response::text("old")).await.unwrap();

        // A directory where the mirror file should be cannot be removed as a file
        let mirror = dir.join("fincache-static-v0.json");
        std::fs::remove_file(&mirror).unwrap();
        std::fs::create_dir(&mirror).unwrap();

        assert!(storage.delete("fincache-static-v0").await.is_err());
        assert!(storage.has("fincache-static-v0").await);

        let current: HashSet<String> = HashSet::from(["fincache-static-v1".to_string()]);
        assert_eq!(storage.delete_all_except(&current).await, 0);
        assert!(storage.has("fincache-static-v0").await);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_corrupt_partition_file_is_skipped() {
        let dir = temp_dir("corrupt");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("broken.json"), "{not json").unwrap();

        let storage = CacheStorage::persistent(dir.clone()).unwrap();
        assert!(storage.keys().await.is_empty());

        let _ = std::fs::remove_dir_all(&dir);
    }
}

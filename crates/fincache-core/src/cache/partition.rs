use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

use crate::models::Response;

use super::CacheError;

/// A stored response together with the time it was written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedEntry {
    pub response: Response,
    pub cached_at: DateTime<Utc>,
}

impl CachedEntry {
    pub fn new(response: Response) -> Self {
        Self {
            response,
            cached_at: Utc::now(),
        }
    }

    pub fn age_minutes(&self) -> i64 {
        (Utc::now() - self.cached_at).num_minutes()
    }

    pub fn age_display(&self) -> String {
        let minutes = self.age_minutes();
        if minutes < 1 {
            // Also covers clock skew (negative ages)
            "just now".to_string()
        } else if minutes < 60 {
            format!("{}m ago", minutes)
        } else if minutes < 1440 {
            format!("{}h ago", minutes / 60)
        } else {
            format!("{}d ago", minutes / 1440)
        }
    }
}

/// On-disk layout of a mirrored partition.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct PartitionFile {
    pub created_at: DateTime<Utc>,
    pub entries: HashMap<String, CachedEntry>,
}

/// A named cache store mapping request keys (URLs or synthetic keys) to entries.
#[derive(Debug)]
pub struct Partition {
    name: String,
    created_at: DateTime<Utc>,
    entries: RwLock<HashMap<String, CachedEntry>>,
    /// JSON file this partition is mirrored to, if any
    mirror: Option<PathBuf>,
}

impl Partition {
    pub(crate) fn new(name: &str, mirror: Option<PathBuf>) -> Self {
        Self {
            name: name.to_string(),
            created_at: Utc::now(),
            entries: RwLock::new(HashMap::new()),
            mirror,
        }
    }

    pub(crate) fn from_file(name: &str, file: PartitionFile, mirror: PathBuf) -> Self {
        Self {
            name: name.to_string(),
            created_at: file.created_at,
            entries: RwLock::new(file.entries),
            mirror: Some(mirror),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub async fn get(&self, key: &str) -> Option<CachedEntry> {
        self.entries.read().await.get(key).cloned()
    }

    /// Store `response` under `key`, replacing any previous entry wholesale.
    pub async fn put(&self, key: &str, response: Response) -> Result<(), CacheError> {
        let mut entries = self.entries.write().await;
        let previous = entries.insert(key.to_string(), CachedEntry::new(response));
        if let Err(e) = self.flush(&entries) {
            // Memory must not serve what the mirror rejected
            match previous {
                Some(entry) => entries.insert(key.to_string(), entry),
                None => entries.remove(key),
            };
            return Err(e);
        }
        debug!(partition = %self.name, key = key, "Cache entry stored");
        Ok(())
    }

    pub async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        let mut entries = self.entries.write().await;
        let Some(removed) = entries.remove(key) else {
            return Ok(false);
        };
        if let Err(e) = self.flush(&entries) {
            entries.insert(key.to_string(), removed);
            return Err(e);
        }
        Ok(true)
    }

    pub async fn keys(&self) -> Vec<String> {
        self.entries.read().await.keys().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Most recent write time in this partition.
    pub async fn last_updated(&self) -> Option<DateTime<Utc>> {
        self.entries.read().await.values().map(|e| e.cached_at).max()
    }

    /// Write the current contents to the mirror file, if there is one.
    pub(crate) async fn persist(&self) -> Result<(), CacheError> {
        let entries = self.entries.read().await;
        self.flush(&entries)
    }

    pub(crate) fn mirror(&self) -> Option<&Path> {
        self.mirror.as_deref()
    }

    /// Rewrite the mirror file. Written to a temp file first so readers never see half a partition.
    fn flush(&self, entries: &HashMap<String, CachedEntry>) -> Result<(), CacheError> {
        let Some(ref path) = self.mirror else {
            return Ok(());
        };
        let file = PartitionFileRef {
            created_at: self.created_at,
            entries,
        };
        let contents = serde_json::to_string(&file)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, contents)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}

#[derive(Serialize)]
struct PartitionFileRef<'a> {
    created_at: DateTime<Utc>,
    entries: &'a HashMap<String, CachedEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_cached_entry_age_display() {
        let mut entry = CachedEntry::new(Response::text("hi"));
        assert_eq!(entry.age_display(), "just now");

        entry.cached_at = Utc::now() - Duration::minutes(5);
        assert_eq!(entry.age_display(), "5m ago");

        entry.cached_at = Utc::now() - Duration::minutes(125);
        assert_eq!(entry.age_display(), "2h ago");

        entry.cached_at = Utc::now() - Duration::days(3);
        assert_eq!(entry.age_display(), "3d ago");

        entry.cached_at = Utc::now() + Duration::minutes(10);
        assert_eq!(entry.age_display(), "just now");
    }

    #[tokio::test]
    async fn test_put_replaces_whole_entry() {
        let partition = Partition::new("fincache-dynamic-v1", None);
        partition
            .put("k", Response::text("first").with_header("X-Old", "1"))
            .await
            .unwrap();
        partition.put("k", Response::text("second")).await.unwrap();

        let entry = partition.get("k").await.unwrap();
        assert_eq!(entry.response.body_text(), "second");
        assert_eq!(entry.response.header("X-Old"), None);
        assert_eq!(partition.len().await, 1);
    }

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("fincache-partition-{}-{}", std::process::id(), name));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[tokio::test]
    async fn test_failed_flush_does_not_change_entries() {
        let dir = temp_dir("flush");
        let partition = Partition::new("fincache-dynamic-v1", Some(dir.join("fincache-dynamic-v1.json")));
        partition.put("k", Response::text("first")).await.unwrap();

        // Mirror directory gone: every write now fails
        std::fs::remove_dir_all(&dir).unwrap();

        assert!(partition.put("k", Response::text("second")).await.is_err());
        assert_eq!(partition.get("k").await.unwrap().response.body_text(), "first");

        assert!(partition.put("new", Response::text("x")).await.is_err());
        assert!(partition.get("new").await.is_none());

        assert!(partition.delete("k").await.is_err());
        assert!(partition.get("k").await.is_some());
        assert_eq!(partition.len().await, 1);
    }

    #[tokio::test]
    async fn test_delete_entry() {
        let partition = Partition::new("p", None);
        partition.put("a", Response::text("a")).await.unwrap();
        assert!(partition.delete("a").await.unwrap());
        assert!(!partition.delete("a").await.unwrap());
        assert!(partition.is_empty().await);
        assert!(partition.last_updated().await.is_none());
    }
}

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use intentmesh_core::{Intention, MeshResult};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::persist::{read_json, write_json_atomic};

/// Durable, read-mostly mirror of the replicated store's last known contents.
///
/// Entries are copies keyed by intention ID. Every mutation builds a new
/// snapshot off to the side and swaps it in whole.
#[async_trait]
pub trait LocalCache: Send + Sync {
    /// Every cached intention, in insertion order.
    async fn load_all(&self) -> MeshResult<Vec<Intention>>;

    /// Atomically replace the whole snapshot.
    async fn replace_all(&self, items: Vec<Intention>) -> MeshResult<()>;

    /// Add one intention, replacing any cached copy with the same ID.
    async fn append(&self, item: Intention) -> MeshResult<()>;

    /// Drop one intention. Returns whether it was present.
    async fn remove(&self, id: &str) -> MeshResult<bool>;

    /// Drop everything.
    async fn clear(&self) -> MeshResult<()> {
        self.replace_all(Vec::new()).await
    }

    /// Number of cached intentions.
    async fn count(&self) -> MeshResult<usize> {
        Ok(self.load_all().await?.len())
    }
}

/// Keep the last occurrence of every ID, at the position of its first occurrence.
fn dedupe(items: Vec<Intention>) -> Vec<Intention> {
    let mut out: Vec<Intention> = Vec::with_capacity(items.len());
    for item in items {
        match out.iter_mut().find(|e| e.id == item.id) {
            Some(slot) => *slot = item,
            None => out.push(item),
        }
    }
    out
}

fn with_appended(current: &[Intention], item: Intention) -> Vec<Intention> {
    let mut next = current.to_vec();
    match next.iter_mut().find(|e| e.id == item.id) {
        Some(slot) => *slot = item,
        None => next.push(item),
    }
    next
}

/// Cache held only in memory.
pub struct InMemoryLocalCache {
    snapshot: RwLock<Arc<Vec<Intention>>>,
}

impl InMemoryLocalCache {
    pub fn new() -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(Vec::new())),
        }
    }

    async fn current(&self) -> Arc<Vec<Intention>> {
        Arc::clone(&*self.snapshot.read().await)
    }

    async fn swap(&self, next: Vec<Intention>) {
        *self.snapshot.write().await = Arc::new(next);
    }
}

impl Default for InMemoryLocalCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LocalCache for InMemoryLocalCache {
    async fn load_all(&self) -> MeshResult<Vec<Intention>> {
        Ok(self.current().await.as_ref().clone())
    }

    async fn replace_all(&self, items: Vec<Intention>) -> MeshResult<()> {
        self.swap(dedupe(items)).await;
        Ok(())
    }

    async fn append(&self, item: Intention) -> MeshResult<()> {
        let mut guard = self.snapshot.write().await;
        *guard = Arc::new(with_appended(&guard, item));
        Ok(())
    }

    async fn remove(&self, id: &str) -> MeshResult<bool> {
        let mut guard = self.snapshot.write().await;
        if !guard.iter().any(|e| e.id == id) {
            return Ok(false);
        }
        let next: Vec<Intention> = guard.iter().filter(|e| e.id != id).cloned().collect();
        *guard = Arc::new(next);
        Ok(true)
    }
}

/// File-backed cache that persists the full snapshot as one JSON document.
///
/// Loads the file on creation. Each mutation writes the new snapshot to disk
/// before swapping it into memory, so a successful call is durable.
pub struct FileLocalCache {
    path: PathBuf,
    inner: InMemoryLocalCache,
    /// Serializes read-modify-write cycles.
    write_lock: Mutex<()>,
}

impl FileLocalCache {
    /// Open the cache at `path`. An unreadable file is treated as an empty cache.
    pub async fn new(path: PathBuf) -> MeshResult<Self> {
        let inner = InMemoryLocalCache::new();
        match read_json::<Vec<Intention>>(&path).await {
            Ok(Some(items)) => {
                debug!(path = %path.display(), count = items.len(), "loaded cache snapshot");
                inner.swap(dedupe(items)).await;
            }
            Ok(None) => {}
            Err(e) => {
                warn!(path = %path.display(), error = %e, "discarding unreadable cache snapshot");
            }
        }
        Ok(Self {
            path,
            inner,
            write_lock: Mutex::new(()),
        })
    }

    /// Location of the snapshot file.
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    async fn commit(&self, next: Vec<Intention>) -> MeshResult<()> {
        write_json_atomic(&self.path, &next).await?;
        self.inner.swap(next).await;
        Ok(())
    }
}

#[async_trait]
impl LocalCache for FileLocalCache {
    async fn load_all(&self) -> MeshResult<Vec<Intention>> {
        self.inner.load_all().await
    }

    async fn replace_all(&self, items: Vec<Intention>) -> MeshResult<()> {
        let _guard = self.write_lock.lock().await;
        self.commit(dedupe(items)).await
    }

    async fn append(&self, item: Intention) -> MeshResult<()> {
        let _guard = self.write_lock.lock().await;
        let current = self.inner.current().await;
        self.commit(with_appended(&current, item)).await
    }

    async fn remove(&self, id: &str) -> MeshResult<bool> {
        let _guard = self.write_lock.lock().await;
        let current = self.inner.current().await;
        if !current.iter().any(|e| e.id == id) {
            return Ok(false);
        }
        let next: Vec<Intention> = current.iter().filter(|e| e.id != id).cloned().collect();
        self.commit(next).await?;
        Ok(true)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::Utc;
    use intentmesh_core::NewIntention;

    fn make(id: &str, title: &str) -> Intention {
        NewIntention::new(title, "me")
            .into_intention(id.to_string(), Utc::now())
            .unwrap()
    }

    #[tokio::test]
    async fn test_append_and_load() {
        let cache = InMemoryLocalCache::new();
        cache.append(make("a", "first")).await.unwrap();
        cache.append(make("b", "second")).await.unwrap();
        let all = cache.load_all().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, "a");
    }

    #[tokio::test]
    async fn test_append_same_id_replaces() {
        let cache = InMemoryLocalCache::new();
        cache.append(make("a", "first")).await.unwrap();
        cache.append(make("a", "renamed")).await.unwrap();
        let all = cache.load_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].title, "renamed");
    }

    #[tokio::test]
    async fn test_replace_all_overwrites() {
        let cache = InMemoryLocalCache::new();
        cache.append(make("old", "stale")).await.unwrap();
        cache
            .replace_all(vec![make("x", "one"), make("y", "two"), make("x", "one again")])
            .await
            .unwrap();
        let all = cache.load_all().await.unwrap();
        let ids: Vec<&str> = all.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["x", "y"]);
        assert_eq!(all[0].title, "one again");
    }

    #[tokio::test]
    async fn test_clear_and_remove() {
        let cache = InMemoryLocalCache::new();
        cache.append(make("a", "first")).await.unwrap();
        cache.append(make("b", "second")).await.unwrap();
        assert!(cache.remove("a").await.unwrap());
        assert!(!cache.remove("a").await.unwrap());
        assert_eq!(cache.count().await.unwrap(), 1);
        cache.clear().await.unwrap();
        assert_eq!(cache.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_loaded_snapshot_is_a_copy() {
        let cache = InMemoryLocalCache::new();
        cache.append(make("a", "first")).await.unwrap();
        let mut copy = cache.load_all().await.unwrap();
        copy[0].title = "mutated".into();
        assert_eq!(cache.load_all().await.unwrap()[0].title, "first");
    }

    #[tokio::test]
    async fn test_file_cache_persists_across_instances() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("cache").join("intentions.json");
        {
            let cache = FileLocalCache::new(path.clone()).await.unwrap();
            cache.append(make("a", "first")).await.unwrap();
            cache.append(make("b", "second")).await.unwrap();
        }
        let cache = FileLocalCache::new(path).await.unwrap();
        let all = cache.load_all().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[1].title, "second");
    }

    #[tokio::test]
    async fn test_file_cache_corrupt_file_starts_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("intentions.json");
        tokio::fs::write(&path, b"{not json").await.unwrap();
        let cache = FileLocalCache::new(path.clone()).await.unwrap();
        assert_eq!(cache.count().await.unwrap(), 0);

        cache.append(make("a", "fresh")).await.unwrap();
        let reloaded = FileLocalCache::new(path).await.unwrap();
        assert_eq!(reloaded.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_file_cache_leaves_no_temp_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("intentions.json");
        let cache = FileLocalCache::new(path.clone()).await.unwrap();
        cache.replace_all(vec![make("a", "x")]).await.unwrap();
        assert!(path.exists());
        assert!(!path.with_extension("tmp").exists());
    }
}

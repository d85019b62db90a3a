//! Two-tier caching: a bounded in-process KV store and an on-disk,
//! content-addressed image cache.

use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

struct CacheEntry {
    value: serde_json::Value,
    expires_at: Instant,
}

#[derive(Debug, Default, Serialize)]
pub struct CacheStatsSnapshot {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
}

/// Bounded key→value store with TTL and least-recently-used eviction.
///
/// Expired entries are removed lazily on `get` and opportunistically by
/// `sweep`. A single writer lock is enough here: payloads are small and
/// accesses are adapter-paced, not hot-path.
pub struct KvCache {
    inner: Mutex<LruCache<String, CacheEntry>>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

impl KvCache {
    pub fn new(max_items: usize) -> Self {
        let cap = NonZeroUsize::new(max_items.max(1)).expect("clamped above zero");
        Self {
            inner: Mutex::new(LruCache::new(cap)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
        }
    }

    pub fn get(&self, key: &str) -> Option<serde_json::Value> {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        let mut expired = false;
        let value = match inner.get(key) {
            Some(entry) if entry.expires_at > now => Some(entry.value.clone()),
            Some(_) => {
                expired = true;
                None
            }
            None => None,
        };
        if let Some(value) = value {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Some(value);
        }
        if expired {
            inner.pop(key);
            self.expirations.fetch_add(1, Ordering::Relaxed);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    pub fn set(&self, key: impl Into<String>, value: serde_json::Value, ttl: Duration) {
        let key = key.into();
        let mut inner = self.inner.lock();
        if inner.len() == inner.cap().get() && !inner.contains(&key) {
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
        inner.put(
            key,
            CacheEntry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    pub fn invalidate(&self, key: &str) {
        self.inner.lock().pop(key);
    }

    /// Drop every expired entry.
    pub fn sweep(&self) {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        let expired: Vec<String> = inner
            .iter()
            .filter(|(_, entry)| entry.expires_at <= now)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            inner.pop(key);
        }
        self.expirations
            .fetch_add(expired.len() as u64, Ordering::Relaxed);
    }

    pub fn stats(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            entries: self.inner.lock().len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
        }
    }
}

/// On-disk image cache addressed by the source URL.
///
/// The path is derived from a SHA-256 of the URL, segmented two levels deep
/// to keep directories small. File existence is the cache check.
pub struct ImageCache {
    root: PathBuf,
}

impl ImageCache {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Deterministic cache path for a source URL.
    pub fn path_for(&self, url: &str) -> PathBuf {
        let digest = hex::encode(Sha256::digest(url.as_bytes()));
        let ext = url
            .rsplit('.')
            .next()
            .filter(|ext| ext.len() <= 4 && ext.chars().all(|c| c.is_ascii_alphanumeric()))
            .unwrap_or("img");
        self.root
            .join(&digest[..2])
            .join(&digest[2..4])
            .join(format!("{digest}.{ext}"))
    }

    pub fn contains(&self, url: &str) -> bool {
        self.path_for(url).is_file()
    }

    /// Store fetched image bytes; atomic via temp-file + rename.
    pub fn store(&self, url: &str, bytes: &[u8]) -> Result<PathBuf> {
        let path = self.path_for(url);
        let parent = path.parent().expect("segmented path has a parent");
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, bytes)
            .with_context(|| format!("failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, &path)
            .with_context(|| format!("failed to rename into {}", path.display()))?;
        Ok(path)
    }

    /// Adopt a pre-existing image tree by symlinking it in as the cache
    /// root. Contents are never copied. No-op when the root already exists.
    pub fn import_tree(&self, existing: &Path) -> Result<()> {
        if self.root.exists() {
            warn!(root = %self.root.display(), "image cache root already present, skipping import");
            return Ok(());
        }
        if let Some(parent) = self.root.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        #[cfg(unix)]
        std::os::unix::fs::symlink(existing, &self.root)
            .with_context(|| format!("failed to symlink {}", existing.display()))?;
        #[cfg(not(unix))]
        anyhow::bail!("image tree import requires symlink support");
        #[cfg(unix)]
        {
            info!(
                from = %existing.display(),
                to = %self.root.display(),
                "imported existing image tree"
            );
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_set_and_ttl_expiry() {
        let cache = KvCache::new(16);
        cache.set("steam_ref", serde_json::json!({"AK": 45.5}), Duration::from_secs(60));
        assert_eq!(
            cache.get("steam_ref").unwrap()["AK"],
            serde_json::json!(45.5)
        );

        cache.set("gone", serde_json::json!(1), Duration::from_millis(0));
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get("gone").is_none());

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.expirations, 1);
    }

    #[test]
    fn lru_evicts_least_recently_used() {
        let cache = KvCache::new(2);
        cache.set("a", serde_json::json!(1), Duration::from_secs(60));
        cache.set("b", serde_json::json!(2), Duration::from_secs(60));
        // Touch "a" so "b" is the eviction candidate.
        assert!(cache.get("a").is_some());
        cache.set("c", serde_json::json!(3), Duration::from_secs(60));

        assert!(cache.get("a").is_some());
        assert!(cache.get("b").is_none());
        assert!(cache.get("c").is_some());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn sweep_removes_expired_entries() {
        let cache = KvCache::new(8);
        cache.set("fresh", serde_json::json!(1), Duration::from_secs(60));
        cache.set("stale1", serde_json::json!(2), Duration::from_millis(0));
        cache.set("stale2", serde_json::json!(3), Duration::from_millis(0));
        std::thread::sleep(Duration::from_millis(5));

        cache.sweep();
        let stats = cache.stats();
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.expirations, 2);
    }

    #[test]
    fn image_paths_are_deterministic_and_segmented() {
        let root = tempfile::tempdir().unwrap();
        let cache = ImageCache::new(root.path().join("images"));

        let url = "https://community.fastly.steamstatic.com/economy/image/abc123.png";
        let a = cache.path_for(url);
        let b = cache.path_for(url);
        assert_eq!(a, b);
        assert!(a.to_string_lossy().ends_with(".png"));

        // Two-level fan-out below the root.
        let rel = a.strip_prefix(cache.root()).unwrap();
        assert_eq!(rel.components().count(), 3);

        let other = cache.path_for("https://example.com/other.png");
        assert_ne!(a, other);
    }

    #[test]
    fn store_then_contains() {
        let root = tempfile::tempdir().unwrap();
        let cache = ImageCache::new(root.path().join("images"));
        let url = "https://example.com/skin.jpg";

        assert!(!cache.contains(url));
        let path = cache.store(url, b"jpegbytes").unwrap();
        assert!(cache.contains(url));
        assert_eq!(std::fs::read(path).unwrap(), b"jpegbytes");
        // No temp residue.
        let parent = cache.path_for(url);
        assert!(!parent.with_extension("tmp").exists());
    }

    #[cfg(unix)]
    #[test]
    fn import_symlinks_existing_tree() {
        let root = tempfile::tempdir().unwrap();
        let external = root.path().join("external_images");
        std::fs::create_dir_all(&external).unwrap();
        std::fs::write(external.join("seed.png"), b"png").unwrap();

        let cache = ImageCache::new(root.path().join("cache").join("images"));
        cache.import_tree(&external).unwrap();

        assert!(cache.root().join("seed.png").exists());
        let meta = std::fs::symlink_metadata(cache.root()).unwrap();
        assert!(meta.file_type().is_symlink());

        // Second import is a no-op.
        cache.import_tree(&external).unwrap();
    }
}

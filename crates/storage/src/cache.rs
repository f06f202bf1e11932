#![forbid(unsafe_code)]

//! Content-addressed page cache with block-indexed invalidation.
//!
//! Entries are blob files under the cache directory, keyed by a digest of
//! `(path, params)`. A reverse index from block id to dependent page keys
//! lets the merger invalidate exactly the pages a merge touched. Eviction
//! is LRU by last access, bounded by total size; entries also expire by
//! TTL. Map state sits behind one `RwLock`; blob I/O happens outside it.

use crate::error::StorageError;
use crate::support::now_ms;
use sha2::Digest;
use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::RwLock;

const KEY_HEX_LEN: usize = 16;
const BLOB_EXT: &str = "html";

#[derive(Clone, Debug)]
pub struct CacheConfig {
    pub dir: PathBuf,
    pub max_size_mb: u64,
    pub ttl_hours: u64,
    pub enabled: bool,
}

impl CacheConfig {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            max_size_mb: 100,
            ttl_hours: 24,
            enabled: true,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct CacheStats {
    pub enabled: bool,
    pub entries: usize,
    pub size_bytes: u64,
    pub max_size_bytes: u64,
    pub hits: u64,
    pub misses: u64,
}

impl CacheStats {
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Clone, Debug)]
struct Entry {
    path: PathBuf,
    size: u64,
    created_ms: i64,
    accessed_ms: i64,
    blocks: Vec<String>,
}

#[derive(Default)]
struct State {
    entries: HashMap<String, Entry>,
    block_pages: HashMap<String, HashSet<String>>,
    size: u64,
    hits: u64,
    misses: u64,
}

impl State {
    fn detach(&mut self, key: &str) -> Option<Entry> {
        let entry = self.entries.remove(key)?;
        self.size = self.size.saturating_sub(entry.size);
        for block_id in &entry.blocks {
            if let Some(keys) = self.block_pages.get_mut(block_id) {
                keys.remove(key);
                if keys.is_empty() {
                    self.block_pages.remove(block_id);
                }
            }
        }
        Some(entry)
    }
}

pub struct PageCache {
    dir: PathBuf,
    max_size: u64,
    ttl_ms: i64,
    enabled: bool,
    state: RwLock<State>,
}

impl PageCache {
    /// Rehydrates entries from blobs already on disk; their dependency
    /// sets are unknown, so they are only reclaimable by TTL or eviction.
    pub fn new(cfg: CacheConfig) -> Result<Self, StorageError> {
        std::fs::create_dir_all(&cfg.dir)?;
        let cache = Self {
            dir: cfg.dir,
            max_size: cfg.max_size_mb * 1024 * 1024,
            ttl_ms: (cfg.ttl_hours * 3_600_000) as i64,
            enabled: cfg.enabled,
            state: RwLock::new(State::default()),
        };
        cache.load_existing()?;
        Ok(cache)
    }

    fn load_existing(&self) -> Result<(), StorageError> {
        let mut state = self.state.write().expect("cache lock");
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_file() || path.extension().map(|e| e != BLOB_EXT).unwrap_or(true) {
                continue;
            }
            let Some(key) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let Ok(meta) = entry.metadata() else {
                continue;
            };
            let modified_ms = meta
                .modified()
                .ok()
                .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                .map(|d| d.as_millis() as i64)
                .unwrap_or(0);
            state.size += meta.len();
            state.entries.insert(
                key.to_string(),
                Entry {
                    path: path.clone(),
                    size: meta.len(),
                    created_ms: modified_ms,
                    accessed_ms: modified_ms,
                    blocks: Vec::new(),
                },
            );
        }
        tracing::info!(
            entries = state.entries.len(),
            size_bytes = state.size,
            "loaded cache entries"
        );
        Ok(())
    }

    /// Deterministic key: first 16 hex chars of SHA-256 over the path and
    /// the params sorted by name.
    pub fn key_for_page(path: &str, params: &[(&str, &str)]) -> String {
        let mut sorted: Vec<(&str, &str)> = params.to_vec();
        sorted.sort();
        let mut hasher = sha2::Sha256::new();
        hasher.update(path.as_bytes());
        for (name, value) in sorted {
            hasher.update(name.as_bytes());
            hasher.update(value.as_bytes());
        }
        let digest = hasher.finalize();
        let mut out = String::with_capacity(KEY_HEX_LEN);
        for b in digest {
            let _ = write!(&mut out, "{b:02x}");
            if out.len() >= KEY_HEX_LEN {
                break;
            }
        }
        out.truncate(KEY_HEX_LEN);
        out
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        if !self.enabled {
            return None;
        }
        let now = now_ms();
        let path = {
            let mut state = self.state.write().expect("cache lock");
            let Some(entry) = state.entries.get_mut(key) else {
                state.misses += 1;
                return None;
            };
            if now - entry.created_ms > self.ttl_ms {
                let stale = state.detach(key);
                state.misses += 1;
                if let Some(stale) = stale {
                    let _ = std::fs::remove_file(stale.path);
                }
                return None;
            }
            entry.accessed_ms = now;
            entry.path.clone()
        };

        match std::fs::read(&path) {
            Ok(data) => {
                let mut state = self.state.write().expect("cache lock");
                state.hits += 1;
                Some(data)
            }
            Err(_) => {
                let mut state = self.state.write().expect("cache lock");
                state.detach(key);
                state.misses += 1;
                None
            }
        }
    }

    pub fn set(
        &self,
        key: &str,
        data: &[u8],
        depends_on_blocks: &[String],
    ) -> Result<(), StorageError> {
        if !self.enabled {
            return Ok(());
        }
        let path = self.blob_path(key);
        std::fs::write(&path, data)?;

        let now = now_ms();
        let mut evicted: Vec<PathBuf> = Vec::new();
        {
            let mut state = self.state.write().expect("cache lock");
            if let Some(old) = state.detach(key) {
                if old.path != path {
                    evicted.push(old.path);
                }
            }
            while state.size + data.len() as u64 > self.max_size && !state.entries.is_empty() {
                let oldest = state
                    .entries
                    .iter()
                    .min_by_key(|(_, e)| e.accessed_ms)
                    .map(|(k, _)| k.clone());
                let Some(oldest) = oldest else { break };
                if let Some(entry) = state.detach(&oldest) {
                    evicted.push(entry.path);
                }
            }
            state.size += data.len() as u64;
            state.entries.insert(
                key.to_string(),
                Entry {
                    path,
                    size: data.len() as u64,
                    created_ms: now,
                    accessed_ms: now,
                    blocks: depends_on_blocks.to_vec(),
                },
            );
            for block_id in depends_on_blocks {
                state
                    .block_pages
                    .entry(block_id.clone())
                    .or_default()
                    .insert(key.to_string());
            }
        }
        for path in evicted {
            let _ = std::fs::remove_file(path);
        }
        Ok(())
    }

    pub fn delete(&self, key: &str) {
        let removed = {
            let mut state = self.state.write().expect("cache lock");
            state.detach(key)
        };
        if let Some(entry) = removed {
            let _ = std::fs::remove_file(entry.path);
        }
    }

    /// Drop every page that depends on the block. Returns how many pages
    /// were invalidated.
    pub fn invalidate_block(&self, block_id: &str) -> usize {
        let removed = {
            let mut state = self.state.write().expect("cache lock");
            let Some(keys) = state.block_pages.remove(block_id) else {
                return 0;
            };
            let mut removed = Vec::with_capacity(keys.len());
            for key in keys {
                if let Some(entry) = state.detach(&key) {
                    removed.push(entry.path);
                }
            }
            removed
        };
        let count = removed.len();
        for path in removed {
            let _ = std::fs::remove_file(path);
        }
        if count > 0 {
            tracing::debug!(block_id = %block_id, pages = count, "invalidated cached pages");
        }
        count
    }

    pub fn invalidate_blocks<S: AsRef<str>>(&self, block_ids: &[S]) -> usize {
        block_ids
            .iter()
            .map(|id| self.invalidate_block(id.as_ref()))
            .sum()
    }

    pub fn clear(&self) -> Result<(), StorageError> {
        let paths: Vec<PathBuf> = {
            let mut state = self.state.write().expect("cache lock");
            let paths = state.entries.values().map(|e| e.path.clone()).collect();
            *state = State {
                hits: state.hits,
                misses: state.misses,
                ..State::default()
            };
            paths
        };
        for path in paths {
            let _ = std::fs::remove_file(path);
        }
        tracing::info!("cache cleared");
        Ok(())
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.state.read().expect("cache lock");
        CacheStats {
            enabled: self.enabled,
            entries: state.entries.len(),
            size_bytes: state.size,
            max_size_bytes: self.max_size,
            hits: state.hits,
            misses: state.misses,
        }
    }

    fn blob_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.{BLOB_EXT}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_cache(test_name: &str, max_size_mb: u64) -> PageCache {
        let base = std::env::temp_dir();
        let pid = std::process::id();
        let nonce = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let dir = base.join(format!("tessera_cache_{test_name}_{pid}_{nonce}"));
        PageCache::new(CacheConfig {
            dir,
            max_size_mb,
            ttl_hours: 24,
            enabled: true,
        })
        .expect("create cache")
    }

    #[test]
    fn keys_are_deterministic_and_order_insensitive() {
        let a = PageCache::key_for_page("/x", &[("a", "1"), ("b", "2")]);
        let b = PageCache::key_for_page("/x", &[("b", "2"), ("a", "1")]);
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
        assert_ne!(a, PageCache::key_for_page("/x", &[("a", "1")]));
        assert_ne!(a, PageCache::key_for_page("/y", &[("a", "1"), ("b", "2")]));
    }

    #[test]
    fn set_get_and_block_invalidation() {
        let cache = temp_cache("set_get_invalidate", 10);
        let key = PageCache::key_for_page("/x", &[]);
        cache
            .set(&key, b"<html>x</html>", &["b1".to_string()])
            .expect("set");
        assert_eq!(cache.get(&key), Some(b"<html>x</html>".to_vec()));

        assert_eq!(cache.invalidate_block("b1"), 1);
        assert_eq!(cache.get(&key), None);
        // Second invalidation finds nothing.
        assert_eq!(cache.invalidate_block("b1"), 0);

        let stats = cache.stats();
        assert_eq!(stats.entries, 0);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn size_counter_tracks_entries() {
        let cache = temp_cache("size_counter", 10);
        cache.set("k1", b"aaaa", &[]).expect("set k1");
        cache.set("k2", b"bbbbbb", &[]).expect("set k2");
        assert_eq!(cache.stats().size_bytes, 10);
        cache.delete("k1");
        assert_eq!(cache.stats().size_bytes, 6);
        // Replacing an entry swaps its size, not accumulates it.
        cache.set("k2", b"cc", &[]).expect("replace k2");
        assert_eq!(cache.stats().size_bytes, 2);
    }

    #[test]
    fn clear_preserves_counters() {
        let cache = temp_cache("clear", 10);
        cache.set("k1", b"data", &["b1".to_string()]).expect("set");
        let _ = cache.get("k1");
        let _ = cache.get("missing");
        cache.clear().expect("clear");
        let stats = cache.stats();
        assert_eq!(stats.entries, 0);
        assert_eq!(stats.size_bytes, 0);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(cache.invalidate_block("b1"), 0);
    }
}

//! Active (unsealed) key-value trie with concurrent point readers.
//!
//! The writer owns the current *generation*: an ordered map behind one
//! read-write lock. Writers hold the write lock for a single insert or
//! delete; readers hold the read lock for a single lookup. Nothing is held
//! across I/O.
//!
//! Readers keep an `Arc` to the generation they were created on. When the
//! writer publishes a new generation (`reset`), existing readers keep a
//! valid, stale view until they `refresh()`. Dropping a reader only drops
//! its handles; the writer state is never freed from under it.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::config::KvOnlineConfig;
use crate::error::{Result, StoreError};
use crate::kv::timestamp;

/// Bookkeeping cost charged per entry on top of key and value bytes.
const ENTRY_OVERHEAD: u64 = 48;

/// Value slot. `value == None` is a delete tombstone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvEntry {
    pub value: Option<Vec<u8>>,
    /// Normalized (seconds) write timestamp.
    pub timestamp_secs: i64,
}

impl KvEntry {
    pub fn is_deleted(&self) -> bool {
        self.value.is_none()
    }

    fn cost(key: &[u8], value: Option<&[u8]>) -> u64 {
        key.len() as u64 + value.map_or(0, |v| v.len() as u64) + ENTRY_OVERHEAD
    }
}

struct TrieGeneration {
    generation: u64,
    map: RwLock<BTreeMap<Vec<u8>, KvEntry>>,
}

impl TrieGeneration {
    fn new(generation: u64) -> Self {
        Self {
            generation,
            map: RwLock::new(BTreeMap::new()),
        }
    }
}

/// Descriptor shared by the writer and every reader.
struct TrieShared {
    current: RwLock<Arc<TrieGeneration>>,
}

// ── Writer ─────────────────────────────────────────────────────────

pub struct TrieSegmentWriter {
    /// Generation this writer fills. Published through `shared`.
    generation: Arc<TrieGeneration>,
    shared: Arc<TrieShared>,
    config: KvOnlineConfig,
    bytes: u64,
    entries: u64,
}

impl TrieSegmentWriter {
    pub fn new(config: KvOnlineConfig) -> Self {
        let generation = Arc::new(TrieGeneration::new(0));
        Self {
            shared: Arc::new(TrieShared {
                current: RwLock::new(generation.clone()),
            }),
            generation,
            config,
            bytes: 0,
            entries: 0,
        }
    }

    /// Writer for the next generation on the same descriptor. Readers of
    /// this writer become stale and `refresh()` onto the successor. This
    /// writer keeps its own (now unpublished) generation.
    pub fn successor(&self) -> TrieSegmentWriter {
        let generation = Arc::new(TrieGeneration::new(self.generation.generation + 1));
        *self.shared.current.write() = generation.clone();
        TrieSegmentWriter {
            generation,
            shared: self.shared.clone(),
            config: self.config,
            bytes: 0,
            entries: 0,
        }
    }

    /// Insert or overwrite `key`. `timestamp_us` is normalized on write.
    pub fn insert(&mut self, key: &[u8], value: &[u8], timestamp_us: i64) -> Result<()> {
        self.put(key, Some(value), timestamp_us)
    }

    /// Record a delete tombstone for `key`.
    pub fn delete(&mut self, key: &[u8], timestamp_us: i64) -> Result<()> {
        self.put(key, None, timestamp_us)
    }

    fn put(&mut self, key: &[u8], value: Option<&[u8]>, timestamp_us: i64) -> Result<()> {
        let cost = KvEntry::cost(key, value);
        let threshold = self.config.build_protection_threshold;
        if threshold > 0 && self.bytes + cost > threshold {
            return Err(StoreError::BuildProtection {
                bytes: self.bytes,
                threshold,
            });
        }

        let entry = KvEntry {
            value: value.map(<[u8]>::to_vec),
            timestamp_secs: timestamp::normalize(timestamp_us),
        };
        let previous = self.generation.map.write().insert(key.to_vec(), entry);
        match previous {
            Some(old) => {
                let old_cost = KvEntry::cost(key, old.value.as_deref());
                self.bytes = self.bytes - old_cost + cost;
            }
            None => {
                self.bytes += cost;
                self.entries += 1;
            }
        }
        Ok(())
    }

    /// Number of distinct keys (tombstones included).
    pub fn len(&self) -> u64 {
        self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries == 0
    }

    /// Estimated bytes held by the current generation.
    pub fn memory_use(&self) -> u64 {
        self.bytes
    }

    /// True once `count_limits` keys are held. The owner should dump.
    pub fn is_full(&self) -> bool {
        self.config.count_limits > 0 && self.entries >= self.config.count_limits
    }

    pub fn generation(&self) -> u64 {
        self.generation.generation
    }

    pub fn reader(&self) -> TrieSegmentReader {
        TrieSegmentReader {
            generation: self.generation.clone(),
            shared: self.shared.clone(),
        }
    }

    /// Point lookup from the writer side.
    pub fn lookup(&self, key: &[u8]) -> Option<KvEntry> {
        self.generation.map.read().get(key).cloned()
    }

    /// Copy of all entries in key order (used when sealing).
    pub fn entries(&self) -> Vec<(Vec<u8>, KvEntry)> {
        self.generation
            .map
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Publish a fresh, empty generation. Readers on the old generation
    /// keep their snapshot.
    pub fn reset(&mut self) {
        let generation = Arc::new(TrieGeneration::new(self.generation.generation + 1));
        *self.shared.current.write() = generation.clone();
        self.generation = generation;
        self.bytes = 0;
        self.entries = 0;
    }
}

// ── Reader ─────────────────────────────────────────────────────────

/// Read-only view over a trie generation. `Clone` shares the same
/// generation; no data is copied.
#[derive(Clone)]
pub struct TrieSegmentReader {
    generation: Arc<TrieGeneration>,
    shared: Arc<TrieShared>,
}

impl TrieSegmentReader {
    /// Raw entry, tombstones included. `None` means the key was never written.
    pub fn lookup(&self, key: &[u8]) -> Option<KvEntry> {
        self.generation.map.read().get(key).cloned()
    }

    /// Live value, `None` for absent or deleted keys.
    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.lookup(key).and_then(|e| e.value)
    }

    /// Live value that has not outlived `ttl_secs` at `now_us`.
    pub fn get_live(&self, key: &[u8], now_us: i64, ttl_secs: i64) -> Option<Vec<u8>> {
        let entry = self.lookup(key)?;
        if timestamp::is_expired(entry.timestamp_secs, ttl_secs, now_us) {
            return None;
        }
        entry.value
    }

    /// All entries whose key starts with `prefix`, in key order.
    pub fn prefix_scan(&self, prefix: &[u8]) -> Vec<(Vec<u8>, KvEntry)> {
        let map = self.generation.map.read();
        map.range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.generation.map.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn generation(&self) -> u64 {
        self.generation.generation
    }

    /// True when the writer has published a newer generation.
    pub fn is_stale(&self) -> bool {
        self.shared.current.read().generation != self.generation.generation
    }

    /// Move to the writer's latest generation.
    pub fn refresh(&mut self) {
        self.generation = self.shared.current.read().clone();
    }
}

impl std::fmt::Debug for TrieSegmentReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrieSegmentReader")
            .field("generation", &self.generation.generation)
            .finish()
    }
}

// ── Tests ──────────────────────────────────────────────────────────

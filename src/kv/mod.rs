//! Key-value helpers for the active segment: expiry timestamps and the
//! concurrently readable in-memory trie.

pub mod timestamp;
pub mod trie;

pub use timestamp::normalize;
pub use trie::{KvEntry, TrieSegmentReader, TrieSegmentWriter};

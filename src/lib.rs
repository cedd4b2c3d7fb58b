//! segstore: a segment-based document store.
//!
//! Documents enter through a [`partition::PartitionWriter`] into an
//! in-memory building segment, get sealed into immutable segments, and are
//! periodically merged under a [`merge::MergePolicy`]. Merges reclaim
//! matching documents and truncate long postings while readers keep
//! working against published snapshots.

pub mod attribute;
pub mod config;
pub mod document;
pub mod error;
pub mod index;
pub mod kv;
pub mod locator;
pub mod merge;
pub mod metrics;
pub mod partition;
pub mod schema;
pub mod segment;
pub mod types;

pub use config::EngineConfig;
pub use document::{DocOperation, Document};
pub use error::{Result, StoreError};
pub use locator::Locator;
pub use partition::{need_rewrite_document, Partition, PartitionWriter};
pub use schema::Schema;

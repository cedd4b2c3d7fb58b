//! Partition: sealed segments, deletions, and the writer feeding them.

pub mod snapshot;
pub mod store;
pub mod writer;

pub use snapshot::{DocAddress, PartitionSnapshot, SegmentEntry};
pub use store::Partition;
pub use writer::{need_rewrite_document, BuildOutcome, PartitionWriter};

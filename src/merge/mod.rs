//! Merging sealed segments.
//!
//! A [`MergePolicy`] plans a [`MergeTask`], the [`MergeExecutor`] builds
//! the output segments from a snapshot, and `Partition::publish_merge`
//! commits them. Reclaim and posting truncation run inside the executor.

pub mod comparator;
pub mod executor;
pub mod policy;
pub mod reclaimer;
pub mod reference;
pub mod scheduler;
pub mod task;
pub mod truncate;

pub use comparator::{ComboComparator, Comparator, DocIdComparator, ReferenceComparator, SortOrder};
pub use executor::{MergeExecutor, MergeOutput, MergedInput};
pub use policy::{create_merge_policy, effective_merge_policy, MergePolicy};
pub use reclaimer::{IndexReclaimer, ReclaimCondition, ReclaimParam};
pub use reference::{DocInfo, DocInfoAllocator, Reference};
pub use scheduler::{run_merge, CancelToken, MergeScheduler, MergeSummary};
pub use task::{MergeSegmentDescription, MergeTask};
pub use truncate::{SortField, TruncateProfile};

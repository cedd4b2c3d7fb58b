//! Merge policies, selected per table type.

use std::collections::BTreeMap;
use std::str::FromStr;

use tracing::debug;

use crate::error::{Result, StoreError};
use crate::merge::task::{MergeSegmentDescription, MergeTask};
use crate::partition::PartitionSnapshot;

pub const DEFAULT_MAX_SEGMENT_COUNT: usize = 8;
pub const DEFAULT_MERGE_FACTOR: usize = 4;

/// How sealed segments are combined.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum MergePolicy {
    /// All segments into one.
    #[default]
    FullCompaction,
    /// All segments, re-split into outputs of `target_doc_count` live docs.
    SplitByDocCount { target_doc_count: u32 },
    /// Once more than `max_segment_count` segments exist, merge the
    /// `merge_factor` adjacent segments holding the fewest live docs.
    Tiered {
        max_segment_count: usize,
        merge_factor: usize,
    },
}

impl MergePolicy {
    /// Next task for `snapshot`, or `None` when there is nothing to merge.
    pub fn plan(&self, snapshot: &PartitionSnapshot) -> Option<MergeTask> {
        let entries = snapshot.entries();
        if entries.is_empty() {
            return None;
        }
        let task = match self {
            MergePolicy::FullCompaction => {
                if entries.len() == 1 && !entries[0].has_deletions() {
                    return None;
                }
                Self::full_task(snapshot)
            }
            MergePolicy::SplitByDocCount { target_doc_count } => {
                let target = (*target_doc_count).max(1);
                let live = snapshot.live_doc_count();
                let clean = entries.iter().all(|e| !e.has_deletions());
                let sized = entries
                    .iter()
                    .all(|e| e.segment.doc_count() <= target);
                if clean && sized && entries.len() as u64 == live.div_ceil(target as u64) {
                    return None;
                }
                let outputs = live.div_ceil(target as u64).max(1) as usize;
                let targets = (0..outputs)
                    .map(|_| MergeSegmentDescription::new(target))
                    .collect();
                MergeTask::new(snapshot.segment_ids(), targets)
            }
            MergePolicy::Tiered {
                max_segment_count,
                merge_factor,
            } => {
                if entries.len() <= *max_segment_count || entries.len() < 2 {
                    return None;
                }
                let window = (*merge_factor).max(2).min(entries.len());
                let live: Vec<u64> = entries.iter().map(|e| e.live_doc_count()).collect();
                let start = (0..=entries.len() - window)
                    .min_by_key(|&i| live[i..i + window].iter().sum::<u64>())?;
                let inputs = entries[start..start + window]
                    .iter()
                    .map(|e| e.segment.id())
                    .collect();
                let total: u64 = live[start..start + window].iter().sum();
                MergeTask::new(inputs, vec![MergeSegmentDescription::new(clamp_u32(total))])
            }
        };
        debug!(
            policy = ?self,
            inputs = ?task.input_segments,
            outputs = task.target_segments.len(),
            "merge planned"
        );
        Some(task)
    }

    /// Every segment into one output sized to the live doc count.
    pub fn full_task(snapshot: &PartitionSnapshot) -> MergeTask {
        MergeTask::new(
            snapshot.segment_ids(),
            vec![MergeSegmentDescription::new(clamp_u32(snapshot.live_doc_count()))],
        )
    }
}

fn clamp_u32(v: u64) -> u32 {
    u32::try_from(v).unwrap_or(u32::MAX)
}

/// Policy for a table type. `Ok(None)` means the table has no custom policy
/// and the caller falls back to [`MergePolicy::FullCompaction`].
pub fn create_merge_policy(
    table_type: &str,
    params: &BTreeMap<String, String>,
) -> Result<Option<MergePolicy>> {
    match table_type {
        "" | "normal" | "kv" => Ok(None),
        "split" => {
            let target_doc_count: u32 = required_param(params, "target_doc_count")?;
            if target_doc_count == 0 {
                return Err(StoreError::Config("target_doc_count must be > 0".into()));
            }
            Ok(Some(MergePolicy::SplitByDocCount { target_doc_count }))
        }
        "tiered" => {
            let max_segment_count =
                optional_param(params, "max_segment_count")?.unwrap_or(DEFAULT_MAX_SEGMENT_COUNT);
            let merge_factor =
                optional_param(params, "merge_factor")?.unwrap_or(DEFAULT_MERGE_FACTOR);
            if merge_factor < 2 {
                return Err(StoreError::Config("merge_factor must be >= 2".into()));
            }
            Ok(Some(MergePolicy::Tiered {
                max_segment_count,
                merge_factor,
            }))
        }
        other => Err(StoreError::Config(format!("unknown table type '{}'", other))),
    }
}

/// [`create_merge_policy`] with the full-compaction fallback applied.
pub fn effective_merge_policy(
    table_type: &str,
    params: &BTreeMap<String, String>,
) -> Result<MergePolicy> {
    Ok(create_merge_policy(table_type, params)?.unwrap_or_default())
}

fn optional_param<T: FromStr>(params: &BTreeMap<String, String>, key: &str) -> Result<Option<T>> {
    match params.get(key) {
        None => Ok(None),
        Some(raw) => raw.trim().parse().map(Some).map_err(|_| {
            StoreError::Config(format!("merge param '{}' has invalid value '{}'", key, raw))
        }),
    }
}

fn required_param<T: FromStr>(params: &BTreeMap<String, String>, key: &str) -> Result<T> {
    optional_param(params, key)?
        .ok_or_else(|| StoreError::Config(format!("merge param '{}' is required", key)))
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KvOnlineConfig;
    use crate::document::Document;
    use crate::partition::Partition;
    use crate::schema::Schema;
    use crate::segment::InMemorySegment;
    use std::sync::Arc;

    fn params(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn partition(sizes: &[u32]) -> Partition {
        let schema = Arc::new(Schema::new("t", "id"));
        let partition = Partition::in_memory(schema.clone());
        let mut pk = 0;
        for &size in sizes {
            let mut seg = InMemorySegment::new(schema.clone(), KvOnlineConfig::default());
            for _ in 0..size {
                seg.add_document(&Document::add(&pk.to_string())).unwrap();
                pk += 1;
            }
            let id = partition.allocate_segment_id();
            let (sealed, deleted) = seg.seal(id);
            partition.add_segment(sealed, deleted).unwrap();
        }
        partition
    }

    #[test]
    fn test_factory_default_is_no_policy() {
        assert_eq!(create_merge_policy("", &BTreeMap::new()).unwrap(), None);
        assert_eq!(create_merge_policy("normal", &BTreeMap::new()).unwrap(), None);
        assert_eq!(create_merge_policy("kv", &BTreeMap::new()).unwrap(), None);
        assert_eq!(
            effective_merge_policy("normal", &BTreeMap::new()).unwrap(),
            MergePolicy::FullCompaction
        );
    }

    #[test]
    fn test_factory_variants() {
        assert_eq!(
            create_merge_policy("split", &params(&[("target_doc_count", "100")])).unwrap(),
            Some(MergePolicy::SplitByDocCount {
                target_doc_count: 100
            })
        );
        assert_eq!(
            create_merge_policy("tiered", &params(&[("merge_factor", "3")])).unwrap(),
            Some(MergePolicy::Tiered {
                max_segment_count: DEFAULT_MAX_SEGMENT_COUNT,
                merge_factor: 3
            })
        );
    }

    #[test]
    fn test_factory_errors() {
        assert!(create_merge_policy("split", &BTreeMap::new()).is_err());
        assert!(create_merge_policy("split", &params(&[("target_doc_count", "x")])).is_err());
        assert!(create_merge_policy("split", &params(&[("target_doc_count", "0")])).is_err());
        assert!(create_merge_policy("tiered", &params(&[("merge_factor", "1")])).is_err());
        let err = create_merge_policy("graph", &BTreeMap::new()).unwrap_err();
        assert_eq!(err.code(), "INVALID_CONFIG");
    }

    #[test]
    fn test_full_compaction_plan() {
        assert!(MergePolicy::FullCompaction.plan(&partition(&[]).snapshot()).is_none());
        assert!(MergePolicy::FullCompaction.plan(&partition(&[3]).snapshot()).is_none());

        let task = MergePolicy::FullCompaction
            .plan(&partition(&[3, 2, 4]).snapshot())
            .unwrap();
        assert_eq!(task.input_segments.len(), 3);
        assert_eq!(task.target_segments.len(), 1);
        assert_eq!(task.target_segments[0].target_doc_count, 9);
    }

    #[test]
    fn test_full_compaction_single_segment_with_deletes() {
        let p = partition(&[3]);
        let id = p.snapshot().segment_ids()[0];
        p.delete(id, 1).unwrap();
        let task = MergePolicy::FullCompaction.plan(&p.snapshot()).unwrap();
        assert_eq!(task.target_segments[0].target_doc_count, 2);
    }

    #[test]
    fn test_split_plan() {
        let policy = MergePolicy::SplitByDocCount {
            target_doc_count: 4,
        };
        let task = policy.plan(&partition(&[5, 5]).snapshot()).unwrap();
        assert_eq!(task.target_segments.len(), 3);
        assert!(task.target_segments.iter().all(|t| t.target_doc_count == 4));
        assert!(policy.plan(&partition(&[4, 4]).snapshot()).is_none());
    }

    #[test]
    fn test_tiered_picks_smallest_window() {
        let policy = MergePolicy::Tiered {
            max_segment_count: 3,
            merge_factor: 2,
        };
        assert!(policy.plan(&partition(&[5, 5, 5]).snapshot()).is_none());
        let snapshot = partition(&[9, 1, 1, 9]).snapshot();
        let ids = snapshot.segment_ids();
        let task = policy.plan(&snapshot).unwrap();
        assert_eq!(task.input_segments, vec![ids[1], ids[2]]);
        assert_eq!(task.target_segments[0].target_doc_count, 2);
    }

    #[test]
    fn test_tiered_zero_max_segment_count() {
        let policy = create_merge_policy("tiered", &params(&[("max_segment_count", "0")]))
            .unwrap()
            .unwrap();
        assert!(policy.plan(&partition(&[4]).snapshot()).is_none());

        let snapshot = partition(&[4, 1]).snapshot();
        let task = policy.plan(&snapshot).unwrap();
        assert_eq!(task.input_segments, snapshot.segment_ids());
        assert_eq!(task.target_segments[0].target_doc_count, 5);
    }
}

//! Integration test: merge, reclaim and publication semantics.

use std::collections::BTreeSet;
use std::sync::Arc;

use proptest::prelude::*;
use segstore::config::EngineConfig;
use segstore::merge::{
    run_merge, CancelToken, MergeExecutor, MergePolicy, MergeSegmentDescription, MergeTask,
    ReclaimParam,
};
use segstore::partition::DocAddress;
use segstore::schema::{AttributeConfig, IndexConfig, Schema};
use segstore::types::{AttributeValue, FieldType};
use segstore::{Document, Partition, PartitionWriter};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn config() -> EngineConfig {
    let schema = Schema::new("items", "id")
        .with_attribute(AttributeConfig::new(0, "n", FieldType::Int64))
        .with_attribute(AttributeConfig::new(1, "status", FieldType::String))
        .with_index(IndexConfig::new(0, "body", "body"));
    EngineConfig::new(schema)
}

/// One doc per flag, `status = "gone"` where the flag is set. Dumps every
/// `per_segment` docs.
fn load(config: &EngineConfig, flags: &[bool], per_segment: usize) -> Arc<Partition> {
    let partition = Arc::new(Partition::in_memory(Arc::new(config.schema.clone())));
    let mut writer = PartitionWriter::new(partition.clone(), config, None);
    for (i, gone) in flags.iter().enumerate() {
        let doc = Document::add(&format!("pk{}", i))
            .with_field("n", &i.to_string())
            .with_field("status", if *gone { "gone" } else { "live" })
            .with_field("body", &format!("all t{}", i % 3));
        writer.build(doc).unwrap();
        if (i + 1) % per_segment == 0 {
            writer.dump().unwrap();
        }
    }
    writer.dump().unwrap();
    partition
}

fn live_numbers(partition: &Partition, hits: &[DocAddress]) -> BTreeSet<i64> {
    let snapshot = partition.snapshot();
    hits.iter()
        .map(|a| match snapshot.attribute(a.segment_id, a.doc_id, "n").unwrap() {
            Some(AttributeValue::Int(n)) => n,
            other => panic!("unexpected value {:?}", other),
        })
        .collect()
}

fn reclaiming_executor(config: &EngineConfig) -> MergeExecutor {
    let mut config = config.clone();
    config.merge.reclaim = vec![ReclaimParam::equal("status", "gone")];
    MergeExecutor::new(&config, None)
}

// ---------------------------------------------------------------------------
// Tests: reclaim exactness
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn reclaimed_docs_absent_others_retained(flags in prop::collection::vec(any::<bool>(), 0..40)) {
        let config = config();
        let partition = load(&config, &flags, 7);
        // Explicit task: a lone clean segment would not be planned.
        let ids = partition.snapshot().segment_ids();
        let result = if ids.is_empty() {
            None
        } else {
            let task = MergeTask::new(ids, vec![MergeSegmentDescription::new(flags.len() as u32)]);
            run_merge(
                &partition,
                &reclaiming_executor(&config),
                &MergePolicy::FullCompaction,
                Some(task),
                &CancelToken::new(),
            )
            .unwrap()
        };

        let expected: BTreeSet<i64> = flags
            .iter()
            .enumerate()
            .filter(|(_, gone)| !**gone)
            .map(|(i, _)| i as i64)
            .collect();
        let snapshot = partition.snapshot();
        let hits = snapshot.search("body", "all");
        prop_assert_eq!(live_numbers(&partition, &hits), expected.clone());
        prop_assert_eq!(snapshot.live_doc_count(), expected.len() as u64);
        for (i, gone) in flags.iter().enumerate() {
            prop_assert_eq!(snapshot.lookup_pk(&format!("pk{}", i)).is_none(), *gone);
        }
        if let Some(summary) = result {
            let reclaimed = flags.iter().filter(|g| **g).count() as u64;
            prop_assert_eq!(summary.docs_reclaimed, reclaimed);
        }
    }
}

#[test]
fn reclaim_zero_matches_keeps_everything() {
    let config = config();
    let partition = load(&config, &[false; 10], 4);
    run_merge(
        &partition,
        &reclaiming_executor(&config),
        &MergePolicy::FullCompaction,
        None,
        &CancelToken::new(),
    )
    .unwrap()
    .unwrap();
    let snapshot = partition.snapshot();
    assert_eq!(snapshot.entries().len(), 1);
    assert_eq!(snapshot.search("body", "all").len(), 10);
    assert_eq!(snapshot.search("body", "t1").len(), 3);
}

#[test]
fn reclaim_all_matches_leaves_empty_partition() {
    let config = config();
    let partition = load(&config, &[true; 6], 4);
    let summary = run_merge(
        &partition,
        &reclaiming_executor(&config),
        &MergePolicy::FullCompaction,
        None,
        &CancelToken::new(),
    )
    .unwrap()
    .unwrap();
    assert_eq!(summary.docs_reclaimed, 6);
    assert!(summary.outputs.is_empty());
    let snapshot = partition.snapshot();
    assert!(snapshot.entries().is_empty());
    assert!(snapshot.search("body", "all").is_empty());
}

// ---------------------------------------------------------------------------
// Tests: publication
// ---------------------------------------------------------------------------

#[test]
fn deletes_after_snapshot_carry_over() {
    let config = config();
    let partition = load(&config, &[false; 6], 3);
    let snapshot = partition.snapshot();
    let task = MergeTask::new(snapshot.segment_ids(), vec![MergeSegmentDescription::new(6)]);
    let ids = vec![partition.allocate_segment_id()];
    let output = MergeExecutor::new(&config, None)
        .execute(&snapshot, &task, &ids, &CancelToken::new())
        .unwrap();

    // Lands between execute and publish.
    let late = partition.snapshot().lookup_pk("pk4").unwrap();
    partition.delete(late.segment_id, late.doc_id).unwrap();

    partition.publish_merge(output).unwrap();
    let after = partition.snapshot();
    assert!(after.lookup_pk("pk4").is_none());
    assert_eq!(after.live_doc_count(), 5);
    assert_eq!(after.entries().len(), 1);
}

#[test]
fn publish_conflicts_when_input_gone() {
    let config = config();
    let partition = load(&config, &[false; 6], 2);
    let snapshot = partition.snapshot();
    let ids = snapshot.segment_ids();
    let executor = MergeExecutor::new(&config, None);

    let first = MergeTask::new(ids[..2].to_vec(), vec![MergeSegmentDescription::new(4)]);
    let out_a = executor
        .execute(&snapshot, &first, &[partition.allocate_segment_id()], &CancelToken::new())
        .unwrap();
    let second = MergeTask::new(ids[1..].to_vec(), vec![MergeSegmentDescription::new(4)]);
    let out_b = executor
        .execute(&snapshot, &second, &[partition.allocate_segment_id()], &CancelToken::new())
        .unwrap();

    partition.publish_merge(out_a).unwrap();
    let version = partition.snapshot().version();
    let err = partition.publish_merge(out_b).unwrap_err();
    assert_eq!(err.code(), "MERGE_CONFLICT");
    assert_eq!(partition.snapshot().version(), version);
    assert_eq!(partition.snapshot().live_doc_count(), 6);
}

#[test]
fn delete_by_pk_resolves_against_current_segments() {
    let config = config();
    let partition = load(&config, &[false; 6], 3);
    let stale = partition.snapshot().lookup_pk("pk1").unwrap();
    run_merge(
        &partition,
        &MergeExecutor::new(&config, None),
        &MergePolicy::FullCompaction,
        None,
        &CancelToken::new(),
    )
    .unwrap()
    .unwrap();

    // The pre-merge address names a retired segment.
    let err = partition.delete(stale.segment_id, stale.doc_id).unwrap_err();
    assert_eq!(err.code(), "UNKNOWN_SEGMENT");
    assert!(partition.delete_pk("pk1").unwrap());
    assert!(!partition.delete_pk("pk1").unwrap());
    assert!(partition.snapshot().lookup_pk("pk1").is_none());
    assert_eq!(partition.snapshot().live_doc_count(), 5);
}

#[test]
fn merged_output_replaces_inputs_in_place() {
    let config = config();
    let partition = load(&config, &[false; 8], 2);
    let ids = partition.snapshot().segment_ids();
    assert_eq!(ids.len(), 4);

    let task = MergeTask::new(ids[1..3].to_vec(), vec![MergeSegmentDescription::new(4)]);
    let summary = run_merge(
        &partition,
        &MergeExecutor::new(&config, None),
        &MergePolicy::FullCompaction,
        Some(task),
        &CancelToken::new(),
    )
    .unwrap()
    .unwrap();
    assert_eq!(
        partition.snapshot().segment_ids(),
        vec![ids[0], summary.outputs[0], ids[3]]
    );

    // Newest version still wins after a re-add.
    let mut writer = PartitionWriter::new(partition.clone(), &config, None);
    writer
        .build(Document::add("pk3").with_field("n", "300").with_field("body", "all"))
        .unwrap();
    writer.dump().unwrap();
    let hit = partition.snapshot().lookup_pk("pk3").unwrap();
    assert_eq!(
        partition.snapshot().attribute(hit.segment_id, hit.doc_id, "n").unwrap(),
        Some(AttributeValue::Int(300))
    );
    assert_eq!(partition.snapshot().live_doc_count(), 8);
}

#[test]
fn split_policy_outputs_target_sizes() {
    let config = config();
    let partition = load(&config, &[false; 10], 3);
    let policy = MergePolicy::SplitByDocCount {
        target_doc_count: 4,
    };
    let summary = run_merge(
        &partition,
        &MergeExecutor::new(&config, None),
        &policy,
        None,
        &CancelToken::new(),
    )
    .unwrap()
    .unwrap();
    let counts: Vec<u32> = partition
        .snapshot()
        .entries()
        .iter()
        .map(|e| e.segment.doc_count())
        .collect();
    assert_eq!(summary.outputs.len(), 3);
    assert_eq!(counts, vec![4, 4, 2]);
}

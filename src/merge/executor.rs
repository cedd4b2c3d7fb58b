//! Executes a `MergeTask` against a partition snapshot.
//!
//! The executor only reads the snapshot. Its output is a set of new
//! sealed segments plus, for every input, the old -> new doc-id map that
//! `Partition::publish_merge` needs to carry late deletions over.

use std::collections::BTreeMap;
use std::ops::Range;
use std::sync::Arc;

use rayon::prelude::*;
use roaring::RoaringBitmap;
use tracing::debug;

use crate::attribute::data::AttributeData;
use crate::attribute::writer::AttributeWriter;
use crate::config::EngineConfig;
use crate::error::{Result, StoreError};
use crate::index::inverted::InvertedIndex;
use crate::index::posting::PostingList;
use crate::kv::timestamp;
use crate::locator::Locator;
use crate::merge::reclaimer::{IndexReclaimer, ReclaimParam};
use crate::merge::scheduler::CancelToken;
use crate::merge::task::MergeTask;
use crate::merge::truncate::TruncateProfile;
use crate::metrics::{self, SharedSink};
use crate::partition::{PartitionSnapshot, SegmentEntry};
use crate::schema::Schema;
use crate::segment::{Segment, SegmentInfo};
use crate::types::{DocId, SegmentId};

/// Where each doc of one input went.
#[derive(Debug, Clone)]
pub struct MergedInput {
    pub segment_id: SegmentId,
    /// Deletions visible when the merge started.
    pub base_deleted: Arc<RoaringBitmap>,
    /// Indexed by old doc id: `(output index, new doc id)`, or `None` when
    /// the doc was dropped.
    pub doc_map: Vec<Option<(usize, DocId)>>,
}

#[derive(Debug)]
pub struct MergeOutput {
    pub task: MergeTask,
    pub base_version: u64,
    pub inputs: Vec<MergedInput>,
    /// Non-empty outputs only.
    pub segments: Vec<Segment>,
    pub docs_reclaimed: u64,
}

pub struct MergeExecutor {
    schema: Arc<Schema>,
    reclaim: Vec<ReclaimParam>,
    truncate: Vec<TruncateProfile>,
    ttl_secs: Option<i64>,
    sink: SharedSink,
}

impl MergeExecutor {
    pub fn new(config: &EngineConfig, sink: SharedSink) -> Self {
        Self {
            schema: Arc::new(config.schema.clone()),
            reclaim: config.merge.reclaim.clone(),
            truncate: config.merge.truncate.clone(),
            ttl_secs: config.merge.ttl_secs,
            sink,
        }
    }

    pub fn sink(&self) -> &SharedSink {
        &self.sink
    }

    /// Reclaimer for a merge starting at `now_us`. TTL turns into an
    /// `ExpiredBefore` param on the timestamp field.
    fn reclaimer(&self, now_us: i64, sink: SharedSink) -> IndexReclaimer {
        let mut params = self.reclaim.clone();
        if let (Some(ttl), Some(field)) = (self.ttl_secs, &self.schema.timestamp_field) {
            let cutoff = timestamp::normalize(now_us) - ttl;
            params.push(ReclaimParam::expired_before(field, cutoff));
        }
        IndexReclaimer::new(params, sink)
    }

    /// Whether a merge would reclaim any live doc of `snapshot`.
    pub fn has_reclaimable(&self, snapshot: &PartitionSnapshot) -> bool {
        let reclaimer = self.reclaimer(timestamp::now_us(), None);
        if reclaimer.is_empty() {
            return false;
        }
        snapshot
            .entries()
            .iter()
            .any(|entry| !(&reclaimer.evaluate(&entry.segment) - &*entry.deleted).is_empty())
    }

    pub fn execute(
        &self,
        snapshot: &PartitionSnapshot,
        task: &MergeTask,
        output_ids: &[SegmentId],
        cancel: &CancelToken,
    ) -> Result<MergeOutput> {
        task.validate()?;
        if output_ids.len() != task.target_segments.len() {
            return Err(StoreError::Merge(format!(
                "{} output ids for {} target segments",
                output_ids.len(),
                task.target_segments.len()
            )));
        }
        let entries = input_entries(snapshot, task)?;
        cancel.check()?;

        // Phase 1: drop sets, pruned postings, surviving docs in input order.
        let reclaimer = self.reclaimer(timestamp::now_us(), self.sink.clone());
        let mut docs_reclaimed = 0;
        let mut pruned: Vec<BTreeMap<String, InvertedIndex>> = Vec::with_capacity(entries.len());
        let mut survivors: Vec<(usize, DocId)> = Vec::new();
        for (input, entry) in entries.iter().enumerate() {
            let reclaimed = if reclaimer.is_empty() {
                RoaringBitmap::new()
            } else {
                reclaimer.evaluate(&entry.segment)
            };
            docs_reclaimed += (&reclaimed - &*entry.deleted).len();
            let dropped = reclaimed | &*entry.deleted;
            pruned.push(
                entry
                    .segment
                    .indexes()
                    .iter()
                    .map(|(name, index)| (name.clone(), IndexReclaimer::prune(index, &dropped)))
                    .collect(),
            );
            survivors.extend(
                (0..entry.segment.doc_count())
                    .filter(|doc| !dropped.contains(*doc))
                    .map(|doc| (input, doc)),
            );
        }
        cancel.check()?;

        // Phase 2: split survivors over the targets.
        let ranges = split_ranges(task, survivors.len());
        let mut doc_maps: Vec<Vec<Option<(usize, DocId)>>> = entries
            .iter()
            .map(|e| vec![None; e.segment.doc_count() as usize])
            .collect();
        for (out, (_, range)) in ranges.iter().enumerate() {
            for (new_doc, &(input, old_doc)) in survivors[range.clone()].iter().enumerate() {
                doc_maps[input][old_doc as usize] = Some((out, new_doc as DocId));
            }
        }
        debug!(
            inputs = ?task.input_segments,
            survivors = survivors.len(),
            reclaimed = docs_reclaimed,
            outputs = ranges.len(),
            "merge plan resolved"
        );

        // Phase 3: write each output.
        let mut segments = Vec::with_capacity(ranges.len());
        for (out, (target, range)) in ranges.iter().enumerate() {
            cancel.check()?;
            let docs = &survivors[range.clone()];
            let attributes = self.repack_attributes(&entries, docs)?;
            let indexes = self.remap_postings(&pruned, &doc_maps, out, &attributes)?;
            let pk_hashes = docs
                .iter()
                .map(|&(input, doc)| {
                    entries[input].segment.pk_hash(doc).ok_or_else(|| {
                        StoreError::InvalidFormat(format!(
                            "segment {} has no pk hash for doc {}",
                            entries[input].segment.id(),
                            doc
                        ))
                    })
                })
                .collect::<Result<Vec<_>>>()?;

            let info = SegmentInfo {
                doc_count: docs.len() as DocId,
                locator: entries
                    .iter()
                    .fold(Locator::invalid(), |acc, e| acc.max_valid(e.segment.locator())),
                timestamp_us: entries
                    .iter()
                    .map(|e| e.segment.info().timestamp_us)
                    .max()
                    .unwrap_or(0),
                merged: true,
                deploy_file_list: Vec::new(),
            };
            let description = &task.target_segments[*target];
            let mut segment = Segment::new(output_ids[*target], info, attributes, indexes, pk_hashes);
            let files = if description.use_specified_deploy_files {
                description.deploy_file_list.clone()
            } else {
                segment.file_list()
            };
            segment.set_deploy_file_list(files);
            segments.push(segment);
        }
        cancel.check()?;

        let inputs = entries
            .iter()
            .zip(doc_maps)
            .map(|(entry, doc_map)| MergedInput {
                segment_id: entry.segment.id(),
                base_deleted: entry.deleted.clone(),
                doc_map,
            })
            .collect();
        Ok(MergeOutput {
            task: task.clone(),
            base_version: snapshot.version(),
            inputs,
            segments,
            docs_reclaimed,
        })
    }

    /// One column per schema attribute, fields in parallel. A column the
    /// source segment lacks contributes default values.
    fn repack_attributes(
        &self,
        entries: &[&SegmentEntry],
        docs: &[(usize, DocId)],
    ) -> Result<BTreeMap<String, AttributeData>> {
        self.schema
            .attributes
            .par_iter()
            .map(|config| -> Result<(String, AttributeData)> {
                let mut writer = AttributeWriter::with_default_convertor(Arc::new(config.clone()));
                for &(input, doc) in docs {
                    match entries[input]
                        .segment
                        .attribute(&config.name)
                        .and_then(|data| data.raw(doc))
                    {
                        Some(raw) => writer.append_encoded(raw)?,
                        None => writer.append_default()?,
                    };
                }
                Ok((config.name.clone(), writer.seal()))
            })
            .collect()
    }

    fn remap_postings(
        &self,
        pruned: &[BTreeMap<String, InvertedIndex>],
        doc_maps: &[Vec<Option<(usize, DocId)>>],
        out: usize,
        attributes: &BTreeMap<String, AttributeData>,
    ) -> Result<BTreeMap<String, InvertedIndex>> {
        let mut result = BTreeMap::new();
        for config in &self.schema.indexes {
            let mut terms: BTreeMap<String, PostingList> = BTreeMap::new();
            // Inputs in order keep new ids ascending per term.
            for (input, indexes) in pruned.iter().enumerate() {
                let Some(index) = indexes.get(&config.name) else {
                    continue;
                };
                for (term, posting) in index.terms() {
                    for doc in posting.iter() {
                        if let Some(Some((o, new_doc))) = doc_maps[input].get(doc as usize) {
                            if *o == out {
                                terms.entry(term.to_string()).or_default().push(*new_doc);
                            }
                        }
                    }
                }
            }

            for profile in self.truncate.iter().filter(|p| p.index == config.name) {
                let truncator = profile.sorter(attributes)?;
                let mut truncated = 0;
                for posting in terms.values_mut() {
                    let kept = truncator.apply(posting)?;
                    if kept.len() < posting.len() {
                        truncated += 1;
                        *posting = kept;
                    }
                }
                metrics::report(&self.sink, metrics::POSTINGS_TRUNCATED, truncated);
            }
            result.insert(
                config.name.clone(),
                InvertedIndex::from_terms(Arc::new(config.clone()), terms),
            );
        }
        Ok(result)
    }
}

/// Snapshot entries for the task's inputs. They must be present and form
/// one contiguous run in snapshot order.
fn input_entries<'a>(
    snapshot: &'a PartitionSnapshot,
    task: &MergeTask,
) -> Result<Vec<&'a SegmentEntry>> {
    let positions = task
        .input_segments
        .iter()
        .map(|&id| snapshot.position(id).ok_or(StoreError::UnknownSegment(id)))
        .collect::<Result<Vec<_>>>()?;
    if positions.windows(2).any(|w| w[1] != w[0] + 1) {
        return Err(StoreError::Merge(format!(
            "input segments {:?} are not a contiguous run of the partition",
            task.input_segments
        )));
    }
    Ok(positions.iter().map(|&p| &snapshot.entries()[p]).collect())
}

/// `(target index, survivor range)` per non-empty output. The last target
/// absorbs whatever the earlier ones leave.
fn split_ranges(task: &MergeTask, total: usize) -> Vec<(usize, Range<usize>)> {
    let last = task.target_segments.len().saturating_sub(1);
    let mut start = 0;
    let mut ranges = Vec::new();
    for (i, target) in task.target_segments.iter().enumerate() {
        let end = if i == last {
            total
        } else {
            (start + target.target_doc_count as usize).min(total)
        };
        if end > start {
            ranges.push((i, start..end));
        }
        start = end;
    }
    ranges
}

// ── Tests ──────────────────────────────────────────────────────────

//! Single-writer front door of a partition.
//!
//! Documents flow into the building segment; `dump()` seals it and hands
//! it to the [`Partition`]. Sealed versions of a re-added or deleted pk
//! are marked deleted at partition level.

use std::mem;
use std::sync::Arc;

use tracing::{debug, info};

use crate::config::{BuildConfig, EngineConfig};
use crate::document::{DocOperation, Document, DocumentRewriter, TimestampRewriter};
use crate::error::{Result, StoreError};
use crate::kv::trie::TrieSegmentReader;
use crate::locator::Locator;
use crate::metrics::{self, SharedSink};
use crate::partition::store::Partition;
use crate::segment::InMemorySegment;
use crate::types::{DocId, SegmentId};

/// Whether `doc` goes through the rewriters before it is applied.
/// True exactly for adds.
pub fn need_rewrite_document(doc: &Document) -> bool {
    doc.operation == DocOperation::Add
}

/// What `PartitionWriter::build` did with a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildOutcome {
    /// Appended to the building segment under `doc_id`.
    Added { doc_id: DocId },
    /// A live version was deleted.
    Deleted,
    /// Nothing applied.
    Skipped,
    /// Locator advanced only.
    Checkpointed,
}

pub struct PartitionWriter {
    partition: Arc<Partition>,
    build_config: BuildConfig,
    building: InMemorySegment,
    rewriters: Vec<Box<dyn DocumentRewriter>>,
    sink: SharedSink,
    locator: Locator,
}

impl PartitionWriter {
    pub fn new(partition: Arc<Partition>, config: &EngineConfig, sink: SharedSink) -> Self {
        let building = InMemorySegment::new(partition.schema().clone(), config.kv_online);
        let mut rewriters: Vec<Box<dyn DocumentRewriter>> = Vec::new();
        if let Some(ts) = TimestampRewriter::for_schema(partition.schema()) {
            rewriters.push(Box::new(ts));
        }
        let locator = partition.snapshot().locator();
        Self {
            partition,
            build_config: config.build.clone(),
            building,
            rewriters,
            sink,
            locator,
        }
    }

    pub fn add_rewriter(&mut self, rewriter: Box<dyn DocumentRewriter>) {
        self.rewriters.push(rewriter);
    }

    pub fn partition(&self) -> &Arc<Partition> {
        &self.partition
    }

    pub fn building(&self) -> &InMemorySegment {
        &self.building
    }

    /// Reader over the building segment's pk trie. Stays valid across
    /// dumps; call `refresh()` on it to follow the new building segment.
    pub fn building_reader(&self) -> TrieSegmentReader {
        self.building.reader()
    }

    /// Furthest locator applied, dumped or not.
    pub fn locator(&self) -> Locator {
        self.locator
    }

    pub fn build(&mut self, mut doc: Document) -> Result<BuildOutcome> {
        self.locator = self.locator.max_valid(doc.locator);
        if matches!(doc.operation, DocOperation::Add | DocOperation::Delete) {
            doc.resolve_primary_key(&self.partition.schema().primary_key)?;
        }
        let outcome = match doc.operation {
            DocOperation::Add => {
                if need_rewrite_document(&doc) && !self.rewriters.is_empty() {
                    for rewriter in &self.rewriters {
                        rewriter.rewrite(&mut doc)?;
                    }
                    metrics::report(&self.sink, metrics::DOCS_REWRITTEN, 1);
                }
                self.add(&doc)?
            }
            DocOperation::Delete => self.delete(&doc)?,
            DocOperation::Update | DocOperation::Skip => {
                debug!(op = ?doc.operation, pk = %doc.primary_key, "document skipped");
                metrics::report(&self.sink, metrics::DOCS_SKIPPED, 1);
                BuildOutcome::Skipped
            }
            DocOperation::Checkpoint => BuildOutcome::Checkpointed,
        };
        if !matches!(outcome, BuildOutcome::Added { .. }) {
            self.building.advance_locator(doc.locator);
        }
        Ok(outcome)
    }

    fn add(&mut self, doc: &Document) -> Result<BuildOutcome> {
        let doc_id = match self.building.add_document(doc) {
            Ok(id) => id,
            Err(StoreError::BuildProtection { .. }) if !self.building.is_empty() => {
                self.dump()?;
                self.building.add_document(doc)?
            }
            Err(e) => return Err(e),
        };
        // Older sealed version, if any.
        self.partition.delete_pk(&doc.primary_key)?;
        metrics::report(&self.sink, metrics::DOCS_BUILT, 1);

        let limit = self.build_config.max_docs_per_segment;
        if (limit > 0 && self.building.doc_count() >= limit) || self.building.is_full() {
            self.dump()?;
        }
        Ok(BuildOutcome::Added { doc_id })
    }

    fn delete(&mut self, doc: &Document) -> Result<BuildOutcome> {
        match self.building.delete_pk(&doc.primary_key, doc.timestamp_us) {
            Ok(Some(_)) => {
                metrics::report(&self.sink, metrics::DOCS_DELETED, 1);
                return Ok(BuildOutcome::Deleted);
            }
            Ok(None) => {}
            // The live version moves to a sealed segment; delete it there.
            Err(StoreError::BuildProtection { .. }) => {
                self.dump()?;
            }
            Err(e) => return Err(e),
        }
        if self.partition.delete_pk(&doc.primary_key)? {
            metrics::report(&self.sink, metrics::DOCS_DELETED, 1);
            Ok(BuildOutcome::Deleted)
        } else {
            metrics::report(&self.sink, metrics::DOCS_SKIPPED, 1);
            Ok(BuildOutcome::Skipped)
        }
    }

    /// Seal the building segment and publish it. Returns `None` when the
    /// building segment holds no documents.
    pub fn dump(&mut self) -> Result<Option<SegmentId>> {
        if self.building.is_empty() {
            return Ok(None);
        }
        let next = self.building.successor();
        let mut building = mem::replace(&mut self.building, next);
        building.advance_locator(self.locator);

        let id = self.partition.allocate_segment_id();
        let doc_count = building.doc_count();
        let (segment, deleted) = building.seal(id);
        let locator = segment.locator();
        self.partition.add_segment(segment, deleted)?;

        metrics::report(&self.sink, metrics::SEGMENTS_DUMPED, 1);
        info!(segment = id, docs = doc_count, locator = %locator, "segment dumped");
        Ok(Some(id))
    }
}

// ── Tests ──────────────────────────────────────────────────────────

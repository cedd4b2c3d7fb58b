//! Immutable view over a partition's sealed segments.
//!
//! A snapshot is never modified after publication. Holding one keeps its
//! segments alive; garbage collection waits until the last holder drops.

use std::sync::Arc;

use roaring::RoaringBitmap;

use crate::document::pk_hash;
use crate::error::{Result, StoreError};
use crate::locator::Locator;
use crate::segment::Segment;
use crate::types::{AttributeValue, DocId, SegmentId};

/// Position of a live document in a partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocAddress {
    pub segment_id: SegmentId,
    pub doc_id: DocId,
}

impl DocAddress {
    pub fn new(segment_id: SegmentId, doc_id: DocId) -> Self {
        Self { segment_id, doc_id }
    }
}

/// A sealed segment plus the partition-level deletions applied to it.
#[derive(Debug, Clone)]
pub struct SegmentEntry {
    pub segment: Arc<Segment>,
    pub deleted: Arc<RoaringBitmap>,
}

impl SegmentEntry {
    pub fn new(segment: Arc<Segment>, deleted: RoaringBitmap) -> Self {
        Self {
            segment,
            deleted: Arc::new(deleted),
        }
    }

    pub fn is_deleted(&self, doc_id: DocId) -> bool {
        self.deleted.contains(doc_id)
    }

    pub fn has_deletions(&self) -> bool {
        !self.deleted.is_empty()
    }

    pub fn live_doc_count(&self) -> u64 {
        (self.segment.doc_count() as u64).saturating_sub(self.deleted.len())
    }
}

#[derive(Debug, Default)]
pub struct PartitionSnapshot {
    version: u64,
    /// Oldest first.
    entries: Vec<SegmentEntry>,
}

impl PartitionSnapshot {
    pub(crate) fn new(version: u64, entries: Vec<SegmentEntry>) -> Self {
        Self { version, entries }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn entries(&self) -> &[SegmentEntry] {
        &self.entries
    }

    pub fn segment_ids(&self) -> Vec<SegmentId> {
        self.entries.iter().map(|e| e.segment.id()).collect()
    }

    pub fn position(&self, segment_id: SegmentId) -> Option<usize> {
        self.entries.iter().position(|e| e.segment.id() == segment_id)
    }

    pub fn entry(&self, segment_id: SegmentId) -> Option<&SegmentEntry> {
        self.entries.iter().find(|e| e.segment.id() == segment_id)
    }

    pub fn segment(&self, segment_id: SegmentId) -> Option<&Arc<Segment>> {
        self.entry(segment_id).map(|e| &e.segment)
    }

    pub fn is_deleted(&self, address: DocAddress) -> bool {
        self.entry(address.segment_id)
            .map_or(true, |e| e.is_deleted(address.doc_id))
    }

    /// Newest live version of `primary_key`.
    pub fn lookup_pk(&self, primary_key: &str) -> Option<DocAddress> {
        let hash = pk_hash(primary_key);
        self.entries.iter().rev().find_map(|entry| {
            entry
                .segment
                .find_pk_hash(hash)
                .filter(|&doc| !entry.is_deleted(doc))
                .map(|doc| DocAddress::new(entry.segment.id(), doc))
        })
    }

    /// Live docs whose `index` posting contains `term`, oldest segment first.
    pub fn search(&self, index: &str, term: &str) -> Vec<DocAddress> {
        let mut hits = Vec::new();
        for entry in &self.entries {
            let Some(posting) = entry.segment.index(index).and_then(|i| i.lookup(term)) else {
                continue;
            };
            hits.extend(
                posting
                    .iter()
                    .filter(|&doc| !entry.is_deleted(doc))
                    .map(|doc| DocAddress::new(entry.segment.id(), doc)),
            );
        }
        hits
    }

    /// Attribute value of a live doc. Deleted docs read as `None`.
    pub fn attribute(
        &self,
        segment_id: SegmentId,
        doc_id: DocId,
        field: &str,
    ) -> Result<Option<AttributeValue>> {
        let entry = self
            .entry(segment_id)
            .ok_or(StoreError::UnknownSegment(segment_id))?;
        if entry.is_deleted(doc_id) {
            return Ok(None);
        }
        entry.segment.attribute_value(field, doc_id)
    }

    /// Furthest valid locator across segments.
    pub fn locator(&self) -> Locator {
        self.entries
            .iter()
            .fold(Locator::invalid(), |acc, e| acc.max_valid(e.segment.locator()))
    }

    pub fn doc_count(&self) -> u64 {
        self.entries.iter().map(|e| e.segment.doc_count() as u64).sum()
    }

    pub fn live_doc_count(&self) -> u64 {
        self.entries.iter().map(SegmentEntry::live_doc_count).sum()
    }
}

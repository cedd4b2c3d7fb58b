//! The building (in-memory) segment.
//!
//! Owned by a single `PartitionWriter`. Concurrent pk lookups go through
//! [`InMemorySegment::reader`], which shares the primary-key trie.

use std::collections::BTreeMap;
use std::sync::Arc;

use roaring::RoaringBitmap;

use crate::attribute::writer::AttributeWriter;
use crate::config::KvOnlineConfig;
use crate::document::Document;
use crate::error::{Result, StoreError};
use crate::index::inverted::InvertedIndexWriter;
use crate::kv::trie::{TrieSegmentReader, TrieSegmentWriter};
use crate::locator::Locator;
use crate::schema::Schema;
use crate::segment::sealed::{Segment, SegmentInfo};
use crate::types::{AttributeValue, DocId, SegmentId};

pub struct InMemorySegment {
    schema: Arc<Schema>,
    attributes: Vec<AttributeWriter>,
    indexes: Vec<InvertedIndexWriter>,
    /// pk -> doc id (u32 LE). Tombstoned on delete.
    pk_trie: TrieSegmentWriter,
    pk_hashes: Vec<u128>,
    deleted: RoaringBitmap,
    locator: Locator,
    max_timestamp_us: i64,
}

impl InMemorySegment {
    pub fn new(schema: Arc<Schema>, kv_online: KvOnlineConfig) -> Self {
        let attributes = schema
            .attributes
            .iter()
            .map(|config| AttributeWriter::with_default_convertor(Arc::new(config.clone())))
            .collect();
        let indexes = schema
            .indexes
            .iter()
            .map(|config| InvertedIndexWriter::new(Arc::new(config.clone())))
            .collect();
        Self {
            schema,
            attributes,
            indexes,
            pk_trie: TrieSegmentWriter::new(kv_online),
            pk_hashes: Vec::new(),
            deleted: RoaringBitmap::new(),
            locator: Locator::invalid(),
            max_timestamp_us: 0,
        }
    }

    /// Empty segment that takes over the pk trie descriptor, so readers
    /// handed out by this segment can `refresh()` onto the new one.
    pub fn successor(&self) -> Self {
        let mut next = Self::new(self.schema.clone(), KvOnlineConfig::default());
        next.pk_trie = self.pk_trie.successor();
        next
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn doc_count(&self) -> u32 {
        self.pk_hashes.len() as u32
    }

    pub fn live_doc_count(&self) -> u64 {
        self.doc_count() as u64 - self.deleted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pk_hashes.is_empty()
    }

    pub fn locator(&self) -> Locator {
        self.locator
    }

    pub fn advance_locator(&mut self, locator: Locator) {
        self.locator = self.locator.max_valid(locator);
    }

    /// True once the pk trie reached its configured key count.
    pub fn is_full(&self) -> bool {
        self.pk_trie.is_full()
    }

    pub fn memory_use(&self) -> u64 {
        let attrs: usize = self.attributes.iter().map(AttributeWriter::memory_use).sum();
        attrs as u64 + self.pk_trie.memory_use() + self.pk_hashes.len() as u64 * 16
    }

    /// Append a document. Any older version of the same pk in this segment
    /// is marked deleted. Fails with `BuildProtection` before anything is
    /// written when the pk trie is over its byte threshold.
    pub fn add_document(&mut self, doc: &Document) -> Result<DocId> {
        let doc_id = self.doc_count();
        let previous = self.lookup_pk(&doc.primary_key);
        self.pk_trie
            .insert(doc.primary_key.as_bytes(), &doc_id.to_le_bytes(), doc.timestamp_us)?;

        for writer in &mut self.attributes {
            let assigned = match doc.field(&writer.config().name) {
                Some(raw) => writer.append(raw)?,
                None => writer.append_default()?,
            };
            debug_assert_eq!(assigned, doc_id);
        }
        for writer in &mut self.indexes {
            if let Some(raw) = doc.field(&writer.config().field) {
                writer.add_document(doc_id, raw);
            }
        }
        self.pk_hashes.push(doc.pk_hash());

        if let Some(old) = previous {
            self.deleted.insert(old);
        }
        self.advance_locator(doc.locator);
        self.max_timestamp_us = self.max_timestamp_us.max(doc.timestamp_us);
        Ok(doc_id)
    }

    /// Delete the live version of `primary_key`. Returns the deleted doc.
    pub fn delete_pk(&mut self, primary_key: &str, timestamp_us: i64) -> Result<Option<DocId>> {
        let Some(doc_id) = self.lookup_pk(primary_key) else {
            return Ok(None);
        };
        self.pk_trie.delete(primary_key.as_bytes(), timestamp_us)?;
        self.deleted.insert(doc_id);
        Ok(Some(doc_id))
    }

    /// Live doc id for `primary_key`.
    pub fn lookup_pk(&self, primary_key: &str) -> Option<DocId> {
        self.pk_trie
            .lookup(primary_key.as_bytes())
            .and_then(|entry| entry.value)
            .and_then(|v| decode_doc_id(&v))
    }

    pub fn is_deleted(&self, doc_id: DocId) -> bool {
        self.deleted.contains(doc_id)
    }

    pub fn attribute_value(&self, field: &str, doc_id: DocId) -> Result<Option<AttributeValue>> {
        let writer = self
            .attributes
            .iter()
            .find(|w| w.config().name == field)
            .ok_or_else(|| StoreError::UnknownField(field.to_string()))?;
        writer.get(doc_id)
    }

    /// Concurrent reader over the pk trie.
    pub fn reader(&self) -> TrieSegmentReader {
        self.pk_trie.reader()
    }

    /// Freeze into a sealed segment plus its local deletions.
    pub fn seal(self, id: SegmentId) -> (Segment, RoaringBitmap) {
        let doc_count = self.doc_count();
        let attributes: BTreeMap<_, _> = self
            .attributes
            .into_iter()
            .map(|w| (w.config().name.clone(), w.seal()))
            .collect();
        let indexes: BTreeMap<_, _> = self
            .indexes
            .into_iter()
            .map(|w| (w.config().name.clone(), w.seal()))
            .collect();
        let info = SegmentInfo {
            doc_count,
            locator: self.locator,
            timestamp_us: self.max_timestamp_us,
            merged: false,
            deploy_file_list: Vec::new(),
        };
        let mut segment = Segment::new(id, info, attributes, indexes, self.pk_hashes);
        let files = segment.file_list();
        segment.set_deploy_file_list(files);
        (segment, self.deleted)
    }
}

/// Decode a doc id stored as a trie value.
pub fn decode_doc_id(bytes: &[u8]) -> Option<DocId> {
    let arr: [u8; 4] = bytes.try_into().ok()?;
    Some(DocId::from_le_bytes(arr))
}

// ── Tests ──────────────────────────────────────────────────────────

//! Sealed, immutable segment.
//!
//! ## Directory layout (`segment_<id>/`)
//!
//! ```text
//! segment_info.json          SegmentInfo
//! primary_key                bincode Vec<u128>, pk hash per doc
//! attribute/<name>/data      column bytes
//! attribute/<name>/offset    variable-length only
//! index/<name>/postings      see index::inverted
//! ```
//!
//! Sealed segments are never mutated. Deletions live in the partition.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::attribute::data::{AttributeData, ATTRIBUTE_DIR};
use crate::error::{Result, StoreError};
use crate::index::inverted::{InvertedIndex, INDEX_DIR};
use crate::locator::Locator;
use crate::schema::Schema;
use crate::types::{AttributeValue, DocId, SegmentId};

pub const SEGMENT_INFO_FILE: &str = "segment_info.json";
pub const PRIMARY_KEY_FILE: &str = "primary_key";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentInfo {
    pub doc_count: u32,
    pub locator: Locator,
    /// Newest document timestamp (microseconds).
    pub timestamp_us: i64,
    /// Produced by a merge rather than a dump.
    pub merged: bool,
    #[serde(default)]
    pub deploy_file_list: Vec<String>,
}

#[derive(Debug)]
pub struct Segment {
    id: SegmentId,
    info: SegmentInfo,
    attributes: BTreeMap<String, AttributeData>,
    indexes: BTreeMap<String, InvertedIndex>,
    pk_hashes: Vec<u128>,
    /// pk hash -> newest doc carrying it.
    pk_lookup: HashMap<u128, DocId>,
}

impl Segment {
    pub(crate) fn new(
        id: SegmentId,
        info: SegmentInfo,
        attributes: BTreeMap<String, AttributeData>,
        indexes: BTreeMap<String, InvertedIndex>,
        pk_hashes: Vec<u128>,
    ) -> Self {
        let pk_lookup = build_pk_lookup(&pk_hashes);
        Self {
            id,
            info,
            attributes,
            indexes,
            pk_hashes,
            pk_lookup,
        }
    }

    pub fn id(&self) -> SegmentId {
        self.id
    }

    pub fn info(&self) -> &SegmentInfo {
        &self.info
    }

    pub fn doc_count(&self) -> u32 {
        self.info.doc_count
    }

    pub fn locator(&self) -> Locator {
        self.info.locator
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeData> {
        self.attributes.get(name)
    }

    pub fn attributes(&self) -> &BTreeMap<String, AttributeData> {
        &self.attributes
    }

    pub fn index(&self, name: &str) -> Option<&InvertedIndex> {
        self.indexes.get(name)
    }

    pub fn indexes(&self) -> &BTreeMap<String, InvertedIndex> {
        &self.indexes
    }

    pub fn pk_hash(&self, doc_id: DocId) -> Option<u128> {
        self.pk_hashes.get(doc_id as usize).copied()
    }

    /// Newest doc in this segment with the given pk hash.
    pub fn find_pk_hash(&self, hash: u128) -> Option<DocId> {
        self.pk_lookup.get(&hash).copied()
    }

    /// Decoded attribute value. `Ok(None)` when the segment has no such
    /// column or `doc_id` is out of range.
    pub fn attribute_value(&self, field: &str, doc_id: DocId) -> Result<Option<AttributeValue>> {
        match self.attributes.get(field) {
            Some(data) => data.reader().get(doc_id),
            None => Ok(None),
        }
    }

    /// Every file of this segment, relative to its directory.
    pub fn file_list(&self) -> Vec<String> {
        let mut files = vec![SEGMENT_INFO_FILE.to_string(), PRIMARY_KEY_FILE.to_string()];
        for data in self.attributes.values() {
            files.extend(data.file_list());
        }
        for index in self.indexes.values() {
            files.extend(index.file_list());
        }
        files
    }

    pub(crate) fn set_deploy_file_list(&mut self, files: Vec<String>) {
        self.info.deploy_file_list = files;
    }

    pub fn write_to_dir(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir)?;
        for data in self.attributes.values() {
            data.write_to_dir(dir)?;
        }
        for index in self.indexes.values() {
            index.write_to_dir(dir)?;
        }
        fs::write(dir.join(PRIMARY_KEY_FILE), bincode::serialize(&self.pk_hashes)?)?;
        // Info last: its presence marks a complete segment.
        fs::write(
            dir.join(SEGMENT_INFO_FILE),
            serde_json::to_vec_pretty(&self.info)?,
        )?;
        debug!(segment = self.id, docs = self.info.doc_count, dir = %dir.display(), "segment written");
        Ok(())
    }

    /// Load a segment written by [`Segment::write_to_dir`]. Columns and
    /// indexes the schema names but the directory lacks are skipped.
    pub fn open(dir: &Path, id: SegmentId, schema: &Schema) -> Result<Self> {
        let info_bytes = fs::read(dir.join(SEGMENT_INFO_FILE))?;
        let info: SegmentInfo = serde_json::from_slice(&info_bytes)?;

        let pk_hashes: Vec<u128> = bincode::deserialize(&fs::read(dir.join(PRIMARY_KEY_FILE))?)?;
        if pk_hashes.len() != info.doc_count as usize {
            return Err(StoreError::InvalidFormat(format!(
                "segment {}: {} primary keys for {} docs",
                id,
                pk_hashes.len(),
                info.doc_count
            )));
        }

        let mut attributes = BTreeMap::new();
        for config in &schema.attributes {
            if !dir.join(ATTRIBUTE_DIR).join(&config.name).is_dir() {
                continue;
            }
            let data = AttributeData::read_from_dir(dir, Arc::new(config.clone()), info.doc_count)?;
            attributes.insert(config.name.clone(), data);
        }

        let mut indexes = BTreeMap::new();
        for config in &schema.indexes {
            if !dir.join(INDEX_DIR).join(&config.name).is_dir() {
                continue;
            }
            let index = InvertedIndex::read_from_dir(dir, Arc::new(config.clone()))?;
            indexes.insert(config.name.clone(), index);
        }

        Ok(Self::new(id, info, attributes, indexes, pk_hashes))
    }
}

fn build_pk_lookup(pk_hashes: &[u128]) -> HashMap<u128, DocId> {
    let mut lookup = HashMap::with_capacity(pk_hashes.len());
    for (doc, hash) in pk_hashes.iter().enumerate() {
        lookup.insert(*hash, doc as DocId);
    }
    lookup
}

// ── Tests ──────────────────────────────────────────────────────────

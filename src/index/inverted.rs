//! Inverted index writer and sealed reader.
//!
//! ## Binary format (`index/<name>/postings`)
//!
//! ```text
//! Offset  Size  Field
//! 0       4     magic: b"SPST"
//! 4       2     version: u16 = 1
//! 6       2     reserved: 0x0000
//! 8       4     term_count: u32
//! 12      ...   terms, sorted:
//!                 [term_len: u32][term: utf8]
//!                 [doc_count: u32][doc_id: u32] x doc_count
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use crate::error::{Result, StoreError};
use crate::index::posting::PostingList;
use crate::schema::IndexConfig;
use crate::types::DocId;

pub const POSTINGS_MAGIC: [u8; 4] = *b"SPST";
pub const POSTINGS_VERSION: u16 = 1;
pub const POSTINGS_HEADER_SIZE: usize = 12;
pub const INDEX_DIR: &str = "index";
pub const POSTINGS_FILE: &str = "postings";

/// Split a raw field into index terms.
pub fn tokenize(raw: &str) -> impl Iterator<Item = &str> {
    raw.split_whitespace()
}

// ── Writer ─────────────────────────────────────────────────────────

/// Accumulates postings for one index of a building segment.
pub struct InvertedIndexWriter {
    config: Arc<IndexConfig>,
    terms: BTreeMap<String, PostingList>,
}

impl InvertedIndexWriter {
    pub fn new(config: Arc<IndexConfig>) -> Self {
        Self {
            config,
            terms: BTreeMap::new(),
        }
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    /// Index `raw` for `doc_id`. Doc ids must be added in ascending order.
    pub fn add_document(&mut self, doc_id: DocId, raw: &str) {
        for token in tokenize(raw) {
            match self.terms.get_mut(token) {
                Some(posting) => posting.push(doc_id),
                None => {
                    let mut posting = PostingList::new();
                    posting.push(doc_id);
                    self.terms.insert(token.to_string(), posting);
                }
            }
        }
    }

    pub fn term_count(&self) -> usize {
        self.terms.len()
    }

    pub fn seal(self) -> InvertedIndex {
        InvertedIndex {
            config: self.config,
            terms: self.terms,
        }
    }
}

// ── Sealed Index ───────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct InvertedIndex {
    config: Arc<IndexConfig>,
    terms: BTreeMap<String, PostingList>,
}

impl InvertedIndex {
    pub fn from_terms(config: Arc<IndexConfig>, terms: BTreeMap<String, PostingList>) -> Self {
        let terms = terms.into_iter().filter(|(_, p)| !p.is_empty()).collect();
        Self { config, terms }
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    pub(crate) fn config_arc(&self) -> Arc<IndexConfig> {
        self.config.clone()
    }

    pub fn lookup(&self, term: &str) -> Option<&PostingList> {
        self.terms.get(term)
    }

    pub fn terms(&self) -> impl Iterator<Item = (&str, &PostingList)> {
        self.terms.iter().map(|(t, p)| (t.as_str(), p))
    }

    pub fn term_count(&self) -> usize {
        self.terms.len()
    }

    /// Sum of posting lengths over all terms.
    pub fn total_postings(&self) -> usize {
        self.terms.values().map(PostingList::len).sum()
    }

    pub fn file_list(&self) -> Vec<String> {
        vec![format!("{}/{}/{}", INDEX_DIR, self.config.name, POSTINGS_FILE)]
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(POSTINGS_HEADER_SIZE + self.total_postings() * 4);
        out.extend_from_slice(&POSTINGS_MAGIC);
        out.extend_from_slice(&POSTINGS_VERSION.to_le_bytes());
        out.extend_from_slice(&[0u8; 2]);
        out.extend_from_slice(&(self.terms.len() as u32).to_le_bytes());
        for (term, posting) in &self.terms {
            out.extend_from_slice(&(term.len() as u32).to_le_bytes());
            out.extend_from_slice(term.as_bytes());
            out.extend_from_slice(&(posting.len() as u32).to_le_bytes());
            for doc in posting.iter() {
                out.extend_from_slice(&doc.to_le_bytes());
            }
        }
        out
    }

    pub fn from_bytes(config: Arc<IndexConfig>, bytes: &[u8]) -> Result<Self> {
        if bytes.len() < POSTINGS_HEADER_SIZE {
            return Err(StoreError::InvalidFormat("postings file too small".into()));
        }
        if bytes[0..4] != POSTINGS_MAGIC {
            return Err(StoreError::InvalidFormat(format!(
                "not a postings file: expected SPST, got {:?}",
                &bytes[0..4]
            )));
        }
        let version = u16::from_le_bytes([bytes[4], bytes[5]]);
        if version != POSTINGS_VERSION {
            return Err(StoreError::InvalidFormat(format!(
                "unsupported postings version: {}",
                version
            )));
        }

        let mut cursor = Cursor {
            bytes,
            pos: 8,
        };
        let term_count = cursor.u32()?;
        let mut terms = BTreeMap::new();
        for _ in 0..term_count {
            let len = cursor.u32()? as usize;
            let term = std::str::from_utf8(cursor.take(len)?)
                .map_err(|_| StoreError::InvalidFormat("postings term is not utf-8".into()))?
                .to_string();
            let doc_count = cursor.u32()? as usize;
            let mut docs = Vec::with_capacity(doc_count);
            for _ in 0..doc_count {
                docs.push(cursor.u32()?);
            }
            if docs.windows(2).any(|w| w[0] >= w[1]) {
                return Err(StoreError::InvalidFormat(format!(
                    "posting list for '{}' is not strictly ascending",
                    term
                )));
            }
            terms.insert(term, PostingList::from_unsorted(docs));
        }
        Ok(Self { config, terms })
    }

    pub fn write_to_dir(&self, segment_dir: &Path) -> Result<()> {
        let dir = segment_dir.join(INDEX_DIR).join(&self.config.name);
        fs::create_dir_all(&dir)?;
        fs::write(dir.join(POSTINGS_FILE), self.to_bytes())?;
        Ok(())
    }

    pub fn read_from_dir(segment_dir: &Path, config: Arc<IndexConfig>) -> Result<Self> {
        let path = segment_dir
            .join(INDEX_DIR)
            .join(&config.name)
            .join(POSTINGS_FILE);
        let bytes = fs::read(path)?;
        Self::from_bytes(config, &bytes)
    }
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.bytes.len())
            .ok_or_else(|| StoreError::InvalidFormat("postings file truncated".into()))?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }
}

// ── Tests ──────────────────────────────────────────────────────────

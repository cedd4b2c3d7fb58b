//! Sealed attribute column and its on-disk form.
//!
//! Files under `attribute/<name>/`:
//! ```text
//! data     raw value bytes
//! offset   [offset: u64 LE] x (doc_count + 1)   (variable-length only)
//! ```

use std::fs;
use std::path::Path;
use std::sync::Arc;

use crate::attribute::convertor::AttributeConvertor;
use crate::error::{Result, StoreError};
use crate::schema::AttributeConfig;
use crate::types::{AttributeValue, DocId};

pub const ATTRIBUTE_DIR: &str = "attribute";
pub const DATA_FILE: &str = "data";
pub const OFFSET_FILE: &str = "offset";

/// Immutable column. Readable without locking.
#[derive(Debug)]
pub struct AttributeData {
    config: Arc<AttributeConfig>,
    data: Vec<u8>,
    offsets: Option<Vec<u64>>,
    doc_count: u32,
}

impl AttributeData {
    pub(crate) fn new(
        config: Arc<AttributeConfig>,
        data: Vec<u8>,
        offsets: Option<Vec<u64>>,
        doc_count: u32,
    ) -> Self {
        Self {
            config,
            data,
            offsets,
            doc_count,
        }
    }

    pub fn config(&self) -> &AttributeConfig {
        &self.config
    }

    pub(crate) fn config_arc(&self) -> Arc<AttributeConfig> {
        self.config.clone()
    }

    pub fn doc_count(&self) -> u32 {
        self.doc_count
    }

    pub fn byte_size(&self) -> usize {
        self.data.len()
    }

    pub fn raw(&self, doc_id: DocId) -> Option<&[u8]> {
        if doc_id >= self.doc_count {
            return None;
        }
        let doc = doc_id as usize;
        match &self.offsets {
            None => {
                let size = self.config.field_type.fixed_size()?;
                self.data.get(doc * size..(doc + 1) * size)
            }
            Some(offsets) => {
                let start = *offsets.get(doc)? as usize;
                let end = *offsets.get(doc + 1)? as usize;
                self.data.get(start..end)
            }
        }
    }

    pub fn reader(&self) -> AttributeReader<'_> {
        AttributeReader {
            data: self,
            convertor: AttributeConvertor::for_config(&self.config),
        }
    }

    /// Files this column occupies, relative to the segment directory.
    pub fn file_list(&self) -> Vec<String> {
        let base = format!("{}/{}", ATTRIBUTE_DIR, self.config.name);
        let mut files = vec![format!("{}/{}", base, DATA_FILE)];
        if self.offsets.is_some() {
            files.push(format!("{}/{}", base, OFFSET_FILE));
        }
        files
    }

    pub fn write_to_dir(&self, segment_dir: &Path) -> Result<()> {
        let dir = segment_dir.join(ATTRIBUTE_DIR).join(&self.config.name);
        fs::create_dir_all(&dir)?;
        fs::write(dir.join(DATA_FILE), &self.data)?;
        if let Some(offsets) = &self.offsets {
            let mut buf = Vec::with_capacity(offsets.len() * 8);
            for off in offsets {
                buf.extend_from_slice(&off.to_le_bytes());
            }
            fs::write(dir.join(OFFSET_FILE), buf)?;
        }
        Ok(())
    }

    /// Load and validate a column against the expected doc count.
    pub fn read_from_dir(
        segment_dir: &Path,
        config: Arc<AttributeConfig>,
        doc_count: u32,
    ) -> Result<Self> {
        let dir = segment_dir.join(ATTRIBUTE_DIR).join(&config.name);
        let data = fs::read(dir.join(DATA_FILE))?;

        if config.is_fixed_length() {
            let size = config.field_type.fixed_size().unwrap_or(0);
            if data.len() != size * doc_count as usize {
                return Err(StoreError::InvalidFormat(format!(
                    "attribute '{}': {} bytes for {} docs of width {}",
                    config.name,
                    data.len(),
                    doc_count,
                    size
                )));
            }
            return Ok(Self::new(config, data, None, doc_count));
        }

        let raw = fs::read(dir.join(OFFSET_FILE))?;
        if raw.len() != (doc_count as usize + 1) * 8 {
            return Err(StoreError::InvalidFormat(format!(
                "attribute '{}': offset file does not match doc count {}",
                config.name, doc_count
            )));
        }
        let offsets: Vec<u64> = raw
            .chunks_exact(8)
            .map(|c| {
                let mut b = [0u8; 8];
                b.copy_from_slice(c);
                u64::from_le_bytes(b)
            })
            .collect();
        let monotonic = offsets.windows(2).all(|w| w[0] <= w[1]);
        if !monotonic || offsets.last().copied() != Some(data.len() as u64) {
            return Err(StoreError::InvalidFormat(format!(
                "attribute '{}': corrupted offset table",
                config.name
            )));
        }
        Ok(Self::new(config, data, Some(offsets), doc_count))
    }
}

/// Typed view over a sealed column.
pub struct AttributeReader<'a> {
    data: &'a AttributeData,
    convertor: AttributeConvertor,
}

impl<'a> AttributeReader<'a> {
    pub fn get(&self, doc_id: DocId) -> Result<Option<AttributeValue>> {
        match self.data.raw(doc_id) {
            Some(bytes) => self.convertor.decode(bytes).map(Some),
            None => Ok(None),
        }
    }

    pub fn raw(&self, doc_id: DocId) -> Option<&'a [u8]> {
        self.data.raw(doc_id)
    }

    pub fn convertor(&self) -> &AttributeConvertor {
        &self.convertor
    }
}

// ── Tests ──────────────────────────────────────────────────────────

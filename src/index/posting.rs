//! Sorted, duplicate-free posting list of segment-local doc ids.

use crate::types::DocId;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PostingList {
    docs: Vec<DocId>,
}

impl PostingList {
    pub fn new() -> Self {
        Self { docs: Vec::new() }
    }

    /// Build from ids in any order; sorts and dedups.
    pub fn from_unsorted(mut docs: Vec<DocId>) -> Self {
        docs.sort_unstable();
        docs.dedup();
        Self { docs }
    }

    /// Append a doc id. Ids must arrive in non-decreasing order; a repeat of
    /// the last id is ignored.
    pub fn push(&mut self, doc_id: DocId) {
        match self.docs.last() {
            Some(&last) if last == doc_id => {}
            Some(&last) => {
                debug_assert!(doc_id > last, "posting ids must be ascending");
                self.docs.push(doc_id);
            }
            None => self.docs.push(doc_id),
        }
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    pub fn contains(&self, doc_id: DocId) -> bool {
        self.docs.binary_search(&doc_id).is_ok()
    }

    pub fn iter(&self) -> impl Iterator<Item = DocId> + '_ {
        self.docs.iter().copied()
    }

    pub fn as_slice(&self) -> &[DocId] {
        &self.docs
    }

    /// Keep only ids for which `keep` returns true.
    pub fn retain(&mut self, mut keep: impl FnMut(DocId) -> bool) {
        self.docs.retain(|&d| keep(d));
    }
}

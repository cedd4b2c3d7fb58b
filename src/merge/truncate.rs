//! Top-K posting truncation.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::attribute::data::AttributeData;
use crate::error::{Result, StoreError};
use crate::index::posting::PostingList;
use crate::merge::comparator::{
    ComboComparator, Comparator, DocIdComparator, ReferenceComparator, SortOrder,
};
use crate::merge::reference::{DocInfo, DocInfoAllocator, Reference};
use crate::types::DocId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortField {
    pub field: String,
    #[serde(default)]
    pub order: SortOrder,
}

/// Keep at most `limit` docs per term of `index`, ranked by `sort`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TruncateProfile {
    pub index: String,
    pub sort: Vec<SortField>,
    pub limit: usize,
}

impl TruncateProfile {
    /// Bind the profile to the attribute columns of one segment.
    pub fn sorter<'a>(
        &self,
        attributes: &'a BTreeMap<String, AttributeData>,
    ) -> Result<PostingTruncator<'a>> {
        let mut allocator = DocInfoAllocator::new();
        let mut comparator = ComboComparator::new();
        let mut columns = Vec::with_capacity(self.sort.len());
        for sort in &self.sort {
            let data = attributes
                .get(&sort.field)
                .ok_or_else(|| StoreError::UnknownField(sort.field.clone()))?;
            if !data.config().is_fixed_length() {
                return Err(StoreError::Config(format!(
                    "cannot sort postings by multi-value or string field '{}'",
                    sort.field
                )));
            }
            let reference = allocator.declare(&sort.field, data.config().field_type)?;
            comparator.add_comparator(Box::new(ReferenceComparator::new(reference, sort.order)));
            columns.push((reference, data));
        }
        comparator.add_comparator(Box::new(DocIdComparator));
        Ok(PostingTruncator {
            allocator,
            columns,
            comparator,
            limit: self.limit,
        })
    }
}

pub struct PostingTruncator<'a> {
    allocator: DocInfoAllocator,
    columns: Vec<(Reference, &'a AttributeData)>,
    comparator: ComboComparator,
    limit: usize,
}

impl PostingTruncator<'_> {
    fn doc_info(&self, doc_id: DocId) -> Result<DocInfo> {
        let mut info = self.allocator.allocate(doc_id);
        for (reference, data) in &self.columns {
            if let Some(raw) = data.raw(doc_id) {
                reference.set(&mut info, raw)?;
            }
        }
        Ok(info)
    }

    /// Top-`limit` docs of `posting`, returned in doc-id order. Postings
    /// within the limit come back unchanged.
    pub fn apply(&self, posting: &PostingList) -> Result<PostingList> {
        if posting.len() <= self.limit {
            return Ok(posting.clone());
        }
        let mut infos = posting
            .iter()
            .map(|doc| self.doc_info(doc))
            .collect::<Result<Vec<_>>>()?;
        infos.sort_by(|a, b| self.comparator.ordering(a, b));
        infos.truncate(self.limit);
        Ok(PostingList::from_unsorted(
            infos.iter().map(DocInfo::doc_id).collect(),
        ))
    }
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::writer::AttributeWriter;
    use crate::schema::AttributeConfig;
    use crate::types::FieldType;
    use std::sync::Arc;

    fn column(name: &str, field_type: FieldType, values: &[&str]) -> AttributeData {
        let mut w =
            AttributeWriter::with_default_convertor(Arc::new(AttributeConfig::new(0, name, field_type)));
        for v in values {
            w.append(v).unwrap();
        }
        w.seal()
    }

    fn profile(sort: Vec<(&str, SortOrder)>, limit: usize) -> TruncateProfile {
        TruncateProfile {
            index: "title".into(),
            sort: sort
                .into_iter()
                .map(|(f, order)| SortField {
                    field: f.into(),
                    order,
                })
                .collect(),
            limit,
        }
    }

    #[test]
    fn test_keeps_top_k_by_descending_score() {
        let mut attrs = BTreeMap::new();
        attrs.insert("score".to_string(), column("score", FieldType::Int32, &["5", "9", "1", "7"]));
        let truncator = profile(vec![("score", SortOrder::Desc)], 2).sorter(&attrs).unwrap();
        let posting = PostingList::from_unsorted(vec![0, 1, 2, 3]);
        assert_eq!(truncator.apply(&posting).unwrap().as_slice(), &[1, 3]);
    }

    #[test]
    fn test_ties_broken_by_doc_id() {
        let mut attrs = BTreeMap::new();
        attrs.insert("score".to_string(), column("score", FieldType::UInt8, &["3", "3", "3"]));
        let truncator = profile(vec![("score", SortOrder::Asc)], 2).sorter(&attrs).unwrap();
        let posting = PostingList::from_unsorted(vec![2, 0, 1]);
        assert_eq!(truncator.apply(&posting).unwrap().as_slice(), &[0, 1]);
    }

    #[test]
    fn test_secondary_key() {
        let mut attrs = BTreeMap::new();
        attrs.insert("a".to_string(), column("a", FieldType::Int64, &["1", "1", "0"]));
        attrs.insert("b".to_string(), column("b", FieldType::Double, &["0.5", "2.5", "9"]));
        let truncator = profile(vec![("a", SortOrder::Desc), ("b", SortOrder::Desc)], 1)
            .sorter(&attrs)
            .unwrap();
        let posting = PostingList::from_unsorted(vec![0, 1, 2]);
        assert_eq!(truncator.apply(&posting).unwrap().as_slice(), &[1]);
    }

    #[test]
    fn test_short_posting_untouched() {
        let mut attrs = BTreeMap::new();
        attrs.insert("score".to_string(), column("score", FieldType::Int32, &["1"]));
        let truncator = profile(vec![("score", SortOrder::Asc)], 5).sorter(&attrs).unwrap();
        let posting = PostingList::from_unsorted(vec![0]);
        assert_eq!(truncator.apply(&posting).unwrap(), posting);
    }

    #[test]
    fn test_string_sort_field_rejected() {
        let mut attrs = BTreeMap::new();
        attrs.insert("s".to_string(), column("s", FieldType::String, &["x"]));
        assert!(profile(vec![("s", SortOrder::Asc)], 1).sorter(&attrs).is_err());
        assert!(profile(vec![("missing", SortOrder::Asc)], 1).sorter(&attrs).is_err());
    }
}

//! Row comparators used to rank postings during truncation.
//!
//! `compare(a, b)` answers "does `a` sort before `b`". A
//! [`ComboComparator`] chains comparators by priority and returns the
//! first decisive answer. When every link ties it returns `false`, so the
//! chain alone is not a total order; append a [`DocIdComparator`] as the
//! final link when a deterministic order is needed.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::merge::reference::{DocInfo, Reference};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

pub trait Comparator: Send + Sync {
    /// Three-way comparison for one sort dimension.
    fn ordering(&self, a: &DocInfo, b: &DocInfo) -> Ordering;

    /// True when `a` should sort before `b`.
    fn compare(&self, a: &DocInfo, b: &DocInfo) -> bool {
        self.ordering(a, b) == Ordering::Less
    }
}

/// Orders rows by the value behind one [`Reference`].
pub struct ReferenceComparator {
    reference: Reference,
    order: SortOrder,
}

impl ReferenceComparator {
    pub fn new(reference: Reference, order: SortOrder) -> Self {
        Self { reference, order }
    }
}

impl Comparator for ReferenceComparator {
    fn ordering(&self, a: &DocInfo, b: &DocInfo) -> Ordering {
        let ord = self.reference.cmp_values(a, b);
        match self.order {
            SortOrder::Asc => ord,
            SortOrder::Desc => ord.reverse(),
        }
    }
}

/// Ascending doc id. Never ties for distinct rows.
pub struct DocIdComparator;

impl Comparator for DocIdComparator {
    fn ordering(&self, a: &DocInfo, b: &DocInfo) -> Ordering {
        a.doc_id().cmp(&b.doc_id())
    }
}

/// Priority chain of comparators. The first added is the primary key.
#[derive(Default)]
pub struct ComboComparator {
    comparators: Vec<Box<dyn Comparator>>,
}

impl ComboComparator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_comparator(&mut self, comparator: Box<dyn Comparator>) {
        self.comparators.push(comparator);
    }

    pub fn len(&self) -> usize {
        self.comparators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.comparators.is_empty()
    }
}

impl Comparator for ComboComparator {
    fn ordering(&self, a: &DocInfo, b: &DocInfo) -> Ordering {
        self.comparators
            .iter()
            .map(|c| c.ordering(a, b))
            .find(|o| *o != Ordering::Equal)
            .unwrap_or(Ordering::Equal)
    }

    /// First decisive link wins; all ties yields `false`.
    fn compare(&self, a: &DocInfo, b: &DocInfo) -> bool {
        self.comparators
            .iter()
            .find(|c| c.ordering(a, b) != Ordering::Equal)
            .is_some_and(|c| c.compare(a, b))
    }
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merge::reference::DocInfoAllocator;
    use crate::types::FieldType;
    use proptest::prelude::*;

    struct Rows {
        alloc: DocInfoAllocator,
        f1: Reference,
        f2: Reference,
    }

    impl Rows {
        fn new() -> Self {
            let mut alloc = DocInfoAllocator::new();
            let f1 = alloc.declare("f1", FieldType::Int32).unwrap();
            let f2 = alloc.declare("f2", FieldType::Int64).unwrap();
            Self { alloc, f1, f2 }
        }

        fn row(&self, doc: u32, v1: i32, v2: i64) -> DocInfo {
            let mut info = self.alloc.allocate(doc);
            self.f1.set(&mut info, &v1.to_le_bytes()).unwrap();
            self.f2.set(&mut info, &v2.to_le_bytes()).unwrap();
            info
        }

        fn combo(&self) -> ComboComparator {
            let mut combo = ComboComparator::new();
            combo.add_comparator(Box::new(ReferenceComparator::new(self.f1, SortOrder::Asc)));
            combo.add_comparator(Box::new(ReferenceComparator::new(self.f2, SortOrder::Asc)));
            combo
        }
    }

    #[test]
    fn test_second_key_breaks_tie() {
        let rows = Rows::new();
        let combo = rows.combo();
        let by_f2 = ReferenceComparator::new(rows.f2, SortOrder::Asc);
        let a = rows.row(0, 1, 5);
        let b = rows.row(1, 1, 9);
        assert_eq!(combo.compare(&a, &b), by_f2.compare(&a, &b));
        assert_eq!(combo.compare(&b, &a), by_f2.compare(&b, &a));
    }

    #[test]
    fn test_all_tie_is_not_less() {
        let rows = Rows::new();
        let combo = rows.combo();
        let a = rows.row(0, 1, 1);
        let b = rows.row(1, 1, 1);
        assert!(!combo.compare(&a, &b));
        assert!(!combo.compare(&b, &a));
        assert_eq!(combo.ordering(&a, &b), Ordering::Equal);
    }

    #[test]
    fn test_doc_id_tie_break_makes_order_total() {
        let rows = Rows::new();
        let mut combo = rows.combo();
        combo.add_comparator(Box::new(DocIdComparator));
        let a = rows.row(0, 1, 1);
        let b = rows.row(1, 1, 1);
        assert!(combo.compare(&a, &b));
        assert!(!combo.compare(&b, &a));
    }

    #[test]
    fn test_descending() {
        let rows = Rows::new();
        let desc = ReferenceComparator::new(rows.f1, SortOrder::Desc);
        assert!(desc.compare(&rows.row(0, 9, 0), &rows.row(1, 2, 0)));
    }

    #[test]
    fn test_empty_combo() {
        let rows = Rows::new();
        let combo = ComboComparator::new();
        assert!(combo.is_empty());
        assert!(!combo.compare(&rows.row(0, 0, 0), &rows.row(1, 1, 1)));
    }

    proptest! {
        #[test]
        fn prop_primary_key_dominates(a1 in any::<i32>(), b1 in any::<i32>(), a2 in any::<i64>(), b2 in any::<i64>()) {
            let rows = Rows::new();
            let combo = rows.combo();
            let by_f1 = ReferenceComparator::new(rows.f1, SortOrder::Asc);
            let by_f2 = ReferenceComparator::new(rows.f2, SortOrder::Asc);
            let a = rows.row(0, a1, a2);
            let b = rows.row(1, b1, b2);
            if a1 != b1 {
                prop_assert_eq!(combo.compare(&a, &b), by_f1.compare(&a, &b));
            } else {
                prop_assert_eq!(combo.compare(&a, &b), by_f2.compare(&a, &b));
            }
        }
    }
}

//! Per-field columnar attribute storage.
//!
//! Building segments append through [`AttributeWriter`]; sealing produces an
//! immutable [`AttributeData`] column that readers and merges share freely.

pub mod convertor;
pub mod data;
pub mod writer;

pub use convertor::AttributeConvertor;
pub use data::{AttributeData, AttributeReader};
pub use writer::AttributeWriter;

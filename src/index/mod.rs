//! Inverted postings: term -> sorted doc ids.

pub mod inverted;
pub mod posting;

pub use inverted::{tokenize, InvertedIndex, InvertedIndexWriter};
pub use posting::PostingList;

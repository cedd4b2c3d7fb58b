//! Building and sealed segments.

pub mod building;
pub mod sealed;

pub use building::InMemorySegment;
pub use sealed::{Segment, SegmentInfo};

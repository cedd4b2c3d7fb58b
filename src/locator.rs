//! Build progress marker into an upstream document log.
//!
//! A `Locator` is a `(source_id, offset)` pair. Segments record the locator
//! of the last document they reflect; merge outputs carry the maximum valid
//! locator of their inputs.
//!
//! ## Binary format
//!
//! ```text
//! Offset  Size  Field
//! 0       8     source_id: u64 LE
//! 8       8     offset: i64 LE
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

/// Serialized size of a locator in bytes.
pub const LOCATOR_SIZE: usize = 16;

/// "No progress recorded" sentinel.
pub const INVALID_LOCATOR: Locator = Locator {
    source_id: u64::MAX,
    offset: i64::MIN,
};

/// Position in an upstream log. Ordered by `(source_id, offset)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Locator {
    source_id: u64,
    offset: i64,
}

impl Locator {
    pub const fn new(source_id: u64, offset: i64) -> Self {
        Self { source_id, offset }
    }

    /// The "no progress" sentinel.
    pub const fn invalid() -> Self {
        INVALID_LOCATOR
    }

    pub fn source_id(&self) -> u64 {
        self.source_id
    }

    pub fn offset(&self) -> i64 {
        self.offset
    }

    pub fn is_valid(&self) -> bool {
        *self != INVALID_LOCATOR
    }

    pub fn to_bytes(&self) -> [u8; LOCATOR_SIZE] {
        let mut out = [0u8; LOCATOR_SIZE];
        out[0..8].copy_from_slice(&self.source_id.to_le_bytes());
        out[8..16].copy_from_slice(&self.offset.to_le_bytes());
        out
    }

    /// Parse from exactly `LOCATOR_SIZE` bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != LOCATOR_SIZE {
            return Err(StoreError::InvalidFormat(format!(
                "Locator must be {} bytes, got {}",
                LOCATOR_SIZE,
                bytes.len()
            )));
        }
        let mut source_id = [0u8; 8];
        let mut offset = [0u8; 8];
        source_id.copy_from_slice(&bytes[0..8]);
        offset.copy_from_slice(&bytes[8..16]);
        Ok(Self {
            source_id: u64::from_le_bytes(source_id),
            offset: i64::from_le_bytes(offset),
        })
    }

    /// Larger of two locators, ignoring the invalid sentinel.
    pub fn max_valid(self, other: Locator) -> Locator {
        match (self.is_valid(), other.is_valid()) {
            (true, true) => self.max(other),
            (true, false) => self,
            (false, _) => other,
        }
    }
}

impl Default for Locator {
    fn default() -> Self {
        INVALID_LOCATOR
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "{}:{}", self.source_id, self.offset)
        } else {
            write!(f, "invalid")
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_invalid_sentinel() {
        assert!(!Locator::invalid().is_valid());
        assert_eq!(Locator::default(), INVALID_LOCATOR);
        assert!(Locator::new(0, 0).is_valid());
        assert_eq!(Locator::invalid().to_string(), "invalid");
    }

    #[test]
    fn test_ordering_is_source_then_offset() {
        assert!(Locator::new(1, 100) < Locator::new(2, 0));
        assert!(Locator::new(1, -5) < Locator::new(1, 3));
        assert_eq!(Locator::new(7, 7), Locator::new(7, 7));
    }

    #[test]
    fn test_fixed_width_layout() {
        let bytes = Locator::new(1, -1).to_bytes();
        assert_eq!(bytes.len(), LOCATOR_SIZE);
        assert_eq!(&bytes[0..8], &1u64.to_le_bytes());
        assert_eq!(&bytes[8..16], &(-1i64).to_le_bytes());
    }

    #[test]
    fn test_from_bytes_wrong_size() {
        let err = Locator::from_bytes(&[0u8; 15]).unwrap_err();
        assert!(err.to_string().contains("16 bytes"));
    }

    #[test]
    fn test_max_valid_skips_sentinel() {
        let a = Locator::new(1, 10);
        assert_eq!(a.max_valid(Locator::invalid()), a);
        assert_eq!(Locator::invalid().max_valid(a), a);
        assert_eq!(a.max_valid(Locator::new(1, 20)), Locator::new(1, 20));
        assert!(!Locator::invalid().max_valid(Locator::invalid()).is_valid());
    }

    proptest! {
        #[test]
        fn prop_bytes_roundtrip(source_id in any::<u64>(), offset in any::<i64>()) {
            let loc = Locator::new(source_id, offset);
            let parsed = Locator::from_bytes(&loc.to_bytes()).unwrap();
            prop_assert_eq!(parsed, loc);
        }
    }
}

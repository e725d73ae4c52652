//! Incremental 16-bit ones'-complement handlespace checksums.
//!
//! Registrars compare handlespace checksums to detect divergence. Each pool
//! element contributes a fixed [`ChecksumAccumulator`] value; the
//! handlespace keeps the running sum, adding on insert and subtracting on
//! removal, and folds it to 16 bits only when it is reported.

use serde::{Deserialize, Serialize};

/// Unfolded 32-bit checksum accumulator.
///
/// Addition and subtraction wrap, so any sequence of adds and matching
/// subtracts returns to the same value regardless of order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChecksumAccumulator(u32);

impl ChecksumAccumulator {
    /// The empty checksum.
    pub const INITIAL: Self = Self(0);

    /// Wraps a raw accumulator value.
    #[must_use]
    pub const fn from_raw(value: u32) -> Self {
        Self(value)
    }

    /// Returns the raw accumulator value.
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Adds `other` to this accumulator.
    #[must_use]
    pub const fn add(self, other: Self) -> Self {
        Self(self.0.wrapping_add(other.0))
    }

    /// Subtracts `other` from this accumulator.
    #[must_use]
    pub const fn sub(self, other: Self) -> Self {
        Self(self.0.wrapping_sub(other.0))
    }

    /// Adds `bytes` as a sequence of big-endian 16-bit words. An odd
    /// trailing byte is padded with a zero low byte.
    #[must_use]
    pub fn compute(self, bytes: &[u8]) -> Self {
        let mut sum = self.0;
        let mut words = bytes.chunks_exact(2);
        for word in &mut words {
            if let [high, low] = word {
                sum = sum.wrapping_add(u32::from(u16::from_be_bytes([*high, *low])));
            }
        }
        if let [last] = words.remainder() {
            sum = sum.wrapping_add(u32::from(u16::from_be_bytes([*last, 0])));
        }
        Self(sum)
    }

    /// Folds the carries into the low 16 bits and returns the complement.
    #[must_use]
    pub const fn finish(self) -> u16 {
        let mut sum = self.0;
        while sum >> 16 != 0 {
            sum = (sum & 0xffff) + (sum >> 16);
        }
        // sum fits in 16 bits after folding
        !(sum as u16)
    }
}

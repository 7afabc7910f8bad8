//! Pure chunk planning: partition a byte length into disjoint ranges.

use serde::{Deserialize, Serialize};

use super::error::{EngineError, Result};

/// One contiguous byte interval of a resource, fetched independently.
///
/// Stored as start + length so a zero-length range is representable;
/// the inclusive end offset is exposed by [`ChunkRange::end`] and only
/// meaningful for non-empty ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRange {
    pub index: usize,
    pub start: u64,
    pub len: u64,
}

impl ChunkRange {
    /// Inclusive end offset. Callers must check `is_empty` first.
    pub fn end(&self) -> u64 {
        debug_assert!(self.len > 0, "end() on an empty range");
        self.start + self.len - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Partition `[0, byte_length - 1]` into exactly `connections` contiguous,
/// non-overlapping ranges. `base = byte_length / connections`; every range
/// but the last spans `base` bytes, the last absorbs the remainder.
///
/// Zero byte length or zero connections is a caller error. When
/// `byte_length < connections` the leading ranges come out empty; the
/// engine treats those as immediately complete.
pub fn plan(byte_length: u64, connections: usize) -> Result<Vec<ChunkRange>> {
    if byte_length == 0 {
        return Err(EngineError::InvalidPlan(
            "byte length must be at least 1".to_string(),
        ));
    }
    if connections == 0 {
        return Err(EngineError::InvalidPlan(
            "connection count must be at least 1".to_string(),
        ));
    }

    let base = byte_length / connections as u64;
    let mut ranges = Vec::with_capacity(connections);
    for index in 0..connections {
        let start = index as u64 * base;
        let len = if index == connections - 1 {
            byte_length - start
        } else {
            base
        };
        ranges.push(ChunkRange { index, start, len });
    }
    Ok(ranges)
}

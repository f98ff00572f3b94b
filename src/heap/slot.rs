//! Slot identifiers and slot contents

use super::buffer::Buffer;
use super::dtype::DType;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a slot in the heap
///
/// Ids are dense indices into the slot table and are recycled after free.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SlotId(pub u32);

impl SlotId {
    pub fn new(index: u32) -> Self {
        Self(index)
    }

    /// Position of this slot in the table
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// Convert a client supplied id; negative or oversized ids have no slot
    pub fn from_wire(raw: i64) -> Option<Self> {
        u32::try_from(raw).ok().map(Self)
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Number of elements described by a shape (1 for a scalar)
///
/// Returns `None` when the product does not fit in `usize`.
pub fn element_count(shape: &[usize]) -> Option<usize> {
    shape
        .iter()
        .try_fold(1usize, |acc, &dim| acc.checked_mul(dim))
}

/// A live slot: recorded shape plus the owned typed buffer
#[derive(Debug)]
pub struct Slot {
    shape: Vec<usize>,
    buffer: Buffer,
}

impl Slot {
    pub(crate) fn new(shape: Vec<usize>, buffer: Buffer) -> Self {
        debug_assert_eq!(element_count(&shape), Some(buffer.len()));
        Self { shape, buffer }
    }

    pub fn dtype(&self) -> DType {
        self.buffer.dtype()
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn buffer(&self) -> &Buffer {
        &self.buffer
    }

    pub(crate) fn buffer_mut(&mut self) -> &mut Buffer {
        &mut self.buffer
    }

    /// Bytes held by the buffer
    pub fn byte_len(&self) -> usize {
        self.buffer.byte_len()
    }
}

//! Remote heap core
//!
//! # Architecture
//!
//! ```text
//! BufferStore
//!   ├─→ SlotTable   → entries: [Some(#0), None, Some(#2), None]
//!   │                 free:    [#1]          (FIFO, oldest first)
//!   └─→ codec       → flatten / unflatten_into per Element type
//!
//! Slot = shape + Buffer::{Int32, Float32, Float64}
//! ```
//!
//! The store owns every buffer. Ids are dense and recycled; the table's
//! capacity doubles on demand and never shrinks.

pub mod buffer;
pub mod codec;
pub mod dtype;
pub mod slot;
pub mod store;
pub mod table;

pub use buffer::Buffer;
pub use codec::Element;
pub use dtype::DType;
pub use slot::{element_count, Slot, SlotId};
pub use store::{BufferStore, HeapStats};
pub use table::SlotTable;

use thiserror::Error;

/// Failures of heap operations
///
/// All of these are recoverable and reported to the client as status codes.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HeapError {
    #[error("slot {0} is not live")]
    InvalidId(SlotId),

    #[error("unsupported dtype tag {0}")]
    UnsupportedDtype(i32),

    #[error("allocation failed: {0}")]
    AllocationFailure(String),

    #[error("shape mismatch: slot holds {expected} elements, got {actual}")]
    ShapeMismatch { expected: usize, actual: usize },

    #[error("dtype mismatch: slot holds {expected}, got {actual}")]
    DtypeMismatch { expected: DType, actual: DType },
}

impl TryFrom<i32> for DType {
    type Error = HeapError;

    fn try_from(tag: i32) -> Result<Self, Self::Error> {
        DType::from_tag(tag).ok_or(HeapError::UnsupportedDtype(tag))
    }
}

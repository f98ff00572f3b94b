//! Typed buffer store built on the slot table

use super::buffer::Buffer;
use super::codec::{self, Element};
use super::dtype::DType;
use super::slot::{element_count, Slot, SlotId};
use super::table::SlotTable;
use super::HeapError;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Snapshot of heap occupancy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeapStats {
    pub live_slots: usize,
    pub live_bytes: usize,
    pub capacity: usize,
    pub free_ids: usize,
}

/// Owner of every live buffer
///
/// Not synchronised on its own; the service wraps it in one lock.
#[derive(Debug, Default)]
pub struct BufferStore {
    table: SlotTable,
    /// Upper bound on live buffer bytes, 0 for no bound
    max_bytes: usize,
    live_bytes: usize,
}

impl BufferStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store refusing allocations that would push live buffer
    /// bytes past `max_bytes` (0 disables the limit)
    pub fn with_limit(max_bytes: usize) -> Self {
        Self {
            max_bytes,
            ..Self::default()
        }
    }

    /// Allocate a zeroed buffer and bind it to a fresh or recycled id
    ///
    /// Storage is obtained before the table is touched, so a failed
    /// allocation consumes no id.
    pub fn allocate(&mut self, dtype: DType, shape: Vec<usize>) -> Result<SlotId, HeapError> {
        let count = element_count(&shape).ok_or_else(|| {
            HeapError::AllocationFailure(format!("element count of shape {:?} overflows", shape))
        })?;
        let bytes = count.checked_mul(dtype.element_size()).ok_or_else(|| {
            HeapError::AllocationFailure(format!("byte size of shape {:?} overflows", shape))
        })?;

        if self.max_bytes > 0 && self.live_bytes.saturating_add(bytes) > self.max_bytes {
            return Err(HeapError::AllocationFailure(format!(
                "{} bytes requested, {} of {} bytes in use",
                bytes, self.live_bytes, self.max_bytes
            )));
        }

        let buffer = Buffer::zeroed(dtype, count)?;
        let id = self.table.acquire(Slot::new(shape, buffer));
        self.live_bytes += bytes;

        debug!(id = %id, dtype = %dtype, elements = count, "Allocated slot");
        Ok(id)
    }

    /// Release a slot and drop its buffer
    pub fn free(&mut self, id: SlotId) -> Result<(), HeapError> {
        let slot = self.table.release(id)?;
        self.live_bytes -= slot.byte_len();
        debug!(id = %id, bytes = slot.byte_len(), "Freed slot");
        Ok(())
    }

    /// Overwrite a slot's entire contents
    pub fn write<T: Element>(&mut self, id: SlotId, values: &[T]) -> Result<(), HeapError> {
        let slot = self.table.get_mut(id).ok_or(HeapError::InvalidId(id))?;
        codec::unflatten_into(slot, values)?;
        debug!(id = %id, dtype = %T::DTYPE, elements = values.len(), "Wrote slot");
        Ok(())
    }

    /// Read a slot's shape and flattened contents
    pub fn read<T: Element>(&self, id: SlotId) -> Result<(Vec<usize>, Vec<T>), HeapError> {
        let slot = self.table.get(id).ok_or(HeapError::InvalidId(id))?;
        let values = codec::flatten::<T>(slot)?;
        debug!(id = %id, dtype = %T::DTYPE, elements = values.len(), "Read slot");
        Ok((slot.shape().to_vec(), values))
    }

    /// Run `f` against a slot's shape and mutable `T` elements in place
    pub fn with_elements_mut<T: Element, R>(
        &mut self,
        id: SlotId,
        f: impl FnOnce(&[usize], &mut [T]) -> R,
    ) -> Result<R, HeapError> {
        let slot = self.table.get_mut(id).ok_or(HeapError::InvalidId(id))?;
        let dtype = slot.dtype();
        let shape = slot.shape().to_vec();
        let data = T::view_mut(slot.buffer_mut()).ok_or(HeapError::DtypeMismatch {
            expected: dtype,
            actual: T::DTYPE,
        })?;
        Ok(f(&shape, data))
    }

    /// Look up a live slot
    pub fn get(&self, id: SlotId) -> Option<&Slot> {
        self.table.get(id)
    }

    pub fn is_live(&self, id: SlotId) -> bool {
        self.table.is_live(id)
    }

    /// Drop every buffer and restart id issuance at 0
    pub fn reset_all(&mut self) {
        let dropped = self.table.take_all();
        let slots = dropped.len();
        drop(dropped);
        self.table.reset();

        info!(slots, bytes = self.live_bytes, "Reset heap");
        self.live_bytes = 0;
    }

    pub fn stats(&self) -> HeapStats {
        HeapStats {
            live_slots: self.table.live_count(),
            live_bytes: self.live_bytes,
            capacity: self.table.capacity(),
            free_ids: self.table.free_count(),
        }
    }
}

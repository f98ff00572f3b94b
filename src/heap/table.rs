//! Slot table: id issuance, FIFO recycling and capacity growth

use super::slot::{Slot, SlotId};
use super::HeapError;
use std::collections::VecDeque;
use tracing::trace;

/// Dense table of slots indexed by [`SlotId`]
///
/// Released ids are queued and handed out again oldest first. The backing
/// storage starts at capacity 1 and doubles whenever a fresh id does not
/// fit; it never shrinks, not even on reset.
#[derive(Debug, Default)]
pub struct SlotTable {
    /// One entry per unit of capacity; `None` means free or never issued
    entries: Vec<Option<Slot>>,
    /// Released ids awaiting reuse, earliest freed at the front
    free_list: VecDeque<SlotId>,
    /// Number of ids ever issued since the last reset
    issued: u32,
}

impl SlotTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `slot` under a recycled id if one is queued, otherwise under
    /// the next never-issued id
    pub fn acquire(&mut self, slot: Slot) -> SlotId {
        let id = match self.free_list.pop_front() {
            Some(id) => id,
            None => {
                let id = SlotId::new(self.issued);
                self.issued += 1;
                self.grow_for(id);
                id
            }
        };

        debug_assert!(self.entries[id.index()].is_none());
        self.entries[id.index()] = Some(slot);
        trace!(id = %id, capacity = self.entries.len(), "Acquired slot");
        id
    }

    fn grow_for(&mut self, id: SlotId) {
        if id.index() < self.entries.len() {
            return;
        }
        let new_capacity = match self.entries.len() {
            0 => 1,
            n => n * 2,
        };
        self.entries.resize_with(new_capacity, || None);
        trace!(capacity = new_capacity, "Grew slot table");
    }

    /// Remove a live slot, queueing its id for reuse
    pub fn release(&mut self, id: SlotId) -> Result<Slot, HeapError> {
        let slot = self
            .entry_mut(id)
            .and_then(Option::take)
            .ok_or(HeapError::InvalidId(id))?;
        self.free_list.push_back(id);
        Ok(slot)
    }

    /// Whether `id` currently names a slot
    pub fn is_live(&self, id: SlotId) -> bool {
        self.get(id).is_some()
    }

    pub fn get(&self, id: SlotId) -> Option<&Slot> {
        if id.0 >= self.issued {
            return None;
        }
        self.entries.get(id.index()).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, id: SlotId) -> Option<&mut Slot> {
        self.entry_mut(id).and_then(Option::as_mut)
    }

    fn entry_mut(&mut self, id: SlotId) -> Option<&mut Option<Slot>> {
        if id.0 >= self.issued {
            return None;
        }
        self.entries.get_mut(id.index())
    }

    /// Take every live slot out of the table, leaving the ids in place
    ///
    /// Used before [`reset`](Self::reset) so the caller decides when the
    /// buffers are dropped.
    pub fn take_all(&mut self) -> Vec<(SlotId, Slot)> {
        let issued = self.issued as usize;
        self.entries[..issued]
            .iter_mut()
            .enumerate()
            .filter_map(|(index, entry)| entry.take().map(|slot| (SlotId::new(index as u32), slot)))
            .collect()
    }

    /// Forget every slot and restart issuance at id 0
    pub fn reset(&mut self) {
        self.entries.iter_mut().for_each(|entry| *entry = None);
        self.free_list.clear();
        self.issued = 0;
    }

    /// Iterate over live slots in id order
    pub fn iter(&self) -> impl Iterator<Item = (SlotId, &Slot)> {
        self.entries[..self.issued as usize]
            .iter()
            .enumerate()
            .filter_map(|(index, entry)| entry.as_ref().map(|slot| (SlotId::new(index as u32), slot)))
    }

    pub fn live_count(&self) -> usize {
        self.issued as usize - self.free_list.len()
    }

    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    pub fn issued(&self) -> u32 {
        self.issued
    }

    pub fn free_count(&self) -> usize {
        self.free_list.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::{Buffer, DType};
    use proptest::prelude::*;

    fn scalar() -> Slot {
        Slot::new(vec![], Buffer::zeroed(DType::Int32, 1).unwrap())
    }

    #[test]
    fn test_sequential_ids() {
        let mut table = SlotTable::new();
        assert_eq!(table.acquire(scalar()), SlotId(0));
        assert_eq!(table.acquire(scalar()), SlotId(1));
        assert_eq!(table.acquire(scalar()), SlotId(2));
        assert_eq!(table.live_count(), 3);
    }

    #[test]
    fn test_capacity_doubles() {
        let mut table = SlotTable::new();
        assert_eq!(table.capacity(), 0);

        let mut seen = Vec::new();
        for _ in 0..9 {
            table.acquire(scalar());
            seen.push(table.capacity());
        }
        assert_eq!(seen, vec![1, 2, 4, 4, 8, 8, 8, 8, 16]);
    }

    #[test]
    fn test_release_requires_live_id() {
        let mut table = SlotTable::new();
        let id = table.acquire(scalar());

        assert!(table.release(id).is_ok());
        assert_eq!(table.release(id).unwrap_err(), HeapError::InvalidId(id));
        assert_eq!(
            table.release(SlotId(5)).unwrap_err(),
            HeapError::InvalidId(SlotId(5))
        );
    }

    #[test]
    fn test_fifo_reuse() {
        let mut table = SlotTable::new();
        let ids: Vec<_> = (0..4).map(|_| table.acquire(scalar())).collect();

        table.release(ids[2]).unwrap();
        table.release(ids[0]).unwrap();
        table.release(ids[3]).unwrap();

        assert_eq!(table.acquire(scalar()), ids[2]);
        assert_eq!(table.acquire(scalar()), ids[0]);
        assert_eq!(table.acquire(scalar()), ids[3]);
        assert_eq!(table.acquire(scalar()), SlotId(4));
    }

    #[test]
    fn test_unissued_capacity_not_addressable() {
        let mut table = SlotTable::new();
        for _ in 0..3 {
            table.acquire(scalar());
        }
        // Capacity is 4 but id 3 was never issued.
        assert_eq!(table.capacity(), 4);
        assert!(!table.is_live(SlotId(3)));
        assert!(table.get_mut(SlotId(3)).is_none());
    }

    #[test]
    fn test_reset_restarts_ids_keeps_capacity() {
        let mut table = SlotTable::new();
        for _ in 0..5 {
            table.acquire(scalar());
        }
        table.release(SlotId(1)).unwrap();
        let taken = table.take_all();
        assert_eq!(taken.len(), 4);

        table.reset();
        assert_eq!(table.capacity(), 8);
        assert_eq!(table.live_count(), 0);
        assert_eq!(table.free_count(), 0);
        assert!(!table.is_live(SlotId(0)));
        assert_eq!(table.acquire(scalar()), SlotId(0));
        assert_eq!(table.acquire(scalar()), SlotId(1));
    }

    #[derive(Debug, Clone)]
    enum Op {
        Acquire,
        Release(usize),
        Reset,
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            4 => Just(Op::Acquire),
            3 => (0usize..32).prop_map(Op::Release),
            1 => Just(Op::Reset),
        ]
    }

    proptest! {
        #[test]
        fn prop_live_ids_unique_and_reuse_is_fifo(ops in prop::collection::vec(op_strategy(), 1..200)) {
            let mut table = SlotTable::new();
            let mut live: Vec<SlotId> = Vec::new();
            let mut freed: VecDeque<SlotId> = VecDeque::new();
            let mut next = 0u32;

            for op in ops {
                match op {
                    Op::Acquire => {
                        let id = table.acquire(scalar());
                        let expected = freed.pop_front().unwrap_or_else(|| {
                            next += 1;
                            SlotId(next - 1)
                        });
                        prop_assert_eq!(id, expected);
                        prop_assert!(!live.contains(&id));
                        live.push(id);
                    }
                    Op::Release(n) => {
                        let id = SlotId(n as u32);
                        let result = table.release(id);
                        if let Some(pos) = live.iter().position(|&l| l == id) {
                            prop_assert!(result.is_ok());
                            live.remove(pos);
                            freed.push_back(id);
                        } else {
                            prop_assert_eq!(result.unwrap_err(), HeapError::InvalidId(id));
                        }
                    }
                    Op::Reset => {
                        table.take_all();
                        table.reset();
                        live.clear();
                        freed.clear();
                        next = 0;
                    }
                }

                prop_assert_eq!(table.live_count(), live.len());
                prop_assert!(table.capacity() >= table.issued() as usize);
                for id in &live {
                    prop_assert!(table.is_live(*id));
                }
                for id in &freed {
                    prop_assert!(!table.is_live(*id));
                }
            }
        }
    }
}

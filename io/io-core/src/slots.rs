use std::os::fd::RawFd;
use std::time::Instant;

use ahash::AHashMap;

/// Size of one receive buffer slot in bytes. Must be a power of two so slot
/// addresses can be computed by shift.
pub const BUF_SIZE: u32 = 2048;

/// Number of slots in the provided-buffer ring. Must be a power of two (ring
/// index arithmetic relies on masking).
pub const BUF_COUNT: u16 = 4096;

const _: () = assert!(BUF_SIZE.is_power_of_two() && BUF_SIZE <= 32768);
const _: () = assert!(BUF_COUNT.is_power_of_two());

pub(crate) const BUF_SHIFT: u32 = BUF_SIZE.trailing_zeros();

/// Bookkeeping for one buffer slot.
///
/// `in_use` is true from the moment the kernel delivers the slot on a recv
/// completion until the slot is returned to the provided-buffer ring.
/// `ref_count` is the number of outstanding write submissions still
/// referencing the slot; it is a plain integer because a slot is only ever
/// touched by the worker thread that owns its pool.
#[derive(Debug)]
pub struct BufferSlot {
    pub in_use: bool,
    pub owner_fd: RawFd,
    pub ref_count: u32,
    pub bytes_used: u64,
    pub total_uses: u64,
    pub allocation_time: Instant,
}

impl BufferSlot {
    fn new() -> Self {
        BufferSlot {
            in_use: false,
            owner_fd: 0,
            ref_count: 0,
            bytes_used: 0,
            total_uses: 0,
            allocation_time: Instant::now(),
        }
    }
}

/// Result of a release attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// The slot was freed and may be returned to the kernel.
    Released,
    /// Writes still reference the slot; release happens when the count
    /// reaches zero.
    Deferred,
    /// The slot was not in use.
    AlreadyFree,
}

/// Pure slot-state table: everything the buffer pool tracks about its slots
/// short of the kernel-shared ring itself.
pub struct SlotTable {
    slots: Vec<BufferSlot>,
    client_index: AHashMap<RawFd, u16>,
}

impl SlotTable {
    pub fn new(count: usize) -> Self {
        SlotTable {
            slots: (0..count).map(|_| BufferSlot::new()).collect(),
            client_index: AHashMap::new(),
        }
    }

    /// Record that the kernel delivered slot `idx` for a recv from `fd`.
    /// `bytes` is clamped to the slot size; a kernel result larger than the
    /// slot never reads past the slot payload.
    pub fn mark_in_use(&mut self, idx: u16, fd: RawFd, bytes: u64) {
        let Some(slot) = self.slots.get_mut(idx as usize) else {
            return;
        };
        slot.in_use = true;
        slot.owner_fd = fd;
        slot.bytes_used = bytes.min(BUF_SIZE as u64);
        slot.total_uses += 1;
        slot.allocation_time = Instant::now();
        self.client_index.insert(fd, idx);
    }

    /// Add one outstanding write reference.
    pub fn increment(&mut self, idx: u16) {
        if let Some(slot) = self.slots.get_mut(idx as usize) {
            slot.ref_count += 1;
        }
    }

    /// Add `n` outstanding write references in one step, before any of the
    /// corresponding writes are submitted.
    pub fn add_refs(&mut self, idx: u16, n: u32) {
        if let Some(slot) = self.slots.get_mut(idx as usize) {
            slot.ref_count += n;
        }
    }

    /// Drop one write reference and return the remaining count. Saturates at
    /// zero; a decrement past zero indicates a bookkeeping bug upstream.
    pub fn decrement(&mut self, idx: u16) -> u32 {
        match self.slots.get_mut(idx as usize) {
            Some(slot) => {
                slot.ref_count = slot.ref_count.saturating_sub(1);
                slot.ref_count
            }
            None => 0,
        }
    }

    /// Attempt to free slot `idx`. Idempotent: freeing a free slot is a
    /// no-op, and a slot with outstanding write references stays in use until
    /// the last reference is dropped.
    pub fn release(&mut self, idx: u16) -> ReleaseOutcome {
        let Some(slot) = self.slots.get_mut(idx as usize) else {
            return ReleaseOutcome::AlreadyFree;
        };
        if !slot.in_use {
            return ReleaseOutcome::AlreadyFree;
        }
        if slot.ref_count > 0 {
            return ReleaseOutcome::Deferred;
        }

        let owner = slot.owner_fd;
        slot.in_use = false;
        slot.owner_fd = 0;
        slot.bytes_used = 0;

        // The owner may already have moved on to a newer slot; only unlink
        // the index entry that still points here.
        if self.client_index.get(&owner) == Some(&idx) {
            self.client_index.remove(&owner);
        }
        ReleaseOutcome::Released
    }

    /// The slot currently associated with `fd`, if any.
    pub fn find_slot(&self, fd: RawFd) -> Option<u16> {
        self.client_index.get(&fd).copied()
    }

    pub fn slot(&self, idx: u16) -> Option<&BufferSlot> {
        self.slots.get(idx as usize)
    }

    /// Number of slots currently held out of the kernel ring.
    pub fn in_use_count(&self) -> usize {
        self.slots.iter().filter(|s| s.in_use).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mark_and_release() {
        let mut table = SlotTable::new(8);
        table.mark_in_use(3, 10, 100);

        let slot = table.slot(3).unwrap();
        assert!(slot.in_use);
        assert_eq!(slot.owner_fd, 10);
        assert_eq!(slot.bytes_used, 100);
        assert_eq!(slot.total_uses, 1);
        assert_eq!(table.find_slot(10), Some(3));

        assert_eq!(table.release(3), ReleaseOutcome::Released);
        let slot = table.slot(3).unwrap();
        assert!(!slot.in_use);
        assert_eq!(slot.owner_fd, 0);
        assert_eq!(table.find_slot(10), None);
    }

    #[test]
    fn release_is_idempotent_on_free_slot() {
        let mut table = SlotTable::new(4);
        assert_eq!(table.release(2), ReleaseOutcome::AlreadyFree);
        table.mark_in_use(2, 5, 10);
        assert_eq!(table.release(2), ReleaseOutcome::Released);
        assert_eq!(table.release(2), ReleaseOutcome::AlreadyFree);
    }

    #[test]
    fn release_defers_while_writes_outstanding() {
        let mut table = SlotTable::new(4);
        table.mark_in_use(0, 7, 20);

        // Fan-out to three recipients: three references up front.
        table.add_refs(0, 3);
        assert_eq!(table.release(0), ReleaseOutcome::Deferred);
        assert!(table.slot(0).unwrap().in_use);

        // Write completions drain one at a time.
        assert_eq!(table.decrement(0), 2);
        assert_eq!(table.decrement(0), 1);
        assert_eq!(table.release(0), ReleaseOutcome::Deferred);
        assert_eq!(table.decrement(0), 0);
        assert_eq!(table.release(0), ReleaseOutcome::Released);
    }

    #[test]
    fn fanout_increments_match_decrements() {
        let mut table = SlotTable::new(4);
        table.mark_in_use(1, 9, 5);

        let recipients = 5;
        for _ in 0..recipients {
            table.increment(1);
        }
        assert_eq!(table.slot(1).unwrap().ref_count, recipients);

        let mut decrements = 0;
        while table.decrement(1) > 0 {
            decrements += 1;
        }
        decrements += 1; // the decrement that returned zero
        assert_eq!(decrements, recipients);
    }

    #[test]
    fn free_slot_never_carries_references() {
        let mut table = SlotTable::new(4);
        table.mark_in_use(0, 3, 1);
        table.add_refs(0, 2);
        table.decrement(0);
        table.decrement(0);
        table.release(0);

        for idx in 0..4 {
            let slot = table.slot(idx).unwrap();
            if !slot.in_use {
                assert_eq!(slot.ref_count, 0);
            }
        }
    }

    #[test]
    fn decrement_saturates_at_zero() {
        let mut table = SlotTable::new(2);
        table.mark_in_use(0, 1, 1);
        assert_eq!(table.decrement(0), 0);
        assert_eq!(table.decrement(0), 0);
    }

    #[test]
    fn newer_slot_wins_client_index() {
        let mut table = SlotTable::new(4);
        // Two messages from the same client while the first slot is still
        // held by in-flight writes.
        table.mark_in_use(0, 6, 10);
        table.add_refs(0, 1);
        table.mark_in_use(1, 6, 12);
        assert_eq!(table.find_slot(6), Some(1));

        // Releasing the older slot must not unlink the newer mapping.
        table.decrement(0);
        assert_eq!(table.release(0), ReleaseOutcome::Released);
        assert_eq!(table.find_slot(6), Some(1));
    }

    #[test]
    fn oversized_recv_is_clamped() {
        let mut table = SlotTable::new(2);
        table.mark_in_use(0, 4, BUF_SIZE as u64 + 500);
        assert_eq!(table.slot(0).unwrap().bytes_used, BUF_SIZE as u64);
    }

    #[test]
    fn total_uses_accumulates() {
        let mut table = SlotTable::new(2);
        table.mark_in_use(0, 1, 1);
        table.release(0);
        table.mark_in_use(0, 2, 1);
        assert_eq!(table.slot(0).unwrap().total_uses, 2);
    }
}

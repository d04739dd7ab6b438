//! Kernel-shared receive buffer pool.
//!
//! One pool backs one worker reactor. The backing store is a single
//! anonymous mmap laid out as the kernel expects a provided-buffer ring:
//! the `io_uring_buf` metadata array first, then the fixed-size payload
//! slots. The kernel picks slots for multishot recv completions; userspace
//! returns them by republishing the ring tail.
//!
//! Slots are addressed by opaque index everywhere outside this module. The
//! only raw-pointer surface is the staged-frame pointer handed to write
//! submissions, which stays valid until the owning slot is released.

use std::os::fd::RawFd;
use std::sync::atomic::{AtomicU16, Ordering};

use io_uring::types;

use crate::error::Error;
use crate::ring::Ring;
use crate::slots::{ReleaseOutcome, SlotTable, BUF_COUNT, BUF_SHIFT, BUF_SIZE};

/// Buffer group id the pool registers under.
pub const BUFFER_GROUP: u16 = 1;

pub struct BufferPool {
    /// Base of the mmap'd region: `[io_uring_buf; BUF_COUNT]`, then payloads.
    ring_base: *mut u8,
    map_len: usize,
    /// First payload byte; slot `i` lives at `payload_base + (i << BUF_SHIFT)`.
    payload_base: *mut u8,
    /// Kernel-visible ring tail, stored in the first entry's reserved field.
    tail: *const AtomicU16,
    local_tail: u16,
    mask: u16,
    slots: SlotTable,
    /// One staged outbound frame per slot. A write tagged with slot `i`
    /// points into this arena, so the frame lives exactly as long as the
    /// slot's reference count keeps the slot in use.
    staged: Box<[u8]>,
    staged_len: Box<[u32]>,
    frame_len: usize,
}

impl BufferPool {
    /// Map the backing region, register it with the ring as a
    /// provided-buffer ring under [`BUFFER_GROUP`], and seed every slot.
    pub fn new(ring: &Ring, frame_len: usize) -> Result<Self, Error> {
        let entries = BUF_COUNT as usize;
        let ring_bytes = entries * std::mem::size_of::<types::BufRingEntry>();
        let map_len = ring_bytes + entries * BUF_SIZE as usize;

        let addr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                map_len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_ANONYMOUS | libc::MAP_PRIVATE,
                -1,
                0,
            )
        };
        if addr == libc::MAP_FAILED {
            return Err(Error::Io(std::io::Error::last_os_error()));
        }
        let ring_base = addr as *mut u8;

        // Safety: the region outlives the registration; it is unmapped only
        // after the ring itself is torn down.
        if let Err(e) = unsafe {
            ring.submitter()
                .register_buf_ring(ring_base as u64, BUF_COUNT, BUFFER_GROUP)
        } {
            unsafe {
                libc::munmap(addr, map_len);
            }
            return Err(Error::BufferRegistration(e.to_string()));
        }

        let payload_base = unsafe { ring_base.add(ring_bytes) };
        let tail = unsafe {
            types::BufRingEntry::tail(ring_base as *const types::BufRingEntry) as *const AtomicU16
        };

        let mut pool = BufferPool {
            ring_base,
            map_len,
            payload_base,
            tail,
            local_tail: 0,
            mask: BUF_COUNT - 1,
            slots: SlotTable::new(entries),
            staged: vec![0u8; entries * frame_len].into_boxed_slice(),
            staged_len: vec![0u32; entries].into_boxed_slice(),
            frame_len,
        };

        for idx in 0..BUF_COUNT {
            pool.push_to_kernel(idx);
        }
        pool.publish();

        Ok(pool)
    }

    fn slot_addr(&self, idx: u16) -> *mut u8 {
        unsafe { self.payload_base.add((idx as usize) << BUF_SHIFT) }
    }

    /// Payload bytes of slot `idx`. `len` is clamped to the slot size, so an
    /// overflowing recv result never reads out of bounds.
    pub fn slot_bytes(&self, idx: u16, len: usize) -> &[u8] {
        let len = len.min(BUF_SIZE as usize);
        unsafe { std::slice::from_raw_parts(self.slot_addr(idx), len) }
    }

    /// Record a recv completion that delivered slot `idx` for `fd`.
    pub fn mark_in_use(&mut self, idx: u16, fd: RawFd, bytes: u64) {
        self.slots.mark_in_use(idx, fd, bytes);
    }

    pub fn increment(&mut self, idx: u16) {
        self.slots.increment(idx);
    }

    pub fn add_refs(&mut self, idx: u16, n: u32) {
        self.slots.add_refs(idx, n);
    }

    pub fn decrement(&mut self, idx: u16) -> u32 {
        self.slots.decrement(idx)
    }

    pub fn find_slot(&self, fd: RawFd) -> Option<u16> {
        self.slots.find_slot(fd)
    }

    /// Attempt to return slot `idx` to the kernel ring. Deferred while write
    /// references remain; idempotent on a free slot.
    pub fn release(&mut self, idx: u16) -> ReleaseOutcome {
        let outcome = self.slots.release(idx);
        if outcome == ReleaseOutcome::Released {
            self.push_to_kernel(idx);
            self.publish();
        }
        outcome
    }

    /// Return a slot the kernel delivered but that was never marked in use
    /// (e.g., a completion for an fd that disconnected earlier in the batch).
    pub fn recycle(&mut self, idx: u16) {
        self.push_to_kernel(idx);
        self.publish();
    }

    /// Copy an outbound frame into slot `idx`'s staging area. Must happen
    /// before any write referencing `idx` is submitted.
    pub fn stage(&mut self, idx: u16, frame: &[u8]) {
        let len = frame.len().min(self.frame_len);
        let off = idx as usize * self.frame_len;
        self.staged[off..off + len].copy_from_slice(&frame[..len]);
        self.staged_len[idx as usize] = len as u32;
    }

    /// Pointer and length of the frame staged for slot `idx`. Valid until
    /// the slot is released.
    pub fn staged(&self, idx: u16) -> (*const u8, u32) {
        let off = idx as usize * self.frame_len;
        (
            self.staged[off..].as_ptr(),
            self.staged_len[idx as usize],
        )
    }

    /// Number of slots currently held out of the kernel ring.
    pub fn in_use_count(&self) -> usize {
        self.slots.in_use_count()
    }

    fn push_to_kernel(&mut self, bid: u16) {
        let ring_idx = (self.local_tail & self.mask) as usize;
        let entry =
            unsafe { &mut *(self.ring_base as *mut types::BufRingEntry).add(ring_idx) };
        entry.set_addr(self.slot_addr(bid) as u64);
        entry.set_len(BUF_SIZE);
        entry.set_bid(bid);
        self.local_tail = self.local_tail.wrapping_add(1);
    }

    fn publish(&self) {
        // Release ordering so the kernel observes the entry fields before
        // the new tail.
        unsafe {
            (*self.tail).store(self.local_tail, Ordering::Release);
        }
    }
}

impl Drop for BufferPool {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.ring_base as *mut libc::c_void, self.map_len);
        }
    }
}

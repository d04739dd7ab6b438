use std::os::fd::RawFd;

use tracing::error;

use crate::buffer_pool::BufferPool;
use crate::ring::Ring;
use crate::slots::ReleaseOutcome;

/// The context handed to [`EventHandler`] callbacks for issuing operations.
///
/// A short-lived borrow into the reactor's ring and buffer pool. All methods
/// preserve the slot lifetime invariant: a slot is never returned to the
/// kernel while a write referencing it is in flight.
pub struct DriverCtx<'a> {
    pub(crate) ring: &'a mut Ring,
    pub(crate) pool: &'a mut BufferPool,
}

impl DriverCtx<'_> {
    /// Send one frame to `fd`, anchored to slot `idx`. The frame is staged
    /// in the slot's arena and the slot holds one write reference until the
    /// completion drains.
    pub fn reply(&mut self, fd: RawFd, idx: u16, frame: &[u8]) {
        self.pool.stage(idx, frame);
        self.pool.increment(idx);
        let (ptr, len) = self.pool.staged(idx);
        if let Err(e) = self.ring.prepare_write(fd, ptr, len, idx) {
            error!(fd, error = %e, "write submission failed");
            self.drop_ref(idx);
        }
    }

    /// Fan one frame out to every fd in `targets`, anchored to slot `idx`.
    ///
    /// All references are taken before the first write is submitted, so the
    /// count cannot reach zero until every recipient's completion has
    /// drained. A submission that fails synchronously gives its reference
    /// back immediately.
    pub fn broadcast(&mut self, targets: &[RawFd], idx: u16, frame: &[u8]) {
        self.pool.stage(idx, frame);
        self.pool.add_refs(idx, targets.len() as u32);
        let (ptr, len) = self.pool.staged(idx);
        for &fd in targets {
            if let Err(e) = self.ring.prepare_write(fd, ptr, len, idx) {
                error!(fd, error = %e, "write submission failed during fan-out");
                self.drop_ref(idx);
            }
        }
    }

    /// Return slot `idx` to the kernel without sending anything.
    pub fn release(&mut self, idx: u16) -> ReleaseOutcome {
        self.pool.release(idx)
    }

    fn drop_ref(&mut self, idx: u16) {
        if self.pool.decrement(idx) == 0 {
            self.pool.release(idx);
        }
    }
}

/// Application callbacks driven by a worker reactor's event loop.
pub trait EventHandler {
    /// A recv completion delivered `data` from `fd` in slot `idx`. The
    /// handler must either anchor outbound writes to `idx` (via
    /// [`DriverCtx::reply`] / [`DriverCtx::broadcast`]) or release the slot.
    fn on_data(&mut self, ctx: &mut DriverCtx<'_>, fd: RawFd, idx: u16, data: &[u8]);

    /// `fd` disconnected or errored. Slot release and the close submission
    /// are handled by the event loop; this is for application-side cleanup.
    fn on_disconnect(&mut self, fd: RawFd);
}

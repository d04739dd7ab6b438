use std::os::fd::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ahash::AHashSet;
use crossbeam_channel::Receiver;
use io_uring::cqueue;
use tracing::{debug, error, info, trace, warn};

use crate::buffer_pool::BufferPool;
use crate::completion::{OpKind, UserData};
use crate::error::Error;
use crate::handler::{DriverCtx, EventHandler};
use crate::ring::{Ring, CQE_BATCH_SIZE, SQ_ENTRIES};
use crate::slots::BUF_SIZE;

/// A worker reactor: one ring, one buffer pool, and the completion drain
/// loop that dispatches to the application handler.
///
/// New client fds arrive over `accept_rx`; the accept reactor wakes this
/// loop by writing the worker's eventfd, whose read completion triggers a
/// channel drain and the first `prepare_read` for each handed-off fd. The
/// ring is created on the calling thread and must stay there.
pub struct EventLoop<H: EventHandler> {
    ring: Ring,
    pool: BufferPool,
    handler: H,
    accept_rx: Receiver<RawFd>,
    wakeup_fd: RawFd,
    wakeup_buf: [u8; 8],
    stop: Arc<AtomicBool>,
    /// Fds whose reads this reactor owns. Guards against acting on stale
    /// completions after a disconnect earlier in the same batch.
    clients: AHashSet<RawFd>,
    /// Recv payload copy handed to the handler, so the handler can mutate
    /// pool state while reading the data.
    scratch: Box<[u8]>,
    cqe_batch: Vec<(u64, i32, u32)>,
}

impl<H: EventHandler> EventLoop<H> {
    pub fn new(
        handler: H,
        accept_rx: Receiver<RawFd>,
        wakeup_fd: RawFd,
        stop: Arc<AtomicBool>,
        frame_len: usize,
    ) -> Result<Self, Error> {
        let ring = Ring::setup(SQ_ENTRIES)?;
        let pool = BufferPool::new(&ring, frame_len)?;

        Ok(EventLoop {
            ring,
            pool,
            handler,
            accept_rx,
            wakeup_fd,
            wakeup_buf: [0u8; 8],
            stop,
            clients: AHashSet::new(),
            scratch: vec![0u8; BUF_SIZE as usize].into_boxed_slice(),
            cqe_batch: Vec::with_capacity(CQE_BATCH_SIZE),
        })
    }

    /// Run the drain loop. Blocks the current thread until shutdown is
    /// flagged and observed between batches.
    pub fn run(&mut self) -> Result<(), Error> {
        self.ring
            .prepare_wakeup_read(self.wakeup_fd, self.wakeup_buf.as_mut_ptr())?;

        loop {
            let mut n = self.ring.peek_batch(&mut self.cqe_batch, CQE_BATCH_SIZE);
            if n == 0 {
                self.ring.submit_and_wait(1)?;
                n = self.ring.peek_batch(&mut self.cqe_batch, CQE_BATCH_SIZE);
            }

            for i in 0..n {
                let (ud, res, flags) = self.cqe_batch[i];
                self.dispatch(ud, res, flags);
            }

            // Flush SQEs queued during dispatch before the next wait.
            if n > 0 {
                let _ = self.ring.submit();
            }

            if self.stop.load(Ordering::Relaxed) {
                self.run_shutdown();
                return Ok(());
            }
        }
    }

    fn dispatch(&mut self, ud_raw: u64, res: i32, flags: u32) {
        let ud = UserData(ud_raw);
        let Some(kind) = ud.kind() else {
            error!(user_data = ud_raw, "completion with invalid op kind");
            return;
        };

        match kind {
            OpKind::Read => {
                let fd = ud.fd();
                if fd == self.wakeup_fd {
                    self.handle_wakeup();
                } else {
                    self.handle_read(fd, res, flags);
                }
            }
            OpKind::Write => self.handle_write(ud.fd(), ud.buffer_idx(), res),
            OpKind::Close => trace!(fd = ud.fd(), "close completed"),
            OpKind::Accept => warn!("unexpected accept completion on worker reactor"),
        }
    }

    fn handle_read(&mut self, fd: RawFd, res: i32, flags: u32) {
        let has_more = cqueue::more(flags);

        if res <= 0 {
            if res < 0 && -res == libc::ENOBUFS {
                // Provided-buffer ring momentarily empty. The multishot may
                // have terminated; re-arm instead of dropping the client.
                if !has_more {
                    if let Err(e) = self.ring.prepare_read(fd) {
                        error!(fd, error = %e, "re-arm after ENOBUFS failed");
                        self.disconnect(fd);
                    }
                }
                return;
            }
            if res == 0 {
                debug!(fd, "client disconnected");
            } else {
                debug!(fd, err = -res, "read error");
            }
            self.disconnect(fd);
            return;
        }

        let Some(bid) = cqueue::buffer_select(flags) else {
            // Data completion without a provided buffer: nothing to release.
            warn!(fd, "read completion without buffer flag");
            self.disconnect(fd);
            return;
        };

        if !self.clients.contains(&fd) {
            // The fd disconnected earlier in this batch; the slot was never
            // marked, hand it straight back to the kernel.
            self.pool.recycle(bid);
            return;
        }

        let len = (res as u32).min(BUF_SIZE) as usize;
        self.pool.mark_in_use(bid, fd, res as u64);
        self.scratch[..len].copy_from_slice(self.pool.slot_bytes(bid, len));

        {
            let mut ctx = DriverCtx {
                ring: &mut self.ring,
                pool: &mut self.pool,
            };
            self.handler.on_data(&mut ctx, fd, bid, &self.scratch[..len]);
        }

        // Kernel dropped the multishot; arm a fresh one.
        if !has_more {
            if let Err(e) = self.ring.prepare_read(fd) {
                error!(fd, error = %e, "re-arm read failed");
                self.disconnect(fd);
            }
        }
    }

    fn handle_write(&mut self, fd: RawFd, idx: u16, res: i32) {
        if res < 0 {
            debug!(fd, err = -res, "write failed");
        } else {
            trace!(fd, bytes = res, "write completed");
        }
        // The last completion referencing the slot releases it.
        if self.pool.decrement(idx) == 0 {
            self.pool.release(idx);
        }
    }

    fn handle_wakeup(&mut self) {
        while let Ok(fd) = self.accept_rx.try_recv() {
            self.clients.insert(fd);
            if let Err(e) = self.ring.prepare_read(fd) {
                error!(fd, error = %e, "failed to arm first read");
                self.clients.remove(&fd);
                unsafe {
                    libc::close(fd);
                }
            } else {
                trace!(fd, "armed first read for new client");
            }
        }

        if !self.stop.load(Ordering::Relaxed) {
            if let Err(e) = self
                .ring
                .prepare_wakeup_read(self.wakeup_fd, self.wakeup_buf.as_mut_ptr())
            {
                error!(error = %e, "failed to re-arm wakeup read");
            }
        }
    }

    fn disconnect(&mut self, fd: RawFd) {
        if !self.clients.remove(&fd) {
            return; // already closing
        }
        self.handler.on_disconnect(fd);
        if let Some(idx) = self.pool.find_slot(fd) {
            // Deferred automatically if fan-out writes are still in flight.
            self.pool.release(idx);
        }
        if let Err(e) = self.ring.prepare_close(fd) {
            error!(fd, error = %e, "close submission failed");
        }
    }

    fn run_shutdown(&mut self) {
        info!(
            clients = self.clients.len(),
            held_slots = self.pool.in_use_count(),
            "worker shutting down"
        );

        let fds: Vec<RawFd> = self.clients.drain().collect();
        for fd in fds {
            let _ = self.ring.prepare_close(fd);
        }
        let _ = self.ring.submit();

        // Best-effort drain of completions that already arrived; anything
        // still in flight is reclaimed when the ring is torn down.
        for _ in 0..8 {
            if self.ring.peek_batch(&mut self.cqe_batch, CQE_BATCH_SIZE) == 0 {
                break;
            }
            for i in 0..self.cqe_batch.len() {
                let (ud_raw, _res, _flags) = self.cqe_batch[i];
                let ud = UserData(ud_raw);
                if ud.kind() == Some(OpKind::Write) {
                    let idx = ud.buffer_idx();
                    if self.pool.decrement(idx) == 0 {
                        self.pool.release(idx);
                    }
                }
            }
        }

        unsafe {
            libc::close(self.wakeup_fd);
        }
    }
}

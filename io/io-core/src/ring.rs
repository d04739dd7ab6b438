use std::os::fd::RawFd;

use io_uring::types::Fd;
use io_uring::{opcode, IoUring};

use crate::buffer_pool::BUFFER_GROUP;
use crate::completion::{OpKind, UserData};
use crate::error::Error;

/// Submission queue depth for worker reactors.
pub const SQ_ENTRIES: u32 = 2048;

/// Maximum completions drained per batch on a worker reactor.
pub const CQE_BATCH_SIZE: usize = 256;

/// Submission queue depth for the accept reactor.
pub const ACCEPT_SQ_ENTRIES: u32 = 256;

/// Maximum completions drained per batch on the accept reactor.
pub const ACCEPT_CQE_BATCH_SIZE: usize = 32;

/// Wrapper around one io_uring instance providing tagged SQE submission
/// helpers. One `Ring` is owned by exactly one reactor thread.
pub struct Ring {
    ring: IoUring,
}

impl Ring {
    /// Create and configure the io_uring instance. Must be called on the
    /// thread that will drive the ring (single-issuer discipline).
    pub fn setup(sq_entries: u32) -> Result<Self, Error> {
        let mut builder = IoUring::builder();
        builder.setup_cqsize(sq_entries.saturating_mul(4));
        builder.setup_coop_taskrun();
        builder.setup_single_issuer();
        builder.setup_defer_taskrun();

        let ring = builder
            .build(sq_entries)
            .map_err(|e| Error::RingSetup(e.to_string()))?;

        Ok(Ring { ring })
    }

    pub(crate) fn submitter(&self) -> io_uring::Submitter<'_> {
        self.ring.submitter()
    }

    /// Enqueue a multishot accept on the listening socket. The tag carries
    /// fd = -1; each completion's result is the accepted fd.
    pub fn prepare_accept(&mut self, listen_fd: RawFd) -> Result<(), Error> {
        let ud = UserData::encode(-1, OpKind::Accept, 0);
        let entry = opcode::AcceptMulti::new(Fd(listen_fd))
            .build()
            .user_data(ud.raw());
        unsafe { self.push_sqe(entry) }
    }

    /// Enqueue a multishot recv with buffer selection from [`BUFFER_GROUP`].
    /// The kernel picks the slot and reports it in the completion flags.
    pub fn prepare_read(&mut self, fd: RawFd) -> Result<(), Error> {
        let ud = UserData::encode(fd, OpKind::Read, 0);
        let entry = opcode::RecvMulti::new(Fd(fd), BUFFER_GROUP)
            .build()
            .user_data(ud.raw());
        unsafe { self.push_sqe(entry) }
    }

    /// Enqueue a write of `len` bytes at `ptr`. The tag carries `buf_idx` so
    /// the completion can drop the referenced slot's write count.
    ///
    /// `ptr` must stay valid until the completion arrives; the buffer pool's
    /// staging arena guarantees this for slot-anchored frames.
    pub fn prepare_write(
        &mut self,
        fd: RawFd,
        ptr: *const u8,
        len: u32,
        buf_idx: u16,
    ) -> Result<(), Error> {
        let ud = UserData::encode(fd, OpKind::Write, buf_idx);
        let entry = opcode::Send::new(Fd(fd), ptr, len)
            .build()
            .user_data(ud.raw());
        unsafe { self.push_sqe(entry) }
    }

    /// Enqueue a close for a client fd.
    pub fn prepare_close(&mut self, fd: RawFd) -> Result<(), Error> {
        let ud = UserData::encode(fd, OpKind::Close, 0);
        let entry = opcode::Close::new(Fd(fd)).build().user_data(ud.raw());
        unsafe { self.push_sqe(entry) }
    }

    /// Enqueue an 8-byte read on a wakeup eventfd, tagged as a READ for that
    /// fd so the drain loop can recognize it.
    pub fn prepare_wakeup_read(&mut self, eventfd: RawFd, buf: *mut u8) -> Result<(), Error> {
        let ud = UserData::encode(eventfd, OpKind::Read, 0);
        let entry = opcode::Read::new(Fd(eventfd), buf, 8)
            .build()
            .user_data(ud.raw());
        unsafe { self.push_sqe(entry) }
    }

    /// Submit pending SQEs without waiting.
    pub fn submit(&self) -> Result<(), Error> {
        self.ring.submit().map_err(Error::Io)?;
        Ok(())
    }

    /// Submit pending SQEs and block until at least `want` completions
    /// arrive. Transparently retries an interrupted wait.
    pub fn submit_and_wait(&self, want: usize) -> Result<(), Error> {
        loop {
            match self.ring.submitter().submit_and_wait(want) {
                Ok(_) => return Ok(()),
                Err(e) if e.raw_os_error() == Some(libc::EINTR) => continue,
                Err(e) => return Err(Error::Io(e)),
            }
        }
    }

    /// Drain up to `max` completions into `out` as `(user_data, result,
    /// flags)` tuples, advancing the completion queue past them.
    pub fn peek_batch(&mut self, out: &mut Vec<(u64, i32, u32)>, max: usize) -> usize {
        out.clear();
        let cq = self.ring.completion();
        for cqe in cq.take(max) {
            out.push((cqe.user_data(), cqe.result(), cqe.flags()));
        }
        out.len()
    }

    /// Push an SQE to the submission queue. If the queue is full, flush
    /// pending submissions synchronously and retry once; a second failure is
    /// surfaced so the caller can release the tagged resource.
    ///
    /// # Safety
    /// The SQE must reference memory that stays valid for the lifetime of
    /// the operation.
    unsafe fn push_sqe(&mut self, entry: io_uring::squeue::Entry) -> Result<(), Error> {
        unsafe {
            if self.ring.submission().push(&entry).is_err() {
                self.ring.submit().map_err(Error::Io)?;
                self.ring
                    .submission()
                    .push(&entry)
                    .map_err(|_| Error::SubmissionQueueFull)?;
            }
        }
        Ok(())
    }
}

//! Dedicated accept reactor.
//!
//! Runs on its own thread with its own small ring: one multishot accept on
//! the listening socket. Each accepted fd is placed into the least-loaded
//! room under the room-table lock, then handed to the worker that owns that
//! room over the worker's channel; an eventfd write wakes the worker so it
//! arms the first read before any client input can be processed.

use std::os::fd::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_channel::Sender;
use io_core::{OpKind, Ring, UserData, ACCEPT_CQE_BATCH_SIZE, ACCEPT_SQ_ENTRIES};
use io_uring::cqueue;
use tracing::{debug, error, info, warn};

use crate::metrics;
use crate::rooms::RoomTable;

pub struct AcceptorConfig {
    pub listen_fd: RawFd,
    pub rooms: Arc<RoomTable>,
    /// One channel per worker; index = worker id = room id.
    pub worker_txs: Vec<Sender<RawFd>>,
    pub worker_eventfds: Vec<RawFd>,
    pub stop: Arc<AtomicBool>,
    /// The acceptor's own eventfd, written on shutdown to unblock the wait.
    pub wakeup_fd: RawFd,
}

pub fn run_acceptor(config: AcceptorConfig) -> Result<(), io_core::Error> {
    let mut ring = Ring::setup(ACCEPT_SQ_ENTRIES)?;
    let mut wakeup_buf = [0u8; 8];

    ring.prepare_wakeup_read(config.wakeup_fd, wakeup_buf.as_mut_ptr())?;
    ring.prepare_accept(config.listen_fd)?;
    info!(listen_fd = config.listen_fd, "accept reactor running");

    let mut batch = Vec::with_capacity(ACCEPT_CQE_BATCH_SIZE);

    loop {
        let mut n = ring.peek_batch(&mut batch, ACCEPT_CQE_BATCH_SIZE);
        if n == 0 {
            ring.submit_and_wait(1)?;
            n = ring.peek_batch(&mut batch, ACCEPT_CQE_BATCH_SIZE);
        }

        for i in 0..n {
            let (ud_raw, res, flags) = batch[i];
            let ud = UserData(ud_raw);
            match ud.kind() {
                Some(OpKind::Accept) => {
                    if res < 0 {
                        error!(err = -res, "accept failed");
                    } else {
                        place_client(&config, res);
                    }
                    // Multishot auto-rearm is trusted while MORE is set.
                    if !cqueue::more(flags) {
                        ring.prepare_accept(config.listen_fd)?;
                    }
                }
                Some(OpKind::Read) => {
                    // Shutdown wakeup; nothing to drain here.
                    if !config.stop.load(Ordering::Relaxed) {
                        ring.prepare_wakeup_read(config.wakeup_fd, wakeup_buf.as_mut_ptr())?;
                    }
                }
                _ => warn!(user_data = ud_raw, "unexpected completion on accept reactor"),
            }
        }

        if config.stop.load(Ordering::Relaxed) {
            info!("accept reactor stopping");
            unsafe {
                libc::close(config.wakeup_fd);
            }
            return Ok(());
        }
    }
}

/// Assign a freshly accepted fd to a room and hand it to the owning worker.
fn place_client(config: &AcceptorConfig, fd: RawFd) {
    let Some(room_id) = config.rooms.next_available_room() else {
        warn!(fd, "no rooms available, dropping connection");
        unsafe {
            libc::close(fd);
        }
        return;
    };

    if let Err(e) = config.rooms.join(fd, room_id) {
        error!(fd, room_id, error = %e, "failed to place client");
        unsafe {
            libc::close(fd);
        }
        return;
    }

    // Room ids are worker indices by construction.
    let worker = room_id as usize;
    if config.worker_txs[worker].send(fd).is_err() {
        warn!(fd, worker, "worker channel closed, dropping connection");
        config.rooms.leave(fd);
        unsafe {
            libc::close(fd);
        }
        return;
    }

    let wake: u64 = 1;
    unsafe {
        libc::write(
            config.worker_eventfds[worker],
            &wake as *const u64 as *const libc::c_void,
            8,
        );
    }

    metrics::CONNECTIONS_ACCEPTED.increment();
    debug!(fd, room_id, worker, "client accepted");
}

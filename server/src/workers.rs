//! Worker pool startup and shutdown.
//!
//! One worker reactor thread per room plus a dedicated accept reactor
//! thread. Each worker builds its ring and buffer pool on its own thread
//! (single-issuer discipline) and owns the room whose id equals its index.

use std::os::fd::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use io_core::EventLoop;
use tracing::info;

use crate::acceptor::{run_acceptor, AcceptorConfig};
use crate::broker::Broker;
use crate::config::Config;
use crate::error::ServerError;
use crate::rooms::RoomTable;

type WorkerResult = Result<(), io_core::Error>;
type LaunchResult = Result<(ShutdownHandle, Vec<thread::JoinHandle<WorkerResult>>), ServerError>;

/// Handle returned by [`launch`] to trigger graceful shutdown.
pub struct ShutdownHandle {
    stop: Arc<AtomicBool>,
    eventfds: Vec<RawFd>,
}

impl ShutdownHandle {
    /// Signal the acceptor and all workers to shut down. Each reactor
    /// observes the flag between completion batches; the eventfd writes
    /// unblock any reactor parked in its wait.
    pub fn shutdown(&self) {
        self.stop.store(true, Ordering::Release);
        for &efd in &self.eventfds {
            let wake: u64 = 1;
            unsafe {
                libc::write(efd, &wake as *const u64 as *const libc::c_void, 8);
            }
        }
    }
}

/// Number of worker reactors: configured value, or one per core with one
/// core left for the accept reactor.
pub fn worker_count(config: &Config) -> usize {
    if config.workers.threads > 0 {
        return config.workers.threads;
    }
    let cores = thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(2);
    cores.saturating_sub(1).max(1)
}

/// Launch the accept reactor and worker threads for `listen_fd`.
pub fn launch(config: &Config, listen_fd: RawFd) -> LaunchResult {
    let workers = worker_count(config);
    let rooms = Arc::new(RoomTable::with_rooms(workers));
    let stop = Arc::new(AtomicBool::new(false));

    let mut worker_txs = Vec::with_capacity(workers);
    let mut worker_rxs = Vec::with_capacity(workers);
    let mut eventfds = Vec::with_capacity(workers + 1);

    for _ in 0..workers + 1 {
        let efd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
        if efd < 0 {
            let err = std::io::Error::last_os_error();
            for &fd in &eventfds {
                unsafe {
                    libc::close(fd);
                }
            }
            return Err(ServerError::Io(err));
        }
        eventfds.push(efd);
    }

    for _ in 0..workers {
        let (tx, rx) = crossbeam_channel::unbounded::<RawFd>();
        worker_txs.push(tx);
        worker_rxs.push(rx);
    }

    let acceptor_eventfd = eventfds[workers];

    let mut handles = Vec::with_capacity(workers + 1);

    let acceptor_config = AcceptorConfig {
        listen_fd,
        rooms: rooms.clone(),
        worker_txs,
        worker_eventfds: eventfds[..workers].to_vec(),
        stop: stop.clone(),
        wakeup_fd: acceptor_eventfd,
    };
    handles.push(
        thread::Builder::new()
            .name("acceptor".to_string())
            .spawn(move || run_acceptor(acceptor_config))
            .map_err(ServerError::Io)?,
    );

    for worker_id in 0..workers {
        let rx = worker_rxs.remove(0);
        let eventfd = eventfds[worker_id];
        let stop = stop.clone();
        let rooms = rooms.clone();

        handles.push(
            thread::Builder::new()
                .name(format!("worker-{worker_id}"))
                .spawn(move || {
                    let broker = Broker::new(worker_id, rooms);
                    let mut event_loop =
                        EventLoop::new(broker, rx, eventfd, stop, protocol_chat::FRAME_SIZE)?;
                    event_loop.run()
                })
                .map_err(ServerError::Io)?,
        );
    }

    info!(workers, "launched worker pool");

    Ok((ShutdownHandle { stop, eventfds }, handles))
}

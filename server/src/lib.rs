//! Multi-threaded TCP chat broker.
//!
//! Clients send fixed 515-byte frames to join a room, leave, or chat; every
//! chat is fanned out to the other members of the sender's room. A dedicated
//! accept reactor distributes new connections across per-core worker
//! reactors, each of which owns one pre-allocated room and one
//! kernel-registered receive buffer pool.

pub mod acceptor;
pub mod broker;
pub mod config;
pub mod error;
pub mod listener;
pub mod logging;
pub mod metrics;
pub mod rooms;
pub mod workers;

pub use config::Config;
pub use error::ServerError;
pub use rooms::RoomTable;
pub use workers::{launch, ShutdownHandle};

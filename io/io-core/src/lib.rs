pub mod buffer_pool;
pub mod completion;
pub mod error;
pub mod event_loop;
pub mod handler;
pub mod ring;
pub mod slots;

// Public API re-exports
pub use buffer_pool::{BufferPool, BUFFER_GROUP};
pub use completion::{OpKind, UserData};
pub use error::Error;
pub use event_loop::EventLoop;
pub use handler::{DriverCtx, EventHandler};
pub use ring::{Ring, ACCEPT_CQE_BATCH_SIZE, ACCEPT_SQ_ENTRIES, CQE_BATCH_SIZE, SQ_ENTRIES};
pub use slots::{ReleaseOutcome, BUF_COUNT, BUF_SIZE};

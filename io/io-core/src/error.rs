use std::fmt;
use std::io;

/// Errors returned by the reactor core.
#[derive(Debug)]
pub enum Error {
    /// io_uring setup or operation failed.
    Io(io::Error),
    /// Ring setup failed (e.g., unsupported kernel features).
    RingSetup(String),
    /// Provided-buffer ring registration failed.
    BufferRegistration(String),
    /// Submission queue still full after a synchronous flush.
    SubmissionQueueFull,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {e}"),
            Error::RingSetup(msg) => write!(f, "ring setup: {msg}"),
            Error::BufferRegistration(msg) => write!(f, "buffer registration: {msg}"),
            Error::SubmissionQueueFull => write!(f, "submission queue full after flush"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

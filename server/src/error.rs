/// Errors surfaced during broker startup and shutdown.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Setup(String),
    #[error(transparent)]
    Core(#[from] io_core::Error),
    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),
}

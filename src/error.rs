use thiserror::Error;

#[derive(Debug, Error)]
pub enum FramewatchError {
    #[error("config error: {0}")]
    ConfigError(String),

    #[error("alert sink closed")]
    SinkClosed,

    #[error("worker pool not running")]
    NotRunning,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, FramewatchError>;

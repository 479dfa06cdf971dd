use thiserror::Error;

use crate::channel::ChannelError;

/// Failures surfaced to whoever drives a component's lifecycle.
///
/// Send and receive timeouts never end up here; they are handled where they
/// happen. Everything else is fatal for the affected worker.
#[derive(Debug, Error)]
pub enum FlowError {
    #[error("{0} is already running")]
    AlreadyRunning(String),

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("unknown command '{0}'")]
    UnknownCommand(String),

    #[error("worker task panicked: {0}")]
    WorkerPanicked(String),
}

pub type Result<T> = std::result::Result<T, FlowError>;

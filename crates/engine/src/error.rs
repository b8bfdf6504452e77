use ordersync_core::CoreError;
use ordersync_storage::StorageError;
use thiserror::Error;

use crate::remote::RemoteError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("core error: {0}")]
    Core(#[from] CoreError),

    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("flush rejected: sent changes for {expected} orders, remote returned {received}")]
    FlushMismatch { expected: usize, received: usize },

    #[error("order not found: {0}")]
    OrderNotFound(String),

    #[error("blocking task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("invalid configuration: {0}")]
    Config(String),
}

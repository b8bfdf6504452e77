use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("order not found: {0}")]
    OrderNotFound(String),

    #[error("core error: {0}")]
    Core(#[from] ordersync_core::CoreError),
}

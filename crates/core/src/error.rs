use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("unknown order field: {0}")]
    UnknownField(String),

    #[error("invalid value for {field}: {reason}")]
    InvalidChangeValue { field: String, reason: String },
}

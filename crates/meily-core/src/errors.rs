/// Core error type shared by every crate in the workspace.
///
/// Adapter crates map their native errors (teloxide, sqlx, child processes) into this
/// type so the conversation machine can decide between a retry prompt and a log line.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("external error: {0}")]
    External(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("operation cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, Error>;

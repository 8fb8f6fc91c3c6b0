use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Invalid partition name: {0:?}")]
    InvalidName(String),

    #[error("Cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize cache data: {0}")]
    Serialize(#[from] serde_json::Error),
}

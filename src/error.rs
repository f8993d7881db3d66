use thiserror::Error;

#[derive(Error, Debug)]
pub enum FarmError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    #[error("Unknown request type: {0}")]
    UnknownRequest(String),

    #[error("Unexpected response from coordinator: {0}")]
    UnexpectedResponse(String),

    #[error("Failed to spawn task: {0}")]
    Spawn(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, FarmError>;

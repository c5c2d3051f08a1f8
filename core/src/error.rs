/// Error types for the chat client
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChatError {
    /// Missing or blank user input; the action was not attempted
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Transport error: {0}")]
    Transport(String),

    /// Screenshot rasterization or upload failure
    #[error("Capture error: {0}")]
    SideChannel(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ChatError {
    /// Validation failures are the only errors shown to the user before an action proceeds
    pub fn is_validation(&self) -> bool {
        matches!(self, ChatError::Validation(_))
    }
}

pub type Result<T> = std::result::Result<T, ChatError>;

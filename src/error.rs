use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("unexpected status {status} from {url}")]
    Status {
        status: u16,
        url: String,
    },

    #[error("stream interrupted: {0}")]
    Stream(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("message is empty")]
    EmptyMessage,

    #[error("a reply is already in progress")]
    TurnInProgress,
}

pub type Result<T> = std::result::Result<T, SessionError>;

use tk_protocol::ProtocolError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("invalid user: {0}")]
    User(String),
    #[error("HTTP: {0}")]
    Http(#[from] reqwest::Error),
    #[error("I/O: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("flag payload: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("persistence hook rejected blob {0:?}")]
    Persistence(String),
}

pub type Result<T> = std::result::Result<T, Error>;

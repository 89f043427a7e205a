use thiserror::Error;

pub type ChatResult<T> = Result<T, ChatError>;

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("broker error: {0}")]
    Stomp(String),

    #[error("malformed frame: {0}")]
    Parse(String),

    #[error("failed to load history: {0}")]
    HistoryFetch(String),

    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("not connected to broker")]
    NotConnected,

    #[error("message content is empty")]
    EmptyMessage,

    #[error("no conversation is open")]
    NoConversation,

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl From<serde_json::Error> for ChatError {
    fn from(err: serde_json::Error) -> Self {
        ChatError::Parse(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ChatError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        ChatError::Transport(err.to_string())
    }
}

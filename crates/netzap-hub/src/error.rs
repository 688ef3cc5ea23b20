use thiserror::Error;

/// Failure reported by a [`crate::Transport`] call.
#[derive(Error, Debug, Clone)]
#[error("{0}")]
pub struct TransportError(pub String);

impl TransportError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

#[derive(Error, Debug)]
pub enum HubError {
    /// Transport connect or send failed.
    #[error("connection error: {0}")]
    Connection(#[from] TransportError),

    /// The operation needs a ready session.
    #[error("chat session is not connected")]
    NotConnected,

    #[error("storage error: {0}")]
    Storage(#[source] anyhow::Error),

    #[error("media unavailable: {0}")]
    MediaUnavailable(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    Validation(String),
}

pub type Result<T> = std::result::Result<T, HubError>;

use thiserror::Error;

/// Everything here is recoverable: the caller retries by re-invoking the
/// failed operation (resend the message, reopen the chat to re-fetch
/// history, reconnect the relay).
#[derive(Debug, Error)]
pub enum ClientError {
    /// The Identify/Ready exchange with the relay did not complete.
    #[error("relay handshake failed: {0}")]
    Handshake(String),

    /// The relay connection is gone. No automatic reconnect is attempted;
    /// live delivery stops until a new connection is established.
    #[error("relay connection lost")]
    ConnectionLost,

    /// History could not be loaded from the data service.
    #[error("failed to load history: {0}")]
    Fetch(#[source] reqwest::Error),

    /// The message failed to persist after it was already shown
    /// optimistically. The optimistic entry stays visible.
    #[error("message was not persisted: {0}")]
    SendRejected(#[source] reqwest::Error),
}

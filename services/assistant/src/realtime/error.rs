use crate::bootstrap::BootstrapError;
use realtime_rtc::ConnectionError;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("Could not start an assistant session: {0}")]
    Bootstrap(String),
    #[error("The assistant backend did not provide a session credential.")]
    MissingCredential,
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error("Connection timed out. Please try again.")]
    Timeout,
    #[error("The assistant is not connected.")]
    NotConnected,
    #[error("Message text is empty.")]
    EmptyMessage,
    #[error("The assistant session has shut down.")]
    Stopped,
}

impl SessionError {
    /// Whether a failed connect attempt should be retried automatically.
    pub fn is_retryable(&self) -> bool {
        match self {
            SessionError::Connection(e) => e.is_retryable(),
            SessionError::Bootstrap(_) | SessionError::MissingCredential | SessionError::Timeout => {
                true
            }
            SessionError::NotConnected | SessionError::EmptyMessage | SessionError::Stopped => false,
        }
    }
}

impl From<BootstrapError> for SessionError {
    fn from(err: BootstrapError) -> Self {
        match err {
            BootstrapError::Timeout => SessionError::Timeout,
            BootstrapError::MissingCredential => SessionError::MissingCredential,
            other => SessionError::Bootstrap(other.to_string()),
        }
    }
}

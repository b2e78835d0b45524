/// Failures raised while opening or operating a realtime connection.
///
/// The `Display` text of each variant is written for the person using the
/// assistant, so callers can surface it as-is.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("Microphone access was denied. Allow microphone access and try again.")]
    PermissionDenied,
    #[error("No microphone was found. Connect a microphone and try again.")]
    DeviceNotFound,
    #[error("The microphone is in use by another application. Close it and try again.")]
    DeviceBusy,
    #[error("Connection timed out while {0}. Please try again.")]
    Timeout(String),
    #[error("Could not negotiate the voice session: {0}")]
    Signaling(String),
    #[error("Could not establish the voice connection: {0}")]
    Transport(String),
    #[error("The assistant channel failed: {0}")]
    Channel(String),
}

impl ConnectionError {
    /// Device problems need the user to act; everything else may clear up on
    /// its own and is worth another attempt.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            ConnectionError::PermissionDenied
                | ConnectionError::DeviceNotFound
                | ConnectionError::DeviceBusy
        )
    }

    pub fn timeout(stage: impl Into<String>) -> Self {
        ConnectionError::Timeout(stage.into())
    }
}

impl From<webrtc::Error> for ConnectionError {
    fn from(err: webrtc::Error) -> Self {
        ConnectionError::Transport(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_errors_are_not_retryable() {
        assert!(!ConnectionError::PermissionDenied.is_retryable());
        assert!(!ConnectionError::DeviceNotFound.is_retryable());
        assert!(!ConnectionError::DeviceBusy.is_retryable());
        assert!(ConnectionError::timeout("gathering ICE candidates").is_retryable());
        assert!(ConnectionError::Signaling("502".into()).is_retryable());
    }

    #[test]
    fn test_timeout_display() {
        assert_eq!(
            ConnectionError::timeout("waiting for the SDP answer").to_string(),
            "Connection timed out while waiting for the SDP answer. Please try again."
        );
    }
}

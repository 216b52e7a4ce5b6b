use thiserror::Error;

/// Errors that can occur when working with Forma cable trainers
#[derive(Error, Debug)]
pub enum LiftError {
    /// Bluetooth Low Energy related errors
    #[error("BLE error: {0}")]
    Ble(#[from] btleplug::Error),

    /// No trainer found during scanning
    #[error("trainer not found")]
    DeviceNotFound,

    /// Device connection failed
    #[error("failed to connect to trainer: {0}")]
    ConnectionFailed(String),

    /// The link dropped while a session depended on it
    #[error("connection lost")]
    LinkLost,

    /// Scan, connect, or read exceeded its bound
    #[error("operation timed out after {timeout_ms}ms")]
    Timeout {
        /// Timeout duration in milliseconds
        timeout_ms: u64,
    },

    /// Malformed or truncated incoming frame
    #[error("failed to decode frame: {0}")]
    Decode(String),

    /// Command input outside the valid range
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// Requested value exceeds a documented hardware ceiling
    #[error("{what} {requested} exceeds hardware limit {limit}")]
    OutOfHardwareRange {
        /// Which quantity was out of range
        what: &'static str,
        /// The requested value
        requested: u16,
        /// The hardware ceiling
        limit: u16,
    },

    /// Command issued before link negotiation completed
    #[error("trainer not ready: {reason}")]
    NotReady {
        /// Reason why the trainer is not ready
        reason: String,
    },

    /// Workout lifecycle violation
    #[error("invalid workout state: {state}")]
    InvalidState {
        /// Current invalid state description
        state: String,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Other errors
    #[error("other error: {0}")]
    Other(String),
}

/// Result type for trainer operations
pub type Result<T> = std::result::Result<T, LiftError>;

impl LiftError {
    /// Check if this error indicates a connection issue
    #[must_use]
    pub const fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Ble(_) | Self::ConnectionFailed(_) | Self::LinkLost | Self::DeviceNotFound
        )
    }

    /// Check if this error is recoverable by retrying or fixing input
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. }
                | Self::NotReady { .. }
                | Self::InvalidParameter(_)
                | Self::OutOfHardwareRange { .. }
        )
    }

    /// Check if this error ends an active session
    ///
    /// Decode errors are expected radio noise and never terminal on their
    /// own; link loss always is.
    #[must_use]
    pub const fn is_terminal_for_session(&self) -> bool {
        matches!(self, Self::LinkLost | Self::Ble(_) | Self::ConnectionFailed(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let connection_error = LiftError::ConnectionFailed("test".to_string());
        assert!(connection_error.is_connection_error());
        assert!(!connection_error.is_recoverable());
        assert!(connection_error.is_terminal_for_session());

        let timeout_error = LiftError::Timeout { timeout_ms: 5000 };
        assert!(!timeout_error.is_connection_error());
        assert!(timeout_error.is_recoverable());
        assert!(!timeout_error.is_terminal_for_session());

        let decode_error = LiftError::Decode("short frame".to_string());
        assert!(!decode_error.is_connection_error());
        assert!(!decode_error.is_terminal_for_session());

        let link_lost = LiftError::LinkLost;
        assert!(link_lost.is_connection_error());
        assert!(link_lost.is_terminal_for_session());
    }

    #[test]
    fn test_error_display() {
        let error = LiftError::InvalidParameter("weight out of range".to_string());
        let error_string = format!("{error}");
        assert!(error_string.contains("invalid parameter"));
        assert!(error_string.contains("weight out of range"));

        let error = LiftError::OutOfHardwareRange {
            what: "eccentric load",
            requested: 180,
            limit: 150,
        };
        let error_string = format!("{error}");
        assert!(error_string.contains("180"));
        assert!(error_string.contains("150"));
    }
}

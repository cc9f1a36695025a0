use thiserror::Error;

/// Category of a failed provisioning attempt
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidInput,
    AttemptInProgress,
    SessionCreateFailed,
    ConnectTimedOut,
    ConnectFailed,
    ConfigSendFailed,
    ConfigSendTimedOut,
    Interrupted,
}

/// Terminal failure of a provisioning attempt
///
/// Every variant ends the attempt. Nothing is retried inside this crate.
#[derive(Debug, Error)]
pub enum ProvisioningError {
    #[error("invalid provisioning input: {0}")]
    InvalidInput(String),
    #[error("a provisioning attempt is already in progress")]
    AttemptInProgress,
    #[error("failed to create provisioning session: {0}")]
    SessionCreateFailed(String),
    #[error("timed out connecting to device access point")]
    ConnectTimedOut,
    #[error("failed to connect to device access point: {0}")]
    ConnectFailed(String),
    #[error("failed to send configuration to device: {0}")]
    ConfigSendFailed(String),
    #[error("timed out sending configuration to device")]
    ConfigSendTimedOut,
    #[error("provisioning attempt was interrupted")]
    Interrupted,
}

impl ProvisioningError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidInput(_) => ErrorKind::InvalidInput,
            Self::AttemptInProgress => ErrorKind::AttemptInProgress,
            Self::SessionCreateFailed(_) => ErrorKind::SessionCreateFailed,
            Self::ConnectTimedOut => ErrorKind::ConnectTimedOut,
            Self::ConnectFailed(_) => ErrorKind::ConnectFailed,
            Self::ConfigSendFailed(_) => ErrorKind::ConfigSendFailed,
            Self::ConfigSendTimedOut => ErrorKind::ConfigSendTimedOut,
            Self::Interrupted => ErrorKind::Interrupted,
        }
    }

    /// Whether the failure happened while talking to the device itself
    ///
    /// A send timeout is reported to users the same way as any other send failure.
    pub fn is_config_send_failure(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::ConfigSendFailed | ErrorKind::ConfigSendTimedOut
        )
    }
}

//! Bridge error taxonomy

use shellgate_protocol::ProtocolError;
use shellgate_utils::ShellgateError;

/// Why a bridge stopped or refused a request
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// Admission denied; no session resources were created
    #[error("Capacity exceeded on transport '{transport}' (max {max})")]
    CapacityExceeded { transport: String, max: i64 },

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The channel closed or failed
    #[error("Connection error: {0}")]
    Connection(String),

    /// Admission refused for a reason other than capacity
    #[error("Admission failed: {0}")]
    Admission(#[source] ShellgateError),

    /// The Command Session could not be created or driven
    #[error("Session error: {0}")]
    Session(#[source] ShellgateError),

    /// Teardown could not release everything; the bridge still closed
    #[error("Cleanup failed: {0}")]
    ResourceCleanup(String),
}

impl BridgeError {
    pub fn connection(msg: impl Into<String>) -> Self {
        BridgeError::Connection(msg.into())
    }

    /// Whether the peer is gone, so reporting the error to it is pointless
    pub fn is_disconnect(&self) -> bool {
        matches!(self, BridgeError::Connection(_))
    }

    /// Whether the error should be reported back to the client
    pub fn is_client_facing(&self) -> bool {
        matches!(
            self,
            BridgeError::CapacityExceeded { .. }
                | BridgeError::Protocol(_)
                | BridgeError::Admission(_)
                | BridgeError::Session(_)
        )
    }
}

impl From<ShellgateError> for BridgeError {
    fn from(err: ShellgateError) -> Self {
        match err {
            ShellgateError::CapacityExceeded { transport, max } => {
                BridgeError::CapacityExceeded { transport, max }
            }
            ShellgateError::ResourceCleanup(msg) => BridgeError::ResourceCleanup(msg),
            e if e.is_disconnect() => BridgeError::Connection(e.to_string()),
            e => BridgeError::Admission(e),
        }
    }
}

//! §7 error handling design: one error kind per documented failure mode,
//! each with a fixed synthetic message where the spec names one verbatim.

use thiserror::Error;

use crate::protocol::mysql::error_codes::ErrorKind as MysqlErrorCode;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("malformed handshake from backend server")]
    MalformedHandshake,
    #[error("authenticator failed to extract credentials")]
    AuthExtractFailed,
    #[error("Authentication with backend failed. Session will be closed.")]
    AuthFailed,
    #[error("Authentication with backend failed. Session will be closed.")]
    HandshakeFailed,
    #[error("Authentication with backend failed. Session will be closed.")]
    HostBlocked,
    #[error("Authentication with backend failed. Session will be closed.")]
    AccessDenied(MysqlErrorCode),
    #[error("Lost connection to backend server.")]
    ReadFailed,
    #[error("Lost connection to backend server.")]
    Hangup,
    #[error("Lost connection to backend server.")]
    SocketError,
    #[error("Writing to backend failed due invalid MaxScale state.")]
    UnwritableWhileBuffered,
    #[error("unexpected reply while resetting pooled connection")]
    PostPoolResetFailed,
    #[error("unexpected byte in ignore-reply stream")]
    Protocol,
}

impl EngineError {
    /// Every failed-auth path (§4.2/§7) collapses to this outcome: router
    /// notified with `REPLY_CLIENT`, session marked stopping.
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            EngineError::MalformedHandshake
                | EngineError::AuthExtractFailed
                | EngineError::AuthFailed
                | EngineError::HandshakeFailed
                | EngineError::HostBlocked
                | EngineError::AccessDenied(_)
        )
    }

    /// Paths surfaced via `handleError/NEW_CONNECTION` instead of
    /// `REPLY_CLIENT`.
    pub fn is_connection_loss(&self) -> bool {
        matches!(
            self,
            EngineError::ReadFailed | EngineError::Hangup | EngineError::SocketError
        )
    }

    pub fn to_err_packet(&self, seq: u8) -> Vec<u8> {
        use crate::protocol::mysql::packet::writers::build_err_packet;
        let kind = match self {
            EngineError::HostBlocked => MysqlErrorCode::HostIsBlocked,
            EngineError::AccessDenied(k) => *k,
            _ => MysqlErrorCode::Other(2013),
        };
        build_err_packet(seq, kind, &self.to_string())
    }
}

//! §4.2 Auth driver: a finite state machine whose alphabet is (reactor
//! event, inbound packet classification).

use std::sync::Arc;

use tracing::{debug, warn};

use crate::auth::{AuthenticateResult, Authenticator, ExtractResult};
use crate::error::EngineError;
use crate::protocol::mysql::error_codes::ErrorKind as MysqlErrorKind;
use crate::protocol::mysql::handshake::decode_server_handshake;
use crate::protocol::mysql::packet::Packet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Init,
    PendingConnect,
    Connected,
    ResponseSent,
    Complete,
    Failed,
    HandshakeFailed,
}

impl AuthState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AuthState::Complete | AuthState::Failed | AuthState::HandshakeFailed
        )
    }
}

/// Outcome of feeding one event through the driver; callers use this to
/// decide what else must happen (drain the delay queue, notify the router).
pub enum DriverOutcome {
    Advanced(AuthState),
    AuthFailed(AuthState, EngineError),
}

pub struct AuthDriver {
    pub state: AuthState,
    authenticator: Arc<dyn Authenticator>,
    pending_response: Option<Vec<u8>>,
    server_scramble: Option<[u8; 20]>,
}

impl AuthDriver {
    pub fn new(authenticator: Arc<dyn Authenticator>) -> Self {
        Self {
            state: AuthState::Init,
            authenticator,
            pending_response: None,
            server_scramble: None,
        }
    }

    /// Bytes the caller must write to the backend socket after an
    /// `on_readable` call advances the state to `ResponseSent`.
    pub fn take_pending_response(&mut self) -> Option<Vec<u8>> {
        self.pending_response.take()
    }

    /// The server's 20-byte scramble decoded from the initial handshake,
    /// needed later to build a synthetic `COM_CHANGE_USER` on pool reuse.
    pub fn take_server_scramble(&mut self) -> Option<[u8; 20]> {
        self.server_scramble.take()
    }

    pub fn authenticator(&self) -> &Arc<dyn Authenticator> {
        &self.authenticator
    }

    /// Transition 1: non-blocking connect either finished immediately
    /// (`Connected`) or is still in progress (`PendingConnect`).
    pub fn on_connect_started(&mut self, in_progress: bool) {
        self.state = if in_progress {
            AuthState::PendingConnect
        } else {
            AuthState::Connected
        };
    }

    /// Transition: `writable` while `PendingConnect`.
    pub fn on_writable(&mut self) -> DriverOutcome {
        if self.state == AuthState::PendingConnect {
            self.state = AuthState::Connected;
        }
        DriverOutcome::Advanced(self.state)
    }

    /// Transition 2/3/4: `readable`. `packet` is the first complete packet
    /// read off the wire for this event.
    pub async fn on_readable(
        &mut self,
        packet: &Packet,
        user: &str,
        password_sha1: Option<&[u8]>,
        db: Option<&str>,
    ) -> DriverOutcome {
        match self.state {
            AuthState::Connected => {
                if packet.is_err() {
                    return self.fail_from_connected(packet);
                }
                match decode_server_handshake(&packet.payload) {
                    Ok(handshake) => {
                        self.server_scramble = Some(handshake.scramble);
                        match self
                            .authenticator
                            .send_credentials(&handshake, user, password_sha1, db)
                            .await
                        {
                            Ok(response) => {
                                self.pending_response = Some(response);
                                self.state = AuthState::ResponseSent;
                                DriverOutcome::Advanced(self.state)
                            }
                            Err(e) => {
                                warn!("failed to send backend credentials: {e}");
                                self.state = AuthState::HandshakeFailed;
                                DriverOutcome::AuthFailed(self.state, EngineError::HandshakeFailed)
                            }
                        }
                    }
                    Err(_) => {
                        self.state = AuthState::HandshakeFailed;
                        DriverOutcome::AuthFailed(self.state, EngineError::MalformedHandshake)
                    }
                }
            }
            AuthState::ResponseSent => {
                if packet.is_err() {
                    return self.fail_from_response_sent(packet);
                }
                match self.authenticator.extract(&packet.payload) {
                    ExtractResult::Incomplete => DriverOutcome::Advanced(self.state),
                    ExtractResult::Succeeded => {
                        match self.authenticator.authenticate(&packet.payload).await {
                            AuthenticateResult::Succeeded => {
                                self.state = AuthState::Complete;
                                debug!("backend auth complete");
                                DriverOutcome::Advanced(self.state)
                            }
                            AuthenticateResult::Incomplete
                            | AuthenticateResult::SslIncomplete => {
                                DriverOutcome::Advanced(self.state)
                            }
                            AuthenticateResult::Failed => {
                                self.state = AuthState::Failed;
                                DriverOutcome::AuthFailed(self.state, EngineError::AuthFailed)
                            }
                        }
                    }
                }
            }
            other => DriverOutcome::Advanced(other),
        }
    }

    fn fail_from_connected(&mut self, err_packet: &Packet) -> DriverOutcome {
        self.state = AuthState::HandshakeFailed;
        DriverOutcome::AuthFailed(self.state, self.classify_err(err_packet))
    }

    fn fail_from_response_sent(&mut self, err_packet: &Packet) -> DriverOutcome {
        self.state = AuthState::Failed;
        DriverOutcome::AuthFailed(self.state, self.classify_err(err_packet))
    }

    /// §4.2 transition 4 / §7: classify the ERR code carried by the packet
    /// into the specific auth-failure kind so the caller can apply
    /// host-blocked / access-denied side effects.
    fn classify_err(&self, packet: &Packet) -> EngineError {
        let code = packet
            .payload
            .get(1..3)
            .map(|b| u16::from_le_bytes([b[0], b[1]]))
            .unwrap_or(0);
        match MysqlErrorKind::from_code(code) {
            MysqlErrorKind::HostIsBlocked => EngineError::HostBlocked,
            k if k.is_access_denied_family() => EngineError::AccessDenied(k),
            _ => EngineError::AuthFailed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::mysql::handshake::ServerHandshake;
    use async_trait::async_trait;

    struct StubAuthenticator {
        auth_result: AuthenticateResult,
    }

    #[async_trait]
    impl Authenticator for StubAuthenticator {
        async fn send_credentials(
            &self,
            _handshake: &ServerHandshake,
            _user: &str,
            _password_sha1: Option<&[u8]>,
            _db: Option<&str>,
        ) -> std::io::Result<Vec<u8>> {
            Ok(vec![])
        }

        fn extract(&self, _buffer: &[u8]) -> ExtractResult {
            ExtractResult::Succeeded
        }

        async fn authenticate(&self, _buffer: &[u8]) -> AuthenticateResult {
            self.auth_result
        }
    }

    fn handshake_packet() -> Packet {
        let mut payload = vec![10u8];
        payload.extend_from_slice(b"8.0\0");
        payload.extend_from_slice(&1u32.to_le_bytes());
        payload.extend_from_slice(&[0u8; 8]);
        payload.push(0);
        payload.extend_from_slice(&0u16.to_le_bytes());
        payload.push(45);
        payload.extend_from_slice(&2u16.to_le_bytes());
        payload.extend_from_slice(&0u16.to_le_bytes());
        payload.push(21);
        payload.extend_from_slice(&[0u8; 10]);
        payload.extend_from_slice(&[0u8; 12]);
        payload.push(0);
        Packet::new(0, payload)
    }

    #[tokio::test]
    async fn happy_path_reaches_complete() {
        let authenticator = Arc::new(StubAuthenticator {
            auth_result: AuthenticateResult::Succeeded,
        });
        let mut driver = AuthDriver::new(authenticator);
        driver.on_connect_started(false);
        assert_eq!(driver.state, AuthState::Connected);

        driver
            .on_readable(&handshake_packet(), "u", Some(&[0u8; 20]), Some("d"))
            .await;
        assert_eq!(driver.state, AuthState::ResponseSent);

        let ok_packet = Packet::new(2, vec![0x00, 0, 0]);
        driver
            .on_readable(&ok_packet, "u", Some(&[0u8; 20]), Some("d"))
            .await;
        assert_eq!(driver.state, AuthState::Complete);
    }

    #[tokio::test]
    async fn host_blocked_error_classified() {
        let authenticator = Arc::new(StubAuthenticator {
            auth_result: AuthenticateResult::Failed,
        });
        let mut driver = AuthDriver::new(authenticator);
        driver.state = AuthState::Connected;

        let mut err_payload = vec![0xffu8];
        err_payload.extend_from_slice(&1129u16.to_le_bytes());
        let err_packet = Packet::new(0, err_payload);

        let outcome = driver
            .on_readable(&err_packet, "u", Some(&[0u8; 20]), Some("d"))
            .await;
        assert_eq!(driver.state, AuthState::HandshakeFailed);
        match outcome {
            DriverOutcome::AuthFailed(_, EngineError::HostBlocked) => {}
            _ => panic!("expected HostBlocked"),
        }
    }

    #[tokio::test]
    async fn pending_connect_advances_on_writable() {
        let authenticator = Arc::new(StubAuthenticator {
            auth_result: AuthenticateResult::Succeeded,
        });
        let mut driver = AuthDriver::new(authenticator);
        driver.on_connect_started(true);
        assert_eq!(driver.state, AuthState::PendingConnect);
        driver.on_writable();
        assert_eq!(driver.state, AuthState::Connected);
    }
}

pub mod driver;
pub mod native_password;
pub mod scramble;

use async_trait::async_trait;

use crate::protocol::mysql::handshake::ServerHandshake;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractResult {
    Succeeded,
    Incomplete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthenticateResult {
    Succeeded,
    Incomplete,
    SslIncomplete,
    Failed,
}

/// Outcome of §4.6 reauthentication. Unlike the initial handshake, the
/// authenticator here owns the credential store and hands back the sha1 to
/// commit for subsequent backend `COM_CHANGE_USER` traffic (the wire token
/// itself is a one-way scramble and can't be turned back into a sha1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReauthOutcome {
    Succeeded { password_sha1: [u8; 20] },
    Failed,
}

/// §6 "Authenticator contract": the external, pluggable interface that
/// actually hashes passwords and verifies credentials. The engine only
/// drives this state machine; it never hashes on its own behalf outside of
/// the native-password scramble math needed to talk the wire protocol.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Builds and sends the client's credential response to the freshly
    /// decoded server handshake.
    async fn send_credentials(
        &self,
        handshake: &ServerHandshake,
        user: &str,
        password_sha1: Option<&[u8]>,
        db: Option<&str>,
    ) -> std::io::Result<Vec<u8>>;

    fn extract(&self, buffer: &[u8]) -> ExtractResult;

    async fn authenticate(&self, buffer: &[u8]) -> AuthenticateResult;

    /// §4.6: optional reauthentication support. `None` means "not
    /// implemented by this authenticator, treat as a no-op" per spec.
    async fn reauthenticate(
        &self,
        _user: &str,
        _token: &[u8],
        _scramble: &[u8; 20],
    ) -> Option<ReauthOutcome> {
        None
    }
}

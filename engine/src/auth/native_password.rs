//! Default `Authenticator` implementation speaking `mysql_native_password`.
//! The spec treats "the pluggable authenticator that actually hashes
//! passwords and verifies credentials" as an external collaborator; this is
//! the one concrete implementation the engine ships so the happy-path and
//! auth-switch scenarios in §8 are actually runnable.

use async_trait::async_trait;

use crate::auth::scramble::native_password_scramble;
use crate::auth::{AuthenticateResult, Authenticator, ExtractResult};
use crate::protocol::mysql::constants::DEFAULT_AUTH_PLUGIN;
use crate::protocol::mysql::handshake::ServerHandshake;
use crate::protocol::mysql::packet::ReplyKind;

const CLIENT_LONG_PASSWORD: u32 = 0x0000_0001;
const CLIENT_PROTOCOL_41: u32 = 0x0000_0200;
const CLIENT_SECURE_CONNECTION: u32 = 0x0000_8000;
const CLIENT_PLUGIN_AUTH: u32 = 0x0008_0000;
const CLIENT_CONNECT_WITH_DB: u32 = 0x0000_0008;

pub struct NativePasswordAuthenticator;

impl NativePasswordAuthenticator {
    pub fn new() -> Self {
        Self
    }

    fn build_handshake_response(
        &self,
        handshake: &ServerHandshake,
        user: &str,
        password_sha1: Option<&[u8]>,
        db: Option<&str>,
    ) -> Vec<u8> {
        let mut caps = CLIENT_LONG_PASSWORD | CLIENT_PROTOCOL_41 | CLIENT_SECURE_CONNECTION
            | CLIENT_PLUGIN_AUTH;
        if db.is_some() {
            caps |= CLIENT_CONNECT_WITH_DB;
        }

        let mut payload = Vec::with_capacity(64);
        payload.extend_from_slice(&caps.to_le_bytes());
        payload.extend_from_slice(&(16 * 1024 * 1024u32).to_le_bytes());
        payload.push(handshake.charset);
        payload.extend_from_slice(&[0u8; 23]);
        payload.extend_from_slice(user.as_bytes());
        payload.push(0);

        match password_sha1 {
            Some(pw_sha1) if !pw_sha1.is_empty() => {
                let response = native_password_scramble(pw_sha1, &handshake.scramble);
                payload.push(response.len() as u8);
                payload.extend_from_slice(&response);
            }
            _ => payload.push(0),
        }

        if let Some(db) = db {
            payload.extend_from_slice(db.as_bytes());
            payload.push(0);
        }

        payload.extend_from_slice(DEFAULT_AUTH_PLUGIN.as_bytes());
        payload.push(0);
        payload
    }
}

impl Default for NativePasswordAuthenticator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Authenticator for NativePasswordAuthenticator {
    async fn send_credentials(
        &self,
        handshake: &ServerHandshake,
        user: &str,
        password_sha1: Option<&[u8]>,
        db: Option<&str>,
    ) -> std::io::Result<Vec<u8>> {
        Ok(self.build_handshake_response(handshake, user, password_sha1, db))
    }

    fn extract(&self, _buffer: &[u8]) -> ExtractResult {
        ExtractResult::Succeeded
    }

    async fn authenticate(&self, buffer: &[u8]) -> AuthenticateResult {
        let packet = crate::protocol::mysql::packet::Packet::new(0, buffer.to_vec());
        match packet.classify() {
            ReplyKind::Ok => AuthenticateResult::Succeeded,
            ReplyKind::AuthSwitchRequest | ReplyKind::Eof => AuthenticateResult::Incomplete,
            _ => AuthenticateResult::Failed,
        }
    }

    // No credential store of its own, so §4.6 reauthentication falls back to
    // the trait default (not implemented, treated as a no-op).
}

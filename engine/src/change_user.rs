//! §4.6 client-initiated `COM_CHANGE_USER`, grounded on the teacher's
//! `auth`/credential-refresh handling in `backend/auth` combined with the
//! packet layout this engine already builds for pool reuse.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::warn;

use crate::auth::ReauthOutcome;
use crate::connection::BackendConnection;
use crate::error::EngineError;
use crate::protocol::mysql::constants::{CommandCode, MYSQL_DATABASE_MAXLEN, MYSQL_USER_MAXLEN};
use crate::router::Router;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeUserRequest {
    pub user: String,
    pub token: Vec<u8>,
    pub db: Option<String>,
    pub charset: Option<u16>,
}

/// §4.6 step 1: parse a client `COM_CHANGE_USER` payload (command byte
/// already stripped). Returns `None` on a malformed packet.
pub fn parse(payload: &[u8]) -> Option<ChangeUserRequest> {
    let mut pos = 0usize;
    let user = read_nul_terminated(payload, &mut pos)?;
    let user = truncate_with_log(user, MYSQL_USER_MAXLEN, "username");

    let token_len = *payload.get(pos)? as usize;
    pos += 1;
    let token = payload.get(pos..pos + token_len)?.to_vec();
    pos += token_len;

    let db = read_nul_terminated(payload, &mut pos).filter(|s| !s.is_empty());
    let db = db.map(|d| truncate_with_log(d, MYSQL_DATABASE_MAXLEN, "database name"));

    let charset = if payload.len() >= pos + 2 {
        Some(u16::from_le_bytes([payload[pos], payload[pos + 1]]))
    } else {
        None
    };

    Some(ChangeUserRequest {
        user,
        token,
        db,
        charset,
    })
}

fn truncate_with_log(s: String, max_len: usize, field: &str) -> String {
    if s.len() > max_len {
        warn!(field, len = s.len(), max_len, "COM_CHANGE_USER field truncated");
        s[..max_len].to_string()
    } else {
        s
    }
}

fn read_nul_terminated(buf: &[u8], pos: &mut usize) -> Option<String> {
    let start = *pos;
    let nul = buf.get(start..)?.iter().position(|&b| b == 0)?;
    let s = String::from_utf8_lossy(&buf[start..start + nul]).into_owned();
    *pos = start + nul + 1;
    Some(s)
}

/// §4.6 steps 2-4. Returns the synthetic `COM_CHANGE_USER` bytes to write to
/// the backend on success; the new credentials are committed later, once the
/// backend's own OK for that packet is observed (see
/// `BackendConnection::begin_change_user`). On reauthentication failure a
/// fake inbound auth-failure packet is delivered to the client directly and
/// this returns `Ok(None)`.
pub async fn apply<R, W>(
    conn: &mut BackendConnection<R, W>,
    router: &Arc<dyn Router>,
    session_id: u64,
    request: ChangeUserRequest,
) -> Result<Option<Vec<u8>>, EngineError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let authenticator = conn.authenticator().clone();
    let scramble = conn.scramble;

    let mut outcome = authenticator
        .reauthenticate(&request.user, &request.token, &scramble)
        .await;

    let Some(first_attempt) = outcome else {
        // §4.6 closing line: "if the authenticator does not implement
        // reauth, the entire operation is a no-op."
        return Ok(None);
    };

    if matches!(first_attempt, ReauthOutcome::Failed) {
        warn!(session_id, user = %request.user, "COM_CHANGE_USER reauth failed, retrying once");
        outcome = authenticator
            .reauthenticate(&request.user, &request.token, &scramble)
            .await;
    }

    match outcome {
        Some(ReauthOutcome::Succeeded { password_sha1 }) => {
            let charset = request.charset.unwrap_or(conn.charset);
            let bytes = conn.begin_change_user(request.user, Some(password_sha1), request.db, charset);
            Ok(Some(bytes))
        }
        _ => {
            warn!(session_id, user = %request.user, "COM_CHANGE_USER reauth failed after retry");
            conn.archive_command(CommandCode::ComChangeUser);
            let err_packet = EngineError::AuthFailed.to_err_packet(0);
            router.client_reply(session_id, &err_packet).await;
            Ok(None)
        }
    }
}

//! Packet builders for outgoing commands and synthetic replies. Grounded on
//! the teacher's `protocol/mysql/packet/writers.rs`, trimmed to the packets
//! this engine actually emits: `COM_CHANGE_USER`, `COM_QUIT`,
//! `COM_RESET_CONNECTION`, and synthetic OK/ERR packets used for fake
//! inbound delivery to the client.

use crate::auth::scramble::native_password_scramble;
use crate::protocol::mysql::constants::{CommandCode, DEFAULT_AUTH_PLUGIN};
use crate::protocol::mysql::error_codes::ErrorKind;

fn push_nul_terminated(buf: &mut Vec<u8>, s: &[u8]) {
    buf.extend_from_slice(s);
    buf.push(0);
}

/// §4.1 "build COM_CHANGE_USER". `password_sha1` is `SHA1(real_password)`, as
/// stored in the credentials envelope; pass `None` for an anonymous user.
pub fn build_com_change_user(
    user: &str,
    password_sha1: Option<&[u8]>,
    scramble: &[u8; 20],
    db: Option<&str>,
    charset: u16,
) -> Vec<u8> {
    let mut payload = Vec::with_capacity(64);
    payload.push(CommandCode::ComChangeUser as u8);
    push_nul_terminated(&mut payload, user.as_bytes());

    match password_sha1 {
        Some(pw_sha1) if !pw_sha1.is_empty() => {
            let transmitted = native_password_scramble(pw_sha1, scramble);
            payload.push(transmitted.len() as u8);
            payload.extend_from_slice(&transmitted);
        }
        _ => payload.push(0),
    }

    match db {
        Some(db) if !db.is_empty() => push_nul_terminated(&mut payload, db.as_bytes()),
        _ => payload.push(0),
    }

    payload.push((charset & 0xff) as u8);
    payload.push(((charset >> 8) & 0xff) as u8);

    // Plugin name terminates with NUL, matching the MySQL client/server
    // protocol convention for the trailing string field of this packet.
    push_nul_terminated(&mut payload, DEFAULT_AUTH_PLUGIN.as_bytes());

    frame(0, &payload)
}

pub fn build_com_quit() -> Vec<u8> {
    frame(0, &[CommandCode::ComQuit as u8])
}

pub fn build_com_reset_connection() -> Vec<u8> {
    frame(0, &[CommandCode::ComResetConnection as u8])
}

/// Builds a synthetic ERR packet for delivery as a fake inbound/outbound
/// packet (§7), e.g. "Authentication with backend failed..." surfaced to the
/// router via `handleError`.
pub fn build_err_packet(seq: u8, kind: ErrorKind, message: &str) -> Vec<u8> {
    let mut payload = Vec::with_capacity(16 + message.len());
    payload.push(0xff);
    let code = kind.code();
    payload.push((code & 0xff) as u8);
    payload.push(((code >> 8) & 0xff) as u8);
    payload.push(b'#');
    payload.extend_from_slice(kind.sqlstate().as_bytes());
    payload.extend_from_slice(message.as_bytes());
    frame(seq, &payload)
}

fn frame(seq: u8, payload: &[u8]) -> Vec<u8> {
    let len = payload.len() as u32;
    let mut buf = Vec::with_capacity(4 + payload.len());
    buf.push((len & 0xff) as u8);
    buf.push(((len >> 8) & 0xff) as u8);
    buf.push(((len >> 16) & 0xff) as u8);
    buf.push(seq);
    buf.extend_from_slice(payload);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn change_user_header_length_matches_payload() {
        let scramble = [7u8; 20];
        let pkt = build_com_change_user("root", Some(&[1u8; 20]), &scramble, Some("test"), 45);
        let declared_len =
            pkt[0] as u32 | ((pkt[1] as u32) << 8) | ((pkt[2] as u32) << 16);
        assert_eq!(declared_len as usize, pkt.len() - 4);
    }

    #[test]
    fn change_user_is_idempotent() {
        let scramble = [7u8; 20];
        let a = build_com_change_user("root", Some(&[1u8; 20]), &scramble, Some("test"), 45);
        let b = build_com_change_user("root", Some(&[1u8; 20]), &scramble, Some("test"), 45);
        assert_eq!(a, b);
    }

    #[test]
    fn change_user_anonymous_password_is_single_nul() {
        let scramble = [7u8; 20];
        let pkt = build_com_change_user("anon", None, &scramble, None, 33);
        // cmd byte + "anon\0" + one NUL scramble-length byte + one NUL db byte.
        let after_cmd_and_user = 4 + 1 + 5;
        assert_eq!(pkt[after_cmd_and_user], 0);
    }

    #[test]
    fn com_quit_is_one_byte_payload() {
        let pkt = build_com_quit();
        assert_eq!(pkt.len(), 5);
        assert_eq!(pkt[4], CommandCode::ComQuit as u8);
    }
}

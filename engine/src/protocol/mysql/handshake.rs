//! §4.1 "decode server handshake": the initial handshake packet (protocol
//! version 10) the backend server sends immediately after connect.

use crate::error::EngineError;
use crate::protocol::mysql::constants::AUTH_PLUGIN_DATA_PART_1_LENGTH;

#[derive(Debug, Clone)]
pub struct ServerHandshake {
    pub protocol_version: u8,
    pub server_version: String,
    pub connection_id: u32,
    pub scramble: [u8; 20],
    pub capabilities: u32,
    pub charset: u8,
    pub status_flags: u16,
    pub auth_plugin_name: String,
}

/// Parses a handshake v10 packet payload. Bounds violations collapse to
/// `EngineError::MalformedHandshake` per §4.1.
pub fn decode_server_handshake(payload: &[u8]) -> Result<ServerHandshake, EngineError> {
    let mut cursor = 0usize;
    let protocol_version = *payload
        .get(cursor)
        .ok_or(EngineError::MalformedHandshake)?;
    cursor += 1;

    let version_end = payload[cursor..]
        .iter()
        .position(|&b| b == 0)
        .map(|p| cursor + p)
        .ok_or(EngineError::MalformedHandshake)?;
    let server_version = String::from_utf8_lossy(&payload[cursor..version_end]).to_string();
    cursor = version_end + 1;

    let connection_id = read_u32(payload, cursor)?;
    cursor += 4;

    let scramble_part1 = payload
        .get(cursor..cursor + AUTH_PLUGIN_DATA_PART_1_LENGTH)
        .ok_or(EngineError::MalformedHandshake)?;
    cursor += AUTH_PLUGIN_DATA_PART_1_LENGTH;
    cursor += 1; // filler

    let caps_lower = read_u16(payload, cursor)?;
    cursor += 2;

    let charset = *payload.get(cursor).ok_or(EngineError::MalformedHandshake)?;
    cursor += 1;

    let status_flags = read_u16(payload, cursor)?;
    cursor += 2;

    let caps_upper = read_u16(payload, cursor)?;
    cursor += 2;
    let capabilities = caps_lower as u32 | ((caps_upper as u32) << 16);

    cursor += 1; // auth-plugin-data-len, unused: part 2 is always 12 bytes + NUL
    cursor += 10; // reserved filler

    let scramble_part2 = payload
        .get(cursor..cursor + 12)
        .ok_or(EngineError::MalformedHandshake)?;
    cursor += 12;
    if payload.get(cursor) == Some(&0) {
        cursor += 1;
    }

    let mut scramble = [0u8; 20];
    scramble[..8].copy_from_slice(scramble_part1);
    scramble[8..20].copy_from_slice(scramble_part2);

    let auth_plugin_name = if cursor < payload.len() {
        let end = payload[cursor..]
            .iter()
            .position(|&b| b == 0)
            .map(|p| cursor + p)
            .unwrap_or(payload.len());
        String::from_utf8_lossy(&payload[cursor..end]).to_string()
    } else {
        "mysql_native_password".to_string()
    };

    Ok(ServerHandshake {
        protocol_version,
        server_version,
        connection_id,
        scramble,
        capabilities,
        charset,
        status_flags,
        auth_plugin_name,
    })
}

fn read_u32(payload: &[u8], at: usize) -> Result<u32, EngineError> {
    let b = payload
        .get(at..at + 4)
        .ok_or(EngineError::MalformedHandshake)?;
    Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

fn read_u16(payload: &[u8], at: usize) -> Result<u16, EngineError> {
    let b = payload
        .get(at..at + 2)
        .ok_or(EngineError::MalformedHandshake)?;
    Ok(u16::from_le_bytes([b[0], b[1]]))
}

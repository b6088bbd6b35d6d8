pub mod packet_reader;
pub mod packet_writer;
pub mod writers;

use nom::bytes::streaming::take;
use nom::number::streaming::{le_u24, le_u8};
use nom::IResult;

use crate::protocol::mysql::constants::{HeaderInfo, MAX_PAYLOAD_LEN};

/// One framed MySQL packet: header-stripped payload plus the sequence byte
/// it arrived with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub seq: u8,
    pub payload: Vec<u8>,
}

/// Result of inspecting the first payload byte of a reply packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyKind {
    Ok,
    Err,
    Eof,
    AuthSwitchRequest,
    Other,
}

impl Packet {
    pub fn new(seq: u8, payload: Vec<u8>) -> Self {
        Self { seq, payload }
    }

    /// §4.1 classify reply: inspect byte 4 of the packet (payload[0]).
    pub fn classify(&self) -> ReplyKind {
        match self.payload.first() {
            Some(0x00) => ReplyKind::Ok,
            Some(0xff) => ReplyKind::Err,
            Some(0xfe) if self.payload.len() < 9 => ReplyKind::Eof,
            Some(0xfe) => ReplyKind::AuthSwitchRequest,
            _ => ReplyKind::Other,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.classify() == ReplyKind::Ok
    }

    pub fn is_err(&self) -> bool {
        self.classify() == ReplyKind::Err
    }

    pub fn is_eof(&self) -> bool {
        self.classify() == ReplyKind::Eof
    }

    pub fn is_auth_switch_request(&self) -> bool {
        self.classify() == ReplyKind::AuthSwitchRequest
    }

    /// §8 invariant 6 support / §4.1 "OK-packet sanity for COM_CHANGE_USER":
    /// byte 4 = OK, payload >= 7 bytes, affected-rows byte = 0, insert-id byte = 0.
    pub fn is_valid_change_user_ok(&self) -> bool {
        self.payload.len() >= 7
            && self.payload[0] == HeaderInfo::OkHeader as u8
            && self.payload[1] == 0
            && self.payload[2] == 0
    }

    /// Re-frames this packet back into header+payload wire bytes, for
    /// callers (the session-command reassembler) that operate on raw slabs
    /// rather than parsed packets. Payloads over `MAX_PAYLOAD_LEN` are
    /// re-split the same way the original splice is undone.
    pub fn to_framed_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.payload.len() + 4);
        let mut rest = self.payload.as_slice();
        let mut seq = self.seq;
        loop {
            let chunk_len = rest.len().min(MAX_PAYLOAD_LEN);
            let (chunk, tail) = rest.split_at(chunk_len);
            out.push((chunk_len & 0xff) as u8);
            out.push(((chunk_len >> 8) & 0xff) as u8);
            out.push(((chunk_len >> 16) & 0xff) as u8);
            out.push(seq);
            out.extend_from_slice(chunk);
            if chunk_len < MAX_PAYLOAD_LEN {
                break;
            }
            rest = tail;
            seq = seq.wrapping_add(1);
        }
        out
    }
}

/// An `0xFE` reply with length >= 9 (§4.1 classify reply / §4.3.a step 3):
/// the server wants to switch auth methods mid-handshake or mid-`COM_CHANGE_USER`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSwitchRequest {
    pub plugin_name: String,
    pub scramble: [u8; 20],
}

/// Parses the payload of an `AuthSwitchRequest` packet (status byte already
/// confirmed `0xfe` by the caller via `classify`). Layout: status byte,
/// NUL-terminated plugin name, then auth-plugin-data (20 bytes, optionally
/// NUL-terminated).
pub fn parse_auth_switch_request(payload: &[u8]) -> Option<AuthSwitchRequest> {
    if payload.first() != Some(&0xfe) {
        return None;
    }
    let rest = &payload[1..];
    let nul = rest.iter().position(|&b| b == 0)?;
    let plugin_name = String::from_utf8_lossy(&rest[..nul]).into_owned();
    let mut data = &rest[nul + 1..];
    if data.last() == Some(&0) {
        data = &data[..data.len() - 1];
    }
    if data.len() < 20 {
        return None;
    }
    let mut scramble = [0u8; 20];
    scramble.copy_from_slice(&data[..20]);
    Some(AuthSwitchRequest {
        plugin_name,
        scramble,
    })
}

/// §4.1 "frame next": parse a single header+payload packet out of `input`,
/// handling the `0xffffff`-length continuation convention for payloads that
/// span more than one physical packet. Returns the unconsumed remainder.
fn one_packet(input: &[u8]) -> IResult<&[u8], Packet> {
    let (input, len) = le_u24(input)?;
    let (input, seq) = le_u8(input)?;
    let (input, payload) = take(len)(input)?;
    Ok((
        input,
        Packet {
            seq,
            payload: payload.to_vec(),
        },
    ))
}

/// Frames one logical packet, splicing together any `0xffffff`-length
/// continuation chunks into a single payload. Never blocks: returns
/// `Ok(None)` (via nom's `Incomplete`) when the buffer doesn't yet hold a
/// complete packet.
pub fn frame_next(input: &[u8]) -> IResult<&[u8], Packet> {
    let (mut rest, mut pkt) = one_packet(input)?;
    while pkt.payload.len() == MAX_PAYLOAD_LEN {
        let (next_rest, more) = one_packet(rest)?;
        pkt.payload.extend_from_slice(&more.payload);
        pkt.seq = more.seq;
        rest = next_rest;
        if more.payload.len() < MAX_PAYLOAD_LEN {
            break;
        }
    }
    Ok((rest, pkt))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn framed(seq: u8, payload: &[u8]) -> Vec<u8> {
        let len = payload.len() as u32;
        let mut buf = vec![
            (len & 0xff) as u8,
            ((len >> 8) & 0xff) as u8,
            ((len >> 16) & 0xff) as u8,
            seq,
        ];
        buf.extend_from_slice(payload);
        buf
    }

    #[test]
    fn test_one_ping() {
        let payload = [0x0e_u8];
        let buf = framed(0, &payload);
        let (rest, pkt) = frame_next(&buf).unwrap();
        assert!(rest.is_empty());
        assert_eq!(pkt.payload, payload);
    }

    #[test]
    fn test_classify_ok_err_eof() {
        assert_eq!(Packet::new(0, vec![0x00, 0, 0]).classify(), ReplyKind::Ok);
        assert_eq!(Packet::new(0, vec![0xff, 0, 0]).classify(), ReplyKind::Err);
        assert_eq!(
            Packet::new(0, vec![0xfe, 0, 0]).classify(),
            ReplyKind::Eof
        );
        let long_auth_switch = {
            let mut v = vec![0xfe];
            v.extend(std::iter::repeat(0u8).take(20));
            v
        };
        assert_eq!(
            Packet::new(0, long_auth_switch).classify(),
            ReplyKind::AuthSwitchRequest
        );
    }

    #[test]
    fn test_need_more_bytes() {
        let buf = [0x05, 0x00]; // truncated header
        assert!(frame_next(&buf).is_err() || frame_next(&buf).unwrap_err().is_incomplete());
    }

    #[test]
    fn test_long_packet_splice() {
        let mut first = vec![0xAB; MAX_PAYLOAD_LEN];
        let second = vec![0xCD, 0xEF];
        let mut buf = framed(0, &first);
        buf.extend(framed(1, &second));
        let (rest, pkt) = frame_next(&buf).unwrap();
        assert!(rest.is_empty());
        first.extend_from_slice(&second);
        assert_eq!(pkt.payload, first);
        assert_eq!(pkt.seq, 1);
    }

    #[test]
    fn auth_switch_request_parses_plugin_and_scramble() {
        let mut payload = vec![0xfe];
        payload.extend_from_slice(b"mysql_native_password\0");
        payload.extend_from_slice(b"01234567890123456789");
        let switch = parse_auth_switch_request(&payload).unwrap();
        assert_eq!(switch.plugin_name, "mysql_native_password");
        assert_eq!(&switch.scramble, b"01234567890123456789");
    }

    #[test]
    fn auth_switch_request_rejects_non_fe_header() {
        assert!(parse_auth_switch_request(&[0x00, 1, 2, 3]).is_none());
    }
}

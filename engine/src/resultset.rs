//! §4.3.a step 2 "full result-set aggregation": counts the EOF/OK packets
//! bracketing a `COM_QUERY`/`COM_STMT_FETCH` reply and reassembles the whole
//! result set into one buffer before it reaches the router, so a client
//! never sees a result set split across several `clientReply` calls.
//!
//! Unlike `SessionCommandReassembler`, a result set's total packet count
//! isn't known up front (it depends on how many rows come back), so this
//! counts up to however many signal packets close it: one (the closing OK,
//! under `CLIENT_DEPRECATE_EOF`) or two (end-of-column-defs EOF, then
//! end-of-rows EOF/ERR) otherwise.

use crate::protocol::mysql::packet::{Packet, ReplyKind};

#[derive(Debug, PartialEq, Eq)]
pub enum Step {
    Complete(Vec<u8>),
    NeedMore,
}

#[derive(Default)]
pub struct ResultSetAggregator {
    signals_seen: u32,
    buffer: Vec<u8>,
}

impl ResultSetAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_in_progress(&self) -> bool {
        !self.buffer.is_empty()
    }

    /// §4.3.a step 2 "if the buffer begins a result set": a lead byte of
    /// 1-250 is a length-encoded column count, distinct from the bare
    /// OK/ERR reply to a query that returned no rows (e.g. INSERT/UPDATE).
    pub fn begins_resultset(first_packet_payload: &[u8]) -> bool {
        matches!(first_packet_payload.first(), Some(1..=250))
    }

    fn signal_threshold(deprecate_eof: bool) -> u32 {
        if deprecate_eof {
            1
        } else {
            2
        }
    }

    /// Feeds one already-framed complete packet (header + payload).
    pub fn feed(&mut self, packet: &Packet, framed: &[u8], deprecate_eof: bool) -> Step {
        self.buffer.extend_from_slice(framed);
        if matches!(packet.classify(), ReplyKind::Eof | ReplyKind::Ok | ReplyKind::Err) {
            self.signals_seen += 1;
        }
        if self.signals_seen >= Self::signal_threshold(deprecate_eof) {
            self.signals_seen = 0;
            Step::Complete(std::mem::take(&mut self.buffer))
        } else {
            Step::NeedMore
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn framed(payload: &[u8]) -> Vec<u8> {
        let len = payload.len() as u32;
        let mut buf = vec![
            (len & 0xff) as u8,
            ((len >> 8) & 0xff) as u8,
            ((len >> 16) & 0xff) as u8,
            0,
        ];
        buf.extend_from_slice(payload);
        buf
    }

    #[test]
    fn column_count_byte_begins_a_resultset() {
        assert!(ResultSetAggregator::begins_resultset(&[2]));
        assert!(!ResultSetAggregator::begins_resultset(&[0x00, 0, 0]));
        assert!(!ResultSetAggregator::begins_resultset(&[0xff, 0, 0]));
    }

    #[test]
    fn completes_after_two_eofs_without_deprecate_eof() {
        let mut agg = ResultSetAggregator::new();
        let col_count = framed(&[2]);
        let col_def = framed(b"col-def");
        let eof1 = framed(&[0xfe, 0, 0]);
        let row = framed(b"row-data");
        let eof2 = framed(&[0xfe, 0, 0]);

        for slab in [&col_count, &col_def, &eof1, &row] {
            let pkt = Packet::new(0, slab[4..].to_vec());
            assert_eq!(agg.feed(&pkt, slab, false), Step::NeedMore);
        }
        let pkt = Packet::new(0, eof2[4..].to_vec());
        match agg.feed(&pkt, &eof2, false) {
            Step::Complete(full) => {
                let mut expected = Vec::new();
                for slab in [&col_count, &col_def, &eof1, &row, &eof2] {
                    expected.extend_from_slice(slab);
                }
                assert_eq!(full, expected);
            }
            Step::NeedMore => panic!("expected completion on second EOF"),
        }
        assert!(!agg.is_in_progress());
    }

    #[test]
    fn completes_after_one_ok_under_deprecate_eof() {
        let mut agg = ResultSetAggregator::new();
        let col_count = framed(&[1]);
        let col_def = framed(b"col-def");
        let row = framed(b"row-data");
        let ok = framed(&[0x00, 0, 0]);

        for slab in [&col_count, &col_def, &row] {
            let pkt = Packet::new(0, slab[4..].to_vec());
            assert_eq!(agg.feed(&pkt, slab, true), Step::NeedMore);
        }
        let pkt = Packet::new(0, ok[4..].to_vec());
        assert!(matches!(agg.feed(&pkt, &ok, true), Step::Complete(_)));
        assert!(!agg.is_in_progress());
    }
}

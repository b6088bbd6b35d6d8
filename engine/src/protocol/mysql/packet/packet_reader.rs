use std::io;

use tokio::io::{AsyncRead, AsyncReadExt};

use super::{frame_next, Packet};

/// Incrementally accumulates bytes from an `AsyncRead` and slices off
/// complete MySQL packets. Mirrors the non-blocking "read what's available,
/// frame what you can, keep the rest" discipline the reactor contract
/// expects from a single `readable` callback.
pub struct PacketReader<R> {
    buf: Vec<u8>,
    pub inner: R,
}

impl<R: AsyncRead + Unpin> PacketReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            buf: Vec::with_capacity(4096),
            inner,
        }
    }

    /// Reads from the socket until one full packet has been framed, growing
    /// the internal buffer as needed. Returns `Ok(None)` on clean EOF before
    /// any bytes were read.
    pub async fn next_packet(&mut self) -> io::Result<Option<Packet>> {
        loop {
            if let Ok((rest, pkt)) = frame_next(&self.buf) {
                let consumed = self.buf.len() - rest.len();
                self.buf.drain(0..consumed);
                return Ok(Some(pkt));
            }
            let mut chunk = [0u8; 4096];
            let n = self.inner.read(&mut chunk).await?;
            if n == 0 {
                return if self.buf.is_empty() {
                    Ok(None)
                } else {
                    Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "connection closed mid-packet",
                    ))
                };
            }
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }

    /// §4.3.a `gw_read_backend_event`: a single reactor `readable` wakeup
    /// means exactly one read of whatever the kernel currently has
    /// buffered, but that read may hold several complete packets back to
    /// back (a multi-packet result set, several session-command replies
    /// queued up). Under the edge-triggered reactor model there is no
    /// second wakeup to flush stragglers, so every complete packet framed
    /// out of this one read must be returned, not just the first.
    pub async fn read_available(&mut self) -> io::Result<Vec<Packet>> {
        let mut chunk = [0u8; 4096];
        let n = self.inner.read(&mut chunk).await?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed",
            ));
        }
        self.buf.extend_from_slice(&chunk[..n]);
        Ok(self.take_complete_packets())
    }

    /// Non-blocking drain of whatever is already buffered / immediately
    /// readable without awaiting further I/O, used by the §4.3.a read-and-route
    /// path which must frame *all complete packets currently available*.
    pub fn take_complete_packets(&mut self) -> Vec<Packet> {
        let mut out = Vec::new();
        loop {
            match frame_next(&self.buf) {
                Ok((rest, pkt)) => {
                    let consumed = self.buf.len() - rest.len();
                    self.buf.drain(0..consumed);
                    out.push(pkt);
                }
                Err(_) => break,
            }
        }
        out
    }

    pub fn feed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn has_pending(&self) -> bool {
        !self.buf.is_empty()
    }
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

    #[tokio::test]
    async fn reads_one_packet_across_two_reads() {
        let whole = framed(0, b"hello");
        let (first, second) = whole.split_at(3);
        let stream = tokio_test::io::Builder::new()
            .read(first)
            .read(second)
            .build();
        let mut reader = PacketReader::new(stream);
        let pkt = reader.next_packet().await.unwrap().unwrap();
        assert_eq!(pkt.payload, b"hello");
    }

    #[tokio::test]
    async fn read_available_drains_multiple_packets_from_one_read() {
        let mut whole = framed(0, b"one");
        whole.extend(framed(1, b"two"));
        whole.extend(framed(2, b"three"));
        let stream = tokio_test::io::Builder::new().read(&whole).build();
        let mut reader = PacketReader::new(stream);

        let packets = reader.read_available().await.unwrap();
        assert_eq!(packets.len(), 3);
        assert_eq!(packets[0].payload, b"one");
        assert_eq!(packets[1].payload, b"two");
        assert_eq!(packets[2].payload, b"three");
        assert!(!reader.has_pending());
    }

    #[test]
    fn take_complete_packets_leaves_partial_residue() {
        let mut reader = PacketReader::new(tokio::io::empty());
        let mut buf = framed(0, b"one");
        buf.extend(framed(1, b"two"));
        buf.extend_from_slice(&[0x05, 0x00]); // partial third header
        reader.feed(&buf);
        let packets = reader.take_complete_packets();
        assert_eq!(packets.len(), 2);
        assert_eq!(packets[0].payload, b"one");
        assert_eq!(packets[1].payload, b"two");
        assert!(reader.has_pending());
    }
}

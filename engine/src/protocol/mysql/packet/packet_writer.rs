use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use pin_project::pin_project;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::protocol::mysql::constants::MAX_PAYLOAD_LEN;

/// Buffers one outgoing packet's payload and frames it with the 3-byte LE
/// length + 1-byte sequence header on `end_packet`, splitting payloads
/// longer than `MAX_PAYLOAD_LEN` into the standard continuation chunks.
#[pin_project]
pub struct PacketWriter<W> {
    buf: Vec<u8>,
    seq: u8,
    #[pin]
    inner: W,
}

impl<W: AsyncWrite + Unpin> PacketWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            buf: Vec::new(),
            seq: 0,
            inner,
        }
    }

    pub fn seq(&self) -> u8 {
        self.seq
    }

    pub fn set_seq(&mut self, seq: u8) {
        self.seq = seq;
    }

    pub fn reset_seq(&mut self) {
        self.seq = 0;
    }

    pub fn increase_seq(&mut self) {
        self.seq = self.seq.wrapping_add(1);
    }

    pub fn write_payload(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Frames `self.buf` as one or more physical packets and writes them out,
    /// then clears the buffer and advances `seq`.
    pub async fn end_packet(&mut self) -> io::Result<()> {
        let payload = std::mem::take(&mut self.buf);
        let mut offset = 0;
        loop {
            let chunk_len = (payload.len() - offset).min(MAX_PAYLOAD_LEN);
            let chunk = &payload[offset..offset + chunk_len];
            let mut header = [0u8; 4];
            header[0] = (chunk_len & 0xff) as u8;
            header[1] = ((chunk_len >> 8) & 0xff) as u8;
            header[2] = ((chunk_len >> 16) & 0xff) as u8;
            header[3] = self.seq;
            self.inner.write_all(&header).await?;
            self.inner.write_all(chunk).await?;
            self.increase_seq();
            offset += chunk_len;
            if chunk_len < MAX_PAYLOAD_LEN {
                break;
            }
        }
        Ok(())
    }

    pub async fn flush_all(&mut self) -> io::Result<()> {
        self.inner.flush().await
    }
}

impl<W: AsyncWrite + Unpin> AsyncWrite for PacketWriter<W> {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.project();
        this.buf.extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.project();
        this.inner.poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.project();
        this.inner.poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn end_packet_frames_header_and_payload() {
        let mut out = Vec::new();
        let mut writer = PacketWriter::new(&mut out);
        writer.write_payload(b"ping");
        writer.end_packet().await.unwrap();
        assert_eq!(&out[0..4], &[4, 0, 0, 0]);
        assert_eq!(&out[4..], b"ping");
    }

    #[tokio::test]
    async fn seq_advances_across_packets() {
        let mut out = Vec::new();
        let mut writer = PacketWriter::new(&mut out);
        writer.write_payload(b"a");
        writer.end_packet().await.unwrap();
        writer.write_payload(b"b");
        writer.end_packet().await.unwrap();
        assert_eq!(out[3], 0);
        assert_eq!(out[4 + 1 + 3], 1);
    }
}

#![allow(dead_code)]

use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use tokio::io::AsyncWrite;

/// An `AsyncWrite` that records everything written to it.
#[derive(Clone)]
pub struct MockWrite {
    data: Arc<Mutex<Vec<u8>>>,
}

/// Reads back what the mux wrote, parsed into frames.
pub struct Handle {
    data: Arc<Mutex<Vec<u8>>>,
}

pub fn mock() -> (MockWrite, Handle) {
    let data = Arc::new(Mutex::new(Vec::new()));
    (
        MockWrite { data: data.clone() },
        Handle { data },
    )
}

impl AsyncWrite for MockWrite {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.data.lock().unwrap().extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// One parsed HTTP/2 frame as it appeared on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireFrame {
    pub kind: u8,
    pub flags: u8,
    pub stream_id: u32,
    pub payload: Vec<u8>,
}

pub const DATA: u8 = 0;
pub const HEADERS: u8 = 1;
pub const RST_STREAM: u8 = 3;
pub const SETTINGS: u8 = 4;
pub const PING: u8 = 6;
pub const GO_AWAY: u8 = 7;
pub const WINDOW_UPDATE: u8 = 8;
pub const CONTINUATION: u8 = 9;

pub const END_STREAM: u8 = 0x1;
pub const ACK: u8 = 0x1;
pub const END_HEADERS: u8 = 0x4;

impl Handle {
    pub fn written(&self) -> Vec<u8> {
        self.data.lock().unwrap().clone()
    }

    pub fn frames(&self) -> Vec<WireFrame> {
        let wire = self.written();
        let mut rest = &wire[..];
        let mut frames = Vec::new();
        while !rest.is_empty() {
            assert!(rest.len() >= 9, "truncated frame header");
            let len = u32::from_be_bytes([0, rest[0], rest[1], rest[2]]) as usize;
            assert!(rest.len() >= 9 + len, "truncated frame payload");
            frames.push(WireFrame {
                kind: rest[3],
                flags: rest[4],
                stream_id: u32::from_be_bytes([rest[5], rest[6], rest[7], rest[8]]) & !(1 << 31),
                payload: rest[9..9 + len].to_vec(),
            });
            rest = &rest[9 + len..];
        }
        frames
    }

    /// Wait until at least `n` frames have been flushed.
    pub async fn frames_written(&self, n: usize) -> Vec<WireFrame> {
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        loop {
            let frames = self.frames();
            if frames.len() >= n {
                return frames;
            }
            assert!(
                std::time::Instant::now() < deadline,
                "timed out waiting for {n} frames; got {}",
                frames.len()
            );
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }
    }
}

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::error::Error;
use crate::frame::{MAX_MAX_FRAME_SIZE, Reason, Setting, StreamId};

use super::DEFAULT_WRITE_BUFFER_SIZE;

// Frame type codes on the send path (RFC 9113 §6). The mux never writes
// PRIORITY or PUSH_PROMISE, so they have no code here.
const DATA: u8 = 0x0;
const HEADERS: u8 = 0x1;
const RST_STREAM: u8 = 0x3;
const SETTINGS: u8 = 0x4;
const PING: u8 = 0x6;
const GO_AWAY: u8 = 0x7;
const WINDOW_UPDATE: u8 = 0x8;
const CONTINUATION: u8 = 0x9;

const FLAG_END_STREAM: u8 = 0x1;
const FLAG_ACK: u8 = 0x1;
const FLAG_END_HEADERS: u8 = 0x4;

/// The top bit of a stream-id word is reserved and must go out unset.
const RESERVED_BIT: u32 = 1 << 31;

const PING_PAYLOAD_LEN: usize = 8;

/// Serializes HTTP/2 frames into a write buffer over an `AsyncWrite`.
///
/// There is one write function per frame the mux emits; each appends the
/// nine-byte prologue and payload to the buffer, and bytes reach the
/// transport when [`flush`] is awaited. Exactly one task (the write loop)
/// drives a `Framer`, so none of this is synchronized.
///
/// [`flush`]: Framer::flush
#[derive(Debug)]
pub struct Framer<T> {
    /// Upstream `AsyncWrite`
    inner: T,

    /// Write buffer
    buf: BytesMut,

    /// Flush on our own once the buffer grows past this.
    flush_threshold: usize,
}

impl<T> Framer<T> {
    pub fn new(inner: T) -> Self {
        Self::with_write_buffer_size(inner, DEFAULT_WRITE_BUFFER_SIZE)
    }

    pub fn with_write_buffer_size(inner: T, size: usize) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(size),
            flush_threshold: size,
        }
    }

    /// Number of bytes buffered but not yet flushed.
    pub fn offset(&self) -> usize {
        self.buf.len()
    }

    pub(crate) fn should_flush(&self) -> bool {
        self.buf.len() >= self.flush_threshold
    }

    /// Consume the framer, returning the underlying writer.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Borrow the underlying writer.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Append the fixed frame prologue: 24-bit length, type, flags, and the
    /// stream id with its reserved bit cleared.
    fn prologue(&mut self, payload_len: usize, kind: u8, flags: u8, stream_id: StreamId) {
        self.buf.put_uint(payload_len as u64, 3);
        self.buf.put_u8(kind);
        self.buf.put_u8(flags);
        self.buf.put_u32(stream_id & !RESERVED_BIT);
    }

    fn check_payload_len(&self, len: usize) -> Result<(), Error> {
        if len > MAX_MAX_FRAME_SIZE as usize {
            return Err(Error::PayloadTooBig);
        }
        Ok(())
    }

    /// HEADERS carrying (a first fragment of) an already-encoded block.
    pub fn write_headers(
        &mut self,
        stream_id: StreamId,
        fragment: &[u8],
        end_stream: bool,
        end_headers: bool,
    ) -> Result<(), Error> {
        self.check_payload_len(fragment.len())?;

        let mut flags = 0;
        if end_stream {
            flags |= FLAG_END_STREAM;
        }
        if end_headers {
            flags |= FLAG_END_HEADERS;
        }
        tracing::trace!(
            "HEADERS -> buf; stream={stream_id} fragment={} end_stream={end_stream}",
            fragment.len()
        );

        self.prologue(fragment.len(), HEADERS, flags, stream_id);
        self.buf.extend_from_slice(fragment);
        Ok(())
    }

    /// A follow-on fragment of a block whose HEADERS frame went out first.
    pub fn write_continuation(
        &mut self,
        stream_id: StreamId,
        end_headers: bool,
        fragment: &[u8],
    ) -> Result<(), Error> {
        self.check_payload_len(fragment.len())?;

        let flags = if end_headers { FLAG_END_HEADERS } else { 0 };
        tracing::trace!(
            "CONTINUATION -> buf; stream={stream_id} fragment={}",
            fragment.len()
        );

        self.prologue(fragment.len(), CONTINUATION, flags, stream_id);
        self.buf.extend_from_slice(fragment);
        Ok(())
    }

    pub fn write_data(
        &mut self,
        stream_id: StreamId,
        end_stream: bool,
        payload: &[u8],
    ) -> Result<(), Error> {
        self.check_payload_len(payload.len())?;

        let flags = if end_stream { FLAG_END_STREAM } else { 0 };
        tracing::trace!(
            "DATA -> buf; stream={stream_id} len={} end_stream={end_stream}",
            payload.len()
        );

        self.prologue(payload.len(), DATA, flags, stream_id);
        self.buf.extend_from_slice(payload);
        Ok(())
    }

    /// SETTINGS, in exactly the order the caller listed them.
    pub fn write_settings(&mut self, settings: &[Setting]) -> Result<(), Error> {
        tracing::trace!("SETTINGS -> buf; count={}", settings.len());

        self.prologue(settings.len() * 6, SETTINGS, 0, 0);
        for setting in settings {
            self.buf.put_u16(setting.id.into());
            self.buf.put_u32(setting.value);
        }
        Ok(())
    }

    pub fn write_settings_ack(&mut self) -> Result<(), Error> {
        tracing::trace!("SETTINGS ack -> buf");
        self.prologue(0, SETTINGS, FLAG_ACK, 0);
        Ok(())
    }

    pub fn write_rst_stream(&mut self, stream_id: StreamId, reason: Reason) -> Result<(), Error> {
        tracing::trace!("RST_STREAM -> buf; stream={stream_id} reason={reason:?}");

        self.prologue(4, RST_STREAM, 0, stream_id);
        self.buf.put_u32(reason.into());
        Ok(())
    }

    pub fn write_ping(&mut self, ack: bool, payload: [u8; PING_PAYLOAD_LEN]) -> Result<(), Error> {
        tracing::trace!("PING -> buf; ack={ack}");

        let flags = if ack { FLAG_ACK } else { 0 };
        self.prologue(PING_PAYLOAD_LEN, PING, flags, 0);
        self.buf.put_slice(&payload);
        Ok(())
    }

    pub fn write_go_away(
        &mut self,
        last_stream_id: StreamId,
        reason: Reason,
        debug_data: &[u8],
    ) -> Result<(), Error> {
        self.check_payload_len(8 + debug_data.len())?;
        tracing::trace!("GOAWAY -> buf; last_stream={last_stream_id} reason={reason:?}");

        self.prologue(8 + debug_data.len(), GO_AWAY, 0, 0);
        self.buf.put_u32(last_stream_id & !RESERVED_BIT);
        self.buf.put_u32(reason.into());
        self.buf.extend_from_slice(debug_data);
        Ok(())
    }

    pub fn write_window_update(
        &mut self,
        stream_id: StreamId,
        increment: u32,
    ) -> Result<(), Error> {
        tracing::trace!("WINDOW_UPDATE -> buf; stream={stream_id} increment={increment}");

        self.prologue(4, WINDOW_UPDATE, 0, stream_id);
        self.buf.put_u32(increment);
        Ok(())
    }
}

impl<T: AsyncWrite + Unpin> Framer<T> {
    /// Write out everything buffered and flush the transport.
    pub async fn flush(&mut self) -> Result<(), Error> {
        if !self.buf.is_empty() {
            tracing::trace!("flushing framer; len={}", self.buf.len());
            self.inner.write_all_buf(&mut self.buf).await?;
        }
        self.inner.flush().await?;
        Ok(())
    }
}

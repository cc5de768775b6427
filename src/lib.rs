//! The outbound side of an HTTP/2 connection multiplexer.
//!
//! Many tasks produce work for one connection: request and response
//! headers, stream payloads, settings, pings, window updates. Exactly
//! one task may serialize frames onto the transport. This crate is that
//! single-writer core: a typed control queue ([`ControlBuffer`]) that
//! funnels every writer-affecting event to one consumer, and the consumer
//! itself ([`WriteLoop`]), which applies each message to its own state and
//! emits HTTP/2 frames through a buffered [`Framer`].
//!
//! # Scheduling and flow control
//!
//! DATA is interleaved fairly: streams with payload queued and stream-level
//! window available sit on a round-robin list, and each turn writes at most
//! one frame per stream, capped by the peer's max frame size, the stream's
//! window, and the connection's window. Streams that exhaust their window
//! park until the peer's WINDOW_UPDATE (or a larger INITIAL_WINDOW_SIZE)
//! reopens it. HEADERS are serialized eagerly in submission order;
//! trailers queue behind their stream's remaining DATA.
//!
//! Producers never block on the queue itself. The one exception is
//! [`ControlBuffer::throttle`]: messages produced in response to peer
//! actions (settings acks, ping replies, RST_STREAM) are capped at a
//! high-water mark so a misbehaving peer cannot run the queue unbounded.
//!
//! # Shutdown
//!
//! Cancelling the done token aborts blocked getters and producers;
//! [`ControlBuffer::finish`] rejects further puts and orphans pending
//! client HEADERS. [`WriteLoop::run`] treats the resulting
//! [`Error::ConnClosing`] as a normal exit.
//!
//! [`ControlBuffer`]: crate::proto::ControlBuffer
//! [`ControlBuffer::throttle`]: crate::proto::ControlBuffer::throttle
//! [`ControlBuffer::finish`]: crate::proto::ControlBuffer::finish
//! [`WriteLoop`]: crate::proto::WriteLoop
//! [`WriteLoop::run`]: crate::proto::WriteLoop::run
//! [`Framer`]: crate::codec::Framer

pub mod codec;
mod error;
pub mod frame;
pub mod hpack;
pub mod proto;

pub use crate::error::Error;
pub use crate::proto::{Control, ControlBuffer, Side, WriteLoop};

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use arc_swap::ArcSwapOption;
use bytes::Bytes;
use tokio::sync::{Notify, oneshot};
use tokio_util::sync::CancellationToken;

use crate::error::Error;
use crate::frame::{Reason, Setting, StreamId};
use crate::hpack::HeaderField;

use super::buffer::{Buffer, Deque};
use super::quota::WriteQuota;

/// The most queued peer-response messages we will buffer before pushing
/// back on the task that reads from the transport. These are messages
/// produced in reply to peer actions, such as a RST_STREAM due to bad
/// headers or a settings ack.
pub(crate) const MAX_QUEUED_TRANSPORT_RESPONSE_FRAMES: usize = 50;

pub type InitStreamFn = Box<dyn FnOnce(StreamId) -> Result<(), Error> + Send>;
pub type OnWriteFn = Box<dyn FnOnce() + Send>;
pub type OnOrphanedFn = Box<dyn FnOnce(Error) + Send>;
pub type OnDoneFn = Box<dyn FnOnce() + Send>;
pub type OnEachWriteFn = Box<dyn FnMut() + Send>;

/// Server side: record an accepted stream before its response HEADERS are
/// queued.
pub struct RegisterStream {
    pub stream_id: StreamId,
    pub wq: Arc<WriteQuota>,
}

/// Outgoing HEADERS: a request, a response, or trailers.
///
/// On the client side this is also what originates a stream.
pub struct HeaderFrame {
    pub stream_id: StreamId,
    pub fields: Vec<HeaderField>,
    /// Valid on the server side.
    pub end_stream: bool,
    /// Client side: registers the stream with the transport; may refuse.
    pub init_stream: Option<InitStreamFn>,
    pub on_write: Option<OnWriteFn>,
    /// Write quota for the stream created (client side).
    pub wq: Option<Arc<WriteQuota>>,
    /// Valid on the server side.
    pub cleanup: Option<CleanupStream>,
    /// Client side: invoked if the transport shuts down before these
    /// headers are ever written.
    pub on_orphaned: Option<OnOrphanedFn>,
}

impl HeaderFrame {
    pub fn new(stream_id: StreamId, fields: Vec<HeaderField>, end_stream: bool) -> Self {
        Self {
            stream_id,
            fields,
            end_stream,
            init_stream: None,
            on_write: None,
            wq: None,
            cleanup: None,
            on_orphaned: None,
        }
    }
}

/// Remove a stream from the write loop's bookkeeping, optionally emitting
/// RST_STREAM.
pub struct CleanupStream {
    pub stream_id: StreamId,
    pub rst: bool,
    pub rst_code: Reason,
    pub on_write: Option<OnWriteFn>,
}

/// A buffer of stream payload bytes to serialize.
pub struct DataFrame {
    pub stream_id: StreamId,
    pub end_stream: bool,
    pub data: Bytes,
    /// Called every time a part of `data` is written out.
    pub on_each_write: Option<OnEachWriteFn>,
    /// Called once all of `data` has been written out, unblocking the
    /// producer's buffer recycling.
    pub on_done: Option<OnDoneFn>,
}

impl DataFrame {
    pub fn new(stream_id: StreamId, data: Bytes, end_stream: bool) -> Self {
        Self {
            stream_id,
            end_stream,
            data,
            on_each_write: None,
            on_done: None,
        }
    }
}

/// Peer granted us more send quota.
#[derive(Debug, Copy, Clone)]
pub struct IncomingWindowUpdate {
    pub stream_id: StreamId,
    pub increment: u32,
}

/// We grant the peer more receive quota.
#[derive(Debug, Copy, Clone)]
pub struct OutgoingWindowUpdate {
    pub stream_id: StreamId,
    pub increment: u32,
}

/// Apply peer SETTINGS and emit the ack.
#[derive(Debug, Clone)]
pub struct IncomingSettings {
    pub settings: Vec<Setting>,
}

/// Emit our SETTINGS.
#[derive(Debug, Clone)]
pub struct OutgoingSettings {
    pub settings: Vec<Setting>,
}

/// Peer is going away; a client enters drain mode.
#[derive(Debug, Copy, Clone)]
pub struct IncomingGoAway {}

/// Emit GOAWAY; behavior is side-specific.
#[derive(Debug, Clone)]
pub struct GoAway {
    pub code: Reason,
    pub debug_data: Bytes,
    /// A courtesy warning: the connection keeps running for now.
    pub heads_up: bool,
    pub close_conn: bool,
}

/// Emit PING or PING ack.
#[derive(Debug, Copy, Clone)]
pub struct Ping {
    pub ack: bool,
    pub data: [u8; 8],
}

/// Synchronously query the current connection-level send quota.
#[derive(Debug)]
pub struct OutFlowControlSizeRequest {
    pub resp: oneshot::Sender<u32>,
}

/// A message for the write loop.
///
/// A control message not only carries data, headers or messages to be sent
/// out, but can also instruct the write loop to update its internal state.
/// Some variants (DATA, HEADERS) end up on the wire as HTTP/2 frames; most
/// do not map one-to-one.
pub enum Control {
    RegisterStream(RegisterStream),
    Headers(HeaderFrame),
    CleanupStream(CleanupStream),
    Data(DataFrame),
    IncomingWindowUpdate(IncomingWindowUpdate),
    OutgoingWindowUpdate(OutgoingWindowUpdate),
    IncomingSettings(IncomingSettings),
    OutgoingSettings(OutgoingSettings),
    IncomingGoAway(IncomingGoAway),
    GoAway(GoAway),
    Ping(Ping),
    OutFlowControlSizeRequest(OutFlowControlSizeRequest),
}

impl Control {
    /// True iff this message was produced in response to a peer action and
    /// therefore counts against the throttle high-water mark.
    pub fn is_transport_response_frame(&self) -> bool {
        match self {
            // Results in a RST_STREAM
            Self::Headers(h) => h.cleanup.as_ref().is_some_and(|c| c.rst),
            Self::CleanupStream(c) => c.rst,
            // Results in a settings ack
            Self::IncomingSettings(_) => true,
            Self::Ping(_) => true,
            Self::RegisterStream(_)
            | Self::Data(_)
            | Self::IncomingWindowUpdate(_)
            | Self::OutgoingWindowUpdate(_)
            | Self::OutgoingSettings(_)
            | Self::IncomingGoAway(_)
            | Self::GoAway(_)
            | Self::OutFlowControlSizeRequest(_) => false,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::RegisterStream(_) => "RegisterStream",
            Self::Headers(_) => "Headers",
            Self::CleanupStream(_) => "CleanupStream",
            Self::Data(_) => "Data",
            Self::IncomingWindowUpdate(_) => "IncomingWindowUpdate",
            Self::OutgoingWindowUpdate(_) => "OutgoingWindowUpdate",
            Self::IncomingSettings(_) => "IncomingSettings",
            Self::OutgoingSettings(_) => "OutgoingSettings",
            Self::IncomingGoAway(_) => "IncomingGoAway",
            Self::GoAway(_) => "GoAway",
            Self::Ping(_) => "Ping",
            Self::OutFlowControlSizeRequest(_) => "OutFlowControlSizeRequest",
        }
    }
}

impl fmt::Debug for Control {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A one-shot, closable barrier for throttled producers.
#[derive(Debug, Default)]
struct Gate {
    released: AtomicBool,
    notify: Notify,
}

impl Gate {
    fn release(&self) {
        self.released.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    async fn wait(&self) {
        loop {
            let notified = self.notify.notified();
            if self.released.load(Ordering::Acquire) {
                return;
            }
            notified.await;
        }
    }
}

struct Inner {
    buffer: Buffer<Control>,
    queue: Deque,
    closed: bool,
    consumer_waiting: bool,
    /// Count of queued messages that are responses to peer actions. The
    /// gate exists iff the count has reached the high-water mark since the
    /// last matching dequeue.
    transport_response_frames: usize,
}

/// The funnel through which every writer-affecting event reaches the write
/// loop.
///
/// Any task may `put`; exactly one task `get`s. Producers of
/// peer-response messages (typically the transport reader) call
/// [`throttle`] first, which blocks while too many such messages are
/// queued.
///
/// [`throttle`]: ControlBuffer::throttle
pub struct ControlBuffer {
    /// Capacity-1 wake-up channel for the consumer.
    notify: Notify,
    done: CancellationToken,
    /// Readable without the lock on the producer fast path; installed and
    /// torn down under the lock.
    trf_gate: ArcSwapOption<Gate>,
    inner: Mutex<Inner>,
}

impl ControlBuffer {
    #[must_use]
    pub fn new(done: CancellationToken) -> Self {
        Self {
            notify: Notify::new(),
            done,
            trf_gate: ArcSwapOption::const_empty(),
            inner: Mutex::new(Inner {
                buffer: Buffer::new(),
                queue: Deque::new(),
                closed: false,
                consumer_waiting: false,
                transport_response_frames: 0,
            }),
        }
    }

    /// Block while there are too many queued peer-response messages.
    ///
    /// Returns when the backlog drains or the done signal fires.
    pub async fn throttle(&self) {
        if let Some(gate) = self.trf_gate.load_full() {
            tokio::select! {
                _ = gate.wait() => {}
                _ = self.done.cancelled() => {}
            }
        }
    }

    /// Append a message and wake the consumer if it is parked.
    pub fn put(&self, item: Control) -> Result<(), Error> {
        self.execute_and_put(None::<fn(&Control) -> bool>, item)
            .map(|_| ())
    }

    /// Atomically evaluate `f` against the message and enqueue only if it
    /// returns true. Returns whether the message was accepted.
    pub fn execute_and_put<F>(&self, f: Option<F>, item: Control) -> Result<bool, Error>
    where
        F: FnOnce(&Control) -> bool,
    {
        let mut wake_up = false;
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.closed {
                return Err(Error::ConnClosing);
            }
            if let Some(f) = f {
                if !f(&item) {
                    // The predicate refused the message.
                    return Ok(false);
                }
            }
            if inner.consumer_waiting {
                wake_up = true;
                inner.consumer_waiting = false;
            }
            let throttled = item.is_transport_response_frame();
            let Inner { buffer, queue, .. } = &mut *inner;
            queue.push_back(buffer, item);
            if throttled {
                inner.transport_response_frames += 1;
                if inner.transport_response_frames == MAX_QUEUED_TRANSPORT_RESPONSE_FRAMES {
                    // This message put us over the threshold; install a
                    // fresh gate.
                    self.trf_gate.store(Some(Arc::new(Gate::default())));
                }
            }
        }
        if wake_up {
            self.notify.notify_one();
        }
        Ok(true)
    }

    /// Run `f` under the buffer's lock without enqueuing anything, for
    /// state observations that must be linearized with puts.
    pub fn execute<T, F>(&self, f: F, arg: T) -> Result<bool, Error>
    where
        F: FnOnce(T) -> bool,
    {
        let inner = self.inner.lock().unwrap();
        if inner.closed {
            return Err(Error::ConnClosing);
        }
        Ok(f(arg))
    }

    /// Dequeue one message, waiting until one is available or the done
    /// signal fires.
    pub async fn get(&self) -> Result<Control, Error> {
        loop {
            {
                let mut inner = self.inner.lock().unwrap();
                if inner.closed {
                    return Err(Error::ConnClosing);
                }
                if let Some(item) = self.dequeue(&mut inner) {
                    return Ok(item);
                }
                inner.consumer_waiting = true;
            }
            tokio::select! {
                _ = self.notify.notified() => {}
                _ = self.done.cancelled() => return Err(Error::ConnClosing),
            }
        }
    }

    /// Dequeue one message if any is queued.
    pub fn try_get(&self) -> Result<Option<Control>, Error> {
        let mut inner = self.inner.lock().unwrap();
        if inner.closed {
            return Err(Error::ConnClosing);
        }
        Ok(self.dequeue(&mut inner))
    }

    fn dequeue(&self, inner: &mut Inner) -> Option<Control> {
        let Inner { buffer, queue, .. } = &mut *inner;
        let item = queue.pop_front(buffer)?;
        if item.is_transport_response_frame() {
            if inner.transport_response_frames == MAX_QUEUED_TRANSPORT_RESPONSE_FRAMES {
                // We are removing the message that put us over the
                // threshold; release and clear the gate.
                if let Some(gate) = self.trf_gate.swap(None) {
                    gate.release();
                }
            }
            inner.transport_response_frames -= 1;
        }
        Some(item)
    }

    /// Transition to the terminal state: reject all future puts, orphan any
    /// pending client HEADERS, release the gate.
    ///
    /// Calling this twice is a no-op the second time.
    pub fn finish(&self) {
        let mut inner = self.inner.lock().unwrap();
        if inner.closed {
            return;
        }
        inner.closed = true;

        // There may be headers for streams the transport is not yet aware
        // of; their submitters must hear about the shutdown.
        let Inner { buffer, queue, .. } = &mut *inner;
        while let Some(item) = queue.pop_front(buffer) {
            if let Control::Headers(h) = item {
                if let Some(on_orphaned) = h.on_orphaned {
                    on_orphaned(Error::ConnClosing);
                }
            }
        }

        // A producer may be parked in throttle(); unblock it, or the
        // transport may never finish closing.
        if let Some(gate) = self.trf_gate.swap(None) {
            gate.release();
        }
    }

    #[cfg(test)]
    pub(crate) fn transport_response_frames(&self) -> usize {
        self.inner.lock().unwrap().transport_response_frames
    }
}

impl fmt::Debug for ControlBuffer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ControlBuffer").finish_non_exhaustive()
    }
}

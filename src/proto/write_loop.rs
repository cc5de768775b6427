use std::cmp;
use std::sync::Arc;

use bytes::{Buf, BytesMut};
use tokio::io::AsyncWrite;

use crate::codec::Framer;
use crate::error::Error;
use crate::frame::{self, Setting, SettingId, StreamId};
use crate::hpack;

use super::Side;
use super::bdp::BdpEstimator;
use super::buffer::Buffer;
use super::control::{
    CleanupStream, Control, ControlBuffer, DataFrame, GoAway, HeaderFrame, IncomingGoAway,
    IncomingSettings, IncomingWindowUpdate, OnWriteFn, OutFlowControlSizeRequest,
    OutgoingSettings, OutgoingWindowUpdate, Ping, RegisterStream,
};
use super::store::{ActiveStreams, OutStream, OutStreamState, Store, StreamItem};

/// Don't bother flushing batches smaller than this unless the connection
/// has gone quiet twice in a row.
const MIN_BATCH_SIZE: usize = 1000;

/// Events the write loop reports to the owning transport.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MuxEvent {
    /// An outgoing GOAWAY was handled.
    GoAway,
}

/// Sink for [`MuxEvent`] notifications.
pub trait EventSink: Send + Sync {
    fn mux_event(&self, event: MuxEvent);
}

/// Side-specific handler for outgoing GOAWAY: writes whatever frames the
/// side calls for and returns the new draining flag.
pub type GoAwayHandler<T> =
    Box<dyn FnMut(&mut Framer<T>, &GoAway) -> Result<bool, Error> + Send>;

/// The single consumer of the control buffer.
///
/// Each message is handled individually; most of the work goes into DATA.
/// The loop keeps a list of active streams, each with its own queue of
/// pending items, and serves them one DATA frame per stream per turn:
/// round-robin scheduling, capped by the frame size and by stream- and
/// connection-level flow control.
///
/// Everything the loop mutates (the stream store, the active list, the
/// flow-control counters, the HPACK encoder, the framer buffer) is owned
/// by this one task. All cross-task communication goes through the control
/// buffer.
pub struct WriteLoop<T> {
    side: Side,
    cbuf: Arc<ControlBuffer>,
    /// Connection-level send credit.
    send_quota: u32,
    /// Outbound initial window size: the per-stream send window the peer
    /// advertised.
    oiws: u32,
    streams: Store,
    active_streams: ActiveStreams,
    /// Pool backing every stream's item queue.
    items: Buffer<StreamItem>,
    framer: Framer<T>,
    /// Scratch buffer for HPACK encoding.
    hbuf: BytesMut,
    henc: hpack::Encoder,
    bdp_est: Option<Arc<BdpEstimator>>,
    draining: bool,
    max_frame_size: u32,
    goaway_handler: Option<GoAwayHandler<T>>,
    event_sink: Option<Arc<dyn EventSink>>,
}

impl<T> WriteLoop<T> {
    pub fn new(
        side: Side,
        framer: Framer<T>,
        cbuf: Arc<ControlBuffer>,
        max_frame_size: u32,
    ) -> Self {
        Self {
            side,
            cbuf,
            send_quota: frame::DEFAULT_INITIAL_WINDOW_SIZE,
            oiws: frame::DEFAULT_INITIAL_WINDOW_SIZE,
            streams: Store::new(),
            active_streams: ActiveStreams::new(),
            items: Buffer::new(),
            framer,
            hbuf: BytesMut::new(),
            henc: hpack::Encoder::new(),
            bdp_est: None,
            draining: false,
            max_frame_size,
            goaway_handler: None,
            event_sink: None,
        }
    }

    pub fn set_bdp_estimator(&mut self, est: Arc<BdpEstimator>) {
        self.bdp_est = Some(est);
    }

    pub fn set_goaway_handler(&mut self, handler: GoAwayHandler<T>) {
        self.goaway_handler = Some(handler);
    }

    pub fn set_event_sink(&mut self, sink: Arc<dyn EventSink>) {
        self.event_sink = Some(sink);
    }

    // ===== dispatch =====

    fn handle(&mut self, item: Control) -> Result<(), Error> {
        match item {
            Control::RegisterStream(r) => self.register_stream(r),
            Control::Headers(h) => self.handle_headers(h),
            Control::CleanupStream(c) => self.handle_cleanup(c),
            Control::Data(d) => self.preprocess_data(d),
            Control::IncomingWindowUpdate(w) => self.handle_incoming_window_update(w),
            Control::OutgoingWindowUpdate(w) => self.handle_outgoing_window_update(w),
            Control::IncomingSettings(s) => self.handle_incoming_settings(s),
            Control::OutgoingSettings(s) => self.handle_outgoing_settings(s),
            Control::IncomingGoAway(g) => self.handle_incoming_goaway(g),
            Control::GoAway(g) => self.handle_goaway(g),
            Control::Ping(p) => self.handle_ping(p),
            Control::OutFlowControlSizeRequest(o) => self.handle_out_flow_control_size_request(o),
        }
    }

    // ===== stream registration =====

    fn register_stream(&mut self, r: RegisterStream) -> Result<(), Error> {
        self.streams
            .insert(OutStream::new(r.stream_id, Some(r.wq)));
        Ok(())
    }

    // ===== HEADERS =====

    fn handle_headers(&mut self, h: HeaderFrame) -> Result<(), Error> {
        // Odd ids are client-initiated, so on the server these HEADERS
        // answer a peer stream; everything else originates a stream here.
        if self.side == Side::Server && h.stream_id % 2 == 1 {
            let Some(key) = self.streams.key_of(h.stream_id) else {
                tracing::warn!("HEADERS for unrecognized stream {:?}", h.stream_id);
                return Ok(());
            };

            // The server is responding on an accepted stream.
            if !h.end_stream {
                return self.write_header(h.stream_id, h.end_stream, h.fields, h.on_write);
            }

            // The server wants to close the stream.
            if self.streams[key].state != OutStreamState::Empty {
                // DATA is still pending; these headers are trailers and go
                // out behind it.
                self.streams[key]
                    .queue
                    .push_back(&mut self.items, StreamItem::Trailers(h));
                return Ok(());
            }

            self.write_header(h.stream_id, h.end_stream, h.fields, h.on_write)?;
            if let Some(cleanup) = h.cleanup {
                return self.handle_cleanup(cleanup);
            }
            return Ok(());
        }

        // The client originates a stream.
        let stream = OutStream::new(h.stream_id, h.wq);
        if let Some(init_stream) = h.init_stream {
            if let Err(err) = init_stream(h.stream_id) {
                if err.is_conn_closing() {
                    return Err(err);
                }
                // A stream-level refusal; the submitter's own callback
                // cleans up, the connection stays healthy.
                tracing::debug!("stream {:?} refused: {}", h.stream_id, err);
                return Ok(());
            }
        }
        self.write_header(h.stream_id, h.end_stream, h.fields, h.on_write)?;
        self.streams.insert(stream);
        Ok(())
    }

    /// Encode the header block and emit it as HEADERS plus as many
    /// CONTINUATION frames as the max frame size requires.
    fn write_header(
        &mut self,
        stream_id: StreamId,
        end_stream: bool,
        fields: Vec<hpack::HeaderField>,
        on_write: Option<OnWriteFn>,
    ) -> Result<(), Error> {
        if let Some(on_write) = on_write {
            on_write();
        }

        self.hbuf.clear();
        for field in &fields {
            self.henc.encode_field(field, &mut self.hbuf);
        }

        let mut first = true;
        loop {
            let end_headers = self.hbuf.len() <= self.max_frame_size as usize;
            let size = cmp::min(self.hbuf.len(), self.max_frame_size as usize);
            let fragment = self.hbuf.split_to(size);

            if first {
                first = false;
                self.framer
                    .write_headers(stream_id, &fragment, end_stream, end_headers)?;
            } else {
                self.framer
                    .write_continuation(stream_id, end_headers, &fragment)?;
            }

            if end_headers {
                return Ok(());
            }
        }
    }

    // ===== DATA =====

    /// Queue payload bytes on their stream and activate it if idle. The
    /// bytes hit the wire from `process_data`.
    fn preprocess_data(&mut self, d: DataFrame) -> Result<(), Error> {
        let Some(key) = self.streams.key_of(d.stream_id) else {
            return Ok(());
        };

        // Data for a stream means the stream was originated and its
        // headers already went out.
        let stream = &mut self.streams[key];
        stream.queue.push_back(&mut self.items, StreamItem::Data(d));
        if stream.state == OutStreamState::Empty {
            stream.state = OutStreamState::Active;
            self.active_streams.push_back(&mut self.streams, key);
        }
        Ok(())
    }

    /// Serve the stream at the front of the active list: write at most one
    /// DATA frame, capped by the max frame size and by stream- and
    /// connection-level flow control, then reschedule the stream.
    ///
    /// Returns true if no progress is possible (nothing active, or the
    /// connection-level window is exhausted) so the caller can park.
    fn process_data(&mut self) -> Result<bool, Error> {
        if self.send_quota == 0 {
            return Ok(true);
        }

        let Some(key) = self.active_streams.pop_front(&mut self.streams) else {
            return Ok(true);
        };

        let oiws = self.oiws as i64;
        let stream = &mut self.streams[key];
        let stream_id = stream.id;

        // The head of an active stream's queue is always DATA: HEADERS are
        // serialized straight from their handler, and trailers are
        // promoted only once the queue drains.
        let Some(StreamItem::Data(item)) = stream.queue.front_mut(&mut self.items) else {
            unreachable!("active stream queue must start with DATA");
        };

        let data_size = item.data.len();

        if data_size == 0 {
            // A bare END_STREAM marker (or a no-op write). It consumes no
            // flow-control quota.
            let end_stream = item.end_stream;
            self.framer.write_data(stream_id, end_stream, &[])?;

            match stream.queue.pop_front(&mut self.items) {
                Some(StreamItem::Data(d)) => {
                    if let Some(on_done) = d.on_done {
                        on_done();
                    }
                }
                _ => unreachable!(),
            }

            return self.reschedule(key, false).map(|()| false);
        }

        // Stream-level flow control.
        let stream_quota = oiws - stream.bytes_outstanding;
        if stream_quota <= 0 {
            stream.state = OutStreamState::WaitingOnStreamQuota;
            return Ok(false);
        }

        let mut max_size = self.max_frame_size as usize;
        max_size = cmp::min(max_size, stream_quota as usize);
        // Connection-level flow control.
        max_size = cmp::min(max_size, self.send_quota as usize);

        let size = cmp::min(max_size, data_size);

        // Outgoing flow control is settled; pay the producer back now.
        if let Some(wq) = &stream.wq {
            wq.replenish(size);
        }

        // Last item on the stream and all of it fits this frame.
        let end_stream = item.end_stream && data_size <= size;

        if let Some(on_each_write) = item.on_each_write.as_mut() {
            on_each_write();
        }

        self.framer
            .write_data(stream_id, end_stream, &item.data[..size])?;
        item.data.advance(size);

        stream.bytes_outstanding += size as i64;
        self.send_quota -= size as u32;

        if item.data.is_empty() {
            match stream.queue.pop_front(&mut self.items) {
                Some(StreamItem::Data(d)) => {
                    if let Some(on_done) = d.on_done {
                        on_done();
                    }
                }
                _ => unreachable!(),
            }
        }

        self.reschedule(key, true)?;
        Ok(false)
    }

    /// Decide where a just-served stream goes: idle, trailers-then-gone,
    /// parked on stream quota, or back to the end of the round-robin.
    fn reschedule(&mut self, key: usize, check_window: bool) -> Result<(), Error> {
        let next_is_trailers = {
            let stream = &mut self.streams[key];
            if stream.queue.is_empty() {
                stream.state = OutStreamState::Empty;
                return Ok(());
            }
            matches!(
                stream.queue.front_mut(&mut self.items),
                Some(StreamItem::Trailers(_))
            )
        };

        if next_is_trailers {
            let trailers = match self.streams[key].queue.pop_front(&mut self.items) {
                Some(StreamItem::Trailers(h)) => h,
                _ => unreachable!(),
            };
            self.write_header(
                trailers.stream_id,
                trailers.end_stream,
                trailers.fields,
                trailers.on_write,
            )?;
            if let Some(cleanup) = trailers.cleanup {
                self.handle_cleanup(cleanup)?;
            }
            return Ok(());
        }

        let stream = &mut self.streams[key];
        if check_window && self.oiws as i64 - stream.bytes_outstanding <= 0 {
            // Out of stream quota; an incoming window update re-activates.
            stream.state = OutStreamState::WaitingOnStreamQuota;
            return Ok(());
        }

        self.active_streams.push_back(&mut self.streams, key);
        Ok(())
    }

    // ===== window updates =====

    fn handle_incoming_window_update(&mut self, w: IncomingWindowUpdate) -> Result<(), Error> {
        // Connection-level grant.
        if w.stream_id == 0 {
            self.send_quota += w.increment;
            return Ok(());
        }

        let Some(key) = self.streams.key_of(w.stream_id) else {
            return Ok(());
        };
        let activate = {
            let stream = &mut self.streams[key];
            stream.bytes_outstanding -= w.increment as i64;
            self.oiws as i64 - stream.bytes_outstanding > 0
                && stream.state == OutStreamState::WaitingOnStreamQuota
        };
        if activate {
            self.streams[key].state = OutStreamState::Active;
            self.active_streams.push_back(&mut self.streams, key);
        }
        Ok(())
    }

    fn handle_outgoing_window_update(&mut self, w: OutgoingWindowUpdate) -> Result<(), Error> {
        self.framer.write_window_update(w.stream_id, w.increment)
    }

    // ===== settings =====

    fn handle_incoming_settings(&mut self, s: IncomingSettings) -> Result<(), Error> {
        self.apply_settings(&s.settings);
        self.framer.write_settings_ack()
    }

    fn handle_outgoing_settings(&mut self, s: OutgoingSettings) -> Result<(), Error> {
        self.framer.write_settings(&s.settings)
    }

    fn apply_settings(&mut self, settings: &[Setting]) {
        for setting in settings {
            match setting.id {
                SettingId::InitialWindowSize => {
                    let old = self.oiws;
                    self.oiws = setting.value;
                    if old < self.oiws {
                        // The larger window may reopen every parked stream.
                        for key in self.streams.keys() {
                            if self.streams[key].state == OutStreamState::WaitingOnStreamQuota {
                                self.streams[key].state = OutStreamState::Active;
                                self.active_streams.push_back(&mut self.streams, key);
                            }
                        }
                    }
                }
                SettingId::HeaderTableSize => {
                    self.henc.update_max_size(setting.value as usize);
                }
                _ => {}
            }
        }
    }

    // ===== ping =====

    fn handle_ping(&mut self, p: Ping) -> Result<(), Error> {
        if !p.ack {
            if let Some(bdp_est) = &self.bdp_est {
                bdp_est.timesnap(p.data);
            }
        }
        self.framer.write_ping(p.ack, p.data)
    }

    // ===== cleanup / GOAWAY =====

    fn handle_cleanup(&mut self, c: CleanupStream) -> Result<(), Error> {
        if let Some(on_write) = c.on_write {
            on_write();
        }

        // The stream may not be established: a trailers-only response, or
        // an RST before initialization.
        if let Some(key) = self.streams.key_of(c.stream_id) {
            self.active_streams.remove(&mut self.streams, key);
            while self.streams[key]
                .queue
                .pop_front(&mut self.items)
                .is_some()
            {}
            self.streams.remove(c.stream_id);
        }

        if c.rst {
            self.framer.write_rst_stream(c.stream_id, c.rst_code)?;
        }

        if self.side == Side::Client && self.draining && self.streams.is_empty() {
            return Err(Error::ConnClosing);
        }
        Ok(())
    }

    fn handle_incoming_goaway(&mut self, _g: IncomingGoAway) -> Result<(), Error> {
        if self.side == Side::Client {
            self.draining = true;
            if self.streams.is_empty() {
                return Err(Error::ConnClosing);
            }
        }
        Ok(())
    }

    fn handle_goaway(&mut self, g: GoAway) -> Result<(), Error> {
        // What an outgoing GOAWAY means is very specific to the side; the
        // handler emits the frames and decides whether we drain.
        if let Some(handler) = self.goaway_handler.as_mut() {
            self.draining = handler(&mut self.framer, &g)?;
        }
        if let Some(sink) = &self.event_sink {
            sink.mux_event(MuxEvent::GoAway);
        }
        Ok(())
    }

    // ===== flow-control introspection =====

    fn handle_out_flow_control_size_request(
        &mut self,
        o: OutFlowControlSizeRequest,
    ) -> Result<(), Error> {
        // The requester may have given up; that is its problem.
        let _ = o.resp.send(self.send_quota);
        Ok(())
    }
}

impl<T: AsyncWrite + Unpin> WriteLoop<T> {
    /// Drive the loop until shutdown or a connection-fatal error.
    ///
    /// An orderly shutdown surfaces internally as `ConnClosing` and is
    /// returned as `Ok(())`.
    pub async fn run(mut self) -> Result<(), Error> {
        match self.run_inner().await {
            Err(err) if err.is_conn_closing() => Ok(()),
            res => res,
        }
    }

    async fn run_inner(&mut self) -> Result<(), Error> {
        loop {
            let item = self.cbuf.get().await?;
            self.handle(item)?;
            self.process_data()?;

            let mut yielded = false;
            loop {
                // Keep memory bounded on long bursts; the underlying
                // buffer would otherwise grow with the peer's window.
                if self.framer.should_flush() {
                    self.framer.flush().await?;
                }

                if let Some(item) = self.cbuf.try_get()? {
                    self.handle(item)?;
                    self.process_data()?;
                    continue;
                }

                if !self.process_data()? {
                    continue;
                }

                if !yielded {
                    yielded = true;
                    if self.framer.offset() < MIN_BATCH_SIZE {
                        // Give producers one chance to top up the batch
                        // before paying for the write.
                        tokio::task::yield_now().await;
                        continue;
                    }
                }

                self.framer.flush().await?;
                break;
            }
        }
    }
}

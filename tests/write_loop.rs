mod support;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use h2mux::codec::Framer;
use h2mux::frame::{self, Reason};
use h2mux::hpack::HeaderField;
use h2mux::proto::{
    CleanupStream, Control, ControlBuffer, DataFrame, HeaderFrame, IncomingGoAway,
    IncomingSettings, RegisterStream, WriteQuota,
};
use h2mux::{Side, WriteLoop};

use support::{mock, DATA, END_HEADERS, END_STREAM, HEADERS, SETTINGS};

struct Mux {
    cbuf: Arc<ControlBuffer>,
    done: CancellationToken,
    handle: support::Handle,
    task: tokio::task::JoinHandle<Result<(), h2mux::Error>>,
}

fn start(side: Side) -> Mux {
    let done = CancellationToken::new();
    let cbuf = Arc::new(ControlBuffer::new(done.clone()));
    let (io, handle) = mock();
    let wl = WriteLoop::new(
        side,
        Framer::new(io),
        cbuf.clone(),
        frame::DEFAULT_MAX_FRAME_SIZE,
    );
    let task = tokio::spawn(wl.run());
    Mux {
        cbuf,
        done,
        handle,
        task,
    }
}

fn write_quota(done: &CancellationToken) -> Arc<WriteQuota> {
    Arc::new(WriteQuota::new(
        frame::DEFAULT_INITIAL_WINDOW_SIZE,
        done.clone(),
    ))
}

fn request_headers(stream_id: u32) -> HeaderFrame {
    HeaderFrame::new(
        stream_id,
        vec![
            HeaderField::new(":method", "GET"),
            HeaderField::new(":path", "/"),
        ],
        false,
    )
}

#[tokio::test(flavor = "multi_thread")]
async fn server_sends_trailers_after_all_pending_data() {
    let mux = start(Side::Server);

    mux.cbuf
        .put(Control::RegisterStream(RegisterStream {
            stream_id: 1,
            wq: write_quota(&mux.done),
        }))
        .unwrap();
    mux.cbuf
        .put(Control::Data(DataFrame::new(
            1,
            Bytes::from(vec![0x61; 1000]),
            false,
        )))
        .unwrap();

    let mut trailers =
        HeaderFrame::new(1, vec![HeaderField::new("grpc-status", "0")], true);
    trailers.cleanup = Some(CleanupStream {
        stream_id: 1,
        rst: false,
        rst_code: Reason::NO_ERROR,
        on_write: None,
    });
    mux.cbuf.put(Control::Headers(trailers)).unwrap();

    let frames = mux.handle.frames_written(2).await;
    assert_eq!(frames[0].kind, DATA);
    assert_eq!(frames[0].payload.len(), 1000);
    assert_eq!(frames[0].flags & END_STREAM, 0);
    assert_eq!(frames[1].kind, HEADERS);
    assert_eq!(frames[1].flags, END_STREAM | END_HEADERS);

    mux.done.cancel();
    assert!(mux.task.await.unwrap().is_ok());
}

#[tokio::test(flavor = "multi_thread")]
async fn client_drains_after_goaway_and_last_cleanup() {
    let mux = start(Side::Client);

    for id in [1u32, 3] {
        mux.cbuf.put(Control::Headers(request_headers(id))).unwrap();
    }

    // Both requests go out before the peer's GOAWAY arrives.
    mux.handle.frames_written(2).await;

    mux.cbuf
        .put(Control::IncomingGoAway(IncomingGoAway {}))
        .unwrap();

    for id in [1u32, 3] {
        mux.cbuf
            .put(Control::CleanupStream(CleanupStream {
                stream_id: id,
                rst: false,
                rst_code: Reason::NO_ERROR,
                on_write: None,
            }))
            .unwrap();
    }

    // The loop exits on its own once the last stream is cleaned up, and
    // the drain is reported as a normal shutdown.
    let res = timeout(Duration::from_secs(5), mux.task)
        .await
        .expect("write loop did not drain")
        .unwrap();
    assert!(res.is_ok());

    let frames = mux.handle.frames();
    assert_eq!(frames.iter().filter(|f| f.kind == HEADERS).count(), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn incoming_settings_are_acked_in_order() {
    let mux = start(Side::Server);

    mux.cbuf
        .put(Control::IncomingSettings(IncomingSettings {
            settings: Vec::new(),
        }))
        .unwrap();

    let frames = mux.handle.frames_written(1).await;
    assert_eq!(frames[0].kind, SETTINGS);
    assert_eq!(frames[0].flags, support::ACK);
    assert!(frames[0].payload.is_empty());

    mux.done.cancel();
    assert!(mux.task.await.unwrap().is_ok());
}

#[tokio::test(flavor = "multi_thread")]
async fn reader_throttle_releases_as_the_loop_catches_up() {
    let done = CancellationToken::new();
    let cbuf = Arc::new(ControlBuffer::new(done.clone()));

    // Fill the buffer with peer-response work while no consumer runs.
    for _ in 0..50 {
        cbuf.put(Control::IncomingSettings(IncomingSettings {
            settings: Vec::new(),
        }))
        .unwrap();
    }

    let throttled = {
        let cbuf = cbuf.clone();
        tokio::spawn(async move { cbuf.throttle().await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!throttled.is_finished(), "51st producer must be throttled");

    // Start the consumer; the backlog drains and the producer resumes.
    let (io, handle) = mock();
    let wl = WriteLoop::new(
        Side::Server,
        Framer::new(io),
        cbuf.clone(),
        frame::DEFAULT_MAX_FRAME_SIZE,
    );
    let task = tokio::spawn(wl.run());

    timeout(Duration::from_secs(5), throttled)
        .await
        .expect("throttle never released")
        .unwrap();

    handle.frames_written(50).await;

    done.cancel();
    assert!(task.await.unwrap().is_ok());
}

#[tokio::test(flavor = "multi_thread")]
async fn finish_orphans_headers_that_never_made_it_out() {
    let done = CancellationToken::new();
    let cbuf = Arc::new(ControlBuffer::new(done.clone()));
    let orphaned = Arc::new(AtomicUsize::new(0));

    let mut headers = request_headers(1);
    let counter = orphaned.clone();
    headers.on_orphaned = Some(Box::new(move |err| {
        assert!(err.is_conn_closing());
        counter.fetch_add(1, Ordering::SeqCst);
    }));
    cbuf.put(Control::Headers(headers)).unwrap();

    cbuf.finish();
    assert_eq!(orphaned.load(Ordering::SeqCst), 1);

    // Terminal: new work is refused.
    let err = cbuf
        .put(Control::IncomingGoAway(IncomingGoAway {}))
        .unwrap_err();
    assert!(err.is_conn_closing());
}

#[tokio::test(flavor = "multi_thread")]
async fn producer_quota_follows_wire_progress() {
    let mux = start(Side::Server);
    let wq = write_quota(&mux.done);

    mux.cbuf
        .put(Control::RegisterStream(RegisterStream {
            stream_id: 1,
            wq: wq.clone(),
        }))
        .unwrap();

    // Spend the whole producer window, then go into debt.
    wq.get(frame::DEFAULT_INITIAL_WINDOW_SIZE).await.unwrap();
    let blocked = {
        let wq = wq.clone();
        tokio::spawn(async move { wq.get(1).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(!blocked.is_finished());

    // Once the loop writes the bytes, the credit comes back.
    mux.cbuf
        .put(Control::Data(DataFrame::new(
            1,
            Bytes::from(vec![0; frame::DEFAULT_INITIAL_WINDOW_SIZE as usize]),
            false,
        )))
        .unwrap();

    timeout(Duration::from_secs(5), blocked)
        .await
        .expect("producer never got credit back")
        .unwrap()
        .unwrap();

    mux.done.cancel();
    assert!(mux.task.await.unwrap().is_ok());
}

mod properties {
    use super::*;
    use quickcheck::quickcheck;

    quickcheck! {
        /// Messages come out in exactly the order they went in.
        fn control_buffer_is_fifo(ids: Vec<u32>) -> bool {
            let ids: Vec<u32> = ids.into_iter().map(|id| id & (u32::MAX >> 1)).collect();
            let cbuf = ControlBuffer::new(CancellationToken::new());
            for &id in &ids {
                cbuf.put(Control::Data(DataFrame::new(id, Bytes::new(), false)))
                    .unwrap();
            }

            let mut out = Vec::new();
            while let Some(item) = cbuf.try_get().unwrap() {
                match item {
                    Control::Data(d) => out.push(d.stream_id),
                    _ => return false,
                }
            }
            out == ids
        }
    }
}

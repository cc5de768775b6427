use std::sync::Mutex;
use std::time::Instant;

/// The 8-byte payload that marks a bandwidth-probing PING.
pub const BDP_PING_DATA: [u8; 8] = [2, 4, 16, 16, 9, 14, 7, 7];

/// Stop growing the estimate past this many bytes.
const BDP_LIMIT: u32 = (1 << 20) * 16;

/// EWMA weight of a new RTT sample once warmed up.
const ALPHA: f64 = 0.9;

/// Grow the window only while a sample covers at least this share of the
/// current estimate.
const BETA: f64 = 0.66;

/// Window growth factor on a qualifying sample.
const GAMMA: f64 = 2.0;

/// Estimates the connection's bandwidth-delay product by timing special
/// PING frames against the bytes that arrive between ping and ack.
///
/// The write loop stamps the send time ([`timesnap`]); the read side feeds
/// received bytes ([`add_bytes`]) and closes a sample when the ack comes
/// back ([`calculate`]). Both sides share one estimator behind an `Arc`.
///
/// [`timesnap`]: BdpEstimator::timesnap
/// [`add_bytes`]: BdpEstimator::add_bytes
/// [`calculate`]: BdpEstimator::calculate
pub struct BdpEstimator {
    inner: Mutex<Inner>,

    /// Called with the new estimate when the window should grow.
    update_window: Box<dyn Fn(u32) + Send + Sync>,
}

struct Inner {
    /// When the probing ping was written out.
    sent_at: Option<Instant>,
    /// Current bandwidth-delay product estimate.
    bdp: u32,
    /// Bytes received between the probing ping and its ack.
    sample: u32,
    /// Largest bandwidth observed so far, bytes/sec.
    bw_max: f64,
    /// A probing ping is in flight.
    is_sent: bool,
    /// Number of completed samples.
    sample_count: u64,
    /// Smoothed round-trip time, seconds.
    rtt: f64,
}

impl BdpEstimator {
    pub fn new(update_window: Box<dyn Fn(u32) + Send + Sync>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                sent_at: None,
                bdp: crate::frame::DEFAULT_INITIAL_WINDOW_SIZE,
                sample: 0,
                bw_max: 0.0,
                is_sent: false,
                sample_count: 0,
                rtt: 0.0,
            }),
            update_window,
        }
    }

    /// Record the send time of an outgoing probing ping.
    ///
    /// Pings with any other payload are ignored.
    pub fn timesnap(&self, data: [u8; 8]) {
        if data != BDP_PING_DATA {
            return;
        }
        let mut inner = self.inner.lock().unwrap();
        inner.sent_at = Some(Instant::now());
    }

    /// Account `n` received bytes toward the current sample.
    ///
    /// Returns true if a new probing ping should be sent for this batch.
    pub fn add_bytes(&self, n: u32) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if inner.bdp == BDP_LIMIT {
            return false;
        }
        if !inner.is_sent {
            inner.is_sent = true;
            inner.sample = n;
            inner.sent_at = None;
            inner.sample_count += 1;
            return true;
        }
        inner.sample += n;
        false
    }

    /// Close the sample opened by the probing ping whose ack just arrived.
    pub fn calculate(&self, data: [u8; 8]) {
        if data != BDP_PING_DATA {
            return;
        }
        let mut inner = self.inner.lock().unwrap();
        let Some(sent_at) = inner.sent_at else {
            return;
        };

        let rtt_sample = sent_at.elapsed().as_secs_f64();
        if inner.sample_count < 10 {
            // Bootstrap with a running average before switching to EWMA.
            inner.rtt += (rtt_sample - inner.rtt) / inner.sample_count.max(1) as f64;
        } else {
            inner.rtt += (rtt_sample - inner.rtt) * ALPHA;
        }
        inner.is_sent = false;

        // The sample accumulated over roughly 1.5 RTTs.
        let bw_current = inner.sample as f64 / (inner.rtt * 1.5);
        if bw_current > inner.bw_max {
            inner.bw_max = bw_current;
        }

        if inner.sample as f64 >= BETA * inner.bdp as f64
            && bw_current == inner.bw_max
            && inner.bdp != BDP_LIMIT
        {
            let bdp = (GAMMA * inner.sample as f64).min(BDP_LIMIT as f64) as u32;
            inner.bdp = bdp;
            drop(inner);
            (self.update_window)(bdp);
        }
    }
}

impl std::fmt::Debug for BdpEstimator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BdpEstimator").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn timesnap_ignores_other_payloads() {
        let est = BdpEstimator::new(Box::new(|_| {}));
        est.timesnap([0; 8]);
        assert!(est.inner.lock().unwrap().sent_at.is_none());

        est.timesnap(BDP_PING_DATA);
        assert!(est.inner.lock().unwrap().sent_at.is_some());
    }

    #[test]
    fn first_bytes_of_a_batch_request_a_ping() {
        let est = BdpEstimator::new(Box::new(|_| {}));
        assert!(est.add_bytes(100));
        assert!(!est.add_bytes(100));
        assert_eq!(est.inner.lock().unwrap().sample, 200);
    }

    #[test]
    fn large_sample_grows_the_window() {
        let grown = Arc::new(AtomicU32::new(0));
        let est = {
            let grown = grown.clone();
            BdpEstimator::new(Box::new(move |n| grown.store(n, Ordering::SeqCst)))
        };

        assert!(est.add_bytes(100_000));
        est.timesnap(BDP_PING_DATA);
        est.calculate(BDP_PING_DATA);

        assert_eq!(grown.load(Ordering::SeqCst), 200_000);
    }
}

use std::sync::atomic::{AtomicI32, Ordering};

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::error::Error;

/// Per-stream send credit for the application-side producer.
///
/// The producer spends credit with [`get`] before handing bytes to the
/// control buffer; the write loop pays it back with [`replenish`] as bytes
/// are actually serialized, so producer progress tracks wire progress.
///
/// Credit may go negative: `get` only requires a positive balance to
/// proceed, then subtracts the full request. That keeps a producer with a
/// large write from stalling forever behind the quota granularity.
///
/// [`get`]: WriteQuota::get
/// [`replenish`]: WriteQuota::replenish
#[derive(Debug)]
pub struct WriteQuota {
    quota: AtomicI32,
    notify: Notify,
    done: CancellationToken,
}

impl WriteQuota {
    #[must_use]
    pub fn new(quota: u32, done: CancellationToken) -> Self {
        Self {
            quota: AtomicI32::new(quota as i32),
            notify: Notify::new(),
            done,
        }
    }

    /// Acquire `sz` bytes of credit, waiting for a positive balance.
    ///
    /// Returns `Err(ConnClosing)` once the done signal fires.
    pub async fn get(&self, sz: u32) -> Result<(), Error> {
        loop {
            if self.quota.load(Ordering::Acquire) > 0 {
                self.quota.fetch_sub(sz as i32, Ordering::AcqRel);
                return Ok(());
            }

            let notified = self.notify.notified();
            if self.quota.load(Ordering::Acquire) > 0 {
                continue;
            }

            tokio::select! {
                _ = notified => {}
                _ = self.done.cancelled() => return Err(Error::ConnClosing),
            }
        }
    }

    /// Return `n` bytes of credit, waking a blocked producer exactly when
    /// the balance crosses back above zero.
    pub fn replenish(&self, n: usize) {
        let n = n as i32;
        let balance = self.quota.fetch_add(n, Ordering::AcqRel) + n;
        if balance > 0 && balance <= n {
            self.notify.notify_one();
        }
    }

    #[cfg(test)]
    pub(crate) fn balance(&self) -> i32 {
        self.quota.load(Ordering::Acquire)
    }
}

use std::time::Duration;

use tokio::{select, task::JoinHandle, time::sleep};
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

use crate::store::Store;

/// Background heartbeat keeping a held lease from expiring.
///
/// Renewal refreshes the key's ttl without checking that the stored value is
/// still this holder's owner token. If this holder's ttl lapsed and another
/// owner acquired the key in between, renewal extends the other owner's lease.
pub(super) struct Renewal {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl Renewal {
    pub(super) fn spawn<S: Store>(
        store: S,
        key: String,
        ttl: Duration,
        interval: Duration,
    ) -> Self {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(store, key, ttl, interval, cancel.clone()));
        Self { cancel, task }
    }

    /// Cancel renewal and wait for any in-flight refresh to finish.
    pub(super) async fn stop(self) {
        self.cancel.cancel();
        if let Err(err) = self.task.await {
            if err.is_panic() {
                warn!(?err, "renewal task panicked");
            }
        }
    }

    /// Cancel without waiting, for contexts that cannot await.
    pub(super) fn cancel(&self) {
        self.cancel.cancel();
    }
}

#[tracing::instrument(skip_all, fields(key = %key))]
async fn run<S: Store>(
    store: S,
    key: String,
    ttl: Duration,
    interval: Duration,
    cancel: CancellationToken,
) {
    loop {
        select! {
            _ = cancel.cancelled() => {
                return;
            }
            _ = sleep(interval) => {}
        }
        match store.refresh_expiry(&key, ttl).await {
            Ok(true) => trace!(%key, "renewed"),
            Ok(false) => warn!(%key, "lease key missing at renewal"),
            Err(err) => warn!(?err, %key, "renewal failed"),
        }
    }
}

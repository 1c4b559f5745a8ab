//! Core lease functionality

use std::{future::Future, sync::Arc, time::Duration};

use tokio::{runtime::Handle, select, sync::Mutex, time::sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    error::{Error, Result},
    signal::{Registration, SignalDispatch},
    store::Store,
};

use super::{owner::owner_token, renewal::Renewal, types::*};

/// Mutable state, shared between the caller and termination handling
struct Inner {
    state: LeaseState,

    /// Present only while the lease is held with renewal enabled
    renewal: Option<Renewal>,
}

struct Shared<S> {
    store: S,
    key: String,
    owner_token: String,
    config: LeaseConfig,
    inner: Mutex<Inner>,
}

impl<S: Store> Shared<S> {
    /// Release the lease if held.
    ///
    /// Renewal is stopped before the delete is issued. The lock is held
    /// throughout, so concurrent releases issue at most one delete.
    #[tracing::instrument(skip_all, fields(key = %self.key))]
    async fn release(&self) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        if let Some(renewal) = inner.renewal.take() {
            renewal.stop().await;
        }
        if inner.state != LeaseState::Held {
            return Ok(true);
        }
        inner.state = LeaseState::Released;

        let removed = self.store.delete(&self.key).await?;
        if removed {
            info!("released");
        } else {
            warn!("lease key already gone at release");
        }
        Ok(removed)
    }

    async fn release_logged(&self) {
        if let Err(err) = self.release().await {
            error!(?err, key = %self.key, "release failed");
        }
    }
}

/// Release `shared` from a context that cannot await.
fn spawn_release<S: Store>(shared: Arc<Shared<S>>) {
    match Handle::try_current() {
        Ok(handle) => {
            handle.spawn(async move { shared.release_logged().await });
        }
        Err(_) => {
            warn!(
                key = %shared.key,
                "no runtime to release lease; it will expire after its ttl"
            );
            if let Ok(inner) = shared.inner.try_lock() {
                if let Some(renewal) = &inner.renewal {
                    renewal.cancel();
                }
            }
        }
    }
}

/// A time-bounded exclusive claim on a named resource, held as a key in a
/// shared [`Store`].
///
/// While held, a background task refreshes the key's ttl every
/// [`LeaseConfig::heartbeat`]. On construction the lease registers with a
/// [`SignalDispatch`] so that dispatching it releases the lease; dropping a
/// held lease releases it in the background.
pub struct Lease<S: Store> {
    shared: Arc<Shared<S>>,
    _registration: Registration,
}

impl<S: Store> Lease<S> {
    /// Create a lease on `resource` owned by `owner`, released on termination
    /// through [`SignalDispatch::global`].
    ///
    /// The first lease created inside a tokio runtime starts the global
    /// termination listener ([`SignalDispatch::install_global`]). Outside a
    /// runtime nothing listens, and a termination signal leaves the key to
    /// expire after its ttl.
    pub fn new(store: S, resource: &str, owner: &str, config: LeaseConfig) -> Result<Self> {
        match SignalDispatch::install_global() {
            Ok(true) => {}
            Ok(false) => warn!("no runtime; termination signals will not release leases"),
            Err(err) => warn!(?err, "termination signals will not release leases"),
        }
        Self::with_dispatch(store, resource, owner, config, SignalDispatch::global())
    }

    /// Create a lease released on termination through `dispatch`.
    pub fn with_dispatch(
        store: S,
        resource: &str,
        owner: &str,
        config: LeaseConfig,
        dispatch: &SignalDispatch,
    ) -> Result<Self> {
        config.validate()?;
        let shared = Arc::new(Shared {
            store,
            key: config.key_for(resource),
            owner_token: owner_token(owner),
            config,
            inner: Mutex::new(Inner {
                state: LeaseState::Unheld,
                renewal: None,
            }),
        });

        let weak = Arc::downgrade(&shared);
        let registration = dispatch.register(move || {
            let weak = weak.clone();
            async move {
                if let Some(shared) = weak.upgrade() {
                    shared.release_logged().await;
                }
            }
        });

        Ok(Self {
            shared,
            _registration: registration,
        })
    }

    /// Namespaced store key.
    pub fn key(&self) -> &str {
        &self.shared.key
    }

    /// Value this lease writes to its key.
    pub fn owner_token(&self) -> &str {
        &self.shared.owner_token
    }

    pub fn config(&self) -> &LeaseConfig {
        &self.shared.config
    }

    pub async fn state(&self) -> LeaseState {
        self.shared.inner.lock().await.state
    }

    /// Owner token currently stored under the key, whoever wrote it.
    pub async fn holder(&self) -> Result<Option<String>> {
        Ok(self.shared.store.get(&self.shared.key).await?)
    }

    /// Attempt to acquire the lease once.
    ///
    /// Returns `Ok(false)` if another owner holds the key. Store failures are
    /// returned as errors and leave the state unchanged.
    #[tracing::instrument(skip_all, fields(key = %self.shared.key), err)]
    pub async fn try_acquire(&self) -> Result<bool> {
        let shared = &self.shared;
        let mut inner = shared.inner.lock().await;
        if inner.state == LeaseState::Held {
            return Err(Error::Reentrant {
                key: shared.key.clone(),
            });
        }

        let acquired = shared
            .store
            .try_set_with_expiry(&shared.key, &shared.owner_token, shared.config.ttl)
            .await?;
        if !acquired {
            debug!("contended");
            return Ok(false);
        }

        inner.state = LeaseState::Held;
        if shared.config.renews() {
            inner.renewal = Some(Renewal::spawn(
                shared.store.clone(),
                shared.key.clone(),
                shared.config.ttl,
                shared.config.heartbeat,
            ));
        }
        info!(owner = %shared.owner_token, "reserved");
        Ok(true)
    }

    /// Poll until the lease is acquired, sleeping `poll_interval` between
    /// attempts.
    ///
    /// There is no timeout; see [`Lease::acquire_blocking_until`] for a
    /// cancellable variant. Store failures end the wait immediately. A zero
    /// `poll_interval` is rejected.
    pub async fn acquire_blocking(&self, poll_interval: Duration) -> Result<()> {
        self.acquire_blocking_until(&CancellationToken::new(), poll_interval)
            .await
    }

    /// Like [`Lease::acquire_blocking`], giving up with [`Error::Cancelled`]
    /// once `cancel` fires.
    ///
    /// Cancellation is observed between attempts only; an attempt in flight
    /// always runs to completion. If that attempt wins after `cancel` fired,
    /// the lease is released again before returning.
    #[tracing::instrument(skip_all, fields(key = %self.shared.key), err)]
    pub async fn acquire_blocking_until(
        &self,
        cancel: &CancellationToken,
        poll_interval: Duration,
    ) -> Result<()> {
        if poll_interval.is_zero() {
            return Err(Error::InvalidConfig(
                "poll interval must be greater than zero",
            ));
        }
        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            if self.try_acquire().await? {
                if cancel.is_cancelled() {
                    debug!("cancelled during a winning attempt");
                    self.release().await?;
                    return Err(Error::Cancelled);
                }
                return Ok(());
            }
            select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                _ = sleep(poll_interval) => {}
            }
        }
    }

    /// Release the lease.
    ///
    /// Returns `Ok(true)` without touching the store if the lease is not held.
    /// Otherwise returns whether the delete removed a key; `false` means the
    /// key had already expired or been removed. The lease is `Released` after
    /// this returns, even on error.
    pub async fn release(&self) -> Result<bool> {
        self.shared.release().await
    }

    /// Run `body` within the scope of the lease.
    ///
    /// With `wait` false a single attempt is made and `body` receives
    /// [`LeaseStatus::Contended`] if the lease is held elsewhere. With `wait`
    /// true acquisition polls every [`LeaseConfig::poll_interval`] until it
    /// succeeds.
    ///
    /// The lease is released exactly once when `body` completes, panics, or
    /// is dropped. Errors releasing are logged and do not affect the result.
    /// Store errors during acquisition are returned without running `body`.
    pub async fn with_lease<F, Fut, T>(&self, wait: bool, body: F) -> Result<T>
    where
        F: FnOnce(LeaseStatus) -> Fut,
        Fut: Future<Output = T>,
    {
        self.with_lease_until(&CancellationToken::new(), wait, body)
            .await
    }

    /// Like [`Lease::with_lease`], abandoning a blocking acquisition with
    /// [`Error::Cancelled`] once `cancel` fires. Cancellation does not
    /// interrupt `body`.
    pub async fn with_lease_until<F, Fut, T>(
        &self,
        cancel: &CancellationToken,
        wait: bool,
        body: F,
    ) -> Result<T>
    where
        F: FnOnce(LeaseStatus) -> Fut,
        Fut: Future<Output = T>,
    {
        let status = match self.acquire_status(cancel, wait).await {
            Ok(status) => status,
            Err(err @ Error::Reentrant { .. }) => return Err(err),
            Err(err) => {
                if !err.is_cancelled() {
                    error!(?err, key = %self.shared.key, "reserve failed");
                }
                self.shared.release_logged().await;
                return Err(err);
            }
        };

        let guard = ReleaseGuard {
            shared: Some(self.shared.clone()),
        };
        let output = body(status).await;
        guard.release().await;
        Ok(output)
    }

    async fn acquire_status(
        &self,
        cancel: &CancellationToken,
        wait: bool,
    ) -> Result<LeaseStatus> {
        if wait {
            self.acquire_blocking_until(cancel, self.shared.config.poll_interval)
                .await?;
            return Ok(LeaseStatus::Held);
        }
        if self.try_acquire().await? {
            return Ok(LeaseStatus::Held);
        }

        let holder = match self.holder().await {
            Ok(holder) => holder,
            Err(err) => {
                warn!(?err, key = %self.shared.key, "reading holder");
                None
            }
        };
        info!(
            key = %self.shared.key,
            holder = holder.as_deref().unwrap_or("<expired>"),
            "already reserved"
        );
        Ok(LeaseStatus::Contended { holder })
    }
}

impl<S: Store> Drop for Lease<S> {
    fn drop(&mut self) {
        let held = match self.shared.inner.try_lock() {
            Ok(inner) => inner.state == LeaseState::Held,
            Err(_) => true,
        };
        if held {
            spawn_release(self.shared.clone());
        }
    }
}

/// Releases the lease when dropped before [`ReleaseGuard::release`] runs,
/// covering panics in and cancellation of a scoped body.
struct ReleaseGuard<S: Store> {
    shared: Option<Arc<Shared<S>>>,
}

impl<S: Store> ReleaseGuard<S> {
    async fn release(mut self) {
        if let Some(shared) = self.shared.take() {
            shared.release_logged().await;
        }
    }
}

impl<S: Store> Drop for ReleaseGuard<S> {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.take() {
            spawn_release(shared);
        }
    }
}

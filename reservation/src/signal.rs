//! Process-wide chain of termination callbacks.
//!
//! Rather than replacing OS signal handlers, interested parties register a
//! callback with a [`SignalDispatch`]. When the termination signal arrives,
//! every registered callback runs, most recently registered first, so a newer
//! callback behaves as if it were chained in front of the handlers that were
//! installed before it.

use std::{
    future::Future,
    pin::Pin,
    sync::{Arc, Mutex, OnceLock, Weak},
};

use tokio::{runtime::Handle, select, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub type HandlerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

type Handler = Arc<dyn Fn() -> HandlerFuture + Send + Sync>;

#[derive(Default)]
struct Chain {
    next_id: u64,
    handlers: Vec<(u64, Handler)>,
}

#[derive(Clone, Default)]
pub struct SignalDispatch {
    chain: Arc<Mutex<Chain>>,
}

static GLOBAL: OnceLock<SignalDispatch> = OnceLock::new();

/// Listener dispatching [`SignalDispatch::global`], if one is running.
static GLOBAL_LISTENER: Mutex<Option<JoinHandle<()>>> = Mutex::new(None);

impl SignalDispatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// The dispatch chain shared by the whole process.
    pub fn global() -> &'static SignalDispatch {
        GLOBAL.get_or_init(SignalDispatch::new)
    }

    /// Add `handler` to the front of the chain.
    ///
    /// The handler stays registered until the returned [`Registration`] is
    /// dropped.
    pub fn register<F, Fut>(&self, handler: F) -> Registration
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handler: Handler = Arc::new(move || Box::pin(handler()) as HandlerFuture);
        let mut chain = self.lock();
        chain.next_id += 1;
        let id = chain.next_id;
        chain.handlers.push((id, handler));
        Registration {
            chain: Arc::downgrade(&self.chain),
            id,
        }
    }

    /// Dispatch [`SignalDispatch::global`] on termination signals for the rest
    /// of the process.
    ///
    /// Idempotent while the listener lives. The listener runs on the current
    /// tokio runtime; if that runtime shuts down, the next call starts a new
    /// one. Returns `Ok(false)` without listening when called outside a
    /// runtime.
    pub fn install_global() -> std::io::Result<bool> {
        let mut listener = GLOBAL_LISTENER
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if listener.as_ref().is_some_and(|task| !task.is_finished()) {
            return Ok(true);
        }
        if Handle::try_current().is_err() {
            return Ok(false);
        }
        *listener = Some(Self::global().listen(CancellationToken::new())?);
        debug!("listening for termination signals");
        Ok(true)
    }

    pub fn len(&self) -> usize {
        self.lock().handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run every registered handler, newest first, each to completion.
    #[tracing::instrument(skip_all)]
    pub async fn dispatch(&self) {
        let handlers: Vec<Handler> = self
            .lock()
            .handlers
            .iter()
            .rev()
            .map(|(_, h)| h.clone())
            .collect();
        debug!(handlers = handlers.len(), "dispatching termination");
        for handler in handlers {
            handler().await;
        }
    }

    /// Dispatch on every termination signal received until `cancel` fires.
    ///
    /// On unix this is SIGTERM; elsewhere Ctrl-C stands in for it.
    pub fn listen(&self, cancel: CancellationToken) -> std::io::Result<JoinHandle<()>> {
        let dispatch = self.clone();
        let mut signals = TerminationSignal::new()?;
        Ok(tokio::spawn(async move {
            loop {
                select! {
                    _ = cancel.cancelled() => {
                        return;
                    }
                    received = signals.recv() => {
                        if !received {
                            return;
                        }
                        info!("received termination signal");
                        dispatch.dispatch().await;
                    }
                }
            }
        }))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Chain> {
        self.chain.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Keeps a handler in its [`SignalDispatch`] chain while alive.
#[must_use = "the handler is unregistered when the registration is dropped"]
pub struct Registration {
    chain: Weak<Mutex<Chain>>,
    id: u64,
}

impl Drop for Registration {
    fn drop(&mut self) {
        if let Some(chain) = self.chain.upgrade() {
            let mut chain = chain.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            chain.handlers.retain(|(id, _)| *id != self.id);
        }
    }
}

#[cfg(unix)]
struct TerminationSignal(tokio::signal::unix::Signal);

#[cfg(unix)]
impl TerminationSignal {
    fn new() -> std::io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};
        Ok(Self(signal(SignalKind::terminate())?))
    }

    async fn recv(&mut self) -> bool {
        self.0.recv().await.is_some()
    }
}

#[cfg(not(unix))]
struct TerminationSignal;

#[cfg(not(unix))]
impl TerminationSignal {
    fn new() -> std::io::Result<Self> {
        Ok(Self)
    }

    async fn recv(&mut self) -> bool {
        tokio::signal::ctrl_c().await.is_ok()
    }
}

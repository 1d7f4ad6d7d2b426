//! The receive loop connecting a [`Source`] to a [`Router`].
//!
//! Each payload is dispatched on its own tokio task, so a slow or stuck
//! dispatch never holds up the next payload. The loop ends when the source
//! closes, when the source fails, or when shutdown is requested:
//!
//! ```rust,ignore
//! let (source, handle) = ChannelSource::new(256);
//! let listener = Listener::from_config(router, client, &config.listener);
//! let stop = listener.shutdown_token();
//!
//! webhook::serve(&config.listener, handle);
//! listener.run(source).await?;
//! ```
//!
//! Every dispatch's [`Values`] overlay is seeded with the listener's
//! [`CancellationToken`] under [`CANCELLATION_KEY`]. It is cancelled when
//! shutdown is requested or the source fails, so long-running handlers can
//! wind down before the drain window closes.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use switchyard_core::{Control, Router, Values};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, trace, warn};

use crate::config::ListenerConfig;
use crate::error::{RuntimeError, RuntimeResult};
use crate::source::{Source, SourceEvent};

/// Overlay key under which every dispatch finds the shutdown token.
pub const CANCELLATION_KEY: &str = "switchyard.cancellation";

const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// The shutdown token of the listener running this dispatch.
///
/// `None` when the dispatch was not started by a [`Listener`].
pub fn cancellation(ctrl: &Control) -> Option<&CancellationToken> {
    ctrl.value::<CancellationToken>(CANCELLATION_KEY)
}

/// Drives a [`Router`] from a [`Source`].
pub struct Listener<C, P> {
    router: Router<C, P>,
    client: Arc<C>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
    drain_timeout: Duration,
    debug: bool,
}

impl<C, P> Listener<C, P>
where
    C: Send + Sync + 'static,
    P: Send + Sync + 'static,
{
    /// Creates a listener dispatching into `router` with `client`.
    pub fn new(router: Router<C, P>, client: impl Into<Arc<C>>) -> Self {
        Self {
            router,
            client: client.into(),
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            debug: false,
        }
    }

    /// Creates a listener using the drain timeout and debug flag of `config`.
    pub fn from_config(
        router: Router<C, P>,
        client: impl Into<Arc<C>>,
        config: &ListenerConfig,
    ) -> Self {
        Self::new(router, client)
            .drain_timeout(config.drain_timeout())
            .debug(config.debug)
    }

    /// How long to wait for in-flight dispatches once the loop ends.
    pub fn drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    /// Logs every received payload at `info` instead of `trace`.
    pub fn debug(mut self, enabled: bool) -> Self {
        self.debug = enabled;
        self
    }

    /// A token that stops the listener when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn router(&self) -> &Router<C, P> {
        &self.router
    }

    pub fn client(&self) -> &Arc<C> {
        &self.client
    }

    /// Number of dispatches still running.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Runs until the source ends or Ctrl+C / SIGTERM is received.
    pub async fn run<S>(self, source: S) -> RuntimeResult<()>
    where
        S: Source<P>,
    {
        info!("Listener running. Press Ctrl+C to stop.");
        self.run_until(source, wait_for_shutdown()).await
    }

    /// Runs until the source ends or `shutdown` completes.
    ///
    /// Returns `Ok(())` when the source closes or shutdown is requested, and
    /// [`RuntimeError::Source`] when the source fails. In every case the
    /// listener then waits up to the drain timeout for in-flight
    /// dispatches.
    pub async fn run_until<S, F>(self, mut source: S, shutdown: F) -> RuntimeResult<()>
    where
        S: Source<P>,
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        debug!(drain_timeout = ?self.drain_timeout, "Listener started");

        let result = loop {
            tokio::select! {
                biased;
                () = self.shutdown.cancelled() => {
                    info!("Shutdown requested, stopping listener");
                    break Ok(());
                }
                () = &mut shutdown => {
                    info!("Shutdown signal received, stopping listener");
                    self.shutdown.cancel();
                    break Ok(());
                }
                event = source.recv() => match event {
                    SourceEvent::Payload(payload) => self.spawn_dispatch(payload),
                    SourceEvent::Fatal(err) => {
                        error!(error = %err, "Payload source failed, stopping listener");
                        self.shutdown.cancel();
                        break Err(RuntimeError::Source(err));
                    }
                    SourceEvent::Closed => {
                        info!("Payload source closed");
                        break Ok(());
                    }
                },
            }
        };

        self.drain().await;
        result
    }

    fn spawn_dispatch(&self, payload: P) {
        if self.debug {
            info!(in_flight = self.tracker.len(), "Payload received");
        } else {
            trace!(in_flight = self.tracker.len(), "Payload received");
        }

        let router = self.router.clone();
        let client = Arc::clone(&self.client);
        let values = Values::new().with(CANCELLATION_KEY, self.shutdown.clone());

        self.tracker.spawn(async move {
            if let Err(err) = router.dispatch_with(values, client, payload).await {
                error!(error = %err, "Dispatch ended with an unresolved error");
            }
        });
    }

    async fn drain(&self) {
        self.tracker.close();

        let pending = self.tracker.len();
        if pending == 0 {
            return;
        }

        info!(pending, timeout = ?self.drain_timeout, "Waiting for in-flight dispatches");
        if tokio::time::timeout(self.drain_timeout, self.tracker.wait())
            .await
            .is_err()
        {
            warn!(
                remaining = self.tracker.len(),
                "Drain timeout elapsed, leaving dispatches running"
            );
        }
    }
}

impl<C, P> fmt::Debug for Listener<C, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener")
            .field("router", &self.router)
            .field("in_flight", &self.tracker.len())
            .field("drain_timeout", &self.drain_timeout)
            .field("debug", &self.debug)
            .finish_non_exhaustive()
    }
}

/// Waits for Ctrl+C or, on unix, SIGTERM.
async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        let mut sigterm = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(sigterm) => Some(sigterm),
            Err(e) => {
                warn!(error = %e, "Failed to register SIGTERM handler");
                None
            }
        };

        tokio::select! {
            result = signal::ctrl_c() => match result {
                Ok(()) => info!("Received Ctrl+C, shutting down"),
                Err(e) => {
                    error!(error = %e, "Failed to listen for Ctrl+C");
                    std::future::pending::<()>().await;
                }
            },
            Some(()) = async {
                match sigterm.as_mut() {
                    Some(sigterm) => sigterm.recv().await,
                    None => std::future::pending().await,
                }
            } => info!("Received SIGTERM, shutting down"),
        }
    }

    #[cfg(not(unix))]
    {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C, shutting down"),
            Err(e) => {
                error!(error = %e, "Failed to listen for Ctrl+C");
                std::future::pending::<()>().await;
            }
        }
    }
}

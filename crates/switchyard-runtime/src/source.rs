//! Payload sources feeding a [`Listener`](crate::Listener).
//!
//! A [`Source`] hands out payloads one at a time and reports how the stream
//! ends. Two shapes cover the usual integrations:
//!
//! - **Push**: [`ChannelSource`] pairs with cloneable [`SourceHandle`]s, so a
//!   webhook server or any callback-driven client can feed it from its own
//!   tasks and report a fatal failure with [`SourceHandle::fail`].
//! - **Pull**: [`PollingSource`] repeatedly asks a [`Poller`] for batches,
//!   as a long-polling client does.

use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use switchyard_core::BoxError;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::config::PollingConfig;

/// What a [`Source`] produced.
#[derive(Debug)]
pub enum SourceEvent<P> {
    /// A payload to dispatch.
    Payload(P),
    /// The source failed and cannot continue. Ends the listener.
    Fatal(BoxError),
    /// The source ended normally.
    Closed,
}

/// A stream of inbound payloads.
///
/// `recv` is called again after every `Payload`; after `Fatal` or `Closed`
/// it is not called again.
#[async_trait]
pub trait Source<P>: Send {
    async fn recv(&mut self) -> SourceEvent<P>;
}

// ============================================================================
// Push delivery
// ============================================================================

/// Returned by [`SourceHandle::push`] once the listener stopped receiving.
/// Carries the payload back.
#[derive(Error)]
#[error("payload source is closed")]
pub struct SourceClosed<P>(pub P);

impl<P> fmt::Debug for SourceClosed<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SourceClosed").finish_non_exhaustive()
    }
}

/// A source fed through [`SourceHandle`]s.
///
/// Closes once every handle is dropped and all pushed payloads were taken.
/// A fatal error reported through a handle is delivered ahead of payloads
/// still queued.
pub struct ChannelSource<P> {
    payloads: mpsc::Receiver<P>,
    fatal: mpsc::Receiver<BoxError>,
}

/// The sending side of a [`ChannelSource`].
pub struct SourceHandle<P> {
    payloads: mpsc::Sender<P>,
    fatal: mpsc::Sender<BoxError>,
}

impl<P> Clone for SourceHandle<P> {
    fn clone(&self) -> Self {
        Self {
            payloads: self.payloads.clone(),
            fatal: self.fatal.clone(),
        }
    }
}

impl<P: Send> ChannelSource<P> {
    /// Creates a source buffering up to `capacity` payloads.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> (Self, SourceHandle<P>) {
        let (payload_tx, payload_rx) = mpsc::channel(capacity);
        let (fatal_tx, fatal_rx) = mpsc::channel(1);
        (
            Self {
                payloads: payload_rx,
                fatal: fatal_rx,
            },
            SourceHandle {
                payloads: payload_tx,
                fatal: fatal_tx,
            },
        )
    }
}

impl<P: Send> SourceHandle<P> {
    /// Queues a payload, waiting for buffer space.
    pub async fn push(&self, payload: P) -> Result<(), SourceClosed<P>> {
        self.payloads
            .send(payload)
            .await
            .map_err(|mpsc::error::SendError(p)| SourceClosed(p))
    }

    /// Queues a payload if there is buffer space right now.
    pub fn try_push(&self, payload: P) -> Result<(), mpsc::error::TrySendError<P>> {
        self.payloads.try_send(payload)
    }

    /// Reports an unrecoverable failure. Only the first report is kept.
    pub fn fail(&self, err: impl Into<BoxError>) {
        if self.fatal.try_send(err.into()).is_err() {
            debug!("Source failure already reported or source closed, dropping error");
        }
    }

    /// Returns `true` once the listener stopped receiving.
    pub fn is_closed(&self) -> bool {
        self.payloads.is_closed()
    }
}

#[async_trait]
impl<P: Send> Source<P> for ChannelSource<P> {
    async fn recv(&mut self) -> SourceEvent<P> {
        tokio::select! {
            biased;
            Some(err) = self.fatal.recv() => SourceEvent::Fatal(err),
            payload = self.payloads.recv() => match payload {
                Some(payload) => SourceEvent::Payload(payload),
                None => SourceEvent::Closed,
            },
        }
    }
}

// ============================================================================
// Pull delivery
// ============================================================================

/// Fetches payload batches for a [`PollingSource`].
#[async_trait]
pub trait Poller<P>: Send {
    /// Returns the next batch, waiting at most about `timeout` for one to
    /// become available. An empty batch is fine; an error is fatal.
    ///
    /// The poller tracks its own position (offset) between calls.
    async fn poll(&mut self, timeout: Duration) -> Result<Vec<P>, BoxError>;

    /// Returns `true` when no batch will ever follow.
    fn is_exhausted(&self) -> bool {
        false
    }
}

/// A source pulling batches from a [`Poller`].
///
/// Batch items are yielded in order. After an empty batch the source waits
/// `interval` before polling again, unless the poller reports itself
/// exhausted, in which case it closes right away. Poll errors are surfaced as
/// [`SourceEvent::Fatal`] without retrying.
pub struct PollingSource<Pl, P> {
    poller: Pl,
    buffer: VecDeque<P>,
    timeout: Duration,
    interval: Duration,
}

impl<Pl, P> PollingSource<Pl, P>
where
    Pl: Poller<P>,
    P: Send,
{
    pub fn new(poller: Pl, timeout: Duration, interval: Duration) -> Self {
        Self {
            poller,
            buffer: VecDeque::new(),
            timeout,
            interval,
        }
    }

    /// Uses the timeout and interval of `config`. The offset belongs to the
    /// poller.
    pub fn from_config(poller: Pl, config: &PollingConfig) -> Self {
        Self::new(poller, config.timeout(), config.interval())
    }

    pub fn poller(&self) -> &Pl {
        &self.poller
    }
}

#[async_trait]
impl<Pl, P> Source<P> for PollingSource<Pl, P>
where
    Pl: Poller<P>,
    P: Send,
{
    async fn recv(&mut self) -> SourceEvent<P> {
        loop {
            if let Some(payload) = self.buffer.pop_front() {
                return SourceEvent::Payload(payload);
            }
            if self.poller.is_exhausted() {
                return SourceEvent::Closed;
            }

            match self.poller.poll(self.timeout).await {
                Ok(batch) if batch.is_empty() => {
                    if self.poller.is_exhausted() {
                        debug!("Poller exhausted");
                        return SourceEvent::Closed;
                    }
                    trace!(interval = ?self.interval, "Empty batch, waiting before next poll");
                    tokio::time::sleep(self.interval).await;
                }
                Ok(batch) => {
                    trace!(size = batch.len(), "Received batch");
                    self.buffer.extend(batch);
                }
                Err(err) => return SourceEvent::Fatal(err),
            }
        }
    }
}

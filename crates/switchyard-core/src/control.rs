//! The control handle passed to every handler invocation.
//!
//! A handler drives the dispatch by calling exactly one of the [`Control`]
//! operations:
//!
//! - [`advance`](Control::advance): run the next handler of the active chain
//! - [`advance_with_value`](Control::advance_with_value): same, after layering
//!   a value onto the dispatch overlay
//! - [`signal_error`](Control::signal_error): abandon the active chain and
//!   enter the error chain
//! - [`halt`](Control::halt): resolve the in-flight error (error chain only)
//!
//! Returning without calling any of them ends the dispatch quietly.
//!
//! The handle only records the verdict. The dispatch loop reads it once the
//! handler's future has completed, then seals the handle so that a clone
//! kept around after returning cannot influence anything.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{trace, warn};

use crate::error::{BoxError, HandlerError, into_handler_error};
use crate::values::{Value, Values};

/// Which chain a handler is running in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Chain {
    /// The ordinary handler chain.
    Normal,
    /// The error-recovery chain.
    Error,
}

impl Chain {
    /// Returns the chain name as used in log fields.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The decision a handler left behind.
#[derive(Debug)]
pub(crate) enum Verdict {
    Advance(Option<(Arc<str>, Value)>),
    SignalError(HandlerError),
    Halt,
}

impl Verdict {
    fn name(&self) -> &'static str {
        match self {
            Self::Advance(None) => "advance",
            Self::Advance(Some(_)) => "advance_with_value",
            Self::SignalError(_) => "signal_error",
            Self::Halt => "halt",
        }
    }
}

enum Slot {
    Pending,
    Decided(Verdict),
    Sealed,
}

struct ControlInner {
    chain: Chain,
    index: usize,
    values: Values,
    slot: Mutex<Slot>,
}

/// Handle through which a handler advances, fails, or resolves a dispatch.
///
/// `Control` is cheap to clone and can be moved into the handler's future.
/// It is bound to one chain position: the dispatch loop hands out a fresh
/// one for every invocation.
#[derive(Clone)]
pub struct Control {
    inner: Arc<ControlInner>,
}

impl Control {
    pub(crate) fn new(chain: Chain, index: usize, values: Values) -> Self {
        Self {
            inner: Arc::new(ControlInner {
                chain,
                index,
                values,
                slot: Mutex::new(Slot::Pending),
            }),
        }
    }

    /// The chain this handle is bound to.
    pub fn chain(&self) -> Chain {
        self.inner.chain
    }

    /// Position of the running handler within its chain.
    pub fn index(&self) -> usize {
        self.inner.index
    }

    /// The overlay visible to the running handler.
    pub fn values(&self) -> &Values {
        &self.inner.values
    }

    /// Shorthand for `self.values().get::<T>(key)`.
    pub fn value<T: Any>(&self, key: &str) -> Option<&T> {
        self.inner.values.get::<T>(key)
    }

    /// Hands control to the next handler of the active chain.
    pub fn advance(&self) {
        self.decide(Verdict::Advance(None));
    }

    /// Layers `{key: value}` onto the overlay, then advances.
    ///
    /// Every handler that runs after this one in the same dispatch sees the
    /// value; nothing that already ran does.
    pub fn advance_with_value<T>(&self, key: impl Into<Arc<str>>, value: T)
    where
        T: Any + Send + Sync,
    {
        let value: Value = Arc::new(value);
        self.decide(Verdict::Advance(Some((key.into(), value))));
    }

    /// Abandons the active chain and restarts the error chain with `err`.
    ///
    /// Called from an error handler, this replaces the in-flight error and
    /// runs the error chain again from its first handler, this one included.
    /// An error handler that signals unconditionally therefore never lets
    /// the dispatch finish; only re-signal for errors you have not already
    /// replaced.
    pub fn signal_error(&self, err: impl Into<BoxError>) {
        self.decide(Verdict::SignalError(into_handler_error(err)));
    }

    /// Marks the in-flight error as resolved, ending the dispatch.
    ///
    /// Has no effect in the normal chain.
    pub fn halt(&self) {
        if self.inner.chain == Chain::Normal {
            trace!(
                index = self.inner.index,
                "halt() ignored outside the error chain"
            );
            return;
        }
        self.decide(Verdict::Halt);
    }

    /// Returns `true` once an operation has been recorded.
    pub fn is_decided(&self) -> bool {
        matches!(*self.inner.slot.lock(), Slot::Decided(_))
    }

    fn decide(&self, verdict: Verdict) {
        let mut slot = self.inner.slot.lock();
        match &*slot {
            Slot::Pending => *slot = Slot::Decided(verdict),
            Slot::Decided(first) => trace!(
                chain = %self.inner.chain,
                index = self.inner.index,
                kept = first.name(),
                ignored = verdict.name(),
                "Control already decided, ignoring call"
            ),
            Slot::Sealed => warn!(
                chain = %self.inner.chain,
                index = self.inner.index,
                ignored = verdict.name(),
                "Control used after its handler returned"
            ),
        }
    }

    /// Takes the recorded verdict and disables the handle.
    pub(crate) fn seal(&self) -> Option<Verdict> {
        match std::mem::replace(&mut *self.inner.slot.lock(), Slot::Sealed) {
            Slot::Decided(verdict) => Some(verdict),
            Slot::Pending | Slot::Sealed => None,
        }
    }
}

impl fmt::Debug for Control {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Control")
            .field("chain", &self.inner.chain)
            .field("index", &self.inner.index)
            .field("values", &self.inner.values)
            .finish_non_exhaustive()
    }
}

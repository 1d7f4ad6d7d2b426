//! Per-dispatch state.

use tracing::{debug, warn};

use crate::control::{Chain, Verdict};
use crate::error::{DispatchError, DispatchResult, HandlerError};
use crate::values::Values;

/// What the dispatch loop does after applying a verdict.
pub(crate) enum Step {
    /// Invoke the handler at the (possibly new) position.
    Continue,
    /// The dispatch is over.
    Done(DispatchResult),
}

/// State owned by a single dispatch: position, overlay, in-flight error.
///
/// The active chain is derived from the in-flight error: while one is set the
/// dispatch runs the error chain.
#[derive(Debug)]
pub(crate) struct DispatchContext {
    pub(crate) index: usize,
    pub(crate) values: Values,
    pub(crate) error: Option<HandlerError>,
}

impl DispatchContext {
    pub(crate) fn new(values: Values) -> Self {
        Self {
            index: 0,
            values,
            error: None,
        }
    }

    pub(crate) fn chain(&self) -> Chain {
        if self.error.is_some() {
            Chain::Error
        } else {
            Chain::Normal
        }
    }

    /// Applies the verdict left by the handler at `self.index`.
    pub(crate) fn apply(&mut self, verdict: Option<Verdict>) -> Step {
        match verdict {
            Some(Verdict::Advance(layer)) => {
                if let Some((key, value)) = layer {
                    self.values = self.values.with_value(key, value);
                }
                self.index += 1;
                Step::Continue
            }
            Some(Verdict::SignalError(err)) => {
                debug!(
                    chain = %self.chain(),
                    index = self.index,
                    error = %err,
                    "Handler signalled an error, entering error chain"
                );
                self.error = Some(err);
                self.index = 0;
                Step::Continue
            }
            Some(Verdict::Halt) => {
                debug!(index = self.index, "Error resolved by error handler");
                Step::Done(Ok(()))
            }
            None => {
                match &self.error {
                    None => debug!(
                        index = self.index,
                        "Handler returned without advancing, dispatch stopped"
                    ),
                    Some(err) => warn!(
                        index = self.index,
                        error = %err,
                        "Error handler returned without a decision, dropping error"
                    ),
                }
                Step::Done(Ok(()))
            }
        }
    }

    /// Ends a dispatch whose active chain has no handler left.
    pub(crate) fn exhausted(self) -> DispatchResult {
        match self.error {
            None => {
                debug!(handlers = self.index, "Dispatch completed");
                Ok(())
            }
            Some(err) => {
                debug!(error = %err, "Error chain exhausted without resolution");
                Err(DispatchError::Unresolved(err))
            }
        }
    }
}

//! Route filters.
//!
//! A [`Route`] occupies a slot in the normal chain like any other handler,
//! but only runs its inner handler when a [`Predicate`] over the payload
//! holds. When it does not, the route advances on its own, so the payload
//! continues down the chain as if the route were absent.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::trace;

use crate::control::Control;
use crate::handler::{BoxedHandler, Handler};

/// Payloads that can expose a plain-text body for route matching.
pub trait AsText {
    /// Returns the text body, or `None` if the payload carries no text.
    fn plain_text(&self) -> Option<&str>;
}

impl AsText for str {
    fn plain_text(&self) -> Option<&str> {
        Some(self)
    }
}

impl AsText for String {
    fn plain_text(&self) -> Option<&str> {
        Some(self.as_str())
    }
}

impl<T: AsText + ?Sized> AsText for &T {
    fn plain_text(&self) -> Option<&str> {
        (**self).plain_text()
    }
}

impl<T: AsText> AsText for Option<T> {
    fn plain_text(&self) -> Option<&str> {
        self.as_ref().and_then(AsText::plain_text)
    }
}

/// A check over the payload deciding whether a route fires.
pub trait Predicate<P: ?Sized>: Send + Sync + 'static {
    /// Returns `true` if the route should run for `payload`.
    fn matches(&self, payload: &P) -> bool;
}

impl<P, F> Predicate<P> for F
where
    P: ?Sized,
    F: Fn(&P) -> bool + Send + Sync + 'static,
{
    fn matches(&self, payload: &P) -> bool {
        self(payload)
    }
}

/// Exact, case-sensitive equality against the payload's text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Equal {
    pattern: String,
}

impl Equal {
    /// Creates a predicate matching text equal to `pattern`.
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
        }
    }

    /// The pattern this predicate compares against.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }
}

impl<P> Predicate<P> for Equal
where
    P: AsText + ?Sized,
{
    fn matches(&self, payload: &P) -> bool {
        payload.plain_text() == Some(self.pattern.as_str())
    }
}

/// A handler guarded by a predicate.
pub struct Route<C, P> {
    predicate: Arc<dyn Predicate<P>>,
    inner: BoxedHandler<C, P>,
}

impl<C, P> Route<C, P> {
    /// Guards `inner` with `predicate`.
    pub fn new(predicate: impl Predicate<P>, inner: BoxedHandler<C, P>) -> Self {
        Self {
            predicate: Arc::new(predicate),
            inner,
        }
    }
}

impl<C, P: AsText> Route<C, P> {
    /// Guards `inner` with an exact text match on `pattern`.
    pub fn equal(pattern: impl Into<String>, inner: BoxedHandler<C, P>) -> Self {
        Self::new(Equal::new(pattern), inner)
    }
}

impl<C, P> Clone for Route<C, P> {
    fn clone(&self) -> Self {
        Self {
            predicate: Arc::clone(&self.predicate),
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C, P> fmt::Debug for Route<C, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route").finish_non_exhaustive()
    }
}

#[async_trait]
impl<C, P> Handler<C, P> for Route<C, P>
where
    C: Send + Sync + 'static,
    P: Send + Sync + 'static,
{
    async fn call(&self, ctrl: Control, client: Arc<C>, payload: Arc<P>) {
        if self.predicate.matches(&payload) {
            self.inner.call(ctrl, client, payload).await;
        } else {
            trace!(index = ctrl.index(), "Route did not match, advancing");
            ctrl.advance();
        }
    }
}

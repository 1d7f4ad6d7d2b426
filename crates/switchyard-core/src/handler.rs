//! Handler traits for the normal and error chains.
//!
//! A [`Handler`] receives a [`Control`], the opaque client handle and the
//! opaque payload. An [`ErrorHandler`] additionally receives the error that
//! sent the dispatch into the error chain. Both decide how the dispatch
//! continues through their `Control`.
//!
//! Plain async closures become handlers through [`handler_fn`] and
//! [`error_handler_fn`]; anything with state can implement the traits
//! directly:
//!
//! ```rust,ignore
//! struct Audit;
//!
//! #[async_trait]
//! impl Handler<Client, Update> for Audit {
//!     async fn call(&self, ctrl: Control, _client: Arc<Client>, update: Arc<Update>) {
//!         info!(update = update.id, "received");
//!         ctrl.advance();
//!     }
//! }
//! ```

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;

use crate::control::Control;
use crate::error::HandlerError;

/// A link of the normal chain.
#[async_trait]
pub trait Handler<C, P>: Send + Sync + 'static {
    /// Runs the handler. Call one operation on `ctrl` to continue the chain.
    async fn call(&self, ctrl: Control, client: Arc<C>, payload: Arc<P>);
}

/// A link of the error chain.
#[async_trait]
pub trait ErrorHandler<C, P>: Send + Sync + 'static {
    /// Runs the error handler for `err`.
    async fn call(&self, ctrl: Control, client: Arc<C>, payload: Arc<P>, err: HandlerError);
}

/// A type-erased handler, as stored in the normal chain.
pub type BoxedHandler<C, P> = Arc<dyn Handler<C, P>>;

/// A type-erased error handler, as stored in the error chain.
pub type BoxedErrorHandler<C, P> = Arc<dyn ErrorHandler<C, P>>;

// ============================================================================
// Function-form handlers
// ============================================================================

/// Adapts an async closure into a [`Handler`].
pub struct HandlerFn<F, C, P> {
    f: F,
    _marker: PhantomData<fn(C, P)>,
}

impl<F: Clone, C, P> Clone for HandlerFn<F, C, P> {
    fn clone(&self) -> Self {
        Self {
            f: self.f.clone(),
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<F, Fut, C, P> Handler<C, P> for HandlerFn<F, C, P>
where
    F: Fn(Control, Arc<C>, Arc<P>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
    C: Send + Sync + 'static,
    P: Send + Sync + 'static,
{
    async fn call(&self, ctrl: Control, client: Arc<C>, payload: Arc<P>) {
        (self.f)(ctrl, client, payload).await;
    }
}

/// Adapts an async closure into an [`ErrorHandler`].
pub struct ErrorHandlerFn<F, C, P> {
    f: F,
    _marker: PhantomData<fn(C, P)>,
}

impl<F: Clone, C, P> Clone for ErrorHandlerFn<F, C, P> {
    fn clone(&self) -> Self {
        Self {
            f: self.f.clone(),
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<F, Fut, C, P> ErrorHandler<C, P> for ErrorHandlerFn<F, C, P>
where
    F: Fn(Control, Arc<C>, Arc<P>, HandlerError) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
    C: Send + Sync + 'static,
    P: Send + Sync + 'static,
{
    async fn call(&self, ctrl: Control, client: Arc<C>, payload: Arc<P>, err: HandlerError) {
        (self.f)(ctrl, client, payload, err).await;
    }
}

/// Wraps an async closure as a normal-chain handler.
pub fn handler_fn<C, P, F, Fut>(f: F) -> HandlerFn<F, C, P>
where
    F: Fn(Control, Arc<C>, Arc<P>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    HandlerFn {
        f,
        _marker: PhantomData,
    }
}

/// Wraps an async closure as an error-chain handler.
pub fn error_handler_fn<C, P, F, Fut>(f: F) -> ErrorHandlerFn<F, C, P>
where
    F: Fn(Control, Arc<C>, Arc<P>, HandlerError) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    ErrorHandlerFn {
        f,
        _marker: PhantomData,
    }
}

/// Boxes a handler for the normal chain.
pub fn into_handler<C, P, H>(handler: H) -> BoxedHandler<C, P>
where
    H: Handler<C, P>,
{
    Arc::new(handler)
}

/// Boxes an error handler for the error chain.
pub fn into_error_handler<C, P, H>(handler: H) -> BoxedErrorHandler<C, P>
where
    H: ErrorHandler<C, P>,
{
    Arc::new(handler)
}

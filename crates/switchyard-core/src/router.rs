//! The router: handler registration and the dispatch loop.
//!
//! Routers are built once and then frozen. A [`RouterBuilder`] collects the
//! normal chain and the error chain in registration order; [`build`] turns
//! it into an immutable [`Router`] that can be cloned into as many tasks as
//! needed and dispatched concurrently.
//!
//! # Dispatch
//!
//! Each call to [`Router::dispatch`] runs one payload through the chains:
//!
//! 1. Handlers of the normal chain run in order while they call `advance`
//! 2. `signal_error` jumps to the start of the error chain
//! 3. Error handlers run in order while they call `advance`; `halt`
//!    resolves the error, `signal_error` restarts the error chain
//! 4. Running off the end of the error chain returns the current error
//!
//! A handler that returns without calling any operation ends the dispatch
//! successfully.
//!
//! # Restarting the error chain
//!
//! `signal_error` inside the error chain replaces the in-flight error and
//! starts the error chain over at its first handler, which then sees the new
//! error. The dispatch only terminates if some pass through the error chain
//! halts, stops silently, or advances off its end. An error handler that
//! signals on every invocation restarts the chain forever. Like a handler
//! that never completes, this stalls only its own dispatch, and there is no
//! built-in guard against it. Make re-signalling conditional on the error
//! being handled, or bound the dispatch with a tower timeout layer.
//!
//! ```rust,ignore
//! let router = Router::<Client, String>::builder()
//!     .handle(|ctrl, _client, _text| async move {
//!         ctrl.advance_with_value("started", Instant::now());
//!     })
//!     .route("/start", |ctrl, client, _text| async move {
//!         if let Err(e) = client.greet().await {
//!             ctrl.signal_error(e);
//!         }
//!     })
//!     .handle_error(|ctrl, _client, _text, err| async move {
//!         error!(error = %err, "greeting failed");
//!         ctrl.halt();
//!     })
//!     .build();
//!
//! router.dispatch(client, "/start".to_string()).await?;
//! ```
//!
//! [`build`]: RouterBuilder::build

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};

use futures::future::BoxFuture;
use tower::Service;
use tracing::{Instrument, Level, span, trace};

use crate::context::{DispatchContext, Step};
use crate::control::Control;
use crate::error::{DispatchError, DispatchResult, HandlerError};
use crate::handler::{
    BoxedErrorHandler, BoxedHandler, ErrorHandler, Handler, error_handler_fn, handler_fn,
    into_error_handler, into_handler,
};
use crate::route::{AsText, Predicate, Route};
use crate::values::Values;

static DISPATCH_SEQ: AtomicU64 = AtomicU64::new(1);

// ============================================================================
// RouterBuilder
// ============================================================================

/// Collects handlers before a [`Router`] is frozen.
pub struct RouterBuilder<C, P> {
    handlers: Vec<BoxedHandler<C, P>>,
    error_handlers: Vec<BoxedErrorHandler<C, P>>,
}

impl<C, P> Default for RouterBuilder<C, P> {
    fn default() -> Self {
        Self {
            handlers: Vec::new(),
            error_handlers: Vec::new(),
        }
    }
}

impl<C, P> RouterBuilder<C, P>
where
    C: Send + Sync + 'static,
    P: Send + Sync + 'static,
{
    /// Creates a builder with empty chains.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends boxed handlers to the normal chain, preserving their order.
    pub fn register_handlers<I>(mut self, handlers: I) -> Self
    where
        I: IntoIterator<Item = BoxedHandler<C, P>>,
    {
        self.handlers.extend(handlers);
        self
    }

    /// Appends boxed error handlers to the error chain, preserving their order.
    pub fn register_error_handlers<I>(mut self, handlers: I) -> Self
    where
        I: IntoIterator<Item = BoxedErrorHandler<C, P>>,
    {
        self.error_handlers.extend(handlers);
        self
    }

    /// Wraps every handler in an exact-match route on `pattern` and appends
    /// them to the normal chain in order.
    pub fn register_route<I>(mut self, pattern: impl Into<String>, handlers: I) -> Self
    where
        P: AsText,
        I: IntoIterator<Item = BoxedHandler<C, P>>,
    {
        let pattern = pattern.into();
        self.handlers.extend(
            handlers
                .into_iter()
                .map(|inner| into_handler(Route::equal(pattern.clone(), inner))),
        );
        self
    }

    /// Appends a handler to the normal chain.
    pub fn handler<H>(mut self, handler: H) -> Self
    where
        H: Handler<C, P>,
    {
        self.handlers.push(into_handler(handler));
        self
    }

    /// Appends an async closure to the normal chain.
    pub fn handle<F, Fut>(self, f: F) -> Self
    where
        F: Fn(Control, Arc<C>, Arc<P>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.handler(handler_fn::<C, P, _, _>(f))
    }

    /// Appends an async closure that only runs when the payload text equals
    /// `pattern`.
    pub fn route<F, Fut>(self, pattern: impl Into<String>, f: F) -> Self
    where
        P: AsText,
        F: Fn(Control, Arc<C>, Arc<P>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.register_route(pattern, [into_handler(handler_fn::<C, P, _, _>(f))])
    }

    /// Appends a handler guarded by an arbitrary predicate.
    pub fn route_with<Pr, H>(self, predicate: Pr, handler: H) -> Self
    where
        Pr: Predicate<P>,
        H: Handler<C, P>,
    {
        self.handler(Route::new(predicate, into_handler(handler)))
    }

    /// Appends an error handler to the error chain.
    pub fn error_handler<H>(mut self, handler: H) -> Self
    where
        H: ErrorHandler<C, P>,
    {
        self.error_handlers.push(into_error_handler(handler));
        self
    }

    /// Appends an async closure to the error chain.
    pub fn handle_error<F, Fut>(self, f: F) -> Self
    where
        F: Fn(Control, Arc<C>, Arc<P>, HandlerError) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.error_handler(error_handler_fn::<C, P, _, _>(f))
    }

    /// Number of handlers in the normal chain so far.
    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    /// Number of handlers in the error chain so far.
    pub fn error_handler_count(&self) -> usize {
        self.error_handlers.len()
    }

    /// Freezes the chains into a [`Router`].
    pub fn build(self) -> Router<C, P> {
        Router {
            handlers: self.handlers.into(),
            error_handlers: self.error_handlers.into(),
        }
    }
}

impl<C, P> fmt::Debug for RouterBuilder<C, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouterBuilder")
            .field("handler_count", &self.handlers.len())
            .field("error_handler_count", &self.error_handlers.len())
            .finish()
    }
}

// ============================================================================
// Router
// ============================================================================

/// An immutable pair of handler chains.
///
/// `Router` is cheap to clone; clones share the same chains. Dispatches never
/// share anything else, so any number of them may run at once.
pub struct Router<C, P> {
    handlers: Arc<[BoxedHandler<C, P>]>,
    error_handlers: Arc<[BoxedErrorHandler<C, P>]>,
}

impl<C, P> Clone for Router<C, P> {
    fn clone(&self) -> Self {
        Self {
            handlers: Arc::clone(&self.handlers),
            error_handlers: Arc::clone(&self.error_handlers),
        }
    }
}

impl<C, P> Router<C, P>
where
    C: Send + Sync + 'static,
    P: Send + Sync + 'static,
{
    /// Starts building a router.
    pub fn builder() -> RouterBuilder<C, P> {
        RouterBuilder::new()
    }

    /// Number of handlers in the normal chain.
    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    /// Number of handlers in the error chain.
    pub fn error_handler_count(&self) -> usize {
        self.error_handlers.len()
    }

    /// Runs one payload through the chains with an empty overlay.
    ///
    /// Returns `Ok(())` when the normal chain completes, a handler stops the
    /// dispatch, or an error handler resolves the error. Returns
    /// [`DispatchError::Unresolved`] with the latest error when the error
    /// chain runs out.
    pub async fn dispatch(
        &self,
        client: impl Into<Arc<C>>,
        payload: impl Into<Arc<P>>,
    ) -> DispatchResult {
        self.dispatch_with(Values::new(), client, payload).await
    }

    /// Like [`dispatch`](Self::dispatch), seeding the overlay with `values`.
    pub async fn dispatch_with(
        &self,
        values: Values,
        client: impl Into<Arc<C>>,
        payload: impl Into<Arc<P>>,
    ) -> DispatchResult {
        let id = DISPATCH_SEQ.fetch_add(1, Ordering::Relaxed);
        let span = span!(Level::DEBUG, "dispatch", id);

        self.run(DispatchContext::new(values), client.into(), payload.into())
            .instrument(span)
            .await
    }

    async fn run(
        &self,
        mut state: DispatchContext,
        client: Arc<C>,
        payload: Arc<P>,
    ) -> DispatchResult {
        loop {
            let chain = state.chain();
            let ctrl = Control::new(chain, state.index, state.values.clone());

            match state.error.clone() {
                None => {
                    let Some(handler) = self.handlers.get(state.index) else {
                        return state.exhausted();
                    };
                    trace!(%chain, index = state.index, "Invoking handler");
                    handler
                        .call(ctrl.clone(), Arc::clone(&client), Arc::clone(&payload))
                        .await;
                }
                Some(err) => {
                    let Some(handler) = self.error_handlers.get(state.index) else {
                        return state.exhausted();
                    };
                    trace!(%chain, index = state.index, "Invoking error handler");
                    handler
                        .call(
                            ctrl.clone(),
                            Arc::clone(&client),
                            Arc::clone(&payload),
                            err,
                        )
                        .await;
                }
            }

            if let Step::Done(result) = state.apply(ctrl.seal()) {
                return result;
            }
        }
    }
}

impl<C, P> fmt::Debug for Router<C, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router")
            .field("handler_count", &self.handlers.len())
            .field("error_handler_count", &self.error_handlers.len())
            .finish()
    }
}

// ============================================================================
// Tower Service Implementation for Router
// ============================================================================

/// Dispatches `(client, payload)` pairs, so deadlines and other tower
/// middleware can wrap a whole dispatch.
///
/// ```rust,ignore
/// let svc = ServiceBuilder::new()
///     .timeout(Duration::from_secs(5))
///     .service(router);
/// ```
impl<C, P> Service<(Arc<C>, Arc<P>)> for Router<C, P>
where
    C: Send + Sync + 'static,
    P: Send + Sync + 'static,
{
    type Response = ();
    type Error = DispatchError;
    type Future = BoxFuture<'static, DispatchResult>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, (client, payload): (Arc<C>, Arc<P>)) -> Self::Future {
        let router = self.clone();
        Box::pin(async move { router.dispatch(client, payload).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio_test::{assert_err, assert_ok};
    use tower::ServiceExt;

    struct Client;

    type Log = Arc<Mutex<Vec<String>>>;

    #[derive(Clone, Copy)]
    enum Action {
        Advance,
        Signal(&'static str),
        Halt,
        Nothing,
        /// Signals `to` when handling `from`, advances otherwise.
        Replace {
            from: &'static str,
            to: &'static str,
        },
    }

    impl Action {
        fn apply(self, ctrl: &Control) {
            match self {
                Action::Advance | Action::Replace { .. } => ctrl.advance(),
                Action::Signal(msg) => ctrl.signal_error(msg),
                Action::Halt => ctrl.halt(),
                Action::Nothing => {}
            }
        }

        fn apply_to(self, ctrl: &Control, err: &HandlerError) {
            match self {
                Action::Replace { from, to } if err.to_string() == from => ctrl.signal_error(to),
                other => other.apply(ctrl),
            }
        }
    }

    fn new_log() -> Log {
        Arc::new(Mutex::new(Vec::new()))
    }

    fn entries(log: &Log) -> Vec<String> {
        log.lock().clone()
    }

    fn step(log: &Log, name: &'static str, action: Action) -> BoxedHandler<Client, String> {
        let log = Arc::clone(log);
        into_handler(handler_fn(
            move |ctrl: Control, _client: Arc<Client>, _text: Arc<String>| {
                let log = Arc::clone(&log);
                async move {
                    log.lock().push(name.to_string());
                    action.apply(&ctrl);
                }
            },
        ))
    }

    fn recover(log: &Log, name: &'static str, action: Action) -> BoxedErrorHandler<Client, String> {
        let log = Arc::clone(log);
        into_error_handler(error_handler_fn(
            move |ctrl: Control, _client: Arc<Client>, _text: Arc<String>, err: HandlerError| {
                let log = Arc::clone(&log);
                async move {
                    log.lock().push(format!("{name}:{err}"));
                    action.apply_to(&ctrl, &err);
                }
            },
        ))
    }

    #[tokio::test]
    async fn test_empty_router_succeeds() {
        let router = Router::<Client, String>::builder().build();
        assert_ok!(router.dispatch(Client, "hello".to_string()).await);
    }

    #[tokio::test]
    async fn test_handlers_run_in_registration_order() {
        let log = new_log();
        let router = Router::builder()
            .register_handlers([
                step(&log, "h1", Action::Advance),
                step(&log, "h2", Action::Advance),
            ])
            .register_handlers([step(&log, "h3", Action::Advance)])
            .build();

        assert_eq!(router.handler_count(), 3);
        assert_ok!(router.dispatch(Client, "hello".to_string()).await);
        assert_eq!(entries(&log), vec!["h1", "h2", "h3"]);
    }

    #[tokio::test]
    async fn test_signal_error_skips_rest_of_normal_chain() {
        let log = new_log();
        let router = Router::builder()
            .register_handlers([
                step(&log, "a", Action::Advance),
                step(&log, "b", Action::Signal("X")),
                step(&log, "c", Action::Advance),
            ])
            .register_error_handlers([recover(&log, "d", Action::Halt)])
            .build();

        assert_ok!(router.dispatch(Client, "hello".to_string()).await);
        assert_eq!(entries(&log), vec!["a", "b", "d:X"]);
    }

    #[tokio::test]
    async fn test_halt_resolves_error() {
        let log = new_log();
        let router = Router::builder()
            .register_handlers([
                step(&log, "a", Action::Advance),
                step(&log, "b", Action::Signal("BHandler error")),
                step(&log, "c", Action::Advance),
            ])
            .register_error_handlers([
                recover(&log, "d", Action::Advance),
                recover(&log, "e", Action::Halt),
                recover(&log, "f", Action::Signal("Y")),
            ])
            .build();

        assert_ok!(router.dispatch(Client, "hello".to_string()).await);
        assert_eq!(
            entries(&log),
            vec!["a", "b", "d:BHandler error", "e:BHandler error"]
        );
    }

    #[tokio::test]
    async fn test_exhausted_error_chain_returns_latest_error() {
        let log = new_log();
        let router = Router::builder()
            .register_handlers([
                step(&log, "a", Action::Advance),
                step(&log, "b", Action::Signal("X")),
                step(&log, "c", Action::Advance),
            ])
            .register_error_handlers([
                recover(&log, "d", Action::Advance),
                recover(&log, "e", Action::Replace { from: "X", to: "Z" }),
            ])
            .build();

        let err = assert_err!(router.dispatch(Client, "hello".to_string()).await);
        assert_eq!(err.handler_error().to_string(), "Z");
        // "Z" restarts the error chain, which then runs off its end.
        assert_eq!(entries(&log), vec!["a", "b", "d:X", "e:X", "d:Z", "e:Z"]);
    }

    #[tokio::test]
    async fn test_every_error_handler_advancing_returns_error() {
        let log = new_log();
        let router = Router::builder()
            .register_handlers([step(&log, "a", Action::Signal("X"))])
            .register_error_handlers([
                recover(&log, "d", Action::Advance),
                recover(&log, "e", Action::Advance),
            ])
            .build();

        let err = assert_err!(router.dispatch(Client, "hello".to_string()).await);
        assert_eq!(err.handler_error().to_string(), "X");
        assert_eq!(entries(&log), vec!["a", "d:X", "e:X"]);
    }

    #[tokio::test]
    async fn test_error_handler_can_replace_error_for_later_recovery() {
        let log = new_log();
        let replace = into_error_handler(error_handler_fn(
            |ctrl: Control, _client: Arc<Client>, _text: Arc<String>, err: HandlerError| async move {
                if err.to_string() == "X" {
                    ctrl.signal_error("retry");
                } else {
                    ctrl.advance();
                }
            },
        ));
        let resolve = into_error_handler(error_handler_fn(
            |ctrl: Control, _client: Arc<Client>, _text: Arc<String>, err: HandlerError| async move {
                if err.to_string() == "retry" {
                    ctrl.halt();
                } else {
                    ctrl.advance();
                }
            },
        ));
        let router = Router::builder()
            .register_handlers([step(&log, "a", Action::Signal("X"))])
            .register_error_handlers([replace, recover(&log, "seen", Action::Advance), resolve])
            .build();

        assert_ok!(router.dispatch(Client, "hello".to_string()).await);
        assert_eq!(entries(&log), vec!["a", "seen:retry"]);
    }

    #[tokio::test]
    async fn test_unconditional_resignal_never_terminates() {
        let passes = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&passes);
        let resignal = into_error_handler(error_handler_fn(
            move |ctrl: Control, _client: Arc<Client>, _text: Arc<String>, _err: HandlerError| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    tokio::task::yield_now().await;
                    ctrl.signal_error("Z");
                }
            },
        ));
        let log = new_log();
        let router = Router::builder()
            .register_handlers([
                step(&log, "a", Action::Advance),
                step(&log, "b", Action::Signal("X")),
                step(&log, "c", Action::Advance),
            ])
            .register_error_handlers([recover(&log, "d", Action::Advance), resignal])
            .build();

        let result = tokio::time::timeout(
            Duration::from_millis(200),
            router.dispatch(Client, "hello".to_string()),
        )
        .await;

        assert!(result.is_err(), "dispatch returned: {result:?}");
        assert!(passes.load(Ordering::SeqCst) > 1);
        let seen = entries(&log);
        assert_eq!(seen[..4], ["a", "b", "d:X", "d:Z"]);
        assert!(!seen.contains(&"c".to_string()));
    }

    #[tokio::test]
    async fn test_signal_error_without_error_chain() {
        let log = new_log();
        let router = Router::builder()
            .register_handlers([step(&log, "a", Action::Signal("boom"))])
            .build();

        let err = assert_err!(router.dispatch(Client, "hello".to_string()).await);
        assert_eq!(err.to_string(), "unresolved handler error: boom");
    }

    #[tokio::test]
    async fn test_silent_stop_ends_dispatch() {
        let log = new_log();
        let router = Router::builder()
            .register_handlers([
                step(&log, "a", Action::Advance),
                step(&log, "b", Action::Nothing),
                step(&log, "c", Action::Advance),
            ])
            .build();

        assert_ok!(router.dispatch(Client, "hello".to_string()).await);
        assert_eq!(entries(&log), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_silent_stop_in_error_chain_drops_error() {
        let log = new_log();
        let router = Router::builder()
            .register_handlers([step(&log, "a", Action::Signal("X"))])
            .register_error_handlers([
                recover(&log, "d", Action::Nothing),
                recover(&log, "e", Action::Advance),
            ])
            .build();

        assert_ok!(router.dispatch(Client, "hello".to_string()).await);
        assert_eq!(entries(&log), vec!["a", "d:X"]);
    }

    #[tokio::test]
    async fn test_halt_in_normal_chain_is_ignored() {
        let log = new_log();
        let router = Router::<Client, String>::builder()
            .handle(|ctrl, _client, _text| async move {
                ctrl.halt();
                ctrl.advance();
            })
            .register_handlers([step(&log, "after", Action::Advance)])
            .build();

        assert_ok!(router.dispatch(Client, "hello".to_string()).await);
        assert_eq!(entries(&log), vec!["after"]);
    }

    #[tokio::test]
    async fn test_first_control_call_governs() {
        let log = new_log();
        let router = Router::<Client, String>::builder()
            .handle(|ctrl, _client, _text| async move {
                ctrl.advance();
                ctrl.signal_error("ignored");
            })
            .register_handlers([step(&log, "next", Action::Advance)])
            .register_error_handlers([recover(&log, "recover", Action::Halt)])
            .build();

        assert_ok!(router.dispatch(Client, "hello".to_string()).await);
        assert_eq!(entries(&log), vec!["next"]);
    }

    #[tokio::test]
    async fn test_value_visible_only_downstream() {
        let seen = new_log();
        let probe = |seen: &Log, name: &'static str| {
            let seen = Arc::clone(seen);
            into_handler(handler_fn(
                move |ctrl: Control, _client: Arc<Client>, _text: Arc<String>| {
                    let seen = Arc::clone(&seen);
                    async move {
                        let value = ctrl.value::<&str>("foo").copied().unwrap_or("-");
                        seen.lock().push(format!("{name}={value}"));
                        ctrl.advance();
                    }
                },
            ))
        };

        let router = Router::builder()
            .register_handlers([probe(&seen, "before")])
            .handle(|ctrl, _client, _text| async move {
                ctrl.advance_with_value("foo", "bar");
            })
            .register_handlers([probe(&seen, "after"), probe(&seen, "later")])
            .build();

        assert_ok!(router.dispatch(Client, "hello".to_string()).await);
        assert_eq!(entries(&seen), vec!["before=-", "after=bar", "later=bar"]);
    }

    #[tokio::test]
    async fn test_value_survives_into_error_chain() {
        let seen = new_log();
        let seen_clone = Arc::clone(&seen);
        let router = Router::<Client, String>::builder()
            .handle(|ctrl, _client, _text| async move {
                ctrl.advance_with_value("user", 42_u64);
            })
            .handle(|ctrl, _client, _text| async move {
                ctrl.signal_error("fail");
            })
            .handle_error(move |ctrl, _client, _text, _err| {
                let seen = Arc::clone(&seen_clone);
                async move {
                    let user = ctrl.value::<u64>("user").copied();
                    seen.lock().push(format!("{user:?}"));
                    ctrl.halt();
                }
            })
            .build();

        assert_ok!(router.dispatch(Client, "hello".to_string()).await);
        assert_eq!(entries(&seen), vec!["Some(42)"]);
    }

    #[tokio::test]
    async fn test_dispatch_with_seeds_overlay() {
        let router = Router::<Client, String>::builder()
            .handle(|ctrl, _client, _text| async move {
                if ctrl.value::<u32>("tenant") == Some(&7) {
                    ctrl.advance();
                } else {
                    ctrl.signal_error("missing tenant");
                }
            })
            .build();

        let seed = Values::new().with("tenant", 7_u32);
        assert_ok!(router.dispatch_with(seed, Client, "hello".to_string()).await);
        assert_err!(router.dispatch(Client, "hello".to_string()).await);
    }

    #[tokio::test]
    async fn test_concurrent_dispatches_do_not_share_values() {
        let router = Router::<Client, String>::builder()
            .handle(|ctrl, _client, text| async move {
                ctrl.advance_with_value("text", text.to_string());
            })
            .handle(|ctrl, _client, _text| async move {
                tokio::task::yield_now().await;
                ctrl.advance();
            })
            .handle(|ctrl, _client, text| async move {
                match ctrl.value::<String>("text") {
                    Some(seen) if seen == text.as_str() => ctrl.advance(),
                    _ => ctrl.signal_error(format!("overlay leaked into {text}")),
                }
            })
            .build();

        let (first, second) = tokio::join!(
            router.dispatch(Client, "one".to_string()),
            router.dispatch(Client, "two".to_string()),
        );
        assert_ok!(first);
        assert_ok!(second);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_parallel_tasks_share_router() {
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = Arc::clone(&counter);
        let router = Router::<Client, String>::builder()
            .handle(move |ctrl, _client, _text| {
                let counter = Arc::clone(&counter_clone);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    ctrl.advance();
                }
            })
            .build();

        let client = Arc::new(Client);
        let tasks: Vec<_> = (0..32)
            .map(|i| {
                let router = router.clone();
                let client = Arc::clone(&client);
                tokio::spawn(async move { router.dispatch(client, format!("msg {i}")).await })
            })
            .collect();

        for task in tasks {
            assert_ok!(task.await.expect("dispatch task panicked"));
        }
        assert_eq!(counter.load(Ordering::SeqCst), 32);
    }

    #[tokio::test]
    async fn test_route_filter_runs_on_exact_match_only() {
        let log = new_log();
        let router = Router::builder()
            .register_route("/start", [step(&log, "start", Action::Advance)])
            .register_handlers([step(&log, "tail", Action::Advance)])
            .build();

        assert_ok!(router.dispatch(Client, "/start".to_string()).await);
        assert_eq!(entries(&log), vec!["start", "tail"]);

        log.lock().clear();
        assert_ok!(router.dispatch(Client, "/help".to_string()).await);
        assert_eq!(entries(&log), vec!["tail"]);
    }

    #[tokio::test]
    async fn test_non_matching_route_does_not_stop_chain() {
        let log = new_log();
        let router = Router::builder()
            .register_route(
                "/start",
                [
                    step(&log, "silent", Action::Nothing),
                    step(&log, "never", Action::Advance),
                ],
            )
            .register_handlers([step(&log, "tail", Action::Advance)])
            .build();

        assert_eq!(router.handler_count(), 3);
        assert_ok!(router.dispatch(Client, "/help".to_string()).await);
        assert_eq!(entries(&log), vec!["tail"]);

        log.lock().clear();
        assert_ok!(router.dispatch(Client, "/start".to_string()).await);
        assert_eq!(entries(&log), vec!["silent"]);
    }

    #[tokio::test]
    async fn test_route_closure_and_custom_predicate() {
        let log = new_log();
        let log_clone = Arc::clone(&log);
        let router = Router::<Client, String>::builder()
            .route("/ping", move |ctrl, _client, _text| {
                let log = Arc::clone(&log_clone);
                async move {
                    log.lock().push("pong".to_string());
                    ctrl.advance();
                }
            })
            .route_with(
                |text: &String| text.starts_with("/echo "),
                handler_fn(|ctrl: Control, _client: Arc<Client>, _text: Arc<String>| async move {
                    ctrl.signal_error("echo failed");
                }),
            )
            .build();

        assert_ok!(router.dispatch(Client, "/ping".to_string()).await);
        assert_eq!(entries(&log), vec!["pong"]);
        assert_err!(router.dispatch(Client, "/echo hi".to_string()).await);
        assert_ok!(router.dispatch(Client, "/echo".to_string()).await);
    }

    #[tokio::test]
    async fn test_retained_control_has_no_effect() {
        let stash: Arc<Mutex<Option<Control>>> = Arc::new(Mutex::new(None));
        let stash_clone = Arc::clone(&stash);
        let log = new_log();
        let router = Router::<Client, String>::builder()
            .handle(move |ctrl, _client, _text| {
                let stash = Arc::clone(&stash_clone);
                async move {
                    *stash.lock() = Some(ctrl.clone());
                    ctrl.advance();
                }
            })
            .register_error_handlers([recover(&log, "recover", Action::Halt)])
            .build();

        assert_ok!(router.dispatch(Client, "hello".to_string()).await);

        let retained = stash.lock().take().expect("control was stashed");
        retained.signal_error("too late");
        assert!(!retained.is_decided());
        assert!(entries(&log).is_empty());
    }

    struct Counter {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Handler<Client, String> for Arc<Counter> {
        async fn call(&self, ctrl: Control, _client: Arc<Client>, _text: Arc<String>) {
            self.calls.fetch_add(1, Ordering::SeqCst);
            ctrl.advance();
        }
    }

    #[tokio::test]
    async fn test_struct_handler() {
        let counter = Arc::new(Counter {
            calls: AtomicUsize::new(0),
        });
        let router = Router::<Client, String>::builder()
            .handler(Arc::clone(&counter))
            .handler(Arc::clone(&counter))
            .build();

        assert_ok!(router.dispatch(Client, "hello".to_string()).await);
        assert_eq!(counter.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_router_as_tower_service() {
        let router = Router::<Client, String>::builder()
            .handle(|ctrl, _client, text| async move {
                if text.is_empty() {
                    ctrl.signal_error("empty");
                } else {
                    ctrl.advance();
                }
            })
            .build();

        let client = Arc::new(Client);
        assert_ok!(
            router
                .clone()
                .oneshot((Arc::clone(&client), Arc::new("hi".to_string())))
                .await
        );
        let err = assert_err!(router.oneshot((client, Arc::new(String::new()))).await);
        assert_eq!(err.handler_error().to_string(), "empty");
    }

    #[test]
    fn test_builder_counts_and_debug() {
        let log = new_log();
        let builder = Router::builder()
            .register_handlers([step(&log, "a", Action::Advance)])
            .register_error_handlers([
                recover(&log, "d", Action::Halt),
                recover(&log, "e", Action::Halt),
            ]);

        assert_eq!(builder.handler_count(), 1);
        assert_eq!(builder.error_handler_count(), 2);

        let router = builder.build();
        assert_eq!(
            format!("{router:?}"),
            "Router { handler_count: 1, error_handler_count: 2 }"
        );
    }

    #[test]
    fn test_dispatch_driven_without_runtime_macro() {
        let router = Router::<Client, String>::builder()
            .handle(|ctrl, _client, _text| async move { ctrl.advance() })
            .build();

        assert_ok!(tokio_test::block_on(router.dispatch(Client, "x".to_string())));
    }
}

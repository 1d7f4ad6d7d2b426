//! # Switchyard Core
//!
//! The chain-of-responsibility engine behind Switchyard.
//!
//! A [`Router`] holds two ordered handler chains:
//!
//! - **Normal chain**: [`Handler`]s that process an inbound payload
//! - **Error chain**: [`ErrorHandler`]s that try to recover when a handler
//!   signals an error
//!
//! Every handler receives a [`Control`] and continues the dispatch
//! explicitly through it. Nothing proceeds implicitly: a handler that neither
//! advances nor signals an error ends the dispatch.
//!
//! ```text
//!              advance            advance
//!  payload ──▶ H0 ─────────▶ H1 ─────────▶ H2 ──▶ Ok(())
//!                             │
//!                             │ signal_error(e)
//!                             ▼
//!                            E0 ─────────▶ E1 ──▶ Err(Unresolved(e))
//!                                advance   │
//!                                          │ halt
//!                                          ▼
//!                                        Ok(())
//! ```
//!
//! Values added with [`Control::advance_with_value`] land in a per-dispatch
//! [`Values`] overlay that later handlers of the same dispatch can read.
//!
//! ## Example
//!
//! ```rust,ignore
//! use switchyard_core::prelude::*;
//!
//! let router = Router::<Client, String>::builder()
//!     .route("/start", |ctrl, client, _text| async move {
//!         match client.reply("welcome").await {
//!             Ok(()) => ctrl.advance(),
//!             Err(e) => ctrl.signal_error(e),
//!         }
//!     })
//!     .handle_error(|ctrl, _client, text, err| async move {
//!         warn!(%text, error = %err, "could not reply");
//!         ctrl.halt();
//!     })
//!     .build();
//!
//! router.dispatch(client, "/start".to_string()).await?;
//! ```

mod context;
pub mod control;
pub mod error;
pub mod handler;
pub mod route;
pub mod router;
pub mod values;

pub use control::{Chain, Control};
pub use error::{BoxError, DispatchError, DispatchResult, HandlerError};
pub use handler::{
    BoxedErrorHandler, BoxedHandler, ErrorHandler, ErrorHandlerFn, Handler, HandlerFn,
    error_handler_fn, handler_fn, into_error_handler, into_handler,
};
pub use route::{AsText, Equal, Predicate, Route};
pub use router::{Router, RouterBuilder};
pub use values::{Value, Values};

pub use async_trait::async_trait;

/// Prelude for common imports.
pub mod prelude {
    pub use super::{
        AsText, BoxError, BoxedErrorHandler, BoxedHandler, Chain, Control, DispatchError,
        DispatchResult, ErrorHandler, Handler, HandlerError, Router, RouterBuilder, Values,
        async_trait, error_handler_fn, handler_fn, into_error_handler, into_handler,
    };
}

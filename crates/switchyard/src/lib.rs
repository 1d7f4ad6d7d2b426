//! # Switchyard
//!
//! Chain-of-responsibility routing for inbound messages, with an explicit
//! error-recovery chain.
//!
//! ## Overview
//!
//! Handlers are registered on a [`Router`](core::Router) in order. Each one
//! receives a [`Control`](core::Control) and decides how the dispatch goes on:
//! advance to the next handler, advance while handing a value downstream,
//! signal an error, or simply return to stop. Signalled errors go to a
//! separate chain of error handlers that can resolve them with `halt`.
//!
//! ```text
//! ┌────────────┐     ┌──────────┐     ┌─────────────────────────────────┐
//! │   Source   │────▶│ Listener │────▶│ Router (one task per payload)   │
//! │ (poll/push)│     │          │     │   normal chain ─▶ error chain   │
//! └────────────┘     └──────────┘     └─────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use switchyard::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ConfigLoader::new().load_validated()?;
//!     logging::init_from_config(&config.logging)?;
//!
//!     let router = Router::<Api, Update>::builder()
//!         .route("/start", |ctrl, api, update| async move {
//!             match api.reply(&update, "hello").await {
//!                 Ok(()) => ctrl.advance(),
//!                 Err(e) => ctrl.signal_error(e),
//!             }
//!         })
//!         .handle_error(|ctrl, _api, _update, err| async move {
//!             warn!(error = %err, "reply failed");
//!             ctrl.halt();
//!         })
//!         .build();
//!
//!     let (source, handle) = ChannelSource::new(256);
//!     spawn_webhook(&config.listener, handle);
//!
//!     Listener::from_config(router, Api::new(), &config.listener)
//!         .run(source)
//!         .await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `toml-config` *(default)*: TOML configuration files
//! - `yaml-config`: YAML configuration files
//! - `json-log`: JSON log output

pub use switchyard_core as core;
pub use switchyard_runtime as runtime;

pub use switchyard_runtime::{config, logging};

/// Prelude module for convenient imports.
pub mod prelude {
    // Routing
    pub use switchyard_core::prelude::*;
    pub use switchyard_core::{Equal, Predicate, Route};

    // Runtime
    pub use switchyard_runtime::{
        CancellationToken, ChannelSource, ConfigLoader, Listener, Poller, PollingSource,
        RuntimeError, Source, SourceEvent, SourceHandle, SwitchyardConfig, cancellation, logging,
    };

    // Logging macros
    pub use switchyard_runtime::prelude::*;
}

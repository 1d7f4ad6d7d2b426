//! # Switchyard Runtime
//!
//! Everything around the dispatch engine that a running service needs:
//!
//! - [`Listener`]: receives payloads from a [`Source`] and dispatches each
//!   one on its own task, with graceful shutdown
//! - [`source`]: push ([`ChannelSource`]) and pull ([`PollingSource`])
//!   payload sources
//! - [`config`]: layered configuration (files, environment, overrides)
//! - [`logging`]: `tracing` subscriber setup from configuration
//!
//! ```rust,ignore
//! use switchyard_runtime::{ConfigLoader, Listener, PollingSource, logging};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ConfigLoader::new().load_validated()?;
//!     logging::init_from_config(&config.logging)?;
//!
//!     let polling = config.listener.polling.clone().unwrap_or_default();
//!     let source = PollingSource::from_config(MyPoller::new(polling.offset), &polling);
//!
//!     Listener::from_config(router, client, &config.listener)
//!         .run(source)
//!         .await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod listener;
pub mod logging;
pub mod source;

pub use config::{ConfigError, ConfigLoader, ConfigResult, ListenerConfig, SwitchyardConfig};
pub use error::{RuntimeError, RuntimeResult};
pub use listener::{CANCELLATION_KEY, Listener, cancellation};
pub use logging::{LoggingBuilder, SpanEvents};
pub use source::{
    ChannelSource, Poller, PollingSource, Source, SourceClosed, SourceEvent, SourceHandle,
};

pub use tokio_util::sync::CancellationToken;
pub use tracing;
pub use tracing_subscriber;

/// Logging macros for handler code.
pub mod prelude {
    pub use tracing::{Level, debug, error, info, instrument, span, trace, warn};
}

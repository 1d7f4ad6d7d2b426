//! Configuration for the Switchyard runtime.
//!
//! Settings are layered with figment (see [`loader`]), deserialized into
//! [`SwitchyardConfig`] and checked by [`validate_config`].

pub mod error;
pub mod loader;
pub mod schema;
pub mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigLoader, Profile, load_config, load_config_from_file};
pub use schema::{
    Delivery, ListenConfig, ListenerConfig, LogFormat, LogLevel, LogOutput, LogRotation,
    LoggingConfig, PollingConfig, SpanEventConfig, SwitchyardConfig, TlsConfig, WebhookConfig,
};
pub use validation::validate_config;

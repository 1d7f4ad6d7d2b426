//! Configuration validation utilities.

use std::path::Path;

use super::error::{ConfigError, ConfigResult};
use super::schema::{
    ListenConfig, ListenerConfig, LogOutput, LoggingConfig, PollingConfig, SwitchyardConfig,
    TlsConfig, WebhookConfig,
};

/// Longest server-side poll wait accepted, in seconds.
const MAX_POLL_TIMEOUT_SECS: u64 = 600;

/// Validates the entire configuration.
pub fn validate_config(config: &SwitchyardConfig) -> ConfigResult<()> {
    validate_logging_config(&config.logging)?;
    validate_listener_config(&config.listener)?;
    Ok(())
}

fn validate_logging_config(logging: &LoggingConfig) -> ConfigResult<()> {
    if logging.output == LogOutput::File && logging.file_path.is_none() {
        return Err(ConfigError::missing_field("logging.file_path"));
    }

    for target in logging.filters.keys() {
        if target.is_empty() || target.contains([' ', '=', ',']) {
            return Err(ConfigError::validation(format!(
                "Invalid log filter target: {target:?}"
            )));
        }
    }

    Ok(())
}

fn validate_listener_config(listener: &ListenerConfig) -> ConfigResult<()> {
    if listener.polling.is_none() && listener.webhook.is_none() {
        return Err(ConfigError::validation(
            "Polling or webhook settings are required to listen for payloads",
        ));
    }

    if let Some(polling) = &listener.polling {
        validate_polling_config(polling)?;
    }
    if let Some(webhook) = &listener.webhook {
        validate_webhook_config(webhook)?;
    }

    Ok(())
}

fn validate_polling_config(polling: &PollingConfig) -> ConfigResult<()> {
    if polling.offset < 0 {
        return Err(ConfigError::validation("Polling offset cannot be negative"));
    }

    if polling.timeout_secs > MAX_POLL_TIMEOUT_SECS {
        return Err(ConfigError::validation(format!(
            "Polling timeout must be at most {MAX_POLL_TIMEOUT_SECS} seconds"
        )));
    }

    // Short polling with no pause would spin.
    if polling.timeout_secs == 0 && polling.interval_ms == 0 {
        return Err(ConfigError::validation(
            "Polling interval must be greater than 0 when timeout is 0",
        ));
    }

    Ok(())
}

fn validate_webhook_config(webhook: &WebhookConfig) -> ConfigResult<()> {
    validate_url(&webhook.url)?;

    if let Some(certificate) = &webhook.certificate {
        validate_file_path(certificate, "listener.webhook.certificate")?;
    }

    validate_listen_config(&webhook.listen)
}

fn validate_listen_config(listen: &ListenConfig) -> ConfigResult<()> {
    if listen.addr.is_empty() {
        return Err(ConfigError::missing_field("listener.webhook.listen.addr"));
    }

    if listen.port == 0 {
        return Err(ConfigError::validation("Webhook listen port must be non-zero"));
    }

    if let Some(TlsConfig { cert, key }) = &listen.tls {
        validate_file_path(cert, "listener.webhook.listen.tls.cert")?;
        validate_file_path(key, "listener.webhook.listen.tls.key")?;
    }

    Ok(())
}

fn validate_url(url: &str) -> ConfigResult<()> {
    if url.is_empty() {
        return Err(ConfigError::missing_field("listener.webhook.url"));
    }

    let valid_schemes = ["http://", "https://"];
    if !valid_schemes.iter().any(|s| url.starts_with(s)) {
        return Err(ConfigError::validation(format!(
            "Invalid webhook URL {url}: must start with one of {valid_schemes:?}"
        )));
    }

    Ok(())
}

fn validate_file_path(path: &Path, field: &str) -> ConfigResult<()> {
    if path.as_os_str().is_empty() {
        return Err(ConfigError::missing_field(field));
    }
    Ok(())
}

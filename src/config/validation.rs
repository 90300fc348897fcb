//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, addresses parse)
//! - Check session key material before any store is built
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ServerConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use thiserror::Error;

use crate::config::schema::ServerConfig;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Upper bound for `session.max_age_secs` (400 days, the browser cookie cap).
pub const MAX_SESSION_AGE_SECS: u64 = 400 * 24 * 60 * 60;

/// A single semantic problem with a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("invalid bind address {0:?}")]
    BindAddress(String),

    #[error("invalid metrics address {0:?}")]
    MetricsAddress(String),

    #[error("unknown log level {0:?}")]
    LogLevel(String),

    #[error("timeouts.request_secs must be greater than zero")]
    ZeroRequestTimeout,

    #[error("lifecycle.shutdown_timeout_ms must be greater than zero")]
    ZeroShutdownTimeout,

    #[error("session.cookie_name must not be empty")]
    EmptyCookieName,

    #[error("at least one key required for sessions")]
    NoSessionKeys,

    #[error("session key #{0} is not valid base64 or is empty")]
    SessionKey(usize),

    #[error("session.cleanup_interval_secs must be greater than zero")]
    ZeroCleanupInterval,

    #[error("session.max_age_secs must be between 1 and {max}, got {0}", max = MAX_SESSION_AGE_SECS)]
    SessionMaxAge(u64),
}

/// Validate a configuration, collecting every problem found.
pub fn validate_config(config: &ServerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::BindAddress(
            config.listener.bind_address.clone(),
        ));
    }

    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::ZeroRequestTimeout);
    }

    if config.lifecycle.shutdown_timeout_ms == 0 {
        errors.push(ValidationError::ZeroShutdownTimeout);
    }

    let observability = &config.observability;
    if !LOG_LEVELS.contains(&observability.log_level.to_lowercase().as_str()) {
        errors.push(ValidationError::LogLevel(observability.log_level.clone()));
    }
    if observability.metrics_enabled
        && observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::MetricsAddress(
            observability.metrics_address.clone(),
        ));
    }

    if config.session.enabled {
        if config.session.cookie_name.is_empty() {
            errors.push(ValidationError::EmptyCookieName);
        }
        if config.session.keys.is_empty() {
            errors.push(ValidationError::NoSessionKeys);
        }
        if config.session.cleanup_interval_secs == 0 {
            errors.push(ValidationError::ZeroCleanupInterval);
        }
        if !(1..=MAX_SESSION_AGE_SECS).contains(&config.session.max_age_secs) {
            errors.push(ValidationError::SessionMaxAge(config.session.max_age_secs));
        }
        for (i, key) in config.session.keys.iter().enumerate() {
            match STANDARD.decode(key) {
                Ok(bytes) if !bytes.is_empty() => {}
                _ => errors.push(ValidationError::SessionKey(i)),
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

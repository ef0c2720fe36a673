//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (pool size > 0, sample rates within [0, 1])
//! - Check addresses parse before any subsystem binds them
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: DaemonConfig → Result<(), Vec<ValidationError>>
//! - Storage credentials are left to the storage selector

use std::net::SocketAddr;

use crate::config::schema::DaemonConfig;

/// A single semantic problem with a configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Validate a parsed configuration.
pub fn validate_config(config: &DaemonConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.server.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "server.bind_address",
            format!("'{}' is not a socket address", config.server.bind_address),
        ));
    }

    if config.pool.size == 0 {
        errors.push(ValidationError::new("pool.size", "must be greater than zero"));
    }

    for (field, rate) in [
        ("telemetry.sample_rate", config.telemetry.sample_rate),
        ("telemetry.traces_sample_rate", config.telemetry.traces_sample_rate),
    ] {
        if !(0.0..=1.0).contains(&rate) {
            errors.push(ValidationError::new(field, format!("{rate} is outside [0, 1]")));
        }
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", config.observability.metrics_address),
        ));
    }

    if config.cluster.heartbeat_interval_secs == 0 {
        errors.push(ValidationError::new(
            "cluster.heartbeat_interval_secs",
            "must be greater than zero",
        ));
    }

    if config.persistence.max_storage_size == 0 {
        errors.push(ValidationError::new(
            "persistence.max_storage_size",
            "must be greater than zero",
        ));
    }

    if config.logging.directory.trim().is_empty() {
        errors.push(ValidationError::new("logging.directory", "must not be empty"));
    }
    if config.logging.file_name.trim().is_empty() {
        errors.push(ValidationError::new("logging.file_name", "must not be empty"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(validate_config(&DaemonConfig::default()).is_ok());
    }

    #[test]
    fn test_collects_every_error() {
        let mut config = DaemonConfig::default();
        config.pool.size = 0;
        config.telemetry.sample_rate = 1.5;
        config.server.bind_address = "not-an-address".into();

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field).collect();
        assert_eq!(
            fields,
            vec!["server.bind_address", "pool.size", "telemetry.sample_rate"]
        );
    }

    #[test]
    fn test_unknown_storage_kind_is_not_a_validation_error() {
        let mut config = DaemonConfig::default();
        config.storage.kind = "floppy".into();
        assert!(validate_config(&config).is_ok());
    }
}

//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check the upstream URL resolves to a usable target
//! - Validate value ranges (timeouts > 0, frame size > 0)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::ProxyConfig;
use crate::resilience::timeouts::parse_method;
use crate::routing::upstream::UpstreamTarget;
use crate::security::headers::HeaderPolicy;

/// A single semantic problem in the configuration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("upstream.url is required")]
    MissingUpstream,

    #[error("upstream.url is invalid: {0}")]
    InvalidUpstream(String),

    #[error("listener.bind_address '{0}' is not a socket address")]
    InvalidBindAddress(String),

    #[error("listener.max_connections must be greater than zero")]
    ZeroMaxConnections,

    #[error("{0} must be greater than zero")]
    ZeroTimeout(String),

    #[error("timeouts.rules[{0}].contains must not be empty")]
    EmptyTimeoutPattern(usize),

    #[error("timeouts.rules[{0}].methods contains invalid method '{1}'")]
    InvalidMethod(usize, String),

    #[error("headers: {0}")]
    InvalidHeader(String),

    #[error("media.frame_size must be greater than zero")]
    ZeroFrameSize,

    #[error("tunnel.path '{0}' must start with '/'")]
    InvalidTunnelPath(String),
}

/// Validate a fully merged configuration.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.upstream.url.trim().is_empty() {
        errors.push(ValidationError::MissingUpstream);
    } else if let Err(e) = UpstreamTarget::parse(&config.upstream.url) {
        errors.push(ValidationError::InvalidUpstream(e.to_string()));
    }

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidBindAddress(
            config.listener.bind_address.clone(),
        ));
    }
    if config.listener.max_connections == 0 {
        errors.push(ValidationError::ZeroMaxConnections);
    }

    if config.timeouts.default_ms == 0 {
        errors.push(ValidationError::ZeroTimeout("timeouts.default_ms".into()));
    }
    if config.timeouts.connect_ms == 0 {
        errors.push(ValidationError::ZeroTimeout("timeouts.connect_ms".into()));
    }
    for (i, rule) in config.timeouts.rules.iter().enumerate() {
        if rule.contains.is_empty() {
            errors.push(ValidationError::EmptyTimeoutPattern(i));
        }
        if rule.timeout_ms == 0 {
            errors.push(ValidationError::ZeroTimeout(format!(
                "timeouts.rules[{i}].timeout_ms"
            )));
        }
        for method in &rule.methods {
            if parse_method(method).is_none() {
                errors.push(ValidationError::InvalidMethod(i, method.clone()));
            }
        }
    }

    if let Err(e) = HeaderPolicy::from_config(&config.headers) {
        errors.push(ValidationError::InvalidHeader(e.to_string()));
    }

    if config.media.frame_size == 0 {
        errors.push(ValidationError::ZeroFrameSize);
    }

    if !config.tunnel.path.starts_with('/') {
        errors.push(ValidationError::InvalidTunnelPath(config.tunnel.path.clone()));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

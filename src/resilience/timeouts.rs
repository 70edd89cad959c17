//! Timeout policy.
//!
//! # Responsibilities
//! - Map request path/method to the timeout applied to the upstream call
//! - Provide the connect timeout for the outbound client
//!
//! # Design Decisions
//! - The tiers are a data table from configuration, not branching code,
//!   so deployments behind a platform with a different request ceiling can
//!   retune them
//! - First matching rule wins; the table lists specific patterns first
//! - The selected timeout bounds both the wait for response headers and
//!   each idle gap while the body streams
//! - Timed-out requests return 504 Gateway Timeout

use std::time::Duration;

use axum::http::Method;

use crate::config::TimeoutConfig;

#[derive(Debug, Clone)]
struct CompiledRule {
    contains: String,
    timeout: Duration,
    methods: Vec<Method>,
}

impl CompiledRule {
    fn matches(&self, path: &str, method: &Method) -> bool {
        path.contains(self.contains.as_str())
            && (self.methods.is_empty() || self.methods.contains(method))
    }
}

/// Compiled timeout table.
#[derive(Debug, Clone)]
pub struct TimeoutPolicy {
    default: Duration,
    connect: Duration,
    rules: Vec<CompiledRule>,
}

impl TimeoutPolicy {
    pub fn from_config(config: &TimeoutConfig) -> Self {
        let rules = config
            .rules
            .iter()
            .map(|rule| CompiledRule {
                contains: rule.contains.clone(),
                timeout: Duration::from_millis(rule.timeout_ms),
                methods: rule
                    .methods
                    .iter()
                    .filter_map(|m| parse_method(m))
                    .collect(),
            })
            .collect();

        Self {
            default: Duration::from_millis(config.default_ms),
            connect: Duration::from_millis(config.connect_ms),
            rules,
        }
    }

    /// Timeout for a request.
    pub fn timeout_for(&self, path: &str, method: &Method) -> Duration {
        self.rules
            .iter()
            .find(|rule| rule.matches(path, method))
            .map(|rule| rule.timeout)
            .unwrap_or(self.default)
    }

    /// TCP connect timeout for upstream connections.
    pub fn connect_timeout(&self) -> Duration {
        self.connect
    }
}

/// Parse a configured method name; names are case-insensitive.
pub fn parse_method(raw: &str) -> Option<Method> {
    Method::from_bytes(raw.trim().to_ascii_uppercase().as_bytes()).ok()
}

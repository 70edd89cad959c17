//! Configuration loading from disk and the process environment.

use std::fs;
use std::path::{Path, PathBuf};

use clap::Parser;
use thiserror::Error;

use crate::config::schema::ProxyConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Command line arguments. Every flag can also come from the environment.
#[derive(Debug, Clone, Parser, Default)]
#[command(name = "emby-proxy")]
#[command(about = "Reverse proxy for a single Emby media server", long_about = None)]
pub struct Cli {
    /// Path to a TOML configuration file.
    #[arg(short, long, env = "EMBY_PROXY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Upstream base URL, overrides `upstream.url`.
    #[arg(short, long, env = "EMBY_SERVER")]
    pub upstream: Option<String>,

    /// Listen address, overrides `listener.bind_address`.
    #[arg(short, long, env = "EMBY_PROXY_BIND")]
    pub bind: Option<String>,

    /// Log level, overrides `observability.log_level`.
    #[arg(long, env = "EMBY_PROXY_LOG_LEVEL")]
    pub log_level: Option<String>,
}

/// Parse a TOML file without validating it.
pub fn read_config(path: &Path) -> Result<ProxyConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    Ok(toml::from_str(&content)?)
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<ProxyConfig, ConfigError> {
    let config = read_config(path)?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Build the effective configuration: file (if any), then CLI/env overrides,
/// then validation. Fails fast when the upstream is missing.
pub fn resolve_config(cli: &Cli) -> Result<ProxyConfig, ConfigError> {
    let mut config = match &cli.config {
        Some(path) => read_config(path)?,
        None => ProxyConfig::default(),
    };

    if let Some(upstream) = &cli.upstream {
        config.upstream.url = upstream.clone();
    }
    if let Some(bind) = &cli.bind {
        config.listener.bind_address = bind.clone();
    }
    if let Some(level) = &cli.log_level {
        config.observability.log_level = level.clone();
    }

    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

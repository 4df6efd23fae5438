// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

/// Maximum size for request body, request headers, response body and response headers
pub const DEFAULT_MAX_ENTRY_SIZE: usize = 2048;
/// Maximum amount of span bytes written for the downstream calls of one invocation
pub const DEFAULT_MAX_SIZE_FOR_REQUEST: usize = 1024 * 500;
pub const DEFAULT_SPOOL_DIR: &str = "/tmp/lambda-tracer-spans";
pub const DEFAULT_TIMEOUT_BUFFER_MS: u64 = 500;

const ENV_TOKEN: &str = "LAMBDA_TRACER_TOKEN";
const ENV_ENABLED: &str = "LAMBDA_TRACER_ENABLED";
const ENV_DEBUG: &str = "LAMBDA_TRACER_DEBUG";
const ENV_MAX_SIZE_FOR_REQUEST: &str = "LAMBDA_TRACER_MAX_SIZE_FOR_REQUEST";
const ENV_MAX_ENTRY_SIZE: &str = "LAMBDA_TRACER_MAX_ENTRY_SIZE";
const ENV_SPOOL_DIR: &str = "LAMBDA_TRACER_SPOOL_DIR";
const ENV_TIMEOUT_BUFFER_MS: &str = "LAMBDA_TRACER_TIMEOUT_BUFFER_MS";

/// Configuration of the handler wrapper and its exporter
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Credential stamped on every span so the shipping agent can upload them
    pub token: String,
    /// Switches instrumentation off completely when false
    pub enabled: bool,
    /// Emits tracer logs at debug level
    pub debug: bool,
    /// Prints generic spans to stdout instead of spooling vendor spans
    pub print_stdout: bool,
    pub max_entry_size: usize,
    pub max_size_for_request: usize,
    pub spool_dir: PathBuf,
    /// How long before the invocation deadline a best-effort end record is flushed
    pub timeout_buffer: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            token: String::new(),
            enabled: true,
            debug: false,
            print_stdout: false,
            max_entry_size: DEFAULT_MAX_ENTRY_SIZE,
            max_size_for_request: DEFAULT_MAX_SIZE_FOR_REQUEST,
            spool_dir: PathBuf::from(DEFAULT_SPOOL_DIR),
            timeout_buffer: Duration::from_millis(DEFAULT_TIMEOUT_BUFFER_MS),
        }
    }
}

impl Config {
    /// Overlays environment variables on top of the explicit options and validates the result.
    pub fn resolve(base: Config) -> Result<Config, ConfigError> {
        Self::resolve_with(base, |key| env::var(key).ok())
    }

    pub(crate) fn resolve_with<F>(base: Config, lookup: F) -> Result<Config, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let token = lookup(ENV_TOKEN)
            .filter(|token| !token.is_empty())
            .unwrap_or(base.token);

        let enabled = lookup(ENV_ENABLED)
            .and_then(|val| parse_bool(&val))
            .unwrap_or(base.enabled);
        let debug = lookup(ENV_DEBUG)
            .and_then(|val| parse_bool(&val))
            .unwrap_or(base.debug);

        // zero means unset, both here and in the explicit options
        let max_size_for_request = lookup(ENV_MAX_SIZE_FOR_REQUEST)
            .and_then(|val| val.trim().parse::<usize>().ok())
            .filter(|size| *size > 0)
            .unwrap_or(base.max_size_for_request);
        let max_entry_size = lookup(ENV_MAX_ENTRY_SIZE)
            .and_then(|val| val.trim().parse::<usize>().ok())
            .filter(|size| *size > 0)
            .unwrap_or(base.max_entry_size);

        let spool_dir = lookup(ENV_SPOOL_DIR)
            .filter(|dir| !dir.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or(base.spool_dir);
        let timeout_buffer = lookup(ENV_TIMEOUT_BUFFER_MS)
            .and_then(|val| val.trim().parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(base.timeout_buffer);

        let config = Config {
            token,
            enabled,
            debug,
            print_stdout: base.print_stdout,
            max_entry_size: non_zero_or(max_entry_size, DEFAULT_MAX_ENTRY_SIZE),
            max_size_for_request: non_zero_or(max_size_for_request, DEFAULT_MAX_SIZE_FOR_REQUEST),
            spool_dir,
            timeout_buffer,
        };
        config.validate()?;
        Ok(config)
    }

    /// Runs a validation of the required fields
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.token.trim().is_empty() {
            return Err(ConfigError::MissingToken);
        }
        Ok(())
    }
}

fn non_zero_or(value: usize, default: usize) -> usize {
    if value == 0 {
        default
    } else {
        value
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "t" | "true" | "yes" | "on" => Some(true),
        "0" | "f" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

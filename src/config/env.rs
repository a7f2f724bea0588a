//! Environment variable configuration
//!
//! Provides environment variable overrides for configuration.

use std::env;

/// Environment variable prefix
const ENV_PREFIX: &str = "TESTSHARD";

/// Environment configuration from environment variables
#[derive(Clone, Debug, Default)]
pub struct EnvConfig {
    /// Dispatch response timeout from TESTSHARD_ASYNC_TIMEOUT
    pub async_timeout: Option<u64>,
    /// Per-module execution timeout from TESTSHARD_MODULE_TIMEOUT
    pub module_timeout: Option<u64>,
    /// Output format from TESTSHARD_FORMAT
    pub format: Option<String>,
    /// Timing history path from TESTSHARD_TIMING_FILE
    pub timing_file: Option<String>,
    /// Verbose from TESTSHARD_VERBOSE
    pub verbose: Option<bool>,
}

impl EnvConfig {
    /// Load configuration from environment variables
    pub fn load() -> Self {
        Self {
            async_timeout: get_env_parse("ASYNC_TIMEOUT"),
            module_timeout: get_env_parse("MODULE_TIMEOUT"),
            format: get_env("FORMAT"),
            timing_file: get_env("TIMING_FILE"),
            verbose: get_env_bool("VERBOSE"),
        }
    }

    /// Get the async timeout with fallback
    pub fn async_timeout_or(&self, default: u64) -> u64 {
        self.async_timeout.unwrap_or(default)
    }

    /// Get the module timeout with fallback
    pub fn module_timeout_or(&self, default: u64) -> u64 {
        self.module_timeout.unwrap_or(default)
    }

    /// Get the output format with fallback
    pub fn format_or(&self, default: &str) -> String {
        self.format.clone().unwrap_or_else(|| default.to_string())
    }
}

/// Get environment variable with prefix
fn get_env(name: &str) -> Option<String> {
    env::var(format!("{ENV_PREFIX}_{name}")).ok()
}

/// Get environment variable and parse to type
fn get_env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    get_env(name).and_then(|v| v.parse().ok())
}

/// Get environment variable as boolean
fn get_env_bool(name: &str) -> Option<bool> {
    get_env(name).map(|v| {
        matches!(
            v.to_lowercase().as_str(),
            "1" | "true" | "yes" | "on" | "enabled"
        )
    })
}

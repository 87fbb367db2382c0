mod client;
mod server;
mod validation;

pub use client::*;
pub use server::*;
pub use validation::*;

use serde::{Deserialize, Serialize};
use std::fmt;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub validation: ValidationConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub client: ClientConfig,
}

/// Upper bound above which `max_concurrent_calls` earns a warning.
const LARGE_POOL: usize = 4096;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if self.server.port == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "server.port".into(),
                message: "port must be greater than 0".into(),
            });
        }

        if self.server.host.is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "server.host".into(),
                message: "host must not be empty".into(),
            });
        }

        if self.server.max_concurrent_calls == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "server.max_concurrent_calls".into(),
                message: "worker pool must allow at least one call".into(),
            });
        } else if self.server.max_concurrent_calls > LARGE_POOL {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "server.max_concurrent_calls".into(),
                message: format!("{} is unusually large", self.server.max_concurrent_calls),
            });
        }

        if self.server.subscription_buffer == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "server.subscription_buffer".into(),
                message: "subscription buffer must hold at least one frame".into(),
            });
        }

        let base = &self.client.base_url;
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "client.base_url".into(),
                message: format!("{base} doesn't start with http:// or https://"),
            });
        }

        if !self.validation.enabled {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "validation.enabled".into(),
                message: "schema validation is disabled".into(),
            });
        }

        errors
    }

    /// True when [`validate`](Self::validate) reports no `Error`-severity issue.
    pub fn is_valid(&self) -> bool {
        self.validate()
            .iter()
            .all(|e| e.severity != ConfigSeverity::Error)
    }
}

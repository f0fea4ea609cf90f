//! Configuration types for the relay server and unhandled-request policy.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// What to do with a request no handler or committed route answers.
///
/// Local interceptors default to [`Warn`](UnhandledRequestPolicy::Warn); the
/// relay defaults to [`Error`](UnhandledRequestPolicy::Error), reflecting the
/// higher cost of an unnoticed mismatch once multiple processes are involved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnhandledRequestPolicy {
    /// Stay silent.
    Ignore,
    /// Log a warning.
    Warn,
    /// Log an error.
    Error,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_response_timeout_ms() -> u64 {
    30_000
}

fn default_on_unhandled() -> UnhandledRequestPolicy {
    UnhandledRequestPolicy::Error
}

/// Relay server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Host to bind the HTTP listener to.
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to bind. 0 binds an ephemeral port; the bound address is
    /// reported once the relay starts.
    #[serde(default)]
    pub port: u16,
    /// Bounded wait for each `responses/create` call. Expiry is treated as
    /// a bypass, never as an indefinitely pending request.
    #[serde(default = "default_response_timeout_ms")]
    pub response_timeout_ms: u64,
    /// Policy for requests no committed route answers.
    #[serde(default = "default_on_unhandled")]
    pub on_unhandled: UnhandledRequestPolicy,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: 0,
            response_timeout_ms: default_response_timeout_ms(),
            on_unhandled: default_on_unhandled(),
        }
    }
}

impl RelayConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, anyhow::Error> {
        let contents = std::fs::read_to_string(path)?;
        let config: RelayConfig = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = RelayConfig::default();
        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 0);
        assert_eq!(config.response_timeout(), Duration::from_secs(30));
        assert_eq!(config.on_unhandled, UnhandledRequestPolicy::Error);
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "host: 127.0.0.1\nport: 4100\nresponse_timeout_ms: 500\non_unhandled: warn"
        )
        .unwrap();

        let config = RelayConfig::from_file(file.path()).unwrap();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 4100);
        assert_eq!(config.response_timeout(), Duration::from_millis(500));
        assert_eq!(config.on_unhandled, UnhandledRequestPolicy::Warn);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "port: 4200").unwrap();

        let config = RelayConfig::from_file(file.path()).unwrap();
        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 4200);
        assert_eq!(config.on_unhandled, UnhandledRequestPolicy::Error);
    }
}

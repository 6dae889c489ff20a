use std::{env, path::PathBuf, time::Duration};

use crate::ide_ipc::CorrelationMode;

/// Endpoint the agent listens on when nothing else is configured.
pub const DEFAULT_URL: &str = "ws://localhost:65432/ide/ws";

/// Environment variable overriding [`DEFAULT_URL`].
pub const URL_ENV_VAR: &str = "IDE_BRIDGE_URL";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub url: String,
    /// Upper bound on waiting for queued frames to flush before the session
    /// id is requested.
    pub drain_timeout: Duration,
    pub drain_poll_interval: Duration,
    pub correlation: CorrelationMode,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            drain_timeout: Duration::from_secs(10),
            drain_poll_interval: Duration::from_secs(1),
            correlation: CorrelationMode::default(),
        }
    }
}

impl ClientConfig {
    /// Defaults, with the endpoint taken from `IDE_BRIDGE_URL` when set.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(url) = env::var(URL_ENV_VAR).ok().filter(|url| !url.is_empty()) {
            config.url = url;
        }
        config
    }

    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    #[must_use]
    pub const fn with_correlation(mut self, correlation: CorrelationMode) -> Self {
        self.correlation = correlation;
        self
    }
}

/// Where the binary writes its log.
pub fn log_file_path() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ide-bridge/ide-bridge.log")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.url, "ws://localhost:65432/ide/ws");
        assert_eq!(config.drain_timeout, Duration::from_secs(10));
        assert_eq!(config.drain_poll_interval, Duration::from_secs(1));
        assert_eq!(config.correlation, CorrelationMode::RequestId);
    }

    #[test]
    fn test_builders() {
        let config = ClientConfig::default()
            .with_url("ws://127.0.0.1:9000/ide/ws")
            .with_correlation(CorrelationMode::MessageType);
        assert_eq!(config.url, "ws://127.0.0.1:9000/ide/ws");
        assert_eq!(config.correlation, CorrelationMode::MessageType);
    }

    #[test]
    fn test_log_file_lives_under_crate_directory() {
        assert!(log_file_path().ends_with("ide-bridge/ide-bridge.log"));
    }
}

//! Engine configuration.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{DetourError, Result};

/// Default budget for connecting and receiving the first response bytes
pub const DEFAULT_FIRST_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Default cap on request bytes kept for replay on the detour path
pub const DEFAULT_MAX_REPLAY_BUFFER: usize = 64 * 1024;

/// Dialer tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetourOptions {
    /// Combined connect + first-read budget on the direct path
    pub first_read_timeout: Duration,
    /// Request bytes kept for replay; past this a failed direct attempt is
    /// not retried
    pub max_replay_buffer: usize,
}

impl Default for DetourOptions {
    fn default() -> Self {
        Self {
            first_read_timeout: DEFAULT_FIRST_READ_TIMEOUT,
            max_replay_buffer: DEFAULT_MAX_REPLAY_BUFFER,
        }
    }
}

impl DetourOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the first-read timeout.
    pub fn with_first_read_timeout(mut self, timeout: Duration) -> Self {
        self.first_read_timeout = timeout;
        self
    }

    /// Set the replay buffer cap.
    pub fn with_max_replay_buffer(mut self, size: usize) -> Self {
        self.max_replay_buffer = size;
        self
    }
}

/// Serializable engine configuration.
///
/// ```
/// use detour_engine::DetourConfig;
///
/// let config = DetourConfig::from_json(r#"{
///     "country": "IR",
///     "first_read_timeout_ms": 2000,
///     "whitelist": ["facebook.com", "twitter.com"],
///     "force_unwhitelist": ["intranet.local"]
/// }"#).unwrap();
///
/// assert_eq!(config.whitelist.len(), 2);
/// assert_eq!(config.options().first_read_timeout.as_millis(), 2000);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DetourConfig {
    /// Two-letter country code selecting hijack signatures
    pub country: Option<String>,
    pub first_read_timeout_ms: Option<u64>,
    pub max_replay_buffer: Option<usize>,
    /// Permanent whitelist
    pub whitelist: Vec<String>,
    pub force_whitelist: Vec<String>,
    pub force_unwhitelist: Vec<String>,
}

impl DetourConfig {
    /// Parse a JSON document.
    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path.as_ref()).map_err(|e| {
            DetourError::ConfigError(format!(
                "Failed to read config file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        Self::from_json(&text)
    }

    fn validate(&self) -> Result<()> {
        if self.first_read_timeout_ms == Some(0) {
            return Err(DetourError::ConfigError(
                "first_read_timeout_ms must be positive".to_string(),
            ));
        }
        if let Some(host) = self
            .whitelist
            .iter()
            .chain(&self.force_whitelist)
            .chain(&self.force_unwhitelist)
            .find(|h| h.trim().is_empty())
        {
            return Err(DetourError::ConfigError(format!(
                "Empty host in whitelist: {:?}",
                host
            )));
        }
        Ok(())
    }

    /// Dialer options, defaults filled in.
    pub fn options(&self) -> DetourOptions {
        let mut options = DetourOptions::default();
        if let Some(ms) = self.first_read_timeout_ms {
            options.first_read_timeout = Duration::from_millis(ms);
        }
        if let Some(size) = self.max_replay_buffer {
            options.max_replay_buffer = size;
        }
        options
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let options = DetourOptions::default();
        assert_eq!(options.first_read_timeout, DEFAULT_FIRST_READ_TIMEOUT);
        assert_eq!(options.max_replay_buffer, DEFAULT_MAX_REPLAY_BUFFER);
    }

    #[test]
    fn test_options_builder() {
        let options = DetourOptions::new()
            .with_first_read_timeout(Duration::from_millis(50))
            .with_max_replay_buffer(10);
        assert_eq!(options.first_read_timeout, Duration::from_millis(50));
        assert_eq!(options.max_replay_buffer, 10);
    }

    #[test]
    fn test_empty_json_is_default() {
        let config = DetourConfig::from_json("{}").unwrap();
        assert_eq!(config, DetourConfig::default());
        assert_eq!(config.options(), DetourOptions::default());
    }

    #[test]
    fn test_full_json() {
        let config = DetourConfig::from_json(
            r#"{
                "country": "IR",
                "first_read_timeout_ms": 250,
                "max_replay_buffer": 1024,
                "whitelist": ["a.com"],
                "force_whitelist": ["b.com"],
                "force_unwhitelist": ["c.com"]
            }"#,
        )
        .unwrap();

        assert_eq!(config.country.as_deref(), Some("IR"));
        assert_eq!(config.options().first_read_timeout, Duration::from_millis(250));
        assert_eq!(config.options().max_replay_buffer, 1024);
        assert_eq!(config.force_whitelist, vec!["b.com"]);
        assert_eq!(config.force_unwhitelist, vec!["c.com"]);
    }

    #[test]
    fn test_unknown_field_rejected() {
        assert!(matches!(
            DetourConfig::from_json(r#"{"whitelst": []}"#),
            Err(DetourError::JsonError(_))
        ));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        assert!(matches!(
            DetourConfig::from_json(r#"{"first_read_timeout_ms": 0}"#),
            Err(DetourError::ConfigError(_))
        ));
    }

    #[test]
    fn test_empty_host_rejected() {
        assert!(matches!(
            DetourConfig::from_json(r#"{"whitelist": ["a.com", " "]}"#),
            Err(DetourError::ConfigError(_))
        ));
    }

    #[test]
    fn test_from_missing_file() {
        assert!(matches!(
            DetourConfig::from_file("/nonexistent/detour.json"),
            Err(DetourError::ConfigError(_))
        ));
    }

    #[test]
    fn test_serialize_roundtrip() {
        let config = DetourConfig {
            country: Some("IR".into()),
            whitelist: vec!["a.com".into()],
            ..Default::default()
        };
        let text = serde_json::to_string(&config).unwrap();
        assert_eq!(DetourConfig::from_json(&text).unwrap(), config);
    }
}

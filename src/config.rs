//! Environment-driven settings. `.env` is loaded by the binary before
//! [`Settings::from_env`] runs.

use std::time::Duration;

use crate::error::PipelineError;
use crate::fetch::DEFAULT_TIMEOUT;

pub const DEFAULT_FEED_INDEX_URL: &str = "https://cdn.mbta.com/archive/archived_feeds.txt";
pub const DEFAULT_LOG_FILE_PATH: &str = "logs/cr_feed_metrics.log";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub feed_index_url: String,
    pub http_timeout: Duration,
    pub log_file_path: String,
    pub zone_mapping_path: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            feed_index_url: DEFAULT_FEED_INDEX_URL.to_string(),
            http_timeout: DEFAULT_TIMEOUT,
            log_file_path: DEFAULT_LOG_FILE_PATH.to_string(),
            zone_mapping_path: None,
        }
    }
}

impl Settings {
    pub fn from_env() -> Result<Self, PipelineError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds settings from any key lookup; empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, PipelineError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Settings::default();

        let http_timeout = match get("HTTP_TIMEOUT_SECS") {
            Some(raw) => {
                let secs: u64 = raw.trim().parse().map_err(|_| {
                    PipelineError::InvalidInput(format!("HTTP_TIMEOUT_SECS must be a whole number of seconds, got '{raw}'"))
                })?;
                if secs == 0 {
                    return Err(PipelineError::InvalidInput("HTTP_TIMEOUT_SECS must be positive".into()));
                }
                Duration::from_secs(secs)
            }
            None => defaults.http_timeout,
        };

        Ok(Self {
            feed_index_url: get("FEED_INDEX_URL").unwrap_or(defaults.feed_index_url),
            http_timeout,
            log_file_path: get("LOG_FILE_PATH").unwrap_or(defaults.log_file_path),
            zone_mapping_path: get("ZONE_MAPPING_PATH"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::from_lookup(lookup(&[])).unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.http_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_overrides() {
        let settings = Settings::from_lookup(lookup(&[
            ("FEED_INDEX_URL", "/mirror/archived_feeds.txt"),
            ("HTTP_TIMEOUT_SECS", "5"),
            ("ZONE_MAPPING_PATH", "zones.json"),
            ("LOG_FILE_PATH", ""),
        ]))
        .unwrap();
        assert_eq!(settings.feed_index_url, "/mirror/archived_feeds.txt");
        assert_eq!(settings.http_timeout, Duration::from_secs(5));
        assert_eq!(settings.zone_mapping_path.as_deref(), Some("zones.json"));
        assert_eq!(settings.log_file_path, DEFAULT_LOG_FILE_PATH);
    }

    #[test]
    fn test_invalid_timeout_is_fatal() {
        for bad in ["thirty", "0", "-1"] {
            let err = Settings::from_lookup(lookup(&[("HTTP_TIMEOUT_SECS", bad)])).unwrap_err();
            assert!(matches!(err, PipelineError::InvalidInput(_)), "{bad}");
            assert!(!err.is_recoverable());
        }
    }
}

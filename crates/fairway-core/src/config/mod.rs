//! Sync engine configuration.

use std::time::Duration;

use crate::error::{Error, Result};
use crate::util::is_http_url;

/// Tunables for the sync engine and connectivity monitor.
#[derive(Debug, Clone)]
pub struct SyncSettings {
    /// Remote API base URL (e.g. `https://api.fairway.app`)
    pub base_url: String,
    /// Per-request network timeout; a timeout is always a failure
    pub request_timeout: Duration,
    /// Transient failures tolerated before a task is marked failed
    pub max_attempts: i64,
    /// Simultaneous outbound pushes (independent entities only)
    pub push_concurrency: usize,
    /// Periodic background sync cadence
    pub sync_interval: Duration,
    /// Stability window before an offline→online transition fires
    pub debounce: Duration,
    /// Connectivity probe cadence
    pub poll_interval: Duration,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            request_timeout: Duration::from_secs(10),
            max_attempts: 5,
            push_concurrency: 4,
            sync_interval: Duration::from_secs(60),
            debounce: Duration::from_secs(2),
            poll_interval: Duration::from_secs(15),
        }
    }
}

impl SyncSettings {
    /// Settings pointed at the given API base URL.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn with_max_attempts(mut self, max_attempts: i64) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    #[must_use]
    pub const fn with_push_concurrency(mut self, push_concurrency: usize) -> Self {
        self.push_concurrency = push_concurrency;
        self
    }

    #[must_use]
    pub const fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = interval;
        self
    }

    #[must_use]
    pub const fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Check the settings are usable for network sync.
    pub fn validate(&self) -> Result<()> {
        if !is_http_url(&self.base_url) {
            return Err(Error::InvalidInput(
                "base URL must include http:// or https://".into(),
            ));
        }
        if self.max_attempts < 1 {
            return Err(Error::InvalidInput("max_attempts must be at least 1".into()));
        }
        if self.push_concurrency < 1 {
            return Err(Error::InvalidInput(
                "push_concurrency must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid_once_a_url_is_set() {
        let settings = SyncSettings::new("https://api.example.com");
        assert!(settings.validate().is_ok());
        assert_eq!(settings.max_attempts, 5);
        assert_eq!(settings.push_concurrency, 4);
    }

    #[test]
    fn validate_rejects_bad_values() {
        assert!(SyncSettings::new("api.example.com").validate().is_err());
        assert!(SyncSettings::new("https://x").with_max_attempts(0).validate().is_err());
        assert!(SyncSettings::new("https://x")
            .with_push_concurrency(0)
            .validate()
            .is_err());
    }
}

//! Configuration options for the sync layer

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};

/// Default byte quota for the local fallback store (about the size of a
/// browser's per-origin local storage).
pub const DEFAULT_LOCAL_QUOTA: usize = 5 * 1024 * 1024;

/// Configuration options for [`crate::Inventory`]
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Base URL of the remote document store. `None` means local-only.
    pub remote_url: Option<String>,

    /// Token appended as `auth` to remote requests
    pub auth_token: Option<String>,

    /// Directory of the file-backed local fallback store
    pub local_dir: PathBuf,

    /// Byte capacity of the local fallback store
    pub local_quota: usize,

    /// Remote request timeout
    pub request_timeout: Option<Duration>,

    /// Delay before the single retry of a failed initial remote load
    pub load_retry_delay: Duration,

    /// How long an initial remote load may take before it counts as failed
    pub initial_load_timeout: Duration,

    /// Trailing debounce for search input
    pub search_debounce: Duration,

    /// Trailing debounce for scan-code lookups
    pub lookup_debounce: Duration,

    /// Delay before the first overdue-credit check
    pub overdue_first_check: Duration,

    /// Interval between overdue-credit checks
    pub overdue_interval: Duration,

    /// Pending credits older than this many days are overdue
    pub overdue_after_days: i64,

    /// Products created within this window are reported as new
    pub new_product_window: Duration,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            remote_url: None,
            auth_token: None,
            local_dir: PathBuf::from(".catalogo"),
            local_quota: DEFAULT_LOCAL_QUOTA,
            request_timeout: Some(Duration::from_secs(30)),
            load_retry_delay: Duration::from_millis(2000),
            initial_load_timeout: Duration::from_secs(10),
            search_debounce: Duration::from_millis(300),
            lookup_debounce: Duration::from_millis(500),
            overdue_first_check: Duration::from_millis(3000),
            overdue_interval: Duration::from_secs(5 * 60),
            overdue_after_days: 7,
            new_product_window: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }
}

impl SyncOptions {
    /// Read `CATALOGO_REMOTE_URL`, `CATALOGO_AUTH` and `CATALOGO_LOCAL_DIR`
    /// over the defaults. A missing remote URL leaves the layer local-only.
    pub fn from_env() -> Result<Self> {
        let mut options = Self::default();
        if let Ok(url) = std::env::var("CATALOGO_REMOTE_URL") {
            if !url.trim().is_empty() {
                url::Url::parse(url.trim())?;
                options.remote_url = Some(url.trim().to_string());
            }
        }
        if let Ok(token) = std::env::var("CATALOGO_AUTH") {
            options.auth_token = Some(token).filter(|t| !t.is_empty());
        }
        if let Ok(dir) = std::env::var("CATALOGO_LOCAL_DIR") {
            if dir.trim().is_empty() {
                return Err(Error::general("CATALOGO_LOCAL_DIR is set but empty"));
            }
            options.local_dir = PathBuf::from(dir);
        }
        Ok(options)
    }

    /// Set the remote store URL
    pub fn with_remote_url(mut self, value: &str) -> Self {
        self.remote_url = Some(value.to_string());
        self
    }

    /// Set the remote auth token
    pub fn with_auth_token(mut self, value: &str) -> Self {
        self.auth_token = Some(value.to_string());
        self
    }

    /// Set the local fallback directory
    pub fn with_local_dir(mut self, value: impl Into<PathBuf>) -> Self {
        self.local_dir = value.into();
        self
    }

    /// Set the local fallback quota in bytes
    pub fn with_local_quota(mut self, value: usize) -> Self {
        self.local_quota = value;
        self
    }

    /// Set the remote request timeout
    pub fn with_request_timeout(mut self, value: Option<Duration>) -> Self {
        self.request_timeout = value;
        self
    }

    /// Set the load retry delay
    pub fn with_load_retry_delay(mut self, value: Duration) -> Self {
        self.load_retry_delay = value;
        self
    }

    /// Set the initial load timeout
    pub fn with_initial_load_timeout(mut self, value: Duration) -> Self {
        self.initial_load_timeout = value;
        self
    }

    /// Set the scan-code lookup debounce
    pub fn with_lookup_debounce(mut self, value: Duration) -> Self {
        self.lookup_debounce = value;
        self
    }

    /// Set the search debounce
    pub fn with_search_debounce(mut self, value: Duration) -> Self {
        self.search_debounce = value;
        self
    }

    /// Set the overdue check schedule
    pub fn with_overdue_schedule(mut self, first_check: Duration, interval: Duration) -> Self {
        self.overdue_first_check = first_check;
        self.overdue_interval = interval;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_timings() {
        let options = SyncOptions::default();
        assert!(options.remote_url.is_none());
        assert_eq!(options.load_retry_delay, Duration::from_millis(2000));
        assert_eq!(options.search_debounce, Duration::from_millis(300));
        assert_eq!(options.lookup_debounce, Duration::from_millis(500));
        assert_eq!(options.overdue_first_check, Duration::from_millis(3000));
        assert_eq!(options.overdue_interval, Duration::from_secs(300));
    }

    #[test]
    fn test_builder_methods() {
        let options = SyncOptions::default()
            .with_remote_url("https://example.firebaseio.com")
            .with_auth_token("token")
            .with_local_quota(1024);
        assert_eq!(
            options.remote_url.as_deref(),
            Some("https://example.firebaseio.com")
        );
        assert_eq!(options.auth_token.as_deref(), Some("token"));
        assert_eq!(options.local_quota, 1024);
    }
}

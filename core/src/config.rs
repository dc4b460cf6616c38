//! Repository connection settings.

use std::time::Duration;

use crate::error::RepositoryError;

pub const URL_ENV: &str = "REMOTE_REPOSITORY_URL";
pub const TIMEOUT_ENV: &str = "REMOTE_REPOSITORY_TIMEOUT_SECS";
pub const CALL_TIMEOUT_ENV: &str = "REMOTE_REPOSITORY_CALL_TIMEOUT_SECS";

/// Timeout for custom operations and bulk deletes, which may run long
/// server-side jobs.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryConfig {
    pub base_url: String,
    /// Per-request timeout for ordinary operations. `None` leaves it to the
    /// transport.
    pub request_timeout: Option<Duration>,
    pub call_timeout: Duration,
}

impl RepositoryConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            request_timeout: None,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Read settings from `REMOTE_REPOSITORY_*` environment variables.
    pub fn from_env() -> Result<Self, RepositoryError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, RepositoryError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let base_url = lookup(URL_ENV)
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| RepositoryError::Configuration(format!("{URL_ENV} is not set")))?;

        let mut config = Self::new(base_url);
        if let Some(secs) = parse_secs(&lookup, TIMEOUT_ENV)? {
            config = config.request_timeout(Duration::from_secs(secs));
        }
        if let Some(secs) = parse_secs(&lookup, CALL_TIMEOUT_ENV)? {
            config = config.call_timeout(Duration::from_secs(secs));
        }
        Ok(config)
    }
}

fn parse_secs<F>(lookup: &F, name: &str) -> Result<Option<u64>, RepositoryError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(name).filter(|value| !value.trim().is_empty()) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| RepositoryError::Configuration(format!("{name}={value:?}: {e}"))),
    }
}

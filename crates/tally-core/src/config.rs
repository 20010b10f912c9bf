//! Engine tuning options and remote endpoint configuration

use std::env;
use std::fmt;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::util::{is_http_url, normalize_text_option};

/// Bounded exponential backoff policy for transient remote failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first (3 = one try plus two retries)
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles each retry after that
    pub base_delay: Duration,
}

impl RetryPolicy {
    #[must_use]
    pub const fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
        }
    }

    #[must_use]
    pub const fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    #[must_use]
    pub const fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    /// Backoff after the given failed attempt (1-based)
    #[must_use]
    pub const fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2_u32.saturating_pow(attempt.saturating_sub(1)))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

/// Tuning for the reconciliation engine and bulk sync
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncOptions {
    pub retry: RetryPolicy,
    /// Per-call deadline for every remote operation
    pub request_timeout: Duration,
    /// Maximum concurrent in-flight remote calls
    pub concurrency_limit: usize,
    /// Records per bulk upsert or delete call
    pub chunk_size: usize,
}

impl SyncOptions {
    #[must_use]
    pub const fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub const fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    #[must_use]
    pub const fn with_concurrency_limit(mut self, concurrency_limit: usize) -> Self {
        self.concurrency_limit = concurrency_limit;
        self
    }

    #[must_use]
    pub const fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            request_timeout: Duration::from_secs(10),
            concurrency_limit: 6,
            chunk_size: 100,
        }
    }
}

/// Connection settings for the hosted record store
#[derive(Clone, PartialEq, Eq)]
pub struct RemoteConfig {
    /// Base endpoint, e.g. `https://project.supabase.co`
    pub url: String,
    /// Service bearer token; never logged
    pub token: String,
}

impl fmt::Debug for RemoteConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteConfig")
            .field("url", &self.url)
            .field("token", &"[REDACTED]")
            .finish()
    }
}

impl RemoteConfig {
    pub fn new(url: impl AsRef<str>, token: impl Into<String>) -> Result<Self> {
        let url = normalize_remote_url(url.as_ref())?;
        let token = token.into().trim().to_string();
        if token.is_empty() {
            return Err(Error::InvalidInput("remote token must not be empty".to_string()));
        }
        Ok(Self { url, token })
    }

    /// Read `TALLY_REMOTE_URL` / `TALLY_REMOTE_TOKEN`.
    ///
    /// Both absent means local-only mode; setting only one is an error.
    pub fn from_env() -> Result<Option<Self>> {
        Self::from_parts(
            env::var("TALLY_REMOTE_URL").ok(),
            env::var("TALLY_REMOTE_TOKEN").ok(),
        )
    }

    /// Resolve an optional config from an env-style pair
    pub fn from_parts(url: Option<String>, token: Option<String>) -> Result<Option<Self>> {
        match (normalize_text_option(url), normalize_text_option(token)) {
            (None, None) => Ok(None),
            (Some(url), Some(token)) => Ok(Some(Self::new(url, token)?)),
            _ => Err(Error::InvalidInput(
                "TALLY_REMOTE_URL and TALLY_REMOTE_TOKEN must be set together".to_string(),
            )),
        }
    }
}

fn normalize_remote_url(raw: &str) -> Result<String> {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(Error::InvalidInput("remote URL must not be empty".to_string()));
    }
    if !is_http_url(trimmed) {
        return Err(Error::InvalidInput(format!(
            "remote URL must start with http:// or https://, got '{trimmed}'"
        )));
    }
    Ok(trimmed.to_string())
}

//! Configuration constants, fetch policy and crawl configuration.

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use url::Url;

use crate::error::{HarvesterError, Result};

/// Base URL of the statistical division code publication.
///
/// Each year lives under `{DEFAULT_BASE_URL}{year}/`.
pub const DEFAULT_BASE_URL: &str = "https://www.stats.gov.cn/sj/tjbz/tjyqhdmhcxhfdm/";

/// HTTP timeout in seconds.
pub const HTTP_TIMEOUT_SECS: u64 = 20;

/// Attempts per page, including the first one.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Base delay for exponential backoff (milliseconds).
pub const RETRY_BASE_DELAY_MS: u64 = 500;

/// Minimum delay between two requests to the site (milliseconds).
pub const DEFAULT_MIN_INTERVAL_MS: u64 = 200;

/// Maximum number of page fetches in flight.
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Raw division code as printed in the tables: 12 digits.
#[allow(clippy::expect_used)] // Static regex that is guaranteed to be valid
static RAW_CODE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9]{12}$").expect("valid regex"));

/// Validate a raw 12-digit division code.
///
/// # Examples
/// ```
/// use divcode_harvester::config::is_raw_code;
///
/// assert!(is_raw_code("110101001001"));
/// assert!(!is_raw_code("110101"));
/// ```
pub fn is_raw_code(code: &str) -> bool {
    RAW_CODE_PATTERN.is_match(code)
}

/// Parse and normalize a base URL so that relative joins stay below it.
///
/// A missing trailing slash is added: `.../tjyqhdmhcxhfdm` and
/// `.../tjyqhdmhcxhfdm/` name the same root.
pub fn parse_base_url(base_url: &str) -> Result<Url> {
    let mut normalized = base_url.trim().to_string();
    if !normalized.ends_with('/') {
        normalized.push('/');
    }

    let url = Url::parse(&normalized).map_err(|_| HarvesterError::InvalidUrl(base_url.into()))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        _ => Err(HarvesterError::InvalidUrl(base_url.into())),
    }
}

/// Build the index URL for a publication year: `{base}{year}/`.
pub fn year_url(base: &Url, year: i32) -> Result<Url> {
    base.join(&format!("{year}/"))
        .map_err(|_| HarvesterError::InvalidUrl(format!("{base}{year}/")))
}

/// Retry, timeout and politeness settings for the page fetcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchPolicy {
    pub timeout: Duration,
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub min_interval: Duration,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(HTTP_TIMEOUT_SECS),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_base: Duration::from_millis(RETRY_BASE_DELAY_MS),
            min_interval: Duration::from_millis(DEFAULT_MIN_INTERVAL_MS),
        }
    }
}

impl FetchPolicy {
    /// Policy without any waiting, for tests against local mock servers.
    pub fn immediate() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_base: Duration::ZERO,
            min_interval: Duration::ZERO,
        }
    }

    /// Delay before retry number `attempt` (1-based): base, 2×base, 4×base, ...
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.backoff_base.saturating_mul(1 << exponent)
    }
}

/// Full crawl configuration.
#[derive(Debug, Clone)]
pub struct CrawlConfig {
    pub base_url: String,
    pub policy: FetchPolicy,
    pub concurrency: usize,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            policy: FetchPolicy::default(),
            concurrency: DEFAULT_CONCURRENCY,
        }
    }
}

impl CrawlConfig {
    /// Defaults overridden by `DIVCODE_*` environment variables.
    ///
    /// Unparseable numeric values are rejected rather than ignored.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        fn number<T: std::str::FromStr>(key: &str, value: Option<String>) -> Result<Option<T>> {
            value
                .map(|v| {
                    v.trim()
                        .parse()
                        .map_err(|_| HarvesterError::Config(format!("{key} must be a number, got '{v}'")))
                })
                .transpose()
        }

        let mut config = Self::default();

        if let Some(base_url) = lookup("DIVCODE_BASE_URL") {
            config.base_url = base_url;
        }
        if let Some(concurrency) = number("DIVCODE_CONCURRENCY", lookup("DIVCODE_CONCURRENCY"))? {
            config.concurrency = concurrency;
        }
        if let Some(ms) = number("DIVCODE_MIN_INTERVAL_MS", lookup("DIVCODE_MIN_INTERVAL_MS"))? {
            config.policy.min_interval = Duration::from_millis(ms);
        }
        if let Some(attempts) = number("DIVCODE_MAX_ATTEMPTS", lookup("DIVCODE_MAX_ATTEMPTS"))? {
            config.policy.max_attempts = attempts;
        }
        if let Some(secs) = number("DIVCODE_TIMEOUT_SECS", lookup("DIVCODE_TIMEOUT_SECS"))? {
            config.policy.timeout = Duration::from_secs(secs);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_policy(mut self, policy: FetchPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Check value ranges and the base URL.
    pub fn validate(&self) -> Result<()> {
        parse_base_url(&self.base_url)?;
        if self.concurrency == 0 {
            return Err(HarvesterError::Config("concurrency must be at least 1".into()));
        }
        if self.policy.max_attempts == 0 {
            return Err(HarvesterError::Config("max attempts must be at least 1".into()));
        }
        if self.policy.timeout.is_zero() {
            return Err(HarvesterError::Config("timeout must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_is_raw_code() {
        assert!(is_raw_code("110000000000"));
        assert!(!is_raw_code(""));
        assert!(!is_raw_code("11000000000")); // 11 digits
        assert!(!is_raw_code("11000000000a"));
        assert!(!is_raw_code("１１００００００００００")); // fullwidth
        assert!(!is_raw_code("١١٠٠٠٠٠٠٠٠٠٠"));
    }

    #[test]
    fn test_parse_base_url_adds_slash() {
        let url = parse_base_url("http://example.test/codes").unwrap();
        assert_eq!(url.as_str(), "http://example.test/codes/");
    }

    #[test]
    fn test_parse_base_url_rejects_garbage() {
        assert!(parse_base_url("not a url").is_err());
        assert!(parse_base_url("ftp://example.test/").is_err());
    }

    #[test]
    fn test_year_url() {
        let base = parse_base_url(DEFAULT_BASE_URL).unwrap();
        assert_eq!(
            year_url(&base, 2020).unwrap().as_str(),
            "https://www.stats.gov.cn/sj/tjbz/tjyqhdmhcxhfdm/2020/"
        );
    }

    #[test]
    fn test_backoff_delay() {
        let policy = FetchPolicy::default();
        assert_eq!(policy.backoff_delay(1), Duration::from_millis(500));
        assert_eq!(policy.backoff_delay(2), Duration::from_millis(1000));
        assert_eq!(policy.backoff_delay(3), Duration::from_millis(2000));
        assert_eq!(FetchPolicy::immediate().backoff_delay(3), Duration::ZERO);
    }

    #[test]
    fn test_from_lookup_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("DIVCODE_BASE_URL", "http://mirror.test/"),
            ("DIVCODE_CONCURRENCY", "8"),
            ("DIVCODE_MIN_INTERVAL_MS", "0"),
        ]);
        let config = CrawlConfig::from_lookup(|k| env.get(k).map(|v| v.to_string())).unwrap();

        assert_eq!(config.base_url, "http://mirror.test/");
        assert_eq!(config.concurrency, 8);
        assert_eq!(config.policy.min_interval, Duration::ZERO);
        assert_eq!(config.policy.max_attempts, DEFAULT_MAX_ATTEMPTS);
    }

    #[test]
    fn test_from_lookup_rejects_bad_number() {
        let result = CrawlConfig::from_lookup(|k| {
            (k == "DIVCODE_CONCURRENCY").then(|| "many".to_string())
        });
        assert!(matches!(result, Err(HarvesterError::Config(_))));
    }

    #[test]
    fn test_validate() {
        assert!(CrawlConfig::default().validate().is_ok());
        assert!(CrawlConfig::default().with_concurrency(0).validate().is_err());
        assert!(CrawlConfig::default()
            .with_base_url("::")
            .validate()
            .is_err());
    }
}

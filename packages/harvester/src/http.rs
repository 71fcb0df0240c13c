//! Page fetching with retry, timeout and rate limiting.

use std::num::NonZeroU32;
use std::time::Duration;

use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::Client;
use url::Url;

use crate::config::FetchPolicy;
use crate::error::{HarvesterError, Result};

/// User agent string identifying this harvester.
const USER_AGENT: &str = concat!("divcode-harvester/", env!("CARGO_PKG_VERSION"));

/// Source of raw page bodies, enabling test doubles for the walker.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Fetch the body of `url`.
    async fn fetch(&self, url: &Url) -> Result<Vec<u8>>;
}

/// Fetcher backed by reqwest, retrying transient failures.
pub struct HttpFetcher {
    client: Client,
    policy: FetchPolicy,
    limiter: Option<DefaultDirectRateLimiter>,
}

impl HttpFetcher {
    /// Create a fetcher for the given policy.
    pub fn new(policy: FetchPolicy) -> Result<Self> {
        let client = create_client(policy.timeout)?;
        let limiter = rate_limiter(policy.min_interval);
        Ok(Self {
            client,
            policy,
            limiter,
        })
    }

    pub fn policy(&self) -> &FetchPolicy {
        &self.policy
    }

    /// Wait until the next request may be sent.
    async fn wait_turn(&self) {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }
    }

    /// Single GET without retries, classifying failures.
    async fn get_once(&self, url: &Url) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| classify(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(HarvesterError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let bytes = response.bytes().await.map_err(|e| classify(url, e))?;
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    /// Download a page with retry logic.
    ///
    /// Uses exponential backoff for transient failures (timeouts, network
    /// errors, 5xx responses). Client errors (4xx) are returned immediately.
    async fn fetch(&self, url: &Url) -> Result<Vec<u8>> {
        let mut last_error: Option<HarvesterError> = None;

        for attempt in 0..self.policy.max_attempts {
            if attempt > 0 {
                let delay = self.policy.backoff_delay(attempt);
                tracing::debug!(%url, attempt, delay_ms = delay.as_millis() as u64, "Retrying after delay");
                tokio::time::sleep(delay).await;
            }

            self.wait_turn().await;

            match self.get_once(url).await {
                Ok(body) => return Ok(body),
                Err(e) if e.is_transient() => {
                    tracing::warn!(
                        %url,
                        error = %e,
                        attempt = attempt + 1,
                        max_attempts = self.policy.max_attempts,
                        "Transient fetch failure, will retry"
                    );
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| {
            HarvesterError::Config("max attempts must be at least 1".into())
        }))
    }
}

/// Create a configured HTTP client.
pub fn create_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| HarvesterError::Config(format!("cannot build HTTP client: {e}")))
}

/// Limiter allowing one request per `interval`; `None` when the interval is zero.
fn rate_limiter(interval: Duration) -> Option<DefaultDirectRateLimiter> {
    let quota = Quota::with_period(interval)?.allow_burst(NonZeroU32::MIN);
    Some(RateLimiter::direct(quota))
}

fn classify(url: &Url, error: reqwest::Error) -> HarvesterError {
    if error.is_timeout() {
        HarvesterError::Timeout {
            url: url.to_string(),
        }
    } else {
        HarvesterError::Network {
            url: url.to_string(),
            source: error,
        }
    }
}

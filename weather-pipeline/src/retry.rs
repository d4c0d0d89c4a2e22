//! Lookup client: one logical request per location with bounded retries.

use std::time::Duration;
use tracing::{debug, instrument, warn};

use crate::{
    error::{AttemptError, ErrorKind},
    model::{FetchOutcome, LocationQuery},
    provider::WeatherProvider,
};

pub const DEFAULT_ATTEMPTS: u32 = 3;
pub const DEFAULT_BACKOFF: Duration = Duration::from_millis(500);
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
pub const MAX_DELAY: Duration = Duration::from_secs(120);

/// Statuses worth another attempt.
const TRANSIENT_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts per query, including the first one.
    pub attempts: u32,
    /// Wait before the second attempt; doubles for each one after.
    pub backoff: Duration,
    /// Deadline for each individual attempt.
    pub timeout: Duration,
    /// Upper bound for any single wait, including server hints.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_ATTEMPTS,
            backoff: DEFAULT_BACKOFF,
            timeout: DEFAULT_TIMEOUT,
            max_delay: MAX_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Wait after `failed_attempt` (1-based) failed; a server hint wins.
    pub fn delay_for(&self, failed_attempt: u32, hint: Option<Duration>) -> Duration {
        let delay = hint.unwrap_or_else(|| {
            let exponent = failed_attempt.saturating_sub(1).min(31);
            self.backoff.saturating_mul(1u32 << exponent)
        });
        delay.min(self.max_delay)
    }
}

enum Disposition {
    Retry { exhausted: ErrorKind, hint: Option<Duration> },
    Fail(ErrorKind),
}

fn classify(err: &AttemptError) -> Disposition {
    match err {
        AttemptError::Transport(_) | AttemptError::Timeout(_) => Disposition::Retry {
            exhausted: ErrorKind::Network,
            hint: None,
        },
        AttemptError::Status { status, retry_after, .. } if TRANSIENT_STATUSES.contains(status) => {
            Disposition::Retry {
                exhausted: ErrorKind::TransientExhausted,
                hint: *retry_after,
            }
        }
        AttemptError::Status { status: 400 | 404, .. } | AttemptError::NotFound(_) => {
            Disposition::Fail(ErrorKind::NotFound)
        }
        AttemptError::Status { status: 401 | 403, .. } | AttemptError::Unauthorized(_) => {
            Disposition::Fail(ErrorKind::Auth)
        }
        AttemptError::Status { .. } | AttemptError::Malformed(_) => {
            Disposition::Fail(ErrorKind::MalformedResponse)
        }
    }
}

/// Wraps a provider with the retry policy. Never mutates cache or log state.
#[derive(Debug)]
pub struct LookupClient {
    provider: Box<dyn WeatherProvider>,
    policy: RetryPolicy,
}

impl LookupClient {
    pub fn new(provider: Box<dyn WeatherProvider>, policy: RetryPolicy) -> Self {
        Self { provider, policy }
    }

    /// Look up one location. Every failure is folded into the outcome.
    #[instrument(skip(self), fields(location = %query.location, units = %query.units))]
    pub async fn fetch(&self, query: &LocationQuery) -> FetchOutcome {
        let max_attempts = self.policy.attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            debug!("Lookup attempt {}/{}", attempt, max_attempts);

            let attempt_future = self.provider.lookup(query);
            let result = match tokio::time::timeout(self.policy.timeout, attempt_future).await {
                Ok(result) => result,
                Err(_) => Err(AttemptError::Timeout(self.policy.timeout)),
            };

            let err = match result {
                Ok(reading) => return FetchOutcome::success(query, reading),
                Err(err) => err,
            };

            match classify(&err) {
                Disposition::Fail(kind) => {
                    debug!(%kind, "Non-transient failure: {}", err);
                    return FetchOutcome::failure(query, kind, err.to_string());
                }
                Disposition::Retry { exhausted, hint } => {
                    if attempt >= max_attempts {
                        warn!(kind = %exhausted, "Giving up after {} attempts: {}", attempt, err);
                        return FetchOutcome::failure(
                            query,
                            exhausted,
                            format!("{err} (after {attempt} attempts)"),
                        );
                    }

                    let delay = self.policy.delay_for(attempt, hint);
                    warn!(
                        "Transient failure on attempt {}: {}; retrying in {:.1}s",
                        attempt,
                        err,
                        delay.as_secs_f64()
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

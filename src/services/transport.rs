//! Single-request HTTP execution with bounded retry.
//!
//! Every outbound call of the engine goes through [`HttpTransport::execute`], so the
//! backoff policy lives in exactly one place:
//! - 5xx responses and connection failures are retried, up to `max_attempts` in total
//! - waits grow exponentially from `initial_backoff` (0.5 s, 1 s, 2 s, ...)
//! - anything below 500 is returned at once, 4xx included
//! - a final 5xx is handed back to the caller; a final connection failure is an error

use std::time::Duration;

use reqwest::{Client, Method, RequestBuilder, Response};
use tracing::{debug, warn};

use crate::error::TransportError;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub multiplier: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            multiplier: 2,
        }
    }
}

impl RetryPolicy {
    /// Wait before the attempt following `attempt` (1-based).
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        self.initial_backoff
            .saturating_mul(self.multiplier.saturating_pow(exponent))
    }

    /// Same shape, no waiting. Used by tests and the `check` command.
    #[must_use]
    pub fn immediate() -> Self {
        Self {
            initial_backoff: Duration::ZERO,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    policy: RetryPolicy,
    timeout: Duration,
    label: &'static str,
}

impl HttpTransport {
    pub fn new(label: &'static str, timeout: Duration) -> Self {
        Self {
            client: Client::new(),
            policy: RetryPolicy::default(),
            timeout,
            label,
        }
    }

    #[must_use]
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Start a request carrying the per-call timeout. Headers, query and body are added by the caller.
    pub fn request(&self, method: Method, url: &str) -> RequestBuilder {
        self.client.request(method, url).timeout(self.timeout)
    }

    pub async fn execute(&self, request: RequestBuilder) -> Result<Response, TransportError> {
        let request = request.build().map_err(TransportError::Build)?;
        let url = request.url().to_string();
        let method = request.method().clone();
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let attempt_request = request
                .try_clone()
                .ok_or_else(|| TransportError::NotReplayable { url: url.clone() })?;

            debug!(target_system = self.label, %method, url = %url, attempt, "sending request");

            match self.client.execute(attempt_request).await {
                Ok(response) => {
                    let status = response.status();
                    if status.as_u16() < 500 {
                        return Ok(response);
                    }
                    if attempt >= max_attempts {
                        warn!(
                            target_system = self.label,
                            url = %url,
                            status = %status,
                            attempts = attempt,
                            "server error persisted, giving up"
                        );
                        return Ok(response);
                    }
                    let wait = self.policy.backoff(attempt);
                    warn!(
                        target_system = self.label,
                        url = %url,
                        status = %status,
                        attempt,
                        max_attempts,
                        wait_ms = wait.as_millis() as u64,
                        "server error, retrying with backoff"
                    );
                    tokio::time::sleep(wait).await;
                }
                Err(err) => {
                    if attempt >= max_attempts {
                        warn!(
                            target_system = self.label,
                            url = %url,
                            error = %err,
                            attempts = attempt,
                            "connection failed, giving up"
                        );
                        return Err(TransportError::Connection {
                            url,
                            attempts: attempt,
                            source: err,
                        });
                    }
                    let wait = self.policy.backoff(attempt);
                    warn!(
                        target_system = self.label,
                        url = %url,
                        error = %err,
                        attempt,
                        max_attempts,
                        wait_ms = wait.as_millis() as u64,
                        "connection failed, retrying with backoff"
                    );
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }
}

use crate::http::{classify_transport_error, retry_delay_from_headers};
use crate::stats::{ConnectionStats, StatsRecorder};
use reqwest::redirect;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use std::sync::{Mutex, PoisonError};
use std::time::Instant;
use synclone_core::cancel::CancelToken;
use synclone_core::config::ConnectionConfig;
use synclone_core::retry::RetryPolicy;
use tracing::{debug, warn};

#[derive(Debug, thiserror::Error)]
pub enum NetError {
    #[error("build http client or request: {0}")]
    Build(#[source] reqwest::Error),
    #[error("request to {url} failed after {attempts} attempt(s): {source}")]
    Transport {
        url: String,
        attempts: u32,
        #[source]
        source: reqwest::Error,
    },
    #[error("request to {url} returned {status}")]
    Status { url: String, status: StatusCode },
    #[error("read response body from {url}: {source}")]
    Body {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("request cancelled")]
    Cancelled,
}

/// Pooled HTTP client with retries, server back-off hints and counters.
/// Shared by reference between concurrent callers.
pub struct ConnectionManager {
    client: Client,
    policy: RetryPolicy,
    stats: Mutex<StatsRecorder>,
}

impl ConnectionManager {
    pub fn new(config: &ConnectionConfig, policy: RetryPolicy) -> Result<Self, NetError> {
        let client = Client::builder()
            .min_tls_version(reqwest::tls::Version::TLS_1_2)
            .redirect(redirect::Policy::limited(config.max_redirects))
            .pool_max_idle_per_host(config.max_idle_per_host)
            .pool_idle_timeout(config.idle_timeout())
            .tcp_keepalive(config.keepalive())
            .connect_timeout(config.connect_timeout())
            .read_timeout(config.read_timeout())
            .timeout(config.request_timeout())
            .user_agent(concat!("synclone/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(NetError::Build)?;
        Ok(Self {
            client,
            policy,
            stats: Mutex::new(StatsRecorder::new(
                config.max_idle_per_host,
                config.idle_timeout(),
            )),
        })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Send a request, retrying per the policy. `build` is called once per
    /// attempt so request bodies are regenerated. Once the policy stops
    /// retrying, the last response is returned whatever its status; only
    /// transport failures and cancellation are errors.
    pub async fn execute<F>(&self, cancel: &CancelToken, mut build: F) -> Result<Response, NetError>
    where
        F: FnMut(&Client) -> RequestBuilder,
    {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            if cancel.is_cancelled() {
                return Err(NetError::Cancelled);
            }
            let request = build(&self.client).build().map_err(NetError::Build)?;
            let method = request.method().clone();
            let url = request.url().to_string();
            let host = request.url().host_str().unwrap_or_default().to_string();

            let started = Instant::now();
            self.recorder().begin(&host, started);
            let outcome = tokio::select! {
                _ = cancel.cancelled() => {
                    self.recorder().failed(None);
                    return Err(NetError::Cancelled);
                }
                outcome = self.client.execute(request) => outcome,
            };
            let latency = started.elapsed();

            let (decision, hint) = match outcome {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let mut recorder = self.recorder();
                        recorder.succeeded(latency);
                        recorder.release(&host, Instant::now());
                        return Ok(response);
                    }
                    {
                        let mut recorder = self.recorder();
                        recorder.failed(Some(latency));
                        recorder.release(&host, Instant::now());
                    }
                    let decision =
                        self.policy
                            .decide(attempt, method.as_str(), Some(status.as_u16()), None);
                    if !decision.retry {
                        warn!(url = %url, status = status.as_u16(), attempts = attempt, "http request failed");
                        return Ok(response);
                    }
                    let hint = retry_delay_from_headers(response.headers());
                    let _ = response.bytes().await;
                    (decision, hint)
                }
                Err(err) => {
                    self.recorder().failed(Some(latency));
                    let failure = classify_transport_error(&err);
                    let decision = self.policy.decide(attempt, method.as_str(), None, Some(failure));
                    if !decision.retry {
                        warn!(url = %url, attempts = attempt, error = %err, "http request failed");
                        return Err(NetError::Transport {
                            url,
                            attempts: attempt,
                            source: err,
                        });
                    }
                    (decision, None)
                }
            };

            let delay = self.policy.apply_hint(decision.delay, hint);
            self.recorder().retried();
            debug!(
                url = %url,
                method = %method,
                attempt,
                delay_ms = delay.as_millis() as u64,
                hinted = hint.is_some(),
                "retrying http request"
            );
            tokio::select! {
                _ = cancel.cancelled() => return Err(NetError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// GET `url` and read the whole body. A non-success final status is
    /// [`NetError::Status`].
    pub async fn get_bytes(&self, cancel: &CancelToken, url: &str) -> Result<Vec<u8>, NetError> {
        let response = self.execute(cancel, |client| client.get(url)).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(NetError::Status {
                url: url.to_string(),
                status,
            });
        }
        let body = tokio::select! {
            _ = cancel.cancelled() => return Err(NetError::Cancelled),
            body = response.bytes() => body,
        };
        body.map(|bytes| bytes.to_vec())
            .map_err(|source| NetError::Body {
                url: url.to_string(),
                source,
            })
    }

    pub fn stats(&self) -> ConnectionStats {
        self.recorder().snapshot()
    }

    /// Drop the pool and its idle connections. Returns the final counters.
    pub fn close(self) -> ConnectionStats {
        let stats = self.stats();
        debug!(
            total = stats.total_requests,
            successful = stats.successful_requests,
            failed = stats.failed_requests,
            retries = stats.retry_attempts,
            new_connections = stats.new_connections,
            reused_connections = stats.reused_connections,
            success_rate = stats.success_rate(),
            reuse_ratio = stats.reuse_ratio(),
            avg_latency_ms = stats.average_latency.as_millis() as u64,
            "connection pool closed"
        );
        stats
    }

    fn recorder(&self) -> std::sync::MutexGuard<'_, StatsRecorder> {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

//! Credential-rotating request gateway
//!
//! A `Gateway` owns a pinned credential and shares the process-wide pool,
//! limiter and HTTP client with every other session. `session()` hands out a
//! fresh gateway with nothing pinned, so concurrent logical requests do not
//! step on each other's credential.

use std::sync::Arc;
use std::time::Duration;

use client_pool::{FailureKind, Pool, classify_status};
use common::Credential;
use reqwest::Url;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::constants::CREDENTIAL_PARAM;
use crate::error::{Error, Result};
use crate::rate_limit::RateLimiter;

/// Attempts per logical request: the original call plus one auth retry.
pub const MAX_ATTEMPTS: u32 = 2;

/// Upstream error bodies are cut to this many characters.
const MAX_ERROR_BODY: usize = 200;

struct Shared {
    http: reqwest::Client,
    base_url: Url,
    pool: Arc<Pool>,
    limiter: Arc<RateLimiter>,
    timeout: Duration,
}

/// Issues API requests with a pooled credential and rate limiting.
pub struct Gateway {
    shared: Arc<Shared>,
    pinned: Mutex<Option<Credential>>,
}

impl Gateway {
    /// Build the root gateway. `base_url` must be an absolute http(s) URL.
    pub fn new(
        http: reqwest::Client,
        base_url: &str,
        pool: Arc<Pool>,
        limiter: Arc<RateLimiter>,
        timeout: Duration,
    ) -> Result<Self> {
        let base_url = Url::parse(base_url).map_err(|e| Error::InvalidEndpoint {
            endpoint: base_url.to_string(),
            reason: e.to_string(),
        })?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(Error::InvalidEndpoint {
                endpoint: base_url.to_string(),
                reason: "scheme must be http or https".into(),
            });
        }

        Ok(Self {
            shared: Arc::new(Shared {
                http,
                base_url,
                pool,
                limiter,
                timeout,
            }),
            pinned: Mutex::new(None),
        })
    }

    /// A gateway sharing this one's pool, limiter and client, with no
    /// credential pinned.
    pub fn session(&self) -> Gateway {
        Gateway {
            shared: self.shared.clone(),
            pinned: Mutex::new(None),
        }
    }

    pub fn pool(&self) -> &Arc<Pool> {
        &self.shared.pool
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.shared.limiter
    }

    /// Credential this session is currently using, if any.
    pub async fn pinned(&self) -> Option<Credential> {
        self.pinned.lock().await.clone()
    }

    /// GET `endpoint` with `params` and return the decoded JSON body.
    ///
    /// `endpoint` is either a path relative to the base URL or an absolute
    /// URL. A 401/403 reports the credential as failed and retries once with
    /// a newly selected one.
    pub async fn request(
        &self,
        endpoint: &str,
        params: &[(&str, &str)],
    ) -> Result<serde_json::Value> {
        self.call(endpoint, params, MAX_ATTEMPTS).await
    }

    /// Like `request`, but a 401/403 fails immediately after the credential
    /// is reported.
    pub async fn request_once(
        &self,
        endpoint: &str,
        params: &[(&str, &str)],
    ) -> Result<serde_json::Value> {
        self.call(endpoint, params, 1).await
    }

    #[instrument(skip_all, fields(endpoint = %endpoint, max_attempts = max_attempts))]
    async fn call(
        &self,
        endpoint: &str,
        params: &[(&str, &str)],
        max_attempts: u32,
    ) -> Result<serde_json::Value> {
        let url = self.endpoint_url(endpoint)?;
        let mut attempt = 0;

        loop {
            attempt += 1;
            self.shared.limiter.acquire().await;
            let credential = self.credential().await?;

            let response = self
                .shared
                .http
                .get(with_params(&url, params, &credential))
                .timeout(self.shared.timeout)
                .send()
                .await
                .map_err(Error::from_reqwest)?;

            let status = response.status().as_u16();

            if classify_status(status) == FailureKind::Auth {
                self.shared.pool.mark_failed(&credential, status).await;
                self.unpin(&credential).await;
                if attempt >= max_attempts {
                    warn!(code = status, attempt, "credential rejected, no retry left");
                    return Err(Error::AuthRejected { status });
                }
                info!(code = status, credential = %credential, "credential rejected, retrying");
                metrics::counter!("gateway_auth_retries_total").increment(1);
                continue;
            }

            if !response.status().is_success() {
                let body = response.text().await.unwrap_or_default();
                debug!(code = status, "upstream returned an error status");
                return Err(Error::Status {
                    status,
                    message: truncate(&body, MAX_ERROR_BODY),
                });
            }

            self.shared.pool.mark_success(&credential).await;
            let bytes = response.bytes().await.map_err(Error::from_reqwest)?;
            return serde_json::from_slice(&bytes).map_err(|e| Error::Decode(e.to_string()));
        }
    }

    fn endpoint_url(&self, endpoint: &str) -> Result<Url> {
        self.shared
            .base_url
            .join(endpoint)
            .map_err(|e| Error::InvalidEndpoint {
                endpoint: endpoint.to_string(),
                reason: e.to_string(),
            })
    }

    /// The pinned credential, selecting and pinning one if needed.
    async fn credential(&self) -> Result<Credential> {
        let mut pinned = self.pinned.lock().await;
        if let Some(credential) = pinned.as_ref() {
            return Ok(credential.clone());
        }
        let credential = self.shared.pool.select().await?;
        debug!(credential = %credential, "pinned credential for session");
        *pinned = Some(credential.clone());
        Ok(credential)
    }

    async fn unpin(&self, credential: &Credential) {
        let mut pinned = self.pinned.lock().await;
        if pinned.as_ref() == Some(credential) {
            *pinned = None;
        }
    }
}

/// Copy of `url` with `params` appended and the credential parameter set,
/// replacing any credential the URL already carried.
fn with_params(url: &Url, params: &[(&str, &str)], credential: &Credential) -> Url {
    let existing: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| k != CREDENTIAL_PARAM)
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    let mut url = url.clone();
    url.set_query(None);
    {
        let mut query = url.query_pairs_mut();
        for (k, v) in &existing {
            query.append_pair(k, v);
        }
        for (k, v) in params {
            if *k != CREDENTIAL_PARAM {
                query.append_pair(k, v);
            }
        }
        query.append_pair(CREDENTIAL_PARAM, credential.expose());
    }
    url
}

fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}

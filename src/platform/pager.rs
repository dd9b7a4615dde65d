use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::{
    error::{ReconcileError, Result},
    platform::{
        client::ListingApi,
        endpoints::{self, Endpoint},
        envelope::{self, PageOutcome},
    },
    utils::RateLimiter,
};

/// Everything one pagination walk managed to collect.
#[derive(Debug, Clone)]
pub struct PageWalk<T> {
    pub records: Vec<T>,
    /// Number of requests issued, including the one that failed.
    pub requests: usize,
    /// False when the walk stopped on a transient failure.
    pub complete: bool,
    /// Why the walk stopped early, when it did.
    pub truncated_by: Option<String>,
    /// Records that could not be decoded into `T` and were skipped.
    pub skipped: usize,
}

impl<T> PageWalk<T> {
    fn new() -> Self {
        Self {
            records: Vec::new(),
            requests: 0,
            complete: true,
            truncated_by: None,
            skipped: 0,
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> PageWalk<U> {
        PageWalk {
            records: self.records.into_iter().map(f).collect(),
            requests: self.requests,
            complete: self.complete,
            truncated_by: self.truncated_by,
            skipped: self.skipped,
        }
    }
}

/// Walks page-based listing endpoints under a per-request timeout.
///
/// Every request waits at least `page_delay` after the previous one. Clones
/// share one limiter, so pacing holds across walks and concurrent members.
#[derive(Clone)]
pub struct Pager {
    api: Arc<dyn ListingApi>,
    limiter: Arc<RateLimiter>,
    timeout: Duration,
    page_delay: Duration,
}

impl Pager {
    pub fn new(api: Arc<dyn ListingApi>, timeout: Duration, page_delay: Duration) -> Self {
        Self {
            api,
            limiter: Arc::new(RateLimiter::new()),
            timeout,
            page_delay,
        }
    }

    /// Same API, limiter and timeout, different pacing (the roster walk is
    /// paced slower).
    pub fn with_page_delay(&self, page_delay: Duration) -> Self {
        Self {
            page_delay,
            ..self.clone()
        }
    }

    pub fn with_timeout(&self, timeout: Duration) -> Self {
        Self {
            timeout,
            ..self.clone()
        }
    }

    async fn request(&self, endpoint: &Endpoint, body: Map<String, Value>) -> Result<PageOutcome> {
        self.limiter.wait(self.page_delay).await;
        let response = tokio::time::timeout(self.timeout, self.api.post(endpoint.path, body))
            .await
            .map_err(|_| ReconcileError::Timeout(self.timeout))??;
        envelope::interpret(&response, endpoint.data_field)
    }

    /// Fetch every page of `endpoint`, starting at page 1.
    ///
    /// Stops after the first page shorter than `page_size`, on a "no data"
    /// reply, or on a transient failure, in which case the records gathered
    /// so far are returned with `complete == false`. Only an authentication
    /// rejection is returned as an error.
    pub async fn fetch_all_pages<T: DeserializeOwned>(
        &self,
        endpoint: &Endpoint,
        base_params: &Map<String, Value>,
        page_size: usize,
    ) -> Result<PageWalk<T>> {
        let page_size = page_size.max(1);
        let mut walk = PageWalk::new();
        let mut page = 1usize;

        loop {
            let mut body = base_params.clone();
            body.insert(endpoint.page_param.to_string(), Value::from(page));
            body.insert(endpoint.size_param.to_string(), Value::from(page_size));

            walk.requests += 1;
            let records = match self.request(endpoint, body).await {
                Ok(outcome) => outcome.into_records(),
                Err(e) if e.is_auth() => return Err(e),
                Err(e) => {
                    warn!(
                        "{} walk truncated at page {} after {} records: {}",
                        endpoint.name,
                        page,
                        walk.records.len(),
                        e
                    );
                    walk.complete = false;
                    walk.truncated_by = Some(format!("page {}: {}", page, e));
                    break;
                }
            };

            let received = records.len();
            for record in records {
                match serde_json::from_value::<T>(record) {
                    Ok(row) => walk.records.push(row),
                    Err(e) => {
                        walk.skipped += 1;
                        debug!("Skipping undecodable {} record: {}", endpoint.name, e);
                    }
                }
            }

            if received < page_size {
                break;
            }
            page += 1;
        }

        debug!(
            "{}: {} records in {} requests (complete: {})",
            endpoint.name,
            walk.records.len(),
            walk.requests,
            walk.complete
        );
        Ok(walk)
    }

    /// Fetch an unpaginated endpoint under the same envelope and failure rules.
    pub async fn fetch_single<T: DeserializeOwned>(
        &self,
        endpoint: &Endpoint,
        params: &Map<String, Value>,
    ) -> Result<PageWalk<T>> {
        let mut walk = PageWalk::new();
        walk.requests = 1;

        match self.request(endpoint, params.clone()).await {
            Ok(outcome) => {
                for record in outcome.into_records() {
                    match serde_json::from_value::<T>(record) {
                        Ok(row) => walk.records.push(row),
                        Err(e) => {
                            walk.skipped += 1;
                            debug!("Skipping undecodable {} record: {}", endpoint.name, e);
                        }
                    }
                }
            }
            Err(e) if e.is_auth() => return Err(e),
            Err(e) => {
                warn!("{} fetch failed: {}", endpoint.name, e);
                walk.complete = false;
                walk.truncated_by = Some(e.to_string());
            }
        }
        Ok(walk)
    }

    /// Issue one probe request and report whether the token was accepted.
    /// Transient failures are errors here; the caller decides what to do.
    pub async fn probe(&self, endpoint: &Endpoint, params: &Map<String, Value>) -> Result<bool> {
        match self.request(endpoint, params.clone()).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_auth() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Check the current token against the lightweight class-schedule
    /// listing, under `timeout` instead of the walk timeout.
    pub async fn validate_token(&self, store_id: &str, timeout: Duration) -> Result<bool> {
        let valid = self
            .with_timeout(timeout)
            .probe(&endpoints::TOKEN_PROBE, &endpoints::token_probe_params(store_id))
            .await?;
        if !valid {
            warn!("Token rejected by {}", endpoints::TOKEN_PROBE.name);
        }
        Ok(valid)
    }
}

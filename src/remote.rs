//! HTTP client for talking to a coordinator, used by worker clients and the
//! manager CLI.

use std::time::Duration;

use serde::Serialize;

use crate::error::{FarmError, Result};
use crate::overview::Overview;
use crate::protocol::{Envelope, Response, UpdateReply, ADD_JOBS, CLIENT_UPDATE};
use crate::scheduler::{ClientReport, Job, SubmissionAck};

pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Shortest pause the manager CLI accepts between submission attempts.
pub const MIN_RETRY_INTERVAL: Duration = Duration::from_secs(2);

/// How often a submission is retried while the coordinator is unreachable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts after the first one.
    pub max_retries: u32,
    pub interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 20,
            interval: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Only failures to reach the coordinator are retried. Anything the
    /// coordinator answered, even with an error, is final.
    pub fn is_retryable(error: &FarmError) -> bool {
        matches!(error, FarmError::Http(e) if e.is_connect() || e.is_timeout())
    }
}

#[derive(Debug, Clone)]
pub struct CoordinatorClient {
    base_url: String,
    http: reqwest::Client,
}

impl CoordinatorClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn send<T: Serialize>(&self, request: &str, data: T) -> Result<Response> {
        let resp = self
            .http
            .post(format!("{}/", self.base_url))
            .json(&Envelope { request, data })
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(FarmError::UnexpectedResponse(format!(
                "{} returned {}: {}",
                request, status, body
            )));
        }

        Ok(resp.json().await?)
    }

    /// Send one `client-update` poll.
    pub async fn update(&self, report: &ClientReport) -> Result<UpdateReply> {
        match self.send(CLIENT_UPDATE, report).await? {
            Response::Update(reply) => Ok(reply),
            other => Err(FarmError::UnexpectedResponse(format!(
                "expected update reply, got {:?}",
                other
            ))),
        }
    }

    /// Submit jobs; returns the assigned ids in submission order.
    pub async fn add_jobs(&self, jobs: &[Job]) -> Result<Vec<SubmissionAck>> {
        match self.send(ADD_JOBS, jobs).await? {
            Response::Ok(acks) => Ok(acks),
            other => Err(FarmError::UnexpectedResponse(format!(
                "expected ok reply, got {:?}",
                other
            ))),
        }
    }

    /// [`Self::add_jobs`], retried under `policy` while the coordinator
    /// cannot be reached.
    pub async fn add_jobs_with_retry(
        &self,
        jobs: &[Job],
        policy: RetryPolicy,
    ) -> Result<Vec<SubmissionAck>> {
        let mut retries = 0;
        loop {
            match self.add_jobs(jobs).await {
                Err(e) if RetryPolicy::is_retryable(&e) && retries < policy.max_retries => {
                    retries += 1;
                    tracing::warn!(
                        server = %self.base_url,
                        error = %e,
                        attempt = retries,
                        max_retries = policy.max_retries,
                        retry_in_ms = policy.interval.as_millis() as u64,
                        "Coordinator unreachable, retrying submission"
                    );
                    tokio::time::sleep(policy.interval).await;
                }
                result => return result,
            }
        }
    }

    pub async fn status(&self) -> Result<Overview> {
        let resp = self
            .http
            .get(format!("{}/api/status", self.base_url))
            .send()
            .await?
            .error_for_status()?;
        Ok(resp.json().await?)
    }
}

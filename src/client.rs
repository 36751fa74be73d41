//! HTTP client for a running refgraph server.
//!
//! [`AnalyzerClient::get_with_async`] hides the job protocol: when a route
//! answers with an async envelope, the client polls the job, pulls the result
//! chunk by chunk, and returns the reassembled JSON as if it had come inline.

use std::time::{Duration, Instant};

use reqwest::{Client, StatusCode};
use serde_json::Value;

use crate::api::types::{ChunkResponse, JobEnvelope, JobStatusResponse};
use crate::config::ClientConfig;
use crate::error::{RefgraphError, Result};
use crate::jobs::JobStatus;

pub struct AnalyzerClient {
    client: Client,
    base_url: String,
    poll_interval: Duration,
    timeout: Duration,
    chunk_size: usize,
}

impl AnalyzerClient {
    /// Create a client for the server at `base_url`.
    ///
    /// `timeout` bounds the whole wait for one job, not a single request.
    pub fn new(
        base_url: impl Into<String>,
        poll_interval: Duration,
        timeout: Duration,
        chunk_size: usize,
    ) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        let base_url: String = base_url.into();
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            poll_interval,
            timeout,
            chunk_size: chunk_size.max(1),
        })
    }

    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        Self::new(
            config.base_url.clone(),
            Duration::from_millis(config.poll_interval_ms),
            Duration::from_secs(config.timeout_secs),
            config.chunk_size,
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    async fn send(&self, path: &str, params: &[(&str, String)]) -> Result<(StatusCode, Value)> {
        let response = self
            .client
            .get(self.url(path))
            .query(params)
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        let value = serde_json::from_str(&body).map_err(|e| {
            RefgraphError::Server(format!("{} returned non-JSON body ({}): {}", path, status, e))
        })?;
        Ok((status, value))
    }

    /// GET `path` and return the JSON body. Non-2xx responses become errors.
    pub async fn get(&self, path: &str, params: &[(&str, String)]) -> Result<Value> {
        let (status, body) = self.send(path, params).await?;
        if status.is_success() {
            return Ok(body);
        }
        Err(status_error(status, &body))
    }

    /// GET `path`, following the async job protocol if the server queued it.
    pub async fn get_with_async(&self, path: &str, params: &[(&str, String)]) -> Result<Value> {
        let body = self.get(path, params).await?;
        if body.get("mode").and_then(Value::as_str) != Some("async") {
            return Ok(body);
        }

        let envelope: JobEnvelope = serde_json::from_value(body)?;
        log::debug!("{} queued as job {}", path, envelope.job_id);
        self.wait_for_job(&envelope.job_id).await?;
        let payload = self.fetch_result(&envelope.job_id).await?;
        Ok(serde_json::from_str(&payload)?)
    }

    /// Poll the job until it is done. An `error` state becomes `JobFailed`.
    pub async fn wait_for_job(&self, job_id: &str) -> Result<JobStatusResponse> {
        let deadline = Instant::now() + self.timeout;
        loop {
            let body = self
                .get("/analysis/job/status", &[("id", job_id.to_string())])
                .await?;
            let status: JobStatusResponse = serde_json::from_value(body)?;
            match status.status {
                JobStatus::Done => return Ok(status),
                JobStatus::Error => {
                    return Err(RefgraphError::JobFailed(
                        status.error.unwrap_or_else(|| "unknown error".to_string()),
                    ));
                }
                JobStatus::Pending | JobStatus::Running => {}
            }

            if Instant::now() >= deadline {
                return Err(RefgraphError::Timeout(format!(
                    "job {} still {} after {:?}",
                    job_id,
                    status.status.as_str(),
                    self.timeout
                )));
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Pull a finished job's payload chunk by chunk and concatenate it.
    pub async fn fetch_result(&self, job_id: &str) -> Result<String> {
        let mut payload = String::new();
        let mut offset = 0usize;
        loop {
            let (status, body) = self
                .send(
                    "/analysis/job/result",
                    &[
                        ("id", job_id.to_string()),
                        ("offset", offset.to_string()),
                        ("limit", self.chunk_size.to_string()),
                    ],
                )
                .await?;

            if status == StatusCode::ACCEPTED {
                return Err(not_ready_error(job_id, &body));
            }
            if !status.is_success() {
                return Err(status_error(status, &body));
            }

            let chunk: ChunkResponse = serde_json::from_value(body)?;
            payload.push_str(&chunk.chunk);
            if chunk.done {
                log::debug!("Job {}: fetched {} chars", job_id, chunk.total_chars);
                return Ok(payload);
            }
            if chunk.next_offset <= offset {
                return Err(RefgraphError::Server(format!(
                    "job {} result stalled at offset {}",
                    job_id, offset
                )));
            }
            offset = chunk.next_offset;
        }
    }
}

fn detail(body: &Value) -> String {
    let error = body.get("error").and_then(Value::as_str).unwrap_or("request failed");
    match body.get("detail").and_then(Value::as_str) {
        Some(detail) => format!("{}: {}", error, detail),
        None => error.to_string(),
    }
}

fn status_error(status: StatusCode, body: &Value) -> RefgraphError {
    match status {
        StatusCode::BAD_REQUEST => RefgraphError::InvalidInput(detail(body)),
        StatusCode::NOT_FOUND => RefgraphError::JobNotFound(detail(body)),
        StatusCode::SERVICE_UNAVAILABLE => RefgraphError::HomeUnavailable(detail(body)),
        _ => RefgraphError::Server(format!("{}: {}", status, detail(body))),
    }
}

fn not_ready_error(job_id: &str, body: &Value) -> RefgraphError {
    match body.get("status").and_then(Value::as_str) {
        Some("error") => RefgraphError::JobFailed(
            body.get("detail")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string(),
        ),
        other => RefgraphError::Server(format!(
            "job {} not ready ({})",
            job_id,
            other.unwrap_or("unknown")
        )),
    }
}

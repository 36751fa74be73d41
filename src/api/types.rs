use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::graph::ReferenceChain;
use crate::jobs::JobStatus;

/// Query string of the reference-chain routes.
///
/// Numeric fields arrive as strings so malformed values can fall back to the
/// configured defaults instead of rejecting the request.
#[derive(Debug, Default, Deserialize)]
pub struct ChainQuery {
    #[serde(alias = "path")]
    pub start: Option<String>,
    pub direction: Option<String>,
    #[serde(alias = "max_depth")]
    pub depth: Option<String>,
}

/// JSON body of `POST /analysis/reference-chain`
#[derive(Debug, Default, Deserialize)]
pub struct ChainBody {
    #[serde(alias = "path")]
    pub start: Option<String>,
    pub direction: Option<String>,
    #[serde(alias = "max_depth")]
    pub depth: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct JobQuery {
    pub id: Option<String>,
    pub offset: Option<String>,
    pub limit: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PathQuery {
    pub path: Option<String>,
}

/// Query string of `/asset/search`. A missing pattern matches every asset.
#[derive(Debug, Default, Deserialize)]
pub struct SearchQuery {
    pub pattern: Option<String>,
    #[serde(rename = "type", alias = "class")]
    pub kind: Option<String>,
}

/// Returned when a traversal was queued instead of answered inline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobEnvelope {
    pub ok: bool,
    pub mode: String,
    pub job_id: String,
    pub status_url: String,
    /// Contains literal `{offset}` and `{limit}` placeholders
    pub result_url_template: String,
}

impl JobEnvelope {
    pub fn new(job_id: &str) -> Self {
        Self {
            ok: true,
            mode: "async".to_string(),
            job_id: job_id.to_string(),
            status_url: format!("/analysis/job/status?id={}", job_id),
            result_url_template: format!(
                "/analysis/job/result?id={}&offset={{offset}}&limit={{limit}}",
                job_id
            ),
        }
    }
}

/// A traversal small enough to answer in the request itself
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InlineChainResponse {
    pub ok: bool,
    pub mode: String,
    #[serde(flatten)]
    pub report: ReferenceChain,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatusResponse {
    pub ok: bool,
    pub id: String,
    pub status: JobStatus,
    /// Payload length in chars, only once `done`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_chars: Option<usize>,
    /// Only in the `error` state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkResponse {
    pub ok: bool,
    pub id: String,
    pub offset: usize,
    pub limit: usize,
    pub total_chars: usize,
    pub next_offset: usize,
    pub done: bool,
    pub chunk: String,
}

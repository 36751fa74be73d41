//! Thread-safe registry of traversal jobs with lazy TTL eviction.
//!
//! Every access takes the single lock, purges records older than the
//! retention window, then reads or writes. There is no sweep thread.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::jobs::chunk::Payload;

/// Source of "now" for eviction decisions
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Done,
    Error,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Done => "done",
            JobStatus::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Error)
    }
}

/// Snapshot of one job. Callers only ever hold copies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRecord {
    pub id: Uuid,
    pub status: JobStatus,
    /// Serialized result, populated on `Done`
    pub result: Payload,
    /// Failure message, populated on `Error`
    pub error: String,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    fn pending(id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            id,
            status: JobStatus::Pending,
            result: Payload::default(),
            error: String::new(),
            created_at: now,
            started_at: None,
            finished_at: None,
        }
    }
}

/// Job registry. Clones share the same underlying map.
#[derive(Clone)]
pub struct JobStore {
    jobs: Arc<Mutex<HashMap<Uuid, JobRecord>>>,
    retention: Duration,
    clock: Clock,
}

impl JobStore {
    pub fn new(retention: Duration) -> Self {
        Self::with_clock(retention, Arc::new(Utc::now))
    }

    pub fn with_clock(retention: Duration, clock: Clock) -> Self {
        Self {
            jobs: Arc::new(Mutex::new(HashMap::new())),
            retention,
            clock,
        }
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    /// Lock the map and drop expired records.
    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, JobRecord>> {
        let mut jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        let now = (self.clock)();
        let before = jobs.len();
        jobs.retain(|_, job| match (now - job.created_at).to_std() {
            Ok(age) => age <= self.retention,
            // created in the "future" relative to the clock: keep
            Err(_) => true,
        });
        let evicted = before - jobs.len();
        if evicted > 0 {
            log::debug!("Evicted {} expired job(s)", evicted);
        }
        jobs
    }

    /// Register a new `Pending` job and return its id.
    pub fn create(&self) -> Uuid {
        let id = Uuid::new_v4();
        let now = (self.clock)();
        self.lock().insert(id, JobRecord::pending(id, now));
        id
    }

    /// Snapshot of a job, or `None` if unknown or expired.
    pub fn get(&self, id: &Uuid) -> Option<JobRecord> {
        self.lock().get(id).cloned()
    }

    /// Apply `f` to a job under the lock. `None` if the job is unknown or expired.
    pub fn mutate<R>(&self, id: &Uuid, f: impl FnOnce(&mut JobRecord) -> R) -> Option<R> {
        self.lock().get_mut(id).map(f)
    }

    /// `Pending -> Running`. Returns false if the job is gone or not pending.
    pub fn mark_running(&self, id: &Uuid) -> bool {
        let now = (self.clock)();
        self.mutate(id, |job| {
            if job.status != JobStatus::Pending {
                return false;
            }
            job.status = JobStatus::Running;
            job.started_at = Some(now);
            true
        })
        .unwrap_or(false)
    }

    /// Terminal transition to `Done`. Only the first terminal transition wins.
    pub fn complete(&self, id: &Uuid, result: Payload) -> bool {
        let now = (self.clock)();
        self.mutate(id, |job| {
            if job.status.is_terminal() {
                return false;
            }
            job.status = JobStatus::Done;
            job.result = result;
            job.finished_at = Some(now);
            true
        })
        .unwrap_or(false)
    }

    /// Terminal transition to `Error`. Only the first terminal transition wins.
    pub fn fail(&self, id: &Uuid, error: impl Into<String>) -> bool {
        let now = (self.clock)();
        let error = error.into();
        self.mutate(id, |job| {
            if job.status.is_terminal() {
                return false;
            }
            job.status = JobStatus::Error;
            job.error = error;
            job.finished_at = Some(now);
            true
        })
        .unwrap_or(false)
    }

    /// Number of live (non-expired) jobs
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

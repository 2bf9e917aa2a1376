//! The task record: the queue's envelope around a job.
//!
//! On disk a record carries `job_type` and `job_serialized` (a nested opaque
//! blob); in memory it additionally carries the live `job` value. Encoding
//! re-derives `job_serialized` from `job` through the job's own encoder;
//! decoding looks `job_type` up in the registry and reconstructs `job` from
//! `job_serialized`. A record with no `job` attached (freshly decoded but not
//! yet resolved, or the zero-id sentinel) encodes with an empty blob.
//!
//! `job` is held behind an `Arc` rather than owned outright: `PopNext` hands
//! a clone of it to the worker thread while leaving the record's own copy in
//! place, so the record can still be encoded (and persisted) faithfully by
//! any `Add`/`Terminated`/`PopNext` call that happens to run while the task
//! is RUNNING.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DecodeError;
use crate::job::{self, Job};

pub const DEFAULT_LOG_GROUP: &str = "_default_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    #[serde(rename = "TASK_NEW")]
    New,
    #[serde(rename = "TASK_RUNNING")]
    Running,
    #[serde(rename = "TASK_DONE")]
    Done,
    #[serde(rename = "TASK_ABORTED")]
    Aborted,
}

/// Wall-clock field with the zero-instant convention: absent means the Unix
/// epoch at UTC, not a missing key. Matches the serialization of a zero
/// `time.Time` in the source this was ported from.
pub fn zero_instant() -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH
}

fn is_zero(t: &DateTime<Utc>) -> bool {
    *t == zero_instant()
}

/// A task record as held in the queue. `job` is `None` only transiently,
/// between decoding a persisted record and resolving its job, and is always
/// `Some` for any record the queue hands out through its public operations.
#[derive(Debug)]
pub struct TaskRecord {
    pub id: u64,
    pub job_type: &'static str,
    pub job: Option<Arc<dyn Job>>,
    pub status: TaskStatus,
    pub last_activity: DateTime<Utc>,
    pub started_at: DateTime<Utc>,
    pub terminated_at: DateTime<Utc>,
    pub result_ok: bool,
    pub result_info: String,
    pub log_group: String,
}

impl TaskRecord {
    pub fn new(id: u64, job: Box<dyn Job>, log_group: String, now: DateTime<Utc>) -> Self {
        TaskRecord {
            id,
            job_type: job.job_type(),
            job: Some(Arc::from(job)),
            status: TaskStatus::New,
            last_activity: now,
            started_at: zero_instant(),
            terminated_at: zero_instant(),
            result_ok: false,
            result_info: String::new(),
            log_group,
        }
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            id: self.id,
            job_type: self.job_type,
            status: self.status,
            last_activity: self.last_activity,
            started_at: self.started_at,
            terminated_at: self.terminated_at,
            result_ok: self.result_ok,
            result_info: self.result_info.clone(),
            log_group: self.log_group.clone(),
        }
    }
}

/// A by-value copy of a task's observable state, with no live job attached —
/// the shape `Queue::Get` and `PopNext` hand back to callers.
#[derive(Debug, Clone)]
pub struct TaskSnapshot {
    pub id: u64,
    pub job_type: &'static str,
    pub status: TaskStatus,
    pub last_activity: DateTime<Utc>,
    pub started_at: DateTime<Utc>,
    pub terminated_at: DateTime<Utc>,
    pub result_ok: bool,
    pub result_info: String,
    pub log_group: String,
}

impl TaskSnapshot {
    /// The sentinel `Get` returns for an unknown id.
    pub fn zero() -> Self {
        TaskSnapshot {
            id: 0,
            job_type: "",
            status: TaskStatus::New,
            last_activity: zero_instant(),
            started_at: zero_instant(),
            terminated_at: zero_instant(),
            result_ok: false,
            result_info: String::new(),
            log_group: String::new(),
        }
    }

    pub fn is_unknown(&self) -> bool {
        self.id == 0
    }

    /// Duration from `started_at` to `terminated_at` if terminated, else from
    /// `started_at` to `now` if running, else `None`.
    pub fn duration(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        if is_zero(&self.started_at) {
            return None;
        }
        let end = if is_zero(&self.terminated_at) {
            now
        } else {
            self.terminated_at
        };
        Some(end - self.started_at)
    }
}

/// On-disk shape of one task record, mirroring `TTask`'s custom
/// `MarshalJSON`/`UnmarshalJSON`: `job` is never serialized directly, only
/// its encoded blob under `task`.
#[derive(Debug, Serialize, Deserialize)]
pub struct WireTask {
    pub id: u64,
    pub task_type: String,
    pub task: String,
    pub status: TaskStatus,
    pub last_activity: DateTime<Utc>,
    pub started_at: DateTime<Utc>,
    pub terminated_at: DateTime<Utc>,
    pub result_ok: bool,
    pub result_info: String,
    pub log_config: String,
}

impl WireTask {
    pub fn encode(record: &TaskRecord) -> serde_json::Result<Self> {
        let task = match &record.job {
            Some(job) => job.encode()?,
            None => String::new(),
        };
        Ok(WireTask {
            id: record.id,
            task_type: record.job_type.to_string(),
            task,
            status: record.status,
            last_activity: record.last_activity,
            started_at: record.started_at,
            terminated_at: record.terminated_at,
            result_ok: record.result_ok,
            result_info: record.result_info.clone(),
            log_config: record.log_group.clone(),
        })
    }

    pub fn decode(self) -> Result<TaskRecord, DecodeError> {
        let job = job::decode_job(&self.task_type, &self.task)?;
        Ok(TaskRecord {
            id: self.id,
            job_type: job.job_type(),
            job: Some(Arc::from(job)),
            status: self.status,
            last_activity: self.last_activity,
            started_at: self.started_at,
            terminated_at: self.terminated_at,
            result_ok: self.result_ok,
            result_info: self.result_info,
            log_group: self.log_config,
        })
    }
}

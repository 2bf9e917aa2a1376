//! The job capability contract and the job-type registry.
//!
//! A job is opaque to the queue: it is anything that can validate itself and
//! run to completion against a line sink. Polymorphic persistence is handled
//! through a tag string (`job_type`) and an explicit registry of decoders —
//! deliberately not reflection-based, so adding a job variant means adding one
//! registry entry rather than relying on runtime type discovery.

use std::collections::HashMap;
use std::fmt;

use once_cell::sync::Lazy;

use crate::error::{DecodeError, ValidationError};

/// Where a job writes its progress/output lines. Implemented by the log group
/// registry (`crate::logging`); jobs never see more than this.
pub trait LineSink: Send + Sync {
    fn write_line(&self, line: &str);
}

/// The contract every job variant implements.
///
/// `run` must not panic: any failure is conveyed through the returned
/// `(ok, info)` pair, never by unwinding out of the worker.
pub trait Job: Send + Sync + fmt::Debug {
    /// Stable tag identifying this variant; must match a registry entry.
    fn job_type(&self) -> &'static str;

    /// Pure self-validation; no side effects.
    fn check_valid(&self) -> Result<(), ValidationError>;

    /// Blocking execution. Returns `(ok, info)`.
    fn run(&self, sink: &dyn LineSink) -> (bool, String);

    /// Serialize this job's own fields to the nested on-disk blob.
    fn encode(&self) -> serde_json::Result<String>;
}

type DecodeFn = fn(&str) -> Result<Box<dyn Job>, DecodeError>;

/// Registry of (tag -> decoder). Encoding doesn't need a registry entry since
/// `Job::encode` is implemented per concrete type; decoding does, because we
/// only have the tag and a blob until the decoder constructs the value.
static REGISTRY: Lazy<HashMap<&'static str, DecodeFn>> = Lazy::new(|| {
    let mut m: HashMap<&'static str, DecodeFn> = HashMap::new();
    m.insert(crate::jobs::cmd::TYPE_TAG, crate::jobs::cmd::decode);
    m.insert(crate::jobs::urlcheck::TYPE_TAG, crate::jobs::urlcheck::decode);
    m
});

/// True if `job_type` names a registered variant.
pub fn type_is_valid(job_type: &str) -> bool {
    REGISTRY.contains_key(job_type)
}

/// Decode a job of the given type from its serialized blob.
///
/// Returns `DecodeError::UnknownJobType` for any tag not in the registry —
/// this is the error that makes `Queue::Init` fatal on a queue file written
/// by a build that knew about a job type this one doesn't.
pub fn decode_job(job_type: &str, serialized: &str) -> Result<Box<dyn Job>, DecodeError> {
    match REGISTRY.get(job_type) {
        Some(decode) => decode(serialized),
        None => Err(DecodeError::UnknownJobType(job_type.to_string())),
    }
}

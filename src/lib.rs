//! cmdagent — core library.
//!
//! A host-resident task agent: an authenticated HTTPS daemon that accepts
//! shell-command and URL-liveness-check jobs, runs them asynchronously, and
//! persists a crash-recoverable task queue.

pub mod api;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod job;
pub mod jobs;
pub mod logging;
pub mod queue;
pub mod task;

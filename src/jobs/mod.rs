//! Concrete job variants. Each module owns one `job_type` tag, its wire
//! shape, and its registry `decode` function.

pub mod cmd;
pub mod urlcheck;

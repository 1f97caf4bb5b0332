//! UserBridge background worker
//!
//! Jobs run on a fixed interval or a cron schedule against a shared
//! container. Lifecycle: `Idle → Running → Stopped`.

pub mod cadence;
pub mod error;
pub mod job;
pub mod worker;

pub use cadence::Cadence;
pub use error::{Result, WorkerError};
pub use job::{Job, JobStats};
pub use worker::{Worker, WorkerState, DEFAULT_SHUTDOWN_GRACE};

//! Scheduled work: the weekly batch agent and the cron schedule that drives it.
//!
//! The [`BatchAgent`] moves `Idle -> Running -> Idle` on each trigger. It can
//! be ticked by hand against an injected [`Clock`], run immediately with
//! [`BatchAgent::run_once`], or started as a background task that is stopped
//! through its [`BatchHandle`].

pub mod batch;
pub mod schedule;
pub mod sink;

pub use batch::{
    BatchAgent, BatchHandle, BatchReport, BatchState, Clock, ManualClock, StoreDirectory,
    SystemClock, UserDirectory,
};
pub use schedule::Schedule;
pub use sink::{BatchSummary, LatestSummaries, LogSink, SummarySink};

/// Workflow errors.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("Invalid schedule '{expr}': {reason}")]
    InvalidSchedule { expr: String, reason: String },
}

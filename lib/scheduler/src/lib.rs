//! Cron scheduling for the flowline platform.
//!
//! The engine treats time as an external collaborator: this crate watches
//! the clock, evaluates `schedule` triggers with the `cron` crate, and
//! starts executions on the engine when they come due.

pub mod error;
pub mod runner;
pub mod schedule;

pub use error::ScheduleError;
pub use runner::{DEFAULT_POLL_INTERVAL, SCHEDULER_PROVENANCE, ScheduleRunner};
pub use schedule::CronSchedule;

//! Scan/dispatch loop for due alarms.
//!
//! This module provides the periodic tick that claims due alarms, hands them
//! to the job queue and re-arms recurring ones.

mod engine;
mod handle;
mod types;

pub use engine::{
    AlarmScheduler, DEFAULT_MAX_CONCURRENT_ALARMS, DEFAULT_TICK_INTERVAL, dispatch_all,
};
pub use handle::SchedulerHandle;
pub use types::{AlarmOutcome, SchedulerError, SchedulerState, TickReport};

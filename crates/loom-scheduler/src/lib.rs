//! `loom-scheduler` — Tokio-based job scheduler with JSON-file persistence.
//!
//! # Overview
//!
//! Jobs are kept in memory behind a mutex and persisted as a single JSON
//! array (write-temp-then-rename) on every mutation. [`engine::SchedulerEngine`]
//! ticks every second and fires any job whose `next_run_at` has arrived,
//! forwarding it (non-blocking) to a delivery channel and recomputing its
//! next run.
//!
//! # Schedule variants
//!
//! | Variant    | Behaviour                                    |
//! |------------|-----------------------------------------------|
//! | `Once`     | Single fire at an absolute UTC instant         |
//! | `Interval` | Repeat every N ms, optionally anchored         |
//! | `Cron`     | Standard cron expression with seconds          |

pub mod engine;
pub mod error;
pub mod schedule;
pub mod types;

pub use engine::{SchedulerEngine, SchedulerHandle, SchedulerStatus};
pub use error::{Result, SchedulerError};
pub use types::{Job, JobPatch, Payload, Schedule, SessionTarget};

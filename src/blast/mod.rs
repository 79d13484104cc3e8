//! Blast dispatching: admission control, shared rate-limit budget and the
//! single-worker job queue.
//!
//! Core components:
//! - `model`: Job, result and status types (Pending → Running ⇄ Paused → Completed/Failed)
//! - `budget`: Process-wide hourly/daily counters owned by an actor task
//! - `policy`: Pure admission decision for the next send
//! - `store`: In-memory job registry
//! - `control`: Global pause switch
//! - `dispatcher`: Submission, queueing and the per-job run loop

pub mod budget;
pub mod control;
pub mod dispatcher;
pub mod model;
pub mod policy;
pub mod store;

pub use budget::{BudgetHandle, RateLimitBudget, spawn_reset_ticker};
pub use control::PauseSwitch;
pub use dispatcher::{Dispatcher, DispatcherDeps, DispatcherStats};
pub use model::{BlastJob, BlastResult, Channel, JobStatus, PauseReason, ResultStatus, personalize};
pub use policy::{Decision, decide};
pub use store::JobStore;

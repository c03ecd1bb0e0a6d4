//! Decision logic for the traffic network.
//!
//! `PreemptionEngine` and `IncidentEngine` read current state through the
//! store traits, commit their change in one transaction, then hand the
//! reversal to the `Scheduler` as a self-contained deferred task.

pub mod incident;
pub mod manual;
pub mod preemption;
pub mod scheduler;

pub use incident::{IncidentEngine, IncidentOutcome};
pub use manual::ManualControl;
pub use preemption::{PreemptionEngine, PreemptionOutcome, PreemptionRequest, MAX_HOLD_SECONDS};
pub use scheduler::{
    DeferredAction, ScheduledTask, Scheduler, SchedulerHandle, StoreExecutor, TaskExecutor,
    TaskReceipt,
};

//! The durable execution engine.
//!
//! - [`retry`]: backoff delay computation.
//! - [`step`]: the step executor -- memoization, timeouts, retry scheduling,
//!   and durable sleep, surfaced to programs as [`step::StepHandle`].
//! - [`runner`]: replays a workflow program against its log and maps the
//!   outcome onto the instance lifecycle.
//! - [`manager`]: the public facade -- program registry, instance creation,
//!   status, termination, and the wake path.

pub mod manager;
pub mod retry;
pub mod runner;
pub mod step;

pub use manager::{InstanceManager, ManagerError};
pub use runner::{RunOutcome, WorkflowProgram, WorkflowRunner};
pub use step::{StepHandle, StepInterrupt, StepOptions, SuspendKind};

//! The guarded execution layer: guard hooks, per-run capture, the
//! capability registry, result checking and the driver tying them
//! together.
//!
//! A run never outlives one call to [`Driver::execute`]; all guest-side
//! state (namespace, capture, interpreter) is created and dropped inside
//! it, so concurrent runs share nothing but the data collaborator.

pub mod capture;
pub mod driver;
pub mod guard;
pub mod registry;
pub mod result;

pub use capture::Capture;
pub use driver::{execute_batch, Driver, ExecutionRequest, ExecutionResult};

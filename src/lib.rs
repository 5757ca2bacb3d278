//! Guarded execution of generated finance scripts.
//!
//! [`sandbox::Driver`] takes script text plus a caller id, runs it in the
//! restricted interpreter against a namespace of caller-bound
//! capabilities, and returns an [`ExecutionResult`].

pub mod capabilities;
pub mod config;
pub mod error;
pub mod interp;
pub mod sandbox;

pub use capabilities::{FinancialData, FixtureStore};
pub use config::Config;
pub use error::{GuardDenied, SandboxError};
pub use sandbox::{Driver, ExecutionRequest, ExecutionResult};

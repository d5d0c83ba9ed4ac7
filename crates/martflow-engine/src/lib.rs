//! martflow engine - unit execution
//!
//! This crate runs a registered unit graph against a query engine:
//! - Execution engine (sequential and parallel)
//! - Incremental state tracking (watermarks)
//! - Per-run unit state
//! - Run summaries

pub mod context;
pub mod error;
pub mod executor;
pub mod state;
pub mod status;
pub mod watermark;

pub use context::ExecutionContext;
pub use error::UnitError;
pub use executor::{CancelHandle, Executor, RunMode, RunRequest};
pub use state::{RunState, UnitOutcome, UnitState};
pub use status::summarize;
pub use watermark::{WatermarkError, WatermarkTracker};

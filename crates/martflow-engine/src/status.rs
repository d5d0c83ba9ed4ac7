//! Status reporting
//!
//! Turns the final run state into the serializable summary the CLI prints
//! and writes to run_results.json.

use martflow_core::{FailedUnit, RunSummary, SkippedUnit, StatusCounts, UnitResult};
use crate::state::RunState;

/// Summarize a finished run
///
/// Failed and skipped units are listed in execution order. Each failure
/// keeps the error text the engine returned; each skip names its cause.
pub fn summarize(state: &RunState) -> RunSummary {
    let mut counts = StatusCounts::default();
    let mut results = Vec::with_capacity(state.units().len());
    let mut failed = Vec::new();
    let mut skipped = Vec::new();

    for unit in state.units() {
        counts.record(unit.status);

        let error = unit.error.as_ref().map(|e| e.to_string());
        if let Some(error) = &error {
            failed.push(FailedUnit {
                name: unit.name.clone(),
                error: error.clone(),
            });
        }

        if let Some(reason) = &unit.skip_reason {
            skipped.push(SkippedUnit {
                name: unit.name.clone(),
                reason: reason.clone(),
            });
        }

        results.push(UnitResult {
            name: unit.name.clone(),
            status: unit.status,
            materialization: unit.materialization,
            duration_secs: unit.duration.as_secs_f64(),
            error,
            skip_reason: unit.skip_reason.clone(),
            watermark: unit.watermark.as_ref().map(|w| w.value().clone()),
            statement_checksum: unit.statement_checksum.clone(),
        });
    }

    RunSummary {
        counts,
        results,
        failed,
        skipped,
    }
}

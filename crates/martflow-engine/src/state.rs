//! Per-run unit state
//!
//! One entry per unit of the run, kept in execution order. Owned by the
//! executor for the duration of a run and summarized at the end.

use martflow_core::{Materialization, SkipReason, Unit, UnitStatus};
use martflow_warehouse::Watermark;
use std::collections::HashMap;
use std::time::Duration;
use crate::error::UnitError;

/// State of one unit within a run
#[derive(Debug, Clone)]
pub struct UnitState {
    pub name: String,
    pub materialization: Materialization,
    pub status: UnitStatus,
    pub error: Option<UnitError>,
    pub skip_reason: Option<SkipReason>,
    pub duration: Duration,

    /// Watermark the unit was merged above, for incremental runs
    pub watermark: Option<Watermark>,

    /// sha256 of the rendered statement
    pub statement_checksum: Option<String>,
}

/// What a successfully executed unit reports back
#[derive(Debug, Clone, Default)]
pub struct UnitOutcome {
    pub watermark: Option<Watermark>,
    pub statement_checksum: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RunState {
    units: Vec<UnitState>,
    index: HashMap<String, usize>,
}

impl RunState {
    /// Every unit of `order` starts out pending
    pub fn new(order: &[&Unit]) -> Self {
        let units: Vec<UnitState> = order
            .iter()
            .map(|unit| UnitState {
                name: unit.name.clone(),
                materialization: unit.materialization,
                status: UnitStatus::Pending,
                error: None,
                skip_reason: None,
                duration: Duration::ZERO,
                watermark: None,
                statement_checksum: None,
            })
            .collect();

        let index = units
            .iter()
            .enumerate()
            .map(|(i, u)| (u.name.clone(), i))
            .collect();

        Self { units, index }
    }

    /// Units in execution order
    pub fn units(&self) -> &[UnitState] {
        &self.units
    }

    pub fn get(&self, name: &str) -> Option<&UnitState> {
        self.index.get(name).map(|&i| &self.units[i])
    }

    /// Whether `name` takes part in this run
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn status(&self, name: &str) -> Option<UnitStatus> {
        self.get(name).map(|u| u.status)
    }

    /// Whether every unit reached a terminal status
    pub fn is_finished(&self) -> bool {
        self.units.iter().all(|u| u.status.is_terminal())
    }

    /// Names of units still pending, in execution order
    pub fn pending(&self) -> Vec<String> {
        self.units
            .iter()
            .filter(|u| u.status == UnitStatus::Pending)
            .map(|u| u.name.clone())
            .collect()
    }

    /// Skip reason inherited from the upstream units of `unit`
    ///
    /// A failed upstream unit names itself as the ancestor; a skipped one
    /// passes its own reason on. An upstream failure, direct or inherited,
    /// wins over a cancelled or fail-fast upstream in any `depends_on`
    /// position. Upstream units outside the run are taken as already built.
    pub fn blocked_by(&self, unit: &Unit) -> Option<SkipReason> {
        let mut fallback = None;

        for upstream in &unit.depends_on {
            let Some(state) = self.get(upstream) else {
                continue;
            };

            let reason = match state.status {
                UnitStatus::Failed => SkipReason::UpstreamFailed {
                    ancestor: upstream.clone(),
                },
                UnitStatus::Skipped => match &state.skip_reason {
                    Some(reason) => reason.clone(),
                    None => continue,
                },
                _ => continue,
            };

            if matches!(reason, SkipReason::UpstreamFailed { .. }) {
                return Some(reason);
            }
            fallback.get_or_insert(reason);
        }

        fallback
    }

    /// Whether every upstream unit of `unit` in this run succeeded
    pub fn is_ready(&self, unit: &Unit) -> bool {
        unit.depends_on
            .iter()
            .all(|upstream| match self.status(upstream) {
                Some(status) => status == UnitStatus::Succeeded,
                None => true,
            })
    }

    fn entry(&mut self, name: &str) -> Option<&mut UnitState> {
        let i = *self.index.get(name)?;
        Some(&mut self.units[i])
    }

    pub(crate) fn mark_running(&mut self, name: &str) {
        if let Some(unit) = self.entry(name) {
            debug_assert_eq!(unit.status, UnitStatus::Pending);
            unit.status = UnitStatus::Running;
        }
    }

    pub(crate) fn mark_succeeded(&mut self, name: &str, outcome: UnitOutcome, duration: Duration) {
        if let Some(unit) = self.entry(name) {
            unit.status = UnitStatus::Succeeded;
            unit.duration = duration;
            unit.watermark = outcome.watermark;
            unit.statement_checksum = outcome.statement_checksum;
        }
    }

    pub(crate) fn mark_failed(&mut self, name: &str, error: UnitError, duration: Duration) {
        if let Some(unit) = self.entry(name) {
            unit.status = UnitStatus::Failed;
            unit.duration = duration;
            unit.error = Some(error);
        }
    }

    /// Skip a unit that has not started; started units keep their status
    pub(crate) fn mark_skipped(&mut self, name: &str, reason: SkipReason) {
        if let Some(unit) = self.entry(name) {
            if unit.status == UnitStatus::Pending {
                unit.status = UnitStatus::Skipped;
                unit.skip_reason = Some(reason);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use martflow_warehouse::EngineError;
    use pretty_assertions::assert_eq;

    fn units() -> Vec<Unit> {
        vec![
            Unit::table("customers", ""),
            Unit::table("orders", ""),
            Unit::table("customer_orders", "").with_depends_on(["customers", "orders"]),
            Unit::view("customer_orders_daily", "").with_depends_on(["customer_orders"]),
        ]
    }

    #[test]
    fn starts_pending() {
        let units = units();
        let order: Vec<&Unit> = units.iter().collect();
        let state = RunState::new(&order);

        assert_eq!(state.pending().len(), 4);
        assert!(!state.is_finished());
        assert!(state.is_ready(&units[0]));
        assert!(!state.is_ready(&units[2]));
    }

    #[test]
    fn skip_reason_names_failed_ancestor() {
        let units = units();
        let order: Vec<&Unit> = units.iter().collect();
        let mut state = RunState::new(&order);

        state.mark_running("customers");
        state.mark_succeeded("customers", UnitOutcome::default(), Duration::from_millis(5));
        state.mark_running("orders");
        state.mark_failed("orders", EngineError::Query("boom".into()).into(), Duration::ZERO);

        let reason = state.blocked_by(&units[2]).unwrap();
        assert_eq!(reason, SkipReason::UpstreamFailed { ancestor: "orders".into() });
        state.mark_skipped("customer_orders", reason);

        // Transitive skips still name the unit that failed
        assert_eq!(
            state.blocked_by(&units[3]),
            Some(SkipReason::UpstreamFailed { ancestor: "orders".into() })
        );
    }

    #[test]
    fn failure_wins_over_earlier_cancelled_upstream() {
        let units = vec![
            Unit::table("stg_payments", ""),
            Unit::table("orders", ""),
            Unit::table("order_payments", "").with_depends_on(["stg_payments", "orders"]),
        ];
        let order: Vec<&Unit> = units.iter().collect();
        let mut state = RunState::new(&order);

        state.mark_running("orders");
        state.mark_failed("orders", EngineError::Query("boom".into()).into(), Duration::ZERO);
        state.mark_skipped("stg_payments", SkipReason::Cancelled);

        assert_eq!(
            state.blocked_by(&units[2]),
            Some(SkipReason::UpstreamFailed { ancestor: "orders".into() })
        );
    }

    #[test]
    fn cancelled_upstream_passes_its_reason_on() {
        let units = units();
        let order: Vec<&Unit> = units.iter().collect();
        let mut state = RunState::new(&order);

        state.mark_running("customers");
        state.mark_succeeded("customers", UnitOutcome::default(), Duration::ZERO);
        state.mark_skipped("orders", SkipReason::FailFast { trigger: "stg".into() });

        assert_eq!(
            state.blocked_by(&units[2]),
            Some(SkipReason::FailFast { trigger: "stg".into() })
        );
    }

    #[test]
    fn started_units_are_not_skipped() {
        let units = units();
        let order: Vec<&Unit> = units.iter().collect();
        let mut state = RunState::new(&order);

        state.mark_running("customers");
        state.mark_skipped("customers", SkipReason::Cancelled);
        assert_eq!(state.status("customers"), Some(UnitStatus::Running));
    }

    #[test]
    fn upstream_outside_run_counts_as_built() {
        let units = units();
        let order: Vec<&Unit> = vec![&units[2]];
        let state = RunState::new(&order);

        assert!(state.is_ready(&units[2]));
        assert_eq!(state.blocked_by(&units[2]), None);
        assert!(!state.contains("customers"));
    }
}

//! Execution engine
//!
//! Walks a topological order of units and materializes each one through the
//! query engine:
//! - view: create or replace the view
//! - table: create or replace the table from the full query
//! - incremental: full build when there is no watermark (or on full
//!   refresh), otherwise merge the rows above the watermark by unique key
//!
//! A failed unit never stops independent branches. Its downstream units are
//! skipped without touching the engine, and the skip names the failed
//! ancestor. Units are not retried.
//!
//! With `threads > 1` units run concurrently: a unit is admitted once every
//! upstream unit in the run has succeeded, and at most `threads` units hold
//! an engine slot at a time.

use martflow_core::{Materialization, RunConfig, RunSummary, SkipReason, Unit};
use martflow_jinja::render;
use martflow_warehouse::{Ddl, QueryEngine, Relation};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use crate::context::ExecutionContext;
use crate::error::UnitError;
use crate::state::{RunState, UnitOutcome};
use crate::status::summarize;
use crate::watermark::WatermarkTracker;

/// How incremental units are built
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RunMode {
    /// Merge incremental units above their watermark
    #[default]
    Normal,

    /// Rebuild incremental units from scratch
    FullRefresh,
}

/// Options for one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    pub mode: RunMode,

    /// Stop dispatching after the first failure
    pub fail_fast: bool,

    /// Maximum units executing at once; 1 runs strictly in order
    pub threads: usize,

    /// Per-unit limit; expiry fails the unit
    pub unit_timeout: Option<Duration>,
}

impl Default for RunRequest {
    fn default() -> Self {
        Self {
            mode: RunMode::Normal,
            fail_fast: false,
            threads: 1,
            unit_timeout: None,
        }
    }
}

impl RunRequest {
    /// Defaults from the `[run]` section of martflow.toml
    pub fn from_config(run: &RunConfig) -> Self {
        Self {
            mode: if run.full_refresh { RunMode::FullRefresh } else { RunMode::Normal },
            fail_fast: run.fail_fast,
            threads: run.threads.max(1),
            unit_timeout: run.unit_timeout(),
        }
    }
}

/// Cooperative cancellation, checked before each unit starts
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Executes units against one query engine and target
pub struct Executor {
    engine: Arc<dyn QueryEngine>,
    context: Arc<ExecutionContext>,
    cancel: CancelHandle,
}

impl Executor {
    pub fn new(engine: Arc<dyn QueryEngine>, context: ExecutionContext) -> Self {
        Self {
            engine,
            context: Arc::new(context),
            cancel: CancelHandle::default(),
        }
    }

    /// Handle that cancels runs of this executor
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.context
    }

    /// Execute `order` and summarize the outcome
    pub async fn run(&self, order: &[&Unit], request: &RunRequest) -> RunSummary {
        summarize(&self.execute(order, request).await)
    }

    /// Execute `order` (a topological order) and return the final run state
    pub async fn execute(&self, order: &[&Unit], request: &RunRequest) -> RunState {
        let started = Instant::now();
        tracing::info!(
            units = order.len(),
            threads = request.threads,
            mode = ?request.mode,
            fail_fast = request.fail_fast,
            engine = self.engine.name(),
            "starting run"
        );

        let relations: HashMap<String, Relation> = order
            .iter()
            .map(|unit| (unit.name.clone(), self.context.relation_for(unit)))
            .collect();

        let runner = UnitRunner {
            engine: Arc::clone(&self.engine),
            context: Arc::clone(&self.context),
            tracker: WatermarkTracker::new(Arc::clone(&self.engine), Arc::clone(&self.context)),
            relations: Arc::new(relations),
            mode: request.mode,
            timeout: request.unit_timeout,
        };

        let state = if request.threads <= 1 {
            self.run_sequential(order, request, &runner).await
        } else {
            self.run_parallel(order, request, &runner).await
        };

        tracing::info!(elapsed_ms = started.elapsed().as_millis() as u64, "run finished");
        state
    }

    async fn run_sequential(&self, order: &[&Unit], request: &RunRequest, runner: &UnitRunner) -> RunState {
        let mut state = RunState::new(order);
        let mut halted: Option<String> = None;

        for unit in order {
            if let Some(reason) = self.skip_reason(&state, unit, halted.as_deref()) {
                skip(&mut state, unit, reason);
                continue;
            }

            state.mark_running(&unit.name);
            let (duration, result) = runner.run(unit).await;

            if !record(&mut state, unit, duration, result) && request.fail_fast {
                tracing::warn!(unit = %unit.name, "fail-fast: halting run");
                halted = Some(unit.name.clone());
            }
        }

        state
    }

    async fn run_parallel(&self, order: &[&Unit], request: &RunRequest, runner: &UnitRunner) -> RunState {
        let mut state = RunState::new(order);
        let mut halted: Option<String> = None;
        let by_name: HashMap<&str, &Unit> = order.iter().map(|u| (u.name.as_str(), *u)).collect();

        let semaphore = Arc::new(Semaphore::new(request.threads));
        let mut in_flight = JoinSet::new();

        loop {
            // Admission pass over pending units, in execution order
            for name in state.pending() {
                let Some(unit) = by_name.get(name.as_str()).copied() else {
                    continue;
                };

                if let Some(reason) = self.skip_reason(&state, unit, halted.as_deref()) {
                    skip(&mut state, unit, reason);
                    continue;
                }

                if !state.is_ready(unit) {
                    continue;
                }

                let Ok(permit) = Arc::clone(&semaphore).try_acquire_owned() else {
                    break;
                };

                state.mark_running(&unit.name);
                tracing::debug!(unit = %unit.name, "admitted");

                let runner = runner.clone();
                let owned = unit.clone();
                let task = tokio::spawn(async move {
                    let _permit = permit;
                    runner.run(&owned).await
                });

                // The inner task may panic; the wrapper keeps the unit name
                in_flight.spawn(async move { (name, task.await) });
            }

            let Some(joined) = in_flight.join_next().await else {
                break;
            };

            match joined {
                Ok((name, Ok((duration, result)))) => {
                    let Some(unit) = by_name.get(name.as_str()).copied() else {
                        continue;
                    };
                    if !record(&mut state, unit, duration, result) && request.fail_fast && halted.is_none() {
                        tracing::warn!(unit = %unit.name, "fail-fast: no further units will start");
                        halted = Some(unit.name.clone());
                    }
                }
                Ok((name, Err(join_error))) => {
                    if let Some(unit) = by_name.get(name.as_str()).copied() {
                        let error = UnitError::Aborted(join_error.to_string());
                        record(&mut state, unit, Duration::ZERO, Err(error));
                        if request.fail_fast && halted.is_none() {
                            halted = Some(name);
                        }
                    }
                }
                Err(join_error) => {
                    tracing::error!(error = %join_error, "unit wrapper task failed");
                }
            }
        }

        state
    }

    /// Why `unit` must be skipped instead of started, if it must
    fn skip_reason(&self, state: &RunState, unit: &Unit, halted: Option<&str>) -> Option<SkipReason> {
        if let Some(reason) = state.blocked_by(unit) {
            return Some(reason);
        }
        if self.cancel.is_cancelled() {
            return Some(SkipReason::Cancelled);
        }
        halted.map(|trigger| SkipReason::FailFast {
            trigger: trigger.to_string(),
        })
    }
}

fn skip(state: &mut RunState, unit: &Unit, reason: SkipReason) {
    tracing::warn!(unit = %unit.name, reason = %reason, "skipping unit");
    state.mark_skipped(&unit.name, reason);
}

/// Store a unit's result; returns whether it succeeded
fn record(
    state: &mut RunState,
    unit: &Unit,
    duration: Duration,
    result: Result<UnitOutcome, UnitError>,
) -> bool {
    match result {
        Ok(outcome) => {
            tracing::info!(
                unit = %unit.name,
                materialization = %unit.materialization,
                duration_ms = duration.as_millis() as u64,
                "unit succeeded"
            );
            state.mark_succeeded(&unit.name, outcome, duration);
            true
        }
        Err(error) => {
            tracing::warn!(unit = %unit.name, error = %error, "unit failed");
            state.mark_failed(&unit.name, error, duration);
            false
        }
    }
}

/// Everything needed to execute one unit, cheap to clone into a task
#[derive(Clone)]
struct UnitRunner {
    engine: Arc<dyn QueryEngine>,
    context: Arc<ExecutionContext>,
    tracker: WatermarkTracker,
    relations: Arc<HashMap<String, Relation>>,
    mode: RunMode,
    timeout: Option<Duration>,
}

impl UnitRunner {
    async fn run(&self, unit: &Unit) -> (Duration, Result<UnitOutcome, UnitError>) {
        let started = Instant::now();

        let result = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, self.execute(unit)).await {
                Ok(result) => result,
                Err(_) => Err(UnitError::Timeout(limit)),
            },
            None => self.execute(unit).await,
        };

        (started.elapsed(), result)
    }

    async fn execute(&self, unit: &Unit) -> Result<UnitOutcome, UnitError> {
        let relation = self.context.relation_for(unit);

        let watermark = match (unit.materialization, self.mode) {
            (Materialization::Incremental, RunMode::Normal) => self.tracker.current_watermark(unit).await?,
            _ => None,
        };

        let render_context =
            self.context
                .render_context(unit, &self.relations, self.engine.as_ref(), watermark.as_ref());
        let statement = render(&unit.sql, &render_context)?;
        let statement_checksum = checksum(&statement);

        tracing::debug!(unit = %unit.name, relation = %relation, sql = %statement, "rendered statement");

        match (unit.materialization, &watermark) {
            (Materialization::View, _) => {
                self.engine
                    .execute_ddl(&Ddl::CreateOrReplaceView { relation, query: statement })
                    .await?;
            }
            (Materialization::Table, _) | (Materialization::Incremental, None) => {
                self.engine
                    .execute_ddl(&Ddl::CreateOrReplaceTable { relation, query: statement })
                    .await?;
            }
            (Materialization::Incremental, Some(watermark)) => {
                tracing::debug!(unit = %unit.name, watermark = %watermark, "merging above watermark");
                self.engine
                    .execute_merge(&relation, &statement, unit.unique_key.as_deref())
                    .await?;
            }
        }

        Ok(UnitOutcome {
            watermark,
            statement_checksum: Some(statement_checksum),
        })
    }
}

/// Hex sha256 of a rendered statement
fn checksum(statement: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(statement.as_bytes());
    hex::encode(hasher.finalize())
}

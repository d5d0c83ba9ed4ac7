//! Incremental state tracking
//!
//! The watermark of an incremental unit is the maximum boundary column
//! value in its materialized output. It is read from the engine every time
//! the unit starts; nothing is cached between runs, so an output rebuilt or
//! truncated out of band is picked up on the next run.

use martflow_core::Unit;
use martflow_warehouse::{EngineError, QueryEngine, Watermark};
use std::sync::Arc;
use crate::context::ExecutionContext;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum WatermarkError {
    #[error("Incremental unit '{0}' has no boundary_column")]
    MissingWatermarkConfiguration(String),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Reads watermarks of incremental units from the query engine
#[derive(Clone)]
pub struct WatermarkTracker {
    engine: Arc<dyn QueryEngine>,
    context: Arc<ExecutionContext>,
}

impl WatermarkTracker {
    pub fn new(engine: Arc<dyn QueryEngine>, context: Arc<ExecutionContext>) -> Self {
        Self { engine, context }
    }

    /// Current watermark of `unit`; `None` means a full build is required
    pub async fn current_watermark(&self, unit: &Unit) -> Result<Option<Watermark>, WatermarkError> {
        let column = unit
            .boundary_column
            .as_deref()
            .ok_or_else(|| WatermarkError::MissingWatermarkConfiguration(unit.name.clone()))?;

        let relation = self.context.relation_for(unit);
        let watermark = self.engine.max_value(&relation, column).await?;

        match &watermark {
            Some(w) => tracing::debug!(unit = %unit.name, column, watermark = %w, "read watermark"),
            None => tracing::debug!(unit = %unit.name, column, "no watermark, full build required"),
        }

        Ok(watermark)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use martflow_core::TargetConfig;
    use martflow_warehouse::{MemoryEngine, Relation};
    use serde_json::json;

    fn tracker(engine: &MemoryEngine) -> WatermarkTracker {
        WatermarkTracker::new(
            Arc::new(engine.clone()),
            Arc::new(ExecutionContext::new(TargetConfig::default())),
        )
    }

    fn fct_orders() -> Unit {
        Unit::incremental("fct_orders", "select 1")
            .with_unique_key(["id"])
            .with_boundary_column("updated_at")
    }

    #[tokio::test]
    async fn missing_output_means_full_build() {
        let engine = MemoryEngine::new();
        assert_eq!(tracker(&engine).current_watermark(&fct_orders()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn reads_engine_every_time() {
        let engine = MemoryEngine::new();
        let relation = Relation::new("analytics", "dbt_dev", "fct_orders");
        let tracker = tracker(&engine);

        engine
            .seed_table(&relation, vec![[("updated_at".to_string(), json!(5))].into_iter().collect()])
            .await;
        let first = tracker.current_watermark(&fct_orders()).await.unwrap().unwrap();
        assert_eq!(first.value(), &json!(5));

        engine
            .seed_table(&relation, vec![[("updated_at".to_string(), json!(9))].into_iter().collect()])
            .await;
        let second = tracker.current_watermark(&fct_orders()).await.unwrap().unwrap();
        assert_eq!(second.value(), &json!(9));

        assert_eq!(engine.calls_for("fct_orders").await.len(), 2);
    }

    #[tokio::test]
    async fn missing_boundary_column() {
        let engine = MemoryEngine::new();
        let unit = Unit::incremental("events", "select 1");

        assert_eq!(
            tracker(&engine).current_watermark(&unit).await.unwrap_err(),
            WatermarkError::MissingWatermarkConfiguration("events".into())
        );
        assert!(engine.calls().await.is_empty());
    }
}

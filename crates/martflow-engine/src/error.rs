//! Errors raised while executing a single unit

use martflow_jinja::RenderError;
use martflow_warehouse::EngineError;
use std::time::Duration;
use crate::watermark::WatermarkError;

/// Why a unit failed
///
/// Recorded in the run state; never aborts the run by itself.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum UnitError {
    #[error("Render failed: {0}")]
    Render(#[from] RenderError),

    #[error("{0}")]
    Query(#[from] EngineError),

    #[error("Watermark lookup failed: {0}")]
    Watermark(#[from] WatermarkError),

    #[error("Timed out after {}s", .0.as_secs_f64())]
    Timeout(Duration),

    #[error("Unit task aborted: {0}")]
    Aborted(String),
}

impl UnitError {
    /// The engine error underneath, if the failure came from the engine
    pub fn engine_error(&self) -> Option<&EngineError> {
        match self {
            Self::Query(e) => Some(e),
            Self::Watermark(WatermarkError::Engine(e)) => Some(e),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_keep_engine_text() {
        let err = UnitError::from(EngineError::Query("Syntax error at [1:8]".into()));
        assert_eq!(err.to_string(), "Query failed: Syntax error at [1:8]");
        assert!(err.engine_error().is_some());

        let err = UnitError::Timeout(Duration::from_millis(1500));
        assert_eq!(err.to_string(), "Timed out after 1.5s");
        assert!(err.engine_error().is_none());
    }
}

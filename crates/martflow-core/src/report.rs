//! Run report schema (stable v1)
//!
//! This schema is STABLE and VERSIONED.
//! Breaking changes require a new version.

use serde::{Deserialize, Serialize};
use crate::status::{SkipReason, UnitStatus};
use crate::unit::Materialization;

/// Report schema version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportVersion {
    /// Major version (breaking changes)
    pub major: u32,

    /// Minor version (backward-compatible additions)
    pub minor: u32,
}

impl ReportVersion {
    /// Current report schema version
    pub const CURRENT: ReportVersion = ReportVersion { major: 1, minor: 0 };
}

impl std::fmt::Display for ReportVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Number of units per final status
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub pending: usize,
    pub running: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl StatusCounts {
    pub fn record(&mut self, status: UnitStatus) {
        match status {
            UnitStatus::Pending => self.pending += 1,
            UnitStatus::Running => self.running += 1,
            UnitStatus::Succeeded => self.succeeded += 1,
            UnitStatus::Failed => self.failed += 1,
            UnitStatus::Skipped => self.skipped += 1,
        }
    }

    pub fn get(&self, status: UnitStatus) -> usize {
        match status {
            UnitStatus::Pending => self.pending,
            UnitStatus::Running => self.running,
            UnitStatus::Succeeded => self.succeeded,
            UnitStatus::Failed => self.failed,
            UnitStatus::Skipped => self.skipped,
        }
    }

    pub fn total(&self) -> usize {
        self.pending + self.running + self.succeeded + self.failed + self.skipped
    }
}

/// Outcome of one unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitResult {
    pub name: String,
    pub status: UnitStatus,
    pub materialization: Materialization,

    /// Wall time spent on the unit (0 for skipped units)
    pub duration_secs: f64,

    /// Original error text for failed units
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<SkipReason>,

    /// Lower bound used by an incremental merge
    #[serde(skip_serializing_if = "Option::is_none")]
    pub watermark: Option<serde_json::Value>,

    /// sha256 of the rendered statement
    #[serde(skip_serializing_if = "Option::is_none")]
    pub statement_checksum: Option<String>,
}

/// A failed unit with the engine's error text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedUnit {
    pub name: String,
    pub error: String,
}

/// A skipped unit with the failure it traces back to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedUnit {
    pub name: String,
    pub reason: SkipReason,
}

/// Aggregated outcome of a run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub counts: StatusCounts,

    /// Every unit in execution order
    pub results: Vec<UnitResult>,

    /// Failed units in execution order
    pub failed: Vec<FailedUnit>,

    /// Skipped units in execution order
    pub skipped: Vec<SkippedUnit>,
}

impl RunSummary {
    pub fn has_failures(&self) -> bool {
        self.counts.failed > 0
    }

    pub fn is_success(&self) -> bool {
        self.counts.failed == 0 && self.counts.skipped == 0
    }

    pub fn result(&self, name: &str) -> Option<&UnitResult> {
        self.results.iter().find(|r| r.name == name)
    }

    pub fn status_of(&self, name: &str) -> Option<UnitStatus> {
        self.result(name).map(|r| r.status)
    }
}

/// Run report (run_results.json v1)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    /// Schema version
    pub version: ReportVersion,

    /// Timestamp (ISO 8601)
    pub timestamp: String,

    /// Target the run executed against
    pub target: String,

    /// Total wall time of the run
    pub elapsed_secs: f64,

    pub summary: RunSummary,

    /// Metadata
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl RunReport {
    /// Create a report from a finished run
    pub fn new(target: impl Into<String>, summary: RunSummary, elapsed_secs: f64) -> Self {
        Self {
            version: ReportVersion::CURRENT,
            timestamp: chrono::Utc::now().to_rfc3339(),
            target: target.into(),
            elapsed_secs,
            summary,
            metadata: None,
        }
    }

    /// Attach free-form run details, such as the selection and run mode
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Check if any unit failed
    pub fn has_failures(&self) -> bool {
        self.summary.has_failures()
    }

    /// Serialize to JSON string
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Save to file, creating the parent directory if needed
    pub fn save_to_file(&self, path: &std::path::Path) -> Result<(), std::io::Error> {
        let json = self.to_json()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(name: &str, status: UnitStatus) -> UnitResult {
        UnitResult {
            name: name.to_string(),
            status,
            materialization: Materialization::Table,
            duration_secs: 0.0,
            error: None,
            skip_reason: None,
            watermark: None,
            statement_checksum: None,
        }
    }

    #[test]
    fn status_counts() {
        let mut counts = StatusCounts::default();
        counts.record(UnitStatus::Succeeded);
        counts.record(UnitStatus::Succeeded);
        counts.record(UnitStatus::Failed);

        assert_eq!(counts.get(UnitStatus::Succeeded), 2);
        assert_eq!(counts.get(UnitStatus::Failed), 1);
        assert_eq!(counts.total(), 3);
    }

    #[test]
    fn summary_lookups() {
        let summary = RunSummary {
            counts: StatusCounts { succeeded: 1, failed: 1, ..Default::default() },
            results: vec![
                result("customers", UnitStatus::Succeeded),
                result("orders", UnitStatus::Failed),
            ],
            failed: vec![FailedUnit { name: "orders".into(), error: "boom".into() }],
            skipped: vec![],
        };

        assert!(summary.has_failures());
        assert!(!summary.is_success());
        assert_eq!(summary.status_of("customers"), Some(UnitStatus::Succeeded));
        assert_eq!(summary.status_of("missing"), None);
    }

    #[test]
    fn report_serialization() {
        let report = RunReport::new("dev", RunSummary::default(), 0.5);
        assert_eq!(report.version, ReportVersion::CURRENT);
        assert!(!report.has_failures());

        let json = report.to_json().unwrap();
        assert!(json.contains("\"version\""));
        assert!(json.contains("\"summary\""));
        assert!(json.contains("\"target\": \"dev\""));
        assert!(!json.contains("\"metadata\""));
    }

    #[test]
    fn report_metadata() {
        let report = RunReport::new("dev", RunSummary::default(), 0.5)
            .with_metadata(serde_json::json!({"select": ["+fct_orders"], "mode": "full_refresh"}));

        let parsed: RunReport = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(parsed.metadata.unwrap()["mode"], "full_refresh");
    }
}

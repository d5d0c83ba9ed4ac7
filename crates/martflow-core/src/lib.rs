//! martflow core
//!
//! Domain model shared by every martflow crate: transformation units,
//! run statuses, project configuration and the versioned run report.

pub mod unit;
pub mod status;
pub mod report;
pub mod config;

pub use unit::{Materialization, Unit, UnitDeclaration, UniqueKey, ParseMaterializationError};
pub use status::{UnitStatus, SkipReason};
pub use report::{RunReport, ReportVersion, RunSummary, StatusCounts, UnitResult, FailedUnit, SkippedUnit};
pub use config::{Config, ConfigError, TargetConfig, RunConfig, WarehouseType};

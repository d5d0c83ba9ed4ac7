//! Configuration schema (martflow.toml)

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use crate::unit::UnitDeclaration;

/// Environment variable overriding the target schema
pub const TARGET_SCHEMA_ENV: &str = "MARTFLOW_TARGET_SCHEMA";

/// Query engine backing a target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WarehouseType {
    /// Google BigQuery
    BigQuery,

    /// In-process engine (local runs and tests)
    Memory,
}

impl Default for WarehouseType {
    fn default() -> Self {
        Self::BigQuery
    }
}

impl std::fmt::Display for WarehouseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BigQuery => write!(f, "bigquery"),
            Self::Memory => write!(f, "memory"),
        }
    }
}

/// Target environment: which warehouse and where outputs land
///
/// Passed explicitly to the executor at invocation time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Target name (dev, prod, ...)
    #[serde(default = "default_target_name")]
    pub name: String,

    /// Warehouse type
    #[serde(rename = "type", default)]
    pub warehouse_type: WarehouseType,

    /// Database (BigQuery project)
    #[serde(default = "default_database")]
    pub database: String,

    /// Schema (BigQuery dataset) for unit outputs
    #[serde(default = "default_schema")]
    pub schema: String,

    /// Service account key file (BigQuery); ADC is used when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials_path: Option<PathBuf>,

    /// Dataset location (e.g. US)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

fn default_target_name() -> String {
    "dev".to_string()
}

fn default_database() -> String {
    "analytics".to_string()
}

fn default_schema() -> String {
    "dbt_dev".to_string()
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            name: default_target_name(),
            warehouse_type: WarehouseType::default(),
            database: default_database(),
            schema: default_schema(),
            credentials_path: None,
            location: None,
        }
    }
}

/// Default run options, overridable from the command line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Concurrent units (1 = sequential)
    #[serde(default = "default_threads")]
    pub threads: usize,

    /// Halt the whole run on the first failure
    #[serde(default)]
    pub fail_fast: bool,

    /// Rebuild incremental units from scratch
    #[serde(default)]
    pub full_refresh: bool,

    /// Per-unit timeout in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit_timeout_secs: Option<u64>,
}

fn default_threads() -> usize {
    1
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            threads: default_threads(),
            fail_fast: false,
            full_refresh: false,
            unit_timeout_secs: None,
        }
    }
}

impl RunConfig {
    pub fn unit_timeout(&self) -> Option<Duration> {
        self.unit_timeout_secs.map(Duration::from_secs)
    }
}

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Target environment
    #[serde(default)]
    pub target: TargetConfig,

    /// Run defaults
    #[serde(default)]
    pub run: RunConfig,

    /// Project variables available to templates through var()
    #[serde(default)]
    pub vars: BTreeMap<String, serde_json::Value>,

    /// Directory scanned for *.sql templates, relative to the project root
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub models_dir: Option<PathBuf>,

    /// Unit declarations
    #[serde(default)]
    pub units: Vec<UnitDeclaration>,

    /// NDJSON files loaded into relations by `seed`, keyed by relation name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub seeds: BTreeMap<String, PathBuf>,

    /// Project root path (for resolving relative paths)
    #[serde(skip)]
    pub project_root: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            target: TargetConfig::default(),
            run: RunConfig::default(),
            vars: BTreeMap::new(),
            models_dir: None,
            units: Vec::new(),
            seeds: BTreeMap::new(),
            project_root: std::env::current_dir().unwrap_or_default(),
        }
    }
}

impl Config {
    /// Load config from TOML file
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(format!("{}: {}", path.display(), e)))?;

        let mut config = Self::from_toml(&contents)?;

        // Set project root to parent of config file
        if let Some(parent) = path.parent() {
            config.project_root = parent.to_path_buf();
        }

        Ok(config)
    }

    /// Load config from TOML string
    pub fn from_toml(toml: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(toml)
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;

        if config.run.threads == 0 {
            return Err(ConfigError::InvalidValue(
                "run.threads must be at least 1".to_string(),
            ));
        }

        Ok(config)
    }

    /// Apply environment overrides (MARTFLOW_TARGET_SCHEMA)
    pub fn apply_env_overrides(&mut self) {
        if let Ok(schema) = std::env::var(TARGET_SCHEMA_ENV) {
            if !schema.trim().is_empty() {
                self.target.schema = schema;
            }
        }
    }

    /// Resolve a path relative to the project root
    pub fn resolve_path(&self, path: &std::path::Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.project_root.join(path)
        }
    }
}

/// Config error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Invalid configuration: {0}")]
    InvalidValue(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unit::Materialization;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.target.warehouse_type, WarehouseType::BigQuery);
        assert_eq!(config.target.name, "dev");
        assert_eq!(config.run.threads, 1);
        assert!(!config.run.fail_fast);
        assert!(config.units.is_empty());
    }

    #[test]
    fn parse_project_file() {
        let config = Config::from_toml(
            r#"
            models_dir = "models"

            [target]
            name = "prod"
            type = "bigquery"
            database = "saras-bigquery"
            schema = "dbt_training_marts"
            location = "US"

            [run]
            threads = 4
            fail_fast = true
            unit_timeout_secs = 600

            [vars]
            start_date = "2020-01-01"

            [[units]]
            name = "stg_orders"
            sql = "select * from {{ source('raw_shopify', 'orders') }}"

            [[units]]
            name = "fct_orders"
            materialized = "incremental"
            depends_on = ["stg_orders"]
            unique_key = "order_id"
            boundary_column = "updated_at"
            tags = ["marts"]
            "#,
        )
        .unwrap();

        assert_eq!(config.target.name, "prod");
        assert_eq!(config.target.database, "saras-bigquery");
        assert_eq!(config.run.threads, 4);
        assert!(config.run.fail_fast);
        assert_eq!(config.run.unit_timeout(), Some(Duration::from_secs(600)));
        assert_eq!(config.vars["start_date"], serde_json::json!("2020-01-01"));
        assert_eq!(config.units.len(), 2);
        assert_eq!(config.units[1].materialized, Materialization::Incremental);
        assert_eq!(config.models_dir, Some(PathBuf::from("models")));
    }

    #[test]
    fn parse_seed_files() {
        let config = Config::from_toml(
            r#"
            [seeds]
            "raw_shopify.orders" = "data/orders.jsonl"
            customers = "data/customers.jsonl"
            "#,
        )
        .unwrap();

        assert_eq!(config.seeds.len(), 2);
        assert_eq!(config.seeds["raw_shopify.orders"], PathBuf::from("data/orders.jsonl"));
        assert!(Config::default().seeds.is_empty());
    }

    #[test]
    fn zero_threads_rejected() {
        let result = Config::from_toml("[run]\nthreads = 0\n");
        assert!(matches!(result, Err(ConfigError::InvalidValue(_))));
    }

    #[test]
    fn unknown_materialization_rejected() {
        let result = Config::from_toml(
            r#"
            [[units]]
            name = "x"
            materialized = "ephemeral"
            "#,
        );
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn config_toml_roundtrip() {
        let config = Config::default();
        let toml = toml::to_string(&config).unwrap();
        let parsed: Config = toml::from_str(&toml).unwrap();
        assert_eq!(config.target, parsed.target);
        assert_eq!(config.run, parsed.run);
    }

    #[test]
    fn resolve_relative_paths() {
        let mut config = Config::default();
        config.project_root = PathBuf::from("/projects/shop");
        assert_eq!(
            config.resolve_path(std::path::Path::new("models/a.sql")),
            PathBuf::from("/projects/shop/models/a.sql")
        );
        assert_eq!(
            config.resolve_path(std::path::Path::new("/abs/a.sql")),
            PathBuf::from("/abs/a.sql")
        );
    }
}

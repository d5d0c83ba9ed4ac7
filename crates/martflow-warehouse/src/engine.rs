//! Query engine trait and the types exchanged with it

use serde::{Deserialize, Serialize};
use std::fmt;
use crate::query::Row;

/// Identifies a relation (table or view) in a warehouse
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Relation {
    /// Database/project name
    pub database: String,

    /// Schema/dataset name
    pub schema: String,

    /// Table or view name
    pub name: String,
}

impl Relation {
    /// Create a new relation identifier
    pub fn new(database: impl Into<String>, schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            schema: schema.into(),
            name: name.into(),
        }
    }

    /// Parse `name`, `schema.name` or `database.schema.name`
    ///
    /// Missing leading parts come from `database` and `schema`.
    pub fn parse(path: &str, database: &str, schema: &str) -> Result<Self, EngineError> {
        let parts: Vec<&str> = path.trim().split('.').collect();
        if parts.iter().any(|part| part.trim().is_empty()) {
            return Err(EngineError::Configuration(format!("Invalid relation name '{}'", path)));
        }

        match parts.as_slice() {
            [name] => Ok(Self::new(database, schema, *name)),
            [schema, name] => Ok(Self::new(database, *schema, *name)),
            [database, schema, name] => Ok(Self::new(*database, *schema, *name)),
            _ => Err(EngineError::Configuration(format!(
                "Relation name '{}' has more than three parts",
                path
            ))),
        }
    }

    /// Get fully qualified name
    pub fn fqn(&self) -> String {
        format!("{}.{}.{}", self.database, self.schema, self.name)
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.fqn())
    }
}

/// Boundary value of an incremental unit's materialized output
///
/// Carries the value itself (for reporting) and the SQL literal injected
/// into the next run's template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Watermark {
    value: serde_json::Value,
    literal: String,
}

impl Watermark {
    /// Build from a JSON value, deriving a portable SQL literal
    pub fn from_value(value: serde_json::Value) -> Self {
        let literal = sql_literal(&value);
        Self { value, literal }
    }

    /// Build from a literal the engine rendered itself
    pub fn from_literal(literal: impl Into<String>) -> Self {
        let literal = literal.into();
        Self {
            value: serde_json::Value::String(literal.clone()),
            literal,
        }
    }

    pub fn value(&self) -> &serde_json::Value {
        &self.value
    }

    pub fn to_sql_literal(&self) -> &str {
        &self.literal
    }
}

impl fmt::Display for Watermark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.literal)
    }
}

fn sql_literal(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => "NULL".to_string(),
        serde_json::Value::Bool(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::String(s) => format!("'{}'", s.replace('\'', "''")),
        other => format!("'{}'", other.to_string().replace('\'', "''")),
    }
}

/// Statement creating a unit's output; the engine renders its own dialect
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ddl {
    CreateOrReplaceView { relation: Relation, query: String },
    CreateOrReplaceTable { relation: Relation, query: String },
}

impl Ddl {
    pub fn relation(&self) -> &Relation {
        match self {
            Self::CreateOrReplaceView { relation, .. } | Self::CreateOrReplaceTable { relation, .. } => relation,
        }
    }

    pub fn query(&self) -> &str {
        match self {
            Self::CreateOrReplaceView { query, .. } | Self::CreateOrReplaceTable { query, .. } => query,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::CreateOrReplaceView { .. } => "view",
            Self::CreateOrReplaceTable { .. } => "table",
        }
    }
}

/// Errors returned by query engines
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Relation not found: {0}")]
    NotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Unsupported statement: {0}")]
    Unsupported(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Query engine the executor dispatches units to
///
/// Implementations own the SQL dialect: the executor hands over typed
/// statements and rendered queries, never dialect-specific text.
#[async_trait::async_trait]
pub trait QueryEngine: Send + Sync {
    /// Get the engine name (e.g., "BigQuery", "Memory")
    fn name(&self) -> &'static str;

    /// Quote character wrapping relation names, if the dialect needs one
    fn identifier_quote(&self) -> Option<char> {
        None
    }

    /// Render a relation the way templates should reference it
    fn quote_relation(&self, relation: &Relation) -> String {
        match self.identifier_quote() {
            Some(q) => format!("{q}{}{q}", relation.fqn()),
            None => relation.fqn(),
        }
    }

    /// Create or replace a view or table
    async fn execute_ddl(&self, ddl: &Ddl) -> Result<(), EngineError>;

    /// Upsert the rows of `source_query` into `target` by `unique_key`
    ///
    /// Without a key every row is inserted. Must apply all rows or none.
    async fn execute_merge(
        &self,
        target: &Relation,
        source_query: &str,
        unique_key: Option<&[String]>,
    ) -> Result<(), EngineError>;

    /// Maximum non-null value of `column` in `relation`
    ///
    /// `None` when the relation does not exist or holds no value.
    async fn max_value(&self, relation: &Relation, column: &str) -> Result<Option<Watermark>, EngineError>;

    /// Replace `relation` with a table holding exactly `rows`
    ///
    /// Columns are the union of the rows' keys.
    async fn load_rows(&self, relation: &Relation, rows: &[Row]) -> Result<(), EngineError>;

    /// Tables and views in `database.schema`, ordered by name
    async fn list_relations(&self, database: &str, schema: &str) -> Result<Vec<Relation>, EngineError>;

    /// Every row of a table or view
    async fn fetch_rows(&self, relation: &Relation) -> Result<Vec<Row>, EngineError>;

    /// Test the connection to the warehouse
    async fn test_connection(&self) -> Result<(), EngineError> {
        Ok(())
    }
}

//! Transformation units
//!
//! A unit is one named transformation step: a SQL query template plus the
//! physical form its output takes in the warehouse.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

/// Physical form of a unit's output
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Materialization {
    /// Create-or-replace view, never reads prior output
    #[default]
    View,

    /// Create-or-replace table, full rebuild every run
    Table,

    /// Table merged incrementally above a watermark
    Incremental,
}

impl Materialization {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::View => "view",
            Self::Table => "table",
            Self::Incremental => "incremental",
        }
    }
}

impl std::fmt::Display for Materialization {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown materialization '{0}' (expected view, table or incremental)")]
pub struct ParseMaterializationError(pub String);

impl FromStr for Materialization {
    type Err = ParseMaterializationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "view" => Ok(Self::View),
            "table" => Ok(Self::Table),
            "incremental" => Ok(Self::Incremental),
            other => Err(ParseMaterializationError(other.to_string())),
        }
    }
}

/// Unique key as written in configuration: one column or a list of columns
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UniqueKey {
    Single(String),
    Composite(Vec<String>),
}

impl UniqueKey {
    pub fn into_columns(self) -> Vec<String> {
        match self {
            Self::Single(column) => vec![column],
            Self::Composite(columns) => columns,
        }
    }
}

/// A registered transformation unit
///
/// Units are immutable once registered; the executor treats `sql` as an
/// opaque template and only hands it to the renderer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Unit {
    /// Unique name, also the output relation name
    pub name: String,

    /// Physical form of the output
    pub materialization: Materialization,

    /// Merge key for incremental units (None means append-only)
    pub unique_key: Option<Vec<String>>,

    /// Column whose maximum bounds the next incremental run
    pub boundary_column: Option<String>,

    /// Upstream unit names, in declaration order
    pub depends_on: Vec<String>,

    /// Free-form tags used by model selection
    pub tags: Vec<String>,

    /// Query template
    pub sql: String,

    /// Output schema override (defaults to the target schema)
    pub schema: Option<String>,

    /// Template file the unit was loaded from, if any
    pub path: Option<PathBuf>,
}

impl Unit {
    pub fn new(name: impl Into<String>, materialization: Materialization, sql: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            materialization,
            unique_key: None,
            boundary_column: None,
            depends_on: Vec::new(),
            tags: Vec::new(),
            sql: sql.into(),
            schema: None,
            path: None,
        }
    }

    pub fn view(name: impl Into<String>, sql: impl Into<String>) -> Self {
        Self::new(name, Materialization::View, sql)
    }

    pub fn table(name: impl Into<String>, sql: impl Into<String>) -> Self {
        Self::new(name, Materialization::Table, sql)
    }

    pub fn incremental(name: impl Into<String>, sql: impl Into<String>) -> Self {
        Self::new(name, Materialization::Incremental, sql)
    }

    pub fn with_depends_on<I, S>(mut self, depends_on: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on = depends_on.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_unique_key<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let columns: Vec<String> = columns.into_iter().map(Into::into).collect();
        self.unique_key = if columns.is_empty() { None } else { Some(columns) };
        self
    }

    pub fn with_boundary_column(mut self, column: impl Into<String>) -> Self {
        self.boundary_column = Some(column.into());
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn is_incremental(&self) -> bool {
        self.materialization == Materialization::Incremental
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}

/// A unit as declared in `martflow.toml` or a JSON declaration list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitDeclaration {
    pub name: String,

    #[serde(default)]
    pub depends_on: Vec<String>,

    #[serde(default, alias = "materialization")]
    pub materialized: Materialization,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unique_key: Option<UniqueKey>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boundary_column: Option<String>,

    #[serde(default)]
    pub tags: Vec<String>,

    /// Inline query template
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sql: Option<String>,

    /// Template file, relative to the project root
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
}

impl UnitDeclaration {
    /// Build the unit, taking the template from `sql` (already resolved from
    /// the inline field or the template file)
    pub fn into_unit(self, sql: String) -> Unit {
        Unit {
            name: self.name,
            materialization: self.materialized,
            unique_key: self
                .unique_key
                .map(UniqueKey::into_columns)
                .filter(|columns| !columns.is_empty()),
            boundary_column: self.boundary_column,
            depends_on: self.depends_on,
            tags: self.tags,
            sql,
            schema: self.schema,
            path: self.path,
        }
    }
}

//! Moving rows between files and query engines
//!
//! Seeds are newline-delimited JSON files loaded into a relation, replacing
//! whatever it held. Exports write every relation of a schema to
//! `<output>/<schema>/<relation>.csv` with a header row.

use crate::engine::{EngineError, QueryEngine, Relation};
use crate::query::Row;
use serde_json::Value as JsonValue;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Errors raised while seeding or exporting
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("IO error on {path}: {message}")]
    Io { path: PathBuf, message: String },

    #[error("{path}:{line}: {message}")]
    Ndjson { path: PathBuf, line: usize, message: String },

    #[error("CSV error on {path}: {message}")]
    Csv { path: PathBuf, message: String },

    #[error("No relations found in {0}")]
    NoRelations(String),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// One relation written by [`export_schema`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedRelation {
    pub relation: Relation,
    pub path: PathBuf,
    pub rows: usize,
}

/// Read a newline-delimited JSON file; blank lines are skipped
pub fn read_ndjson(path: &Path) -> Result<Vec<Row>, TransferError> {
    let contents = std::fs::read_to_string(path).map_err(|e| TransferError::Io {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    let mut rows = Vec::new();
    for (i, line) in contents.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }

        let ndjson_error = |message: String| TransferError::Ndjson {
            path: path.to_path_buf(),
            line: i + 1,
            message,
        };

        match serde_json::from_str::<JsonValue>(line).map_err(|e| ndjson_error(e.to_string()))? {
            JsonValue::Object(object) => rows.push(object.into_iter().collect()),
            other => return Err(ndjson_error(format!("expected a JSON object, found {}", other))),
        }
    }

    Ok(rows)
}

/// Replace `relation` with the rows of an NDJSON file; returns the row count
pub async fn seed_relation(
    engine: &dyn QueryEngine,
    relation: &Relation,
    path: &Path,
) -> Result<usize, TransferError> {
    let rows = read_ndjson(path)?;
    engine.load_rows(relation, &rows).await?;

    tracing::info!(relation = %relation, rows = rows.len(), file = %path.display(), "seeded relation");
    Ok(rows.len())
}

/// Column names of `rows`, sorted; rows may carry different columns
pub fn columns(rows: &[Row]) -> Vec<String> {
    let names: BTreeSet<&String> = rows.iter().flat_map(|row| row.keys()).collect();
    names.into_iter().cloned().collect()
}

/// CSV text of one value: empty for null, JSON text for nested values
fn cell(value: Option<&JsonValue>) -> String {
    match value {
        None | Some(JsonValue::Null) => String::new(),
        Some(JsonValue::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// Write `rows` as CSV with a header row, creating parent directories
pub fn write_csv(path: &Path, rows: &[Row]) -> Result<(), TransferError> {
    let csv_error = |message: String| TransferError::Csv {
        path: path.to_path_buf(),
        message,
    };

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| TransferError::Io {
            path: parent.to_path_buf(),
            message: e.to_string(),
        })?;
    }

    let header = columns(rows);
    let mut writer = csv::WriterBuilder::new()
        .from_path(path)
        .map_err(|e| csv_error(e.to_string()))?;

    if !header.is_empty() {
        writer.write_record(&header).map_err(|e| csv_error(e.to_string()))?;
    }

    for row in rows {
        let record: Vec<String> = header.iter().map(|column| cell(row.get(column))).collect();
        writer.write_record(&record).map_err(|e| csv_error(e.to_string()))?;
    }

    writer.flush().map_err(|e| csv_error(e.to_string()))?;
    Ok(())
}

/// Export every relation of `database.schema` to `<output>/<schema>/<name>.csv`
pub async fn export_schema(
    engine: &dyn QueryEngine,
    database: &str,
    schema: &str,
    output: &Path,
) -> Result<Vec<ExportedRelation>, TransferError> {
    let relations = engine.list_relations(database, schema).await?;
    if relations.is_empty() {
        return Err(TransferError::NoRelations(format!("{}.{}", database, schema)));
    }

    let dir = output.join(schema);
    let mut exported = Vec::with_capacity(relations.len());

    for relation in relations {
        let rows = engine.fetch_rows(&relation).await?;
        let path = dir.join(format!("{}.csv", relation.name));
        write_csv(&path, &rows)?;

        tracing::info!(relation = %relation, rows = rows.len(), file = %path.display(), "exported relation");
        exported.push(ExportedRelation {
            relation,
            path,
            rows: rows.len(),
        });
    }

    Ok(exported)
}

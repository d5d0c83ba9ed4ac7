//! BigQuery query engine
//!
//! Runs unit statements through the BigQuery jobs.query API. Relations are
//! rendered as backtick-quoted `project.dataset.table` paths.
//!
//! ## Authentication
//!
//! The engine supports multiple authentication methods:
//! 1. Service account JSON file (explicit path)
//! 2. Service account JSON content (inline)
//! 3. Application Default Credentials (ADC)
//!
//! ## Usage
//!
//! ```rust,ignore
//! // Using ADC
//! let engine = BigQueryEngine::with_adc("my-project").await?;
//!
//! // Using service account file
//! let engine = BigQueryEngine::from_service_account_file(
//!     "my-project",
//!     "/path/to/service-account.json"
//! ).await?;
//! ```

use crate::engine::{Ddl, EngineError, QueryEngine, Relation, Watermark};
use crate::query::Row;
use crate::transfer::columns;
use serde_json::Value as JsonValue;

#[cfg(feature = "bigquery")]
use gcp_bigquery_client::{Client as BigQueryClient, model::query_request::QueryRequest};

/// Alias of the staged source rows inside a merge script
const STAGING_TABLE: &str = "martflow_merge_source";

/// Rows inlined per load statement
const LOAD_BATCH_ROWS: usize = 500;

/// Render a relation as a BigQuery path
pub fn quote(relation: &Relation) -> String {
    format!("`{}`", relation.fqn())
}

/// Render `CREATE OR REPLACE VIEW/TABLE ... AS <query>`
pub fn render_ddl(ddl: &Ddl) -> String {
    let keyword = match ddl {
        Ddl::CreateOrReplaceView { .. } => "VIEW",
        Ddl::CreateOrReplaceTable { .. } => "TABLE",
    };
    format!(
        "CREATE OR REPLACE {} {} AS\n{}",
        keyword,
        quote(ddl.relation()),
        ddl.query().trim()
    )
}

/// Render the statement merging `source_query` into `target`
///
/// With a unique key this is a transactional script: stage the source rows,
/// delete target rows sharing a key, then insert the staged rows. Without a
/// key the rows are appended.
pub fn render_merge(target: &Relation, source_query: &str, unique_key: Option<&[String]>) -> String {
    let target_path = quote(target);
    let source_query = source_query.trim();

    let key = match unique_key {
        Some(key) if !key.is_empty() => key,
        _ => return format!("INSERT INTO {}\n{}", target_path, source_query),
    };

    let matches = key
        .iter()
        .map(|column| format!("t.`{0}` = s.`{0}`", column))
        .collect::<Vec<_>>()
        .join(" AND ");

    format!(
        "BEGIN TRANSACTION;\n\
         CREATE TEMP TABLE {staging} AS\n{source};\n\
         DELETE FROM {target} t WHERE EXISTS (SELECT 1 FROM {staging} s WHERE {matches});\n\
         INSERT INTO {target} SELECT * FROM {staging};\n\
         COMMIT TRANSACTION;",
        staging = STAGING_TABLE,
        source = source_query,
        target = target_path,
        matches = matches,
    )
}

/// Render the watermark query; `FORMAT('%T')` yields a typed SQL literal
pub fn render_max_value(relation: &Relation, column: &str) -> String {
    format!(
        "SELECT IF(MAX(`{0}`) IS NULL, NULL, FORMAT('%T', MAX(`{0}`))) AS watermark FROM {1}",
        column,
        quote(relation)
    )
}

/// BigQuery type of a loaded column, from its non-null values
///
/// Integers mixed with floats widen to FLOAT64, any other mix becomes JSON.
/// Columns holding only nulls load as STRING.
fn load_column_type(rows: &[Row], column: &str) -> &'static str {
    let mut column_type: Option<&'static str> = None;

    for value in rows.iter().filter_map(|row| row.get(column)) {
        let value_type = match value {
            JsonValue::Null => continue,
            JsonValue::Bool(_) => "BOOL",
            JsonValue::Number(n) if n.is_i64() => "INT64",
            JsonValue::Number(_) => "FLOAT64",
            JsonValue::String(_) => "STRING",
            JsonValue::Array(_) | JsonValue::Object(_) => "JSON",
        };

        column_type = Some(match (column_type, value_type) {
            (None, t) => t,
            (Some(a), b) if a == b => a,
            (Some("INT64"), "FLOAT64") | (Some("FLOAT64"), "INT64") => "FLOAT64",
            _ => "JSON",
        });
    }

    column_type.unwrap_or("STRING")
}

fn string_literal(s: &str) -> String {
    let escaped = s
        .replace('\\', "\\\\")
        .replace('\'', "\\'")
        .replace('\n', "\\n")
        .replace('\r', "\\r");
    format!("'{}'", escaped)
}

fn load_literal(value: Option<&JsonValue>, column_type: &str) -> String {
    match value {
        None | Some(JsonValue::Null) => "NULL".to_string(),
        Some(value) if column_type == "JSON" => format!("JSON {}", string_literal(&value.to_string())),
        Some(JsonValue::String(s)) => string_literal(s),
        Some(JsonValue::Bool(b)) => if *b { "TRUE" } else { "FALSE" }.to_string(),
        Some(other) => other.to_string(),
    }
}

/// Render the statements replacing `relation` with `rows`
///
/// The dataset is created when missing. The first batch of rows replaces
/// the table and later batches are appended to it.
pub fn render_load(relation: &Relation, rows: &[Row]) -> Result<Vec<String>, EngineError> {
    let names = columns(rows);
    if names.is_empty() {
        return Err(EngineError::Unsupported(format!(
            "Cannot infer the columns of {} from zero rows",
            relation
        )));
    }

    let types: Vec<&'static str> = names.iter().map(|name| load_column_type(rows, name)).collect();
    let row_type = names
        .iter()
        .zip(&types)
        .map(|(name, ty)| format!("`{}` {}", name, ty))
        .collect::<Vec<_>>()
        .join(", ");

    let mut statements = vec![format!(
        "CREATE SCHEMA IF NOT EXISTS `{}.{}`",
        relation.database, relation.schema
    )];

    for (i, batch) in rows.chunks(LOAD_BATCH_ROWS).enumerate() {
        let values = batch
            .iter()
            .map(|row| {
                let fields = names
                    .iter()
                    .zip(&types)
                    .map(|(name, ty)| load_literal(row.get(name), ty))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("STRUCT({})", fields)
            })
            .collect::<Vec<_>>()
            .join(",\n");

        let head = if i == 0 {
            format!("CREATE OR REPLACE TABLE {} AS", quote(relation))
        } else {
            format!("INSERT INTO {}", quote(relation))
        };

        statements.push(format!(
            "{}\nSELECT * FROM UNNEST(ARRAY<STRUCT<{}>>[\n{}\n])",
            head, row_type, values
        ));
    }

    Ok(statements)
}

/// Render the query listing the tables and views of a dataset
pub fn render_list_relations(database: &str, schema: &str) -> String {
    format!(
        "SELECT table_name FROM `{}.{}`.INFORMATION_SCHEMA.TABLES ORDER BY table_name",
        database, schema
    )
}

/// BigQuery query engine
pub struct BigQueryEngine {
    /// Project ID jobs run in
    project_id: String,

    /// Dataset location (e.g. "EU"), if pinned
    location: Option<String>,

    /// BigQuery client (only available with bigquery feature)
    #[cfg(feature = "bigquery")]
    client: BigQueryClient,
}

impl BigQueryEngine {
    /// Create a new BigQuery engine using Application Default Credentials (ADC)
    ///
    /// ADC automatically detects credentials from:
    /// - GOOGLE_APPLICATION_CREDENTIALS environment variable
    /// - gcloud CLI default credentials
    /// - GCE/GKE metadata service
    #[cfg(feature = "bigquery")]
    pub async fn with_adc(project_id: impl Into<String>) -> Result<Self, EngineError> {
        let project_id = project_id.into();

        let client = BigQueryClient::from_application_default_credentials()
            .await
            .map_err(|e| EngineError::Authentication(format!(
                "Failed to authenticate with ADC: {}. \
                 Ensure GOOGLE_APPLICATION_CREDENTIALS is set or run 'gcloud auth application-default login'",
                e
            )))?;

        Ok(Self {
            project_id,
            location: None,
            client,
        })
    }

    /// Create engine without bigquery feature (returns error)
    #[cfg(not(feature = "bigquery"))]
    pub async fn with_adc(project_id: impl Into<String>) -> Result<Self, EngineError> {
        let _ = project_id;
        Err(not_compiled())
    }

    /// Create a new BigQuery engine using a service account key file
    #[cfg(feature = "bigquery")]
    pub async fn from_service_account_file(
        project_id: impl Into<String>,
        key_path: impl AsRef<std::path::Path>,
    ) -> Result<Self, EngineError> {
        let project_id = project_id.into();
        let key_path_str = key_path.as_ref().to_string_lossy().to_string();

        let client = BigQueryClient::from_service_account_key_file(&key_path_str)
            .await
            .map_err(|e| EngineError::Authentication(format!(
                "Failed to read service account key file '{}': {}",
                key_path_str, e
            )))?;

        Ok(Self {
            project_id,
            location: None,
            client,
        })
    }

    /// Create engine without bigquery feature (returns error)
    #[cfg(not(feature = "bigquery"))]
    pub async fn from_service_account_file(
        project_id: impl Into<String>,
        _key_path: impl AsRef<std::path::Path>,
    ) -> Result<Self, EngineError> {
        let _ = project_id;
        Err(not_compiled())
    }

    /// Create a new BigQuery engine using service account JSON content
    #[cfg(feature = "bigquery")]
    pub async fn from_service_account_json(
        project_id: impl Into<String>,
        key_json: &str,
    ) -> Result<Self, EngineError> {
        let project_id = project_id.into();

        let sa_key: gcp_bigquery_client::yup_oauth2::ServiceAccountKey =
            serde_json::from_str(key_json)
                .map_err(|e| EngineError::Configuration(format!(
                    "Failed to parse service account JSON: {}",
                    e
                )))?;

        let client = BigQueryClient::from_service_account_key(sa_key, false)
            .await
            .map_err(|e| EngineError::Authentication(format!(
                "Failed to authenticate with service account: {}",
                e
            )))?;

        Ok(Self {
            project_id,
            location: None,
            client,
        })
    }

    /// Create engine without bigquery feature (returns error)
    #[cfg(not(feature = "bigquery"))]
    pub async fn from_service_account_json(
        project_id: impl Into<String>,
        _key_json: &str,
    ) -> Result<Self, EngineError> {
        let _ = project_id;
        Err(not_compiled())
    }

    /// Pin jobs to a dataset location
    pub fn with_location(mut self, location: Option<String>) -> Self {
        self.location = location;
        self
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn location(&self) -> Option<&str> {
        self.location.as_deref()
    }

    /// Run one statement or script
    #[cfg(feature = "bigquery")]
    async fn run(
        &self,
        sql: String,
    ) -> Result<gcp_bigquery_client::model::query_response::QueryResponse, EngineError> {
        tracing::debug!(project = %self.project_id, sql = %sql, "submitting BigQuery job");

        let mut request = QueryRequest::new(sql);
        request.location = self.location.clone();

        self.client
            .job()
            .query(&self.project_id, request)
            .await
            .map_err(|e| classify_error(e.to_string()))
    }
}

#[cfg(not(feature = "bigquery"))]
fn not_compiled() -> EngineError {
    EngineError::Configuration(
        "BigQuery support not compiled. Rebuild with: cargo build --features bigquery".to_string(),
    )
}

/// Map a BigQuery error message onto the engine error kinds
#[cfg_attr(not(feature = "bigquery"), allow(dead_code))]
fn classify_error(message: String) -> EngineError {
    if message.contains("Not found") {
        EngineError::NotFound(message)
    } else if message.contains("Access Denied") || message.contains("Permission") {
        EngineError::PermissionDenied(message)
    } else if message.contains("dns error") || message.contains("connection") {
        EngineError::Network(message)
    } else {
        EngineError::Query(message)
    }
}

#[async_trait::async_trait]
impl QueryEngine for BigQueryEngine {
    fn name(&self) -> &'static str {
        "BigQuery"
    }

    fn identifier_quote(&self) -> Option<char> {
        Some('`')
    }

    #[cfg(feature = "bigquery")]
    async fn execute_ddl(&self, ddl: &Ddl) -> Result<(), EngineError> {
        self.run(render_ddl(ddl)).await?;
        Ok(())
    }

    #[cfg(not(feature = "bigquery"))]
    async fn execute_ddl(&self, _ddl: &Ddl) -> Result<(), EngineError> {
        Err(not_compiled())
    }

    #[cfg(feature = "bigquery")]
    async fn execute_merge(
        &self,
        target: &Relation,
        source_query: &str,
        unique_key: Option<&[String]>,
    ) -> Result<(), EngineError> {
        self.run(render_merge(target, source_query, unique_key)).await?;
        Ok(())
    }

    #[cfg(not(feature = "bigquery"))]
    async fn execute_merge(
        &self,
        _target: &Relation,
        _source_query: &str,
        _unique_key: Option<&[String]>,
    ) -> Result<(), EngineError> {
        Err(not_compiled())
    }

    #[cfg(feature = "bigquery")]
    async fn max_value(&self, relation: &Relation, column: &str) -> Result<Option<Watermark>, EngineError> {
        let response = match self.run(render_max_value(relation, column)).await {
            Ok(response) => response,
            // A target that was never built has no watermark
            Err(EngineError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };

        let mut rs = gcp_bigquery_client::model::query_response::ResultSet::new_from_query_response(response);
        if !rs.next_row() {
            return Ok(None);
        }

        let literal = rs
            .get_string_by_name("watermark")
            .map_err(|e| EngineError::InvalidResponse(format!("Failed to get watermark: {}", e)))?;

        Ok(literal.map(Watermark::from_literal))
    }

    #[cfg(not(feature = "bigquery"))]
    async fn max_value(&self, _relation: &Relation, _column: &str) -> Result<Option<Watermark>, EngineError> {
        Err(not_compiled())
    }

    #[cfg(feature = "bigquery")]
    async fn load_rows(&self, relation: &Relation, rows: &[Row]) -> Result<(), EngineError> {
        for statement in render_load(relation, rows)? {
            self.run(statement).await?;
        }
        Ok(())
    }

    #[cfg(not(feature = "bigquery"))]
    async fn load_rows(&self, _relation: &Relation, _rows: &[Row]) -> Result<(), EngineError> {
        Err(not_compiled())
    }

    #[cfg(feature = "bigquery")]
    async fn list_relations(&self, database: &str, schema: &str) -> Result<Vec<Relation>, EngineError> {
        let response = match self.run(render_list_relations(database, schema)).await {
            Ok(response) => response,
            // A dataset that does not exist holds nothing
            Err(EngineError::NotFound(_)) => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut rs = gcp_bigquery_client::model::query_response::ResultSet::new_from_query_response(response);
        let mut relations = Vec::new();
        while rs.next_row() {
            let name = rs
                .get_string_by_name("table_name")
                .map_err(|e| EngineError::InvalidResponse(format!("Failed to get table_name: {}", e)))?
                .ok_or_else(|| EngineError::InvalidResponse("table_name is NULL".to_string()))?;
            relations.push(Relation::new(database, schema, name));
        }

        Ok(relations)
    }

    #[cfg(not(feature = "bigquery"))]
    async fn list_relations(&self, _database: &str, _schema: &str) -> Result<Vec<Relation>, EngineError> {
        Err(not_compiled())
    }

    #[cfg(feature = "bigquery")]
    async fn fetch_rows(&self, relation: &Relation) -> Result<Vec<Row>, EngineError> {
        let response = self.run(format!("SELECT * FROM {}", quote(relation))).await?;

        if response.job_complete == Some(false) {
            return Err(EngineError::Query(format!("Query on {} did not complete in time", relation)));
        }
        if response.page_token.is_some() {
            return Err(EngineError::Unsupported(format!(
                "{} is larger than one result page; use a BigQuery extract job",
                relation
            )));
        }

        let mut rs = gcp_bigquery_client::model::query_response::ResultSet::new_from_query_response(response);
        let names = rs.column_names();
        let mut rows = Vec::new();
        while rs.next_row() {
            let mut row = Row::new();
            for name in &names {
                let value = rs
                    .get_json_value_by_name(name)
                    .map_err(|e| EngineError::InvalidResponse(format!("Failed to get {}: {}", name, e)))?
                    .unwrap_or(JsonValue::Null);
                row.insert(name.clone(), value);
            }
            rows.push(row);
        }

        Ok(rows)
    }

    #[cfg(not(feature = "bigquery"))]
    async fn fetch_rows(&self, _relation: &Relation) -> Result<Vec<Row>, EngineError> {
        Err(not_compiled())
    }

    #[cfg(feature = "bigquery")]
    async fn test_connection(&self) -> Result<(), EngineError> {
        self.run("SELECT 1".to_string())
            .await
            .map_err(|e| EngineError::Network(format!("Connection test failed: {}", e)))?;
        Ok(())
    }

    #[cfg(not(feature = "bigquery"))]
    async fn test_connection(&self) -> Result<(), EngineError> {
        Err(not_compiled())
    }
}

//! In-memory query engine
//!
//! Stores tables as rows and views as their defining query, re-evaluated
//! on every read. Every call is recorded so tests can assert what the
//! executor dispatched, and failures or latency can be injected per
//! relation.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use martflow_warehouse::{MemoryEngine, QueryEngine, Ddl, Relation};
//!
//! let engine = MemoryEngine::new();
//! let customers = Relation::new("analytics", "dbt_dev", "customers");
//! engine.execute_ddl(&Ddl::CreateOrReplaceTable {
//!     relation: customers.clone(),
//!     query: "select 1 as id, 'alice' as name".into(),
//! }).await?;
//!
//! assert_eq!(engine.rows(&customers).await?.len(), 1);
//! ```
//!
//! ## Simulating Failures
//!
//! ```rust,ignore
//! let engine = MemoryEngine::new().with_latency(100); // 100ms per call
//! engine.fail_relation(&orders, EngineError::Query("boom".into())).await;
//! ```

use crate::engine::{Ddl, EngineError, QueryEngine, Relation, Watermark};
use crate::query::{self, compare_values, Row, RowSource};
use std::cmp::Ordering;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Views nested deeper than this are treated as a definition loop
const MAX_VIEW_DEPTH: usize = 32;

#[derive(Debug, Clone)]
enum Stored {
    Table(Vec<Row>),
    View(String),
}

/// A call received by the memory engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    Ddl { relation: Relation, kind: &'static str, query: String },
    Merge { relation: Relation, query: String, unique_key: Option<Vec<String>> },
    MaxValue { relation: Relation, column: String },
    Load { relation: Relation, rows: usize },
    Fetch { relation: Relation },
}

impl EngineCall {
    pub fn relation(&self) -> &Relation {
        match self {
            Self::Ddl { relation, .. }
            | Self::Merge { relation, .. }
            | Self::MaxValue { relation, .. }
            | Self::Load { relation, .. }
            | Self::Fetch { relation } => relation,
        }
    }

    /// Whether the call writes to its relation
    pub fn is_write(&self) -> bool {
        !matches!(self, Self::MaxValue { .. } | Self::Fetch { .. })
    }
}

/// Relations keyed by fully qualified name
struct Catalog<'a>(&'a HashMap<String, Stored>);

impl RowSource for Catalog<'_> {
    fn scan(&self, relation: &str, depth: usize) -> Result<Vec<Row>, EngineError> {
        match self.0.get(relation) {
            Some(Stored::Table(rows)) => Ok(rows.clone()),
            Some(Stored::View(sql)) => {
                if depth >= MAX_VIEW_DEPTH {
                    return Err(EngineError::Query(format!(
                        "View {} nests deeper than {} levels",
                        relation, MAX_VIEW_DEPTH
                    )));
                }
                query::evaluate(sql, self, depth + 1)
            }
            None => Err(EngineError::NotFound(relation.to_string())),
        }
    }
}

/// In-memory query engine for tests and local runs
///
/// Clones share storage, so a test can keep a handle while the executor
/// owns another.
pub struct MemoryEngine {
    /// Stored relations by FQN
    relations: Arc<RwLock<HashMap<String, Stored>>>,

    /// Errors to return for specific relations
    errors: Arc<RwLock<HashMap<String, EngineError>>>,

    /// Every call received, in arrival order
    calls: Arc<RwLock<Vec<EngineCall>>>,

    /// Simulate connection failure
    fail_connection: bool,

    /// Simulate query latency (milliseconds)
    latency_ms: u64,

    /// Name to return from name() method
    engine_name: &'static str,
}

impl MemoryEngine {
    /// Create an empty engine
    pub fn new() -> Self {
        MemoryEngineBuilder::new().build()
    }

    /// Configure to fail all connection tests
    pub fn with_connection_failure(mut self) -> Self {
        self.fail_connection = true;
        self
    }

    /// Delay every call by `latency_ms` before it touches storage
    pub fn with_latency(mut self, latency_ms: u64) -> Self {
        self.latency_ms = latency_ms;
        self
    }

    /// Set a custom engine name
    pub fn with_name(mut self, name: &'static str) -> Self {
        self.engine_name = name;
        self
    }

    /// Store `rows` as a table, replacing any existing relation
    pub async fn seed_table(&self, relation: &Relation, rows: Vec<Row>) {
        self.relations
            .write()
            .await
            .insert(relation.fqn(), Stored::Table(rows));
    }

    /// Make every call touching `relation` fail with `error`
    pub async fn fail_relation(&self, relation: &Relation, error: EngineError) {
        self.errors.write().await.insert(relation.fqn(), error);
    }

    /// Clear all injected errors
    pub async fn clear_errors(&self) {
        self.errors.write().await.clear();
    }

    /// Current rows of a table, or the evaluated rows of a view
    pub async fn rows(&self, relation: &Relation) -> Result<Vec<Row>, EngineError> {
        let relations = self.relations.read().await;
        Catalog(&relations).scan(&relation.fqn(), 0)
    }

    /// Check if a relation exists
    pub async fn has_relation(&self, relation: &Relation) -> bool {
        self.relations.read().await.contains_key(&relation.fqn())
    }

    /// Whether the relation is stored as a view
    pub async fn is_view(&self, relation: &Relation) -> bool {
        matches!(self.relations.read().await.get(&relation.fqn()), Some(Stored::View(_)))
    }

    /// Number of stored relations
    pub async fn relation_count(&self) -> usize {
        self.relations.read().await.len()
    }

    /// Every call received so far
    pub async fn calls(&self) -> Vec<EngineCall> {
        self.calls.read().await.clone()
    }

    /// Calls whose relation is named `name`
    pub async fn calls_for(&self, name: &str) -> Vec<EngineCall> {
        self.calls
            .read()
            .await
            .iter()
            .filter(|call| call.relation().name == name)
            .cloned()
            .collect()
    }

    /// Forget recorded calls
    pub async fn clear_calls(&self) {
        self.calls.write().await.clear();
    }

    /// Simulate latency if configured
    async fn simulate_latency(&self) {
        if self.latency_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.latency_ms)).await;
        }
    }

    /// Record the call, wait out the latency and apply injected errors
    async fn begin(&self, call: EngineCall) -> Result<(), EngineError> {
        let fqn = call.relation().fqn();
        self.calls.write().await.push(call);
        self.simulate_latency().await;

        match self.errors.read().await.get(&fqn) {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for MemoryEngine {
    fn clone(&self) -> Self {
        Self {
            relations: Arc::clone(&self.relations),
            errors: Arc::clone(&self.errors),
            calls: Arc::clone(&self.calls),
            fail_connection: self.fail_connection,
            latency_ms: self.latency_ms,
            engine_name: self.engine_name,
        }
    }
}

#[async_trait::async_trait]
impl QueryEngine for MemoryEngine {
    fn name(&self) -> &'static str {
        self.engine_name
    }

    async fn execute_ddl(&self, ddl: &Ddl) -> Result<(), EngineError> {
        self.begin(EngineCall::Ddl {
            relation: ddl.relation().clone(),
            kind: ddl.kind(),
            query: ddl.query().to_string(),
        })
        .await?;

        let mut relations = self.relations.write().await;

        // Evaluating up front rejects bad SQL and missing upstream relations
        let rows = query::evaluate(ddl.query(), &Catalog(&relations), 0)?;

        let stored = match ddl {
            Ddl::CreateOrReplaceView { query, .. } => Stored::View(query.clone()),
            Ddl::CreateOrReplaceTable { .. } => Stored::Table(rows),
        };

        tracing::debug!(relation = %ddl.relation(), kind = ddl.kind(), "memory engine stored relation");
        relations.insert(ddl.relation().fqn(), stored);
        Ok(())
    }

    async fn execute_merge(
        &self,
        target: &Relation,
        source_query: &str,
        unique_key: Option<&[String]>,
    ) -> Result<(), EngineError> {
        self.begin(EngineCall::Merge {
            relation: target.clone(),
            query: source_query.to_string(),
            unique_key: unique_key.map(<[String]>::to_vec),
        })
        .await?;

        // One write guard for the whole merge: either every row lands or none
        let mut relations = self.relations.write().await;

        let incoming = query::evaluate(source_query, &Catalog(&relations), 0)?;

        let existing = match relations.get(&target.fqn()) {
            Some(Stored::Table(rows)) => rows.clone(),
            Some(Stored::View(_)) => {
                return Err(EngineError::Query(format!("Cannot merge into view {}", target)));
            }
            None => return Err(EngineError::NotFound(target.fqn())),
        };

        let merged = match unique_key {
            Some(key) if !key.is_empty() => upsert(existing, incoming, key)?,
            _ => {
                let mut rows = existing;
                rows.extend(incoming);
                rows
            }
        };

        relations.insert(target.fqn(), Stored::Table(merged));
        Ok(())
    }

    async fn max_value(&self, relation: &Relation, column: &str) -> Result<Option<Watermark>, EngineError> {
        self.begin(EngineCall::MaxValue {
            relation: relation.clone(),
            column: column.to_string(),
        })
        .await?;

        let relations = self.relations.read().await;
        if !relations.contains_key(&relation.fqn()) {
            return Ok(None);
        }

        let rows = Catalog(&relations).scan(&relation.fqn(), 0)?;
        if !rows.is_empty() && rows.iter().all(|row| !row.contains_key(column)) {
            return Err(EngineError::Query(format!(
                "Unrecognized name: {} in {}",
                column, relation
            )));
        }

        let max = rows
            .iter()
            .filter_map(|row| row.get(column))
            .filter(|value| !value.is_null())
            .fold(None::<&serde_json::Value>, |best, value| match best {
                Some(current) if compare_values(value, current) != Some(Ordering::Greater) => Some(current),
                _ => Some(value),
            });

        Ok(max.cloned().map(Watermark::from_value))
    }

    async fn load_rows(&self, relation: &Relation, rows: &[Row]) -> Result<(), EngineError> {
        self.begin(EngineCall::Load {
            relation: relation.clone(),
            rows: rows.len(),
        })
        .await?;

        if self.is_view(relation).await {
            return Err(EngineError::Query(format!("Cannot load rows into view {}", relation)));
        }

        tracing::debug!(relation = %relation, rows = rows.len(), "memory engine loaded rows");
        self.seed_table(relation, rows.to_vec()).await;
        Ok(())
    }

    async fn list_relations(&self, database: &str, schema: &str) -> Result<Vec<Relation>, EngineError> {
        self.simulate_latency().await;

        let prefix = format!("{}.{}.", database, schema);
        let mut found: Vec<Relation> = self
            .relations
            .read()
            .await
            .keys()
            .filter_map(|fqn| fqn.strip_prefix(&prefix))
            .filter(|name| !name.contains('.'))
            .map(|name| Relation::new(database, schema, name))
            .collect();

        found.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(found)
    }

    async fn fetch_rows(&self, relation: &Relation) -> Result<Vec<Row>, EngineError> {
        self.begin(EngineCall::Fetch { relation: relation.clone() }).await?;
        self.rows(relation).await
    }

    async fn test_connection(&self) -> Result<(), EngineError> {
        self.simulate_latency().await;

        if self.fail_connection {
            Err(EngineError::Network("Simulated connection failure".to_string()))
        } else {
            Ok(())
        }
    }
}

/// Replace rows of `existing` that share a key with `incoming`, append the rest
fn upsert(existing: Vec<Row>, incoming: Vec<Row>, key: &[String]) -> Result<Vec<Row>, EngineError> {
    // Key columns serialized as one JSON array, e.g. `[101,"2024-01-01"]`
    let key_of = |row: &Row| -> Result<String, EngineError> {
        let values = key
            .iter()
            .map(|column| {
                row.get(column).ok_or_else(|| {
                    EngineError::Query(format!("Unique key column '{}' missing from row", column))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        serde_json::to_string(&values).map_err(|e| EngineError::Query(e.to_string()))
    };

    let mut positions: HashMap<String, usize> = HashMap::with_capacity(incoming.len());
    let mut latest: Vec<Row> = Vec::with_capacity(incoming.len());
    for row in incoming {
        // Later source rows win over earlier ones with the same key
        match positions.entry(key_of(&row)?) {
            Entry::Occupied(slot) => latest[*slot.get()] = row,
            Entry::Vacant(slot) => {
                slot.insert(latest.len());
                latest.push(row);
            }
        }
    }

    let mut merged = Vec::with_capacity(existing.len() + latest.len());
    for row in existing {
        if !positions.contains_key(&key_of(&row)?) {
            merged.push(row);
        }
    }
    merged.extend(latest);

    Ok(merged)
}

/// Builder for creating MemoryEngine with seeded tables
///
/// # Example
///
/// ```rust,ignore
/// let engine = MemoryEngineBuilder::new()
///     .with_table(Relation::new("raw", "shop", "orders"), rows)
///     .with_latency(50)
///     .build();
/// ```
pub struct MemoryEngineBuilder {
    relations: HashMap<String, Stored>,
    errors: HashMap<String, EngineError>,
    fail_connection: bool,
    latency_ms: u64,
    engine_name: &'static str,
}

impl MemoryEngineBuilder {
    /// Create a new builder
    pub fn new() -> Self {
        Self {
            relations: HashMap::new(),
            errors: HashMap::new(),
            fail_connection: false,
            latency_ms: 0,
            engine_name: "Memory",
        }
    }

    /// Seed a table
    pub fn with_table(mut self, relation: Relation, rows: Vec<Row>) -> Self {
        self.relations.insert(relation.fqn(), Stored::Table(rows));
        self
    }

    /// Add an error for a specific relation
    pub fn with_error(mut self, relation: Relation, error: EngineError) -> Self {
        self.errors.insert(relation.fqn(), error);
        self
    }

    /// Configure connection failure
    pub fn with_connection_failure(mut self) -> Self {
        self.fail_connection = true;
        self
    }

    /// Configure latency
    pub fn with_latency(mut self, latency_ms: u64) -> Self {
        self.latency_ms = latency_ms;
        self
    }

    /// Set engine name
    pub fn with_name(mut self, name: &'static str) -> Self {
        self.engine_name = name;
        self
    }

    /// Build the MemoryEngine
    pub fn build(self) -> MemoryEngine {
        MemoryEngine {
            relations: Arc::new(RwLock::new(self.relations)),
            errors: Arc::new(RwLock::new(self.errors)),
            calls: Arc::new(RwLock::new(Vec::new())),
            fail_connection: self.fail_connection,
            latency_ms: self.latency_ms,
            engine_name: self.engine_name,
        }
    }
}

impl Default for MemoryEngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

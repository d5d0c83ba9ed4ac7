//! Query engines that materialize units in a warehouse
//!
//! The executor talks to a warehouse only through [`QueryEngine`]: create
//! a view or table, merge rows into a table, read a column's maximum.
//! Each engine renders its own SQL dialect.
//!
//! ## Features
//!
//! Enable warehouse support via Cargo features:
//! - `bigquery` - Google BigQuery support
//!
//! The in-memory engine is always available and backs tests and local runs.
//!
//! [`transfer`] seeds relations from NDJSON files and exports a schema's
//! relations to CSV through any engine.
//!
//! ## Example
//!
//! ```rust,ignore
//! use martflow_warehouse::{BigQueryEngine, QueryEngine, Relation};
//!
//! let engine = BigQueryEngine::with_adc("my-project").await?;
//! let orders = Relation::new("my-project", "marts", "fct_orders");
//! let watermark = engine.max_value(&orders, "updated_at").await?;
//! ```

pub mod engine;
pub mod memory;
pub mod query;
pub mod bigquery;
pub mod transfer;

pub use engine::{QueryEngine, Relation, Ddl, Watermark, EngineError};
pub use memory::{MemoryEngine, MemoryEngineBuilder, EngineCall};
pub use query::{Row, compare_values};
pub use bigquery::BigQueryEngine;
pub use transfer::{ExportedRelation, TransferError};

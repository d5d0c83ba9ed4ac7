//! Shared fixtures for execution tests
//!
//! A small shop warehouse: raw customers and orders under
//! `analytics.raw_shop`, and units building marts on top of them in
//! `analytics.dbt_dev`.

#![allow(dead_code)]

use martflow_core::{TargetConfig, Unit, WarehouseType};
use martflow_dag::UnitRegistry;
use martflow_engine::{ExecutionContext, Executor};
use martflow_warehouse::{MemoryEngine, MemoryEngineBuilder, Relation, Row};
use serde_json::{json, Value};
use std::sync::Arc;

pub fn row(pairs: &[(&str, Value)]) -> Row {
    pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
}

pub fn raw(name: &str) -> Relation {
    Relation::new("analytics", "raw_shop", name)
}

pub fn mart(name: &str) -> Relation {
    Relation::new("analytics", "dbt_dev", name)
}

pub fn order(id: i64, customer_id: i64, status: &str, updated_at: &str) -> Row {
    row(&[
        ("id", json!(id)),
        ("customer_id", json!(customer_id)),
        ("status", json!(status)),
        ("updated_at", json!(updated_at)),
    ])
}

pub fn customers_rows() -> Vec<Row> {
    vec![
        row(&[("id", json!(1)), ("name", json!("alice"))]),
        row(&[("id", json!(2)), ("name", json!("bob"))]),
    ]
}

pub fn orders_rows() -> Vec<Row> {
    vec![
        order(100, 1, "placed", "2024-01-01 09:00:00"),
        order(101, 2, "placed", "2024-01-02 10:30:00"),
        order(102, 1, "shipped", "2024-01-03 08:15:00"),
    ]
}

/// Memory engine seeded with the raw shop tables
pub fn shop_engine() -> MemoryEngine {
    MemoryEngineBuilder::new()
        .with_table(raw("customers"), customers_rows())
        .with_table(raw("orders"), orders_rows())
        .build()
}

pub fn target() -> TargetConfig {
    TargetConfig {
        name: "test".into(),
        warehouse_type: WarehouseType::Memory,
        database: "analytics".into(),
        schema: "dbt_dev".into(),
        credentials_path: None,
        location: None,
    }
}

pub fn executor(engine: &MemoryEngine) -> Executor {
    Executor::new(Arc::new(engine.clone()), ExecutionContext::new(target()))
}

/// customers, orders -> customer_orders
pub fn scenario_units() -> Vec<Unit> {
    vec![
        Unit::table("customers", "select id, name from {{ source('raw_shop', 'customers') }}"),
        Unit::table("orders", "select * from {{ source('raw_shop', 'orders') }}"),
        Unit::table(
            "customer_orders",
            "select id, customer_id from {{ ref('orders') }} where status = 'placed'",
        )
        .with_depends_on(["customers", "orders"]),
    ]
}

pub const FCT_ORDERS_SQL: &str = "select * from {{ source('raw_shop', 'orders') }}\
{% if is_incremental() %} where updated_at > {{ watermark }}{% endif %}";

pub fn fct_orders() -> Unit {
    Unit::incremental("fct_orders", FCT_ORDERS_SQL)
        .with_unique_key(["id"])
        .with_boundary_column("updated_at")
}

pub fn registry(units: Vec<Unit>) -> UnitRegistry {
    UnitRegistry::from_units(units).expect("fixture units register")
}

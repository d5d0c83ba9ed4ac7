//! Test fixtures for query engine integration tests
//!
//! Raw tables shaped like a small shop: customers, orders and order
//! updates arriving after the initial load.

use martflow_warehouse::{Relation, Row};
use serde_json::{json, Value};

pub fn row(pairs: &[(&str, Value)]) -> Row {
    pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
}

pub fn raw(name: &str) -> Relation {
    Relation::new("analytics", "raw_shop", name)
}

pub fn mart(name: &str) -> Relation {
    Relation::new("analytics", "dbt_dev", name)
}

/// Three customers, one of them inactive
pub fn customers_rows() -> Vec<Row> {
    vec![
        row(&[("id", json!(1)), ("name", json!("alice")), ("is_active", json!(true))]),
        row(&[("id", json!(2)), ("name", json!("bob")), ("is_active", json!(true))]),
        row(&[("id", json!(3)), ("name", json!("carol")), ("is_active", json!(false))]),
    ]
}

/// Orders as of the initial load
pub fn orders_rows() -> Vec<Row> {
    vec![
        order(100, 1, 20, "placed", "2024-01-01 09:00:00"),
        order(101, 2, 35, "placed", "2024-01-02 10:30:00"),
        order(102, 1, 12, "shipped", "2024-01-03 08:15:00"),
    ]
}

/// One updated order and one new order, both after the initial load
pub fn order_updates() -> Vec<Row> {
    vec![
        order(101, 2, 35, "shipped", "2024-01-04 12:00:00"),
        order(103, 3, 50, "placed", "2024-01-05 16:45:00"),
    ]
}

pub fn order(id: i64, customer_id: i64, amount: i64, status: &str, updated_at: &str) -> Row {
    row(&[
        ("id", json!(id)),
        ("customer_id", json!(customer_id)),
        ("amount", json!(amount)),
        ("status", json!(status)),
        ("updated_at", json!(updated_at)),
    ])
}

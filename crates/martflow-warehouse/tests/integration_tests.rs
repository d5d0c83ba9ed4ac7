//! Integration tests for query engines
//!
//! The memory engine tests need no credentials. Tests against a real
//! warehouse are marked with `#[ignore]` and can be run with
//! `cargo test -- --ignored`.
//!
//! ## Running Tests
//!
//! ```bash
//! # Run all non-ignored tests (no credentials required)
//! cargo test -p martflow-warehouse --test integration_tests
//!
//! # Run BigQuery integration tests
//! GOOGLE_APPLICATION_CREDENTIALS=/path/to/key.json \
//! MARTFLOW_BIGQUERY_PROJECT=my-project \
//! MARTFLOW_BIGQUERY_DATASET=my_dataset \
//! cargo test -p martflow-warehouse --features bigquery --test integration_tests -- --ignored
//! ```

mod fixtures;

use fixtures::{customers_rows, mart, order, order_updates, orders_rows, raw};
use martflow_warehouse::{
    Ddl, EngineCall, EngineError, MemoryEngine, MemoryEngineBuilder, QueryEngine, Relation,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;

// =============================================================================
// Helper Functions
// =============================================================================

/// Check if BigQuery credentials are available
fn has_bigquery_credentials() -> bool {
    std::env::var("GOOGLE_APPLICATION_CREDENTIALS").is_ok()
        || std::env::var("MARTFLOW_BIGQUERY_PROJECT").is_ok()
}

fn shop_engine() -> MemoryEngine {
    MemoryEngineBuilder::new()
        .with_table(raw("customers"), customers_rows())
        .with_table(raw("orders"), orders_rows())
        .build()
}

fn table(relation: Relation, query: &str) -> Ddl {
    Ddl::CreateOrReplaceTable { relation, query: query.to_string() }
}

// =============================================================================
// Memory Engine Tests (No credentials required)
// =============================================================================

#[tokio::test]
async fn test_memory_engine_through_trait_object() {
    let memory = shop_engine();
    let engine: Arc<dyn QueryEngine> = Arc::new(memory.clone());

    assert_eq!(engine.name(), "Memory");
    assert_eq!(engine.identifier_quote(), None);
    assert_eq!(engine.quote_relation(&mart("customers")), "analytics.dbt_dev.customers");

    engine
        .execute_ddl(&table(
            mart("active_customers"),
            "select id, name from analytics.raw_shop.customers where is_active = true",
        ))
        .await
        .unwrap();

    let rows = memory.rows(&mart("active_customers")).await.unwrap();
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|r| r.len() == 2));
}

#[tokio::test]
async fn test_incremental_cycle() {
    let engine = shop_engine();
    let target = mart("fct_orders");
    let key = vec!["id".to_string()];

    // Initial full build
    engine
        .execute_ddl(&table(target.clone(), "select * from analytics.raw_shop.orders"))
        .await
        .unwrap();

    let watermark = engine.max_value(&target, "updated_at").await.unwrap().unwrap();
    assert_eq!(watermark.value(), &json!("2024-01-03 08:15:00"));

    // New data arrives upstream
    let mut source = orders_rows();
    source.extend(order_updates());
    engine.seed_table(&raw("orders"), source).await;

    let delta = format!(
        "select * from analytics.raw_shop.orders where updated_at > {}",
        watermark.to_sql_literal()
    );
    engine.execute_merge(&target, &delta, Some(&key)).await.unwrap();

    let rows = engine.rows(&target).await.unwrap();
    assert_eq!(rows.len(), 4);
    let updated = rows.iter().find(|r| r["id"] == json!(101)).unwrap();
    assert_eq!(updated["status"], json!("shipped"));

    // Re-running the same merge changes nothing
    engine.execute_merge(&target, &delta, Some(&key)).await.unwrap();
    assert_eq!(engine.rows(&target).await.unwrap(), rows);

    let watermark = engine.max_value(&target, "updated_at").await.unwrap().unwrap();
    assert_eq!(watermark.value(), &json!("2024-01-05 16:45:00"));
}

#[tokio::test]
async fn test_merge_into_missing_target() {
    let engine = shop_engine();
    let err = engine
        .execute_merge(&mart("fct_orders"), "select * from analytics.raw_shop.orders", None)
        .await
        .unwrap_err();

    assert_eq!(err, EngineError::NotFound("analytics.dbt_dev.fct_orders".into()));
}

#[tokio::test]
async fn test_view_over_view() {
    let engine = shop_engine();
    engine
        .execute_ddl(&Ddl::CreateOrReplaceView {
            relation: mart("stg_orders"),
            query: "select id, amount from analytics.raw_shop.orders".into(),
        })
        .await
        .unwrap();
    engine
        .execute_ddl(&Ddl::CreateOrReplaceView {
            relation: mart("big_orders"),
            query: "select id from analytics.dbt_dev.stg_orders where amount >= 20".into(),
        })
        .await
        .unwrap();

    assert_eq!(engine.rows(&mart("big_orders")).await.unwrap().len(), 2);

    engine.seed_table(&raw("orders"), vec![order(1, 1, 5, "placed", "2024-02-01")]).await;
    assert!(engine.rows(&mart("big_orders")).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_call_log_records_order() {
    let engine = shop_engine();
    engine
        .execute_ddl(&table(mart("customers"), "select * from analytics.raw_shop.customers"))
        .await
        .unwrap();
    engine.max_value(&mart("customers"), "id").await.unwrap();

    let calls = engine.calls().await;
    assert_eq!(calls.len(), 2);
    assert!(matches!(&calls[0], EngineCall::Ddl { kind: "table", .. }));
    assert!(matches!(&calls[1], EngineCall::MaxValue { column, .. } if column == "id"));
}

#[tokio::test]
async fn test_custom_error_per_relation() {
    let engine = MemoryEngineBuilder::new()
        .with_table(raw("orders"), orders_rows())
        .with_error(mart("restricted"), EngineError::PermissionDenied("Access denied".into()))
        .build();

    let err = engine
        .execute_ddl(&table(mart("restricted"), "select 1 as id"))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::PermissionDenied(_)));

    engine
        .execute_ddl(&table(mart("allowed"), "select 1 as id"))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_concurrent_writes_to_distinct_relations() {
    let engine = shop_engine().with_latency(10);

    let mut handles = Vec::new();
    for i in 0..8 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine
                .execute_ddl(&table(mart(&format!("copy_{i}")), "select * from analytics.raw_shop.orders"))
                .await
        }));
    }

    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    // 2 raw tables + 8 copies
    assert_eq!(engine.relation_count().await, 10);
}

// =============================================================================
// BigQuery Integration Tests (require credentials)
// =============================================================================

#[tokio::test]
#[ignore] // Run with: cargo test --features bigquery -- --ignored
async fn test_bigquery_connection() {
    if !has_bigquery_credentials() {
        eprintln!("Skipping BigQuery test: no credentials available");
        eprintln!("Set GOOGLE_APPLICATION_CREDENTIALS or MARTFLOW_BIGQUERY_PROJECT");
        return;
    }

    #[cfg(feature = "bigquery")]
    {
        use martflow_warehouse::BigQueryEngine;

        let project_id = std::env::var("MARTFLOW_BIGQUERY_PROJECT")
            .or_else(|_| std::env::var("GCP_PROJECT"))
            .expect("MARTFLOW_BIGQUERY_PROJECT or GCP_PROJECT must be set");

        let engine = BigQueryEngine::with_adc(&project_id)
            .await
            .expect("Failed to create BigQuery engine");

        engine
            .test_connection()
            .await
            .expect("Connection test failed");
    }

    #[cfg(not(feature = "bigquery"))]
    {
        eprintln!("BigQuery feature not enabled. Rebuild with --features bigquery");
    }
}

#[tokio::test]
#[ignore]
async fn test_bigquery_table_and_watermark() {
    if !has_bigquery_credentials() {
        return;
    }

    #[cfg(feature = "bigquery")]
    {
        use martflow_warehouse::BigQueryEngine;

        let project_id = std::env::var("MARTFLOW_BIGQUERY_PROJECT")
            .expect("MARTFLOW_BIGQUERY_PROJECT must be set");
        let dataset = std::env::var("MARTFLOW_BIGQUERY_DATASET")
            .expect("MARTFLOW_BIGQUERY_DATASET must be set");

        let engine = BigQueryEngine::with_adc(&project_id)
            .await
            .expect("Failed to create engine");

        let target = Relation::new(&project_id, &dataset, "martflow_it_orders");
        engine
            .execute_ddl(&table(
                target.clone(),
                "select 1 as id, timestamp '2024-01-01 00:00:00' as updated_at",
            ))
            .await
            .expect("Failed to create table");

        let key = vec!["id".to_string()];
        engine
            .execute_merge(
                &target,
                "select 1 as id, timestamp '2024-02-01 00:00:00' as updated_at",
                Some(&key),
            )
            .await
            .expect("Failed to merge");

        let watermark = engine
            .max_value(&target, "updated_at")
            .await
            .expect("Failed to read watermark")
            .expect("Table has rows");
        assert!(watermark.to_sql_literal().contains("2024-02-01"));
    }
}

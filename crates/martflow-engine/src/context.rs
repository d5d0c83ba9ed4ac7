//! Explicit execution configuration
//!
//! The target and template variables a run executes against. Passed to the
//! executor at construction; nothing is read from process-wide state.

use martflow_core::{Config, TargetConfig, Unit};
use martflow_jinja::{RenderContext, TargetContext};
use martflow_warehouse::{QueryEngine, Relation, Watermark};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    pub target: TargetConfig,
    pub vars: BTreeMap<String, serde_json::Value>,
}

impl ExecutionContext {
    pub fn new(target: TargetConfig) -> Self {
        Self {
            target,
            vars: BTreeMap::new(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            target: config.target.clone(),
            vars: config.vars.clone(),
        }
    }

    pub fn with_vars(mut self, vars: BTreeMap<String, serde_json::Value>) -> Self {
        self.vars = vars;
        self
    }

    /// Relation a unit materializes into
    pub fn relation_for(&self, unit: &Unit) -> Relation {
        let schema = unit.schema.as_deref().unwrap_or(&self.target.schema);
        Relation::new(&self.target.database, schema, &unit.name)
    }

    /// Relation of a unit known only by name (outside the current run)
    pub fn default_relation(&self, name: &str) -> Relation {
        Relation::new(&self.target.database, &self.target.schema, name)
    }

    /// Template context for one unit
    ///
    /// `relations` maps every unit in the run to its output; upstream units
    /// missing from it resolve to the target schema.
    pub fn render_context(
        &self,
        unit: &Unit,
        relations: &HashMap<String, Relation>,
        engine: &dyn QueryEngine,
        watermark: Option<&Watermark>,
    ) -> RenderContext {
        let mut ctx = RenderContext::new(TargetContext::from(&self.target))
            .with_vars(self.vars.clone())
            .with_quote(engine.identifier_quote())
            .with_this(engine.quote_relation(&self.relation_for(unit)));

        for upstream in &unit.depends_on {
            let relation = relations
                .get(upstream)
                .cloned()
                .unwrap_or_else(|| self.default_relation(upstream));
            ctx = ctx.with_ref(upstream.clone(), engine.quote_relation(&relation));
        }

        if let Some(watermark) = watermark {
            ctx = ctx.with_watermark(watermark.to_sql_literal());
        }

        ctx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use martflow_warehouse::MemoryEngine;
    use serde_json::json;

    fn context() -> ExecutionContext {
        let mut target = TargetConfig::default();
        target.database = "shop".into();
        target.schema = "marts".into();
        ExecutionContext::new(target)
    }

    #[test]
    fn relation_honours_schema_override() {
        let ctx = context();
        assert_eq!(ctx.relation_for(&Unit::table("orders", "")).fqn(), "shop.marts.orders");
        assert_eq!(
            ctx.relation_for(&Unit::table("orders", "").with_schema("staging")).fqn(),
            "shop.staging.orders"
        );
    }

    #[test]
    fn render_context_resolves_refs() {
        let ctx = context();
        let unit = Unit::table("customer_orders", "").with_depends_on(["customers", "orders"]);

        let mut relations = HashMap::new();
        relations.insert("customers".to_string(), Relation::new("shop", "staging", "customers"));

        let engine = MemoryEngine::new();
        let watermark = Watermark::from_value(json!("2024-01-01"));
        let render = ctx.render_context(&unit, &relations, &engine, Some(&watermark));

        assert_eq!(render.this, "shop.marts.customer_orders");
        assert_eq!(render.refs["customers"], "shop.staging.customers");
        assert_eq!(render.refs["orders"], "shop.marts.orders");
        assert!(render.incremental);
        assert_eq!(render.watermark.as_deref(), Some("'2024-01-01'"));
        assert_eq!(render.target.schema, "marts");
    }
}

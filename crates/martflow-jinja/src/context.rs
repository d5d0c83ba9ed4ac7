//! Template context
//!
//! Everything a unit's template can see: the target, project vars, the
//! unit's own relation, resolved upstream relations and the incremental
//! watermark.

use serde::{Serialize, Deserialize};
use std::collections::{BTreeMap, HashMap};
use martflow_core::TargetConfig;

/// Context for rendering one unit
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RenderContext {
    /// Target configuration (dev, prod, etc.)
    pub target: TargetContext,

    /// Project variables from martflow.toml
    pub vars: BTreeMap<String, serde_json::Value>,

    /// Rendered relation of the unit being built
    pub this: String,

    /// Upstream unit name -> rendered relation
    pub refs: HashMap<String, String>,

    /// True only when the unit is merged above a watermark
    pub incremental: bool,

    /// SQL literal of the watermark lower bound
    pub watermark: Option<String>,

    /// Identifier quote used when rendering source() relations
    pub quote: Option<char>,
}

/// Target context (warehouse connection info)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetContext {
    pub name: String,
    pub database: String,
    pub schema: String,
    #[serde(rename = "type")]
    pub target_type: String,
}

impl RenderContext {
    pub fn new(target: TargetContext) -> Self {
        Self {
            target,
            ..Default::default()
        }
    }

    pub fn with_vars(mut self, vars: BTreeMap<String, serde_json::Value>) -> Self {
        self.vars = vars;
        self
    }

    pub fn with_this(mut self, this: impl Into<String>) -> Self {
        self.this = this.into();
        self
    }

    pub fn with_ref(mut self, name: impl Into<String>, relation: impl Into<String>) -> Self {
        self.refs.insert(name.into(), relation.into());
        self
    }

    pub fn with_quote(mut self, quote: Option<char>) -> Self {
        self.quote = quote;
        self
    }

    /// Mark the render as an incremental merge bounded below by `watermark`
    pub fn with_watermark(mut self, watermark: impl Into<String>) -> Self {
        self.incremental = true;
        self.watermark = Some(watermark.into());
        self
    }

    /// Render a `database.schema.table` relation with the context's quoting
    pub fn quote_relation(&self, database: &str, schema: &str, table: &str) -> String {
        let fqn = format!("{}.{}.{}", database, schema, table);
        match self.quote {
            Some(q) => format!("{q}{fqn}{q}"),
            None => fqn,
        }
    }
}

impl Default for TargetContext {
    fn default() -> Self {
        Self::from(&TargetConfig::default())
    }
}

impl From<&TargetConfig> for TargetContext {
    fn from(target: &TargetConfig) -> Self {
        Self {
            name: target.name.clone(),
            database: target.database.clone(),
            schema: target.schema.clone(),
            target_type: target.warehouse_type.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_from_config() {
        let mut config = TargetConfig::default();
        config.name = "prod".to_string();
        config.schema = "marts".to_string();

        let target = TargetContext::from(&config);
        assert_eq!(target.name, "prod");
        assert_eq!(target.schema, "marts");
        assert_eq!(target.target_type, "bigquery");
    }

    #[test]
    fn watermark_marks_incremental() {
        let ctx = RenderContext::default();
        assert!(!ctx.incremental);

        let ctx = ctx.with_watermark("'2024-01-01'");
        assert!(ctx.incremental);
        assert_eq!(ctx.watermark.as_deref(), Some("'2024-01-01'"));
    }

    #[test]
    fn relation_quoting() {
        let plain = RenderContext::default();
        assert_eq!(plain.quote_relation("p", "raw", "orders"), "p.raw.orders");

        let quoted = RenderContext::default().with_quote(Some('`'));
        assert_eq!(quoted.quote_relation("p", "raw", "orders"), "`p.raw.orders`");
    }
}

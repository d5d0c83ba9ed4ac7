//! Model selection
//!
//! A thin predicate layer over an already-sorted execution order. Selecting
//! a unit always brings its upstream units along so the run can build them.
//!
//! Grammar (items are unioned):
//! - `name` / `+name`: the unit and its upstream units
//! - `name+`: additionally every downstream unit (and their upstream units)
//! - `tag:value`: every unit carrying the tag, with upstream units

use std::collections::HashSet;
use crate::dag::{DependencyGraph, NodeId};
use crate::registry::UnitRegistry;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SelectorError {
    #[error("Selector references unknown unit '{0}'")]
    UnknownUnit(String),

    #[error("Invalid selector '{0}'")]
    InvalidSelector(String),
}

/// One parsed selector expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectorItem {
    Unit { name: String, descendants: bool },
    Tag(String),
}

impl SelectorItem {
    pub fn parse(expr: &str) -> Result<Self, SelectorError> {
        let trimmed = expr.trim();
        let invalid = || SelectorError::InvalidSelector(expr.to_string());

        if trimmed.is_empty() {
            return Err(invalid());
        }

        if let Some(tag) = trimmed.strip_prefix("tag:") {
            if tag.is_empty() || tag.contains(char::is_whitespace) {
                return Err(invalid());
            }
            return Ok(Self::Tag(tag.to_string()));
        }

        let without_prefix = trimmed.strip_prefix('+').unwrap_or(trimmed);
        let (name, descendants) = match without_prefix.strip_suffix('+') {
            Some(name) => (name, true),
            None => (without_prefix, false),
        };

        if name.is_empty() || name.contains('+') || name.contains(char::is_whitespace) {
            return Err(invalid());
        }

        Ok(Self::Unit {
            name: name.to_string(),
            descendants,
        })
    }
}

/// A set of selector items; empty means "every unit"
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    items: Vec<SelectorItem>,
}

impl Selection {
    /// Select every unit
    pub fn all() -> Self {
        Self::default()
    }

    /// Parse selector expressions; each may hold several whitespace-separated items
    pub fn parse<S: AsRef<str>>(exprs: &[S]) -> Result<Self, SelectorError> {
        let mut items = Vec::new();
        for expr in exprs {
            let expr = expr.as_ref();
            if expr.trim().is_empty() {
                return Err(SelectorError::InvalidSelector(expr.to_string()));
            }
            for part in expr.split_whitespace() {
                items.push(SelectorItem::parse(part)?);
            }
        }
        Ok(Self { items })
    }

    pub fn is_all(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> &[SelectorItem] {
        &self.items
    }

    /// Resolve the selection to the set of unit names it covers
    pub fn resolve(
        &self,
        registry: &UnitRegistry,
        graph: &DependencyGraph,
    ) -> Result<HashSet<NodeId>, SelectorError> {
        if self.is_all() {
            return Ok(graph.all_nodes().iter().cloned().collect());
        }

        let mut seeds: Vec<NodeId> = Vec::new();
        for item in &self.items {
            match item {
                SelectorItem::Unit { name, descendants } => {
                    if !registry.contains(name) {
                        return Err(SelectorError::UnknownUnit(name.clone()));
                    }
                    seeds.push(name.clone());
                    if *descendants {
                        seeds.extend(graph.downstream(name));
                    }
                }
                SelectorItem::Tag(tag) => {
                    let before = seeds.len();
                    seeds.extend(
                        registry
                            .all()
                            .iter()
                            .filter(|u| u.has_tag(tag))
                            .map(|u| u.name.clone()),
                    );
                    if seeds.len() == before {
                        tracing::warn!(tag = %tag, "selector tag matched no units");
                    }
                }
            }
        }

        let mut selected: HashSet<NodeId> = HashSet::new();
        for seed in seeds {
            if selected.insert(seed.clone()) {
                selected.extend(graph.upstream(&seed));
            }
        }

        Ok(selected)
    }

    /// Filter an execution order down to the selection, preserving order
    pub fn apply(
        &self,
        order: &[NodeId],
        registry: &UnitRegistry,
        graph: &DependencyGraph,
    ) -> Result<Vec<NodeId>, SelectorError> {
        let selected = self.resolve(registry, graph)?;
        Ok(order
            .iter()
            .filter(|name| selected.contains(*name))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use martflow_core::Unit;
    use pretty_assertions::assert_eq;

    fn fixture() -> (UnitRegistry, DependencyGraph, Vec<NodeId>) {
        let registry = UnitRegistry::from_units(vec![
            Unit::view("stg_customers", "select 1").with_tags(["staging"]),
            Unit::view("stg_orders", "select 1").with_tags(["staging"]),
            Unit::table("customers", "select 1").with_depends_on(["stg_customers"]),
            Unit::table("orders", "select 1").with_depends_on(["stg_orders"]),
            Unit::table("customer_orders", "select 1")
                .with_depends_on(["customers", "orders"])
                .with_tags(["marts"]),
            Unit::view("tag_stats", "select 1").with_tags(["stackoverflow"]),
        ])
        .unwrap();
        let graph = DependencyGraph::build(&registry).unwrap();
        let order = graph.topological_order().unwrap();
        (registry, graph, order)
    }

    #[test]
    fn parse_items() {
        assert_eq!(
            SelectorItem::parse("orders").unwrap(),
            SelectorItem::Unit { name: "orders".into(), descendants: false }
        );
        assert_eq!(
            SelectorItem::parse("+orders+").unwrap(),
            SelectorItem::Unit { name: "orders".into(), descendants: true }
        );
        assert_eq!(SelectorItem::parse("tag:marts").unwrap(), SelectorItem::Tag("marts".into()));
        assert!(SelectorItem::parse("tag:").is_err());
        assert!(SelectorItem::parse("+").is_err());
        assert!(SelectorItem::parse("a+b").is_err());
        assert!(Selection::parse(&[" "]).is_err());
    }

    #[test]
    fn empty_selection_keeps_everything() {
        let (registry, graph, order) = fixture();
        let selected = Selection::all().apply(&order, &registry, &graph).unwrap();
        assert_eq!(selected, order);
    }

    #[test]
    fn unit_brings_upstream() {
        let (registry, graph, order) = fixture();
        let selection = Selection::parse(&["customers"]).unwrap();
        let selected = selection.apply(&order, &registry, &graph).unwrap();
        assert_eq!(selected, vec!["stg_customers", "customers"]);
    }

    #[test]
    fn descendants_bring_their_upstream() {
        let (registry, graph, order) = fixture();
        let selection = Selection::parse(&["stg_customers+"]).unwrap();
        let selected = selection.apply(&order, &registry, &graph).unwrap();

        assert_eq!(selected.len(), 5);
        assert!(selected.contains(&"orders".to_string()));
        assert!(!selected.contains(&"tag_stats".to_string()));
    }

    #[test]
    fn tags_and_union() {
        let (registry, graph, order) = fixture();
        let selection = Selection::parse(&["tag:stackoverflow stg_orders"]).unwrap();
        let selected = selection.apply(&order, &registry, &graph).unwrap();
        assert_eq!(selected, vec!["stg_orders", "tag_stats"]);
    }

    #[test]
    fn unknown_unit_rejected() {
        let (registry, graph, order) = fixture();
        let selection = Selection::parse(&["ghost"]).unwrap();
        assert_eq!(
            selection.apply(&order, &registry, &graph).unwrap_err(),
            SelectorError::UnknownUnit("ghost".into())
        );
    }
}

//! Unit registry
//!
//! Holds unit definitions for one run. Read-only once execution starts.

use martflow_core::Unit;
use std::collections::HashMap;

/// Registry errors (structural, raised before anything executes)
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("Unit '{0}' is already registered")]
    DuplicateUnit(String),

    #[error("Unknown unit '{0}'")]
    UnknownUnit(String),

    #[error("Incremental unit '{0}' has no boundary_column to compute its watermark")]
    MissingWatermarkConfiguration(String),
}

/// Registered units, indexed by name, remembering registration order
#[derive(Debug, Clone, Default)]
pub struct UnitRegistry {
    units: Vec<Unit>,
    index: HashMap<String, usize>,
}

impl UnitRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from units, stopping at the first invalid one
    pub fn from_units(units: impl IntoIterator<Item = Unit>) -> Result<Self, RegistryError> {
        let mut registry = Self::new();
        for unit in units {
            registry.register(unit)?;
        }
        Ok(registry)
    }

    /// Register a unit
    pub fn register(&mut self, unit: Unit) -> Result<(), RegistryError> {
        if self.index.contains_key(&unit.name) {
            return Err(RegistryError::DuplicateUnit(unit.name));
        }

        if unit.is_incremental() && unit.boundary_column.is_none() {
            return Err(RegistryError::MissingWatermarkConfiguration(unit.name));
        }

        self.index.insert(unit.name.clone(), self.units.len());
        self.units.push(unit);
        Ok(())
    }

    /// Look up a unit by name
    pub fn get(&self, name: &str) -> Result<&Unit, RegistryError> {
        self.index
            .get(name)
            .map(|&i| &self.units[i])
            .ok_or_else(|| RegistryError::UnknownUnit(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// All units in registration order
    pub fn all(&self) -> &[Unit] {
        &self.units
    }

    /// Registration position of a unit
    pub fn position(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.units.iter().map(|u| u.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_get() {
        let mut registry = UnitRegistry::new();
        registry.register(Unit::table("customers", "select 1")).unwrap();
        registry.register(Unit::view("orders", "select 2")).unwrap();

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get("orders").unwrap().sql, "select 2");
        assert_eq!(registry.position("customers"), Some(0));
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["customers", "orders"]);
    }

    #[test]
    fn duplicate_rejected() {
        let mut registry = UnitRegistry::new();
        registry.register(Unit::table("customers", "select 1")).unwrap();

        let err = registry.register(Unit::view("customers", "select 2")).unwrap_err();
        assert_eq!(err, RegistryError::DuplicateUnit("customers".to_string()));
        assert_eq!(registry.get("customers").unwrap().sql, "select 1");
    }

    #[test]
    fn unknown_unit() {
        let registry = UnitRegistry::new();
        assert_eq!(
            registry.get("nope").unwrap_err(),
            RegistryError::UnknownUnit("nope".to_string())
        );
    }

    #[test]
    fn incremental_requires_boundary_column() {
        let mut registry = UnitRegistry::new();
        let err = registry
            .register(Unit::incremental("fct_orders", "select 1").with_unique_key(["order_id"]))
            .unwrap_err();
        assert_eq!(
            err,
            RegistryError::MissingWatermarkConfiguration("fct_orders".to_string())
        );

        registry
            .register(
                Unit::incremental("fct_orders", "select 1")
                    .with_unique_key(["order_id"])
                    .with_boundary_column("updated_at"),
            )
            .unwrap();
        assert!(registry.contains("fct_orders"));
    }
}

//! Unit registry and dependency graph
//!
//! This crate handles:
//! - Registering transformation units (duplicate and configuration checks)
//! - Building the dependency graph (DAG) and its topological order
//! - Model selection (unit, ancestors, descendants, tags)
//! - Loading units from a martflow project

pub mod registry;
pub mod dag;
pub mod selector;
pub mod project;

pub use registry::{UnitRegistry, RegistryError};
pub use dag::{DependencyGraph, GraphError, NodeId, build_order};
pub use selector::{Selection, SelectorItem, SelectorError};
pub use project::{Project, ProjectError};

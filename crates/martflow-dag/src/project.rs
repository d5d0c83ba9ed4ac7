//! martflow project loading
//!
//! Reads `martflow.toml`, resolves each declared unit's template (inline,
//! from its file, or discovered under `models_dir`), adds ref() targets as
//! implicit dependencies and fills the registry.

use martflow_core::{Config, ConfigError, Unit, UnitDeclaration};
use martflow_jinja::extract_refs;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;
use crate::dag::{DependencyGraph, GraphError};
use crate::registry::{RegistryError, UnitRegistry};

/// Project loading errors
#[derive(Debug, thiserror::Error)]
pub enum ProjectError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("Failed to read {path}: {message}")]
    Io { path: PathBuf, message: String },

    #[error("Failed to parse unit declarations: {0}")]
    Declarations(String),

    #[error("Unit '{0}' has no template: set `sql`, `path`, or add {0}.sql under models_dir")]
    MissingTemplate(String),
}

/// A loaded project: configuration plus registered units
#[derive(Debug, Clone)]
pub struct Project {
    pub config: Config,
    pub registry: UnitRegistry,
}

impl Project {
    /// Load a project from its martflow.toml
    pub fn load(config_path: &Path) -> Result<Self, ProjectError> {
        let mut config = Config::from_file(config_path)?;
        config.apply_env_overrides();
        Self::from_config(config)
    }

    /// Build the registry from an already parsed configuration
    pub fn from_config(config: Config) -> Result<Self, ProjectError> {
        let mut discovered = match &config.models_dir {
            Some(dir) => discover_templates(&config.resolve_path(dir))?,
            None => BTreeMap::new(),
        };

        let mut registry = UnitRegistry::new();

        for decl in config.units.clone() {
            let (sql, path) = if let Some(sql) = decl.sql.clone() {
                (sql, decl.path.clone())
            } else if let Some(path) = &decl.path {
                let full = config.resolve_path(path);
                (read_template(&full)?, Some(full))
            } else if let Some((path, sql)) = discovered.remove(&decl.name) {
                (sql, Some(path))
            } else {
                return Err(ProjectError::MissingTemplate(decl.name));
            };

            // A discovered file shadowed by an explicit declaration is not a second unit
            discovered.remove(&decl.name);

            let mut unit = decl.into_unit(sql);
            unit.path = path;
            registry.register(with_implicit_refs(unit))?;
        }

        // Files with no declaration become views, in path order
        let mut remaining: Vec<(String, PathBuf, String)> = discovered
            .into_iter()
            .map(|(name, (path, sql))| (name, path, sql))
            .collect();
        remaining.sort_by(|a, b| a.1.cmp(&b.1));

        for (name, path, sql) in remaining {
            tracing::debug!(unit = %name, path = %path.display(), "discovered undeclared template");
            registry.register(with_implicit_refs(Unit::view(name, sql).with_path(path)))?;
        }

        tracing::info!(units = registry.len(), "loaded project");

        Ok(Self { config, registry })
    }

    /// Parse a JSON list of unit declarations
    pub fn load_declarations_json(json: &str) -> Result<Vec<UnitDeclaration>, ProjectError> {
        serde_json::from_str(json).map_err(|e| ProjectError::Declarations(e.to_string()))
    }

    /// Build a project from JSON declarations with inline templates
    pub fn from_declarations_json(config: Config, json: &str) -> Result<Self, ProjectError> {
        let mut config = config;
        config.units.extend(Self::load_declarations_json(json)?);
        Self::from_config(config)
    }

    /// Build the dependency graph of the registered units
    pub fn graph(&self) -> Result<DependencyGraph, GraphError> {
        DependencyGraph::build(&self.registry)
    }
}

fn with_implicit_refs(mut unit: Unit) -> Unit {
    for name in extract_refs(&unit.sql) {
        if !unit.depends_on.contains(&name) {
            unit.depends_on.push(name);
        }
    }
    unit
}

fn read_template(path: &Path) -> Result<String, ProjectError> {
    std::fs::read_to_string(path).map_err(|e| ProjectError::Io {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

/// Map of unit name (file stem) -> (path, template) for every *.sql file
fn discover_templates(dir: &Path) -> Result<BTreeMap<String, (PathBuf, String)>, ProjectError> {
    let mut templates = BTreeMap::new();

    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(|e| ProjectError::Io {
            path: dir.to_path_buf(),
            message: e.to_string(),
        })?;

        let path = entry.path();
        if !entry.file_type().is_file() || path.extension().and_then(|e| e.to_str()) != Some("sql") {
            continue;
        }

        let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };

        if templates.contains_key(name) {
            return Err(RegistryError::DuplicateUnit(name.to_string()).into());
        }

        templates.insert(name.to_string(), (path.to_path_buf(), read_template(path)?));
    }

    Ok(templates)
}

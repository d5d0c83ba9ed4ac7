//! Jinja template rendering for martflow units
//!
//! This crate handles:
//! - Rendering unit query templates to executable SQL (`render`)
//! - The template context (target, vars, this, watermark)
//! - dbt-style functions (ref, source, var, config, is_incremental)
//! - Static discovery of ref() calls for implicit dependencies

pub mod renderer;
pub mod context;
pub mod functions;

pub use renderer::{render, RenderError};
pub use context::{RenderContext, TargetContext};
pub use functions::extract_refs;

//! dbt-style Jinja functions
//!
//! ref(), source(), var(), config() and is_incremental(), bound to one
//! render context, plus static discovery of ref() calls.

use minijinja::value::Kwargs;
use minijinja::{Environment, Error, ErrorKind, Value};
use regex::Regex;
use std::sync::{Arc, OnceLock};
use crate::context::RenderContext;

/// Register every function on `env`, closing over `ctx`
pub(crate) fn register(env: &mut Environment<'static>, ctx: &Arc<RenderContext>) {
    let refs = Arc::clone(ctx);
    env.add_function("ref", move |first: String, second: Option<String>| {
        ref_function(&refs, first, second)
    });

    let sources = Arc::clone(ctx);
    env.add_function("source", move |source_name: String, table_name: String| {
        source_function(&sources, &source_name, &table_name)
    });

    let vars = Arc::clone(ctx);
    env.add_function("var", move |name: String, default: Option<Value>| {
        var_function(&vars, &name, default)
    });

    let incremental = ctx.incremental;
    env.add_function("is_incremental", move || incremental);

    env.add_function("config", config_function);
}

/// ref('model') or ref('package', 'model') -> rendered relation of the unit
fn ref_function(ctx: &RenderContext, first: String, second: Option<String>) -> Result<Value, Error> {
    // Two-argument form: the package name is ignored
    let model = second.unwrap_or(first);

    ctx.refs
        .get(&model)
        .map(|relation| Value::from(relation.as_str()))
        .ok_or_else(|| {
            Error::new(
                ErrorKind::InvalidOperation,
                format!("ref('{}') does not name an upstream unit", model),
            )
        })
}

/// source('source_name', 'table_name') -> database.source_name.table_name
fn source_function(ctx: &RenderContext, source_name: &str, table_name: &str) -> Result<Value, Error> {
    if source_name.is_empty() || table_name.is_empty() {
        return Err(Error::new(
            ErrorKind::InvalidOperation,
            "source() requires a source name and a table name",
        ));
    }

    Ok(Value::from(ctx.quote_relation(&ctx.target.database, source_name, table_name)))
}

/// var('name') or var('name', default)
fn var_function(ctx: &RenderContext, name: &str, default: Option<Value>) -> Result<Value, Error> {
    if let Some(value) = ctx.vars.get(name) {
        return Ok(Value::from_serialize(value));
    }

    default.ok_or_else(|| {
        Error::new(
            ErrorKind::UndefinedError,
            format!("Variable '{}' is not defined", name),
        )
    })
}

/// config(...) carries metadata only and renders to nothing
fn config_function(kwargs: Kwargs) -> Result<Value, Error> {
    let keys: Vec<String> = kwargs.args().map(str::to_owned).collect();
    for key in keys {
        let _: Value = kwargs.get(&key)?;
    }
    Ok(Value::from(""))
}

fn ref_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r#"(?:^|[^\w.])ref\(\s*['"]([\w.-]+)['"](?:\s*,\s*['"]([\w.-]+)['"])?\s*\)"#,
        )
        .expect("ref pattern is valid")
    })
}

/// `{# ... #}` blocks, which minijinja drops before rendering
fn comment_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?s)\{#.*?#\}").expect("comment pattern is valid"))
}

/// Unit names referenced through ref() in a template, first occurrence order
///
/// Calls inside Jinja comments are not dependencies.
pub fn extract_refs(template: &str) -> Vec<String> {
    let mut refs: Vec<String> = Vec::new();
    let code = comment_pattern().replace_all(template, " ");

    for caps in ref_pattern().captures_iter(&code) {
        let name = caps
            .get(2)
            .or_else(|| caps.get(1))
            .map(|m| m.as_str().to_string());

        if let Some(name) = name {
            if !refs.contains(&name) {
                refs.push(name);
            }
        }
    }

    refs
}

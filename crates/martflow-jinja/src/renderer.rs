//! Template rendering
//!
//! `render(template, context) -> statement` is a pure function: no I/O, no
//! state kept between calls. The executor calls it once per unit right
//! before dispatch.

use minijinja::{Environment, Error as JinjaError, ErrorKind, UndefinedBehavior};
use std::sync::Arc;
use crate::context::RenderContext;
use crate::functions::{self, extract_refs};

/// Error during rendering
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RenderError {
    #[error("Template references unknown unit '{0}' through ref()")]
    UnknownRef(String),

    #[error("Undefined variable: {0}")]
    UndefinedVariable(String),

    #[error("Jinja render error: {message}")]
    Template {
        message: String,
        line: Option<usize>,
    },
}

/// Check if SQL contains Jinja templates
pub fn has_jinja(sql: &str) -> bool {
    sql.contains("{{") || sql.contains("{%") || sql.contains("{#")
}

/// Render a unit template to an executable statement
pub fn render(template: &str, context: &RenderContext) -> Result<String, RenderError> {
    if !has_jinja(template) {
        return Ok(template.to_string());
    }

    // Catch unknown refs up front so the error names the unit
    if let Some(missing) = extract_refs(template)
        .into_iter()
        .find(|name| !context.refs.contains_key(name))
    {
        return Err(RenderError::UnknownRef(missing));
    }

    let ctx = Arc::new(context.clone());
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    functions::register(&mut env, &ctx);

    let globals = minijinja::context! {
        target => minijinja::Value::from_serialize(&ctx.target),
        vars => minijinja::Value::from_serialize(&ctx.vars),
        this => ctx.this.as_str(),
        watermark => ctx.watermark.as_deref(),
    };

    env.render_str(template, globals)
        .map_err(jinja_error_to_render_error)
}

fn jinja_error_to_render_error(error: JinjaError) -> RenderError {
    let line = error.line();
    let message = error.to_string();

    if error.kind() == ErrorKind::UndefinedError {
        if let Some(name) = extract_quoted_name(&message) {
            return RenderError::UndefinedVariable(name);
        }
    }

    RenderError::Template { message, line }
}

/// Extract the first quoted name from an error message
fn extract_quoted_name(message: &str) -> Option<String> {
    let start = message.find('\'')?;
    let end = message[start + 1..].find('\'')?;
    Some(message[start + 1..start + 1 + end].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::TargetContext;
    use pretty_assertions::assert_eq;

    fn context() -> RenderContext {
        RenderContext::new(TargetContext {
            name: "dev".into(),
            database: "analytics".into(),
            schema: "dbt_dev".into(),
            target_type: "memory".into(),
        })
        .with_this("analytics.dbt_dev.fct_orders")
        .with_ref("stg_orders", "analytics.dbt_dev.stg_orders")
    }

    const INCREMENTAL: &str = "select * from {{ ref('stg_orders') }}\
{% if is_incremental() %} where updated_at > {{ watermark }}{% endif %}";

    #[test]
    fn test_has_jinja() {
        assert!(has_jinja("select * from {{ ref('table') }}"));
        assert!(has_jinja("{% set var = 'value' %}"));
        assert!(has_jinja("{# comment #}"));
        assert!(!has_jinja("select * from table"));
    }

    #[test]
    fn test_no_jinja_passthrough() {
        let sql = "select * from table";
        assert_eq!(render(sql, &context()).unwrap(), sql);
    }

    #[test]
    fn full_build_ignores_watermark() {
        let sql = render(INCREMENTAL, &context()).unwrap();
        assert_eq!(sql, "select * from analytics.dbt_dev.stg_orders");
    }

    #[test]
    fn incremental_build_injects_watermark() {
        let sql = render(INCREMENTAL, &context().with_watermark("'2024-03-01'")).unwrap();
        assert_eq!(
            sql,
            "select * from analytics.dbt_dev.stg_orders where updated_at > '2024-03-01'"
        );
    }

    #[test]
    fn source_target_and_vars() {
        let mut ctx = context();
        ctx.vars.insert("min_score".into(), serde_json::json!(10));

        let sql = render(
            "{{ config(materialized='view') }}select * from {{ source('stackoverflow', 'posts') }} \
where score >= {{ var('min_score') }} and env = '{{ target.name }}' -- {{ this }}",
            &ctx,
        )
        .unwrap();

        assert_eq!(
            sql,
            "select * from analytics.stackoverflow.posts where score >= 10 and env = 'dev' \
-- analytics.dbt_dev.fct_orders"
        );
    }

    #[test]
    fn unknown_ref_named() {
        let err = render("select * from {{ ref('customers') }}", &context()).unwrap_err();
        assert_eq!(err, RenderError::UnknownRef("customers".into()));
    }

    #[test]
    fn undefined_variable_is_an_error() {
        let err = render("select {{ missing_thing }}", &context()).unwrap_err();
        assert!(matches!(
            err,
            RenderError::UndefinedVariable(_) | RenderError::Template { .. }
        ));
    }

    #[test]
    fn test_jinja_comment_removal() {
        let sql = "{#- This is a comment -#}\nselect * from table";
        assert_eq!(render(sql, &context()).unwrap().trim(), "select * from table");
    }

    #[test]
    fn render_is_deterministic() {
        let ctx = context().with_watermark("42");
        assert_eq!(render(INCREMENTAL, &ctx).unwrap(), render(INCREMENTAL, &ctx).unwrap());
    }
}

//! SELECT evaluation for the in-memory engine
//!
//! Covers the subset unit templates need in tests and local runs: literal
//! rows, `*` and column projections with aliases, a single FROM relation,
//! WHERE predicates over comparisons, arithmetic and null checks,
//! `DISTINCT`, `LIMIT`/`OFFSET` and `UNION ALL`. Any other clause is
//! rejected as unsupported rather than ignored.

use serde_json::Value as JsonValue;
use sqlparser::ast::{
    BinaryOperator, Distinct, Expr, GroupByExpr, Query, Select, SelectItem, SetExpr, SetOperator,
    SetQuantifier, Statement, TableFactor, UnaryOperator, Value,
};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};
use crate::engine::EngineError;

/// One row: column name -> value
pub type Row = BTreeMap<String, JsonValue>;

/// Resolves relation names found in FROM clauses to their rows
pub(crate) trait RowSource {
    fn scan(&self, relation: &str, depth: usize) -> Result<Vec<Row>, EngineError>;
}

/// Parse `sql` as exactly one query statement
pub(crate) fn parse_query(sql: &str) -> Result<Box<Query>, EngineError> {
    let mut statements = Parser::parse_sql(&GenericDialect {}, sql)
        .map_err(|e| EngineError::Query(format!("Syntax error: {}", e)))?;

    if statements.len() != 1 {
        return Err(EngineError::Unsupported(format!(
            "expected one statement, found {}",
            statements.len()
        )));
    }

    match statements.remove(0) {
        Statement::Query(query) => Ok(query),
        other => Err(EngineError::Unsupported(format!("not a query: {}", other))),
    }
}

/// Evaluate a SELECT statement against `source`
pub(crate) fn evaluate(sql: &str, source: &dyn RowSource, depth: usize) -> Result<Vec<Row>, EngineError> {
    let query = parse_query(sql)?;
    evaluate_query(&query, source, depth)
}

fn evaluate_query(query: &Query, source: &dyn RowSource, depth: usize) -> Result<Vec<Row>, EngineError> {
    if query.with.is_some() {
        return Err(EngineError::Unsupported("WITH".to_string()));
    }
    if query.order_by.is_some() {
        return Err(EngineError::Unsupported("ORDER BY".to_string()));
    }
    if !query.limit_by.is_empty() || query.fetch.is_some() || !query.locks.is_empty() {
        return Err(EngineError::Unsupported(format!("query clause in: {}", query)));
    }

    let rows = evaluate_set_expr(&query.body, source, depth)?;

    let offset = match &query.offset {
        Some(offset) => row_count(&offset.value, "OFFSET")?,
        None => 0,
    };
    let limit = match &query.limit {
        Some(limit) => row_count(limit, "LIMIT")?,
        None => usize::MAX,
    };

    Ok(rows.into_iter().skip(offset).take(limit).collect())
}

/// A LIMIT or OFFSET operand
fn row_count(expr: &Expr, clause: &str) -> Result<usize, EngineError> {
    eval_expr(expr, &Row::new())?
        .as_u64()
        .and_then(|n| usize::try_from(n).ok())
        .ok_or_else(|| EngineError::Query(format!("{} expects a non-negative integer, got {}", clause, expr)))
}

fn evaluate_set_expr(body: &SetExpr, source: &dyn RowSource, depth: usize) -> Result<Vec<Row>, EngineError> {
    match body {
        SetExpr::Select(select) => evaluate_select(select, source, depth),
        SetExpr::Query(query) => evaluate_query(query, source, depth),
        SetExpr::SetOperation {
            op: SetOperator::Union,
            set_quantifier: SetQuantifier::All,
            left,
            right,
        } => {
            let mut rows = evaluate_set_expr(left, source, depth)?;
            rows.extend(evaluate_set_expr(right, source, depth)?);
            Ok(rows)
        }
        other => Err(EngineError::Unsupported(format!("query body: {}", other))),
    }
}

fn evaluate_select(select: &Select, source: &dyn RowSource, depth: usize) -> Result<Vec<Row>, EngineError> {
    if !matches!(&select.group_by, GroupByExpr::Expressions(exprs, ..) if exprs.is_empty()) {
        return Err(EngineError::Unsupported("GROUP BY".to_string()));
    }
    if select.having.is_some() || select.qualify.is_some() {
        return Err(EngineError::Unsupported("HAVING / QUALIFY".to_string()));
    }
    if select.top.is_some() {
        return Err(EngineError::Unsupported("TOP".to_string()));
    }
    let distinct = match &select.distinct {
        None => false,
        Some(Distinct::Distinct) => true,
        Some(other) => return Err(EngineError::Unsupported(other.to_string())),
    };

    let input = match select.from.as_slice() {
        [] => vec![Row::new()],
        [from] if from.joins.is_empty() => match &from.relation {
            TableFactor::Table { name, .. } => {
                let relation = name
                    .0
                    .iter()
                    .map(|ident| ident.value.as_str())
                    .collect::<Vec<_>>()
                    .join(".");
                source.scan(&relation, depth)?
            }
            TableFactor::Derived { subquery, .. } => evaluate_query(subquery, source, depth)?,
            other => return Err(EngineError::Unsupported(format!("FROM {}", other))),
        },
        _ => return Err(EngineError::Unsupported("joins".to_string())),
    };

    let mut output = Vec::new();
    for row in input {
        if let Some(predicate) = &select.selection {
            if !is_true(&eval_expr(predicate, &row)?) {
                continue;
            }
        }
        output.push(project(&select.projection, &row)?);
    }

    if distinct {
        // Rows serialize deterministically (BTreeMap), so the text is the identity
        let mut seen = HashSet::new();
        output.retain(|row| seen.insert(serde_json::to_string(row).unwrap_or_default()));
    }

    Ok(output)
}

fn project(items: &[SelectItem], row: &Row) -> Result<Row, EngineError> {
    let mut out = Row::new();

    for item in items {
        match item {
            SelectItem::Wildcard(_) | SelectItem::QualifiedWildcard(..) => {
                out.extend(row.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
            SelectItem::UnnamedExpr(expr) => {
                let name = match expr {
                    Expr::Identifier(ident) => ident.value.clone(),
                    Expr::CompoundIdentifier(parts) => parts
                        .last()
                        .map(|ident| ident.value.clone())
                        .unwrap_or_default(),
                    other => other.to_string(),
                };
                out.insert(name, eval_expr(expr, row)?);
            }
            SelectItem::ExprWithAlias { expr, alias } => {
                out.insert(alias.value.clone(), eval_expr(expr, row)?);
            }
        }
    }

    Ok(out)
}

fn eval_expr(expr: &Expr, row: &Row) -> Result<JsonValue, EngineError> {
    match expr {
        Expr::Identifier(ident) => lookup(row, &ident.value),
        Expr::CompoundIdentifier(parts) => match parts.last() {
            Some(ident) => lookup(row, &ident.value),
            None => Ok(JsonValue::Null),
        },
        Expr::Value(value) => literal(value),
        Expr::TypedString { value, .. } => Ok(JsonValue::String(value.clone())),
        Expr::Nested(inner) => eval_expr(inner, row),
        Expr::IsNull(inner) => Ok(JsonValue::Bool(eval_expr(inner, row)?.is_null())),
        Expr::IsNotNull(inner) => Ok(JsonValue::Bool(!eval_expr(inner, row)?.is_null())),
        Expr::UnaryOp { op, expr } => {
            let value = eval_expr(expr, row)?;
            match op {
                UnaryOperator::Minus => arithmetic(&JsonValue::from(0), &value, &BinaryOperator::Minus),
                UnaryOperator::Plus => Ok(value),
                UnaryOperator::Not => Ok(match value {
                    JsonValue::Null => JsonValue::Null,
                    other => JsonValue::Bool(!is_true(&other)),
                }),
                other => Err(EngineError::Unsupported(format!("operator {}", other))),
            }
        }
        Expr::BinaryOp { left, op, right } => {
            let left = eval_expr(left, row)?;
            let right = eval_expr(right, row)?;
            binary(&left, op, &right)
        }
        other => Err(EngineError::Unsupported(format!("expression {}", other))),
    }
}

fn lookup(row: &Row, column: &str) -> Result<JsonValue, EngineError> {
    row.get(column)
        .cloned()
        .ok_or_else(|| EngineError::Query(format!("Unrecognized name: {}", column)))
}

fn literal(value: &Value) -> Result<JsonValue, EngineError> {
    match value {
        Value::Number(text, _) => {
            if let Ok(int) = text.parse::<i64>() {
                Ok(JsonValue::from(int))
            } else {
                text.parse::<f64>()
                    .map(JsonValue::from)
                    .map_err(|_| EngineError::Query(format!("Invalid number: {}", text)))
            }
        }
        Value::SingleQuotedString(s) | Value::DoubleQuotedString(s) => Ok(JsonValue::String(s.clone())),
        Value::Boolean(b) => Ok(JsonValue::Bool(*b)),
        Value::Null => Ok(JsonValue::Null),
        other => Err(EngineError::Unsupported(format!("literal {}", other))),
    }
}

fn binary(left: &JsonValue, op: &BinaryOperator, right: &JsonValue) -> Result<JsonValue, EngineError> {
    match op {
        BinaryOperator::And => Ok(JsonValue::Bool(is_true(left) && is_true(right))),
        BinaryOperator::Or => Ok(JsonValue::Bool(is_true(left) || is_true(right))),
        BinaryOperator::Plus | BinaryOperator::Minus | BinaryOperator::Multiply | BinaryOperator::Divide => {
            arithmetic(left, right, op)
        }
        BinaryOperator::Eq
        | BinaryOperator::NotEq
        | BinaryOperator::Lt
        | BinaryOperator::LtEq
        | BinaryOperator::Gt
        | BinaryOperator::GtEq => {
            let Some(ordering) = compare_values(left, right) else {
                // Comparisons against NULL or across types are unknown
                return Ok(JsonValue::Null);
            };
            let result = match op {
                BinaryOperator::Eq => ordering == Ordering::Equal,
                BinaryOperator::NotEq => ordering != Ordering::Equal,
                BinaryOperator::Lt => ordering == Ordering::Less,
                BinaryOperator::LtEq => ordering != Ordering::Greater,
                BinaryOperator::Gt => ordering == Ordering::Greater,
                _ => ordering != Ordering::Less,
            };
            Ok(JsonValue::Bool(result))
        }
        other => Err(EngineError::Unsupported(format!("operator {}", other))),
    }
}

fn arithmetic(left: &JsonValue, right: &JsonValue, op: &BinaryOperator) -> Result<JsonValue, EngineError> {
    if left.is_null() || right.is_null() {
        return Ok(JsonValue::Null);
    }

    if let (Some(l), Some(r)) = (left.as_i64(), right.as_i64()) {
        let result = match op {
            BinaryOperator::Plus => l.checked_add(r),
            BinaryOperator::Minus => l.checked_sub(r),
            BinaryOperator::Multiply => l.checked_mul(r),
            _ => None,
        };
        if let Some(result) = result {
            return Ok(JsonValue::from(result));
        }
    }

    let (Some(l), Some(r)) = (left.as_f64(), right.as_f64()) else {
        return Err(EngineError::Query(format!(
            "No matching signature for {} between {} and {}",
            op, left, right
        )));
    };

    let result = match op {
        BinaryOperator::Plus => l + r,
        BinaryOperator::Minus => l - r,
        BinaryOperator::Multiply => l * r,
        _ if r == 0.0 => return Err(EngineError::Query("division by zero".to_string())),
        _ => l / r,
    };
    Ok(JsonValue::from(result))
}

fn is_true(value: &JsonValue) -> bool {
    matches!(value, JsonValue::Bool(true))
}

/// Order two cell values; `None` when either is null or the types differ
pub fn compare_values(left: &JsonValue, right: &JsonValue) -> Option<Ordering> {
    match (left, right) {
        (JsonValue::Number(l), JsonValue::Number(r)) => match (l.as_i64(), r.as_i64()) {
            (Some(l), Some(r)) => Some(l.cmp(&r)),
            _ => l.as_f64()?.partial_cmp(&r.as_f64()?),
        },
        (JsonValue::String(l), JsonValue::String(r)) => Some(l.cmp(r)),
        (JsonValue::Bool(l), JsonValue::Bool(r)) => Some(l.cmp(r)),
        _ => None,
    }
}

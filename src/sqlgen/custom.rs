//! Custom-SQL validation. The `custom_sql_check` escape hatch accepts a
//! single read-only SELECT; everything else is a Config error at plan
//! compile time.

use crate::error::{KontraError, KontraResult};
use sqlparser::ast::{visit_expressions, visit_relations, Expr, SetExpr, Statement};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;
use std::ops::ControlFlow;

/// Function names (and prefixes) with side effects or catalog access
fn prohibited_function(name: &str) -> bool {
    let lower = name.to_lowercase();
    lower.starts_with("pg_")
        || lower.starts_with("xp_")
        || lower.starts_with("sp_")
        || lower.starts_with("lo_")
        || lower.starts_with("read_")
        || matches!(
            lower.as_str(),
            "dblink" | "openrowset" | "opendatasource" | "glob" | "copy" | "sleep"
        )
}

/// Schemas that expose system catalogs
fn prohibited_schema(name: &str) -> bool {
    matches!(
        name.to_lowercase().as_str(),
        "pg_catalog" | "information_schema" | "sys"
    )
}

/// Validate a custom-SQL body (with the `{table}` placeholder still in
/// place). Rejects non-SELECT statements, multi-statement input,
/// SELECT INTO, system-catalog access, and side-effecting functions.
pub fn validate_custom_sql(sql: &str) -> KontraResult<()> {
    // The placeholder is not valid SQL; substitute a plain relation name
    // for parsing purposes only
    let parseable = sql.replace("{table}", "__kontra_target__");

    let statements = Parser::parse_sql(&GenericDialect {}, &parseable)
        .map_err(|e| KontraError::config(format!("custom_sql_check does not parse: {e}")))?;

    if statements.len() != 1 {
        return Err(KontraError::config(format!(
            "custom_sql_check must be a single statement, got {}",
            statements.len()
        )));
    }

    let query = match &statements[0] {
        Statement::Query(query) => query,
        other => {
            return Err(KontraError::config_hint(
                "custom_sql_check must be a read-only SELECT",
                format!("got: {other}"),
            ))
        }
    };

    if let SetExpr::Select(select) = query.body.as_ref() {
        if select.into.is_some() {
            return Err(KontraError::config(
                "custom_sql_check must not use SELECT INTO",
            ));
        }
    }

    let statement = &statements[0];

    let flow = visit_expressions(statement, |expr: &Expr| {
        if let Expr::Function(func) = expr {
            let name = func
                .name
                .0
                .last()
                .map(|part| part.to_string())
                .unwrap_or_default();
            let bare = name.trim_matches('"');
            if prohibited_function(bare) {
                return ControlFlow::Break(format!("prohibited function '{bare}'"));
            }
        }
        ControlFlow::Continue(())
    });
    if let ControlFlow::Break(reason) = flow {
        return Err(KontraError::config(format!("custom_sql_check: {reason}")));
    }

    let flow = visit_relations(statement, |name| {
        if name.0.len() > 1 {
            let schema = name.0[0].to_string();
            let bare = schema.trim_matches('"').to_string();
            if prohibited_schema(&bare) {
                return ControlFlow::Break(format!("prohibited schema '{bare}'"));
            }
        }
        ControlFlow::Continue(())
    });
    if let ControlFlow::Break(reason) = flow {
        return Err(KontraError::config(format!("custom_sql_check: {reason}")));
    }

    Ok(())
}

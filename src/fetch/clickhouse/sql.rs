//! Query synthesis for the ClickHouse backend.
//!
//! Everything dynamic here is structural (identifiers, derived expressions)
//! and therefore cannot go through parameter binding; string literals are
//! escaped before interpolation instead. Values typed by the user
//! (autocomplete substrings) are bound as named query parameters.

use std::collections::BTreeMap;

use crate::errors::EngineError;
use crate::model::source::{ColumnKind, Source, SourceColumn};

/// Escape a string literal for embedding in single quotes.
pub fn escape_string(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '\u{8}' => out.push_str("\\b"),
            '\u{c}' => out.push_str("\\f"),
            '\r' => out.push_str("\\r"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\0' => out.push_str("\\0"),
            '\u{7}' => out.push_str("\\a"),
            '\u{b}' => out.push_str("\\v"),
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            other => out.push(other),
        }
    }
    out
}

/// Quoted literal, or NULL.
pub fn quote_param(value: Option<&str>) -> String {
    match value {
        Some(value) => format!("'{}'", escape_string(value)),
        None => "NULL".to_string(),
    }
}

/// Restrict the primary time column (and, when declared, the coarser date
/// partition column) to the inclusive window.
pub fn time_clause(
    time_column: &str,
    date_column: Option<&str>,
    time_from: i64,
    time_to: i64,
) -> String {
    let date_clause = match date_column {
        Some(date_column) => format!(
            "{} BETWEEN toDate(fromUnixTimestamp64Milli({})) and toDate(fromUnixTimestamp64Milli({})) AND ",
            date_column, time_from, time_to
        ),
        None => String::new(),
    };
    format!(
        "{}{} BETWEEN fromUnixTimestamp64Milli({}) and fromUnixTimestamp64Milli({})",
        date_clause, time_column, time_from, time_to
    )
}

/// The timezone-normalized expression standing in for the time column in
/// projections and bucketing.
pub fn time_zone_expr(column: &SourceColumn) -> String {
    if column.kind.needs_datetime_cast() {
        format!("toTimeZone(toDateTime({}), 'UTC')", column.name)
    } else {
        format!("toTimeZone({}, 'UTC')", column.name)
    }
}

/// Every declared column in name order, with the time column swapped for its
/// timezone-normalized expression when its declared kind is timestamp-like.
pub fn projection(columns: &BTreeMap<String, SourceColumn>, time_column: &str) -> String {
    columns
        .values()
        .map(|column| {
            if column.name == time_column && column.kind.is_timestamp_like() {
                time_zone_expr(column)
            } else {
                column.name.clone()
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Backend expression deriving the group key for a (possibly dotted) column.
/// The column kind picks JSON sub-field extraction, map-key indexing or
/// array indexing; plain columns are cast to string.
pub fn group_by_expr(source: &Source, name: &str) -> Result<String, EngineError> {
    let root = name.split('.').next().unwrap_or(name);
    let column = source.column(root).ok_or_else(|| {
        EngineError::configuration(format!("unknown group-by column: {}", name))
    })?;

    if !name.contains('.') {
        return Ok(format!("toString({})", column.name));
    }

    let tail: Vec<&str> = name.split('.').skip(1).collect();
    if column.jsonstring {
        let path = tail
            .iter()
            .map(|part| quote_param(Some(part)))
            .collect::<Vec<_>>()
            .join(", ");
        return Ok(format!("JSONExtractString({}, {})", root, path));
    }
    match column.kind {
        ColumnKind::Map => Ok(format!("{}['{}']", root, escape_string(&tail.join(".")))),
        ColumnKind::Array => {
            let index: usize = tail.join(".").parse().map_err(|_| {
                EngineError::configuration(format!("invalid array index in group-by: {}", name))
            })?;
            Ok(format!("{}[{}]", root, index))
        }
        _ => Err(EngineError::configuration(format!(
            "column {} does not support nested group-by",
            name
        ))),
    }
}

/// Bucket-timestamp expression for the stats query: fixed-interval bucketing
/// for long windows, native per-record granularity for short ones.
pub fn stats_time_selector(column: &SourceColumn, interval_seconds: Option<i64>) -> String {
    let tz = time_zone_expr(column);
    match interval_seconds {
        Some(interval) => format!(
            "toUnixTimestamp(toStartOfInterval({}, toIntervalSecond({}))) * 1000",
            tz, interval
        ),
        None => match column.kind {
            ColumnKind::DateTime64 => format!("toUnixTimestamp64Milli({})", tz),
            _ => format!("toUnixTimestamp({}) * 1000", tz),
        },
    }
}

fn settings_clause(source: &Source) -> String {
    if source.clickhouse.settings.is_empty() {
        String::new()
    } else {
        format!(" SETTINGS {}", source.clickhouse.settings)
    }
}

/// An absent clause degenerates to an always-true predicate so composition
/// never special-cases arity.
fn or_true(clause: Option<String>) -> String {
    clause.unwrap_or_else(|| "1 = 1".to_string())
}

/// The row-fetch query: synthetic identity first, then the full projection,
/// newest rows first.
pub fn select_query(
    source: &Source,
    filter_clause: Option<String>,
    raw_clause: Option<String>,
    time_from: i64,
    time_to: i64,
    limit: usize,
) -> String {
    let clause = time_clause(
        &source.time_column,
        source.date_column.as_deref(),
        time_from,
        time_to,
    );
    format!(
        "SELECT generateUUIDv4(),{} FROM {} WHERE {} AND {} AND {} ORDER BY {} DESC LIMIT {}{}",
        projection(&source.columns, &source.time_column),
        source.target(),
        clause,
        or_true(filter_clause),
        or_true(raw_clause),
        source.time_column,
        limit,
        settings_clause(source),
    )
}

/// The stats query feeding the graph: bucket timestamp, count, optional
/// group expression, grouped and ordered by bucket.
pub fn stats_query(
    source: &Source,
    filter_clause: Option<String>,
    raw_clause: Option<String>,
    time_from: i64,
    time_to: i64,
    interval_seconds: Option<i64>,
    group_by: Option<(&str, &str)>,
) -> Result<String, EngineError> {
    let time_column = source.column(&source.time_column).ok_or_else(|| {
        EngineError::configuration(format!(
            "time column {} is not declared on source {}",
            source.time_column, source.name
        ))
    })?;
    let selector = stats_time_selector(time_column, interval_seconds);
    let clause = time_clause(
        &source.time_column,
        source.date_column.as_deref(),
        time_from,
        time_to,
    );

    let mut sql = format!("SELECT {} as t, COUNT() as Count", selector);
    if let Some((name, expr)) = group_by {
        sql.push_str(&format!(", {} as `{}`", expr, name));
    }
    sql.push_str(&format!(
        " FROM {} WHERE {} AND {} AND {} GROUP BY t",
        source.target(),
        clause,
        or_true(filter_clause),
        or_true(raw_clause),
    ));
    if let Some((name, _)) = group_by {
        sql.push_str(&format!(", `{}`", name));
    }
    sql.push_str(" ORDER BY t");
    sql.push_str(&settings_clause(source));
    Ok(sql)
}

/// Distinct values of one column inside the window, case-insensitive
/// substring match bound as a named parameter, capped.
pub fn autocomplete_query(source: &Source, column: &str, time_from: i64, time_to: i64, limit: usize) -> String {
    let clause = time_clause(
        &source.time_column,
        source.date_column.as_deref(),
        time_from,
        time_to,
    );
    format!(
        "SELECT DISTINCT {} FROM {} WHERE {} and {} ILIKE {{value:String}} ORDER BY {} LIMIT {}{}",
        column,
        source.target(),
        clause,
        column,
        column,
        limit,
        settings_clause(source),
    )
}

/// The schema probe against system.columns; database and table are bound as
/// parameters since they are values here, not identifiers.
pub fn schema_query() -> &'static str {
    "SELECT name, type FROM system.columns WHERE database = {database:String} AND table = {table:String} ORDER BY position"
}

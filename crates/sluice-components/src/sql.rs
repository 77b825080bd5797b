//! Row decoding and value binding shared by the SQL components

use anyhow::{bail, Result};
use sluice_common::{Record, Value};
use sqlx::any::{Any, AnyArguments, AnyRow};
use sqlx::query::Query;
use sqlx::{Column, Row, ValueRef};

pub type AnyQuery<'q> = Query<'q, Any, AnyArguments<'q>>;

/// Column names of a result row, in select order
pub fn column_names(row: &AnyRow) -> Vec<String> {
    row.columns().iter().map(|c| c.name().to_string()).collect()
}

/// Decode the value at `index` to the closest [`Value`]
pub fn decode_value(row: &AnyRow, index: usize) -> Result<Value> {
    if row.try_get_raw(index)?.is_null() {
        return Ok(Value::Null);
    }
    if let Ok(v) = row.try_get::<i64, _>(index) {
        return Ok(Value::Int(v));
    }
    if let Ok(v) = row.try_get::<i32, _>(index) {
        return Ok(Value::Int(i64::from(v)));
    }
    if let Ok(v) = row.try_get::<i16, _>(index) {
        return Ok(Value::Int(i64::from(v)));
    }
    if let Ok(v) = row.try_get::<f64, _>(index) {
        return Ok(Value::Float(v));
    }
    if let Ok(v) = row.try_get::<f32, _>(index) {
        return Ok(Value::Float(f64::from(v)));
    }
    if let Ok(v) = row.try_get::<String, _>(index) {
        return Ok(Value::Text(v));
    }
    if let Ok(v) = row.try_get::<bool, _>(index) {
        return Ok(Value::Bool(v));
    }
    if let Ok(v) = row.try_get::<Vec<u8>, _>(index) {
        return Ok(Value::Bytes(v));
    }

    let name = row
        .columns()
        .get(index)
        .map_or("?", |c| c.name());
    bail!("column '{}' has a type that cannot be decoded", name)
}

/// Decode a whole row into a record
pub fn decode_row(row: &AnyRow) -> Result<Record> {
    let mut record = Record::with_capacity(row.len());
    for (index, column) in row.columns().iter().enumerate() {
        record.insert(column.name(), decode_value(row, index)?);
    }
    Ok(record)
}

/// Bind one value; absent and null values bind as SQL NULL
pub fn bind_value<'q>(query: AnyQuery<'q>, value: Option<&Value>) -> AnyQuery<'q> {
    match value {
        None | Some(Value::Null) => query.bind(None::<String>),
        Some(Value::Bool(b)) => query.bind(*b),
        Some(Value::Int(i)) => query.bind(*i),
        Some(Value::Float(f)) => query.bind(*f),
        Some(Value::Text(s)) => query.bind(s.clone()),
        Some(Value::Bytes(b)) => query.bind(b.clone()),
    }
}

const FORBIDDEN_KEYWORDS: [&str; 8] = [
    "INSERT", "UPDATE", "DELETE", "DROP", "CREATE", "ALTER", "TRUNCATE", "EXEC",
];

/// Accept only read-only `SELECT` statements
pub fn ensure_read_only(query: &str) -> Result<()> {
    let upper = query.trim().to_uppercase();
    if !upper.starts_with("SELECT") {
        bail!("query must start with SELECT");
    }
    if let Some(keyword) = FORBIDDEN_KEYWORDS.iter().find(|k| upper.contains(*k)) {
        bail!("query must not contain {}", keyword);
    }
    Ok(())
}

//! PostgreSQL driver helpers

use rust_decimal::Decimal;
use sqlx::postgres::{PgArguments, PgColumn, PgConnection, PgRow, Postgres};
use sqlx::query::Query;
use sqlx::{Column, Executor, Row, Statement, TypeInfo, ValueRef};
use uuid::Uuid;

use crate::engine::error::{EngineError, EngineResult};
use crate::engine::types::{FieldInfo, Row as QRow, Value};

/// SQLSTATE for `syntax_error`
const SQLSTATE_SYNTAX_ERROR: &str = "42601";
/// SQLSTATE class 28: invalid authorization specification
const SQLSTATE_AUTH_CLASS: &str = "28";

/// Bind a Value to a Postgres query
pub(crate) fn bind_param<'q>(
    query: Query<'q, Postgres, PgArguments>,
    value: &'q Value,
) -> Query<'q, Postgres, PgArguments> {
    match value {
        Value::Null => query.bind(Option::<String>::None),
        Value::Bool(b) => query.bind(b),
        Value::Int(i) => query.bind(i),
        Value::Float(f) => query.bind(f),
        Value::Text(s) => query.bind(s),
        Value::Bytes(b) => query.bind(b),
        Value::Json(j) => query.bind(j),
        // Arrays travel as JSON; the server casts them where a target type is known
        Value::Array(items) => query.bind(serde_json::to_value(items).unwrap_or_default()),
    }
}

/// Builds the field descriptor for a result column.
pub(crate) fn field_info(col: &PgColumn) -> FieldInfo {
    let type_info = col.type_info();
    FieldInfo {
        name: col.name().to_string(),
        data_type_id: type_info.oid().map(|oid| oid.0).unwrap_or(0),
        data_type: type_info.name().to_string(),
    }
}

pub(crate) fn fields_of(row: &PgRow) -> Vec<FieldInfo> {
    row.columns().iter().map(field_info).collect()
}

/// Converts a SQLx row to a column → value mapping, in column order
pub(crate) fn convert_row(pg_row: &PgRow) -> QRow {
    pg_row
        .columns()
        .iter()
        .map(|col| (col.name().to_string(), extract_value(pg_row, col.ordinal())))
        .collect()
}

/// Extracts a value from a PgRow at the given index
///
/// Works for both wire formats: the simple protocol returns text values, the
/// extended protocol binary ones.
pub(crate) fn extract_value(row: &PgRow, idx: usize) -> Value {
    if let Ok(v) = row.try_get::<Option<i64>, _>(idx) {
        return v.map(Value::Int).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<i32>, _>(idx) {
        return v.map(|i| Value::Int(i as i64)).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<i16>, _>(idx) {
        return v.map(|i| Value::Int(i as i64)).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<bool>, _>(idx) {
        return v.map(Value::Bool).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<f64>, _>(idx) {
        return v.map(float_value).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<f32>, _>(idx) {
        return v.map(|f| float_value(f as f64)).unwrap_or(Value::Null);
    }
    // NUMERIC keeps its exact decimal text
    if let Ok(v) = row.try_get::<Option<Decimal>, _>(idx) {
        return v.map(|d| Value::Text(d.to_string())).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<Uuid>, _>(idx) {
        return v.map(|u| Value::Text(u.to_string())).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<String>, _>(idx) {
        return v.map(Value::Text).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<Vec<u8>>, _>(idx) {
        return v.map(Value::Bytes).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<serde_json::Value>, _>(idx) {
        return v.map(Value::Json).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(idx) {
        return v.map(|dt| Value::Text(dt.to_rfc3339())).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<chrono::NaiveDateTime>, _>(idx) {
        return v
            .map(|dt| Value::Text(dt.format("%Y-%m-%d %H:%M:%S%.f").to_string()))
            .unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<chrono::NaiveDate>, _>(idx) {
        return v
            .map(|d| Value::Text(d.format("%Y-%m-%d").to_string()))
            .unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<chrono::NaiveTime>, _>(idx) {
        return v
            .map(|t| Value::Text(t.format("%H:%M:%S%.f").to_string()))
            .unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<Vec<i64>>, _>(idx) {
        return v
            .map(|vals| Value::Array(vals.into_iter().map(Value::Int).collect()))
            .unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<Vec<i32>>, _>(idx) {
        return v
            .map(|vals| Value::Array(vals.into_iter().map(|i| Value::Int(i as i64)).collect()))
            .unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<Vec<Option<String>>>, _>(idx) {
        return v
            .map(|vals| {
                Value::Array(
                    vals.into_iter()
                        .map(|item| item.map(Value::Text).unwrap_or(Value::Null))
                        .collect(),
                )
            })
            .unwrap_or(Value::Null);
    }

    // Anything else (intervals, inet, enums, ranges...) is passed on as text
    if let Ok(raw) = row.try_get_raw(idx) {
        if raw.is_null() {
            return Value::Null;
        }
        if let Ok(text) = raw.as_str() {
            return Value::Text(text.to_string());
        }
        if let Ok(bytes) = raw.as_bytes() {
            if !bytes.is_empty() {
                return Value::Text(String::from_utf8_lossy(bytes).to_string());
            }
        }
    }
    Value::Null
}

fn float_value(f: f64) -> Value {
    if f.is_finite() {
        Value::Float(f)
    } else {
        Value::Text(f.to_string())
    }
}

/// Describes the result columns of a statement without running it.
pub(crate) async fn describe_fields(
    conn: &mut PgConnection,
    sql: &str,
) -> EngineResult<Vec<FieldInfo>> {
    let statement = conn.prepare(sql).await.map_err(map_statement_error)?;
    Ok(statement.columns().iter().map(field_info).collect())
}

/// Maps an error raised while running a statement.
pub(crate) fn map_statement_error(err: sqlx::Error) -> EngineError {
    if let sqlx::Error::Database(db) = &err {
        if db.code().as_deref() == Some(SQLSTATE_SYNTAX_ERROR) {
            return EngineError::syntax_error(db.message());
        }
        return EngineError::execution_error(db.message());
    }
    match err {
        sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::Io(_)
        | sqlx::Error::Tls(_) => map_connect_error(err, 0),
        other => {
            let msg = other.to_string();
            if msg.contains("syntax") {
                EngineError::syntax_error(msg)
            } else {
                EngineError::execution_error(msg)
            }
        }
    }
}

/// Maps an error raised while establishing or acquiring a connection.
pub(crate) fn map_connect_error(err: sqlx::Error, timeout_ms: u64) -> EngineError {
    match &err {
        sqlx::Error::PoolTimedOut => EngineError::Timeout { timeout_ms },
        sqlx::Error::Tls(_) => EngineError::ssl_error(err.to_string()),
        sqlx::Error::Database(db)
            if db
                .code()
                .map(|code| code.starts_with(SQLSTATE_AUTH_CLASS))
                .unwrap_or(false) =>
        {
            EngineError::auth_failed(db.message())
        }
        _ => {
            let msg = err.to_string();
            let lower = msg.to_ascii_lowercase();
            if lower.contains("password authentication failed") {
                EngineError::auth_failed(msg)
            } else if lower.contains("tls") || lower.contains("ssl") || lower.contains("certificate") {
                EngineError::ssl_error(msg)
            } else {
                EngineError::connection_failed(msg)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn pool_timeout_maps_to_timeout() {
        assert_eq!(
            map_connect_error(sqlx::Error::PoolTimedOut, 30_000),
            EngineError::Timeout { timeout_ms: 30_000 }
        );
    }

    #[test]
    fn protocol_messages_are_classified() {
        let err = sqlx::Error::Protocol(
            "password authentication failed for user \"app\"".to_string(),
        );
        assert!(matches!(
            map_connect_error(err, 0),
            EngineError::AuthenticationFailed { .. }
        ));

        let err = sqlx::Error::Io(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"));
        assert!(matches!(
            map_connect_error(err, 0),
            EngineError::ConnectionFailed { .. }
        ));
    }

    #[test]
    fn tls_errors_map_to_ssl() {
        let err = sqlx::Error::Tls("invalid peer certificate: UnknownIssuer".into());
        assert!(matches!(map_connect_error(err, 0), EngineError::SslError { .. }));
    }

    #[test]
    fn non_database_statement_errors() {
        let err = sqlx::Error::ColumnNotFound("missing".to_string());
        assert!(matches!(
            map_statement_error(err),
            EngineError::ExecutionError { .. }
        ));
        assert!(matches!(
            map_statement_error(sqlx::Error::PoolClosed),
            EngineError::ConnectionFailed { .. }
        ));
    }

    #[test]
    fn non_finite_floats_become_text() {
        assert_eq!(float_value(1.5), Value::Float(1.5));
        assert_eq!(float_value(f64::INFINITY), Value::Text("inf".to_string()));
    }
}

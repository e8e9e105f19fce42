// SPDX-License-Identifier: Apache-2.0

//! Data types shared by the pgdesk engine and its command layer.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::sensitive::Sensitive;

/// Unique identifier for a database session.
///
/// UUIDv7: a millisecond timestamp followed by random bits, so ids handed out
/// during one process lifetime never repeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Parses an id received from the UI. Malformed ids can never name a live
    /// session, so they are reported as unknown sessions.
    pub fn parse(raw: &str) -> EngineResult<Self> {
        Uuid::parse_str(raw.trim())
            .map(Self)
            .map_err(|_| EngineError::session_not_found(raw))
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Unique identifier for an open transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionId(pub Uuid);

impl TransactionId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn parse(raw: &str) -> EngineResult<Self> {
        Uuid::parse_str(raw.trim())
            .map(Self)
            .map_err(|_| EngineError::transaction_not_found(raw))
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

fn default_engine() -> String {
    "postgres".to_string()
}

fn default_port() -> u16 {
    5432
}

/// User-supplied connection descriptor.
///
/// The password is accepted from the UI but never serialized back out; the
/// profile store keeps it in the OS keychain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionProfile {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_engine")]
    pub engine: String,
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub database: String,
    pub username: String,
    #[serde(default, skip_serializing)]
    pub password: Sensitive<String>,
    #[serde(default)]
    pub ssl: bool,
    /// Encrypt without verifying the server certificate. Explicit opt-in.
    #[serde(default)]
    pub ssl_accept_invalid_certs: bool,
    #[serde(default)]
    pub cloud: Option<CloudSqlOptions>,
    #[serde(default)]
    pub pool_max_connections: Option<u32>,
    #[serde(default)]
    pub pool_connect_timeout_secs: Option<u32>,
    #[serde(default)]
    pub pool_idle_timeout_secs: Option<u32>,
}

impl ConnectionProfile {
    /// Minimal PostgreSQL profile, mostly useful in tests and tooling.
    pub fn postgres(
        host: impl Into<String>,
        port: u16,
        database: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            name: String::new(),
            engine: default_engine(),
            host: host.into(),
            port,
            database: database.into(),
            username: username.into(),
            password: Sensitive::new(password.into()),
            ssl: false,
            ssl_accept_invalid_certs: false,
            cloud: None,
            pool_max_connections: None,
            pool_connect_timeout_secs: None,
            pool_idle_timeout_secs: None,
        }
    }

    /// `user@host:port/database`
    pub fn display_name(&self) -> String {
        format!(
            "{}@{}:{}/{}",
            self.username, self.host, self.port, self.database
        )
    }

    /// Rejects profiles that cannot possibly connect.
    pub fn validate(&self) -> EngineResult<()> {
        if self.host.trim().is_empty() {
            return Err(EngineError::validation("host is required"));
        }
        if self.database.trim().is_empty() {
            return Err(EngineError::validation("database is required"));
        }
        if self.username.trim().is_empty() {
            return Err(EngineError::validation("username is required"));
        }
        if self.port == 0 {
            return Err(EngineError::validation("port must be between 1 and 65535"));
        }
        Ok(())
    }
}

/// Cloud-hosted PostgreSQL settings (Cloud SQL style).
///
/// Connections still go to the profile's host/port; the key file is only
/// loaded and checked.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CloudSqlOptions {
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub instance_name: Option<String>,
    #[serde(default)]
    pub service_account_key_path: Option<String>,
}

/// Universal value representation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(#[serde(with = "base64_bytes")] Vec<u8>),
    Json(serde_json::Value),
    Array(Vec<Value>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            Value::Json(serde_json::Value::String(s)) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::Json(serde_json::Value::Bool(b)) => Some(*b),
            // text-protocol booleans
            Value::Text(s) => match s.as_str() {
                "t" | "true" => Some(true),
                "f" | "false" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Json(v) => v.as_i64(),
            Value::Text(s) => s.parse().ok(),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

mod base64_bytes {
    use serde::{Deserialize, Deserializer, Serializer};
    use base64::{Engine, engine::general_purpose::STANDARD};

    pub fn serialize<S>(bytes: &Vec<u8>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}

/// Result column descriptor. `data_type_id` is the engine's type OID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldInfo {
    pub name: String,
    pub data_type_id: u32,
    pub data_type: String,
}

/// One result row: column name → value, in field order.
///
/// Serialized as a JSON object. A repeated column name keeps its first
/// position and takes the last value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    entries: Vec<(String, Value)>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
        }
    }

    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        match self.entries.iter_mut().find(|(key, _)| *key == name) {
            Some(slot) => slot.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(key, value)| (key.as_str(), value))
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(key, _)| key.as_str())
    }
}

impl FromIterator<(String, Value)> for Row {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        let mut row = Row::new();
        for (name, value) in iter {
            row.insert(name, value);
        }
        row
    }
}

impl Serialize for Row {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, value) in &self.entries {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Row {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct RowVisitor;

        impl<'de> Visitor<'de> for RowVisitor {
            type Value = Row;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of column names to values")
            }

            fn visit_map<A>(self, mut access: A) -> Result<Row, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut row = Row::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((key, value)) = access.next_entry::<String, Value>()? {
                    row.insert(key, value);
                }
                Ok(row)
            }
        }

        deserializer.deserialize_map(RowVisitor)
    }
}

/// Raw driver output for one statement (or the last row-producing statement
/// of a script).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryOutput {
    pub fields: Vec<FieldInfo>,
    pub rows: Vec<Row>,
    /// Command-tag row count (rows returned or rows affected)
    pub row_count: Option<u64>,
}

impl QueryOutput {
    pub fn new(fields: Vec<FieldInfo>, rows: Vec<Row>) -> Self {
        let row_count = Some(rows.len() as u64);
        Self {
            fields,
            rows,
            row_count,
        }
    }

    pub fn affected(count: u64) -> Self {
        Self {
            fields: Vec::new(),
            rows: Vec::new(),
            row_count: Some(count),
        }
    }
}

/// Query execution result as returned across the process boundary.
///
/// Routine SQL failures are reported here with `success: false` rather than
/// as errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub success: bool,
    pub rows: Vec<Row>,
    pub fields: Vec<FieldInfo>,
    pub row_count: Option<u64>,
    /// Wall-clock time in milliseconds, error paths included
    pub execution_time_ms: f64,
    pub error: Option<String>,
}

impl QueryResult {
    pub fn from_output(output: QueryOutput, execution_time_ms: f64) -> Self {
        Self {
            success: true,
            rows: output.rows,
            fields: output.fields,
            row_count: output.row_count,
            execution_time_ms,
            error: None,
        }
    }

    pub fn failure(error: &EngineError, execution_time_ms: f64) -> Self {
        Self {
            success: false,
            rows: Vec::new(),
            fields: Vec::new(),
            row_count: None,
            execution_time_ms,
            error: Some(error.to_string()),
        }
    }
}

/// Engine plan tree plus the wall-clock time needed to obtain it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryPlan {
    pub plan_tree: serde_json::Value,
    pub execution_time_ms: f64,
}

/// Driver metadata exposed to the frontend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverInfo {
    pub id: String,
    pub name: String,
    pub aliases: Vec<String>,
}

/// Summary of a live session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    pub id: String,
    pub display_name: String,
    pub engine: String,
    pub database: String,
    pub created_at: DateTime<Utc>,
    pub in_transaction: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_serializes_in_field_order() {
        let row = Row::new().with("z", 1i64).with("a", "x").with("m", Value::Null);
        let json = serde_json::to_string(&row).unwrap();
        assert_eq!(json, r#"{"z":1,"a":"x","m":null}"#);
    }

    #[test]
    fn row_repeated_column_keeps_position_and_last_value() {
        let row = Row::new().with("x", 1i64).with("y", 2i64).with("x", 3i64);
        assert_eq!(row.columns().collect::<Vec<_>>(), vec!["x", "y"]);
        assert_eq!(row.get("x"), Some(&Value::Int(3)));
    }

    #[test]
    fn row_deserializes_from_object() {
        let row: Row = serde_json::from_str(r#"{"b":true,"a":[1,2]}"#).unwrap();
        assert_eq!(row.columns().collect::<Vec<_>>(), vec!["b", "a"]);
        assert_eq!(row.get("b"), Some(&Value::Bool(true)));
    }

    #[test]
    fn profile_defaults_and_password_is_not_serialized() {
        let json = r#"{"host":"localhost","database":"test","username":"u","password":"p"}"#;
        let profile: ConnectionProfile = serde_json::from_str(json).unwrap();
        assert_eq!(profile.engine, "postgres");
        assert_eq!(profile.port, 5432);
        assert_eq!(profile.password.expose(), "p");
        assert!(!profile.ssl);

        let out = serde_json::to_string(&profile).unwrap();
        assert!(!out.contains("\"password\""));
        assert!(!format!("{:?}", profile).contains("\"p\""));
    }

    #[test]
    fn profile_validation() {
        let mut profile = ConnectionProfile::postgres("localhost", 5432, "test", "u", "p");
        assert!(profile.validate().is_ok());
        assert_eq!(profile.display_name(), "u@localhost:5432/test");

        profile.host = "  ".to_string();
        assert!(matches!(
            profile.validate(),
            Err(EngineError::ValidationError { .. })
        ));
    }

    #[test]
    fn ids_are_unique_and_parse_back() {
        let a = SessionId::new();
        let b = SessionId::new();
        assert_ne!(a, b);
        assert_eq!(SessionId::parse(&a.to_string()).unwrap(), a);
        assert!(matches!(
            SessionId::parse("s1"),
            Err(EngineError::SessionNotFound { .. })
        ));
        assert!(matches!(
            TransactionId::parse("nope"),
            Err(EngineError::TransactionNotFound { .. })
        ));
    }

    #[test]
    fn value_accessors() {
        assert_eq!(Value::from("t").as_bool(), Some(true));
        assert_eq!(Value::Int(7).as_i64(), Some(7));
        assert_eq!(Value::Json(serde_json::json!("x")).as_str(), Some("x"));
        assert!(Value::Null.is_null());
    }

    #[test]
    fn failed_query_result_keeps_timing() {
        let err = EngineError::syntax_error("syntax error at or near \"SELEC\"");
        let result = QueryResult::failure(&err, 1.5);
        assert!(!result.success);
        assert_eq!(result.execution_time_ms, 1.5);
        assert!(result.error.unwrap().contains("SELEC"));
    }
}

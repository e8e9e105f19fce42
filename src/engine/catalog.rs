//! Catalog (metadata) façade
//!
//! Each operation runs one fixed, parameterized catalog query on the session
//! pool and maps the rows into descriptors. Nothing is cached.
//!
//! The `database` argument is accepted for symmetry with the UI tree; the
//! queries always run against the database the session is connected to.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::instrument;

use crate::engine::descriptors::{
    ColumnDescriptor, ConstraintDescriptor, ConstraintKind, ForeignKeyAction,
    ForeignKeyDescriptor, IndexDescriptor, TableDescriptor, TableKind,
};
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::session_manager::SessionManager;
use crate::engine::types::{Row, SessionId, Value};

/// Catalog queries. Every output column is cast to a plain type so that it
/// decodes the same way regardless of server version.
pub(crate) mod sql {
    pub const DATABASES: &str = "SELECT datname::text AS name \
        FROM pg_catalog.pg_database \
        WHERE datistemplate = false \
        ORDER BY datname";

    pub const SCHEMAS: &str = "SELECT schema_name::text AS name \
        FROM information_schema.schemata \
        WHERE schema_name NOT LIKE 'pg\\_%' AND schema_name <> 'information_schema' \
        ORDER BY schema_name";

    pub const TABLES: &str = "SELECT table_name::text AS name, table_type::text AS table_type \
        FROM information_schema.tables \
        WHERE table_schema = $1 \
        ORDER BY table_type, table_name";

    pub const COLUMNS: &str = "SELECT column_name::text AS name, \
            data_type::text AS data_type, \
            (is_nullable = 'YES') AS nullable, \
            column_default::text AS default_value \
        FROM information_schema.columns \
        WHERE table_schema = $1 AND table_name = $2 \
        ORDER BY ordinal_position";

    pub const PRIMARY_KEY: &str = "SELECT a.attname::text AS name \
        FROM pg_catalog.pg_index i \
        JOIN pg_catalog.pg_attribute a ON a.attrelid = i.indrelid AND a.attnum = ANY(i.indkey) \
        JOIN pg_catalog.pg_class c ON c.oid = i.indrelid \
        JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace \
        WHERE i.indisprimary AND n.nspname = $1 AND c.relname = $2";

    pub const INDEXES: &str = "SELECT i.relname::text AS name, \
            am.amname::text AS method, \
            ix.indisunique AS is_unique, \
            ix.indisprimary AS is_primary, \
            to_json(array_agg(a.attname::text ORDER BY array_position(ix.indkey::int2[], a.attnum))) AS columns \
        FROM pg_catalog.pg_index ix \
        JOIN pg_catalog.pg_class i ON i.oid = ix.indexrelid \
        JOIN pg_catalog.pg_class t ON t.oid = ix.indrelid \
        JOIN pg_catalog.pg_namespace n ON n.oid = t.relnamespace \
        JOIN pg_catalog.pg_am am ON am.oid = i.relam \
        LEFT JOIN pg_catalog.pg_attribute a ON a.attrelid = t.oid AND a.attnum = ANY(ix.indkey) \
        WHERE n.nspname = $1 AND t.relname = $2 \
        GROUP BY i.relname, am.amname, ix.indisunique, ix.indisprimary \
        ORDER BY i.relname";

    pub const FOREIGN_KEYS: &str = "SELECT c.conname::text AS constraint_name, \
            col.attname::text AS column_name, \
            rel_nsp.nspname::text AS referenced_schema, \
            rel_tbl.relname::text AS referenced_table, \
            rel_col.attname::text AS referenced_column, \
            c.confupdtype::text AS update_code, \
            c.confdeltype::text AS delete_code \
        FROM pg_catalog.pg_constraint c \
        JOIN pg_catalog.pg_namespace nsp ON nsp.oid = c.connamespace \
        JOIN pg_catalog.pg_class tbl ON tbl.oid = c.conrelid \
        JOIN pg_catalog.pg_class rel_tbl ON rel_tbl.oid = c.confrelid \
        JOIN pg_catalog.pg_namespace rel_nsp ON rel_nsp.oid = rel_tbl.relnamespace \
        JOIN LATERAL unnest(c.conkey, c.confkey) AS k(attnum, ref_attnum) ON true \
        JOIN pg_catalog.pg_attribute col ON col.attrelid = tbl.oid AND col.attnum = k.attnum \
        JOIN pg_catalog.pg_attribute rel_col ON rel_col.attrelid = rel_tbl.oid AND rel_col.attnum = k.ref_attnum \
        WHERE c.contype = 'f' AND nsp.nspname = $1 AND tbl.relname = $2 \
        ORDER BY c.conname, col.attname";

    pub const CONSTRAINTS: &str = "SELECT c.conname::text AS name, \
            c.contype::text AS code, \
            pg_catalog.pg_get_constraintdef(c.oid) AS definition \
        FROM pg_catalog.pg_constraint c \
        JOIN pg_catalog.pg_namespace n ON n.oid = c.connamespace \
        JOIN pg_catalog.pg_class t ON t.oid = c.conrelid \
        WHERE n.nspname = $1 AND t.relname = $2 \
        ORDER BY c.contype, c.conname";
}

pub struct CatalogService {
    sessions: Arc<SessionManager>,
}

impl CatalogService {
    pub fn new(sessions: Arc<SessionManager>) -> Self {
        Self { sessions }
    }

    async fn fetch(&self, session_id: SessionId, query: &str, params: &[Value]) -> EngineResult<Vec<Row>> {
        let pool = self.sessions.pool(session_id).await?;
        let output = pool.query(query, params).await?;
        Ok(output.rows)
    }

    /// Non-template databases, by name
    #[instrument(skip(self), fields(session_id = %session_id))]
    pub async fn list_databases(&self, session_id: SessionId) -> EngineResult<Vec<String>> {
        let rows = self.fetch(session_id, sql::DATABASES, &[]).await?;
        rows.iter().map(|row| text(row, "name")).collect()
    }

    /// User schemas, by name
    #[instrument(skip(self), fields(session_id = %session_id))]
    pub async fn list_schemas(&self, session_id: SessionId, database: &str) -> EngineResult<Vec<String>> {
        let rows = self.fetch(session_id, sql::SCHEMAS, &[]).await?;
        rows.iter().map(|row| text(row, "name")).collect()
    }

    /// Tables before views, then by name
    #[instrument(skip(self), fields(session_id = %session_id))]
    pub async fn list_tables(
        &self,
        session_id: SessionId,
        database: &str,
        schema: &str,
    ) -> EngineResult<Vec<TableDescriptor>> {
        let rows = self.fetch(session_id, sql::TABLES, &[schema.into()]).await?;
        let mut tables = rows
            .iter()
            .map(|row| {
                Ok(TableDescriptor {
                    name: text(row, "name")?,
                    kind: TableKind::from_table_type(&text(row, "table_type")?),
                })
            })
            .collect::<EngineResult<Vec<_>>>()?;
        tables.sort_by(|a, b| a.kind.cmp(&b.kind).then_with(|| a.name.cmp(&b.name)));
        Ok(tables)
    }

    /// Columns in ordinal order, with primary-key membership
    #[instrument(skip(self), fields(session_id = %session_id))]
    pub async fn list_columns(
        &self,
        session_id: SessionId,
        database: &str,
        schema: &str,
        table: &str,
    ) -> EngineResult<Vec<ColumnDescriptor>> {
        let params = [Value::from(schema), Value::from(table)];
        let primary_key: HashSet<String> = self
            .fetch(session_id, sql::PRIMARY_KEY, &params)
            .await?
            .iter()
            .map(|row| text(row, "name"))
            .collect::<EngineResult<_>>()?;

        let rows = self.fetch(session_id, sql::COLUMNS, &params).await?;
        rows.iter()
            .map(|row| {
                let name = text(row, "name")?;
                Ok(ColumnDescriptor {
                    is_primary_key: primary_key.contains(&name),
                    name,
                    data_type: text(row, "data_type")?,
                    nullable: flag(row, "nullable"),
                    default_value: opt_text(row, "default_value"),
                })
            })
            .collect()
    }

    /// Indexes by name, key columns in index order
    #[instrument(skip(self), fields(session_id = %session_id))]
    pub async fn list_indexes(
        &self,
        session_id: SessionId,
        database: &str,
        schema: &str,
        table: &str,
    ) -> EngineResult<Vec<IndexDescriptor>> {
        let rows = self
            .fetch(session_id, sql::INDEXES, &[schema.into(), table.into()])
            .await?;
        rows.iter()
            .map(|row| {
                Ok(IndexDescriptor {
                    name: text(row, "name")?,
                    method: text(row, "method")?,
                    unique: flag(row, "is_unique"),
                    primary: flag(row, "is_primary"),
                    columns: text_list(row, "columns"),
                })
            })
            .collect()
    }

    /// Foreign keys by constraint name, then column
    #[instrument(skip(self), fields(session_id = %session_id))]
    pub async fn list_foreign_keys(
        &self,
        session_id: SessionId,
        database: &str,
        schema: &str,
        table: &str,
    ) -> EngineResult<Vec<ForeignKeyDescriptor>> {
        let rows = self
            .fetch(session_id, sql::FOREIGN_KEYS, &[schema.into(), table.into()])
            .await?;
        rows.iter()
            .map(|row| {
                Ok(ForeignKeyDescriptor {
                    constraint_name: text(row, "constraint_name")?,
                    column_name: text(row, "column_name")?,
                    referenced_schema: text(row, "referenced_schema")?,
                    referenced_table: text(row, "referenced_table")?,
                    referenced_column: text(row, "referenced_column")?,
                    on_update: ForeignKeyAction::from_code(&text(row, "update_code")?),
                    on_delete: ForeignKeyAction::from_code(&text(row, "delete_code")?),
                })
            })
            .collect()
    }

    /// Constraints by kind code, then name
    #[instrument(skip(self), fields(session_id = %session_id))]
    pub async fn list_constraints(
        &self,
        session_id: SessionId,
        database: &str,
        schema: &str,
        table: &str,
    ) -> EngineResult<Vec<ConstraintDescriptor>> {
        let rows = self
            .fetch(session_id, sql::CONSTRAINTS, &[schema.into(), table.into()])
            .await?;
        let mut constraints = Vec::with_capacity(rows.len());
        for row in &rows {
            constraints.push(ConstraintDescriptor {
                name: text(row, "name")?,
                kind: ConstraintKind::from_code(&text(row, "code")?),
                definition: opt_text(row, "definition").unwrap_or_default(),
            });
        }
        constraints.sort_by(|a, b| a.kind.cmp(&b.kind).then_with(|| a.name.cmp(&b.name)));
        Ok(constraints)
    }
}

fn text(row: &Row, column: &str) -> EngineResult<String> {
    opt_text(row, column).ok_or_else(|| {
        EngineError::internal(format!(
            "catalog column '{column}' is missing or not text: {:?}",
            row.get(column)
        ))
    })
}

fn opt_text(row: &Row, column: &str) -> Option<String> {
    row.get(column).and_then(Value::as_str).map(str::to_string)
}

fn flag(row: &Row, column: &str) -> bool {
    row.get(column).and_then(Value::as_bool).unwrap_or(false)
}

/// Reads a list of names from a JSON array, an array value or a `{a,b}`
/// array literal.
fn text_list(row: &Row, column: &str) -> Vec<String> {
    match row.get(column) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        Some(Value::Json(serde_json::Value::Array(items))) => items
            .iter()
            .filter_map(|item| item.as_str())
            .map(str::to_string)
            .collect(),
        Some(Value::Text(literal)) => literal
            .trim_start_matches('{')
            .trim_end_matches('}')
            .split(',')
            .map(|name| name.trim().trim_matches('"'))
            .filter(|name| !name.is_empty() && *name != "NULL")
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::drivers::memory::MemoryDriver;
    use crate::engine::types::{ConnectionProfile, QueryOutput};
    use crate::engine::DriverRegistry;
    use serde_json::json;

    async fn setup() -> (CatalogService, MemoryDriver, SessionId) {
        let driver = MemoryDriver::new();
        let mut registry = DriverRegistry::new();
        registry.register(Arc::new(driver.clone()));
        let sessions = Arc::new(SessionManager::new(Arc::new(registry)));

        let mut profile = ConnectionProfile::postgres("localhost", 5432, "app", "user", "pw");
        profile.engine = "memory".into();
        let session_id = sessions.connect(profile).await.unwrap();
        (CatalogService::new(sessions), driver, session_id)
    }

    fn rows(rows: Vec<Row>) -> QueryOutput {
        QueryOutput::new(vec![], rows)
    }

    #[tokio::test]
    async fn test_databases_and_schemas() {
        let (catalog, driver, session_id) = setup().await;
        driver.respond(
            sql::DATABASES,
            rows(vec![Row::new().with("name", "app"), Row::new().with("name", "postgres")]),
        );
        driver.respond(sql::SCHEMAS, rows(vec![Row::new().with("name", "public")]));

        assert_eq!(catalog.list_databases(session_id).await.unwrap(), vec!["app", "postgres"]);
        assert_eq!(catalog.list_schemas(session_id, "app").await.unwrap(), vec!["public"]);
    }

    #[tokio::test]
    async fn test_tables_sorted_by_kind_then_name() {
        let (catalog, driver, session_id) = setup().await;
        driver.respond(
            sql::TABLES,
            rows(vec![
                Row::new().with("name", "a").with("table_type", "VIEW"),
                Row::new().with("name", "b").with("table_type", "BASE TABLE"),
                Row::new().with("name", "a").with("table_type", "BASE TABLE"),
            ]),
        );

        let tables = catalog.list_tables(session_id, "app", "public").await.unwrap();
        let listed: Vec<_> = tables.iter().map(|t| (t.name.as_str(), t.kind)).collect();
        assert_eq!(
            listed,
            vec![("a", TableKind::Table), ("b", TableKind::Table), ("a", TableKind::View)]
        );
    }

    #[tokio::test]
    async fn test_columns_flag_primary_key() {
        let (catalog, driver, session_id) = setup().await;
        driver.respond(sql::PRIMARY_KEY, rows(vec![Row::new().with("name", "id")]));
        driver.respond(
            sql::COLUMNS,
            rows(vec![
                Row::new()
                    .with("name", "id")
                    .with("data_type", "integer")
                    .with("nullable", false)
                    .with("default_value", "nextval('users_id_seq'::regclass)"),
                Row::new()
                    .with("name", "email")
                    .with("data_type", "text")
                    .with("nullable", true)
                    .with("default_value", Value::Null),
            ]),
        );

        let columns = catalog.list_columns(session_id, "app", "public", "users").await.unwrap();
        assert_eq!(columns.len(), 2);
        assert!(columns[0].is_primary_key);
        assert!(!columns[0].nullable);
        assert!(columns[0].default_value.is_some());
        assert!(!columns[1].is_primary_key);
        assert!(columns[1].nullable);
        assert_eq!(columns[1].default_value, None);
    }

    #[tokio::test]
    async fn test_indexes_keep_key_order() {
        let (catalog, driver, session_id) = setup().await;
        driver.respond(
            sql::INDEXES,
            rows(vec![
                Row::new()
                    .with("name", "orders_pkey")
                    .with("method", "btree")
                    .with("is_unique", true)
                    .with("is_primary", true)
                    .with("columns", Value::Json(json!(["id"]))),
                Row::new()
                    .with("name", "orders_user_created_idx")
                    .with("method", "btree")
                    .with("is_unique", false)
                    .with("is_primary", false)
                    .with("columns", "{user_id,created_at}"),
            ]),
        );

        let indexes = catalog.list_indexes(session_id, "app", "public", "orders").await.unwrap();
        assert!(indexes[0].primary && indexes[0].unique);
        assert_eq!(indexes[0].columns, vec!["id"]);
        assert_eq!(indexes[1].columns, vec!["user_id", "created_at"]);
    }

    #[tokio::test]
    async fn test_foreign_keys_decode_actions() {
        let (catalog, driver, session_id) = setup().await;
        driver.respond(
            sql::FOREIGN_KEYS,
            rows(vec![Row::new()
                .with("constraint_name", "orders_user_id_fkey")
                .with("column_name", "user_id")
                .with("referenced_schema", "public")
                .with("referenced_table", "users")
                .with("referenced_column", "id")
                .with("update_code", "a")
                .with("delete_code", "c")]),
        );

        let fks = catalog.list_foreign_keys(session_id, "app", "public", "orders").await.unwrap();
        assert_eq!(fks.len(), 1);
        assert_eq!(fks[0].referenced_table, "users");
        assert_eq!(fks[0].on_update, ForeignKeyAction::NoAction);
        assert_eq!(fks[0].on_delete, ForeignKeyAction::Cascade);
    }

    #[tokio::test]
    async fn test_constraints_sorted_by_code_then_name() {
        let (catalog, driver, session_id) = setup().await;
        driver.respond(
            sql::CONSTRAINTS,
            rows(vec![
                Row::new().with("name", "orders_pkey").with("code", "p").with("definition", "PRIMARY KEY (id)"),
                Row::new().with("name", "orders_total_check").with("code", "c").with("definition", "CHECK ((total >= 0))"),
                Row::new().with("name", "orders_user_id_fkey").with("code", "f").with("definition", "FOREIGN KEY (user_id) REFERENCES users(id)"),
                Row::new().with("name", "weird").with("code", "z").with("definition", ""),
                Row::new().with("name", "orders_id_not_null").with("code", "n").with("definition", "NOT NULL id"),
            ]),
        );

        let constraints = catalog.list_constraints(session_id, "app", "public", "orders").await.unwrap();
        let kinds: Vec<_> = constraints.iter().map(|c| c.kind.clone()).collect();
        assert_eq!(
            kinds,
            vec![
                ConstraintKind::Check,
                ConstraintKind::ForeignKey,
                ConstraintKind::NotNull,
                ConstraintKind::PrimaryKey,
                ConstraintKind::Other("z".into()),
            ]
        );
        assert_eq!(constraints[4].name, "weird");
    }

    #[tokio::test]
    async fn test_unknown_session() {
        let (catalog, _driver, _session_id) = setup().await;
        let err = catalog.list_databases(SessionId::new()).await.unwrap_err();
        assert!(matches!(err, EngineError::SessionNotFound { .. }));
    }

    #[tokio::test]
    async fn test_malformed_row_is_internal_error() {
        let (catalog, driver, session_id) = setup().await;
        driver.respond(sql::DATABASES, rows(vec![Row::new().with("name", 42i64)]));
        let err = catalog.list_databases(session_id).await.unwrap_err();
        assert!(matches!(err, EngineError::Internal { .. }));
    }
}

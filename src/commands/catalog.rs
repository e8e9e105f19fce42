//! Catalog Commands
//!
//! Metadata browsing. Every command answers `{success, data?, error?}`.

use crate::commands::DataResponse;
use crate::engine::descriptors::{
    ColumnDescriptor, ConstraintDescriptor, ForeignKeyDescriptor, IndexDescriptor, TableDescriptor,
};
use crate::engine::types::SessionId;
use crate::AppState;

pub async fn list_databases(state: &AppState, session_id: String) -> DataResponse<Vec<String>> {
    let result = match SessionId::parse(&session_id) {
        Ok(id) => state.catalog.list_databases(id).await,
        Err(e) => Err(e),
    };
    result.into()
}

pub async fn list_schemas(
    state: &AppState,
    session_id: String,
    database: String,
) -> DataResponse<Vec<String>> {
    let result = match SessionId::parse(&session_id) {
        Ok(id) => state.catalog.list_schemas(id, &database).await,
        Err(e) => Err(e),
    };
    result.into()
}

pub async fn list_tables(
    state: &AppState,
    session_id: String,
    database: String,
    schema: String,
) -> DataResponse<Vec<TableDescriptor>> {
    let result = match SessionId::parse(&session_id) {
        Ok(id) => state.catalog.list_tables(id, &database, &schema).await,
        Err(e) => Err(e),
    };
    result.into()
}

pub async fn list_columns(
    state: &AppState,
    session_id: String,
    database: String,
    schema: String,
    table: String,
) -> DataResponse<Vec<ColumnDescriptor>> {
    let result = match SessionId::parse(&session_id) {
        Ok(id) => state.catalog.list_columns(id, &database, &schema, &table).await,
        Err(e) => Err(e),
    };
    result.into()
}

pub async fn list_indexes(
    state: &AppState,
    session_id: String,
    database: String,
    schema: String,
    table: String,
) -> DataResponse<Vec<IndexDescriptor>> {
    let result = match SessionId::parse(&session_id) {
        Ok(id) => state.catalog.list_indexes(id, &database, &schema, &table).await,
        Err(e) => Err(e),
    };
    result.into()
}

pub async fn list_foreign_keys(
    state: &AppState,
    session_id: String,
    database: String,
    schema: String,
    table: String,
) -> DataResponse<Vec<ForeignKeyDescriptor>> {
    let result = match SessionId::parse(&session_id) {
        Ok(id) => state.catalog.list_foreign_keys(id, &database, &schema, &table).await,
        Err(e) => Err(e),
    };
    result.into()
}

pub async fn list_constraints(
    state: &AppState,
    session_id: String,
    database: String,
    schema: String,
    table: String,
) -> DataResponse<Vec<ConstraintDescriptor>> {
    let result = match SessionId::parse(&session_id) {
        Ok(id) => state.catalog.list_constraints(id, &database, &schema, &table).await,
        Err(e) => Err(e),
    };
    result.into()
}

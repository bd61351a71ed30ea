//! Table and row endpoints.
//!
//! Every route here is scoped to the authenticated caller; table names and
//! row ids are validated by the engine, which also supplies the
//! snapshot-at-time and history semantics.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use notably_engine::{Column, Row, RowEvent, TableInfo};
use serde::{Deserialize, Serialize};

use crate::auth::AuthUser;
use crate::error::{AppError, Result};
use crate::AppState;

/// Create table routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/tables", get(list_tables).post(create_table))
        .route("/tables/{table}/rows", get(list_rows).post(insert_row))
        .route(
            "/tables/{table}/rows/{id}",
            get(get_row).put(update_row).delete(delete_row),
        )
        .route("/tables/{table}/snapshot", get(snapshot))
        .route("/tables/{table}/history", get(history))
}

#[derive(Debug, Deserialize)]
struct CreateTableRequest {
    name: String,
    #[serde(default)]
    columns: Vec<Column>,
}

#[derive(Debug, Serialize)]
struct TablesResponse {
    tables: Vec<TableInfo>,
}

#[derive(Debug, Deserialize)]
struct InsertRowRequest {
    id: Option<String>,
    values: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct UpdateRowRequest {
    values: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct RowsResponse {
    rows: Vec<Row>,
}

#[derive(Debug, Deserialize)]
struct SnapshotParams {
    at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HistoryParams {
    start: Option<String>,
    end: Option<String>,
}

#[derive(Debug, Serialize)]
struct EventsResponse {
    events: Vec<RowEvent>,
}

fn parse_time(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| AppError::BadRequest(format!("bad timestamp {raw:?}: {e}")))
}

/// GET /tables - list the caller's live tables.
async fn list_tables(State(state): State<AppState>, auth: AuthUser) -> Result<Json<TablesResponse>> {
    let tables = auth.tables(&state).list_tables().await?;
    Ok(Json(TablesResponse { tables }))
}

/// POST /tables - create (or re-define) a table.
async fn create_table(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(request): Json<CreateTableRequest>,
) -> Result<impl IntoResponse> {
    let table = auth
        .tables(&state)
        .create_table(&request.name, request.columns)
        .await?;
    Ok((StatusCode::CREATED, Json(table)))
}

/// GET /tables/{table}/rows - current live rows.
async fn list_rows(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(table): Path<String>,
) -> Result<Json<RowsResponse>> {
    let rows = auth.tables(&state).list_rows(&table).await?;
    Ok(Json(RowsResponse { rows }))
}

/// POST /tables/{table}/rows - write a row version.
async fn insert_row(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(table): Path<String>,
    Json(request): Json<InsertRowRequest>,
) -> Result<impl IntoResponse> {
    let row = auth
        .tables(&state)
        .insert_row(&table, request.id, request.values)
        .await?;
    Ok((StatusCode::CREATED, Json(row)))
}

/// GET /tables/{table}/rows/{id} - current version of one row.
async fn get_row(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((table, id)): Path<(String, String)>,
) -> Result<Json<Row>> {
    let row = auth.tables(&state).get_row(&table, &id).await?;
    Ok(Json(row))
}

/// PUT /tables/{table}/rows/{id} - write a new version of one row.
async fn update_row(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((table, id)): Path<(String, String)>,
    Json(request): Json<UpdateRowRequest>,
) -> Result<Json<Row>> {
    let row = auth
        .tables(&state)
        .update_row(&table, &id, request.values)
        .await?;
    Ok(Json(row))
}

/// DELETE /tables/{table}/rows/{id} - tombstone one row.
async fn delete_row(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((table, id)): Path<(String, String)>,
) -> Result<StatusCode> {
    auth.tables(&state).delete_row(&table, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /tables/{table}/snapshot?at=RFC3339 - live rows as of `at`.
async fn snapshot(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(table): Path<String>,
    Query(params): Query<SnapshotParams>,
) -> Result<Json<RowsResponse>> {
    let at = params
        .at
        .ok_or_else(|| AppError::BadRequest("missing 'at' query parameter".to_string()))?;
    let rows = auth
        .tables(&state)
        .snapshot_at(&table, parse_time(&at)?)
        .await?;
    Ok(Json(RowsResponse { rows }))
}

/// GET /tables/{table}/history?start=...&end=... - every change in a window.
async fn history(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(table): Path<String>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<EventsResponse>> {
    let start = params.start.as_deref().map(parse_time).transpose()?;
    let end = params.end.as_deref().map(parse_time).transpose()?;
    let events = auth.tables(&state).history(&table, start, end).await?;
    Ok(Json(EventsResponse { events }))
}

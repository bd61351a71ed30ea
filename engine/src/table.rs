//! Table service - the user-facing "tables of rows" abstraction.
//!
//! Nothing here has storage of its own. A table named `T` owned by user `U`
//! is a fact with `namespace = U`, `fieldName = T`, `dataType = table`; its
//! rows are JSON-typed facts under `namespace = "U/T"`, one fact per
//! (row, version). Row deletes are tombstone facts, so a table's full edit
//! history stays queryable forever.

use crate::codec::rfc3339_nanos;
use crate::error::{Error, Result};
use crate::fact::{Column, DataType, Fact};
use crate::snapshot;
use crate::store::{FactStore, QueryOptions};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

const MAX_NAME_LEN: usize = 255;

/// A live table, as reported by create/list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableInfo {
    pub name: String,
    #[serde(with = "rfc3339_nanos")]
    pub created_at: DateTime<Utc>,
    pub columns: Vec<Column>,
}

/// The current version of one row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Row {
    pub id: String,
    #[serde(with = "rfc3339_nanos")]
    pub timestamp: DateTime<Utc>,
    pub values: serde_json::Value,
}

/// What a history event did to its row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RowOp {
    Insert,
    Update,
    Delete,
}

/// One entry in a table's history stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowEvent {
    pub id: String,
    #[serde(with = "rfc3339_nanos")]
    pub timestamp: DateTime<Utc>,
    /// `None` for delete events.
    pub values: Option<serde_json::Value>,
    pub op: RowOp,
}

/// Validate a table name against `[A-Za-z0-9_-]{1,255}`.
pub fn validate_table_name(name: &str) -> Result<()> {
    let ok = !name.is_empty()
        && name.len() <= MAX_NAME_LEN
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if !ok {
        return Err(Error::InvalidArgument(format!(
            "table name {name:?} must match [A-Za-z0-9_-]{{1,{MAX_NAME_LEN}}}"
        )));
    }
    Ok(())
}

fn validate_row_id(id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(Error::InvalidArgument("row id must not be empty".into()));
    }
    crate::codec::validate_component("row id", id)
}

fn validate_columns(columns: &[Column]) -> Result<()> {
    for column in columns {
        if column.name.is_empty() {
            return Err(Error::InvalidArgument(
                "column name must not be empty".into(),
            ));
        }
        if !column.data_type.is_column_type() {
            return Err(Error::InvalidArgument(format!(
                "column {:?} has unsupported type {}",
                column.name, column.data_type
            )));
        }
    }
    Ok(())
}

fn row_not_found(table: &str, id: &str) -> Error {
    Error::NotFound(format!("row {id} in table {table}"))
}

/// Per-user table operations over a bound [`FactStore`].
#[derive(Clone)]
pub struct TableService {
    store: FactStore,
}

impl TableService {
    pub fn new(store: FactStore) -> Self {
        Self { store }
    }

    fn row_namespace(&self, table: &str) -> String {
        format!("{}/{table}", self.store.user())
    }

    /// Create a table, or re-define an existing one: both are versions of
    /// the same table-definition fact, and listing reports the latest.
    pub async fn create_table(&self, name: &str, columns: Vec<Column>) -> Result<TableInfo> {
        validate_table_name(name)?;
        validate_columns(&columns)?;

        // Chain onto the existing definition fact when there is one.
        let id = match self.table_fact_at(name, Utc::now()).await? {
            Some(prior) => prior.id,
            None => Uuid::new_v4().to_string(),
        };
        let mut fact = Fact::new(id, self.store.user(), name, DataType::Table, "");
        fact.columns = columns;
        let fact = self.store.put_fact(fact).await?;

        Ok(TableInfo {
            name: name.to_string(),
            created_at: fact.timestamp,
            columns: fact.columns,
        })
    }

    /// Live tables at "now", newest definition per name.
    pub async fn list_tables(&self) -> Result<Vec<TableInfo>> {
        let user_ns = self.store.user().to_string();
        let facts = self.store.snapshot_at(Some(&user_ns), Utc::now()).await?;
        Ok(snapshot::latest_by_field(facts)
            .into_values()
            .filter(|fact| fact.data_type == DataType::Table)
            .map(|fact| TableInfo {
                name: fact.field_name.clone(),
                created_at: fact.timestamp,
                columns: fact.columns,
            })
            .collect())
    }

    /// Write a row version; successive writes to the same id are the row's
    /// version chain. Synthesizes an id when the caller leaves it out.
    pub async fn insert_row(
        &self,
        table: &str,
        id: Option<String>,
        values: serde_json::Value,
    ) -> Result<Row> {
        self.require_table(table, Utc::now()).await?;
        let id = match id {
            Some(id) => {
                validate_row_id(&id)?;
                id
            }
            None => Uuid::new_v4().to_string(),
        };
        let payload = serde_json::to_string(&values)
            .map_err(|e| Error::InvalidArgument(format!("row values: {e}")))?;

        let fact = self
            .store
            .put_fact(Fact::new(
                id.clone(),
                self.row_namespace(table),
                id,
                DataType::Json,
                payload,
            ))
            .await?;

        Ok(Row {
            id: fact.id,
            timestamp: fact.timestamp,
            values,
        })
    }

    /// Identical wire shape to insert: a new version under the same id.
    pub async fn update_row(
        &self,
        table: &str,
        id: &str,
        values: serde_json::Value,
    ) -> Result<Row> {
        self.insert_row(table, Some(id.to_string()), values).await
    }

    /// Append a tombstone under the row's identity.
    pub async fn delete_row(&self, table: &str, id: &str) -> Result<()> {
        self.require_table(table, Utc::now()).await?;
        validate_row_id(id)?;
        let namespace = self.row_namespace(table);
        let latest = self
            .store
            .get_fact_in(&namespace, id)
            .await
            .map_err(|err| match err {
                Error::NotFound(_) => row_not_found(table, id),
                other => other,
            })?;
        if latest.is_deleted {
            return Err(row_not_found(table, id));
        }
        self.store.put_fact(Fact::tombstone_of(&latest)).await?;
        Ok(())
    }

    /// Current version of one row; a tombstoned row is absent.
    pub async fn get_row(&self, table: &str, id: &str) -> Result<Row> {
        self.require_table(table, Utc::now()).await?;
        validate_row_id(id)?;
        let namespace = self.row_namespace(table);
        let latest = self
            .store
            .get_fact_in(&namespace, id)
            .await
            .map_err(|err| match err {
                Error::NotFound(_) => row_not_found(table, id),
                other => other,
            })?;
        if latest.is_deleted {
            return Err(row_not_found(table, id));
        }
        Ok(Row {
            id: latest.field_name,
            timestamp: latest.timestamp,
            values: serde_json::from_str(&latest.value)
                .map_err(|e| Error::InvalidArgument(format!("row {id} payload: {e}")))?,
        })
    }

    /// Live rows at "now".
    pub async fn list_rows(&self, table: &str) -> Result<Vec<Row>> {
        self.snapshot_at(table, Utc::now()).await
    }

    /// Live rows as they stood at `at`.
    pub async fn snapshot_at(&self, table: &str, at: DateTime<Utc>) -> Result<Vec<Row>> {
        self.require_table(table, at).await?;
        let namespace = self.row_namespace(table);
        let facts = self.store.snapshot_at(Some(&namespace), at).await?;

        let rows = snapshot::latest_by_field(facts)
            .into_values()
            .filter_map(|fact| match serde_json::from_str(&fact.value) {
                Ok(values) => Some(Row {
                    id: fact.field_name,
                    timestamp: fact.timestamp,
                    values,
                }),
                Err(err) => {
                    tracing::warn!(%err, row = %fact.field_name, "skipping malformed row payload");
                    None
                }
            })
            .collect();
        Ok(rows)
    }

    /// Every fact in the window, tombstones included, in ascending time
    /// order. A tombstone reports `delete`; a write with no live
    /// predecessor in the window reports `insert` (a resurrected row starts
    /// over); everything else is `update`.
    pub async fn history(
        &self,
        table: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<RowEvent>> {
        self.require_table(table, end.unwrap_or_else(Utc::now)).await?;
        let namespace = self.row_namespace(table);

        let mut opts = QueryOptions {
            start_time: start,
            end_time: end,
            ..Default::default()
        };
        let mut facts = Vec::new();
        loop {
            let page = self.store.query_by_namespace(&namespace, opts.clone()).await?;
            facts.extend(page.facts);
            match page.next_token {
                Some(token) => opts.page_token = Some(token),
                None => break,
            }
        }

        let mut live: HashMap<String, bool> = HashMap::new();
        let mut events = Vec::with_capacity(facts.len());
        for fact in facts {
            let row_id = fact.field_name;
            if fact.is_deleted {
                live.insert(row_id.clone(), false);
                events.push(RowEvent {
                    id: row_id,
                    timestamp: fact.timestamp,
                    values: None,
                    op: RowOp::Delete,
                });
                continue;
            }

            let values = match serde_json::from_str(&fact.value) {
                Ok(values) => values,
                Err(err) => {
                    tracing::warn!(%err, row = %row_id, "skipping malformed row payload");
                    continue;
                }
            };
            let was_live = live.insert(row_id.clone(), true).unwrap_or(false);
            events.push(RowEvent {
                id: row_id,
                timestamp: fact.timestamp,
                values: Some(values),
                op: if was_live { RowOp::Update } else { RowOp::Insert },
            });
        }
        Ok(events)
    }

    /// Newest table-definition version at or before `at`, live or not.
    async fn table_fact_at(&self, name: &str, at: DateTime<Utc>) -> Result<Option<Fact>> {
        let page = self
            .store
            .query_by_field(
                self.store.user(),
                name,
                QueryOptions {
                    end_time: Some(at),
                    descending: true,
                    limit: Some(1),
                    ..Default::default()
                },
            )
            .await?;
        Ok(page.facts.into_iter().next())
    }

    async fn require_table(&self, name: &str, at: DateTime<Utc>) -> Result<Fact> {
        validate_table_name(name)?;
        match self.table_fact_at(name, at).await? {
            Some(fact) if fact.is_live() && fact.data_type == DataType::Table => Ok(fact),
            _ => Err(Error::NotFound(format!("table {name}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::{KvStore, MemoryKv};
    use crate::store::ensure_table;
    use serde_json::json;
    use std::sync::Arc;

    async fn service() -> TableService {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKv::new());
        ensure_table(kv.as_ref()).await.unwrap();
        TableService::new(FactStore::new(kv, "u1"))
    }

    #[test]
    fn table_names_are_validated() {
        assert!(validate_table_name("todo").is_ok());
        assert!(validate_table_name("To-Do_2").is_ok());
        assert!(validate_table_name("").is_err());
        assert!(validate_table_name("bad name!").is_err());
        assert!(validate_table_name("a#b").is_err());
        assert!(validate_table_name(&"x".repeat(256)).is_err());
    }

    #[tokio::test]
    async fn column_types_are_validated() {
        let svc = service().await;
        let err = svc
            .create_table(
                "todo",
                vec![Column {
                    name: "meta".to_string(),
                    data_type: DataType::Table,
                }],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));

        let err = svc
            .create_table(
                "todo",
                vec![Column {
                    name: String::new(),
                    data_type: DataType::String,
                }],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn recreating_a_table_keeps_one_listing_with_latest_columns() {
        let svc = service().await;
        svc.create_table(
            "todo",
            vec![Column {
                name: "title".to_string(),
                data_type: DataType::String,
            }],
        )
        .await
        .unwrap();
        svc.create_table(
            "todo",
            vec![Column {
                name: "done".to_string(),
                data_type: DataType::Boolean,
            }],
        )
        .await
        .unwrap();

        let tables = svc.list_tables().await.unwrap();
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].name, "todo");
        assert_eq!(tables[0].columns[0].name, "done");
    }

    #[tokio::test]
    async fn tables_without_columns_list_an_empty_set() {
        let svc = service().await;
        svc.create_table("notes", Vec::new()).await.unwrap();
        let tables = svc.list_tables().await.unwrap();
        assert_eq!(tables[0].columns, Vec::new());
    }

    #[tokio::test]
    async fn row_operations_require_an_existing_table() {
        let svc = service().await;
        for err in [
            svc.insert_row("ghost", None, json!({})).await.unwrap_err(),
            svc.get_row("ghost", "r1").await.unwrap_err(),
            svc.list_rows("ghost").await.unwrap_err(),
            svc.delete_row("ghost", "r1").await.unwrap_err(),
        ] {
            assert!(matches!(err, Error::NotFound(_)));
        }
    }

    #[tokio::test]
    async fn row_ids_reject_the_separator() {
        let svc = service().await;
        svc.create_table("todo", Vec::new()).await.unwrap();
        let err = svc
            .insert_row("todo", Some("a#b".to_string()), json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn missing_row_id_is_synthesized() {
        let svc = service().await;
        svc.create_table("todo", Vec::new()).await.unwrap();
        let row = svc
            .insert_row("todo", None, json!({"title": "x"}))
            .await
            .unwrap();
        assert!(!row.id.is_empty());
        let fetched = svc.get_row("todo", &row.id).await.unwrap();
        assert_eq!(fetched.values, json!({"title": "x"}));
    }
}

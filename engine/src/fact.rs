//! Fact types - the sole persistent entity.
//!
//! A fact is one immutable version of a logical record. Facts are only ever
//! appended; the current state of a record is the newest surviving fact for
//! its identity `(user, namespace, fieldName, id)`.

use crate::codec::rfc3339_nanos;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The value type carried by a fact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    String,
    Number,
    Boolean,
    Json,
    /// A table-definition fact; `columns` carries the schema advice.
    Table,
    /// A tombstone; hides earlier versions of the record.
    Deleted,
}

impl DataType {
    /// Stored attribute form.
    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::String => "string",
            DataType::Number => "number",
            DataType::Boolean => "boolean",
            DataType::Json => "json",
            DataType::Table => "table",
            DataType::Deleted => "deleted",
        }
    }

    /// Parse the stored attribute form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "string" => Some(DataType::String),
            "number" => Some(DataType::Number),
            "boolean" => Some(DataType::Boolean),
            "json" => Some(DataType::Json),
            "table" => Some(DataType::Table),
            "deleted" => Some(DataType::Deleted),
            _ => None,
        }
    }

    /// Whether this type is allowed as advisory column metadata.
    pub fn is_column_type(&self) -> bool {
        matches!(
            self,
            DataType::String | DataType::Number | DataType::Boolean | DataType::Json
        )
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Advisory column metadata attached to a table-definition fact.
///
/// Columns are never enforced against row payloads; they exist so that UIs
/// and clients can render a table sensibly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Column {
    pub name: String,
    pub data_type: DataType,
}

/// One immutable version of a logical record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fact {
    /// Caller-supplied identifier; versions of the same record share it.
    pub id: String,
    /// Wall-clock UTC at write time, nanosecond resolution.
    #[serde(with = "rfc3339_nanos")]
    pub timestamp: DateTime<Utc>,
    /// Tenant id (partition key).
    pub user: String,
    /// Logical grouping; `"user/table"` for table rows.
    pub namespace: String,
    /// Logical name within the namespace; the row id for table rows.
    pub field_name: String,
    pub data_type: DataType,
    /// Opaque string payload; serialized JSON for `DataType::Json`.
    pub value: String,
    /// Present only on table-definition facts.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub columns: Vec<Column>,
    /// Tombstone flag, consistent with `DataType::Deleted`.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_deleted: bool,
}

impl Fact {
    /// Create a non-tombstone fact stamped with the current wall clock.
    pub fn new(
        id: impl Into<String>,
        namespace: impl Into<String>,
        field_name: impl Into<String>,
        data_type: DataType,
        value: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            timestamp: Utc::now(),
            user: String::new(),
            namespace: namespace.into(),
            field_name: field_name.into(),
            data_type,
            value: value.into(),
            columns: Vec::new(),
            is_deleted: false,
        }
    }

    /// Create a tombstone for the same record identity, stamped now.
    pub fn tombstone_of(prior: &Fact) -> Self {
        Self {
            id: prior.id.clone(),
            timestamp: Utc::now(),
            user: prior.user.clone(),
            namespace: prior.namespace.clone(),
            field_name: prior.field_name.clone(),
            data_type: DataType::Deleted,
            value: String::new(),
            columns: Vec::new(),
            is_deleted: true,
        }
    }

    /// Check whether the fact is live (not a tombstone).
    pub fn is_live(&self) -> bool {
        !self.is_deleted
    }

    /// The record identity this fact is a version of, scoped within its user.
    pub fn record_key(&self) -> String {
        format!("{}#{}#{}", self.namespace, self.field_name, self.id)
    }
}

//! Capability-shaped wrapper over the backing key-value store.
//!
//! The adapter exposes exactly what the engine needs: create-table with a
//! composite primary key plus global secondary indexes, a readiness probe,
//! unconditional item puts, and a query shape covering partition + sort-key
//! range, an optional non-key equality filter, direction, limit, and opaque
//! continuation tokens. The adapter performs no semantic interpretation of
//! items; everything it stores and returns is an attribute map.
//!
//! Two implementations exist: [`DynamoKv`] over `aws-sdk-dynamodb`, and
//! [`MemoryKv`], an ordered in-memory map with the same observable query
//! semantics, used by the test suites.

mod dynamo;
mod memory;

pub use dynamo::DynamoKv;
pub use memory::MemoryKv;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

/// A single stored attribute value.
///
/// Only the shapes the physical layout uses are modeled: strings, numbers,
/// booleans, lists and maps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttrValue {
    S(String),
    N(String),
    Bool(bool),
    L(Vec<AttrValue>),
    M(HashMap<String, AttrValue>),
}

impl AttrValue {
    pub fn as_s(&self) -> Option<&str> {
        match self {
            AttrValue::S(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_n(&self) -> Option<&str> {
        match self {
            AttrValue::N(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttrValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_l(&self) -> Option<&[AttrValue]> {
        match self {
            AttrValue::L(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_m(&self) -> Option<&HashMap<String, AttrValue>> {
        match self {
            AttrValue::M(m) => Some(m),
            _ => None,
        }
    }
}

/// An item is an attribute map; the codec decides what the attributes mean.
pub type Item = HashMap<String, AttrValue>;

/// Physical table layout: string partition + string sort key, plus any
/// number of global secondary indexes over string partition keys.
#[derive(Debug, Clone, PartialEq)]
pub struct TableSchema {
    pub partition_key: String,
    pub sort_key: String,
    pub global_indexes: Vec<GsiSpec>,
}

/// One global secondary index.
#[derive(Debug, Clone, PartialEq)]
pub struct GsiSpec {
    pub name: String,
    pub partition_key: String,
    pub sort_key: String,
}

/// Parameters for a single query page.
///
/// `limit` bounds the number of items *examined* in key order before the
/// filter is applied (the backing store's semantics); when the scan stops at
/// the limit, `QueryPage::next_token` carries an opaque resume point that
/// callers pass back verbatim.
#[derive(Debug, Clone, Default)]
pub struct QueryRequest {
    /// Query a named GSI instead of the primary key.
    pub index: Option<String>,
    /// Partition key attribute and value.
    pub partition: (String, String),
    /// Inclusive lower/upper bounds on the sort key.
    pub sort_range: Option<SortRange>,
    /// Equality filters on non-key attributes, applied after the key scan.
    pub filters: Vec<(String, AttrValue)>,
    pub descending: bool,
    pub limit: Option<u32>,
    pub start_token: Option<String>,
}

/// Inclusive bounds on a sort-key attribute.
#[derive(Debug, Clone, PartialEq)]
pub struct SortRange {
    pub attribute: String,
    pub lower: String,
    pub upper: String,
}

/// One page of query results.
#[derive(Debug, Clone, Default)]
pub struct QueryPage {
    pub items: Vec<Item>,
    /// Present whenever the scan stopped before exhausting the key range.
    pub next_token: Option<String>,
}

/// Errors surfaced by the KV adapter.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum KvError {
    #[error("already exists")]
    AlreadyExists,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("throttled: {0}")]
    Throttled(String),

    #[error("transport: {0}")]
    Transport(String),
}

/// The capability the engine requires of its backing store.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Create the physical table. `KvError::AlreadyExists` signals an
    /// idempotent re-run, which bootstrap callers swallow.
    async fn create_table(&self, schema: &TableSchema) -> Result<(), KvError>;

    /// Block until the table is ready to serve, up to `timeout`.
    async fn await_ready(&self, timeout: Duration) -> Result<(), KvError>;

    /// Write one item unconditionally.
    async fn put_item(&self, item: Item) -> Result<(), KvError>;

    /// Fetch one page of items.
    async fn query(&self, req: QueryRequest) -> Result<QueryPage, KvError>;
}

/// Encode a last-evaluated key as an opaque continuation token.
pub(crate) fn encode_token(key: &Item) -> Result<String, KvError> {
    serde_json::to_string(key).map_err(|e| KvError::Transport(format!("token encode: {e}")))
}

/// Decode a continuation token back into a key map.
pub(crate) fn decode_token(token: &str) -> Result<Item, KvError> {
    serde_json::from_str(token).map_err(|e| KvError::Transport(format!("bad continuation token: {e}")))
}

//! # Notably Engine
//!
//! The core of Notably, a multi-tenant, time-versioned record store built
//! over an external key-value service with composite primary keys and a
//! global secondary index.
//!
//! ## Design Principles
//!
//! - **Append-only**: every mutation is an immutable fact; nothing is ever
//!   updated or physically deleted
//! - **Derived state**: current rows, snapshots and histories are folds over
//!   the fact log, not materialized views
//! - **Tenant-scoped**: a [`FactStore`] is bound to one user and cannot read
//!   or write outside that partition
//! - **Capability-shaped IO**: the engine only sees the small [`kv::KvStore`]
//!   trait, so the whole core runs against an in-memory store in tests
//!
//! ## Core Concepts
//!
//! ### Facts
//!
//! A [`Fact`] is one version of a logical record, identified by
//! `(user, namespace, fieldName, id)`. The newest surviving fact is the
//! record's current version; a tombstone ([`Fact::is_deleted`]) hides all
//! earlier versions, and a later write resurrects the record.
//!
//! ### Tables
//!
//! The [`TableService`] maps a "tables of rows" abstraction onto facts: a
//! table is a distinguished fact under the user's own namespace, and each
//! row version is a JSON-typed fact under `"user/table"`. Snapshots answer
//! "what did this table look like at `t`", histories stream every change in
//! a window with inferred insert/update/delete ops.
//!
//! ### Auth
//!
//! The [`AuthBinder`] keeps accounts and API keys as facts under a reserved
//! partition and resolves a bearer key to a user-bound [`FactStore`].
//!
//! ## Quick Start
//!
//! ```rust
//! use notably_engine::{ensure_table, FactStore, TableService};
//! use notably_engine::kv::{KvStore, MemoryKv};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), notably_engine::Error> {
//! let kv: Arc<dyn KvStore> = Arc::new(MemoryKv::new());
//! ensure_table(kv.as_ref()).await?;
//!
//! let tables = TableService::new(FactStore::new(kv, "u1"));
//! tables.create_table("todo", vec![]).await?;
//! let row = tables
//!     .insert_row("todo", None, json!({"title": "buy milk", "done": false}))
//!     .await?;
//!
//! let current = tables.get_row("todo", &row.id).await?;
//! assert_eq!(current.values["title"], "buy milk");
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod codec;
pub mod error;
pub mod fact;
pub mod kv;
pub mod snapshot;
pub mod store;
pub mod table;

// Re-export main types at crate root
pub use auth::{ApiKeyInfo, AuthBinder, Identity, IssuedKey, Session};
pub use error::{Error, Result};
pub use fact::{Column, DataType, Fact};
pub use store::{ensure_table, FactPage, FactStore, QueryOptions};
pub use table::{Row, RowEvent, RowOp, TableInfo, TableService};

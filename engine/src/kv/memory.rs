//! In-memory implementation of the KV capability.
//!
//! Backed by an ordered map keyed on the primary (partition, sort) pair.
//! Query semantics deliberately match the DynamoDB adapter: `limit` bounds
//! items examined before filters run, continuation tokens mark the last
//! examined key, sort-range bounds are inclusive, and GSI queries only see
//! items carrying both index attributes.

use super::{
    decode_token, encode_token, AttrValue, Item, KvError, KvStore, QueryPage, QueryRequest,
    TableSchema,
};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

#[derive(Default)]
struct State {
    schema: Option<TableSchema>,
    items: BTreeMap<(String, String), Item>,
}

/// Ordered in-memory [`KvStore`], used by the engine test suites.
#[derive(Default)]
pub struct MemoryKv {
    state: Mutex<State>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    fn locked(&self) -> Result<std::sync::MutexGuard<'_, State>, KvError> {
        self.state
            .lock()
            .map_err(|_| KvError::Transport("memory kv lock poisoned".to_string()))
    }
}

fn string_attr(item: &Item, name: &str) -> Option<String> {
    item.get(name).and_then(AttrValue::as_s).map(str::to_string)
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn create_table(&self, schema: &TableSchema) -> Result<(), KvError> {
        let mut state = self.locked()?;
        if state.schema.is_some() {
            return Err(KvError::AlreadyExists);
        }
        state.schema = Some(schema.clone());
        Ok(())
    }

    async fn await_ready(&self, _timeout: Duration) -> Result<(), KvError> {
        let state = self.locked()?;
        if state.schema.is_some() {
            Ok(())
        } else {
            Err(KvError::NotFound("table not created".to_string()))
        }
    }

    async fn put_item(&self, item: Item) -> Result<(), KvError> {
        let mut state = self.locked()?;
        let schema = state
            .schema
            .as_ref()
            .ok_or_else(|| KvError::NotFound("table not created".to_string()))?;

        let pk = string_attr(&item, &schema.partition_key)
            .ok_or_else(|| KvError::Transport("item missing partition key".to_string()))?;
        let sk = string_attr(&item, &schema.sort_key)
            .ok_or_else(|| KvError::Transport("item missing sort key".to_string()))?;
        state.items.insert((pk, sk), item);
        Ok(())
    }

    async fn query(&self, req: QueryRequest) -> Result<QueryPage, KvError> {
        let state = self.locked()?;
        let schema = state
            .schema
            .as_ref()
            .ok_or_else(|| KvError::NotFound("table not created".to_string()))?;

        let (part_attr, sort_attr) = match &req.index {
            None => (schema.partition_key.clone(), schema.sort_key.clone()),
            Some(name) => {
                let gsi = schema
                    .global_indexes
                    .iter()
                    .find(|g| &g.name == name)
                    .ok_or_else(|| KvError::NotFound(format!("index {name}")))?;
                (gsi.partition_key.clone(), gsi.sort_key.clone())
            }
        };
        let (req_part_attr, part_value) = &req.partition;
        if req_part_attr != &part_attr {
            return Err(KvError::Transport(format!(
                "partition attribute {req_part_attr} does not key this index"
            )));
        }

        // Candidates in sort order; a GSI only indexes items with both attrs.
        let mut candidates: Vec<(String, Item)> = state
            .items
            .values()
            .filter(|item| string_attr(item, &part_attr).as_deref() == Some(part_value))
            .filter_map(|item| string_attr(item, &sort_attr).map(|sk| (sk, item.clone())))
            .collect();
        candidates.sort_by(|a, b| a.0.cmp(&b.0));
        if req.descending {
            candidates.reverse();
        }

        if let Some(range) = &req.sort_range {
            if range.attribute != sort_attr {
                return Err(KvError::Transport(format!(
                    "sort attribute {} does not key this index",
                    range.attribute
                )));
            }
            candidates.retain(|(sk, _)| sk >= &range.lower && sk <= &range.upper);
        }

        if let Some(token) = &req.start_token {
            let last = decode_token(token)?;
            let last_sk = string_attr(&last, &sort_attr)
                .ok_or_else(|| KvError::Transport("bad continuation token".to_string()))?;
            candidates.retain(|(sk, _)| {
                if req.descending {
                    sk < &last_sk
                } else {
                    sk > &last_sk
                }
            });
        }

        // Limit bounds items examined, before filters.
        let mut truncated = false;
        if let Some(limit) = req.limit {
            if candidates.len() > limit as usize {
                candidates.truncate(limit as usize);
                truncated = true;
            }
        }

        let next_token = if truncated {
            let (last_sk, _) = candidates
                .last()
                .ok_or_else(|| KvError::Transport("empty truncated page".to_string()))?;
            let mut key = Item::new();
            key.insert(part_attr.clone(), AttrValue::S(part_value.clone()));
            key.insert(sort_attr.clone(), AttrValue::S(last_sk.clone()));
            Some(encode_token(&key)?)
        } else {
            None
        };

        let items = candidates
            .into_iter()
            .map(|(_, item)| item)
            .filter(|item| {
                req.filters
                    .iter()
                    .all(|(attr, value)| item.get(attr) == Some(value))
            })
            .collect();

        Ok(QueryPage { items, next_token })
    }
}

//! Fact store - the write path, point reads and the query shapes.
//!
//! A [`FactStore`] is bound to one owning user; every operation it performs
//! is scoped to that user's partition. Facts are append-only: the store
//! never updates or physically deletes an item, and "deletes" are ordinary
//! tombstone facts.

use crate::codec::{self, ATTR_FIELD_KEY, ATTR_ID, ATTR_NAMESPACE, ATTR_SORT_KEY, ATTR_USER_ID};
use crate::error::{Error, Result};
use crate::fact::Fact;
use crate::kv::{AttrValue, KvError, KvStore, QueryRequest, SortRange};
use crate::snapshot;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

/// Ceiling on the table-readiness wait during bootstrap.
pub const READY_TIMEOUT: Duration = Duration::from_secs(300);

/// Idempotently create the shared physical table and wait until it serves.
pub async fn ensure_table(kv: &dyn KvStore) -> Result<()> {
    match kv.create_table(&codec::table_schema()).await {
        Ok(()) => {}
        // Re-running bootstrap against an existing table is expected.
        Err(KvError::AlreadyExists) => {}
        Err(err) => return Err(Error::backend("ensure_table", err)),
    }
    kv.await_ready(READY_TIMEOUT)
        .await
        .map_err(|err| Error::backend("ensure_table", err))
}

/// Options shared by the query shapes.
///
/// A missing start bound means the Unix epoch; a missing end bound means
/// "now". `page_token` is the opaque token from a previous page, passed back
/// verbatim.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub descending: bool,
    pub limit: Option<u32>,
    pub page_token: Option<String>,
}

impl QueryOptions {
    /// Bounds covering `[epoch, at]`.
    pub fn until(at: DateTime<Utc>) -> Self {
        Self {
            end_time: Some(at),
            ..Self::default()
        }
    }
}

/// One page of facts, in the requested order.
#[derive(Debug, Clone, Default)]
pub struct FactPage {
    pub facts: Vec<Fact>,
    pub next_token: Option<String>,
}

/// The core engine, bound to one owning user.
#[derive(Clone)]
pub struct FactStore {
    kv: Arc<dyn KvStore>,
    user: String,
}

impl FactStore {
    pub fn new(kv: Arc<dyn KvStore>, user: impl Into<String>) -> Self {
        Self {
            kv,
            user: user.into(),
        }
    }

    /// The user every operation is scoped to.
    pub fn user(&self) -> &str {
        &self.user
    }

    /// Append one fact. `fact.user` defaults to the bound user; `fact.id`
    /// must be non-empty. Multiple facts sharing an id at different
    /// timestamps are distinct versions of one record.
    pub async fn put_fact(&self, mut fact: Fact) -> Result<Fact> {
        if fact.id.is_empty() {
            return Err(Error::InvalidArgument("fact id must not be empty".into()));
        }
        if fact.user.is_empty() {
            fact.user = self.user.clone();
        }
        let item = codec::encode(&fact)?;
        self.kv
            .put_item(item)
            .await
            .map_err(|err| Error::backend("put_fact", err))?;
        Ok(fact)
    }

    /// Latest fact (by timestamp) matching `id` within the bound user.
    /// Tombstones are returned as-is; callers decide what they mean.
    pub async fn get_fact(&self, id: &str) -> Result<Fact> {
        self.latest_matching(
            "get_fact",
            vec![(ATTR_ID.to_string(), AttrValue::S(id.to_string()))],
        )
        .await?
        .ok_or_else(|| Error::NotFound(format!("fact {id}")))
    }

    /// Latest fact matching `id` within one namespace. Distinct namespaces
    /// may reuse ids, so namespace-scoped callers must not use the bare
    /// [`FactStore::get_fact`].
    pub async fn get_fact_in(&self, namespace: &str, id: &str) -> Result<Fact> {
        self.latest_matching(
            "get_fact",
            vec![
                (ATTR_ID.to_string(), AttrValue::S(id.to_string())),
                (
                    ATTR_NAMESPACE.to_string(),
                    AttrValue::S(namespace.to_string()),
                ),
            ],
        )
        .await?
        .ok_or_else(|| Error::NotFound(format!("fact {id} in {namespace}")))
    }

    /// Append a tombstone for the record `id` currently resolves to.
    pub async fn delete_fact(&self, id: &str) -> Result<Fact> {
        let latest = self.get_fact(id).await?;
        self.put_fact(Fact::tombstone_of(&latest)).await
    }

    /// All versions of one field, via the field index. Includes tombstones.
    pub async fn query_by_field(
        &self,
        namespace: &str,
        field_name: &str,
        opts: QueryOptions,
    ) -> Result<FactPage> {
        let sort_range = self.resolve_range(&opts)?;
        self.run_query(
            "query_by_field",
            QueryRequest {
                index: Some(codec::FIELD_INDEX.to_string()),
                partition: (
                    ATTR_FIELD_KEY.to_string(),
                    codec::field_key(&self.user, namespace, field_name),
                ),
                sort_range,
                filters: Vec::new(),
                descending: opts.descending,
                limit: opts.limit,
                start_token: opts.page_token,
            },
        )
        .await
    }

    /// Every fact the user wrote in `[start, end]`, across namespaces.
    pub async fn query_by_time_range(&self, opts: QueryOptions) -> Result<FactPage> {
        let sort_range = self.resolve_range(&opts)?;
        self.run_query(
            "query_by_time_range",
            QueryRequest {
                index: None,
                partition: (ATTR_USER_ID.to_string(), self.user.clone()),
                sort_range,
                filters: Vec::new(),
                descending: opts.descending,
                limit: opts.limit,
                start_token: opts.page_token,
            },
        )
        .await
    }

    /// Every fact in one namespace in `[start, end]`.
    pub async fn query_by_namespace(
        &self,
        namespace: &str,
        opts: QueryOptions,
    ) -> Result<FactPage> {
        let sort_range = self.resolve_range(&opts)?;
        self.run_query(
            "query_by_namespace",
            QueryRequest {
                index: None,
                partition: (ATTR_USER_ID.to_string(), self.user.clone()),
                sort_range,
                filters: vec![(
                    ATTR_NAMESPACE.to_string(),
                    AttrValue::S(namespace.to_string()),
                )],
                descending: opts.descending,
                limit: opts.limit,
                start_token: opts.page_token,
            },
        )
        .await
    }

    /// Reconstruct the live facts for `namespace` (or every namespace when
    /// `None`) as seen at `at`. Linear in the fact count up to `at`; there
    /// is no materialized view.
    pub async fn snapshot_at(
        &self,
        namespace: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<Vec<Fact>> {
        let mut opts = QueryOptions::until(at);
        let mut facts = Vec::new();
        loop {
            let page = match namespace {
                Some(ns) => self.query_by_namespace(ns, opts.clone()).await?,
                None => self.query_by_time_range(opts.clone()).await?,
            };
            facts.extend(page.facts);
            match page.next_token {
                Some(token) => opts.page_token = Some(token),
                None => break,
            }
        }
        Ok(snapshot::reduce(facts).into_values().collect())
    }

    /// Descending scan of the user partition until the first item passing
    /// `filters`, paging past filtered-out items.
    async fn latest_matching(
        &self,
        op: &'static str,
        filters: Vec<(String, AttrValue)>,
    ) -> Result<Option<Fact>> {
        let mut token = None;
        loop {
            let page = self
                .kv
                .query(QueryRequest {
                    index: None,
                    partition: (ATTR_USER_ID.to_string(), self.user.clone()),
                    sort_range: None,
                    filters: filters.clone(),
                    descending: true,
                    limit: None,
                    start_token: token,
                })
                .await
                .map_err(|err| Error::backend(op, err))?;
            if let Some(item) = page.items.first() {
                return Ok(Some(codec::decode(item)?));
            }
            match page.next_token {
                Some(next) => token = Some(next),
                None => return Ok(None),
            }
        }
    }

    fn resolve_range(&self, opts: &QueryOptions) -> Result<Option<SortRange>> {
        if opts.start_time.is_none() && opts.end_time.is_none() {
            return Ok(None);
        }
        let start = opts.start_time.unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
        let end = match opts.end_time {
            Some(end) => end,
            None => Utc::now(),
        };
        if start > end {
            return Err(Error::InvalidArgument(format!(
                "start {} is after end {}",
                codec::encode_timestamp(&start),
                codec::encode_timestamp(&end)
            )));
        }
        let (lower, upper) = codec::sort_key_range(&start, &end);
        Ok(Some(SortRange {
            attribute: ATTR_SORT_KEY.to_string(),
            lower,
            upper,
        }))
    }

    async fn run_query(&self, op: &'static str, req: QueryRequest) -> Result<FactPage> {
        let page = self
            .kv
            .query(req)
            .await
            .map_err(|err| Error::backend(op, err))?;
        let mut facts = Vec::with_capacity(page.items.len());
        for item in &page.items {
            match codec::decode(item) {
                Ok(fact) => facts.push(fact),
                Err(err) => tracing::warn!(%err, "skipping undecodable item"),
            }
        }
        Ok(FactPage {
            facts,
            next_token: page.next_token,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fact::DataType;
    use crate::kv::MemoryKv;
    use chrono::{Duration as ChronoDuration, TimeZone};

    async fn test_store() -> FactStore {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKv::new());
        ensure_table(kv.as_ref()).await.unwrap();
        FactStore::new(kv, "u1")
    }

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn version(id: &str, ns: &str, offset_secs: i64, value: &str) -> Fact {
        let mut fact = Fact::new(id, ns, id, DataType::Json, value);
        fact.timestamp = base() + ChronoDuration::seconds(offset_secs);
        fact
    }

    #[tokio::test]
    async fn put_defaults_user_and_get_returns_latest() {
        let store = test_store().await;
        let written = store.put_fact(version("r1", "ns", 0, "1")).await.unwrap();
        assert_eq!(written.user, "u1");
        store.put_fact(version("r1", "ns", 10, "2")).await.unwrap();
        store.put_fact(version("r1", "ns", 5, "3")).await.unwrap();

        let latest = store.get_fact("r1").await.unwrap();
        assert_eq!(latest.value, "2");
    }

    #[tokio::test]
    async fn empty_id_is_rejected() {
        let store = test_store().await;
        let err = store
            .put_fact(version("", "ns", 0, "x"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn get_miss_is_not_found() {
        let store = test_store().await;
        assert!(matches!(
            store.get_fact("nope").await.unwrap_err(),
            Error::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn delete_without_prior_is_not_found() {
        let store = test_store().await;
        assert!(matches!(
            store.delete_fact("nope").await.unwrap_err(),
            Error::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn delete_appends_tombstone_and_put_resurrects() {
        let store = test_store().await;
        store.put_fact(version("r1", "ns", 0, "1")).await.unwrap();

        let tomb = store.delete_fact("r1").await.unwrap();
        assert!(tomb.is_deleted);
        assert_eq!(tomb.namespace, "ns");

        // The tombstone is the latest version and is returned as-is.
        let latest = store.get_fact("r1").await.unwrap();
        assert!(latest.is_deleted);

        // A fresh wall-clock write lands after the tombstone and resurrects.
        store
            .put_fact(Fact::new("r1", "ns", "r1", DataType::Json, "2"))
            .await
            .unwrap();
        let latest = store.get_fact("r1").await.unwrap();
        assert!(latest.is_live());
        assert_eq!(latest.value, "2");
    }

    #[tokio::test]
    async fn field_query_returns_all_versions_in_window() {
        let store = test_store().await;
        for (offset, value) in [(0, "a"), (10, "b"), (20, "c")] {
            store
                .put_fact(version("r1", "ns", offset, value))
                .await
                .unwrap();
        }
        store.put_fact(version("r2", "ns", 15, "x")).await.unwrap();

        // Inclusive at both bounds, ascending by default.
        let page = store
            .query_by_field(
                "ns",
                "r1",
                QueryOptions {
                    start_time: Some(base()),
                    end_time: Some(base() + ChronoDuration::seconds(10)),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let values: Vec<_> = page.facts.iter().map(|f| f.value.as_str()).collect();
        assert_eq!(values, ["a", "b"]);

        let page = store
            .query_by_field(
                "ns",
                "r1",
                QueryOptions {
                    descending: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let values: Vec<_> = page.facts.iter().map(|f| f.value.as_str()).collect();
        assert_eq!(values, ["c", "b", "a"]);
    }

    #[tokio::test]
    async fn inverted_range_is_rejected() {
        let store = test_store().await;
        let err = store
            .query_by_time_range(QueryOptions {
                start_time: Some(base() + ChronoDuration::seconds(10)),
                end_time: Some(base()),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn namespace_query_filters_other_namespaces() {
        let store = test_store().await;
        store.put_fact(version("r1", "ns-a", 0, "a")).await.unwrap();
        store.put_fact(version("r2", "ns-b", 1, "b")).await.unwrap();

        let page = store
            .query_by_namespace("ns-a", QueryOptions::default())
            .await
            .unwrap();
        assert_eq!(page.facts.len(), 1);
        assert_eq!(page.facts[0].namespace, "ns-a");
    }

    #[tokio::test]
    async fn paged_queries_cover_the_same_multiset() {
        let store = test_store().await;
        for offset in 0..7 {
            store
                .put_fact(version("r1", "ns", offset, &offset.to_string()))
                .await
                .unwrap();
        }

        let single = store
            .query_by_field("ns", "r1", QueryOptions::default())
            .await
            .unwrap();
        assert!(single.next_token.is_none());

        let mut paged = Vec::new();
        let mut opts = QueryOptions {
            limit: Some(2),
            ..Default::default()
        };
        loop {
            let page = store.query_by_field("ns", "r1", opts.clone()).await.unwrap();
            paged.extend(page.facts);
            match page.next_token {
                Some(token) => opts.page_token = Some(token),
                None => break,
            }
        }
        assert_eq!(single.facts, paged);
    }

    #[tokio::test]
    async fn snapshot_scopes_by_namespace_or_all() {
        let store = test_store().await;
        store.put_fact(version("r1", "ns-a", 0, "a1")).await.unwrap();
        store.put_fact(version("r1", "ns-a", 5, "a2")).await.unwrap();
        store.put_fact(version("r2", "ns-b", 3, "b1")).await.unwrap();
        let mut tomb = Fact::tombstone_of(&version("r2", "ns-b", 0, ""));
        tomb.timestamp = base() + ChronoDuration::seconds(8);
        store.put_fact(tomb).await.unwrap();

        let at = base() + ChronoDuration::seconds(10);
        let scoped = store.snapshot_at(Some("ns-a"), at).await.unwrap();
        assert_eq!(scoped.len(), 1);
        assert_eq!(scoped[0].value, "a2");

        // Across namespaces the tombstoned record stays hidden.
        let all = store.snapshot_at(None, at).await.unwrap();
        assert_eq!(all.len(), 1);

        // Before the second write, the first version is visible.
        let early = store
            .snapshot_at(Some("ns-a"), base() + ChronoDuration::seconds(2))
            .await
            .unwrap();
        assert_eq!(early[0].value, "a1");
    }
}

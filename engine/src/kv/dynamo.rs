//! DynamoDB implementation of the KV capability.
//!
//! A thin adapter: items go in and out as attribute maps, keys and indexes
//! are whatever the caller's [`TableSchema`] says, and errors are classified
//! into the small [`KvError`] taxonomy. No domain logic lives here.

use super::{
    decode_token, encode_token, AttrValue, Item, KvError, KvStore, QueryPage, QueryRequest,
    TableSchema,
};
use async_trait::async_trait;
use aws_sdk_dynamodb::error::ProvideErrorMetadata;
use aws_sdk_dynamodb::error::SdkError;
use aws_sdk_dynamodb::types::{
    AttributeDefinition, AttributeValue, BillingMode, GlobalSecondaryIndex, KeySchemaElement,
    KeyType, Projection, ProjectionType, ScalarAttributeType, TableStatus,
};
use aws_sdk_dynamodb::Client;
use std::collections::HashMap;
use std::time::Duration;

const READY_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// DynamoDB-backed [`KvStore`].
#[derive(Debug, Clone)]
pub struct DynamoKv {
    client: Client,
    table_name: String,
}

impl DynamoKv {
    /// Create an adapter over a pre-built client.
    pub fn new(client: Client, table_name: impl Into<String>) -> Self {
        Self {
            client,
            table_name: table_name.into(),
        }
    }

    /// Create an adapter using the standard AWS config chain, optionally
    /// pointed at a local emulator endpoint.
    pub async fn from_env(table_name: impl Into<String>, endpoint_url: Option<&str>) -> Self {
        let base = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        let mut builder = aws_sdk_dynamodb::config::Builder::from(&base);
        if let Some(url) = endpoint_url {
            builder = builder.endpoint_url(url);
        }
        Self::new(Client::from_conf(builder.build()), table_name)
    }

    /// The physical table this adapter is bound to.
    pub fn table_name(&self) -> &str {
        &self.table_name
    }
}

/// Classify an SDK failure into the adapter's error taxonomy.
fn classify<E, R>(err: SdkError<E, R>) -> KvError
where
    E: ProvideErrorMetadata,
{
    let code = err.code().map(str::to_string);
    let message = err
        .message()
        .map(str::to_string)
        .unwrap_or_else(|| err.to_string());
    match code.as_deref() {
        Some("ThrottlingException")
        | Some("ProvisionedThroughputExceededException")
        | Some("RequestLimitExceeded") => KvError::Throttled(message),
        Some("ResourceNotFoundException") => KvError::NotFound(message),
        Some(code) => KvError::Transport(format!("{code}: {message}")),
        None => KvError::Transport(message),
    }
}

fn build_err(err: impl std::fmt::Display) -> KvError {
    KvError::Transport(format!("request build: {err}"))
}

fn to_sdk_value(value: AttrValue) -> AttributeValue {
    match value {
        AttrValue::S(s) => AttributeValue::S(s),
        AttrValue::N(n) => AttributeValue::N(n),
        AttrValue::Bool(b) => AttributeValue::Bool(b),
        AttrValue::L(l) => AttributeValue::L(l.into_iter().map(to_sdk_value).collect()),
        AttrValue::M(m) => {
            AttributeValue::M(m.into_iter().map(|(k, v)| (k, to_sdk_value(v))).collect())
        }
    }
}

fn from_sdk_value(value: &AttributeValue) -> Result<AttrValue, KvError> {
    match value {
        AttributeValue::S(s) => Ok(AttrValue::S(s.clone())),
        AttributeValue::N(n) => Ok(AttrValue::N(n.clone())),
        AttributeValue::Bool(b) => Ok(AttrValue::Bool(*b)),
        AttributeValue::L(l) => Ok(AttrValue::L(
            l.iter().map(from_sdk_value).collect::<Result<_, _>>()?,
        )),
        AttributeValue::M(m) => Ok(AttrValue::M(
            m.iter()
                .map(|(k, v)| Ok((k.clone(), from_sdk_value(v)?)))
                .collect::<Result<_, KvError>>()?,
        )),
        other => Err(KvError::Transport(format!(
            "unsupported attribute shape: {other:?}"
        ))),
    }
}

fn to_sdk_item(item: Item) -> HashMap<String, AttributeValue> {
    item.into_iter().map(|(k, v)| (k, to_sdk_value(v))).collect()
}

fn from_sdk_item(item: &HashMap<String, AttributeValue>) -> Result<Item, KvError> {
    item.iter()
        .map(|(k, v)| Ok((k.clone(), from_sdk_value(v)?)))
        .collect()
}

fn string_attr_def(name: &str) -> Result<AttributeDefinition, KvError> {
    AttributeDefinition::builder()
        .attribute_name(name)
        .attribute_type(ScalarAttributeType::S)
        .build()
        .map_err(build_err)
}

fn key_element(name: &str, key_type: KeyType) -> Result<KeySchemaElement, KvError> {
    KeySchemaElement::builder()
        .attribute_name(name)
        .key_type(key_type)
        .build()
        .map_err(build_err)
}

#[async_trait]
impl KvStore for DynamoKv {
    async fn create_table(&self, schema: &TableSchema) -> Result<(), KvError> {
        let mut attr_names = vec![schema.partition_key.clone(), schema.sort_key.clone()];
        for gsi in &schema.global_indexes {
            for name in [&gsi.partition_key, &gsi.sort_key] {
                if !attr_names.contains(name) {
                    attr_names.push(name.clone());
                }
            }
        }

        let mut req = self
            .client
            .create_table()
            .table_name(&self.table_name)
            .billing_mode(BillingMode::PayPerRequest)
            .key_schema(key_element(&schema.partition_key, KeyType::Hash)?)
            .key_schema(key_element(&schema.sort_key, KeyType::Range)?);
        for name in &attr_names {
            req = req.attribute_definitions(string_attr_def(name)?);
        }
        for gsi in &schema.global_indexes {
            req = req.global_secondary_indexes(
                GlobalSecondaryIndex::builder()
                    .index_name(&gsi.name)
                    .key_schema(key_element(&gsi.partition_key, KeyType::Hash)?)
                    .key_schema(key_element(&gsi.sort_key, KeyType::Range)?)
                    .projection(
                        Projection::builder()
                            .projection_type(ProjectionType::All)
                            .build(),
                    )
                    .build()
                    .map_err(build_err)?,
            );
        }

        match req.send().await {
            Ok(_) => Ok(()),
            Err(err) => {
                if err
                    .as_service_error()
                    .is_some_and(|se| se.is_resource_in_use_exception())
                {
                    return Err(KvError::AlreadyExists);
                }
                Err(classify(err))
            }
        }
    }

    async fn await_ready(&self, timeout: Duration) -> Result<(), KvError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match self
                .client
                .describe_table()
                .table_name(&self.table_name)
                .send()
                .await
            {
                Ok(out) => {
                    if out.table().and_then(|t| t.table_status())
                        == Some(&TableStatus::Active)
                    {
                        return Ok(());
                    }
                }
                // A table freshly created may not be describable yet.
                Err(err) => match classify(err) {
                    KvError::NotFound(_) => {}
                    other => return Err(other),
                },
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(KvError::Transport(format!(
                    "table {} not ready within {timeout:?}",
                    self.table_name
                )));
            }
            tokio::time::sleep(READY_POLL_INTERVAL).await;
        }
    }

    async fn put_item(&self, item: Item) -> Result<(), KvError> {
        self.client
            .put_item()
            .table_name(&self.table_name)
            .set_item(Some(to_sdk_item(item)))
            .send()
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn query(&self, req: QueryRequest) -> Result<QueryPage, KvError> {
        let (part_attr, part_value) = req.partition;

        let mut query = self
            .client
            .query()
            .table_name(&self.table_name)
            .expression_attribute_names("#pk", part_attr)
            .expression_attribute_values(":pk", AttributeValue::S(part_value))
            .scan_index_forward(!req.descending);

        if let Some(index) = req.index {
            query = query.index_name(index);
        }

        let key_condition = match req.sort_range {
            Some(range) => {
                query = query
                    .expression_attribute_names("#sk", range.attribute)
                    .expression_attribute_values(":lo", AttributeValue::S(range.lower))
                    .expression_attribute_values(":hi", AttributeValue::S(range.upper));
                "#pk = :pk AND #sk BETWEEN :lo AND :hi"
            }
            None => "#pk = :pk",
        };
        query = query.key_condition_expression(key_condition);

        if !req.filters.is_empty() {
            let mut clauses = Vec::with_capacity(req.filters.len());
            for (i, (attr, value)) in req.filters.into_iter().enumerate() {
                let name = format!("#f{i}");
                let placeholder = format!(":f{i}");
                clauses.push(format!("{name} = {placeholder}"));
                query = query
                    .expression_attribute_names(name, attr)
                    .expression_attribute_values(placeholder, to_sdk_value(value));
            }
            query = query.filter_expression(clauses.join(" AND "));
        }

        if let Some(limit) = req.limit {
            query = query.limit(limit as i32);
        }
        if let Some(token) = req.start_token {
            query = query.set_exclusive_start_key(Some(to_sdk_item(decode_token(&token)?)));
        }

        let out = query.send().await.map_err(classify)?;

        let items = out
            .items()
            .iter()
            .map(from_sdk_item)
            .collect::<Result<Vec<_>, _>>()?;
        let next_token = match out.last_evaluated_key() {
            Some(key) if !key.is_empty() => Some(encode_token(&from_sdk_item(key)?)?),
            _ => None,
        };

        Ok(QueryPage { items, next_token })
    }
}

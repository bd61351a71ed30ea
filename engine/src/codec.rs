//! Bijection between in-memory facts and the physical item shape.
//!
//! One physical table holds every fact:
//!
//! | Attribute   | Content                                         |
//! |-------------|-------------------------------------------------|
//! | `UserID`    | partition key, the tenant id                    |
//! | `SK`        | sort key, `timestamp#id`                        |
//! | `FieldKey`  | GSI partition key, `user#namespace#fieldName`   |
//! | `Namespace`, `FieldName`, `DataType`, `ID` | stored verbatim  |
//! | `Value`     | string payload (serialized JSON for json facts) |
//! | `Columns`   | present only when non-empty                     |
//! | `IsDeleted` | present only when true                          |
//!
//! Timestamps are rendered with a fixed nine fractional digits so that
//! lexicographic order on `SK` equals chronological order. `#` is the
//! reserved separator and is rejected in every key component.

use crate::error::{Error, Result};
use crate::fact::{Column, DataType, Fact};
use crate::kv::{AttrValue, GsiSpec, Item, TableSchema};
use chrono::{DateTime, SecondsFormat, Utc};
use std::collections::HashMap;

pub const ATTR_USER_ID: &str = "UserID";
pub const ATTR_SORT_KEY: &str = "SK";
pub const ATTR_FIELD_KEY: &str = "FieldKey";
pub const ATTR_NAMESPACE: &str = "Namespace";
pub const ATTR_FIELD_NAME: &str = "FieldName";
pub const ATTR_DATA_TYPE: &str = "DataType";
pub const ATTR_ID: &str = "ID";
pub const ATTR_VALUE: &str = "Value";
pub const ATTR_COLUMNS: &str = "Columns";
pub const ATTR_IS_DELETED: &str = "IsDeleted";

const COLUMN_NAME: &str = "Name";
const COLUMN_DATA_TYPE: &str = "DataType";

/// Name of the per-field version-history index.
pub const FIELD_INDEX: &str = "FieldIndex";

/// Reserved separator inside composite keys.
pub const SEPARATOR: char = '#';

/// The physical layout of the shared table.
pub fn table_schema() -> TableSchema {
    TableSchema {
        partition_key: ATTR_USER_ID.to_string(),
        sort_key: ATTR_SORT_KEY.to_string(),
        global_indexes: vec![GsiSpec {
            name: FIELD_INDEX.to_string(),
            partition_key: ATTR_FIELD_KEY.to_string(),
            sort_key: ATTR_SORT_KEY.to_string(),
        }],
    }
}

/// Fixed-width RFC3339 form: nine fractional digits, `Z` suffix.
pub fn encode_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// Parse a stored or wire timestamp.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| Error::InvalidArgument(format!("bad timestamp {raw:?}: {e}")))
}

/// Serde adapter that keeps wire timestamps in the fixed nanosecond form.
pub mod rfc3339_nanos {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, s: S) -> std::result::Result<S::Ok, S::Error> {
        s.serialize_str(&super::encode_timestamp(ts))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        d: D,
    ) -> std::result::Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        super::parse_timestamp(&raw).map_err(serde::de::Error::custom)
    }
}

/// Serde adapter for optional timestamps in the same fixed form.
pub mod rfc3339_nanos_opt {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        ts: &Option<DateTime<Utc>>,
        s: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        match ts {
            Some(ts) => s.serialize_some(&super::encode_timestamp(ts)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        d: D,
    ) -> std::result::Result<Option<DateTime<Utc>>, D::Error> {
        let raw: Option<String> = Option::deserialize(d)?;
        raw.map(|s| super::parse_timestamp(&s).map_err(serde::de::Error::custom))
            .transpose()
    }
}

/// Sort key for one fact version.
pub fn sort_key(ts: &DateTime<Utc>, id: &str) -> String {
    format!("{}{SEPARATOR}{id}", encode_timestamp(ts))
}

/// Recover `(timestamp, id)` from a sort key.
pub fn split_sort_key(sk: &str) -> Result<(DateTime<Utc>, &str)> {
    let (ts_raw, id) = sk
        .split_once(SEPARATOR)
        .ok_or_else(|| Error::InvalidArgument(format!("malformed sort key {sk:?}")))?;
    Ok((parse_timestamp(ts_raw)?, id))
}

/// GSI partition key collocating one field's entire version history.
pub fn field_key(user: &str, namespace: &str, field_name: &str) -> String {
    format!("{user}{SEPARATOR}{namespace}{SEPARATOR}{field_name}")
}

/// Inclusive sort-key bounds covering every id in `[start, end]`.
///
/// The bare lower timestamp sorts before any `ts#id` sharing its prefix; the
/// upper bound appends a code point that sorts after any id byte sequence.
pub fn sort_key_range(start: &DateTime<Utc>, end: &DateTime<Utc>) -> (String, String) {
    (
        encode_timestamp(start),
        format!("{}{SEPARATOR}\u{10FFFF}", encode_timestamp(end)),
    )
}

/// Reject the reserved separator in a key component.
pub fn validate_component(label: &str, value: &str) -> Result<()> {
    if value.contains(SEPARATOR) {
        return Err(Error::InvalidArgument(format!(
            "{label} must not contain '{SEPARATOR}': {value:?}"
        )));
    }
    Ok(())
}

fn malformed(what: &str) -> Error {
    Error::InvalidArgument(format!("malformed item: {what}"))
}

fn required_string<'a>(item: &'a Item, attr: &str) -> Result<&'a str> {
    item.get(attr)
        .and_then(AttrValue::as_s)
        .ok_or_else(|| malformed(attr))
}

/// Encode a fact into its physical item shape.
pub fn encode(fact: &Fact) -> Result<Item> {
    for (label, value) in [
        ("user", &fact.user),
        ("namespace", &fact.namespace),
        ("field name", &fact.field_name),
        ("id", &fact.id),
    ] {
        validate_component(label, value)?;
    }

    let mut item = Item::new();
    item.insert(
        ATTR_USER_ID.to_string(),
        AttrValue::S(fact.user.clone()),
    );
    item.insert(
        ATTR_SORT_KEY.to_string(),
        AttrValue::S(sort_key(&fact.timestamp, &fact.id)),
    );
    item.insert(
        ATTR_FIELD_KEY.to_string(),
        AttrValue::S(field_key(&fact.user, &fact.namespace, &fact.field_name)),
    );
    item.insert(
        ATTR_NAMESPACE.to_string(),
        AttrValue::S(fact.namespace.clone()),
    );
    item.insert(
        ATTR_FIELD_NAME.to_string(),
        AttrValue::S(fact.field_name.clone()),
    );
    item.insert(
        ATTR_DATA_TYPE.to_string(),
        AttrValue::S(fact.data_type.as_str().to_string()),
    );
    item.insert(ATTR_ID.to_string(), AttrValue::S(fact.id.clone()));
    item.insert(ATTR_VALUE.to_string(), AttrValue::S(fact.value.clone()));

    if !fact.columns.is_empty() {
        let columns = fact
            .columns
            .iter()
            .map(|c| {
                let mut m = HashMap::new();
                m.insert(COLUMN_NAME.to_string(), AttrValue::S(c.name.clone()));
                m.insert(
                    COLUMN_DATA_TYPE.to_string(),
                    AttrValue::S(c.data_type.as_str().to_string()),
                );
                AttrValue::M(m)
            })
            .collect();
        item.insert(ATTR_COLUMNS.to_string(), AttrValue::L(columns));
    }
    if fact.is_deleted {
        item.insert(ATTR_IS_DELETED.to_string(), AttrValue::Bool(true));
    }

    Ok(item)
}

/// Decode a physical item back into a fact.
///
/// Tolerates the legacy shape where `Value` was stored as a native bool or
/// number attribute; those are rendered to their canonical string payloads.
pub fn decode(item: &Item) -> Result<Fact> {
    let sk = required_string(item, ATTR_SORT_KEY)?;
    let (timestamp, id) = split_sort_key(sk)?;

    let data_type_raw = required_string(item, ATTR_DATA_TYPE)?;
    let data_type = DataType::parse(data_type_raw)
        .ok_or_else(|| malformed(&format!("data type {data_type_raw:?}")))?;

    let value = match item.get(ATTR_VALUE) {
        None => String::new(),
        Some(AttrValue::S(s)) => s.clone(),
        Some(AttrValue::Bool(b)) => b.to_string(),
        Some(AttrValue::N(n)) => n.clone(),
        Some(_) => return Err(malformed(ATTR_VALUE)),
    };

    let columns = match item.get(ATTR_COLUMNS) {
        None => Vec::new(),
        Some(attr) => attr
            .as_l()
            .ok_or_else(|| malformed(ATTR_COLUMNS))?
            .iter()
            .map(|entry| {
                let m = entry.as_m().ok_or_else(|| malformed(ATTR_COLUMNS))?;
                let name = m
                    .get(COLUMN_NAME)
                    .and_then(AttrValue::as_s)
                    .ok_or_else(|| malformed(ATTR_COLUMNS))?;
                let data_type = m
                    .get(COLUMN_DATA_TYPE)
                    .and_then(AttrValue::as_s)
                    .and_then(DataType::parse)
                    .ok_or_else(|| malformed(ATTR_COLUMNS))?;
                Ok(Column {
                    name: name.to_string(),
                    data_type,
                })
            })
            .collect::<Result<_>>()?,
    };

    let is_deleted = item
        .get(ATTR_IS_DELETED)
        .and_then(AttrValue::as_bool)
        .unwrap_or(false)
        || data_type == DataType::Deleted;

    Ok(Fact {
        id: id.to_string(),
        timestamp,
        user: required_string(item, ATTR_USER_ID)?.to_string(),
        namespace: required_string(item, ATTR_NAMESPACE)?.to_string(),
        field_name: required_string(item, ATTR_FIELD_NAME)?.to_string(),
        data_type,
        value,
        columns,
        is_deleted,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn fact() -> Fact {
        Fact {
            id: "r1".to_string(),
            timestamp: Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 45).unwrap()
                + chrono::Duration::nanoseconds(123_456_789),
            user: "u1".to_string(),
            namespace: "u1/todo".to_string(),
            field_name: "r1".to_string(),
            data_type: DataType::Json,
            value: r#"{"title":"buy milk","done":false}"#.to_string(),
            columns: Vec::new(),
            is_deleted: false,
        }
    }

    #[test]
    fn timestamp_is_fixed_width() {
        let whole = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 45).unwrap();
        let encoded = encode_timestamp(&whole);
        assert_eq!(encoded, "2024-03-01T12:30:45.000000000Z");
        assert_eq!(parse_timestamp(&encoded).unwrap(), whole);
    }

    #[test]
    fn roundtrip() {
        let fact = fact();
        let item = encode(&fact).unwrap();
        assert_eq!(
            item.get(ATTR_SORT_KEY).and_then(AttrValue::as_s),
            Some("2024-03-01T12:30:45.123456789Z#r1")
        );
        assert_eq!(
            item.get(ATTR_FIELD_KEY).and_then(AttrValue::as_s),
            Some("u1#u1/todo#r1")
        );
        assert!(!item.contains_key(ATTR_IS_DELETED));
        assert!(!item.contains_key(ATTR_COLUMNS));
        assert_eq!(decode(&item).unwrap(), fact);
    }

    #[test]
    fn tombstone_roundtrip() {
        let mut tomb = Fact::tombstone_of(&fact());
        tomb.user = "u1".to_string();
        let item = encode(&tomb).unwrap();
        assert_eq!(
            item.get(ATTR_IS_DELETED).and_then(AttrValue::as_bool),
            Some(true)
        );
        let decoded = decode(&item).unwrap();
        assert!(decoded.is_deleted);
        assert_eq!(decoded.data_type, DataType::Deleted);
    }

    #[test]
    fn columns_roundtrip() {
        let mut table_fact = fact();
        table_fact.data_type = DataType::Table;
        table_fact.value = String::new();
        table_fact.columns = vec![
            Column {
                name: "title".to_string(),
                data_type: DataType::String,
            },
            Column {
                name: "done".to_string(),
                data_type: DataType::Boolean,
            },
        ];
        let decoded = decode(&encode(&table_fact).unwrap()).unwrap();
        assert_eq!(decoded.columns, table_fact.columns);
    }

    #[test]
    fn legacy_native_values_are_rendered() {
        let mut item = encode(&fact()).unwrap();
        item.insert(ATTR_VALUE.to_string(), AttrValue::Bool(true));
        assert_eq!(decode(&item).unwrap().value, "true");

        item.insert(ATTR_VALUE.to_string(), AttrValue::N("42".to_string()));
        assert_eq!(decode(&item).unwrap().value, "42");
    }

    #[test]
    fn legacy_deleted_data_type_implies_tombstone() {
        let mut item = encode(&fact()).unwrap();
        item.insert(
            ATTR_DATA_TYPE.to_string(),
            AttrValue::S("deleted".to_string()),
        );
        assert!(decode(&item).unwrap().is_deleted);
    }

    #[test]
    fn separator_is_rejected_in_key_components() {
        for field in ["user", "namespace", "field_name", "id"] {
            let mut bad = fact();
            match field {
                "user" => bad.user = "a#b".to_string(),
                "namespace" => bad.namespace = "a#b".to_string(),
                "field_name" => bad.field_name = "a#b".to_string(),
                _ => bad.id = "a#b".to_string(),
            }
            let err = encode(&bad).unwrap_err();
            assert!(
                matches!(err, Error::InvalidArgument(_)),
                "expected rejection for {field}"
            );
        }
    }

    #[test]
    fn range_covers_every_id_at_the_bounds() {
        let ts = fact().timestamp;
        let (lo, hi) = sort_key_range(&ts, &ts);
        let sk_min = sort_key(&ts, "");
        let sk_max = sort_key(&ts, "zzzzzzzz");
        assert!(lo <= sk_min);
        assert!(hi >= sk_max);
    }

    proptest! {
        #[test]
        fn lexicographic_order_matches_chronological(
            a_secs in 0i64..4_102_444_800,
            a_nanos in 0u32..1_000_000_000,
            b_secs in 0i64..4_102_444_800,
            b_nanos in 0u32..1_000_000_000,
        ) {
            let a = Utc.timestamp_opt(a_secs, a_nanos).unwrap();
            let b = Utc.timestamp_opt(b_secs, b_nanos).unwrap();
            prop_assert_eq!(
                encode_timestamp(&a).cmp(&encode_timestamp(&b)),
                a.cmp(&b)
            );
        }

        #[test]
        fn sort_keys_order_by_timestamp_then_id(
            secs in 0i64..4_102_444_800,
            id_a in "[a-z0-9]{1,12}",
            id_b in "[a-z0-9]{1,12}",
        ) {
            let ts = Utc.timestamp_opt(secs, 0).unwrap();
            prop_assert_eq!(
                sort_key(&ts, &id_a).cmp(&sort_key(&ts, &id_b)),
                id_a.cmp(&id_b)
            );
        }
    }
}

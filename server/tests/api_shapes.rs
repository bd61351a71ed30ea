//! Wire-shape tests for the JSON surface.
//!
//! The HTTP contract is carried by the engine's serde derives; these pin the
//! exact field names, casing and timestamp form clients see.

use chrono::{TimeZone, Utc};
use notably_engine::{Column, DataType, Row, RowEvent, RowOp, Session, TableInfo};
use serde_json::json;

fn ts() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 45).unwrap()
}

#[test]
fn session_exposes_api_key_in_camel_case() {
    let session = Session {
        id: "u-1".to_string(),
        username: "alice".to_string(),
        email: "alice@x.y".to_string(),
        api_key: "nb_abc".to_string(),
    };

    let value = serde_json::to_value(&session).unwrap();
    assert_eq!(
        value,
        json!({
            "id": "u-1",
            "username": "alice",
            "email": "alice@x.y",
            "apiKey": "nb_abc",
        })
    );
}

#[test]
fn table_info_serializes_nanosecond_timestamps() {
    let table = TableInfo {
        name: "todo".to_string(),
        created_at: ts(),
        columns: vec![Column {
            name: "title".to_string(),
            data_type: DataType::String,
        }],
    };

    let value = serde_json::to_value(&table).unwrap();
    assert_eq!(value["createdAt"], "2024-03-01T12:30:45.000000000Z");
    assert_eq!(value["columns"][0]["dataType"], "string");

    let parsed: TableInfo = serde_json::from_value(value).unwrap();
    assert_eq!(parsed, table);
}

#[test]
fn row_round_trips_through_the_wire_form() {
    let row = Row {
        id: "r1".to_string(),
        timestamp: ts(),
        values: json!({"title": "buy milk", "done": false}),
    };

    let encoded = serde_json::to_string(&row).unwrap();
    let parsed: Row = serde_json::from_str(&encoded).unwrap();
    assert_eq!(parsed, row);
}

#[test]
fn history_events_carry_lowercase_ops_and_null_values_on_delete() {
    let delete = RowEvent {
        id: "r1".to_string(),
        timestamp: ts(),
        values: None,
        op: RowOp::Delete,
    };
    let value = serde_json::to_value(&delete).unwrap();
    assert_eq!(value["op"], "delete");
    assert_eq!(value["values"], serde_json::Value::Null);

    let insert = RowEvent {
        id: "r1".to_string(),
        timestamp: ts(),
        values: Some(json!({"title": "x"})),
        op: RowOp::Insert,
    };
    let value = serde_json::to_value(&insert).unwrap();
    assert_eq!(value["op"], "insert");
    assert_eq!(value["values"]["title"], "x");
}

#[test]
fn request_bodies_tolerate_missing_optionals() {
    // The insert body's id and the create-table columns are optional.
    let values: serde_json::Value =
        serde_json::from_str(r#"{"values":{"title":"x"}}"#).unwrap();
    assert!(values.get("id").is_none());

    let table: TableInfo = serde_json::from_value(json!({
        "name": "todo",
        "createdAt": "2024-03-01T12:30:45.000000000Z",
        "columns": [],
    }))
    .unwrap();
    assert!(table.columns.is_empty());
}

//! JSON encoding of values, operations and server state.
//!
//! Typed values travel as tagged objects (`{"__type": "Pointer", ...}`) and
//! operations other than plain sets as `{"__op": ...}` objects.

use crate::{
    error::{Error, Result},
    record::ServerState,
    value::{Number, Relation},
    Operation, Record, Value,
};
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Map, Value as Json};
use std::collections::BTreeMap;

/// JSON object payload exchanged with the transport.
pub type Payload = Map<String, Json>;

/// Backend code reported for a response that could not be decoded.
pub const MALFORMED_RESPONSE: i64 = 107;

/// Format a timestamp the way the backend expects.
pub fn format_date(date: &DateTime<Utc>) -> String {
    date.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_date(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| Error::Codec(format!("invalid date '{raw}': {e}")))
}

/// Encode a pointer to a saved record.
pub fn encode_pointer(record: &Record) -> Result<Json> {
    let class_name = record.class_name();
    let object_id = record
        .object_id()
        .ok_or_else(|| Error::Codec(format!("cannot reference an unsaved {class_name} record")))?;
    Ok(json!({
        "__type": "Pointer",
        "className": class_name,
        "objectId": object_id,
    }))
}

/// Encode a field value.
pub fn encode_value(value: &Value) -> Result<Json> {
    Ok(match value {
        Value::Null => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Integer(n) => Json::from(*n),
        Value::Float(n) => serde_json::Number::from_f64(*n)
            .map(Json::Number)
            .ok_or_else(|| Error::Codec(format!("cannot encode non-finite number {n}")))?,
        Value::String(s) => Json::String(s.clone()),
        Value::Date(d) => json!({ "__type": "Date", "iso": format_date(d) }),
        Value::Record(record) => encode_pointer(record)?,
        Value::Relation(relation) => json!({
            "__type": "Relation",
            "className": relation.target_class,
        }),
        Value::Array(items) => Json::Array(items.iter().map(encode_value).collect::<Result<_>>()?),
        Value::Object(map) => Json::Object(
            map.iter()
                .map(|(k, v)| Ok((k.clone(), encode_value(v)?)))
                .collect::<Result<_>>()?,
        ),
    })
}

fn encode_values(values: &[Value]) -> Result<Json> {
    encode_value(&Value::Array(values.to_vec()))
}

fn encode_pointers(records: &[Record]) -> Result<Json> {
    Ok(Json::Array(
        records.iter().map(encode_pointer).collect::<Result<_>>()?,
    ))
}

fn encode_number(n: Number) -> Result<Json> {
    encode_value(&Value::from(n))
}

/// Encode one pending operation.
pub fn encode_operation(op: &Operation) -> Result<Json> {
    Ok(match op {
        Operation::Set(value) => encode_value(value)?,
        Operation::Delete => json!({ "__op": "Delete" }),
        Operation::Increment(amount) => json!({
            "__op": "Increment",
            "amount": encode_number(*amount)?,
        }),
        Operation::ListAdd(values)
        | Operation::ListAddUnique(values)
        | Operation::ListRemove(values) => json!({
            "__op": op.name(),
            "objects": encode_values(values)?,
        }),
        Operation::RelationAdd(records) | Operation::RelationRemove(records) => json!({
            "__op": op.name(),
            "objects": encode_pointers(records)?,
        }),
        Operation::RelationBatch { adds, removes } => json!({
            "__op": "Batch",
            "ops": [
                { "__op": "AddRelation", "objects": encode_pointers(adds)? },
                { "__op": "RemoveRelation", "objects": encode_pointers(removes)? },
            ],
        }),
    })
}

/// Encode a record's pending operations as a save payload.
pub fn encode_operations(operations: &BTreeMap<String, Operation>) -> Result<Payload> {
    operations
        .iter()
        .map(|(key, op)| Ok((key.clone(), encode_operation(op)?)))
        .collect()
}

/// Decode a JSON value into a field value.
pub fn decode_value(json: &Json) -> Result<Value> {
    Ok(match json {
        Json::Null => Value::Null,
        Json::Bool(b) => Value::Bool(*b),
        Json::Number(n) => match n.as_i64() {
            Some(i) => Value::Integer(i),
            None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
        },
        Json::String(s) => Value::String(s.clone()),
        Json::Array(items) => Value::Array(items.iter().map(decode_value).collect::<Result<_>>()?),
        Json::Object(map) => match map.get("__type").and_then(Json::as_str) {
            Some("Date") => Value::Date(parse_date(required_str(map, "iso")?)?),
            Some("Pointer") => Value::Record(Record::without_data(
                required_str(map, "className")?,
                required_str(map, "objectId")?,
            )),
            Some("Object") => Value::Record(Record::from_server(decode_server_state(map)?)),
            Some("Relation") => Value::Relation(Relation {
                target_class: map.get("className").and_then(Json::as_str).map(String::from),
            }),
            _ => Value::Object(
                map.iter()
                    .map(|(k, v)| Ok((k.clone(), decode_value(v)?)))
                    .collect::<Result<_>>()?,
            ),
        },
    })
}

fn required_str<'a>(map: &'a Payload, key: &str) -> Result<&'a str> {
    map.get(key)
        .and_then(Json::as_str)
        .ok_or_else(|| Error::Codec(format!("missing string field '{key}'")))
}

fn decode_timestamp(json: &Json) -> Result<DateTime<Utc>> {
    match decode_value(json)? {
        Value::Date(d) => Ok(d),
        Value::String(s) => parse_date(&s),
        other => Err(Error::Codec(format!("expected a timestamp, got {}", other.type_name()))),
    }
}

/// Decode a server response body into [`ServerState`].
pub fn decode_server_state(payload: &Payload) -> Result<ServerState> {
    let mut state = ServerState::default();
    for (key, value) in payload {
        match key.as_str() {
            "className" => state.class_name = value.as_str().map(String::from),
            "objectId" => state.object_id = value.as_str().map(String::from),
            "createdAt" => state.created_at = Some(decode_timestamp(value)?),
            "updatedAt" => state.updated_at = Some(decode_timestamp(value)?),
            "__type" => {}
            _ => {
                state.fields.insert(key.clone(), decode_value(value)?);
            }
        }
    }
    Ok(state)
}

/// Encode a record's estimated view, with its class, ID and timestamps.
pub fn encode_record(record: &Record) -> Result<Json> {
    let mut out = Payload::new();
    out.insert("className".into(), Json::String(record.class_name()));
    if let Some(id) = record.object_id() {
        out.insert("objectId".into(), Json::String(id));
    }
    if let Some(created_at) = record.created_at() {
        out.insert("createdAt".into(), Json::String(format_date(&created_at)));
    }
    if let Some(updated_at) = record.updated_at() {
        out.insert("updatedAt".into(), Json::String(format_date(&updated_at)));
    }
    for (key, value) in record.estimated() {
        out.insert(key, encode_value(&value)?);
    }
    Ok(Json::Object(out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn pointer_encoding() {
        let record = Record::without_data("Post", "p1");
        let json = encode_value(&Value::from(&record)).unwrap();
        assert_eq!(
            json,
            json!({"__type": "Pointer", "className": "Post", "objectId": "p1"})
        );
    }

    #[test]
    fn unsaved_pointer_is_an_error() {
        let record = Record::new("Post");
        let err = encode_value(&Value::from(&record)).unwrap_err();
        assert!(matches!(err, Error::Codec(_)));
    }

    #[test]
    fn date_encoding() {
        let date = Utc.with_ymd_and_hms(2024, 2, 1, 12, 30, 0).unwrap();
        let json = encode_value(&Value::from(date)).unwrap();
        assert_eq!(json, json!({"__type": "Date", "iso": "2024-02-01T12:30:00.000Z"}));
        assert_eq!(decode_value(&json).unwrap(), Value::Date(date));
    }

    #[test]
    fn non_finite_float_rejected() {
        assert!(encode_value(&Value::Float(f64::NAN)).is_err());
    }

    #[test]
    fn operation_encoding() {
        assert_eq!(
            encode_operation(&Operation::Set(Value::from(3))).unwrap(),
            json!(3)
        );
        assert_eq!(
            encode_operation(&Operation::Delete).unwrap(),
            json!({"__op": "Delete"})
        );
        assert_eq!(
            encode_operation(&Operation::Increment(Number::Integer(5))).unwrap(),
            json!({"__op": "Increment", "amount": 5})
        );
        assert_eq!(
            encode_operation(&Operation::ListAddUnique(vec![Value::from("a")])).unwrap(),
            json!({"__op": "AddUnique", "objects": ["a"]})
        );
        assert_eq!(
            encode_operation(&Operation::ListRemove(vec![Value::from(1)])).unwrap(),
            json!({"__op": "Remove", "objects": [1]})
        );
    }

    #[test]
    fn relation_batch_encoding() {
        let op = Operation::RelationBatch {
            adds: vec![Record::without_data("Tag", "a")],
            removes: vec![Record::without_data("Tag", "b")],
        };
        assert_eq!(
            encode_operation(&op).unwrap(),
            json!({
                "__op": "Batch",
                "ops": [
                    {"__op": "AddRelation", "objects": [{"__type": "Pointer", "className": "Tag", "objectId": "a"}]},
                    {"__op": "RemoveRelation", "objects": [{"__type": "Pointer", "className": "Tag", "objectId": "b"}]},
                ]
            })
        );
    }

    #[test]
    fn nested_pointer_inside_containers() {
        let child = Record::without_data("Child", "c1");
        let value = Value::Object(BTreeMap::from([(
            "items".to_string(),
            Value::from(vec![Value::from(&child)]),
        )]));
        assert_eq!(
            encode_value(&value).unwrap(),
            json!({"items": [{"__type": "Pointer", "className": "Child", "objectId": "c1"}]})
        );
    }

    #[test]
    fn decode_server_state_fields() {
        let payload = json!({
            "objectId": "p1",
            "createdAt": "2024-02-01T12:30:00.000Z",
            "title": "hello",
            "author": {"__type": "Pointer", "className": "User", "objectId": "u1"},
            "score": 1.5,
        });
        let state = decode_server_state(payload.as_object().unwrap()).unwrap();

        assert_eq!(state.object_id.as_deref(), Some("p1"));
        assert!(state.created_at.is_some());
        assert_eq!(state.fields["title"], Value::from("hello"));
        assert_eq!(state.fields["score"], Value::from(1.5));
        let author = state.fields["author"].as_record().unwrap();
        assert_eq!(author.object_id().as_deref(), Some("u1"));
        assert!(!author.is_dirty());
    }

    #[test]
    fn decode_embedded_object() {
        let json = json!({"__type": "Object", "className": "User", "objectId": "u1", "name": "ann"});
        let user = decode_value(&json).unwrap();
        let user = user.as_record().unwrap();
        assert_eq!(user.class_name(), "User");
        assert_eq!(user.get("name"), Some(Value::from("ann")));
    }

    #[test]
    fn malformed_date_is_an_error() {
        let payload = json!({"createdAt": "yesterday"});
        assert!(decode_server_state(payload.as_object().unwrap()).is_err());
    }

    #[test]
    fn record_json_roundtrip() {
        let record = Record::without_data("Post", "p1");
        record.set("title", "hello").unwrap();
        record.set("tags", vec!["a", "b"]).unwrap();

        let json = record.to_json().unwrap();
        let parsed = Record::parse_json(&json.to_string()).unwrap();

        assert_eq!(parsed.class_name(), "Post");
        assert_eq!(parsed.object_id().as_deref(), Some("p1"));
        assert_eq!(parsed.get("title"), Some(Value::from("hello")));
        assert_eq!(parsed.get("tags"), Some(Value::from(vec!["a", "b"])));
        assert!(!parsed.is_dirty());
    }
}

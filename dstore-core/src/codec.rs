/// Value codec
///
/// Converts between the typed value model and the tagged wire shape
/// (`{"integerValue": "5"}`, `{"stringValue": "x", "excludeFromIndexes": true}`, ...),
/// and between plain JSON and the value model.
///
/// Integers travel as decimal strings so 64-bit values are never narrowed.
/// Arrays may not contain arrays; an array property's exclusion flag is
/// carried on each element rather than on the array itself.

use crate::entity::{Entity, EntityData, Property};
use crate::error::{Error, Result};
use crate::key::Key;
use crate::value::{GeoPoint, Value};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Tagged wire value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireValue {
    #[serde(flatten)]
    pub kind: ValueKind,
    #[serde(default, skip_serializing_if = "is_false")]
    pub exclude_from_indexes: bool,
}

fn is_false(b: &bool) -> bool {
    !*b
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ValueKind {
    NullValue(()),
    BooleanValue(bool),
    IntegerValue(String),
    DoubleValue(f64),
    /// RFC 3339, UTC
    TimestampValue(String),
    StringValue(String),
    /// Standard base64
    BlobValue(String),
    KeyValue(Key),
    GeoPointValue(GeoPoint),
    EntityValue(WireEntity),
    ArrayValue(WireArray),
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct WireArray {
    #[serde(default)]
    pub values: Vec<WireValue>,
}

/// Wire entity: optional key plus tagged properties
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct WireEntity {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<Key>,
    #[serde(default)]
    pub properties: BTreeMap<String, WireValue>,
}

impl WireValue {
    pub fn new(kind: ValueKind) -> Self {
        Self {
            kind,
            exclude_from_indexes: false,
        }
    }
}

// ============================================================================
// Value model <-> wire
// ============================================================================

/// Encode a value. `exclude` marks the value (or each array element) as
/// excluded from indexes.
pub fn encode_value(value: &Value, exclude: bool) -> Result<WireValue> {
    encode_inner(value, exclude, false)
}

fn encode_inner(value: &Value, exclude: bool, in_array: bool) -> Result<WireValue> {
    let kind = match value {
        Value::Null => ValueKind::NullValue(()),
        Value::Boolean(b) => ValueKind::BooleanValue(*b),
        Value::Integer(n) => ValueKind::IntegerValue(n.to_string()),
        Value::Double(d) => ValueKind::DoubleValue(*d),
        Value::Timestamp(ts) => {
            ValueKind::TimestampValue(ts.to_rfc3339_opts(SecondsFormat::AutoSi, true))
        }
        Value::String(s) => ValueKind::StringValue(s.clone()),
        Value::Blob(bytes) => ValueKind::BlobValue(BASE64.encode(bytes)),
        Value::Key(key) => {
            key.validate()?;
            ValueKind::KeyValue(key.clone())
        }
        Value::GeoPoint(point) => {
            GeoPoint::new(point.latitude, point.longitude)?;
            ValueKind::GeoPointValue(*point)
        }
        Value::Entity(data) => ValueKind::EntityValue(encode_entity(None, data)?),
        Value::Array(values) => {
            if in_array {
                return Err(Error::InvalidValue(
                    "arrays cannot directly contain arrays".to_string(),
                ));
            }
            let values = values
                .iter()
                .map(|v| encode_inner(v, exclude, true))
                .collect::<Result<Vec<_>>>()?;
            return Ok(WireValue::new(ValueKind::ArrayValue(WireArray { values })));
        }
    };

    Ok(WireValue {
        kind,
        exclude_from_indexes: exclude,
    })
}

/// Decode a wire value
pub fn decode_value(wire: &WireValue) -> Result<Value> {
    decode_inner(wire, false)
}

fn decode_inner(wire: &WireValue, in_array: bool) -> Result<Value> {
    Ok(match &wire.kind {
        ValueKind::NullValue(()) => Value::Null,
        ValueKind::BooleanValue(b) => Value::Boolean(*b),
        ValueKind::IntegerValue(digits) => Value::Integer(digits.parse().map_err(|_| {
            Error::InvalidValue(format!("integerValue {:?} is not a 64-bit integer", digits))
        })?),
        ValueKind::DoubleValue(d) => Value::Double(*d),
        ValueKind::TimestampValue(s) => Value::Timestamp(
            DateTime::parse_from_rfc3339(s)
                .map_err(|e| Error::InvalidValue(format!("timestampValue {:?}: {}", s, e)))?
                .with_timezone(&Utc),
        ),
        ValueKind::StringValue(s) => Value::String(s.clone()),
        ValueKind::BlobValue(encoded) => Value::Blob(Bytes::from(
            BASE64
                .decode(encoded)
                .map_err(|e| Error::InvalidValue(format!("blobValue is not base64: {}", e)))?,
        )),
        ValueKind::KeyValue(key) => Value::Key(key.clone()),
        ValueKind::GeoPointValue(point) => {
            Value::GeoPoint(GeoPoint::new(point.latitude, point.longitude)?)
        }
        ValueKind::EntityValue(entity) => Value::Entity(decode_entity_data(entity)?),
        ValueKind::ArrayValue(array) => {
            if in_array {
                return Err(Error::InvalidValue(
                    "arrays cannot directly contain arrays".to_string(),
                ));
            }
            Value::Array(
                array
                    .values
                    .iter()
                    .map(|v| decode_inner(v, true))
                    .collect::<Result<Vec<_>>>()?,
            )
        }
    })
}

/// Whether the decoded property should report itself as excluded
fn wire_excluded(wire: &WireValue) -> bool {
    match &wire.kind {
        ValueKind::ArrayValue(array) if !array.values.is_empty() => {
            wire.exclude_from_indexes || array.values.iter().all(|v| v.exclude_from_indexes)
        }
        _ => wire.exclude_from_indexes,
    }
}

/// Encode a property map, optionally with the owning key
pub fn encode_entity(key: Option<&Key>, data: &EntityData) -> Result<WireEntity> {
    let properties = data
        .iter()
        .map(|(name, property)| {
            if name.is_empty() {
                return Err(Error::InvalidValue("property name must not be empty".to_string()));
            }
            let wire = encode_value(&property.value, property.exclude_from_indexes)
                .map_err(|e| e.with_context(&format!("property {:?}", name)))?;
            Ok((name.clone(), wire))
        })
        .collect::<Result<BTreeMap<_, _>>>()?;

    Ok(WireEntity {
        key: key.cloned(),
        properties,
    })
}

/// Decode the properties of a wire entity, ignoring its key
pub fn decode_entity_data(wire: &WireEntity) -> Result<EntityData> {
    let mut data = EntityData::new();
    for (name, value) in &wire.properties {
        let decoded =
            decode_value(value).map_err(|e| e.with_context(&format!("property {:?}", name)))?;
        data.insert_property(
            name.clone(),
            Property {
                value: decoded,
                exclude_from_indexes: wire_excluded(value),
            },
        );
    }
    Ok(data)
}

/// Decode a stored entity; the key is required
pub fn decode_entity(wire: &WireEntity) -> Result<Entity> {
    let key = wire
        .key
        .clone()
        .ok_or_else(|| Error::InvalidKeyPath("entity result carries no key".to_string()))?;
    Ok(Entity::new(key, decode_entity_data(wire)?))
}

// ============================================================================
// Plain JSON <-> value model
// ============================================================================

/// Infer a value from plain JSON: whole numbers become integers, other
/// numbers doubles, objects embedded entities.
pub fn value_from_json(json: serde_json::Value) -> Result<Value> {
    Ok(match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Boolean(b),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Value::Integer(i),
            None => Value::Double(n.as_f64().ok_or_else(|| {
                Error::InvalidValue(format!("number {} is not representable", n))
            })?),
        },
        serde_json::Value::String(s) => Value::String(s),
        serde_json::Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(value_from_json)
                .collect::<Result<Vec<_>>>()?,
        ),
        serde_json::Value::Object(map) => {
            let mut data = EntityData::new();
            for (name, item) in map {
                data.insert(name, value_from_json(item)?);
            }
            Value::Entity(data)
        }
    })
}

/// Render a value as plain JSON. Timestamps become RFC 3339 strings, blobs
/// base64 strings and keys their wire object.
pub fn value_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Boolean(b) => serde_json::Value::Bool(*b),
        Value::Integer(n) => serde_json::Value::from(*n),
        Value::Double(d) => serde_json::Number::from_f64(*d)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Value::Timestamp(ts) => {
            serde_json::Value::String(ts.to_rfc3339_opts(SecondsFormat::AutoSi, true))
        }
        Value::String(s) => serde_json::Value::String(s.clone()),
        Value::Blob(bytes) => serde_json::Value::String(BASE64.encode(bytes)),
        Value::Key(key) => serde_json::to_value(key).unwrap_or(serde_json::Value::Null),
        Value::GeoPoint(point) => serde_json::json!({
            "latitude": point.latitude,
            "longitude": point.longitude,
        }),
        Value::Entity(data) => serde_json::Value::Object(
            data.iter()
                .map(|(name, property)| (name.clone(), value_to_json(&property.value)))
                .collect(),
        ),
        Value::Array(values) => serde_json::Value::Array(values.iter().map(value_to_json).collect()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{double, int};
    use serde_json::json;

    #[test]
    fn test_integer_travels_as_string() {
        let wire = encode_value(&int("9223372036854775807").unwrap(), false).unwrap();
        assert_eq!(
            serde_json::to_value(&wire).unwrap(),
            json!({"integerValue": "9223372036854775807"})
        );
        assert_eq!(decode_value(&wire).unwrap(), Value::Integer(i64::MAX));
    }

    #[test]
    fn test_double_stays_double() {
        let wire = encode_value(&double(3), false).unwrap();
        assert_eq!(wire.kind, ValueKind::DoubleValue(3.0));
        assert_eq!(decode_value(&wire).unwrap(), Value::Double(3.0));
    }

    #[test]
    fn test_exclusion_flag_on_wire() {
        let wire = encode_value(&Value::string("long text"), true).unwrap();
        assert_eq!(
            serde_json::to_value(&wire).unwrap(),
            json!({"stringValue": "long text", "excludeFromIndexes": true})
        );
    }

    #[test]
    fn test_array_exclusion_applies_per_element() {
        let wire = encode_value(&Value::from(vec!["a", "b"]), true).unwrap();
        assert!(!wire.exclude_from_indexes);
        match &wire.kind {
            ValueKind::ArrayValue(array) => {
                assert_eq!(array.values.len(), 2);
                assert!(array.values.iter().all(|v| v.exclude_from_indexes));
            }
            other => panic!("expected array, got {:?}", other),
        }
        assert!(wire_excluded(&wire));
    }

    #[test]
    fn test_nested_arrays_rejected() {
        let nested = Value::Array(vec![Value::Array(vec![Value::Integer(1)])]);
        let err = encode_value(&nested, false).unwrap_err();
        assert!(matches!(err, Error::InvalidValue(_)));
    }

    #[test]
    fn test_timestamp_and_blob_shapes() {
        let ts = Value::timestamp_millis(1_609_459_200_000).unwrap();
        let wire = encode_value(&ts, false).unwrap();
        assert_eq!(
            serde_json::to_value(&wire).unwrap(),
            json!({"timestampValue": "2021-01-01T00:00:00Z"})
        );
        assert_eq!(decode_value(&wire).unwrap(), ts);

        let blob = Value::Blob(Bytes::from_static(b"hi"));
        let wire = encode_value(&blob, false).unwrap();
        assert_eq!(wire.kind, ValueKind::BlobValue("aGk=".to_string()));
        assert_eq!(decode_value(&wire).unwrap(), blob);
    }

    #[test]
    fn test_null_shape() {
        let wire = encode_value(&Value::Null, false).unwrap();
        assert_eq!(serde_json::to_value(&wire).unwrap(), json!({"nullValue": null}));
    }

    #[test]
    fn test_entity_round_trip_keeps_flags() {
        let key = Key::new("Task", 1);
        let data = EntityData::new()
            .with("title", "Buy milk")
            .with_unindexed("notes", "from the corner shop")
            .with("tags", vec!["home", "errand"]);
        let wire = encode_entity(Some(&key), &data).unwrap();
        let entity = decode_entity(&wire).unwrap();
        assert_eq!(entity.key, key);
        assert_eq!(entity.data, data);
    }

    #[test]
    fn test_decode_entity_requires_key() {
        let wire = encode_entity(None, &EntityData::new().with("a", 1)).unwrap();
        assert!(matches!(decode_entity(&wire), Err(Error::InvalidKeyPath(_))));
        assert_eq!(decode_entity_data(&wire).unwrap().get("a"), Some(&Value::Integer(1)));
    }

    #[test]
    fn test_malformed_wire_integer() {
        let wire = WireValue::new(ValueKind::IntegerValue("12x".to_string()));
        assert!(matches!(decode_value(&wire), Err(Error::InvalidValue(_))));
    }

    #[test]
    fn test_json_inference() {
        let value = value_from_json(json!({"n": 5, "x": 1.5, "tags": ["a"], "inner": {"ok": true}}))
            .unwrap();
        let data = value.as_entity().unwrap();
        assert_eq!(data.get("n"), Some(&Value::Integer(5)));
        assert_eq!(data.get("x"), Some(&Value::Double(1.5)));
        assert_eq!(
            data.get("inner").and_then(Value::as_entity).and_then(|e| e.get("ok")),
            Some(&Value::Boolean(true))
        );
        assert_eq!(
            value_to_json(&value),
            json!({"n": 5, "x": 1.5, "tags": ["a"], "inner": {"ok": true}})
        );
    }
}

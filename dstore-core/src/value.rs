/// Typed property values
///
/// The value union is closed: every variant has an exhaustive encode/decode
/// path in the codec. Integers and doubles are distinct variants so an
/// integer never round-trips through floating point.

use crate::entity::EntityData;
use crate::error::{Error, Result};
use crate::key::Key;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Property value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Boolean(bool),
    /// Exact signed 64-bit integer
    Integer(i64),
    Double(f64),
    Timestamp(DateTime<Utc>),
    String(String),
    Blob(Bytes),
    Key(Key),
    GeoPoint(GeoPoint),
    /// Embedded entity without a key
    Entity(EntityData),
    Array(Vec<Value>),
}

impl Value {
    pub fn string(s: impl Into<String>) -> Self {
        Value::String(s.into())
    }

    pub fn timestamp_millis(millis: i64) -> Result<Self> {
        DateTime::<Utc>::from_timestamp_millis(millis)
            .map(Value::Timestamp)
            .ok_or_else(|| Error::InvalidValue(format!("timestamp {} is out of range", millis)))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Boolean(_) => "boolean",
            Value::Integer(_) => "integer",
            Value::Double(_) => "double",
            Value::Timestamp(_) => "timestamp",
            Value::String(_) => "string",
            Value::Blob(_) => "blob",
            Value::Key(_) => "key",
            Value::GeoPoint(_) => "geoPoint",
            Value::Entity(_) => "entity",
            Value::Array(_) => "array",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Double(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_key(&self) -> Option<&Key> {
        match self {
            Value::Key(k) => Some(k),
            _ => None,
        }
    }

    pub fn as_entity(&self) -> Option<&EntityData> {
        match self {
            Value::Entity(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(values) => Some(values),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Value::Timestamp(ts) => Some(*ts),
            _ => None,
        }
    }

    pub fn as_geo_point(&self) -> Option<GeoPoint> {
        match self {
            Value::GeoPoint(p) => Some(*p),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Integer(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Integer(n as i64)
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Value::Integer(n as i64)
    }
}

impl From<f64> for Value {
    fn from(d: f64) -> Self {
        Value::Double(d)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(ts: DateTime<Utc>) -> Self {
        Value::Timestamp(ts)
    }
}

impl From<Bytes> for Value {
    fn from(b: Bytes) -> Self {
        Value::Blob(b)
    }
}

impl From<Key> for Value {
    fn from(k: Key) -> Self {
        Value::Key(k)
    }
}

impl From<GeoPoint> for Value {
    fn from(p: GeoPoint) -> Self {
        Value::GeoPoint(p)
    }
}

impl From<EntityData> for Value {
    fn from(e: EntityData) -> Self {
        Value::Entity(e)
    }
}

impl From<Int> for Value {
    fn from(int: Int) -> Self {
        Value::Integer(int.value())
    }
}

impl From<Double> for Value {
    fn from(d: Double) -> Self {
        Value::Double(d.value())
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(values: Vec<T>) -> Self {
        Value::Array(values.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}

/// Exact integer carried as its decimal digits.
///
/// Use it when the integer comes from a source that cannot hold 64 bits
/// exactly; the digits are validated once on construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Int {
    digits: String,
}

impl Int {
    pub fn parse(digits: &str) -> Result<Self> {
        let trimmed = digits.trim();
        trimmed
            .parse::<i64>()
            .map_err(|_| Error::InvalidValue(format!("{:?} is not an exact 64-bit integer", digits)))?;
        Ok(Self {
            digits: trimmed.to_string(),
        })
    }

    pub fn value(&self) -> i64 {
        // Validated in `parse` / `From<i64>`
        self.digits.parse().unwrap_or_default()
    }

    pub fn as_str(&self) -> &str {
        &self.digits
    }
}

impl From<i64> for Int {
    fn from(n: i64) -> Self {
        Self {
            digits: n.to_string(),
        }
    }
}

impl FromStr for Int {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Int::parse(s)
    }
}

impl fmt::Display for Int {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.digits)
    }
}

/// Value forced to the double variant, even when it holds a whole number
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Double(f64);

impl Double {
    pub fn new(value: impl Into<f64>) -> Self {
        Double(value.into())
    }

    pub fn parse(s: &str) -> Result<Self> {
        s.trim()
            .parse::<f64>()
            .map(Double)
            .map_err(|_| Error::InvalidValue(format!("{:?} is not a double", s)))
    }

    pub fn value(&self) -> f64 {
        self.0
    }
}

/// Geographic coordinate pair
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Result<Self> {
        if !(-90.0..=90.0).contains(&latitude) {
            return Err(Error::InvalidValue(format!(
                "latitude {} must be within [-90, 90]",
                latitude
            )));
        }
        if !(-180.0..=180.0).contains(&longitude) {
            return Err(Error::InvalidValue(format!(
                "longitude {} must be within [-180, 180]",
                longitude
            )));
        }
        Ok(Self {
            latitude,
            longitude,
        })
    }
}

/// Exact integer value from its decimal digits
pub fn int(digits: &str) -> Result<Value> {
    Int::parse(digits).map(Value::from)
}

/// Double value, even for whole numbers
pub fn double(value: impl Into<f64>) -> Value {
    Value::from(Double::new(value))
}

pub fn geo_point(latitude: f64, longitude: f64) -> Result<Value> {
    GeoPoint::new(latitude, longitude).map(Value::GeoPoint)
}

pub fn is_int(value: &Value) -> bool {
    matches!(value, Value::Integer(_))
}

pub fn is_double(value: &Value) -> bool {
    matches!(value, Value::Double(_))
}

pub fn is_geo_point(value: &Value) -> bool {
    matches!(value, Value::GeoPoint(_))
}

pub fn is_key(value: &Value) -> bool {
    matches!(value, Value::Key(_))
}

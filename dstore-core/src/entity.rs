/// Entities and their property maps
///
/// `EntityData` is the user-facing property map, `Entity` pairs it with the
/// key it was read from or will be written to.

use crate::codec;
use crate::error::{Error, Result};
use crate::key::Key;
use crate::value::Value;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;

/// A property value plus its index-exclusion flag
#[derive(Debug, Clone, PartialEq)]
pub struct Property {
    pub value: Value,
    pub exclude_from_indexes: bool,
}

impl Property {
    pub fn indexed(value: impl Into<Value>) -> Self {
        Self {
            value: value.into(),
            exclude_from_indexes: false,
        }
    }

    pub fn excluded(value: impl Into<Value>) -> Self {
        Self {
            value: value.into(),
            exclude_from_indexes: true,
        }
    }
}

/// Long-form property description: `{name, value, excludeFromIndexes}`
#[derive(Debug, Clone, PartialEq)]
pub struct PropertySpec {
    pub name: String,
    pub value: Value,
    pub exclude_from_indexes: bool,
}

impl PropertySpec {
    pub fn new(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            exclude_from_indexes: false,
        }
    }

    pub fn exclude_from_indexes(mut self) -> Self {
        self.exclude_from_indexes = true;
        self
    }
}

/// Property map of an entity
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EntityData {
    properties: BTreeMap<String, Property>,
}

impl EntityData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Short form: plain name/value pairs, all indexed
    pub fn from_values<I, K, V>(values: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        Self {
            properties: values
                .into_iter()
                .map(|(name, value)| (name.into(), Property::indexed(value)))
                .collect(),
        }
    }

    /// Long form: explicit per-property index control. A repeated name keeps
    /// the last occurrence.
    pub fn from_properties(specs: impl IntoIterator<Item = PropertySpec>) -> Self {
        Self {
            properties: specs
                .into_iter()
                .map(|spec| {
                    (
                        spec.name,
                        Property {
                            value: spec.value,
                            exclude_from_indexes: spec.exclude_from_indexes,
                        },
                    )
                })
                .collect(),
        }
    }

    /// Short form from a plain JSON object
    pub fn from_json(object: serde_json::Value) -> Result<Self> {
        match codec::value_from_json(object)? {
            Value::Entity(data) => Ok(data),
            other => Err(Error::InvalidValue(format!(
                "entity data must be an object, got {}",
                other.type_name()
            ))),
        }
    }

    /// Short form from any serializable value that serializes to an object
    pub fn from_serializable<T: Serialize>(value: &T) -> Result<Self> {
        let json = serde_json::to_value(value)
            .map_err(|e| Error::InvalidValue(format!("cannot serialize entity data: {}", e)))?;
        Self::from_json(json)
    }

    /// Builder-style setter for an indexed property
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    /// Builder-style setter for a property excluded from indexes
    pub fn with_unindexed(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(name.into(), Property::excluded(value));
        self
    }

    /// Mark the named properties as excluded from indexes (short-form list)
    pub fn exclude_from_indexes<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for name in names {
            if let Some(property) = self.properties.get_mut(name.as_ref()) {
                property.exclude_from_indexes = true;
            }
        }
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) -> Option<Property> {
        self.properties.insert(name.into(), Property::indexed(value))
    }

    pub fn insert_property(&mut self, name: impl Into<String>, property: Property) -> Option<Property> {
        self.properties.insert(name.into(), property)
    }

    pub fn remove(&mut self, name: &str) -> Option<Property> {
        self.properties.remove(name)
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.properties.get(name).map(|p| &p.value)
    }

    pub fn property(&self, name: &str) -> Option<&Property> {
        self.properties.get(name)
    }

    pub fn is_excluded(&self, name: &str) -> bool {
        self.properties
            .get(name)
            .map(|p| p.exclude_from_indexes)
            .unwrap_or(false)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Property)> {
        self.properties.iter()
    }

    pub fn len(&self) -> usize {
        self.properties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    /// Names of properties excluded from indexes, in name order
    pub fn excluded_names(&self) -> Vec<&str> {
        self.properties
            .iter()
            .filter(|(_, p)| p.exclude_from_indexes)
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// Plain JSON object of the property values
    pub fn to_json(&self) -> serde_json::Value {
        codec::value_to_json(&Value::Entity(self.clone()))
    }

    /// Deserialize the property values into a user type
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.to_json())
            .map_err(|e| Error::InvalidValue(format!("cannot deserialize entity data: {}", e)))
    }
}

impl IntoIterator for EntityData {
    type Item = (String, Property);
    type IntoIter = std::collections::btree_map::IntoIter<String, Property>;

    fn into_iter(self) -> Self::IntoIter {
        self.properties.into_iter()
    }
}

/// Key and data of a stored entity
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    pub key: Key,
    pub data: EntityData,
}

impl Entity {
    pub fn new(key: Key, data: EntityData) -> Self {
        Self { key, data }
    }

    pub fn from_serializable<T: Serialize>(key: Key, value: &T) -> Result<Self> {
        Ok(Self::new(key, EntityData::from_serializable(value)?))
    }

    pub fn key(&self) -> &Key {
        &self.key
    }

    pub fn data(&self) -> &EntityData {
        &self.data
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.data.get(name)
    }

    pub fn into_parts(self) -> (Key, EntityData) {
        (self.key, self.data)
    }

    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T> {
        self.data.deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Task {
        description: String,
        priority: i64,
        done: bool,
    }

    #[test]
    fn test_short_form_with_exclusion_list() {
        let data = EntityData::from_values([("description", "Buy milk"), ("notes", "long text")])
            .exclude_from_indexes(["notes"]);
        assert!(data.is_excluded("notes"));
        assert!(!data.is_excluded("description"));
        assert_eq!(data.excluded_names(), vec!["notes"]);
    }

    #[test]
    fn test_long_form() {
        let data = EntityData::from_properties(vec![
            PropertySpec::new("title", "Hello"),
            PropertySpec::new("body", "...").exclude_from_indexes(),
        ]);
        assert_eq!(data.len(), 2);
        assert!(data.is_excluded("body"));
        assert_eq!(data.get("title"), Some(&Value::string("Hello")));
    }

    #[test]
    fn test_user_property_named_key_is_plain_data() {
        let data = EntityData::new().with("key", "not the entity key");
        let entity = Entity::new(Key::new("Doc", 1), data);
        assert_eq!(entity.get("key"), Some(&Value::string("not the entity key")));
        assert_eq!(entity.key().id(), Some(1));
    }

    #[test]
    fn test_serializable_round_trip() {
        let task = Task {
            description: "Write tests".to_string(),
            priority: 4,
            done: false,
        };
        let entity = Entity::from_serializable(Key::new("Task", 7), &task).unwrap();
        assert_eq!(entity.get("priority"), Some(&Value::Integer(4)));
        let back: Task = entity.deserialize().unwrap();
        assert_eq!(back, task);
    }

    #[test]
    fn test_from_json_requires_object() {
        let err = EntityData::from_json(serde_json::json!([1, 2])).unwrap_err();
        assert!(matches!(err, Error::InvalidValue(_)));
    }
}

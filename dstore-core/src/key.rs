/// Hierarchical entity keys
///
/// A key is an ordered path of (kind, identifier) pairs scoped by an optional
/// namespace. Only the final identifier may be absent; such a key is
/// incomplete and is only accepted by allocation and insert-style writes.

use crate::error::{Error, Result};
use crate::value::Int;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a single path element
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KeyId {
    /// Numeric id, usually allocated by the store
    Id(i64),
    /// User-chosen name
    Name(String),
}

impl From<i64> for KeyId {
    fn from(id: i64) -> Self {
        KeyId::Id(id)
    }
}

impl From<i32> for KeyId {
    fn from(id: i32) -> Self {
        KeyId::Id(id as i64)
    }
}

impl From<&str> for KeyId {
    fn from(name: &str) -> Self {
        KeyId::Name(name.to_string())
    }
}

impl From<String> for KeyId {
    fn from(name: String) -> Self {
        KeyId::Name(name)
    }
}

impl From<Int> for KeyId {
    fn from(int: Int) -> Self {
        KeyId::Id(int.value())
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyId::Id(id) => write!(f, "{}", id),
            KeyId::Name(name) => write!(f, "{:?}", name),
        }
    }
}

/// One (kind, identifier) pair of a key path
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PathElement {
    kind: String,
    id: Option<KeyId>,
}

impl PathElement {
    pub fn new(kind: impl Into<String>, id: Option<KeyId>) -> Self {
        Self {
            kind: kind.into(),
            id,
        }
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn id(&self) -> Option<&KeyId> {
        self.id.as_ref()
    }

    pub fn is_complete(&self) -> bool {
        self.id.is_some()
    }
}

/// Element of a flattened `[kind, id, kind, id, ...]` path
#[derive(Debug, Clone, PartialEq)]
pub enum PathToken {
    Str(String),
    Int(i64),
    /// Missing identifier; only legal as the final token
    Absent,
}

impl From<&str> for PathToken {
    fn from(s: &str) -> Self {
        PathToken::Str(s.to_string())
    }
}

impl From<String> for PathToken {
    fn from(s: String) -> Self {
        PathToken::Str(s)
    }
}

impl From<i64> for PathToken {
    fn from(n: i64) -> Self {
        PathToken::Int(n)
    }
}

impl From<i32> for PathToken {
    fn from(n: i32) -> Self {
        PathToken::Int(n as i64)
    }
}

impl From<Int> for PathToken {
    fn from(int: Int) -> Self {
        PathToken::Int(int.value())
    }
}

impl From<KeyId> for PathToken {
    fn from(id: KeyId) -> Self {
        match id {
            KeyId::Id(n) => PathToken::Int(n),
            KeyId::Name(s) => PathToken::Str(s),
        }
    }
}

impl From<Option<KeyId>> for PathToken {
    fn from(id: Option<KeyId>) -> Self {
        id.map(PathToken::from).unwrap_or(PathToken::Absent)
    }
}

impl TryFrom<&serde_json::Value> for PathToken {
    type Error = Error;

    /// Accepts strings, integers, null and the exact-integer wrapper
    /// `{"value": "123"}`. Anything else is not a valid path element.
    fn try_from(value: &serde_json::Value) -> Result<Self> {
        match value {
            serde_json::Value::String(s) => Ok(PathToken::Str(s.clone())),
            serde_json::Value::Null => Ok(PathToken::Absent),
            serde_json::Value::Number(n) => n.as_i64().map(PathToken::Int).ok_or_else(|| {
                Error::InvalidKeyPath(format!("identifier {} is not an integer", n))
            }),
            serde_json::Value::Object(map) if map.len() == 1 => match map.get("value") {
                Some(serde_json::Value::String(s)) => Ok(PathToken::from(Int::parse(s).map_err(
                    |_| Error::InvalidKeyPath(format!("identifier {:?} is not an exact integer", s)),
                )?)),
                _ => Err(Error::InvalidKeyPath(format!(
                    "unsupported path element {}",
                    value
                ))),
            },
            other => Err(Error::InvalidKeyPath(format!(
                "unsupported path element {}",
                other
            ))),
        }
    }
}

/// Entity key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "WireKey", try_from = "WireKey")]
pub struct Key {
    namespace: Option<String>,
    path: Vec<PathElement>,
}

impl Key {
    /// Create a single-element complete key in the default namespace.
    ///
    /// Unchecked shorthand: an empty kind or name is only rejected when the
    /// key is used. Use [`Key::try_new`] or [`Key::from_path`] to validate at
    /// construction.
    pub fn new(kind: impl Into<String>, id: impl Into<KeyId>) -> Self {
        Self {
            namespace: None,
            path: vec![PathElement::new(kind, Some(id.into()))],
        }
    }

    /// Create a single-element key whose identifier will be allocated by the
    /// store. Unchecked like [`Key::new`].
    pub fn incomplete(kind: impl Into<String>) -> Self {
        Self {
            namespace: None,
            path: vec![PathElement::new(kind, None)],
        }
    }

    /// Checked form of [`Key::new`]
    pub fn try_new(kind: impl Into<String>, id: impl Into<KeyId>) -> Result<Self> {
        let key = Self::new(kind, id);
        key.validate()?;
        Ok(key)
    }

    /// Build a key from a flattened `[kind, id, kind, id, ...]` path.
    ///
    /// The path must have an even length; use [`PathToken::Absent`] as the
    /// final identifier for an incomplete key.
    pub fn from_path(namespace: Option<&str>, tokens: Vec<PathToken>) -> Result<Self> {
        if tokens.is_empty() {
            return Err(Error::InvalidKeyPath("path must not be empty".to_string()));
        }
        if tokens.len() % 2 != 0 {
            return Err(Error::InvalidKeyPath(format!(
                "path length must be even, got {} elements",
                tokens.len()
            )));
        }

        let mut elements = Vec::with_capacity(tokens.len() / 2);
        let mut iter = tokens.into_iter();
        while let (Some(kind), Some(id)) = (iter.next(), iter.next()) {
            let kind = match kind {
                PathToken::Str(kind) => kind,
                other => {
                    return Err(Error::InvalidKeyPath(format!(
                        "kind must be a string, got {:?}",
                        other
                    )))
                }
            };
            let id = match id {
                PathToken::Str(name) => Some(KeyId::Name(name)),
                PathToken::Int(n) => Some(KeyId::Id(n)),
                PathToken::Absent => None,
            };
            elements.push(PathElement::new(kind, id));
        }

        Self::from_elements(namespace, elements)
    }

    /// Build a key from a JSON array path such as `["Company", 5, "Employee", "bob"]`
    pub fn from_json_path(namespace: Option<&str>, path: &serde_json::Value) -> Result<Self> {
        let items = path
            .as_array()
            .ok_or_else(|| Error::InvalidKeyPath(format!("path must be an array, got {}", path)))?;
        let tokens = items
            .iter()
            .map(PathToken::try_from)
            .collect::<Result<Vec<_>>>()?;
        Self::from_path(namespace, tokens)
    }

    /// Build a key from structured path elements
    pub fn from_elements(namespace: Option<&str>, path: Vec<PathElement>) -> Result<Self> {
        let key = Self {
            namespace: normalize_namespace(namespace.map(str::to_string)),
            path,
        };
        key.validate()?;
        Ok(key)
    }

    /// Return the same path scoped to another namespace
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = normalize_namespace(Some(namespace.into()));
        self
    }

    /// Append a complete child element. The parent must be complete.
    pub fn child(&self, kind: impl Into<String>, id: impl Into<KeyId>) -> Result<Self> {
        self.extend(PathElement::new(kind, Some(id.into())))
    }

    /// Append an incomplete child element. The parent must be complete.
    pub fn incomplete_child(&self, kind: impl Into<String>) -> Result<Self> {
        self.extend(PathElement::new(kind, None))
    }

    fn extend(&self, element: PathElement) -> Result<Self> {
        self.ensure_complete("child key")?;
        let mut path = self.path.clone();
        path.push(element);
        let key = Self {
            namespace: self.namespace.clone(),
            path,
        };
        key.validate()?;
        Ok(key)
    }

    /// Fill in the final identifier of an incomplete key
    pub fn with_id(&self, id: impl Into<KeyId>) -> Result<Self> {
        if self.is_complete() {
            return Err(Error::InvalidKeyPath(format!("key {} is already complete", self)));
        }
        let mut key = self.clone();
        if let Some(last) = key.path.last_mut() {
            last.id = Some(id.into());
        }
        key.validate()?;
        Ok(key)
    }

    /// Check structural invariants
    pub fn validate(&self) -> Result<()> {
        if self.path.is_empty() {
            return Err(Error::InvalidKeyPath("path must not be empty".to_string()));
        }
        let last = self.path.len() - 1;
        for (i, element) in self.path.iter().enumerate() {
            if element.kind.is_empty() {
                return Err(Error::InvalidKeyPath(format!(
                    "kind at position {} must not be empty",
                    i
                )));
            }
            match &element.id {
                None if i != last => {
                    return Err(Error::InvalidKeyPath(format!(
                        "ancestor {} at position {} has no identifier",
                        element.kind, i
                    )))
                }
                Some(KeyId::Name(name)) if name.is_empty() => {
                    return Err(Error::InvalidKeyPath(format!(
                        "name of {} must not be empty",
                        element.kind
                    )))
                }
                Some(KeyId::Id(0)) => {
                    return Err(Error::InvalidKeyPath(format!(
                        "id of {} must not be zero",
                        element.kind
                    )))
                }
                _ => {}
            }
        }
        Ok(())
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    /// Kind of the final path element
    pub fn kind(&self) -> &str {
        self.path.last().map(|e| e.kind.as_str()).unwrap_or("")
    }

    /// Identifier of the final path element
    pub fn id_or_name(&self) -> Option<&KeyId> {
        self.path.last().and_then(|e| e.id.as_ref())
    }

    pub fn id(&self) -> Option<i64> {
        match self.id_or_name() {
            Some(KeyId::Id(id)) => Some(*id),
            _ => None,
        }
    }

    pub fn name(&self) -> Option<&str> {
        match self.id_or_name() {
            Some(KeyId::Name(name)) => Some(name),
            _ => None,
        }
    }

    pub fn elements(&self) -> &[PathElement] {
        &self.path
    }

    /// Number of path elements
    pub fn depth(&self) -> usize {
        self.path.len()
    }

    /// Flattened path, mirroring the `from_path` input
    pub fn path(&self) -> Vec<PathToken> {
        self.path
            .iter()
            .flat_map(|e| [PathToken::Str(e.kind.clone()), PathToken::from(e.id.clone())])
            .collect()
    }

    /// The key formed by dropping the final path element
    pub fn parent(&self) -> Option<Key> {
        if self.path.len() <= 1 {
            return None;
        }
        Some(Key {
            namespace: self.namespace.clone(),
            path: self.path[..self.path.len() - 1].to_vec(),
        })
    }

    pub fn is_complete(&self) -> bool {
        self.path.last().map(PathElement::is_complete).unwrap_or(false)
    }

    /// Fail with `InvalidKeyPath` unless every path element has an identifier
    pub fn ensure_complete(&self, operation: &str) -> Result<()> {
        self.validate()?;
        if !self.is_complete() {
            return Err(Error::InvalidKeyPath(format!(
                "{} requires a complete key, got {}",
                operation, self
            )));
        }
        Ok(())
    }

    /// True if `other` lives strictly below this key in the same namespace
    pub fn is_ancestor_of(&self, other: &Key) -> bool {
        self.is_complete()
            && self.namespace == other.namespace
            && self.path.len() < other.path.len()
            && other.path[..self.path.len()] == self.path[..]
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ns) = &self.namespace {
            write!(f, "{}:", ns)?;
        }
        for (i, element) in self.path.iter().enumerate() {
            if i > 0 {
                write!(f, "/")?;
            }
            match &element.id {
                Some(id) => write!(f, "{}({})", element.kind, id)?,
                None => write!(f, "{}(?)", element.kind)?,
            }
        }
        Ok(())
    }
}

fn normalize_namespace(namespace: Option<String>) -> Option<String> {
    namespace.filter(|ns| !ns.is_empty())
}

// ============================================================================
// Wire shape: {"partitionId": {"namespaceId": ...}, "path": [{"kind", "id"|"name"}]}
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireKey {
    #[serde(default)]
    partition_id: WirePartition,
    path: Vec<WirePathElement>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WirePartition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    namespace_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WirePathElement {
    kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
}

impl From<Key> for WireKey {
    fn from(key: Key) -> Self {
        let path = key
            .path
            .into_iter()
            .map(|element| {
                let (id, name) = match element.id {
                    Some(KeyId::Id(id)) => (Some(id.to_string()), None),
                    Some(KeyId::Name(name)) => (None, Some(name)),
                    None => (None, None),
                };
                WirePathElement {
                    kind: element.kind,
                    id,
                    name,
                }
            })
            .collect();
        WireKey {
            partition_id: WirePartition {
                namespace_id: key.namespace,
            },
            path,
        }
    }
}

impl TryFrom<WireKey> for Key {
    type Error = Error;

    fn try_from(wire: WireKey) -> Result<Self> {
        let path = wire
            .path
            .into_iter()
            .map(|element| {
                let id = match (element.id, element.name) {
                    (Some(_), Some(_)) => {
                        return Err(Error::InvalidKeyPath(format!(
                            "path element {} has both id and name",
                            element.kind
                        )))
                    }
                    (Some(id), None) => Some(KeyId::Id(id.parse().map_err(|_| {
                        Error::InvalidKeyPath(format!("id {:?} is not an integer", id))
                    })?)),
                    (None, Some(name)) => Some(KeyId::Name(name)),
                    (None, None) => None,
                };
                Ok(PathElement::new(element.kind, id))
            })
            .collect::<Result<Vec<_>>>()?;
        Key::from_elements(wire.partition_id.namespace_id.as_deref(), path)
    }
}

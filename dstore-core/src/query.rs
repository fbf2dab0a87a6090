/// Query model
///
/// `Query` is an immutable specification: every builder call returns a new
/// query and leaves the receiver untouched, so one query can be shared and
/// run any number of times. Building a query performs no I/O.

use crate::codec::{decode_value, encode_value, WireValue};
use crate::error::{Error, Result};
use crate::key::Key;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Pseudo-property naming the entity key in filters and orders
pub const KEY_PROPERTY: &str = "__key__";

/// Comparison operator of a property filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FilterOperator {
    LessThan,
    LessThanOrEqual,
    Equal,
    GreaterThanOrEqual,
    GreaterThan,
}

impl FilterOperator {
    pub fn symbol(&self) -> &'static str {
        match self {
            FilterOperator::LessThan => "<",
            FilterOperator::LessThanOrEqual => "<=",
            FilterOperator::Equal => "=",
            FilterOperator::GreaterThanOrEqual => ">=",
            FilterOperator::GreaterThan => ">",
        }
    }

    pub fn is_inequality(&self) -> bool {
        !matches!(self, FilterOperator::Equal)
    }
}

impl FromStr for FilterOperator {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "<" => Ok(FilterOperator::LessThan),
            "<=" => Ok(FilterOperator::LessThanOrEqual),
            "=" => Ok(FilterOperator::Equal),
            ">=" => Ok(FilterOperator::GreaterThanOrEqual),
            ">" => Ok(FilterOperator::GreaterThan),
            other => Err(Error::InvalidQuery(format!(
                "unsupported filter operator {:?}",
                other
            ))),
        }
    }
}

impl fmt::Display for FilterOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    #[default]
    Ascending,
    Descending,
}

/// Single property filter
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub property: String,
    pub op: FilterOperator,
    pub value: Value,
}

/// Single sort key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub property: String,
    pub direction: Direction,
}

/// Opaque resume position within a query's result order
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cursor(String);

impl Cursor {
    pub fn new(token: impl Into<String>) -> Self {
        Cursor(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Cursor {
    fn from(s: &str) -> Self {
        Cursor(s.to_string())
    }
}

impl From<String> for Cursor {
    fn from(s: String) -> Self {
        Cursor(s)
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Whether a query batch is the last one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MoreResults {
    /// The store stopped early and may have more results after the cursor
    NotFinished,
    MoreResultsAfterLimit,
    MoreResultsAfterCursor,
    NoMoreResults,
}

impl MoreResults {
    pub const MORE_RESULTS_AFTER_CURSOR: &'static str = "MORE_RESULTS_AFTER_CURSOR";
    pub const MORE_RESULTS_AFTER_LIMIT: &'static str = "MORE_RESULTS_AFTER_LIMIT";
    pub const NO_MORE_RESULTS: &'static str = "NO_MORE_RESULTS";

    pub fn as_str(&self) -> &'static str {
        match self {
            MoreResults::NotFinished => "NOT_FINISHED",
            MoreResults::MoreResultsAfterLimit => Self::MORE_RESULTS_AFTER_LIMIT,
            MoreResults::MoreResultsAfterCursor => Self::MORE_RESULTS_AFTER_CURSOR,
            MoreResults::NoMoreResults => Self::NO_MORE_RESULTS,
        }
    }

    /// True if re-running from the end cursor can yield more entities
    pub fn has_more(&self) -> bool {
        !matches!(self, MoreResults::NoMoreResults)
    }
}

/// Position information reported alongside query results
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryInfo {
    pub end_cursor: Option<Cursor>,
    pub more_results: MoreResults,
}

/// Read consistency for lookups and queries outside a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReadConsistency {
    #[default]
    Strong,
    Eventual,
}

/// Per-call read options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueryOptions {
    /// Ignored inside a transaction, where reads use the transaction snapshot
    pub consistency: Option<ReadConsistency>,
    /// Total RunQuery calls allowed for one logical run, the first included.
    /// `None` issues exactly one call.
    pub max_api_calls: Option<u32>,
}

impl QueryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_consistency(mut self, consistency: ReadConsistency) -> Self {
        self.consistency = Some(consistency);
        self
    }

    pub fn with_max_api_calls(mut self, calls: u32) -> Self {
        self.max_api_calls = Some(calls);
        self
    }

    /// Number of RunQuery calls one run may issue
    pub fn call_budget(&self) -> u32 {
        self.max_api_calls.map(|n| n.max(1)).unwrap_or(1)
    }
}

/// Plain data behind a [`Query`]
#[derive(Debug, Clone, PartialEq, Default)]
pub struct QuerySpec {
    pub namespace: Option<String>,
    pub kind: String,
    pub ancestor: Option<Key>,
    pub filters: Vec<Filter>,
    pub orders: Vec<Order>,
    pub projection: Vec<String>,
    pub group_by: Vec<String>,
    pub start_cursor: Option<Cursor>,
    pub end_cursor: Option<Cursor>,
    pub limit: Option<u32>,
    pub offset: u32,
}

impl QuerySpec {
    pub fn validate(&self) -> Result<()> {
        if self.kind.is_empty() {
            return Err(Error::InvalidQuery("kind must not be empty".to_string()));
        }
        if let Some(ancestor) = &self.ancestor {
            ancestor
                .ensure_complete("ancestor filter")
                .map_err(|e| Error::InvalidQuery(e.to_string()))?;
            if ancestor.namespace() != self.namespace.as_deref() {
                return Err(Error::InvalidQuery(format!(
                    "ancestor {} is outside the query namespace",
                    ancestor
                )));
            }
        }
        for filter in &self.filters {
            if filter.property.is_empty() {
                return Err(Error::InvalidQuery("filter property must not be empty".to_string()));
            }
            match (&filter.value, filter.property.as_str()) {
                (Value::Key(key), KEY_PROPERTY) => key
                    .ensure_complete("__key__ filter")
                    .map_err(|e| Error::InvalidQuery(e.to_string()))?,
                (other, KEY_PROPERTY) => {
                    return Err(Error::InvalidQuery(format!(
                        "__key__ filter needs a key value, got {}",
                        other.type_name()
                    )))
                }
                (Value::Array(_), _) => {
                    return Err(Error::InvalidQuery(format!(
                        "filter on {} cannot compare against an array",
                        filter.property
                    )))
                }
                _ => {}
            }
        }
        for name in self
            .orders
            .iter()
            .map(|o| &o.property)
            .chain(&self.projection)
            .chain(&self.group_by)
        {
            if name.is_empty() {
                return Err(Error::InvalidQuery("property name must not be empty".to_string()));
            }
        }
        Ok(())
    }

    /// Wire form of the query
    pub fn to_wire(&self) -> Result<WireQuery> {
        self.validate()?;

        let mut filters = Vec::with_capacity(self.filters.len() + 1);
        if let Some(ancestor) = &self.ancestor {
            filters.push(WireFilter::PropertyFilter(WirePropertyFilter {
                property: PropertyReference::new(KEY_PROPERTY),
                op: WireOperator::HasAncestor,
                value: encode_value(&Value::Key(ancestor.clone()), false)?,
            }));
        }
        for filter in &self.filters {
            filters.push(WireFilter::PropertyFilter(WirePropertyFilter {
                property: PropertyReference::new(&filter.property),
                op: WireOperator::from(filter.op),
                value: encode_value(&filter.value, false)?,
            }));
        }
        let filter = match filters.len() {
            0 => None,
            1 => filters.pop(),
            _ => Some(WireFilter::CompositeFilter(WireCompositeFilter {
                op: CompositeOperator::And,
                filters,
            })),
        };

        Ok(WireQuery {
            kind: vec![KindExpression {
                name: self.kind.clone(),
            }],
            filter,
            order: self
                .orders
                .iter()
                .map(|o| PropertyOrder {
                    property: PropertyReference::new(&o.property),
                    direction: o.direction,
                })
                .collect(),
            projection: self
                .projection
                .iter()
                .map(|name| Projection {
                    property: PropertyReference::new(name),
                })
                .collect(),
            distinct_on: self.group_by.iter().map(PropertyReference::new).collect(),
            start_cursor: self.start_cursor.clone(),
            end_cursor: self.end_cursor.clone(),
            offset: self.offset,
            limit: self.limit,
        })
    }

    /// Rebuild a query from its wire form
    pub fn from_wire(namespace: Option<&str>, wire: &WireQuery) -> Result<Self> {
        let kind = match wire.kind.as_slice() {
            [single] => single.name.clone(),
            other => {
                return Err(Error::InvalidQuery(format!(
                    "exactly one kind is supported, got {}",
                    other.len()
                )))
            }
        };

        let mut spec = QuerySpec {
            namespace: namespace.filter(|ns| !ns.is_empty()).map(str::to_string),
            kind,
            start_cursor: wire.start_cursor.clone(),
            end_cursor: wire.end_cursor.clone(),
            limit: wire.limit,
            offset: wire.offset,
            ..Default::default()
        };

        let property_filters = match &wire.filter {
            None => Vec::new(),
            Some(WireFilter::PropertyFilter(f)) => vec![f.clone()],
            Some(WireFilter::CompositeFilter(c)) => c
                .filters
                .iter()
                .map(|f| match f {
                    WireFilter::PropertyFilter(p) => Ok(p.clone()),
                    WireFilter::CompositeFilter(_) => Err(Error::InvalidQuery(
                        "nested composite filters are not supported".to_string(),
                    )),
                })
                .collect::<Result<Vec<_>>>()?,
        };

        for f in property_filters {
            let value = decode_value(&f.value)?;
            match f.op.to_operator() {
                Some(op) => spec.filters.push(Filter {
                    property: f.property.name,
                    op,
                    value,
                }),
                None => match value {
                    Value::Key(key) if f.property.name == KEY_PROPERTY => spec.ancestor = Some(key),
                    _ => {
                        return Err(Error::InvalidQuery(
                            "HAS_ANCESTOR needs a __key__ key value".to_string(),
                        ))
                    }
                },
            }
        }

        spec.orders = wire
            .order
            .iter()
            .map(|o| Order {
                property: o.property.name.clone(),
                direction: o.direction,
            })
            .collect();
        spec.projection = wire.projection.iter().map(|p| p.property.name.clone()).collect();
        spec.group_by = wire.distinct_on.iter().map(|p| p.name.clone()).collect();

        spec.validate()?;
        Ok(spec)
    }
}

/// Immutable query builder
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    spec: QuerySpec,
}

impl Query {
    pub fn new(namespace: Option<&str>, kind: impl Into<String>) -> Self {
        Self {
            spec: QuerySpec {
                namespace: namespace.filter(|ns| !ns.is_empty()).map(str::to_string),
                kind: kind.into(),
                ..Default::default()
            },
        }
    }

    pub fn spec(&self) -> &QuerySpec {
        &self.spec
    }

    pub fn namespace(&self) -> Option<&str> {
        self.spec.namespace.as_deref()
    }

    pub fn kind(&self) -> &str {
        &self.spec.kind
    }

    fn derive(&self, f: impl FnOnce(&mut QuerySpec)) -> Query {
        let mut spec = self.spec.clone();
        f(&mut spec);
        Query { spec }
    }

    /// Add a property filter; filters apply in insertion order
    pub fn filter(&self, property: impl Into<String>, op: FilterOperator, value: impl Into<Value>) -> Query {
        let filter = Filter {
            property: property.into(),
            op,
            value: value.into(),
        };
        self.derive(|spec| spec.filters.push(filter))
    }

    /// Equality filter, the two-argument form of `filter`
    pub fn filter_eq(&self, property: impl Into<String>, value: impl Into<Value>) -> Query {
        self.filter(property, FilterOperator::Equal, value)
    }

    /// Filter using an operator string such as `">="`
    pub fn filter_str(&self, property: impl Into<String>, op: &str, value: impl Into<Value>) -> Result<Query> {
        Ok(self.filter(property, op.parse()?, value))
    }

    /// Filter on the entity key itself
    pub fn filter_key(&self, op: FilterOperator, key: Key) -> Query {
        self.filter(KEY_PROPERTY, op, Value::Key(key))
    }

    /// Sort by a property. Ordering an already-ordered property replaces
    /// its direction in place.
    pub fn order(&self, property: impl Into<String>, direction: Direction) -> Query {
        let property = property.into();
        self.derive(|spec| {
            match spec.orders.iter_mut().find(|o| o.property == property) {
                Some(existing) => existing.direction = direction,
                None => spec.orders.push(Order {
                    property,
                    direction,
                }),
            }
        })
    }

    pub fn group_by<I, S>(&self, properties: I) -> Query
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let properties: Vec<String> = properties.into_iter().map(Into::into).collect();
        self.derive(|spec| spec.group_by = properties)
    }

    /// Restrict results to the given properties
    pub fn select<I, S>(&self, properties: I) -> Query
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let properties: Vec<String> = properties.into_iter().map(Into::into).collect();
        self.derive(|spec| spec.projection = properties)
    }

    pub fn start(&self, cursor: impl Into<Cursor>) -> Query {
        let cursor = cursor.into();
        self.derive(|spec| spec.start_cursor = Some(cursor))
    }

    pub fn end(&self, cursor: impl Into<Cursor>) -> Query {
        let cursor = cursor.into();
        self.derive(|spec| spec.end_cursor = Some(cursor))
    }

    pub fn limit(&self, limit: u32) -> Query {
        self.derive(|spec| spec.limit = Some(limit))
    }

    pub fn offset(&self, offset: u32) -> Query {
        self.derive(|spec| spec.offset = offset)
    }

    /// Only match entities whose key path starts with `ancestor`
    pub fn has_ancestor(&self, ancestor: Key) -> Query {
        self.derive(|spec| spec.ancestor = Some(ancestor))
    }

    pub fn with_namespace(&self, namespace: impl Into<String>) -> Query {
        let namespace = namespace.into();
        self.derive(|spec| spec.namespace = Some(namespace).filter(|ns| !ns.is_empty()))
    }

    pub fn validate(&self) -> Result<()> {
        self.spec.validate()
    }

    pub fn to_wire(&self) -> Result<WireQuery> {
        self.spec.to_wire()
    }
}

impl From<QuerySpec> for Query {
    fn from(spec: QuerySpec) -> Self {
        Query { spec }
    }
}

// ============================================================================
// Wire shape
// ============================================================================

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireQuery {
    #[serde(default)]
    pub kind: Vec<KindExpression>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<WireFilter>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub order: Vec<PropertyOrder>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub projection: Vec<Projection>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub distinct_on: Vec<PropertyReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_cursor: Option<Cursor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_cursor: Option<Cursor>,
    #[serde(default)]
    pub offset: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindExpression {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyReference {
    pub name: String,
}

impl PropertyReference {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self {
            name: name.as_ref().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyOrder {
    pub property: PropertyReference,
    pub direction: Direction,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Projection {
    pub property: PropertyReference,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WireFilter {
    CompositeFilter(WireCompositeFilter),
    PropertyFilter(WirePropertyFilter),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireCompositeFilter {
    pub op: CompositeOperator,
    pub filters: Vec<WireFilter>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CompositeOperator {
    And,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WirePropertyFilter {
    pub property: PropertyReference,
    pub op: WireOperator,
    pub value: WireValue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WireOperator {
    LessThan,
    LessThanOrEqual,
    Equal,
    GreaterThanOrEqual,
    GreaterThan,
    HasAncestor,
}

impl WireOperator {
    fn to_operator(self) -> Option<FilterOperator> {
        match self {
            WireOperator::LessThan => Some(FilterOperator::LessThan),
            WireOperator::LessThanOrEqual => Some(FilterOperator::LessThanOrEqual),
            WireOperator::Equal => Some(FilterOperator::Equal),
            WireOperator::GreaterThanOrEqual => Some(FilterOperator::GreaterThanOrEqual),
            WireOperator::GreaterThan => Some(FilterOperator::GreaterThan),
            WireOperator::HasAncestor => None,
        }
    }
}

impl From<FilterOperator> for WireOperator {
    fn from(op: FilterOperator) -> Self {
        match op {
            FilterOperator::LessThan => WireOperator::LessThan,
            FilterOperator::LessThanOrEqual => WireOperator::LessThanOrEqual,
            FilterOperator::Equal => WireOperator::Equal,
            FilterOperator::GreaterThanOrEqual => WireOperator::GreaterThanOrEqual,
            FilterOperator::GreaterThan => WireOperator::GreaterThan,
        }
    }
}

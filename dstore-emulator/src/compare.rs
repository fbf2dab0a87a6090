/// Value ordering and filter matching
///
/// Values of different types order by type class first:
/// null < numbers < timestamps < booleans < blobs < strings < keys
/// < geo points < embedded entities < arrays. Integers and doubles share
/// one class and compare numerically.

use dstore_core::{Entity, Filter, FilterOperator, Value, KEY_PROPERTY};
use std::cmp::Ordering;

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Integer(_) | Value::Double(_) => 1,
        Value::Timestamp(_) => 2,
        Value::Boolean(_) => 3,
        Value::Blob(_) => 4,
        Value::String(_) => 5,
        Value::Key(_) => 6,
        Value::GeoPoint(_) => 7,
        Value::Entity(_) => 8,
        Value::Array(_) => 9,
    }
}

/// Total order over values
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    let by_rank = type_rank(a).cmp(&type_rank(b));
    if by_rank != Ordering::Equal {
        return by_rank;
    }

    match (a, b) {
        (Value::Integer(x), Value::Integer(y)) => x.cmp(y),
        (Value::Integer(x), Value::Double(y)) => (*x as f64).total_cmp(y),
        (Value::Double(x), Value::Integer(y)) => x.total_cmp(&(*y as f64)),
        (Value::Double(x), Value::Double(y)) => x.total_cmp(y),
        (Value::Timestamp(x), Value::Timestamp(y)) => x.cmp(y),
        (Value::Boolean(x), Value::Boolean(y)) => x.cmp(y),
        (Value::Blob(x), Value::Blob(y)) => x.cmp(y),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Key(x), Value::Key(y)) => x.cmp(y),
        (Value::GeoPoint(x), Value::GeoPoint(y)) => x
            .latitude
            .total_cmp(&y.latitude)
            .then(x.longitude.total_cmp(&y.longitude)),
        (Value::Array(x), Value::Array(y)) => {
            for (l, r) in x.iter().zip(y) {
                let ord = compare_values(l, r);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        // embedded entities are not indexed for ordering
        _ => Ordering::Equal,
    }
}

/// Values of `property` visible to the index.
///
/// Excluded properties are invisible, arrays contribute each element and
/// `__key__` resolves to the entity key.
pub fn indexed_values(entity: &Entity, property: &str) -> Vec<Value> {
    if property == KEY_PROPERTY {
        return vec![Value::Key(entity.key.clone())];
    }
    match entity.data.property(property) {
        Some(p) if p.exclude_from_indexes => Vec::new(),
        Some(p) => match &p.value {
            Value::Array(items) => items.clone(),
            other => vec![other.clone()],
        },
        None => Vec::new(),
    }
}

/// True if any indexed value of the filtered property satisfies the filter
pub fn matches(filter: &Filter, entity: &Entity) -> bool {
    indexed_values(entity, &filter.property).iter().any(|v| {
        if type_rank(v) != type_rank(&filter.value) {
            return false;
        }
        let ord = compare_values(v, &filter.value);
        match filter.op {
            FilterOperator::LessThan => ord == Ordering::Less,
            FilterOperator::LessThanOrEqual => ord != Ordering::Greater,
            FilterOperator::Equal => ord == Ordering::Equal,
            FilterOperator::GreaterThanOrEqual => ord != Ordering::Less,
            FilterOperator::GreaterThan => ord == Ordering::Greater,
        }
    })
}

/// Value an entity sorts by: the smallest element ascending, the largest
/// descending. `None` when the property is not indexed on the entity.
pub fn sort_value(entity: &Entity, property: &str, descending: bool) -> Option<Value> {
    let values = indexed_values(entity, property);
    if descending {
        values.into_iter().max_by(compare_values)
    } else {
        values.into_iter().min_by(compare_values)
    }
}

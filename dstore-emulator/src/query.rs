/// Query execution over a snapshot of stored entities
///
/// Results are scoped by namespace, kind and ancestor, filtered on indexed
/// values, sorted by the requested orders with the key as final tie-breaker,
/// de-duplicated for `distinct_on`, then sliced by cursors, offset, limit and
/// page size. A cursor encodes the sort position of the entity it follows,
/// so resuming stays correct when entities are written between pages.

use crate::compare::{compare_values, matches, sort_value};
use base64::engine::general_purpose::URL_SAFE_NO_PAD as CURSOR_ENCODING;
use base64::Engine;
use dstore_core::codec::{decode_value, encode_entity, encode_value, WireEntity, WireValue};
use dstore_core::rpc::{EntityResult, QueryResultBatch, ResultType};
use dstore_core::{
    Cursor, Direction, Entity, EntityData, Error, Key, MoreResults, Order, QuerySpec, Result,
    Value, KEY_PROPERTY,
};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Entity as seen by one query snapshot
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub entity: Entity,
    pub version: i64,
}

#[derive(Serialize, Deserialize)]
struct Position {
    values: Vec<Option<WireValue>>,
    key: Key,
}

struct Row {
    entity: Entity,
    version: i64,
    sort: Vec<Option<Value>>,
}

/// Run one page of `spec` against `snapshots`
pub fn execute(spec: &QuerySpec, snapshots: Vec<Snapshot>, page_size: usize) -> Result<QueryResultBatch> {
    let mut rows: Vec<Row> = snapshots
        .into_iter()
        .filter(|s| in_scope(spec, &s.entity.key))
        .filter(|s| spec.filters.iter().all(|f| matches(f, &s.entity)))
        .filter(|s| has_projected(spec, &s.entity))
        .filter_map(|s| {
            let sort = spec
                .orders
                .iter()
                .map(|o| sort_value(&s.entity, &o.property, o.direction == Direction::Descending))
                .collect::<Vec<_>>();
            // entities without an ordered property are not in that index
            if sort.iter().any(Option::is_none) {
                return None;
            }
            Some(Row {
                entity: s.entity,
                version: s.version,
                sort,
            })
        })
        .collect();

    rows.sort_by(|a, b| compare_positions(&spec.orders, &a.sort, &a.entity.key, &b.sort, &b.entity.key));

    if !spec.group_by.is_empty() {
        rows = distinct(rows, &spec.group_by);
    }

    if let Some(cursor) = &spec.start_cursor {
        let start = decode_cursor(cursor)?;
        rows.retain(|r| position_cmp(&spec.orders, r, &start) == Ordering::Greater);
    }
    if let Some(cursor) = &spec.end_cursor {
        let end = decode_cursor(cursor)?;
        rows.retain(|r| position_cmp(&spec.orders, r, &end) != Ordering::Greater);
    }

    let skipped = (spec.offset as usize).min(rows.len());
    let skipped_rows: Vec<Row> = rows.drain(..skipped).collect();

    let limit = spec.limit.map(|l| l as usize);
    let take = limit.unwrap_or(usize::MAX).min(page_size).min(rows.len());
    let remaining = rows.split_off(take);

    let more_results = if remaining.is_empty() {
        MoreResults::NoMoreResults
    } else if limit.is_some_and(|l| l <= page_size && take == l) {
        MoreResults::MoreResultsAfterLimit
    } else {
        MoreResults::MoreResultsAfterCursor
    };

    let end_cursor = match rows.last().or(skipped_rows.last()) {
        Some(row) => Some(encode_cursor(row)?),
        None => spec.start_cursor.clone(),
    };

    let entity_result_type = result_type(spec);
    let entity_results = rows
        .iter()
        .map(|row| {
            Ok(EntityResult {
                entity: project(spec, entity_result_type, &row.entity)?,
                version: row.version,
                cursor: Some(encode_cursor(row)?),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(QueryResultBatch {
        entity_result_type,
        entity_results,
        end_cursor,
        more_results,
        skipped_results: skipped as u32,
    })
}

fn in_scope(spec: &QuerySpec, key: &Key) -> bool {
    key.namespace() == spec.namespace.as_deref()
        && key.kind() == spec.kind
        && spec
            .ancestor
            .as_ref()
            .map_or(true, |a| a == key || a.is_ancestor_of(key))
}

/// Projection queries only see entities indexing every projected property
fn has_projected(spec: &QuerySpec, entity: &Entity) -> bool {
    spec.projection.iter().all(|name| {
        name == KEY_PROPERTY
            || entity
                .data
                .property(name)
                .is_some_and(|p| !p.exclude_from_indexes)
    })
}

fn result_type(spec: &QuerySpec) -> ResultType {
    if spec.projection.is_empty() {
        ResultType::Full
    } else if spec.projection.iter().all(|p| p == KEY_PROPERTY) {
        ResultType::KeyOnly
    } else {
        ResultType::Projection
    }
}

fn project(
    spec: &QuerySpec,
    result_type: ResultType,
    entity: &Entity,
) -> Result<WireEntity> {
    let data = match result_type {
        ResultType::Full => return encode_entity(Some(&entity.key), &entity.data),
        ResultType::KeyOnly => EntityData::new(),
        ResultType::Projection => {
            let mut data = EntityData::new();
            for name in spec.projection.iter().filter(|p| *p != KEY_PROPERTY) {
                if let Some(property) = entity.data.property(name) {
                    data.insert_property(name.clone(), property.clone());
                }
            }
            data
        }
    };
    encode_entity(Some(&entity.key), &data)
}

/// Keep the first row of every distinct combination of `group_by` values
fn distinct(rows: Vec<Row>, group_by: &[String]) -> Vec<Row> {
    let mut seen: Vec<Vec<Option<Value>>> = Vec::new();
    rows.into_iter()
        .filter(|row| {
            let group: Vec<Option<Value>> = group_by
                .iter()
                .map(|p| sort_value(&row.entity, p, false))
                .collect();
            let duplicate = seen.iter().any(|other| {
                other.iter().zip(&group).all(|(a, b)| match (a, b) {
                    (Some(a), Some(b)) => compare_values(a, b) == Ordering::Equal,
                    (None, None) => true,
                    _ => false,
                })
            });
            if !duplicate {
                seen.push(group);
            }
            !duplicate
        })
        .collect()
}

fn compare_positions(
    orders: &[Order],
    a_values: &[Option<Value>],
    a_key: &Key,
    b_values: &[Option<Value>],
    b_key: &Key,
) -> Ordering {
    for (i, order) in orders.iter().enumerate() {
        let a = a_values.get(i).and_then(Option::as_ref);
        let b = b_values.get(i).and_then(Option::as_ref);
        let ord = match (a, b) {
            (Some(a), Some(b)) => compare_values(a, b),
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
        };
        let ord = match order.direction {
            Direction::Ascending => ord,
            Direction::Descending => ord.reverse(),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    a_key.cmp(b_key)
}

fn position_cmp(orders: &[Order], row: &Row, position: &(Vec<Option<Value>>, Key)) -> Ordering {
    compare_positions(orders, &row.sort, &row.entity.key, &position.0, &position.1)
}

fn encode_cursor(row: &Row) -> Result<Cursor> {
    let position = Position {
        values: row
            .sort
            .iter()
            .map(|v| v.as_ref().map(|v| encode_value(v, false)).transpose())
            .collect::<Result<Vec<_>>>()?,
        key: row.entity.key.clone(),
    };
    let bytes = serde_json::to_vec(&position)
        .map_err(|e| Error::InvalidValue(format!("cursor position: {}", e)))?;
    Ok(Cursor::new(CURSOR_ENCODING.encode(bytes)))
}

fn decode_cursor(cursor: &Cursor) -> Result<(Vec<Option<Value>>, Key)> {
    let invalid = || Error::InvalidQuery(format!("invalid cursor {:?}", cursor.as_str()));
    let bytes = CURSOR_ENCODING
        .decode(cursor.as_str())
        .map_err(|_| invalid())?;
    let position: Position = serde_json::from_slice(&bytes).map_err(|_| invalid())?;
    let values = position
        .values
        .iter()
        .map(|v| v.as_ref().map(decode_value).transpose())
        .collect::<Result<Vec<_>>>()?;
    Ok((values, position.key))
}

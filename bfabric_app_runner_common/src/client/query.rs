//! Queries, records and the paging arithmetic shared by all engines.

use serde_json::Value;

use crate::prelude::*;

/// A single record as returned by the LIMS: field names mapped to JSON values.
pub type Record = serde_json::Map<String, Value>;

/// A query is shaped just like a record: every field must match, and a list
/// value matches any of its elements.
pub type Query = serde_json::Map<String, Value>;

/// The maximum number of records the LIMS returns per page, and the maximum
/// number of values it accepts in a single list-valued query field.
pub const QUERY_LIMIT: usize = 100;

/// Build a [`Query`] from a JSON object literal.
///
/// Anything that is not an object yields an empty query.
pub fn query_from_json(value: Value) -> Query {
    match value {
        Value::Object(map) => map,
        _ => Query::new(),
    }
}

/// How many pages should we fetch, given how many results the caller wants
/// and how many pages the server says it has?
pub fn requested_pages(max_results: Option<usize>, available_pages: u32) -> u32 {
    match max_results {
        None => available_pages,
        Some(max_results) => {
            let wanted = (max_results + QUERY_LIMIT - 1) / QUERY_LIMIT;
            available_pages.min(wanted as u32)
        }
    }
}

/// Split a query with an oversized list value into several queries of at
/// most [`QUERY_LIMIT`] values each. Queries without such a list are
/// returned unchanged.
///
/// Only one list-valued field may exceed the limit, because splitting two
/// of them would require a cross product of queries.
pub fn split_multi_query(query: &Query) -> Result<Vec<Query>> {
    let oversized = query
        .iter()
        .filter_map(|(key, value)| match value {
            Value::Array(items) if items.len() > QUERY_LIMIT => Some((key, items)),
            _ => None,
        })
        .collect::<Vec<_>>();
    match oversized.as_slice() {
        [] => Ok(vec![query.clone()]),
        [(key, values)] => Ok(values
            .chunks(QUERY_LIMIT)
            .map(|chunk| {
                let mut sub_query = query.clone();
                sub_query.insert((*key).clone(), Value::Array(chunk.to_vec()));
                sub_query
            })
            .collect()),
        _ => Err(RunnerError::config(format!(
            "cannot split a query with more than one oversized list field: {:?}",
            oversized.iter().map(|(key, _)| key).collect::<Vec<_>>(),
        ))),
    }
}

/// Sort records into the order their IDs appear in the `id` list of
/// `query`. Records whose ID is not in the list keep their server order,
/// after all the others. Queries without an `id` list are left alone.
pub fn order_by_query_ids(query: &Query, records: &mut [Record]) {
    let ids = match query.get("id") {
        Some(Value::Array(ids)) => ids,
        _ => return,
    };
    let mut positions = HashMap::with_capacity(ids.len());
    for (position, id) in ids.iter().filter_map(value_as_i64).enumerate() {
        positions.entry(id).or_insert(position);
    }
    records.sort_by_key(|record| {
        record_id(record)
            .and_then(|id| positions.get(&id).copied())
            .unwrap_or(usize::MAX)
    });
}

/// Extract the `id` of a record.
pub fn record_id(record: &Record) -> Option<i64> {
    record.get("id").and_then(value_as_i64)
}

/// Interpret a JSON value as an integer. The LIMS is not consistent about
/// whether IDs are numbers or strings, so we accept both.
pub fn value_as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[test]
fn requested_pages_rounds_up() {
    assert_eq!(requested_pages(Some(100), 10), 1);
    assert_eq!(requested_pages(Some(101), 10), 2);
    assert_eq!(requested_pages(Some(350), 2), 2);
    assert_eq!(requested_pages(None, 7), 7);
    assert_eq!(requested_pages(Some(0), 7), 0);
}

#[test]
fn split_multi_query_chunks_the_oversized_field() {
    let ids = (1..=350).collect::<Vec<i64>>();
    let query = query_from_json(serde_json::json!({ "id": ids, "status": "available" }));
    let queries = split_multi_query(&query).unwrap();
    let sizes = queries
        .iter()
        .map(|q| q["id"].as_array().unwrap().len())
        .collect::<Vec<_>>();
    assert_eq!(sizes, vec![100, 100, 100, 50]);
    assert!(queries.iter().all(|q| q["status"] == "available"));
    assert_eq!(queries[3]["id"][0], 301);
}

#[test]
fn split_multi_query_rejects_two_oversized_fields() {
    let ids = (1..=101).collect::<Vec<i64>>();
    let query = query_from_json(serde_json::json!({ "id": ids, "workunitid": ids }));
    assert!(split_multi_query(&query).is_err());
}

#[test]
fn order_by_query_ids_follows_the_id_list() {
    let query = query_from_json(serde_json::json!({ "id": [3, "1", 2] }));
    let mut records = [5, 1, 2, 3, 4]
        .iter()
        .map(|id| query_from_json(serde_json::json!({ "id": id })))
        .collect::<Vec<_>>();
    order_by_query_ids(&query, &mut records);
    let ids = records.iter().filter_map(record_id).collect::<Vec<_>>();
    assert_eq!(ids, vec![3, 1, 2, 5, 4]);
}

#[test]
fn value_as_i64_accepts_strings() {
    assert_eq!(value_as_i64(&serde_json::json!("42")), Some(42));
    assert_eq!(value_as_i64(&serde_json::json!(42)), Some(42));
    assert_eq!(value_as_i64(&serde_json::json!(null)), None);
}

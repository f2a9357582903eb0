//! Reduction of service responses and events into the cache.
//!
//! Remote services answer in four shapes — a page of records, a single
//! record, a deletion receipt, and a real-time push event — and this module
//! folds all of them into the same normalized bucket. Every function here is
//! a pure state transform: no I/O, no locking, no awareness of where the
//! value came from.
//!
//! The dispatch rules:
//!
//! | Input                                  | Reduction                        |
//! |----------------------------------------|----------------------------------|
//! | `find` response                        | [`merge_page`]                   |
//! | `get`/`create`/`update`/`patch` response | [`merge_record`]               |
//! | `remove` response                      | [`remove_record`]                |
//! | `created`/`updated`/`patched` event    | [`merge_record`]                 |
//! | `removed` event                        | [`remove_record`]                |
//!
//! Merging is always whole-record replacement at the identifier — never a
//! deep merge. Responses that carry no identifier land in the bucket's
//! `query` slot instead of the record map.

use serde_json::Value;

use super::{RecordId, ServiceCache};
use crate::client::{EventKind, ServiceEvent, ServiceMethod};

/// Folds a multi-record `find` response into the bucket.
///
/// Accepts the paginated envelope `{ "total", "limit", "skip", "data" }` or a
/// bare JSON array (treated as a page at offset zero). An empty page leaves
/// the bucket untouched.
///
/// When the first record of the page has no usable identifier the whole page
/// is keyed positionally: record `i` gets the identifier `skip + i`
/// (saturating at the `i64` ceiling), and that identifier is also written
/// into the cached copy of the record. This keeps unidentified result sets
/// addressable across pages. In a page whose first record *is* identified,
/// later records without identifiers are skipped.
///
/// Anything that is neither an envelope nor an array is kept in the `query`
/// slot like any other non-identified response.
///
/// # Examples
///
/// ```
/// use serde_json::json;
/// use syncstore::cache::{ServiceCache, normalize};
///
/// let mut bucket = ServiceCache::new();
/// let page = json!({ "total": 2, "limit": 10, "skip": 0, "data": [
///     { "id": 1, "text": "a" },
///     { "id": 2, "text": "b" },
/// ]});
/// normalize::merge_page(&mut bucket, &page, "id");
/// assert_eq!(bucket.len(), 2);
/// ```
pub fn merge_page(bucket: &mut ServiceCache, response: &Value, id_field: &str) {
    let Some((data, skip)) = page_of(response) else {
        bucket.query = Some(response.clone());
        return;
    };

    if data.is_empty() {
        return;
    }

    if RecordId::of(&data[0], id_field).is_none() {
        for (idx, record) in data.iter().enumerate() {
            let id = RecordId::Int(skip.saturating_add(idx as i64));
            let mut record = record.clone();
            if let Value::Object(fields) = &mut record {
                fields.insert(id_field.to_owned(), id.to_value());
            }
            bucket.records.insert(id, record);
        }
        return;
    }

    for record in data {
        if let Some(id) = RecordId::of(record, id_field) {
            bucket.records.insert(id, record.clone());
        }
    }
}

/// Folds a single-record response into the bucket.
///
/// A response with a usable identifier replaces whatever was cached under
/// that identifier; one without lands in the `query` slot.
pub fn merge_record(bucket: &mut ServiceCache, response: &Value, id_field: &str) {
    match RecordId::of(response, id_field) {
        Some(id) => {
            bucket.records.insert(id, response.clone());
        }
        None => bucket.query = Some(response.clone()),
    }
}

/// Folds a deletion response into the bucket.
///
/// A response with a usable identifier removes that record (removing an
/// identifier that was never cached is a no-op); one without lands in the
/// `query` slot, mirroring [`merge_record`].
pub fn remove_record(bucket: &mut ServiceCache, response: &Value, id_field: &str) {
    match RecordId::of(response, id_field) {
        Some(id) => {
            bucket.records.remove(&id);
        }
        None => bucket.query = Some(response.clone()),
    }
}

/// Folds a successful call response into the bucket, dispatching on the
/// method that produced it.
pub fn apply_response(
    bucket: &mut ServiceCache,
    method: ServiceMethod,
    response: &Value,
    id_field: &str,
) {
    match method {
        ServiceMethod::Find => merge_page(bucket, response, id_field),
        ServiceMethod::Remove => remove_record(bucket, response, id_field),
        _ => merge_record(bucket, response, id_field),
    }
}

/// Folds a real-time event into the bucket, dispatching on its kind.
pub fn apply_event(bucket: &mut ServiceCache, event: &ServiceEvent, id_field: &str) {
    match event.kind {
        EventKind::Removed => remove_record(bucket, &event.record, id_field),
        _ => merge_record(bucket, &event.record, id_field),
    }
}

/// Views a response as a page: the record slice and its offset.
fn page_of(response: &Value) -> Option<(&[Value], i64)> {
    match response {
        Value::Array(items) => Some((items, 0)),
        Value::Object(fields) => {
            let data = fields.get("data")?.as_array()?;
            let skip = fields.get("skip").and_then(Value::as_i64).unwrap_or(0).max(0);
            Some((data, skip))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn page(skip: i64, data: Value) -> Value {
        json!({ "total": 100, "limit": 10, "skip": skip, "data": data })
    }

    // ── merge_page ────────────────────────────────────────────────────────────

    #[test]
    fn empty_page_is_a_noop() {
        let mut bucket = ServiceCache::new();
        merge_page(&mut bucket, &page(0, json!([])), "id");
        assert!(bucket.is_empty());
        assert!(bucket.query.is_none());
    }

    #[test]
    fn page_records_keyed_by_identifier() {
        let mut bucket = ServiceCache::new();
        let response = page(0, json!([{ "id": 3, "text": "c" }, { "id": 1, "text": "a" }]));
        merge_page(&mut bucket, &response, "id");

        assert_eq!(bucket.len(), 2);
        assert_eq!(bucket.record(1), Some(&json!({ "id": 1, "text": "a" })));
        assert_eq!(bucket.record(3), Some(&json!({ "id": 3, "text": "c" })));
    }

    #[test]
    fn page_replaces_existing_records_wholly() {
        let mut bucket = ServiceCache::new();
        bucket
            .records
            .insert(1.into(), json!({ "id": 1, "text": "old", "stale": true }));

        merge_page(&mut bucket, &page(0, json!([{ "id": 1, "text": "new" }])), "id");
        // Whole-record replacement: the stale field is gone.
        assert_eq!(bucket.record(1), Some(&json!({ "id": 1, "text": "new" })));
    }

    #[test]
    fn page_preserves_records_outside_the_window() {
        let mut bucket = ServiceCache::new();
        merge_page(&mut bucket, &page(0, json!([{ "id": 1 }, { "id": 2 }])), "id");
        merge_page(&mut bucket, &page(2, json!([{ "id": 3 }])), "id");
        assert_eq!(bucket.len(), 3);
    }

    #[test]
    fn unidentified_page_gets_positional_identifiers() {
        let mut bucket = ServiceCache::new();
        let response = page(20, json!([{ "text": "a" }, { "text": "b" }]));
        merge_page(&mut bucket, &response, "id");

        assert_eq!(bucket.len(), 2);
        // Positional keys honor the page offset, and the synthesized
        // identifier is written into the cached record.
        assert_eq!(bucket.record(20), Some(&json!({ "id": 20, "text": "a" })));
        assert_eq!(bucket.record(21), Some(&json!({ "id": 21, "text": "b" })));
    }

    #[test]
    fn positional_identifiers_use_custom_id_field() {
        let mut bucket = ServiceCache::new();
        merge_page(&mut bucket, &page(5, json!([{ "text": "a" }])), "_id");
        assert_eq!(bucket.record(5), Some(&json!({ "_id": 5, "text": "a" })));
    }

    #[test]
    fn positional_identifiers_saturate_at_extreme_offsets() {
        let mut bucket = ServiceCache::new();
        let response = page(i64::MAX, json!([{ "text": "a" }, { "text": "b" }]));
        merge_page(&mut bucket, &response, "id");

        // Keys clamp at the ceiling instead of wrapping into negative space;
        // the clamped records collide on the last one.
        assert_eq!(bucket.len(), 1);
        assert_eq!(
            bucket.record(i64::MAX),
            Some(&json!({ "id": i64::MAX, "text": "b" }))
        );
    }

    #[test]
    fn bare_array_is_a_page_at_offset_zero() {
        let mut bucket = ServiceCache::new();
        merge_page(&mut bucket, &json!([{ "id": 9, "text": "z" }]), "id");
        assert_eq!(bucket.record(9), Some(&json!({ "id": 9, "text": "z" })));
    }

    #[test]
    fn bare_array_without_identifiers_counts_from_zero() {
        let mut bucket = ServiceCache::new();
        merge_page(&mut bucket, &json!([{ "text": "a" }, { "text": "b" }]), "id");
        assert!(bucket.contains(0));
        assert!(bucket.contains(1));
    }

    #[test]
    fn envelope_without_skip_defaults_to_zero() {
        let mut bucket = ServiceCache::new();
        merge_page(&mut bucket, &json!({ "data": [{ "text": "a" }] }), "id");
        assert_eq!(bucket.record(0), Some(&json!({ "id": 0, "text": "a" })));
    }

    #[test]
    fn identified_page_skips_stray_unidentified_records() {
        let mut bucket = ServiceCache::new();
        let response = page(0, json!([{ "id": 1 }, { "text": "stray" }, { "id": 2 }]));
        merge_page(&mut bucket, &response, "id");

        assert_eq!(bucket.len(), 2);
        assert!(bucket.contains(1));
        assert!(bucket.contains(2));
    }

    #[test]
    fn non_page_response_lands_in_query_slot() {
        let mut bucket = ServiceCache::new();
        let response = json!({ "count": 12 });
        merge_page(&mut bucket, &response, "id");

        assert!(bucket.is_empty());
        assert_eq!(bucket.query, Some(response));
    }

    #[test]
    fn string_and_integer_identifiers_coexist() {
        let mut bucket = ServiceCache::new();
        let response = page(0, json!([{ "id": 1 }, { "id": "a1" }]));
        merge_page(&mut bucket, &response, "id");

        assert!(bucket.contains(1));
        assert!(bucket.contains("a1"));
    }

    // ── merge_record ──────────────────────────────────────────────────────────

    #[test]
    fn identified_record_is_upserted() {
        let mut bucket = ServiceCache::new();
        merge_record(&mut bucket, &json!({ "id": 4, "text": "hi" }), "id");
        assert_eq!(bucket.record(4), Some(&json!({ "id": 4, "text": "hi" })));
        assert!(bucket.query.is_none());
    }

    #[test]
    fn merge_replaces_rather_than_deep_merges() {
        let mut bucket = ServiceCache::new();
        merge_record(&mut bucket, &json!({ "id": 4, "a": 1, "b": 2 }), "id");
        merge_record(&mut bucket, &json!({ "id": 4, "a": 9 }), "id");
        assert_eq!(bucket.record(4), Some(&json!({ "id": 4, "a": 9 })));
    }

    #[test]
    fn unidentified_record_lands_in_query_slot() {
        let mut bucket = ServiceCache::new();
        merge_record(&mut bucket, &json!({ "total": 3 }), "id");
        assert!(bucket.is_empty());
        assert_eq!(bucket.query, Some(json!({ "total": 3 })));
    }

    #[test]
    fn later_unidentified_response_overwrites_query_slot() {
        let mut bucket = ServiceCache::new();
        merge_record(&mut bucket, &json!({ "total": 3 }), "id");
        merge_record(&mut bucket, &json!({ "total": 4 }), "id");
        assert_eq!(bucket.query, Some(json!({ "total": 4 })));
    }

    #[test]
    fn null_identifier_counts_as_unidentified() {
        let mut bucket = ServiceCache::new();
        merge_record(&mut bucket, &json!({ "id": null, "text": "?" }), "id");
        assert!(bucket.is_empty());
        assert!(bucket.query.is_some());
    }

    #[test]
    fn custom_identifier_field_is_honored() {
        let mut bucket = ServiceCache::new();
        merge_record(&mut bucket, &json!({ "_id": "u7", "name": "ada" }), "_id");
        assert!(bucket.contains("u7"));
    }

    // ── remove_record ─────────────────────────────────────────────────────────

    #[test]
    fn identified_removal_deletes_the_record() {
        let mut bucket = ServiceCache::new();
        merge_record(&mut bucket, &json!({ "id": 4, "text": "hi" }), "id");
        remove_record(&mut bucket, &json!({ "id": 4, "text": "hi" }), "id");
        assert!(bucket.is_empty());
    }

    #[test]
    fn removing_an_uncached_identifier_is_a_noop() {
        let mut bucket = ServiceCache::new();
        merge_record(&mut bucket, &json!({ "id": 4 }), "id");
        remove_record(&mut bucket, &json!({ "id": 5 }), "id");
        assert_eq!(bucket.len(), 1);
    }

    #[test]
    fn unidentified_removal_lands_in_query_slot() {
        let mut bucket = ServiceCache::new();
        remove_record(&mut bucket, &json!({ "deleted": 3 }), "id");
        assert_eq!(bucket.query, Some(json!({ "deleted": 3 })));
    }

    // ── apply_response / apply_event ──────────────────────────────────────────

    #[test]
    fn response_dispatch_matches_method() {
        let mut bucket = ServiceCache::new();

        apply_response(&mut bucket, ServiceMethod::Find, &page(0, json!([{ "id": 1 }])), "id");
        assert!(bucket.contains(1));

        apply_response(&mut bucket, ServiceMethod::Get, &json!({ "id": 2 }), "id");
        apply_response(&mut bucket, ServiceMethod::Create, &json!({ "id": 3 }), "id");
        apply_response(&mut bucket, ServiceMethod::Update, &json!({ "id": 4 }), "id");
        apply_response(&mut bucket, ServiceMethod::Patch, &json!({ "id": 5 }), "id");
        assert_eq!(bucket.len(), 5);

        apply_response(&mut bucket, ServiceMethod::Remove, &json!({ "id": 3 }), "id");
        assert!(!bucket.contains(3));
        assert_eq!(bucket.len(), 4);
    }

    #[test]
    fn event_dispatch_matches_kind() {
        let mut bucket = ServiceCache::new();

        for kind in [EventKind::Created, EventKind::Updated, EventKind::Patched] {
            let event = ServiceEvent::new(kind, json!({ "id": 1, "via": kind.as_str() }));
            apply_event(&mut bucket, &event, "id");
            assert_eq!(bucket.record(1), Some(&json!({ "id": 1, "via": kind.as_str() })));
        }

        let event = ServiceEvent::new(EventKind::Removed, json!({ "id": 1 }));
        apply_event(&mut bucket, &event, "id");
        assert!(bucket.is_empty());
    }

    #[test]
    fn unidentified_event_lands_in_query_slot() {
        let mut bucket = ServiceCache::new();
        let event = ServiceEvent::new(EventKind::Created, json!({ "note": "no id" }));
        apply_event(&mut bucket, &event, "id");
        assert_eq!(bucket.query, Some(json!({ "note": "no id" })));
    }
}

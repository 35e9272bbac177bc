//! Field availability transitions driven from outside ingest.
//!
//! Ingest moves fields to `Present`; everything here moves them away from
//! it (refresh scheduled, eviction, TTL expiry).

use recgraph_core::{Entry, FieldState, FieldValue, Link};

use crate::store::EntryStore;

/// Mark a present field as awaiting refetch. Returns whether it changed.
pub fn mark_pending(store: &mut EntryStore, field_key: &str) -> bool {
    match store.get_mut(field_key).and_then(Entry::as_field_value_mut) {
        Some(field) if field.state == FieldState::Present => {
            field.state = FieldState::Pending;
            true
        }
        _ => false,
    }
}

/// Mark a field as explicitly absent, dropping its value. Returns whether it changed.
pub fn mark_missing(store: &mut EntryStore, field_key: &str) -> bool {
    match store.get_mut(field_key).and_then(Entry::as_field_value_mut) {
        Some(field) if field.state != FieldState::Missing => {
            field.state = FieldState::Missing;
            field.value = FieldValue::Undefined;
            field.display_value = None;
            true
        }
        _ => false,
    }
}

/// Mark every present field of a record pending. Returns the keys that changed.
pub fn mark_record_pending(store: &mut EntryStore, record_key: &str) -> Vec<String> {
    field_keys(store, record_key)
        .into_iter()
        .filter(|key| mark_pending(store, key))
        .collect()
}

/// Mark the present scalar fields of an expired record pending.
///
/// Spanning fields stay present: the records they point at carry their own
/// freshness, and a pending spanning field would refuse the refreshed
/// record on the next ingest. Returns the keys that changed.
pub fn mark_record_stale(store: &mut EntryStore, record_key: &str) -> Vec<String> {
    field_keys(store, record_key)
        .into_iter()
        .filter(|key| {
            let spanning = store
                .get(key)
                .and_then(Entry::as_field_value)
                .is_some_and(|f| f.value.is_spanning());
            !spanning && mark_pending(store, key)
        })
        .collect()
}

/// Cut every link to a removed entry.
///
/// Spanning fields pointing at it become missing; any other link to it is
/// set to [`Link::Missing`]. Returns the keys that changed.
pub fn unlink_removed(store: &mut EntryStore, removed_key: &str) -> Vec<String> {
    let referrers = store.referrers(removed_key);
    for key in &referrers {
        let Some(entry) = store.get_mut(key) else {
            continue;
        };
        if entry.as_field_value().is_some() {
            mark_missing(store, key);
            continue;
        }
        for link in entry.links_mut() {
            if link.key() == Some(removed_key) {
                *link = Link::Missing;
            }
        }
    }
    referrers
}

fn field_keys(store: &EntryStore, record_key: &str) -> Vec<String> {
    match store.record(record_key) {
        Some(record) => record
            .fields
            .values()
            .filter_map(|l| l.key().map(str::to_string))
            .collect(),
        None => Vec::new(),
    }
}

//! Denormalized record blobs.
//!
//! A record and its field values are persisted as one nested document,
//! with spanning records inlined. Connections are never inlined.

use std::collections::{BTreeMap, BTreeSet};

use recgraph_core::{
    key_for_field_value, key_for_record, Entry, FieldState, FieldValue, FieldValueEntry, Link,
    RecordEntry, RecordTypeInfo, Scalar,
};
use serde::{Deserialize, Serialize};

use super::DurableExpiration;
use crate::store::EntrySource;

/// Persisted form of one record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DurableRecord {
    pub id: String,
    pub api_name: String,
    #[serde(default)]
    pub record_type_id: Option<String>,
    #[serde(default)]
    pub record_type_info: Option<RecordTypeInfo>,
    #[serde(default)]
    pub weak_etag: Option<i64>,
    #[serde(default)]
    pub system_modstamp: Option<String>,
    #[serde(default)]
    pub fields: BTreeMap<String, DurableField>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration: Option<DurableExpiration>,
}

/// Persisted form of one field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DurableField {
    Present {
        value: DurableValue,
        #[serde(default, rename = "displayValue")]
        display_value: Option<Scalar>,
    },
    Pending,
    Missing,
}

/// Value of a present field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DurableValue {
    Scalar(Scalar),
    Record(Box<DurableRecord>),
    /// Key of a spanning record that was not inlined.
    Ref(String),
}

impl DurableRecord {
    pub fn key(&self) -> String {
        key_for_record(&self.id)
    }
}

/// Build the nested blob for the record under `record_key`.
///
/// Spanning records are inlined recursively. A record already being
/// inlined higher up, or one that cannot be found, is kept as a
/// [`DurableValue::Ref`].
pub fn denormalize<S: EntrySource + ?Sized>(
    record_key: &str,
    source: &S,
    expiration: Option<DurableExpiration>,
) -> Option<DurableRecord> {
    let mut ancestors = BTreeSet::new();
    let mut record = denormalize_record(record_key, source, &mut ancestors)?;
    record.expiration = expiration;
    Some(record)
}

fn denormalize_record<S: EntrySource + ?Sized>(
    record_key: &str,
    source: &S,
    ancestors: &mut BTreeSet<String>,
) -> Option<DurableRecord> {
    let record = source.entry(record_key)?.as_record()?;
    ancestors.insert(record_key.to_string());
    let fields = record
        .fields
        .iter()
        .map(|(name, link)| (name.clone(), denormalize_field(link, source, ancestors)))
        .collect();
    ancestors.remove(record_key);

    Some(DurableRecord {
        id: record.id.clone(),
        api_name: record.api_name.clone(),
        record_type_id: record.record_type_id.clone(),
        record_type_info: record.record_type_info.clone(),
        weak_etag: record.weak_etag,
        system_modstamp: record.system_modstamp.clone(),
        fields,
        expiration: None,
    })
}

fn denormalize_field<S: EntrySource + ?Sized>(
    link: &Link,
    source: &S,
    ancestors: &mut BTreeSet<String>,
) -> DurableField {
    let field = match link {
        Link::Pending => return DurableField::Pending,
        Link::Missing => return DurableField::Missing,
        Link::Resolved(key) => match source.entry(key).and_then(Entry::as_field_value) {
            Some(field) => field,
            None => return DurableField::Missing,
        },
    };
    match field.state {
        FieldState::Pending => return DurableField::Pending,
        FieldState::Missing => return DurableField::Missing,
        FieldState::Present => {}
    }
    let value = match &field.value {
        FieldValue::Undefined => return DurableField::Missing,
        FieldValue::Scalar(s) => DurableValue::Scalar(s.clone()),
        FieldValue::Record(Link::Pending) => return DurableField::Pending,
        FieldValue::Record(Link::Missing) => return DurableField::Missing,
        FieldValue::Record(Link::Resolved(target)) => {
            if ancestors.contains(target) {
                DurableValue::Ref(target.clone())
            } else {
                match denormalize_record(target, source, ancestors) {
                    Some(nested) => DurableValue::Record(Box::new(nested)),
                    None => DurableValue::Ref(target.clone()),
                }
            }
        }
    };
    DurableField::Present {
        value,
        display_value: field.display_value.clone(),
    }
}

/// Split a blob back into record and field-value entries.
///
/// The outermost occurrence of a record wins over copies inlined deeper
/// in the same blob.
pub fn normalize(record: &DurableRecord) -> BTreeMap<String, Entry> {
    let mut out = BTreeMap::new();
    normalize_into(record, &mut out);
    out
}

fn normalize_into(record: &DurableRecord, out: &mut BTreeMap<String, Entry>) {
    let record_key = record.key();
    let mut entry = RecordEntry::new(record.id.clone(), record.api_name.clone());
    entry.record_type_id = record.record_type_id.clone();
    entry.record_type_info = record.record_type_info.clone();
    entry.weak_etag = record.weak_etag;
    entry.system_modstamp = record.system_modstamp.clone();

    let mut nested = Vec::new();
    for (name, field) in &record.fields {
        let field_key = key_for_field_value(&record_key, name);
        let value = match field {
            DurableField::Pending => FieldValueEntry::pending(),
            DurableField::Missing => FieldValueEntry::missing(),
            DurableField::Present {
                value,
                display_value,
            } => {
                let value = match value {
                    DurableValue::Scalar(s) => FieldValue::Scalar(s.clone()),
                    DurableValue::Ref(key) => FieldValue::Record(Link::resolved(key.clone())),
                    DurableValue::Record(inner) => {
                        nested.push(inner.as_ref());
                        FieldValue::Record(Link::resolved(inner.key()))
                    }
                };
                FieldValueEntry::present(value, display_value.clone())
            }
        };
        entry.fields.insert(name.clone(), Link::resolved(field_key.clone()));
        out.insert(field_key, Entry::FieldValue(value));
    }
    out.insert(record_key, Entry::Record(entry));

    for inner in nested {
        if !out.contains_key(&inner.key()) {
            normalize_into(inner, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn put_record(
        store: &mut BTreeMap<String, Entry>,
        id: &str,
        api_name: &str,
        fields: Vec<(&str, FieldValueEntry)>,
    ) {
        let record_key = key_for_record(id);
        let mut record = RecordEntry::new(id, api_name);
        record.weak_etag = Some(3);
        for (name, entry) in fields {
            let key = key_for_field_value(&record_key, name);
            record.fields.insert(name.to_string(), Link::resolved(key.clone()));
            store.insert(key, Entry::FieldValue(entry));
        }
        store.insert(record_key, Entry::Record(record));
    }

    fn text(s: &str) -> FieldValueEntry {
        FieldValueEntry::present(
            FieldValue::Scalar(Scalar::Text(s.to_string())),
            Some(Scalar::Text(s.to_uppercase())),
        )
    }

    fn span(id: &str) -> FieldValueEntry {
        FieldValueEntry::present(FieldValue::Record(Link::resolved(key_for_record(id))), None)
    }

    #[test]
    fn test_normalize_restores_denormalized_entries() {
        let mut store = BTreeMap::new();
        put_record(
            &mut store,
            "001",
            "Account",
            vec![
                ("Name", text("acme")),
                ("Owner", span("005")),
                ("Phone", FieldValueEntry::pending()),
            ],
        );
        put_record(&mut store, "005", "User", vec![("Name", text("ada"))]);

        let blob = denormalize(&key_for_record("001"), &store, None).expect("record");
        assert!(matches!(
            blob.fields["Owner"],
            DurableField::Present {
                value: DurableValue::Record(_),
                ..
            }
        ));
        assert_eq!(normalize(&blob), store);
    }

    #[test]
    fn test_cycle_becomes_reference() {
        let mut store = BTreeMap::new();
        put_record(&mut store, "001", "Account", vec![("Owner", span("005"))]);
        put_record(&mut store, "005", "User", vec![("Account", span("001"))]);

        let blob = denormalize(&key_for_record("001"), &store, None).expect("record");
        let owner = match &blob.fields["Owner"] {
            DurableField::Present {
                value: DurableValue::Record(owner),
                ..
            } => owner,
            other => panic!("expected inlined owner, got {other:?}"),
        };
        assert_eq!(
            owner.fields["Account"],
            DurableField::Present {
                value: DurableValue::Ref(key_for_record("001")),
                display_value: None
            }
        );
        assert_eq!(normalize(&blob), store);
    }

    #[test]
    fn test_unknown_spanning_target_becomes_reference() {
        let mut store = BTreeMap::new();
        put_record(&mut store, "001", "Account", vec![("Owner", span("404"))]);
        let blob = denormalize(&key_for_record("001"), &store, None).expect("record");
        assert!(matches!(
            &blob.fields["Owner"],
            DurableField::Present { value: DurableValue::Ref(k), .. } if *k == key_for_record("404")
        ));
        assert!(denormalize(&key_for_record("404"), &store, None).is_none());
    }

    #[test]
    fn test_blob_wire_shape() {
        let mut store = BTreeMap::new();
        put_record(&mut store, "001", "Account", vec![("Name", text("acme"))]);
        let blob = denormalize(
            &key_for_record("001"),
            &store,
            Some(DurableExpiration { fresh: 10, stale: 20 }),
        )
        .expect("record");
        let wire = serde_json::to_value(&blob).unwrap();
        assert_eq!(wire["apiName"], json!("Account"));
        assert_eq!(
            wire["fields"]["Name"],
            json!({ "state": "present", "value": { "scalar": "acme" }, "displayValue": "ACME" })
        );
        assert_eq!(wire["expiration"], json!({ "fresh": 10, "stale": 20 }));

        let back: DurableRecord = serde_json::from_value(wire).unwrap();
        assert_eq!(back, blob);
    }
}

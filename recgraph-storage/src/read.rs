//! Denormalized read views.
//!
//! A [`RecordView`] rebuilds the nested shape of a record from the store,
//! surfacing each field's availability instead of hiding it.

use std::collections::{BTreeMap, BTreeSet};

use recgraph_core::{Entry, FieldState, FieldValue, Link, Scalar};

use crate::instrumentation::Instrumentation;
use crate::resolve::{resolve_for_traversal, Resolution};
use crate::store::EntrySource;

/// One field as seen by a reader.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldRead {
    Present {
        value: ReadValue,
        display_value: Option<Scalar>,
    },
    Pending,
    Missing,
}

/// Value of a present field.
#[derive(Debug, Clone, PartialEq)]
pub enum ReadValue {
    Scalar(Scalar),
    Record(Box<RecordView>),
    /// Spanning record not expanded: it is an ancestor in this read or
    /// lies past the depth bound.
    RecordRef(String),
}

/// A record with its fields resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordView {
    pub id: String,
    pub api_name: String,
    pub record_type_id: Option<String>,
    pub weak_etag: Option<i64>,
    pub fields: BTreeMap<String, FieldRead>,
}

impl RecordView {
    pub fn field(&self, name: &str) -> Option<&FieldRead> {
        self.fields.get(name)
    }

    /// Scalar value of a present field.
    pub fn scalar(&self, name: &str) -> Option<&Scalar> {
        match self.fields.get(name) {
            Some(FieldRead::Present {
                value: ReadValue::Scalar(s),
                ..
            }) => Some(s),
            _ => None,
        }
    }

    /// Every field, including those of expanded spanning records, is present.
    pub fn is_complete(&self) -> bool {
        self.fields.values().all(|f| match f {
            FieldRead::Present {
                value: ReadValue::Record(nested),
                ..
            } => nested.is_complete(),
            FieldRead::Present { .. } => true,
            FieldRead::Pending | FieldRead::Missing => false,
        })
    }
}

/// Build the view of the record stored under `record_key`.
pub fn read_record<S: EntrySource + ?Sized>(
    source: &S,
    record_key: &str,
    max_depth: usize,
    instrumentation: &dyn Instrumentation,
) -> Option<RecordView> {
    let mut reader = Reader {
        source,
        max_depth,
        instrumentation,
        ancestors: BTreeSet::new(),
    };
    reader.record(record_key, 0)
}

struct Reader<'a, S: ?Sized> {
    source: &'a S,
    max_depth: usize,
    instrumentation: &'a dyn Instrumentation,
    ancestors: BTreeSet<String>,
}

impl<S: EntrySource + ?Sized> Reader<'_, S> {
    fn record(&mut self, record_key: &str, depth: usize) -> Option<RecordView> {
        let source = self.source;
        let record = source.entry(record_key)?.as_record()?;
        self.ancestors.insert(record_key.to_string());

        let fields = record
            .fields
            .iter()
            .map(|(name, link)| (name.clone(), self.field(link, depth)))
            .collect();

        self.ancestors.remove(record_key);
        Some(RecordView {
            id: record.id.clone(),
            api_name: record.api_name.clone(),
            record_type_id: record.record_type_id.clone(),
            weak_etag: record.weak_etag,
            fields,
        })
    }

    fn field(&mut self, link: &Link, depth: usize) -> FieldRead {
        let field = match resolve_for_traversal(self.source, link, self.instrumentation) {
            Resolution::Entry(Entry::FieldValue(field)) => field,
            Resolution::Pending => return FieldRead::Pending,
            _ => return FieldRead::Missing,
        };
        match field.state {
            FieldState::Pending => return FieldRead::Pending,
            FieldState::Missing => return FieldRead::Missing,
            FieldState::Present => {}
        }
        let value = match &field.value {
            FieldValue::Scalar(s) => ReadValue::Scalar(s.clone()),
            FieldValue::Undefined => return FieldRead::Missing,
            FieldValue::Record(target) => match self.spanning(target, depth + 1) {
                Some(value) => value,
                None => return FieldRead::Missing,
            },
        };
        FieldRead::Present {
            value,
            display_value: field.display_value.clone(),
        }
    }

    fn spanning(&mut self, target: &Link, depth: usize) -> Option<ReadValue> {
        let key = match resolve_for_traversal(self.source, target, self.instrumentation) {
            Resolution::Entry(Entry::Record(_)) => target.key()?,
            _ => return None,
        };
        if self.ancestors.contains(key) || depth > self.max_depth {
            return Some(ReadValue::RecordRef(key.to_string()));
        }
        self.record(key, depth)
            .map(|view| ReadValue::Record(Box::new(view)))
    }
}

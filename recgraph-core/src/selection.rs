//! Ingest plans.
//!
//! A [`Selection`] describes the shape of a payload as known from the query
//! or mutation that produced it. Node kinds are decided here, once, when the
//! plan is built; the ingest engine never guesses a node's kind from the
//! payload itself.

use std::collections::BTreeMap;

use crate::keys::{key_for_path, Arguments, Variables};

/// Kind of a payload node, fixed at plan-build time.
#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
    /// A leaf stored as a field-value entry.
    Scalar,
    /// A record in `{ id, apiName, fields: { Name: { value, displayValue } } }` form.
    Record(RecordSelection),
    /// A paginated/filtered collection in `{ edges: [{ node, cursor }] }` form.
    Connection(ConnectionSelection),
    /// A plain nested object flattened into its own entry.
    Object(ObjectSelection),
}

impl Selection {
    pub fn record() -> Self {
        Self::Record(RecordSelection::default())
    }

    pub fn object<K: Into<String>>(properties: impl IntoIterator<Item = (K, Selection)>) -> Self {
        Self::Object(ObjectSelection::new(properties))
    }

    pub fn connection(arguments: Arguments, node: Selection) -> Self {
        Self::Connection(ConnectionSelection {
            arguments,
            variables: Variables::new(),
            node: Box::new(node),
        })
    }

    /// Short name of the node kind, for error messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Scalar => "scalar",
            Self::Record(_) => "record",
            Self::Connection(_) => "connection",
            Self::Object(_) => "object",
        }
    }
}

/// Plan for a record node.
///
/// Field values inside a record follow the record wire format: an object
/// `value` is always a nested (spanning) record. `spanning` optionally pins
/// the plan used for specific nested records; unlisted ones use the default.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RecordSelection {
    pub spanning: BTreeMap<String, RecordSelection>,
}

impl RecordSelection {
    pub fn with_spanning(mut self, field: impl Into<String>, nested: RecordSelection) -> Self {
        self.spanning.insert(field.into(), nested);
        self
    }

    /// Plan for the record reached through `field`.
    pub fn nested(&self, field: &str) -> Option<&RecordSelection> {
        self.spanning.get(field)
    }
}

/// Plan for a connection node.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionSelection {
    pub arguments: Arguments,
    pub variables: Variables,
    pub node: Box<Selection>,
}

impl ConnectionSelection {
    pub fn with_variables(mut self, variables: Variables) -> Self {
        self.variables = variables;
        self
    }
}

/// Plan for a plain object node.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ObjectSelection {
    pub properties: BTreeMap<String, Selection>,
}

impl ObjectSelection {
    pub fn new<K: Into<String>>(properties: impl IntoIterator<Item = (K, Selection)>) -> Self {
        Self {
            properties: properties.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

/// Where in the graph a payload fragment belongs: parent key plus property.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IngestPath {
    pub parent_key: String,
    pub property: String,
}

impl IngestPath {
    pub fn new(parent_key: impl Into<String>, property: impl Into<String>) -> Self {
        Self {
            parent_key: parent_key.into(),
            property: property.into(),
        }
    }

    /// Path of a top-level fragment with no parent.
    pub fn root(property: impl Into<String>) -> Self {
        Self::new(String::new(), property)
    }

    /// Store key of the fragment.
    pub fn key(&self) -> String {
        key_for_path(&self.parent_key, &self.property)
    }

    /// Path of `property` below this fragment.
    pub fn child(&self, property: impl Into<String>) -> Self {
        Self::new(self.key(), property)
    }
}

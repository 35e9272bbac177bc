//! Normalized entry types held by the entry store.
//!
//! Every nested structure is flattened: records point at field-value
//! entries, field values point at spanning records, connections point at
//! edges. All pointers are [`Link`]s, never inline data.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Record type id shared by every object's master record type.
pub const MASTER_RECORD_TYPE_ID: &str = "012000000000000AAA";

// ============================================================================
// SCALARS AND LINKS
// ============================================================================

/// A leaf value stored in a field-value entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Scalar {
    /// Convert a JSON leaf into a scalar. Objects and arrays are not scalars.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        use serde_json::Value;
        match value {
            Value::Null => Some(Self::Null),
            Value::Bool(b) => Some(Self::Bool(*b)),
            Value::Number(n) => n
                .as_i64()
                .map(Self::Int)
                .or_else(|| n.as_f64().map(Self::Float)),
            Value::String(s) => Some(Self::Text(s.clone())),
            Value::Array(_) | Value::Object(_) => None,
        }
    }

    /// Convert back to JSON. Non-finite floats become `null`.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value;
        match self {
            Self::Null => Value::Null,
            Self::Bool(b) => Value::Bool(*b),
            Self::Int(i) => Value::from(*i),
            Self::Float(f) => serde_json::Number::from_f64(*f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            Self::Text(s) => Value::String(s.clone()),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// Reference from one entry to another.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Link {
    /// Points at the entry stored under this key.
    Resolved(String),
    /// Target not yet known; awaiting fulfillment elsewhere.
    Pending,
    /// Target explicitly absent.
    Missing,
}

impl Link {
    pub fn resolved(key: impl Into<String>) -> Self {
        Self::Resolved(key.into())
    }

    /// Key of the target, if resolved.
    pub fn key(&self) -> Option<&str> {
        match self {
            Self::Resolved(key) => Some(key),
            Self::Pending | Self::Missing => None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, Self::Resolved(_))
    }
}

// ============================================================================
// FIELD VALUES
// ============================================================================

/// Availability of a field value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldState {
    /// Has a concrete value.
    #[default]
    Present,
    /// Needs refetch; awaiting a network round-trip queued elsewhere.
    Pending,
    /// Explicitly absent (evicted or never requested).
    Missing,
}

/// The `value` half of a field-value entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldValue {
    Scalar(Scalar),
    /// Spanning field: link to another record entry.
    Record(Link),
    Undefined,
}

impl FieldValue {
    /// True when the value is a link to another record.
    pub fn is_spanning(&self) -> bool {
        matches!(self, Self::Record(_))
    }
}

/// Normalized `{ value, displayValue }` wrapper for one field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldValueEntry {
    pub value: FieldValue,
    pub display_value: Option<Scalar>,
    #[serde(default)]
    pub state: FieldState,
}

impl FieldValueEntry {
    pub fn present(value: FieldValue, display_value: Option<Scalar>) -> Self {
        Self {
            value,
            display_value,
            state: FieldState::Present,
        }
    }

    /// Placeholder for a field whose data is awaited.
    pub fn pending() -> Self {
        Self {
            value: FieldValue::Undefined,
            display_value: None,
            state: FieldState::Pending,
        }
    }

    /// Placeholder for a field known to be absent.
    pub fn missing() -> Self {
        Self {
            value: FieldValue::Undefined,
            display_value: None,
            state: FieldState::Missing,
        }
    }
}

// ============================================================================
// RECORDS
// ============================================================================

/// Record type metadata as delivered with a record payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordTypeInfo {
    #[serde(default)]
    pub available: bool,
    #[serde(default)]
    pub default_record_type_mapping: bool,
    #[serde(default)]
    pub master: bool,
    #[serde(default)]
    pub name: String,
    pub record_type_id: String,
}

/// Normalized record: header plus links to its field-value entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordEntry {
    pub id: String,
    pub api_name: String,
    pub record_type_id: Option<String>,
    pub record_type_info: Option<RecordTypeInfo>,
    pub weak_etag: Option<i64>,
    pub system_modstamp: Option<String>,
    pub fields: BTreeMap<String, Link>,
}

impl RecordEntry {
    pub fn new(id: impl Into<String>, api_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            api_name: api_name.into(),
            record_type_id: None,
            record_type_info: None,
            weak_etag: None,
            system_modstamp: None,
            fields: BTreeMap::new(),
        }
    }

    /// Whether the stored record type is a concrete, non-master type.
    pub fn has_non_master_record_type(&self) -> bool {
        match (&self.record_type_id, &self.record_type_info) {
            (_, Some(info)) => !info.master && info.record_type_id != MASTER_RECORD_TYPE_ID,
            (Some(id), None) => id != MASTER_RECORD_TYPE_ID,
            (None, None) => false,
        }
    }
}

// ============================================================================
// CONNECTIONS AND OBJECTS
// ============================================================================

/// Ordered list of edge links for one argument set.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConnectionEntry {
    pub edges: Vec<Link>,
}

/// One edge of a connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeEntry {
    pub cursor: Option<String>,
    pub node: Link,
}

/// Plain nested object flattened into its own entry.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ObjectEntry {
    pub properties: BTreeMap<String, Link>,
}

// ============================================================================
// ENTRY
// ============================================================================

/// A stored unit, keyed by a string key unique within the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Entry {
    Record(RecordEntry),
    FieldValue(FieldValueEntry),
    Connection(ConnectionEntry),
    Edge(EdgeEntry),
    Object(ObjectEntry),
}

impl Entry {
    pub fn as_record(&self) -> Option<&RecordEntry> {
        match self {
            Self::Record(record) => Some(record),
            _ => None,
        }
    }

    pub fn as_record_mut(&mut self) -> Option<&mut RecordEntry> {
        match self {
            Self::Record(record) => Some(record),
            _ => None,
        }
    }

    pub fn as_field_value(&self) -> Option<&FieldValueEntry> {
        match self {
            Self::FieldValue(field) => Some(field),
            _ => None,
        }
    }

    pub fn as_field_value_mut(&mut self) -> Option<&mut FieldValueEntry> {
        match self {
            Self::FieldValue(field) => Some(field),
            _ => None,
        }
    }

    /// Outgoing links of this entry, in a stable order.
    pub fn links(&self) -> Vec<&Link> {
        match self {
            Self::Record(record) => record.fields.values().collect(),
            Self::FieldValue(field) => match &field.value {
                FieldValue::Record(link) => vec![link],
                FieldValue::Scalar(_) | FieldValue::Undefined => Vec::new(),
            },
            Self::Connection(connection) => connection.edges.iter().collect(),
            Self::Edge(edge) => vec![&edge.node],
            Self::Object(object) => object.properties.values().collect(),
        }
    }

    /// Mutable counterpart of [`Entry::links`], in the same order.
    pub fn links_mut(&mut self) -> Vec<&mut Link> {
        match self {
            Self::Record(record) => record.fields.values_mut().collect(),
            Self::FieldValue(field) => match &mut field.value {
                FieldValue::Record(link) => vec![link],
                FieldValue::Scalar(_) | FieldValue::Undefined => Vec::new(),
            },
            Self::Connection(connection) => connection.edges.iter_mut().collect(),
            Self::Edge(edge) => vec![&mut edge.node],
            Self::Object(object) => object.properties.values_mut().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_scalar_from_json() {
        assert_eq!(Scalar::from_json(&json!(null)), Some(Scalar::Null));
        assert_eq!(Scalar::from_json(&json!(42)), Some(Scalar::Int(42)));
        assert_eq!(Scalar::from_json(&json!(1.5)), Some(Scalar::Float(1.5)));
        assert_eq!(
            Scalar::from_json(&json!("Acme")),
            Some(Scalar::Text("Acme".to_string()))
        );
        assert_eq!(Scalar::from_json(&json!({"a": 1})), None);
        assert_eq!(Scalar::from_json(&json!([1])), None);
    }

    #[test]
    fn test_entry_serde_shape() {
        let entry = Entry::FieldValue(FieldValueEntry::present(
            FieldValue::Record(Link::resolved("UiApi::RecordRepresentation:001")),
            Some(Scalar::Text("Acme".to_string())),
        ));
        let encoded = serde_json::to_value(&entry).expect("serialize entry");
        assert_eq!(encoded["kind"], "field_value");
        let decoded: Entry = serde_json::from_value(encoded).expect("deserialize entry");
        assert_eq!(decoded, entry);
    }

    #[test]
    fn test_non_master_record_type() {
        let mut record = RecordEntry::new("001", "Account");
        assert!(!record.has_non_master_record_type());

        record.record_type_id = Some(MASTER_RECORD_TYPE_ID.to_string());
        assert!(!record.has_non_master_record_type());

        record.record_type_id = Some("012T00000004MUHIA2".to_string());
        assert!(record.has_non_master_record_type());

        record.record_type_info = Some(RecordTypeInfo {
            available: true,
            default_record_type_mapping: false,
            master: true,
            name: "Master".to_string(),
            record_type_id: MASTER_RECORD_TYPE_ID.to_string(),
        });
        assert!(!record.has_non_master_record_type());
    }

    #[test]
    fn test_entry_links() {
        let mut record = RecordEntry::new("001", "Account");
        record
            .fields
            .insert("Name".to_string(), Link::resolved("k1"));
        record.fields.insert("Owner".to_string(), Link::Pending);
        let mut entry = Entry::Record(record);
        assert_eq!(entry.links().len(), 2);

        for link in entry.links_mut() {
            *link = Link::Missing;
        }
        assert!(entry.links().iter().all(|l| **l == Link::Missing));

        let mut edge = Entry::Edge(EdgeEntry {
            cursor: None,
            node: Link::resolved("k2"),
        });
        *edge.links_mut()[0] = Link::Pending;
        assert_eq!(edge.links(), vec![&Link::Pending]);
    }
}

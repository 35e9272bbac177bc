//! Canonical store keys.
//!
//! Keys are plain strings so that they can be shared verbatim with a
//! durable store. Every builder here is deterministic: the same inputs
//! always produce the same key.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use crate::error::SerializationError;

/// Prefix shared by every record key.
pub const RECORD_KEY_PREFIX: &str = "UiApi::RecordRepresentation:";

/// Separator between a record key and one of its field names.
pub const FIELDS_SEGMENT: &str = "__fields__";

/// Separator between a parent key and a child property.
pub const PATH_SEPARATOR: &str = "__";

/// Key of the record with the given id.
pub fn key_for_record(id: &str) -> String {
    format!("{RECORD_KEY_PREFIX}{id}")
}

/// Key of the field-value entry for `field` on the record stored at `record_key`.
pub fn key_for_field_value(record_key: &str, field: &str) -> String {
    format!("{record_key}{FIELDS_SEGMENT}{field}")
}

/// Key of a plain child property below `parent_key`.
pub fn key_for_path(parent_key: &str, property: &str) -> String {
    if parent_key.is_empty() {
        property.to_string()
    } else {
        format!("{parent_key}{PATH_SEPARATOR}{property}")
    }
}

/// Key of the `index`-th edge of a connection.
pub fn key_for_edge(connection_key: &str, index: usize) -> String {
    format!("{connection_key}{PATH_SEPARATOR}edges{PATH_SEPARATOR}{index}")
}

/// Key of the connection stored for `field` with the given arguments.
pub fn key_for_connection(
    parent_key: &str,
    field: &str,
    arguments: &Arguments,
    variables: &Variables,
) -> Result<String, SerializationError> {
    let segment = connection_segment(field, arguments, variables)?;
    Ok(key_for_path(parent_key, &segment))
}

/// `field(arg:value,...)`, or the bare field name when there are no arguments.
pub fn connection_segment(
    field: &str,
    arguments: &Arguments,
    variables: &Variables,
) -> Result<String, SerializationError> {
    if arguments.is_empty() {
        return Ok(field.to_string());
    }
    let mut out = String::with_capacity(field.len() + 16);
    out.push_str(field);
    out.push('(');
    write_entries(&mut out, field, arguments.entries(), variables)?;
    out.push(')');
    Ok(out)
}

// ============================================================================
// KEY CLASSIFICATION
// ============================================================================

/// What a key addresses, as far as the key alone can tell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyKind<'a> {
    Record { id: &'a str },
    Field { record_key: &'a str, field: &'a str },
    Other,
}

/// Classify a key by its shape.
pub fn parse_key(key: &str) -> KeyKind<'_> {
    let Some(rest) = key.strip_prefix(RECORD_KEY_PREFIX) else {
        return KeyKind::Other;
    };
    match rest.split_once(FIELDS_SEGMENT) {
        Some((id, field)) if !id.is_empty() && !field.is_empty() => KeyKind::Field {
            record_key: &key[..RECORD_KEY_PREFIX.len() + id.len()],
            field,
        },
        Some(_) => KeyKind::Other,
        None if rest.is_empty() || rest.contains(PATH_SEPARATOR) => KeyKind::Other,
        None => KeyKind::Record { id: rest },
    }
}

/// Record key owning `key`, when `key` is a record or field key.
pub fn owning_record_key(key: &str) -> Option<&str> {
    match parse_key(key) {
        KeyKind::Record { .. } => Some(key),
        KeyKind::Field { record_key, .. } => Some(record_key),
        KeyKind::Other => None,
    }
}

// ============================================================================
// ARGUMENTS
// ============================================================================

/// A field-argument value as it appears in a parsed query.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgumentValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    /// Bare enum literal, e.g. `ASC`.
    Enum(String),
    /// `$name`, resolved against [`Variables`] at key time.
    Variable(String),
    List(Vec<ArgumentValue>),
    Object(Vec<(String, ArgumentValue)>),
}

impl ArgumentValue {
    pub fn object<K: Into<String>>(entries: impl IntoIterator<Item = (K, ArgumentValue)>) -> Self {
        Self::Object(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn string(value: impl Into<String>) -> Self {
        Self::String(value.into())
    }
}

/// Ordered field arguments, as written at the call site.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Arguments {
    entries: Vec<(String, ArgumentValue)>,
}

impl Arguments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: ArgumentValue) -> Self {
        self.entries.push((name.into(), value));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[(String, ArgumentValue)] {
        &self.entries
    }
}

/// Variable bindings supplied with a query.
pub type Variables = BTreeMap<String, serde_json::Value>;

fn write_entries(
    out: &mut String,
    field: &str,
    entries: &[(String, ArgumentValue)],
    variables: &Variables,
) -> Result<(), SerializationError> {
    let mut sorted: Vec<&(String, ArgumentValue)> = entries.iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(&b.0));
    for pair in sorted.windows(2) {
        if pair[0].0 == pair[1].0 {
            return Err(SerializationError::DuplicateKey {
                field: field.to_string(),
                key: pair[0].0.clone(),
            });
        }
    }
    for (i, (name, value)) in sorted.into_iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(name);
        out.push(':');
        write_value(out, field, name, value, variables)?;
    }
    Ok(())
}

fn write_value(
    out: &mut String,
    field: &str,
    argument: &str,
    value: &ArgumentValue,
    variables: &Variables,
) -> Result<(), SerializationError> {
    match value {
        ArgumentValue::Null => out.push_str("null"),
        ArgumentValue::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        ArgumentValue::Int(i) => {
            let _ = write!(out, "{i}");
        }
        ArgumentValue::Float(f) => {
            if !f.is_finite() {
                return Err(SerializationError::NonFiniteNumber {
                    field: field.to_string(),
                    argument: argument.to_string(),
                });
            }
            let _ = write!(out, "{f}");
        }
        ArgumentValue::String(s) => write_quoted(out, s),
        ArgumentValue::Enum(e) => out.push_str(e),
        ArgumentValue::Variable(name) => {
            let bound = variables.get(name).ok_or_else(|| {
                SerializationError::UnresolvedVariable {
                    field: field.to_string(),
                    name: name.clone(),
                }
            })?;
            write_json(out, field, argument, bound)?;
        }
        ArgumentValue::List(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(out, field, argument, item, variables)?;
            }
            out.push(']');
        }
        ArgumentValue::Object(entries) => {
            out.push('{');
            write_entries(out, field, entries, variables)?;
            out.push('}');
        }
    }
    Ok(())
}

fn write_json(
    out: &mut String,
    field: &str,
    argument: &str,
    value: &serde_json::Value,
) -> Result<(), SerializationError> {
    use serde_json::Value;
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => {
            let _ = write!(out, "{n}");
        }
        Value::String(s) => write_quoted(out, s),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_json(out, field, argument, item)?;
            }
            out.push(']');
        }
        Value::Object(map) => {
            // serde_json maps iterate in key order
            out.push('{');
            for (i, (k, v)) in map.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(k);
                out.push(':');
                write_json(out, field, argument, v)?;
            }
            out.push('}');
        }
    }
    Ok(())
}

fn write_quoted(out: &mut String, s: &str) {
    match serde_json::to_string(s) {
        Ok(quoted) => out.push_str(&quoted),
        Err(_) => {
            out.push('"');
            out.push_str(s);
            out.push('"');
        }
    }
}

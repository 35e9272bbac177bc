//! Merge rules for records and field values.
//!
//! Pure functions over entries; the ingest run decides when to call them.

use recgraph_core::{RecordEntry, RecordTypeInfo, Scalar, MASTER_RECORD_TYPE_ID};
use serde_json::{Map, Value};

/// Header fields of an incoming record node. `None` means "not supplied".
#[derive(Debug, Clone, PartialEq, Default)]
pub struct IncomingHeader {
    pub api_name: Option<String>,
    pub record_type_id: Option<String>,
    pub record_type_info: Option<RecordTypeInfo>,
    pub weak_etag: Option<i64>,
    pub system_modstamp: Option<String>,
}

impl IncomingHeader {
    /// Read the header from a record node. Errors describe the offending member.
    pub fn parse(node: &Map<String, Value>) -> Result<Self, String> {
        let api_name = optional_str(node, "apiName")?;
        let record_type_id = optional_str(node, "recordTypeId")?;
        let record_type_info = match node.get("recordTypeInfo") {
            None | Some(Value::Null) => None,
            Some(info) => Some(
                serde_json::from_value::<RecordTypeInfo>(info.clone())
                    .map_err(|e| format!("recordTypeInfo is malformed: {e}"))?,
            ),
        };
        let weak_etag = match node.get("weakEtag") {
            None | Some(Value::Null) => None,
            Some(v) => Some(v.as_i64().ok_or("weakEtag must be an integer")?),
        };
        let system_modstamp = optional_str(node, "systemModstamp")?;
        Ok(Self {
            api_name,
            record_type_id,
            record_type_info,
            weak_etag,
            system_modstamp,
        })
    }

    /// Record type id carried by the node, from either member.
    pub fn effective_record_type_id(&self) -> Option<&str> {
        self.record_type_id
            .as_deref()
            .or_else(|| self.record_type_info.as_ref().map(|i| i.record_type_id.as_str()))
    }

    /// Master record type with no type info attached.
    pub fn is_bare_master(&self) -> bool {
        self.record_type_info.is_none()
            && self.effective_record_type_id() == Some(MASTER_RECORD_TYPE_ID)
    }
}

fn optional_str(node: &Map<String, Value>, member: &str) -> Result<Option<String>, String> {
    match node.get(member) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(format!("{member} must be a string, found {other}")),
    }
}

/// Build a new record entry from an incoming header.
pub fn new_record(id: &str, header: &IncomingHeader) -> RecordEntry {
    let mut record = RecordEntry::new(id, header.api_name.clone().unwrap_or_default());
    record.record_type_id = header.effective_record_type_id().map(str::to_string);
    record.record_type_info = header.record_type_info.clone();
    record.weak_etag = header.weak_etag;
    record.system_modstamp = header.system_modstamp.clone();
    record
}

/// Outcome of a header merge that callers may want to report.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HeaderMerge {
    /// Previous api name, when the incoming node changed it.
    pub api_name_changed_from: Option<String>,
    /// The incoming record type was dropped by the overwrite rule.
    pub record_type_kept: bool,
}

/// Whether an incoming record type may replace the stored one.
///
/// A bare master type never replaces a concrete, non-master type.
pub fn should_apply_record_type(existing: &RecordEntry, incoming: &IncomingHeader) -> bool {
    if incoming.effective_record_type_id().is_none() {
        return false;
    }
    !(incoming.is_bare_master() && existing.has_non_master_record_type())
}

/// Merge an incoming header into a stored record. `id` is never touched.
pub fn merge_record_header(existing: &mut RecordEntry, incoming: &IncomingHeader) -> HeaderMerge {
    let mut outcome = HeaderMerge::default();

    if let Some(api_name) = &incoming.api_name {
        if *api_name != existing.api_name {
            if !existing.api_name.is_empty() {
                outcome.api_name_changed_from = Some(existing.api_name.clone());
            }
            existing.api_name = api_name.clone();
        }
    }

    if should_apply_record_type(existing, incoming) {
        existing.record_type_id = incoming.effective_record_type_id().map(str::to_string);
        existing.record_type_info = incoming.record_type_info.clone();
    } else if incoming.effective_record_type_id().is_some() {
        outcome.record_type_kept = true;
    }

    if incoming.weak_etag.is_some() {
        existing.weak_etag = incoming.weak_etag;
    }
    if incoming.system_modstamp.is_some() {
        existing.system_modstamp = incoming.system_modstamp.clone();
    }

    outcome
}

/// A null incoming display value keeps the stored one; anything else wins.
pub fn merge_display_value(existing: Option<&Scalar>, incoming: Option<Scalar>) -> Option<Scalar> {
    match incoming {
        Some(value) if !value.is_null() => Some(value),
        _ => existing.filter(|v| !v.is_null()).cloned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn header(value: Value) -> IncomingHeader {
        let node = value.as_object().cloned().unwrap_or_default();
        IncomingHeader::parse(&node).expect("valid header")
    }

    fn business_type() -> RecordTypeInfo {
        RecordTypeInfo {
            available: true,
            default_record_type_mapping: true,
            master: false,
            name: "Business".to_string(),
            record_type_id: "012T00000004MUHIA2".to_string(),
        }
    }

    #[test]
    fn test_parse_header() {
        let h = header(json!({
            "apiName": "Account",
            "recordTypeId": "012000000000000AAA",
            "recordTypeInfo": null,
            "weakEtag": 7,
            "systemModstamp": "2024-01-01T00:00:00.000Z"
        }));
        assert_eq!(h.api_name.as_deref(), Some("Account"));
        assert!(h.is_bare_master());
        assert_eq!(h.weak_etag, Some(7));
    }

    #[test]
    fn test_parse_header_rejects_bad_types() {
        let node = json!({"apiName": 5});
        let map = node.as_object().cloned().unwrap_or_default();
        assert!(IncomingHeader::parse(&map).is_err());
    }

    #[test]
    fn test_master_does_not_overwrite_non_master() {
        let mut existing = RecordEntry::new("001", "Account");
        existing.record_type_id = Some(business_type().record_type_id);
        existing.record_type_info = Some(business_type());

        let incoming = header(json!({
            "recordTypeId": MASTER_RECORD_TYPE_ID,
            "recordTypeInfo": null
        }));
        let outcome = merge_record_header(&mut existing, &incoming);
        assert!(outcome.record_type_kept);
        assert_eq!(existing.record_type_info, Some(business_type()));
        assert_eq!(existing.record_type_id.as_deref(), Some("012T00000004MUHIA2"));
    }

    #[test]
    fn test_non_master_overwrites_master() {
        let mut existing = RecordEntry::new("001", "Account");
        existing.record_type_id = Some(MASTER_RECORD_TYPE_ID.to_string());

        let incoming = IncomingHeader {
            record_type_id: Some(business_type().record_type_id),
            record_type_info: Some(business_type()),
            ..Default::default()
        };
        merge_record_header(&mut existing, &incoming);
        assert_eq!(existing.record_type_info, Some(business_type()));
    }

    #[test]
    fn test_api_name_change_reported() {
        let mut existing = RecordEntry::new("001", "Public");
        let incoming = header(json!({"apiName": "Secret"}));
        let outcome = merge_record_header(&mut existing, &incoming);
        assert_eq!(outcome.api_name_changed_from.as_deref(), Some("Public"));
        assert_eq!(existing.api_name, "Secret");
        assert_eq!(existing.id, "001");
    }

    #[test]
    fn test_display_value_rules() {
        let foo = Scalar::Text("foo".to_string());
        let bar = Scalar::Text("bar".to_string());
        assert_eq!(merge_display_value(Some(&foo), None), Some(foo.clone()));
        assert_eq!(merge_display_value(Some(&foo), Some(Scalar::Null)), Some(foo.clone()));
        assert_eq!(merge_display_value(Some(&foo), Some(bar.clone())), Some(bar.clone()));
        assert_eq!(merge_display_value(None, Some(bar.clone())), Some(bar));
        assert_eq!(merge_display_value(None, None), None);
    }
}

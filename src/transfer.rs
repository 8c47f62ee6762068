//! Portable export bundles and the two-phase import that consumes them.
//!
//! An export always carries every known bucket that currently has a value.
//! Import is additive per bucket: buckets missing from the file keep their
//! local value. Parsing an import never touches local state; only
//! [`ImportPlan::apply`] does, and callers are expected to confirm with the
//! user before calling it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::bucket::Bucket;
use crate::error::CueClubError;
use crate::storage::{Document, Storage};

pub const BUNDLE_VERSION: &str = "2.0";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportBundle {
    pub version: String,
    pub export_date: DateTime<Utc>,
    pub metadata: BundleMetadata,
    pub data: Document,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleMetadata {
    pub club_name: Option<String>,
    /// Byte length of the serialized `data` object.
    pub data_size: usize,
}

impl ExportBundle {
    pub fn collect(storage: &Storage) -> Self {
        Self::collect_at(storage, Utc::now())
    }

    pub fn collect_at(storage: &Storage, now: DateTime<Utc>) -> Self {
        let document = storage.get_all();
        let mut data = Document::new();
        for bucket in Bucket::ALL {
            if let Some(value) = document.get(bucket.key()) {
                data.insert(bucket.key().to_string(), value.clone());
            }
        }

        let club_name = data
            .get(Bucket::Settings.key())
            .and_then(|settings| settings.get("clubName"))
            .and_then(Value::as_str)
            .map(str::to_string);
        let data_size = serde_json::to_string(&data)
            .map(|text| text.len())
            .unwrap_or_default();

        Self {
            version: BUNDLE_VERSION.to_string(),
            export_date: now,
            metadata: BundleMetadata {
                club_name,
                data_size,
            },
            data,
        }
    }

    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Flat pre-2.0 layout: each bucket at the top level as its
    /// JSON-encoded local-storage string, no envelope.
    pub fn to_legacy_json(&self) -> crate::Result<String> {
        let mut flat = Document::new();
        for (key, value) in &self.data {
            flat.insert(key.clone(), Value::String(serde_json::to_string(value)?));
        }
        Ok(serde_json::to_string_pretty(&flat)?)
    }

    pub fn file_name(&self) -> String {
        format!("cueclub-export-{}.json", self.export_date.format("%Y-%m-%d"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BundleFormat {
    Enveloped,
    Legacy,
}

/// A parsed import waiting for confirmation.
#[derive(Debug, Clone)]
pub struct ImportPlan {
    format: BundleFormat,
    export_date: Option<String>,
    entries: Vec<(Bucket, Value)>,
}

impl ImportPlan {
    pub fn parse(text: &str) -> crate::Result<Self> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| CueClubError::InvalidImport(e.to_string()))?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> crate::Result<Self> {
        let Value::Object(mut root) = value else {
            return Err(CueClubError::InvalidImport(
                "expected a JSON object".to_string(),
            ));
        };

        let format = match root.get("version").and_then(Value::as_str) {
            Some(BUNDLE_VERSION) => BundleFormat::Enveloped,
            _ => BundleFormat::Legacy,
        };
        let export_date = root
            .get("exportDate")
            .and_then(Value::as_str)
            .map(str::to_string);

        let source = match format {
            BundleFormat::Enveloped => match root.remove("data") {
                Some(Value::Object(data)) => data,
                _ => {
                    return Err(CueClubError::InvalidImport(
                        "version 2.0 bundle has no `data` object".to_string(),
                    ))
                }
            },
            BundleFormat::Legacy => root,
        };

        let mut entries = Vec::new();
        for bucket in Bucket::ALL {
            let Some(value) = source.get(bucket.key()) else {
                continue;
            };
            let value = match format {
                BundleFormat::Legacy => decode_legacy_value(value),
                BundleFormat::Enveloped => value.clone(),
            };
            if is_blank(&value) {
                continue;
            }
            entries.push((bucket, value));
        }

        Ok(Self {
            format,
            export_date,
            entries,
        })
    }

    pub fn format(&self) -> BundleFormat {
        self.format
    }

    pub fn export_date(&self) -> Option<&str> {
        self.export_date.as_deref()
    }

    /// Buckets this import would overwrite.
    pub fn buckets(&self) -> Vec<Bucket> {
        self.entries.iter().map(|(bucket, _)| *bucket).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Overwrites the affected buckets in one document write. Returns how
    /// many buckets were replaced.
    pub fn apply(self, storage: &Storage) -> crate::Result<usize> {
        let count = self.entries.len();
        if count == 0 {
            return Ok(0);
        }
        let written = storage.update(|document| {
            for (bucket, value) in self.entries {
                document.insert(bucket.key().to_string(), value);
            }
        });
        if !written {
            return Err(CueClubError::Storage(
                "failed to write imported buckets".to_string(),
            ));
        }
        info!("Imported {} bucket(s) ({:?} format)", count, self.format);
        Ok(count)
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(text) => text.is_empty(),
        _ => false,
    }
}

// Legacy files carry local-storage strings, each the JSON encoding of the
// bucket value. Text that is not JSON is kept as a plain string.
fn decode_legacy_value(value: &Value) -> Value {
    if let Value::String(text) = value {
        match serde_json::from_str::<Value>(text) {
            Ok(decoded) => return decoded,
            Err(e) => debug!("Keeping legacy bucket value as plain text: {}", e),
        }
    }
    value.clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn seeded_storage() -> Storage {
        let storage = Storage::in_memory();
        storage.set("settings", json!({ "clubName": "Ace Snooker" }));
        storage.set("tables", json!([{ "id": 1, "name": "Table 1" }]));
        storage.set("emergencyPin", json!("4821"));
        storage.set("scratch", json!("not a bucket"));
        storage
    }

    #[test]
    fn test_export_envelope_shape() {
        let storage = seeded_storage();
        let bundle = ExportBundle::collect(&storage);
        let value: Value = serde_json::from_str(&bundle.to_json().unwrap()).unwrap();

        assert_eq!(value["version"], json!("2.0"));
        assert_eq!(value["data"]["settings"], json!({ "clubName": "Ace Snooker" }));
        assert_eq!(value["metadata"]["clubName"], json!("Ace Snooker"));
        assert!(value["exportDate"].is_string());
        assert!(value["data"].get("scratch").is_none());
        assert!(value["data"].get("expenses").is_none());
        assert_eq!(
            value["metadata"]["dataSize"],
            json!(serde_json::to_string(&bundle.data).unwrap().len())
        );
    }

    #[test]
    fn test_envelope_round_trip() {
        let storage = seeded_storage();
        let text = ExportBundle::collect(&storage).to_json().unwrap();

        let target = Storage::in_memory();
        let plan = ImportPlan::parse(&text).unwrap();
        assert_eq!(plan.format(), BundleFormat::Enveloped);
        assert_eq!(plan.apply(&target).unwrap(), 3);

        for key in ["settings", "tables", "emergencyPin"] {
            assert_eq!(target.get(key), storage.get(key));
        }
    }

    #[test]
    fn test_legacy_round_trip() {
        let storage = seeded_storage();
        storage.set("users", json!("[1234]"));
        storage.set("expenses", json!("{}"));
        let text = ExportBundle::collect(&storage).to_legacy_json().unwrap();

        let flat: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(flat["emergencyPin"], json!("\"4821\""));
        assert_eq!(flat["users"], json!("\"[1234]\""));

        let target = Storage::in_memory();
        let plan = ImportPlan::parse(&text).unwrap();
        assert_eq!(plan.format(), BundleFormat::Legacy);
        plan.apply(&target).unwrap();

        for key in ["settings", "tables", "emergencyPin", "users", "expenses"] {
            assert_eq!(target.get(key), storage.get(key));
        }
        assert_eq!(target.get("users"), Some(json!("[1234]")));
    }

    #[test]
    fn test_legacy_string_encoded_buckets() {
        let text = r#"{
            "settings": "{\"clubName\":\"Old Club\"}",
            "emergencyPin": "\"1234\"",
            "reservations": "walk-ins only",
            "loyaltyConfig": "null",
            "expenses": ""
        }"#;
        let plan = ImportPlan::parse(text).unwrap();
        assert_eq!(
            plan.buckets(),
            vec![Bucket::Settings, Bucket::EmergencyPin, Bucket::Reservations]
        );

        let storage = Storage::in_memory();
        plan.apply(&storage).unwrap();
        assert_eq!(storage.get("settings"), Some(json!({ "clubName": "Old Club" })));
        assert_eq!(storage.get("emergencyPin"), Some(json!("1234")));
        assert_eq!(storage.get("reservations"), Some(json!("walk-ins only")));
    }

    #[test]
    fn test_unknown_version_is_legacy() {
        let text = r#"{ "version": "1.0", "tables": [{ "id": 7 }] }"#;
        let plan = ImportPlan::parse(text).unwrap();
        assert_eq!(plan.format(), BundleFormat::Legacy);
        assert_eq!(plan.buckets(), vec![Bucket::Tables]);
    }

    #[test]
    fn test_absent_buckets_are_left_untouched() {
        let storage = seeded_storage();
        let text = r#"{ "version": "2.0", "data": { "tables": [], "settings": null } }"#;
        ImportPlan::parse(text).unwrap().apply(&storage).unwrap();

        assert_eq!(storage.get("tables"), Some(json!([])));
        assert_eq!(storage.get("settings"), Some(json!({ "clubName": "Ace Snooker" })));
        assert_eq!(storage.get("emergencyPin"), Some(json!("4821")));
    }

    #[test]
    fn test_parse_does_not_mutate() {
        let storage = seeded_storage();
        let before = storage.get_all();
        let plan = ImportPlan::parse(r#"{ "version": "2.0", "data": { "tables": [] } }"#).unwrap();
        assert!(!plan.is_empty());
        assert_eq!(storage.get_all(), before);
    }

    #[test]
    fn test_invalid_files_are_rejected() {
        assert!(matches!(
            ImportPlan::parse("definitely not json"),
            Err(CueClubError::InvalidImport(_))
        ));
        assert!(matches!(
            ImportPlan::parse("[1, 2]"),
            Err(CueClubError::InvalidImport(_))
        ));
        assert!(matches!(
            ImportPlan::parse(r#"{ "version": "2.0", "data": [] }"#),
            Err(CueClubError::InvalidImport(_))
        ));
    }
}

//! Catalog normalizer
//!
//! Turns the raw entries of either inventory into a [`Catalog`] of
//! [`FilamentRecord`]s. Four input shapes are understood:
//!
//! - JSON snapshots written to the data folder (an array of records)
//! - the older line-oriented snapshot format
//!   (`Filament Name: .., Filament Type: .., Filament Vendor: .., Filament ID: ..`)
//! - slicer cloud presets (`filament_id`, `name`, `filament_vendor`, `filament_type`)
//! - spool tracker spools (`id`, `filament.name`, `filament.material`, `filament.vendor.name`)
//!
//! Parsing never fails as a whole. Entries missing a required field are
//! dropped with a warning, and the first record seen for an `id` wins.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, warn};

/// One normalized entry from either catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilamentRecord {
    pub id: String,
    pub vendor: String,
    #[serde(rename = "type")]
    pub material_type: String,
    #[serde(rename = "name")]
    pub display_name: String,
}

impl FilamentRecord {
    pub fn new(
        id: impl Into<String>,
        vendor: impl Into<String>,
        material_type: impl Into<String>,
        display_name: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into().trim().to_string(),
            vendor: vendor.into().trim().to_string(),
            material_type: material_type.into().trim().to_string(),
            display_name: display_name.into().trim().to_string(),
        }
    }

    /// Human-readable lookup key: `vendor type name id`
    ///
    /// Only for display and operator lookup. Program logic keys by `id`.
    pub fn composite_key(&self) -> String {
        format!(
            "{} {} {} {}",
            self.vendor, self.material_type, self.display_name, self.id
        )
        .trim()
        .to_string()
    }
}

/// Strip trailing annotations such as `@1kg` or `@BBL X1C` from a product name
pub fn strip_annotation(name: &str) -> &str {
    name.split('@').next().unwrap_or(name).trim()
}

/// Normalized record set of one inventory, in first-seen order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Catalog {
    records: Vec<FilamentRecord>,
    index: HashMap<String, usize>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a catalog, keeping the first record for each `id`
    pub fn from_records(records: impl IntoIterator<Item = FilamentRecord>) -> Self {
        let mut catalog = Self::new();
        for record in records {
            catalog.insert(record);
        }
        catalog
    }

    /// Insert `record` unless its `id` is already present
    ///
    /// Returns `false` for a duplicate (which is discarded).
    pub fn insert(&mut self, record: FilamentRecord) -> bool {
        if self.index.contains_key(&record.id) {
            debug!(id = %record.id, "Duplicate catalog id ignored");
            return false;
        }
        self.index.insert(record.id.clone(), self.records.len());
        self.records.push(record);
        true
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&FilamentRecord> {
        self.index.get(id).map(|&i| &self.records[i])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &FilamentRecord> {
        self.records.iter()
    }

    pub fn records(&self) -> &[FilamentRecord] {
        &self.records
    }

    /// Find a record by its composite key
    pub fn find_by_composite_key(&self, key: &str) -> Option<&FilamentRecord> {
        let key = key.trim();
        self.records.iter().find(|r| r.composite_key() == key)
    }

    /// Write a JSON snapshot atomically
    ///
    /// Fields are stored verbatim, so any id or vendor text survives a reload.
    pub fn save_snapshot(&self, path: &Path) -> spoolbridge_common::Result<()> {
        spoolbridge_common::fs::write_json_atomic(path, self.records())
    }

    /// Load a snapshot, JSON or the older line format
    ///
    /// A missing or unreadable file is an empty catalog.
    pub fn load_snapshot(path: &Path) -> Self {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) => {
                warn!(
                    "Catalog snapshot {} unavailable ({}), treating as empty",
                    path.display(),
                    e
                );
                return Self::new();
            }
        };

        if !text.trim_start().starts_with('[') {
            return parse_lines(&text);
        }
        match serde_json::from_str::<Vec<Value>>(&text) {
            Ok(entries) => parse_records(&entries),
            Err(e) => {
                warn!(
                    "Catalog snapshot {} is corrupt ({}), treating as empty",
                    path.display(),
                    e
                );
                Self::new()
            }
        }
    }
}

/// Records from a JSON snapshot; entries that do not deserialize are skipped
fn parse_records(entries: &[Value]) -> Catalog {
    let mut catalog = Catalog::new();
    for (n, entry) in entries.iter().enumerate() {
        match FilamentRecord::deserialize(entry) {
            Ok(record) if !record.id.trim().is_empty() => {
                catalog.insert(FilamentRecord::new(
                    record.id,
                    record.vendor,
                    record.material_type,
                    record.display_name,
                ));
            }
            Ok(_) => warn!(index = n, "Snapshot record without id skipped"),
            Err(e) => warn!(index = n, error = %e, "Malformed snapshot record skipped"),
        }
    }
    catalog
}

const NAME_LABEL: &str = "Filament Name: ";
const TYPE_LABEL: &str = ", Filament Type: ";
const VENDOR_LABEL: &str = ", Filament Vendor: ";
const ID_LABEL: &str = "Filament ID: ";

/// Parse one line of the older snapshot format
///
/// Fields appear in the order name, type, vendor, then any number of extra
/// fields, then the id. The id is the text after the last `Filament ID: `
/// label up to the next `, ` or the end of the line.
pub fn parse_line(line: &str) -> Option<FilamentRecord> {
    let start = line.find(NAME_LABEL)? + NAME_LABEL.len();
    let rest = &line[start..];

    let type_at = rest.find(TYPE_LABEL)?;
    let name = &rest[..type_at];
    let rest = &rest[type_at + TYPE_LABEL.len()..];

    let vendor_at = rest.find(VENDOR_LABEL)?;
    let material_type = &rest[..vendor_at];
    let rest = &rest[vendor_at + VENDOR_LABEL.len()..];

    let sep = rest.find(", ")?;
    let vendor = &rest[..sep];
    let rest = &rest[sep..];

    let id_at = rest.rfind(ID_LABEL)? + ID_LABEL.len();
    let id = rest[id_at..].split(", ").next().unwrap_or_default().trim();
    if id.is_empty() {
        return None;
    }

    Some(FilamentRecord::new(id, vendor, material_type, name))
}

/// Parse a whole snapshot in the older line format
pub fn parse_lines(text: &str) -> Catalog {
    let mut catalog = Catalog::new();
    for (n, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match parse_line(line) {
            Some(record) => {
                catalog.insert(record);
            }
            None => warn!(line = n + 1, "Malformed catalog line skipped"),
        }
    }
    catalog
}

fn str_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key)?.as_str()
}

/// Render a JSON id (string or number) as a string
fn id_field(value: &Value, key: &str) -> Option<String> {
    match value.get(key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Preset entries from a slicer settings document
///
/// Accepts a bare array or the cloud response shape
/// `{"filament": {"private": [...]}}`. Anything else yields no entries.
pub fn slicer_preset_entries(document: &Value) -> &[Value] {
    let entries = match document {
        Value::Array(_) => Some(document),
        other => other.get("filament").and_then(|f| f.get("private")),
    };
    match entries {
        Some(Value::Array(items)) => items,
        _ => {
            warn!("Unexpected slicer settings format, no presets found");
            &[]
        }
    }
}

/// Normalize slicer cloud filament presets
///
/// Display names are cut at the first `@`.
pub fn normalize_slicer_presets(entries: &[Value]) -> Catalog {
    let mut catalog = Catalog::new();
    for (n, entry) in entries.iter().enumerate() {
        let parsed = (|| {
            let id = id_field(entry, "filament_id")?;
            let name = str_field(entry, "name")?;
            let vendor = str_field(entry, "filament_vendor")?;
            let material = str_field(entry, "filament_type")?;
            Some(FilamentRecord::new(id, vendor, material, strip_annotation(name)))
        })();

        match parsed {
            Some(record) => {
                catalog.insert(record);
            }
            None => warn!(index = n, "Slicer preset missing required fields, skipped"),
        }
    }
    catalog
}

/// Normalize spool tracker spools
pub fn normalize_spools(entries: &[Value]) -> Catalog {
    let mut catalog = Catalog::new();
    for (n, entry) in entries.iter().enumerate() {
        let parsed = (|| {
            let id = id_field(entry, "id")?;
            let filament = entry.get("filament")?;
            let name = str_field(filament, "name")?;
            let material = str_field(filament, "material")?;
            // Vendor is optional in the tracker
            let vendor = filament
                .get("vendor")
                .and_then(|v| str_field(v, "name"))
                .unwrap_or_default();
            Some(FilamentRecord::new(id, vendor, material, name))
        })();

        match parsed {
            Some(record) => {
                catalog.insert(record);
            }
            None => warn!(index = n, "Spool entry missing required fields, skipped"),
        }
    }
    catalog
}

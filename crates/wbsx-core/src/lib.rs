//! # wbsx-core
//!
//! Core domain model for exporting WBS elements into a spreadsheet template.
//!
//! This crate provides:
//! - Domain types: `WbsElement`, `ElementList`, `CellRef`, `CellValue`, `SheetPlan`
//! - The declarative column layouts per template version (`layout` module)
//! - The `DocumentWriter` trait implemented by the writer backends
//! - `TemplateFiller`, which plans a fill and hands it to a writer
//! - Error types
//!
//! ## Example
//!
//! ```rust
//! use serde_json::json;
//! use wbsx_core::{CellRef, CellValue, ElementList, TemplateFiller, TemplateVersion};
//!
//! let elements = ElementList::from_payload(json!({
//!     "wbsData": [{ "region": "DE", "companyCode": "1000", "planningElement": true }]
//! }))
//! .unwrap();
//!
//! let filler = TemplateFiller::new(TemplateVersion::Shared);
//! let plan = filler.plan(&elements);
//!
//! assert_eq!(plan.get(CellRef::parse("A18").unwrap()), Some(&CellValue::text("Germany")));
//! assert_eq!(plan.get(CellRef::parse("E18").unwrap()), Some(&CellValue::Integer(1000)));
//! ```

pub mod layout;
pub mod region;
pub mod transform;

pub use layout::{ColumnRule, HeaderRule, Layout, TemplateVersion, Transform};

use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info};

// ============================================================================
// Cell References
// ============================================================================

/// A 1-based cell coordinate on a worksheet.
///
/// Ordering is row-major, which is also the order cells must appear in
/// worksheet XML.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CellRef {
    pub row: u32,
    pub col: u32,
}

impl CellRef {
    pub const fn new(row: u32, col: u32) -> Self {
        Self { row, col }
    }

    /// Parse an A1-style reference such as `D7` or `AB18`.
    ///
    /// Absolute markers (`$D$7`) are accepted.
    pub fn parse(a1: &str) -> Option<Self> {
        let a1 = a1.trim();
        let letters_end = a1
            .char_indices()
            .find(|(_, c)| !c.is_ascii_alphabetic() && *c != '$')
            .map(|(i, _)| i)?;
        let letters: String = a1[..letters_end].chars().filter(|c| *c != '$').collect();
        let digits = a1[letters_end..].trim_start_matches('$');
        let col = column_index(&letters)?;
        let row: u32 = digits.parse().ok()?;
        if row == 0 {
            return None;
        }
        Some(Self { row, col })
    }
}

impl fmt::Display for CellRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", column_name(self.col), self.row)
    }
}

impl FromStr for CellRef {
    type Err = FillError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| FillError::Validation(format!("invalid cell reference: {s}")))
    }
}

impl Serialize for CellRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

/// Convert a 1-based column index to its letters (1 → `A`, 28 → `AB`).
pub fn column_name(mut col: u32) -> String {
    let mut letters = Vec::new();
    while col > 0 {
        let rem = (col - 1) % 26;
        letters.push(b'A' + rem as u8);
        col = (col - 1) / 26;
    }
    letters.reverse();
    String::from_utf8(letters).unwrap_or_default()
}

/// Convert column letters to a 1-based index (`A` → 1, `AB` → 28).
pub fn column_index(letters: &str) -> Option<u32> {
    if letters.is_empty() || letters.len() > 3 {
        return None;
    }
    letters.chars().try_fold(0u32, |acc, c| {
        let c = c.to_ascii_uppercase();
        c.is_ascii_uppercase()
            .then(|| acc * 26 + (c as u32 - 'A' as u32 + 1))
    })
}

// ============================================================================
// Cell Values
// ============================================================================

/// A value written into a single cell.
///
/// Empty text clears the template cell's value but keeps its style.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CellValue {
    Text(String),
    Integer(i64),
    Number(f64),
    Bool(bool),
}

impl CellValue {
    pub fn text(s: impl Into<String>) -> Self {
        Self::Text(s.into())
    }

    pub fn empty() -> Self {
        Self::Text(String::new())
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Text(s) if s.is_empty())
    }
}

impl Default for CellValue {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => f.write_str(s),
            Self::Integer(i) => write!(f, "{i}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::Bool(b) => write!(f, "{b}"),
        }
    }
}

// ============================================================================
// WBS Elements
// ============================================================================

/// One work-breakdown-structure record as submitted by the client.
///
/// Field names follow the client payload (`companyCode`, `regionLabel`, ...).
/// A JSON `null` is treated the same as an absent key.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WbsElement(Map<String, Value>);

impl WbsElement {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style setter, handy for tests and fixtures
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Get a field, treating `null` as absent
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key).filter(|v| !v.is_null())
    }

    /// First present field among `keys`
    pub fn first_of(&self, keys: &[&str]) -> Option<&Value> {
        keys.iter().find_map(|k| self.get(k))
    }

    /// Field rendered as plain text; absent fields give an empty string
    pub fn text(&self, key: &str) -> String {
        self.get(key).map(transform::value_text).unwrap_or_default()
    }

    /// Whether the field is present and not an empty string
    pub fn has_value(&self, key: &str) -> bool {
        self.get(key)
            .is_some_and(|v| !matches!(v, Value::String(s) if s.trim().is_empty()))
    }
}

impl From<Map<String, Value>> for WbsElement {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Ordered list of elements; index `i` lands on row `base_row + i`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ElementList(Vec<WbsElement>);

impl ElementList {
    pub fn new(elements: Vec<WbsElement>) -> Self {
        Self(elements)
    }

    /// Build a list from a request payload.
    ///
    /// Accepts either `{"wbsData": [...]}` or a bare array. A missing or
    /// `null` `wbsData` yields an empty list; every element must be an object.
    pub fn from_payload(payload: Value) -> Result<Self, FillError> {
        let items = match payload {
            Value::Array(items) => items,
            Value::Object(mut map) => match map.remove("wbsData") {
                Some(Value::Array(items)) => items,
                None | Some(Value::Null) => Vec::new(),
                Some(other) => {
                    return Err(FillError::Validation(format!(
                        "wbsData must be a list, got {}",
                        json_kind(&other)
                    )))
                }
            },
            other => {
                return Err(FillError::Validation(format!(
                    "expected a list of WBS elements, got {}",
                    json_kind(&other)
                )))
            }
        };

        items
            .into_iter()
            .enumerate()
            .map(|(i, item)| match item {
                Value::Object(map) => Ok(WbsElement(map)),
                other => Err(FillError::Validation(format!(
                    "element {} must be an object, got {}",
                    i + 1,
                    json_kind(&other)
                ))),
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Self)
    }

    /// Parse a JSON document (array or `wbsData` envelope)
    pub fn from_json_str(json: &str) -> Result<Self, FillError> {
        let value: Value = serde_json::from_str(json)
            .map_err(|e| FillError::Validation(format!("malformed JSON: {e}")))?;
        Self::from_payload(value)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn first(&self) -> Option<&WbsElement> {
        self.0.first()
    }

    pub fn iter(&self) -> impl Iterator<Item = &WbsElement> {
        self.0.iter()
    }

    /// Reject an empty list
    pub fn require_non_empty(&self) -> Result<(), FillError> {
        if self.0.is_empty() {
            return Err(FillError::Validation("wbsData must contain at least one element".into()));
        }
        Ok(())
    }

    /// Reject elements where none of `keys` carries a value
    pub fn require_any_field(&self, keys: &[&str]) -> Result<(), FillError> {
        for (i, element) in self.0.iter().enumerate() {
            if !keys.iter().any(|k| element.has_value(k)) {
                return Err(FillError::Validation(format!(
                    "element {} is missing {}",
                    i + 1,
                    keys.first().copied().unwrap_or("a required field")
                )));
            }
        }
        Ok(())
    }
}

impl From<Vec<WbsElement>> for ElementList {
    fn from(elements: Vec<WbsElement>) -> Self {
        Self(elements)
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}

// ============================================================================
// Sheet Plan
// ============================================================================

/// Every cell write of one fill, keyed in worksheet order.
///
/// Writing the same cell twice keeps the last value.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct SheetPlan {
    pub sheet: String,
    cells: BTreeMap<CellRef, CellValue>,
}

impl SheetPlan {
    pub fn new(sheet: impl Into<String>) -> Self {
        Self {
            sheet: sheet.into(),
            cells: BTreeMap::new(),
        }
    }

    pub fn set(&mut self, cell: CellRef, value: CellValue) {
        self.cells.insert(cell, value);
    }

    pub fn get(&self, cell: CellRef) -> Option<&CellValue> {
        self.cells.get(&cell)
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Cells in row-major order
    pub fn iter(&self) -> impl Iterator<Item = (&CellRef, &CellValue)> {
        self.cells.iter()
    }

    /// Cells grouped by row, each row's cells ordered by column
    pub fn rows(&self) -> BTreeMap<u32, BTreeMap<u32, &CellValue>> {
        let mut rows: BTreeMap<u32, BTreeMap<u32, &CellValue>> = BTreeMap::new();
        for (cell, value) in &self.cells {
            rows.entry(cell.row).or_default().insert(cell.col, value);
        }
        rows
    }

    /// Bottom-right corner of the written area
    pub fn extent(&self) -> Option<CellRef> {
        let max_row = self.cells.keys().map(|c| c.row).max()?;
        let max_col = self.cells.keys().map(|c| c.col).max()?;
        Some(CellRef::new(max_row, max_col))
    }
}

// ============================================================================
// Writer Trait
// ============================================================================

/// Turns a template plus a sheet plan into a finished document.
pub trait DocumentWriter {
    /// Short name used in logs and configuration
    fn name(&self) -> &'static str;

    /// Apply `plan` to a copy of the template and return the document bytes.
    ///
    /// The template file itself is never modified.
    fn write(&self, template: &Path, plan: &SheetPlan) -> Result<Vec<u8>, FillError>;

    /// Whether the writer drives a resource that only one fill may use at a time
    fn exclusive(&self) -> bool {
        false
    }
}

// ============================================================================
// Template Filler
// ============================================================================

/// Plans fills for one template version and runs them through a writer.
#[derive(Clone, Copy, Debug)]
pub struct TemplateFiller {
    layout: &'static Layout,
}

impl TemplateFiller {
    pub fn new(version: TemplateVersion) -> Self {
        Self {
            layout: version.layout(),
        }
    }

    pub fn layout(&self) -> &'static Layout {
        self.layout
    }

    /// Compute all cell writes for `elements` without touching any file
    pub fn plan(&self, elements: &ElementList) -> SheetPlan {
        self.layout.plan(elements)
    }

    /// Fill `template` with `elements` and return the document bytes
    pub fn fill(
        &self,
        writer: &dyn DocumentWriter,
        template: &Path,
        elements: &ElementList,
    ) -> Result<Vec<u8>, FillError> {
        if !template.is_file() {
            return Err(FillError::TemplateNotFound(template.to_path_buf()));
        }

        let started = Instant::now();
        let plan = self.plan(elements);
        debug!(
            cells = plan.len(),
            sheet = %plan.sheet,
            layout = %self.layout.version,
            "planned template fill"
        );

        let bytes = writer.write(template, &plan)?;
        info!(
            elements = elements.len(),
            writer = writer.name(),
            bytes = bytes.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "filled template"
        );
        Ok(bytes)
    }

    /// Fill `template` and store the result at `output`.
    ///
    /// The document is staged next to `output` and only moved into place
    /// once complete, so a failed fill never leaves a partial file behind.
    pub fn fill_to_path(
        &self,
        writer: &dyn DocumentWriter,
        template: &Path,
        output: &Path,
        elements: &ElementList,
    ) -> Result<(), FillError> {
        use std::io::Write;

        let bytes = self.fill(writer, template, elements)?;
        let dir = match output.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let mut builder = tempfile::Builder::new();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            // Mode of a plain `File::create`; the process umask still applies.
            builder.permissions(std::fs::Permissions::from_mode(0o666));
        }
        let mut staged = builder.prefix(".wbsx-").tempfile_in(dir)?;
        staged.write_all(&bytes)?;
        staged.persist(output).map_err(|e| FillError::Io(e.error))?;
        Ok(())
    }
}

impl Default for TemplateFiller {
    fn default() -> Self {
        Self::new(TemplateVersion::default())
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Fill error
#[derive(Debug, Error)]
pub enum FillError {
    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Template not found: {}", .0.display())]
    TemplateNotFound(PathBuf),

    #[error("Sheet not found in template: {0}")]
    SheetNotFound(String),

    #[error("Invalid template package: {0}")]
    Package(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Automation host error: {0}")]
    Host(String),

    #[error("Document generation timed out after {}s", .0.as_secs())]
    Timeout(Duration),
}

impl FillError {
    /// Whether the caller sent bad input, as opposed to a server-side failure
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn cell_ref_parse_and_display() {
        assert_eq!(CellRef::parse("D7"), Some(CellRef::new(7, 4)));
        assert_eq!(CellRef::parse("ab18"), Some(CellRef::new(18, 28)));
        assert_eq!(CellRef::parse("$Z$26"), Some(CellRef::new(26, 26)));
        assert_eq!(CellRef::parse("A0"), None);
        assert_eq!(CellRef::parse("18"), None);
        assert_eq!(CellRef::parse("D"), None);
        assert_eq!(CellRef::new(18, 27).to_string(), "AA18");
    }

    #[test]
    fn column_letters() {
        assert_eq!(column_name(1), "A");
        assert_eq!(column_name(26), "Z");
        assert_eq!(column_name(27), "AA");
        assert_eq!(column_name(702), "ZZ");
        assert_eq!(column_name(703), "AAA");
        assert_eq!(column_index("XFD"), Some(16384));
        assert_eq!(column_index("A1"), None);
    }

    #[test]
    fn cell_order_is_row_major() {
        let mut cells = vec![CellRef::new(18, 2), CellRef::new(7, 4), CellRef::new(18, 1)];
        cells.sort();
        assert_eq!(cells, vec![CellRef::new(7, 4), CellRef::new(18, 1), CellRef::new(18, 2)]);
    }

    #[test]
    fn payload_envelope_and_bare_list() {
        let wrapped = ElementList::from_payload(json!({"wbsData": [{"type": "New"}]})).unwrap();
        let bare = ElementList::from_payload(json!([{"type": "New"}])).unwrap();
        assert_eq!(wrapped, bare);
        assert_eq!(wrapped.len(), 1);

        let missing = ElementList::from_payload(json!({"other": 1})).unwrap();
        assert!(missing.is_empty());
    }

    #[test]
    fn payload_rejects_non_objects() {
        let err = ElementList::from_payload(json!([{"type": "New"}, 42])).unwrap_err();
        assert!(err.is_client_error());
        assert!(err.to_string().contains("element 2"));

        let err = ElementList::from_payload(json!({"wbsData": "nope"})).unwrap_err();
        assert!(err.to_string().contains("must be a list"));

        assert!(ElementList::from_json_str("{not json").is_err());
    }

    #[test]
    fn required_fields() {
        let list = ElementList::new(vec![
            WbsElement::new().with("region", "DE"),
            WbsElement::new().with("regionLabel", "Germany"),
            WbsElement::new().with("region", "  "),
        ]);
        let err = list.require_any_field(&["region", "regionLabel"]).unwrap_err();
        assert_eq!(err.to_string(), "Invalid input: element 3 is missing region");

        assert!(ElementList::default().require_non_empty().is_err());
    }

    #[test]
    fn null_is_absent() {
        let element = WbsElement::new()
            .with("controllingAreaLabel", Value::Null)
            .with("controllingArea", "1000");
        assert_eq!(element.get("controllingAreaLabel"), None);
        assert_eq!(
            element.first_of(&["controllingAreaLabel", "controllingArea"]),
            Some(&json!("1000"))
        );
        assert_eq!(element.text("missing"), "");
    }

    #[test]
    fn plan_last_write_wins() {
        let mut plan = SheetPlan::new("Shared Template");
        plan.set(CellRef::new(18, 1), CellValue::text("a"));
        plan.set(CellRef::new(18, 1), CellValue::text("b"));
        plan.set(CellRef::new(7, 4), CellValue::Integer(3));
        assert_eq!(plan.len(), 2);
        assert_eq!(plan.get(CellRef::new(18, 1)), Some(&CellValue::text("b")));
        assert_eq!(plan.extent(), Some(CellRef::new(18, 4)));
    }

    #[test]
    fn plan_serializes_with_a1_keys() {
        let mut plan = SheetPlan::new("Shared Template");
        plan.set(CellRef::new(7, 4), CellValue::text("Alice"));
        plan.set(CellRef::new(18, 16), CellValue::Number(0.5));
        plan.set(CellRef::new(18, 5), CellValue::Integer(123));
        let json = serde_json::to_value(&plan).unwrap();
        assert_eq!(
            json,
            json!({
                "sheet": "Shared Template",
                "cells": {"D7": "Alice", "E18": 123, "P18": 0.5}
            })
        );
    }

    #[test]
    fn fill_reports_missing_template() {
        struct Never;
        impl DocumentWriter for Never {
            fn name(&self) -> &'static str {
                "never"
            }
            fn write(&self, _: &Path, _: &SheetPlan) -> Result<Vec<u8>, FillError> {
                unreachable!("writer must not run without a template")
            }
        }

        let filler = TemplateFiller::default();
        let err = filler
            .fill(&Never, Path::new("/nonexistent/template.xlsm"), &ElementList::default())
            .unwrap_err();
        assert!(matches!(err, FillError::TemplateNotFound(_)));
        assert!(!err.is_client_error());
    }

    #[cfg(unix)]
    #[test]
    fn saved_output_uses_default_file_mode() {
        use std::os::unix::fs::PermissionsExt;

        struct Fixed;
        impl DocumentWriter for Fixed {
            fn name(&self) -> &'static str {
                "fixed"
            }
            fn write(&self, _: &Path, _: &SheetPlan) -> Result<Vec<u8>, FillError> {
                Ok(b"workbook".to_vec())
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let template = dir.path().join("template.xlsm");
        std::fs::write(&template, b"template").unwrap();
        let reference = dir.path().join("reference");
        std::fs::File::create(&reference).unwrap();

        let output = dir.path().join("out.xlsm");
        TemplateFiller::default()
            .fill_to_path(&Fixed, &template, &output, &ElementList::default())
            .unwrap();

        let mode = |p: &Path| std::fs::metadata(p).unwrap().permissions().mode() & 0o777;
        assert_eq!(std::fs::read(&output).unwrap(), b"workbook");
        assert_eq!(mode(&output), mode(&reference));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 3);
    }
}

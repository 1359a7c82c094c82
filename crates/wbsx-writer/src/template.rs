//! In-process writer that patches the template package directly.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use tracing::debug;
use wbsx_core::{DocumentWriter, FillError, SheetPlan};

use crate::package::{attribute, remove_elements, rels_part_name, TemplatePackage};
use crate::sheet::patch_worksheet;
use crate::PackageError;

const CALC_CHAIN_PART: &str = "xl/calcChain.xml";
const CALC_CHAIN_REL: &str = "/calcChain";
const CONTENT_TYPES_PART: &str = "[Content_Types].xml";

/// Fills the template without any external process.
///
/// Only the target worksheet is rewritten; the calculation chain is dropped
/// so the spreadsheet application rebuilds it on open. Every other part,
/// macros included, is carried over untouched.
#[derive(Clone, Copy, Debug, Default)]
pub struct TemplateWriter;

impl TemplateWriter {
    pub fn new() -> Self {
        Self
    }

    fn patch(&self, mut package: TemplatePackage, plan: &SheetPlan) -> Result<Vec<u8>, PackageError> {
        let sheet_part = package.worksheet_part(&plan.sheet)?;
        let sheet_xml = package
            .part(&sheet_part)?
            .ok_or_else(|| PackageError::MissingPart(sheet_part.clone()))?;
        debug!(sheet = %plan.sheet, part = %sheet_part, cells = plan.len(), "patching worksheet");

        let mut replaced = BTreeMap::new();
        let mut dropped = BTreeSet::new();
        replaced.insert(sheet_part, patch_worksheet(&sheet_xml, plan)?);

        if package.contains(CALC_CHAIN_PART) {
            dropped.insert(CALC_CHAIN_PART.to_string());

            if let Some(types) = package.part(CONTENT_TYPES_PART)? {
                let types = remove_elements(&types, b"Override", |e| {
                    Ok(attribute(e, b"PartName")?.as_deref() == Some("/xl/calcChain.xml"))
                })?;
                replaced.insert(CONTENT_TYPES_PART.to_string(), types);
            }

            let workbook = package.workbook_part()?;
            let rels_name = rels_part_name(&workbook);
            if let Some(rels) = package.part(&rels_name)? {
                let rels = remove_elements(&rels, b"Relationship", |e| {
                    Ok(attribute(e, b"Type")?.is_some_and(|t| t.ends_with(CALC_CHAIN_REL)))
                })?;
                replaced.insert(rels_name, rels);
            }
        }

        package.rewrite(&replaced, &dropped)
    }
}

impl DocumentWriter for TemplateWriter {
    fn name(&self) -> &'static str {
        "native"
    }

    fn write(&self, template: &Path, plan: &SheetPlan) -> Result<Vec<u8>, FillError> {
        let package = TemplatePackage::open(template)?;
        Ok(self.patch(package, plan)?)
    }
}

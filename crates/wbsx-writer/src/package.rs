//! Reading and rewriting the template's OPC package (the zip container).
//!
//! Parts that are not patched are copied raw, so their compressed bytes
//! (including `xl/vbaProject.bin`) come out exactly as they went in.

use std::collections::{BTreeMap, BTreeSet};
use std::io::{Cursor, Read, Write};
use std::path::Path;

use quick_xml::events::{BytesStart, Event};
use quick_xml::name::QName;
use quick_xml::{Reader, Writer};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::PackageError;

const OFFICE_DOCUMENT_REL: &str = "/officeDocument";
const DEFAULT_WORKBOOK_PART: &str = "xl/workbook.xml";

/// An opened template package held in memory.
pub struct TemplatePackage {
    archive: ZipArchive<Cursor<Vec<u8>>>,
}

impl TemplatePackage {
    pub fn open(path: &Path) -> Result<Self, PackageError> {
        Self::from_bytes(std::fs::read(path)?)
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, PackageError> {
        let archive = ZipArchive::new(Cursor::new(bytes))?;
        Ok(Self { archive })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.archive.index_for_name(name).is_some()
    }

    /// Uncompressed bytes of a part, or `None` if the package lacks it
    pub fn part(&mut self, name: &str) -> Result<Option<Vec<u8>>, PackageError> {
        let Some(index) = self.archive.index_for_name(name) else {
            return Ok(None);
        };
        let mut file = self.archive.by_index(index)?;
        let mut bytes = Vec::with_capacity(file.size() as usize);
        file.read_to_end(&mut bytes)?;
        Ok(Some(bytes))
    }

    fn required_part(&mut self, name: &str) -> Result<Vec<u8>, PackageError> {
        self.part(name)?
            .ok_or_else(|| PackageError::MissingPart(name.to_string()))
    }

    /// Path of the main workbook part (normally `xl/workbook.xml`)
    pub fn workbook_part(&mut self) -> Result<String, PackageError> {
        let Some(rels) = self.part("_rels/.rels")? else {
            return Ok(DEFAULT_WORKBOOK_PART.to_string());
        };
        let target = relationships(&rels)?
            .into_iter()
            .find(|rel| rel.kind.ends_with(OFFICE_DOCUMENT_REL))
            .map(|rel| resolve_target("", &rel.target));
        Ok(target.unwrap_or_else(|| DEFAULT_WORKBOOK_PART.to_string()))
    }

    /// Part name of the worksheet called `sheet`
    pub fn worksheet_part(&mut self, sheet: &str) -> Result<String, PackageError> {
        let workbook = self.workbook_part()?;
        let workbook_xml = self.required_part(&workbook)?;

        let rel_id = sheet_relationship_id(&workbook_xml, sheet)?
            .ok_or_else(|| PackageError::SheetNotFound(sheet.to_string()))?;

        let rels_name = rels_part_name(&workbook);
        let rels = self.required_part(&rels_name)?;
        let rel = relationships(&rels)?
            .into_iter()
            .find(|rel| rel.id == rel_id)
            .ok_or_else(|| {
                PackageError::Invalid(format!("relationship {rel_id} for sheet '{sheet}' missing"))
            })?;

        Ok(resolve_target(part_dir(&workbook), &rel.target))
    }

    /// Write a new package: `replaced` parts get new content, `dropped`
    /// parts are left out, everything else is copied raw.
    pub fn rewrite(
        mut self,
        replaced: &BTreeMap<String, Vec<u8>>,
        dropped: &BTreeSet<String>,
    ) -> Result<Vec<u8>, PackageError> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

        for i in 0..self.archive.len() {
            let file = self.archive.by_index_raw(i)?;
            let name = file.name().to_string();

            if dropped.contains(&name) {
                continue;
            }
            match replaced.get(&name) {
                Some(bytes) => {
                    drop(file);
                    writer.start_file(name.as_str(), options)?;
                    writer.write_all(bytes)?;
                }
                None => writer.raw_copy_file(file)?,
            }
        }

        Ok(writer.finish()?.into_inner())
    }
}

/// One `<Relationship>` entry
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Relationship {
    pub id: String,
    pub kind: String,
    pub target: String,
}

/// Parse a `.rels` part
pub fn relationships(xml: &[u8]) -> Result<Vec<Relationship>, PackageError> {
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut rels = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Eof => break,
            Event::Start(ref e) | Event::Empty(ref e)
                if e.local_name().as_ref() == b"Relationship" =>
            {
                rels.push(Relationship {
                    id: attribute(e, b"Id")?.unwrap_or_default(),
                    kind: attribute(e, b"Type")?.unwrap_or_default(),
                    target: attribute(e, b"Target")?.unwrap_or_default(),
                });
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(rels)
}

/// Find the `r:id` of the `<sheet name="...">` entry in `workbook.xml`
fn sheet_relationship_id(workbook_xml: &[u8], sheet: &str) -> Result<Option<String>, PackageError> {
    let mut reader = Reader::from_reader(workbook_xml);
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Eof => return Ok(None),
            Event::Start(ref e) | Event::Empty(ref e) if e.local_name().as_ref() == b"sheet" => {
                if attribute(e, b"name")?.as_deref() == Some(sheet) {
                    return relationship_id(e);
                }
            }
            _ => {}
        }
        buf.clear();
    }
}

/// The namespaced `r:id` attribute (as opposed to `sheetId`)
fn relationship_id(e: &BytesStart<'_>) -> Result<Option<String>, PackageError> {
    for attr in e.attributes() {
        let attr = attr?;
        if attr.key.local_name().as_ref() == b"id" && attr.key.prefix().is_some() {
            return Ok(Some(attr.unescape_value()?.into_owned()));
        }
    }
    Ok(None)
}

/// Unescaped value of an attribute matched by its full name
pub fn attribute(e: &BytesStart<'_>, name: &[u8]) -> Result<Option<String>, PackageError> {
    for attr in e.attributes() {
        let attr = attr?;
        if attr.key.as_ref() == name {
            return Ok(Some(attr.unescape_value()?.into_owned()));
        }
    }
    Ok(None)
}

/// Copy `xml`, leaving out every element named `local` for which
/// `should_drop` returns true.
pub fn remove_elements<F>(xml: &[u8], local: &[u8], mut should_drop: F) -> Result<Vec<u8>, PackageError>
where
    F: FnMut(&BytesStart<'_>) -> Result<bool, PackageError>,
{
    let mut reader = Reader::from_reader(xml);
    let mut writer = Writer::new(Vec::with_capacity(xml.len()));
    let mut buf = Vec::new();
    let mut skip_buf = Vec::new();

    loop {
        let event = reader.read_event_into(&mut buf)?;
        let skip = match &event {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == local => should_drop(e)?,
            _ => false,
        };

        match event {
            Event::Eof => break,
            Event::Start(ref e) if skip => {
                let name = e.name().as_ref().to_vec();
                reader.read_to_end_into(QName(&name), &mut skip_buf)?;
                skip_buf.clear();
            }
            Event::Empty(_) if skip => {}
            other => writer.write_event(other)?,
        }
        buf.clear();
    }

    Ok(writer.into_inner())
}

/// `xl/workbook.xml` → `xl/_rels/workbook.xml.rels`
pub fn rels_part_name(part: &str) -> String {
    match part.rsplit_once('/') {
        Some((dir, file)) => format!("{dir}/_rels/{file}.rels"),
        None => format!("_rels/{part}.rels"),
    }
}

fn part_dir(part: &str) -> &str {
    part.rsplit_once('/').map_or("", |(dir, _)| dir)
}

/// Resolve a relationship target against the source part's directory
pub fn resolve_target(base_dir: &str, target: &str) -> String {
    let joined = match target.strip_prefix('/') {
        Some(absolute) => absolute.to_string(),
        None if base_dir.is_empty() => target.to_string(),
        None => format!("{base_dir}/{target}"),
    };

    let mut segments: Vec<&str> = Vec::new();
    for segment in joined.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }
    segments.join("/")
}

//! Streaming merge of planned cells into a worksheet part.
//!
//! Rows and cells are emitted in ascending order. A replaced cell keeps its
//! style index (`s`) and loses any formula; planned cells without a
//! counterpart in the template are inserted at their ordered position.
//!
//! Overwriting the master cell of a shared formula would leave its dependent
//! cells pointing at a formula that no longer exists. Those dependents keep
//! their cached value and lose the `<f>` reference instead.

use std::collections::{BTreeMap, BTreeSet};

use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::name::QName;
use quick_xml::{Reader, Writer};
use tracing::{debug, warn};
use wbsx_core::{CellRef, CellValue, SheetPlan};

use crate::package::attribute;
use crate::PackageError;

type RowCells<'p> = BTreeMap<u32, &'p CellValue>;

/// Patch `xml` (a `CT_Worksheet` part) with every cell in `plan`
pub fn patch_worksheet(xml: &[u8], plan: &SheetPlan) -> Result<Vec<u8>, PackageError> {
    let mut pending = plan.rows();
    let bounds = Bounds::of(plan);
    let detached = overwritten_shared_formulas(xml, plan)?;

    let mut reader = Reader::from_reader(xml);
    let mut out = CellWriter {
        writer: Writer::new(Vec::with_capacity(xml.len() + plan.len() * 64)),
        prefix: String::new(),
    };
    let mut buf = Vec::new();
    let mut skip_buf = Vec::new();

    let mut in_sheet_data = false;
    let mut last_row = 0u32;
    let mut open_row: Option<OpenRow<'_>> = None;

    loop {
        let event = reader.read_event_into(&mut buf)?;
        match event {
            Event::Eof => break,

            Event::Empty(ref e) if e.local_name().as_ref() == b"dimension" => {
                let widened = widen_dimension(e, bounds)?;
                out.writer.write_event(Event::Empty(widened))?;
            }

            Event::Start(ref e) if e.local_name().as_ref() == b"sheetData" => {
                out.prefix = prefix_of(e.name());
                in_sheet_data = true;
                out.writer.write_event(Event::Start(e.borrow()))?;
            }
            Event::Empty(ref e) if e.local_name().as_ref() == b"sheetData" => {
                out.prefix = prefix_of(e.name());
                out.writer.write_event(Event::Start(e.borrow()))?;
                for (row, cells) in std::mem::take(&mut pending) {
                    out.new_row(row, &cells)?;
                }
                let end = BytesEnd::new(out.tag("sheetData"));
                out.writer.write_event(Event::End(end))?;
            }
            Event::End(ref e) if in_sheet_data && e.local_name().as_ref() == b"sheetData" => {
                for (row, cells) in std::mem::take(&mut pending) {
                    out.new_row(row, &cells)?;
                }
                in_sheet_data = false;
                out.writer.write_event(Event::End(e.borrow()))?;
            }

            Event::Start(ref e) if in_sheet_data && open_row.is_none() && is_row(e) => {
                let row = row_number(e)?.unwrap_or(last_row + 1);
                last_row = row;
                out.rows_before(&mut pending, row)?;
                match pending.remove(&row) {
                    Some(cells) => {
                        out.writer.write_event(Event::Start(without_spans(e)?))?;
                        open_row = Some(OpenRow {
                            row,
                            cells,
                            next_col: 1,
                        });
                    }
                    None => out.writer.write_event(Event::Start(e.borrow()))?,
                }
            }
            Event::Empty(ref e) if in_sheet_data && open_row.is_none() && is_row(e) => {
                let row = row_number(e)?.unwrap_or(last_row + 1);
                last_row = row;
                out.rows_before(&mut pending, row)?;
                match pending.remove(&row) {
                    Some(cells) => {
                        let start = without_spans(e)?;
                        let end = start.to_end().into_owned();
                        out.writer.write_event(Event::Start(start))?;
                        for (col, value) in &cells {
                            out.cell(CellRef::new(row, *col), value, None)?;
                        }
                        out.writer.write_event(Event::End(end))?;
                    }
                    None => out.writer.write_event(Event::Empty(e.borrow()))?,
                }
            }

            Event::Start(ref e) | Event::Empty(ref e)
                if open_row.is_some() && e.local_name().as_ref() == b"c" =>
            {
                let is_start = matches!(event, Event::Start(_));
                if let Some(state) = open_row.as_mut() {
                    let col = match attribute(e, b"r")?.and_then(|r| CellRef::parse(&r)) {
                        Some(cell) => cell.col,
                        None => state.next_col,
                    };
                    state.next_col = col + 1;

                    for (c, value) in state.take_before(col) {
                        out.cell(CellRef::new(state.row, c), value, None)?;
                    }

                    match state.cells.remove(&col) {
                        Some(value) => {
                            let style = attribute(e, b"s")?;
                            if is_start {
                                let name = e.name().as_ref().to_vec();
                                reader.read_to_end_into(QName(&name), &mut skip_buf)?;
                                skip_buf.clear();
                            }
                            out.cell(CellRef::new(state.row, col), value, style.as_deref())?;
                        }
                        None => out.writer.write_event(event.borrow())?,
                    }
                }
            }
            Event::End(ref e) if open_row.is_some() && e.local_name().as_ref() == b"row" => {
                if let Some(state) = open_row.take() {
                    for (col, value) in &state.cells {
                        out.cell(CellRef::new(state.row, *col), value, None)?;
                    }
                }
                out.writer.write_event(Event::End(e.borrow()))?;
            }

            Event::Start(ref e) | Event::Empty(ref e)
                if !detached.is_empty()
                    && is_formula(e)
                    && shared_index(e).is_some_and(|si| detached.contains(&si)) =>
            {
                if matches!(event, Event::Start(_)) {
                    let name = e.name().as_ref().to_vec();
                    reader.read_to_end_into(QName(&name), &mut skip_buf)?;
                    skip_buf.clear();
                }
                debug!(si = ?shared_index(e), "dropped reference to overwritten shared formula");
            }

            other => out.writer.write_event(other)?,
        }
        buf.clear();
    }

    if !pending.is_empty() {
        return Err(PackageError::Invalid("worksheet has no sheetData element".into()));
    }

    Ok(out.writer.into_inner())
}

/// `si` of every shared formula whose master cell is in `plan`
fn overwritten_shared_formulas(xml: &[u8], plan: &SheetPlan) -> Result<BTreeSet<String>, PackageError> {
    let mut found = BTreeSet::new();
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut row = 0u32;
    let mut next_col = 1u32;
    let mut cell: Option<CellRef> = None;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Eof => break,
            Event::Start(ref e) | Event::Empty(ref e) if is_row(e) => {
                row = row_number(e)?.unwrap_or(row + 1);
                next_col = 1;
            }
            Event::Start(ref e) if e.local_name().as_ref() == b"c" => {
                let at = attribute(e, b"r")?
                    .and_then(|r| CellRef::parse(&r))
                    .unwrap_or_else(|| CellRef::new(row, next_col));
                next_col = at.col + 1;
                cell = plan.get(at).is_some().then_some(at);
            }
            Event::Empty(ref e) if e.local_name().as_ref() == b"c" => {
                if let Some(at) = attribute(e, b"r")?.and_then(|r| CellRef::parse(&r)) {
                    next_col = at.col + 1;
                } else {
                    next_col += 1;
                }
            }
            Event::End(ref e) if e.local_name().as_ref() == b"c" => cell = None,
            Event::Start(ref e) | Event::Empty(ref e) if is_formula(e) => {
                if let (Some(at), Some(si)) = (cell, shared_index(e)) {
                    if attribute(e, b"ref")?.is_some() {
                        warn!(cell = %at, si = %si, "overwriting shared formula master; dependent cells keep their cached values");
                        found.insert(si);
                    }
                }
            }
            _ => {}
        }
        buf.clear();
    }
    Ok(found)
}

fn is_formula(e: &BytesStart<'_>) -> bool {
    e.local_name().as_ref() == b"f"
}

/// `si` of a `<f t="shared">` element
fn shared_index(e: &BytesStart<'_>) -> Option<String> {
    let shared = attribute(e, b"t").ok()?.as_deref() == Some("shared");
    shared.then(|| attribute(e, b"si").ok().flatten()).flatten()
}

/// A `<row>` currently being merged
struct OpenRow<'p> {
    row: u32,
    cells: RowCells<'p>,
    next_col: u32,
}

impl<'p> OpenRow<'p> {
    /// Remove and return planned cells left of `col`
    fn take_before(&mut self, col: u32) -> RowCells<'p> {
        let rest = self.cells.split_off(&col);
        std::mem::replace(&mut self.cells, rest)
    }
}

struct CellWriter {
    writer: Writer<Vec<u8>>,
    /// Namespace prefix used by the sheet (`""` or `"x:"`)
    prefix: String,
}

impl CellWriter {
    fn tag(&self, local: &str) -> String {
        format!("{}{local}", self.prefix)
    }

    /// Write every pending row numbered below `row`
    fn rows_before(
        &mut self,
        pending: &mut BTreeMap<u32, RowCells<'_>>,
        row: u32,
    ) -> Result<(), PackageError> {
        let rest = pending.split_off(&row);
        for (r, cells) in std::mem::replace(pending, rest) {
            self.new_row(r, &cells)?;
        }
        Ok(())
    }

    fn new_row(&mut self, row: u32, cells: &RowCells<'_>) -> Result<(), PackageError> {
        let tag = self.tag("row");
        let row_attr = row.to_string();
        let start = BytesStart::new(tag.as_str()).with_attributes([("r", row_attr.as_str())]);
        self.writer.write_event(Event::Start(start))?;
        for (col, value) in cells {
            self.cell(CellRef::new(row, *col), value, None)?;
        }
        self.writer.write_event(Event::End(BytesEnd::new(tag.as_str())))?;
        Ok(())
    }

    fn cell(&mut self, cell: CellRef, value: &CellValue, style: Option<&str>) -> Result<(), PackageError> {
        let tag = self.tag("c");
        let reference = cell.to_string();
        let mut start = BytesStart::new(tag.as_str());
        start.push_attribute(("r", reference.as_str()));
        if let Some(style) = style {
            start.push_attribute(("s", style));
        }

        let content = match value {
            CellValue::Text(text) if text.is_empty() => {
                self.writer.write_event(Event::Empty(start))?;
                return Ok(());
            }
            CellValue::Text(text) => {
                start.push_attribute(("t", "inlineStr"));
                self.writer.write_event(Event::Start(start))?;
                self.inline_string(text)?;
                self.writer.write_event(Event::End(BytesEnd::new(tag.as_str())))?;
                return Ok(());
            }
            CellValue::Integer(i) => i.to_string(),
            CellValue::Number(n) => n.to_string(),
            CellValue::Bool(b) => {
                start.push_attribute(("t", "b"));
                String::from(if *b { "1" } else { "0" })
            }
        };

        self.writer.write_event(Event::Start(start))?;
        self.text_element("v", &content, false)?;
        self.writer.write_event(Event::End(BytesEnd::new(tag.as_str())))?;
        Ok(())
    }

    fn inline_string(&mut self, text: &str) -> Result<(), PackageError> {
        let is = self.tag("is");
        self.writer.write_event(Event::Start(BytesStart::new(is.as_str())))?;
        let preserve = text.starts_with(char::is_whitespace) || text.ends_with(char::is_whitespace);
        self.text_element("t", &xml_safe(text), preserve)?;
        self.writer.write_event(Event::End(BytesEnd::new(is.as_str())))?;
        Ok(())
    }

    fn text_element(&mut self, local: &str, text: &str, preserve: bool) -> Result<(), PackageError> {
        let tag = self.tag(local);
        let mut start = BytesStart::new(tag.as_str());
        if preserve {
            start.push_attribute(("xml:space", "preserve"));
        }
        self.writer.write_event(Event::Start(start))?;
        self.writer.write_event(Event::Text(BytesText::new(text)))?;
        self.writer.write_event(Event::End(BytesEnd::new(tag.as_str())))?;
        Ok(())
    }
}

/// Drop characters XML 1.0 cannot carry
fn xml_safe(text: &str) -> String {
    text.chars()
        .filter(|&c| {
            matches!(c, '\t' | '\n' | '\r')
                || (c >= ' ' && c != '\u{FFFE}' && c != '\u{FFFF}')
        })
        .collect()
}

fn is_row(e: &BytesStart<'_>) -> bool {
    e.local_name().as_ref() == b"row"
}

fn row_number(e: &BytesStart<'_>) -> Result<Option<u32>, PackageError> {
    Ok(attribute(e, b"r")?.and_then(|r| r.trim().parse().ok()))
}

fn prefix_of(name: QName<'_>) -> String {
    name.prefix()
        .map(|p| format!("{}:", String::from_utf8_lossy(p.as_ref())))
        .unwrap_or_default()
}

/// Copy of a `<row>` start tag without its `spans` hint, which would no
/// longer match the row's cells
fn without_spans(e: &BytesStart<'_>) -> Result<BytesStart<'static>, PackageError> {
    let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
    let mut start = BytesStart::new(name);
    for attr in e.attributes() {
        let attr = attr?;
        if attr.key.as_ref() != b"spans" {
            start.push_attribute(attr);
        }
    }
    Ok(start)
}

/// Rectangle covered by the plan
#[derive(Clone, Copy, Debug, PartialEq)]
struct Bounds {
    first: CellRef,
    last: CellRef,
}

impl Bounds {
    fn of(plan: &SheetPlan) -> Option<Self> {
        let first_row = plan.iter().map(|(c, _)| c.row).min()?;
        let first_col = plan.iter().map(|(c, _)| c.col).min()?;
        let last = plan.extent()?;
        Some(Self {
            first: CellRef::new(first_row, first_col),
            last,
        })
    }

    fn union(self, other: Self) -> Self {
        Self {
            first: CellRef::new(self.first.row.min(other.first.row), self.first.col.min(other.first.col)),
            last: CellRef::new(self.last.row.max(other.last.row), self.last.col.max(other.last.col)),
        }
    }

    fn parse(reference: &str) -> Option<Self> {
        let (a, b) = reference.split_once(':').unwrap_or((reference, reference));
        Some(Self {
            first: CellRef::parse(a)?,
            last: CellRef::parse(b)?,
        })
    }

    fn to_reference(self) -> String {
        if self.first == self.last {
            self.first.to_string()
        } else {
            format!("{}:{}", self.first, self.last)
        }
    }
}

/// `<dimension ref>` grown to include the planned cells
fn widen_dimension(e: &BytesStart<'_>, planned: Option<Bounds>) -> Result<BytesStart<'static>, PackageError> {
    let current = attribute(e, b"ref")?;
    let widened = match (current.as_deref().and_then(Bounds::parse), planned) {
        (Some(current), Some(planned)) => Some(current.union(planned)),
        (None, Some(planned)) => Some(planned),
        (current, None) => current,
    };

    let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
    let mut start = BytesStart::new(name);
    for attr in e.attributes() {
        let attr = attr?;
        if attr.key.as_ref() != b"ref" {
            start.push_attribute(attr);
        }
    }
    match (widened, current) {
        (Some(bounds), _) => start.push_attribute(("ref", bounds.to_reference().as_str())),
        (None, Some(original)) => start.push_attribute(("ref", original.as_str())),
        (None, None) => {}
    }
    Ok(start)
}

//! Blank template workbooks for development and tests.

use rust_xlsxwriter::{Format, FormatAlign, FormatBorder, Workbook, Worksheet, XlsxError};
use wbsx_core::layout::{Layout, Transform};
use wbsx_core::{FillError, TemplateVersion};

const TITLE: &str = "WBS Request";

/// Renders an empty workbook shaped like the given template version
#[derive(Clone, Debug)]
pub struct ScaffoldRenderer {
    layout: &'static Layout,
    /// Data rows pre-formatted below the headings
    rows: u32,
}

impl Default for ScaffoldRenderer {
    fn default() -> Self {
        Self::new(TemplateVersion::default())
    }
}

impl ScaffoldRenderer {
    pub fn new(version: TemplateVersion) -> Self {
        Self {
            layout: version.layout(),
            rows: 50,
        }
    }

    /// Set the number of pre-formatted data rows
    pub fn rows(mut self, rows: u32) -> Self {
        self.rows = rows;
        self
    }

    /// Generate workbook bytes
    pub fn render_to_bytes(&self) -> Result<Vec<u8>, FillError> {
        let mut workbook = Workbook::new();
        let sheet = workbook.add_worksheet();
        self.build_sheet(sheet).map_err(xlsx_error)?;
        workbook.save_to_buffer().map_err(xlsx_error)
    }

    fn build_sheet(&self, sheet: &mut Worksheet) -> Result<(), XlsxError> {
        let layout = self.layout;
        let title = Format::new().set_bold().set_font_size(14);
        let label = Format::new().set_bold().set_align(FormatAlign::Right);
        let input = Format::new().set_border(FormatBorder::Thin);
        let heading = Format::new()
            .set_bold()
            .set_align(FormatAlign::Center)
            .set_text_wrap()
            .set_background_color(0x4472C4)
            .set_font_color(0xFFFFFF)
            .set_border(FormatBorder::Thin);
        let percent = Format::new().set_num_format("0%").set_border(FormatBorder::Thin);

        sheet.set_name(layout.sheet)?;
        sheet.write_with_format(0, 0, TITLE, &title)?;

        // Header captions sit one column left of their value cells
        for header in layout.headers {
            let row = header.cell.row - 1;
            let col = (header.cell.col - 1) as u16;
            if col > 0 {
                sheet.write_with_format(row, col - 1, header.label, &label)?;
            }
            sheet.write_blank(row, col, &input)?;
        }

        let heading_row = layout.heading_row - 1;
        sheet.set_row_height(heading_row, 30)?;
        for rule in layout.columns {
            let col = (rule.column - 1) as u16;
            sheet.write_with_format(heading_row, col, rule.heading, &heading)?;
            sheet.set_column_width(col, column_width(rule.heading))?;

            if matches!(rule.transform, Transform::Percent(_)) {
                let first = layout.base_row - 1;
                for row in first..first + self.rows {
                    sheet.write_blank(row, col, &percent)?;
                }
            }
        }

        sheet.set_freeze_panes(layout.base_row - 1, 0)?;
        Ok(())
    }
}

fn column_width(heading: &str) -> f64 {
    (heading.chars().count() as f64 * 0.6).clamp(10.0, 30.0)
}

fn xlsx_error(e: XlsxError) -> FillError {
    FillError::Package(format!("Failed to create Excel: {e}"))
}

//! Column layouts per template version.
//!
//! Each layout is a declarative table: which field feeds which column and
//! how its value is transformed. Adding a template version means adding a
//! table here, not another copy of the fill loop.
//!
//! ## Shared template (current)
//!
//! ```text
//! D7  requesterDisplayName          D8  responsiblePerson
//!
//! row 18+:
//! A region         B type      C system (KIS)   D controlling area   E company code
//! F project name   G definition H level         I project type       J investment profile
//! K profit center  L cost center M/N/O planning/rubric/billing marks
//! P settlement %   Q goal       R profile       S responsible        T user id
//! U employment no  V functional area  X comment Y TM1 project        Z TG phase
//! AA project spec  AB mother code
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::transform;
use crate::{CellRef, CellValue, ElementList, FillError, SheetPlan, WbsElement};

/// Template versions with a known column layout
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemplateVersion {
    /// `wbs_template_actual.xlsm`, 28 columns starting at A
    #[default]
    Shared,
    /// Older template without region column or header cells
    Legacy,
}

impl TemplateVersion {
    pub fn layout(self) -> &'static Layout {
        match self {
            Self::Shared => &SHARED,
            Self::Legacy => &LEGACY,
        }
    }

    pub fn all() -> [Self; 2] {
        [Self::Shared, Self::Legacy]
    }
}

impl fmt::Display for TemplateVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Shared => "shared",
            Self::Legacy => "legacy",
        })
    }
}

impl FromStr for TemplateVersion {
    type Err = FillError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "shared" => Ok(Self::Shared),
            "legacy" => Ok(Self::Legacy),
            other => Err(FillError::Validation(format!(
                "unknown template layout '{other}' (expected shared or legacy)"
            ))),
        }
    }
}

/// How a column's value is derived from an element
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Transform {
    /// First present field, written as-is
    Field(&'static [&'static str]),
    /// Fixed literal, replaced by `override_field` when the element has it
    Constant {
        value: &'static str,
        override_field: Option<&'static str>,
    },
    /// First present field coerced to an integer
    Integer(&'static [&'static str]),
    /// Marker text when the field is truthy
    Mark {
        field: &'static str,
        mark: &'static str,
    },
    /// Percentage written as a fraction
    Percent(&'static str),
    /// `"<code> <label>"` unless the label already carries the code
    CodeLabel {
        code: &'static str,
        label: &'static str,
    },
    /// Region label, or the region code translated to its full name
    Region {
        code: &'static str,
        label: &'static str,
    },
    /// Field with exact-match replacements
    Normalize {
        field: &'static str,
        replacements: &'static [(&'static str, &'static str)],
    },
}

impl Transform {
    pub fn apply(&self, element: &WbsElement) -> CellValue {
        match *self {
            Self::Field(keys) => transform::raw(element.first_of(keys)),
            Self::Constant {
                value,
                override_field,
            } => match override_field.and_then(|f| element.get(f)) {
                Some(v) => transform::raw(Some(v)),
                None => CellValue::text(value),
            },
            Self::Integer(keys) => transform::integer(element.first_of(keys)),
            Self::Mark { field, mark } => transform::mark(element.get(field), mark),
            Self::Percent(field) => transform::percent(element.get(field)),
            Self::CodeLabel { code, label } => {
                transform::code_label(element.get(code), element.get(label))
            }
            Self::Region { code, label } => transform::region(element.get(code), element.get(label)),
            Self::Normalize {
                field,
                replacements,
            } => transform::normalize(element.get(field), replacements),
        }
    }
}

/// One data column
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ColumnRule {
    /// 1-based column index
    pub column: u32,
    /// Column heading as printed in the template
    pub heading: &'static str,
    pub transform: Transform,
}

/// A single header cell filled from the first element
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HeaderRule {
    pub cell: CellRef,
    /// Caption printed left of the value cell
    pub label: &'static str,
    pub field: &'static str,
}

/// A template version's full cell layout
#[derive(Debug)]
pub struct Layout {
    pub version: TemplateVersion,
    pub sheet: &'static str,
    /// Row of the first element
    pub base_row: u32,
    /// Row holding the column headings
    pub heading_row: u32,
    pub headers: &'static [HeaderRule],
    pub columns: &'static [ColumnRule],
}

impl Layout {
    /// Every cell write for `elements`
    pub fn plan(&self, elements: &ElementList) -> SheetPlan {
        let mut plan = SheetPlan::new(self.sheet);

        let first = elements.first();
        for header in self.headers {
            let value = transform::raw(first.and_then(|e| e.get(header.field)));
            plan.set(header.cell, value);
        }

        for (i, element) in elements.iter().enumerate() {
            let row = self.base_row + i as u32;
            for rule in self.columns {
                plan.set(CellRef::new(row, rule.column), rule.transform.apply(element));
            }
        }

        plan
    }

    /// Rule for a column, if the layout writes it
    pub fn column(&self, column: u32) -> Option<&ColumnRule> {
        self.columns.iter().find(|r| r.column == column)
    }

    /// Last column the layout writes
    pub fn last_column(&self) -> u32 {
        self.columns.iter().map(|r| r.column).max().unwrap_or(1)
    }
}

const fn col(column: u32, heading: &'static str, transform: Transform) -> ColumnRule {
    ColumnRule {
        column,
        heading,
        transform,
    }
}

const KIND_OF_CHANGE: &[(&str, &str)] = &[("Update", "Change")];

static SHARED: Layout = Layout {
    version: TemplateVersion::Shared,
    sheet: "Shared Template",
    base_row: 18,
    heading_row: 17,
    headers: &[
        HeaderRule {
            cell: CellRef::new(7, 4),
            label: "Business Controller",
            field: "requesterDisplayName",
        },
        HeaderRule {
            cell: CellRef::new(8, 4),
            label: "Business Responsible",
            field: "responsiblePerson",
        },
    ],
    columns: &[
        col(1, "Region", Transform::Region { code: "region", label: "regionLabel" }),
        col(
            2,
            "Kind of change to process",
            Transform::Normalize { field: "type", replacements: KIND_OF_CHANGE },
        ),
        col(3, "System", Transform::Constant { value: "KIS", override_field: Some("system") }),
        col(
            4,
            "Controlling Area",
            Transform::CodeLabel { code: "controllingArea", label: "controllingAreaLabel" },
        ),
        col(5, "Company Code", Transform::Integer(&["companyCode"])),
        col(6, "Project Name", Transform::Field(&["projectName"])),
        col(7, "Project Definition / Project Element", Transform::Field(&["projectDefinition"])),
        col(8, "Level", Transform::Integer(&["level"])),
        col(9, "Project Type", Transform::Field(&["projectType"])),
        col(10, "Investment Profile", Transform::Integer(&["investmentProfile"])),
        col(
            11,
            "Responsible Profit Center",
            Transform::Integer(&["responsibleProfitCenter", "responsiblePCCC"]),
        ),
        col(
            12,
            "Responsible Cost Center",
            Transform::Integer(&["responsibleCostCenter", "responsiblePCCC"]),
        ),
        col(13, "Planning Element", Transform::Mark { field: "planningElement", mark: "x" }),
        col(14, "Rubric Element", Transform::Mark { field: "rubricElement", mark: "x" }),
        col(15, "Billing Element", Transform::Mark { field: "billingElement", mark: "x" }),
        col(16, "Settlement Rule %", Transform::Percent("settlementRulePercent")),
        col(17, "Settlement Rule Goal", Transform::Field(&["settlementRuleGoal"])),
        col(18, "Project Profile", Transform::Field(&["projectProfile"])),
        col(19, "Responsible Person", Transform::Field(&["responsiblePerson"])),
        col(20, "User ID", Transform::Field(&["userId"])),
        col(21, "Employment Number", Transform::Field(&["employmentNumber"])),
        col(
            22,
            "Functional Area",
            Transform::CodeLabel { code: "functionalArea", label: "functionalAreaLabel" },
        ),
        col(24, "Comment", Transform::Field(&["comment"])),
        col(25, "TM1 Project", Transform::Field(&["tm1Project"])),
        col(26, "TG Phase", Transform::Field(&["tgPhase"])),
        col(27, "Project Specification", Transform::Field(&["projectSpec"])),
        col(28, "Mother Code", Transform::Field(&["motherCode"])),
    ],
};

static LEGACY: Layout = Layout {
    version: TemplateVersion::Legacy,
    sheet: "Shared Template",
    base_row: 18,
    heading_row: 17,
    headers: &[],
    columns: &[
        col(2, "Kind of change to process", Transform::Field(&["type"])),
        col(3, "System", Transform::Constant { value: "Standard", override_field: None }),
        col(4, "Controlling Area", Transform::Field(&["controllingArea"])),
        col(5, "Company Code", Transform::Field(&["companyCode"])),
        col(6, "Project Name", Transform::Field(&["projectName"])),
        col(7, "Project Definition / Project Element", Transform::Field(&["projectDefinition"])),
        col(8, "Level", Transform::Field(&["level"])),
        col(9, "Project Type", Transform::Field(&["projectType"])),
        col(10, "Investment Profile", Transform::Constant { value: "", override_field: None }),
        col(11, "Responsible PC/CC", Transform::Field(&["responsiblePCCC"])),
        col(12, "Planning Element", Transform::Mark { field: "planningElement", mark: "X" }),
        col(13, "Rubric Element", Transform::Mark { field: "rubricElement", mark: "X" }),
        col(14, "Billing Element", Transform::Mark { field: "billingElement", mark: "X" }),
        col(15, "Settlement Rule %", Transform::Field(&["settlementRulePercent"])),
        col(16, "Settlement Rule Goal", Transform::Field(&["settlementRuleGoal"])),
        col(17, "Responsible Person", Transform::Field(&["responsiblePerson"])),
        col(18, "User ID", Transform::Field(&["userId"])),
        col(19, "Employment Number", Transform::Field(&["employmentNumber"])),
        col(20, "Functional Area", Transform::Field(&["functionalArea"])),
        col(21, "Project Specification", Transform::Field(&["projectSpec"])),
        col(22, "Mother Code", Transform::Field(&["motherCode"])),
        col(23, "TG Phase", Transform::Field(&["tgPhase"])),
        col(24, "Comment", Transform::Field(&["comment"])),
    ],
};

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn version_parsing() {
        assert_eq!("shared".parse::<TemplateVersion>().unwrap(), TemplateVersion::Shared);
        assert_eq!(" Legacy ".parse::<TemplateVersion>().unwrap(), TemplateVersion::Legacy);
        assert!("v3".parse::<TemplateVersion>().is_err());
        for version in TemplateVersion::all() {
            assert_eq!(version.to_string().parse::<TemplateVersion>().unwrap(), version);
        }
    }

    #[test]
    fn columns_are_unique_and_sorted() {
        for version in TemplateVersion::all() {
            let layout = version.layout();
            let cols: Vec<u32> = layout.columns.iter().map(|r| r.column).collect();
            let mut sorted = cols.clone();
            sorted.sort_unstable();
            sorted.dedup();
            assert_eq!(cols, sorted, "{version} columns must be strictly increasing");
        }
    }

    #[test]
    fn shared_layout_shape() {
        let layout = TemplateVersion::Shared.layout();
        assert_eq!(layout.sheet, "Shared Template");
        assert_eq!(layout.base_row, 18);
        assert_eq!(layout.last_column(), 28);
        assert!(layout.column(23).is_none(), "column W is left to the template");
        assert_eq!(layout.column(26).unwrap().transform, Transform::Field(&["tgPhase"]));
    }

    #[test]
    fn system_constant_can_be_overridden() {
        let rule = TemplateVersion::Shared.layout().column(3).unwrap();
        assert_eq!(rule.transform.apply(&WbsElement::new()), CellValue::text("KIS"));
        assert_eq!(
            rule.transform.apply(&WbsElement::new().with("system", "SAP")),
            CellValue::text("SAP")
        );
    }

    #[test]
    fn responsible_centers_fall_back_to_pccc() {
        let layout = TemplateVersion::Shared.layout();
        let element = WbsElement::new()
            .with("responsiblePCCC", "4711")
            .with("responsibleCostCenter", "9000");
        assert_eq!(layout.column(11).unwrap().transform.apply(&element), CellValue::Integer(4711));
        assert_eq!(layout.column(12).unwrap().transform.apply(&element), CellValue::Integer(9000));
    }

    #[test]
    fn change_kind_normalized() {
        let rule = TemplateVersion::Shared.layout().column(2).unwrap();
        let apply = |t: &str| rule.transform.apply(&WbsElement::new().with("type", t));
        assert_eq!(apply("Update"), CellValue::text("Change"));
        assert_eq!(apply("New"), CellValue::text("New"));
    }

    #[test]
    fn legacy_plan_keeps_raw_values() {
        let elements = ElementList::from_payload(json!([{
            "type": "New",
            "planningElement": true,
            "settlementRulePercent": "50",
            "companyCode": "1000"
        }]))
        .unwrap();
        let plan = TemplateVersion::Legacy.layout().plan(&elements);

        assert_eq!(plan.get(CellRef::new(18, 3)), Some(&CellValue::text("Standard")));
        assert_eq!(plan.get(CellRef::new(18, 5)), Some(&CellValue::text("1000")));
        assert_eq!(plan.get(CellRef::new(18, 12)), Some(&CellValue::text("X")));
        assert_eq!(plan.get(CellRef::new(18, 15)), Some(&CellValue::text("50")));
        assert_eq!(plan.get(CellRef::new(7, 4)), None);
        assert_eq!(plan.len(), 23);
    }
}

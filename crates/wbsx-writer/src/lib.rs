//! # wbsx-writer
//!
//! Document writers for wbsx.
//!
//! This crate provides:
//! - [`TemplateWriter`]: patches the template package in place of Excel,
//!   keeping macros and styles
//! - [`AutomationWriter`]: drives an external spreadsheet host per fill
//! - [`ScaffoldRenderer`]: builds a blank "Shared Template" workbook
//!
//! ## Example
//!
//! ```rust,ignore
//! use wbsx_core::{ElementList, TemplateFiller};
//! use wbsx_writer::TemplateWriter;
//!
//! let elements = ElementList::from_json_str(&std::fs::read_to_string("wbs.json")?)?;
//! let filler = TemplateFiller::default();
//! filler.fill_to_path(&TemplateWriter::new(), "template.xlsm".as_ref(), "out.xlsm".as_ref(), &elements)?;
//! ```

pub mod automation;
pub mod package;
pub mod scaffold;
pub mod sheet;
pub mod template;

pub use automation::AutomationWriter;
pub use scaffold::ScaffoldRenderer;
pub use template::TemplateWriter;

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use wbsx_core::{DocumentWriter, FillError};

/// Shared handle to a configured writer
pub type SharedWriter = Arc<dyn DocumentWriter + Send + Sync>;

/// Errors while reading or rewriting a template package
#[derive(Debug, Error)]
pub enum PackageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("XML attribute error: {0}")]
    Attr(#[from] quick_xml::events::attributes::AttrError),

    #[error("sheet '{0}' not found in workbook")]
    SheetNotFound(String),

    #[error("package part missing: {0}")]
    MissingPart(String),

    #[error("{0}")]
    Invalid(String),
}

impl From<PackageError> for FillError {
    fn from(err: PackageError) -> Self {
        match err {
            PackageError::SheetNotFound(sheet) => FillError::SheetNotFound(sheet),
            PackageError::Io(e) => FillError::Io(e),
            other => FillError::Package(other.to_string()),
        }
    }
}

/// Which writer fills the template
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriterKind {
    #[default]
    Native,
    Automation,
}

impl fmt::Display for WriterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriterKind::Native => write!(f, "native"),
            WriterKind::Automation => write!(f, "automation"),
        }
    }
}

impl FromStr for WriterKind {
    type Err = FillError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "native" => Ok(WriterKind::Native),
            "automation" => Ok(WriterKind::Automation),
            other => Err(FillError::Validation(format!(
                "unknown writer '{other}' (expected native or automation)"
            ))),
        }
    }
}

/// Writer selection as read from configuration
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WriterConfig {
    pub kind: WriterKind,
    /// Program started by the automation writer
    pub host_program: Option<PathBuf>,
    /// Argument template for the host; placeholders are substituted per fill
    pub host_args: Option<Vec<String>>,
    pub timeout: Option<Duration>,
}

/// Build the writer described by `config`
pub fn build_writer(config: &WriterConfig) -> Result<SharedWriter, FillError> {
    match config.kind {
        WriterKind::Native => Ok(Arc::new(TemplateWriter::new())),
        WriterKind::Automation => {
            let program = config.host_program.clone().ok_or_else(|| {
                FillError::Validation("the automation writer needs a host program".into())
            })?;
            let mut writer = AutomationWriter::new(program);
            if let Some(args) = &config.host_args {
                writer = writer.args(args.iter().cloned());
            }
            if let Some(timeout) = config.timeout {
                writer = writer.timeout(timeout);
            }
            Ok(Arc::new(writer))
        }
    }
}

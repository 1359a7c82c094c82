//! Route handlers and download naming.

use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::{header, HeaderValue};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{Local, NaiveDate};
use serde_json::{json, Value};
use tracing::info;
use wbsx_core::{ElementList, FillError, TemplateFiller};

use crate::error::ApiError;
use crate::AppState;

pub const ROOT_MESSAGE: &str = "WBS Excel Export API is running";
pub const XLSM_MIME: &str = "application/vnd.ms-excel.sheet.macroEnabled.12";

/// Fields that accept either a region code or a resolved label
const REGION_FIELDS: &[&str] = &["region", "regionLabel"];

pub async fn root() -> Json<Value> {
    Json(json!({ "message": ROOT_MESSAGE }))
}

/// `POST /export`: fill the template and return it as a download
pub async fn export(
    State(state): State<AppState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(payload) = payload.map_err(|e| ApiError::bad_request(e.body_text()))?;
    let started = Instant::now();

    let naming = DownloadNaming::from_payload(&payload);
    let elements = ElementList::from_payload(payload)?;
    elements.require_non_empty()?;
    if state.config.require_region {
        elements.require_any_field(REGION_FIELDS)?;
    }
    let filename = naming.filename(&elements, &state.config.download_name, Local::now().date_naive());

    let count = elements.len();
    let bytes = run_fill(&state, elements).await?;

    info!(
        elements = count,
        writer = state.writer.name(),
        bytes = bytes.len(),
        filename = %filename,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "export served"
    );

    let disposition = HeaderValue::from_str(&content_disposition(&filename))
        .map_err(|e| ApiError::internal(format!("bad download name: {e}")))?;
    Ok((
        [
            (header::CONTENT_TYPE, HeaderValue::from_static(XLSM_MIME)),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    )
        .into_response())
}

/// Run the fill on a blocking thread, bounded by the export timeout.
///
/// Exclusive writers wait for the single permit first; the wait counts
/// toward the timeout.
async fn run_fill(state: &AppState, elements: ElementList) -> Result<Vec<u8>, ApiError> {
    let timeout = state.config.export_timeout();
    let filler = TemplateFiller::new(state.config.layout);
    let writer = Arc::clone(&state.writer);
    let template = state.config.template.clone();
    let exclusive = writer.exclusive().then(|| Arc::clone(&state.exclusive));

    let work = async move {
        let permit = match exclusive {
            Some(semaphore) => Some(
                semaphore
                    .acquire_owned()
                    .await
                    .map_err(|_| ApiError::internal("export service is shutting down"))?,
            ),
            None => None,
        };
        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            filler.fill(writer.as_ref(), &template, &elements)
        })
        .await
        .map_err(|e| ApiError::internal(format!("export task failed: {e}")))?
        .map_err(ApiError::from)
    };

    match tokio::time::timeout(timeout, work).await {
        Ok(result) => result,
        Err(_) => Err(FillError::Timeout(timeout).into()),
    }
}

/// Optional request fields that name the download
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DownloadNaming {
    pub request_name: Option<String>,
    pub region: Option<String>,
    pub submission_date: Option<String>,
}

impl DownloadNaming {
    pub fn from_payload(payload: &Value) -> Self {
        let field = |key: &str| {
            payload
                .get(key)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
        };
        Self {
            request_name: field("requestName"),
            region: field("region"),
            submission_date: field("submissionDate"),
        }
    }

    /// `MDM WBS <date> <region> - <requestName>.xlsm`, or `default` when
    /// the request carries no name.
    pub fn filename(&self, elements: &ElementList, default: &str, today: NaiveDate) -> String {
        let Some(request_name) = &self.request_name else {
            return default.to_string();
        };

        let date = self
            .submission_date
            .as_deref()
            .filter(|d| NaiveDate::parse_from_str(d, "%Y%m%d").is_ok())
            .map_or_else(|| today.format("%Y%m%d").to_string(), String::from);
        let region = self.region.clone().or_else(|| {
            elements
                .first()
                .map(|e| e.text("region"))
                .filter(|r| !r.is_empty())
        });

        let name = match region {
            Some(region) => format!("MDM WBS {date} {region} - {request_name}.xlsm"),
            None => format!("MDM WBS {date} - {request_name}.xlsm"),
        };
        sanitize_filename(&name)
    }
}

/// Strip characters that are unsafe in file names or header values
fn sanitize_filename(name: &str) -> String {
    name.chars()
        .filter(|c| !c.is_control() && !matches!(c, '"' | '\\' | '/' | ':' | '*' | '?' | '<' | '>' | '|'))
        .collect()
}

/// `attachment; filename="..."`, with an RFC 5987 `filename*` for non-ASCII names
fn content_disposition(filename: &str) -> String {
    if filename.is_ascii() {
        return format!("attachment; filename=\"{filename}\"");
    }

    let fallback: String = filename.chars().map(|c| if c.is_ascii() { c } else { '_' }).collect();
    let mut encoded = String::with_capacity(filename.len() * 3);
    for byte in filename.bytes() {
        if byte.is_ascii_alphanumeric() || b"!#$&+-.^_`|~".contains(&byte) {
            encoded.push(byte as char);
        } else {
            let _ = write!(encoded, "%{byte:02X}");
        }
    }
    format!("attachment; filename=\"{fallback}\"; filename*=UTF-8''{encoded}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 9).unwrap()
    }

    fn elements() -> ElementList {
        ElementList::from_payload(json!([{"region": "SE"}])).unwrap()
    }

    #[test]
    fn default_name_without_request_name() {
        let naming = DownloadNaming::from_payload(&json!({"wbsData": []}));
        assert_eq!(naming.filename(&elements(), "wbs_export.xlsm", today()), "wbs_export.xlsm");
    }

    #[test]
    fn full_download_name() {
        let naming = DownloadNaming::from_payload(&json!({
            "requestName": "Offshore rollout",
            "region": "DE",
            "submissionDate": "20240115",
        }));
        assert_eq!(
            naming.filename(&elements(), "wbs_export.xlsm", today()),
            "MDM WBS 20240115 DE - Offshore rollout.xlsm"
        );
    }

    #[test]
    fn date_and_region_fall_back() {
        let naming = DownloadNaming::from_payload(&json!({
            "requestName": "Q1/Q2: \"batch\"",
            "submissionDate": "15.01.2024",
        }));
        assert_eq!(
            naming.filename(&elements(), "wbs_export.xlsm", today()),
            "MDM WBS 20240309 SE - Q1Q2 batch.xlsm"
        );
    }

    #[test]
    fn disposition_header() {
        assert_eq!(
            content_disposition("wbs_export.xlsm"),
            "attachment; filename=\"wbs_export.xlsm\""
        );
        assert_eq!(
            content_disposition("Malmö.xlsm"),
            "attachment; filename=\"Malm_.xlsm\"; filename*=UTF-8''Malm%C3%B6.xlsm"
        );
    }
}

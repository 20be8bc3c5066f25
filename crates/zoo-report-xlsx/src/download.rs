//! File naming and HTTP header values for delivering a rendered report.

use chrono::NaiveDateTime;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

pub const XLSX_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

/// Bytes escaped in an RFC 5987 `ext-value` (everything but `attr-char`).
const EXT_VALUE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'!')
    .remove(b'#')
    .remove(b'$')
    .remove(b'&')
    .remove(b'+')
    .remove(b'-')
    .remove(b'.')
    .remove(b'^')
    .remove(b'_')
    .remove(b'`')
    .remove(b'|')
    .remove(b'~');

/// `<base>_<params...>_<YYYYMMDD_HHMMSS>.xlsx`, with every component made filesystem-safe.
///
/// Empty parameters are skipped; an empty base becomes `report`.
pub fn report_filename(base: &str, params: &[&str], timestamp: NaiveDateTime) -> String {
    let mut parts = Vec::with_capacity(params.len() + 2);
    let base = filename_component(base);
    parts.push(if base.is_empty() {
        "report".to_string()
    } else {
        base
    });
    parts.extend(
        params
            .iter()
            .map(|param| filename_component(param))
            .filter(|param| !param.is_empty()),
    );
    parts.push(timestamp.format("%Y%m%d_%H%M%S").to_string());
    format!("{}.xlsx", parts.join("_"))
}

fn filename_component(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.trim().chars() {
        match ch {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => out.push('-'),
            c if c.is_control() => {}
            c if c.is_whitespace() => out.push('_'),
            c => out.push(c),
        }
    }
    out.trim_matches(|c| c == '.' || c == '_').to_string()
}

/// `Content-Disposition` value with an ASCII fallback and an RFC 5987 UTF-8 filename.
pub fn content_disposition(filename: &str) -> String {
    let fallback: String = filename
        .chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c.is_ascii() && !c.is_ascii_control() => c,
            _ => '_',
        })
        .collect();
    format!(
        "attachment; filename=\"{fallback}\"; filename*=UTF-8''{}",
        utf8_percent_encode(filename, EXT_VALUE)
    )
}

/// A serialized report plus the metadata an HTTP response needs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReportDownload {
    pub bytes: Vec<u8>,
    pub filename: String,
}

impl ReportDownload {
    pub fn new(bytes: Vec<u8>, filename: impl Into<String>) -> Self {
        Self {
            bytes,
            filename: filename.into(),
        }
    }

    pub fn content_type(&self) -> &'static str {
        XLSX_CONTENT_TYPE
    }

    pub fn content_disposition(&self) -> String {
        content_disposition(&self.filename)
    }

    /// `Content-Type` and `Content-Disposition` header pairs.
    pub fn headers(&self) -> [(&'static str, String); 2] {
        [
            ("Content-Type", XLSX_CONTENT_TYPE.to_string()),
            ("Content-Disposition", self.content_disposition()),
        ]
    }
}

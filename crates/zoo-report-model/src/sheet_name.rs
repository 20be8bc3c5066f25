use thiserror::Error;
use unicode_normalization::UnicodeNormalization;

/// Maximum sheet name length, counted in UTF-16 code units like Excel does.
pub const EXCEL_MAX_SHEET_NAME_LEN: usize = 31;

/// Characters Excel rejects anywhere in a sheet name.
pub const INVALID_SHEET_NAME_CHARACTERS: [char; 7] = ['[', ']', ':', '*', '?', '/', '\\'];

/// Names Excel reserves for its own use.
const RESERVED_SHEET_NAMES: [&str; 1] = ["History"];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SheetNameError {
    #[error("sheet name cannot be empty")]
    EmptyName,
    #[error("sheet name cannot exceed 31 characters")]
    TooLong,
    #[error("sheet name contains invalid character {0:?}")]
    InvalidCharacter(char),
    #[error("sheet name cannot begin or end with an apostrophe")]
    LeadingOrTrailingApostrophe,
    #[error("sheet name {0:?} is reserved")]
    Reserved(String),
}

/// Check a name against Excel's sheet naming rules (uniqueness is checked by the caller).
pub fn validate_sheet_name(name: &str) -> Result<(), SheetNameError> {
    if name.trim().is_empty() {
        return Err(SheetNameError::EmptyName);
    }
    if name.encode_utf16().count() > EXCEL_MAX_SHEET_NAME_LEN {
        return Err(SheetNameError::TooLong);
    }
    if let Some(ch) = name
        .chars()
        .find(|c| INVALID_SHEET_NAME_CHARACTERS.contains(c) || c.is_control())
    {
        return Err(SheetNameError::InvalidCharacter(ch));
    }
    if name.starts_with('\'') || name.ends_with('\'') {
        return Err(SheetNameError::LeadingOrTrailingApostrophe);
    }
    if is_reserved_sheet_name(name) {
        return Err(SheetNameError::Reserved(name.to_string()));
    }
    Ok(())
}

pub fn is_reserved_sheet_name(name: &str) -> bool {
    RESERVED_SHEET_NAMES
        .iter()
        .any(|reserved| sheet_name_eq_case_insensitive(reserved, name))
}

/// Strip everything Excel would reject from `name`.
///
/// Returns `None` when nothing usable is left.
pub fn try_sanitize_sheet_name(name: &str) -> Option<String> {
    let cleaned: String = name
        .chars()
        .filter(|c| !INVALID_SHEET_NAME_CHARACTERS.contains(c) && !c.is_control())
        .collect();

    let mut candidate = trim_sheet_name(&cleaned);
    // Truncation can expose a new trailing space or apostrophe.
    loop {
        let truncated = trim_sheet_name(truncate_utf16(candidate, EXCEL_MAX_SHEET_NAME_LEN));
        if truncated.len() == candidate.len() {
            break;
        }
        candidate = truncated;
    }

    if candidate.is_empty() {
        None
    } else {
        Some(candidate.to_string())
    }
}

/// Like [`try_sanitize_sheet_name`], falling back to `Sheet1`.
pub fn sanitize_sheet_name(name: &str) -> String {
    try_sanitize_sheet_name(name).unwrap_or_else(|| "Sheet1".to_string())
}

/// Longest prefix of `s` that fits in `max_units` UTF-16 code units, never splitting a
/// surrogate pair.
pub fn truncate_utf16(s: &str, max_units: usize) -> &str {
    let mut units = 0usize;
    for (idx, ch) in s.char_indices() {
        units += ch.len_utf16();
        if units > max_units {
            return &s[..idx];
        }
    }
    s
}

/// Key used for Excel's case-insensitive sheet name comparisons.
pub fn sheet_name_casefold(name: &str) -> String {
    name.nfkc().flat_map(char::to_uppercase).collect()
}

pub fn sheet_name_eq_case_insensitive(a: &str, b: &str) -> bool {
    a == b || sheet_name_casefold(a) == sheet_name_casefold(b)
}

fn trim_sheet_name(name: &str) -> &str {
    let mut name = name.trim();
    loop {
        let next = name.trim_matches('\'').trim();
        if next.len() == name.len() {
            return name;
        }
        name = next;
    }
}

use std::collections::HashSet;

use zoo_report_model::{
    is_reserved_sheet_name, sheet_name_casefold, truncate_utf16, try_sanitize_sheet_name,
    EXCEL_MAX_SHEET_NAME_LEN,
};

/// Hands out valid, unique sheet names for one output document.
///
/// - Invalid characters are removed and the name is trimmed and truncated to 31 UTF-16 units.
/// - A name that sanitizes to nothing becomes `<fallback>1`, `<fallback>2`, ...
/// - A name already taken (case-insensitive) or reserved becomes `Name (2)`, `Name (3)`, ...
#[derive(Debug, Clone)]
pub struct SheetManager {
    fallback: String,
    names: Vec<String>,
    used_folded: HashSet<String>,
    fallback_counter: usize,
}

impl SheetManager {
    pub fn new(fallback: &str) -> Self {
        let fallback = try_sanitize_sheet_name(fallback).unwrap_or_else(|| "Sheet".to_string());
        Self {
            fallback,
            names: Vec::new(),
            used_folded: HashSet::new(),
            fallback_counter: 0,
        }
    }

    /// Reserve a name derived from `requested` and return it.
    pub fn claim(&mut self, requested: &str) -> String {
        let name = match try_sanitize_sheet_name(requested) {
            Some(base) => self.unique_from(&base),
            None => self.next_fallback(),
        };
        if name != requested {
            log::debug!("sheet name {requested:?} renamed to {name:?}");
        }
        self.used_folded.insert(sheet_name_casefold(&name));
        self.names.push(name.clone());
        name
    }

    /// Names handed out so far, in order.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn contains(&self, name: &str) -> bool {
        self.used_folded.contains(&sheet_name_casefold(name))
    }

    fn is_taken(&self, name: &str) -> bool {
        self.contains(name) || is_reserved_sheet_name(name)
    }

    fn unique_from(&self, base: &str) -> String {
        if !self.is_taken(base) {
            return base.to_string();
        }
        let mut suffix = 2usize;
        loop {
            let tail = format!(" ({suffix})");
            let room = EXCEL_MAX_SHEET_NAME_LEN - tail.encode_utf16().count();
            let stem = truncate_utf16(base, room).trim_end();
            let name = format!("{stem}{tail}");
            if !self.is_taken(&name) {
                return name;
            }
            suffix += 1;
        }
    }

    fn next_fallback(&mut self) -> String {
        loop {
            self.fallback_counter += 1;
            let tail = self.fallback_counter.to_string();
            let room = EXCEL_MAX_SHEET_NAME_LEN - tail.len();
            let name = format!("{}{tail}", truncate_utf16(&self.fallback, room));
            if !self.is_taken(&name) {
                return name;
            }
        }
    }
}

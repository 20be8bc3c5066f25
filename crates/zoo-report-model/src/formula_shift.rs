//! Text-level relocation of A1 references inside formula strings.
//!
//! This mirrors what a spreadsheet does when a formula cell is copied: relative row/column
//! components move with the cell, `$`-anchored components stay put. Only the lexical structure
//! needed to find references is understood; the formula is never parsed into an AST.
//!
//! Recognized references:
//! - cells and cell ranges (`B2`, `$B$2`, `B2:D9`)
//! - whole-row ranges (`3:5`, `$3:$5`) and whole-column ranges (`A:C`)
//! - any of the above behind a sheet prefix (`Sheet1!A1`, `'Bird House'!A1`)
//!
//! String literals, quoted sheet names, structured references (`Table1[Qty]`), function names and
//! defined names pass through untouched. A reference pushed off the sheet becomes `#REF!`.
//!
//! The same scanner also finds and renames the sheet prefixes of a formula, which is how a
//! template's references to its own sheet follow the sheet into a report under a new name.

use crate::address::{column_index, column_name, EXCEL_MAX_COLS, EXCEL_MAX_ROWS};
use crate::sheet_name::sheet_name_eq_case_insensitive;

/// Shift every relative reference in `formula` by `delta_rows` rows and `delta_cols` columns.
pub fn relocate_formula(formula: &str, delta_rows: i64, delta_cols: i64) -> String {
    if delta_rows == 0 && delta_cols == 0 {
        return formula.to_string();
    }

    let bytes = formula.as_bytes();
    let mut out = String::with_capacity(formula.len() + 8);
    let mut i = 0usize;

    while i < bytes.len() {
        let b = bytes[i];
        match b {
            b'"' | b'\'' => {
                let end = skip_quoted(bytes, i, b);
                out.push_str(&formula[i..end]);
                i = end;
            }
            b'[' => {
                let end = skip_brackets(bytes, i);
                out.push_str(&formula[i..end]);
                i = end;
            }
            _ if is_name_byte(b) => {
                let run_end = scan_name_run(bytes, i);
                if bytes.get(run_end) == Some(&b'!') {
                    // Sheet prefix; the reference itself follows the `!`.
                    out.push_str(&formula[i..=run_end]);
                    i = run_end + 1;
                    continue;
                }
                match parse_reference(bytes, i) {
                    Some(reference) => {
                        out.push_str(&reference.shifted(delta_rows, delta_cols));
                        i = reference.end_index;
                    }
                    None => {
                        out.push_str(&formula[i..run_end]);
                        i = run_end;
                    }
                }
            }
            _ => {
                // ASCII punctuation/operators/whitespace.
                out.push(char::from(b));
                i += 1;
            }
        }
    }

    out
}

/// Sheet names used as reference prefixes in `formula`, unquoted, in order of appearance.
///
/// External prefixes (`[1]Sheet1!A1`) are not sheets of this workbook and are skipped.
pub fn referenced_sheets(formula: &str) -> Vec<String> {
    let mut sheets = Vec::new();
    rewrite_sheet_prefixes(formula, |name| {
        sheets.push(name.to_string());
        None
    });
    sheets
}

/// Point every reference to sheet `from` at sheet `to` instead, quoting `to` where Excel would.
///
/// Sheet names compare case-insensitively. A formula without such references is returned as is.
pub fn rename_sheet_references(formula: &str, from: &str, to: &str) -> String {
    rewrite_sheet_prefixes(formula, |name| {
        sheet_name_eq_case_insensitive(name, from).then(|| quote_sheet_name(to))
    })
}

/// Spell a sheet name as a formula prefix: bare when it reads as a plain identifier, quoted
/// (with apostrophes doubled) otherwise.
pub fn quote_sheet_name(name: &str) -> String {
    let bytes = name.as_bytes();
    let plain = bytes
        .first()
        .is_some_and(|b| b.is_ascii_alphabetic() || *b == b'_')
        && bytes
            .iter()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'.'))
        && !looks_like_reference(bytes);
    if plain {
        name.to_string()
    } else {
        format!("'{}'", name.replace('\'', "''"))
    }
}

/// `AB12`, `XFD` and `R1C1`-style names would be read as references if left bare.
fn looks_like_reference(bytes: &[u8]) -> bool {
    if parse_part(bytes, 0).is_some_and(|(_, end)| end == bytes.len()) {
        return true;
    }
    let upper = bytes.to_ascii_uppercase();
    let mut rest = upper.as_slice();
    for marker in [b'R', b'C'] {
        if let Some(tail) = rest.strip_prefix(&[marker]) {
            let digits = tail.iter().take_while(|b| b.is_ascii_digit()).count();
            rest = &tail[digits..];
        }
    }
    rest.is_empty()
}

/// Copy `formula`, handing each sheet prefix (unquoted) to `visit`; a returned name replaces
/// the prefix verbatim.
fn rewrite_sheet_prefixes(formula: &str, mut visit: impl FnMut(&str) -> Option<String>) -> String {
    let bytes = formula.as_bytes();
    let mut out = String::with_capacity(formula.len());
    let mut i = 0usize;

    while i < bytes.len() {
        let b = bytes[i];
        match b {
            b'"' => {
                let end = skip_quoted(bytes, i, b);
                out.push_str(&formula[i..end]);
                i = end;
            }
            b'\'' => {
                let end = skip_quoted(bytes, i, b);
                let quoted = &formula[i..end];
                let is_prefix = end >= i + 2 && bytes.get(end) == Some(&b'!');
                match is_prefix.then(|| visit(&quoted[1..quoted.len() - 1].replace("''", "'"))) {
                    Some(Some(renamed)) => out.push_str(&renamed),
                    _ => out.push_str(quoted),
                }
                i = end;
            }
            b'[' => {
                let end = skip_brackets(bytes, i);
                // `[1]Sheet1!` names a sheet of another workbook.
                let run_end = scan_name_run(bytes, end);
                let end = if bytes.get(run_end) == Some(&b'!') {
                    run_end
                } else {
                    end
                };
                out.push_str(&formula[i..end]);
                i = end;
            }
            _ if is_name_byte(b) => {
                let run_end = scan_name_run(bytes, i);
                let run = &formula[i..run_end];
                let renamed = if bytes.get(run_end) == Some(&b'!') {
                    visit(run)
                } else {
                    None
                };
                out.push_str(renamed.as_deref().unwrap_or(run));
                i = run_end;
            }
            _ => {
                out.push(char::from(b));
                i += 1;
            }
        }
    }

    out
}

/// Identifier-ish bytes. Non-ASCII bytes count so multi-byte characters are never split.
fn is_name_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'_' | b'.' | b'$' | b'\\') || b >= 0x80
}

fn scan_name_run(bytes: &[u8], start: usize) -> usize {
    let mut i = start;
    while i < bytes.len() && is_name_byte(bytes[i]) {
        i += 1;
    }
    i
}

/// Index just past the closing quote, honoring doubled quotes as escapes.
fn skip_quoted(bytes: &[u8], start: usize, quote: u8) -> usize {
    let mut i = start + 1;
    while i < bytes.len() {
        if bytes[i] == quote {
            if bytes.get(i + 1) == Some(&quote) {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    bytes.len()
}

fn skip_brackets(bytes: &[u8], start: usize) -> usize {
    let mut depth = 0usize;
    for (offset, b) in bytes[start..].iter().enumerate() {
        match b {
            b'[' => depth += 1,
            b']' => {
                depth -= 1;
                if depth == 0 {
                    return start + offset + 1;
                }
            }
            _ => {}
        }
    }
    bytes.len()
}

#[derive(Debug, Clone, Copy)]
struct Coord {
    index: u32,
    absolute: bool,
}

#[derive(Debug, Clone, Copy)]
enum Part {
    Cell { col: Coord, row: Coord },
    Row(Coord),
    Col(Coord),
}

#[derive(Debug)]
struct Reference {
    start: Part,
    end: Option<Part>,
    /// Byte index just past the reference.
    end_index: usize,
}

fn parse_reference(bytes: &[u8], start: usize) -> Option<Reference> {
    let (first, mut end) = parse_part(bytes, start)?;
    let mut second = None;

    if bytes.get(end) == Some(&b':') {
        if let Some((part, part_end)) = parse_part(bytes, end + 1) {
            let compatible = matches!(
                (first, part),
                (Part::Cell { .. }, Part::Cell { .. })
                    | (Part::Row(_), Part::Row(_))
                    | (Part::Col(_), Part::Col(_))
            );
            if compatible && is_reference_boundary(bytes, part_end) {
                second = Some(part);
                end = part_end;
            }
        }
    }

    match (first, second) {
        // Bare rows/columns only count as references in `a:b` form.
        (Part::Row(_) | Part::Col(_), None) => return None,
        (Part::Cell { .. }, None) if !is_reference_boundary(bytes, end) => return None,
        _ => {}
    }

    Some(Reference {
        start: first,
        end: second,
        end_index: end,
    })
}

/// A reference must not run into an identifier or a call (`LOG10(`).
fn is_reference_boundary(bytes: &[u8], idx: usize) -> bool {
    match bytes.get(idx) {
        None => true,
        Some(&b) => !is_name_byte(b) && b != b'(' && b != b'!',
    }
}

fn parse_part(bytes: &[u8], start: usize) -> Option<(Part, usize)> {
    let mut i = start;

    let col_absolute = bytes.get(i) == Some(&b'$');
    if col_absolute {
        i += 1;
    }
    let letters_start = i;
    while i < bytes.len() && bytes[i].is_ascii_alphabetic() {
        i += 1;
    }
    let letters = i - letters_start;
    if letters > 3 {
        return None;
    }

    if letters == 0 {
        // `$3` / `3`: a row component on its own.
        let (row, end) = parse_row(bytes, i)?;
        return Some((
            Part::Row(Coord {
                index: row,
                absolute: col_absolute,
            }),
            end,
        ));
    }

    let letters = std::str::from_utf8(&bytes[letters_start..i]).ok()?;
    let col = Coord {
        index: column_index(letters).ok()?,
        absolute: col_absolute,
    };

    let row_absolute = bytes.get(i) == Some(&b'$');
    let row_start = if row_absolute { i + 1 } else { i };
    match parse_row(bytes, row_start) {
        Some((row, end)) => Some((
            Part::Cell {
                col,
                row: Coord {
                    index: row,
                    absolute: row_absolute,
                },
            },
            end,
        )),
        None if !row_absolute => Some((Part::Col(col), i)),
        None => None,
    }
}

/// Parse 1-based row digits into a 0-based row index.
fn parse_row(bytes: &[u8], start: usize) -> Option<(u32, usize)> {
    let mut i = start;
    while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
    }
    if i == start {
        return None;
    }
    let digits = std::str::from_utf8(&bytes[start..i]).ok()?;
    let row: u32 = digits.parse().ok()?;
    if row == 0 || row > EXCEL_MAX_ROWS {
        return None;
    }
    Some((row - 1, i))
}

fn shift_coord(coord: Coord, delta: i64, limit: u32) -> Option<Coord> {
    if coord.absolute {
        return Some(coord);
    }
    let index = i64::from(coord.index) + delta;
    if index < 0 || index >= i64::from(limit) {
        return None;
    }
    Some(Coord {
        index: index as u32,
        absolute: false,
    })
}

fn shift_part(part: Part, delta_rows: i64, delta_cols: i64) -> Option<Part> {
    Some(match part {
        Part::Cell { col, row } => Part::Cell {
            col: shift_coord(col, delta_cols, EXCEL_MAX_COLS)?,
            row: shift_coord(row, delta_rows, EXCEL_MAX_ROWS)?,
        },
        Part::Row(row) => Part::Row(shift_coord(row, delta_rows, EXCEL_MAX_ROWS)?),
        Part::Col(col) => Part::Col(shift_coord(col, delta_cols, EXCEL_MAX_COLS)?),
    })
}

fn write_part(out: &mut String, part: Part) {
    let dollar = |absolute: bool| if absolute { "$" } else { "" };
    match part {
        Part::Cell { col, row } => {
            out.push_str(dollar(col.absolute));
            out.push_str(&column_name(col.index));
            out.push_str(dollar(row.absolute));
            out.push_str(&(row.index + 1).to_string());
        }
        Part::Row(row) => {
            out.push_str(dollar(row.absolute));
            out.push_str(&(row.index + 1).to_string());
        }
        Part::Col(col) => {
            out.push_str(dollar(col.absolute));
            out.push_str(&column_name(col.index));
        }
    }
}

impl Reference {
    fn shifted(&self, delta_rows: i64, delta_cols: i64) -> String {
        let start = shift_part(self.start, delta_rows, delta_cols);
        let end = self
            .end
            .map(|part| shift_part(part, delta_rows, delta_cols));

        let mut out = String::new();
        match (start, end) {
            (Some(start), None) => write_part(&mut out, start),
            (Some(start), Some(Some(end))) => {
                write_part(&mut out, start);
                out.push(':');
                write_part(&mut out, end);
            }
            _ => out.push_str("#REF!"),
        }
        out
    }
}

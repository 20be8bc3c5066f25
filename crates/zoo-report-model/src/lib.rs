//! `zoo-report-model` defines the value types shared by the report rendering stack.
//!
//! Nothing here touches I/O; the `.xlsx` layer and the CLI both build on these types:
//! - A1 cell addresses and ranges (0-indexed internally)
//! - [`CellValue`], the literal-or-formula payload carried by render instructions
//! - Excel sheet-name validation, sanitization and case-insensitive comparison
//! - text-level formula relocation used when template rows are copied

mod address;
mod formula_shift;
mod sheet_name;
mod value;

pub use address::{
    column_index, column_name, A1ParseError, CellRef, Range, RangeParseError, EXCEL_MAX_COLS,
    EXCEL_MAX_ROWS,
};
pub use formula_shift::{quote_sheet_name, referenced_sheets, relocate_formula, rename_sheet_references};
pub use sheet_name::{
    is_reserved_sheet_name, sanitize_sheet_name, sheet_name_casefold,
    sheet_name_eq_case_insensitive, truncate_utf16, try_sanitize_sheet_name, validate_sheet_name,
    SheetNameError, EXCEL_MAX_SHEET_NAME_LEN, INVALID_SHEET_NAME_CHARACTERS,
};
pub use value::{CellValue, FormulaRef, Literal};

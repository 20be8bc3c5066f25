//! Template-driven `.xlsx` report rendering.
//!
//! A report is rendered in three steps:
//!
//! - [`TemplateLoader`] reads a design template from a [`TemplateStore`] and [`BlockIndexer`]
//!   turns one of its sheets into an immutable [`BlockCatalog`]. Blocks are the workbook's
//!   defined names; each covers a fixed run of template rows. [`CatalogCache`] keeps catalogs
//!   for reuse across requests.
//! - [`RenderEngine`] walks an ordered list of [`RenderInstruction`]s, copying block rows to the
//!   active sheet's cursor, substituting `{{field}}` placeholders, relocating template formulas
//!   and running per-block update hooks. [`NEW_SHEET`] starts a new output sheet.
//! - [`WorkbookBuilder`] serializes the resulting [`Document`] into an OPC package that reuses
//!   the template's styles, theme and sheet layout.
//!
//! [`render_report`] chains the three; [`download`] has the HTTP-facing helpers.

mod cell;
pub mod download;
pub mod openxml;
mod package;
pub mod render;
mod report;
mod shared_strings;
pub mod template;
mod tokens;
mod workbook;
pub mod write;
mod zip_util;

pub use cell::{CellContent, OutputCell};
pub use package::{PackageLimits, XlsxError, XlsxPackage};
pub use render::{
    render, BlockContext, BlockUpdateFn, BoxError, Document, MissingFieldPolicy, OutputRow,
    OutputSheet, RenderEngine, RenderError, RenderInstruction, RenderOptions, SheetManager,
    NEW_SHEET, SHEET_NAME_FIELD,
};
pub use report::{ensure_rows, render_report, ReportError, ReportErrorKind};
pub use shared_strings::{parse_shared_strings, SharedStringsBuilder};
pub use template::{
    validate_template_id, BlockCatalog, BlockDefinition, BlockIndexer, CatalogCache,
    CellTemplate, DirTemplateStore, MemoryTemplateStore, TemplateCell, TemplateError,
    TemplateLoader, TemplateRow, TemplateStore, IMPLICIT_BLOCK_NAME,
};
pub use tokens::{coerce_value, TextSegment, TextTemplate, TokenSubstitution};
pub use workbook::{read_workbook, DefinedName, WorkbookInfo, WorkbookSheet};
pub use write::{WorkbookBuilder, WriteError, WriteOptions};

pub use zoo_report_model as model;

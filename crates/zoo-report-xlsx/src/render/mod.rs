//! Turning an ordered list of block instructions into a [`Document`].
//!
//! Instructions are processed strictly in order. Each block instruction copies the block's
//! template rows to the active sheet's cursor, substitutes `{{field}}` placeholders from the
//! instruction's data, relocates template formulas by the row delta and advances the cursor by
//! the block's row count. The [`NEW_SHEET`] sentinel starts a new output sheet instead.
//!
//! Rendering is all-or-nothing: the first error aborts and no document is returned.

mod output;
mod sheets;

use std::collections::BTreeMap;
use std::fmt;

use serde::Deserialize;
use thiserror::Error;
use zoo_report_model::{
    relocate_formula, rename_sheet_references, CellRef, CellValue, EXCEL_MAX_COLS, EXCEL_MAX_ROWS,
};

use crate::cell::{CellContent, OutputCell};
use crate::template::{BlockCatalog, BlockDefinition, CellTemplate};
use crate::tokens::{coerce_value, TokenSubstitution};

pub use output::{Document, OutputRow, OutputSheet};
pub use sheets::SheetManager;

/// Instruction name that starts a new output sheet.
pub const NEW_SHEET: &str = "NEW_SHEET";

/// Data key naming the sheet created by a [`NEW_SHEET`] instruction.
pub const SHEET_NAME_FIELD: &str = "SHEET_NAME";

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Post-write hook run once its block has been written.
pub type BlockUpdateFn = Box<dyn FnOnce(&mut BlockContext<'_>) -> Result<(), BoxError> + Send>;

/// One step of a render: a block name (or [`NEW_SHEET`]), its data and an optional hook.
#[derive(Deserialize)]
pub struct RenderInstruction {
    block: String,
    #[serde(default)]
    data: BTreeMap<String, CellValue>,
    #[serde(skip)]
    apply_block_updates: Option<BlockUpdateFn>,
}

impl RenderInstruction {
    pub fn new(block: impl Into<String>) -> Self {
        Self {
            block: block.into(),
            data: BTreeMap::new(),
            apply_block_updates: None,
        }
    }

    /// A [`NEW_SHEET`] instruction requesting the given sheet name.
    pub fn new_sheet(name: impl Into<String>) -> Self {
        Self::new(NEW_SHEET).with(SHEET_NAME_FIELD, CellValue::text(name))
    }

    pub fn with(mut self, field: impl Into<String>, value: impl Into<CellValue>) -> Self {
        self.data.insert(field.into(), value.into());
        self
    }

    /// Run `f` after the block is written; it may read and overwrite any written cell.
    pub fn on_written<F>(mut self, f: F) -> Self
    where
        F: FnOnce(&mut BlockContext<'_>) -> Result<(), BoxError> + Send + 'static,
    {
        self.apply_block_updates = Some(Box::new(f));
        self
    }

    pub fn block(&self) -> &str {
        &self.block
    }

    pub fn data(&self) -> &BTreeMap<String, CellValue> {
        &self.data
    }

    pub fn is_new_sheet(&self) -> bool {
        self.block == NEW_SHEET
    }
}

impl fmt::Debug for RenderInstruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderInstruction")
            .field("block", &self.block)
            .field("data", &self.data)
            .field("apply_block_updates", &self.apply_block_updates.is_some())
            .finish()
    }
}

/// What to do with a placeholder whose field is absent from the instruction data.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingFieldPolicy {
    /// Leave whole-cell placeholders empty and interpolate an empty string.
    #[default]
    Blank,
    /// Fail the render with [`RenderError::MissingField`].
    Error,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RenderOptions {
    /// First writable row (0-based) of every output sheet.
    pub first_row: u32,
    pub missing_field: MissingFieldPolicy,
    /// Stem for sheets whose requested name is empty after sanitizing.
    pub fallback_sheet_name: String,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            first_row: 0,
            missing_field: MissingFieldPolicy::Blank,
            fallback_sheet_name: "Sheet".to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("unknown block: {0}")]
    UnknownBlock(String),
    #[error("block update for {block} failed: {source}")]
    BlockUpdate {
        block: String,
        #[source]
        source: BoxError,
    },
    #[error("cell {cell} is outside the written area (next free row is {block_last_row})")]
    WriteOutsideBlock { cell: String, block_last_row: u32 },
    #[error("block {block} would end past row {max_rows}", max_rows = EXCEL_MAX_ROWS)]
    RowLimitExceeded { block: String },
    #[error("cannot write non-finite number {0}")]
    NonFiniteNumber(f64),
    #[error("block {block} has no value for field {field:?}")]
    MissingField { block: String, field: String },
    #[error("invalid cell reference: {0}")]
    InvalidCellReference(String),
}

/// View of the active sheet handed to a block's update hook.
pub struct BlockContext<'a> {
    sheet: &'a mut OutputSheet,
    block: &'a str,
    start_row: u32,
    last_row: u32,
}

impl BlockContext<'_> {
    pub fn sheet_name(&self) -> &str {
        self.sheet.name()
    }

    pub fn block_name(&self) -> &str {
        self.block
    }

    /// First row (0-based) the block was written to.
    pub fn block_start_row(&self) -> u32 {
        self.start_row
    }

    /// Row just after the written block (0-based). Equal to the 1-based A1 row number of the
    /// block's last row.
    pub fn block_last_row(&self) -> u32 {
        self.last_row
    }

    pub fn cell(&self, cell: CellRef) -> Option<&CellContent> {
        self.sheet.content(cell)
    }

    pub fn cell_a1(&self, a1: &str) -> Result<Option<&CellContent>, RenderError> {
        Ok(self.cell(parse_a1(a1)?))
    }

    /// Overwrite a cell's value, keeping its style.
    pub fn set_value(
        &mut self,
        cell: CellRef,
        value: impl Into<CellValue>,
    ) -> Result<(), RenderError> {
        let content = coerce_value(&value.into())?;
        self.write(cell, content)
    }

    /// Install a formula verbatim (a leading `=` is dropped).
    pub fn set_formula(&mut self, cell: CellRef, formula: &str) -> Result<(), RenderError> {
        self.set_value(cell, CellValue::formula(formula))
    }

    pub fn set_value_a1(
        &mut self,
        a1: &str,
        value: impl Into<CellValue>,
    ) -> Result<(), RenderError> {
        self.set_value(parse_a1(a1)?, value)
    }

    pub fn set_formula_a1(&mut self, a1: &str, formula: &str) -> Result<(), RenderError> {
        self.set_formula(parse_a1(a1)?, formula)
    }

    fn write(&mut self, cell: CellRef, content: CellContent) -> Result<(), RenderError> {
        if cell.col >= EXCEL_MAX_COLS {
            return Err(RenderError::InvalidCellReference(cell.to_a1()));
        }
        if cell.row >= self.last_row {
            return Err(RenderError::WriteOutsideBlock {
                cell: cell.to_a1(),
                block_last_row: self.last_row,
            });
        }
        self.sheet.cell_mut(cell).content = content;
        Ok(())
    }
}

fn parse_a1(a1: &str) -> Result<CellRef, RenderError> {
    CellRef::from_a1(a1).map_err(|_| RenderError::InvalidCellReference(a1.to_string()))
}

/// Renders instruction lists against a [`BlockCatalog`].
#[derive(Clone, Debug, Default)]
pub struct RenderEngine {
    options: RenderOptions,
}

impl RenderEngine {
    pub fn new(options: RenderOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &RenderOptions {
        &self.options
    }

    pub fn render<I>(&self, catalog: &BlockCatalog, instructions: I) -> Result<Document, RenderError>
    where
        I: IntoIterator<Item = RenderInstruction>,
    {
        let mut session = RenderSession {
            catalog,
            options: &self.options,
            names: SheetManager::new(&self.options.fallback_sheet_name),
            sheets: Vec::new(),
        };

        let mut count = 0usize;
        for instruction in instructions {
            session.apply(instruction)?;
            count += 1;
        }
        if session.sheets.is_empty() {
            session.open_sheet(catalog.sheet_name());
        }

        log::debug!(
            "rendered {count} instruction(s) from {}/{} into {} sheet(s)",
            catalog.template_id(),
            catalog.sheet_name(),
            session.sheets.len()
        );

        Ok(Document {
            sheets: session.sheets,
            assets: catalog.assets().clone(),
        })
    }
}

/// Render with default options.
pub fn render<I>(catalog: &BlockCatalog, instructions: I) -> Result<Document, RenderError>
where
    I: IntoIterator<Item = RenderInstruction>,
{
    RenderEngine::default().render(catalog, instructions)
}

struct RenderSession<'a> {
    catalog: &'a BlockCatalog,
    options: &'a RenderOptions,
    names: SheetManager,
    sheets: Vec<OutputSheet>,
}

impl RenderSession<'_> {
    fn apply(&mut self, instruction: RenderInstruction) -> Result<(), RenderError> {
        let RenderInstruction {
            block: block_name,
            data,
            apply_block_updates,
        } = instruction;

        if block_name == NEW_SHEET {
            let requested = data
                .get(SHEET_NAME_FIELD)
                .map(ToString::to_string)
                .unwrap_or_default();
            self.open_sheet(&requested);
            if apply_block_updates.is_some() {
                log::debug!("ignoring block update attached to {NEW_SHEET}");
            }
            return Ok(());
        }

        let catalog = self.catalog;
        let block = catalog
            .block(&block_name)
            .ok_or_else(|| RenderError::UnknownBlock(block_name.clone()))?;
        if self.sheets.is_empty() {
            self.open_sheet(catalog.sheet_name());
        }
        let policy = self.options.missing_field;
        let Some(sheet) = self.sheets.last_mut() else {
            return Ok(());
        };

        let start = sheet.cursor;
        let end = u64::from(start) + u64::from(block.row_count());
        if end > u64::from(EXCEL_MAX_ROWS) {
            return Err(RenderError::RowLimitExceeded {
                block: block.name().to_string(),
            });
        }
        let end = end as u32;

        write_block(sheet, block, start, &data, policy)?;
        sheet.cursor = end;

        if let Some(update) = apply_block_updates {
            let mut ctx = BlockContext {
                sheet,
                block: block.name(),
                start_row: start,
                last_row: end,
            };
            update(&mut ctx).map_err(|source| match source.downcast::<RenderError>() {
                Ok(err) => *err,
                Err(source) => RenderError::BlockUpdate {
                    block: block.name().to_string(),
                    source,
                },
            })?;
        }
        Ok(())
    }

    fn open_sheet(&mut self, requested: &str) {
        let name = self.names.claim(requested);
        log::debug!("opening output sheet {name:?}");
        self.sheets
            .push(OutputSheet::new(name, self.options.first_row));
    }
}

fn write_block(
    sheet: &mut OutputSheet,
    block: &BlockDefinition,
    start: u32,
    data: &BTreeMap<String, CellValue>,
    policy: MissingFieldPolicy,
) -> Result<(), RenderError> {
    let delta = i64::from(start) - i64::from(block.first_row());
    let substitution = TokenSubstitution::new(block.name(), data, policy);
    // References to the template sheet follow the block onto a renamed output sheet.
    let renamed = (sheet.name() != block.owner_sheet()).then(|| sheet.name().to_string());

    for template_row in block.rows() {
        let row = sheet.rows.entry(start + template_row.offset).or_default();
        row.attrs = template_row.attrs.clone();
        for cell in &template_row.cells {
            let content = match &cell.template {
                CellTemplate::Static(CellContent::Formula { text, array_ref }) => {
                    let mut text = relocate_formula(text, delta, 0);
                    if let Some(to) = &renamed {
                        text = rename_sheet_references(&text, block.owner_sheet(), to);
                    }
                    CellContent::Formula {
                        text,
                        array_ref: array_ref.and_then(|range| range.offset_rows(delta)),
                    }
                }
                CellTemplate::Static(content) => content.clone(),
                CellTemplate::Placeholder(text) => substitution.apply(text)?,
            };
            row.cells
                .insert(cell.col, OutputCell::new(cell.style, content));
        }
    }

    sheet
        .merges
        .extend(block.merges().iter().filter_map(|merge| merge.offset_rows(delta)));
    Ok(())
}

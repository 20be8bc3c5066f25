use std::collections::BTreeMap;
use std::sync::Arc;

use zoo_report_model::{sheet_name_eq_case_insensitive, CellRef, Range};

use crate::cell::{CellContent, OutputCell};
use crate::template::TemplateAssets;
use crate::write::{WorkbookBuilder, WriteError, WriteOptions};

#[derive(Clone, Debug, Default, PartialEq)]
pub struct OutputRow {
    /// Row attributes copied from the template row (`ht`, `customHeight`, `s`, ...).
    pub attrs: Vec<(String, String)>,
    pub cells: BTreeMap<u32, OutputCell>,
}

/// One worksheet of a rendered document.
#[derive(Clone, Debug, PartialEq)]
pub struct OutputSheet {
    pub(crate) name: String,
    pub(crate) first_row: u32,
    pub(crate) cursor: u32,
    pub(crate) rows: BTreeMap<u32, OutputRow>,
    pub(crate) merges: Vec<Range>,
}

impl OutputSheet {
    pub(crate) fn new(name: String, first_row: u32) -> Self {
        Self {
            name,
            first_row,
            cursor: first_row,
            rows: BTreeMap::new(),
            merges: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Next free row (0-based).
    pub fn cursor(&self) -> u32 {
        self.cursor
    }

    /// Rows consumed by blocks so far.
    pub fn row_count(&self) -> u32 {
        self.cursor - self.first_row
    }

    pub fn cell(&self, cell: CellRef) -> Option<&OutputCell> {
        self.rows.get(&cell.row)?.cells.get(&cell.col)
    }

    pub fn content(&self, cell: CellRef) -> Option<&CellContent> {
        self.cell(cell).map(|cell| &cell.content)
    }

    pub fn rows(&self) -> &BTreeMap<u32, OutputRow> {
        &self.rows
    }

    pub fn merges(&self) -> &[Range] {
        &self.merges
    }

    pub(crate) fn cell_mut(&mut self, cell: CellRef) -> &mut OutputCell {
        self.rows
            .entry(cell.row)
            .or_default()
            .cells
            .entry(cell.col)
            .or_insert_with(|| OutputCell::new(None, CellContent::Empty))
    }

    /// Occupied cell range, if the sheet has any cells.
    pub(crate) fn used_range(&self) -> Option<Range> {
        let first_row = *self.rows.iter().find(|(_, r)| !r.cells.is_empty())?.0;
        let last_row = *self.rows.iter().rev().find(|(_, r)| !r.cells.is_empty())?.0;
        let (min_col, max_col) = self
            .rows
            .values()
            .flat_map(|row| row.cells.keys())
            .fold((u32::MAX, 0), |(lo, hi), col| (lo.min(*col), hi.max(*col)));
        Some(Range::new(
            CellRef::new(first_row, min_col),
            CellRef::new(last_row, max_col),
        ))
    }
}

/// A rendered workbook, ready to serialize.
#[derive(Clone, Debug)]
pub struct Document {
    pub(crate) sheets: Vec<OutputSheet>,
    pub(crate) assets: Arc<TemplateAssets>,
}

impl Document {
    pub fn sheets(&self) -> &[OutputSheet] {
        &self.sheets
    }

    pub fn sheet(&self, name: &str) -> Option<&OutputSheet> {
        self.sheets
            .iter()
            .find(|sheet| sheet_name_eq_case_insensitive(&sheet.name, name))
    }

    /// Serialize to `.xlsx` bytes with default [`WriteOptions`].
    pub fn serialize(&self) -> Result<Vec<u8>, WriteError> {
        self.serialize_with(&WriteOptions::default())
    }

    pub fn serialize_with(&self, options: &WriteOptions) -> Result<Vec<u8>, WriteError> {
        WorkbookBuilder::new(self).options(options.clone()).to_bytes()
    }
}

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use zoo_report_model::{
    referenced_sheets, sheet_name_casefold, sheet_name_eq_case_insensitive, Range, EXCEL_MAX_ROWS,
};

use crate::cell::CellContent;
use crate::openxml::{REL_TYPE_SHARED_STRINGS, REL_TYPE_STYLES, REL_TYPE_THEME};
use crate::package::{XlsxError, XlsxPackage};
use crate::shared_strings::parse_shared_strings;
use crate::template::sheet::{parse_worksheet, ParsedRow, ParsedWorksheet};
use crate::template::TemplateError;
use crate::tokens::TextTemplate;
use crate::workbook::{read_workbook, workbook_related_part, DefinedName, WorkbookInfo};

/// Name of the block indexed for a sheet that defines no blocks of its own.
pub const IMPLICIT_BLOCK_NAME: &str = "SHEET";

/// How a template cell produces output.
#[derive(Clone, Debug, PartialEq)]
pub enum CellTemplate {
    /// Copied as-is; formulas are relocated with the block.
    Static(CellContent),
    /// Text containing `{{field}}` placeholders.
    Placeholder(TextTemplate),
}

#[derive(Clone, Debug, PartialEq)]
pub struct TemplateCell {
    pub col: u32,
    pub style: Option<u32>,
    pub template: CellTemplate,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TemplateRow {
    /// Row offset from the block's first row.
    pub offset: u32,
    pub attrs: Vec<(String, String)>,
    pub cells: Vec<TemplateCell>,
}

/// A named, fixed-height run of template rows.
#[derive(Clone, Debug, PartialEq)]
pub struct BlockDefinition {
    name: String,
    owner_sheet: String,
    first_row: u32,
    row_count: u32,
    rows: Vec<TemplateRow>,
    merges: Vec<Range>,
    placeholders: BTreeSet<String>,
}

impl BlockDefinition {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn owner_sheet(&self) -> &str {
        &self.owner_sheet
    }

    /// First template row (0-based).
    pub fn first_row(&self) -> u32 {
        self.first_row
    }

    /// Last template row (0-based, inclusive).
    pub fn last_row(&self) -> u32 {
        self.first_row + self.row_count - 1
    }

    pub fn row_count(&self) -> u32 {
        self.row_count
    }

    /// Rows that carry cells or row attributes; blank rows are implied by `row_count`.
    pub fn rows(&self) -> &[TemplateRow] {
        &self.rows
    }

    /// Merged regions in template coordinates.
    pub fn merges(&self) -> &[Range] {
        &self.merges
    }

    pub fn placeholders(&self) -> impl Iterator<Item = &str> {
        self.placeholders.iter().map(String::as_str)
    }

    /// A block without placeholders renders identically for every instruction.
    pub fn is_decorative(&self) -> bool {
        self.placeholders.is_empty()
    }

    /// Number of template cells holding formulas.
    pub fn formula_count(&self) -> usize {
        self.rows
            .iter()
            .flat_map(|row| &row.cells)
            .filter(|cell| matches!(cell.template, CellTemplate::Static(CellContent::Formula { .. })))
            .count()
    }
}

/// A template defined name that is not a block and survives into reports.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct CarriedName {
    pub(crate) name: String,
    pub(crate) hidden: bool,
    pub(crate) refers_to: String,
    /// Scoped to the template sheet; each output sheet gets its own copy.
    pub(crate) sheet_scoped: bool,
}

/// Package-level pieces every rendered workbook reuses.
#[derive(Clone, Debug, PartialEq)]
pub struct TemplateAssets {
    pub(crate) workbook_xml: Vec<u8>,
    pub(crate) styles_xml: Option<Vec<u8>>,
    pub(crate) theme_xml: Option<Vec<u8>>,
    pub(crate) skeleton: String,
    /// Template sheet name as referenced by `defined_names`.
    pub(crate) sheet_name: String,
    pub(crate) defined_names: Vec<CarriedName>,
}

/// Immutable index of the blocks on one template sheet.
#[derive(Clone, Debug)]
pub struct BlockCatalog {
    template_id: String,
    sheet_name: String,
    blocks: Vec<BlockDefinition>,
    by_name: HashMap<String, usize>,
    assets: Arc<TemplateAssets>,
}

impl BlockCatalog {
    pub fn template_id(&self) -> &str {
        &self.template_id
    }

    /// The template sheet's name as spelled in the workbook.
    pub fn sheet_name(&self) -> &str {
        &self.sheet_name
    }

    /// Look up a block; names compare case-insensitively like Excel defined names.
    pub fn block(&self, name: &str) -> Option<&BlockDefinition> {
        self.by_name
            .get(&sheet_name_casefold(name))
            .map(|idx| &self.blocks[*idx])
    }

    /// Blocks in template row order.
    pub fn blocks(&self) -> &[BlockDefinition] {
        &self.blocks
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub(crate) fn assets(&self) -> &Arc<TemplateAssets> {
        &self.assets
    }
}

/// Scans a template sheet and builds its [`BlockCatalog`].
///
/// Blocks are the workbook's defined names (workbook- or sheet-scoped) whose reference is one
/// area on the sheet; the area's rows become the block. Built-in `_xlnm.*` names are ignored.
#[derive(Debug, Clone)]
pub struct BlockIndexer<'a> {
    template_id: &'a str,
}

impl<'a> BlockIndexer<'a> {
    pub fn new(template_id: &'a str) -> Self {
        Self { template_id }
    }

    pub fn index(
        &self,
        package: &XlsxPackage,
        sheet_name: &str,
    ) -> Result<BlockCatalog, TemplateError> {
        let workbook = read_workbook(package)?;
        let sheet_index = workbook
            .sheet_index(sheet_name)
            .ok_or_else(|| self.sheet_not_found(sheet_name))?;
        let sheet = &workbook.sheets[sheet_index];
        let part = sheet
            .part
            .as_deref()
            .ok_or_else(|| self.sheet_not_found(sheet_name))?;
        let sheet_xml = package
            .part(part)
            .ok_or_else(|| XlsxError::MissingPart(part.to_string()))?;

        let shared_strings = match workbook_related_part(package, &workbook, REL_TYPE_SHARED_STRINGS)?
            .and_then(|name| package.part(&name))
        {
            Some(bytes) => parse_shared_strings(bytes)?,
            None => Vec::new(),
        };
        let parsed = parse_worksheet(sheet_xml, &shared_strings)?;

        let mut spans = self.block_spans(&workbook, sheet_index)?;
        if spans.is_empty() {
            let mut used = parsed
                .rows
                .iter()
                .filter(|(_, row)| !row.cells.is_empty())
                .map(|(idx, _)| *idx);
            let Some(first) = used.next() else {
                return Err(TemplateError::EmptyTemplate {
                    template: self.template_id.to_string(),
                    sheet: sheet.name.clone(),
                });
            };
            let last = used.last().unwrap_or(first);
            log::debug!(
                "template {} sheet {:?} defines no blocks; using implicit {IMPLICIT_BLOCK_NAME} block",
                self.template_id,
                sheet.name
            );
            spans.push(BlockSpan {
                name: IMPLICIT_BLOCK_NAME.to_string(),
                first_row: first,
                last_row: last,
            });
        }

        spans.sort_by(|a, b| a.first_row.cmp(&b.first_row).then(a.name.cmp(&b.name)));
        for pair in spans.windows(2) {
            if pair[1].first_row <= pair[0].last_row {
                return Err(TemplateError::OverlappingBlocks {
                    first: pair[0].name.clone(),
                    second: pair[1].name.clone(),
                });
            }
        }

        let blocks: Vec<BlockDefinition> = spans
            .iter()
            .map(|span| build_block(span, &sheet.name, &parsed))
            .collect();
        let by_name = blocks
            .iter()
            .enumerate()
            .map(|(idx, block)| (sheet_name_casefold(&block.name), idx))
            .collect();

        let assets = TemplateAssets {
            workbook_xml: package
                .part(&workbook.part)
                .map(<[u8]>::to_vec)
                .ok_or_else(|| XlsxError::MissingPart(workbook.part.clone()))?,
            styles_xml: related_bytes(package, &workbook, REL_TYPE_STYLES)?,
            theme_xml: related_bytes(package, &workbook, REL_TYPE_THEME)?,
            skeleton: parsed.skeleton,
            sheet_name: sheet.name.clone(),
            defined_names: carried_names(&workbook, sheet_index),
        };

        log::debug!(
            "indexed template {} sheet {:?}: {} block(s)",
            self.template_id,
            sheet.name,
            blocks.len()
        );

        Ok(BlockCatalog {
            template_id: self.template_id.to_string(),
            sheet_name: sheet.name.clone(),
            blocks,
            by_name,
            assets: Arc::new(assets),
        })
    }

    fn sheet_not_found(&self, sheet_name: &str) -> TemplateError {
        TemplateError::SheetNotFound {
            template: self.template_id.to_string(),
            sheet: sheet_name.to_string(),
        }
    }

    /// Row spans of the defined names that target the sheet at `sheet_index`.
    fn block_spans(
        &self,
        workbook: &WorkbookInfo,
        sheet_index: usize,
    ) -> Result<Vec<BlockSpan>, TemplateError> {
        let sheet_name = &workbook.sheets[sheet_index].name;
        let mut spans: Vec<(BlockSpan, bool)> = Vec::new();

        for name in &workbook.defined_names {
            if name.is_builtin() {
                continue;
            }
            let is_local = match name.local_sheet_id {
                Some(id) if id as usize == sheet_index => true,
                Some(_) => continue,
                None => false,
            };
            let Some(span) = self.span_for_name(name, sheet_name)? else {
                continue;
            };

            let key = sheet_name_casefold(&span.name);
            match spans
                .iter_mut()
                .find(|(existing, _)| sheet_name_casefold(&existing.name) == key)
            {
                // A sheet-scoped name shadows a workbook-scoped name of the same spelling.
                Some(slot) if is_local && !slot.1 => *slot = (span, true),
                Some(_) => log::debug!("ignoring shadowed block name {:?}", span.name),
                None => spans.push((span, is_local)),
            }
        }

        Ok(spans.into_iter().map(|(span, _)| span).collect())
    }

    fn span_for_name(
        &self,
        name: &DefinedName,
        sheet_name: &str,
    ) -> Result<Option<BlockSpan>, TemplateError> {
        let Some((target_sheet, area)) = split_sheet_reference(&name.refers_to) else {
            log::debug!(
                "defined name {:?} is not a sheet reference ({:?})",
                name.name,
                name.refers_to
            );
            return Ok(None);
        };
        if !sheet_name_eq_case_insensitive(&target_sheet, sheet_name) {
            return Ok(None);
        }
        if area.contains("#REF!") {
            log::warn!("defined name {:?} has a broken reference; skipping it", name.name);
            return Ok(None);
        }
        let Some((first_row, last_row)) = parse_row_span(area) else {
            return Err(TemplateError::InvalidBlockRange {
                name: name.name.clone(),
                reference: name.refers_to.clone(),
            });
        };
        Ok(Some(BlockSpan {
            name: name.name.clone(),
            first_row,
            last_row,
        }))
    }
}

/// The defined names a report keeps: everything except block names and names tied to other
/// template sheets.
fn carried_names(workbook: &WorkbookInfo, sheet_index: usize) -> Vec<CarriedName> {
    let sheet_name = &workbook.sheets[sheet_index].name;
    let mut carried = Vec::new();

    for name in &workbook.defined_names {
        let sheet_scoped = match name.local_sheet_id {
            Some(id) if id as usize == sheet_index => true,
            Some(_) => {
                log::debug!("dropping defined name {:?} scoped to another sheet", name.name);
                continue;
            }
            None => false,
        };
        let is_block = !name.is_builtin()
            && split_sheet_reference(&name.refers_to)
                .is_some_and(|(target, _)| sheet_name_eq_case_insensitive(&target, sheet_name));
        if is_block {
            continue;
        }
        if let Some(other) = referenced_sheets(&name.refers_to)
            .into_iter()
            .find(|target| !sheet_name_eq_case_insensitive(target, sheet_name))
        {
            log::debug!(
                "dropping defined name {:?}: sheet {other:?} is not part of the report",
                name.name
            );
            continue;
        }
        carried.push(CarriedName {
            name: name.name.clone(),
            hidden: name.hidden,
            refers_to: name.refers_to.clone(),
            sheet_scoped,
        });
    }

    carried
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct BlockSpan {
    name: String,
    first_row: u32,
    last_row: u32,
}

fn related_bytes(
    package: &XlsxPackage,
    workbook: &WorkbookInfo,
    type_uri: &str,
) -> Result<Option<Vec<u8>>, XlsxError> {
    Ok(workbook_related_part(package, workbook, type_uri)?
        .and_then(|name| package.part(&name).map(<[u8]>::to_vec)))
}

fn build_block(span: &BlockSpan, owner_sheet: &str, parsed: &ParsedWorksheet) -> BlockDefinition {
    let mut placeholders = BTreeSet::new();
    let rows = parsed
        .rows
        .range(span.first_row..=span.last_row)
        .filter(|(_, row)| !row.cells.is_empty() || !row.attrs.is_empty())
        .map(|(idx, row)| template_row(idx - span.first_row, row, &mut placeholders))
        .collect();

    let mut merges = Vec::new();
    for merge in &parsed.merges {
        if merge.within_rows(span.first_row, span.last_row) {
            merges.push(*merge);
        } else if merge.start.row <= span.last_row && merge.end.row >= span.first_row {
            log::warn!(
                "merge {merge} crosses the boundary of block {:?}; dropping it",
                span.name
            );
        }
    }

    BlockDefinition {
        name: span.name.clone(),
        owner_sheet: owner_sheet.to_string(),
        first_row: span.first_row,
        row_count: span.last_row - span.first_row + 1,
        rows,
        merges,
        placeholders,
    }
}

fn template_row(offset: u32, row: &ParsedRow, placeholders: &mut BTreeSet<String>) -> TemplateRow {
    let cells = row
        .cells
        .iter()
        .map(|(col, cell)| {
            let template = match &cell.content {
                CellContent::Text(text) => match TextTemplate::parse(text) {
                    TextTemplate::Plain(text) => CellTemplate::Static(CellContent::Text(text)),
                    parsed => {
                        placeholders.extend(parsed.fields().into_iter().map(str::to_string));
                        CellTemplate::Placeholder(parsed)
                    }
                },
                other => CellTemplate::Static(other.clone()),
            };
            TemplateCell {
                col: *col,
                style: cell.style,
                template,
            }
        })
        .collect();

    TemplateRow {
        offset,
        attrs: row.attrs.clone(),
        cells,
    }
}

/// Split `Sheet!Area` / `'Quoted Sheet'!Area` into the unquoted sheet name and the area.
fn split_sheet_reference(refers_to: &str) -> Option<(String, &str)> {
    let s = refers_to.trim();
    if let Some(rest) = s.strip_prefix('\'') {
        let mut name = String::new();
        let mut chars = rest.char_indices().peekable();
        while let Some((idx, ch)) = chars.next() {
            if ch == '\'' {
                if matches!(chars.peek(), Some((_, '\''))) {
                    name.push('\'');
                    chars.next();
                    continue;
                }
                return rest[idx + 1..].strip_prefix('!').map(|area| (name, area));
            }
            name.push(ch);
        }
        return None;
    }
    let (sheet, area) = s.split_once('!')?;
    Some((sheet.to_string(), area))
}

/// 0-based inclusive row span of a single area (`$A$1:$F$3`, `$B$4`, `$5:$7`).
fn parse_row_span(area: &str) -> Option<(u32, u32)> {
    let cleaned: String = area.trim().chars().filter(|c| *c != '$').collect();
    if cleaned.contains(',') || cleaned.contains('!') {
        return None;
    }
    if let Ok(range) = Range::from_a1(&cleaned) {
        return Some((range.start.row, range.end.row));
    }

    let (a, b) = cleaned.split_once(':')?;
    let a: u32 = a.parse().ok()?;
    let b: u32 = b.parse().ok()?;
    if a == 0 || b == 0 || a > EXCEL_MAX_ROWS || b > EXCEL_MAX_ROWS {
        return None;
    }
    Some((a.min(b) - 1, a.max(b) - 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::workbook::WorkbookSheet;

    #[test]
    fn splits_sheet_references() {
        assert_eq!(
            split_sheet_reference("Zoo!$A$1:$F$2"),
            Some(("Zoo".to_string(), "$A$1:$F$2"))
        );
        assert_eq!(
            split_sheet_reference("'Keeper''s Log'!$3:$4"),
            Some(("Keeper's Log".to_string(), "$3:$4"))
        );
        assert_eq!(split_sheet_reference("0.15"), None);
        assert_eq!(split_sheet_reference("'Unterminated!A1"), None);
    }

    #[test]
    fn keeps_only_names_a_report_can_resolve() {
        let sheet = |name: &str| WorkbookSheet {
            name: name.to_string(),
            sheet_id: 1,
            rel_id: "rId1".to_string(),
            part: None,
        };
        let name = |name: &str, local_sheet_id: Option<u32>, refers_to: &str| DefinedName {
            name: name.to_string(),
            local_sheet_id,
            hidden: false,
            refers_to: refers_to.to_string(),
        };
        let workbook = WorkbookInfo {
            part: "xl/workbook.xml".to_string(),
            sheets: vec![sheet("Notes"), sheet("Zoo")],
            defined_names: vec![
                name("Row", None, "Zoo!$A$3:$D$3"),
                name("Header", Some(1), "zoo!$1:$2"),
                name("Rate", None, "0.15"),
                name("Keeper", None, "Notes!$B$2"),
                name("_xlnm.Print_Titles", Some(1), "Zoo!$1:$2"),
                name("_xlnm.Print_Area", Some(0), "Notes!$A$1:$C$9"),
                name("Local", Some(1), "\"north\""),
            ],
        };

        let names = carried_names(&workbook, 1);
        let carried: Vec<(&str, bool)> = names
            .iter()
            .map(|n| (n.name.as_str(), n.sheet_scoped))
            .collect();
        assert_eq!(
            carried,
            vec![("Rate", false), ("_xlnm.Print_Titles", true), ("Local", true)]
        );
    }

    #[test]
    fn parses_row_spans() {
        assert_eq!(parse_row_span("$A$1:$F$3"), Some((0, 2)));
        assert_eq!(parse_row_span("$B$4"), Some((3, 3)));
        assert_eq!(parse_row_span("$7:$5"), Some((4, 6)));
        assert_eq!(parse_row_span("$A$1:$A$2,$C$1"), None);
        assert_eq!(parse_row_span("#REF!"), None);
        assert_eq!(parse_row_span("0:3"), None);
    }
}

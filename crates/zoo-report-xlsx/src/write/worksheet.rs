use std::fmt::Write as _;

use quick_xml::escape::escape;
use quick_xml::events::{BytesEnd, BytesStart, Event};
use quick_xml::{Reader, Writer};
use zoo_report_model::{CellRef, Range};

use crate::cell::{CellContent, OutputCell};
use crate::render::{OutputRow, OutputSheet};
use crate::shared_strings::SharedStringsBuilder;

use super::WriteError;

/// Elements that come after `<mergeCells>` in the SpreadsheetML schema.
fn insert_before_tag(name: &[u8]) -> bool {
    matches!(
        name,
        b"phoneticPr"
            | b"conditionalFormatting"
            | b"dataValidations"
            | b"hyperlinks"
            | b"printOptions"
            | b"pageMargins"
            | b"pageSetup"
            | b"headerFooter"
            | b"rowBreaks"
            | b"colBreaks"
            | b"customProperties"
            | b"cellWatches"
            | b"ignoredErrors"
            | b"smartTags"
            | b"drawing"
            | b"drawingHF"
            | b"picture"
            | b"oleObjects"
            | b"controls"
            | b"webPublishItems"
            | b"tableParts"
            | b"extLst"
    )
}

pub(super) fn prefixed_tag(prefix: Option<&str>, local: &str) -> String {
    match prefix {
        Some(prefix) => format!("{prefix}:{local}"),
        None => local.to_string(),
    }
}

pub(super) fn element_prefix(qname: &[u8]) -> Option<String> {
    let qname = std::str::from_utf8(qname).ok()?;
    qname.split_once(':').map(|(prefix, _)| prefix.to_string())
}

/// Fill a template skeleton with an output sheet's rows, dimension and merges.
///
/// Only the first sheet of a workbook keeps `sheetView/@tabSelected`.
pub(super) fn write_worksheet_xml(
    skeleton: &str,
    sheet: &OutputSheet,
    selected: bool,
    shared_strings: &mut SharedStringsBuilder,
) -> Result<Vec<u8>, WriteError> {
    let mut reader = Reader::from_str(skeleton);
    reader.config_mut().trim_text(false);
    let mut writer = Writer::new(Vec::with_capacity(skeleton.len() + sheet.rows().len() * 64));
    let mut buf = Vec::new();

    let mut prefix: Option<String> = None;
    let mut depth = 0usize;
    let mut skip_depth = 0usize;
    let mut wrote_dimension = false;
    let mut wrote_merges = sheet.merges().is_empty();

    loop {
        let event = reader.read_event_into(&mut buf)?;
        match event {
            Event::Eof => break,
            _ if skip_depth > 0 => match event {
                Event::Start(_) => skip_depth += 1,
                Event::End(_) => skip_depth -= 1,
                _ => {}
            },
            Event::Start(ref e) if depth == 0 && e.local_name().as_ref() == b"worksheet" => {
                prefix = element_prefix(e.name().as_ref());
                depth = 1;
                writer.write_event(Event::Start(e.to_owned()))?;
            }
            Event::Start(ref e) | Event::Empty(ref e) if depth == 1 => {
                let local = e.local_name();
                let local = local.as_ref();
                if !wrote_dimension && local != b"sheetPr" {
                    write_dimension(&mut writer, sheet, prefix.as_deref())?;
                    wrote_dimension = true;
                }
                if !wrote_merges && insert_before_tag(local) {
                    write_merge_cells(&mut writer, sheet.merges(), prefix.as_deref())?;
                    wrote_merges = true;
                }

                let is_start = matches!(event, Event::Start(_));
                if local == b"sheetData" {
                    write_sheet_data(&mut writer, sheet, prefix.as_deref(), shared_strings)?;
                    if is_start {
                        skip_depth = 1;
                    }
                } else {
                    writer.write_event(event.to_owned())?;
                    if is_start {
                        depth += 1;
                    }
                }
            }
            Event::Start(ref e) | Event::Empty(ref e)
                if !selected && e.local_name().as_ref() == b"sheetView" =>
            {
                let view = without_attribute(e, b"tabSelected")?;
                if matches!(event, Event::Start(_)) {
                    depth += 1;
                    writer.write_event(Event::Start(view))?;
                } else {
                    writer.write_event(Event::Empty(view))?;
                }
            }
            Event::Start(ref e) => {
                depth += 1;
                writer.write_event(Event::Start(e.to_owned()))?;
            }
            Event::End(ref e) => {
                if depth == 1 {
                    if !wrote_dimension {
                        write_dimension(&mut writer, sheet, prefix.as_deref())?;
                        wrote_dimension = true;
                    }
                    if !wrote_merges {
                        write_merge_cells(&mut writer, sheet.merges(), prefix.as_deref())?;
                        wrote_merges = true;
                    }
                }
                depth = depth.saturating_sub(1);
                writer.write_event(Event::End(e.to_owned()))?;
            }
            other => writer.write_event(other.into_owned())?,
        }
        buf.clear();
    }

    Ok(writer.into_inner())
}

fn without_attribute(e: &BytesStart<'_>, key: &[u8]) -> Result<BytesStart<'static>, WriteError> {
    let name = String::from_utf8(e.name().as_ref().to_vec())?;
    let mut out = BytesStart::new(name);
    for attr in e.attributes() {
        let attr = attr?;
        if attr.key.as_ref() != key {
            out.push_attribute(attr);
        }
    }
    Ok(out.into_owned())
}

fn write_dimension(
    writer: &mut Writer<Vec<u8>>,
    sheet: &OutputSheet,
    prefix: Option<&str>,
) -> Result<(), WriteError> {
    let reference = match sheet.used_range() {
        Some(range) if range.is_single_cell() => range.start.to_a1(),
        Some(range) => range.to_string(),
        None => "A1".to_string(),
    };
    let tag = prefixed_tag(prefix, "dimension");
    let mut dimension = BytesStart::new(tag.as_str());
    dimension.push_attribute(("ref", reference.as_str()));
    writer.write_event(Event::Empty(dimension))?;
    Ok(())
}

fn write_merge_cells(
    writer: &mut Writer<Vec<u8>>,
    merges: &[Range],
    prefix: Option<&str>,
) -> Result<(), WriteError> {
    if merges.is_empty() {
        return Ok(());
    }
    let merge_cells_tag = prefixed_tag(prefix, "mergeCells");
    let merge_cell_tag = prefixed_tag(prefix, "mergeCell");
    let count = merges.len().to_string();
    let mut start = BytesStart::new(merge_cells_tag.as_str());
    start.push_attribute(("count", count.as_str()));
    writer.write_event(Event::Start(start))?;

    for merge in merges {
        let range = merge.to_string();
        let mut elem = BytesStart::new(merge_cell_tag.as_str());
        elem.push_attribute(("ref", range.as_str()));
        writer.write_event(Event::Empty(elem))?;
    }

    writer.write_event(Event::End(BytesEnd::new(merge_cells_tag.as_str())))?;
    Ok(())
}

fn write_sheet_data(
    writer: &mut Writer<Vec<u8>>,
    sheet: &OutputSheet,
    prefix: Option<&str>,
    shared_strings: &mut SharedStringsBuilder,
) -> Result<(), WriteError> {
    let sheet_data = prefixed_tag(prefix, "sheetData");
    if sheet.rows().is_empty() {
        writer.get_mut().extend_from_slice(format!("<{sheet_data}/>").as_bytes());
        return Ok(());
    }

    let row_tag = prefixed_tag(prefix, "row");
    let mut out = String::new();
    let _ = write!(out, "<{sheet_data}>");
    for (row_idx, row) in sheet.rows() {
        write_row(&mut out, &row_tag, prefix, *row_idx, row, shared_strings);
    }
    let _ = write!(out, "</{sheet_data}>");
    writer.get_mut().extend_from_slice(out.as_bytes());
    Ok(())
}

fn write_row(
    out: &mut String,
    row_tag: &str,
    prefix: Option<&str>,
    row_idx: u32,
    row: &OutputRow,
    shared_strings: &mut SharedStringsBuilder,
) {
    let _ = write!(out, r#"<{row_tag} r="{}""#, row_idx + 1);
    for (key, value) in &row.attrs {
        let _ = write!(out, r#" {key}="{}""#, escape(value.as_str()));
    }

    let cells: Vec<(&u32, &OutputCell)> = row
        .cells
        .iter()
        .filter(|(_, cell)| cell.style.is_some() || !cell.content.is_empty())
        .collect();
    if cells.is_empty() {
        out.push_str("/>");
        return;
    }
    out.push('>');

    let cell_tag = prefixed_tag(prefix, "c");
    let value_tag = prefixed_tag(prefix, "v");
    let formula_tag = prefixed_tag(prefix, "f");
    for (col, cell) in cells {
        let at = CellRef::new(row_idx, *col);
        let _ = write!(out, r#"<{cell_tag} r="{}""#, at.to_a1());
        if let Some(style) = cell.style {
            let _ = write!(out, r#" s="{style}""#);
        }

        let value = match &cell.content {
            CellContent::Empty => {
                out.push_str("/>");
                continue;
            }
            CellContent::Text(text) => {
                out.push_str(r#" t="s""#);
                shared_strings.intern(text).to_string()
            }
            CellContent::Number(n) => n.to_string(),
            CellContent::Bool(b) => {
                out.push_str(r#" t="b""#);
                String::from(if *b { "1" } else { "0" })
            }
            CellContent::Error(err) => {
                out.push_str(r#" t="e""#);
                escape(err.as_str()).into_owned()
            }
            CellContent::Date(date) => {
                out.push_str(r#" t="d""#);
                escape(date.as_str()).into_owned()
            }
            CellContent::Formula { text, array_ref } => {
                // No cached value; the workbook is flagged for a full recalculation on load.
                match array_ref {
                    Some(range) => {
                        let _ = write!(out, r#"><{formula_tag} t="array" ref="{range}">"#);
                    }
                    None => {
                        let _ = write!(out, "><{formula_tag}>");
                    }
                }
                let _ = write!(
                    out,
                    "{}</{formula_tag}></{cell_tag}>",
                    escape(text.as_str())
                );
                continue;
            }
        };
        let _ = write!(out, "><{value_tag}>{value}</{value_tag}></{cell_tag}>");
    }
    let _ = write!(out, "</{row_tag}>");
}

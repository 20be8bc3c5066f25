use std::collections::{BTreeMap, HashMap};

use quick_xml::events::{BytesStart, Event};
use quick_xml::{Reader, Writer};
use zoo_report_model::{relocate_formula, CellRef, Range};

use crate::cell::CellContent;
use crate::openxml::local_name;
use crate::package::XlsxError;

/// Worksheet children that carry relationship ids or absolute ranges. They cannot be cloned into
/// a report sheet whose rows have moved, so the skeleton leaves them out.
fn is_dropped_element(name: &[u8]) -> bool {
    matches!(
        name,
        b"dimension"
            | b"sheetCalcPr"
            | b"protectedRanges"
            | b"scenarios"
            | b"autoFilter"
            | b"sortState"
            | b"dataConsolidate"
            | b"customSheetViews"
            | b"conditionalFormatting"
            | b"dataValidations"
            | b"hyperlinks"
            | b"rowBreaks"
            | b"colBreaks"
            | b"customProperties"
            | b"cellWatches"
            | b"ignoredErrors"
            | b"smartTags"
            | b"drawing"
            | b"legacyDrawing"
            | b"legacyDrawingHF"
            | b"drawingHF"
            | b"picture"
            | b"oleObjects"
            | b"controls"
            | b"webPublishItems"
            | b"tableParts"
            | b"extLst"
            | b"AlternateContent"
    )
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct ParsedCell {
    pub style: Option<u32>,
    pub content: CellContent,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct ParsedRow {
    /// Row attributes other than `r` and `spans`, in document order.
    pub attrs: Vec<(String, String)>,
    pub cells: BTreeMap<u32, ParsedCell>,
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct ParsedWorksheet {
    pub rows: BTreeMap<u32, ParsedRow>,
    pub merges: Vec<Range>,
    /// The worksheet XML with an empty `<sheetData/>` and without the elements rejected by
    /// [`is_dropped_element`], `<mergeCells>` or `pageSetup/@r:id`.
    pub skeleton: String,
}

#[derive(Default)]
struct FormulaState {
    kind: Option<String>,
    text: String,
    reference: Option<String>,
    shared_index: Option<u32>,
}

struct CellState {
    at: CellRef,
    style: Option<u32>,
    cell_type: Option<String>,
    value: String,
    inline: Option<String>,
    formula: Option<FormulaState>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum TextTarget {
    None,
    Value,
    Formula,
    Inline,
}

struct SharedFormulas {
    masters: HashMap<u32, (CellRef, String)>,
    followers: Vec<(CellRef, u32)>,
}

pub(crate) fn parse_worksheet(
    xml: &[u8],
    shared_strings: &[String],
) -> Result<ParsedWorksheet, XlsxError> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(false);
    let mut writer = Writer::new(Vec::with_capacity(xml.len().min(64 * 1024)));
    let mut buf = Vec::new();

    let mut depth = 0usize;
    let mut skip_depth = 0usize;
    let mut in_sheet_data = false;
    let mut in_merge_cells = false;

    let mut rows: BTreeMap<u32, ParsedRow> = BTreeMap::new();
    let mut merges = Vec::new();
    let mut shared = SharedFormulas {
        masters: HashMap::new(),
        followers: Vec::new(),
    };

    let mut current_row: u32 = 0;
    let mut next_row: u32 = 0;
    let mut next_col: u32 = 0;
    let mut cell: Option<CellState> = None;
    let mut target = TextTarget::None;
    let mut phonetic_depth = 0usize;

    loop {
        let event = reader.read_event_into(&mut buf)?;

        if in_sheet_data {
            match event {
                Event::End(ref e) if e.local_name().as_ref() == b"sheetData" => {
                    in_sheet_data = false;
                }
                Event::Start(ref e) | Event::Empty(ref e) if e.local_name().as_ref() == b"row" => {
                    let (row, attrs) = parse_row_start(e, next_row)?;
                    current_row = row;
                    next_row = row.saturating_add(1);
                    next_col = 0;
                    let entry = rows.entry(row).or_default();
                    entry.attrs = attrs;
                }
                Event::Start(ref e) if e.local_name().as_ref() == b"c" => {
                    let state = parse_cell_start(e, current_row, next_col)?;
                    next_col = state.at.col.saturating_add(1);
                    cell = Some(state);
                }
                Event::Empty(ref e) if e.local_name().as_ref() == b"c" => {
                    let state = parse_cell_start(e, current_row, next_col)?;
                    next_col = state.at.col.saturating_add(1);
                    finish_cell(state, shared_strings, &mut shared, &mut rows)?;
                }
                Event::End(ref e) if e.local_name().as_ref() == b"c" => {
                    if let Some(state) = cell.take() {
                        finish_cell(state, shared_strings, &mut shared, &mut rows)?;
                    }
                    target = TextTarget::None;
                }
                Event::Start(ref e) | Event::Empty(ref e)
                    if cell.is_some() && e.local_name().as_ref() == b"f" =>
                {
                    let formula = parse_formula_start(e)?;
                    if let Some(state) = cell.as_mut() {
                        state.formula = Some(formula);
                    }
                    if matches!(event, Event::Start(_)) {
                        target = TextTarget::Formula;
                    }
                }
                Event::Start(ref e) if cell.is_some() => match e.local_name().as_ref() {
                    b"v" => target = TextTarget::Value,
                    b"is" => {
                        if let Some(state) = cell.as_mut() {
                            state.inline = Some(String::new());
                        }
                    }
                    b"rPh" => phonetic_depth += 1,
                    b"t" if phonetic_depth == 0 => target = TextTarget::Inline,
                    _ => {}
                },
                Event::End(ref e) if cell.is_some() => match e.local_name().as_ref() {
                    b"v" | b"f" | b"t" => target = TextTarget::None,
                    b"rPh" => phonetic_depth = phonetic_depth.saturating_sub(1),
                    _ => {}
                },
                Event::Text(ref e) if target != TextTarget::None => {
                    let text = e.unescape()?;
                    append_text(cell.as_mut(), target, &text);
                }
                Event::CData(ref e) if target != TextTarget::None => {
                    let text = std::str::from_utf8(e.as_ref())?;
                    append_text(cell.as_mut(), target, text);
                }
                Event::Eof => {
                    return Err(XlsxError::Invalid("unterminated sheetData".to_string()));
                }
                _ => {}
            }
            buf.clear();
            continue;
        }

        if skip_depth > 0 {
            match event {
                Event::Start(_) => skip_depth += 1,
                Event::End(_) => skip_depth -= 1,
                Event::Eof => break,
                _ => {}
            }
            buf.clear();
            continue;
        }

        if in_merge_cells {
            match event {
                Event::Start(ref e) | Event::Empty(ref e)
                    if e.local_name().as_ref() == b"mergeCell" =>
                {
                    if let Some(range) = parse_merge_cell(e)? {
                        merges.push(range);
                    }
                }
                Event::End(ref e) if e.local_name().as_ref() == b"mergeCells" => {
                    in_merge_cells = false;
                }
                Event::Eof => break,
                _ => {}
            }
            buf.clear();
            continue;
        }

        match event {
            Event::Eof => break,
            Event::Start(ref e) if depth == 1 && e.local_name().as_ref() == b"sheetData" => {
                writer.write_event(Event::Empty(e.clone()))?;
                in_sheet_data = true;
            }
            Event::Start(ref e) if depth == 1 && e.local_name().as_ref() == b"mergeCells" => {
                in_merge_cells = true;
            }
            Event::Empty(ref e) if depth == 1 && e.local_name().as_ref() == b"mergeCells" => {}
            Event::Start(ref e) if depth == 1 && is_dropped_element(e.local_name().as_ref()) => {
                skip_depth = 1;
            }
            Event::Empty(ref e) if depth == 1 && is_dropped_element(e.local_name().as_ref()) => {}
            Event::Empty(ref e) if depth == 1 && e.local_name().as_ref() == b"pageSetup" => {
                writer.write_event(Event::Empty(without_relationship_id(e)?))?;
            }
            Event::Start(ref e) if depth == 1 && e.local_name().as_ref() == b"pageSetup" => {
                depth += 1;
                writer.write_event(Event::Start(without_relationship_id(e)?))?;
            }
            Event::Start(_) => {
                depth += 1;
                writer.write_event(event.clone())?;
            }
            Event::End(_) => {
                depth = depth.saturating_sub(1);
                writer.write_event(event.clone())?;
            }
            _ => writer.write_event(event.clone())?,
        }
        buf.clear();
    }

    resolve_shared_formulas(shared, &mut rows);

    Ok(ParsedWorksheet {
        rows,
        merges,
        skeleton: String::from_utf8(writer.into_inner())?,
    })
}

fn append_text(cell: Option<&mut CellState>, target: TextTarget, text: &str) {
    let Some(state) = cell else {
        return;
    };
    match target {
        TextTarget::Value => state.value.push_str(text),
        TextTarget::Formula => {
            if let Some(formula) = state.formula.as_mut() {
                formula.text.push_str(text);
            }
        }
        TextTarget::Inline => {
            if let Some(inline) = state.inline.as_mut() {
                inline.push_str(text);
            }
        }
        TextTarget::None => {}
    }
}

fn parse_row_start(
    e: &BytesStart<'_>,
    implicit_row: u32,
) -> Result<(u32, Vec<(String, String)>), XlsxError> {
    let mut row = None;
    let mut attrs = Vec::new();
    for attr in e.attributes() {
        let attr = attr?;
        match attr.key.as_ref() {
            b"r" => {
                row = attr
                    .unescape_value()?
                    .trim()
                    .parse::<u32>()
                    .ok()
                    .filter(|r| *r >= 1)
                    .map(|r| r - 1);
            }
            b"spans" => {}
            key => attrs.push((
                String::from_utf8(key.to_vec())?,
                attr.unescape_value()?.into_owned(),
            )),
        }
    }
    Ok((row.unwrap_or(implicit_row), attrs))
}

fn parse_cell_start(
    e: &BytesStart<'_>,
    current_row: u32,
    implicit_col: u32,
) -> Result<CellState, XlsxError> {
    let mut at = None;
    let mut style = None;
    let mut cell_type = None;
    for attr in e.attributes() {
        let attr = attr?;
        match attr.key.as_ref() {
            b"r" => at = CellRef::from_a1(&attr.unescape_value()?).ok(),
            b"s" => style = attr.unescape_value()?.trim().parse::<u32>().ok(),
            b"t" => cell_type = Some(attr.unescape_value()?.into_owned()),
            _ => {}
        }
    }
    Ok(CellState {
        at: at.unwrap_or(CellRef::new(current_row, implicit_col)),
        style,
        cell_type,
        value: String::new(),
        inline: None,
        formula: None,
    })
}

fn parse_formula_start(e: &BytesStart<'_>) -> Result<FormulaState, XlsxError> {
    let mut formula = FormulaState::default();
    for attr in e.attributes() {
        let attr = attr?;
        match attr.key.as_ref() {
            b"t" => formula.kind = Some(attr.unescape_value()?.into_owned()),
            b"ref" => formula.reference = Some(attr.unescape_value()?.into_owned()),
            b"si" => formula.shared_index = attr.unescape_value()?.trim().parse::<u32>().ok(),
            _ => {}
        }
    }
    Ok(formula)
}

fn parse_merge_cell(e: &BytesStart<'_>) -> Result<Option<Range>, XlsxError> {
    for attr in e.attributes() {
        let attr = attr?;
        if attr.key.as_ref() == b"ref" {
            let value = attr.unescape_value()?;
            return Ok(match Range::from_a1(&value) {
                Ok(range) if !range.is_single_cell() => Some(range),
                Ok(_) => None,
                Err(err) => {
                    log::warn!("ignoring malformed merge range {value:?}: {err}");
                    None
                }
            });
        }
    }
    Ok(None)
}

fn without_relationship_id(e: &BytesStart<'_>) -> Result<BytesStart<'static>, XlsxError> {
    let name = std::str::from_utf8(e.name().as_ref())?.to_string();
    let mut out = BytesStart::new(name);
    for attr in e.attributes() {
        let attr = attr?;
        let key = attr.key.as_ref();
        if key.contains(&b':') && local_name(key) == b"id" {
            continue;
        }
        out.push_attribute(attr);
    }
    Ok(out.into_owned())
}

fn finish_cell(
    mut state: CellState,
    shared_strings: &[String],
    shared: &mut SharedFormulas,
    rows: &mut BTreeMap<u32, ParsedRow>,
) -> Result<(), XlsxError> {
    let at = state.at;
    let content = match state.formula.take() {
        Some(formula) if formula.kind.as_deref() == Some("shared") => {
            match (formula.shared_index, formula.text.trim().is_empty()) {
                (Some(si), false) => {
                    shared.masters.insert(si, (at, formula.text.clone()));
                    CellContent::formula(formula.text)
                }
                (Some(si), true) => {
                    shared.followers.push((at, si));
                    CellContent::Empty
                }
                (None, false) => CellContent::formula(formula.text),
                (None, true) => cached_value(&state, shared_strings)?,
            }
        }
        Some(formula) if !formula.text.trim().is_empty() => {
            let array_ref = match formula.kind.as_deref() {
                Some("array") => formula
                    .reference
                    .as_deref()
                    .and_then(|r| Range::from_a1(r).ok()),
                _ => None,
            };
            CellContent::Formula {
                text: formula.text,
                array_ref,
            }
        }
        _ => cached_value(&state, shared_strings)?,
    };

    rows.entry(at.row).or_default().cells.insert(
        at.col,
        ParsedCell {
            style: state.style,
            content,
        },
    );
    Ok(())
}

fn cached_value(state: &CellState, shared_strings: &[String]) -> Result<CellContent, XlsxError> {
    let value = state.value.as_str();
    Ok(match state.cell_type.as_deref() {
        Some("s") => {
            let idx: usize = value.trim().parse().map_err(|_| {
                XlsxError::Invalid(format!("invalid shared string index {value:?}"))
            })?;
            let text = shared_strings.get(idx).ok_or_else(|| {
                XlsxError::Invalid(format!("shared string index {idx} out of range"))
            })?;
            CellContent::Text(text.clone())
        }
        Some("inlineStr") => CellContent::Text(state.inline.clone().unwrap_or_default()),
        Some("str") => CellContent::Text(value.to_string()),
        Some("b") => CellContent::Bool(value.trim() == "1"),
        Some("e") => CellContent::Error(value.to_string()),
        Some("d") => CellContent::Date(value.to_string()),
        _ if value.trim().is_empty() => CellContent::Empty,
        _ => match value.trim().parse::<f64>() {
            Ok(n) => CellContent::Number(n),
            Err(_) => CellContent::Text(value.to_string()),
        },
    })
}

/// Give every shared-formula follower the master's text moved by its offset from the master.
fn resolve_shared_formulas(shared: SharedFormulas, rows: &mut BTreeMap<u32, ParsedRow>) {
    for (at, si) in shared.followers {
        let Some((master_at, text)) = shared.masters.get(&si) else {
            log::warn!("shared formula {si} at {at} has no master cell; leaving it empty");
            continue;
        };
        let relocated = relocate_formula(
            text,
            i64::from(at.row) - i64::from(master_at.row),
            i64::from(at.col) - i64::from(master_at.col),
        );
        if let Some(cell) = rows
            .get_mut(&at.row)
            .and_then(|row| row.cells.get_mut(&at.col))
        {
            cell.content = CellContent::formula(relocated);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    const SHEET_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships">
  <dimension ref="A1:D4"/>
  <sheetViews><sheetView tabSelected="1" workbookViewId="0"/></sheetViews>
  <cols><col min="1" max="1" width="24" customWidth="1"/></cols>
  <sheetData>
    <row r="1" spans="1:4" ht="30" customHeight="1">
      <c r="A1" s="1" t="s"><v>0</v></c>
      <c r="D1" s="2"/>
    </row>
    <row r="3">
      <c r="A3" t="inlineStr"><is><t>{{species}}</t></is></c>
      <c r="B3"><v>2.5</v></c>
      <c r="C3" t="b"><v>1</v></c>
      <c r="D3"><f t="shared" ref="D3:D4" si="0">B3*2</f><v>5</v></c>
    </row>
    <row r="4">
      <c r="D4"><f t="shared" si="0"/><v>0</v></c>
    </row>
  </sheetData>
  <mergeCells count="1"><mergeCell ref="A1:C1"/></mergeCells>
  <hyperlinks><hyperlink ref="A1" r:id="rId9"/></hyperlinks>
  <pageMargins left="0.7" right="0.7" top="0.75" bottom="0.75" header="0.3" footer="0.3"/>
  <pageSetup orientation="landscape" r:id="rId2"/>
  <drawing r:id="rId3"/>
</worksheet>"#;

    #[test]
    fn parses_rows_cells_and_merges() {
        let sst = vec!["Daily feeding log".to_string()];
        let parsed = parse_worksheet(SHEET_XML.as_bytes(), &sst).unwrap();

        let first = &parsed.rows[&0];
        assert_eq!(
            first.attrs,
            vec![
                ("ht".to_string(), "30".to_string()),
                ("customHeight".to_string(), "1".to_string())
            ]
        );
        assert_eq!(
            first.cells[&0],
            ParsedCell {
                style: Some(1),
                content: CellContent::Text("Daily feeding log".into())
            }
        );
        assert_eq!(first.cells[&3].content, CellContent::Empty);
        assert_eq!(first.cells[&3].style, Some(2));

        let third = &parsed.rows[&2];
        assert_eq!(third.cells[&0].content, CellContent::Text("{{species}}".into()));
        assert_eq!(third.cells[&1].content, CellContent::Number(2.5));
        assert_eq!(third.cells[&2].content, CellContent::Bool(true));
        assert_eq!(third.cells[&3].content, CellContent::formula("B3*2"));
        assert_eq!(parsed.rows[&3].cells[&3].content, CellContent::formula("B4*2"));

        assert_eq!(parsed.merges, vec![Range::from_a1("A1:C1").unwrap()]);
    }

    #[test]
    fn skeleton_keeps_layout_and_drops_range_bound_parts() {
        let parsed = parse_worksheet(SHEET_XML.as_bytes(), &["x".to_string()]).unwrap();
        let skeleton = &parsed.skeleton;

        assert!(skeleton.contains("<sheetData/>"), "{skeleton}");
        assert!(skeleton.contains(r#"<col min="1" max="1" width="24" customWidth="1"/>"#));
        assert!(skeleton.contains(r#"<pageSetup orientation="landscape"/>"#), "{skeleton}");
        assert!(skeleton.contains("<pageMargins"));
        for dropped in ["<dimension", "<mergeCells", "<hyperlinks", "<drawing", "<row", "rId"] {
            assert!(!skeleton.contains(dropped), "{dropped} survived: {skeleton}");
        }
        roxmltree::Document::parse(skeleton).expect("skeleton is well-formed");
    }

    #[test]
    fn shared_formulas_sit_beside_cached_value_cells() {
        let xml = r#"<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData>
<row r="2"><c r="A2"><v>4</v></c><c r="B2"><f t="shared" ref="B2:B3" si="3">A2*10</f><v>40</v></c><c r="C2"><f t="shared"/><v>7</v></c><c r="D2" t="str"><f t="shared"/><v>Okapi</v></c></row>
<row r="3"><c r="A3"><v>5</v></c><c r="B3"><f t="shared" si="3"/><v>50</v></c></row>
</sheetData></worksheet>"#;
        let parsed = parse_worksheet(xml.as_bytes(), &[]).unwrap();

        let second = &parsed.rows[&1];
        assert_eq!(second.cells[&0].content, CellContent::Number(4.0));
        assert_eq!(second.cells[&1].content, CellContent::formula("A2*10"));
        assert_eq!(second.cells[&2].content, CellContent::Number(7.0));
        assert_eq!(second.cells[&3].content, CellContent::Text("Okapi".into()));
        assert_eq!(parsed.rows[&2].cells[&1].content, CellContent::formula("A3*10"));
    }
}

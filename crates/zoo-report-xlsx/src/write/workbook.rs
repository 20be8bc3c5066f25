use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::{Reader, Writer};

use zoo_report_model::rename_sheet_references;

use crate::openxml::NS_RELATIONSHIPS;
use crate::template::CarriedName;
use crate::workbook::DefinedName;

use super::worksheet::{element_prefix, prefixed_tag};
use super::WriteError;

/// Workbook children that point at template parts which are not carried into reports.
fn is_dropped_element(name: &[u8]) -> bool {
    matches!(
        name,
        b"externalReferences" | b"pivotCaches" | b"extLst" | b"AlternateContent"
    )
}

/// Workbook children that must follow `<calcPr>`.
fn follows_calc_pr(name: &[u8]) -> bool {
    matches!(
        name,
        b"oleSize"
            | b"customWorkbookViews"
            | b"pivotCaches"
            | b"smartTagPr"
            | b"smartTagTypes"
            | b"webPublishing"
            | b"fileRecoveryPr"
            | b"webPublishObjects"
            | b"extLst"
    )
}

/// Expand the carried template names for the report's sheets.
///
/// Sheet-scoped names are repeated for every output sheet with that sheet's `localSheetId`;
/// workbook-scoped names land on the first sheet. References to the template sheet are
/// rewritten to the output sheet's name.
pub(super) fn output_defined_names(
    template_sheet: &str,
    carried: &[CarriedName],
    sheet_names: &[&str],
) -> Vec<DefinedName> {
    let mut names = Vec::new();
    for name in carried {
        let targets: Vec<(Option<u32>, &str)> = if name.sheet_scoped {
            sheet_names
                .iter()
                .enumerate()
                .map(|(idx, sheet)| (Some(idx as u32), *sheet))
                .collect()
        } else {
            sheet_names.first().map(|sheet| (None, *sheet)).into_iter().collect()
        };
        for (local_sheet_id, sheet) in targets {
            names.push(DefinedName {
                name: name.name.clone(),
                local_sheet_id,
                hidden: name.hidden,
                refers_to: rename_sheet_references(&name.refers_to, template_sheet, sheet),
            });
        }
    }
    names
}

/// Rewrite the template's `workbook.xml` for a report with the given sheet names.
///
/// Sheets are numbered `1..=n` with relationship ids `rId1..rIdn`. The template's
/// `<definedNames>` is replaced by `defined_names`. Workbook properties, views and calculation
/// settings are kept; `calcPr/@fullCalcOnLoad` is forced on because formula cells are written
/// without cached values.
pub(super) fn patch_workbook_xml(
    original: &[u8],
    sheet_names: &[&str],
    defined_names: &[DefinedName],
) -> Result<Vec<u8>, WriteError> {
    let mut reader = Reader::from_reader(original);
    reader.config_mut().trim_text(false);
    let mut writer = Writer::new(Vec::with_capacity(original.len() + sheet_names.len() * 64));
    let mut buf = Vec::new();

    let mut prefix: Option<String> = None;
    let mut depth = 0usize;
    let mut skip_depth = 0usize;
    let mut saw_calc_pr = false;
    let mut wrote_names = false;

    loop {
        let event = reader.read_event_into(&mut buf)?;
        match event {
            Event::Eof => break,
            _ if skip_depth > 0 => match event {
                Event::Start(_) => skip_depth += 1,
                Event::End(_) => skip_depth -= 1,
                _ => {}
            },
            Event::Start(ref e) if depth == 0 && e.local_name().as_ref() == b"workbook" => {
                prefix = element_prefix(e.name().as_ref());
                depth = 1;
                writer.write_event(Event::Start(with_relationships_namespace(e)?))?;
            }
            Event::Start(ref e) | Event::Empty(ref e) if depth == 1 => {
                let local = e.local_name();
                let local = local.as_ref();
                let is_start = matches!(event, Event::Start(_));

                let names_due =
                    local == b"definedNames" || local == b"calcPr" || follows_calc_pr(local);
                if !wrote_names && names_due {
                    write_defined_names(&mut writer, defined_names, prefix.as_deref())?;
                    wrote_names = true;
                }
                if !saw_calc_pr && follows_calc_pr(local) {
                    write_calc_pr(&mut writer, None, prefix.as_deref())?;
                    saw_calc_pr = true;
                }

                if local == b"sheets" {
                    write_sheets(&mut writer, sheet_names, prefix.as_deref())?;
                    if is_start {
                        skip_depth = 1;
                    }
                } else if local == b"calcPr" {
                    write_calc_pr(&mut writer, Some(e), prefix.as_deref())?;
                    saw_calc_pr = true;
                    if is_start {
                        skip_depth = 1;
                    }
                } else if local == b"definedNames" || is_dropped_element(local) {
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
                if e.local_name().as_ref() == b"workbookView" =>
            {
                // Tab indexes refer to template sheets.
                let mut view = BytesStart::new(String::from_utf8(e.name().as_ref().to_vec())?);
                for attr in e.attributes() {
                    let attr = attr?;
                    if !matches!(attr.key.as_ref(), b"activeTab" | b"firstSheet") {
                        view.push_attribute(attr);
                    }
                }
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
                if depth == 1 && !wrote_names {
                    write_defined_names(&mut writer, defined_names, prefix.as_deref())?;
                    wrote_names = true;
                }
                if depth == 1 && !saw_calc_pr {
                    write_calc_pr(&mut writer, None, prefix.as_deref())?;
                    saw_calc_pr = true;
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

fn with_relationships_namespace(e: &BytesStart<'_>) -> Result<BytesStart<'static>, WriteError> {
    let mut has_r = false;
    for attr in e.attributes() {
        if attr?.key.as_ref() == b"xmlns:r" {
            has_r = true;
        }
    }
    let mut root = e.to_owned().into_owned();
    if !has_r {
        root.push_attribute(("xmlns:r", NS_RELATIONSHIPS));
    }
    Ok(root)
}

fn write_sheets(
    writer: &mut Writer<Vec<u8>>,
    sheet_names: &[&str],
    prefix: Option<&str>,
) -> Result<(), WriteError> {
    let sheets_tag = prefixed_tag(prefix, "sheets");
    let sheet_tag = prefixed_tag(prefix, "sheet");
    let out = writer.get_mut();
    out.extend_from_slice(format!("<{sheets_tag}>").as_bytes());
    for (idx, name) in sheet_names.iter().enumerate() {
        let n = idx + 1;
        out.extend_from_slice(
            format!(
                r#"<{sheet_tag} name="{}" sheetId="{n}" r:id="rId{n}"/>"#,
                escape(*name)
            )
            .as_bytes(),
        );
    }
    out.extend_from_slice(format!("</{sheets_tag}>").as_bytes());
    Ok(())
}

fn write_defined_names(
    writer: &mut Writer<Vec<u8>>,
    names: &[DefinedName],
    prefix: Option<&str>,
) -> Result<(), WriteError> {
    if names.is_empty() {
        return Ok(());
    }
    let names_tag = prefixed_tag(prefix, "definedNames");
    let name_tag = prefixed_tag(prefix, "definedName");
    let out = writer.get_mut();
    out.extend_from_slice(format!("<{names_tag}>").as_bytes());
    for name in names {
        let mut open = format!(r#"<{name_tag} name="{}""#, escape(name.name.as_str()));
        if let Some(id) = name.local_sheet_id {
            open.push_str(&format!(r#" localSheetId="{id}""#));
        }
        if name.hidden {
            open.push_str(r#" hidden="1""#);
        }
        out.extend_from_slice(
            format!("{open}>{}</{name_tag}>", escape(name.refers_to.as_str())).as_bytes(),
        );
    }
    out.extend_from_slice(format!("</{names_tag}>").as_bytes());
    Ok(())
}

fn write_calc_pr(
    writer: &mut Writer<Vec<u8>>,
    original: Option<&BytesStart<'_>>,
    prefix: Option<&str>,
) -> Result<(), WriteError> {
    let tag = prefixed_tag(prefix, "calcPr");
    let mut calc_pr = BytesStart::new(tag.as_str());
    if let Some(original) = original {
        for attr in original.attributes() {
            let attr = attr?;
            if attr.key.as_ref() == b"fullCalcOnLoad" {
                continue;
            }
            calc_pr.push_attribute(attr);
        }
    }
    calc_pr.push_attribute(("fullCalcOnLoad", "1"));
    writer.write_event(Event::Empty(calc_pr))?;
    Ok(())
}

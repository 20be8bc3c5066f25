use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::openxml::{
    find_related_part, local_name, parse_relationships, part_relationships, resolve_target,
    REL_TYPE_OFFICE_DOCUMENT, REL_TYPE_WORKSHEET, WORKBOOK_PART,
};
use crate::package::{XlsxError, XlsxPackage};

/// A `<sheet>` entry of `xl/workbook.xml`, with its worksheet part resolved.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkbookSheet {
    pub name: String,
    pub sheet_id: u32,
    pub rel_id: String,
    /// Worksheet part name, `None` for chartsheets/dialogsheets or dangling relationships.
    pub part: Option<String>,
}

/// A `<definedName>` entry of `xl/workbook.xml`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DefinedName {
    pub name: String,
    /// 0-based index into the workbook's sheet list for sheet-scoped names.
    pub local_sheet_id: Option<u32>,
    pub hidden: bool,
    /// The name's formula text without a leading `=`.
    pub refers_to: String,
}

impl DefinedName {
    /// Built-in names (`_xlnm.Print_Area`, `_xlnm._FilterDatabase`, ...).
    pub fn is_builtin(&self) -> bool {
        self.name
            .get(..6)
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case("_xlnm."))
    }
}

#[derive(Clone, Debug)]
pub struct WorkbookInfo {
    /// Part name of the workbook itself (normally `xl/workbook.xml`).
    pub part: String,
    pub sheets: Vec<WorkbookSheet>,
    pub defined_names: Vec<DefinedName>,
}

impl WorkbookInfo {
    /// Find a sheet by name: exact match first, then Excel's case-insensitive match.
    pub fn sheet_index(&self, name: &str) -> Option<usize> {
        self.sheets.iter().position(|s| s.name == name).or_else(|| {
            self.sheets
                .iter()
                .position(|s| zoo_report_model::sheet_name_eq_case_insensitive(&s.name, name))
        })
    }
}

/// Locate the workbook part through the package root relationships.
pub fn workbook_part_name(package: &XlsxPackage) -> Result<String, XlsxError> {
    if let Some(rels) = package.part("_rels/.rels") {
        if let Some(rel) = parse_relationships(rels)?
            .into_iter()
            .find(|rel| rel.type_uri == REL_TYPE_OFFICE_DOCUMENT && !rel.is_external())
        {
            return Ok(resolve_target("", &rel.target));
        }
    }
    Ok(WORKBOOK_PART.to_string())
}

pub fn read_workbook(package: &XlsxPackage) -> Result<WorkbookInfo, XlsxError> {
    let part = workbook_part_name(package)?;
    let xml = package
        .part(&part)
        .ok_or_else(|| XlsxError::MissingPart(part.clone()))?;
    let (mut sheets, defined_names) = parse_workbook_xml(xml)?;

    let rels = part_relationships(package, &part)?;
    for sheet in &mut sheets {
        sheet.part = rels
            .iter()
            .find(|rel| rel.id == sheet.rel_id && rel.type_uri == REL_TYPE_WORKSHEET)
            .map(|rel| resolve_target(&part, &rel.target));
    }

    Ok(WorkbookInfo {
        part,
        sheets,
        defined_names,
    })
}

/// Resolve a workbook-level part such as styles or the theme.
pub fn workbook_related_part(
    package: &XlsxPackage,
    workbook: &WorkbookInfo,
    type_uri: &str,
) -> Result<Option<String>, XlsxError> {
    find_related_part(package, &workbook.part, type_uri)
}

pub fn parse_workbook_xml(xml: &[u8]) -> Result<(Vec<WorkbookSheet>, Vec<DefinedName>), XlsxError> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(false);

    let mut buf = Vec::new();
    let mut sheets = Vec::new();
    let mut defined_names = Vec::new();
    let mut current_defined: Option<DefinedName> = None;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Eof => break,
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"sheet" => {
                sheets.push(parse_sheet_element(&e)?);
            }
            Event::Start(e) if e.local_name().as_ref() == b"definedName" => {
                current_defined = parse_defined_name_element(&e)?;
            }
            Event::Empty(e) if e.local_name().as_ref() == b"definedName" => {
                if let Some(dn) = parse_defined_name_element(&e)? {
                    defined_names.push(dn);
                }
            }
            Event::Text(e) => {
                if let Some(dn) = current_defined.as_mut() {
                    dn.refers_to.push_str(&e.unescape()?);
                }
            }
            Event::CData(e) => {
                if let Some(dn) = current_defined.as_mut() {
                    dn.refers_to.push_str(std::str::from_utf8(e.as_ref())?);
                }
            }
            Event::End(e) if e.local_name().as_ref() == b"definedName" => {
                if let Some(mut dn) = current_defined.take() {
                    let trimmed = dn.refers_to.trim();
                    dn.refers_to = trimmed.strip_prefix('=').unwrap_or(trimmed).to_string();
                    defined_names.push(dn);
                }
            }
            _ => {}
        }
        buf.clear();
    }

    Ok((sheets, defined_names))
}

fn parse_sheet_element(e: &BytesStart<'_>) -> Result<WorkbookSheet, XlsxError> {
    let mut name = None;
    let mut sheet_id = None;
    let mut rel_id = None;

    for attr in e.attributes() {
        let attr = attr?;
        let key = attr.key.as_ref();
        match key {
            b"name" => name = Some(attr.unescape_value()?.into_owned()),
            b"sheetId" => {
                let v = attr.unescape_value()?;
                sheet_id = Some(v.trim().parse::<u32>().map_err(|_| XlsxError::InvalidSheetId)?);
            }
            _ if local_name(key) == b"id" => rel_id = Some(attr.unescape_value()?.into_owned()),
            _ => {}
        }
    }

    Ok(WorkbookSheet {
        name: name.ok_or(XlsxError::MissingAttr("name"))?,
        sheet_id: sheet_id.ok_or(XlsxError::MissingAttr("sheetId"))?,
        rel_id: rel_id.ok_or(XlsxError::MissingAttr("r:id"))?,
        part: None,
    })
}

fn parse_defined_name_element(e: &BytesStart<'_>) -> Result<Option<DefinedName>, XlsxError> {
    let mut name = None;
    let mut local_sheet_id = None;
    let mut hidden = false;
    for attr in e.attributes() {
        let attr = attr?;
        match attr.key.as_ref() {
            b"name" => name = Some(attr.unescape_value()?.into_owned()),
            b"localSheetId" => local_sheet_id = attr.unescape_value()?.trim().parse::<u32>().ok(),
            b"hidden" => {
                let v = attr.unescape_value()?;
                hidden = &*v == "1" || v.eq_ignore_ascii_case("true");
            }
            _ => {}
        }
    }
    Ok(name.map(|name| DefinedName {
        name,
        local_sheet_id,
        hidden,
        refers_to: String::new(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    const WORKBOOK_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships">
  <sheets>
    <sheet name="Animals" sheetId="1" r:id="rId1"/>
    <sheet name="Feed &amp; Care" sheetId="4" r:id="rId2"/>
  </sheets>
  <definedNames>
    <definedName name="_xlnm.Print_Area" localSheetId="0">Animals!$A$1:$F$20</definedName>
    <definedName name="Header">Animals!$A$1:$F$2</definedName>
    <definedName name="Row" localSheetId="1">'Feed &amp; Care'!$3:$3</definedName>
  </definedNames>
</workbook>"#;

    #[test]
    fn parses_sheets_and_defined_names() {
        let (sheets, names) = parse_workbook_xml(WORKBOOK_XML.as_bytes()).unwrap();
        assert_eq!(sheets.len(), 2);
        assert_eq!(sheets[1].name, "Feed & Care");
        assert_eq!(sheets[1].sheet_id, 4);
        assert_eq!(sheets[1].rel_id, "rId2");

        assert_eq!(names.len(), 3);
        assert!(names[0].is_builtin());
        assert_eq!(names[1].name, "Header");
        assert_eq!(names[1].local_sheet_id, None);
        assert_eq!(names[1].refers_to, "Animals!$A$1:$F$2");
        assert_eq!(names[2].local_sheet_id, Some(1));
        assert_eq!(names[2].refers_to, "'Feed & Care'!$3:$3");
    }

    #[test]
    fn missing_sheet_attributes_are_errors() {
        let xml = br#"<workbook><sheets><sheet name="A" r:id="rId1"/></sheets></workbook>"#;
        let err = parse_workbook_xml(xml).unwrap_err();
        assert!(matches!(err, XlsxError::MissingAttr("sheetId")), "{err:?}");
    }
}

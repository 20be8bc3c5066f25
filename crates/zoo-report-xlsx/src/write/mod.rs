//! Serializing a rendered [`Document`] into an `.xlsx` package.

mod workbook;
mod worksheet;

use std::collections::BTreeMap;
use std::fmt::Write as _;

use chrono::{DateTime, SecondsFormat, Utc};
use quick_xml::escape::escape;
use quick_xml::events::attributes::AttrError;
use serde::Deserialize;
use thiserror::Error;

use crate::openxml::{
    NS_PACKAGE_RELATIONSHIPS, REL_TYPE_CORE_PROPERTIES, REL_TYPE_OFFICE_DOCUMENT,
    REL_TYPE_SHARED_STRINGS, REL_TYPE_STYLES, REL_TYPE_THEME, REL_TYPE_WORKSHEET, WORKBOOK_PART,
};
use crate::package::{XlsxError, XlsxPackage};
use crate::render::Document;
use crate::shared_strings::SharedStringsBuilder;

const CT_WORKBOOK: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml";
const CT_WORKSHEET: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml";
const CT_STYLES: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.styles+xml";
const CT_THEME: &str = "application/vnd.openxmlformats-officedocument.theme+xml";
const CT_SHARED_STRINGS: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sharedStrings+xml";
const CT_CORE_PROPERTIES: &str = "application/vnd.openxmlformats-package.core-properties+xml";
const CT_RELATIONSHIPS: &str = "application/vnd.openxmlformats-package.relationships+xml";

const STYLES_PART: &str = "xl/styles.xml";
const THEME_PART: &str = "xl/theme/theme1.xml";
const SHARED_STRINGS_PART: &str = "xl/sharedStrings.xml";
const CORE_PROPERTIES_PART: &str = "docProps/core.xml";

#[derive(Debug, Error)]
pub enum WriteError {
    #[error(transparent)]
    Package(#[from] XlsxError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("xml error: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("xml attribute error: {0}")]
    XmlAttr(#[from] AttrError),
    #[error("utf-8 error: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// Document properties stamped into `docProps/core.xml`.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct WriteOptions {
    pub creator: String,
    /// Creation timestamp; the current time when unset. Fixing it makes output byte-stable.
    pub created: Option<DateTime<Utc>>,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            creator: "zoo-report".to_string(),
            created: None,
        }
    }
}

/// Assembles the parts of an output package from a [`Document`] and its template assets.
pub struct WorkbookBuilder<'a> {
    doc: &'a Document,
    options: WriteOptions,
}

impl<'a> WorkbookBuilder<'a> {
    pub fn new(doc: &'a Document) -> Self {
        Self {
            doc,
            options: WriteOptions::default(),
        }
    }

    pub fn options(mut self, options: WriteOptions) -> Self {
        self.options = options;
        self
    }

    pub fn build(&self) -> Result<XlsxPackage, WriteError> {
        let assets = &self.doc.assets;
        let mut parts = BTreeMap::new();
        let mut shared_strings = SharedStringsBuilder::new();

        let mut sheet_parts = Vec::with_capacity(self.doc.sheets.len());
        for (idx, sheet) in self.doc.sheets.iter().enumerate() {
            let part = format!("xl/worksheets/sheet{}.xml", idx + 1);
            let xml =
                worksheet::write_worksheet_xml(&assets.skeleton, sheet, idx == 0, &mut shared_strings)?;
            parts.insert(part.clone(), xml);
            sheet_parts.push(part);
        }

        let sheet_names: Vec<&str> = self.doc.sheets.iter().map(|sheet| sheet.name()).collect();
        let defined_names =
            workbook::output_defined_names(&assets.sheet_name, &assets.defined_names, &sheet_names);
        parts.insert(
            WORKBOOK_PART.to_string(),
            workbook::patch_workbook_xml(&assets.workbook_xml, &sheet_names, &defined_names)?,
        );

        let mut content_types = vec![
            (format!("/{WORKBOOK_PART}"), CT_WORKBOOK),
            (format!("/{CORE_PROPERTIES_PART}"), CT_CORE_PROPERTIES),
        ];
        let mut workbook_rels: Vec<(&str, String)> = sheet_parts
            .iter()
            .map(|part| (REL_TYPE_WORKSHEET, rels_target_from_part_path(part)))
            .collect();
        content_types.extend(
            sheet_parts
                .iter()
                .map(|part| (format!("/{part}"), CT_WORKSHEET)),
        );

        if let Some(styles) = &assets.styles_xml {
            parts.insert(STYLES_PART.to_string(), styles.clone());
            workbook_rels.push((REL_TYPE_STYLES, rels_target_from_part_path(STYLES_PART)));
            content_types.push((format!("/{STYLES_PART}"), CT_STYLES));
        }
        if let Some(theme) = &assets.theme_xml {
            parts.insert(THEME_PART.to_string(), theme.clone());
            workbook_rels.push((REL_TYPE_THEME, rels_target_from_part_path(THEME_PART)));
            content_types.push((format!("/{THEME_PART}"), CT_THEME));
        }
        parts.insert(
            SHARED_STRINGS_PART.to_string(),
            shared_strings.to_xml().into_bytes(),
        );
        workbook_rels.push((
            REL_TYPE_SHARED_STRINGS,
            rels_target_from_part_path(SHARED_STRINGS_PART),
        ));
        content_types.push((format!("/{SHARED_STRINGS_PART}"), CT_SHARED_STRINGS));

        parts.insert(
            "xl/_rels/workbook.xml.rels".to_string(),
            relationships_xml(&workbook_rels).into_bytes(),
        );
        parts.insert(
            "_rels/.rels".to_string(),
            relationships_xml(&[
                (REL_TYPE_OFFICE_DOCUMENT, WORKBOOK_PART.to_string()),
                (REL_TYPE_CORE_PROPERTIES, CORE_PROPERTIES_PART.to_string()),
            ])
            .into_bytes(),
        );
        parts.insert(
            CORE_PROPERTIES_PART.to_string(),
            core_properties_xml(&self.options).into_bytes(),
        );
        parts.insert(
            "[Content_Types].xml".to_string(),
            content_types_xml(&content_types).into_bytes(),
        );

        log::debug!(
            "built package with {} sheet(s), {} shared string(s)",
            sheet_parts.len(),
            shared_strings.len()
        );
        Ok(XlsxPackage::from_parts(parts))
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, WriteError> {
        Ok(self.build()?.write_to_bytes()?)
    }
}

fn rels_target_from_part_path(path: &str) -> String {
    // workbook.xml.rels is rooted at `xl/`, so targets are relative.
    path.strip_prefix("xl/").unwrap_or(path).to_string()
}

fn relationships_xml(relationships: &[(&str, String)]) -> String {
    let mut xml = String::new();
    xml.push_str(r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#);
    xml.push('\n');
    let _ = write!(xml, r#"<Relationships xmlns="{NS_PACKAGE_RELATIONSHIPS}">"#);
    for (idx, (type_uri, target)) in relationships.iter().enumerate() {
        let _ = write!(
            xml,
            r#"<Relationship Id="rId{}" Type="{type_uri}" Target="{}"/>"#,
            idx + 1,
            escape(target.as_str())
        );
    }
    xml.push_str("</Relationships>");
    xml
}

fn content_types_xml(overrides: &[(String, &str)]) -> String {
    let mut xml = String::new();
    xml.push_str(r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#);
    xml.push('\n');
    xml.push_str(r#"<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types">"#);
    let _ = write!(xml, r#"<Default Extension="rels" ContentType="{CT_RELATIONSHIPS}"/>"#);
    xml.push_str(r#"<Default Extension="xml" ContentType="application/xml"/>"#);
    for (part, content_type) in overrides {
        let _ = write!(
            xml,
            r#"<Override PartName="{}" ContentType="{content_type}"/>"#,
            escape(part.as_str())
        );
    }
    xml.push_str("</Types>");
    xml
}

fn core_properties_xml(options: &WriteOptions) -> String {
    let created = options
        .created
        .unwrap_or_else(Utc::now)
        .to_rfc3339_opts(SecondsFormat::Secs, true);
    let creator = escape(options.creator.as_str());

    let mut xml = String::new();
    xml.push_str(r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#);
    xml.push('\n');
    xml.push_str(
        r#"<cp:coreProperties xmlns:cp="http://schemas.openxmlformats.org/package/2006/metadata/core-properties" xmlns:dc="http://purl.org/dc/elements/1.1/" xmlns:dcterms="http://purl.org/dc/terms/" xmlns:dcmitype="http://purl.org/dc/dcmitype/" xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance">"#,
    );
    let _ = write!(
        xml,
        "<dc:creator>{creator}</dc:creator><cp:lastModifiedBy>{creator}</cp:lastModifiedBy>"
    );
    let _ = write!(
        xml,
        r#"<dcterms:created xsi:type="dcterms:W3CDTF">{created}</dcterms:created><dcterms:modified xsi:type="dcterms:W3CDTF">{created}</dcterms:modified>"#
    );
    xml.push_str("</cp:coreProperties>");
    xml
}

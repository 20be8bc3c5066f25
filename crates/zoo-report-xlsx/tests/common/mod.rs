#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use rust_xlsxwriter::{Format, Workbook};
use zoo_report_xlsx::{
    parse_shared_strings, read_workbook, BlockCatalog, CatalogCache, MemoryTemplateStore,
    TemplateLoader, XlsxPackage,
};

pub const TEMPLATE_ID: &str = "feeding-log";
pub const SHEET: &str = "Zoo";

/// The feeding-log template used across the integration tests.
///
/// Sheet `Zoo`:
/// - `Header` (rows 1-2): a merged title `Feeding log: {{site}}` over A1:D1, column captions.
/// - `Row` (row 3): `{{species}}`, `{{qty}}`, `{{price}}` and `=B3*C3`.
/// - `Footer` (row 4): `Total for {{site}}` and `=SUM(D3:D3)`.
///
/// Sheet `Notes` has cells but no block names. Sheet `Blank` is empty.
pub fn feeding_log_template() -> Vec<u8> {
    let mut workbook = Workbook::new();
    let bold = Format::new().set_bold();
    let money = Format::new().set_num_format("0.00");

    let zoo = workbook.add_worksheet();
    zoo.set_name(SHEET).unwrap();
    zoo.set_column_width(0, 24).unwrap();
    zoo.merge_range(0, 0, 0, 3, "Feeding log: {{site}}", &bold)
        .unwrap();
    zoo.set_row_height(0, 30).unwrap();
    for (col, caption) in ["Species", "Qty", "Price", "Total"].iter().enumerate() {
        zoo.write_string_with_format(1, col as u16, *caption, &bold)
            .unwrap();
    }
    zoo.write_string(2, 0, "{{species}}").unwrap();
    zoo.write_string(2, 1, "{{qty}}").unwrap();
    zoo.write_string_with_format(2, 2, "{{price}}", &money)
        .unwrap();
    zoo.write_formula_with_format(2, 3, "=B3*C3", &money)
        .unwrap();
    zoo.write_string_with_format(3, 0, "Total for {{site}}", &bold)
        .unwrap();
    zoo.write_formula_with_format(3, 3, "=SUM(D3:D3)", &money)
        .unwrap();

    let notes = workbook.add_worksheet();
    notes.set_name("Notes").unwrap();
    notes.write_string(1, 0, "Prepared by {{keeper}}").unwrap();
    notes.write_string(2, 1, "Checked").unwrap();

    let blank = workbook.add_worksheet();
    blank.set_name("Blank").unwrap();

    workbook.define_name("Header", "=Zoo!$A$1:$D$2").unwrap();
    workbook.define_name("Row", "=Zoo!$A$3:$D$3").unwrap();
    workbook.define_name("Footer", "=Zoo!$4:$4").unwrap();

    workbook.save_to_buffer().unwrap()
}

/// A template whose sheet `Pens` carries names besides its blocks.
///
/// - `Header` (row 1): `Pen report: {{site}}` and a base fee of 12 in B1.
/// - `Row` (row 2): `{{species}}`, `{{qty}}` and `=B2*Rate+Pens!$B$1`.
/// - `Rate` is the constant `0.15`; `Roster` points at sheet `Keepers`.
/// - `Pens` repeats row 1 when printed and has a print area of A1:C2.
pub fn pens_template() -> Vec<u8> {
    let mut workbook = Workbook::new();

    let pens = workbook.add_worksheet();
    pens.set_name("Pens").unwrap();
    pens.write_string(0, 0, "Pen report: {{site}}").unwrap();
    pens.write_number(0, 1, 12.0).unwrap();
    pens.write_string(1, 0, "{{species}}").unwrap();
    pens.write_string(1, 1, "{{qty}}").unwrap();
    pens.write_formula(1, 2, "=B2*Rate+Pens!$B$1").unwrap();
    pens.set_repeat_rows(0, 0).unwrap();
    pens.set_print_area(0, 0, 1, 2).unwrap();

    let keepers = workbook.add_worksheet();
    keepers.set_name("Keepers").unwrap();
    keepers.write_string(0, 0, "Ana").unwrap();

    workbook.define_name("Header", "=Pens!$A$1:$C$1").unwrap();
    workbook.define_name("Row", "=Pens!$A$2:$C$2").unwrap();
    workbook.define_name("Rate", "=0.15").unwrap();
    workbook.define_name("Roster", "=Keepers!$A$1:$A$5").unwrap();

    workbook.save_to_buffer().unwrap()
}

pub fn store_with(template: Vec<u8>) -> Arc<MemoryTemplateStore> {
    let store = Arc::new(MemoryTemplateStore::new());
    store.insert(TEMPLATE_ID, template);
    store
}

pub fn load_catalog(template: Vec<u8>, sheet: &str) -> BlockCatalog {
    TemplateLoader::new(store_with(template))
        .load(TEMPLATE_ID, sheet)
        .expect("template loads")
}

pub fn feeding_log_catalog() -> BlockCatalog {
    load_catalog(feeding_log_template(), SHEET)
}

pub fn feeding_log_cache() -> CatalogCache<Arc<MemoryTemplateStore>> {
    CatalogCache::new(TemplateLoader::new(store_with(feeding_log_template())))
}

/// A cell as found in a serialized worksheet.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct XmlCell {
    pub style: Option<u32>,
    /// `t` attribute.
    pub cell_type: Option<String>,
    /// `<v>` text, with shared strings resolved.
    pub value: Option<String>,
    pub formula: Option<String>,
}

/// Read-only view of an `.xlsx` file for assertions.
pub struct Book {
    pub package: XlsxPackage,
    pub sheet_names: Vec<String>,
    sheet_parts: Vec<String>,
    shared_strings: Vec<String>,
}

impl Book {
    pub fn open(bytes: &[u8]) -> Self {
        let package = XlsxPackage::from_bytes(bytes).expect("valid zip package");
        let workbook = read_workbook(&package).expect("workbook part");
        let shared_strings = package
            .part("xl/sharedStrings.xml")
            .map(|xml| parse_shared_strings(xml).expect("shared strings"))
            .unwrap_or_default();
        Self {
            sheet_names: workbook.sheets.iter().map(|s| s.name.clone()).collect(),
            sheet_parts: workbook
                .sheets
                .iter()
                .map(|s| s.part.clone().expect("worksheet part"))
                .collect(),
            shared_strings,
            package,
        }
    }

    pub fn part_text(&self, name: &str) -> String {
        String::from_utf8(self.package.part(name).expect(name).to_vec()).unwrap()
    }

    pub fn sheet_xml(&self, idx: usize) -> String {
        self.part_text(&self.sheet_parts[idx])
    }

    pub fn cells(&self, idx: usize) -> BTreeMap<String, XmlCell> {
        let xml = self.sheet_xml(idx);
        let doc = roxmltree::Document::parse(&xml).expect("well-formed worksheet");
        let mut cells = BTreeMap::new();
        for c in doc.descendants().filter(|n| n.tag_name().name() == "c") {
            let child_text = |name: &str| {
                c.children()
                    .find(|n| n.tag_name().name() == name)
                    .map(|n| n.text().unwrap_or_default().to_string())
            };
            let cell_type = c.attribute("t").map(str::to_string);
            let mut value = child_text("v");
            if cell_type.as_deref() == Some("s") {
                value = value.map(|idx| self.shared_strings[idx.parse::<usize>().unwrap()].clone());
            }
            cells.insert(
                c.attribute("r").expect("cell ref").to_string(),
                XmlCell {
                    style: c.attribute("s").map(|s| s.parse().unwrap()),
                    cell_type,
                    value,
                    formula: child_text("f"),
                },
            );
        }
        cells
    }

    /// Displayed text of a cell: the resolved value, or `=formula`.
    pub fn text(&self, idx: usize, a1: &str) -> Option<String> {
        let cell = self.cells(idx).remove(a1)?;
        match cell.formula {
            Some(formula) => Some(format!("={formula}")),
            None => cell.value,
        }
    }

    pub fn merges(&self, idx: usize) -> Vec<String> {
        let xml = self.sheet_xml(idx);
        let doc = roxmltree::Document::parse(&xml).expect("well-formed worksheet");
        doc.descendants()
            .filter(|n| n.tag_name().name() == "mergeCell")
            .filter_map(|n| n.attribute("ref").map(str::to_string))
            .collect()
    }

    /// 1-based row numbers present in `<sheetData>`.
    pub fn row_numbers(&self, idx: usize) -> Vec<u32> {
        let xml = self.sheet_xml(idx);
        let doc = roxmltree::Document::parse(&xml).expect("well-formed worksheet");
        doc.descendants()
            .filter(|n| n.tag_name().name() == "row")
            .filter_map(|n| n.attribute("r").and_then(|r| r.parse().ok()))
            .collect()
    }
}

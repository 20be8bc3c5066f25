mod common;

use chrono::{TimeZone, Utc};
use pretty_assertions::assert_eq;
use zoo_report_xlsx::{
    render, render_report, Document, RenderInstruction, RenderOptions, ReportError,
    ReportErrorKind, WriteOptions,
};

use common::{
    feeding_log_cache, feeding_log_catalog, feeding_log_template, load_catalog, pens_template, Book,
    SHEET, TEMPLATE_ID,
};

fn row(species: &str, qty: f64, price: f64) -> RenderInstruction {
    RenderInstruction::new("Row")
        .with("species", species)
        .with("qty", qty)
        .with("price", price)
}

fn feeding_report() -> Document {
    render(
        &feeding_log_catalog(),
        vec![
            RenderInstruction::new("Header").with("site", "North"),
            row("Okapi", 2.0, 100.0),
            row("Tapir", 3.0, 40.5),
            RenderInstruction::new("Footer").with("site", "North").on_written(|ctx| {
                let last = ctx.block_last_row();
                ctx.set_formula_a1(&format!("D{last}"), &format!("SUM(D3:D{})", last - 1))?;
                Ok(())
            }),
            RenderInstruction::new_sheet("Aviary"),
            row("Macaw", 4.0, 12.5),
        ],
    )
    .unwrap()
}

fn fixed_options() -> WriteOptions {
    WriteOptions {
        creator: "Keeper".to_string(),
        created: Some(Utc.with_ymd_and_hms(2024, 5, 1, 8, 30, 0).unwrap()),
    }
}

#[test]
fn output_lists_rendered_sheets_in_order() {
    let book = Book::open(&feeding_report().serialize().unwrap());
    assert_eq!(book.sheet_names, vec!["Zoo", "Aviary"]);

    let workbook = book.part_text("xl/workbook.xml");
    let doc = roxmltree::Document::parse(&workbook).unwrap();
    let ids: Vec<&str> = doc
        .descendants()
        .filter(|n| n.tag_name().name() == "sheet")
        .filter_map(|n| n.attribute("sheetId"))
        .collect();
    assert_eq!(ids, vec!["1", "2"]);

    let content_types = book.part_text("[Content_Types].xml");
    assert!(content_types.contains(r#"PartName="/xl/worksheets/sheet2.xml""#));
}

#[test]
fn workbook_drops_block_names_and_recalculates_on_load() {
    let book = Book::open(&feeding_report().serialize().unwrap());
    let workbook = book.part_text("xl/workbook.xml");
    for block in ["Header", "Row", "Footer"] {
        assert!(!workbook.contains(&format!(r#"name="{block}""#)), "{workbook}");
    }

    let doc = roxmltree::Document::parse(&workbook).unwrap();
    let calc_pr = doc
        .descendants()
        .find(|n| n.tag_name().name() == "calcPr")
        .expect("calcPr");
    assert_eq!(calc_pr.attribute("fullCalcOnLoad"), Some("1"));
}

#[test]
fn non_block_names_survive_with_per_sheet_scopes() {
    let catalog = load_catalog(pens_template(), "Pens");
    let doc = render(
        &catalog,
        vec![
            RenderInstruction::new("Header").with("site", "North"),
            RenderInstruction::new("Row").with("species", "Okapi").with("qty", 2.0),
            RenderInstruction::new_sheet("Bird House"),
            RenderInstruction::new("Header").with("site", "South"),
            RenderInstruction::new("Row").with("species", "Owl").with("qty", 4.0),
        ],
    )
    .unwrap();
    let book = Book::open(&doc.serialize().unwrap());
    assert_eq!(book.sheet_names, vec!["Pens", "Bird House"]);

    let workbook = zoo_report_xlsx::read_workbook(&book.package).unwrap();
    let mut names: Vec<(String, Option<u32>, String)> = workbook
        .defined_names
        .iter()
        .map(|n| (n.name.clone(), n.local_sheet_id, n.refers_to.clone()))
        .collect();
    names.sort();
    assert_eq!(
        names,
        vec![
            ("Rate".to_string(), None, "0.15".to_string()),
            ("_xlnm.Print_Area".to_string(), Some(0), "Pens!$A$1:$C$2".to_string()),
            ("_xlnm.Print_Area".to_string(), Some(1), "'Bird House'!$A$1:$C$2".to_string()),
            ("_xlnm.Print_Titles".to_string(), Some(0), "Pens!$1:$1".to_string()),
            ("_xlnm.Print_Titles".to_string(), Some(1), "'Bird House'!$1:$1".to_string()),
        ]
    );

    assert_eq!(book.text(0, "C2").as_deref(), Some("=B2*Rate+Pens!$B$1"));
    assert_eq!(book.text(1, "C2").as_deref(), Some("=B2*Rate+'Bird House'!$B$1"));
    roxmltree::Document::parse(&book.part_text("xl/workbook.xml")).expect("well-formed workbook");
}

#[test]
fn cells_keep_values_formulas_and_template_styles() {
    let template = Book::open(&feeding_log_template());
    let book = Book::open(&feeding_report().serialize().unwrap());

    assert_eq!(book.text(0, "A1").as_deref(), Some("Feeding log: North"));
    assert_eq!(book.text(0, "C2").as_deref(), Some("Price"));
    assert_eq!(book.text(0, "A4").as_deref(), Some("Tapir"));
    assert_eq!(book.text(0, "C4").as_deref(), Some("40.5"));
    assert_eq!(book.text(0, "D4").as_deref(), Some("=B4*C4"));
    assert_eq!(book.text(0, "A5").as_deref(), Some("Total for North"));
    assert_eq!(book.text(0, "D5").as_deref(), Some("=SUM(D3:D4)"));
    assert_eq!(book.text(1, "A1").as_deref(), Some("Macaw"));
    assert_eq!(book.text(1, "D1").as_deref(), Some("=B1*C1"));

    let cells = book.cells(0);
    assert_eq!(cells["A1"].cell_type.as_deref(), Some("s"));
    assert_eq!(cells["B3"].cell_type, None);
    assert_eq!(cells["D4"].value, None, "formulas carry no cached value");

    let template_cells = template.cells(0);
    assert_eq!(cells["D4"].style, template_cells["D3"].style);
    assert_eq!(cells["A5"].style, template_cells["A4"].style);
    assert_eq!(book.cells(1)["C1"].style, template_cells["C3"].style);

    assert_eq!(
        book.package.part("xl/styles.xml"),
        template.package.part("xl/styles.xml")
    );
    assert_eq!(
        book.package.part("xl/theme/theme1.xml"),
        template.package.part("xl/theme/theme1.xml")
    );
}

#[test]
fn rows_merges_and_layout_follow_the_blocks() {
    let book = Book::open(&feeding_report().serialize().unwrap());
    assert_eq!(book.row_numbers(0), vec![1, 2, 3, 4, 5]);
    assert_eq!(book.row_numbers(1), vec![1]);
    assert_eq!(book.merges(0), vec!["A1:D1"]);
    assert!(book.merges(1).is_empty());

    let xml = book.sheet_xml(0);
    let doc = roxmltree::Document::parse(&xml).unwrap();
    let title_row = doc
        .descendants()
        .find(|n| n.tag_name().name() == "row" && n.attribute("r") == Some("1"))
        .unwrap();
    assert_eq!(title_row.attribute("ht"), Some("30"));
    let dimension = doc
        .descendants()
        .find(|n| n.tag_name().name() == "dimension")
        .unwrap();
    assert_eq!(dimension.attribute("ref"), Some("A1:D5"));
    assert!(xml.contains("<cols>"), "column widths come from the template sheet");
}

#[test]
fn only_the_first_sheet_is_selected() {
    let book = Book::open(&feeding_report().serialize().unwrap());
    assert!(book.sheet_xml(0).contains("tabSelected"));
    assert!(!book.sheet_xml(1).contains("tabSelected"));
}

#[test]
fn empty_render_still_opens() {
    let doc = render(&feeding_log_catalog(), Vec::new()).unwrap();
    let book = Book::open(&doc.serialize().unwrap());
    assert_eq!(book.sheet_names, vec!["Zoo"]);
    assert!(book.row_numbers(0).is_empty());
    assert!(book.merges(0).is_empty());
    assert!(book.sheet_xml(0).contains(r#"<dimension ref="A1"/>"#));
}

#[test]
fn fixed_timestamp_gives_identical_bytes() {
    let first = feeding_report().serialize_with(&fixed_options()).unwrap();
    let second = feeding_report().serialize_with(&fixed_options()).unwrap();
    assert_eq!(first, second);

    let core = Book::open(&first).part_text("docProps/core.xml");
    assert!(core.contains(">2024-05-01T08:30:00Z</dcterms:created>"), "{core}");
    assert!(core.contains("<dc:creator>Keeper</dc:creator>"), "{core}");
}

#[test]
fn render_report_runs_the_whole_pipeline() {
    let cache = feeding_log_cache();
    let bytes = render_report(
        &cache,
        TEMPLATE_ID,
        SHEET,
        vec![
            RenderInstruction::new("Header").with("site", "South"),
            row("Okapi", 1.0, 10.0),
        ],
        &RenderOptions::default(),
    )
    .unwrap();
    let book = Book::open(&bytes);
    assert_eq!(book.text(0, "A1").as_deref(), Some("Feeding log: South"));
    assert_eq!(book.row_numbers(0), vec![1, 2, 3]);
    assert_eq!(cache.len(), 1);
}

#[test]
fn render_report_classifies_failures() {
    let cache = feeding_log_cache();
    let missing = render_report(&cache, "census", SHEET, Vec::new(), &RenderOptions::default())
        .unwrap_err();
    assert!(matches!(missing, ReportError::Template(_)));
    assert_eq!(missing.kind(), ReportErrorKind::ServerFault);

    let too_long = render_report(
        &cache,
        TEMPLATE_ID,
        SHEET,
        vec![RenderInstruction::new("Header")],
        &RenderOptions {
            first_row: zoo_report_xlsx::model::EXCEL_MAX_ROWS - 1,
            ..RenderOptions::default()
        },
    )
    .unwrap_err();
    assert_eq!(too_long.kind(), ReportErrorKind::ClientFault);
}

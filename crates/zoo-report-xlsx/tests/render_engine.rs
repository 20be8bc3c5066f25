mod common;

use pretty_assertions::assert_eq;
use zoo_report_xlsx::model::{CellRef, CellValue, Range};
use zoo_report_xlsx::{
    render, BlockContext, BoxError, CellContent, Document, MissingFieldPolicy, RenderEngine,
    RenderError, RenderInstruction, RenderOptions,
};

use common::feeding_log_catalog;

fn row(species: &str, qty: f64, price: f64) -> RenderInstruction {
    RenderInstruction::new("Row")
        .with("species", species)
        .with("qty", qty)
        .with("price", price)
}

fn content(doc: &Document, sheet: usize, a1: &str) -> Option<CellContent> {
    doc.sheets()[sheet]
        .content(CellRef::from_a1(a1).unwrap())
        .cloned()
}

/// Footer hook that sums every data row written since the header.
fn sum_rows_above(ctx: &mut BlockContext<'_>) -> Result<(), BoxError> {
    let last = ctx.block_last_row();
    ctx.set_formula_a1(&format!("D{last}"), &format!("SUM(D3:D{})", last - 1))?;
    Ok(())
}

#[test]
fn each_block_adds_exactly_its_row_count() {
    let catalog = feeding_log_catalog();
    let engine = RenderEngine::default();

    let header_only = engine
        .render(&catalog, vec![RenderInstruction::new("Header")])
        .unwrap();
    assert_eq!(header_only.sheets()[0].row_count(), 2);

    let with_rows = engine
        .render(
            &catalog,
            vec![
                RenderInstruction::new("Header"),
                row("Okapi", 2.0, 100.0),
                row("Tapir", 3.0, 40.0),
                RenderInstruction::new("Footer"),
            ],
        )
        .unwrap();
    assert_eq!(with_rows.sheets()[0].row_count(), 2 + 1 + 1 + 1);
}

#[test]
fn placeholders_take_the_type_of_their_value() {
    let catalog = feeding_log_catalog();
    let doc = render(
        &catalog,
        vec![
            RenderInstruction::new("Header").with("site", "North"),
            row("Okapi", 2.0, 100.5),
        ],
    )
    .unwrap();

    assert_eq!(content(&doc, 0, "A1"), Some(CellContent::Text("Feeding log: North".into())));
    assert_eq!(content(&doc, 0, "B2"), Some(CellContent::Text("Qty".into())));
    assert_eq!(content(&doc, 0, "A3"), Some(CellContent::Text("Okapi".into())));
    assert_eq!(content(&doc, 0, "B3"), Some(CellContent::Number(2.0)));
    assert_eq!(content(&doc, 0, "C3"), Some(CellContent::Number(100.5)));
    assert_eq!(content(&doc, 0, "D3"), Some(CellContent::formula("B3*C3")));
}

#[test]
fn styles_and_merges_follow_the_block() {
    let catalog = feeding_log_catalog();
    let doc = render(
        &catalog,
        vec![
            row("Okapi", 2.0, 100.0),
            RenderInstruction::new("Header").with("site", "East"),
        ],
    )
    .unwrap();
    let sheet = &doc.sheets()[0];

    let template_header = catalog.block("Header").unwrap();
    let template_style = template_header.rows()[1].cells[0].style;
    assert_eq!(sheet.cell(CellRef::from_a1("A3").unwrap()).unwrap().style, template_style);
    assert_eq!(sheet.merges(), &[Range::from_a1("A2:D2").unwrap()]);
}

#[test]
fn template_formulas_move_with_their_block() {
    let catalog = feeding_log_catalog();
    let doc = render(
        &catalog,
        vec![
            RenderInstruction::new("Header"),
            row("Okapi", 2.0, 100.0),
            row("Tapir", 3.0, 40.0),
            row("Zebra", 1.0, 75.0),
        ],
    )
    .unwrap();
    assert_eq!(content(&doc, 0, "D3"), Some(CellContent::formula("B3*C3")));
    assert_eq!(content(&doc, 0, "D4"), Some(CellContent::formula("B4*C4")));
    assert_eq!(content(&doc, 0, "D5"), Some(CellContent::formula("B5*C5")));
}

#[test]
fn footer_sum_covers_exactly_the_preceding_row() {
    let catalog = feeding_log_catalog();
    let doc = render(
        &catalog,
        vec![
            RenderInstruction::new("Row").with("qty", 2.0).with("price", 100),
            RenderInstruction::new("Footer").on_written(|ctx| {
                let last = ctx.block_last_row();
                ctx.set_formula_a1(&format!("D{last}"), &format!("SUM(D{0}:D{0})", last - 1))?;
                Ok(())
            }),
        ],
    )
    .unwrap();

    assert_eq!(content(&doc, 0, "B1"), Some(CellContent::Number(2.0)));
    assert_eq!(content(&doc, 0, "D2"), Some(CellContent::formula("SUM(D1:D1)")));
}

#[test]
fn block_updates_see_the_written_block() {
    let catalog = feeding_log_catalog();
    let doc = render(
        &catalog,
        vec![
            RenderInstruction::new("Header"),
            row("Okapi", 2.0, 100.0),
            row("Tapir", 3.0, 40.0),
            RenderInstruction::new("Footer").with("site", "West").on_written(|ctx| {
                assert_eq!(ctx.sheet_name(), "Zoo");
                assert_eq!(ctx.block_name(), "Footer");
                assert_eq!((ctx.block_start_row(), ctx.block_last_row()), (4, 5));
                assert_eq!(
                    ctx.cell_a1("A5")?,
                    Some(&CellContent::Text("Total for West".into()))
                );
                sum_rows_above(ctx)
            }),
        ],
    )
    .unwrap();

    assert_eq!(content(&doc, 0, "D5"), Some(CellContent::formula("SUM(D3:D4)")));
}

#[test]
fn callback_formulas_are_not_relocated() {
    let catalog = feeding_log_catalog();
    let doc = render(
        &catalog,
        vec![
            row("Okapi", 2.0, 100.0),
            row("Tapir", 3.0, 40.0).on_written(|ctx| {
                ctx.set_value_a1("D2", CellValue::formula("=SUM(A1:A2)"))?;
                Ok(())
            }),
            row("Zebra", 1.0, 75.0),
        ],
    )
    .unwrap();
    assert_eq!(content(&doc, 0, "D2"), Some(CellContent::formula("SUM(A1:A2)")));
}

#[test]
fn writes_past_the_block_are_rejected() {
    let catalog = feeding_log_catalog();
    let err = render(
        &catalog,
        vec![row("Okapi", 2.0, 100.0).on_written(|ctx| {
            ctx.set_value(CellRef::new(ctx.block_last_row(), 0), "too far")?;
            Ok(())
        })],
    )
    .unwrap_err();
    assert!(
        matches!(err, RenderError::WriteOutsideBlock { ref cell, block_last_row: 1 } if cell == "A2"),
        "{err}"
    );
}

#[test]
fn callback_errors_abort_the_render() {
    let catalog = feeding_log_catalog();
    let err = render(
        &catalog,
        vec![row("Okapi", 2.0, 100.0).on_written(|_| Err("ledger closed".into()))],
    )
    .unwrap_err();
    match err {
        RenderError::BlockUpdate { block, source } => {
            assert_eq!(block, "Row");
            assert_eq!(source.to_string(), "ledger closed");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn new_sheet_names_are_valid_and_unique() {
    let catalog = feeding_log_catalog();
    let doc = render(
        &catalog,
        vec![
            RenderInstruction::new_sheet("A"),
            row("Okapi", 2.0, 100.0),
            RenderInstruction::new_sheet("A"),
            row("Tapir", 3.0, 40.0),
            RenderInstruction::new_sheet("Reptiles: 2024/Q1"),
            RenderInstruction::new_sheet(""),
        ],
    )
    .unwrap();

    let names: Vec<&str> = doc.sheets().iter().map(|s| s.name()).collect();
    assert_eq!(names, vec!["A", "A (2)", "Reptiles 2024Q1", "Sheet1"]);
    for name in names {
        zoo_report_xlsx::model::validate_sheet_name(name).unwrap();
    }
}

#[test]
fn new_sheet_resets_the_cursor() {
    let catalog = feeding_log_catalog();
    let doc = render(
        &catalog,
        vec![
            RenderInstruction::new("Header"),
            row("Okapi", 2.0, 100.0),
            RenderInstruction::new_sheet("Second"),
            row("Tapir", 3.0, 40.0),
        ],
    )
    .unwrap();

    assert_eq!(doc.sheets()[0].name(), "Zoo");
    assert_eq!(doc.sheets()[0].row_count(), 3);
    assert_eq!(doc.sheet("second").unwrap().row_count(), 1);
    assert_eq!(content(&doc, 1, "A1"), Some(CellContent::Text("Tapir".into())));
    assert_eq!(content(&doc, 1, "D1"), Some(CellContent::formula("B1*C1")));
}

#[test]
fn own_sheet_references_follow_a_renamed_sheet() {
    let catalog = common::load_catalog(common::pens_template(), "Pens");
    let doc = render(
        &catalog,
        vec![
            RenderInstruction::new("Header"),
            RenderInstruction::new("Row").with("species", "Okapi").with("qty", 2.0),
            RenderInstruction::new("Row").with("species", "Tapir").with("qty", 3.0),
            RenderInstruction::new_sheet("Aviary"),
            RenderInstruction::new("Row").with("species", "Macaw").with("qty", 4.0),
        ],
    )
    .unwrap();

    assert_eq!(content(&doc, 0, "C3"), Some(CellContent::formula("B3*Rate+Pens!$B$1")));
    assert_eq!(content(&doc, 1, "C1"), Some(CellContent::formula("B1*Rate+Aviary!$B$1")));
}

#[test]
fn unknown_block_fails_without_a_document() {
    let catalog = feeding_log_catalog();
    let result = render(
        &catalog,
        vec![RenderInstruction::new("Header"), RenderInstruction::new("Sumary")],
    );
    assert!(matches!(result, Err(RenderError::UnknownBlock(ref name)) if name == "Sumary"));
}

#[test]
fn empty_instruction_list_yields_a_skeleton_sheet() {
    let catalog = feeding_log_catalog();
    let doc = render(&catalog, Vec::new()).unwrap();
    assert_eq!(doc.sheets().len(), 1);
    assert_eq!(doc.sheets()[0].name(), "Zoo");
    assert_eq!(doc.sheets()[0].row_count(), 0);
    assert!(doc.sheets()[0].rows().is_empty());
}

#[test]
fn rendering_is_deterministic() {
    let catalog = feeding_log_catalog();
    let instructions = || {
        vec![
            RenderInstruction::new("Header").with("site", "North"),
            row("Okapi", 2.0, 100.0),
            RenderInstruction::new_sheet("Aviary"),
            RenderInstruction::new("Header").with("site", "Aviary"),
            row("Macaw", 4.0, 12.5),
            RenderInstruction::new("Footer").on_written(sum_rows_above),
        ]
    };
    let first = render(&catalog, instructions()).unwrap();
    let second = render(&catalog, instructions()).unwrap();
    assert_eq!(first.sheets(), second.sheets());
}

#[test]
fn missing_fields_follow_the_policy() {
    let catalog = feeding_log_catalog();
    let blank = render(&catalog, vec![RenderInstruction::new("Row").with("species", "Okapi")])
        .unwrap();
    let qty = blank.sheets()[0].cell(CellRef::from_a1("B1").unwrap()).unwrap();
    assert_eq!(qty.content, CellContent::Empty);

    let strict = RenderEngine::new(RenderOptions {
        missing_field: MissingFieldPolicy::Error,
        ..RenderOptions::default()
    });
    let err = strict
        .render(&catalog, vec![RenderInstruction::new("Row").with("species", "Okapi")])
        .unwrap_err();
    assert!(
        matches!(err, RenderError::MissingField { ref block, ref field } if block == "Row" && field == "qty"),
        "{err}"
    );
}

#[test]
fn non_finite_numbers_are_rejected() {
    let catalog = feeding_log_catalog();
    let err = render(&catalog, vec![row("Okapi", f64::INFINITY, 1.0)]).unwrap_err();
    assert!(matches!(err, RenderError::NonFiniteNumber(n) if n.is_infinite()));
}

#[test]
fn first_row_option_offsets_every_sheet() {
    let catalog = feeding_log_catalog();
    let engine = RenderEngine::new(RenderOptions {
        first_row: 2,
        ..RenderOptions::default()
    });
    let doc = engine
        .render(
            &catalog,
            vec![
                row("Okapi", 2.0, 100.0),
                RenderInstruction::new_sheet("Next"),
                row("Tapir", 3.0, 40.0),
            ],
        )
        .unwrap();
    assert_eq!(content(&doc, 0, "D3"), Some(CellContent::formula("B3*C3")));
    assert_eq!(content(&doc, 1, "A3"), Some(CellContent::Text("Tapir".into())));
    assert_eq!(doc.sheets()[1].row_count(), 1);
}

#[test]
fn blocks_cannot_run_past_the_last_excel_row() {
    let catalog = feeding_log_catalog();
    let engine = RenderEngine::new(RenderOptions {
        first_row: zoo_report_xlsx::model::EXCEL_MAX_ROWS - 1,
        ..RenderOptions::default()
    });
    assert!(engine.render(&catalog, vec![row("Okapi", 1.0, 1.0)]).is_ok());
    let err = engine
        .render(&catalog, vec![RenderInstruction::new("Header")])
        .unwrap_err();
    assert!(matches!(err, RenderError::RowLimitExceeded { ref block } if block == "Header"));
}

#[test]
fn instructions_deserialize_from_json() {
    let json = r#"[
        {"block": "NEW_SHEET", "data": {"SHEET_NAME": "Census"}},
        {"block": "Row", "data": {"species": "Okapi", "qty": 2, "price": 100, "note": {"formula": "=1+1"}}}
    ]"#;
    let instructions: Vec<RenderInstruction> = serde_json::from_str(json).unwrap();
    assert!(instructions[0].is_new_sheet());
    assert_eq!(
        instructions[1].data().get("note"),
        Some(&CellValue::formula("1+1"))
    );

    let doc = render(&feeding_log_catalog(), instructions).unwrap();
    assert_eq!(doc.sheets()[0].name(), "Census");
    assert_eq!(content(&doc, 0, "B1"), Some(CellContent::Number(2.0)));
}

use std::sync::Arc;

use w2_config::{
    ConfigError, Document, EditError, IssueKind, Value, diff, load_document, parse,
    save_document, serialize, validate,
};
use w2_schema::{Schema, SchemaRegistry};

const NPT: &str = include_str!("data/w2_con.npt");
const CSV: &str = include_str!("data/w2_con.csv");

fn fixed() -> Arc<Schema> {
    SchemaRegistry::builtin().get("w2-v4.5").unwrap()
}

fn load() -> Document {
    parse(NPT, fixed()).unwrap().document
}

fn changed_lines(before: &str, after: &str) -> Vec<(String, String)> {
    before
        .lines()
        .zip(after.lines())
        .filter(|(a, b)| a != b)
        .map(|(a, b)| (a.to_string(), b.to_string()))
        .collect()
}

#[test]
fn set_rewrites_only_the_edited_columns() {
    let mut doc = load();
    doc.set("GRID", 0, "KMX", Value::Integer(35)).unwrap();
    let text = serialize(&doc);

    let changed = changed_lines(NPT, &text);
    assert_eq!(changed.len(), 1);
    assert_eq!(
        changed[0].1,
        "               1       2      10      35       1     OFF"
    );
    assert_eq!(changed[0].0.len(), changed[0].1.len());
    assert_eq!(doc.field("KMX").unwrap().value, Value::Integer(35));
}

#[test]
fn overflow_and_type_errors_leave_document_untouched() {
    let mut doc = load();
    let err = doc.set("GRID", 0, "IMX", Value::Integer(123_456_789)).unwrap_err();
    assert!(matches!(err, EditError::Overflow { width: 8, .. }), "{err}");

    let err = doc.set("GRID", 0, "CLOSEC", Value::Integer(1)).unwrap_err();
    assert!(matches!(err, EditError::TypeMismatch { .. }), "{err}");

    let err = doc.set_raw("GRID", 0, "NPROC", "123456789").unwrap_err();
    assert!(matches!(err, EditError::Overflow { .. }), "{err}");

    assert_eq!(serialize(&doc), NPT);
}

#[test]
fn lookups_reject_wrong_targets() {
    let mut doc = load();
    assert!(matches!(
        doc.set("GRID", 0, "US", Value::Integer(1)),
        Err(EditError::FieldNotInSection { .. })
    ));
    assert!(matches!(
        doc.set("GRID", 0, "NOPE", Value::Integer(1)),
        Err(EditError::UnknownField { .. })
    ));
    assert!(matches!(
        doc.set("BRANCH G", 7, "US", Value::Integer(1)),
        Err(EditError::NoSuchInstance { index: 7, .. })
    ));
    assert!(matches!(
        doc.set("DLT DATE", 0, "DLTD", Value::Real(1.0)),
        Err(EditError::WrongRepeat { .. })
    ));
    assert!(matches!(
        doc.push_instance("GRID"),
        Err(EditError::WrongRepeat { .. })
    ));
}

#[test]
fn set_raw_and_tokens() {
    let mut doc = load();
    doc.set_raw("grid", 0, "kmx", "-5").unwrap();
    let kmx = doc.field("KMX").unwrap();
    assert_eq!(kmx.text, "      -5");
    assert_eq!(kmx.value, Value::Integer(-5));

    doc.set("TRANSPORT", 0, "SLTRC", Value::Token("QUICKEST".to_string()))
        .unwrap();
    doc.set("GRID", 0, "CLOSEC", Value::Boolean(true)).unwrap();
    let again = parse(&serialize(&doc), fixed()).unwrap().document;
    assert_eq!(again.field("SLTRC").unwrap().value, Value::Token("QUICKEST".to_string()));
    assert_eq!(again.field("CLOSEC").unwrap().value, Value::Boolean(true));
}

#[test]
fn title_lines_can_be_replaced() {
    let mut doc = load();
    doc.set_line("TITLE", 2, "Scenario B: raised crest").unwrap();
    assert!(matches!(
        doc.set_line("TITLE", 10, "x"),
        Err(EditError::NoSuchLine { line: 10, .. })
    ));
    let text = serialize(&doc);
    assert_eq!(text.lines().nth(4), Some("Scenario B: raised crest"));
    assert_eq!(parse(&text, fixed()).unwrap().document, doc);
}

#[test]
fn value_lists_grow_by_whole_lines() {
    let mut doc = load();
    doc.set_value_at("DLT DATE", 9, Value::Real(5.0)).unwrap();
    let text = serialize(&doc);
    let first = format!("{}{:>8}{:>8}{:>8}", " ".repeat(8), "60.0", "100.0", "200.0");
    let second = format!("{}{:>8}", " ".repeat(8), "5.0");
    assert!(text.contains(&format!("{first}\n{second}\n")), "{text}");

    let report = validate(&doc);
    let mismatch: Vec<_> = report
        .errors()
        .filter(|issue| issue.kind == IssueKind::CountMismatch)
        .collect();
    assert_eq!(mismatch.len(), 1);
    assert_eq!(mismatch[0].field(), Some("NDT"));
}

#[test]
fn branches_can_be_added_consistently() {
    let mut doc = load();
    for section in ["BRANCH G", "INTERPOL", "N STRUC", "STR INT"] {
        assert_eq!(doc.push_instance(section).unwrap(), 2);
    }
    doc.set("GRID", 0, "NBR", Value::Integer(3)).unwrap();
    doc.set("BRANCH G", 2, "US", Value::Integer(10)).unwrap();
    doc.set("BRANCH G", 2, "DS", Value::Integer(10)).unwrap();

    let new_branch = doc.instance("BRANCH G", 2).unwrap();
    assert_eq!(new_branch.rows[0].label.as_deref(), Some("BR2     "));

    let report = validate(&doc);
    assert!(report.is_runnable(), "{:?}", report.issues);

    let again = parse(&serialize(&doc), fixed()).unwrap().document;
    assert_eq!(again.instance_count("BRANCH G"), 3);
    assert_eq!(again.get("BRANCH G", 2, "US").unwrap().value, Value::Integer(10));
    assert_eq!(again, doc);
}

#[test]
fn instance_edits_without_count_update_are_flagged() {
    let mut doc = load();
    doc.remove_instance("BRANCH G", 0).unwrap();
    assert_eq!(doc.instance_count("BRANCH G"), 1);
    assert_eq!(doc.get("BRANCH G", 0, "US").unwrap().value, Value::Integer(6));

    let report = validate(&doc);
    let mismatch: Vec<_> = report
        .errors()
        .filter(|issue| issue.kind == IssueKind::CountMismatch)
        .collect();
    assert_eq!(mismatch.len(), 1);
    assert_eq!(mismatch[0].field(), Some("NBR"));

    assert!(matches!(
        doc.remove_instance("BRANCH G", 3),
        Err(EditError::NoSuchInstance { .. })
    ));
}

#[test]
fn appending_at_end_of_unterminated_file_moves_the_terminator() {
    let raw = NPT.trim_end_matches('\n');
    let mut doc = parse(raw, fixed()).unwrap().document;
    doc.push_instance("STR INT").unwrap();
    let text = serialize(&doc);
    assert!(text.ends_with(&format!("     OFF\n{}", " ".repeat(16))), "{text:?}");
    assert!(!text.ends_with('\n'));
}

#[test]
fn csv_cells_cannot_contain_the_delimiter() {
    let schema = SchemaRegistry::builtin().get("w2-v4.5-csv").unwrap();
    let mut doc = parse(CSV, schema.clone()).unwrap().document;
    assert!(matches!(
        doc.set_raw("GRID", 0, "KMX", "1,2"),
        Err(EditError::InvalidText { .. })
    ));

    doc.set("GRID", 0, "KMX", Value::Integer(-5)).unwrap();
    let text = serialize(&doc);
    assert!(text.contains("\n,1,2,10,-5,1,OFF\n"));
    assert_eq!(parse(&text, schema).unwrap().document, doc);
}

#[test]
fn diff_lists_changed_cells() {
    let before = load();
    let mut after = before.clone();
    after.set("GRID", 0, "KMX", Value::Integer(25)).unwrap();
    after.set_value_at("DLT FRN", 2, Value::Real(0.5)).unwrap();

    let changes = diff(&before, &after);
    assert!(!changes.structural);
    assert_eq!(changes.changes.len(), 2);
    assert_eq!(changes.changes[0].field, "KMX");
    assert_eq!(changes.changes[0].before.trim(), "20");
    assert_eq!(changes.changes[0].after.trim(), "25");
    assert_eq!(changes.changes[1].field, "DLTF");
    assert_eq!(changes.changes[1].position, Some(2));

    let mut removed = before.clone();
    removed.remove_instance("INTERPOL", 1).unwrap();
    assert!(diff(&before, &removed).structural);
    assert!(diff(&before, &before).is_empty());
}

#[test]
fn files_load_and_save() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("w2_con.npt");
    std::fs::write(&path, NPT).unwrap();

    let mut parsed = load_document(&path, fixed()).unwrap();
    parsed
        .document
        .set("TIME CON", 0, "TMEND", Value::Real(300.0))
        .unwrap();
    save_document(&path, &parsed.document).unwrap();

    let reloaded = load_document(&path, fixed()).unwrap();
    assert_eq!(reloaded.document.field("TMEND").unwrap().value, Value::Real(300.0));

    let binary = dir.path().join("binary.npt");
    std::fs::write(&binary, [0xff, 0xfe, 0x00]).unwrap();
    assert!(matches!(
        load_document(&binary, fixed()),
        Err(ConfigError::NotUtf8 { .. })
    ));
    assert!(matches!(
        load_document(&dir.path().join("missing.npt"), fixed()),
        Err(ConfigError::Io { .. })
    ));
}

#[test]
fn lookups_borrow_only_the_document() {
    let doc = load();
    let branch = {
        let name = String::from("branch g");
        doc.instance(&name, 1).unwrap()
    };
    assert_eq!(branch.rows[0].label.as_deref(), Some("BR2     "));

    let structures: Vec<_> = {
        let name = "STR INT".to_string();
        doc.instances(&name).collect()
    };
    assert_eq!(structures.len(), 2);
}

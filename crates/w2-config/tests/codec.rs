use std::sync::Arc;

use proptest::prelude::*;
use w2_config::{
    Entry, Eol, IssueKind, OpaqueKind, ParseError, Value, parse, parse_with, serialize,
};
use w2_schema::{Schema, SchemaError, SchemaRegistry};

const NPT: &str = include_str!("data/w2_con.npt");
const CSV: &str = include_str!("data/w2_con.csv");

fn fixed() -> Arc<Schema> {
    SchemaRegistry::builtin().get("w2-v4.5").unwrap()
}

fn delimited() -> Arc<Schema> {
    SchemaRegistry::builtin().get("w2-v4.5-csv").unwrap()
}

#[test]
fn fixed_file_round_trips_byte_for_byte() {
    let parsed = parse(NPT, fixed()).unwrap();
    assert!(parsed.warnings.is_empty(), "{:?}", parsed.warnings);
    assert_eq!(serialize(&parsed.document), NPT);
}

#[test]
fn csv_file_round_trips_byte_for_byte() {
    let parsed = parse(CSV, delimited()).unwrap();
    assert!(parsed.warnings.is_empty(), "{:?}", parsed.warnings);
    assert_eq!(serialize(&parsed.document), CSV);
}

#[test]
fn crlf_and_missing_final_newline_survive() {
    let crlf = NPT.replace('\n', "\r\n");
    let parsed = parse(&crlf, fixed()).unwrap();
    assert_eq!(serialize(&parsed.document), crlf);

    let unterminated = NPT.trim_end_matches('\n');
    let parsed = parse(unterminated, fixed()).unwrap();
    assert_eq!(serialize(&parsed.document), unterminated);
    let last = parsed.document.instances("STR INT").last().unwrap();
    assert_eq!(last.rows[0].eol, Eol::None);
}

#[test]
fn typed_values_are_decoded() {
    let doc = parse(NPT, fixed()).unwrap().document;
    assert_eq!(doc.field("NWB").unwrap().value, Value::Integer(1));
    assert_eq!(doc.field("kmx").unwrap().value, Value::Integer(20));
    assert_eq!(doc.field("CLOSEC").unwrap().value, Value::Boolean(false));
    assert_eq!(doc.field("SLTRC").unwrap().value, Value::Token("ULTIMATE".to_string()));
    assert_eq!(doc.get("TIME CON", 0, "TMEND").unwrap().value, Value::Real(365.0));

    let us: Vec<Value> = doc
        .column("US")
        .into_iter()
        .map(|cell| cell.unwrap().value.clone())
        .collect();
    assert_eq!(us, vec![Value::Integer(2), Value::Integer(6)]);
    assert_eq!(doc.instance("BRANCH G", 1).unwrap().rows[0].label.as_deref(), Some("BR2     "));

    let dltd: Vec<f64> = doc
        .values("DLT DATE")
        .iter()
        .filter_map(|cell| cell.value.as_f64())
        .collect();
    assert_eq!(dltd, vec![60.0, 100.0, 200.0]);

    assert_eq!(
        doc.line("TITLE", 0).unwrap().value,
        Value::Text("Example reservoir, two branches".to_string())
    );
    assert_eq!(doc.instance("TITLE", 0).unwrap().rows.len(), 10);
}

#[test]
fn csv_values_match_fixed_values() {
    let npt = parse(NPT, fixed()).unwrap().document;
    let csv = parse(CSV, delimited()).unwrap().document;
    for field in ["NWB", "NBR", "IMX", "KMX", "NDT", "AZC", "THETA", "LAT", "LONG"] {
        assert_eq!(npt.field(field).unwrap().value, csv.field(field).unwrap().value, "{field}");
    }
    let inflow = csv.instance("IN/OUTFL", 0).unwrap();
    assert_eq!(inflow.rows[0].trailing, ",,,");
    assert_eq!(
        csv.line("TITLE", 0).unwrap().value,
        Value::Text("Example reservoir, two branches".to_string())
    );
}

#[test]
fn comments_and_preamble_are_opaque_entries() {
    let doc = parse(NPT, fixed()).unwrap().document;
    let kinds: Vec<OpaqueKind> = doc
        .entries()
        .iter()
        .filter_map(|entry| match entry {
            Entry::Opaque(line) => Some(line.kind),
            _ => None,
        })
        .collect();
    assert_eq!(kinds[0], OpaqueKind::Preamble);
    assert!(kinds.contains(&OpaqueKind::Comment));
    assert!(kinds.contains(&OpaqueKind::Blank));
    assert!(!kinds.contains(&OpaqueKind::Trailing));
}

#[test]
fn unreadable_cell_is_kept_with_a_warning() {
    let raw = NPT.replacen("       3     1.0     OFF", "       3     1.x     OFF", 1);
    let parsed = parse(&raw, fixed()).unwrap();
    assert_eq!(serialize(&parsed.document), raw);
    assert_eq!(
        parsed.document.field("DLTMIN").unwrap().value,
        Value::Unparsed("1.x".to_string())
    );
    assert_eq!(parsed.warnings.len(), 1);
    assert_eq!(parsed.warnings[0].kind, IssueKind::DecodeWarning);
    assert_eq!(parsed.warnings[0].field(), Some("DLTMIN"));
}

#[test]
fn trailing_cards_are_preserved() {
    let raw = format!("{NPT}STR TOP   ELSTR\n           100.0\n");
    let parsed = parse(&raw, fixed()).unwrap();
    assert_eq!(serialize(&parsed.document), raw);
    let trailing = parsed
        .document
        .entries()
        .iter()
        .filter(|entry| matches!(entry, Entry::Opaque(line) if line.kind == OpaqueKind::Trailing))
        .count();
    assert_eq!(trailing, 2);
}

#[test]
fn misplaced_card_is_a_parse_error() {
    let raw = NPT.replacen("IN/OUTFL", "INFLOWS ", 1);
    let err = parse(&raw, fixed()).unwrap_err();
    match err {
        ParseError::UnexpectedHeader { section, found, .. } => {
            assert_eq!(section, "IN/OUTFL");
            assert!(found.starts_with("INFLOWS"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn missing_lines_are_truncation() {
    let cut = NPT.find("BRANCH G").unwrap();
    let raw = format!("{}BRANCH G      US      DS\n        2       5\n", &NPT[..cut]);
    let err = parse(&raw, fixed()).unwrap_err();
    assert!(
        matches!(err, ParseError::Truncated { ref section, .. } if section == "BRANCH G"),
        "{err}"
    );
}

#[test]
fn branch_count_above_the_rows_is_truncation_not_a_blank_branch() {
    let raw = NPT.replacen("               1       2      10", "               1       3      10", 1);
    let separator = NPT.lines().position(|line| line.starts_with("BR2")).unwrap() + 2;

    for text in [raw.clone(), format!("{raw}STR TOP   ELSTR\n           100.0\n")] {
        match parse(&text, fixed()).unwrap_err() {
            ParseError::Truncated { section, line } => {
                assert_eq!(section, "BRANCH G");
                assert_eq!(line, separator);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    // Cards with no blank line between them.
    let packed = raw.replacen("0.0000\n\nLOCATION", "0.0000\nLOCATION", 1);
    assert!(matches!(
        parse(&packed, fixed()).unwrap_err(),
        ParseError::Truncated { ref section, line } if section == "BRANCH G" && line == separator
    ));

    let csv = CSV.replacen(",1,2,10,20,", ",1,3,10,20,", 1);
    assert!(matches!(
        parse(&csv, delimited()).unwrap_err(),
        ParseError::Truncated { ref section, .. } if section == "BRANCH G"
    ));
}

#[test]
fn branch_count_below_the_rows_leaves_a_row_where_a_header_belongs() {
    let raw = NPT.replacen("               1       2      10", "               1       1      10", 1);
    match parse(&raw, fixed()).unwrap_err() {
        ParseError::UnexpectedHeader { section, found, .. } => {
            assert_eq!(section, "LOCATION");
            assert!(found.starts_with("BR2"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn unreadable_count_is_rejected() {
    let raw = NPT.replacen("               1       2      10", "               1     two      10", 1);
    let err = parse(&raw, fixed()).unwrap_err();
    assert!(
        matches!(err, ParseError::InvalidCount { ref field, .. } if field == "NBR"),
        "{err}"
    );
}

#[test]
fn empty_input_has_no_sections() {
    assert!(matches!(
        parse("", fixed()),
        Err(ParseError::MissingSection { .. })
    ));
}

#[test]
fn unknown_version_fails_before_parsing() {
    let err = parse_with(NPT, "w2-v9.9", SchemaRegistry::builtin()).unwrap_err();
    assert!(matches!(
        err,
        ParseError::Schema(SchemaError::UnknownSchemaVersion { .. })
    ));
}

proptest! {
    #[test]
    fn anything_after_the_last_card_round_trips(tail in "[ -~\t\r\n]{0,200}") {
        let raw = format!("{NPT}{tail}");
        let parsed = parse(&raw, fixed()).unwrap();
        prop_assert_eq!(serialize(&parsed.document), raw);
    }

    #[test]
    fn edited_documents_reparse_equal(kmx in -9_999_999i64..99_999_999, nday in 0i64..100_000) {
        let mut doc = parse(NPT, fixed()).unwrap().document;
        doc.set("GRID", 0, "KMX", Value::Integer(kmx)).unwrap();
        doc.set("MISCELL", 0, "NDAY", Value::Integer(nday)).unwrap();
        let text = serialize(&doc);
        let again = parse(&text, fixed()).unwrap().document;
        prop_assert_eq!(&again, &doc);
        prop_assert_eq!(serialize(&again), text);
    }

    #[test]
    fn edited_reals_reparse_equal(dltd in -999.0f64..9_999.0, theta in 0.0f64..1.0) {
        for schema in [fixed(), delimited()] {
            let raw = if schema.version() == "w2-v4.5" { NPT } else { CSV };
            let mut doc = parse(raw, schema.clone()).unwrap().document;
            doc.set_value_at("DLT DATE", 1, Value::Real(dltd)).unwrap();
            doc.set("TRANSPORT", 0, "THETA", Value::Real(theta)).unwrap();
            let again = parse(&serialize(&doc), schema).unwrap().document;
            prop_assert_eq!(again, doc);
        }
    }
}

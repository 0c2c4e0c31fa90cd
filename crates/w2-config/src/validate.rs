//! Domain and consistency checks over a parsed document.

use w2_schema::{FieldDef, FieldKind, RepeatRule, RuleDef, SectionDef};

use crate::document::{Document, Entry, FieldValue, OpaqueKind};
use crate::report::{FieldRef, IssueKind, Severity, ValidationIssue, ValidationReport};
use crate::value::Value;

pub fn validate(document: &Document) -> ValidationReport {
    let mut issues = Vec::new();
    let schema = document.schema();

    for section in schema.sections() {
        check_section(document, section, &mut issues);
        check_count(document, section, &mut issues);
    }
    for rule in schema.rules() {
        check_rule(document, rule, &mut issues);
    }
    check_trailing(document, &mut issues);

    ValidationReport {
        schema_version: document.version().to_string(),
        issues,
    }
}

fn issue(
    location: FieldRef,
    severity: Severity,
    kind: IssueKind,
    reason: String,
    cell: Option<&FieldValue>,
) -> ValidationIssue {
    ValidationIssue {
        location: Some(location),
        severity,
        kind,
        reason,
        value: cell.map(|c| c.text.trim().to_string()),
    }
}

fn check_section(document: &Document, section: &SectionDef, issues: &mut Vec<ValidationIssue>) {
    for (instance, inst) in document.instances(&section.name).enumerate() {
        match section.repeat {
            RepeatRule::Values { per_line, .. } => {
                let field = &section.fields[0];
                for (line, row) in inst.rows.iter().enumerate() {
                    for (cell_idx, cell) in row.cells.iter().enumerate() {
                        let location = FieldRef {
                            section: section.name.clone(),
                            instance,
                            field: field.name.clone(),
                            position: Some(line * per_line + cell_idx),
                        };
                        // Required applies to the list as a whole, not each slot.
                        if !cell.value.is_blank() {
                            check_cell(field, Some(cell), location, issues);
                        }
                    }
                }
            }
            RepeatRule::Lines { .. } => {
                let field = &section.fields[0];
                for (line, row) in inst.rows.iter().enumerate() {
                    let location = FieldRef {
                        section: section.name.clone(),
                        instance,
                        field: field.name.clone(),
                        position: Some(line),
                    };
                    check_cell(field, row.cells.first(), location, issues);
                }
            }
            RepeatRule::Once | RepeatRule::PerEntity { .. } => {
                let row = inst.rows.first();
                for (f_idx, field) in section.fields.iter().enumerate() {
                    let location = FieldRef {
                        section: section.name.clone(),
                        instance,
                        field: field.name.clone(),
                        position: None,
                    };
                    check_cell(field, row.and_then(|r| r.cells.get(f_idx)), location, issues);
                }
            }
        }
    }
}

fn check_cell(
    field: &FieldDef,
    cell: Option<&FieldValue>,
    location: FieldRef,
    issues: &mut Vec<ValidationIssue>,
) {
    let value = cell.map_or(&Value::Blank, |c| &c.value);
    match value {
        Value::Blank => {
            if field.required {
                issues.push(issue(
                    location,
                    Severity::Error,
                    IssueKind::Required,
                    format!("{} is required", field.name),
                    cell,
                ));
            }
        }
        Value::Unparsed(text) => issues.push(issue(
            location,
            Severity::Warning,
            IssueKind::DecodeWarning,
            format!("'{text}' is not a valid {} for {}", field.kind.as_str(), field.name),
            cell,
        )),
        Value::Integer(_) | Value::Real(_) => {
            let Some(number) = value.as_f64() else {
                return;
            };
            if let Some(min) = field.min
                && number < min
            {
                issues.push(issue(
                    location,
                    Severity::Error,
                    IssueKind::Domain,
                    format!("{} = {number} is below the minimum {min}", field.name),
                    cell,
                ));
            } else if let Some(max) = field.max
                && number > max
            {
                issues.push(issue(
                    location,
                    Severity::Error,
                    IssueKind::Domain,
                    format!("{} = {number} is above the maximum {max}", field.name),
                    cell,
                ));
            }
        }
        Value::Token(token) => match field.kind {
            FieldKind::Enum => {
                if !field.allowed.iter().any(|a| a.eq_ignore_ascii_case(token)) {
                    issues.push(issue(
                        location,
                        Severity::Error,
                        IssueKind::Domain,
                        format!(
                            "{} = {token} is not one of {}",
                            field.name,
                            field.allowed.join(", ")
                        ),
                        cell,
                    ));
                }
            }
            _ => issues.push(issue(
                location,
                Severity::Error,
                IssueKind::Domain,
                format!(
                    "{} = {token} is neither {} nor {}",
                    field.name,
                    field.true_token().trim(),
                    field.false_token().trim()
                ),
                cell,
            )),
        },
        Value::Boolean(_) | Value::Text(_) => {}
    }
}

/// Integer value of a single-instance count field, if readable.
fn count_value(document: &Document, field: &str) -> Option<i64> {
    document.field(field).and_then(|cell| cell.value.as_i64())
}

fn count_location(document: &Document, field: &str) -> Option<FieldRef> {
    let (location, def) = document.schema().field_named(field)?;
    Some(FieldRef {
        section: document.schema().sections()[location.section].name.clone(),
        instance: 0,
        field: def.name.clone(),
        position: None,
    })
}

fn check_count(document: &Document, section: &SectionDef, issues: &mut Vec<ValidationIssue>) {
    let Some(count_field) = section.repeat.count_field() else {
        return;
    };
    let Some(expected) = count_value(document, count_field) else {
        return;
    };
    let (actual, what) = match section.repeat {
        RepeatRule::Values { .. } => (
            document
                .values(&section.name)
                .iter()
                .filter(|cell| !cell.value.is_blank())
                .count(),
            "values",
        ),
        _ => (document.instance_count(&section.name), "instances"),
    };
    if actual as i64 != expected
        && let Some(location) = count_location(document, count_field)
    {
        issues.push(ValidationIssue {
            location: Some(location),
            severity: Severity::Error,
            kind: IssueKind::CountMismatch,
            reason: format!(
                "{count_field} = {expected} but section {} holds {actual} {what}",
                section.name
            ),
            value: Some(expected.to_string()),
        });
    }
}

fn check_rule(document: &Document, rule: &RuleDef, issues: &mut Vec<ValidationIssue>) {
    let schema = document.schema();
    match rule {
        RuleDef::IndexWithin { field, count } => {
            let Some(limit) = count_value(document, count) else {
                return;
            };
            let Some((location, def)) = schema.field_named(field) else {
                return;
            };
            let section = &schema.sections()[location.section];
            for (instance, cell) in document.column(field).into_iter().enumerate() {
                let Some(cell) = cell else { continue };
                let Value::Integer(index) = cell.value else {
                    continue;
                };
                if !(1..=limit).contains(&index) {
                    issues.push(issue(
                        FieldRef {
                            section: section.name.clone(),
                            instance,
                            field: def.name.clone(),
                            position: None,
                        },
                        Severity::Error,
                        IssueKind::Reference,
                        format!("{} = {index} does not refer to one of the {limit} {count}", def.name),
                        Some(cell),
                    ));
                }
            }
        }
        RuleDef::NotGreater { field, bound } => {
            let Some((location, def)) = schema.field_named(field) else {
                return;
            };
            let section = &schema.sections()[location.section];
            let lower = document.column(field);
            let upper = document.column(bound);
            for (instance, (a, b)) in lower.into_iter().zip(upper).enumerate() {
                let (Some(a), Some(b)) = (a, b) else { continue };
                let (Some(x), Some(y)) = (a.value.as_f64(), b.value.as_f64()) else {
                    continue;
                };
                if x > y {
                    issues.push(issue(
                        FieldRef {
                            section: section.name.clone(),
                            instance,
                            field: def.name.clone(),
                            position: None,
                        },
                        Severity::Error,
                        IssueKind::Ordering,
                        format!("{} = {x} exceeds {bound} = {y}", def.name),
                        Some(a),
                    ));
                }
            }
        }
    }
}

fn check_trailing(document: &Document, issues: &mut Vec<ValidationIssue>) {
    let lines: Vec<&str> = document
        .entries()
        .iter()
        .filter_map(|entry| match entry {
            Entry::Opaque(line) if line.kind == OpaqueKind::Trailing => Some(line.text.as_str()),
            _ => None,
        })
        .collect();
    if let Some(first) = lines.first() {
        issues.push(ValidationIssue {
            location: None,
            severity: Severity::Warning,
            kind: IssueKind::UnrecognizedContent,
            reason: format!(
                "{} line(s) after the last known section are carried through unchanged",
                lines.len()
            ),
            value: Some(first.trim_end().to_string()),
        });
    }
}

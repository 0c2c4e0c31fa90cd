//! Cell-level comparison of two documents of the same schema.

use serde::{Deserialize, Serialize};
use w2_schema::RepeatRule;

use crate::document::{Document, Entry, Row};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldChange {
    pub section: String,
    pub instance: usize,
    pub field: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<usize>,
    pub before: String,
    pub after: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentDiff {
    pub changes: Vec<FieldChange>,
    /// Instance counts, line counts or section order differ.
    pub structural: bool,
    /// Header, comment, blank or trailing lines whose text differs.
    pub other_lines: usize,
}

impl DocumentDiff {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty() && !self.structural && self.other_lines == 0
    }
}

pub fn diff(before: &Document, after: &Document) -> DocumentDiff {
    let mut out = DocumentDiff {
        structural: before.version() != after.version() || before.sections() != after.sections(),
        ..DocumentDiff::default()
    };

    for section in before.schema().sections() {
        let old: Vec<_> = before.instances(&section.name).collect();
        let new: Vec<_> = after.instances(&section.name).collect();
        if old.len() != new.len() {
            out.structural = true;
        }
        for (instance, (a, b)) in old.iter().zip(&new).enumerate() {
            if a.rows.len() != b.rows.len() {
                out.structural = true;
            }
            for (line, (ra, rb)) in a.rows.iter().zip(&b.rows).enumerate() {
                compare_rows(section, instance, line, ra, rb, &mut out.changes);
            }
        }
    }

    let opaque = |doc: &Document| -> Vec<String> {
        doc.entries()
            .iter()
            .filter_map(|entry| match entry {
                Entry::Opaque(line) => Some(line.text.clone()),
                Entry::Header(header) => Some(header.text.clone()),
                Entry::Section(_) => None,
            })
            .collect()
    };
    let (a, b) = (opaque(before), opaque(after));
    if a.len() != b.len() {
        out.structural = true;
    }
    out.other_lines = a.iter().zip(&b).filter(|(x, y)| x != y).count();
    out
}

fn compare_rows(
    section: &w2_schema::SectionDef,
    instance: usize,
    line: usize,
    a: &Row,
    b: &Row,
    changes: &mut Vec<FieldChange>,
) {
    let cells = a.cells.len().max(b.cells.len());
    for cell in 0..cells {
        let before = a.cells.get(cell).map_or("", |c| c.text.as_str());
        let after = b.cells.get(cell).map_or("", |c| c.text.as_str());
        if before == after {
            continue;
        }
        let (field, position) = match section.repeat {
            RepeatRule::Values { per_line, .. } => (&section.fields[0], Some(line * per_line + cell)),
            RepeatRule::Lines { .. } => (&section.fields[0], Some(line)),
            _ => match section.fields.get(cell) {
                Some(field) => (field, None),
                None => continue,
            },
        };
        changes.push(FieldChange {
            section: section.name.clone(),
            instance,
            field: field.name.clone(),
            position,
            before: before.to_string(),
            after: after.to_string(),
        });
    }
    let extras = [
        ("<label>", a.label.as_deref().unwrap_or(""), b.label.as_deref().unwrap_or("")),
        ("<trailing>", a.trailing.as_str(), b.trailing.as_str()),
    ];
    for (field, before, after) in extras {
        if before != after {
            changes.push(FieldChange {
                section: section.name.clone(),
                instance,
                field: field.to_string(),
                position: Some(line),
                before: before.to_string(),
                after: after.to_string(),
            });
        }
    }
}

//! In-memory control file: ordered entries holding the exact on-disk text.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use w2_schema::{ColumnSpan, FieldDef, LineLayout, RepeatRule, Schema, SectionDef};

use crate::value::{self, Value};

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum EditError {
    #[error("Unknown section: {section}")]
    UnknownSection { section: String },

    #[error("Unknown field: {field}")]
    UnknownField { field: String },

    #[error("Field {field} does not belong to section {section}")]
    FieldNotInSection { field: String, section: String },

    #[error("Section {section} has no instance {index}")]
    NoSuchInstance { section: String, index: usize },

    #[error("Section {section} has no line {line}")]
    NoSuchLine { section: String, line: usize },

    #[error("Section {section} is not present in the document")]
    SectionAbsent { section: String },

    #[error("{operation} is not supported on section {section}")]
    WrongRepeat {
        section: String,
        operation: &'static str,
    },

    #[error("Type mismatch for {field}: expected {expected}, got {found}")]
    TypeMismatch {
        field: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("Value for {field} does not fit in {width} columns: '{text}'")]
    Overflow {
        field: String,
        width: usize,
        text: String,
    },

    #[error("Invalid text for {field}: {reason}")]
    InvalidText { field: String, reason: String },
}

pub type EditResult<T> = Result<T, EditError>;

/// Line terminator as found on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Eol {
    Lf,
    CrLf,
    /// Final line of a file without a terminating newline.
    None,
}

impl Eol {
    pub fn as_str(self) -> &'static str {
        match self {
            Eol::Lf => "\n",
            Eol::CrLf => "\r\n",
            Eol::None => "",
        }
    }
}

/// One cell: decoded value plus the exact text it occupies on disk.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldValue {
    pub value: Value,
    pub text: String,
}

impl FieldValue {
    pub fn decode(field: &FieldDef, text: &str) -> Self {
        Self {
            value: value::decode(field, text),
            text: text.to_string(),
        }
    }
}

/// One physical data line.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    /// Label area; `None` for sections declared without one.
    pub label: Option<String>,
    /// Cells physically present on the line, in declaration order.
    pub cells: Vec<FieldValue>,
    /// Anything after the last declared cell, kept verbatim.
    pub trailing: String,
    pub eol: Eol,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SectionInstance {
    /// Schema section name.
    pub section: String,
    pub rows: Vec<Row>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpaqueKind {
    /// Before the first card header.
    Preamble,
    Blank,
    Comment,
    /// After the last declared section; not blank or a comment.
    Trailing,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OpaqueLine {
    pub kind: OpaqueKind,
    pub text: String,
    pub eol: Eol,
}

/// Card header line, e.g. `GRID     NWB     NBR ...`.
#[derive(Debug, Clone, PartialEq)]
pub struct HeaderLine {
    pub section: String,
    pub text: String,
    pub eol: Eol,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Entry {
    Opaque(OpaqueLine),
    Header(HeaderLine),
    Section(SectionInstance),
}

#[derive(Debug, Clone)]
pub struct Document {
    schema: Arc<Schema>,
    pub(crate) entries: Vec<Entry>,
}

impl PartialEq for Document {
    fn eq(&self, other: &Self) -> bool {
        self.schema.version() == other.schema.version() && self.entries == other.entries
    }
}

impl Document {
    pub(crate) fn new(schema: Arc<Schema>) -> Self {
        Self {
            schema,
            entries: Vec::new(),
        }
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn version(&self) -> &str {
        self.schema.version()
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    /// Names of the sections present, in file order.
    pub fn sections(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for entry in &self.entries {
            if let Entry::Header(header) = entry {
                names.push(&header.section);
            }
        }
        names
    }

    pub fn instances<'a, 's>(
        &'a self,
        section: &'s str,
    ) -> impl Iterator<Item = &'a SectionInstance> + use<'a, 's> {
        self.entries.iter().filter_map(move |entry| match entry {
            Entry::Section(inst) if inst.section.eq_ignore_ascii_case(section) => Some(inst),
            _ => None,
        })
    }

    pub fn instance(&self, section: &str, index: usize) -> Option<&SectionInstance> {
        self.instances(section).nth(index)
    }

    pub fn instance_count(&self, section: &str) -> usize {
        self.instances(section).count()
    }

    /// Cell of `field` in instance `index` of a single-line section.
    pub fn get(&self, section: &str, index: usize, field: &str) -> Option<&FieldValue> {
        let (s_idx, sdef) = section_def(&self.schema, section).ok()?;
        let location = self.schema.locate(field)?;
        if location.section != s_idx || matches!(sdef.repeat, RepeatRule::Values { .. }) {
            return None;
        }
        self.instance(section, index)?
            .rows
            .first()?
            .cells
            .get(location.field)
    }

    /// First occurrence of a field, looked up by name alone.
    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        let location = self.schema.locate(name)?;
        let section = &self.schema.sections()[location.section].name;
        self.get(section, 0, name)
    }

    /// The field's cell in every instance of its section, e.g. `US` for each branch.
    pub fn column(&self, field: &str) -> Vec<Option<&FieldValue>> {
        let Some(location) = self.schema.locate(field) else {
            return Vec::new();
        };
        let section = &self.schema.sections()[location.section].name;
        self.instances(section)
            .map(|inst| inst.rows.first().and_then(|row| row.cells.get(location.field)))
            .collect()
    }

    /// Cells of a wrapped value list, in reading order.
    pub fn values(&self, section: &str) -> Vec<&FieldValue> {
        self.instance(section, 0)
            .map(|inst| inst.rows.iter().flat_map(|row| row.cells.iter()).collect())
            .unwrap_or_default()
    }

    /// Line `line` of a multi-line section such as the title card.
    pub fn line(&self, section: &str, line: usize) -> Option<&FieldValue> {
        self.instance(section, 0)?.rows.get(line)?.cells.first()
    }

    /// Replace one cell, rendering `value` with the field's format.
    pub fn set(&mut self, section: &str, index: usize, field: &str, value: Value) -> EditResult<()> {
        let schema = Arc::clone(&self.schema);
        let (s_idx, f_idx) = self.single_line_field(&schema, section, field, "set")?;
        let text = value::render(&schema.sections()[s_idx].fields[f_idx], &value)?;
        self.write_cell(&schema, s_idx, index, 0, f_idx, text)
    }

    /// Replace one cell with literal text. The text is padded to the field
    /// width and decoded again; it must fit.
    pub fn set_raw(&mut self, section: &str, index: usize, field: &str, text: &str) -> EditResult<()> {
        let schema = Arc::clone(&self.schema);
        let (s_idx, f_idx) = self.single_line_field(&schema, section, field, "set_raw")?;
        let text = value::pad(&schema.sections()[s_idx].fields[f_idx], text.to_string())?;
        self.write_cell(&schema, s_idx, index, 0, f_idx, text)
    }

    /// Replace one line of a multi-line section.
    pub fn set_line(&mut self, section: &str, line: usize, text: &str) -> EditResult<()> {
        let schema = Arc::clone(&self.schema);
        let (s_idx, sdef) = section_def(&schema, section)?;
        if !matches!(sdef.repeat, RepeatRule::Lines { .. }) {
            return Err(EditError::WrongRepeat {
                section: sdef.name.clone(),
                operation: "set_line",
            });
        }
        let rows = self
            .instance(section, 0)
            .map(|inst| inst.rows.len())
            .unwrap_or(0);
        if line >= rows {
            return Err(EditError::NoSuchLine {
                section: sdef.name.clone(),
                line,
            });
        }
        let text = value::pad(&sdef.fields[0], text.to_string())?;
        self.write_cell(&schema, s_idx, 0, line, 0, text)
    }

    /// Replace value `n` of a wrapped value list, adding lines if needed.
    ///
    /// The count field is not touched; keep it in step with the new length.
    pub fn set_value_at(&mut self, section: &str, n: usize, value: Value) -> EditResult<()> {
        let schema = Arc::clone(&self.schema);
        let (s_idx, sdef) = section_def(&schema, section)?;
        let RepeatRule::Values { per_line, .. } = sdef.repeat else {
            return Err(EditError::WrongRepeat {
                section: sdef.name.clone(),
                operation: "set_value_at",
            });
        };
        let text = value::render(&sdef.fields[0], &value)?;
        let (row, cell) = (n / per_line, n % per_line);

        let final_none = self.last_eol() == Some(Eol::None);
        let eol = self.dominant_eol();
        let blank_label = self.blank_label(sdef);
        let name = sdef.name.clone();
        let inst = self
            .instance_mut(&name, 0)
            .ok_or(EditError::SectionAbsent { section: name.clone() })?;
        while inst.rows.len() <= row {
            inst.rows.push(Row {
                label: blank_label.clone(),
                cells: Vec::new(),
                trailing: String::new(),
                eol,
            });
        }
        self.fix_terminators(final_none);
        self.write_cell(&schema, s_idx, 0, row, cell, text)
    }

    /// Append a blank instance to a per-entity section and return its index.
    ///
    /// The new line copies the label and cell widths of the previous instance.
    /// The count field is not updated.
    pub fn push_instance(&mut self, section: &str) -> EditResult<usize> {
        let schema = Arc::clone(&self.schema);
        let (s_idx, sdef) = section_def(&schema, section)?;
        require_per_entity(sdef, "push_instance")?;

        let eol = self.dominant_eol();
        let final_none = self.last_eol() == Some(Eol::None);
        let last = self.entries.iter().rposition(
            |entry| matches!(entry, Entry::Section(inst) if inst.section == sdef.name),
        );

        let (position, row) = match last {
            Some(pos) => {
                let Entry::Section(prev) = &self.entries[pos] else {
                    unreachable!("position found by matching a section entry")
                };
                (pos + 1, blank_copy(&prev.rows[0], self.delimiter(), eol))
            }
            None => {
                let header = self
                    .entries
                    .iter()
                    .position(|entry| matches!(entry, Entry::Header(h) if h.section == sdef.name))
                    .ok_or(EditError::SectionAbsent {
                        section: sdef.name.clone(),
                    })?;
                let cells = schema
                    .column_spans(s_idx)
                    .iter()
                    .map(|span| FieldValue {
                        value: Value::Blank,
                        text: " ".repeat(span.width().unwrap_or(0)),
                    })
                    .collect();
                let cells = match schema.layout() {
                    LineLayout::Fixed { .. } => cells,
                    LineLayout::Delimited { .. } => sdef
                        .fields
                        .iter()
                        .map(|_| FieldValue {
                            value: Value::Blank,
                            text: String::new(),
                        })
                        .collect(),
                };
                let row = Row {
                    label: self.blank_label(sdef),
                    cells,
                    trailing: String::new(),
                    eol,
                };
                (header + 1, row)
            }
        };

        let name = sdef.name.clone();
        self.entries.insert(
            position,
            Entry::Section(SectionInstance {
                section: name.clone(),
                rows: vec![row],
            }),
        );
        self.fix_terminators(final_none);
        Ok(self.instance_count(&name) - 1)
    }

    /// Remove instance `index` of a per-entity section. The count field is not updated.
    pub fn remove_instance(&mut self, section: &str, index: usize) -> EditResult<()> {
        let schema = Arc::clone(&self.schema);
        let (_, sdef) = section_def(&schema, section)?;
        require_per_entity(sdef, "remove_instance")?;

        let position = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| matches!(entry, Entry::Section(inst) if inst.section == sdef.name))
            .nth(index)
            .map(|(pos, _)| pos)
            .ok_or(EditError::NoSuchInstance {
                section: sdef.name.clone(),
                index,
            })?;
        let final_none = self.last_eol() == Some(Eol::None);
        self.entries.remove(position);
        self.fix_terminators(final_none);
        Ok(())
    }

    pub(crate) fn write_to(&self, out: &mut String) {
        let delimiter = self.delimiter();
        for entry in &self.entries {
            match entry {
                Entry::Opaque(line) => {
                    out.push_str(&line.text);
                    out.push_str(line.eol.as_str());
                }
                Entry::Header(header) => {
                    out.push_str(&header.text);
                    out.push_str(header.eol.as_str());
                }
                Entry::Section(inst) => {
                    for row in &inst.rows {
                        write_row(out, row, delimiter);
                    }
                }
            }
        }
    }

    fn delimiter(&self) -> Option<char> {
        match self.schema.layout() {
            LineLayout::Fixed { .. } => None,
            LineLayout::Delimited { delimiter } => Some(delimiter),
        }
    }

    fn single_line_field(
        &self,
        schema: &Schema,
        section: &str,
        field: &str,
        operation: &'static str,
    ) -> EditResult<(usize, usize)> {
        let (s_idx, sdef) = section_def(schema, section)?;
        if !matches!(sdef.repeat, RepeatRule::Once | RepeatRule::PerEntity { .. }) {
            return Err(EditError::WrongRepeat {
                section: sdef.name.clone(),
                operation,
            });
        }
        let location = schema.locate(field).ok_or_else(|| EditError::UnknownField {
            field: field.to_string(),
        })?;
        if location.section != s_idx {
            return Err(EditError::FieldNotInSection {
                field: field.to_string(),
                section: sdef.name.clone(),
            });
        }
        Ok((s_idx, location.field))
    }

    fn instance_mut(&mut self, section: &str, index: usize) -> Option<&mut SectionInstance> {
        self.entries
            .iter_mut()
            .filter_map(|entry| match entry {
                Entry::Section(inst) if inst.section.eq_ignore_ascii_case(section) => Some(inst),
                _ => None,
            })
            .nth(index)
    }

    fn blank_label(&self, sdef: &SectionDef) -> Option<String> {
        if !sdef.label {
            return None;
        }
        Some(match self.schema.layout() {
            LineLayout::Fixed { label_width } => " ".repeat(label_width),
            LineLayout::Delimited { .. } => String::new(),
        })
    }

    /// Store rendered `text` in one cell, filling in any cells missing before it.
    fn write_cell(
        &mut self,
        schema: &Schema,
        s_idx: usize,
        index: usize,
        row: usize,
        cell: usize,
        text: String,
    ) -> EditResult<()> {
        let sdef = &schema.sections()[s_idx];
        let field = schema
            .cell_field(s_idx, cell)
            .ok_or_else(|| EditError::UnknownField {
                field: format!("{}[{cell}]", sdef.name),
            })?;
        check_text(field, &text, self.delimiter())?;

        let layout = schema.layout();
        let spans = schema.column_spans(s_idx);
        let inst = self
            .instance_mut(&sdef.name, index)
            .ok_or_else(|| EditError::NoSuchInstance {
                section: sdef.name.clone(),
                index,
            })?;
        let target = inst.rows.get_mut(row).ok_or_else(|| EditError::NoSuchLine {
            section: sdef.name.clone(),
            line: row,
        })?;

        fill_cells(target, cell + 1, layout, spans);
        target.cells[cell] = FieldValue {
            value: value::decode(field, &text),
            text,
        };
        Ok(())
    }

    fn line_eols_mut(&mut self) -> Vec<&mut Eol> {
        let mut eols = Vec::new();
        for entry in &mut self.entries {
            match entry {
                Entry::Opaque(line) => eols.push(&mut line.eol),
                Entry::Header(header) => eols.push(&mut header.eol),
                Entry::Section(inst) => eols.extend(inst.rows.iter_mut().map(|row| &mut row.eol)),
            }
        }
        eols
    }

    fn last_eol(&self) -> Option<Eol> {
        self.entries.iter().rev().find_map(|entry| match entry {
            Entry::Opaque(line) => Some(line.eol),
            Entry::Header(header) => Some(header.eol),
            Entry::Section(inst) => inst.rows.last().map(|row| row.eol),
        })
    }

    /// Terminator used for new lines: the first one found in the file.
    fn dominant_eol(&self) -> Eol {
        let mut found = Eol::Lf;
        for entry in &self.entries {
            let eol = match entry {
                Entry::Opaque(line) => line.eol,
                Entry::Header(header) => header.eol,
                Entry::Section(inst) => match inst.rows.iter().find(|row| row.eol != Eol::None) {
                    Some(row) => row.eol,
                    None => continue,
                },
            };
            if eol != Eol::None {
                found = eol;
                break;
            }
        }
        found
    }

    /// Only the final line may go without a terminator, and it keeps that
    /// property across inserts and removals.
    fn fix_terminators(&mut self, final_none: bool) {
        let dominant = self.dominant_eol();
        let mut eols = self.line_eols_mut();
        let last = eols.pop();
        for eol in eols {
            if *eol == Eol::None {
                *eol = dominant;
            }
        }
        if let Some(last) = last {
            if final_none {
                *last = Eol::None;
            } else if *last == Eol::None {
                *last = dominant;
            }
        }
    }
}

fn section_def<'s>(schema: &'s Schema, section: &str) -> EditResult<(usize, &'s SectionDef)> {
    schema
        .section_position(section)
        .map(|idx| (idx, &schema.sections()[idx]))
        .ok_or_else(|| EditError::UnknownSection {
            section: section.to_string(),
        })
}

fn require_per_entity(sdef: &SectionDef, operation: &'static str) -> EditResult<()> {
    match sdef.repeat {
        RepeatRule::PerEntity { .. } => Ok(()),
        _ => Err(EditError::WrongRepeat {
            section: sdef.name.clone(),
            operation,
        }),
    }
}

fn check_text(field: &FieldDef, text: &str, delimiter: Option<char>) -> EditResult<()> {
    if text.contains(['\n', '\r']) {
        return Err(EditError::InvalidText {
            field: field.name.clone(),
            reason: "line breaks are not allowed in a cell".to_string(),
        });
    }
    if let Some(delimiter) = delimiter
        && text.contains(delimiter)
        && !field.is_rest_of_line()
    {
        return Err(EditError::InvalidText {
            field: field.name.clone(),
            reason: format!("cell text contains the delimiter '{delimiter}'"),
        });
    }
    Ok(())
}

/// Make sure `row` holds at least `count` cells. In fixed layout the label
/// and a short final cell are space-padded so later columns keep their place.
fn fill_cells(row: &mut Row, count: usize, layout: LineLayout, spans: &[ColumnSpan]) {
    if row.cells.len() >= count {
        return;
    }
    match layout {
        LineLayout::Fixed { label_width } => {
            if let Some(label) = &mut row.label {
                pad_right(label, label_width);
            }
            if let Some(last) = row.cells.len().checked_sub(1)
                && let Some(width) = spans.get(last).and_then(ColumnSpan::width)
            {
                pad_right(&mut row.cells[last].text, width);
            }
            while row.cells.len() < count {
                let width = spans
                    .get(row.cells.len())
                    .and_then(ColumnSpan::width)
                    .unwrap_or(0);
                row.cells.push(FieldValue {
                    value: Value::Blank,
                    text: " ".repeat(width),
                });
            }
        }
        LineLayout::Delimited { .. } => {
            while row.cells.len() < count {
                row.cells.push(FieldValue {
                    value: Value::Blank,
                    text: String::new(),
                });
            }
        }
    }
}

fn pad_right(text: &mut String, width: usize) {
    let len = text.chars().count();
    if len < width {
        text.extend(std::iter::repeat_n(' ', width - len));
    }
}

fn blank_copy(template: &Row, delimiter: Option<char>, eol: Eol) -> Row {
    let cells = template
        .cells
        .iter()
        .map(|cell| FieldValue {
            value: Value::Blank,
            text: match delimiter {
                None => " ".repeat(cell.text.chars().count()),
                Some(_) => String::new(),
            },
        })
        .collect();
    Row {
        label: template.label.clone(),
        cells,
        trailing: String::new(),
        eol,
    }
}

pub(crate) fn write_row(out: &mut String, row: &Row, delimiter: Option<char>) {
    match delimiter {
        None => {
            if let Some(label) = &row.label {
                out.push_str(label);
            }
            for cell in &row.cells {
                out.push_str(&cell.text);
            }
        }
        Some(delimiter) => {
            let mut first = true;
            if let Some(label) = &row.label {
                out.push_str(label);
                first = false;
            }
            for cell in &row.cells {
                if !first {
                    out.push(delimiter);
                }
                out.push_str(&cell.text);
                first = false;
            }
        }
    }
    out.push_str(&row.trailing);
    out.push_str(row.eol.as_str());
}

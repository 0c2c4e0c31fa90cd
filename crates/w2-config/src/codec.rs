//! Text <-> [`Document`] conversion.
//!
//! Parsing keeps the exact text of every line, so `serialize(parse(x)) == x`.

use std::sync::Arc;

use w2_schema::{LineLayout, RepeatRule, Schema, SchemaError, SchemaRegistry, SectionDef};

use crate::document::{
    Document, Entry, Eol, FieldValue, HeaderLine, OpaqueKind, OpaqueLine, Row, SectionInstance,
};
use crate::report::{FieldRef, IssueKind, Severity, ValidationIssue};
use crate::value::Value;

#[derive(thiserror::Error, Debug)]
pub enum ParseError {
    #[error("Line {line}: expected header of section {section}, found '{found}'")]
    UnexpectedHeader {
        section: String,
        line: usize,
        found: String,
    },

    #[error("Section {section} is truncated at line {line}")]
    Truncated { section: String, line: usize },

    #[error("Section {section} cannot be sized: {field} = '{text}' is not a non-negative integer")]
    InvalidCount {
        section: String,
        field: String,
        text: String,
    },

    #[error("Section {section} not found")]
    MissingSection { section: String },

    #[error(transparent)]
    Schema(#[from] SchemaError),
}

pub type ParseResult<T> = Result<T, ParseError>;

/// Parse output: the document plus non-fatal decode diagnostics.
#[derive(Debug, Clone)]
pub struct Parsed {
    pub document: Document,
    pub warnings: Vec<ValidationIssue>,
}

struct Line<'a> {
    text: &'a str,
    eol: Eol,
}

fn split_lines(raw: &str) -> Vec<Line<'_>> {
    let mut lines = Vec::new();
    let mut rest = raw;
    while let Some(pos) = rest.find('\n') {
        let (text, eol) = match rest[..pos].strip_suffix('\r') {
            Some(text) => (text, Eol::CrLf),
            None => (&rest[..pos], Eol::Lf),
        };
        lines.push(Line { text, eol });
        rest = &rest[pos + 1..];
    }
    if !rest.is_empty() {
        lines.push(Line {
            text: rest,
            eol: Eol::None,
        });
    }
    lines
}

pub fn parse_with(raw: &str, version: &str, registry: &SchemaRegistry) -> ParseResult<Parsed> {
    let schema = registry.get(version)?;
    parse(raw, schema)
}

pub fn parse(raw: &str, schema: Arc<Schema>) -> ParseResult<Parsed> {
    let lines = split_lines(raw);
    let mut parser = Parser {
        schema: Arc::clone(&schema),
        lines: &lines,
        pos: 0,
        document: Document::new(schema),
        warnings: Vec::new(),
    };
    parser.run()?;
    tracing::trace!(
        version = parser.document.version(),
        lines = lines.len(),
        warnings = parser.warnings.len(),
        "parsed control file"
    );
    Ok(Parsed {
        document: parser.document,
        warnings: parser.warnings,
    })
}

pub fn serialize(document: &Document) -> String {
    let mut out = String::new();
    document.write_to(&mut out);
    out
}

struct Parser<'a> {
    schema: Arc<Schema>,
    lines: &'a [Line<'a>],
    pos: usize,
    document: Document,
    warnings: Vec<ValidationIssue>,
}

impl Parser<'_> {
    fn run(&mut self) -> ParseResult<()> {
        let schema = Arc::clone(&self.schema);
        for (s_idx, section) in schema.sections().iter().enumerate() {
            if s_idx == 0 {
                self.read_preamble(section)?;
            } else {
                self.skip_opaque();
                self.read_header(section)?;
            }
            self.read_section(s_idx, section)?;
        }

        while self.pos < self.lines.len() {
            let line = &self.lines[self.pos];
            let kind = match self.opaque_kind(line.text) {
                Some(kind) => kind,
                None => OpaqueKind::Trailing,
            };
            self.push_opaque(kind);
        }
        Ok(())
    }

    fn opaque_kind(&self, text: &str) -> Option<OpaqueKind> {
        if text.trim().is_empty() {
            Some(OpaqueKind::Blank)
        } else if self.schema.is_comment(text) {
            Some(OpaqueKind::Comment)
        } else {
            None
        }
    }

    fn push_opaque(&mut self, kind: OpaqueKind) {
        let line = &self.lines[self.pos];
        self.document.entries.push(Entry::Opaque(OpaqueLine {
            kind,
            text: line.text.to_string(),
            eol: line.eol,
        }));
        self.pos += 1;
    }

    fn skip_opaque(&mut self) {
        while let Some(line) = self.lines.get(self.pos) {
            match self.opaque_kind(line.text) {
                Some(kind) => self.push_opaque(kind),
                None => break,
            }
        }
    }

    /// Data lines may be blank, so only comments are skipped between rows.
    fn skip_comments(&mut self) {
        while let Some(line) = self.lines.get(self.pos) {
            if !self.schema.is_comment(line.text) {
                break;
            }
            self.push_opaque(OpaqueKind::Comment);
        }
    }

    /// A later card header cannot be an entity row, and neither can the last
    /// blank line before it, which separates the cards. Other blank lines are
    /// rows: edits may append blank instances.
    fn ends_entity_rows(&self, s_idx: usize) -> bool {
        let Some(line) = self.lines.get(self.pos) else {
            return false;
        };
        if self.is_later_header(s_idx, line.text) {
            return true;
        }
        if !line.text.trim().is_empty() {
            return false;
        }
        for next in &self.lines[self.pos + 1..] {
            if next.text.trim().is_empty() {
                return false;
            }
            if !self.schema.is_comment(next.text) {
                return self.is_later_header(s_idx, next.text);
            }
        }
        false
    }

    fn is_later_header(&self, s_idx: usize, text: &str) -> bool {
        self.schema.sections()[s_idx + 1..]
            .iter()
            .any(|later| is_header(text, &later.header))
    }

    /// Everything before the first card header is kept as preamble.
    fn read_preamble(&mut self, section: &SectionDef) -> ParseResult<()> {
        let start = self
            .lines
            .iter()
            .position(|line| is_header(line.text, &section.header))
            .ok_or_else(|| ParseError::MissingSection {
                section: section.name.clone(),
            })?;
        while self.pos < start {
            self.push_opaque(OpaqueKind::Preamble);
        }
        self.read_header(section)
    }

    fn read_header(&mut self, section: &SectionDef) -> ParseResult<()> {
        let line = self
            .lines
            .get(self.pos)
            .ok_or_else(|| ParseError::MissingSection {
                section: section.name.clone(),
            })?;
        if !is_header(line.text, &section.header) {
            return Err(ParseError::UnexpectedHeader {
                section: section.name.clone(),
                line: self.pos + 1,
                found: line.text.to_string(),
            });
        }
        self.document.entries.push(Entry::Header(HeaderLine {
            section: section.name.clone(),
            text: line.text.to_string(),
            eol: line.eol,
        }));
        self.pos += 1;
        Ok(())
    }

    fn read_section(&mut self, s_idx: usize, section: &SectionDef) -> ParseResult<()> {
        match &section.repeat {
            RepeatRule::Once => {
                self.skip_comments();
                let row = self.read_row(s_idx, section, 0, 0)?;
                self.push_instance(section, vec![row]);
            }
            RepeatRule::Lines { count } => {
                let mut rows = Vec::with_capacity(*count);
                for line in 0..*count {
                    rows.push(self.read_row(s_idx, section, 0, line)?);
                }
                self.push_instance(section, rows);
            }
            RepeatRule::PerEntity { count } => {
                let entities = self.count_of(section, count)?;
                for instance in 0..entities {
                    self.skip_comments();
                    if self.ends_entity_rows(s_idx) {
                        return Err(ParseError::Truncated {
                            section: section.name.clone(),
                            line: self.pos + 1,
                        });
                    }
                    let row = self.read_row(s_idx, section, instance, 0)?;
                    self.push_instance(section, vec![row]);
                }
            }
            RepeatRule::Values { count, per_line } => {
                let values = self.count_of(section, count)?;
                let line_count = values.div_ceil(*per_line);
                let mut rows = Vec::new();
                for line in 0..line_count {
                    // Continuation lines are positional.
                    if line == 0 {
                        self.skip_comments();
                    }
                    rows.push(self.read_row(s_idx, section, 0, line)?);
                }
                self.push_instance(section, rows);
            }
        }
        Ok(())
    }

    fn push_instance(&mut self, section: &SectionDef, rows: Vec<Row>) {
        self.document.entries.push(Entry::Section(SectionInstance {
            section: section.name.clone(),
            rows,
        }));
    }

    fn count_of(&self, section: &SectionDef, count: &str) -> ParseResult<usize> {
        let invalid = |text: String| ParseError::InvalidCount {
            section: section.name.clone(),
            field: count.to_string(),
            text,
        };
        let cell = self
            .document
            .field(count)
            .ok_or_else(|| invalid(String::new()))?;
        match cell.value {
            Value::Integer(n) if n >= 0 => usize::try_from(n).map_err(|_| invalid(cell.text.clone())),
            _ => Err(invalid(cell.text.trim().to_string())),
        }
    }

    fn read_row(
        &mut self,
        s_idx: usize,
        section: &SectionDef,
        instance: usize,
        line_in_instance: usize,
    ) -> ParseResult<Row> {
        let line = self
            .lines
            .get(self.pos)
            .ok_or_else(|| ParseError::Truncated {
                section: section.name.clone(),
                line: self.pos + 1,
            })?;
        let (label, cells, trailing) = match self.schema.layout() {
            LineLayout::Fixed { label_width } => {
                split_fixed(line.text, section.label.then_some(label_width), self.schema.column_spans(s_idx))
            }
            LineLayout::Delimited { delimiter } => split_delimited(
                line.text,
                delimiter,
                section.label,
                self.schema.cells_per_line(s_idx),
                section.fields.last().is_some_and(|f| f.is_rest_of_line())
                    && !matches!(section.repeat, RepeatRule::Values { .. }),
            ),
        };

        let mut decoded = Vec::with_capacity(cells.len());
        for (cell_idx, text) in cells.into_iter().enumerate() {
            let Some(field) = self.schema.cell_field(s_idx, cell_idx) else {
                break;
            };
            let cell = FieldValue::decode(field, text);
            if let Value::Unparsed(bad) = &cell.value {
                let position = match section.repeat {
                    RepeatRule::Values { per_line, .. } => Some(line_in_instance * per_line + cell_idx),
                    RepeatRule::Lines { .. } => Some(line_in_instance),
                    _ => None,
                };
                self.warnings.push(ValidationIssue {
                    location: Some(FieldRef {
                        section: section.name.clone(),
                        instance,
                        field: field.name.clone(),
                        position,
                    }),
                    severity: Severity::Warning,
                    kind: IssueKind::DecodeWarning,
                    reason: format!(
                        "line {}: cannot read '{bad}' as {}",
                        self.pos + 1,
                        field.kind.as_str()
                    ),
                    value: Some(bad.clone()),
                });
            }
            decoded.push(cell);
        }

        let row = Row {
            label: label.map(str::to_string),
            cells: decoded,
            trailing: trailing.to_string(),
            eol: line.eol,
        };
        self.pos += 1;
        Ok(row)
    }
}

fn is_header(text: &str, keyword: &str) -> bool {
    text.trim_start()
        .get(..keyword.len())
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case(keyword))
}

fn byte_offset(text: &str, column: usize) -> usize {
    text.char_indices()
        .nth(column)
        .map(|(offset, _)| offset)
        .unwrap_or(text.len())
}

type Split<'a> = (Option<&'a str>, Vec<&'a str>, &'a str);

fn split_fixed<'a>(
    text: &'a str,
    label_width: Option<usize>,
    spans: &[w2_schema::ColumnSpan],
) -> Split<'a> {
    let columns = text.chars().count();
    let label_end = label_width.map_or(0, |width| byte_offset(text, width));
    let label = label_width.map(|_| &text[..label_end]);

    let mut cells = Vec::with_capacity(spans.len());
    let mut consumed = label_end;
    for span in spans {
        if span.start >= columns {
            break;
        }
        let start = byte_offset(text, span.start);
        let end = span.end.map_or(text.len(), |end| byte_offset(text, end));
        cells.push(&text[start..end]);
        consumed = end;
    }
    (label, cells, &text[consumed..])
}

fn split_delimited(
    text: &str,
    delimiter: char,
    labeled: bool,
    max_cells: usize,
    last_takes_rest: bool,
) -> Split<'_> {
    let mut rest = text;
    let label = if labeled {
        let end = rest.find(delimiter).unwrap_or(rest.len());
        let label = &rest[..end];
        rest = &rest[end..];
        Some(label)
    } else {
        None
    };

    let mut cells = Vec::with_capacity(max_cells);
    let mut needs_delimiter = labeled;
    while cells.len() < max_cells {
        let body = if needs_delimiter {
            match rest.strip_prefix(delimiter) {
                Some(body) => body,
                None => break,
            }
        } else {
            needs_delimiter = true;
            rest
        };
        if last_takes_rest && cells.len() + 1 == max_cells {
            cells.push(body);
            rest = "";
            break;
        }
        let end = body.find(delimiter).unwrap_or(body.len());
        cells.push(&body[..end]);
        rest = &body[end..];
    }
    (label, cells, rest)
}

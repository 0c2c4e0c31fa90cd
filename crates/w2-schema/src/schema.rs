//! Checked, indexed schema for one engine version.

use std::collections::HashMap;

use crate::def::{FieldDef, FieldKind, LineLayout, RepeatRule, RuleDef, SchemaDef, SectionDef};
use crate::{SchemaError, SchemaResult};

/// Position of a field inside a schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldLocation {
    pub section: usize,
    pub field: usize,
}

/// Character columns occupied by one cell of a fixed-width line.
///
/// `end == None` means the cell runs to the end of the line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnSpan {
    pub start: usize,
    pub end: Option<usize>,
}

impl ColumnSpan {
    pub fn width(&self) -> Option<usize> {
        self.end.map(|end| end - self.start)
    }

    pub fn contains(&self, column: usize) -> bool {
        column >= self.start && self.end.is_none_or(|end| column < end)
    }
}

#[derive(Debug)]
pub struct Schema {
    def: SchemaDef,
    section_index: HashMap<String, usize>,
    field_index: HashMap<String, FieldLocation>,
    spans: Vec<Vec<ColumnSpan>>,
}

impl Schema {
    pub fn from_yaml(yaml: &str) -> SchemaResult<Self> {
        let def: SchemaDef = serde_yaml::from_str(yaml)?;
        Self::from_def(def)
    }

    pub fn from_def(def: SchemaDef) -> SchemaResult<Self> {
        let malformed = |what: String| SchemaError::Malformed {
            version: def.version.clone(),
            what,
        };

        if def.version.trim().is_empty() {
            return Err(malformed("version id is empty".to_string()));
        }
        if def.sections.is_empty() {
            return Err(malformed("no sections declared".to_string()));
        }
        if def.comment_prefixes.iter().any(|p| p.is_empty()) {
            return Err(malformed("empty comment prefix".to_string()));
        }
        if let LineLayout::Delimited { delimiter } = def.layout
            && (delimiter == '\n' || delimiter == '\r')
        {
            return Err(malformed("line terminator used as delimiter".to_string()));
        }

        let mut section_index = HashMap::new();
        let mut field_index = HashMap::new();

        for (s_idx, section) in def.sections.iter().enumerate() {
            if section.header.trim().is_empty() {
                return Err(malformed(format!("section '{}' has no header", section.name)));
            }
            if section_index
                .insert(section.name.to_ascii_uppercase(), s_idx)
                .is_some()
            {
                return Err(malformed(format!("duplicate section '{}'", section.name)));
            }
            if section.fields.is_empty() {
                return Err(malformed(format!("section '{}' has no fields", section.name)));
            }

            for (f_idx, field) in section.fields.iter().enumerate() {
                check_field(&def.layout, section, f_idx, field).map_err(&malformed)?;
                let location = FieldLocation {
                    section: s_idx,
                    field: f_idx,
                };
                if field_index
                    .insert(field.name.to_ascii_uppercase(), location)
                    .is_some()
                {
                    return Err(malformed(format!("duplicate field '{}'", field.name)));
                }
            }

            match &section.repeat {
                RepeatRule::Once => {}
                RepeatRule::Lines { count } => {
                    if *count == 0 {
                        return Err(malformed(format!(
                            "section '{}' declares zero lines",
                            section.name
                        )));
                    }
                }
                RepeatRule::PerEntity { count } | RepeatRule::Values { count, .. } => {
                    check_count_field(&def, &field_index, s_idx, count).map_err(&malformed)?;
                }
            }

            if let RepeatRule::Values { per_line, .. } = &section.repeat {
                if *per_line == 0 {
                    return Err(malformed(format!(
                        "section '{}' has per_line = 0",
                        section.name
                    )));
                }
                if section.fields.len() != 1 {
                    return Err(malformed(format!(
                        "values section '{}' must declare exactly one field",
                        section.name
                    )));
                }
                if section.fields[0].is_rest_of_line() {
                    return Err(malformed(format!(
                        "values section '{}' needs a fixed field width",
                        section.name
                    )));
                }
            }
        }

        for rule in &def.rules {
            check_rule(&def, &field_index, rule).map_err(&malformed)?;
        }

        let spans = def
            .sections
            .iter()
            .map(|section| compute_spans(&def.layout, section))
            .collect();

        Ok(Self {
            def,
            section_index,
            field_index,
            spans,
        })
    }

    pub fn version(&self) -> &str {
        &self.def.version
    }

    pub fn description(&self) -> &str {
        &self.def.description
    }

    pub fn layout(&self) -> LineLayout {
        self.def.layout
    }

    pub fn comment_prefixes(&self) -> &[String] {
        &self.def.comment_prefixes
    }

    pub fn is_comment(&self, line: &str) -> bool {
        let line = line.trim_start();
        self.def
            .comment_prefixes
            .iter()
            .any(|prefix| line.starts_with(prefix.as_str()))
    }

    pub fn sections(&self) -> &[SectionDef] {
        &self.def.sections
    }

    pub fn rules(&self) -> &[RuleDef] {
        &self.def.rules
    }

    pub fn definition(&self) -> &SchemaDef {
        &self.def
    }

    pub fn section_position(&self, name: &str) -> Option<usize> {
        self.section_index.get(&name.to_ascii_uppercase()).copied()
    }

    pub fn section(&self, name: &str) -> Option<&SectionDef> {
        self.section_position(name).map(|idx| &self.def.sections[idx])
    }

    /// Find a field by name anywhere in the schema (case-insensitive).
    pub fn locate(&self, field: &str) -> Option<FieldLocation> {
        self.field_index.get(&field.to_ascii_uppercase()).copied()
    }

    pub fn field(&self, location: FieldLocation) -> &FieldDef {
        &self.def.sections[location.section].fields[location.field]
    }

    pub fn field_named(&self, field: &str) -> Option<(FieldLocation, &FieldDef)> {
        self.locate(field).map(|loc| (loc, self.field(loc)))
    }

    /// Column spans of one data line of `section`; empty for delimited layouts.
    pub fn column_spans(&self, section: usize) -> &[ColumnSpan] {
        self.spans.get(section).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Resolve a character column of a fixed-width data line to its cell.
    ///
    /// Returns the cell position within the line and the field stored there.
    pub fn field_at_column(&self, section: usize, column: usize) -> Option<(usize, &FieldDef)> {
        let spans = self.column_spans(section);
        let idx = spans.partition_point(|span| span.end.is_some_and(|end| end <= column));
        let span = spans.get(idx)?;
        if !span.contains(column) {
            return None;
        }
        let fields = &self.def.sections[section].fields;
        let field = match self.def.sections[section].repeat {
            RepeatRule::Values { .. } => &fields[0],
            _ => &fields[idx],
        };
        Some((idx, field))
    }

    /// Field stored in cell `cell` of a data line of `section`.
    pub fn cell_field(&self, section: usize, cell: usize) -> Option<&FieldDef> {
        let section = self.def.sections.get(section)?;
        match section.repeat {
            RepeatRule::Values { per_line, .. } if cell < per_line => section.fields.first(),
            RepeatRule::Values { .. } => None,
            _ => section.fields.get(cell),
        }
    }

    /// Number of cells a full data line of `section` holds.
    pub fn cells_per_line(&self, section: usize) -> usize {
        let section = &self.def.sections[section];
        match section.repeat {
            RepeatRule::Values { per_line, .. } => per_line,
            _ => section.fields.len(),
        }
    }
}

fn check_field(
    layout: &LineLayout,
    section: &SectionDef,
    f_idx: usize,
    field: &FieldDef,
) -> Result<(), String> {
    let name = format!("{}.{}", section.name, field.name);
    if field.name.trim().is_empty() {
        return Err(format!("unnamed field in section '{}'", section.name));
    }
    if field.width == Some(0) {
        return Err(format!("field {name} has zero width"));
    }
    if matches!(layout, LineLayout::Fixed { .. }) && field.width.is_none() {
        let last = f_idx + 1 == section.fields.len();
        if !(last && field.kind == FieldKind::Text) {
            return Err(format!(
                "field {name} needs a width (only a final text field may run to end of line)"
            ));
        }
    }
    if (field.min.is_some() || field.max.is_some()) && !field.is_numeric() {
        return Err(format!("field {name} has a numeric range but is {}", field.kind.as_str()));
    }
    if let (Some(min), Some(max)) = (field.min, field.max)
        && min > max
    {
        return Err(format!("field {name} has min {min} > max {max}"));
    }
    match field.kind {
        FieldKind::Enum if field.allowed.is_empty() => {
            return Err(format!("enum field {name} has no allowed values"));
        }
        FieldKind::Enum => {}
        _ if !field.allowed.is_empty() => {
            return Err(format!("field {name} lists allowed values but is not an enum"));
        }
        _ => {}
    }
    if field.precision.is_some() && field.kind != FieldKind::Real {
        return Err(format!("field {name} has a precision but is not real"));
    }
    if field.kind == FieldKind::Boolean
        && field.true_token().eq_ignore_ascii_case(field.false_token())
    {
        return Err(format!("boolean field {name} uses the same token for both states"));
    }
    Ok(())
}

fn check_count_field(
    def: &SchemaDef,
    field_index: &HashMap<String, FieldLocation>,
    s_idx: usize,
    count: &str,
) -> Result<(), String> {
    let section = &def.sections[s_idx];
    let location = field_index
        .get(&count.to_ascii_uppercase())
        .ok_or_else(|| format!("section '{}' counts by unknown field '{count}'", section.name))?;
    if location.section >= s_idx {
        return Err(format!(
            "section '{}' counts by '{count}', which is not declared in an earlier section",
            section.name
        ));
    }
    let count_section = &def.sections[location.section];
    if count_section.repeat != RepeatRule::Once {
        return Err(format!(
            "count field '{count}' must live in a single-instance section"
        ));
    }
    if count_section.fields[location.field].kind != FieldKind::Integer {
        return Err(format!("count field '{count}' must be an integer"));
    }
    Ok(())
}

fn check_rule(
    def: &SchemaDef,
    field_index: &HashMap<String, FieldLocation>,
    rule: &RuleDef,
) -> Result<(), String> {
    let lookup = |name: &str| {
        field_index
            .get(&name.to_ascii_uppercase())
            .copied()
            .ok_or_else(|| format!("rule references unknown field '{name}'"))
    };
    let kind_of = |loc: FieldLocation| def.sections[loc.section].fields[loc.field].kind;

    match rule {
        RuleDef::IndexWithin { field, count } => {
            let target = lookup(field)?;
            let count_loc = lookup(count)?;
            if kind_of(target) != FieldKind::Integer || kind_of(count_loc) != FieldKind::Integer {
                return Err(format!("index rule {field} within {count} needs integer fields"));
            }
            if def.sections[count_loc.section].repeat != RepeatRule::Once {
                return Err(format!("index rule count '{count}' must be a single value"));
            }
        }
        RuleDef::NotGreater { field, bound } => {
            let a = lookup(field)?;
            let b = lookup(bound)?;
            if a.section != b.section {
                return Err(format!("ordering rule {field} <= {bound} spans two sections"));
            }
            let numeric = |k: FieldKind| matches!(k, FieldKind::Integer | FieldKind::Real);
            if !numeric(kind_of(a)) || !numeric(kind_of(b)) {
                return Err(format!("ordering rule {field} <= {bound} needs numeric fields"));
            }
        }
    }
    Ok(())
}

fn compute_spans(layout: &LineLayout, section: &SectionDef) -> Vec<ColumnSpan> {
    let LineLayout::Fixed { label_width } = *layout else {
        return Vec::new();
    };
    let mut start = if section.label { label_width } else { 0 };
    let widths: Vec<Option<usize>> = match section.repeat {
        RepeatRule::Values { per_line, .. } => vec![section.fields[0].width; per_line],
        _ => section.fields.iter().map(|f| f.width).collect(),
    };

    let mut spans = Vec::with_capacity(widths.len());
    for width in widths {
        let end = width.map(|w| start + w);
        spans.push(ColumnSpan { start, end });
        if let Some(end) = end {
            start = end;
        }
    }
    spans
}

#[cfg(test)]
mod tests {
    use super::*;

    const SMALL: &str = r#"
version: test-fixed
layout: { kind: fixed, label_width: 8 }
sections:
  - name: GRID
    header: GRID
    fields:
      - { name: NWB, type: integer, width: 8, min: 1 }
      - { name: NBR, type: integer, width: 8, min: 1 }
  - name: BRANCH
    header: BRANCH G
    repeat: { kind: per_entity, count: NBR }
    fields:
      - { name: US, type: integer, width: 8 }
      - { name: DS, type: integer, width: 8 }
  - name: DLT DATE
    header: DLT DATE
    repeat: { kind: values, count: NWB, per_line: 3 }
    fields:
      - { name: DLTD, type: real, width: 8, precision: 2 }
rules:
  - { kind: not_greater, field: US, bound: DS }
"#;

    #[test]
    fn lookups_are_case_insensitive() {
        let schema = Schema::from_yaml(SMALL).unwrap();
        assert_eq!(schema.section_position("branch"), Some(1));
        let loc = schema.locate("ds").unwrap();
        assert_eq!(loc, FieldLocation { section: 1, field: 1 });
        assert_eq!(schema.field(loc).name, "DS");
    }

    #[test]
    fn spans_follow_label_and_widths() {
        let schema = Schema::from_yaml(SMALL).unwrap();
        let spans = schema.column_spans(0);
        assert_eq!(spans[0], ColumnSpan { start: 8, end: Some(16) });
        assert_eq!(spans[1], ColumnSpan { start: 16, end: Some(24) });

        let values = schema.column_spans(2);
        assert_eq!(values.len(), 3);
        assert_eq!(values[2], ColumnSpan { start: 24, end: Some(32) });
    }

    #[test]
    fn field_at_column_resolves_cells() {
        let schema = Schema::from_yaml(SMALL).unwrap();
        assert!(schema.field_at_column(0, 3).is_none());
        let (cell, field) = schema.field_at_column(0, 17).unwrap();
        assert_eq!(cell, 1);
        assert_eq!(field.name, "NBR");
        assert!(schema.field_at_column(0, 24).is_none());

        let (cell, field) = schema.field_at_column(2, 30).unwrap();
        assert_eq!(cell, 2);
        assert_eq!(field.name, "DLTD");
    }

    #[test]
    fn count_must_precede_section() {
        let yaml = SMALL.replace("count: NBR", "count: DLTD");
        let err = Schema::from_yaml(&yaml).unwrap_err();
        assert!(matches!(err, SchemaError::Malformed { .. }), "{err}");
    }

    #[test]
    fn fixed_fields_need_widths() {
        let yaml = SMALL.replace(
            "{ name: NWB, type: integer, width: 8, min: 1 }",
            "{ name: NWB, type: integer, min: 1 }",
        );
        assert!(Schema::from_yaml(&yaml).is_err());
    }

    #[test]
    fn inverted_range_is_malformed() {
        let yaml = SMALL.replace("min: 1 }\n      - { name: NBR", "min: 5, max: 2 }\n      - { name: NBR");
        let err = Schema::from_yaml(&yaml).unwrap_err();
        assert!(err.to_string().contains("min 5 > max 2"), "{err}");
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let yaml = SMALL.replace("min: 1 }", "minimum: 1 }");
        assert!(matches!(
            Schema::from_yaml(&yaml),
            Err(SchemaError::Yaml(_))
        ));
    }

    #[test]
    fn rule_fields_must_exist() {
        let yaml = SMALL.replace("bound: DS", "bound: DSX");
        let err = Schema::from_yaml(&yaml).unwrap_err();
        assert!(err.to_string().contains("DSX"));
    }
}

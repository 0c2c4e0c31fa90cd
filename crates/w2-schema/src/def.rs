//! Schema definitions as they appear in the registry YAML files.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct SchemaDef {
    pub version: String,
    #[serde(default)]
    pub description: String,
    pub layout: LineLayout,
    #[serde(default)]
    pub comment_prefixes: Vec<String>,
    pub sections: Vec<SectionDef>,
    #[serde(default)]
    pub rules: Vec<RuleDef>,
}

/// How a data line is cut into cells.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LineLayout {
    /// Fixed-width columns after a label area of `label_width` characters.
    Fixed { label_width: usize },
    /// Cells separated by a single delimiter character, first cell is the label.
    Delimited { delimiter: char },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct SectionDef {
    pub name: String,
    /// Keyword the card header line starts with (case-insensitive).
    pub header: String,
    #[serde(default = "default_label")]
    pub label: bool,
    #[serde(default)]
    pub repeat: RepeatRule,
    pub fields: Vec<FieldDef>,
}

fn default_label() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RepeatRule {
    /// One instance made of one line.
    #[default]
    Once,
    /// One instance made of exactly `count` lines.
    Lines { count: usize },
    /// One single-line instance per entity; `count` names an integer field.
    PerEntity { count: String },
    /// One instance holding `count` values of the section's only field,
    /// `per_line` values per physical line.
    Values { count: String, per_line: usize },
}

impl RepeatRule {
    pub fn count_field(&self) -> Option<&str> {
        match self {
            RepeatRule::PerEntity { count } | RepeatRule::Values { count, .. } => Some(count),
            RepeatRule::Once | RepeatRule::Lines { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct FieldDef {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: FieldKind,
    /// Column width in characters. `None` on a final text field means "rest of line".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<usize>,
    /// Decimal places used when a real value is rendered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precision: Option<usize>,
    #[serde(default)]
    pub align: Align,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub true_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub false_token: Option<String>,
    #[serde(default)]
    pub required: bool,
}

impl FieldDef {
    pub fn true_token(&self) -> &str {
        self.true_token.as_deref().unwrap_or("ON")
    }

    pub fn false_token(&self) -> &str {
        self.false_token.as_deref().unwrap_or("OFF")
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self.kind, FieldKind::Integer | FieldKind::Real)
    }

    pub fn is_rest_of_line(&self) -> bool {
        self.width.is_none() && self.kind == FieldKind::Text
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Integer,
    Real,
    Enum,
    Boolean,
    Text,
}

impl FieldKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FieldKind::Integer => "integer",
            FieldKind::Real => "real",
            FieldKind::Enum => "enum",
            FieldKind::Boolean => "boolean",
            FieldKind::Text => "text",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Align {
    Left,
    #[default]
    Right,
}

/// Cross-field consistency rules checked by the validator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleDef {
    /// Every value of `field` must be a 1-based index into the entities counted by `count`.
    IndexWithin { field: String, count: String },
    /// Within one instance `field <= bound`.
    NotGreater { field: String, bound: String },
}

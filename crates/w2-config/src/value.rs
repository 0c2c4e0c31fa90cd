//! Typed cell values and their text encoding.

use serde::{Deserialize, Serialize};
use w2_schema::{Align, FieldDef, FieldKind};

use crate::document::EditError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Value {
    Integer(i64),
    Real(f64),
    Boolean(bool),
    /// Enumerated option, or a boolean cell holding an unknown token.
    Token(String),
    Text(String),
    Blank,
    /// Cell text that could not be read as the declared type.
    Unparsed(String),
}

impl Value {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Integer(_) => "integer",
            Value::Real(_) => "real",
            Value::Boolean(_) => "boolean",
            Value::Token(_) => "token",
            Value::Text(_) => "text",
            Value::Blank => "blank",
            Value::Unparsed(_) => "unparsed",
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(v) => Some(*v as f64),
            Value::Real(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Token(s) | Value::Text(s) | Value::Unparsed(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_blank(&self) -> bool {
        matches!(self, Value::Blank)
    }
}

/// Read one cell according to its field declaration.
///
/// Never fails: text that does not fit the declared type comes back as
/// [`Value::Unparsed`] holding the trimmed text.
pub fn decode(field: &FieldDef, text: &str) -> Value {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Value::Blank;
    }
    match field.kind {
        FieldKind::Integer => parse_integer(trimmed)
            .map(Value::Integer)
            .unwrap_or_else(|| Value::Unparsed(trimmed.to_string())),
        FieldKind::Real => parse_real(trimmed)
            .map(Value::Real)
            .unwrap_or_else(|| Value::Unparsed(trimmed.to_string())),
        FieldKind::Boolean => {
            if trimmed.eq_ignore_ascii_case(field.true_token().trim()) {
                Value::Boolean(true)
            } else if trimmed.eq_ignore_ascii_case(field.false_token().trim()) {
                Value::Boolean(false)
            } else {
                Value::Token(trimmed.to_string())
            }
        }
        FieldKind::Enum => Value::Token(trimmed.to_string()),
        FieldKind::Text => Value::Text(trimmed.to_string()),
    }
}

fn parse_integer(text: &str) -> Option<i64> {
    let digits = text.strip_prefix('+').unwrap_or(text);
    digits.parse().ok()
}

/// Fortran list-directed reals: optional `D` exponent, bare `5.` or `.5`.
fn parse_real(text: &str) -> Option<f64> {
    let normalized: String = text
        .chars()
        .map(|c| if c == 'd' || c == 'D' { 'E' } else { c })
        .collect();
    let value: f64 = normalized.parse().ok()?;
    value.is_finite().then_some(value)
}

/// Format `value` as the cell text of `field`, padded to its width.
pub fn render(field: &FieldDef, value: &Value) -> Result<String, EditError> {
    let body = match (field.kind, value) {
        (_, Value::Blank) => String::new(),
        (FieldKind::Integer, Value::Integer(v)) => v.to_string(),
        (FieldKind::Real, Value::Real(v)) => format_real(field, *v)?,
        (FieldKind::Real, Value::Integer(v)) => format_real(field, *v as f64)?,
        (FieldKind::Boolean, Value::Boolean(true)) => field.true_token().trim().to_string(),
        (FieldKind::Boolean, Value::Boolean(false)) => field.false_token().trim().to_string(),
        (FieldKind::Enum, Value::Token(s)) => s.trim().to_string(),
        (FieldKind::Text, Value::Text(s)) => s.clone(),
        (kind, other) => {
            return Err(EditError::TypeMismatch {
                field: field.name.clone(),
                expected: kind.as_str(),
                found: other.kind_name(),
            });
        }
    };
    pad(field, body)
}

fn format_real(field: &FieldDef, value: f64) -> Result<String, EditError> {
    if !value.is_finite() {
        return Err(EditError::TypeMismatch {
            field: field.name.clone(),
            expected: "finite real",
            found: "non-finite real",
        });
    }
    let text = match field.precision {
        Some(precision) => format!("{value:.precision$}"),
        None => {
            let text = value.to_string();
            if text.contains('.') || text.contains('e') {
                text
            } else {
                format!("{text}.")
            }
        }
    };
    Ok(text)
}

/// Pad `body` to the field width using the field alignment.
pub(crate) fn pad(field: &FieldDef, body: String) -> Result<String, EditError> {
    let Some(width) = field.width else {
        return Ok(body);
    };
    let len = body.chars().count();
    if len > width {
        return Err(EditError::Overflow {
            field: field.name.clone(),
            width,
            text: body,
        });
    }
    Ok(match field.align {
        Align::Right => format!("{body:>width$}"),
        Align::Left => format!("{body:<width$}"),
    })
}

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    /// Cell text could not be read as the declared type.
    DecodeWarning,
    /// Value outside its numeric range, enum set or boolean tokens.
    Domain,
    Required,
    /// Instance or value count differs from its count field.
    CountMismatch,
    /// Index pointing at an entity that does not exist.
    Reference,
    Ordering,
    UnrecognizedContent,
}

/// Where an issue was found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldRef {
    pub section: String,
    pub instance: usize,
    pub field: String,
    /// Value index in a wrapped list, or line index in a multi-line card.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<usize>,
}

impl std::fmt::Display for FieldRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}[{}].{}", self.section, self.instance, self.field)?;
        if let Some(position) = self.position {
            write!(f, "[{position}]")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<FieldRef>,
    pub severity: Severity,
    pub kind: IssueKind,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl ValidationIssue {
    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }

    /// Field name the issue is attached to, if any.
    pub fn field(&self) -> Option<&str> {
        self.location.as_ref().map(|loc| loc.field.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub schema_version: String,
    pub issues: Vec<ValidationIssue>,
}

impl ValidationReport {
    /// A document may be staged only when no error was found.
    pub fn is_runnable(&self) -> bool {
        self.error_count() == 0
    }

    pub fn errors(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues.iter().filter(|issue| issue.is_error())
    }

    pub fn warnings(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues.iter().filter(|issue| !issue.is_error())
    }

    pub fn error_count(&self) -> usize {
        self.errors().count()
    }

    pub fn warning_count(&self) -> usize {
        self.warnings().count()
    }
}

//! Control file loading, saving and introspection.

use std::path::Path;

use w2_config::{Document, InputFileNames, InputSet, Parsed, ValidationReport};
use w2_schema::SchemaRegistry;

use crate::config::OrchestratorConfig;
use crate::error::AppResult;

/// Summary of a section for listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionSummary {
    pub name: String,
    pub instances: usize,
}

/// Load a control file written for a bundled schema version.
pub fn load_control_file(path: &Path, version: &str) -> AppResult<Parsed> {
    load_control_file_with(path, version, SchemaRegistry::builtin())
}

pub fn load_control_file_with(
    path: &Path,
    version: &str,
    registry: &SchemaRegistry,
) -> AppResult<Parsed> {
    let schema = registry.get(version)?;
    Ok(w2_config::load_document(path, schema)?)
}

/// Load the control file the orchestrator will stage from `source_dir`.
pub fn load_source(source_dir: &Path, config: &OrchestratorConfig, version: &str) -> AppResult<Parsed> {
    load_control_file(&source_dir.join(&config.control_file), version)
}

/// Load the control file together with the bathymetry and profile beside it.
pub fn load_input_set(dir: &Path, names: &InputFileNames, version: &str) -> AppResult<InputSet> {
    let schema = SchemaRegistry::builtin().get(version)?;
    Ok(InputSet::from_dir(dir, names, schema)?)
}

pub fn save_control_file(path: &Path, document: &Document) -> AppResult<()> {
    Ok(w2_config::save_document(path, document)?)
}

/// Validate, folding in parse warnings the validator did not report itself.
pub fn check(parsed: &Parsed) -> ValidationReport {
    let mut report = w2_config::validate(&parsed.document);
    let extra: Vec<_> = parsed
        .warnings
        .iter()
        .filter(|warning| {
            !report
                .issues
                .iter()
                .any(|issue| issue.kind == warning.kind && issue.location == warning.location)
        })
        .cloned()
        .collect();
    report.issues.extend(extra);
    report
}

pub fn list_sections(document: &Document) -> Vec<SectionSummary> {
    document
        .schema()
        .sections()
        .iter()
        .map(|section| SectionSummary {
            name: section.name.clone(),
            instances: document.instance_count(&section.name),
        })
        .collect()
}

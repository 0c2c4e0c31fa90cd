//! Copy declared outputs from a working directory into a bundle.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use walkdir::WalkDir;

use crate::ResultsResult;
use crate::hash::ContentHash;
use crate::types::ArtifactRecord;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaptureReport {
    pub artifacts: Vec<ArtifactRecord>,
    /// Patterns that matched nothing.
    pub missing: Vec<String>,
}

/// Copy every file under `working_dir` that matches one of `patterns` into
/// `dest`, keeping relative paths. A file is recorded once, under the first
/// pattern that selects it.
pub fn capture_artifacts(
    working_dir: &Path,
    dest: &Path,
    patterns: &[String],
    complete: bool,
) -> ResultsResult<CaptureReport> {
    let mut files = Vec::new();
    for entry in WalkDir::new(working_dir).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(working_dir) else {
            continue;
        };
        let relative = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        files.push((relative, entry.into_path()));
    }

    let mut report = CaptureReport::default();
    let mut taken = HashSet::new();
    for pattern in patterns {
        let mut matched = false;
        for (relative, source) in &files {
            if !pattern_matches(pattern, relative) {
                continue;
            }
            matched = true;
            if !taken.insert(relative.clone()) {
                continue;
            }
            let target = dest.join(relative);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            let size = fs::copy(source, &target)?;
            let sha256 = ContentHash::of_file(&target)?;
            tracing::trace!(file = %relative, size, "captured artifact");
            report.artifacts.push(ArtifactRecord {
                pattern: pattern.clone(),
                relative_path: relative.clone(),
                size,
                sha256,
                complete,
            });
        }
        if !matched {
            tracing::warn!(pattern = %pattern, "declared output not found");
            report.missing.push(pattern.clone());
        }
    }
    Ok(report)
}

/// Match a `/`-separated relative path against a pattern where `*` matches
/// any run of characters within one path segment and `?` one character.
pub fn pattern_matches(pattern: &str, path: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let path: Vec<char> = path.chars().collect();

    let (mut p, mut s) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;
    while s < path.len() {
        match pattern.get(p) {
            Some('*') => {
                backtrack = Some((p, s));
                p += 1;
            }
            Some('?') if path[s] != '/' => {
                p += 1;
                s += 1;
            }
            Some(&c) if c != '?' && c == path[s] => {
                p += 1;
                s += 1;
            }
            _ => match backtrack {
                // The star may absorb one more character, but never a separator.
                Some((star, from)) if path[from] != '/' => {
                    backtrack = Some((star, from + 1));
                    p = star + 1;
                    s = from + 1;
                }
                _ => return false,
            },
        }
    }
    pattern[p..].iter().all(|&c| c == '*')
}

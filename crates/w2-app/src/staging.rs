//! Copy a source input directory into a fresh per-run working directory.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use w2_results::ContentHash;
use walkdir::WalkDir;

#[derive(Debug, thiserror::Error)]
pub enum StagingError {
    #[error("working directory already exists: {path}")]
    Conflict { path: PathBuf },

    #[error("staging I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("staging walk error: {0}")]
    Walk(#[from] walkdir::Error),
}

#[derive(Debug, Clone)]
pub struct StagedRun {
    pub working_dir: PathBuf,
    pub control_path: PathBuf,
    pub snapshot_hash: ContentHash,
    pub files_copied: usize,
}

/// Create `runs_root/<run_id>`, copy `source_dir` into it and overwrite the
/// control file with `control_text`. Paths under `exclude` are not copied.
pub fn stage(
    source_dir: &Path,
    runs_root: &Path,
    run_id: &str,
    exclude: &[PathBuf],
    control_file: &str,
    control_text: &str,
) -> Result<StagedRun, StagingError> {
    fs::create_dir_all(runs_root)?;
    let working_dir = runs_root.join(run_id);
    // Only the leaf is created here, so two runs can never share a directory.
    fs::create_dir(&working_dir).map_err(|err| match err.kind() {
        io::ErrorKind::AlreadyExists => StagingError::Conflict {
            path: working_dir.clone(),
        },
        _ => StagingError::Io(err),
    })?;

    let source = fs::canonicalize(source_dir)?;
    let mut skip: Vec<PathBuf> = exclude
        .iter()
        .filter_map(|path| fs::canonicalize(path).ok())
        .collect();
    skip.push(fs::canonicalize(&working_dir)?);

    let files_copied = copy_dir_filtered(&source, &working_dir, &skip)?;

    let control_path = working_dir.join(control_file);
    fs::write(&control_path, control_text)?;
    let snapshot_hash = ContentHash::of_bytes(control_text.as_bytes());
    tracing::debug!(
        run_id,
        files_copied,
        snapshot = snapshot_hash.short(),
        "staged working directory"
    );

    Ok(StagedRun {
        working_dir,
        control_path,
        snapshot_hash,
        files_copied,
    })
}

fn copy_dir_filtered(src: &Path, dst: &Path, skip: &[PathBuf]) -> Result<usize, StagingError> {
    let walker = WalkDir::new(src)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !skip.iter().any(|ex| e.path().starts_with(ex)));

    let mut copied = 0;
    for entry in walker {
        let entry = entry?;
        let Ok(rel) = entry.path().strip_prefix(src) else {
            continue;
        };
        if rel.as_os_str().is_empty() {
            continue;
        }
        let target = dst.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else if entry.path().is_file() {
            // Symlinks to files are copied as regular files.
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &target)?;
            copied += 1;
        } else {
            tracing::warn!(path = %entry.path().display(), "skipping non-file entry");
        }
    }
    Ok(copied)
}

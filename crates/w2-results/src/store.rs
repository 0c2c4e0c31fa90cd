//! Result bundle storage.
//!
//! Layout: `<root>/<run_id>/{manifest.json, run.log, inputs/, artifacts/}`.

use std::fs;
use std::path::{Path, PathBuf};

use crate::types::BundleManifest;
use crate::{ResultsError, ResultsResult};

const MANIFEST: &str = "manifest.json";
const LOG: &str = "run.log";

#[derive(Debug, Clone)]
pub struct BundleStore {
    root_dir: PathBuf,
}

impl BundleStore {
    pub fn new(root_dir: PathBuf) -> ResultsResult<Self> {
        fs::create_dir_all(&root_dir)?;
        Ok(Self { root_dir })
    }

    pub fn root(&self) -> &Path {
        &self.root_dir
    }

    pub fn bundle_dir(&self, run_id: &str) -> PathBuf {
        self.root_dir.join(run_id)
    }

    pub fn artifacts_dir(&self, run_id: &str) -> PathBuf {
        self.bundle_dir(run_id).join("artifacts")
    }

    pub fn has_bundle(&self, run_id: &str) -> bool {
        self.bundle_dir(run_id).join(MANIFEST).exists()
    }

    pub fn save_manifest(&self, manifest: &BundleManifest) -> ResultsResult<()> {
        let dir = self.bundle_dir(&manifest.run_id);
        fs::create_dir_all(&dir)?;
        let json = serde_json::to_string_pretty(manifest)?;
        fs::write(dir.join(MANIFEST), json)?;
        Ok(())
    }

    pub fn load_manifest(&self, run_id: &str) -> ResultsResult<BundleManifest> {
        let path = self.bundle_dir(run_id).join(MANIFEST);
        if !path.exists() {
            return Err(ResultsError::BundleNotFound {
                run_id: run_id.to_string(),
            });
        }
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Manifests of every bundle in the store, ordered by run id.
    pub fn list_bundles(&self) -> ResultsResult<Vec<BundleManifest>> {
        let mut bundles = Vec::new();
        if !self.root_dir.exists() {
            return Ok(bundles);
        }
        for entry in fs::read_dir(&self.root_dir)? {
            let entry = entry?;
            if !entry.path().is_dir() {
                continue;
            }
            let run_id = entry.file_name().to_string_lossy().to_string();
            match self.load_manifest(&run_id) {
                Ok(manifest) => bundles.push(manifest),
                Err(err) => tracing::debug!(run_id = %run_id, error = %err, "skipping bundle"),
            }
        }
        bundles.sort_by(|a, b| a.run_id.cmp(&b.run_id));
        Ok(bundles)
    }

    /// Keep the exact control file text a run was staged with.
    pub fn write_snapshot(&self, run_id: &str, file_name: &str, text: &str) -> ResultsResult<PathBuf> {
        let dir = self.bundle_dir(run_id).join("inputs");
        fs::create_dir_all(&dir)?;
        let path = dir.join(file_name);
        fs::write(&path, text)?;
        Ok(path)
    }

    pub fn write_log(&self, run_id: &str, text: &str) -> ResultsResult<PathBuf> {
        let dir = self.bundle_dir(run_id);
        fs::create_dir_all(&dir)?;
        let path = dir.join(LOG);
        fs::write(&path, text)?;
        Ok(path)
    }

    pub fn delete_bundle(&self, run_id: &str) -> ResultsResult<()> {
        let dir = self.bundle_dir(run_id);
        if dir.exists() {
            fs::remove_dir_all(dir)?;
        }
        Ok(())
    }
}

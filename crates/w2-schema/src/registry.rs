use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, OnceLock};

use crate::schema::Schema;
use crate::{SchemaError, SchemaResult};

const BUILTIN: &[(&str, &str)] = &[
    ("w2_v45.yaml", include_str!("../schemas/w2_v45.yaml")),
    ("w2_v45_csv.yaml", include_str!("../schemas/w2_v45_csv.yaml")),
];

/// Fixed-width control file layout (`w2_con.npt`).
pub const W2_V45: &str = "w2-v4.5";
/// Comma-delimited control file layout (`w2_con.csv`).
pub const W2_V45_CSV: &str = "w2-v4.5-csv";

/// Lookup table from engine version id to its schema.
///
/// Schemas are immutable once registered and handed out as `Arc`s, so a
/// registry can be shared across threads without locking.
#[derive(Debug, Default, Clone)]
pub struct SchemaRegistry {
    schemas: HashMap<String, Arc<Schema>>,
    order: Vec<String>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide registry holding the bundled engine versions.
    pub fn builtin() -> &'static SchemaRegistry {
        static REGISTRY: OnceLock<SchemaRegistry> = OnceLock::new();
        REGISTRY.get_or_init(|| {
            Self::with_builtin().expect("bundled schemas are checked by the test suite")
        })
    }

    /// Fresh registry preloaded with the bundled versions, open for additions.
    pub fn with_builtin() -> SchemaResult<Self> {
        let mut registry = Self::new();
        for (name, yaml) in BUILTIN {
            tracing::trace!(file = name, "registering bundled schema");
            registry.register_yaml(yaml)?;
        }
        Ok(registry)
    }

    pub fn register(&mut self, schema: Schema) -> SchemaResult<Arc<Schema>> {
        let version = schema.version().to_string();
        if self.schemas.contains_key(&version) {
            return Err(SchemaError::DuplicateVersion { version });
        }
        let schema = Arc::new(schema);
        self.schemas.insert(version.clone(), Arc::clone(&schema));
        self.order.push(version);
        Ok(schema)
    }

    pub fn register_yaml(&mut self, yaml: &str) -> SchemaResult<Arc<Schema>> {
        self.register(Schema::from_yaml(yaml)?)
    }

    /// Register every `*.yaml` / `*.yml` file in `dir`, in file name order.
    ///
    /// Returns the version ids that were added.
    pub fn load_dir(&mut self, dir: &Path) -> SchemaResult<Vec<String>> {
        let mut paths = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            let is_yaml = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml"));
            if path.is_file() && is_yaml {
                paths.push(path);
            }
        }
        paths.sort();

        let mut added = Vec::with_capacity(paths.len());
        for path in paths {
            let content = std::fs::read_to_string(&path)?;
            let schema = self.register_yaml(&content)?;
            tracing::debug!(path = %path.display(), version = schema.version(), "loaded schema");
            added.push(schema.version().to_string());
        }
        Ok(added)
    }

    pub fn get(&self, version: &str) -> SchemaResult<Arc<Schema>> {
        self.schemas
            .get(version)
            .cloned()
            .ok_or_else(|| SchemaError::UnknownSchemaVersion {
                version: version.to_string(),
            })
    }

    pub fn contains(&self, version: &str) -> bool {
        self.schemas.contains_key(version)
    }

    /// Registered version ids in registration order.
    pub fn versions(&self) -> Vec<&str> {
        self.order.iter().map(String::as_str).collect()
    }
}

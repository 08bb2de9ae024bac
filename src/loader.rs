//! Component registry: discovers component definitions and derives the tag
//! allowlist.
//!
//! Security guarantees:
//! - Only files directly inside the components directory are read
//! - Symlinks resolving outside that directory are skipped
//! - Only `.js` files are considered
//!
//! Definitions are read once per process. Each render executes them again
//! inside its own sandbox (see [`runtime`](crate::runtime)).

use anyhow::{anyhow, Context, Error};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// One component source file.
#[derive(Debug, Clone)]
pub struct ComponentDefinition {
    file_name: String,
    tag: Option<String>,
    source: Arc<str>,
}

impl ComponentDefinition {
    pub fn new(file_name: impl Into<String>, source: impl Into<Arc<str>>) -> Self {
        let file_name = file_name.into();
        let tag = tag_for_file(&file_name);
        Self {
            file_name,
            tag,
            source: source.into(),
        }
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Tag this file is expected to define, if its name qualifies as a
    /// custom element name.
    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    pub fn source(&self) -> &str {
        &self.source
    }
}

/// Custom element names must contain a dash.
fn tag_for_file(file_name: &str) -> Option<String> {
    let stem = Path::new(file_name).file_stem()?.to_str()?;
    stem.contains('-').then(|| stem.to_string())
}

/// Loaded definitions plus the allowlist derived from them.
#[derive(Debug, Clone, Default)]
pub struct ComponentRegistry {
    dir: PathBuf,
    definitions: Vec<ComponentDefinition>,
    allowed_tags: BTreeSet<String>,
}

impl ComponentRegistry {
    /// Scan `dir` for component definitions.
    ///
    /// An empty directory is not an error: it is logged and every render
    /// will be rejected as a disallowed tag.
    pub fn load(dir: impl AsRef<Path>) -> Result<Self, Error> {
        let dir = dir
            .as_ref()
            .canonicalize()
            .map_err(|e| anyhow!("Failed to canonicalize components dir '{}': {}", dir.as_ref().display(), e))?;

        if !dir.is_dir() {
            return Err(anyhow!("components dir must be a directory: {}", dir.display()));
        }

        let mut files = Vec::new();
        for entry in std::fs::read_dir(&dir)
            .with_context(|| format!("Failed to read components dir '{}'", dir.display()))?
        {
            let path = entry?.path();
            if !Self::is_extension_allowed(&path) {
                continue;
            }
            if !Self::is_path_allowed(&dir, &path) {
                tracing::warn!(path = %path.display(), "skipping component outside the components dir");
                continue;
            }
            files.push(path);
        }
        files.sort();

        let mut definitions = Vec::with_capacity(files.len());
        for path in files {
            let source = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read '{}'", path.display()))?;
            let file_name = path
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or_else(|| anyhow!("Non UTF-8 component file name: {}", path.display()))?
                .to_string();
            definitions.push(ComponentDefinition::new(file_name, source));
        }

        let registry = Self::from_definitions(dir, definitions);
        if registry.is_empty() {
            tracing::warn!(dir = %registry.dir.display(), "no component .js files found");
        }
        Ok(registry)
    }

    /// Build a registry from definitions already in memory.
    pub fn from_definitions(dir: impl Into<PathBuf>, definitions: Vec<ComponentDefinition>) -> Self {
        let allowed_tags = definitions
            .iter()
            .filter_map(|d| d.tag().map(str::to_string))
            .collect();
        Self {
            dir: dir.into(),
            definitions,
            allowed_tags,
        }
    }

    /// Check if a path resolves inside the components directory.
    fn is_path_allowed(dir: &Path, path: &Path) -> bool {
        match path.canonicalize() {
            Ok(canonical) => canonical.starts_with(dir) && canonical.is_file(),
            Err(_) => false,
        }
    }

    fn is_extension_allowed(path: &Path) -> bool {
        matches!(path.extension().and_then(|e| e.to_str()), Some("js"))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn definitions(&self) -> &[ComponentDefinition] {
        &self.definitions
    }

    pub fn allowed_tags(&self) -> &BTreeSet<String> {
        &self.allowed_tags
    }

    pub fn is_allowed(&self, tag: &str) -> bool {
        self.allowed_tags.contains(tag)
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

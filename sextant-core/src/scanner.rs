//! Resource scanning for migration locations.
//!
//! A location is a directory root; scanning walks it recursively and returns
//! every file whose name ends with the requested suffix, in file-name order.

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::{Result, SextantError};

/// A file discovered under a migration location root.
#[derive(Debug, Clone)]
pub struct Resource {
    root: PathBuf,
    path: PathBuf,
}

impl Resource {
    pub fn new(root: PathBuf, path: PathBuf) -> Self {
        Self { root, path }
    }

    /// Path relative to the location root, with `/` separators.
    pub fn logical_path(&self) -> String {
        match self.path.strip_prefix(&self.root) {
            Ok(rel) => rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/"),
            Err(_) => self.path.display().to_string(),
        }
    }

    /// The file name component.
    pub fn filename(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Where the resource physically lives, for error messages.
    pub fn physical_location(&self) -> String {
        self.path.display().to_string()
    }

    /// Load the resource as text. Only UTF-8 is supported; a leading
    /// byte-order-mark is stripped.
    pub fn load_as_string(&self, encoding: &str) -> Result<String> {
        if !is_utf8(encoding) {
            return Err(SextantError::ConfigurationError {
                field: "encoding".to_string(),
                reason: format!("unsupported encoding '{}', only UTF-8 is supported", encoding),
            });
        }

        let content = std::fs::read_to_string(&self.path)?;
        match content.strip_prefix('\u{feff}') {
            Some(stripped) => Ok(stripped.to_string()),
            None => Ok(content),
        }
    }
}

pub(crate) fn is_utf8(encoding: &str) -> bool {
    encoding.eq_ignore_ascii_case("utf-8") || encoding.eq_ignore_ascii_case("utf8")
}

/// Scan a location root for files whose name ends with `suffix`.
///
/// A missing root is not an error: it logs a warning and yields nothing, so a
/// deployment may configure locations that only exist in some environments.
pub fn scan_location(root: &Path, suffix: &str) -> Result<Vec<Resource>> {
    if !root.exists() {
        tracing::warn!("Migration location does not exist: {}", root.display());
        return Ok(Vec::new());
    }

    let mut resources = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(|e| SextantError::Io(e.into()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if !name.ends_with(suffix) {
            continue;
        }
        resources.push(Resource::new(root.to_path_buf(), entry.into_path()));
    }

    Ok(resources)
}

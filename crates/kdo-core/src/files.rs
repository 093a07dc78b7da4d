//! Sandboxed access to the files of a chart
//!
//! Templates read chart files through this type. Every path is resolved
//! relative to the chart root; absolute paths and paths escaping the root
//! (through `..` or symlinks) are rejected.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// A file returned by [`ChartFiles::glob`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// Path relative to the chart root
    pub path: String,
    /// File name without directory
    pub name: String,
    /// Content, lossily decoded as UTF-8
    pub content: String,
}

#[derive(Debug, Clone)]
pub struct ChartFiles {
    root: PathBuf,
    canonical_root: PathBuf,
}

impl ChartFiles {
    pub fn new(chart_root: impl AsRef<Path>) -> Result<Self> {
        let root = chart_root.as_ref().to_path_buf();
        let canonical_root = root.canonicalize().map_err(|e| CoreError::FileAccess {
            path: root.display().to_string(),
            message: format!("chart root is not accessible: {}", e),
        })?;
        Ok(Self {
            root,
            canonical_root,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, relative: &str) -> Result<PathBuf> {
        let denied = |message: &str| CoreError::FileAccess {
            path: relative.to_string(),
            message: message.to_string(),
        };

        if Path::new(relative).is_absolute() {
            return Err(denied("absolute paths are not allowed in templates"));
        }
        let full_path = self.root.join(relative);
        if !full_path.exists() {
            return Err(denied("file not found"));
        }
        let canonical = full_path
            .canonicalize()
            .map_err(|e| denied(&format!("failed to resolve path: {}", e)))?;
        if !canonical.starts_with(&self.canonical_root) {
            return Err(denied("path escapes the chart directory"));
        }
        Ok(canonical)
    }

    pub fn get_bytes(&self, path: &str) -> Result<Vec<u8>> {
        let resolved = self.resolve(path)?;
        std::fs::read(&resolved).map_err(|e| CoreError::FileAccess {
            path: path.to_string(),
            message: format!("failed to read file: {}", e),
        })
    }

    pub fn get(&self, path: &str) -> Result<String> {
        let bytes = self.get_bytes(path)?;
        String::from_utf8(bytes).map_err(|e| CoreError::FileAccess {
            path: path.to_string(),
            message: format!("file is not valid UTF-8: {}", e),
        })
    }

    pub fn exists(&self, path: &str) -> bool {
        self.resolve(path).map(|p| p.is_file()).unwrap_or(false)
    }

    pub fn lines(&self, path: &str) -> Result<Vec<String>> {
        Ok(self.get(path)?.lines().map(String::from).collect())
    }

    /// Files matching `pattern`, sorted by path
    pub fn glob(&self, pattern: &str) -> Result<Vec<FileEntry>> {
        let matcher = glob::Pattern::new(pattern).map_err(|e| CoreError::GlobPattern {
            message: format!("invalid glob pattern '{}': {}", pattern, e),
        })?;

        let mut entries: Vec<FileEntry> = walkdir::WalkDir::new(&self.root)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter_map(|entry| {
                let relative = entry.path().strip_prefix(&self.root).ok()?;
                let relative = relative.to_string_lossy().replace('\\', "/");
                if !matcher.matches(&relative) {
                    return None;
                }
                let bytes = std::fs::read(entry.path()).ok()?;
                Some(FileEntry {
                    name: entry.file_name().to_string_lossy().into_owned(),
                    path: relative,
                    content: String::from_utf8_lossy(&bytes).into_owned(),
                })
            })
            .collect();

        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    }
}

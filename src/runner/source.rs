use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::{Context, Result};

/// A script path together with the modification time seen when listing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptFile {
    pub path: PathBuf,
    pub mtime: SystemTime,
}

/// Where script sources come from.
///
/// `list` failing makes the current cycle run nothing; `read` failing
/// only skips that one file.
pub trait ScriptSource: Send + Sync {
    /// Every candidate script, sorted by path.
    fn list(&self) -> Result<Vec<ScriptFile>>;

    fn read(&self, path: &Path) -> io::Result<String>;
}

/// Regular files with one extension directly inside a directory.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    dir: PathBuf,
    extension: String,
}

impl DirectorySource {
    /// Relative directories are resolved against the current directory.
    pub fn new(dir: impl AsRef<Path>, extension: &str) -> io::Result<Self> {
        let dir = dir.as_ref();
        let dir = if dir.is_absolute() {
            dir.to_path_buf()
        } else {
            std::env::current_dir()?.join(dir)
        };
        Ok(Self {
            dir,
            extension: extension.trim_start_matches('.').to_string(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn matches_extension(&self, path: &Path) -> bool {
        path.extension()
            .is_some_and(|ext| ext.to_string_lossy() == self.extension.as_str())
    }
}

impl ScriptSource for DirectorySource {
    fn list(&self) -> Result<Vec<ScriptFile>> {
        let entries = fs::read_dir(&self.dir)
            .with_context(|| format!("Failed to list {}", self.dir.display()))?;

        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.with_context(|| format!("Failed to list {}", self.dir.display()))?;
            let path = entry.path();
            if !self.matches_extension(&path) {
                continue;
            }
            // Follows symlinks, a dangling one is simply not a script
            let Ok(metadata) = fs::metadata(&path) else {
                continue;
            };
            if !metadata.is_file() {
                continue;
            }
            let mtime = metadata
                .modified()
                .with_context(|| format!("No modification time for {}", path.display()))?;
            files.push(ScriptFile { path, mtime });
        }
        files.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(files)
    }

    fn read(&self, path: &Path) -> io::Result<String> {
        fs::read_to_string(path)
    }
}

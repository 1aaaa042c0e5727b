use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use tracing::{debug, info, warn};

use crate::error::LoadError;
use crate::sandbox::{self, CapabilityPolicy, CompiledUnit};
use crate::script::Runtime;

use super::source::{ScriptFile, ScriptSource};

/// One compiled unit and the modification time it was built from.
struct CacheEntry {
    mtime: SystemTime,
    unit: Arc<CompiledUnit>,
}

/// Counters for one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileStats {
    pub compiled: usize,
    pub reused: usize,
    pub failed: usize,
    pub evicted: usize,
}

/// Units to run this cycle, in listing order.
#[derive(Debug, Default)]
pub struct Reconciliation {
    pub run_set: Vec<Arc<CompiledUnit>>,
    pub stats: ReconcileStats,
}

/// Compiled units keyed by script path.
///
/// Owned by the cycle driver; only reconciliation mutates it.
pub struct ModuleCache {
    entries: HashMap<PathBuf, CacheEntry>,
    policy: CapabilityPolicy,
    runtime: Arc<Runtime>,
}

impl ModuleCache {
    pub fn new(policy: CapabilityPolicy, runtime: Arc<Runtime>) -> Self {
        Self {
            entries: HashMap::new(),
            policy,
            runtime,
        }
    }

    /// Number of cached units, stale ones included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[cfg(test)]
    pub fn contains(&self, path: &Path) -> bool {
        self.entries.contains_key(path)
    }

    /// The cached unit for `path`, fresh or stale.
    #[cfg(test)]
    pub fn get(&self, path: &Path) -> Option<&Arc<CompiledUnit>> {
        self.entries.get(path).map(|entry| &entry.unit)
    }

    /// Brings the cache in line with a directory listing.
    ///
    /// New or changed files are compiled; a failed compile keeps the file
    /// out of the run set and leaves any older entry stale so the next
    /// pass retries it. Entries for files no longer listed are dropped.
    pub fn reconcile(&mut self, files: &[ScriptFile], source: &dyn ScriptSource) -> Reconciliation {
        let mut result = Reconciliation::default();

        for file in files {
            if let Some(entry) = self.entries.get(&file.path) {
                if entry.mtime == file.mtime {
                    debug!(
                        unit = %entry.unit.name(),
                        "Reusing {} ({} constructs stripped)",
                        entry.unit.path().display(),
                        entry.unit.violations().len()
                    );
                    result.stats.reused += 1;
                    result.run_set.push(Arc::clone(&entry.unit));
                    continue;
                }
            }

            match self.load(file, source) {
                Ok(unit) => {
                    let unit = Arc::new(unit);
                    let replaced = self
                        .entries
                        .insert(
                            file.path.clone(),
                            CacheEntry {
                                mtime: file.mtime,
                                unit: Arc::clone(&unit),
                            },
                        )
                        .is_some();
                    info!(
                        unit = %unit.name(),
                        "{} {}",
                        if replaced { "Recompiled" } else { "Compiled" },
                        file.path.display()
                    );
                    result.stats.compiled += 1;
                    result.run_set.push(unit);
                }
                Err(e) => {
                    warn!("Skipping {}: {e}", file.path.display());
                    result.stats.failed += 1;
                }
            }
        }

        if files.is_empty() && !self.is_empty() {
            info!("No scripts listed, dropping {} cached units", self.len());
        }
        let listed: HashSet<&Path> = files.iter().map(|file| file.path.as_path()).collect();
        let before = self.entries.len();
        self.entries.retain(|path, _| {
            let keep = listed.contains(path.as_path());
            if !keep {
                debug!("Evicting {}", path.display());
            }
            keep
        });
        result.stats.evicted = before - self.entries.len();

        result
    }

    fn load(&self, file: &ScriptFile, source: &dyn ScriptSource) -> Result<CompiledUnit, LoadError> {
        let text = source.read(&file.path).map_err(|source| LoadError::Io {
            path: file.path.clone(),
            source,
        })?;
        sandbox::compile(&text, &file.path, &self.policy, &self.runtime)
    }
}

use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub runner: RunnerConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RunnerConfig {
    /// Directory scanned for scripts. Supports ${ENV_VAR} substitution.
    /// Falls back to the current directory when unset or not a directory.
    #[serde(default)]
    pub script_dir: Option<PathBuf>,
    /// File extension of scripts, without the dot
    #[serde(default = "default_extension")]
    pub extension: String,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Worker pool size; detected parallelism when unset
    #[serde(default)]
    pub workers: Option<usize>,
    /// Name of the zero-argument function run every cycle
    #[serde(default = "default_entry_point")]
    pub entry_point: String,
    /// Entry points running longer than this are logged as slow
    #[serde(default = "default_slow_call_secs")]
    pub slow_call_secs: u64,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum MatchMode {
    /// A module is denied only when its full dotted name is listed
    Exact,
    /// A listed name also denies every submodule under it
    #[default]
    Prefix,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PolicyConfig {
    #[serde(default)]
    pub match_mode: MatchMode,
    #[serde(default = "default_disallowed_modules")]
    pub disallowed_modules: Vec<String>,
    #[serde(default = "default_disallowed_callables")]
    pub disallowed_callables: Vec<String>,
    #[serde(default = "default_true")]
    pub deny_relative_imports: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BridgeConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Named text values scripts can fetch with `host.import_value`
    #[serde(default)]
    pub values: HashMap<String, String>,
    /// Host object the driver calls once per cycle, if any
    #[serde(default)]
    pub probe_object: Option<String>,
    #[serde(default = "default_probe_method")]
    pub probe_method: String,
    #[serde(default = "default_probe_payload")]
    pub probe_payload: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Also write logs to this file, rotated by size. Stdout only when unset.
    #[serde(default)]
    pub file: Option<PathBuf>,
    #[serde(default = "default_log_max_bytes")]
    pub max_bytes: u64,
    /// Rotated files kept next to the live one
    #[serde(default = "default_log_backups")]
    pub backups: usize,
}

fn default_extension() -> String {
    "py".to_string()
}

fn default_interval_secs() -> u64 {
    10
}

fn default_entry_point() -> String {
    "execute".to_string()
}

fn default_slow_call_secs() -> u64 {
    5
}

fn default_log_max_bytes() -> u64 {
    1024 * 1024 * 1024
}

fn default_log_backups() -> usize {
    3
}

fn default_true() -> bool {
    true
}

fn default_disallowed_modules() -> Vec<String> {
    [
        "os",
        "sys",
        "importlib",
        "subprocess",
        "socket",
        "shutil",
        "platform",
        "pathlib",
        "urllib",
        "requests",
        "threading",
        "multiprocessing",
        "ctypes",
        "sqlite3",
        "http",
        "builtins",
        "marshal",
        "inspect",
        "pkgutil",
        "psutil",
        "glob",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_disallowed_callables() -> Vec<String> {
    ["eval", "exec", "__import__", "open", "compile", "globals", "locals"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_probe_method() -> String {
    "process_data".to_string()
}

fn default_probe_payload() -> String {
    "Hello from the runner".to_string()
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            script_dir: None,
            extension: default_extension(),
            interval_secs: default_interval_secs(),
            workers: None,
            entry_point: default_entry_point(),
            slow_call_secs: default_slow_call_secs(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            file: None,
            max_bytes: default_log_max_bytes(),
            backups: default_log_backups(),
        }
    }
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            match_mode: MatchMode::default(),
            disallowed_modules: default_disallowed_modules(),
            disallowed_callables: default_disallowed_callables(),
            deny_relative_imports: true,
        }
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            values: HashMap::new(),
            probe_object: None,
            probe_method: default_probe_method(),
            probe_payload: default_probe_payload(),
        }
    }
}

impl Config {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        // Expand environment variables like ${SCRIPT_DIR}
        let expanded = shellexpand::env(&content)?;
        let config: Config = toml::from_str(&expanded)?;
        Ok(config)
    }
}

impl RunnerConfig {
    /// The directory to scan: the configured one if it exists, else the
    /// current working directory.
    pub fn resolve_script_dir(&self) -> PathBuf {
        match &self.script_dir {
            Some(dir) if dir.is_dir() => dir.clone(),
            Some(dir) => {
                tracing::warn!(
                    "Script directory {} is not a directory, using the current directory",
                    dir.display()
                );
                current_dir()
            }
            None => current_dir(),
        }
    }

    /// Configured worker count, else detected parallelism, else 4.
    pub fn worker_count(&self) -> usize {
        match self.workers {
            Some(n) if n > 0 => n,
            _ => std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
        }
    }
}

fn current_dir() -> PathBuf {
    std::env::current_dir().unwrap_or_else(|_| Path::new(".").to_path_buf())
}

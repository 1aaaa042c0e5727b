use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use tracing::{debug, error, info, warn};

use crate::bridge::HostBridge;
use crate::config::Config;
use crate::sandbox::CapabilityPolicy;
use crate::script::Runtime;

use super::cache::{ModuleCache, ReconcileStats};
use super::scheduler::{ExecutionResult, Scheduler};
use super::source::{DirectorySource, ScriptSource};

/// A whole cycle slower than this is reported.
pub const SLOW_CYCLE_THRESHOLD: Duration = Duration::from_secs(1);

/// What one cycle did.
#[derive(Debug, Default)]
pub struct CycleReport {
    pub cycle: u64,
    pub stats: ReconcileStats,
    pub results: Vec<ExecutionResult>,
    pub elapsed: Duration,
    /// The directory could not be listed; nothing ran.
    pub listing_failed: bool,
}

impl CycleReport {
    #[cfg(test)]
    pub fn result(&self, unit: &str) -> Option<&ExecutionResult> {
        self.results.iter().find(|result| result.unit == unit)
    }

    pub fn failures(&self) -> usize {
        self.results.iter().filter(|result| !result.succeeded()).count()
    }
}

/// Host object method called once after each cycle.
#[derive(Debug, Clone)]
pub struct Probe {
    pub object: String,
    pub method: String,
    pub payload: String,
}

/// Scan, reconcile, dispatch, repeat.
///
/// `run_cycle` takes `&mut self` and awaits every invocation before
/// returning, so two cycles never overlap.
pub struct CycleDriver {
    source: Box<dyn ScriptSource>,
    cache: ModuleCache,
    scheduler: Scheduler,
    bridge: Arc<HostBridge>,
    probe: Option<Probe>,
    cycle: u64,
}

impl CycleDriver {
    pub fn new(source: Box<dyn ScriptSource>, cache: ModuleCache, scheduler: Scheduler) -> Self {
        Self {
            source,
            cache,
            scheduler,
            bridge: Arc::new(HostBridge::new()),
            probe: None,
            cycle: 0,
        }
    }

    /// Wires the directory source, cache, scheduler and host bridge from
    /// configuration.
    pub fn from_config(config: &Config) -> Result<Self> {
        let script_dir = config.runner.resolve_script_dir();
        let source = DirectorySource::new(&script_dir, &config.runner.extension)?;
        info!(
            "Watching {} for *.{} scripts",
            source.dir().display(),
            config.runner.extension
        );

        let bridge = Arc::new(HostBridge::from_config(&config.bridge));
        if config.bridge.enabled {
            info!("Host bridge exports: {}", bridge.names().join(", "));
        }
        let runtime = Arc::new(Runtime::new(Arc::clone(&bridge)));
        debug!("Native modules: {}", runtime.module_names().join(", "));
        let policy = CapabilityPolicy::from_config(&config.policy);
        info!(
            "Policy: {} disallowed modules ({:?} match), {} disallowed callables",
            config.policy.disallowed_modules.len(),
            policy.match_mode(),
            config.policy.disallowed_callables.len()
        );
        let scheduler = Scheduler::new(config.runner.worker_count(), &config.runner.entry_point)
            .with_slow_threshold(Duration::from_secs(config.runner.slow_call_secs));
        info!(
            "Workers: {}, entry point: {}",
            scheduler.workers(),
            scheduler.entry_point()
        );

        let mut driver = Self::new(
            Box::new(source),
            ModuleCache::new(policy, runtime),
            scheduler,
        );
        driver.bridge = Arc::clone(&bridge);
        if config.bridge.enabled {
            driver.probe = config.bridge.probe_object.as_ref().map(|object| Probe {
                object: object.clone(),
                method: config.bridge.probe_method.clone(),
                payload: config.bridge.probe_payload.clone(),
            });
        }
        Ok(driver)
    }

    #[cfg(test)]
    pub fn cache(&self) -> &ModuleCache {
        &self.cache
    }

    /// Runs one full cycle. Never fails: problems are logged and reflected
    /// in the report.
    pub async fn run_cycle(&mut self) -> CycleReport {
        self.cycle += 1;
        let started = Instant::now();
        let mut report = CycleReport {
            cycle: self.cycle,
            ..Default::default()
        };

        let files = match self.source.list() {
            Ok(files) => files,
            Err(e) => {
                error!("Cycle {}: {e:#}", self.cycle);
                report.listing_failed = true;
                report.elapsed = started.elapsed();
                return report;
            }
        };

        let reconciliation = self.cache.reconcile(&files, self.source.as_ref());
        report.stats = reconciliation.stats;
        debug!(
            "Cycle {}: {} compiled, {} reused, {} failed, {} evicted, {} cached",
            self.cycle,
            report.stats.compiled,
            report.stats.reused,
            report.stats.failed,
            report.stats.evicted,
            self.cache.len()
        );

        report.results = self.scheduler.dispatch(&reconciliation.run_set).await;
        drop(reconciliation);

        for result in report.results.iter().filter(|result| result.succeeded()) {
            if let Some(value) = &result.value {
                info!(
                    unit = %result.unit,
                    "Returned {} in {:.3}s",
                    value.repr(),
                    result.elapsed.as_secs_f64()
                );
            }
        }

        report.elapsed = started.elapsed();
        info!(
            "Cycle {} finished: {} ran, {} failed, {:.3}s",
            self.cycle,
            report.results.len(),
            report.failures(),
            report.elapsed.as_secs_f64()
        );
        if report.elapsed > SLOW_CYCLE_THRESHOLD {
            warn!(
                "Cycle {} took {:.2}s",
                self.cycle,
                report.elapsed.as_secs_f64()
            );
        }
        report
    }

    /// Calls the configured host method, if any. Failures are logged and
    /// yield `None`.
    pub fn probe_bridge(&self) -> Option<String> {
        let probe = self.probe.as_ref()?;
        self.bridge
            .probe(&probe.object, &probe.method, &probe.payload)
    }

    /// Cycles forever with `interval` between the end of one cycle and the
    /// start of the next. Ctrl-C stops the loop between cycles.
    pub async fn run(&mut self, interval: Duration) -> Result<()> {
        loop {
            self.run_cycle().await;
            self.probe_bridge();

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = tokio::signal::ctrl_c() => {
                    info!("Shutdown signal received, exiting");
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PolicyConfig;
    use crate::runner::source::ScriptFile;
    use crate::script::Value;
    use filetime::FileTime;
    use std::collections::HashMap;
    use std::fs;
    use std::io;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::SystemTime;

    fn driver_for(dir: &Path, workers: usize) -> CycleDriver {
        let runtime = Arc::new(Runtime::new(Arc::new(HostBridge::new())));
        let policy = CapabilityPolicy::from_config(&PolicyConfig::default());
        CycleDriver::new(
            Box::new(DirectorySource::new(dir, "py").unwrap()),
            ModuleCache::new(policy, runtime),
            Scheduler::new(workers, "execute"),
        )
    }

    fn write(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, body).unwrap();
        path
    }

    #[tokio::test]
    async fn test_good_and_bad_scenario() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "good.py",
            "import time\n\ndef execute():\n    time.sleep(0.1)\n    return 42\n",
        );
        let bad = write(
            dir.path(),
            "bad.py",
            "import os\n\ndef execute():\n    return 1\n",
        );

        let mut driver = driver_for(dir.path(), 4);
        let report = driver.run_cycle().await;

        assert_eq!(report.cycle, 1);
        assert!(!report.listing_failed);
        assert_eq!(report.stats.compiled, 2);
        assert_eq!(report.result("good").unwrap().value, Some(Value::Int(42)));
        assert_eq!(report.result("bad").unwrap().value, Some(Value::Int(1)));

        let unit = driver.cache().get(&bad).unwrap();
        assert!(!unit.namespace().contains("os"));
        assert_eq!(unit.violations().len(), 1);
    }

    #[tokio::test]
    async fn test_three_units_one_failing() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.py", "def execute():\n    return 'a'\n");
        write(dir.path(), "b.py", "def execute():\n    raise 'b failed'\n");
        write(dir.path(), "c.py", "def execute():\n    return 'c'\n");

        let report = driver_for(dir.path(), 3).run_cycle().await;
        assert_eq!(report.results.len(), 3);
        assert_eq!(report.failures(), 1);
        assert!(report.result("a").unwrap().succeeded());
        assert!(!report.result("b").unwrap().succeeded());
        assert!(report.result("c").unwrap().succeeded());
    }

    #[tokio::test]
    async fn test_removed_file_is_evicted_next_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "gone.py", "def execute():\n    return 1\n");
        let mut driver = driver_for(dir.path(), 1);

        driver.run_cycle().await;
        assert!(driver.cache().contains(&path));

        fs::remove_file(&path).unwrap();
        let report = driver.run_cycle().await;
        assert_eq!(report.cycle, 2);
        assert_eq!(report.stats.evicted, 1);
        assert!(report.results.is_empty());
        assert!(!driver.cache().contains(&path));
    }

    #[tokio::test]
    async fn test_edit_is_picked_up() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "job.py", "def execute():\n    return 1\n");
        filetime::set_file_mtime(&path, FileTime::from_unix_time(1_000, 0)).unwrap();
        let mut driver = driver_for(dir.path(), 1);
        let first = driver.run_cycle().await;
        assert_eq!(first.result("job").unwrap().value, Some(Value::Int(1)));

        write(dir.path(), "job.py", "def execute():\n    return 2\n");
        filetime::set_file_mtime(&path, FileTime::from_unix_time(2_000, 0)).unwrap();
        let second = driver.run_cycle().await;
        assert_eq!(second.stats.compiled, 1);
        assert_eq!(second.result("job").unwrap().value, Some(Value::Int(2)));
    }

    #[tokio::test]
    async fn test_state_persists_but_namespace_does_not_grow() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "counter.py",
            "\
runs = 0
def execute():
    global runs, last
    runs += 1
    last = runs
    return runs
",
        );
        let mut driver = driver_for(dir.path(), 1);
        driver.run_cycle().await;
        let baseline = driver.cache().get(&path).unwrap().namespace().keys();

        for expected in 2..=4 {
            let report = driver.run_cycle().await;
            assert_eq!(report.stats.reused, 1);
            assert_eq!(
                report.result("counter").unwrap().value,
                Some(Value::Int(expected))
            );
            assert_eq!(driver.cache().get(&path).unwrap().namespace().keys(), baseline);
        }
    }

    #[tokio::test]
    async fn test_deeply_nested_script_does_not_stop_the_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let depth = 3000;
        write(
            dir.path(),
            "deep.py",
            &format!(
                "def execute():\n    return {}1{}\n",
                "[".repeat(depth),
                "]".repeat(depth)
            ),
        );
        write(dir.path(), "ok.py", "def execute():\n    return 'ok'\n");

        let mut driver = driver_for(dir.path(), 2);
        for cycle in 1..=2 {
            let report = driver.run_cycle().await;
            assert_eq!(report.cycle, cycle);
            assert_eq!(report.stats.failed, 1);
            assert_eq!(report.results.len(), 1);
            assert_eq!(report.result("ok").unwrap().value, Some(Value::str("ok")));
            assert!(report.result("deep").is_none());
        }
    }

    /// In-memory source that counts reads and can be told to fail listing.
    #[derive(Clone, Default)]
    struct MemorySource {
        files: Arc<Mutex<HashMap<PathBuf, (SystemTime, String)>>>,
        reads: Arc<AtomicUsize>,
        broken: Arc<AtomicBool>,
    }

    impl MemorySource {
        fn put(&self, name: &str, secs: u64, body: &str) {
            let mtime = SystemTime::UNIX_EPOCH + Duration::from_secs(secs);
            self.files
                .lock()
                .unwrap()
                .insert(PathBuf::from(format!("/mem/{name}")), (mtime, body.to_string()));
        }
    }

    impl ScriptSource for MemorySource {
        fn list(&self) -> Result<Vec<ScriptFile>> {
            if self.broken.load(Ordering::SeqCst) {
                anyhow::bail!("listing unavailable");
            }
            let mut files: Vec<ScriptFile> = self
                .files
                .lock()
                .unwrap()
                .iter()
                .map(|(path, (mtime, _))| ScriptFile {
                    path: path.clone(),
                    mtime: *mtime,
                })
                .collect();
            files.sort_by(|a, b| a.path.cmp(&b.path));
            Ok(files)
        }

        fn read(&self, path: &Path) -> io::Result<String> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            self.files
                .lock()
                .unwrap()
                .get(path)
                .map(|(_, body)| body.clone())
                .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))
        }
    }

    fn memory_driver(source: &MemorySource) -> CycleDriver {
        let runtime = Arc::new(Runtime::new(Arc::new(HostBridge::new())));
        CycleDriver::new(
            Box::new(source.clone()),
            ModuleCache::new(CapabilityPolicy::permissive(), runtime),
            Scheduler::new(2, "execute"),
        )
    }

    #[tokio::test]
    async fn test_unchanged_files_are_compiled_once() {
        let source = MemorySource::default();
        source.put("a.py", 10, "def execute():\n    return 1\n");
        source.put("b.py", 10, "def execute():\n    return 2\n");
        let mut driver = memory_driver(&source);

        for _ in 0..5 {
            driver.run_cycle().await;
        }
        assert_eq!(source.reads.load(Ordering::SeqCst), 2);

        source.put("a.py", 11, "def execute():\n    return 3\n");
        let report = driver.run_cycle().await;
        assert_eq!(source.reads.load(Ordering::SeqCst), 3);
        assert_eq!(report.result("a").unwrap().value, Some(Value::Int(3)));
    }

    #[tokio::test]
    async fn test_listing_failure_leaves_cache_untouched() {
        let source = MemorySource::default();
        source.put("a.py", 10, "def execute():\n    return 1\n");
        let mut driver = memory_driver(&source);
        driver.run_cycle().await;

        source.broken.store(true, Ordering::SeqCst);
        let report = driver.run_cycle().await;
        assert!(report.listing_failed);
        assert!(report.results.is_empty());
        assert_eq!(driver.cache().len(), 1);

        source.broken.store(false, Ordering::SeqCst);
        let report = driver.run_cycle().await;
        assert_eq!(report.stats.reused, 1);
        assert_eq!(report.result("a").unwrap().value, Some(Value::Int(1)));
    }

    #[tokio::test]
    async fn test_probe_bridge() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.runner.script_dir = Some(dir.path().to_path_buf());
        config.bridge.probe_object = Some("data_receiver".to_string());

        let driver = CycleDriver::from_config(&config).unwrap();
        assert_eq!(
            driver.probe_bridge(),
            Some("Processed: Hello from the runner".to_string())
        );

        config.bridge.probe_method = "no_such_method".to_string();
        let driver = CycleDriver::from_config(&config).unwrap();
        assert_eq!(driver.probe_bridge(), None);

        config.bridge.probe_object = None;
        let driver = CycleDriver::from_config(&config).unwrap();
        assert_eq!(driver.probe_bridge(), None);
    }

    #[tokio::test]
    async fn test_scripts_reach_host_values() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "host_user.py",
            "\
import host
def execute():
    receiver = host.import_value('data_receiver')
    return receiver.process_data('ping')
",
        );
        write(
            dir.path(),
            "host_function.py",
            "\
import host
def execute():
    func = host.import_value('data_receiver').process_data_func()
    return [func('direct'), func.apply('applied')]
",
        );
        let mut config = Config::default();
        config.runner.script_dir = Some(dir.path().to_path_buf());
        let mut driver = CycleDriver::from_config(&config).unwrap();
        let report = driver.run_cycle().await;
        assert_eq!(
            report.result("host_user").unwrap().value,
            Some(Value::str("Processed: ping"))
        );
        assert_eq!(
            report.result("host_function").unwrap().value,
            Some(Value::list(vec![
                Value::str("Processed: direct"),
                Value::str("Processed: applied"),
            ]))
        );
    }
}

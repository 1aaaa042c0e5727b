use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::error::EntryPointError;
use crate::sandbox::{self, CompiledUnit};
use crate::script::Value;

/// Default for `Scheduler::slow_threshold`.
pub const SLOW_CALL_THRESHOLD: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq)]
pub enum ExecStatus {
    Succeeded,
    Failed(String),
}

/// Outcome of one entry-point invocation.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub unit: String,
    /// Absent when the invocation failed.
    pub value: Option<Value>,
    pub elapsed: Duration,
    pub status: ExecStatus,
}

impl ExecutionResult {
    pub fn succeeded(&self) -> bool {
        self.status == ExecStatus::Succeeded
    }
}

/// Runs entry points on a bounded pool of blocking worker threads.
pub struct Scheduler {
    workers: usize,
    entry_point: String,
    permits: Arc<Semaphore>,
    /// Invocations slower than this are reported, never cancelled.
    slow_threshold: Duration,
}

impl Scheduler {
    pub fn new(workers: usize, entry_point: &str) -> Self {
        let workers = workers.max(1);
        Self {
            workers,
            entry_point: entry_point.to_string(),
            permits: Arc::new(Semaphore::new(workers)),
            slow_threshold: SLOW_CALL_THRESHOLD,
        }
    }

    pub fn with_slow_threshold(mut self, threshold: Duration) -> Self {
        self.slow_threshold = threshold;
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn entry_point(&self) -> &str {
        &self.entry_point
    }

    /// Invokes the entry point of every unit that has one and waits for
    /// all of them. Results come back in the order of `units`.
    ///
    /// A failing or panicking invocation only produces a failed result.
    pub async fn dispatch(&self, units: &[Arc<CompiledUnit>]) -> Vec<ExecutionResult> {
        let mut tasks = JoinSet::new();
        let mut names = Vec::new();

        for unit in units {
            if !unit.has_entry_point(&self.entry_point) {
                info!(
                    unit = %unit.name(),
                    "No callable '{}', skipping",
                    self.entry_point
                );
                continue;
            }
            let index = names.len();
            names.push(unit.name().to_string());

            let unit = Arc::clone(unit);
            let entry = self.entry_point.clone();
            let permits = Arc::clone(&self.permits);
            let slow_threshold = self.slow_threshold;
            tasks.spawn(async move {
                let permit = match permits
                    .acquire_owned()
                    .await
                    .map_err(|e| format!("worker pool unavailable: {e}"))
                {
                    Ok(permit) => permit,
                    Err(reason) => {
                        error!(unit = %unit.name(), "{reason}");
                        return (index, Ok(failed(&unit, Duration::ZERO, reason)));
                    }
                };
                let outcome = tokio::task::spawn_blocking(move || {
                    let _permit = permit;
                    invoke(&unit, &entry, slow_threshold)
                })
                .await;
                (index, outcome)
            });
        }

        let mut slots: Vec<Option<ExecutionResult>> = vec![None; names.len()];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, Ok(result))) => slots[index] = Some(result),
                Ok((index, Err(e))) => {
                    error!(unit = %names[index], "Worker task failed: {e}");
                }
                Err(e) => error!("Dispatch task failed: {e}"),
            }
        }

        // A slot is only empty if its worker task itself died
        slots
            .into_iter()
            .zip(names)
            .map(|(slot, unit)| {
                slot.unwrap_or_else(|| ExecutionResult {
                    unit,
                    value: None,
                    elapsed: Duration::ZERO,
                    status: ExecStatus::Failed("worker task did not complete".to_string()),
                })
            })
            .collect()
    }
}

/// One timed, fully isolated invocation. Runs on a blocking thread.
fn invoke(unit: &CompiledUnit, entry: &str, slow_threshold: Duration) -> ExecutionResult {
    let started = Instant::now();
    let outcome = catch_unwind(AssertUnwindSafe(|| sandbox::run(unit, entry)))
        .unwrap_or_else(|payload| Err(EntryPointError::Panicked(panic_message(&*payload))));
    let elapsed = started.elapsed();

    if elapsed > slow_threshold {
        warn!(
            unit = %unit.name(),
            "Entry point took {:.2}s",
            elapsed.as_secs_f64()
        );
    }

    match outcome {
        Ok(value) => ExecutionResult {
            unit: unit.name().to_string(),
            value: Some(value),
            elapsed,
            status: ExecStatus::Succeeded,
        },
        Err(e) => {
            error!(unit = %unit.name(), "Entry point failed: {e}");
            failed(unit, elapsed, e.to_string())
        }
    }
}

fn failed(unit: &CompiledUnit, elapsed: Duration, reason: String) -> ExecutionResult {
    ExecutionResult {
        unit: unit.name().to_string(),
        value: None,
        elapsed,
        status: ExecStatus::Failed(reason),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

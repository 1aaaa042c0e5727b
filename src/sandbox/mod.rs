//! Sandboxed loading and invocation of scripts.
//!
//! Two operations keep policy and scheduling apart:
//!
//! - [`compile`] parses a script, strips what the [`CapabilityPolicy`]
//!   denies, validates the result and runs the module body once in a fresh
//!   namespace, producing a [`CompiledUnit`].
//! - [`run`] invokes a unit's entry point inside a [`NamespaceGuard`].
//!
//! This is a syntactic deny-list, not an execution sandbox. Aliasing
//! (`o = open`), `getattr` lookups and `eval` of built strings (when `eval`
//! itself is allowed) reach denied capabilities, and nothing limits CPU,
//! memory or wall-clock time of a running unit.

pub mod filter;
pub mod guard;
pub mod policy;
pub mod validate;

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::warn;

use crate::error::{CompileError, EntryPointError, LoadError};
use crate::script::{parse_module, Interpreter, Namespace, Runtime, Value};

pub use filter::Violation;
pub use guard::NamespaceGuard;
pub use policy::CapabilityPolicy;

/// The sanitized, loaded form of one script at one modification time.
///
/// Never updated in place: a changed source produces a new unit.
pub struct CompiledUnit {
    name: String,
    path: PathBuf,
    namespace: Arc<Namespace>,
    runtime: Arc<Runtime>,
    violations: Vec<Violation>,
}

impl CompiledUnit {
    /// File stem of the script.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    #[cfg(test)]
    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    /// Everything the filter stripped from this unit.
    pub fn violations(&self) -> &[Violation] {
        &self.violations
    }

    /// Whether `entry` names something callable in the namespace.
    pub fn has_entry_point(&self, entry: &str) -> bool {
        self.namespace
            .get(entry)
            .is_some_and(|value| value.is_callable())
    }
}

impl std::fmt::Debug for CompiledUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledUnit")
            .field("name", &self.name)
            .field("path", &self.path)
            .field("attributes", &self.namespace.len())
            .field("violations", &self.violations.len())
            .finish()
    }
}

/// The unit name for a script path: its file stem.
pub fn unit_name(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

/// Filters and loads one script.
///
/// Logs one warning per stripped construct. Parse failures, validation
/// failures and faults (or panics) raised by the module body are returned,
/// never propagated further.
pub fn compile(
    source: &str,
    path: &Path,
    policy: &CapabilityPolicy,
    runtime: &Arc<Runtime>,
) -> Result<CompiledUnit, LoadError> {
    let name = unit_name(path);
    let tree = parse_module(source)?;

    let (body, violations) = filter::sanitize(&tree, policy);
    for violation in &violations {
        warn!(unit = %name, "Removed disallowed {violation}");
    }
    validate::validate(&body)?;

    let namespace = Namespace::new(&name);
    namespace.set("__name__", Value::str(&name));
    namespace.set("__file__", Value::str(path.to_string_lossy()));

    let outcome = catch_unwind(AssertUnwindSafe(|| {
        Interpreter::new(runtime, Arc::clone(&namespace)).exec_module(&body)
    }));
    match outcome {
        Ok(Ok(())) => {}
        Ok(Err(err)) => {
            return Err(CompileError {
                line: err.line().unwrap_or(0),
                message: err.root().to_string(),
            }
            .into())
        }
        Err(_) => {
            return Err(CompileError {
                line: 0,
                message: "module body panicked".to_string(),
            }
            .into())
        }
    }

    Ok(CompiledUnit {
        name,
        path: path.to_path_buf(),
        namespace,
        runtime: Arc::clone(runtime),
        violations,
    })
}

/// Invokes the unit's zero-argument entry point.
///
/// Attributes the call adds to the namespace are removed again on every
/// exit path, unwinding included.
pub fn run(unit: &CompiledUnit, entry: &str) -> Result<Value, EntryPointError> {
    let callee = unit
        .namespace
        .get(entry)
        .ok_or_else(|| EntryPointError::Missing {
            unit: unit.name.clone(),
            entry: entry.to_string(),
        })?;
    if !callee.is_callable() {
        return Err(EntryPointError::NotCallable {
            unit: unit.name.clone(),
            entry: entry.to_string(),
        });
    }

    let _guard = NamespaceGuard::new(&unit.namespace);
    let mut interp = Interpreter::new(&unit.runtime, Arc::clone(&unit.namespace));
    Ok(interp.call(&callee, Vec::new(), Vec::new())?)
}

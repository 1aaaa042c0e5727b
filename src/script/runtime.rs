//! Process-wide interpreter state: builtins and importable native modules.
//!
//! Built once at startup and shared read-only by every unit and worker.

use std::collections::HashMap;
use std::sync::Arc;

use crate::bridge::HostBridge;
use crate::error::ScriptError;

use super::builtins;
use super::modules;
use super::value::{Module, Value};

pub struct Runtime {
    builtins: HashMap<String, Value>,
    modules: HashMap<String, Arc<Module>>,
}

impl Runtime {
    pub fn new(bridge: Arc<HostBridge>) -> Self {
        let builtins = builtins::functions()
            .into_iter()
            .map(|(name, value)| (name.to_string(), value))
            .collect();
        let modules = modules::native_modules(bridge)
            .into_iter()
            .map(|module| (module.name.clone(), module))
            .collect();
        Self { builtins, modules }
    }

    pub fn builtin(&self, name: &str) -> Option<Value> {
        self.builtins.get(name).cloned()
    }

    /// Resolves a dotted module path such as `os.path` to the named module.
    pub fn import_module(&self, dotted: &str) -> Result<Arc<Module>, ScriptError> {
        let missing = || ScriptError::Import(dotted.to_string());
        let mut segments = dotted.split('.');
        let root = segments.next().unwrap_or_default();
        let mut module = self.modules.get(root).cloned().ok_or_else(missing)?;
        for segment in segments {
            module = match module.attrs.get(segment) {
                Some(Value::Module(child)) => Arc::clone(child),
                _ => return Err(missing()),
            };
        }
        Ok(module)
    }

    /// Names of the importable top-level modules, sorted.
    pub fn module_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.modules.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dotted_import_resolves_submodules() {
        let runtime = Runtime::new(Arc::new(HostBridge::new()));
        assert_eq!(runtime.import_module("os.path").unwrap().name, "os.path");
        assert_eq!(
            runtime.import_module("os.nothing").unwrap_err(),
            ScriptError::Import("os.nothing".into())
        );
        assert_eq!(
            runtime.import_module("os.getcwd").unwrap_err(),
            ScriptError::Import("os.getcwd".into())
        );
    }

    #[test]
    fn test_standard_modules_are_registered() {
        let runtime = Runtime::new(Arc::new(HostBridge::new()));
        assert_eq!(
            runtime.module_names(),
            vec!["host", "json", "math", "os", "random", "sys", "time"]
        );
        assert!(runtime.builtin("print").is_some());
        assert!(runtime.builtin("nope").is_none());
    }
}

//! Host bridge: named values the embedding process exposes to scripts.
//!
//! Scripts reach it through `import host; host.import_value(name)`, and the
//! cycle driver can probe one object per cycle. A host method may also hand
//! back another host object; calling such an object from a script invokes
//! its `apply` method. Every crossing is guarded:
//! a missing value, an unknown method, a failing or panicking host call all
//! end up as a warning and `None`, never as a fault in the caller.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{info, warn};

use crate::config::BridgeConfig;
use crate::error::BridgeError;
use crate::script::Value;

/// An object living on the host side of the bridge.
///
/// Methods take at most one text argument and return text, which is all
/// the embedding contract guarantees.
pub trait HostObject: Send + Sync {
    /// Type name shown in logs and `repr`.
    fn type_name(&self) -> &str;

    /// Invoke `method` with an optional argument.
    fn call(&self, method: &str, arg: Option<&str>) -> anyhow::Result<String>;

    /// The object `method` returns, for methods that return objects rather
    /// than text. Only consulted for calls without an argument.
    fn object(&self, _method: &str) -> Option<Arc<dyn HostObject>> {
        None
    }
}

/// A host object as seen from a script.
pub struct HostHandle {
    pub name: String,
    object: Arc<dyn HostObject>,
}

impl HostHandle {
    pub fn new(name: &str, object: Arc<dyn HostObject>) -> Self {
        Self {
            name: name.to_string(),
            object,
        }
    }

    pub fn type_name(&self) -> &str {
        self.object.type_name()
    }
}

pub enum HostValue {
    Text(String),
    Object(Arc<HostHandle>),
}

/// Registry of exported host values, built once at startup.
#[derive(Default)]
pub struct HostBridge {
    values: HashMap<String, HostValue>,
}

impl HostBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Exports the configured text values and the `data_receiver` object.
    /// A disabled bridge exports nothing.
    pub fn from_config(config: &BridgeConfig) -> Self {
        let mut bridge = Self::new();
        if !config.enabled {
            return bridge;
        }
        for (name, text) in &config.values {
            bridge.register_text(name, text);
        }
        bridge.register_object("data_receiver", Arc::new(DataReceiver));
        bridge
    }

    pub fn register_text(&mut self, name: &str, text: &str) {
        self.values
            .insert(name.to_string(), HostValue::Text(text.to_string()));
    }

    pub fn register_object(&mut self, name: &str, object: Arc<dyn HostObject>) {
        let handle = Arc::new(HostHandle::new(name, object));
        self.values.insert(name.to_string(), HostValue::Object(handle));
    }

    pub fn lookup(&self, name: &str) -> Result<&HostValue, BridgeError> {
        self.values
            .get(name)
            .ok_or_else(|| BridgeError::UnknownValue(name.to_string()))
    }

    /// Names of every exported value, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.values.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Script-facing lookup. Unknown names log a warning and yield `None`.
    pub fn import_value(&self, name: &str) -> Value {
        match self.lookup(name) {
            Ok(HostValue::Text(text)) => Value::str(text),
            Ok(HostValue::Object(handle)) => Value::Host(Arc::clone(handle)),
            Err(e) => {
                warn!("Bridge lookup failed: {e}");
                Value::None
            }
        }
    }

    /// Calls `method` on the named host object and logs the outcome.
    pub fn probe(&self, object: &str, method: &str, payload: &str) -> Option<String> {
        let handle = match self.lookup(object) {
            Ok(HostValue::Object(handle)) => handle,
            Ok(HostValue::Text(_)) => {
                warn!(
                    "Bridge probe failed: {}",
                    BridgeError::UnknownMethod {
                        object: object.to_string(),
                        method: method.to_string(),
                    }
                );
                return None;
            }
            Err(e) => {
                warn!("Bridge probe failed: {e}");
                return None;
            }
        };
        let result = invoke(handle, method, Some(payload));
        match &result {
            Ok(text) => info!("Host object '{object}' returned: {text}"),
            Err(e) => warn!("Bridge probe failed: {e}"),
        }
        result.ok()
    }
}

/// Calls a host method on behalf of a script. Failures become `None`.
pub fn call_guarded(handle: &HostHandle, method: &str, arg: Option<&Value>) -> Value {
    if arg.is_none() {
        match catch_unwind(AssertUnwindSafe(|| handle.object.object(method))) {
            Ok(Some(object)) => {
                let name = format!("{}.{method}", handle.name);
                return Value::Host(Arc::new(HostHandle::new(&name, object)));
            }
            Ok(None) => {}
            Err(_) => {
                warn!("Host call {}.{method} failed: panicked", handle.name);
                return Value::None;
            }
        }
    }
    let arg = arg.map(Value::to_string);
    match invoke(handle, method, arg.as_deref()) {
        Ok(text) => Value::str(text),
        Err(e) => {
            warn!("Host call {}.{method} failed: {e}", handle.name);
            Value::None
        }
    }
}

fn invoke(handle: &HostHandle, method: &str, arg: Option<&str>) -> Result<String, BridgeError> {
    match catch_unwind(AssertUnwindSafe(|| handle.object.call(method, arg))) {
        Ok(Ok(text)) => Ok(text),
        Ok(Err(e)) => Err(BridgeError::Rejected(format!("{}.{method}: {e:#}", handle.name))),
        Err(_) => Err(BridgeError::Rejected(format!(
            "{}.{method} panicked",
            handle.name
        ))),
    }
}

// ── Demo receiver ───────────────────────────────────────

/// The demo object exported as `data_receiver`.
pub struct DataReceiver;

impl HostObject for DataReceiver {
    fn type_name(&self) -> &str {
        "DataReceiver"
    }

    fn call(&self, method: &str, arg: Option<&str>) -> anyhow::Result<String> {
        match method {
            "process_data" => {
                let data = arg.ok_or_else(|| anyhow::anyhow!("process_data needs an argument"))?;
                info!("DataReceiver got: {data}");
                Ok(format!("Processed: {data}"))
            }
            "process_other" => Ok("Other Processed".to_string()),
            other => Err(unknown_method(self, other)),
        }
    }

    fn object(&self, method: &str) -> Option<Arc<dyn HostObject>> {
        match method {
            "process_data_func" => Some(Arc::new(ProcessDataFunction)),
            _ => None,
        }
    }
}

/// One-argument function returned by `data_receiver.process_data_func()`.
pub struct ProcessDataFunction;

impl HostObject for ProcessDataFunction {
    fn type_name(&self) -> &str {
        "ProcessDataFunction"
    }

    fn call(&self, method: &str, arg: Option<&str>) -> anyhow::Result<String> {
        match method {
            "apply" => DataReceiver.call("process_data", arg),
            other => Err(unknown_method(self, other)),
        }
    }
}

fn unknown_method(object: &dyn HostObject, method: &str) -> anyhow::Error {
    BridgeError::UnknownMethod {
        object: object.type_name().to_string(),
        method: method.to_string(),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Exploding;

    impl HostObject for Exploding {
        fn type_name(&self) -> &str {
            "Exploding"
        }

        fn call(&self, _method: &str, _arg: Option<&str>) -> anyhow::Result<String> {
            panic!("host side blew up");
        }
    }

    fn bridge() -> HostBridge {
        HostBridge::from_config(&BridgeConfig::default())
    }

    #[test]
    fn test_data_receiver_methods() {
        let bridge = bridge();
        assert_eq!(
            bridge.probe("data_receiver", "process_data", "hi"),
            Some("Processed: hi".to_string())
        );
        assert_eq!(
            bridge.probe("data_receiver", "process_other", "ignored"),
            Some("Other Processed".to_string())
        );
    }

    #[test]
    fn test_probe_failures_are_swallowed() {
        let bridge = bridge();
        assert_eq!(bridge.probe("missing", "process_data", "x"), None);
        assert_eq!(bridge.probe("data_receiver", "nope", "x"), None);
    }

    #[test]
    fn test_import_value_text_and_unknown() {
        let mut config = BridgeConfig::default();
        config.values.insert("greeting".into(), "hello".into());
        let bridge = HostBridge::from_config(&config);
        assert_eq!(bridge.import_value("greeting"), Value::str("hello"));
        assert_eq!(bridge.import_value("unknown"), Value::None);
        assert!(matches!(bridge.import_value("data_receiver"), Value::Host(_)));
    }

    #[test]
    fn test_disabled_bridge_exports_nothing() {
        let config = BridgeConfig {
            enabled: false,
            ..BridgeConfig::default()
        };
        assert!(HostBridge::from_config(&config).names().is_empty());
    }

    #[test]
    fn test_panicking_host_call_becomes_none() {
        let mut bridge = HostBridge::new();
        bridge.register_object("boom", Arc::new(Exploding));
        let Value::Host(handle) = bridge.import_value("boom") else {
            panic!("expected a host object");
        };
        assert_eq!(call_guarded(&handle, "anything", None), Value::None);
    }

    #[test]
    fn test_process_data_func_returns_a_function_object() {
        let bridge = bridge();
        let Value::Host(receiver) = bridge.import_value("data_receiver") else {
            panic!("expected a host object");
        };
        let Value::Host(function) = call_guarded(&receiver, "process_data_func", None) else {
            panic!("expected a function object");
        };
        assert_eq!(function.name, "data_receiver.process_data_func");
        assert_eq!(function.type_name(), "ProcessDataFunction");
        assert_eq!(
            call_guarded(&function, "apply", Some(&Value::str("ping"))),
            Value::str("Processed: ping")
        );
        assert_eq!(call_guarded(&function, "apply", None), Value::None);
        assert_eq!(call_guarded(&function, "compose", Some(&Value::Int(1))), Value::None);
    }

    #[test]
    fn test_call_guarded_stringifies_argument() {
        let bridge = bridge();
        let Value::Host(handle) = bridge.import_value("data_receiver") else {
            panic!("expected a host object");
        };
        assert_eq!(
            call_guarded(&handle, "process_data", Some(&Value::Int(7))),
            Value::str("Processed: 7")
        );
    }
}

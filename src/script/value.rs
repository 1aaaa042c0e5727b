//! Runtime values and the namespace type that backs every loaded unit.
//!
//! Values must cross into worker threads, so every shared container is an
//! `Arc` with its own lock. Locks are only held for the duration of a single
//! read or write; callers snapshot before doing anything that could re-enter.
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs::File;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};

use crate::bridge::HostHandle;
use crate::error::ScriptError;

use super::ast::FunctionDef;
use super::interp::Interpreter;

/// Nesting depth past which `repr` stops descending into containers.
const MAX_REPR_DEPTH: usize = 16;

pub type NativeImpl =
    dyn Fn(&mut Interpreter<'_>, Args) -> Result<Value, ScriptError> + Send + Sync;

#[derive(Clone)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Arc<str>),
    List(Arc<Mutex<Vec<Value>>>),
    Tuple(Arc<Vec<Value>>),
    Dict(Arc<Mutex<Dict>>),
    Function(Arc<Function>),
    Native(Arc<NativeFunction>),
    Module(Arc<Module>),
    Method(Arc<BoundMethod>),
    File(Arc<Mutex<FileHandle>>),
    Host(Arc<HostHandle>),
}

impl Value {
    pub fn str(text: impl AsRef<str>) -> Self {
        Value::Str(Arc::from(text.as_ref()))
    }

    pub fn list(items: Vec<Value>) -> Self {
        Value::List(Arc::new(Mutex::new(items)))
    }

    pub fn tuple(items: Vec<Value>) -> Self {
        Value::Tuple(Arc::new(items))
    }

    pub fn dict(dict: Dict) -> Self {
        Value::Dict(Arc::new(Mutex::new(dict)))
    }

    pub fn native<F>(name: &str, func: F) -> Self
    where
        F: Fn(&mut Interpreter<'_>, Args) -> Result<Value, ScriptError> + Send + Sync + 'static,
    {
        Value::Native(Arc::new(NativeFunction {
            name: name.to_string(),
            func: Box::new(func),
        }))
    }

    pub fn method(receiver: Value, name: &str) -> Self {
        Value::Method(Arc::new(BoundMethod {
            receiver,
            name: name.to_string(),
        }))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "NoneType",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::List(_) => "list",
            Value::Tuple(_) => "tuple",
            Value::Dict(_) => "dict",
            Value::Function(_) => "function",
            Value::Native(_) => "builtin_function_or_method",
            Value::Module(_) => "module",
            Value::Method(_) => "method",
            Value::File(_) => "file",
            Value::Host(_) => "host_object",
        }
    }

    pub fn is_callable(&self) -> bool {
        matches!(
            self,
            Value::Function(_) | Value::Native(_) | Value::Method(_)
        )
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(items) => !lock(items).is_empty(),
            Value::Tuple(items) => !items.is_empty(),
            Value::Dict(dict) => !lock(dict).is_empty(),
            _ => true,
        }
    }

    pub fn is_hashable(&self) -> bool {
        match self {
            Value::None | Value::Bool(_) | Value::Int(_) | Value::Float(_) | Value::Str(_) => true,
            Value::Tuple(items) => items.iter().all(Value::is_hashable),
            _ => false,
        }
    }

    /// Numeric view used for mixed int/float arithmetic and comparison.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Bool(b) => Some(f64::from(u8::from(*b))),
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Bool(b) => Some(i64::from(*b)),
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Python-style equality.
    pub fn py_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => {
                Arc::ptr_eq(a, b) || seq_eq(&snapshot(a), &snapshot(b))
            }
            (Value::Tuple(a), Value::Tuple(b)) => seq_eq(a, b),
            (Value::Dict(a), Value::Dict(b)) => {
                if Arc::ptr_eq(a, b) {
                    return true;
                }
                let left = lock(a).clone();
                let right = lock(b).clone();
                left.len() == right.len()
                    && left.entries.iter().all(|(key, value)| {
                        right.get(key).is_some_and(|other| value.py_eq(&other))
                    })
            }
            (Value::Int(a), Value::Int(b)) => a == b,
            (a, b) => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => x == y,
                _ => a.is_same(b),
            },
        }
    }

    /// Identity, as used by `is`.
    pub fn is_same(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => Arc::ptr_eq(a, b) || a == b,
            (Value::List(a), Value::List(b)) => Arc::ptr_eq(a, b),
            (Value::Tuple(a), Value::Tuple(b)) => Arc::ptr_eq(a, b),
            (Value::Dict(a), Value::Dict(b)) => Arc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => Arc::ptr_eq(a, b),
            (Value::Native(a), Value::Native(b)) => Arc::ptr_eq(a, b),
            (Value::Module(a), Value::Module(b)) => Arc::ptr_eq(a, b),
            (Value::Method(a), Value::Method(b)) => Arc::ptr_eq(a, b),
            (Value::File(a), Value::File(b)) => Arc::ptr_eq(a, b),
            (Value::Host(a), Value::Host(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    pub fn repr(&self) -> String {
        let mut out = String::new();
        self.write_repr(&mut out, 0);
        out
    }

    fn write_repr(&self, out: &mut String, depth: usize) {
        match self {
            Value::Str(s) => {
                out.push('\'');
                for c in s.chars() {
                    match c {
                        '\'' => out.push_str("\\'"),
                        '\\' => out.push_str("\\\\"),
                        '\n' => out.push_str("\\n"),
                        '\t' => out.push_str("\\t"),
                        c => out.push(c),
                    }
                }
                out.push('\'');
            }
            Value::List(items) => {
                if depth >= MAX_REPR_DEPTH {
                    out.push_str("[...]");
                    return;
                }
                write_seq(out, &snapshot(items), "[", "]", depth);
            }
            Value::Tuple(items) => {
                if depth >= MAX_REPR_DEPTH {
                    out.push_str("(...)");
                    return;
                }
                if items.len() == 1 {
                    out.push('(');
                    items[0].write_repr(out, depth + 1);
                    out.push_str(",)");
                } else {
                    write_seq(out, items, "(", ")", depth);
                }
            }
            Value::Dict(dict) => {
                if depth >= MAX_REPR_DEPTH {
                    out.push_str("{...}");
                    return;
                }
                let entries = lock(dict).entries.clone();
                out.push('{');
                for (i, (key, value)) in entries.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    key.write_repr(out, depth + 1);
                    out.push_str(": ");
                    value.write_repr(out, depth + 1);
                }
                out.push('}');
            }
            other => out.push_str(&other.to_string()),
        }
    }
}

fn write_seq(out: &mut String, items: &[Value], open: &str, close: &str, depth: usize) {
    out.push_str(open);
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        item.write_repr(out, depth + 1);
    }
    out.push_str(close);
}

fn seq_eq(a: &[Value], b: &[Value]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.py_eq(y))
}

/// Formats a float the way Python's `str()` does for common cases.
pub fn format_float(f: f64) -> String {
    if f.is_nan() {
        "nan".to_string()
    } else if f.is_infinite() {
        if f > 0.0 { "inf" } else { "-inf" }.to_string()
    } else if f.fract() == 0.0 && f.abs() < 1e16 {
        format!("{f:.1}")
    } else {
        format!("{f}")
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => write!(f, "None"),
            Value::Bool(true) => write!(f, "True"),
            Value::Bool(false) => write!(f, "False"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{}", format_float(*x)),
            Value::Str(s) => write!(f, "{s}"),
            Value::List(_) | Value::Tuple(_) | Value::Dict(_) => write!(f, "{}", self.repr()),
            Value::Function(func) => write!(f, "<function {}>", func.def.name),
            Value::Native(native) => write!(f, "<built-in function {}>", native.name),
            Value::Module(module) => write!(f, "<module '{}'>", module.name),
            Value::Method(method) => write!(
                f,
                "<bound method {}.{}>",
                method.receiver.type_name(),
                method.name
            ),
            Value::File(file) => write!(f, "<file '{}'>", lock(file).path.display()),
            Value::Host(handle) => write!(f, "<{} object '{}'>", handle.type_name(), handle.name),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.repr())
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.py_eq(other)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::str(value)
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::str(value)
    }
}

/// Locks a mutex, recovering the data if another worker panicked with it held.
pub fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Copies a list's items out so no lock is held while they are used.
pub fn snapshot(list: &Mutex<Vec<Value>>) -> Vec<Value> {
    lock(list).clone()
}

// ── Containers ───────────────────────────────────────────

/// Insertion-ordered mapping with Python equality on keys.
#[derive(Clone, Default)]
pub struct Dict {
    pub entries: Vec<(Value, Value)>,
}

impl Dict {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &Value) -> Option<Value> {
        self.entries
            .iter()
            .find(|(k, _)| k.py_eq(key))
            .map(|(_, v)| v.clone())
    }

    pub fn contains(&self, key: &Value) -> bool {
        self.entries.iter().any(|(k, _)| k.py_eq(key))
    }

    pub fn insert(&mut self, key: Value, value: Value) -> Result<(), ScriptError> {
        if !key.is_hashable() {
            return Err(ScriptError::Type(format!(
                "unhashable type: '{}'",
                key.type_name()
            )));
        }
        match self.entries.iter_mut().find(|(k, _)| k.py_eq(&key)) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
        Ok(())
    }

    pub fn remove(&mut self, key: &Value) -> Option<Value> {
        let index = self.entries.iter().position(|(k, _)| k.py_eq(key))?;
        Some(self.entries.remove(index).1)
    }

    pub fn keys(&self) -> Vec<Value> {
        self.entries.iter().map(|(k, _)| k.clone()).collect()
    }
}

// ── Callables ────────────────────────────────────────────

/// A function defined by a script.
///
/// Holds its module namespace weakly: the namespace owns the function, and
/// a strong reference back would keep every evicted unit alive.
pub struct Function {
    pub def: Arc<FunctionDef>,
    pub defaults: Vec<Option<Value>>,
    pub globals: Weak<Namespace>,
}

pub struct NativeFunction {
    pub name: String,
    pub func: Box<NativeImpl>,
}

/// A method looked up on a value, e.g. `items.append`.
pub struct BoundMethod {
    pub receiver: Value,
    pub name: String,
}

/// Arguments passed to a native function.
pub struct Args {
    pub positional: Vec<Value>,
    pub keywords: Vec<(String, Value)>,
}

impl Args {
    #[cfg(test)]
    pub fn new(positional: Vec<Value>) -> Self {
        Self {
            positional,
            keywords: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.positional.len()
    }

    /// Fails unless between `min` and `max` positional arguments were given
    /// and no keywords other than `allowed` were used.
    pub fn check(
        &self,
        name: &str,
        min: usize,
        max: usize,
        allowed: &[&str],
    ) -> Result<(), ScriptError> {
        if let Some((key, _)) = self
            .keywords
            .iter()
            .find(|(key, _)| !allowed.contains(&key.as_str()))
        {
            return Err(ScriptError::Type(format!(
                "{name}() got an unexpected keyword argument '{key}'"
            )));
        }
        let count = self.positional.len();
        if count < min || count > max {
            let expected = if min == max {
                format!("{min}")
            } else if max == usize::MAX {
                format!("at least {min}")
            } else {
                format!("{min} to {max}")
            };
            return Err(ScriptError::Type(format!(
                "{name}() takes {expected} arguments ({count} given)"
            )));
        }
        Ok(())
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.positional.get(index)
    }

    pub fn keyword(&self, name: &str) -> Option<&Value> {
        self.keywords
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    pub fn str_at(&self, index: usize, func: &str) -> Result<Arc<str>, ScriptError> {
        match self.positional.get(index) {
            Some(Value::Str(s)) => Ok(s.clone()),
            Some(other) => Err(ScriptError::Type(format!(
                "{func}() argument {} must be str, not {}",
                index + 1,
                other.type_name()
            ))),
            None => Err(ScriptError::Type(format!(
                "{func}() missing argument {}",
                index + 1
            ))),
        }
    }

    pub fn number_at(&self, index: usize, func: &str) -> Result<f64, ScriptError> {
        match self.positional.get(index) {
            Some(value) => value.as_f64().ok_or_else(|| {
                ScriptError::Type(format!(
                    "{func}() argument {} must be a number, not {}",
                    index + 1,
                    value.type_name()
                ))
            }),
            None => Err(ScriptError::Type(format!(
                "{func}() missing argument {}",
                index + 1
            ))),
        }
    }
}

// ── Modules and files ────────────────────────────────────

/// A native module such as `time` or `math`. Read-only once built.
#[derive(Debug)]
pub struct Module {
    pub name: String,
    pub attrs: HashMap<String, Value>,
}

impl Module {
    pub fn new(name: &str, attrs: Vec<(&str, Value)>) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            attrs: attrs
                .into_iter()
                .map(|(key, value)| (key.to_string(), value))
                .collect(),
        })
    }
}

pub struct FileHandle {
    pub path: PathBuf,
    pub file: Option<File>,
    pub writable: bool,
}

// ── Namespace ────────────────────────────────────────────

/// The attribute table of one loaded unit.
pub struct Namespace {
    name: String,
    attrs: RwLock<HashMap<String, Value>>,
}

impl Namespace {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            attrs: RwLock::new(HashMap::new()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.attrs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    pub fn set(&self, key: &str, value: Value) {
        let previous = self
            .attrs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value);
        drop(previous);
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.attrs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
    }

    #[cfg(test)]
    pub fn contains(&self, key: &str) -> bool {
        self.attrs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }

    pub fn keys(&self) -> HashSet<String> {
        self.attrs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.attrs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// All attributes, sorted by name.
    pub fn entries(&self) -> Vec<(String, Value)> {
        let mut entries: Vec<(String, Value)> = self
            .attrs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }
}

impl fmt::Debug for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<String> = self.keys().into_iter().collect();
        names.sort_unstable();
        f.debug_struct("Namespace")
            .field("name", &self.name)
            .field("attributes", &names)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_namespace_and_module_debug() {
        let namespace = Namespace::new("job");
        namespace.set("b", Value::Int(2));
        namespace.set("a", Value::Int(1));
        assert_eq!(
            format!("{namespace:?}"),
            r#"Namespace { name: "job", attributes: ["a", "b"] }"#
        );

        let module = Module::new("answers", vec![("value", Value::Int(42))]);
        let shown = format!("{module:?}");
        assert!(shown.starts_with("Module { name: \"answers\""));
        assert!(shown.contains("value"));
    }

    #[test]
    fn test_display_matches_python() {
        assert_eq!(Value::None.to_string(), "None");
        assert_eq!(Value::Bool(true).to_string(), "True");
        assert_eq!(Value::Float(1.0).to_string(), "1.0");
        assert_eq!(Value::Float(0.25).to_string(), "0.25");
        assert_eq!(
            Value::list(vec![Value::Int(1), Value::str("a")]).to_string(),
            "[1, 'a']"
        );
        assert_eq!(Value::tuple(vec![Value::Int(1)]).to_string(), "(1,)");
    }

    #[test]
    fn test_numeric_equality_crosses_types() {
        assert!(Value::Int(1).py_eq(&Value::Float(1.0)));
        assert!(Value::Bool(true).py_eq(&Value::Int(1)));
        assert!(!Value::str("1").py_eq(&Value::Int(1)));
    }

    #[test]
    fn test_list_equality_with_itself_does_not_deadlock() {
        let list = Value::list(vec![Value::Int(1)]);
        assert!(list.py_eq(&list.clone()));
    }

    #[test]
    fn test_self_containing_list_repr_terminates() {
        let list = Value::list(Vec::new());
        if let Value::List(items) = &list {
            lock(items).push(list.clone());
        }
        assert!(list.repr().contains("[...]"));
        // Break the cycle so the test does not leak.
        if let Value::List(items) = &list {
            lock(items).clear();
        }
    }

    #[test]
    fn test_dict_insert_replaces_and_rejects_unhashable() {
        let mut dict = Dict::new();
        dict.insert(Value::str("a"), Value::Int(1)).unwrap();
        dict.insert(Value::str("a"), Value::Int(2)).unwrap();
        assert_eq!(dict.len(), 1);
        assert_eq!(dict.get(&Value::str("a")), Some(Value::Int(2)));
        assert!(dict.insert(Value::list(Vec::new()), Value::None).is_err());
    }

    #[test]
    fn test_namespace_keys_and_removal() {
        let ns = Namespace::new("unit");
        ns.set("a", Value::Int(1));
        ns.set("b", Value::Int(2));
        assert_eq!(ns.len(), 2);
        assert!(ns.remove("a").is_some());
        assert_eq!(ns.keys(), HashSet::from(["b".to_string()]));
        assert_eq!(ns.entries()[0].0, "b");
    }

    #[test]
    fn test_args_check() {
        let args = Args::new(vec![Value::Int(1)]);
        assert!(args.check("f", 1, 1, &[]).is_ok());
        let err = args.check("f", 2, 2, &[]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "TypeError: f() takes 2 arguments (1 given)"
        );
    }
}

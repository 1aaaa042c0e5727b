//! Attribute lookup and the methods of the built-in types.

use std::io::{Read, Write};
use std::sync::{Arc, Mutex};

use crate::bridge;
use crate::error::ScriptError;

use super::ops;
use super::value::{lock, Args, Dict, FileHandle, Value};

const LIST_METHODS: &[&str] = &["append", "pop", "extend", "insert"];
const DICT_METHODS: &[&str] = &["get", "keys", "values", "items", "pop"];
const STR_METHODS: &[&str] = &[
    "upper",
    "lower",
    "strip",
    "split",
    "join",
    "replace",
    "startswith",
    "endswith",
];
const FILE_METHODS: &[&str] = &["read", "write", "close"];

pub fn get_attr(value: &Value, attr: &str) -> Result<Value, ScriptError> {
    let methods = match value {
        Value::Module(module) => {
            return module.attrs.get(attr).cloned().ok_or_else(|| {
                ScriptError::Attribute(format!(
                    "module '{}' has no attribute '{attr}'",
                    module.name
                ))
            })
        }
        // Host objects resolve their methods when called.
        Value::Host(_) => return Ok(Value::method(value.clone(), attr)),
        Value::Function(func) if attr == "__name__" => return Ok(Value::str(&func.def.name)),
        Value::List(_) => LIST_METHODS,
        Value::Dict(_) => DICT_METHODS,
        Value::Str(_) => STR_METHODS,
        Value::File(_) => FILE_METHODS,
        _ => &[],
    };
    if methods.contains(&attr) {
        Ok(Value::method(value.clone(), attr))
    } else {
        Err(ScriptError::Attribute(format!(
            "'{}' object has no attribute '{attr}'",
            value.type_name()
        )))
    }
}

pub fn call_method(receiver: &Value, name: &str, args: Args) -> Result<Value, ScriptError> {
    match receiver {
        Value::List(items) => list_method(items, name, args),
        Value::Dict(dict) => dict_method(dict, name, args),
        Value::Str(s) => str_method(s, name, args),
        Value::File(file) => file_method(file, name, args),
        Value::Host(handle) => {
            args.check(name, 0, 1, &[])?;
            Ok(bridge::call_guarded(handle, name, args.get(0)))
        }
        other => Err(ScriptError::Attribute(format!(
            "'{}' object has no attribute '{name}'",
            other.type_name()
        ))),
    }
}

fn list_method(items: &Mutex<Vec<Value>>, name: &str, args: Args) -> Result<Value, ScriptError> {
    match name {
        "append" => {
            args.check("append", 1, 1, &[])?;
            let mut args = args.positional;
            lock(items).extend(args.pop());
            Ok(Value::None)
        }
        "extend" => {
            args.check("extend", 1, 1, &[])?;
            // Iterate before locking: `items.extend(items)` is legal.
            let extra = ops::iterate(&args.positional[0])?;
            lock(items).extend(extra);
            Ok(Value::None)
        }
        "pop" => {
            args.check("pop", 0, 1, &[])?;
            let mut items = lock(items);
            if items.is_empty() {
                return Err(ScriptError::Index("pop from empty list".into()));
            }
            let len = i64::try_from(items.len()).unwrap_or(i64::MAX);
            let index = match args.get(0) {
                Some(value) => value.as_int().ok_or_else(|| {
                    ScriptError::Type(format!(
                        "list indices must be integers, not {}",
                        value.type_name()
                    ))
                })?,
                None => -1,
            };
            let resolved = if index < 0 { index + len } else { index };
            if resolved < 0 || resolved >= len {
                return Err(ScriptError::Index("pop index out of range".into()));
            }
            Ok(items.remove(resolved as usize))
        }
        "insert" => {
            args.check("insert", 2, 2, &[])?;
            let index = args.positional[0].as_int().ok_or_else(|| {
                ScriptError::Type("insert() index must be an integer".into())
            })?;
            let mut items = lock(items);
            let len = i64::try_from(items.len()).unwrap_or(i64::MAX);
            let resolved = if index < 0 { (index + len).max(0) } else { index.min(len) };
            items.insert(resolved as usize, args.positional[1].clone());
            Ok(Value::None)
        }
        _ => Err(no_method("list", name)),
    }
}

fn dict_method(dict: &Mutex<Dict>, name: &str, args: Args) -> Result<Value, ScriptError> {
    match name {
        "get" => {
            args.check("get", 1, 2, &[])?;
            let default = args.get(1).cloned().unwrap_or(Value::None);
            Ok(lock(dict).get(&args.positional[0]).unwrap_or(default))
        }
        "keys" => {
            args.check("keys", 0, 0, &[])?;
            Ok(Value::list(lock(dict).keys()))
        }
        "values" => {
            args.check("values", 0, 0, &[])?;
            let values = lock(dict).entries.iter().map(|(_, v)| v.clone()).collect();
            Ok(Value::list(values))
        }
        "items" => {
            args.check("items", 0, 0, &[])?;
            let items = lock(dict)
                .entries
                .iter()
                .map(|(k, v)| Value::tuple(vec![k.clone(), v.clone()]))
                .collect();
            Ok(Value::list(items))
        }
        "pop" => {
            args.check("pop", 1, 2, &[])?;
            let key = &args.positional[0];
            match (lock(dict).remove(key), args.get(1)) {
                (Some(value), _) => Ok(value),
                (None, Some(default)) => Ok(default.clone()),
                (None, None) => Err(ScriptError::Key(key.repr())),
            }
        }
        _ => Err(no_method("dict", name)),
    }
}

fn str_method(s: &Arc<str>, name: &str, args: Args) -> Result<Value, ScriptError> {
    match name {
        "upper" => {
            args.check("upper", 0, 0, &[])?;
            Ok(Value::str(s.to_uppercase()))
        }
        "lower" => {
            args.check("lower", 0, 0, &[])?;
            Ok(Value::str(s.to_lowercase()))
        }
        "strip" => {
            args.check("strip", 0, 1, &[])?;
            match args.get(0) {
                Some(Value::Str(chars)) => {
                    Ok(Value::str(s.trim_matches(|c: char| chars.contains(c))))
                }
                _ => Ok(Value::str(s.trim())),
            }
        }
        "split" => {
            args.check("split", 0, 1, &[])?;
            let parts: Vec<Value> = match args.get(0) {
                None | Some(Value::None) => s.split_whitespace().map(Value::str).collect(),
                Some(Value::Str(sep)) if sep.is_empty() => {
                    return Err(ScriptError::Value("empty separator".into()))
                }
                Some(Value::Str(sep)) => s.split(&**sep).map(Value::str).collect(),
                Some(other) => {
                    return Err(ScriptError::Type(format!(
                        "must be str or None, not {}",
                        other.type_name()
                    )))
                }
            };
            Ok(Value::list(parts))
        }
        "join" => {
            args.check("join", 1, 1, &[])?;
            let mut parts = Vec::new();
            for item in ops::iterate(&args.positional[0])? {
                match item {
                    Value::Str(part) => parts.push(part),
                    other => {
                        return Err(ScriptError::Type(format!(
                            "sequence item: expected str instance, {} found",
                            other.type_name()
                        )))
                    }
                }
            }
            Ok(Value::str(parts.join(&**s)))
        }
        "replace" => {
            args.check("replace", 2, 2, &[])?;
            let old = args.str_at(0, "replace")?;
            let new = args.str_at(1, "replace")?;
            Ok(Value::str(s.replace(&*old, &new)))
        }
        "startswith" => {
            args.check("startswith", 1, 1, &[])?;
            let prefix = args.str_at(0, "startswith")?;
            Ok(Value::Bool(s.starts_with(&*prefix)))
        }
        "endswith" => {
            args.check("endswith", 1, 1, &[])?;
            let suffix = args.str_at(0, "endswith")?;
            Ok(Value::Bool(s.ends_with(&*suffix)))
        }
        _ => Err(no_method("str", name)),
    }
}

fn file_method(file: &Mutex<FileHandle>, name: &str, args: Args) -> Result<Value, ScriptError> {
    let mut handle = lock(file);
    let writable = handle.writable;
    match name {
        "read" => {
            args.check("read", 0, 0, &[])?;
            let open = open_file(&mut handle)?;
            if writable {
                return Err(ScriptError::Os("file not open for reading".into()));
            }
            let mut text = String::new();
            open.read_to_string(&mut text)
                .map_err(|err| ScriptError::Os(err.to_string()))?;
            Ok(Value::str(text))
        }
        "write" => {
            args.check("write", 1, 1, &[])?;
            let text = args.str_at(0, "write")?;
            let open = open_file(&mut handle)?;
            if !writable {
                return Err(ScriptError::Os("file not open for writing".into()));
            }
            open.write_all(text.as_bytes())
                .map_err(|err| ScriptError::Os(err.to_string()))?;
            Ok(Value::Int(i64::try_from(text.chars().count()).unwrap_or(i64::MAX)))
        }
        "close" => {
            args.check("close", 0, 0, &[])?;
            handle.file = None;
            Ok(Value::None)
        }
        _ => Err(no_method("file", name)),
    }
}

fn open_file(handle: &mut FileHandle) -> Result<&mut std::fs::File, ScriptError> {
    handle
        .file
        .as_mut()
        .ok_or_else(|| ScriptError::Value("I/O operation on closed file".into()))
}

fn no_method(type_name: &str, name: &str) -> ScriptError {
    ScriptError::Attribute(format!("'{type_name}' object has no attribute '{name}'"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(receiver: &Value, name: &str, args: Vec<Value>) -> Result<Value, ScriptError> {
        call_method(receiver, name, Args::new(args))
    }

    #[test]
    fn test_list_methods() {
        let list = Value::list(vec![Value::Int(1)]);
        call(&list, "append", vec![Value::Int(2)]).unwrap();
        call(&list, "insert", vec![Value::Int(0), Value::Int(0)]).unwrap();
        call(&list, "extend", vec![list.clone()]).unwrap();
        assert_eq!(list.to_string(), "[0, 1, 2, 0, 1, 2]");
        assert_eq!(call(&list, "pop", vec![]).unwrap(), Value::Int(2));
        assert_eq!(call(&list, "pop", vec![Value::Int(0)]).unwrap(), Value::Int(0));
        assert_eq!(list.to_string(), "[1, 2, 0, 1]");
    }

    #[test]
    fn test_pop_from_empty_list() {
        let list = Value::list(Vec::new());
        assert!(matches!(
            call(&list, "pop", vec![]).unwrap_err(),
            ScriptError::Index(_)
        ));
    }

    #[test]
    fn test_dict_methods() {
        let mut dict = Dict::new();
        dict.insert(Value::str("a"), Value::Int(1)).unwrap();
        let dict = Value::dict(dict);
        assert_eq!(call(&dict, "get", vec![Value::str("a")]).unwrap(), Value::Int(1));
        assert_eq!(
            call(&dict, "get", vec![Value::str("z"), Value::Int(0)]).unwrap(),
            Value::Int(0)
        );
        assert_eq!(call(&dict, "items", vec![]).unwrap().to_string(), "[('a', 1)]");
        assert_eq!(call(&dict, "pop", vec![Value::str("a")]).unwrap(), Value::Int(1));
        assert!(call(&dict, "pop", vec![Value::str("a")]).is_err());
    }

    #[test]
    fn test_str_methods() {
        let s = Value::str("  Hello World  ");
        assert_eq!(call(&s, "strip", vec![]).unwrap(), Value::str("Hello World"));
        assert_eq!(
            call(&s, "split", vec![]).unwrap(),
            Value::list(vec![Value::str("Hello"), Value::str("World")])
        );
        let sep = Value::str(", ");
        assert_eq!(
            call(&sep, "join", vec![Value::list(vec![Value::str("a"), Value::str("b")])])
                .unwrap(),
            Value::str("a, b")
        );
        assert!(call(&sep, "join", vec![Value::list(vec![Value::Int(1)])]).is_err());
        assert_eq!(
            call(&Value::str("abc"), "upper", vec![]).unwrap(),
            Value::str("ABC")
        );
    }

    #[test]
    fn test_unknown_attribute() {
        let err = get_attr(&Value::Int(1), "real").unwrap_err();
        assert_eq!(
            err.to_string(),
            "AttributeError: 'int' object has no attribute 'real'"
        );
        assert!(get_attr(&Value::list(Vec::new()), "append").is_ok());
    }
}

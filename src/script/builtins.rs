//! Builtin functions visible to every script without an import.
//!
//! `open`, `eval`, `exec`, `globals`, `locals` and `__import__` are the
//! capability-bearing ones a policy usually denies.

use std::cmp::Ordering;
use std::fs::{File, OpenOptions};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tracing::info;

use crate::error::ScriptError;

use super::ast::BinOp;
use super::interp::Interpreter;
use super::methods;
use super::ops::{self, MAX_SEQUENCE_LEN};
use super::value::{lock, Args, Dict, FileHandle, Value};

pub fn functions() -> Vec<(&'static str, Value)> {
    vec![
        ("print", Value::native("print", print)),
        ("len", Value::native("len", len)),
        ("str", Value::native("str", to_str)),
        ("repr", Value::native("repr", repr)),
        ("int", Value::native("int", to_int)),
        ("float", Value::native("float", to_float)),
        ("bool", Value::native("bool", to_bool)),
        ("type", Value::native("type", type_of)),
        ("abs", Value::native("abs", abs)),
        ("min", Value::native("min", |_, args| extreme("min", args, Ordering::Less))),
        ("max", Value::native("max", |_, args| extreme("max", args, Ordering::Greater))),
        ("sum", Value::native("sum", sum)),
        ("sorted", Value::native("sorted", sorted)),
        ("range", Value::native("range", range)),
        ("list", Value::native("list", list)),
        ("dict", Value::native("dict", dict)),
        ("round", Value::native("round", round)),
        ("hasattr", Value::native("hasattr", hasattr)),
        ("getattr", Value::native("getattr", getattr)),
        ("open", Value::native("open", open)),
        ("eval", Value::native("eval", eval)),
        ("exec", Value::native("exec", exec)),
        ("globals", Value::native("globals", globals)),
        ("locals", Value::native("locals", locals)),
        ("__import__", Value::native("__import__", import)),
    ]
}

/// Converts a float to an int the way `int()` truncates.
pub fn float_to_int(value: f64) -> Result<i64, ScriptError> {
    if value.is_nan() {
        return Err(ScriptError::Value("cannot convert float NaN to integer".into()));
    }
    let truncated = value.trunc();
    if truncated < i64::MIN as f64 || truncated >= i64::MAX as f64 {
        return Err(ScriptError::Value("integer overflow".into()));
    }
    Ok(truncated as i64)
}

fn print(interp: &mut Interpreter<'_>, args: Args) -> Result<Value, ScriptError> {
    args.check("print", 0, usize::MAX, &["sep", "end"])?;
    let sep = match args.keyword("sep") {
        Some(Value::Str(sep)) => sep.to_string(),
        None | Some(Value::None) => " ".to_string(),
        Some(other) => {
            return Err(ScriptError::Type(format!(
                "sep must be None or a string, not {}",
                other.type_name()
            )))
        }
    };
    let line = args
        .positional
        .iter()
        .map(Value::to_string)
        .collect::<Vec<_>>()
        .join(&sep);
    info!(unit = %interp.unit_name(), "{line}");
    Ok(Value::None)
}

fn len(_: &mut Interpreter<'_>, args: Args) -> Result<Value, ScriptError> {
    args.check("len", 1, 1, &[])?;
    let n = match &args.positional[0] {
        Value::Str(s) => s.chars().count(),
        Value::List(items) => lock(items).len(),
        Value::Tuple(items) => items.len(),
        Value::Dict(dict) => lock(dict).len(),
        other => {
            return Err(ScriptError::Type(format!(
                "object of type '{}' has no len()",
                other.type_name()
            )))
        }
    };
    Ok(Value::Int(i64::try_from(n).unwrap_or(i64::MAX)))
}

fn to_str(_: &mut Interpreter<'_>, args: Args) -> Result<Value, ScriptError> {
    args.check("str", 0, 1, &[])?;
    Ok(match args.get(0) {
        Some(Value::Str(s)) => Value::Str(Arc::clone(s)),
        Some(other) => Value::str(other.to_string()),
        None => Value::str(""),
    })
}

fn repr(_: &mut Interpreter<'_>, args: Args) -> Result<Value, ScriptError> {
    args.check("repr", 1, 1, &[])?;
    Ok(Value::str(args.positional[0].repr()))
}

fn to_int(_: &mut Interpreter<'_>, args: Args) -> Result<Value, ScriptError> {
    args.check("int", 0, 1, &[])?;
    match args.get(0) {
        None => Ok(Value::Int(0)),
        Some(Value::Float(f)) => float_to_int(*f).map(Value::Int),
        Some(Value::Str(s)) => s
            .trim()
            .replace('_', "")
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|_| {
                ScriptError::Value(format!("invalid literal for int() with base 10: '{s}'"))
            }),
        Some(other) => other.as_int().map(Value::Int).ok_or_else(|| {
            ScriptError::Type(format!(
                "int() argument must be a string or a number, not '{}'",
                other.type_name()
            ))
        }),
    }
}

fn to_float(_: &mut Interpreter<'_>, args: Args) -> Result<Value, ScriptError> {
    args.check("float", 0, 1, &[])?;
    match args.get(0) {
        None => Ok(Value::Float(0.0)),
        Some(Value::Str(s)) => s.trim().parse::<f64>().map(Value::Float).map_err(|_| {
            ScriptError::Value(format!("could not convert string to float: '{s}'"))
        }),
        Some(other) => other.as_f64().map(Value::Float).ok_or_else(|| {
            ScriptError::Type(format!(
                "float() argument must be a string or a number, not '{}'",
                other.type_name()
            ))
        }),
    }
}

fn to_bool(_: &mut Interpreter<'_>, args: Args) -> Result<Value, ScriptError> {
    args.check("bool", 0, 1, &[])?;
    Ok(Value::Bool(args.get(0).is_some_and(Value::truthy)))
}

/// Returns the type's name rather than a type object.
fn type_of(_: &mut Interpreter<'_>, args: Args) -> Result<Value, ScriptError> {
    args.check("type", 1, 1, &[])?;
    Ok(Value::str(args.positional[0].type_name()))
}

fn abs(_: &mut Interpreter<'_>, args: Args) -> Result<Value, ScriptError> {
    args.check("abs", 1, 1, &[])?;
    match &args.positional[0] {
        Value::Float(f) => Ok(Value::Float(f.abs())),
        other => match other.as_int() {
            Some(i) => i
                .checked_abs()
                .map(Value::Int)
                .ok_or_else(|| ScriptError::Value("integer overflow".into())),
            None => Err(ScriptError::Type(format!(
                "bad operand type for abs(): '{}'",
                other.type_name()
            ))),
        },
    }
}

fn extreme(name: &str, args: Args, wanted: Ordering) -> Result<Value, ScriptError> {
    args.check(name, 1, usize::MAX, &[])?;
    let items = if args.len() == 1 {
        ops::iterate(&args.positional[0])?
    } else {
        args.positional
    };
    let mut best: Option<Value> = None;
    for item in items {
        best = match best {
            Some(current) if ops::order(&item, &current, "<")? != wanted => Some(current),
            _ => Some(item),
        };
    }
    best.ok_or_else(|| ScriptError::Value(format!("{name}() arg is an empty sequence")))
}

fn sum(_: &mut Interpreter<'_>, args: Args) -> Result<Value, ScriptError> {
    args.check("sum", 1, 2, &[])?;
    let mut total = args.get(1).cloned().unwrap_or(Value::Int(0));
    for item in ops::iterate(&args.positional[0])? {
        total = ops::binary(BinOp::Add, &total, &item)?;
    }
    Ok(total)
}

fn sorted(_: &mut Interpreter<'_>, args: Args) -> Result<Value, ScriptError> {
    args.check("sorted", 1, 1, &["reverse"])?;
    let mut items = ops::iterate(&args.positional[0])?;
    let mut failure = None;
    items.sort_by(|a, b| {
        ops::order(a, b, "<").unwrap_or_else(|err| {
            failure.get_or_insert(err);
            Ordering::Equal
        })
    });
    if let Some(err) = failure {
        return Err(err);
    }
    if args.keyword("reverse").is_some_and(Value::truthy) {
        items.reverse();
    }
    Ok(Value::list(items))
}

fn range(_: &mut Interpreter<'_>, args: Args) -> Result<Value, ScriptError> {
    args.check("range", 1, 3, &[])?;
    let ints = args
        .positional
        .iter()
        .map(|value| {
            value.as_int().ok_or_else(|| {
                ScriptError::Type(format!(
                    "'{}' object cannot be interpreted as an integer",
                    value.type_name()
                ))
            })
        })
        .collect::<Result<Vec<i64>, _>>()?;
    let (start, stop, step) = match ints.as_slice() {
        [stop] => (0, *stop, 1),
        [start, stop] => (*start, *stop, 1),
        [start, stop, step] => (*start, *stop, *step),
        _ => return Err(ScriptError::Type("range expected 1 to 3 arguments".into())),
    };
    if step == 0 {
        return Err(ScriptError::Value("range() arg 3 must not be zero".into()));
    }
    let span = if step > 0 {
        i128::from(stop) - i128::from(start)
    } else {
        i128::from(start) - i128::from(stop)
    };
    let step_size = i128::from(step).abs();
    let count = if span <= 0 {
        0
    } else {
        (span + step_size - 1) / step_size
    };
    if count > MAX_SEQUENCE_LEN as i128 {
        return Err(ScriptError::Value("range() is too large".into()));
    }
    let items = (0..count as i64)
        .map(|i| Value::Int(start + i * step))
        .collect();
    Ok(Value::list(items))
}

fn list(_: &mut Interpreter<'_>, args: Args) -> Result<Value, ScriptError> {
    args.check("list", 0, 1, &[])?;
    match args.get(0) {
        Some(value) => Ok(Value::list(ops::iterate(value)?)),
        None => Ok(Value::list(Vec::new())),
    }
}

fn dict(_: &mut Interpreter<'_>, args: Args) -> Result<Value, ScriptError> {
    let mut result = Dict::new();
    if args.len() > 1 {
        return Err(ScriptError::Type(format!(
            "dict expected at most 1 argument, got {}",
            args.len()
        )));
    }
    match args.get(0) {
        Some(Value::Dict(source)) => result = lock(source).clone(),
        Some(other) => {
            return Err(ScriptError::Type(format!(
                "'{}' object is not a mapping",
                other.type_name()
            )))
        }
        None => {}
    }
    for (key, value) in args.keywords {
        result.insert(Value::str(key), value)?;
    }
    Ok(Value::dict(result))
}

fn round(_: &mut Interpreter<'_>, args: Args) -> Result<Value, ScriptError> {
    args.check("round", 1, 2, &[])?;
    let x = args.number_at(0, "round")?;
    match args.get(1) {
        None | Some(Value::None) => {
            if let Some(i) = args.positional[0].as_int() {
                return Ok(Value::Int(i));
            }
            float_to_int(x.round_ties_even()).map(Value::Int)
        }
        Some(digits) => {
            let digits = digits
                .as_int()
                .ok_or_else(|| ScriptError::Type("ndigits must be an integer".into()))?;
            let factor = 10f64.powi(i32::try_from(digits.clamp(-308, 308)).unwrap_or(0));
            Ok(Value::Float((x * factor).round_ties_even() / factor))
        }
    }
}

fn hasattr(_: &mut Interpreter<'_>, args: Args) -> Result<Value, ScriptError> {
    args.check("hasattr", 2, 2, &[])?;
    let name = args.str_at(1, "hasattr")?;
    Ok(Value::Bool(methods::get_attr(&args.positional[0], &name).is_ok()))
}

fn getattr(_: &mut Interpreter<'_>, args: Args) -> Result<Value, ScriptError> {
    args.check("getattr", 2, 3, &[])?;
    let name = args.str_at(1, "getattr")?;
    match (methods::get_attr(&args.positional[0], &name), args.get(2)) {
        (Ok(value), _) => Ok(value),
        (Err(_), Some(default)) => Ok(default.clone()),
        (Err(err), None) => Err(err),
    }
}

// ── Capability-bearing builtins ──────────────────────────

fn open(_: &mut Interpreter<'_>, args: Args) -> Result<Value, ScriptError> {
    args.check("open", 1, 2, &["mode"])?;
    let path = PathBuf::from(&*args.str_at(0, "open")?);
    let mode = match args.get(1).or_else(|| args.keyword("mode")) {
        Some(Value::Str(mode)) => mode.to_string(),
        None => "r".to_string(),
        Some(other) => {
            return Err(ScriptError::Type(format!(
                "open() mode must be str, not {}",
                other.type_name()
            )))
        }
    };
    let normalized: String = mode.chars().filter(|c| !matches!(c, 'b' | 't')).collect();
    let (file, writable) = match normalized.as_str() {
        "r" => (File::open(&path), false),
        "w" => (File::create(&path), true),
        "a" => (OpenOptions::new().append(true).create(true).open(&path), true),
        _ => return Err(ScriptError::Value(format!("invalid mode: '{mode}'"))),
    };
    let file = file.map_err(|err| ScriptError::Os(format!("{}: {err}", path.display())))?;
    Ok(Value::File(Arc::new(Mutex::new(FileHandle {
        path,
        file: Some(file),
        writable,
    }))))
}

fn eval(interp: &mut Interpreter<'_>, args: Args) -> Result<Value, ScriptError> {
    args.check("eval", 1, 1, &[])?;
    let source = args.str_at(0, "eval")?;
    interp.eval_source(&source)
}

fn exec(interp: &mut Interpreter<'_>, args: Args) -> Result<Value, ScriptError> {
    args.check("exec", 1, 1, &[])?;
    let source = args.str_at(0, "exec")?;
    interp.exec_source(&source)?;
    Ok(Value::None)
}

/// A copy of the module namespace; writes to it do not propagate.
fn globals(interp: &mut Interpreter<'_>, args: Args) -> Result<Value, ScriptError> {
    args.check("globals", 0, 0, &[])?;
    to_dict(interp.globals().entries())
}

fn locals(interp: &mut Interpreter<'_>, args: Args) -> Result<Value, ScriptError> {
    args.check("locals", 0, 0, &[])?;
    match interp.locals() {
        Some(entries) => to_dict(entries),
        None => to_dict(interp.globals().entries()),
    }
}

fn to_dict(entries: Vec<(String, Value)>) -> Result<Value, ScriptError> {
    let mut dict = Dict::new();
    for (key, value) in entries {
        dict.insert(Value::str(key), value)?;
    }
    Ok(Value::dict(dict))
}

fn import(interp: &mut Interpreter<'_>, args: Args) -> Result<Value, ScriptError> {
    args.check("__import__", 1, 1, &[])?;
    let name = args.str_at(0, "__import__")?;
    let runtime = interp.runtime();
    runtime.import_module(&name)?;
    let root = name.split('.').next().unwrap_or_default();
    Ok(Value::Module(runtime.import_module(root)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::HostBridge;
    use crate::script::parser::parse_module;
    use crate::script::runtime::Runtime;
    use crate::script::value::Namespace;

    fn run(source: &str) -> Result<Arc<Namespace>, ScriptError> {
        let runtime = Runtime::new(Arc::new(HostBridge::new()));
        let namespace = Namespace::new("builtins_test");
        let body = parse_module(source).unwrap();
        Interpreter::new(&runtime, Arc::clone(&namespace)).exec_module(&body)?;
        Ok(namespace)
    }

    fn value_of(expr: &str) -> Value {
        run(&format!("result = {expr}"))
            .unwrap()
            .get("result")
            .unwrap()
    }

    #[test]
    fn test_conversions() {
        assert_eq!(value_of("int('42')"), Value::Int(42));
        assert_eq!(value_of("int(-3.9)"), Value::Int(-3));
        assert_eq!(value_of("float('2.5')"), Value::Float(2.5));
        assert_eq!(value_of("str(1.0)"), Value::str("1.0"));
        assert_eq!(value_of("bool([])"), Value::Bool(false));
        assert_eq!(value_of("repr('a')"), Value::str("'a'"));
        assert_eq!(value_of("type({})"), Value::str("dict"));
        assert!(run("int('abc')").is_err());
        assert!(run("int(float('nan'))").is_err());
    }

    #[test]
    fn test_sequence_builtins() {
        assert_eq!(value_of("len('héllo')"), Value::Int(5));
        assert_eq!(value_of("sum([1, 2, 3])"), Value::Int(6));
        assert_eq!(value_of("min(4, 2, 8)"), Value::Int(2));
        assert_eq!(value_of("max([4, 2, 8])"), Value::Int(8));
        assert_eq!(value_of("sorted([3, 1, 2])").to_string(), "[1, 2, 3]");
        assert_eq!(
            value_of("sorted(['b', 'a'], reverse=True)").to_string(),
            "['b', 'a']"
        );
        assert_eq!(value_of("range(2, 10, 3)").to_string(), "[2, 5, 8]");
        assert_eq!(value_of("range(5, 0, -2)").to_string(), "[5, 3, 1]");
        assert_eq!(value_of("range(0)").to_string(), "[]");
        assert!(run("max([])").is_err());
        assert!(run("sorted([1, 'a'])").is_err());
        assert!(run("range(0, 1, 0)").is_err());
        assert!(run("range(10000000000)").is_err());
    }

    #[test]
    fn test_round_and_abs() {
        assert_eq!(value_of("round(2.5)"), Value::Int(2));
        assert_eq!(value_of("round(3.14159, 2)"), Value::Float(3.14));
        assert_eq!(value_of("abs(-7)"), Value::Int(7));
    }

    #[test]
    fn test_dict_and_getattr() {
        assert_eq!(value_of("dict(a=1)").to_string(), "{'a': 1}");
        assert_eq!(value_of("hasattr([], 'append')"), Value::Bool(true));
        assert_eq!(value_of("getattr(1, 'nope', 'fallback')"), Value::str("fallback"));
    }

    #[test]
    fn test_open_writes_and_reads_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        let path = path.to_string_lossy().replace('\\', "/");
        let source = format!(
            "f = open('{path}', 'w')\nf.write('hello')\nf.close()\ncontent = open('{path}').read()\n"
        );
        let namespace = run(&source).unwrap();
        assert_eq!(namespace.get("content"), Some(Value::str("hello")));
    }

    #[test]
    fn test_open_missing_file_is_os_error() {
        let err = run("open('/definitely/not/here.txt')").unwrap_err();
        assert!(matches!(err.root(), ScriptError::Os(_)));
    }

    #[test]
    fn test_globals_and_dunder_import() {
        let namespace = run("x = 1\ng = globals()\nm = __import__('os.path')\n").unwrap();
        let g = namespace.get("g").unwrap();
        assert!(g.to_string().contains("'x': 1"));
        assert_eq!(namespace.get("m").unwrap().to_string(), "<module 'os'>");
    }

    #[test]
    fn test_locals_inside_function() {
        let source = "def f(a):\n    b = 2\n    return locals()\nresult = f(1)\n";
        let namespace = run(source).unwrap();
        assert_eq!(
            namespace.get("result").unwrap().to_string(),
            "{'a': 1, 'b': 2}"
        );
    }
}

//! Native modules scripts can import: `time`, `math`, `random`, `json`,
//! `os`, `sys` and `host`.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use rand::Rng;

use crate::bridge::HostBridge;
use crate::error::ScriptError;

use super::builtins::float_to_int;
use super::interp::Interpreter;
use super::ops;
use super::value::{lock, snapshot, Args, Dict, Module, Value};

/// Nesting depth at which `json.dumps` assumes a reference cycle.
const MAX_JSON_DEPTH: usize = 64;

pub fn native_modules(bridge: Arc<HostBridge>) -> Vec<Arc<Module>> {
    vec![
        time_module(),
        math_module(),
        random_module(),
        json_module(),
        os_module(),
        sys_module(),
        host_module(bridge),
    ]
}

// ── time ─────────────────────────────────────────────────

fn time_module() -> Arc<Module> {
    Module::new(
        "time",
        vec![
            ("sleep", Value::native("sleep", sleep)),
            (
                "time",
                Value::native("time", |_, args| {
                    args.check("time", 0, 0, &[])?;
                    let now = chrono::Utc::now();
                    Ok(Value::Float(now.timestamp_micros() as f64 / 1_000_000.0))
                }),
            ),
            (
                "monotonic",
                Value::native("monotonic", |_, args| {
                    args.check("monotonic", 0, 0, &[])?;
                    static START: OnceLock<Instant> = OnceLock::new();
                    let start = START.get_or_init(Instant::now);
                    Ok(Value::Float(start.elapsed().as_secs_f64()))
                }),
            ),
            ("strftime", Value::native("strftime", strftime)),
        ],
    )
}

fn sleep(_: &mut Interpreter<'_>, args: Args) -> Result<Value, ScriptError> {
    args.check("sleep", 1, 1, &[])?;
    let secs = args.number_at(0, "sleep")?;
    if secs.is_nan() || secs < 0.0 {
        return Err(ScriptError::Value("sleep length must be non-negative".into()));
    }
    let duration = Duration::try_from_secs_f64(secs)
        .map_err(|_| ScriptError::Value("sleep length is too large".into()))?;
    std::thread::sleep(duration);
    Ok(Value::None)
}

fn strftime(_: &mut Interpreter<'_>, args: Args) -> Result<Value, ScriptError> {
    args.check("strftime", 1, 1, &[])?;
    let format = args.str_at(0, "strftime")?;
    let mut out = String::new();
    write!(out, "{}", chrono::Local::now().format(&format))
        .map_err(|_| ScriptError::Value(format!("invalid format string: '{format}'")))?;
    Ok(Value::str(out))
}

// ── math ─────────────────────────────────────────────────

fn math_module() -> Arc<Module> {
    fn unary(
        name: &'static str,
        f: fn(f64) -> Result<Value, ScriptError>,
    ) -> (&'static str, Value) {
        (
            name,
            Value::native(name, move |_, args| {
                args.check(name, 1, 1, &[])?;
                f(args.number_at(0, name)?)
            }),
        )
    }

    Module::new(
        "math",
        vec![
            ("pi", Value::Float(std::f64::consts::PI)),
            ("e", Value::Float(std::f64::consts::E)),
            ("inf", Value::Float(f64::INFINITY)),
            unary("sqrt", |x| {
                if x < 0.0 {
                    return Err(domain_error());
                }
                Ok(Value::Float(x.sqrt()))
            }),
            unary("floor", |x| float_to_int(x.floor()).map(Value::Int)),
            unary("ceil", |x| float_to_int(x.ceil()).map(Value::Int)),
            unary("fabs", |x| Ok(Value::Float(x.abs()))),
            unary("exp", |x| Ok(Value::Float(x.exp()))),
            (
                "pow",
                Value::native("pow", |_, args| {
                    args.check("pow", 2, 2, &[])?;
                    Ok(Value::Float(
                        args.number_at(0, "pow")?.powf(args.number_at(1, "pow")?),
                    ))
                }),
            ),
            (
                "log",
                Value::native("log", |_, args| {
                    args.check("log", 1, 2, &[])?;
                    let x = args.number_at(0, "log")?;
                    if x <= 0.0 {
                        return Err(domain_error());
                    }
                    match args.get(1) {
                        Some(_) => {
                            let base = args.number_at(1, "log")?;
                            if base <= 0.0 || base == 1.0 {
                                return Err(domain_error());
                            }
                            Ok(Value::Float(x.ln() / base.ln()))
                        }
                        None => Ok(Value::Float(x.ln())),
                    }
                }),
            ),
        ],
    )
}

fn domain_error() -> ScriptError {
    ScriptError::Value("math domain error".into())
}

// ── random ───────────────────────────────────────────────

fn random_module() -> Arc<Module> {
    Module::new(
        "random",
        vec![
            (
                "random",
                Value::native("random", |_, args| {
                    args.check("random", 0, 0, &[])?;
                    Ok(Value::Float(rand::thread_rng().gen::<f64>()))
                }),
            ),
            (
                "uniform",
                Value::native("uniform", |_, args| {
                    args.check("uniform", 2, 2, &[])?;
                    let a = args.number_at(0, "uniform")?;
                    let b = args.number_at(1, "uniform")?;
                    Ok(Value::Float(a + (b - a) * rand::thread_rng().gen::<f64>()))
                }),
            ),
            (
                "randint",
                Value::native("randint", |_, args| {
                    args.check("randint", 2, 2, &[])?;
                    let bounds = (args.positional[0].as_int(), args.positional[1].as_int());
                    let (Some(low), Some(high)) = bounds else {
                        return Err(ScriptError::Type("randint() bounds must be integers".into()));
                    };
                    if low > high {
                        return Err(ScriptError::Value(format!(
                            "empty range for randint({low}, {high})"
                        )));
                    }
                    Ok(Value::Int(rand::thread_rng().gen_range(low..=high)))
                }),
            ),
            (
                "choice",
                Value::native("choice", |_, args| {
                    args.check("choice", 1, 1, &[])?;
                    let items = ops::iterate(&args.positional[0])?;
                    if items.is_empty() {
                        return Err(ScriptError::Index(
                            "cannot choose from an empty sequence".into(),
                        ));
                    }
                    let index = rand::thread_rng().gen_range(0..items.len());
                    Ok(items[index].clone())
                }),
            ),
        ],
    )
}

// ── json ─────────────────────────────────────────────────

fn json_module() -> Arc<Module> {
    Module::new(
        "json",
        vec![
            (
                "dumps",
                Value::native("dumps", |_, args| {
                    args.check("dumps", 1, 1, &[])?;
                    let json = to_json(&args.positional[0], 0)?;
                    Ok(Value::str(json.to_string()))
                }),
            ),
            (
                "loads",
                Value::native("loads", |_, args| {
                    args.check("loads", 1, 1, &[])?;
                    let text = args.str_at(0, "loads")?;
                    let json: serde_json::Value = serde_json::from_str(&text)
                        .map_err(|err| ScriptError::Value(err.to_string()))?;
                    Ok(from_json(json))
                }),
            ),
        ],
    )
}

fn to_json(value: &Value, depth: usize) -> Result<serde_json::Value, ScriptError> {
    use serde_json::Value as Json;

    if depth > MAX_JSON_DEPTH {
        return Err(ScriptError::Value("circular reference detected".into()));
    }
    let json = match value {
        Value::None => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Int(i) => Json::from(*i),
        Value::Float(f) => serde_json::Number::from_f64(*f)
            .map(Json::Number)
            .ok_or_else(|| {
                ScriptError::Value("out of range float values are not JSON compliant".into())
            })?,
        Value::Str(s) => Json::String(s.to_string()),
        Value::List(items) => Json::Array(
            snapshot(items)
                .iter()
                .map(|item| to_json(item, depth + 1))
                .collect::<Result<_, _>>()?,
        ),
        Value::Tuple(items) => Json::Array(
            items
                .iter()
                .map(|item| to_json(item, depth + 1))
                .collect::<Result<_, _>>()?,
        ),
        Value::Dict(dict) => {
            let entries = lock(dict).entries.clone();
            let mut object = serde_json::Map::new();
            for (key, item) in &entries {
                let key = match key {
                    Value::Str(s) => s.to_string(),
                    Value::None => "null".to_string(),
                    Value::Bool(b) => b.to_string(),
                    Value::Int(_) | Value::Float(_) => key.to_string(),
                    other => {
                        return Err(ScriptError::Type(format!(
                            "keys must be str, int, float, bool or None, not {}",
                            other.type_name()
                        )))
                    }
                };
                object.insert(key, to_json(item, depth + 1)?);
            }
            Json::Object(object)
        }
        other => {
            return Err(ScriptError::Type(format!(
                "Object of type {} is not JSON serializable",
                other.type_name()
            )))
        }
    };
    Ok(json)
}

fn from_json(json: serde_json::Value) -> Value {
    use serde_json::Value as Json;

    match json {
        Json::Null => Value::None,
        Json::Bool(b) => Value::Bool(b),
        Json::Number(n) => match n.as_i64() {
            Some(i) => Value::Int(i),
            None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
        },
        Json::String(s) => Value::str(s),
        Json::Array(items) => Value::list(items.into_iter().map(from_json).collect()),
        Json::Object(object) => {
            let mut dict = Dict::new();
            for (key, item) in object {
                dict.entries.push((Value::str(key), from_json(item)));
            }
            Value::dict(dict)
        }
    }
}

// ── os ───────────────────────────────────────────────────

fn os_error(path: &Path, err: std::io::Error) -> ScriptError {
    ScriptError::Os(format!("{}: {err}", path.display()))
}

fn os_module() -> Arc<Module> {
    let path = Module::new(
        "os.path",
        vec![
            (
                "exists",
                Value::native("exists", |_, args| {
                    args.check("exists", 1, 1, &[])?;
                    let path = args.str_at(0, "exists")?;
                    Ok(Value::Bool(Path::new(&*path).exists()))
                }),
            ),
            (
                "join",
                Value::native("join", |_, args| {
                    args.check("join", 1, usize::MAX, &[])?;
                    let mut joined = PathBuf::new();
                    for index in 0..args.len() {
                        joined.push(&*args.str_at(index, "join")?);
                    }
                    Ok(Value::str(joined.to_string_lossy()))
                }),
            ),
            (
                "basename",
                Value::native("basename", |_, args| {
                    args.check("basename", 1, 1, &[])?;
                    let path = args.str_at(0, "basename")?;
                    let base = path.rsplit_once('/').map_or(&*path, |(_, tail)| tail);
                    Ok(Value::str(base))
                }),
            ),
            (
                "dirname",
                Value::native("dirname", |_, args| {
                    args.check("dirname", 1, 1, &[])?;
                    let path = args.str_at(0, "dirname")?;
                    let dir = match path.rsplit_once('/') {
                        Some(("", _)) => "/",
                        Some((head, _)) => head,
                        None => "",
                    };
                    Ok(Value::str(dir))
                }),
            ),
        ],
    );

    Module::new(
        "os",
        vec![
            ("path", Value::Module(path)),
            ("sep", Value::str(std::path::MAIN_SEPARATOR.to_string())),
            (
                "getcwd",
                Value::native("getcwd", |_, args| {
                    args.check("getcwd", 0, 0, &[])?;
                    let cwd = std::env::current_dir()
                        .map_err(|err| ScriptError::Os(err.to_string()))?;
                    Ok(Value::str(cwd.to_string_lossy()))
                }),
            ),
            (
                "listdir",
                Value::native("listdir", |_, args| {
                    args.check("listdir", 0, 1, &[])?;
                    let dir = match args.get(0) {
                        Some(_) => PathBuf::from(&*args.str_at(0, "listdir")?),
                        None => PathBuf::from("."),
                    };
                    let mut names = Vec::new();
                    for entry in std::fs::read_dir(&dir).map_err(|err| os_error(&dir, err))? {
                        let entry = entry.map_err(|err| os_error(&dir, err))?;
                        names.push(entry.file_name().to_string_lossy().into_owned());
                    }
                    names.sort();
                    Ok(Value::list(names.into_iter().map(Value::str).collect()))
                }),
            ),
            (
                "remove",
                Value::native("remove", |_, args| {
                    args.check("remove", 1, 1, &[])?;
                    let path = PathBuf::from(&*args.str_at(0, "remove")?);
                    std::fs::remove_file(&path).map_err(|err| os_error(&path, err))?;
                    Ok(Value::None)
                }),
            ),
            (
                "getenv",
                Value::native("getenv", |_, args| {
                    args.check("getenv", 1, 2, &[])?;
                    let name = args.str_at(0, "getenv")?;
                    Ok(match std::env::var(&*name) {
                        Ok(value) => Value::str(value),
                        Err(_) => args.get(1).cloned().unwrap_or(Value::None),
                    })
                }),
            ),
        ],
    )
}

// ── sys ──────────────────────────────────────────────────

fn sys_module() -> Arc<Module> {
    let platform = match std::env::consts::OS {
        "macos" => "darwin",
        "windows" => "win32",
        other => other,
    };
    let argv = std::env::args_os()
        .map(|arg| Value::str(arg.to_string_lossy()))
        .collect();
    Module::new(
        "sys",
        vec![
            ("platform", Value::str(platform)),
            (
                "version",
                Value::str(concat!("sandbox-runner ", env!("CARGO_PKG_VERSION"))),
            ),
            ("maxsize", Value::Int(i64::MAX)),
            ("argv", Value::list(argv)),
        ],
    )
}

// ── host ─────────────────────────────────────────────────

fn host_module(bridge: Arc<HostBridge>) -> Arc<Module> {
    Module::new(
        "host",
        vec![(
            "import_value",
            Value::native("import_value", move |_, args| {
                args.check("import_value", 1, 1, &[])?;
                let name = args.str_at(0, "import_value")?;
                Ok(bridge.import_value(&name))
            }),
        )],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::parser::parse_module;
    use crate::script::runtime::Runtime;
    use crate::script::value::Namespace;

    fn run(source: &str) -> Result<Arc<Namespace>, ScriptError> {
        let runtime = Runtime::new(Arc::new(HostBridge::new()));
        let namespace = Namespace::new("modules_test");
        let body = parse_module(source).unwrap();
        Interpreter::new(&runtime, Arc::clone(&namespace)).exec_module(&body)?;
        Ok(namespace)
    }

    #[test]
    fn test_json_round_trip_through_script() {
        let source = "\
import json
text = json.dumps({'a': [1, 2.5, None, True]})
back = json.loads(text)
";
        let namespace = run(source).unwrap();
        assert_eq!(
            namespace.get("text"),
            Some(Value::str(r#"{"a":[1,2.5,null,true]}"#))
        );
        assert_eq!(
            namespace.get("back").unwrap().to_string(),
            "{'a': [1, 2.5, None, True]}"
        );
    }

    #[test]
    fn test_json_rejects_unserializable_and_cycles() {
        assert!(run("import json\njson.dumps(open)").is_err());
        let source = "\
import json
a = []
a.append(a)
json.dumps(a)
";
        assert!(run(source).is_err());
        assert!(run("import json\njson.loads('{')").is_err());
    }

    #[test]
    fn test_math_domain_errors() {
        assert!(run("import math\nmath.sqrt(-1)").is_err());
        assert!(run("import math\nmath.log(0)").is_err());
        let namespace = run("import math\nx = math.ceil(1.2)\ny = math.log(8, 2)").unwrap();
        assert_eq!(namespace.get("x"), Some(Value::Int(2)));
        assert_eq!(namespace.get("y"), Some(Value::Float(3.0)));
    }

    #[test]
    fn test_random_respects_bounds() {
        let namespace = run("import random\nx = random.randint(3, 3)\ny = random.random()").unwrap();
        assert_eq!(namespace.get("x"), Some(Value::Int(3)));
        let y = namespace.get("y").unwrap().as_f64().unwrap();
        assert!((0.0..1.0).contains(&y));
        assert!(run("import random\nrandom.randint(2, 1)").is_err());
        assert!(run("import random\nrandom.choice([])").is_err());
    }

    #[test]
    fn test_time_sleep_validates_and_sleeps() {
        assert!(run("import time\ntime.sleep(-1)").is_err());
        let started = Instant::now();
        run("import time\ntime.sleep(0.05)").unwrap();
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn test_strftime_formats_current_time() {
        let namespace = run("import time\nyear = time.strftime('%Y')").unwrap();
        let year = namespace.get("year").unwrap().to_string();
        assert_eq!(year.len(), 4);
    }

    #[test]
    fn test_os_listdir_and_remove() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.txt"), "").unwrap();
        std::fs::write(dir.path().join("a.txt"), "").unwrap();
        let root = dir.path().to_string_lossy().replace('\\', "/");
        let source = format!(
            "import os\nbefore = os.listdir('{root}')\nos.remove(os.path.join('{root}', 'a.txt'))\nafter = os.listdir('{root}')\n"
        );
        let namespace = run(&source).unwrap();
        assert_eq!(namespace.get("before").unwrap().to_string(), "['a.txt', 'b.txt']");
        assert_eq!(namespace.get("after").unwrap().to_string(), "['b.txt']");
    }

    #[test]
    fn test_os_path_helpers() {
        let namespace = run(
            "import os\na = os.path.dirname('/tmp/x.py')\nb = os.path.dirname('/x')\nc = os.path.basename('x')",
        )
        .unwrap();
        assert_eq!(namespace.get("a"), Some(Value::str("/tmp")));
        assert_eq!(namespace.get("b"), Some(Value::str("/")));
        assert_eq!(namespace.get("c"), Some(Value::str("x")));
    }
}

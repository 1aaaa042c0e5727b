//! Tree-walking evaluator.
//!
//! One `Interpreter` is created per module-body run and per entry-point
//! invocation. It borrows the shared `Runtime` and executes against a unit's
//! namespace; nothing it creates outlives the call except values written
//! into that namespace.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::error::ScriptError;

use super::ast::{BinOp, BoolOp, Constant, Expr, ImportNames, Stmt, StmtKind};
use super::methods;
use super::ops;
use super::parser::{parse_expression, parse_module};
use super::runtime::Runtime;
use super::value::{lock, Args, Dict, Function, Namespace, Value};

/// Nested script calls allowed before `RecursionError`.
pub const MAX_CALL_DEPTH: usize = 64;

enum Flow {
    Normal,
    Return(Value),
    Break,
    Continue,
}

#[derive(Default)]
struct Frame {
    locals: HashMap<String, Value>,
    /// Names declared `global` in this frame.
    globals: HashSet<String>,
}

pub struct Interpreter<'rt> {
    runtime: &'rt Runtime,
    globals: Arc<Namespace>,
    frames: Vec<Frame>,
}

impl<'rt> Interpreter<'rt> {
    pub fn new(runtime: &'rt Runtime, globals: Arc<Namespace>) -> Self {
        Self {
            runtime,
            globals,
            frames: Vec::new(),
        }
    }

    pub fn runtime(&self) -> &'rt Runtime {
        self.runtime
    }

    pub fn globals(&self) -> &Arc<Namespace> {
        &self.globals
    }

    pub fn unit_name(&self) -> &str {
        self.globals.name()
    }

    /// Local bindings of the innermost function call, or `None` at module level.
    pub fn locals(&self) -> Option<Vec<(String, Value)>> {
        self.frames.last().map(|frame| {
            let mut entries: Vec<(String, Value)> = frame
                .locals
                .iter()
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            entries
        })
    }

    /// Runs a module body against the current namespace.
    pub fn exec_module(&mut self, body: &[Stmt]) -> Result<(), ScriptError> {
        self.exec_block(body).map(|_| ())
    }

    /// Parses and runs source text in the current scope (`exec`).
    pub fn exec_source(&mut self, source: &str) -> Result<(), ScriptError> {
        let body = parse_module(source)
            .map_err(|err| ScriptError::Raised(format!("SyntaxError: {err}")))?;
        self.exec_block(&body).map(|_| ())
    }

    /// Parses and evaluates one expression in the current scope (`eval`).
    pub fn eval_source(&mut self, source: &str) -> Result<Value, ScriptError> {
        let expr = parse_expression(source)
            .map_err(|err| ScriptError::Raised(format!("SyntaxError: {err}")))?;
        self.eval(&expr)
    }

    pub fn call(
        &mut self,
        callee: &Value,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> Result<Value, ScriptError> {
        let args = Args {
            positional: args,
            keywords: kwargs,
        };
        match callee {
            Value::Function(func) => self.call_function(func, args),
            Value::Native(native) => (native.func)(self, args),
            Value::Method(method) => methods::call_method(&method.receiver, &method.name, args),
            Value::Host(_) => methods::call_method(callee, "apply", args),
            other => Err(ScriptError::Type(format!(
                "'{}' object is not callable",
                other.type_name()
            ))),
        }
    }

    fn call_function(&mut self, func: &Function, args: Args) -> Result<Value, ScriptError> {
        if self.frames.len() >= MAX_CALL_DEPTH {
            return Err(ScriptError::Recursion(MAX_CALL_DEPTH));
        }
        let def = &func.def;
        let globals = func.globals.upgrade().ok_or_else(|| {
            ScriptError::Value(format!(
                "{}() belongs to a unit that is no longer loaded",
                def.name
            ))
        })?;

        let params = &def.params;
        if args.positional.len() > params.len() {
            return Err(ScriptError::Type(format!(
                "{}() takes {} positional arguments but {} were given",
                def.name,
                params.len(),
                args.positional.len()
            )));
        }
        let mut slots: Vec<Option<Value>> = vec![None; params.len()];
        for (slot, arg) in slots.iter_mut().zip(args.positional) {
            *slot = Some(arg);
        }
        for (key, value) in args.keywords {
            let Some(index) = params.iter().position(|param| param.name == key) else {
                return Err(ScriptError::Type(format!(
                    "{}() got an unexpected keyword argument '{key}'",
                    def.name
                )));
            };
            if slots[index].is_some() {
                return Err(ScriptError::Type(format!(
                    "{}() got multiple values for argument '{key}'",
                    def.name
                )));
            }
            slots[index] = Some(value);
        }

        let mut frame = Frame::default();
        for ((param, slot), default) in params.iter().zip(slots).zip(&func.defaults) {
            let Some(value) = slot.or_else(|| default.clone()) else {
                return Err(ScriptError::Type(format!(
                    "{}() missing required argument '{}'",
                    def.name, param.name
                )));
            };
            frame.locals.insert(param.name.clone(), value);
        }

        let caller_globals = std::mem::replace(&mut self.globals, globals);
        self.frames.push(frame);
        let outcome = self.exec_block(&def.body);
        self.frames.pop();
        self.globals = caller_globals;

        match outcome? {
            Flow::Return(value) => Ok(value),
            _ => Ok(Value::None),
        }
    }

    // ── Statements ───────────────────────────────────────

    fn exec_block(&mut self, body: &[Stmt]) -> Result<Flow, ScriptError> {
        for stmt in body {
            match self.exec_stmt(stmt)? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_stmt(&mut self, stmt: &Stmt) -> Result<Flow, ScriptError> {
        self.exec_kind(&stmt.kind)
            .map_err(|err| err.at_line(stmt.line))
    }

    fn exec_kind(&mut self, kind: &StmtKind) -> Result<Flow, ScriptError> {
        match kind {
            StmtKind::Expr(expr) => {
                self.eval(expr)?;
            }
            StmtKind::Assign { targets, value } => {
                let value = self.eval(value)?;
                for target in targets {
                    self.assign(target, value.clone())?;
                }
            }
            StmtKind::AugAssign { target, op, value } => self.aug_assign(target, *op, value)?,
            StmtKind::If { test, body, orelse } => {
                let branch = if self.eval(test)?.truthy() { body } else { orelse };
                return self.exec_block(branch);
            }
            StmtKind::While { test, body } => {
                while self.eval(test)?.truthy() {
                    match self.exec_block(body)? {
                        Flow::Break => break,
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
            }
            StmtKind::For { target, iter, body } => {
                let items = ops::iterate(&self.eval(iter)?)?;
                for item in items {
                    self.assign_name(target, item);
                    match self.exec_block(body)? {
                        Flow::Break => break,
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
            }
            StmtKind::FunctionDef(def) => {
                let defaults = def
                    .params
                    .iter()
                    .map(|param| param.default.as_ref().map(|expr| self.eval(expr)).transpose())
                    .collect::<Result<Vec<_>, _>>()?;
                let func = Function {
                    def: Arc::clone(def),
                    defaults,
                    globals: Arc::downgrade(&self.globals),
                };
                self.assign_name(&def.name, Value::Function(Arc::new(func)));
            }
            StmtKind::Return(value) => {
                let value = match value {
                    Some(expr) => self.eval(expr)?,
                    None => Value::None,
                };
                return Ok(Flow::Return(value));
            }
            StmtKind::Pass => {}
            StmtKind::Break => return Ok(Flow::Break),
            StmtKind::Continue => return Ok(Flow::Continue),
            StmtKind::Global(names) => {
                if let Some(frame) = self.frames.last_mut() {
                    for name in names {
                        frame.locals.remove(name);
                        frame.globals.insert(name.clone());
                    }
                }
            }
            StmtKind::Import(aliases) => {
                for alias in aliases {
                    let leaf = self.runtime.import_module(&alias.name)?;
                    let bound = match alias.asname {
                        Some(_) => leaf,
                        None => self.runtime.import_module(alias.binding())?,
                    };
                    self.assign_name(alias.binding(), Value::Module(bound));
                }
            }
            StmtKind::ImportFrom {
                module,
                level,
                names,
            } => {
                let module_name = module.as_deref().unwrap_or_default();
                if *level > 0 {
                    return Err(ScriptError::Import(format!(
                        "{}{module_name}",
                        ".".repeat(*level)
                    )));
                }
                let module = self.runtime.import_module(module_name)?;
                match names {
                    ImportNames::Star => {
                        let mut public: Vec<(&String, &Value)> = module
                            .attrs
                            .iter()
                            .filter(|(key, _)| !key.starts_with('_'))
                            .collect();
                        public.sort_by(|a, b| a.0.cmp(b.0));
                        for (key, value) in public {
                            self.assign_name(key, value.clone());
                        }
                    }
                    ImportNames::Names(aliases) => {
                        for alias in aliases {
                            let value = module.attrs.get(&alias.name).cloned().ok_or_else(|| {
                                ScriptError::Import(format!("{module_name}.{}", alias.name))
                            })?;
                            self.assign_name(alias.binding(), value);
                        }
                    }
                }
            }
            StmtKind::Raise(value) => {
                let message = match value {
                    Some(expr) => self.eval(expr)?.to_string(),
                    None => "RuntimeError: no active exception to re-raise".to_string(),
                };
                return Err(ScriptError::Raised(message));
            }
        }
        Ok(Flow::Normal)
    }

    fn aug_assign(&mut self, target: &Expr, op: BinOp, value: &Expr) -> Result<(), ScriptError> {
        match target {
            Expr::Name(name) => {
                let current = self.lookup(name)?;
                let rhs = self.eval(value)?;
                let updated = augmented(op, &current, rhs)?;
                self.assign_name(name, updated);
                Ok(())
            }
            Expr::Subscript {
                value: container,
                index,
            } => {
                let container = self.eval(container)?;
                let index = self.eval(index)?;
                let current = ops::get_item(&container, &index)?;
                let rhs = self.eval(value)?;
                let updated = augmented(op, &current, rhs)?;
                ops::set_item(&container, index, updated)
            }
            other => self.assign(other, Value::None),
        }
    }

    fn assign(&mut self, target: &Expr, value: Value) -> Result<(), ScriptError> {
        match target {
            Expr::Name(name) => {
                self.assign_name(name, value);
                Ok(())
            }
            Expr::Subscript {
                value: container,
                index,
            } => {
                let container = self.eval(container)?;
                let index = self.eval(index)?;
                ops::set_item(&container, index, value)
            }
            Expr::Attribute { value: object, attr } => {
                let object = self.eval(object)?;
                Err(ScriptError::Attribute(format!(
                    "'{}' object attribute '{attr}' is read-only",
                    object.type_name()
                )))
            }
            _ => Err(ScriptError::Type("cannot assign to expression".into())),
        }
    }

    fn assign_name(&mut self, name: &str, value: Value) {
        match self.frames.last_mut() {
            Some(frame) if !frame.globals.contains(name) => {
                frame.locals.insert(name.to_string(), value);
            }
            _ => self.globals.set(name, value),
        }
    }

    fn lookup(&self, name: &str) -> Result<Value, ScriptError> {
        if let Some(frame) = self.frames.last() {
            if let Some(value) = frame.locals.get(name) {
                return Ok(value.clone());
            }
        }
        if let Some(value) = self.globals.get(name) {
            return Ok(value);
        }
        self.runtime
            .builtin(name)
            .ok_or_else(|| ScriptError::Name(name.to_string()))
    }

    // ── Expressions ──────────────────────────────────────

    pub fn eval(&mut self, expr: &Expr) -> Result<Value, ScriptError> {
        match expr {
            Expr::Constant(constant) => Ok(match constant {
                Constant::None => Value::None,
                Constant::Bool(b) => Value::Bool(*b),
                Constant::Int(i) => Value::Int(*i),
                Constant::Float(f) => Value::Float(*f),
                Constant::Str(s) => Value::str(s),
            }),
            Expr::Name(name) => self.lookup(name),
            Expr::Attribute { value, attr } => {
                let value = self.eval(value)?;
                methods::get_attr(&value, attr)
            }
            Expr::Subscript { value, index } => {
                let container = self.eval(value)?;
                let index = self.eval(index)?;
                ops::get_item(&container, &index)
            }
            Expr::Call { func, args, kwargs } => {
                let callee = self.eval(func)?;
                let args = args
                    .iter()
                    .map(|arg| self.eval(arg))
                    .collect::<Result<Vec<_>, _>>()?;
                let kwargs = kwargs
                    .iter()
                    .map(|(key, arg)| Ok((key.clone(), self.eval(arg)?)))
                    .collect::<Result<Vec<_>, ScriptError>>()?;
                self.call(&callee, args, kwargs)
            }
            Expr::BinOp { left, op, right } => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                ops::binary(*op, &left, &right)
            }
            Expr::UnaryOp { op, operand } => {
                let operand = self.eval(operand)?;
                ops::unary(*op, &operand)
            }
            Expr::BoolOp { op, left, right } => {
                let left = self.eval(left)?;
                match (op, left.truthy()) {
                    (BoolOp::And, false) | (BoolOp::Or, true) => Ok(left),
                    _ => self.eval(right),
                }
            }
            Expr::Compare { left, ops: chain } => {
                let mut current = self.eval(left)?;
                for (op, operand) in chain {
                    let right = self.eval(operand)?;
                    if !ops::compare(*op, &current, &right)? {
                        return Ok(Value::Bool(false));
                    }
                    current = right;
                }
                Ok(Value::Bool(true))
            }
            Expr::IfExp { test, body, orelse } => {
                if self.eval(test)?.truthy() {
                    self.eval(body)
                } else {
                    self.eval(orelse)
                }
            }
            Expr::List(items) => Ok(Value::list(self.eval_all(items)?)),
            Expr::Tuple(items) => Ok(Value::tuple(self.eval_all(items)?)),
            Expr::Dict(pairs) => {
                let mut dict = Dict::new();
                for (key, value) in pairs {
                    let key = self.eval(key)?;
                    let value = self.eval(value)?;
                    dict.insert(key, value)?;
                }
                Ok(Value::dict(dict))
            }
        }
    }

    fn eval_all(&mut self, items: &[Expr]) -> Result<Vec<Value>, ScriptError> {
        items.iter().map(|item| self.eval(item)).collect()
    }
}

/// `+=` extends a list in place; every other operator rebinds.
fn augmented(op: BinOp, current: &Value, rhs: Value) -> Result<Value, ScriptError> {
    if let (BinOp::Add, Value::List(items)) = (op, current) {
        let extra = ops::iterate(&rhs)?;
        lock(items).extend(extra);
        return Ok(current.clone());
    }
    ops::binary(op, current, &rhs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::HostBridge;
    use crate::script::parser::parse_module;

    fn run(source: &str) -> Result<Arc<Namespace>, ScriptError> {
        let runtime = Runtime::new(Arc::new(HostBridge::new()));
        let namespace = Namespace::new("test");
        let body = parse_module(source).unwrap();
        Interpreter::new(&runtime, Arc::clone(&namespace)).exec_module(&body)?;
        Ok(namespace)
    }

    fn global(source: &str, name: &str) -> Value {
        run(source).unwrap().get(name).unwrap()
    }

    #[test]
    fn test_arithmetic_and_assignment() {
        assert_eq!(global("x = 1 + 2 * 3", "x"), Value::Int(7));
        assert_eq!(global("a = b = 5\nc = a + b", "c"), Value::Int(10));
        assert_eq!(global("x = 10\nx //= 3", "x"), Value::Int(3));
    }

    #[test]
    fn test_functions_defaults_and_keywords() {
        let source = "\
def scale(value, factor=2):
    return value * factor

a = scale(3)
b = scale(3, factor=4)
";
        assert_eq!(global(source, "a"), Value::Int(6));
        assert_eq!(global(source, "b"), Value::Int(12));
    }

    #[test]
    fn test_function_locals_do_not_leak_but_globals_do() {
        let source = "\
count = 0
def bump():
    global count
    temp = 1
    count += temp

bump()
bump()
";
        let namespace = run(source).unwrap();
        assert_eq!(namespace.get("count"), Some(Value::Int(2)));
        assert!(!namespace.contains("temp"));
    }

    #[test]
    fn test_loops_with_break_and_continue() {
        let source = "\
total = 0
for i in range(10):
    if i % 2 == 0:
        continue
    if i > 7:
        break
    total += i
n = 0
while True:
    n += 1
    if n == 5:
        break
";
        assert_eq!(global(source, "total"), Value::Int(1 + 3 + 5 + 7));
        assert_eq!(global(source, "n"), Value::Int(5));
    }

    #[test]
    fn test_chained_comparison_and_boolean_operators() {
        assert_eq!(global("x = 1 < 2 <= 2 < 3", "x"), Value::Bool(true));
        assert_eq!(global("x = 1 < 2 > 3", "x"), Value::Bool(false));
        assert_eq!(global("x = 0 or 'fallback'", "x"), Value::str("fallback"));
        assert_eq!(global("x = 'a' and None", "x"), Value::None);
        assert_eq!(global("x = 'yes' if 3 in [1, 2, 3] else 'no'", "x"), Value::str("yes"));
    }

    #[test]
    fn test_list_plus_equals_extends_in_place() {
        let source = "\
items = [1]
alias = items
items += [2, 3]
";
        assert_eq!(
            global(source, "alias"),
            Value::list(vec![Value::Int(1), Value::Int(2), Value::Int(3)])
        );
    }

    #[test]
    fn test_subscript_assignment() {
        let source = "\
data = {'a': 1}
data['b'] = 2
data['a'] += 10
items = [0, 0]
items[-1] = 9
";
        let namespace = run(source).unwrap();
        assert_eq!(namespace.get("data").unwrap().to_string(), "{'a': 11, 'b': 2}");
        assert_eq!(namespace.get("items").unwrap().to_string(), "[0, 9]");
    }

    #[test]
    fn test_errors_carry_the_failing_line() {
        let err = run("x = 1\ny = undefined_name\n").unwrap_err();
        assert_eq!(err.line(), Some(2));
        assert_eq!(err.root(), &ScriptError::Name("undefined_name".into()));
    }

    #[test]
    fn test_error_inside_function_reports_inner_line() {
        let source = "\
def broken():
    return 1 / 0

broken()
";
        let err = run(source).unwrap_err();
        assert_eq!(err.line(), Some(2));
        assert_eq!(err.root(), &ScriptError::ZeroDivision);
    }

    #[test]
    fn test_argument_binding_errors() {
        let source = "def f(a, b):\n    return a\nf(1)\n";
        let err = run(source).unwrap_err();
        assert!(err.to_string().contains("missing required argument 'b'"));

        let source = "def f(a):\n    return a\nf(1, a=2)\n";
        let err = run(source).unwrap_err();
        assert!(err.to_string().contains("multiple values"));

        let source = "def f():\n    return 1\nf(1)\n";
        assert!(run(source).is_err());
    }

    #[test]
    fn test_raise_uses_the_value_as_message() {
        let err = run("raise 'boom'").unwrap_err();
        assert_eq!(err.root(), &ScriptError::Raised("boom".into()));
    }

    #[test]
    fn test_unbounded_recursion_is_stopped() {
        // Deep recursion needs more stack than the default test thread has.
        let handle = std::thread::Builder::new()
            .stack_size(16 * 1024 * 1024)
            .spawn(|| run("def f(n):\n    return f(n + 1)\nf(0)\n").unwrap_err())
            .unwrap();
        let err = handle.join().unwrap();
        assert_eq!(err.root(), &ScriptError::Recursion(MAX_CALL_DEPTH));
    }

    #[test]
    fn test_imports_bind_modules_and_names() {
        let source = "\
import math
import os.path
import os.path as osp
from math import sqrt as root
a = math.floor(2.5)
b = root(16)
c = os.path.basename('/tmp/x.txt')
d = osp.basename('/tmp/y.txt')
";
        let namespace = run(source).unwrap();
        assert_eq!(namespace.get("a"), Some(Value::Int(2)));
        assert_eq!(namespace.get("b"), Some(Value::Float(4.0)));
        assert_eq!(namespace.get("c"), Some(Value::str("x.txt")));
        assert_eq!(namespace.get("d"), Some(Value::str("y.txt")));
        assert!(matches!(namespace.get("os"), Some(Value::Module(_))));
    }

    #[test]
    fn test_unknown_and_relative_imports_fail() {
        let err = run("import nonexistent").unwrap_err();
        assert_eq!(err.root(), &ScriptError::Import("nonexistent".into()));

        let err = run("from . import sibling").unwrap_err();
        assert_eq!(err.root(), &ScriptError::Import(".".into()));

        let err = run("from math import nothing").unwrap_err();
        assert_eq!(err.root(), &ScriptError::Import("math.nothing".into()));
    }

    #[test]
    fn test_exec_and_eval_run_in_current_scope() {
        let source = "\
exec('created = 40')
value = eval('created + 2')
";
        assert_eq!(global(source, "value"), Value::Int(42));
    }
}

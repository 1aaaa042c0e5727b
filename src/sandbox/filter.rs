//! Static capability filter.
//!
//! Builds a new statement sequence from a parsed module: denied imports are
//! left out, calls to denied callables are replaced by the `None` constant.
//! The input tree is never modified. Only direct, syntactically visible uses
//! are caught; `o = open; o(...)` or `getattr` lookups pass through.

use std::fmt;
use std::sync::Arc;

use crate::script::ast::{Alias, Constant, Expr, FunctionDef, Param, Stmt, StmtKind};

use super::policy::CapabilityPolicy;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViolationKind {
    /// An import of the named module was removed
    Import(String),
    /// A call to the named callable was neutralized
    Call(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub kind: ViolationKind,
    pub line: u32,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ViolationKind::Import(module) => {
                write!(f, "import of '{module}' at line {}", self.line)
            }
            ViolationKind::Call(name) => write!(f, "call to '{name}' at line {}", self.line),
        }
    }
}

/// Returns the filtered module body and everything that was stripped from it.
pub fn sanitize(body: &[Stmt], policy: &CapabilityPolicy) -> (Vec<Stmt>, Vec<Violation>) {
    let mut filter = Filter {
        policy,
        violations: Vec::new(),
    };
    let body = filter.block(body);
    (body, filter.violations)
}

struct Filter<'p> {
    policy: &'p CapabilityPolicy,
    violations: Vec<Violation>,
}

impl Filter<'_> {
    fn flag(&mut self, kind: ViolationKind, line: u32) {
        self.violations.push(Violation { kind, line });
    }

    fn block(&mut self, body: &[Stmt]) -> Vec<Stmt> {
        body.iter().filter_map(|stmt| self.stmt(stmt)).collect()
    }

    /// `None` drops the statement from the output.
    fn stmt(&mut self, stmt: &Stmt) -> Option<Stmt> {
        let line = stmt.line;
        let kind = match &stmt.kind {
            StmtKind::Expr(expr) => StmtKind::Expr(self.expr(expr, line)),
            StmtKind::Assign { targets, value } => StmtKind::Assign {
                targets: self.exprs(targets, line),
                value: self.expr(value, line),
            },
            StmtKind::AugAssign { target, op, value } => StmtKind::AugAssign {
                target: self.expr(target, line),
                op: *op,
                value: self.expr(value, line),
            },
            StmtKind::If { test, body, orelse } => StmtKind::If {
                test: self.expr(test, line),
                body: self.block(body),
                orelse: self.block(orelse),
            },
            StmtKind::While { test, body } => StmtKind::While {
                test: self.expr(test, line),
                body: self.block(body),
            },
            StmtKind::For { target, iter, body } => StmtKind::For {
                target: target.clone(),
                iter: self.expr(iter, line),
                body: self.block(body),
            },
            StmtKind::FunctionDef(def) => {
                let params = def
                    .params
                    .iter()
                    .map(|param| Param {
                        name: param.name.clone(),
                        default: param.default.as_ref().map(|expr| self.expr(expr, def.line)),
                    })
                    .collect();
                StmtKind::FunctionDef(Arc::new(FunctionDef {
                    name: def.name.clone(),
                    params,
                    body: self.block(&def.body),
                    line: def.line,
                }))
            }
            StmtKind::Return(value) => {
                StmtKind::Return(value.as_ref().map(|expr| self.expr(expr, line)))
            }
            StmtKind::Raise(value) => {
                StmtKind::Raise(value.as_ref().map(|expr| self.expr(expr, line)))
            }
            StmtKind::Import(aliases) => {
                let kept: Vec<Alias> = aliases
                    .iter()
                    .filter(|alias| {
                        let denied = self.policy.denies_import(&alias.name);
                        if denied {
                            self.flag(ViolationKind::Import(alias.name.clone()), line);
                        }
                        !denied
                    })
                    .cloned()
                    .collect();
                if kept.is_empty() {
                    return None;
                }
                StmtKind::Import(kept)
            }
            StmtKind::ImportFrom {
                module,
                level,
                names,
            } => {
                let relative_denied = *level > 0 && self.policy.denies_relative_imports();
                let module_denied = module
                    .as_deref()
                    .is_some_and(|name| self.policy.denies_import(name));
                if relative_denied || module_denied {
                    let shown = format!("{}{}", ".".repeat(*level), module.as_deref().unwrap_or(""));
                    self.flag(ViolationKind::Import(shown), line);
                    return None;
                }
                StmtKind::ImportFrom {
                    module: module.clone(),
                    level: *level,
                    names: names.clone(),
                }
            }
            StmtKind::Pass
            | StmtKind::Break
            | StmtKind::Continue
            | StmtKind::Global(_) => stmt.kind.clone(),
        };
        Some(Stmt::new(kind, line))
    }

    fn exprs(&mut self, exprs: &[Expr], line: u32) -> Vec<Expr> {
        exprs.iter().map(|expr| self.expr(expr, line)).collect()
    }

    fn boxed(&mut self, expr: &Expr, line: u32) -> Box<Expr> {
        Box::new(self.expr(expr, line))
    }

    fn expr(&mut self, expr: &Expr, line: u32) -> Expr {
        match expr {
            Expr::Call { func, args, kwargs } => {
                if let Expr::Name(name) = func.as_ref() {
                    if self.policy.denies_callable(name) {
                        self.flag(ViolationKind::Call(name.clone()), line);
                        return Expr::Constant(Constant::None);
                    }
                }
                Expr::Call {
                    func: self.boxed(func, line),
                    args: self.exprs(args, line),
                    kwargs: kwargs
                        .iter()
                        .map(|(key, value)| (key.clone(), self.expr(value, line)))
                        .collect(),
                }
            }
            Expr::Constant(_) | Expr::Name(_) => expr.clone(),
            Expr::Attribute { value, attr } => Expr::Attribute {
                value: self.boxed(value, line),
                attr: attr.clone(),
            },
            Expr::Subscript { value, index } => Expr::Subscript {
                value: self.boxed(value, line),
                index: self.boxed(index, line),
            },
            Expr::BinOp { left, op, right } => Expr::BinOp {
                left: self.boxed(left, line),
                op: *op,
                right: self.boxed(right, line),
            },
            Expr::UnaryOp { op, operand } => Expr::UnaryOp {
                op: *op,
                operand: self.boxed(operand, line),
            },
            Expr::BoolOp { op, left, right } => Expr::BoolOp {
                op: *op,
                left: self.boxed(left, line),
                right: self.boxed(right, line),
            },
            Expr::Compare { left, ops } => Expr::Compare {
                left: self.boxed(left, line),
                ops: ops
                    .iter()
                    .map(|(op, operand)| (*op, self.expr(operand, line)))
                    .collect(),
            },
            Expr::IfExp { test, body, orelse } => Expr::IfExp {
                test: self.boxed(test, line),
                body: self.boxed(body, line),
                orelse: self.boxed(orelse, line),
            },
            Expr::List(items) => Expr::List(self.exprs(items, line)),
            Expr::Tuple(items) => Expr::Tuple(self.exprs(items, line)),
            Expr::Dict(pairs) => Expr::Dict(
                pairs
                    .iter()
                    .map(|(key, value)| (self.expr(key, line), self.expr(value, line)))
                    .collect(),
            ),
        }
    }
}

//! Static checks run on the filtered tree before its module body executes.

use std::collections::HashSet;

use crate::error::CompileError;
use crate::script::ast::{FunctionDef, Stmt, StmtKind};

#[derive(Clone, Copy, Default)]
struct Scope {
    in_function: bool,
    in_loop: bool,
}

pub fn validate(body: &[Stmt]) -> Result<(), CompileError> {
    check_block(body, Scope::default())
}

fn check_block(body: &[Stmt], scope: Scope) -> Result<(), CompileError> {
    body.iter().try_for_each(|stmt| check_stmt(stmt, scope))
}

fn check_stmt(stmt: &Stmt, scope: Scope) -> Result<(), CompileError> {
    let fail = |message: &str| {
        Err(CompileError {
            line: stmt.line,
            message: message.to_string(),
        })
    };
    match &stmt.kind {
        StmtKind::Return(_) if !scope.in_function => fail("'return' outside function"),
        StmtKind::Break if !scope.in_loop => fail("'break' outside loop"),
        StmtKind::Continue if !scope.in_loop => fail("'continue' not properly in loop"),
        StmtKind::If { body, orelse, .. } => {
            check_block(body, scope)?;
            check_block(orelse, scope)
        }
        StmtKind::While { body, .. } | StmtKind::For { body, .. } => check_block(
            body,
            Scope {
                in_loop: true,
                ..scope
            },
        ),
        StmtKind::FunctionDef(def) => check_function(def),
        _ => Ok(()),
    }
}

fn check_function(def: &FunctionDef) -> Result<(), CompileError> {
    let fail = |message: String| {
        Err(CompileError {
            line: def.line,
            message,
        })
    };
    let mut seen = HashSet::new();
    let mut saw_default = false;
    for param in &def.params {
        if !seen.insert(param.name.as_str()) {
            return fail(format!(
                "duplicate argument '{}' in function definition",
                param.name
            ));
        }
        match (&param.default, saw_default) {
            (Some(_), _) => saw_default = true,
            (None, true) => {
                return fail("non-default argument follows default argument".to_string())
            }
            (None, false) => {}
        }
    }
    check_block(
        &def.body,
        Scope {
            in_function: true,
            in_loop: false,
        },
    )
}

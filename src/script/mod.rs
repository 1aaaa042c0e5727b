//! The embedded scripting language loaded units are written in.
//!
//! A small Python-flavoured language: `lexer` and `parser` build an `ast`,
//! `interp` walks it against a `value::Namespace`, and `runtime` supplies
//! the builtins and native modules every unit shares.

pub mod ast;
pub mod builtins;
pub mod interp;
pub mod lexer;
pub mod methods;
pub mod modules;
pub mod ops;
pub mod parser;
pub mod runtime;
pub mod value;

pub use interp::Interpreter;
pub use parser::parse_module;
pub use runtime::Runtime;
pub use value::{Namespace, Value};

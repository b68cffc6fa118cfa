//! Restricted JavaScript-flavoured scripting language used by queries.
//!
//! Programs are parsed into an AST and evaluated by a tree-walking interpreter over a
//! per-evaluation arena heap. The global scope is an explicit allow-list of built-ins:
//! there is no filesystem, network, process or timer access.

mod ast;
mod builtins;
mod convert;
mod error;
mod interpreter;
mod lexer;
mod parser;
mod value;

pub use ast::Program;
pub use convert::json_number;
pub use error::EvalError;
pub use interpreter::{Abrupt, Budget, HostFunctions, Interpreter, MAX_CALL_DEPTH};
pub use parser::{parse_expression_program, parse_statement_program};
pub use value::{Heap, HeapObject, ObjectId, ObjectKind, PropertyMap, Value};

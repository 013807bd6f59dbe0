//! The embedded language healed functions are written in.
//!
//! Source files hold top-level `fn` definitions, each optionally preceded by
//! `@attribute` lines. Definitions keep their exact byte span so a single
//! function can be replaced in place.

pub mod ast;
pub mod builtins;
pub mod fault;
pub mod interpreter;
pub mod lexer;
pub mod parser;
pub mod unit;
pub mod value;

pub use ast::{FunctionDef, HEAL_ATTRIBUTE, ParsedSource};
pub use builtins::{NativeFn, Natives};
pub use fault::{ErrorKind, Frame, NATIVE_FILE, ScriptError, SyntaxError};
pub use interpreter::{CallArgs, Interpreter};
pub use parser::parse_source;
pub use unit::CompiledUnit;
pub use value::Value;

//! Parses, preprocesses, and executes FlipJump programs: the `a;b`
//! single-instruction machine, its macro-rich assembly language, and the
//! interpreter that runs an assembled image.

pub mod ast;
pub mod diag;
pub mod error;
pub mod expr;
pub mod loader;
pub mod macros;
pub mod memory;
pub mod parser;
pub mod preprocess;
pub mod vm;

pub use diag::{FileId, Files, FqName, SourceLocation, StackArena, StackFrame, StackFrameId};
pub use error::{AssembleError, Error, ParseError, PreprocessError, Result, VmError};
pub use expr::{eval, narrow_to_width, BinOp, EvalError, Expr, ExprArena, ExprId, UnOp};
pub use loader::{load_and_resolve, FsLoader, SourceLoader};
pub use macros::{collect_macros, DefId, LookupResult, MacroRegistry};
pub use memory::Memory;
pub use parser::parse;
pub use preprocess::{preprocess, top_level_namespace, PreprocItem, PreprocessConfig};
pub use vm::{IoAddresses, StopReason, Vm, VmConfig};

//! Per-stage error types, composed into one top-level [`Error`]. Each
//! variant carries the source location (and, where the spec calls for it,
//! a macro-stack trace) needed to report a useful diagnostic.

use crate::diag::{FqName, SourceLocation, StackFrameId};
use crate::expr::EvalError;
use crate::parser::Rule;

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("{message}")]
    Syntax {
        loc: SourceLocation,
        message: String,
    },
    #[error("include not found: {path}")]
    Include { path: String, loc: SourceLocation },
    #[error(transparent)]
    Pest(Box<pest::error::Error<Rule>>),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum PreprocessError {
    #[error("macro recursion exceeded depth limit of {limit} at {loc:?}")]
    MacroRecursion {
        limit: usize,
        loc: SourceLocation,
        stack: Vec<FqName>,
    },
    #[error("rep count does not resolve to a compile-time constant at {loc:?}")]
    UnresolvedRepCount { loc: SourceLocation },
    #[error("macro \"{name}\" called with {got} arguments, expected {expected} at {loc:?}")]
    MacroArityMismatch {
        name: FqName,
        expected: usize,
        got: usize,
        loc: SourceLocation,
    },
    #[error("undefined macro \"{name}\" at {loc:?}")]
    UndefinedMacro { name: FqName, loc: SourceLocation },
    #[error("ambiguous macro reference \"{name}\" at {loc:?}")]
    AmbiguousMacro { name: FqName, loc: SourceLocation },
    #[error("label parameter at {loc:?} was not passed a bare label reference")]
    ExpectedLabelArgument { loc: SourceLocation },
    #[error(transparent)]
    Eval(#[from] EvalError),
}

#[derive(Debug, thiserror::Error)]
pub enum AssembleError {
    #[error("undefined label \"{name}\" at {loc:?}")]
    UnresolvedLabel {
        name: FqName,
        loc: SourceLocation,
        stack: Option<StackFrameId>,
    },
    #[error("address for \"{name}\" exceeds the {width}-bit address space at {loc:?}")]
    AddressOutOfRange {
        name: FqName,
        width: u32,
        loc: SourceLocation,
    },
    #[error("arithmetic error at {loc:?}: {source}")]
    Arithmetic {
        #[source]
        source: EvalError,
        loc: SourceLocation,
    },
    #[error("no IO label bound; startup must define one (see design notes)")]
    MissingIo,
}

#[derive(Debug, thiserror::Error)]
pub enum VmError {
    #[error("execution exceeded the configured step limit")]
    RunTimeExceeded,
    #[error("execution was cancelled")]
    Cancelled,
    #[error("I/O error writing program output: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Preprocess(#[from] PreprocessError),
    #[error(transparent)]
    Assemble(#[from] AssembleError),
    #[error(transparent)]
    Vm(#[from] VmError),
}

pub type Result<T> = std::result::Result<T, Error>;

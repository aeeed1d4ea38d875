//! Unified diagnostic types for every phase.
//!
//! Each phase returns `(result, Vec<PhaseError>)` rather than a bare
//! `Result`: no phase short-circuits on the first problem. `Error`
//! exists only to give the CLI a single type to collect exit-code
//! decisions from.

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
#[error("{line}:{column}: {message}")]
pub struct LexError {
    pub message: String,
    pub line: u32,
    pub column: u32,
}

#[derive(Debug, Clone, Error, PartialEq)]
#[error("{line}:{column}: {message}")]
pub struct PreprocessError {
    pub message: String,
    pub line: u32,
    pub column: u32,
}

#[derive(Debug, Clone, Error, PartialEq)]
#[error("{line}:{column}: {message}")]
pub struct ParseError {
    pub message: String,
    pub line: u32,
    pub column: u32,
}

#[derive(Debug, Clone, Error, PartialEq)]
#[error("{line}:{column}: {message}")]
pub struct CompileError {
    pub message: String,
    pub line: u32,
    pub column: u32,
}

/// Runtime errors surfaced by the scheduler/host seam. Logged by
/// the scheduler, never fatal to other sequences.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum HostError {
    #[error("unknown callable '{0}'")]
    UnknownCallable(String),
    #[error("type mismatch: {0}")]
    TypeMismatch(String),
    #[error("array index out of range: {index} (len {len})")]
    IndexOutOfRange { index: i64, len: usize },
    #[error("division by zero")]
    DivisionByZero,
}

/// Top-level error type a CLI driver can collect all phase failures
/// into, as one enum-of-enums.
#[derive(Debug, Error)]
pub enum Error {
    #[error("preprocessing failed with {0} error(s)")]
    Preprocess(usize),
    #[error("lexing failed with {0} error(s)")]
    Lex(usize),
    #[error("parsing failed with {0} error(s)")]
    Parse(usize),
    #[error("compilation failed with {0} error(s)")]
    Compile(usize),
    #[error("runtime error: {0}")]
    Host(#[from] HostError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Renders a `line:column: message` diagnostic line for CLI output.
pub trait Diagnostic {
    fn line(&self) -> u32;
    fn column(&self) -> u32;
    fn message(&self) -> String;

    fn render(&self) -> String {
        format!("{}:{}: {}", self.line(), self.column(), self.message())
    }
}

macro_rules! impl_diagnostic {
    ($ty:ty) => {
        impl Diagnostic for $ty {
            fn line(&self) -> u32 {
                self.line
            }
            fn column(&self) -> u32 {
                self.column
            }
            fn message(&self) -> String {
                self.message.clone()
            }
        }
    };
}

impl_diagnostic!(LexError);
impl_diagnostic!(PreprocessError);
impl_diagnostic!(ParseError);
impl_diagnostic!(CompileError);

//! Shared error utilities used across the compilation pipeline.
//!
//! Every stage reports the first fault it meets and stops; nothing in the
//! compiler tries to recover or collect several diagnostics. Lexical errors
//! point at the offending byte with a caret, the rest carry the names that
//! were involved.

use std::path::PathBuf;

use snafu::Snafu;

use crate::ty::Type;

pub type CompileResult<T> = Result<T, CompileError>;

/// Coarse classification of a [`CompileError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
  /// Bad characters, unbalanced delimiters, malformed statements.
  Structural,
  /// Unknown variables, type mismatches, unmatched signatures.
  Semantic,
  /// Names and labels that cannot be resolved at link time.
  Resolution,
  /// Reading sources or libraries, writing output.
  Io,
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum CompileError {
  #[snafu(display("{expr_line}\n{marker} {message}"))]
  WithLocation {
    expr_line: String,
    marker: String,
    message: String,
  },

  #[snafu(display("expected a valid expression, but got \"{found}\""))]
  UnacceptableToken { found: String },

  #[snafu(display("expression is empty"))]
  EmptyExpression,

  #[snafu(display("no operator found in expression \"{found}\""))]
  UnknownOperator { found: String },

  #[snafu(display("malformed {construct}: {message}"))]
  MalformedStatement {
    construct: &'static str,
    message: String,
  },

  #[snafu(display("unexpected \"{found}\" at start of statement"))]
  UnexpectedToken { found: String },

  #[snafu(display("unknown variable {name}"))]
  UnknownVariable { name: String },

  #[snafu(display("{subject}: expected {expected}, but got {found}"))]
  TypeMismatch {
    subject: String,
    expected: Type,
    found: Type,
  },

  #[snafu(display("no matching signature for {function}{found}"))]
  NoMatchingSignature { function: String, found: String },

  #[snafu(display("non-state variable {name} cannot be loaded"))]
  NotPersistent { name: String },

  #[snafu(display("imports are only allowed in the root of a file (/{name})"))]
  ImportOutsideRoot { name: String },

  #[snafu(display("functions can only be declared in the root of a file ({name})"))]
  FunctionOutsideRoot { name: String },

  #[snafu(display("invalid system function \"{name}\", expected module::function"))]
  InvalidSystemFunction { name: String },

  #[snafu(display("unknown system function {module}::{function}"))]
  UnknownSystemFunction { module: String, function: String },

  #[snafu(display("unknown library function {name}"))]
  UnknownLibraryFunction { name: String },

  #[snafu(display("library function {name} depends on itself"))]
  CyclicLibraryDependency { name: String },

  #[snafu(display("{library}:{line}: {message}"))]
  MalformedLibrary {
    library: String,
    line: usize,
    message: String,
  },

  #[snafu(display("could not skip libraries; no ^^^^BEGIN_SOURCE^^^^ declaration found"))]
  MissingBoundary,

  #[snafu(display("unresolved {kind} {id}"))]
  UnresolvedLabel { kind: &'static str, id: u32 },

  #[snafu(display("line {line}: malformed operand \"{operand}\""))]
  MalformedOperand { line: usize, operand: String },

  #[snafu(display("no slots left after {last:#010x}"))]
  SlotsExhausted { last: u32 },

  #[snafu(display("function id {id:#x} is registered twice"))]
  DuplicateFunctionId { id: u64 },

  #[snafu(display("return placeholder used but the program epilogue was never emitted"))]
  MissingEpilogue,

  #[snafu(display("failed to read {}: {source}", path.display()))]
  ReadSource {
    path: PathBuf,
    source: std::io::Error,
  },

  #[snafu(display("failed to load library {}: {source}", path.display()))]
  ReadLibrary {
    path: PathBuf,
    source: std::io::Error,
  },

  #[snafu(display("failed to write {}: {source}", path.display()))]
  WriteOutput {
    path: PathBuf,
    source: std::io::Error,
  },
}

impl CompileError {
  /// Construct an error anchored at a specific byte offset in the source.
  pub fn at(src: &str, loc: usize, message: impl Into<String>) -> Self {
    let safe_loc = loc.min(src.len());
    let line_start = src[..safe_loc].rfind('\n').map_or(0, |i| i + 1);
    let line_end = src[safe_loc..]
      .find('\n')
      .map_or(src.len(), |i| safe_loc + i);
    let expr_line = format!("'{}'", &src[line_start..line_end]);
    let char_offset = src[line_start..safe_loc].chars().count() + 1; // account for opening quote
    let marker = format!("{}^", " ".repeat(char_offset));
    Self::WithLocation {
      expr_line,
      marker,
      message: message.into(),
    }
  }

  pub fn kind(&self) -> ErrorKind {
    match self {
      Self::WithLocation { .. }
      | Self::UnacceptableToken { .. }
      | Self::EmptyExpression
      | Self::UnknownOperator { .. }
      | Self::MalformedStatement { .. }
      | Self::UnexpectedToken { .. }
      | Self::MalformedLibrary { .. }
      | Self::MalformedOperand { .. } => ErrorKind::Structural,
      Self::UnknownVariable { .. }
      | Self::TypeMismatch { .. }
      | Self::NoMatchingSignature { .. }
      | Self::NotPersistent { .. }
      | Self::ImportOutsideRoot { .. }
      | Self::FunctionOutsideRoot { .. }
      | Self::DuplicateFunctionId { .. }
      | Self::SlotsExhausted { .. } => ErrorKind::Semantic,
      Self::InvalidSystemFunction { .. }
      | Self::UnknownSystemFunction { .. }
      | Self::UnknownLibraryFunction { .. }
      | Self::CyclicLibraryDependency { .. }
      | Self::MissingBoundary
      | Self::UnresolvedLabel { .. }
      | Self::MissingEpilogue => ErrorKind::Resolution,
      Self::ReadSource { .. } | Self::ReadLibrary { .. } | Self::WriteOutput { .. } => {
        ErrorKind::Io
      }
    }
  }
}

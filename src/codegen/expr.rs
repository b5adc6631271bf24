//! Expression lowering.
//!
//! There is no precedence: the first operator found at the top level of an
//! expression splits it into a left and a right half, which are lowered in
//! that order. Parentheses are the only way to group.

use snafu::OptionExt;

use super::scope::{Location, Scope};
use super::sink::{CodeSink, bytes, slot, state_address, word};
use crate::error::{
  CompileResult, EmptyExpressionSnafu, UnacceptableTokenSnafu, UnknownOperatorSnafu,
  UnknownVariableSnafu,
};
use crate::linker::Linker;
use crate::tokenizer::{Token, TokenKind, describe_tokens};
use crate::ty::Type;

/// Library functions leave their result in this slot.
pub const RETURN_SLOT: u32 = 0x0000_0001;

/// Slot and static type of a lowered value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lowered {
  pub slot: u32,
  pub ty: Type,
}

impl Lowered {
  pub fn new(slot: u32, ty: Type) -> Self {
    Self { slot, ty }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
  Concat,
  Add,
  Sub,
  Mul,
  Div,
  Exp,
  Eq,
}

impl Operator {
  pub fn from_token(kind: &TokenKind) -> Option<Self> {
    match kind {
      TokenKind::Concat => Some(Self::Concat),
      TokenKind::Add => Some(Self::Add),
      TokenKind::Sub => Some(Self::Sub),
      TokenKind::Mul => Some(Self::Mul),
      TokenKind::Div => Some(Self::Div),
      TokenKind::Exp => Some(Self::Exp),
      TokenKind::EqEq => Some(Self::Eq),
      _ => None,
    }
  }

  pub fn result_type(self) -> Type {
    match self {
      Self::Concat => Type::String,
      Self::Eq => Type::Boolean,
      Self::Add | Self::Sub | Self::Mul | Self::Div | Self::Exp => Type::Uint64,
    }
  }

  fn emit(self, a: u32, b: u32, dst: u32, sink: &mut CodeSink) {
    let mnemonic = match self {
      // `App` appends in place, so the left operand is copied first.
      Self::Concat => {
        sink.cpy_bfr(&slot(a), &slot(dst));
        sink.app(dst, b);
        return;
      }
      Self::Add => "Add",
      Self::Sub => "Sub",
      Self::Mul => "Mul",
      Self::Div => "Div",
      Self::Exp => "Exp",
      Self::Eq => "Eq",
    };
    sink.binary(mnemonic, a, b, dst);
  }
}

fn is_acceptable(kind: &TokenKind) -> bool {
  matches!(
    kind,
    TokenKind::Ident(_) | TokenKind::Int(_) | TokenKind::Str(_) | TokenKind::Expr(_)
  )
}

/// Lower one expression token.
pub fn lower(
  token: &Token,
  scope: &mut Scope,
  sink: &mut CodeSink,
  linker: &mut Linker<'_>,
) -> CompileResult<Lowered> {
  if !is_acceptable(&token.kind) {
    return UnacceptableTokenSnafu {
      found: token.kind.to_string(),
    }
    .fail();
  }
  match &token.kind {
    TokenKind::Expr(children) => lower_tokens(children, scope, sink, linker),
    _ => lower_tokens(std::slice::from_ref(token), scope, sink, linker),
  }
}

/// Lower a token sequence as one expression.
pub fn lower_tokens(
  tokens: &[Token],
  scope: &mut Scope,
  sink: &mut CodeSink,
  linker: &mut Linker<'_>,
) -> CompileResult<Lowered> {
  match tokens {
    [] => EmptyExpressionSnafu.fail(),
    [single] => lower_term(single, scope, sink, linker),
    [bang, name, args] if bang.is(&TokenKind::Bang) && matches!(args.kind, TokenKind::Expr(_)) => {
      let name = name.ident().context(UnacceptableTokenSnafu {
        found: name.kind.to_string(),
      })?;
      lower_call(name, args, scope, sink, linker)
    }
    _ => {
      let (pos, op) = tokens
        .iter()
        .enumerate()
        .find_map(|(pos, token)| Operator::from_token(&token.kind).map(|op| (pos, op)))
        .context(UnknownOperatorSnafu {
          found: describe_tokens(tokens),
        })?;
      let a = lower_tokens(&tokens[..pos], scope, sink, linker)?;
      let a = settle(a, scope, sink)?;
      let b = lower_tokens(&tokens[pos + 1..], scope, sink, linker)?;
      let dst = scope.alloc()?;
      sink.init_bfr(dst);
      op.emit(a.slot, b.slot, dst, sink);
      Ok(Lowered::new(dst, op.result_type()))
    }
  }
}

fn lower_term(
  token: &Token,
  scope: &mut Scope,
  sink: &mut CodeSink,
  linker: &mut Linker<'_>,
) -> CompileResult<Lowered> {
  match &token.kind {
    TokenKind::Int(value) => {
      let s = scope.alloc()?;
      sink.init_bfr(s);
      sink.set_cnst(s, &word(*value));
      Ok(Lowered::new(s, Type::Uint64))
    }
    TokenKind::Str(text) => {
      let s = scope.alloc()?;
      sink.init_bfr(s);
      sink.set_cnst(s, &bytes(text));
      Ok(Lowered::new(s, Type::String))
    }
    TokenKind::Ident(name) => {
      let var = scope
        .vars
        .get(name)
        .context(UnknownVariableSnafu { name })?;
      match var.location {
        Location::Slot(s) => Ok(Lowered::new(s, var.ty)),
        Location::State(addr) => {
          let ty = var.ty;
          Ok(Lowered::new(read_state(addr, scope, sink)?, ty))
        }
      }
    }
    TokenKind::Expr(children) => lower_tokens(children, scope, sink, linker),
    other => UnacceptableTokenSnafu {
      found: other.to_string(),
    }
    .fail(),
  }
}

/// Materialise a state address into a fresh slot.
pub fn address_constant(addr: u64, scope: &mut Scope, sink: &mut CodeSink) -> CompileResult<u32> {
  let s = scope.alloc()?;
  sink.init_bfr(s);
  sink.set_cnst(s, &state_address(addr));
  Ok(s)
}

fn read_state(addr: u64, scope: &mut Scope, sink: &mut CodeSink) -> CompileResult<u32> {
  let addr_slot = address_constant(addr, scope, sink)?;
  let dst = scope.alloc()?;
  sink.init_bfr(dst);
  sink.get_from_state(addr_slot, dst);
  Ok(dst)
}

/// Move a call result out of the shared return slot so the next call
/// cannot overwrite it. Other values are returned unchanged.
pub fn settle(lowered: Lowered, scope: &mut Scope, sink: &mut CodeSink) -> CompileResult<Lowered> {
  if lowered.slot != RETURN_SLOT {
    return Ok(lowered);
  }
  let s = scope.alloc()?;
  sink.cpy_bfr(&slot(RETURN_SLOT), &slot(s));
  Ok(Lowered::new(s, lowered.ty))
}

/// Lower `!name(args)`: every argument, then the library call sequence.
pub fn lower_call(
  name: &str,
  args: &Token,
  scope: &mut Scope,
  sink: &mut CodeSink,
  linker: &mut Linker<'_>,
) -> CompileResult<Lowered> {
  let children = args.children().unwrap_or_default();
  let mut lowered = Vec::new();
  for arg in split_args(children) {
    let arg = lower_tokens(arg, scope, sink, linker)?;
    lowered.push(settle(arg, scope, sink)?);
  }
  let ty = linker.call_function(name, &lowered, scope, sink)?;
  Ok(Lowered::new(RETURN_SLOT, ty))
}

/// Split an argument list on top-level commas. An empty list has no
/// arguments.
pub fn split_args(tokens: &[Token]) -> Vec<&[Token]> {
  if tokens.is_empty() {
    return Vec::new();
  }
  tokens
    .split(|token| token.is(&TokenKind::Comma))
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::codegen::scope::Variable;
  use crate::codegen::sink::BOUNDARY_MARKER;
  use crate::linker::Library;
  use crate::error::CompileError;
  use crate::parser::parse;
  use crate::tokenizer::tokenize;

  fn expr(source: &str) -> Vec<Token> {
    parse(tokenize(source).unwrap(), source).unwrap()
  }

  fn lower_source(source: &str, scope: &mut Scope) -> CompileResult<(Lowered, CodeSink)> {
    let mut sink = CodeSink::new();
    let mut linker = Linker::new(&[]);
    let lowered = lower_tokens(&expr(source), scope, &mut sink, &mut linker)?;
    Ok((lowered, sink))
  }

  #[test]
  fn integer_literal_is_one_allocation_and_one_constant() {
    let mut scope = Scope::new(0x1000);
    let (lowered, sink) = lower_source("42", &mut scope).unwrap();
    assert_eq!(lowered, Lowered::new(0x1000, Type::Uint64));
    assert_eq!(
      sink.lines(),
      [
        "InitBfr 0x00001000 0x00000000",
        "SetCnst 0x00001000 0x000000000000002a 0x00000000",
      ]
    );
  }

  #[test]
  fn first_operator_splits_and_result_slot_is_fresh() {
    let mut scope = Scope::new(0x1000);
    let (lowered, sink) = lower_source("1 + 2 * 3", &mut scope).unwrap();
    // 1 | (2 * 3): slots 0x1000, then 0x1001 and 0x1002 -> 0x1003, then 0x1004.
    assert_eq!(lowered, Lowered::new(0x1004, Type::Uint64));
    assert_eq!(
      sink.lines().last().map(String::as_str),
      Some("Add 0x00001000 0x00001003 0x00001004 0x00000000")
    );
  }

  #[test]
  fn identifiers_alias_without_emitting() {
    let mut scope = Scope::new(0x1000);
    scope
      .vars
      .bind(Variable::new("y", Location::Slot(0x1005), Type::Uint64));
    let (lowered, sink) = lower_source("y", &mut scope).unwrap();
    assert_eq!(lowered, Lowered::new(0x1005, Type::Uint64));
    assert!(sink.is_empty());
  }

  #[test]
  fn persistent_reads_materialise_the_address() {
    let mut scope = Scope::new(0x1000);
    scope
      .vars
      .bind(Variable::new("'v", Location::State(3), Type::Uint64));
    let (lowered, sink) = lower_source("'v", &mut scope).unwrap();
    assert_eq!(lowered, Lowered::new(0x1001, Type::Uint64));
    assert_eq!(
      sink.lines(),
      [
        "InitBfr 0x00001000 0x00000000",
        "SetCnst 0x00001000 0x0000000000000003 0x00000000",
        "InitBfr 0x00001001 0x00000000",
        "GetFromState 0x00001000 0x00001001 0x00000000",
      ]
    );
  }

  #[test]
  fn equality_yields_boolean_and_concat_yields_string() {
    let mut scope = Scope::new(0x1000);
    let (eq, _) = lower_source("1 == 2", &mut scope).unwrap();
    assert_eq!(eq.ty, Type::Boolean);
    let (cat, sink) = lower_source("\"a\" . \"b\"", &mut scope).unwrap();
    assert_eq!(cat.ty, Type::String);
    assert_eq!(
      sink.lines().last().map(String::as_str),
      Some("App 0x00001005 0x00001004 0x00000000")
    );
  }

  #[test]
  fn failures_are_reported() {
    let mut scope = Scope::new(0x1000);
    assert!(matches!(
      lower_source("nope", &mut scope),
      Err(CompileError::UnknownVariable { .. })
    ));
    assert!(matches!(
      lower_source("1 2", &mut scope),
      Err(CompileError::UnknownOperator { .. })
    ));
    assert!(matches!(
      lower_source("1 +", &mut scope),
      Err(CompileError::EmptyExpression)
    ));
    assert!(matches!(
      lower_source("()", &mut scope),
      Err(CompileError::EmptyExpression)
    ));
    assert!(matches!(
      lower_source(",", &mut scope),
      Err(CompileError::UnacceptableToken { .. })
    ));
  }

  #[test]
  fn call_results_are_copied_out_before_the_next_call() {
    let libs = [Library::parse(
      "math",
      ";@square@ 0x00000002:uint64 -> uint64\nMul 0x00000002 0x00000002 0x00000001 0x00000000\nRet\n",
    )
    .unwrap()];
    let mut scope = Scope::new(0x1000);
    let mut sink = CodeSink::new();
    sink.push(BOUNDARY_MARKER);
    let mut linker = Linker::new(&libs);
    let lowered = lower_tokens(
      &expr("!square(2) + !square(3)"),
      &mut scope,
      &mut sink,
      &mut linker,
    )
    .unwrap();

    assert_eq!(lowered, Lowered::new(0x1003, Type::Uint64));
    assert!(
      sink
        .lines()
        .contains(&"CpyBfr 0x00000001 0x00001001 0x00000000".to_string())
    );
    assert_eq!(
      sink.lines().last().map(String::as_str),
      Some("Add 0x00001001 0x00000001 0x00001003 0x00000000")
    );
  }

  #[test]
  fn argument_lists_split_on_commas() {
    let tokens = expr("a, b + 1, (c, d)");
    let args = split_args(&tokens);
    assert_eq!(args.len(), 3);
    assert_eq!(args[1].len(), 3);
    assert!(split_args(&[]).is_empty());
  }
}

//! Built-in `@module::function(...)` calls.
//!
//! Each entry receives its raw argument token lists and is responsible for
//! validating them and emitting code. Value arguments go through
//! [`parse_params`], which lowers every argument once and picks the first
//! signature the inferred types satisfy.

use snafu::{OptionExt, ensure};

use super::expr::{Lowered, lower_tokens, settle};
use super::scope::{Location, Scope, Variable};
use super::sink::{CodeSink, slot, word};
use crate::control::{EXIT_PLACEHOLDER, RETURN_PLACEHOLDER};
use crate::error::{
  CompileResult, MalformedStatementSnafu, NoMatchingSignatureSnafu, UnknownSystemFunctionSnafu,
  UnknownVariableSnafu,
};
use crate::linker::Linker;
use crate::tokenizer::{Token, TokenKind, describe_tokens};
use crate::ty::{Signature, Type, describe_types};

pub type SystemFn =
  fn(&[&[Token]], &mut Scope, &mut CodeSink, &mut Linker<'_>) -> CompileResult<()>;

const SYSTEM_FUNCTIONS: &[(&str, &str, SystemFn)] = &[
  ("contract", "exit", contract_exit),
  ("contract", "return", contract_return),
  ("memory", "alloc", memory_alloc),
  ("memory", "free", memory_free),
  ("memory", "set", memory_set),
  ("io", "print", io_print),
  ("io", "err", io_err),
];

pub fn lookup(module: &str, function: &str) -> CompileResult<SystemFn> {
  SYSTEM_FUNCTIONS
    .iter()
    .find(|(m, f, _)| *m == module && *f == function)
    .map(|(_, _, func)| *func)
    .context(UnknownSystemFunctionSnafu { module, function })
}

/// Lower every argument once, then return the index of the first matching
/// signature together with the lowered arguments.
pub fn parse_params(
  function: &str,
  args: &[&[Token]],
  signatures: &[Signature],
  scope: &mut Scope,
  sink: &mut CodeSink,
  linker: &mut Linker<'_>,
) -> CompileResult<(usize, Vec<Lowered>)> {
  let mut lowered = Vec::with_capacity(args.len());
  for arg in args {
    let arg = lower_tokens(arg, scope, sink, linker)?;
    lowered.push(settle(arg, scope, sink)?);
  }
  let found: Vec<Type> = lowered.iter().map(|arg| arg.ty).collect();
  let index = signatures
    .iter()
    .position(|sig| sig.matches(&found))
    .context(NoMatchingSignatureSnafu {
      function,
      found: describe_types(&found),
    })?;
  Ok((index, lowered))
}

fn void(params: &[Type]) -> Signature {
  Signature::new(params.to_vec(), Type::Placeholder)
}

/// A bare identifier argument such as the name in `memory::free(x)`.
fn name_arg<'t>(function: &'static str, arg: &'t [Token]) -> CompileResult<&'t str> {
  match arg {
    [token] => token.ident().context(MalformedStatementSnafu {
      construct: function,
      message: format!("expected a name, got {}", token.kind),
    }),
    _ => MalformedStatementSnafu {
      construct: function,
      message: format!("expected a name, got \"{}\"", describe_tokens(arg)),
    }
    .fail(),
  }
}

fn expect_arity(function: &'static str, args: &[&[Token]], n: usize) -> CompileResult<()> {
  ensure!(
    args.len() == n,
    MalformedStatementSnafu {
      construct: function,
      message: format!("expected {n} arguments, got {}", args.len()),
    }
  );
  Ok(())
}

fn contract_exit(
  args: &[&[Token]],
  scope: &mut Scope,
  sink: &mut CodeSink,
  linker: &mut Linker<'_>,
) -> CompileResult<()> {
  let sigs = [void(&[Type::Uint64])];
  let (_, lowered) = parse_params("contract::exit", args, &sigs, scope, sink, linker)?;
  sink.unary("ExitBfr", lowered[0].slot);
  Ok(())
}

/// Copy the value into the return slot and leave through the epilogue.
fn contract_return(
  args: &[&[Token]],
  scope: &mut Scope,
  sink: &mut CodeSink,
  linker: &mut Linker<'_>,
) -> CompileResult<()> {
  expect_arity("contract::return", args, 1)?;
  let value = lower_tokens(args[0], scope, sink, linker)?;
  sink.cpy_bfr(&slot(value.slot), RETURN_PLACEHOLDER);
  sink.jmp(EXIT_PLACEHOLDER);
  Ok(())
}

fn memory_alloc(
  args: &[&[Token]],
  scope: &mut Scope,
  sink: &mut CodeSink,
  _: &mut Linker<'_>,
) -> CompileResult<()> {
  expect_arity("memory::alloc", args, 2)?;
  let name = name_arg("memory::alloc", args[0])?;
  let ty_name = name_arg("memory::alloc", args[1])?;
  let ty = Type::from_name(ty_name)
    .filter(|ty| *ty != Type::Placeholder)
    .context(MalformedStatementSnafu {
      construct: "memory::alloc",
      message: format!("unknown type {ty_name}"),
    })?;
  let s = scope.alloc()?;
  sink.init_bfr(s);
  scope.declare(Variable::new(name, Location::Slot(s), ty));
  Ok(())
}

fn memory_free(
  args: &[&[Token]],
  scope: &mut Scope,
  sink: &mut CodeSink,
  _: &mut Linker<'_>,
) -> CompileResult<()> {
  expect_arity("memory::free", args, 1)?;
  let name = name_arg("memory::free", args[0])?;
  let var = scope
    .vars
    .remove(name)
    .context(UnknownVariableSnafu { name })?;
  match var.location {
    Location::Slot(s) => sink.free_bfr(s),
    Location::State(_) => {
      return MalformedStatementSnafu {
        construct: "memory::free",
        message: format!("{name} lives in persistent state"),
      }
      .fail();
    }
  }
  Ok(())
}

fn memory_set(
  args: &[&[Token]],
  scope: &mut Scope,
  sink: &mut CodeSink,
  _: &mut Linker<'_>,
) -> CompileResult<()> {
  expect_arity("memory::set", args, 2)?;
  let name = name_arg("memory::set", args[0])?;
  let var = scope.vars.get(name).context(UnknownVariableSnafu { name })?;
  let Location::Slot(s) = var.location else {
    return MalformedStatementSnafu {
      construct: "memory::set",
      message: format!("{name} lives in persistent state"),
    }
    .fail();
  };
  let value = match args[1] {
    [Token {
      kind: TokenKind::Int(value),
      ..
    }] => *value,
    other => {
      return MalformedStatementSnafu {
        construct: "memory::set",
        message: format!("expected an integer literal, got \"{}\"", describe_tokens(other)),
      }
      .fail();
    }
  };
  sink.set_cnst(s, &word(value));
  Ok(())
}

fn io_print(
  args: &[&[Token]],
  scope: &mut Scope,
  sink: &mut CodeSink,
  linker: &mut Linker<'_>,
) -> CompileResult<()> {
  let sigs = [void(&[Type::Uint64]), void(&[Type::String])];
  let (index, lowered) = parse_params("io::print", args, &sigs, scope, sink, linker)?;
  let mnemonic = if index == 0 { "Stdout" } else { "PrintStr" };
  sink.unary(mnemonic, lowered[0].slot);
  Ok(())
}

fn io_err(
  args: &[&[Token]],
  scope: &mut Scope,
  sink: &mut CodeSink,
  linker: &mut Linker<'_>,
) -> CompileResult<()> {
  let sigs = [void(&[Type::Uint64])];
  let (_, lowered) = parse_params("io::err", args, &sigs, scope, sink, linker)?;
  sink.unary("Stderr", lowered[0].slot);
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::codegen::expr::split_args;
  use crate::error::CompileError;
  use crate::parser::parse;
  use crate::tokenizer::tokenize;

  fn call(module: &str, function: &str, args: &str, scope: &mut Scope) -> CompileResult<CodeSink> {
    let tokens = parse(tokenize(args).unwrap(), args).unwrap();
    let split = split_args(&tokens);
    let mut sink = CodeSink::new();
    let mut linker = Linker::new(&[]);
    lookup(module, function)?(&split, scope, &mut sink, &mut linker)?;
    Ok(sink)
  }

  #[test]
  fn print_picks_the_overload_by_argument_type() {
    let mut scope = Scope::new(0x1000);
    let sink = call("io", "print", "\"hi\"", &mut scope).unwrap();
    assert_eq!(
      sink.lines().last().map(String::as_str),
      Some("PrintStr 0x00001000 0x00000000")
    );
    let sink = call("io", "print", "7", &mut scope).unwrap();
    assert_eq!(
      sink.lines().last().map(String::as_str),
      Some("Stdout 0x00001001 0x00000000")
    );
  }

  #[test]
  fn exit_rejects_strings() {
    let mut scope = Scope::new(0x1000);
    let err = call("contract", "exit", "\"no\"", &mut scope).unwrap_err();
    assert_eq!(err.to_string(), "no matching signature for contract::exit(string)");
  }

  #[test]
  fn memory_functions_manage_bindings() {
    let mut scope = Scope::new(0x1000);
    call("memory", "alloc", "n, uint64", &mut scope).unwrap();
    assert_eq!(
      scope.vars.get("n").map(|var| var.location),
      Some(Location::Slot(0x1000))
    );
    let sink = call("memory", "set", "n, 9", &mut scope).unwrap();
    assert_eq!(
      sink.lines(),
      ["SetCnst 0x00001000 0x0000000000000009 0x00000000"]
    );
    let sink = call("memory", "free", "n", &mut scope).unwrap();
    assert_eq!(sink.lines(), ["FreeBfr 0x00001000 0x00000000"]);
    assert!(scope.vars.get("n").is_none());
  }

  #[test]
  fn return_uses_the_placeholders() {
    let mut scope = Scope::new(0x1000);
    let sink = call("contract", "return", "5", &mut scope).unwrap();
    assert_eq!(
      &sink.lines()[2..],
      ["CpyBfr 0x00001000 ~ 0x00000000", "Jmp `"]
    );
  }

  #[test]
  fn unknown_functions_are_resolution_errors() {
    let mut scope = Scope::new(0x1000);
    let err = call("io", "scan", "", &mut scope).unwrap_err();
    assert!(matches!(err, CompileError::UnknownSystemFunction { .. }));
  }
}

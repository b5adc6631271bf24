//! Library records and the linker that splices library functions into the
//! program on first use.
//!
//! A library is a `.blockasm` text. A line of the form
//!
//! ```text
//! ;@name@ 0x00000002:uint64 0x00000003:uint64 -> uint64
//! ```
//!
//! starts a function whose body runs from the next line up to and including
//! its first `Ret`. Inside a body, a plain decimal operand of `Jmp`,
//! `JmpCond` or `Call` is a line relative to the first body line, and a line
//! `@other` calls another library function.
//!
//! Injected bodies always land right before the boundary marker, so entry
//! offsets of earlier injections never move.

use log::debug;
use snafu::{OptionExt, ensure};

use crate::codegen::Lowered;
use crate::codegen::scope::Scope;
use crate::codegen::sink::{CodeSink, slot};
use crate::error::{
  CompileError, CompileResult, CyclicLibraryDependencySnafu, MissingBoundarySnafu,
  NoMatchingSignatureSnafu, UnknownLibraryFunctionSnafu,
};
use crate::ty::{Signature, Type, describe_types};

const HEADER_PREFIX: &str = ";@";
const CALL_PREFIX: char = '@';
const JUMP_MNEMONICS: [&str; 3] = ["Jmp", "JmpCond", "Call"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryFunction {
  pub name: String,
  /// Parameter slots, in declaration order.
  pub params: Vec<u32>,
  pub signature: Signature,
  /// Body lines, ending with `Ret`.
  pub body: Vec<String>,
}

/// A parsed library file. Read-only once loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Library {
  pub name: String,
  pub functions: Vec<LibraryFunction>,
}

impl Library {
  pub fn parse(name: impl Into<String>, text: &str) -> CompileResult<Self> {
    let name = name.into();
    let lines: Vec<&str> = text.lines().collect();
    let mut functions = Vec::new();

    for (index, line) in lines.iter().enumerate() {
      if !line.starts_with(HEADER_PREFIX) {
        continue;
      }
      let malformed = |message: &str| CompileError::MalformedLibrary {
        library: name.clone(),
        line: index + 1,
        message: message.to_string(),
      };

      let rest = &line[HEADER_PREFIX.len()..];
      let (fn_name, params) = rest
        .split_once('@')
        .ok_or_else(|| malformed("function name is not closed by '@'"))?;
      if fn_name.is_empty() {
        return Err(malformed("function name is empty"));
      }

      let (param_slots, signature) = parse_signature(params).map_err(|msg| malformed(&msg))?;

      let body_start = index + 1;
      let ret = lines[body_start..]
        .iter()
        .position(|line| line.trim() == "Ret")
        .ok_or_else(|| malformed("function body has no Ret"))?;
      let body = lines[body_start..=body_start + ret]
        .iter()
        .map(|line| line.trim().to_string())
        .collect();

      functions.push(LibraryFunction {
        name: fn_name.to_string(),
        params: param_slots,
        signature,
        body,
      });
    }

    Ok(Self { name, functions })
  }

  pub fn function(&self, name: &str) -> Option<&LibraryFunction> {
    self.functions.iter().find(|func| func.name == name)
  }
}

fn parse_signature(text: &str) -> Result<(Vec<u32>, Signature), String> {
  let mut slots = Vec::new();
  let mut params = Vec::new();
  let mut ret = Type::Placeholder;
  let mut parts = text.split_whitespace();

  while let Some(part) = parts.next() {
    if part == "->" {
      let name = parts.next().ok_or("missing return type after '->'")?;
      ret = Type::from_name(name).ok_or_else(|| format!("unknown type {name}"))?;
      if let Some(extra) = parts.next() {
        return Err(format!("unexpected \"{extra}\" after return type"));
      }
      break;
    }
    let (slot_text, ty_name) = part
      .split_once(':')
      .ok_or_else(|| format!("expected <slot>:<type>, got \"{part}\""))?;
    let slot = slot_text
      .strip_prefix("0x")
      .and_then(|hex| u32::from_str_radix(hex, 16).ok())
      .ok_or_else(|| format!("invalid parameter slot \"{slot_text}\""))?;
    let ty = Type::from_name(ty_name).ok_or_else(|| format!("unknown type {ty_name}"))?;
    slots.push(slot);
    params.push(ty);
  }

  Ok((slots, Signature::new(params, ret)))
}

/// `(name, entry offset)` of a function already present in the output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InjectedFunction {
  pub name: String,
  pub offset: usize,
}

pub struct Linker<'l> {
  libraries: &'l [Library],
  injected: Vec<InjectedFunction>,
  in_progress: Vec<String>,
}

impl<'l> Linker<'l> {
  pub fn new(libraries: &'l [Library]) -> Self {
    Self {
      libraries,
      injected: Vec::new(),
      in_progress: Vec::new(),
    }
  }

  fn find(&self, name: &str) -> CompileResult<&'l LibraryFunction> {
    let libraries = self.libraries;
    libraries
      .iter()
      .find_map(|lib| lib.function(name))
      .context(UnknownLibraryFunctionSnafu { name })
  }

  pub fn entry_offset(&self, name: &str) -> Option<usize> {
    self
      .injected
      .iter()
      .find(|func| func.name == name)
      .map(|func| func.offset)
  }

  pub fn injected(&self) -> &[InjectedFunction] {
    &self.injected
  }

  /// Make sure `name` is present in `sink` exactly once and return its entry
  /// offset. Dependencies are injected before the function itself.
  pub fn inject_if_not_present(&mut self, name: &str, sink: &mut CodeSink) -> CompileResult<usize> {
    if let Some(offset) = self.entry_offset(name) {
      return Ok(offset);
    }
    ensure!(
      !self.in_progress.iter().any(|pending| pending == name),
      CyclicLibraryDependencySnafu { name }
    );
    let func = self.find(name)?;

    self.in_progress.push(name.to_string());
    let entries = func
      .body
      .iter()
      .map(|line| match line.strip_prefix(CALL_PREFIX) {
        Some(dep) => self.inject_if_not_present(dep.trim(), sink).map(Some),
        None => Ok(None),
      })
      .collect::<CompileResult<Vec<_>>>()?;
    self.in_progress.pop();

    let offset = sink.boundary().context(MissingBoundarySnafu)?;
    let body = func
      .body
      .iter()
      .zip(entries)
      .map(|(line, entry)| match entry {
        Some(entry) => format!("Call &{entry}"),
        None => relocate(line, offset),
      })
      .collect();
    sink.splice_before_boundary(body)?;

    debug!("injected library function {name} at line {offset}");
    self.injected.push(InjectedFunction {
      name: name.to_string(),
      offset,
    });
    Ok(offset)
  }

  /// Emit a call of library function `name` with already lowered `args`
  /// and return the callee's return type.
  pub fn call_function(
    &mut self,
    name: &str,
    args: &[Lowered],
    scope: &Scope,
    sink: &mut CodeSink,
  ) -> CompileResult<Type> {
    let func = self.find(name)?;
    let found: Vec<Type> = args.iter().map(|arg| arg.ty).collect();
    ensure!(
      func.signature.matches(&found),
      NoMatchingSignatureSnafu {
        function: name,
        found: describe_types(&found),
      }
    );

    let offset = self.inject_if_not_present(name, sink)?;
    for (arg, &param) in args.iter().zip(&func.params) {
      if !scope.vars.uses_slot(param) {
        sink.init_bfr(param);
      }
      sink.cpy_bfr(&slot(arg.slot), &slot(param));
    }
    sink.call(&format!("&{offset}"));
    Ok(func.signature.ret)
  }
}

/// Rewrite relative jump targets of a library line to body coordinates.
fn relocate(line: &str, offset: usize) -> String {
  let mut parts = line.split_whitespace();
  let Some(mnemonic) = parts.next() else {
    return line.to_string();
  };
  if !JUMP_MNEMONICS.contains(&mnemonic) {
    return line.to_string();
  }
  let mut out = vec![mnemonic.to_string()];
  for part in parts {
    match part.parse::<usize>() {
      Ok(relative) => out.push(format!("&{}", offset + relative)),
      Err(_) => out.push(part.to_string()),
    }
  }
  out.join(" ")
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::codegen::sink::BOUNDARY_MARKER;

  const MATH: &str = "\
;@square@ 0x00000002:uint64 -> uint64
Mul 0x00000002 0x00000002 0x00000001 0x00000000
Ret
;@cube@ 0x00000003:uint64 -> uint64
CpyBfr 0x00000003 0x00000002 0x00000000
@square
Mul 0x00000001 0x00000003 0x00000001 0x00000000
Ret
;@loop@ 0x00000002:uint64
Jmp 1
Ret
;@ping@
@pong
Ret
;@pong@
@ping
Ret
";

  fn libs() -> Vec<Library> {
    vec![Library::parse("math", MATH).unwrap()]
  }

  fn sink_with_boundary() -> CodeSink {
    let mut sink = CodeSink::new();
    sink.push(BOUNDARY_MARKER);
    sink
  }

  #[test]
  fn parses_headers_and_bodies() {
    let lib = Library::parse("math", MATH).unwrap();
    let cube = lib.function("cube").unwrap();
    assert_eq!(cube.params, vec![3]);
    assert_eq!(cube.signature, Signature::new(vec![Type::Uint64], Type::Uint64));
    assert_eq!(cube.body.len(), 4);
    assert_eq!(lib.function("loop").unwrap().signature.ret, Type::Placeholder);
  }

  #[test]
  fn body_without_ret_is_malformed() {
    let err = Library::parse("bad", ";@f@\nExit 0x00000000\n").unwrap_err();
    assert_eq!(err.to_string(), "bad:1: function body has no Ret");
  }

  #[test]
  fn injection_is_idempotent() {
    let libs = libs();
    let mut linker = Linker::new(&libs);
    let mut sink = sink_with_boundary();
    let first = linker.inject_if_not_present("square", &mut sink).unwrap();
    let second = linker.inject_if_not_present("square", &mut sink).unwrap();
    assert_eq!(first, second);
    assert_eq!(sink.len(), 3);
  }

  #[test]
  fn dependencies_are_injected_first_and_called_by_offset() {
    let libs = libs();
    let mut linker = Linker::new(&libs);
    let mut sink = sink_with_boundary();
    let cube = linker.inject_if_not_present("cube", &mut sink).unwrap();
    assert_eq!(linker.entry_offset("square"), Some(0));
    assert_eq!(cube, 2);
    assert_eq!(sink.lines()[3], "Call &0");
    assert_eq!(sink.boundary(), Some(6));
  }

  #[test]
  fn relative_jumps_become_body_lines() {
    let libs = libs();
    let mut linker = Linker::new(&libs);
    let mut sink = sink_with_boundary();
    linker.inject_if_not_present("square", &mut sink).unwrap();
    let offset = linker.inject_if_not_present("loop", &mut sink).unwrap();
    assert_eq!(offset, 2);
    assert_eq!(sink.lines()[2], "Jmp &3");
  }

  #[test]
  fn cycles_are_rejected() {
    let libs = libs();
    let mut linker = Linker::new(&libs);
    let mut sink = sink_with_boundary();
    let err = linker.inject_if_not_present("ping", &mut sink).unwrap_err();
    assert!(matches!(err, CompileError::CyclicLibraryDependency { name } if name == "ping"));
  }

  #[test]
  fn unknown_function_is_an_error() {
    let libs = libs();
    let mut linker = Linker::new(&libs);
    let mut sink = sink_with_boundary();
    let err = linker.inject_if_not_present("sqrt", &mut sink).unwrap_err();
    assert_eq!(err.to_string(), "unknown library function sqrt");
  }

  #[test]
  fn call_copies_arguments_into_parameter_slots() {
    let libs = libs();
    let mut linker = Linker::new(&libs);
    let mut sink = sink_with_boundary();
    let scope = Scope::new(0x1000);
    let args = [Lowered::new(0x1000, Type::Uint64)];
    let ty = linker
      .call_function("square", &args, &scope, &mut sink)
      .unwrap();
    assert_eq!(ty, Type::Uint64);
    assert_eq!(
      &sink.lines()[3..],
      [
        "InitBfr 0x00000002 0x00000000",
        "CpyBfr 0x00001000 0x00000002 0x00000000",
        "Call &0",
      ]
    );
  }

  #[test]
  fn call_with_wrong_argument_types_is_rejected() {
    let libs = libs();
    let mut linker = Linker::new(&libs);
    let mut sink = sink_with_boundary();
    let scope = Scope::new(0x1000);
    let args = [Lowered::new(0x1000, Type::String)];
    let err = linker
      .call_function("square", &args, &scope, &mut sink)
      .unwrap_err();
    assert_eq!(err.to_string(), "no matching signature for square(string)");
    assert_eq!(sink.len(), 1);
  }
}

//! Crate root: wires together the compilation pipeline.
//!
//! The stages are intentionally small and composable so they can be evolved
//! independently:
//! - `tokenizer` performs lexical analysis and produces a flat token stream.
//! - `parser` groups parenthesised and braced regions into a token tree.
//! - `codegen` lowers statements and expressions into Blockasm, pulling
//!   library bodies in through the `linker`.
//! - `control` builds the function dispatcher and the program epilogue.
//! - `labels` resolves symbolic jump targets into absolute line numbers.
//! - `error` centralises reporting utilities shared by the other modules.

pub mod codegen;
pub mod config;
pub mod control;
pub mod error;
pub mod labels;
pub mod linker;
pub mod parser;
pub mod tokenizer;
pub mod ty;

use std::fs;
use std::path::Path;

use log::debug;
use rand::Rng;
use snafu::ResultExt;

pub use config::CompilerConfig;
pub use control::RegisteredFunction;
pub use error::{CompileError, CompileResult, ErrorKind};
pub use linker::Library;

use codegen::Unit;
use codegen::scope::Scope;
use codegen::sink::CodeSink;
use error::ReadSourceSnafu;

/// A linked program plus the functions its dispatcher can select.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assembly {
  pub text: String,
  pub functions: Vec<RegisteredFunction>,
}

/// Compile a source string into linked Blockasm.
pub fn generate_assembly(
  source: &str,
  libraries: &[Library],
  config: &CompilerConfig,
) -> CompileResult<Assembly> {
  compile_with_rng(source, libraries, config.first_slot, config.rng())
}

/// Compile with an explicit source of function ids.
pub fn compile_with_rng<R: Rng>(
  source: &str,
  libraries: &[Library],
  first_slot: u32,
  rng: R,
) -> CompileResult<Assembly> {
  let tokens = tokenizer::tokenize(source)?;
  let tree = parser::parse(tokens, source)?;

  let mut scope = Scope::new(first_slot);
  let mut unit = Unit::new(libraries, rng);
  unit.generate(&tree, &mut scope)?;
  for func in unit.linker().injected() {
    debug!("library function {} at body line {}", func.name, func.offset);
  }

  let (mut body, mut control) = unit.into_parts();
  control.close(&mut scope, &mut body)?;
  let body = control.resolve_placeholders(&body.into_text())?;

  let mut dispatcher = CodeSink::new();
  control.compile(&mut scope, &mut dispatcher)?;
  let text = labels::link(&dispatcher.into_text(), &body)?;

  Ok(Assembly {
    text,
    functions: control.functions().to_vec(),
  })
}

/// Read and compile a source file.
pub fn compile_file(
  path: &Path,
  libraries: &[Library],
  config: &CompilerConfig,
) -> CompileResult<Assembly> {
  let source = fs::read_to_string(path).context(ReadSourceSnafu { path })?;
  generate_assembly(&source, libraries, config)
}

#[cfg(test)]
mod tests {
  use super::*;
  use rand::rngs::mock::StepRng;

  fn compile(source: &str) -> CompileResult<Assembly> {
    compile_with_rng(source, &[], 0x1000, StepRng::new(0x100, 0x100))
  }

  #[test]
  fn program_without_functions_has_no_dispatcher_comparisons() {
    let asm = compile("x == 3\ny == 4\nz == x + y\n@contract::exit(z)").unwrap();
    let lines: Vec<&str> = asm.text.lines().collect();
    // Return slot initialisation, then the skip jump over the (empty)
    // library region to the first user line.
    assert!(lines[0].starts_with("InitBfr"));
    assert_eq!(lines[1], "Jmp 3");
    assert_eq!(lines[2], ";^^^^BEGIN_SOURCE^^^^");
    assert!(asm.text.contains("Add 0x00001000 0x00001001 0x00001002 0x00000000"));
    assert!(asm.text.contains("ExitBfr 0x00001002 0x00000000"));
    assert!(!asm.text.contains("CpyBfr"));
    assert!(asm.functions.is_empty());
  }

  #[test]
  fn every_symbolic_operand_is_resolved() {
    let source = "\
;main -> uint64
i == 0
for (i (0) (3)) {
c == i == 2
if (c) {
@contract::return(i)
}
}
;other -> void
@io::print(\"hi\")
";
    let asm = compile(source).unwrap();
    for line in asm.text.lines().filter(|line| !line.starts_with(';')) {
      for operand in line.split_whitespace().skip(1) {
        assert!(
          !operand.starts_with(['<', '!', '&', '~', '`']),
          "unresolved operand in {line:?}"
        );
      }
    }
    assert_eq!(asm.functions.len(), 2);
  }

  #[test]
  fn errors_produce_no_assembly() {
    let err = compile("x == 1\nx = \"s\"").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Semantic);
  }
}

//! Output buffer for generated Blockasm plus operand formatting.
//!
//! Every component that emits code writes through a `&mut CodeSink`; the
//! helpers below keep instruction spelling in one place.

use crate::error::{CompileResult, MissingBoundarySnafu};
use snafu::OptionExt;

/// Separates injected library bodies from user code.
pub const BOUNDARY_MARKER: &str = ";^^^^BEGIN_SOURCE^^^^";

/// Error slot passed as the trailing operand of fallible instructions.
pub const ERROR_OPERAND: &str = "0x00000000";

pub fn slot(n: u32) -> String {
  format!("0x{n:08x}")
}

pub fn word(value: u64) -> String {
  format!("0x{value:016x}")
}

/// State addresses are 8-byte constants.
pub fn state_address(addr: u64) -> String {
  format!("0x00{addr:014x}")
}

/// String constants are written as two hex digits per byte.
pub fn bytes(text: &str) -> String {
  let mut out = String::with_capacity(2 + text.len() * 2);
  out.push_str("0x");
  for byte in text.bytes() {
    out.push_str(&format!("{byte:02x}"));
  }
  out
}

#[derive(Debug, Default, Clone)]
pub struct CodeSink {
  lines: Vec<String>,
}

impl CodeSink {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn push(&mut self, line: impl Into<String>) {
    self.lines.push(line.into());
  }

  pub fn comment(&mut self, text: impl AsRef<str>) {
    self.lines.push(format!("; {}", text.as_ref()));
  }

  pub fn len(&self) -> usize {
    self.lines.len()
  }

  pub fn is_empty(&self) -> bool {
    self.lines.is_empty()
  }

  pub fn lines(&self) -> &[String] {
    &self.lines
  }

  pub fn init_bfr(&mut self, s: u32) {
    self.push(format!("InitBfr {} {ERROR_OPERAND}", slot(s)));
  }

  pub fn set_cnst(&mut self, s: u32, constant: &str) {
    self.push(format!("SetCnst {} {constant} {ERROR_OPERAND}", slot(s)));
  }

  pub fn cpy_bfr(&mut self, src: &str, dst: &str) {
    self.push(format!("CpyBfr {src} {dst} {ERROR_OPERAND}"));
  }

  pub fn free_bfr(&mut self, s: u32) {
    self.push(format!("FreeBfr {} {ERROR_OPERAND}", slot(s)));
  }

  pub fn binary(&mut self, mnemonic: &str, a: u32, b: u32, dst: u32) {
    self.push(format!(
      "{mnemonic} {} {} {} {ERROR_OPERAND}",
      slot(a),
      slot(b),
      slot(dst)
    ));
  }

  /// Append the contents of `src` to `dst`.
  pub fn app(&mut self, dst: u32, src: u32) {
    self.push(format!("App {} {} {ERROR_OPERAND}", slot(dst), slot(src)));
  }

  pub fn not(&mut self, src: u32, dst: u32) {
    self.push(format!("Not {} {} {ERROR_OPERAND}", slot(src), slot(dst)));
  }

  pub fn jmp(&mut self, target: &str) {
    self.push(format!("Jmp {target}"));
  }

  pub fn jmp_cond(&mut self, cond: u32, target: &str) {
    self.push(format!("JmpCond {} {target} {ERROR_OPERAND}", slot(cond)));
  }

  pub fn call(&mut self, target: &str) {
    self.push(format!("Call {target}"));
  }

  pub fn update_state(&mut self, addr: u32, value: &str) {
    self.push(format!("UpdateState {} {value} {ERROR_OPERAND}", slot(addr)));
  }

  pub fn get_from_state(&mut self, addr: u32, dst: u32) {
    self.push(format!(
      "GetFromState {} {} {ERROR_OPERAND}",
      slot(addr),
      slot(dst)
    ));
  }

  /// Single-operand instructions such as `ExitBfr`, `Stdout`, `PrintStr`.
  pub fn unary(&mut self, mnemonic: &str, s: u32) {
    self.push(format!("{mnemonic} {} {ERROR_OPERAND}", slot(s)));
  }

  pub fn exit(&mut self) {
    self.push(format!("Exit {ERROR_OPERAND}"));
  }

  /// Index of the library/user-code boundary marker.
  pub fn boundary(&self) -> Option<usize> {
    self.lines.iter().position(|line| line == BOUNDARY_MARKER)
  }

  /// Insert `lines` right before the boundary marker and return the index
  /// of the first inserted line.
  pub fn splice_before_boundary(&mut self, lines: Vec<String>) -> CompileResult<usize> {
    let at = self.boundary().context(MissingBoundarySnafu)?;
    self.lines.splice(at..at, lines);
    Ok(at)
  }

  pub fn into_text(self) -> String {
    let mut text = self.lines.join("\n");
    if !text.is_empty() {
      text.push('\n');
    }
    text
  }
}

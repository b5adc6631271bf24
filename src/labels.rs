//! Label relocation over the generated text.
//!
//! Code generation leaves symbolic operands behind: `!n` for a function's
//! pre-label, `<n` for a control-flow label and `&n` for a line of the body
//! (library region, boundary marker, user code, epilogue). The passes below
//! run in a fixed order, each rewriting only the operands carrying its sigil
//! and passing everything else through byte for byte:
//!
//! 1. pre-labels are resolved in the body and in the dispatcher,
//! 2. labels are resolved in the body,
//! 3. a jump over the library region is prepended to the body,
//! 4. the dispatcher is prepended and every `&n` becomes an absolute line.
//!
//! Marker lines count as lines, so none of the passes changes line numbers
//! of the text it rewrites.

use std::collections::BTreeMap;

use log::debug;
use snafu::OptionExt;

use crate::codegen::sink::BOUNDARY_MARKER;
use crate::error::{
  CompileError, CompileResult, MalformedOperandSnafu, MissingBoundarySnafu, UnresolvedLabelSnafu,
};

pub const LABEL_MARKER: &str = "; LABEL ";
pub const PRE_LABEL_MARKER: &str = "; PRELABEL ";

const LABEL_SIGIL: char = '<';
const PRE_LABEL_SIGIL: char = '!';
const OFFSET_SIGIL: char = '&';

/// Apply `f` to every operand of every instruction line. `f` returns the
/// replacement for operands it rewrites. Comment lines and lines without
/// replacements are kept verbatim.
pub fn rewrite_operands<F>(text: &str, mut f: F) -> CompileResult<String>
where
  F: FnMut(usize, &str) -> CompileResult<Option<String>>,
{
  let mut out = String::with_capacity(text.len());
  for (index, line) in text.lines().enumerate() {
    if line.starts_with(';') {
      out.push_str(line);
      out.push('\n');
      continue;
    }
    let mut parts = line.split_whitespace();
    let Some(mnemonic) = parts.next() else {
      out.push_str(line);
      out.push('\n');
      continue;
    };

    let mut rewritten = vec![mnemonic.to_string()];
    let mut changed = false;
    for operand in parts {
      match f(index, operand)? {
        Some(replacement) => {
          rewritten.push(replacement);
          changed = true;
        }
        None => rewritten.push(operand.to_string()),
      }
    }
    if changed {
      out.push_str(&rewritten.join(" "));
    } else {
      out.push_str(line);
    }
    out.push('\n');
  }
  Ok(out)
}

/// Parse the number following a one-character sigil.
fn parse_number<T: std::str::FromStr>(index: usize, operand: &str) -> CompileResult<T> {
  operand[1..]
    .parse()
    .ok()
    .context(MalformedOperandSnafu {
      line: index,
      operand,
    })
}

/// Line index of every `marker <id>` line.
fn scan(text: &str, marker: &str) -> CompileResult<BTreeMap<u32, usize>> {
  let mut table = BTreeMap::new();
  for (index, line) in text.lines().enumerate() {
    if let Some(id) = line.strip_prefix(marker) {
      let id = id
        .trim()
        .parse()
        .map_err(|_| CompileError::MalformedOperand {
          line: index,
          operand: line.to_string(),
        })?;
      table.insert(id, index);
    }
  }
  Ok(table)
}

fn resolve(
  text: &str,
  sigil: char,
  kind: &'static str,
  table: &BTreeMap<u32, usize>,
) -> CompileResult<String> {
  rewrite_operands(text, |index, operand| {
    if !operand.starts_with(sigil) {
      return Ok(None);
    }
    let id: u32 = parse_number(index, operand)?;
    let line = table.get(&id).context(UnresolvedLabelSnafu { kind, id })?;
    Ok(Some(format!("{OFFSET_SIGIL}{line}")))
  })
}

/// Label tables built from the marker comments of the body.
#[derive(Debug, Default)]
pub struct LabelManager {
  pre_labels: BTreeMap<u32, usize>,
  labels: BTreeMap<u32, usize>,
}

impl LabelManager {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn pre_labels(&self) -> &BTreeMap<u32, usize> {
    &self.pre_labels
  }

  pub fn labels(&self) -> &BTreeMap<u32, usize> {
    &self.labels
  }

  /// Build the pre-label table from `body` and resolve its `!n` operands.
  pub fn replace_pre_labels(&mut self, body: &str) -> CompileResult<String> {
    self.pre_labels = scan(body, PRE_LABEL_MARKER)?;
    debug!("{} pre-labels", self.pre_labels.len());
    resolve(body, PRE_LABEL_SIGIL, "pre-label", &self.pre_labels)
  }

  /// Resolve `!n` operands of text outside the body (the dispatcher) with
  /// the table built by [`LabelManager::replace_pre_labels`].
  pub fn resolve_pre_labels(&self, text: &str) -> CompileResult<String> {
    resolve(text, PRE_LABEL_SIGIL, "pre-label", &self.pre_labels)
  }

  /// Build the label table from `body` and resolve its `<n` operands.
  pub fn replace_labels(&mut self, body: &str) -> CompileResult<String> {
    self.labels = scan(body, LABEL_MARKER)?;
    debug!("{} labels", self.labels.len());
    resolve(body, LABEL_SIGIL, "label", &self.labels)
  }

  /// Prepend a jump from the start of the body to the first line after the
  /// boundary marker.
  pub fn skip_libs(body: &str) -> CompileResult<String> {
    let boundary = body
      .lines()
      .position(|line| line == BOUNDARY_MARKER)
      .context(MissingBoundarySnafu)?;
    Ok(format!("Jmp {OFFSET_SIGIL}{}\n{body}", boundary + 1))
  }

  /// Turn every `&n` operand into the absolute line `n + k`.
  pub fn offset_calls(text: &str, k: usize) -> CompileResult<String> {
    rewrite_operands(text, |index, operand| {
      if !operand.starts_with(OFFSET_SIGIL) {
        return Ok(None);
      }
      let line: usize = parse_number(index, operand)?;
      Ok(Some((line + k).to_string()))
    })
  }
}

/// Compose the dispatcher and the body into the final text.
pub fn link(dispatcher: &str, body: &str) -> CompileResult<String> {
  let mut labels = LabelManager::new();
  let body = labels.replace_pre_labels(body)?;
  let dispatcher = labels.resolve_pre_labels(dispatcher)?;
  let body = labels.replace_labels(&body)?;
  let body = LabelManager::skip_libs(&body)?;
  // The dispatcher plus the skip jump come before body line 0.
  let k = dispatcher.lines().count() + 1;
  LabelManager::offset_calls(&format!("{dispatcher}{body}"), k)
}

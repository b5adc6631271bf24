//! Multi-function dispatch.
//!
//! Every top-level function gets a random numeric id and a pre-label. The
//! dispatcher, placed ahead of everything else in the final text, reads the
//! selector from persistent state and jumps to the function whose id
//! matches; with no match it falls through and the program runs from its
//! first statement. The epilogue publishes the return slot under a
//! well-known state address.

use log::debug;
use rand::Rng;
use snafu::{OptionExt, ensure};

use crate::codegen::expr::address_constant;
use crate::codegen::scope::Scope;
use crate::codegen::sink::{CodeSink, slot, word};
use crate::error::{CompileResult, DuplicateFunctionIdSnafu, MissingEpilogueSnafu};
use crate::labels::rewrite_operands;

/// State address the dispatcher reads the selector from.
pub const SELECTOR_STATE_ADDRESS: u64 = 0x1ffe;
/// State address the epilogue writes the return value to.
pub const RETURN_STATE_ADDRESS: u64 = 0x1fff;

/// Marker line opening the epilogue.
pub const EPILOGUE_MARKER: &str = "; EPILOGUE";
/// Stands for the return slot until the epilogue exists.
pub const RETURN_PLACEHOLDER: &str = "~";
/// Stands for a jump to the epilogue.
pub const EXIT_PLACEHOLDER: &str = "`";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredFunction {
  pub name: String,
  pub id: u64,
  pub pre_label: u32,
}

#[derive(Debug, Default)]
pub struct ControlModule {
  functions: Vec<RegisteredFunction>,
  selector_slot: Option<u32>,
  return_slot: Option<u32>,
}

impl ControlModule {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn register_function<R: Rng>(&mut self, name: &str, rng: &mut R) -> RegisteredFunction {
    let index = self.functions.len();
    let info = RegisteredFunction {
      name: name.to_string(),
      id: u64::from(rng.r#gen::<u32>()) + index as u64,
      pre_label: index as u32,
    };
    debug!(
      "registered function {name} id {:#x} pre-label {}",
      info.id, info.pre_label
    );
    self.functions.push(info.clone());
    info
  }

  pub fn functions(&self) -> &[RegisteredFunction] {
    &self.functions
  }

  pub fn selector_slot(&self) -> Option<u32> {
    self.selector_slot
  }

  /// Emit the dispatcher: one id comparison and conditional jump per
  /// registered function, in registration order.
  pub fn compile(&mut self, scope: &mut Scope, sink: &mut CodeSink) -> CompileResult<()> {
    for (i, func) in self.functions.iter().enumerate() {
      ensure!(
        !self.functions[..i].iter().any(|other| other.id == func.id),
        DuplicateFunctionIdSnafu { id: func.id }
      );
    }

    if let Some(ret) = self.return_slot {
      sink.init_bfr(ret);
    }
    if self.functions.is_empty() {
      return Ok(());
    }

    let addr = address_constant(SELECTOR_STATE_ADDRESS, scope, sink)?;
    let selector = scope.alloc()?;
    sink.init_bfr(selector);
    sink.get_from_state(addr, selector);
    self.selector_slot = Some(selector);

    let cmp = scope.alloc()?;
    sink.init_bfr(cmp);
    for func in &self.functions {
      let id = scope.alloc()?;
      sink.init_bfr(id);
      sink.set_cnst(id, &word(func.id));
      sink.binary("Eq", id, selector, cmp);
      sink.jmp_cond(cmp, &format!("!{}", func.pre_label));
    }
    debug!("dispatcher covers {} functions", self.functions.len());
    Ok(())
  }

  /// Emit the epilogue and return the slot holding the caller-visible
  /// return value.
  pub fn close(&mut self, scope: &mut Scope, sink: &mut CodeSink) -> CompileResult<u32> {
    let ret = scope.alloc()?;
    sink.push(EPILOGUE_MARKER);
    let addr = address_constant(RETURN_STATE_ADDRESS, scope, sink)?;
    sink.update_state(addr, &slot(ret));
    sink.exit();
    self.return_slot = Some(ret);
    Ok(ret)
  }

  /// Substitute the return and exit placeholders in `body`.
  pub fn resolve_placeholders(&self, body: &str) -> CompileResult<String> {
    let epilogue = body.lines().position(|line| line == EPILOGUE_MARKER);
    rewrite_operands(body, |_, operand| match operand {
      RETURN_PLACEHOLDER => {
        let ret = self.return_slot.context(MissingEpilogueSnafu)?;
        Ok(Some(slot(ret)))
      }
      EXIT_PLACEHOLDER => {
        let line = epilogue.context(MissingEpilogueSnafu)?;
        Ok(Some(format!("&{line}")))
      }
      _ => Ok(None),
    })
  }
}

//! Statement generation.
//!
//! A [`Unit`] owns everything one compilation shares: the output sink, the
//! linker, the control module and the counters for labels and persistent
//! addresses. Blocks are generated recursively; each nested block gets a
//! child [`Scope`] whose declarations die with it.
//!
//! Statements are separated by newlines. The forms are:
//!
//! ```text
//! ;name -> type /param...      function header (root only)
//! load 'name                   bind a persistent variable
//! name == expr                 declaration
//! name = expr                  reassignment
//! if (cond) { ... }
//! for (var (begin) (end)) { ... }
//! /name                        import a library function (root only)
//! !name(args)                  library call
//! @module::function(args)      system call
//! ```

pub mod expr;
pub mod scope;
pub mod sink;
pub mod system;

use std::collections::BTreeSet;

use log::trace;
use rand::Rng;
use snafu::{OptionExt, ensure};

use crate::control::{ControlModule, EXIT_PLACEHOLDER};
use crate::error::{
  CompileResult, FunctionOutsideRootSnafu, ImportOutsideRootSnafu, InvalidSystemFunctionSnafu,
  MalformedStatementSnafu, NotPersistentSnafu, TypeMismatchSnafu, UnexpectedTokenSnafu,
  UnknownVariableSnafu,
};
use crate::labels::LABEL_MARKER;
use crate::linker::{Library, Linker};
use crate::tokenizer::{Token, TokenKind, describe_tokens};
use crate::ty::Type;

pub use expr::{Lowered, RETURN_SLOT};
use expr::{address_constant, lower, lower_call, lower_tokens, settle, split_args};
use scope::{Location, Scope, Variable, is_persistent};
use sink::{BOUNDARY_MARKER, CodeSink, slot};

pub struct Unit<'l, R> {
  sink: CodeSink,
  linker: Linker<'l>,
  control: ControlModule,
  rng: R,
  next_label: u32,
  next_state_address: u64,
  function_open: bool,
}

impl<'l, R: Rng> Unit<'l, R> {
  pub fn new(libraries: &'l [Library], rng: R) -> Self {
    Self {
      sink: CodeSink::new(),
      linker: Linker::new(libraries),
      control: ControlModule::new(),
      rng,
      next_label: 0,
      next_state_address: 0,
      function_open: false,
    }
  }

  /// Generate the root block of a program.
  pub fn generate(&mut self, tokens: &[Token], scope: &mut Scope) -> CompileResult<()> {
    self.sink.push(BOUNDARY_MARKER);
    self.generate_block(tokens, scope, true)
  }

  pub fn sink(&self) -> &CodeSink {
    &self.sink
  }

  pub fn linker(&self) -> &Linker<'l> {
    &self.linker
  }

  /// Hand back the generated body and the control module.
  pub fn into_parts(self) -> (CodeSink, ControlModule) {
    (self.sink, self.control)
  }

  fn generate_block(&mut self, tokens: &[Token], scope: &mut Scope, root: bool) -> CompileResult<()> {
    for stmt in tokens.split(|token| token.is(&TokenKind::Newline)) {
      let stmt = match stmt {
        [rest @ .., last] if last.is(&TokenKind::Semi) && !rest.is_empty() => rest,
        _ => stmt,
      };
      if stmt.is_empty() {
        continue;
      }
      trace!("statement: {}", describe_tokens(stmt));
      self.statement(stmt, scope, root)?;
    }
    Ok(())
  }

  fn statement(&mut self, stmt: &[Token], scope: &mut Scope, root: bool) -> CompileResult<()> {
    if let [target, op, value @ ..] = stmt
      && let Some(name) = target.ident()
    {
      match op.kind {
        TokenKind::EqEq => return self.declare(name, value, scope),
        TokenKind::Assign => return self.reassign(name, value, scope),
        _ => {}
      }
    }

    match &stmt[0].kind {
      TokenKind::Semi => self.function_header(stmt, root),
      TokenKind::Ident(word) if word == "load" => self.load(stmt, scope),
      TokenKind::Ident(word) if word == "if" => self.if_statement(stmt, scope),
      TokenKind::Ident(word) if word == "for" => self.for_statement(stmt, scope),
      TokenKind::Div => self.import(stmt, root),
      TokenKind::Bang => match stmt {
        [_, name, args] if matches!(args.kind, TokenKind::Expr(_)) => {
          let name = name.ident().context(MalformedStatementSnafu {
            construct: "call",
            message: format!("expected a function name, got {}", name.kind),
          })?;
          lower_call(name, args, scope, &mut self.sink, &mut self.linker)?;
          Ok(())
        }
        _ => malformed("call", stmt),
      },
      TokenKind::At => self.system_call(stmt, scope),
      other => UnexpectedTokenSnafu {
        found: other.to_string(),
      }
      .fail(),
    }
  }

  /// `;name -> type /param...`, optionally `;.name -> ...`.
  fn function_header(&mut self, stmt: &[Token], root: bool) -> CompileResult<()> {
    let rest = match &stmt[1..] {
      [first, rest @ ..] if first.is(&TokenKind::Concat) => rest,
      rest => rest,
    };
    let [name, arrow_a, arrow_b, ret, params @ ..] = rest else {
      return malformed("function header", stmt);
    };
    let (Some(name), Some(ret_name)) = (name.ident(), ret.ident()) else {
      return malformed("function header", stmt);
    };
    ensure!(root, FunctionOutsideRootSnafu { name });
    if !arrow_a.is(&TokenKind::Sub) || !arrow_b.is(&TokenKind::Greater) {
      return malformed("function header", stmt);
    }
    let ret = Type::from_name(ret_name).context(MalformedStatementSnafu {
      construct: "function header",
      message: format!("unknown return type {ret_name}"),
    })?;

    let mut param_names = Vec::new();
    for pair in params.chunks(2) {
      match pair {
        [slash, param] if slash.is(&TokenKind::Div) && param.ident().is_some() => {
          param_names.extend(param.ident());
        }
        _ => return malformed("function header", stmt),
      }
    }

    // The previous body must not fall through into this one.
    if self.function_open {
      self.sink.jmp(EXIT_PLACEHOLDER);
    }
    let info = self.control.register_function(name, &mut self.rng);
    let mut meta = format!("FN {name} ID {:#x} RET {ret}", info.id);
    for param in &param_names {
      meta.push_str(&format!(" PARAM {param}"));
    }
    self.sink.comment(meta);
    self.sink.comment(format!("PRELABEL {}", info.pre_label));
    self.function_open = true;
    Ok(())
  }

  /// `load 'name` (also `load .'name`).
  fn load(&mut self, stmt: &[Token], scope: &mut Scope) -> CompileResult<()> {
    let target = match &stmt[1..] {
      [dot, target] if dot.is(&TokenKind::Concat) => target,
      [target] => target,
      _ => return malformed("load", stmt),
    };
    let name = target.ident().context(MalformedStatementSnafu {
      construct: "load",
      message: format!("expected a variable name, got {}", target.kind),
    })?;
    ensure!(is_persistent(name), NotPersistentSnafu { name });
    if scope.vars.get(name).is_some() {
      return Ok(());
    }
    let addr = self.next_state_address;
    self.next_state_address += 1;
    scope.declare(Variable::new(name, Location::State(addr), Type::Loaded));
    Ok(())
  }

  /// `name == expr`: persistent names are written to state, everything else
  /// aliases the value's slot.
  fn declare(&mut self, name: &str, value: &[Token], scope: &mut Scope) -> CompileResult<()> {
    let lowered = lower_tokens(value, scope, &mut self.sink, &mut self.linker)?;
    if !is_persistent(name) {
      let lowered = settle(lowered, scope, &mut self.sink)?;
      scope.declare(Variable::new(name, Location::Slot(lowered.slot), lowered.ty));
      return Ok(());
    }

    let (addr, ty) = match scope.vars.get(name) {
      Some(Variable {
        location: Location::State(addr),
        ty,
        ..
      }) => (*addr, *ty),
      _ => {
        let addr = self.next_state_address;
        self.next_state_address += 1;
        (addr, Type::Loaded)
      }
    };
    ensure!(
      ty == Type::Loaded || ty == lowered.ty,
      TypeMismatchSnafu {
        subject: name,
        expected: ty,
        found: lowered.ty,
      }
    );
    self.write_state(addr, lowered.slot, scope)?;
    scope.declare(Variable::new(name, Location::State(addr), lowered.ty));
    Ok(())
  }

  /// `name = expr`.
  fn reassign(&mut self, name: &str, value: &[Token], scope: &mut Scope) -> CompileResult<()> {
    let lowered = lower_tokens(value, scope, &mut self.sink, &mut self.linker)?;
    let var = scope
      .vars
      .get(name)
      .cloned()
      .context(UnknownVariableSnafu { name })?;
    ensure!(
      var.ty == Type::Loaded || var.ty == lowered.ty,
      TypeMismatchSnafu {
        subject: name,
        expected: var.ty,
        found: lowered.ty,
      }
    );

    match var.location {
      Location::State(addr) => {
        self.write_state(addr, lowered.slot, scope)?;
        if var.ty == Type::Loaded
          && let Some(var) = scope.vars.get_mut(name)
        {
          var.ty = lowered.ty;
        }
      }
      // An enclosing scope still refers to this slot: update it in place.
      Location::Slot(old) if scope.is_inherited(name) => {
        if old != lowered.slot {
          self.detach_aliases(name, scope)?;
          self.sink.cpy_bfr(&slot(lowered.slot), &slot(old));
        }
      }
      Location::Slot(old) => {
        let lowered = settle(lowered, scope, &mut self.sink)?;
        if old != lowered.slot && !scope.vars.is_aliased(old, name) {
          self.sink.free_bfr(old);
        }
        scope.declare(Variable::new(name, Location::Slot(lowered.slot), var.ty));
      }
    }
    Ok(())
  }

  /// Give every variable declared in `scope` that shares `name`'s slot a
  /// copy of its own, so writing through `name` in place leaves them alone.
  /// Partners inherited from further out were detached when their own scope
  /// generated the enclosing block.
  fn detach_aliases(&mut self, name: &str, scope: &mut Scope) -> CompileResult<()> {
    let shared = match scope.vars.get(name) {
      Some(Variable {
        location: Location::Slot(shared),
        ..
      }) => *shared,
      _ => return Ok(()),
    };
    let partners: Vec<Variable> = scope
      .vars
      .iter()
      .filter(|var| {
        var.name != name && var.location == Location::Slot(shared) && !scope.is_inherited(&var.name)
      })
      .cloned()
      .collect();
    for partner in partners {
      let own = scope.alloc()?;
      self.sink.init_bfr(own);
      self.sink.cpy_bfr(&slot(shared), &slot(own));
      trace!("detached {} from {name} into {}", partner.name, slot(own));
      scope.declare(Variable::new(partner.name, Location::Slot(own), partner.ty));
    }
    Ok(())
  }

  /// Detach the aliases of every variable a nested block is about to write in
  /// place, before the block's code is emitted.
  fn detach_written(&mut self, body: &[Token], scope: &mut Scope) -> CompileResult<()> {
    let mut written = BTreeSet::new();
    collect_written(body, &mut written);
    for name in &written {
      self.detach_aliases(name, scope)?;
    }
    Ok(())
  }

  fn write_state(&mut self, addr: u64, value: u32, scope: &mut Scope) -> CompileResult<()> {
    let addr_slot = address_constant(addr, scope, &mut self.sink)?;
    self.sink.update_state(addr_slot, &slot(value));
    Ok(())
  }

  fn fresh_label(&mut self) -> u32 {
    let label = self.next_label;
    self.next_label += 1;
    label
  }

  /// `if (cond) { ... }`: skip the block when the condition is false.
  fn if_statement(&mut self, stmt: &[Token], scope: &mut Scope) -> CompileResult<()> {
    let [_, cond, block] = stmt else {
      return malformed("if", stmt);
    };
    let (TokenKind::Expr(_), TokenKind::Block(body)) = (&cond.kind, &block.kind) else {
      return malformed("if", stmt);
    };

    self.detach_written(body, scope)?;
    let cond = lower(cond, scope, &mut self.sink, &mut self.linker)?;
    ensure!(
      Type::Boolean.accepts(cond.ty),
      TypeMismatchSnafu {
        subject: "if condition",
        expected: Type::Boolean,
        found: cond.ty,
      }
    );
    let negated = scope.alloc()?;
    self.sink.init_bfr(negated);
    self.sink.not(cond.slot, negated);
    let label = self.fresh_label();
    self.sink.jmp_cond(negated, &format!("<{label}"));

    let mut child = scope.child();
    self.generate_block(body, &mut child, false)?;
    scope.absorb(&child);
    self.sink.push(format!("{LABEL_MARKER}{label}"));
    Ok(())
  }

  /// `for (var (begin) (end)) { ... }`: increment, run the body, repeat
  /// until `var` equals `end`.
  fn for_statement(&mut self, stmt: &[Token], scope: &mut Scope) -> CompileResult<()> {
    let [_, header, block] = stmt else {
      return malformed("for", stmt);
    };
    let (TokenKind::Expr(header), TokenKind::Block(body)) = (&header.kind, &block.kind) else {
      return malformed("for", stmt);
    };
    let [var, begin, end] = header.as_slice() else {
      return malformed("for", stmt);
    };
    let name = var.ident().context(MalformedStatementSnafu {
      construct: "for",
      message: format!("expected a loop variable, got {}", var.kind),
    })?;
    let var = scope
      .vars
      .get(name)
      .cloned()
      .context(UnknownVariableSnafu { name })?;
    let Location::Slot(counter) = var.location else {
      return MalformedStatementSnafu {
        construct: "for",
        message: format!("loop variable {name} lives in persistent state"),
      }
      .fail();
    };
    ensure!(
      var.ty == Type::Uint64,
      TypeMismatchSnafu {
        subject: format!("loop variable {name}"),
        expected: Type::Uint64,
        found: var.ty,
      }
    );

    self.detach_aliases(name, scope)?;
    self.detach_written(body, scope)?;
    let begin = lower(begin, scope, &mut self.sink, &mut self.linker)?;
    let begin = settle(begin, scope, &mut self.sink)?;
    let end = lower(end, scope, &mut self.sink, &mut self.linker)?;
    let end = settle(end, scope, &mut self.sink)?;
    for (bound, lowered) in [("begin", begin), ("end", end)] {
      ensure!(
        Type::Uint64.accepts(lowered.ty),
        TypeMismatchSnafu {
          subject: format!("loop {bound} bound"),
          expected: Type::Uint64,
          found: lowered.ty,
        }
      );
    }

    let one = scope.alloc()?;
    self.sink.init_bfr(one);
    self.sink.set_cnst(one, &sink::word(1));
    let cmp = scope.alloc()?;
    self.sink.init_bfr(cmp);
    let label = self.fresh_label();
    self.sink.push(format!("{LABEL_MARKER}{label}"));
    self.sink.binary("Add", counter, one, counter);

    let mut child = scope.child();
    self.generate_block(body, &mut child, false)?;
    scope.absorb(&child);

    self.sink.binary("Eq", counter, end.slot, cmp);
    self.sink.not(cmp, cmp);
    self.sink.jmp_cond(cmp, &format!("<{label}"));
    Ok(())
  }

  /// `/name`: inject a library function ahead of the program.
  fn import(&mut self, stmt: &[Token], root: bool) -> CompileResult<()> {
    let [_, target] = stmt else {
      return malformed("import", stmt);
    };
    let name = target.ident().context(MalformedStatementSnafu {
      construct: "import",
      message: format!("expected a function name, got {}", target.kind),
    })?;
    ensure!(root, ImportOutsideRootSnafu { name });
    self.linker.inject_if_not_present(name, &mut self.sink)?;
    Ok(())
  }

  /// `@module::function(args)`.
  fn system_call(&mut self, stmt: &[Token], scope: &mut Scope) -> CompileResult<()> {
    let [_, target, args] = stmt else {
      return malformed("system call", stmt);
    };
    let (Some(qualified), TokenKind::Expr(args)) = (target.ident(), &args.kind) else {
      return malformed("system call", stmt);
    };
    let (module, function) = qualified
      .split_once("::")
      .filter(|(module, function)| !module.is_empty() && !function.is_empty())
      .context(InvalidSystemFunctionSnafu { name: qualified })?;
    let func = system::lookup(module, function)?;
    func(&split_args(args), scope, &mut self.sink, &mut self.linker)
  }
}

/// Names a block (or any block nested in it) reassigns or uses as a loop
/// counter.
fn collect_written(tokens: &[Token], written: &mut BTreeSet<String>) {
  for stmt in tokens.split(|token| token.is(&TokenKind::Newline)) {
    match stmt {
      [target, op, ..] if op.is(&TokenKind::Assign) => written.extend(target.ident().map(String::from)),
      [keyword, header, ..] if keyword.ident() == Some("for") => {
        if let Some([counter, ..]) = header.children() {
          written.extend(counter.ident().map(String::from));
        }
      }
      _ => {}
    }
    for token in stmt {
      if let TokenKind::Block(children) = &token.kind {
        collect_written(children, written);
      }
    }
  }
}

fn malformed<T>(construct: &'static str, stmt: &[Token]) -> CompileResult<T> {
  MalformedStatementSnafu {
    construct,
    message: format!("\"{}\"", describe_tokens(stmt)),
  }
  .fail()
}

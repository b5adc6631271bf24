//! Variable bindings and the slot cursor of one generation scope.

use std::collections::BTreeSet;

use snafu::OptionExt;

use crate::error::{CompileResult, SlotsExhaustedSnafu};
use crate::ty::Type;

/// Names starting with this character live in persistent state.
pub const STATE_PREFIX: char = '\'';

pub fn is_persistent(name: &str) -> bool {
  name.starts_with(STATE_PREFIX)
}

/// Where a variable's value lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location {
  /// A scratch buffer slot.
  Slot(u32),
  /// An address in the persistent state space.
  State(u64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variable {
  pub name: String,
  pub location: Location,
  pub ty: Type,
}

impl Variable {
  pub fn new(name: impl Into<String>, location: Location, ty: Type) -> Self {
    Self {
      name: name.into(),
      location,
      ty,
    }
  }
}

/// Live variables, in declaration order.
#[derive(Debug, Clone, Default)]
pub struct Variables {
  vars: Vec<Variable>,
}

impl Variables {
  pub fn get(&self, name: &str) -> Option<&Variable> {
    self.vars.iter().find(|var| var.name == name)
  }

  pub fn get_mut(&mut self, name: &str) -> Option<&mut Variable> {
    self.vars.iter_mut().find(|var| var.name == name)
  }

  /// Bind `var`, replacing any existing binding of the same name.
  pub fn bind(&mut self, var: Variable) {
    match self.get_mut(&var.name) {
      Some(existing) => *existing = var,
      None => self.vars.push(var),
    }
  }

  pub fn remove(&mut self, name: &str) -> Option<Variable> {
    let index = self.vars.iter().position(|var| var.name == name)?;
    Some(self.vars.remove(index))
  }

  /// Whether any variable lives in slot `slot`.
  pub fn uses_slot(&self, slot: u32) -> bool {
    self.vars.iter().any(|var| var.location == Location::Slot(slot))
  }

  /// Whether a variable other than `name` lives in slot `slot`.
  pub fn is_aliased(&self, slot: u32, name: &str) -> bool {
    self
      .vars
      .iter()
      .any(|var| var.name != name && var.location == Location::Slot(slot))
  }

  pub fn iter(&self) -> impl Iterator<Item = &Variable> {
    self.vars.iter()
  }
}

/// Variables plus the monotonically growing slot cursor.
#[derive(Debug, Clone)]
pub struct Scope {
  pub vars: Variables,
  next_slot: u32,
  /// Names bound by an enclosing scope and not redeclared here.
  inherited: BTreeSet<String>,
}

impl Scope {
  pub fn new(first_slot: u32) -> Self {
    Self {
      vars: Variables::default(),
      next_slot: first_slot,
      inherited: BTreeSet::new(),
    }
  }

  /// Hand out the next unused slot.
  pub fn alloc(&mut self) -> CompileResult<u32> {
    let slot = self.next_slot;
    self.next_slot = slot
      .checked_add(1)
      .context(SlotsExhaustedSnafu { last: slot })?;
    Ok(slot)
  }

  /// A nested scope sees the parent's variables and continues its cursor.
  /// Declarations made inside it die with it.
  pub fn child(&self) -> Self {
    Self {
      vars: self.vars.clone(),
      next_slot: self.next_slot,
      inherited: self.vars.iter().map(|var| var.name.clone()).collect(),
    }
  }

  /// Take over a finished child's high-water mark, and the types its
  /// assignments fixed for persistent variables still `loaded` here.
  pub fn absorb(&mut self, child: &Scope) {
    self.next_slot = self.next_slot.max(child.next_slot);
    for var in self.vars.vars.iter_mut() {
      if var.ty != Type::Loaded || !matches!(var.location, Location::State(_)) {
        continue;
      }
      if let Some(fixed) = child.vars.get(&var.name)
        && fixed.location == var.location
      {
        var.ty = fixed.ty;
      }
    }
  }

  /// Bind `var` as belonging to this scope.
  pub fn declare(&mut self, var: Variable) {
    self.inherited.remove(&var.name);
    self.vars.bind(var);
  }

  /// Whether `name` was bound by an enclosing scope. Such a binding must keep
  /// its location, the enclosing scope still refers to it.
  pub fn is_inherited(&self, name: &str) -> bool {
    self.inherited.contains(name)
  }
}

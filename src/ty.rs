use std::fmt;

/// Static type of a lowered value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Type {
  Uint64,
  String,
  Boolean,
  /// A persistent variable that was `load`ed but never assigned; its real
  /// type is fixed by the first assignment.
  Loaded,
  Placeholder,
}

impl Type {
  /// Look up a type by the name used in source and library headers.
  pub fn from_name(name: &str) -> Option<Self> {
    match name {
      "uint64" => Some(Self::Uint64),
      "string" => Some(Self::String),
      "bool" | "boolean" => Some(Self::Boolean),
      "void" => Some(Self::Placeholder),
      _ => None,
    }
  }

  pub fn name(self) -> &'static str {
    match self {
      Self::Uint64 => "uint64",
      Self::String => "string",
      Self::Boolean => "bool",
      Self::Loaded => "loaded",
      Self::Placeholder => "void",
    }
  }

  /// Whether a value of type `found` may be passed where `self` is expected.
  /// A loaded value has no known type yet, so it is accepted anywhere.
  pub fn accepts(self, found: Type) -> bool {
    self == found || found == Type::Loaded
  }
}

impl fmt::Display for Type {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.name())
  }
}

/// Expected parameter types plus a return type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
  pub params: Vec<Type>,
  pub ret: Type,
}

impl Signature {
  pub fn new(params: Vec<Type>, ret: Type) -> Self {
    Self { params, ret }
  }

  pub fn matches(&self, found: &[Type]) -> bool {
    self.params.len() == found.len()
      && self
        .params
        .iter()
        .zip(found)
        .all(|(expected, found)| expected.accepts(*found))
  }
}

/// Render argument types the way they appear in diagnostics: `(uint64, string)`.
pub fn describe_types(types: &[Type]) -> String {
  let names: Vec<&str> = types.iter().map(|ty| ty.name()).collect();
  format!("({})", names.join(", "))
}

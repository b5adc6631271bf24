//! Lexical analysis: turns the raw input string into a flat vector of tokens.
//!
//! The tokenizer knows nothing about statements. It recognises identifiers,
//! literals, operators and punctuation; grouping of `( )` and `{ }` regions
//! into token trees is left to the parser. `==` is matched before `=`.

use std::fmt;

use crate::error::{CompileError, CompileResult};

/// Kinds of tokens recognised by the front-end.
///
/// `Expr` and `Block` never come out of [`tokenize`]; the parser builds them
/// from parenthesised and braced regions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
  Ident(String),
  Int(u64),
  Str(String),
  Concat,
  Add,
  Sub,
  Mul,
  Div,
  Exp,
  EqEq,
  Assign,
  OpenParen,
  CloseParen,
  OpenBrace,
  CloseBrace,
  Comma,
  Semi,
  Newline,
  Bang,
  Greater,
  At,
  Expr(Vec<Token>),
  Block(Vec<Token>),
}

/// A token plus the byte offset it started at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
  pub kind: TokenKind,
  pub loc: usize,
}

impl Token {
  pub fn new(kind: TokenKind, loc: usize) -> Self {
    Self { kind, loc }
  }

  pub fn ident(&self) -> Option<&str> {
    match &self.kind {
      TokenKind::Ident(name) => Some(name),
      _ => None,
    }
  }

  pub fn children(&self) -> Option<&[Token]> {
    match &self.kind {
      TokenKind::Expr(children) | TokenKind::Block(children) => Some(children),
      _ => None,
    }
  }

  pub fn is(&self, kind: &TokenKind) -> bool {
    &self.kind == kind
  }
}

impl fmt::Display for TokenKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Ident(name) => f.write_str(name),
      Self::Int(value) => write!(f, "{value}"),
      Self::Str(text) => write!(f, "\"{text}\""),
      Self::Concat => f.write_str("."),
      Self::Add => f.write_str("+"),
      Self::Sub => f.write_str("-"),
      Self::Mul => f.write_str("*"),
      Self::Div => f.write_str("/"),
      Self::Exp => f.write_str("^"),
      Self::EqEq => f.write_str("=="),
      Self::Assign => f.write_str("="),
      Self::OpenParen => f.write_str("("),
      Self::CloseParen => f.write_str(")"),
      Self::OpenBrace => f.write_str("{"),
      Self::CloseBrace => f.write_str("}"),
      Self::Comma => f.write_str(","),
      Self::Semi => f.write_str(";"),
      Self::Newline => f.write_str("\\n"),
      Self::Bang => f.write_str("!"),
      Self::Greater => f.write_str(">"),
      Self::At => f.write_str("@"),
      Self::Expr(children) => write!(f, "({})", describe_tokens(children)),
      Self::Block(children) => write!(f, "{{{}}}", describe_tokens(children)),
    }
  }
}

fn is_ident_start(c: u8) -> bool {
  c.is_ascii_alphabetic() || matches!(c, b'_' | b':' | b'\'')
}

fn is_ident_continue(c: u8) -> bool {
  is_ident_start(c) || c.is_ascii_digit()
}

/// Lex the input into a flat vector of tokens.
pub fn tokenize(input: &str) -> CompileResult<Vec<Token>> {
  let mut tokens = Vec::new();
  let bytes = input.as_bytes();
  let mut i = 0;

  while i < bytes.len() {
    let c = bytes[i];
    if c == b'\n' {
      tokens.push(Token::new(TokenKind::Newline, i));
      i += 1;
      continue;
    }
    if c.is_ascii_whitespace() {
      i += 1;
      continue;
    }

    if c.is_ascii_digit() {
      let start = i;
      while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
      }
      let value = input[start..i]
        .parse::<u64>()
        .map_err(|err| CompileError::at(input, start, format!("invalid number: {err}")))?;
      tokens.push(Token::new(TokenKind::Int(value), start));
      continue;
    }

    if is_ident_start(c) {
      let start = i;
      while i < bytes.len() && is_ident_continue(bytes[i]) {
        i += 1;
      }
      tokens.push(Token::new(TokenKind::Ident(input[start..i].to_string()), start));
      continue;
    }

    if c == b'"' {
      let start = i;
      let Some(len) = input[start + 1..].find('"') else {
        return Err(CompileError::at(input, start, "unterminated string literal"));
      };
      let text = input[start + 1..start + 1 + len].to_string();
      tokens.push(Token::new(TokenKind::Str(text), start));
      i = start + len + 2;
      continue;
    }

    if input[i..].starts_with("==") {
      tokens.push(Token::new(TokenKind::EqEq, i));
      i += 2;
      continue;
    }

    let kind = match c {
      b'.' => TokenKind::Concat,
      b'+' => TokenKind::Add,
      b'-' => TokenKind::Sub,
      b'*' => TokenKind::Mul,
      b'/' => TokenKind::Div,
      b'^' => TokenKind::Exp,
      b'=' => TokenKind::Assign,
      b'(' => TokenKind::OpenParen,
      b')' => TokenKind::CloseParen,
      b'{' => TokenKind::OpenBrace,
      b'}' => TokenKind::CloseBrace,
      b',' => TokenKind::Comma,
      b';' => TokenKind::Semi,
      b'!' => TokenKind::Bang,
      b'>' => TokenKind::Greater,
      b'@' => TokenKind::At,
      _ => {
        let invalid_char = input[i..].chars().next().unwrap_or('\0');
        return Err(CompileError::at(
          input,
          i,
          format!("invalid token: '{invalid_char}'"),
        ));
      }
    };
    tokens.push(Token::new(kind, i));
    i += 1;
  }

  Ok(tokens)
}

/// Human-friendly description used in diagnostics.
pub fn describe_token(token: Option<&Token>) -> String {
  match token {
    Some(t) => t.kind.to_string(),
    None => "EOF".to_string(),
  }
}

/// Space-separated rendering of a token sequence.
pub fn describe_tokens(tokens: &[Token]) -> String {
  let parts: Vec<String> = tokens.iter().map(|t| t.kind.to_string()).collect();
  parts.join(" ")
}

#[cfg(test)]
mod tests {
  use super::*;

  fn kinds(input: &str) -> Vec<TokenKind> {
    tokenize(input)
      .unwrap()
      .into_iter()
      .map(|token| token.kind)
      .collect()
  }

  #[test]
  fn declaration_and_reassignment_are_distinct() {
    assert_eq!(
      kinds("x == 3\nx = x + 1"),
      vec![
        TokenKind::Ident("x".into()),
        TokenKind::EqEq,
        TokenKind::Int(3),
        TokenKind::Newline,
        TokenKind::Ident("x".into()),
        TokenKind::Assign,
        TokenKind::Ident("x".into()),
        TokenKind::Add,
        TokenKind::Int(1),
      ]
    );
  }

  #[test]
  fn persistent_and_qualified_names_are_single_identifiers() {
    assert_eq!(
      kinds("@io::print('total)"),
      vec![
        TokenKind::At,
        TokenKind::Ident("io::print".into()),
        TokenKind::OpenParen,
        TokenKind::Ident("'total".into()),
        TokenKind::CloseParen,
      ]
    );
  }

  #[test]
  fn function_header_tokens() {
    assert_eq!(
      kinds(";main -> uint64 /a"),
      vec![
        TokenKind::Semi,
        TokenKind::Ident("main".into()),
        TokenKind::Sub,
        TokenKind::Greater,
        TokenKind::Ident("uint64".into()),
        TokenKind::Div,
        TokenKind::Ident("a".into()),
      ]
    );
  }

  #[test]
  fn string_literals_keep_their_spaces() {
    let tokens = tokenize("s == \"hi there\"").unwrap();
    assert_eq!(tokens[2].kind, TokenKind::Str("hi there".into()));
    assert_eq!(tokens[2].loc, 5);
  }

  #[test]
  fn unterminated_string_points_at_the_quote() {
    let err = tokenize("s == \"oops").unwrap_err();
    assert_eq!(
      err.to_string(),
      "'s == \"oops'\n      ^ unterminated string literal"
    );
  }

  #[test]
  fn rejects_unknown_characters() {
    let err = tokenize("x == 1 $ 2").unwrap_err();
    assert!(err.to_string().ends_with("invalid token: '$'"));
  }

  #[test]
  fn integer_overflow_is_an_error() {
    assert!(tokenize("99999999999999999999").is_err());
  }
}

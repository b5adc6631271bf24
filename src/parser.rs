//! Builds the token tree consumed by code generation.
//!
//! The grammar proper lives in the statement generator; the parser only
//! groups delimited regions. Every `( ... )` becomes one `Expr` token and
//! every `{ ... }` one `Block` token, each owning its recursively grouped
//! children. Newlines inside parentheses carry no meaning and are dropped;
//! inside braces they separate statements and are kept.

use crate::error::{CompileError, CompileResult};
use crate::tokenizer::{Token, TokenKind, describe_token};

/// Group a flat token vector into a token tree.
pub fn parse(tokens: Vec<Token>, source: &str) -> CompileResult<Vec<Token>> {
  let mut stream = TokenStream::new(tokens, source);
  let tree = parse_group(&mut stream, None)?;

  if let Some(token) = stream.peek() {
    let got = describe_token(Some(token));
    return Err(CompileError::at(
      source,
      token.loc,
      format!("unexpected token \"{got}\""),
    ));
  }

  Ok(tree)
}

/// Collect tokens until `close` (or end of input at the top level).
fn parse_group(stream: &mut TokenStream, close: Option<&Token>) -> CompileResult<Vec<Token>> {
  let in_parens = close.is_some_and(|open| open.is(&TokenKind::OpenParen));
  let mut children = Vec::new();

  loop {
    let Some(token) = stream.next() else {
      return match close {
        Some(open) => Err(CompileError::at(
          stream.source,
          open.loc,
          format!("unclosed \"{}\"", open.kind),
        )),
        None => Ok(children),
      };
    };

    match token.kind {
      TokenKind::OpenParen => {
        let inner = parse_group(stream, Some(&token))?;
        children.push(Token::new(TokenKind::Expr(inner), token.loc));
      }
      TokenKind::OpenBrace => {
        let inner = parse_group(stream, Some(&token))?;
        children.push(Token::new(TokenKind::Block(inner), token.loc));
      }
      TokenKind::CloseParen | TokenKind::CloseBrace => {
        let expected = match close.map(|open| &open.kind) {
          Some(TokenKind::OpenParen) => TokenKind::CloseParen,
          Some(TokenKind::OpenBrace) => TokenKind::CloseBrace,
          _ => {
            return Err(CompileError::at(
              stream.source,
              token.loc,
              format!("unmatched \"{}\"", token.kind),
            ));
          }
        };
        if token.kind != expected {
          return Err(CompileError::at(
            stream.source,
            token.loc,
            format!("expected \"{expected}\", but got \"{}\"", token.kind),
          ));
        }
        return Ok(children);
      }
      TokenKind::Newline if in_parens => {}
      _ => children.push(token),
    }
  }
}

/// Lightweight cursor over the token vector.
struct TokenStream<'a> {
  tokens: std::iter::Peekable<std::vec::IntoIter<Token>>,
  source: &'a str,
}

impl<'a> TokenStream<'a> {
  fn new(tokens: Vec<Token>, source: &'a str) -> Self {
    Self {
      tokens: tokens.into_iter().peekable(),
      source,
    }
  }

  fn peek(&mut self) -> Option<&Token> {
    self.tokens.peek()
  }

  fn next(&mut self) -> Option<Token> {
    self.tokens.next()
  }
}

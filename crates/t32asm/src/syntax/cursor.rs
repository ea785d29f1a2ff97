//! Token cursor with checkpoint/restore
//!
//! The operand matcher backtracks by snapshotting the cursor position and
//! rewinding to it; the cursor itself never mutates the token stream.

use super::token::{Token, TokenKind};
use crate::common::Span;

/// Position snapshot, opaque to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint(usize);

/// Forward-only cursor over a tokenized operand list
pub struct Cursor {
    tokens: Vec<Token>,
    pos: usize,
    end: usize,
}

impl Cursor {
    pub fn new(tokens: Vec<Token>, line_len: usize) -> Self {
        Self {
            tokens,
            pos: 0,
            end: line_len,
        }
    }

    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint(self.pos)
    }

    pub fn rewind(&mut self, cp: Checkpoint) {
        self.pos = cp.0;
    }

    pub fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    pub fn peek(&self) -> Option<&TokenKind> {
        self.tokens.get(self.pos).map(|t| &t.kind)
    }

    /// Consume and return the next token
    pub fn bump(&mut self) -> Option<&Token> {
        let tok = self.tokens.get(self.pos)?;
        self.pos += 1;
        Some(tok)
    }

    /// Consume the next token if it matches, return whether it was consumed
    pub fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.peek() == Some(kind) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    /// Consume an identifier token, returning its text
    pub fn eat_ident(&mut self) -> Option<String> {
        if !matches!(self.peek(), Some(TokenKind::Ident(_))) {
            return None;
        }
        match self.bump() {
            Some(Token {
                kind: TokenKind::Ident(s),
                ..
            }) => Some(s.clone()),
            _ => unreachable!(),
        }
    }

    /// Span of the next token, or an empty span at end of line
    pub fn here(&self) -> Span {
        match self.tokens.get(self.pos) {
            Some(t) => t.span,
            None => Span::new(self.end, self.end),
        }
    }

    /// Span from the given checkpoint up to the current position
    pub fn span_since(&self, cp: Checkpoint) -> Span {
        let start = self
            .tokens
            .get(cp.0)
            .map(|t| t.span.start)
            .unwrap_or(self.end);
        let end = if self.pos > cp.0 {
            self.tokens
                .get(self.pos - 1)
                .map(|t| t.span.end)
                .unwrap_or(self.end)
        } else {
            start
        };
        Span::new(start, end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syntax::token::tokenize;

    #[test]
    fn test_checkpoint_rewind() {
        let mut cur = Cursor::new(tokenize("r0, r1").unwrap(), 6);
        let cp = cur.checkpoint();
        assert_eq!(cur.eat_ident().as_deref(), Some("r0"));
        assert!(cur.eat(&TokenKind::Comma));
        cur.rewind(cp);
        assert_eq!(cur.eat_ident().as_deref(), Some("r0"));
    }

    #[test]
    fn test_here_at_end() {
        let mut cur = Cursor::new(tokenize("r0").unwrap(), 2);
        cur.eat_ident();
        assert!(cur.at_end());
        assert_eq!(cur.here(), Span::new(2, 2));
    }
}

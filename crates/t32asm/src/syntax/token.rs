//! Token definitions for operand text

use crate::common::Span;
use logos::Logos;

/// Token with source location
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

impl Token {
    pub fn new(kind: TokenKind, span: Span) -> Self {
        Self { kind, span }
    }
}

/// All token kinds appearing in an operand list
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t]+")]
pub enum TokenKind {
    /// Register names, symbols, shift mnemonics, condition names
    #[regex(r"[A-Za-z_.][A-Za-z0-9_.]*", |lex| lex.slice().to_string())]
    Ident(String),

    #[regex(r"0[xX][0-9a-fA-F]+", |lex| i64::from_str_radix(&lex.slice()[2..], 16).ok())]
    #[regex(r"0[bB][01]+", |lex| i64::from_str_radix(&lex.slice()[2..], 2).ok())]
    #[regex(r"[0-9]+", |lex| lex.slice().parse::<i64>().ok())]
    Number(i64),

    #[token(",")]
    Comma,
    #[token("#")]
    Hash,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token("!")]
    Bang,
    #[token("-")]
    Minus,
    #[token("+")]
    Plus,
    #[token(":")]
    Colon,
}

impl std::fmt::Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenKind::Ident(s) => write!(f, "`{}`", s),
            TokenKind::Number(n) => write!(f, "{}", n),
            TokenKind::Comma => write!(f, "`,`"),
            TokenKind::Hash => write!(f, "`#`"),
            TokenKind::LBracket => write!(f, "`[`"),
            TokenKind::RBracket => write!(f, "`]`"),
            TokenKind::LBrace => write!(f, "`{{`"),
            TokenKind::RBrace => write!(f, "`}}`"),
            TokenKind::Bang => write!(f, "`!`"),
            TokenKind::Minus => write!(f, "`-`"),
            TokenKind::Plus => write!(f, "`+`"),
            TokenKind::Colon => write!(f, "`:`"),
        }
    }
}

/// Tokenize one operand list. Returns `Err` on a malformed token.
pub fn tokenize(source: &str) -> Result<Vec<Token>, Span> {
    let mut lexer = TokenKind::lexer(source);
    let mut tokens = Vec::new();
    while let Some(result) = lexer.next() {
        let span = Span::new(lexer.span().start, lexer.span().end);
        match result {
            Ok(kind) => tokens.push(Token::new(kind, span)),
            Err(()) => return Err(span),
        }
    }
    Ok(tokens)
}

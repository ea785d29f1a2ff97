//! Line tokenization for operand parsing

mod cursor;
mod token;

pub use cursor::{Checkpoint, Cursor};
pub use token::{Token, TokenKind, tokenize};

//! The assembler core
//!
//! Pipeline per source line: resolver -> operand matcher -> predication
//! prepare -> family encoder -> predication commit -> emission. After all
//! lines, the relaxation engine converges and fixups are applied.

pub mod assembler;
pub mod encode;
pub mod fixup;
pub mod inst;
pub mod operands;
pub mod predication;
pub mod relax;
pub mod resolver;
pub mod section;
pub mod symbols;

pub use assembler::{AsmConfig, Assembler, Output};
pub use fixup::FixupKind;
pub use inst::{Inst, Operand, OperandKind};
pub use predication::PredContext;
pub use relax::{RelaxEngine, RelaxKind};
pub use section::{Relocation, Section};
pub use symbols::{Expr, SymbolTable};

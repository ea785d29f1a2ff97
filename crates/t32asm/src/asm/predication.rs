//! Conditional-block state machine
//!
//! Tracks whether the assembler is inside a scalar `it` block or a vector
//! `vpst` block, validates each instruction's condition against the open
//! block's schedule, and can synthesize one-slot blocks when implicit
//! predication is enabled.
//!
//! Classification runs in two phases: `prepare` records the catalog's
//! conservative guess before the encoder runs, the encoder may override
//! the classification on the accumulator, and `commit` applies the
//! transition using whatever the accumulator ended up with. A failed line
//! calls `abort` instead, leaving the block state untouched.

use crate::catalog::PredClass;
use crate::common::{AsmError, AsmResult, Span};
use crate::isa::{Cond, VecPred};

use super::inst::{BlockSpec, Inst};

/// How the open block came to be
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    /// Explicit block-start instruction in the source
    Manual,
    /// Synthesized by the assembler in implicit mode
    Auto,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct OpenBlock {
    kind: BlockKind,
    vector: bool,
    base: Cond,
    len: u8,
    else_mask: u8,
    /// Next slot to fill, 0-based
    slot: u8,
}

impl OpenBlock {
    fn remaining(&self) -> u8 {
        self.len - self.slot
    }

    fn slot_is_else(&self) -> bool {
        self.else_mask & (1 << self.slot) != 0
    }

    fn slot_cond(&self) -> Cond {
        if self.slot_is_else() {
            self.base.inverse()
        } else {
            self.base
        }
    }

    fn slot_vpred(&self) -> VecPred {
        if self.slot_is_else() {
            VecPred::Else
        } else {
            VecPred::Then
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Pending {
    class: PredClass,
    cond: Cond,
}

/// Per-segment predication context
pub struct PredContext {
    block: Option<OpenBlock>,
    pending: Option<Pending>,
    /// Whether the previous committed instruction executed conditionally
    last_conditional: bool,
    /// Synthesize one-slot blocks for bare conditional instructions
    implicit: bool,
}

/// Outcome of committing one instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Commit {
    /// Bytes of a synthesized block-start to emit ahead of the instruction
    pub synthesized: Option<[u8; 2]>,
    /// A discouraged-but-legal pattern worth reporting
    pub warning: Option<&'static str>,
}

impl PredContext {
    pub fn new(implicit: bool) -> Self {
        Self {
            block: None,
            pending: None,
            last_conditional: false,
            implicit,
        }
    }

    pub fn in_block(&self) -> bool {
        self.block.is_some()
    }

    pub fn in_vector_block(&self) -> bool {
        self.block.is_some_and(|b| b.vector)
    }

    /// Condition the open block imposes on its current slot
    pub fn current_cond(&self) -> Option<Cond> {
        self.block.as_ref().map(OpenBlock::slot_cond)
    }

    /// Phase one: record the conservative classification before encoding
    pub fn prepare(&mut self, class: PredClass, cond: Cond) {
        self.pending = Some(Pending { class, cond });
    }

    /// The line failed; discard the pending transition
    pub fn abort(&mut self) {
        self.pending = None;
    }

    /// Phase two: validate and apply the transition for an encoded
    /// instruction. Reads the (possibly encoder-overridden)
    /// classification from the accumulator.
    pub fn commit(&mut self, inst: &Inst) -> AsmResult<Commit> {
        let pending = self.pending.take().expect("commit without prepare");

        let class = inst.pred_class;
        let cond = pending.cond;
        let span = inst.span;
        // An override may refine the guess but never invent or drop a
        // block start: the schedule comes from the encoder either way.
        debug_assert_eq!(
            matches!(
                pending.class,
                PredClass::BlockStart | PredClass::VectorBlockStart
            ),
            matches!(class, PredClass::BlockStart | PredClass::VectorBlockStart),
        );
        let mut outcome = Commit::default();

        match class {
            PredClass::BlockStart | PredClass::VectorBlockStart => {
                if self.block.is_some() {
                    return Err(AsmError::predication(
                        "conditional block may not be started inside another block",
                        span,
                    ));
                }
                let spec = inst
                    .block_open
                    .expect("block-start instruction sets a schedule");
                if self.last_conditional && !spec.vector && self.implicit {
                    outcome.warning = Some(
                        "consecutive one-instruction conditional blocks; consider one explicit block",
                    );
                }
                self.open(BlockKind::Manual, spec);
                self.last_conditional = false;
            }

            PredClass::Unpredicated => {
                if self.block.is_some() {
                    return Err(AsmError::predication(
                        format!("`{}` is not allowed in a conditional block", inst.mnemonic),
                        span,
                    ));
                }
                if cond != Cond::Al {
                    return Err(AsmError::predication(
                        format!("`{}` cannot execute conditionally", inst.mnemonic),
                        span,
                    ));
                }
                self.last_conditional = false;
            }

            PredClass::Neutral => {
                // Legal anywhere; occupies a slot when a block is open
                if self.block.is_some() {
                    self.advance();
                    self.last_conditional = true;
                } else {
                    self.last_conditional = false;
                }
            }

            PredClass::InBlock => {
                if let Some(vpred) = inst.vpred {
                    self.commit_vector(inst, vpred)?;
                } else {
                    outcome = self.commit_scalar(inst, cond, false)?;
                }
            }

            PredClass::LastInBlock => {
                if inst.vpred.is_some() {
                    return Err(AsmError::predication(
                        format!("`{}` may not take a vector predicate", inst.mnemonic),
                        span,
                    ));
                }
                outcome = self.commit_scalar(inst, cond, true)?;
            }
        }

        Ok(outcome)
    }

    fn commit_scalar(&mut self, inst: &Inst, cond: Cond, last: bool) -> AsmResult<Commit> {
        let span = inst.span;
        let mut outcome = Commit::default();

        match self.block {
            Some(block) if block.vector => {
                return Err(AsmError::predication(
                    format!(
                        "scalar conditional `{}` inside a vector-predication block",
                        inst.mnemonic
                    ),
                    span,
                ));
            }
            Some(block) => {
                let expected = block.slot_cond();
                if cond != expected {
                    return Err(AsmError::predication(
                        format!(
                            "incompatible condition in block: expected `{}`, found `{}`",
                            expected, cond
                        ),
                        span,
                    ));
                }
                self.advance();
                if last {
                    // A branch-class instruction terminates the block
                    self.block = None;
                }
                self.last_conditional = true;
            }
            None => {
                if cond == Cond::Al {
                    self.last_conditional = false;
                } else if last {
                    // Carries its own condition field when outside a block
                    self.last_conditional = true;
                } else if self.implicit {
                    let spec = BlockSpec {
                        vector: false,
                        base: cond,
                        len: 1,
                        else_mask: 0,
                    };
                    if self.last_conditional {
                        outcome.warning = Some(
                            "consecutive one-instruction conditional blocks; consider one explicit block",
                        );
                    }
                    self.open(BlockKind::Auto, spec);
                    outcome.synthesized = Some(encode_block_start(cond, 1, 0));
                    self.advance();
                    self.last_conditional = true;
                } else {
                    return Err(AsmError::predication(
                        format!(
                            "conditional `{}` is not in a conditional block",
                            inst.mnemonic
                        ),
                        span,
                    ));
                }
            }
        }
        Ok(outcome)
    }

    fn commit_vector(&mut self, inst: &Inst, vpred: VecPred) -> AsmResult<()> {
        let span = inst.span;
        match self.block {
            Some(block) if !block.vector => Err(AsmError::predication(
                format!(
                    "vector-predicated `{}` inside a scalar conditional block",
                    inst.mnemonic
                ),
                span,
            )),
            Some(block) => {
                let expected = block.slot_vpred();
                if vpred != expected {
                    return Err(AsmError::predication(
                        format!(
                            "incompatible predicate in block: expected `{}`, found `{}`",
                            expected, vpred
                        ),
                        span,
                    ));
                }
                self.advance();
                self.last_conditional = true;
                Ok(())
            }
            None => Err(AsmError::predication(
                format!(
                    "vector-predicated `{}` is not in a vector-predication block",
                    inst.mnemonic
                ),
                span,
            )),
        }
    }

    fn open(&mut self, kind: BlockKind, spec: BlockSpec) {
        self.block = Some(OpenBlock {
            kind,
            vector: spec.vector,
            base: spec.base,
            len: spec.len,
            else_mask: spec.else_mask,
            slot: 0,
        });
    }

    /// Consume one slot, closing the block when it runs out
    fn advance(&mut self) {
        if let Some(block) = self.block.as_mut() {
            block.slot += 1;
            if block.remaining() == 0 {
                self.block = None;
            }
        }
    }

    /// End-of-segment check. An open manual block is a diagnostic, not a
    /// hard failure; the context is reset either way.
    pub fn finish_segment(&mut self, span: Span) -> Option<(String, Span)> {
        let open = self.block.take();
        self.pending = None;
        self.last_conditional = false;
        open.and_then(|block| match block.kind {
            // One-slot auto blocks close with their instruction and can
            // never be left open
            BlockKind::Auto => None,
            BlockKind::Manual => Some((
                format!(
                    "conditional block still open at end of input ({} slot(s) unfilled)",
                    block.remaining()
                ),
                span,
            )),
        })
    }
}

/// Encoding of a scalar block-start instruction with the given base
/// condition and schedule, as emitted for synthesized blocks.
pub fn encode_block_start(base: Cond, len: u8, else_mask: u8) -> [u8; 2] {
    (encode_block_start_opcode(base, len, else_mask) as u16).to_le_bytes()
}

/// Block-start opcode word: base condition in bits 7:4, the slot schedule
/// packed into bits 3:0 with a terminating marker bit.
pub fn encode_block_start_opcode(base: Cond, len: u8, else_mask: u8) -> u32 {
    let c0 = u32::from(base.bits() & 1);
    let mut mask = 1u32 << (4 - len);
    for slot in 1..len {
        let bit = if else_mask & (1 << slot) != 0 {
            c0 ^ 1
        } else {
            c0
        };
        mask |= bit << (4 - slot);
    }
    0xBF00 | (u32::from(base.bits()) << 4) | mask
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asm::inst::Inst;

    fn inst(class: PredClass, cond: Cond) -> Inst {
        let mut inst = Inst::new();
        inst.mnemonic = "test".to_string();
        inst.pred_class = class;
        inst.cond = cond;
        inst
    }

    fn block_start(base: Cond, len: u8, else_mask: u8) -> Inst {
        let mut inst = inst(PredClass::BlockStart, Cond::Al);
        inst.block_open = Some(BlockSpec {
            vector: false,
            base,
            len,
            else_mask,
        });
        inst
    }

    fn commit(ctx: &mut PredContext, inst: &Inst) -> AsmResult<Commit> {
        ctx.prepare(inst.pred_class, inst.cond);
        ctx.commit(inst)
    }

    #[test]
    fn test_block_start_encoding() {
        // it eq / itt eq / ite eq / iteee gt
        assert_eq!(encode_block_start_opcode(Cond::Eq, 1, 0), 0xBF08);
        assert_eq!(encode_block_start_opcode(Cond::Eq, 2, 0), 0xBF04);
        assert_eq!(encode_block_start_opcode(Cond::Eq, 2, 0b10), 0xBF0C);
        assert_eq!(encode_block_start_opcode(Cond::Ne, 2, 0), 0xBF1C);
    }

    #[test]
    fn test_schedule_consumed_exactly() {
        let mut ctx = PredContext::new(false);
        commit(&mut ctx, &block_start(Cond::Eq, 3, 0b100)).unwrap();

        commit(&mut ctx, &inst(PredClass::InBlock, Cond::Eq)).unwrap();
        assert!(ctx.in_block());
        commit(&mut ctx, &inst(PredClass::InBlock, Cond::Eq)).unwrap();
        assert!(ctx.in_block());
        commit(&mut ctx, &inst(PredClass::InBlock, Cond::Ne)).unwrap();
        assert!(!ctx.in_block());

        // A fourth conditional instruction has no block to live in
        let err = commit(&mut ctx, &inst(PredClass::InBlock, Cond::Eq)).unwrap_err();
        assert!(matches!(err, AsmError::Predication { .. }));
    }

    #[test]
    fn test_condition_mismatch_names_both() {
        let mut ctx = PredContext::new(false);
        commit(&mut ctx, &block_start(Cond::Eq, 2, 0b10)).unwrap();
        commit(&mut ctx, &inst(PredClass::InBlock, Cond::Eq)).unwrap();

        let err = commit(&mut ctx, &inst(PredClass::InBlock, Cond::Eq)).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("`ne`"), "got: {}", message);
        assert!(message.contains("`eq`"), "got: {}", message);
        // The failed line leaves the block state valid for the next one
        assert!(ctx.in_block());
        commit(&mut ctx, &inst(PredClass::InBlock, Cond::Ne)).unwrap();
        assert!(!ctx.in_block());
    }

    #[test]
    fn test_nested_block_rejected() {
        let mut ctx = PredContext::new(false);
        commit(&mut ctx, &block_start(Cond::Eq, 2, 0)).unwrap();
        let err = commit(&mut ctx, &block_start(Cond::Ne, 1, 0)).unwrap_err();
        assert!(matches!(err, AsmError::Predication { .. }));
    }

    #[test]
    fn test_conditional_outside_block() {
        let mut ctx = PredContext::new(false);
        let err = commit(&mut ctx, &inst(PredClass::InBlock, Cond::Eq)).unwrap_err();
        assert!(err.to_string().contains("not in a conditional block"));
    }

    #[test]
    fn test_implicit_synthesis() {
        let mut ctx = PredContext::new(true);
        let outcome = commit(&mut ctx, &inst(PredClass::InBlock, Cond::Eq)).unwrap();
        assert_eq!(outcome.synthesized, Some(0xBF08u16.to_le_bytes()));
        // One-slot block covers exactly that instruction
        assert!(!ctx.in_block());

        // A second conditional instruction gets its own fresh block, and
        // the discouraged pattern is flagged
        let outcome = commit(&mut ctx, &inst(PredClass::InBlock, Cond::Ne)).unwrap();
        assert_eq!(outcome.synthesized, Some(0xBF18u16.to_le_bytes()));
        assert!(outcome.warning.is_some());
    }

    #[test]
    fn test_last_in_block_closes_early() {
        let mut ctx = PredContext::new(false);
        commit(&mut ctx, &block_start(Cond::Eq, 2, 0)).unwrap();
        commit(&mut ctx, &inst(PredClass::LastInBlock, Cond::Eq)).unwrap();
        // Block closed with one slot unfilled
        assert!(!ctx.in_block());
    }

    #[test]
    fn test_branch_outside_block_keeps_own_condition() {
        let mut ctx = PredContext::new(false);
        commit(&mut ctx, &inst(PredClass::LastInBlock, Cond::Ne)).unwrap();
        assert!(!ctx.in_block());
    }

    #[test]
    fn test_unpredicated_rejects_condition_and_block() {
        let mut ctx = PredContext::new(false);
        let err = commit(&mut ctx, &inst(PredClass::Unpredicated, Cond::Eq)).unwrap_err();
        assert!(err.to_string().contains("cannot execute conditionally"));

        commit(&mut ctx, &block_start(Cond::Eq, 1, 0)).unwrap();
        let err = commit(&mut ctx, &inst(PredClass::Unpredicated, Cond::Al)).unwrap_err();
        assert!(err.to_string().contains("not allowed in a conditional block"));
    }

    #[test]
    fn test_vector_scalar_kinds_exclusive() {
        let mut ctx = PredContext::new(false);
        let mut vpst = inst(PredClass::VectorBlockStart, Cond::Al);
        vpst.block_open = Some(BlockSpec {
            vector: true,
            base: Cond::Al,
            len: 2,
            else_mask: 0,
        });
        commit(&mut ctx, &vpst).unwrap();

        // Scalar conditional inside a vector block
        let err = commit(&mut ctx, &inst(PredClass::InBlock, Cond::Eq)).unwrap_err();
        assert!(err.to_string().contains("vector-predication block"));

        // Correctly predicated vector instructions fill the schedule
        let mut vop = inst(PredClass::InBlock, Cond::Al);
        vop.vpred = Some(VecPred::Then);
        commit(&mut ctx, &vop).unwrap();
        commit(&mut ctx, &vop).unwrap();
        assert!(!ctx.in_block());
    }

    #[test]
    fn test_vector_predicate_mismatch() {
        let mut ctx = PredContext::new(false);
        let mut vpst = inst(PredClass::VectorBlockStart, Cond::Al);
        vpst.block_open = Some(BlockSpec {
            vector: true,
            base: Cond::Al,
            len: 2,
            else_mask: 0b10,
        });
        commit(&mut ctx, &vpst).unwrap();

        let mut vop = inst(PredClass::InBlock, Cond::Al);
        vop.vpred = Some(VecPred::Then);
        commit(&mut ctx, &vop).unwrap();
        // Slot 1 wants `e`
        let err = commit(&mut ctx, &vop).unwrap_err();
        assert!(err.to_string().contains("expected `e`"));
    }

    #[test]
    fn test_finish_segment_warns_on_open_block() {
        let mut ctx = PredContext::new(false);
        commit(&mut ctx, &block_start(Cond::Eq, 3, 0)).unwrap();
        commit(&mut ctx, &inst(PredClass::InBlock, Cond::Eq)).unwrap();
        let warning = ctx.finish_segment(Span::default());
        assert!(warning.is_some());
        assert!(warning.unwrap().0.contains("2 slot(s)"));
        assert!(!ctx.in_block());

        // A clean segment end produces nothing
        assert!(ctx.finish_segment(Span::default()).is_none());
    }
}

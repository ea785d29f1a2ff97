//! Family encoders
//!
//! One encode function per opcode family, dispatched by matching on the
//! catalog entry's family tag. Encoders read the operand records, pick
//! the narrow or wide form, and either finish the opcode word, request a
//! relocation, or hand the instruction to the relaxation engine.

use crate::catalog::{LogicalOp, LsSize, OpFamily, OpcodeEntry, PredClass, ShiftOp};
use crate::common::AsmError;
use crate::isa::{Cond, Feature, FeatureSet, Register};

use super::fixup::{self, FixupKind, modified_const};
use super::inst::{BlockSpec, Inst, MemOffset, Operand, OperandKind, ShiftAmount, Width};
use super::predication::encode_block_start_opcode;
use super::relax::RelaxKind;

/// Context the encoders read; never written during a line
pub struct EncodeCtx {
    pub features: FeatureSet,
    /// A block is open right now (this instruction sits in it)
    pub in_block: bool,
    /// This instruction will execute under a block predicate, counting a
    /// block about to be synthesized in implicit mode
    pub predicated: bool,
}

pub fn encode(inst: &mut Inst, entry: &OpcodeEntry, ctx: &EncodeCtx) {
    match entry.family {
        OpFamily::Mov { flags } => encode_mov(inst, ctx, flags),
        OpFamily::Cmp => encode_cmp(inst, ctx),
        OpFamily::AddSub { sub, flags } => encode_add_sub(inst, ctx, sub, flags),
        OpFamily::Logical { op, flags } => encode_logical(inst, ctx, op, flags),
        OpFamily::Shift { op, flags } => encode_shift(inst, ctx, op, flags),
        OpFamily::Mul { flags } => encode_mul(inst, ctx, flags),
        OpFamily::LoadStore { load, size } => encode_load_store(inst, ctx, load, size),
        OpFamily::LoadStoreMulti { load } => encode_multi(inst, ctx, load),
        OpFamily::PushPop { pop } => encode_push_pop(inst, ctx, pop),
        OpFamily::Branch { link } => encode_branch(inst, ctx, link),
        OpFamily::BranchExchange => encode_bx(inst),
        OpFamily::Adr => encode_adr(inst, ctx),
        OpFamily::BlockStart { pattern } => encode_block_start(inst, pattern),
        OpFamily::VectorBlockStart { pattern } => encode_vector_block_start(inst, pattern),
        OpFamily::VecArith { sub } => encode_vec_arith(inst, sub),
        OpFamily::Hint => {
            set_narrow(inst, 0xBF00);
            inst.pred_class = PredClass::Neutral;
        }
        OpFamily::Exception { svc } => encode_exception(inst, svc),
    }
}

fn rnum(reg: Register) -> u32 {
    u32::from(reg.num())
}

fn set_narrow(inst: &mut Inst, opcode: u32) {
    inst.opcode = opcode;
    inst.size = 2;
}

fn set_wide(inst: &mut Inst, opcode: u32) {
    inst.opcode = opcode;
    inst.size = 4;
}

/// True when the narrow form may be chosen at all
fn narrow_allowed(inst: &Inst) -> bool {
    inst.forced != Some(Width::Wide)
}

/// Claim the wide form, recording an error when it is unavailable
fn require_wide(inst: &mut Inst, ctx: &EncodeCtx) -> bool {
    if inst.forced == Some(Width::Narrow) {
        inst.record_error(AsmError::operand(
            "operands require the wide encoding, but `.n` was given",
            inst.span,
        ));
        return false;
    }
    if !ctx.features.has(Feature::Wide) {
        inst.record_error(AsmError::MissingFeature {
            mnemonic: inst.mnemonic.clone(),
            feature: Feature::Wide.name(),
            span: inst.span,
        });
        return false;
    }
    true
}

/// Narrow data-processing encodings set the flags exactly when executed
/// outside a block, so the spelling must agree with the context.
fn narrow_flags_ok(flags: bool, ctx: &EncodeCtx) -> bool {
    flags != ctx.predicated
}

/// Whether the relaxation engine may take this instruction narrow-first
fn relaxable(inst: &Inst) -> bool {
    inst.forced.is_none()
}

/// Fold a constant into the opcode through the fixup dispatch, so range
/// checking and bit placement live in exactly one place.
fn apply_const(inst: &mut Inst, kind: FixupKind, value: i64) {
    let mut bytes = inst.to_bytes();
    match fixup::apply(kind, &mut bytes, value) {
        Ok(()) => {
            inst.opcode = match inst.size {
                2 => u32::from(u16::from_le_bytes([bytes[0], bytes[1]])),
                _ => {
                    (u32::from(u16::from_le_bytes([bytes[0], bytes[1]])) << 16)
                        | u32::from(u16::from_le_bytes([bytes[2], bytes[3]]))
                }
            };
        }
        Err(error) => inst.record_error(error),
    }
}

/// imm3:imm2:type fields for a wide shifted-register operand
fn wide_shift_bits(inst: &mut Inst, operand: &Operand) -> Option<u32> {
    let Some((op, amount)) = operand.shift else {
        return Some(0);
    };
    let ShiftAmount::Imm(amount) = amount else {
        inst.record_error(AsmError::operand(
            "shift by register is not valid here; use the shift instruction",
            operand.span,
        ));
        return None;
    };
    let ty: u32 = match op {
        ShiftOp::Lsl => 0,
        ShiftOp::Lsr => 1,
        ShiftOp::Asr => 2,
        ShiftOp::Ror => 3,
    };
    let imm5 = u32::from(if amount == 32 { 0 } else { amount });
    Some(((imm5 >> 2) << 12) | ((imm5 & 3) << 6) | (ty << 4))
}

fn encode_mov(inst: &mut Inst, ctx: &EncodeCtx, flags: bool) {
    let rd = inst.operands[0].reg();
    let operand = inst.operands[1];

    match operand.kind {
        OperandKind::Imm(expr) => match expr.as_const() {
            Some(value) => {
                if narrow_allowed(inst)
                    && rd.is_low()
                    && (0..=255).contains(&value)
                    && narrow_flags_ok(flags, ctx)
                {
                    set_narrow(inst, 0x2000 | (rnum(rd) << 8) | value as u32);
                } else if require_wide(inst, ctx) {
                    if value >= 0 && modified_const(value as u32).is_some() {
                        let s = u32::from(flags) << 20;
                        set_wide(inst, 0xF04F_0000 | s | (rnum(rd) << 8));
                        apply_const(inst, FixupKind::ModImm, value);
                    } else if !flags && (0..=0xFFFF).contains(&value) {
                        set_wide(inst, 0xF240_0000 | (rnum(rd) << 8));
                        apply_const(inst, FixupKind::MovwImm16, value);
                    } else {
                        inst.record_error(AsmError::overflow(format!(
                            "immediate {} not encodable in a move",
                            value
                        )));
                    }
                }
            }
            None => {
                if relaxable(inst) && rd.is_low() && narrow_flags_ok(flags, ctx) {
                    inst.set_relax(RelaxKind::MovImm { rd }, expr);
                } else if require_wide(inst, ctx) {
                    set_wide(inst, 0xF240_0000 | (rnum(rd) << 8));
                    inst.add_reloc(FixupKind::MovwImm16, expr, false);
                }
            }
        },
        OperandKind::Reg(rm) => {
            if operand.shifted {
                if require_wide(inst, ctx) {
                    if let Some(shift) = wide_shift_bits(inst, &operand) {
                        let s = u32::from(flags) << 20;
                        set_wide(inst, 0xEA4F_0000 | s | (rnum(rd) << 8) | shift | rnum(rm));
                    }
                }
                return;
            }
            if rd.is_pc() {
                inst.record_error(AsmError::operand(
                    "moves to pc are not supported; use `bx`",
                    inst.operands[0].span,
                ));
                return;
            }
            if rd.is_sp() || rm.is_sp() {
                inst.warn("moves involving sp are deprecated", inst.span);
            }
            if flags {
                if narrow_allowed(inst)
                    && rd.is_low()
                    && rm.is_low()
                    && narrow_flags_ok(true, ctx)
                {
                    // movs rd, rm is the shift-by-zero form
                    set_narrow(inst, (rnum(rm) << 3) | rnum(rd));
                } else if require_wide(inst, ctx) {
                    set_wide(inst, 0xEA4F_0000 | (1 << 20) | (rnum(rd) << 8) | rnum(rm));
                }
            } else if narrow_allowed(inst) {
                // Flag-preserving register move covers high registers
                let d = rnum(rd) >> 3;
                set_narrow(inst, 0x4600 | (d << 7) | (rnum(rm) << 3) | (rnum(rd) & 7));
            } else if require_wide(inst, ctx) {
                set_wide(inst, 0xEA4F_0000 | (rnum(rd) << 8) | rnum(rm));
            }
        }
        _ => unreachable!("flex operand is a register or immediate"),
    }
}

fn encode_cmp(inst: &mut Inst, ctx: &EncodeCtx) {
    let rn = inst.operands[0].reg();
    let operand = inst.operands[1];
    if rn.is_pc() {
        inst.record_error(AsmError::operand(
            "pc is not valid here",
            inst.operands[0].span,
        ));
        return;
    }

    match operand.kind {
        OperandKind::Imm(expr) => match expr.as_const() {
            Some(value) => {
                if narrow_allowed(inst) && rn.is_low() && (0..=255).contains(&value) {
                    set_narrow(inst, 0x2800 | (rnum(rn) << 8) | value as u32);
                } else if require_wide(inst, ctx) {
                    set_wide(inst, 0xF1B0_0F00 | (rnum(rn) << 16));
                    apply_const(inst, FixupKind::ModImm, value);
                }
            }
            None => {
                if relaxable(inst) && rn.is_low() {
                    inst.set_relax(RelaxKind::CmpImm { rn }, expr);
                } else if require_wide(inst, ctx) {
                    set_wide(inst, 0xF1B0_0F00 | (rnum(rn) << 16));
                    inst.add_reloc(FixupKind::ModImm, expr, false);
                }
            }
        },
        OperandKind::Reg(rm) => {
            if operand.shifted {
                if require_wide(inst, ctx) {
                    if let Some(shift) = wide_shift_bits(inst, &operand) {
                        set_wide(inst, 0xEBB0_0F00 | (rnum(rn) << 16) | shift | rnum(rm));
                    }
                }
            } else if narrow_allowed(inst) && rn.is_low() && rm.is_low() {
                set_narrow(inst, 0x4280 | (rnum(rm) << 3) | rnum(rn));
            } else if narrow_allowed(inst) {
                let n = rnum(rn) >> 3;
                set_narrow(inst, 0x4500 | (n << 7) | (rnum(rm) << 3) | (rnum(rn) & 7));
            } else if require_wide(inst, ctx) {
                set_wide(inst, 0xEBB0_0F00 | (rnum(rn) << 16) | rnum(rm));
            }
        }
        _ => unreachable!("flex operand is a register or immediate"),
    }
}

fn encode_add_sub(inst: &mut Inst, ctx: &EncodeCtx, sub: bool, flags: bool) {
    let rd = inst.operands[0].reg();
    let rn = if inst.operands[1].present {
        inst.operands[1].reg()
    } else {
        rd
    };
    let operand = inst.operands[2];

    match operand.kind {
        OperandKind::Imm(expr) => match expr.as_const() {
            Some(value) => {
                // A negative immediate flips the operation
                let (sub, value) = if value < 0 { (!sub, -value) } else { (sub, value) };
                let narrow_base_imm8: u32 = if sub { 0x3800 } else { 0x3000 };
                let narrow_base_imm3: u32 = if sub { 0x1E00 } else { 0x1C00 };
                if narrow_allowed(inst)
                    && rd.is_low()
                    && rn == rd
                    && (0..=255).contains(&value)
                    && narrow_flags_ok(flags, ctx)
                {
                    set_narrow(inst, narrow_base_imm8 | (rnum(rd) << 8) | value as u32);
                } else if narrow_allowed(inst)
                    && rd.is_low()
                    && rn.is_low()
                    && (0..=7).contains(&value)
                    && narrow_flags_ok(flags, ctx)
                {
                    set_narrow(
                        inst,
                        narrow_base_imm3 | ((value as u32) << 6) | (rnum(rn) << 3) | rnum(rd),
                    );
                } else if require_wide(inst, ctx) {
                    if !flags && (0..=0xFFF).contains(&value) {
                        let base: u32 = if sub { 0xF2A0_0000 } else { 0xF200_0000 };
                        set_wide(inst, base | (rnum(rn) << 16) | (rnum(rd) << 8));
                        apply_const(inst, FixupKind::AddSubWImm12, value);
                    } else if modified_const(value as u32).is_some() {
                        let base: u32 = if sub { 0xF1A0_0000 } else { 0xF100_0000 };
                        let s = u32::from(flags) << 20;
                        set_wide(inst, base | s | (rnum(rn) << 16) | (rnum(rd) << 8));
                        apply_const(inst, FixupKind::ModImm, value);
                    } else {
                        inst.record_error(AsmError::overflow(format!(
                            "immediate {} not encodable in add/sub",
                            value
                        )));
                    }
                }
            }
            None => {
                if relaxable(inst)
                    && rd.is_low()
                    && rn.is_low()
                    && narrow_flags_ok(flags, ctx)
                {
                    inst.set_relax(RelaxKind::AddSubImm { rd, rn, sub }, expr);
                } else if require_wide(inst, ctx) {
                    let base: u32 = if sub { 0xF2A0_0000 } else { 0xF200_0000 };
                    set_wide(inst, base | (rnum(rn) << 16) | (rnum(rd) << 8));
                    inst.add_reloc(FixupKind::AddSubWImm12, expr, false);
                }
            }
        },
        OperandKind::Reg(rm) => {
            if operand.shifted {
                if require_wide(inst, ctx) {
                    if let Some(shift) = wide_shift_bits(inst, &operand) {
                        let base: u32 = if sub { 0xEBA0_0000 } else { 0xEB00_0000 };
                        let s = u32::from(flags) << 20;
                        set_wide(
                            inst,
                            base | s | (rnum(rn) << 16) | (rnum(rd) << 8) | shift | rnum(rm),
                        );
                    }
                }
                return;
            }
            let narrow_base: u32 = if sub { 0x1A00 } else { 0x1800 };
            if narrow_allowed(inst)
                && rd.is_low()
                && rn.is_low()
                && rm.is_low()
                && narrow_flags_ok(flags, ctx)
            {
                set_narrow(
                    inst,
                    narrow_base | (rnum(rm) << 6) | (rnum(rn) << 3) | rnum(rd),
                );
            } else if narrow_allowed(inst) && !sub && !flags && rn == rd {
                // High-register add, any combination
                let d = rnum(rd) >> 3;
                set_narrow(inst, 0x4400 | (d << 7) | (rnum(rm) << 3) | (rnum(rd) & 7));
            } else if require_wide(inst, ctx) {
                let base: u32 = if sub { 0xEBA0_0000 } else { 0xEB00_0000 };
                let s = u32::from(flags) << 20;
                set_wide(inst, base | s | (rnum(rn) << 16) | (rnum(rd) << 8) | rnum(rm));
            }
        }
        _ => unreachable!("flex operand is a register or immediate"),
    }
}

fn encode_logical(inst: &mut Inst, ctx: &EncodeCtx, op: LogicalOp, flags: bool) {
    let rd = inst.operands[0].reg();
    let rn = if inst.operands[1].present {
        inst.operands[1].reg()
    } else {
        rd
    };
    let rm = inst.operands[2].reg();

    let narrow_base: u32 = match op {
        LogicalOp::And => 0x4000,
        LogicalOp::Eor => 0x4040,
        LogicalOp::Orr => 0x4300,
        LogicalOp::Bic => 0x4380,
    };
    if narrow_allowed(inst)
        && rn == rd
        && rd.is_low()
        && rm.is_low()
        && narrow_flags_ok(flags, ctx)
    {
        set_narrow(inst, narrow_base | (rnum(rm) << 3) | rnum(rd));
        return;
    }
    if require_wide(inst, ctx) {
        let wide_base: u32 = match op {
            LogicalOp::And => 0xEA00_0000,
            LogicalOp::Bic => 0xEA20_0000,
            LogicalOp::Orr => 0xEA40_0000,
            LogicalOp::Eor => 0xEA80_0000,
        };
        let s = u32::from(flags) << 20;
        set_wide(
            inst,
            wide_base | s | (rnum(rn) << 16) | (rnum(rd) << 8) | rnum(rm),
        );
    }
}

fn encode_shift(inst: &mut Inst, ctx: &EncodeCtx, op: ShiftOp, flags: bool) {
    let rd = inst.operands[0].reg();
    let rm = inst.operands[1].reg();

    if inst.operands[2].present {
        // Immediate-shift form
        let Some(amount) = inst.operands[2].imm().as_const() else {
            inst.record_error(AsmError::operand(
                "shift amount must be a constant",
                inst.operands[2].span,
            ));
            return;
        };
        let valid = match op {
            ShiftOp::Lsl => (0..=31).contains(&amount),
            ShiftOp::Lsr | ShiftOp::Asr => (1..=32).contains(&amount),
            ShiftOp::Ror => (1..=31).contains(&amount),
        };
        if !valid {
            inst.record_error(AsmError::operand(
                format!("shift amount {} out of range", amount),
                inst.operands[2].span,
            ));
            return;
        }
        let imm5 = if amount == 32 { 0 } else { amount as u32 };
        let narrow_base = match op {
            ShiftOp::Lsl => Some(0x0000),
            ShiftOp::Lsr => Some(0x0800),
            ShiftOp::Asr => Some(0x1000),
            ShiftOp::Ror => None,
        };
        if let Some(base) = narrow_base {
            if narrow_allowed(inst)
                && rd.is_low()
                && rm.is_low()
                && narrow_flags_ok(flags, ctx)
            {
                set_narrow(inst, base | (imm5 << 6) | (rnum(rm) << 3) | rnum(rd));
                return;
            }
        }
        if require_wide(inst, ctx) {
            let ty: u32 = match op {
                ShiftOp::Lsl => 0,
                ShiftOp::Lsr => 1,
                ShiftOp::Asr => 2,
                ShiftOp::Ror => 3,
            };
            let s = u32::from(flags) << 20;
            set_wide(
                inst,
                0xEA4F_0000
                    | s
                    | (rnum(rd) << 8)
                    | ((imm5 >> 2) << 12)
                    | ((imm5 & 3) << 6)
                    | (ty << 4)
                    | rnum(rm),
            );
        }
        return;
    }

    // Register-shift form: rdn, rs
    let rs = rm;
    let narrow_base: u32 = match op {
        ShiftOp::Lsl => 0x4080,
        ShiftOp::Lsr => 0x40C0,
        ShiftOp::Asr => 0x4100,
        ShiftOp::Ror => 0x41C0,
    };
    if narrow_allowed(inst) && rd.is_low() && rs.is_low() && narrow_flags_ok(flags, ctx) {
        set_narrow(inst, narrow_base | (rnum(rs) << 3) | rnum(rd));
    } else if require_wide(inst, ctx) {
        let ty: u32 = match op {
            ShiftOp::Lsl => 0,
            ShiftOp::Lsr => 1,
            ShiftOp::Asr => 2,
            ShiftOp::Ror => 3,
        };
        let s = u32::from(flags) << 20;
        set_wide(
            inst,
            0xFA00_F000 | (ty << 21) | s | (rnum(rd) << 16) | (rnum(rd) << 8) | rnum(rs),
        );
    }
}

fn encode_mul(inst: &mut Inst, ctx: &EncodeCtx, flags: bool) {
    let rd = inst.operands[0].reg();
    let mut rn = inst.operands[1].reg();
    // Omitting the final operand repeats the destination
    let mut rm = if inst.operands[2].present {
        inst.operands[2].reg()
    } else {
        rd
    };

    // The narrow form needs rd == rm; multiplication commutes
    if rm != rd && rn == rd {
        std::mem::swap(&mut rn, &mut rm);
    }

    if narrow_allowed(inst)
        && rd == rm
        && rd.is_low()
        && rn.is_low()
        && narrow_flags_ok(flags, ctx)
    {
        set_narrow(inst, 0x4340 | (rnum(rn) << 3) | rnum(rd));
        return;
    }
    if flags {
        inst.record_error(AsmError::operand(
            "flag-setting multiply requires the destination to repeat as the last operand",
            inst.span,
        ));
        return;
    }
    if require_wide(inst, ctx) {
        set_wide(inst, 0xFB00_F000 | (rnum(rn) << 16) | (rnum(rd) << 8) | rnum(rm));
    }
}

fn encode_load_store(inst: &mut Inst, ctx: &EncodeCtx, load: bool, size: LsSize) {
    let rt = inst.operands[0].reg();
    let operand = inst.operands[1];

    if operand.align.is_some() {
        inst.record_error(AsmError::operand(
            "alignment is not permitted with this instruction",
            operand.span,
        ));
        return;
    }

    match operand.kind {
        // Literal reference: pc-relative load
        OperandKind::Target(expr) => {
            if !load {
                inst.record_error(AsmError::operand(
                    "cannot store to a pc-relative literal",
                    operand.span,
                ));
                return;
            }
            match size {
                LsSize::Word => {
                    if relaxable(inst) && rt.is_low() {
                        inst.set_relax(RelaxKind::LoadLit { rt }, expr);
                    } else if require_wide(inst, ctx) {
                        set_wide(inst, 0xF85F_0000 | (1 << 23) | (rnum(rt) << 12));
                        inst.add_reloc(FixupKind::PcRelLoadWide, expr, true);
                    }
                }
                LsSize::Byte => {
                    if require_wide(inst, ctx) {
                        set_wide(inst, 0xF81F_0000 | (1 << 23) | (rnum(rt) << 12));
                        inst.add_reloc(FixupKind::PcRelLoadWide, expr, true);
                    }
                }
            }
        }
        OperandKind::Mem {
            base,
            offset,
            post_index,
        } => encode_mem_access(inst, ctx, load, size, rt, base, offset, post_index, &operand),
        _ => unreachable!("memory shape yields a literal or memory operand"),
    }
}

#[allow(clippy::too_many_arguments)]
fn encode_mem_access(
    inst: &mut Inst,
    ctx: &EncodeCtx,
    load: bool,
    size: LsSize,
    rt: Register,
    base: Register,
    offset: MemOffset,
    post_index: bool,
    operand: &Operand,
) {
    if base.is_pc() {
        inst.record_error(AsmError::operand(
            "pc-relative addressing requires a label operand",
            operand.span,
        ));
        return;
    }
    if load && operand.writeback && base == rt {
        inst.record_error(AsmError::operand(
            "load with writeback into the base register is unpredictable",
            operand.span,
        ));
        return;
    }
    if rt.is_pc() && (size == LsSize::Byte || !load) {
        inst.record_error(AsmError::operand("pc is not valid here", operand.span));
        return;
    }
    if load && rt.is_pc() {
        // Loading pc is a branch; inside a block it must come last
        inst.pred_class = PredClass::LastInBlock;
    }

    // Indexed forms with writeback only exist wide
    if operand.writeback || post_index {
        let MemOffset::Imm(expr) = offset else {
            inst.record_error(AsmError::operand(
                "register offsets cannot write back",
                operand.span,
            ));
            return;
        };
        let Some(value) = expr.as_const() else {
            inst.record_error(AsmError::operand(
                "writeback offset must be a constant",
                operand.span,
            ));
            return;
        };
        if value.abs() > 255 {
            inst.record_error(AsmError::overflow(format!(
                "indexed offset {} is outside -255..=255",
                value
            )));
            return;
        }
        if !require_wide(inst, ctx) {
            return;
        }
        let family: u32 = match (load, size) {
            (true, LsSize::Word) => 0xF850_0800,
            (false, LsSize::Word) => 0xF840_0800,
            (true, LsSize::Byte) => 0xF810_0800,
            (false, LsSize::Byte) => 0xF800_0800,
        };
        let p = u32::from(!post_index) << 10;
        let u = u32::from(value >= 0) << 9;
        let w = 1u32 << 8;
        set_wide(
            inst,
            family | (rnum(base) << 16) | (rnum(rt) << 12) | p | u | w | value.unsigned_abs() as u32,
        );
        return;
    }

    match offset {
        MemOffset::Reg(rm) => {
            if operand.negative {
                inst.record_error(AsmError::operand(
                    "negative register offsets are not supported",
                    operand.span,
                ));
                return;
            }
            let narrow_base: u32 = match (load, size) {
                (true, LsSize::Word) => 0x5800,
                (false, LsSize::Word) => 0x5000,
                (true, LsSize::Byte) => 0x5C00,
                (false, LsSize::Byte) => 0x5400,
            };
            if narrow_allowed(inst) && rt.is_low() && base.is_low() && rm.is_low() {
                set_narrow(inst, narrow_base | (rnum(rm) << 6) | (rnum(base) << 3) | rnum(rt));
            } else if require_wide(inst, ctx) {
                let family: u32 = match (load, size) {
                    (true, LsSize::Word) => 0xF850_0000,
                    (false, LsSize::Word) => 0xF840_0000,
                    (true, LsSize::Byte) => 0xF810_0000,
                    (false, LsSize::Byte) => 0xF800_0000,
                };
                set_wide(inst, family | (rnum(base) << 16) | (rnum(rt) << 12) | rnum(rm));
            }
        }
        MemOffset::Imm(expr) => match expr.as_const() {
            Some(value) => encode_mem_const(inst, ctx, load, size, rt, base, value),
            None => {
                let narrow_feasible = rt.is_low()
                    && (base.is_low() || (base.is_sp() && size == LsSize::Word));
                if relaxable(inst) && narrow_feasible {
                    inst.set_relax(
                        RelaxKind::LoadStoreImm {
                            rt,
                            base,
                            load,
                            size,
                        },
                        expr,
                    );
                } else if require_wide(inst, ctx) {
                    let family: u32 = wide_mem_imm12_base(load, size);
                    set_wide(inst, family | (rnum(base) << 16) | (rnum(rt) << 12));
                    inst.add_reloc(FixupKind::LoadStoreImm12, expr, false);
                }
            }
        },
    }
}

fn wide_mem_imm12_base(load: bool, size: LsSize) -> u32 {
    match (load, size) {
        (true, LsSize::Word) => 0xF8D0_0000,
        (false, LsSize::Word) => 0xF8C0_0000,
        (true, LsSize::Byte) => 0xF890_0000,
        (false, LsSize::Byte) => 0xF880_0000,
    }
}

fn encode_mem_const(
    inst: &mut Inst,
    ctx: &EncodeCtx,
    load: bool,
    size: LsSize,
    rt: Register,
    base: Register,
    value: i64,
) {
    if value < 0 {
        // Negative offsets only exist in the wide indexed form
        if value < -255 {
            inst.record_error(AsmError::overflow(format!(
                "negative offset {} is outside -255..=0",
                value
            )));
            return;
        }
        if require_wide(inst, ctx) {
            let family: u32 = match (load, size) {
                (true, LsSize::Word) => 0xF850_0800,
                (false, LsSize::Word) => 0xF840_0800,
                (true, LsSize::Byte) => 0xF810_0800,
                (false, LsSize::Byte) => 0xF800_0800,
            };
            let p = 1u32 << 10;
            set_wide(
                inst,
                family | (rnum(base) << 16) | (rnum(rt) << 12) | p | (-value) as u32,
            );
        }
        return;
    }

    if narrow_allowed(inst) && rt.is_low() {
        if base.is_sp() && size == LsSize::Word && value <= 1020 && value % 4 == 0 {
            let op: u32 = if load { 0x9800 } else { 0x9000 };
            set_narrow(inst, op | (rnum(rt) << 8) | (value as u32 >> 2));
            return;
        }
        if base.is_low() {
            match size {
                LsSize::Word if value <= 124 && value % 4 == 0 => {
                    let op: u32 = if load { 0x6800 } else { 0x6000 };
                    set_narrow(
                        inst,
                        op | ((value as u32 >> 2) << 6) | (rnum(base) << 3) | rnum(rt),
                    );
                    return;
                }
                LsSize::Byte if value <= 31 => {
                    let op: u32 = if load { 0x7800 } else { 0x7000 };
                    set_narrow(inst, op | ((value as u32) << 6) | (rnum(base) << 3) | rnum(rt));
                    return;
                }
                _ => {}
            }
        }
    }

    if value > 0xFFF {
        inst.record_error(AsmError::overflow(format!(
            "offset {} is outside 0..=4095",
            value
        )));
        return;
    }
    if require_wide(inst, ctx) {
        set_wide(
            inst,
            wide_mem_imm12_base(load, size) | (rnum(base) << 16) | (rnum(rt) << 12),
        );
        apply_const(inst, FixupKind::LoadStoreImm12, value);
    }
}

fn encode_multi(inst: &mut Inst, ctx: &EncodeCtx, load: bool) {
    let base = inst.operands[0].reg();
    let writeback = inst.operands[0].writeback;
    let OperandKind::RegList(mask) = inst.operands[1].kind else {
        unreachable!("register list shape")
    };
    let base_in_list = mask & (1 << base.num()) != 0;

    if mask & (1 << 13) != 0 {
        inst.record_error(AsmError::operand(
            "sp is not allowed in a register list",
            inst.operands[1].span,
        ));
        return;
    }
    if load && writeback && base_in_list {
        inst.record_error(AsmError::operand(
            "load multiple with writeback and the base in the list is unpredictable",
            inst.operands[1].span,
        ));
        return;
    }
    if !load {
        if mask & (1 << 15) != 0 {
            inst.record_error(AsmError::operand(
                "pc is not allowed in a store list",
                inst.operands[1].span,
            ));
            return;
        }
        if base_in_list && mask & ((1 << base.num()) - 1) != 0 {
            inst.warn(
                "storing a base register that is not first in the list leaves its memory value unknown",
                inst.operands[1].span,
            );
        }
    }
    if load && mask & (1 << 15) != 0 {
        if mask & (1 << 14) != 0 {
            inst.record_error(AsmError::operand(
                "pc and lr may not both appear in a load list",
                inst.operands[1].span,
            ));
            return;
        }
        // Loading pc is a branch; inside a block it must come last
        inst.pred_class = PredClass::LastInBlock;
    }

    let narrow_list = mask & 0xFF00 == 0;
    if narrow_allowed(inst) && base.is_low() && narrow_list {
        if !load && !writeback {
            inst.record_error(AsmError::operand(
                "store multiple requires writeback (`!`) in the narrow form",
                inst.operands[0].span,
            ));
            return;
        }
        if load && !writeback && !base_in_list {
            inst.record_error(AsmError::operand(
                "load multiple without writeback requires the base in the list",
                inst.operands[0].span,
            ));
            return;
        }
        let op: u32 = if load { 0xC800 } else { 0xC000 };
        set_narrow(inst, op | (rnum(base) << 8) | u32::from(mask & 0xFF));
        return;
    }

    if require_wide(inst, ctx) {
        let op: u32 = if load { 0xE890_0000 } else { 0xE880_0000 };
        let w = u32::from(writeback) << 21;
        set_wide(inst, op | w | (rnum(base) << 16) | u32::from(mask));
    }
}

fn encode_push_pop(inst: &mut Inst, ctx: &EncodeCtx, pop: bool) {
    let OperandKind::RegList(mask) = inst.operands[0].kind else {
        unreachable!("register list shape")
    };
    let span = inst.operands[0].span;

    if mask & (1 << 13) != 0 {
        inst.record_error(AsmError::operand("sp is not allowed in a register list", span));
        return;
    }
    if pop {
        if mask & (1 << 15) != 0 && mask & (1 << 14) != 0 {
            inst.record_error(AsmError::operand(
                "pc and lr may not both appear in a pop list",
                span,
            ));
            return;
        }
        if mask & (1 << 15) != 0 {
            inst.pred_class = PredClass::LastInBlock;
        }
    } else if mask & (1 << 15) != 0 {
        inst.record_error(AsmError::operand("pc cannot be pushed", span));
        return;
    }

    let link_bit: u16 = if pop { 1 << 15 } else { 1 << 14 };
    let narrow_ok = mask & !(0xFF | link_bit) == 0;
    if narrow_allowed(inst) && narrow_ok {
        let marker = u32::from(mask & link_bit != 0) << 8;
        let op: u32 = if pop { 0xBC00 } else { 0xB400 };
        set_narrow(inst, op | marker | u32::from(mask & 0xFF));
        return;
    }

    if require_wide(inst, ctx) {
        let op: u32 = if pop { 0xE8BD_0000 } else { 0xE92D_0000 };
        set_wide(inst, op | u32::from(mask));
    }
}

fn encode_branch(inst: &mut Inst, ctx: &EncodeCtx, link: bool) {
    let expr = match inst.operands[0].kind {
        OperandKind::Target(e) => e,
        _ => unreachable!("branch target shape"),
    };

    if link {
        // Branch-and-link is wide-only
        if !require_wide(inst, ctx) {
            return;
        }
        set_wide(inst, 0xF000_D000);
        inst.add_reloc(FixupKind::BranchWide, expr, true);
        return;
    }

    // Inside a block the condition comes from the block, so the plain
    // encoding with the larger range is used
    let cond = if ctx.in_block || inst.cond == Cond::Al {
        None
    } else {
        Some(inst.cond)
    };

    match inst.forced {
        None => inst.set_relax(RelaxKind::Branch { cond }, expr),
        Some(Width::Narrow) => {
            let (opcode, kind) = match cond {
                Some(c) => (
                    0xD000 | (u32::from(c.bits()) << 8),
                    FixupKind::CondBranchNarrow,
                ),
                None => (0xE000, FixupKind::BranchNarrow),
            };
            set_narrow(inst, opcode);
            inst.add_reloc(kind, expr, true);
        }
        Some(Width::Wide) => {
            if !require_wide(inst, ctx) {
                return;
            }
            let (opcode, kind) = match cond {
                Some(c) => (
                    0xF000_8000 | (u32::from(c.bits()) << 22),
                    FixupKind::CondBranchWide,
                ),
                None => (0xF000_9000, FixupKind::BranchWide),
            };
            set_wide(inst, opcode);
            inst.add_reloc(kind, expr, true);
        }
    }
}

fn encode_bx(inst: &mut Inst) {
    let rm = inst.operands[0].reg();
    if rm.is_pc() {
        inst.warn("`bx pc` is deprecated", inst.operands[0].span);
    }
    set_narrow(inst, 0x4700 | (rnum(rm) << 3));
}

fn encode_adr(inst: &mut Inst, ctx: &EncodeCtx) {
    let rd = inst.operands[0].reg();
    let expr = inst.operands[1].imm();
    if rd.is_sp() || rd.is_pc() {
        inst.record_error(AsmError::operand(
            "sp and pc are not valid destinations here",
            inst.operands[0].span,
        ));
        return;
    }
    if relaxable(inst) && rd.is_low() {
        inst.set_relax(RelaxKind::Adr { rd }, expr);
    } else if require_wide(inst, ctx) {
        set_wide(inst, 0xF20F_0000 | (rnum(rd) << 8));
        inst.add_reloc(FixupKind::AdrWide, expr, true);
    }
}

fn encode_block_start(inst: &mut Inst, pattern: crate::catalog::BlockPattern) {
    let OperandKind::Cond(cond) = inst.operands[0].kind else {
        unreachable!("condition shape")
    };
    if cond == Cond::Al && pattern.else_mask != 0 {
        inst.record_error(AsmError::operand(
            "`al` condition cannot take else slots",
            inst.operands[0].span,
        ));
        return;
    }
    set_narrow(
        inst,
        encode_block_start_opcode(cond, pattern.len, pattern.else_mask),
    );
    inst.block_open = Some(BlockSpec {
        vector: false,
        base: cond,
        len: pattern.len,
        else_mask: pattern.else_mask,
    });
}

fn encode_vector_block_start(inst: &mut Inst, pattern: crate::catalog::BlockPattern) {
    let mut mask = 1u32 << (4 - pattern.len);
    for slot in 1..pattern.len {
        if pattern.else_mask & (1 << slot) != 0 {
            mask |= 1 << (4 - slot);
        }
    }
    set_wide(inst, 0xFE31_0F00 | mask);
    inst.block_open = Some(BlockSpec {
        vector: true,
        base: Cond::Al,
        len: pattern.len,
        else_mask: pattern.else_mask,
    });
}

fn encode_vec_arith(inst: &mut Inst, sub: bool) {
    let Some(elem) = inst.elem else {
        inst.record_error(AsmError::operand(
            "vector arithmetic requires an element type (`.i8`, `.i16`, `.i32`)",
            inst.span,
        ));
        return;
    };
    let qd = u32::from(inst.operands[0].qreg().num());
    let qn = u32::from(inst.operands[1].qreg().num());
    let qm = u32::from(inst.operands[2].qreg().num());
    let base: u32 = if sub { 0xFF00_0840 } else { 0xEF00_0840 };
    set_wide(
        inst,
        base | (elem.size_bits() << 20) | (qn << 16) | (qd << 12) | qm,
    );
    // Classification depends on the spelled predicate, which the catalog
    // cannot know
    inst.pred_class = if inst.vpred.is_some() {
        PredClass::InBlock
    } else {
        PredClass::Neutral
    };
}

fn encode_exception(inst: &mut Inst, svc: bool) {
    let value = if inst.operands[0].present {
        match inst.operands[0].imm().as_const() {
            Some(v) => v,
            None => {
                inst.record_error(AsmError::operand(
                    "exception number must be a constant",
                    inst.operands[0].span,
                ));
                return;
            }
        }
    } else {
        0
    };
    if !(0..=255).contains(&value) {
        inst.record_error(AsmError::overflow(format!(
            "exception number {} is outside 0..=255",
            value
        )));
        return;
    }
    let op: u32 = if svc { 0xDF00 } else { 0xBE00 };
    set_narrow(inst, op | value as u32);
    if !svc {
        // Breakpoints fire regardless of predication
        inst.pred_class = PredClass::Neutral;
    }
}

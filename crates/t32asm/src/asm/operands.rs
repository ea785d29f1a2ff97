//! Shape-directed operand matching
//!
//! The matcher walks the descriptor's shape list left to right, invoking
//! one sub-parser per shape. Exactly one rewind point is live at a time:
//! entering an optional shape snapshots the cursor, the operand count and
//! the pending-error state. When a later mandatory shape fails, the
//! matcher restores that snapshot, marks the optional operand absent and
//! resumes after it. A second failure with no snapshot left fails the
//! match outright.

use crate::catalog::{Shape, ShiftOp};
use crate::common::{AsmError, AsmResult};
use crate::isa::{Cond, QReg, Register};
use crate::syntax::{Cursor, TokenKind};

use super::inst::{Inst, MemOffset, Operand, OperandKind, ShiftAmount, Width};
use super::symbols::{Expr, SymbolTable};

struct Rewind {
    shape_index: usize,
    cursor: crate::syntax::Checkpoint,
    operands: usize,
    error: Option<AsmError>,
}

/// Match the operand list against the shapes, filling the accumulator.
/// Returns false when the line failed; the first diagnostic (net of any
/// rolled-back speculative attempt) is left on the accumulator.
pub fn match_operands(
    inst: &mut Inst,
    shapes: &[Shape],
    cursor: &mut Cursor,
    symtab: &mut SymbolTable,
) -> bool {
    let wide = inst.forced == Some(Width::Wide);
    let mut rewind: Option<Rewind> = None;

    let mut index = 0;
    while index < shapes.len() {
        let shape = shapes[index];
        if shape.is_optional() {
            // Most recent optional shape wins the single rewind slot
            rewind = Some(Rewind {
                shape_index: index,
                cursor: cursor.checkpoint(),
                operands: inst.operands.len(),
                error: inst.error_checkpoint(),
            });
        }

        match parse_operand(inst, shape, index > 0, cursor, symtab, wide) {
            Ok(operand) => {
                inst.operands.push(operand);
                index += 1;
            }
            Err(error) => {
                inst.record_error(error);
                match rewind.take() {
                    Some(rw) => {
                        cursor.rewind(rw.cursor);
                        inst.operands.truncate(rw.operands);
                        inst.restore_error(rw.error);
                        inst.operands.push(Operand::absent());
                        index = rw.shape_index + 1;
                    }
                    // No rewind point left: the match fails as-is
                    None => return false,
                }
            }
        }
    }

    if !cursor.at_end() {
        inst.record_error(AsmError::syntax(
            "extra characters after operands",
            cursor.here(),
        ));
        return false;
    }
    inst.error().is_none()
}

fn parse_operand(
    inst: &mut Inst,
    shape: Shape,
    need_comma: bool,
    cursor: &mut Cursor,
    symtab: &mut SymbolTable,
    wide: bool,
) -> AsmResult<Operand> {
    if need_comma && !cursor.eat(&TokenKind::Comma) {
        return Err(AsmError::syntax("expected `,`", cursor.here()));
    }

    let start = cursor.checkpoint();
    let mut operand = match shape {
        Shape::RegLo | Shape::OptRegLo => {
            let reg = parse_reg(cursor)?;
            if !reg.is_low() && !wide {
                return Err(AsmError::operand(
                    format!("`{}` is not a low register (r0-r7)", reg),
                    cursor.here(),
                ));
            }
            Operand {
                kind: OperandKind::Reg(reg),
                ..Operand::default()
            }
        }
        Shape::Reg => Operand {
            kind: OperandKind::Reg(parse_reg(cursor)?),
            ..Operand::default()
        },
        Shape::RegWb => {
            let reg = parse_reg(cursor)?;
            if !reg.is_low() && !reg.is_sp() && !wide {
                return Err(AsmError::operand(
                    format!("`{}` is not usable as a narrow base register", reg),
                    cursor.here(),
                ));
            }
            let writeback = cursor.eat(&TokenKind::Bang);
            Operand {
                kind: OperandKind::Reg(reg),
                writeback,
                ..Operand::default()
            }
        }
        Shape::QReg => {
            let name = cursor
                .eat_ident()
                .ok_or_else(|| AsmError::operand("expected a vector register", cursor.here()))?;
            let qreg = QReg::parse(&name).ok_or_else(|| {
                AsmError::operand(format!("`{}` is not a vector register", name), cursor.here())
            })?;
            Operand {
                kind: OperandKind::QReg(qreg),
                elem: inst.elem,
                ..Operand::default()
            }
        }
        Shape::Imm | Shape::OptImm => {
            cursor.eat(&TokenKind::Hash);
            let expr = parse_expr(cursor, symtab)?;
            Operand {
                kind: OperandKind::Imm(expr),
                negative: expr.as_const().is_some_and(|v| v < 0),
                ..Operand::default()
            }
        }
        Shape::Flex => parse_flex(inst, cursor, symtab)?,
        Shape::Target => Operand {
            kind: OperandKind::Target(parse_expr(cursor, symtab)?),
            ..Operand::default()
        },
        Shape::Mem => parse_mem(cursor, symtab)?,
        Shape::RegList => parse_reg_list(inst, cursor)?,
        Shape::CondName => {
            let name = cursor
                .eat_ident()
                .ok_or_else(|| AsmError::operand("expected a condition", cursor.here()))?;
            let cond = Cond::from_suffix(&name).ok_or_else(|| {
                AsmError::operand(format!("`{}` is not a condition", name), cursor.here())
            })?;
            Operand {
                kind: OperandKind::Cond(cond),
                ..Operand::default()
            }
        }
    };

    operand.present = true;
    operand.span = cursor.span_since(start);
    Ok(operand)
}

fn parse_reg(cursor: &mut Cursor) -> AsmResult<Register> {
    let span = cursor.here();
    let name = cursor
        .eat_ident()
        .ok_or_else(|| AsmError::operand("expected a register", span))?;
    Register::parse(&name)
        .ok_or_else(|| AsmError::operand(format!("`{}` is not a register", name), span))
}

/// Symbol with optional constant offset, or a plain constant
fn parse_expr(cursor: &mut Cursor, symtab: &mut SymbolTable) -> AsmResult<Expr> {
    let span = cursor.here();
    let negative = cursor.eat(&TokenKind::Minus);
    if matches!(cursor.peek(), Some(TokenKind::Number(_))) {
        let value = parse_number(cursor)?;
        return Ok(Expr::constant(if negative { -value } else { value }));
    }
    if !negative && matches!(cursor.peek(), Some(TokenKind::Ident(_))) {
        let name = cursor.eat_ident().expect("peeked an identifier");
        if Register::parse(&name).is_some() {
            return Err(AsmError::operand(
                format!("`{}` is a register, expected an expression", name),
                span,
            ));
        }
        let sym = symtab.intern(&name);
        let mut addend = 0i64;
        if cursor.eat(&TokenKind::Plus) {
            addend = parse_number(cursor)?;
        } else if cursor.eat(&TokenKind::Minus) {
            addend = -parse_number(cursor)?;
        }
        return Ok(Expr::symbol(sym, addend));
    }
    Err(AsmError::operand("expected an expression", span))
}

fn parse_number(cursor: &mut Cursor) -> AsmResult<i64> {
    let span = cursor.here();
    match cursor.bump().map(|t| t.kind.clone()) {
        Some(TokenKind::Number(value)) => Ok(value),
        _ => Err(AsmError::operand("expected a number", span)),
    }
}

/// Flexible second operand: `#imm`, or a register with an optional shift
fn parse_flex(
    inst: &mut Inst,
    cursor: &mut Cursor,
    symtab: &mut SymbolTable,
) -> AsmResult<Operand> {
    let span = cursor.here();
    let is_reg = matches!(cursor.peek(), Some(TokenKind::Ident(name)) if Register::parse(name).is_some());
    if !is_reg {
        cursor.eat(&TokenKind::Hash);
        let expr = parse_expr(cursor, symtab)?;
        return Ok(Operand {
            kind: OperandKind::Imm(expr),
            negative: expr.as_const().is_some_and(|v| v < 0),
            ..Operand::default()
        });
    }

    let reg = parse_reg(cursor)?;
    if reg.is_pc() {
        return Err(AsmError::operand("pc is not valid here", span));
    }
    if reg.is_sp() {
        inst.warn("use of sp here is deprecated", span);
    }

    let mut operand = Operand {
        kind: OperandKind::Reg(reg),
        ..Operand::default()
    };

    // A following `, lsl #n` belongs to this operand; a plain `, r2`
    // belongs to the next one.
    let checkpoint = cursor.checkpoint();
    if cursor.eat(&TokenKind::Comma) {
        match cursor.eat_ident().as_deref().and_then(shift_op) {
            Some(op) => {
                let amount = parse_shift_amount(op, cursor)?;
                operand.shifted = true;
                operand.shift = Some((op, amount));
            }
            None => cursor.rewind(checkpoint),
        }
    }
    Ok(operand)
}

fn shift_op(name: &str) -> Option<ShiftOp> {
    match name.to_ascii_lowercase().as_str() {
        "lsl" => Some(ShiftOp::Lsl),
        "lsr" => Some(ShiftOp::Lsr),
        "asr" => Some(ShiftOp::Asr),
        "ror" => Some(ShiftOp::Ror),
        _ => None,
    }
}

fn parse_shift_amount(op: ShiftOp, cursor: &mut Cursor) -> AsmResult<ShiftAmount> {
    let span = cursor.here();
    if matches!(cursor.peek(), Some(TokenKind::Ident(name)) if Register::parse(name).is_some()) {
        return Ok(ShiftAmount::Reg(parse_reg(cursor)?));
    }
    cursor.eat(&TokenKind::Hash);
    let value = parse_number(cursor)?;
    let valid = match op {
        ShiftOp::Lsl => (0..=31).contains(&value),
        ShiftOp::Lsr | ShiftOp::Asr => (1..=32).contains(&value),
        ShiftOp::Ror => (1..=31).contains(&value),
    };
    if !valid {
        return Err(AsmError::operand(
            format!("shift amount {} out of range", value),
            span,
        ));
    }
    Ok(ShiftAmount::Imm(value as u8))
}

/// Memory operand: `[rn]`, `[rn, #imm]`, `[rn, rm]`, `[rn, #imm]!`,
/// `[rn], #imm`, with an optional `:align` on the base. A bare
/// expression is a pc-relative literal reference.
fn parse_mem(cursor: &mut Cursor, symtab: &mut SymbolTable) -> AsmResult<Operand> {
    if !cursor.eat(&TokenKind::LBracket) {
        // Literal form: the encoder addresses it relative to pc
        let expr = parse_expr(cursor, symtab)?;
        return Ok(Operand {
            kind: OperandKind::Target(expr),
            ..Operand::default()
        });
    }

    let base_span = cursor.here();
    let base = parse_reg(cursor)?;

    let mut align = None;
    if cursor.eat(&TokenKind::Colon) {
        let value = parse_number(cursor)?;
        if !matches!(value, 16 | 32 | 64 | 128 | 256) {
            return Err(AsmError::operand(
                format!("invalid alignment {}", value),
                base_span,
            ));
        }
        align = Some(value as u16);
    }

    let mut offset = MemOffset::Imm(Expr::constant(0));
    let mut negative = false;
    if cursor.eat(&TokenKind::Comma) {
        let checkpoint = cursor.checkpoint();
        let minus = cursor.eat(&TokenKind::Minus);
        if matches!(cursor.peek(), Some(TokenKind::Ident(name)) if Register::parse(name).is_some())
        {
            offset = MemOffset::Reg(parse_reg(cursor)?);
            negative = minus;
        } else {
            // Not a register offset; the minus belongs to the immediate
            cursor.rewind(checkpoint);
            cursor.eat(&TokenKind::Hash);
            let expr = parse_expr(cursor, symtab)?;
            negative = expr.as_const().is_some_and(|v| v < 0);
            offset = MemOffset::Imm(expr);
        }
    }

    if !cursor.eat(&TokenKind::RBracket) {
        return Err(AsmError::syntax("expected `]`", cursor.here()));
    }

    let mut writeback = false;
    let mut post_index = false;
    if cursor.eat(&TokenKind::Bang) {
        if matches!(offset, MemOffset::Imm(e) if e.as_const() == Some(0) && !negative) {
            return Err(AsmError::operand(
                "writeback requires an offset",
                cursor.here(),
            ));
        }
        writeback = true;
    } else {
        // `[rn], #imm` post-indexed form; the comma may instead belong
        // to a following operand, so look ahead before committing
        let checkpoint = cursor.checkpoint();
        if cursor.eat(&TokenKind::Comma) {
            let is_offset = matches!(
                cursor.peek(),
                Some(TokenKind::Hash | TokenKind::Number(_) | TokenKind::Minus)
            );
            if is_offset {
                cursor.eat(&TokenKind::Hash);
                let expr = parse_expr(cursor, symtab)?;
                negative = expr.as_const().is_some_and(|v| v < 0);
                offset = MemOffset::Imm(expr);
                post_index = true;
                writeback = true;
            } else {
                cursor.rewind(checkpoint);
            }
        }
    }

    if base.is_pc() && (writeback || post_index) {
        return Err(AsmError::operand(
            "pc-based addressing cannot write back",
            base_span,
        ));
    }

    Ok(Operand {
        kind: OperandKind::Mem {
            base,
            offset,
            post_index,
        },
        writeback,
        negative,
        align,
        ..Operand::default()
    })
}

/// `{r0, r1-r3, lr}` into a 16-bit mask
fn parse_reg_list(inst: &mut Inst, cursor: &mut Cursor) -> AsmResult<Operand> {
    let open_span = cursor.here();
    if !cursor.eat(&TokenKind::LBrace) {
        return Err(AsmError::syntax("expected `{`", open_span));
    }

    let mut mask: u16 = 0;
    let mut highest_seen: Option<u8> = None;
    loop {
        let span = cursor.here();
        let first = parse_reg(cursor)?;
        let last = if cursor.eat(&TokenKind::Minus) {
            let last = parse_reg(cursor)?;
            if last.num() <= first.num() {
                return Err(AsmError::operand(
                    format!("bad register range `{}-{}`", first, last),
                    span,
                ));
            }
            last
        } else {
            first
        };

        for num in first.num()..=last.num() {
            if mask & (1 << num) != 0 {
                inst.warn(format!("register r{} repeated in list", num), span);
            }
            mask |= 1 << num;
        }
        if highest_seen.is_some_and(|h| first.num() < h) {
            inst.warn("register list not in ascending order", span);
        }
        highest_seen = Some(highest_seen.map_or(last.num(), |h| h.max(last.num())));

        if cursor.eat(&TokenKind::RBrace) {
            break;
        }
        if !cursor.eat(&TokenKind::Comma) {
            return Err(AsmError::syntax("expected `,` or `}`", cursor.here()));
        }
    }

    if mask == 0 {
        return Err(AsmError::operand("empty register list", open_span));
    }
    Ok(Operand {
        kind: OperandKind::RegList(mask),
        ..Operand::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syntax::tokenize;

    fn run(shapes: &[Shape], text: &str) -> (Inst, bool, SymbolTable) {
        let mut inst = Inst::new();
        let mut symtab = SymbolTable::new();
        let tokens = tokenize(text).unwrap();
        let mut cursor = Cursor::new(tokens, text.len());
        let ok = match_operands(&mut inst, shapes, &mut cursor, &mut symtab);
        (inst, ok, symtab)
    }

    #[test]
    fn test_simple_registers() {
        let (inst, ok, _) = run(&[Shape::RegLo, Shape::RegLo], "r1, r2");
        assert!(ok);
        assert_eq!(inst.operands[0].kind, OperandKind::Reg(Register::R1));
        assert_eq!(inst.operands[1].kind, OperandKind::Reg(Register::R2));
    }

    #[test]
    fn test_missing_comma() {
        let (inst, ok, _) = run(&[Shape::RegLo, Shape::RegLo], "r1 r2");
        assert!(!ok);
        assert!(inst.error().unwrap().to_string().contains("`,`"));
    }

    #[test]
    fn test_extra_text_rejected() {
        let (inst, ok, _) = run(&[Shape::RegLo], "r1, r2");
        assert!(!ok);
        assert!(
            inst.error()
                .unwrap()
                .to_string()
                .contains("extra characters")
        );
    }

    #[test]
    fn test_optional_middle_backtrack() {
        // `r0, r1` against (reg, optional reg, flex): the optional
        // operand first swallows r1, the flex shape then has nothing,
        // and the rewind hands r1 to the flex shape.
        let shapes = &[Shape::RegLo, Shape::OptRegLo, Shape::Flex];
        let (inst, ok, _) = run(shapes, "r0, r1");
        assert!(ok);
        assert!(inst.operands[0].present);
        assert!(!inst.operands[1].present);
        assert_eq!(inst.operands[2].kind, OperandKind::Reg(Register::R1));
    }

    #[test]
    fn test_optional_middle_present() {
        let shapes = &[Shape::RegLo, Shape::OptRegLo, Shape::Flex];
        let (inst, ok, _) = run(shapes, "r0, r1, r2");
        assert!(ok);
        assert!(inst.operands[1].present);
        assert_eq!(inst.operands[2].kind, OperandKind::Reg(Register::R2));
    }

    #[test]
    fn test_optional_trailing_absent() {
        let shapes = &[Shape::RegLo, Shape::RegLo, Shape::OptRegLo];
        let (inst, ok, _) = run(shapes, "r2, r4");
        assert!(ok);
        assert!(!inst.operands[2].present);
    }

    #[test]
    fn test_backtrack_error_from_retry_path() {
        // The retry (optional-omitted) path's diagnostic must win over
        // the initial attempt's.
        let shapes = &[Shape::RegLo, Shape::OptRegLo, Shape::Flex];
        let (inst, ok, _) = run(shapes, "r0, r1, pc");
        assert!(!ok);
        // Initial attempt: optional=r1, flex fails on pc.
        // Retry: optional absent, flex consumes r1, then "extra text" at
        // `, pc`... which re-records through the mandatory path. The
        // surviving diagnostic is the retry one.
        let message = inst.error().unwrap().to_string();
        assert!(message.contains("extra characters"), "got: {}", message);
    }

    #[test]
    fn test_mem_bare_and_zero_offset_identical() {
        let (inst_a, ok_a, _) = run(&[Shape::Mem], "[r1]");
        let (inst_b, ok_b, _) = run(&[Shape::Mem], "[r1, #0]");
        assert!(ok_a && ok_b);
        // Identical records up to source location
        let mut a = inst_a.operands[0];
        let mut b = inst_b.operands[0];
        a.span = crate::common::Span::default();
        b.span = crate::common::Span::default();
        assert_eq!(a, b);
    }

    #[test]
    fn test_mem_preindex_writeback() {
        let (inst, ok, _) = run(&[Shape::Mem], "[r1, #-4]!");
        assert!(ok);
        let op = inst.operands[0];
        assert!(op.writeback);
        assert!(op.negative);
        assert!(matches!(
            op.kind,
            OperandKind::Mem {
                base: Register::R1,
                offset: MemOffset::Imm(e),
                post_index: false,
            } if e.as_const() == Some(-4)
        ));
    }

    #[test]
    fn test_mem_postindex() {
        let (inst, ok, _) = run(&[Shape::Mem], "[r1], #8");
        assert!(ok);
        let op = inst.operands[0];
        assert!(op.writeback);
        assert!(matches!(
            op.kind,
            OperandKind::Mem {
                post_index: true,
                offset: MemOffset::Imm(e),
                ..
            } if e.as_const() == Some(8)
        ));
    }

    #[test]
    fn test_mem_register_offset() {
        let (inst, ok, _) = run(&[Shape::Mem], "[r1, r2]");
        assert!(ok);
        assert!(matches!(
            inst.operands[0].kind,
            OperandKind::Mem {
                offset: MemOffset::Reg(Register::R2),
                ..
            }
        ));
    }

    #[test]
    fn test_mem_writeback_requires_offset() {
        let (inst, ok, _) = run(&[Shape::Mem], "[r1]!");
        assert!(!ok);
        assert!(
            inst.error()
                .unwrap()
                .to_string()
                .contains("writeback requires an offset")
        );
    }

    #[test]
    fn test_flex_immediate_and_shift() {
        let (inst, ok, _) = run(&[Shape::Flex], "#200");
        assert!(ok);
        assert_eq!(inst.operands[0].imm().as_const(), Some(200));

        let (inst, ok, _) = run(&[Shape::Flex], "r3, lsl #4");
        assert!(ok);
        let op = inst.operands[0];
        assert!(op.shifted);
        assert_eq!(op.shift, Some((ShiftOp::Lsl, ShiftAmount::Imm(4))));
    }

    #[test]
    fn test_flex_rejects_pc_warns_sp() {
        let (_inst, ok, _) = run(&[Shape::Flex], "pc");
        assert!(!ok);

        let (inst, ok, _) = run(&[Shape::Flex], "sp");
        assert!(ok);
        assert!(!inst.warnings.is_empty());
    }

    #[test]
    fn test_reg_list_ranges() {
        let (inst, ok, _) = run(&[Shape::RegList], "{r0, r2-r4, lr}");
        assert!(ok);
        assert_eq!(
            inst.operands[0].kind,
            OperandKind::RegList(0b0100_0000_0001_1101)
        );
    }

    #[test]
    fn test_reg_list_order_warning() {
        let (inst, ok, _) = run(&[Shape::RegList], "{r3, r1}");
        assert!(ok);
        assert!(
            inst.warnings
                .iter()
                .any(|(w, _)| w.contains("ascending order"))
        );
    }

    #[test]
    fn test_reg_list_bad_range() {
        let (inst, ok, _) = run(&[Shape::RegList], "{r3-r1}");
        assert!(!ok);
        assert!(
            inst.error()
                .unwrap()
                .to_string()
                .contains("bad register range")
        );
    }

    #[test]
    fn test_symbolic_immediate() {
        let (inst, ok, symtab) = run(&[Shape::Imm], "#limit+8");
        assert!(ok);
        let expr = inst.operands[0].imm();
        assert_eq!(symtab.name(expr.sym.unwrap()), "limit");
        assert_eq!(expr.addend, 8);
    }

    #[test]
    fn test_wide_flag_relaxes_low_requirement() {
        let mut inst = Inst::new();
        inst.forced = Some(Width::Wide);
        let mut symtab = SymbolTable::new();
        let tokens = tokenize("r8").unwrap();
        let mut cursor = Cursor::new(tokens, 2);
        assert!(match_operands(
            &mut inst,
            &[Shape::RegLo],
            &mut cursor,
            &mut symtab
        ));

        let (_, ok, _) = run(&[Shape::RegLo], "r8");
        assert!(!ok);
    }
}

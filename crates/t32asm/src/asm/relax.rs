//! Narrow/wide relaxation
//!
//! Size-variable instructions whose displacement or immediate involves a
//! symbol are emitted as relaxation units at their minimum size. The
//! engine then re-evaluates every unit against the current address
//! estimates until a sweep produces no growth. Sizes never shrink within
//! a convergence run, which is what guarantees termination: total section
//! size is bounded and strictly increases on every growing sweep.

use crate::catalog::LsSize;
use crate::common::AsmError;
use crate::isa::{Cond, Feature, FeatureSet, Register};

use super::fixup::{FixupKind, modified_const};
use super::section::Section;
use super::symbols::SymbolTable;

/// Size-variable instruction families
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelaxKind {
    /// `b` / `b<cond>`; `cond == None` is the unconditional (or
    /// block-predicated) form with the larger narrow range
    Branch { cond: Option<Cond> },
    /// `mov rd, #imm` with a symbolic immediate
    MovImm { rd: Register },
    /// `cmp rn, #imm` with a symbolic immediate
    CmpImm { rn: Register },
    /// `add`/`sub` immediate with a symbolic immediate
    AddSubImm {
        rd: Register,
        rn: Register,
        sub: bool,
    },
    /// `adr rd, label`
    Adr { rd: Register },
    /// `ldr rt, label` (pc-relative literal load)
    LoadLit { rt: Register },
    /// Load/store with a symbolic base-register offset
    LoadStoreImm {
        rt: Register,
        base: Register,
        load: bool,
        size: LsSize,
    },
}

impl RelaxKind {
    /// True when the evaluated value is relative to the instruction address
    pub fn pc_rel(self) -> bool {
        matches!(
            self,
            RelaxKind::Branch { .. } | RelaxKind::Adr { .. } | RelaxKind::LoadLit { .. }
        )
    }

    /// pc value subtracted for pc-relative families
    fn pc_base(self, addr: u32) -> u32 {
        match self {
            RelaxKind::Adr { .. } | RelaxKind::LoadLit { .. } => (addr + 4) & !3,
            _ => addr + 4,
        }
    }

    /// Can the narrow form encode this value?
    fn narrow_ok(self, value: i64) -> bool {
        match self {
            RelaxKind::Branch { cond: Some(_) } => {
                value % 2 == 0 && (-256..=254).contains(&value)
            }
            RelaxKind::Branch { cond: None } => value % 2 == 0 && (-2048..=2046).contains(&value),
            RelaxKind::MovImm { .. } | RelaxKind::CmpImm { .. } => (0..=255).contains(&value),
            RelaxKind::AddSubImm { rd, rn, .. } => {
                if rd == rn {
                    (0..=255).contains(&value)
                } else {
                    (0..=7).contains(&value)
                }
            }
            RelaxKind::Adr { .. } | RelaxKind::LoadLit { .. } => {
                value % 4 == 0 && (0..=1020).contains(&value)
            }
            RelaxKind::LoadStoreImm { base, size, .. } => {
                if base.is_sp() {
                    value % 4 == 0 && (0..=1020).contains(&value)
                } else {
                    match size {
                        LsSize::Word => value % 4 == 0 && (0..=124).contains(&value),
                        LsSize::Byte => (0..=31).contains(&value),
                    }
                }
            }
        }
    }

    /// Can the wide form encode this value?
    fn wide_ok(self, value: i64) -> bool {
        match self {
            RelaxKind::Branch { cond: Some(_) } => {
                value % 2 == 0 && (-(1 << 20)..(1 << 20)).contains(&value)
            }
            RelaxKind::Branch { cond: None } => {
                value % 2 == 0 && (-(1 << 24)..(1 << 24)).contains(&value)
            }
            RelaxKind::MovImm { .. } => (0..=0xFFFF).contains(&value),
            RelaxKind::CmpImm { .. } => {
                (0..=i64::from(u32::MAX)).contains(&value) && modified_const(value as u32).is_some()
            }
            RelaxKind::AddSubImm { .. } | RelaxKind::LoadStoreImm { .. } => {
                (0..=0xFFF).contains(&value)
            }
            RelaxKind::Adr { .. } | RelaxKind::LoadLit { .. } => value.abs() <= 0xFFF,
        }
    }

    /// Final opcode skeleton and fixup kind for the chosen size
    fn emit(self, size: u8) -> (u32, u8, FixupKind) {
        let rnum = |r: Register| u32::from(r.num());
        match (self, size) {
            (RelaxKind::Branch { cond: Some(c) }, 2) => (
                0xD000 | (u32::from(c.bits()) << 8),
                2,
                FixupKind::CondBranchNarrow,
            ),
            (RelaxKind::Branch { cond: None }, 2) => (0xE000, 2, FixupKind::BranchNarrow),
            (RelaxKind::Branch { cond: Some(c) }, _) => (
                0xF000_8000 | (u32::from(c.bits()) << 22),
                4,
                FixupKind::CondBranchWide,
            ),
            (RelaxKind::Branch { cond: None }, _) => (0xF000_9000, 4, FixupKind::BranchWide),

            (RelaxKind::MovImm { rd }, 2) => (0x2000 | (rnum(rd) << 8), 2, FixupKind::Imm8),
            (RelaxKind::MovImm { rd }, _) => {
                (0xF240_0000 | (rnum(rd) << 8), 4, FixupKind::MovwImm16)
            }

            (RelaxKind::CmpImm { rn }, 2) => (0x2800 | (rnum(rn) << 8), 2, FixupKind::Imm8),
            (RelaxKind::CmpImm { rn }, _) => {
                (0xF1B0_0F00 | (rnum(rn) << 16), 4, FixupKind::ModImm)
            }

            (RelaxKind::AddSubImm { rd, rn, sub }, 2) => {
                if rd == rn {
                    let base = if sub { 0x3800 } else { 0x3000 };
                    (base | (rnum(rd) << 8), 2, FixupKind::Imm8)
                } else {
                    let base = if sub { 0x1E00 } else { 0x1C00 };
                    (base | (rnum(rn) << 3) | rnum(rd), 2, FixupKind::Imm3)
                }
            }
            (RelaxKind::AddSubImm { rd, rn, sub }, _) => {
                let base = if sub { 0xF2A0_0000 } else { 0xF200_0000 };
                (
                    base | (rnum(rn) << 16) | (rnum(rd) << 8),
                    4,
                    FixupKind::AddSubWImm12,
                )
            }

            (RelaxKind::Adr { rd }, 2) => (0xA000 | (rnum(rd) << 8), 2, FixupKind::PcRelImm8Word),
            (RelaxKind::Adr { rd }, _) => (0xF20F_0000 | (rnum(rd) << 8), 4, FixupKind::AdrWide),

            (RelaxKind::LoadLit { rt }, 2) => {
                (0x4800 | (rnum(rt) << 8), 2, FixupKind::PcRelImm8Word)
            }
            (RelaxKind::LoadLit { rt }, _) => (
                0xF85F_0000 | (1 << 23) | (rnum(rt) << 12),
                4,
                FixupKind::PcRelLoadWide,
            ),

            (
                RelaxKind::LoadStoreImm {
                    rt,
                    base,
                    load,
                    size,
                },
                2,
            ) => {
                if base.is_sp() {
                    let op = if load { 0x9800 } else { 0x9000 };
                    (op | (rnum(rt) << 8), 2, FixupKind::LoadStoreSpImm8)
                } else {
                    let (op, fixup) = match (load, size) {
                        (true, LsSize::Word) => (0x6800, FixupKind::LoadStoreImm5Word),
                        (false, LsSize::Word) => (0x6000, FixupKind::LoadStoreImm5Word),
                        (true, LsSize::Byte) => (0x7800, FixupKind::LoadStoreImm5Byte),
                        (false, LsSize::Byte) => (0x7000, FixupKind::LoadStoreImm5Byte),
                    };
                    (op | (rnum(base) << 3) | rnum(rt), 2, fixup)
                }
            }
            (
                RelaxKind::LoadStoreImm {
                    rt,
                    base,
                    load,
                    size,
                },
                _,
            ) => {
                let op: u32 = match (load, size) {
                    (true, LsSize::Word) => 0xF8D0_0000,
                    (false, LsSize::Word) => 0xF8C0_0000,
                    (true, LsSize::Byte) => 0xF890_0000,
                    (false, LsSize::Byte) => 0xF880_0000,
                };
                (
                    op | (rnum(base) << 16) | (rnum(rt) << 12),
                    4,
                    FixupKind::LoadStoreImm12,
                )
            }
        }
    }
}

/// An emitted-but-not-finalized size-variable instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelaxUnit {
    pub kind: RelaxKind,
    pub target: super::symbols::Expr,
    /// Current size estimate in bytes; grows monotonically
    pub size: u8,
}

impl RelaxUnit {
    pub fn new(kind: RelaxKind, target: super::symbols::Expr) -> Self {
        Self {
            kind,
            target,
            size: 2,
        }
    }
}

/// Iterative narrow/wide selection over a section's relaxation units
pub struct RelaxEngine {
    features: FeatureSet,
    base: u32,
}

impl RelaxEngine {
    pub fn new(features: FeatureSet, base: u32) -> Self {
        Self { features, base }
    }

    /// One sweep over every unit, growing size estimates where the
    /// current addresses demand it. Returns whether anything grew; the
    /// caller repeats until this reports false.
    pub fn relax_pass(&self, section: &mut Section, symtab: &SymbolTable) -> bool {
        // Without wide encodings there is nothing to grow into; units
        // stay at their minimum size and range errors surface at fixup.
        if !self.features.has(Feature::Wide) {
            return false;
        }

        let layout = section.layout(self.base);
        let mut grew = false;

        for index in 0..section.frags.len() {
            let unit_addr = layout[index] + section.frags[index].bytes.len() as u32;
            let Some(unit) = section.frags[index].relax.as_ref() else {
                continue;
            };

            let desired = match self.evaluate(section, &layout, unit, unit_addr, symtab) {
                // Unknown final address: assume the worst
                None => 4,
                Some(value) => {
                    if unit.kind.narrow_ok(value) {
                        2
                    } else {
                        4
                    }
                }
            };

            let unit = section.frags[index].relax.as_mut().expect("checked above");
            if desired > unit.size {
                unit.size = desired;
                grew = true;
            }
        }
        grew
    }

    /// Value the unit must encode under the current layout, or `None`
    /// when its symbol is not defined in this section
    fn evaluate(
        &self,
        section: &Section,
        layout: &[u32],
        unit: &RelaxUnit,
        unit_addr: u32,
        symtab: &SymbolTable,
    ) -> Option<i64> {
        let base = match unit.target.sym {
            Some(sym) => i64::from(section.addr_of(layout, symtab.lookup(sym)?)),
            None => 0,
        };
        let mut value = base + unit.target.addend;
        if unit.kind.pc_rel() {
            value -= i64::from(unit.kind.pc_base(unit_addr));
        }
        Some(value)
    }

    /// Freeze every unit at its converged size: emit the opcode skeleton
    /// into the frag and queue the matching fixup. Values that fit
    /// neither form surface later, when the fixup is applied.
    pub fn finalize(&self, section: &mut Section, symtab: &SymbolTable) -> Vec<AsmError> {
        let layout = section.layout(self.base);
        let mut errors = Vec::new();

        for index in 0..section.frags.len() {
            let Some(unit) = section.frags[index].relax.take() else {
                continue;
            };
            let unit_addr = layout[index] + section.frags[index].bytes.len() as u32;

            // Catch values that outgrew even the wide form while the
            // engine could still see them; the fixup pass would also
            // reject them, but this names the instruction address.
            if let Some(value) = self.evaluate(section, &layout, &unit, unit_addr, symtab) {
                if unit.size == 4 && !unit.kind.wide_ok(value) {
                    errors.push(AsmError::overflow(format!(
                        "value {} not encodable at offset {:#x} in any form",
                        value, unit_addr
                    )));
                }
            }

            let (opcode, size, fixup_kind) = unit.kind.emit(unit.size);
            debug_assert_eq!(u32::from(size), u32::from(unit.size));

            let frag = &mut section.frags[index];
            let at = super::symbols::SymbolValue {
                frag: index,
                offset: frag.bytes.len() as u32,
            };
            match size {
                2 => frag.bytes.extend_from_slice(&(opcode as u16).to_le_bytes()),
                _ => {
                    frag
                        .bytes
                        .extend_from_slice(&((opcode >> 16) as u16).to_le_bytes());
                    frag.bytes.extend_from_slice(&(opcode as u16).to_le_bytes());
                }
            }
            section.add_fixup(at, fixup_kind, unit.target);
        }
        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asm::symbols::Expr;
    use pretty_assertions::assert_eq;

    fn engine() -> RelaxEngine {
        RelaxEngine::new(FeatureSet::dual_width(), 0)
    }

    fn converge(engine: &RelaxEngine, section: &mut Section, symtab: &SymbolTable) -> usize {
        let mut passes = 0;
        while engine.relax_pass(section, symtab) {
            passes += 1;
            assert!(passes < 100, "relaxation failed to converge");
        }
        passes
    }

    /// Branch over `pad` bytes of filler
    fn branch_section(symtab: &mut SymbolTable, pad: usize, cond: Option<Cond>) -> Section {
        let mut section = Section::new();
        let sym = symtab.intern("target");
        section.start_relax(RelaxUnit::new(RelaxKind::Branch { cond }, Expr::symbol(sym, 0)));
        section.emit(&vec![0u8; pad]);
        symtab.define(sym, section.here());
        section
    }

    #[test]
    fn test_cond_branch_boundary_narrow() {
        // Narrow range is -256..=254 from pc = addr + 4. The branch sits
        // at 0; a target at 258 is exactly value 254.
        let mut symtab = SymbolTable::new();
        let mut section = branch_section(&mut symtab, 256, Some(Cond::Eq));
        converge(&engine(), &mut section, &symtab);
        assert_eq!(section.frags[0].relax.as_ref().unwrap().size, 2);
    }

    #[test]
    fn test_cond_branch_boundary_wide() {
        // One halfword past the boundary forces the wide form
        let mut symtab = SymbolTable::new();
        let mut section = branch_section(&mut symtab, 258, Some(Cond::Eq));
        converge(&engine(), &mut section, &symtab);
        assert_eq!(section.frags[0].relax.as_ref().unwrap().size, 4);
    }

    #[test]
    fn test_uncond_branch_boundary() {
        let mut symtab = SymbolTable::new();
        let mut section = branch_section(&mut symtab, 2048, None);
        converge(&engine(), &mut section, &symtab);
        assert_eq!(section.frags[0].relax.as_ref().unwrap().size, 2);

        let mut symtab = SymbolTable::new();
        let mut section = branch_section(&mut symtab, 2050, None);
        converge(&engine(), &mut section, &symtab);
        assert_eq!(section.frags[0].relax.as_ref().unwrap().size, 4);
    }

    #[test]
    fn test_convergence_idempotent() {
        let mut symtab = SymbolTable::new();
        let mut section = branch_section(&mut symtab, 258, Some(Cond::Eq));
        let engine = engine();
        converge(&engine, &mut section, &symtab);

        let sizes: Vec<u8> = section
            .frags
            .iter()
            .filter_map(|f| f.relax.as_ref().map(|u| u.size))
            .collect();
        // An extra pass after convergence must not change anything
        assert!(!engine.relax_pass(&mut section, &symtab));
        let sizes_after: Vec<u8> = section
            .frags
            .iter()
            .filter_map(|f| f.relax.as_ref().map(|u| u.size))
            .collect();
        assert_eq!(sizes, sizes_after);
    }

    #[test]
    fn test_growth_cascade() {
        // A backward branch sitting exactly at its narrow limit, with a
        // growing forward branch between it and its target: the first
        // sweep grows the forward branch, which pushes the backward one
        // out of range on the second sweep.
        let mut symtab = SymbolTable::new();
        let mut section = Section::new();
        let far = symtab.intern("far");
        let near = symtab.intern("near");

        symtab.define(near, section.here());
        section.emit(&vec![0u8; 250]);
        section.start_relax(RelaxUnit::new(
            RelaxKind::Branch {
                cond: Some(Cond::Eq),
            },
            Expr::symbol(far, 0),
        ));
        section.start_relax(RelaxUnit::new(
            RelaxKind::Branch {
                cond: Some(Cond::Ne),
            },
            Expr::symbol(near, 0),
        ));
        section.emit(&vec![0u8; 500]);
        symtab.define(far, section.here());

        let engine = engine();
        // While both branches are narrow, the backward one encodes
        // exactly -256; growing the forward branch makes it -258.
        let passes = converge(&engine, &mut section, &symtab);
        assert!(
            passes >= 2,
            "expected cascading growth, got {} passes",
            passes
        );
        assert_eq!(section.frags[0].relax.as_ref().unwrap().size, 4);
        assert_eq!(section.frags[1].relax.as_ref().unwrap().size, 4);
    }

    #[test]
    fn test_undefined_symbol_forces_wide() {
        let mut symtab = SymbolTable::new();
        let mut section = Section::new();
        let sym = symtab.intern("elsewhere");
        section.start_relax(RelaxUnit::new(
            RelaxKind::Branch { cond: None },
            Expr::symbol(sym, 0),
        ));
        let engine = engine();
        converge(&engine, &mut section, &symtab);
        assert_eq!(section.frags[0].relax.as_ref().unwrap().size, 4);
    }

    #[test]
    fn test_narrow_only_feature_set_never_grows() {
        let mut symtab = SymbolTable::new();
        let mut section = branch_section(&mut symtab, 4096, None);
        let engine = RelaxEngine::new(FeatureSet::baseline(), 0);
        assert!(!engine.relax_pass(&mut section, &symtab));
        assert_eq!(section.frags[0].relax.as_ref().unwrap().size, 2);
    }

    #[test]
    fn test_adr_backward_target_forces_wide() {
        // adr can only reach forward, word-aligned targets in the narrow
        // form. A target right behind the instruction needs the sub-form
        // wide encoding, and the size must not shrink back even though
        // growing made the offset zero.
        let mut symtab = SymbolTable::new();
        let mut section = Section::new();
        let sym = symtab.intern("data");
        section.start_relax(RelaxUnit::new(
            RelaxKind::Adr { rd: Register::R0 },
            Expr::symbol(sym, 0),
        ));
        symtab.define(sym, section.here());
        let engine = engine();
        converge(&engine, &mut section, &symtab);
        assert_eq!(section.frags[0].relax.as_ref().unwrap().size, 4);
        assert!(!engine.relax_pass(&mut section, &symtab));
        assert_eq!(section.frags[0].relax.as_ref().unwrap().size, 4);
    }

    #[test]
    fn test_finalize_emits_bytes_and_fixup() {
        let mut symtab = SymbolTable::new();
        let mut section = branch_section(&mut symtab, 4, Some(Cond::Eq));
        let engine = engine();
        converge(&engine, &mut section, &symtab);
        let errors = engine.finalize(&mut section, &symtab);
        assert!(errors.is_empty());

        let (data, relocations, errors) = section.resolve(0, &symtab);
        assert!(errors.is_empty());
        assert!(relocations.is_empty());
        // beq over 4 bytes of padding: value = 6 - 4 = 2 -> imm8 = 1
        assert_eq!(&data[0..2], &0xD001u16.to_le_bytes());
    }
}

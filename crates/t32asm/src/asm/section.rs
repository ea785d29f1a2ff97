//! Output section as an arena of frags
//!
//! A frag is a run of finished bytes optionally terminated by one
//! relaxation unit whose size is still being negotiated. Symbols point at
//! (frag, offset) pairs rather than raw addresses so that relaxation
//! growth moves them automatically.

use crate::common::{AsmError, AsmResult};

use super::fixup::{self, FixupKind};
use super::relax::RelaxUnit;
use super::symbols::{Expr, SymbolTable, SymbolValue};

/// A run of bytes plus at most one trailing relaxation unit
#[derive(Debug, Clone)]
pub struct Frag {
    pub bytes: Vec<u8>,
    pub relax: Option<RelaxUnit>,
}

impl Frag {
    fn new() -> Self {
        Self {
            bytes: Vec::new(),
            relax: None,
        }
    }

    /// Current contribution to the section size
    pub fn size(&self) -> u32 {
        self.bytes.len() as u32 + self.relax.as_ref().map_or(0, |u| u32::from(u.size))
    }
}

/// A pending patch against emitted bytes
#[derive(Debug, Clone, Copy)]
pub struct Fixup {
    pub frag: usize,
    pub offset: u32,
    pub kind: FixupKind,
    pub target: Expr,
}

/// A fixup that survived assembly because its symbol is not defined here
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relocation {
    pub offset: u32,
    pub kind: FixupKind,
    pub symbol: String,
    pub addend: i64,
    pub pc_rel: bool,
}

/// One output section
pub struct Section {
    pub frags: Vec<Frag>,
    pub fixups: Vec<Fixup>,
}

impl Section {
    pub fn new() -> Self {
        Self {
            frags: vec![Frag::new()],
            fixups: Vec::new(),
        }
    }

    /// Position where the next byte will land
    pub fn here(&self) -> SymbolValue {
        let frag = self.frags.len() - 1;
        SymbolValue {
            frag,
            offset: self.frags[frag].bytes.len() as u32,
        }
    }

    pub fn emit(&mut self, bytes: &[u8]) {
        self.frags
            .last_mut()
            .expect("section always has a frag")
            .bytes
            .extend_from_slice(bytes);
    }

    pub fn add_fixup(&mut self, at: SymbolValue, kind: FixupKind, target: Expr) {
        self.fixups.push(Fixup {
            frag: at.frag,
            offset: at.offset,
            kind,
            target,
        });
    }

    /// Close the current frag with a relaxation unit and open a fresh one
    pub fn start_relax(&mut self, unit: RelaxUnit) {
        self.frags
            .last_mut()
            .expect("section always has a frag")
            .relax = Some(unit);
        self.frags.push(Frag::new());
    }

    /// Start address of every frag under the current size estimates
    pub fn layout(&self, base: u32) -> Vec<u32> {
        let mut addrs = Vec::with_capacity(self.frags.len());
        let mut addr = base;
        for frag in &self.frags {
            addrs.push(addr);
            addr += frag.size();
        }
        addrs
    }

    pub fn addr_of(&self, layout: &[u32], value: SymbolValue) -> u32 {
        layout[value.frag] + value.offset
    }

    /// Total section size under the current estimates
    pub fn size(&self) -> u32 {
        self.frags.iter().map(Frag::size).sum()
    }

    /// Flatten to bytes and resolve fixups. Must be called after every
    /// relaxation unit has been finalized. Fixups against undefined
    /// symbols become relocation records; overflow on a resolvable fixup
    /// is a hard error.
    pub fn resolve(
        self,
        base: u32,
        symtab: &SymbolTable,
    ) -> (Vec<u8>, Vec<Relocation>, Vec<AsmError>) {
        debug_assert!(self.frags.iter().all(|f| f.relax.is_none()));

        let layout = self.layout(base);
        let mut data = Vec::with_capacity(self.size() as usize);
        for frag in &self.frags {
            data.extend_from_slice(&frag.bytes);
        }

        let mut relocations = Vec::new();
        let mut errors = Vec::new();
        for fixup in &self.fixups {
            let addr = layout[fixup.frag] + fixup.offset;
            match self.fixup_value(fixup, addr, &layout, symtab) {
                Ok(Some(value)) => {
                    let at = (addr - base) as usize;
                    let end = at + fixup.kind.insn_size();
                    if let Err(e) = fixup::apply(fixup.kind, &mut data[at..end], value) {
                        errors.push(e);
                    }
                }
                Ok(None) => {
                    let sym = fixup.target.sym.expect("unresolved fixup has a symbol");
                    relocations.push(Relocation {
                        offset: addr - base,
                        kind: fixup.kind,
                        symbol: symtab.name(sym).to_string(),
                        addend: fixup.target.addend,
                        pc_rel: fixup.kind.pc_rel(),
                    });
                }
                Err(e) => errors.push(e),
            }
        }
        relocations.sort_by_key(|r| r.offset);

        (data, relocations, errors)
    }

    /// Final value for a fixup, `None` when it must survive as a relocation
    fn fixup_value(
        &self,
        fixup: &Fixup,
        addr: u32,
        layout: &[u32],
        symtab: &SymbolTable,
    ) -> AsmResult<Option<i64>> {
        let base = match fixup.target.sym {
            Some(sym) => match symtab.lookup(sym) {
                Some(value) => i64::from(self.addr_of(layout, value)),
                None => return Ok(None),
            },
            None => 0,
        };
        let mut value = base + fixup.target.addend;
        if fixup.kind.pc_rel() {
            value -= i64::from(fixup.kind.pc_base(addr));
        }
        Ok(Some(value))
    }
}

impl FixupKind {
    /// Byte length of the instruction this fixup patches
    pub fn insn_size(self) -> usize {
        match self {
            FixupKind::CondBranchNarrow
            | FixupKind::BranchNarrow
            | FixupKind::Imm8
            | FixupKind::Imm3
            | FixupKind::LoadStoreImm5Word
            | FixupKind::LoadStoreImm5Byte
            | FixupKind::LoadStoreSpImm8
            | FixupKind::PcRelImm8Word => 2,
            FixupKind::CondBranchWide
            | FixupKind::BranchWide
            | FixupKind::MovwImm16
            | FixupKind::ModImm
            | FixupKind::AddSubWImm12
            | FixupKind::LoadStoreImm12
            | FixupKind::AdrWide
            | FixupKind::PcRelLoadWide => 4,
        }
    }
}

impl Default for Section {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asm::relax::RelaxKind;
    use crate::isa::Cond;

    #[test]
    fn test_layout_tracks_relax_size() {
        let mut section = Section::new();
        section.emit(&[0, 0]);
        section.start_relax(RelaxUnit {
            kind: RelaxKind::Branch {
                cond: Some(Cond::Eq),
            },
            target: Expr::constant(0),
            size: 2,
        });
        section.emit(&[0, 0, 0, 0]);

        assert_eq!(section.layout(0), vec![0, 4]);
        assert_eq!(section.size(), 8);

        section.frags[0].relax.as_mut().unwrap().size = 4;
        assert_eq!(section.layout(0), vec![0, 6]);
        assert_eq!(section.size(), 10);
    }

    #[test]
    fn test_resolve_defined_symbol() {
        let mut symtab = SymbolTable::new();
        let mut section = Section::new();

        // target:  (defined at offset 0)
        //   nop
        //   b.n target   (fixup at offset 2)
        let sym = symtab.intern("target");
        symtab.define(sym, section.here());
        section.emit(&[0x00, 0xBF]);
        let at = section.here();
        section.emit(&[0x00, 0xE0]);
        section.add_fixup(at, FixupKind::BranchNarrow, Expr::symbol(sym, 0));

        let (data, relocations, errors) = section.resolve(0, &symtab);
        assert!(errors.is_empty());
        assert!(relocations.is_empty());
        // offset = 0 - (2 + 4) = -6 -> imm11 = -3
        assert_eq!(&data[2..4], &0xE7FDu16.to_le_bytes());
    }

    #[test]
    fn test_resolve_undefined_becomes_relocation() {
        let mut symtab = SymbolTable::new();
        let mut section = Section::new();
        let sym = symtab.intern("extern_fn");

        let at = section.here();
        section.emit(&[0x00, 0xF0, 0x00, 0xD0]);
        section.add_fixup(at, FixupKind::BranchWide, Expr::symbol(sym, 0));

        let (_, relocations, errors) = section.resolve(0, &symtab);
        assert!(errors.is_empty());
        assert_eq!(
            relocations,
            vec![Relocation {
                offset: 0,
                kind: FixupKind::BranchWide,
                symbol: "extern_fn".to_string(),
                addend: 0,
                pc_rel: true,
            }]
        );
    }
}

//! Line-by-line assembly driver
//!
//! Each source line runs to completion before the next begins: label
//! definitions, mnemonic resolution, operand matching, predication
//! bookkeeping, encoding and emission. After the last line, the
//! relaxation engine is driven to its fixed point and fixups are applied.

use crate::catalog::{Catalog, PredClass};
use crate::common::{AsmError, Diag, Severity, Span};
use crate::isa::{Cond, FeatureSet};
use crate::syntax::{Cursor, tokenize};

use super::encode::{EncodeCtx, encode};
use super::inst::{Inst, VecElem, Width};
use super::operands::match_operands;
use super::predication::PredContext;
use super::relax::{RelaxEngine, RelaxUnit};
use super::resolver;
use super::section::{Relocation, Section};
use super::symbols::SymbolTable;

/// Session configuration, fixed before the first line
#[derive(Debug, Clone, Copy)]
pub struct AsmConfig {
    pub features: FeatureSet,
    /// Synthesize one-slot conditional blocks for bare conditional
    /// instructions instead of rejecting them
    pub implicit_blocks: bool,
}

impl Default for AsmConfig {
    fn default() -> Self {
        Self {
            features: FeatureSet::dual_width(),
            implicit_blocks: false,
        }
    }
}

/// Result of assembling one source
pub struct Output {
    pub data: Vec<u8>,
    /// Defined symbols with their final addresses, in address order
    pub symbols: Vec<(String, u32)>,
    /// Fixups that must survive into a linking step
    pub relocations: Vec<Relocation>,
    pub diagnostics: Vec<Diag>,
}

impl Output {
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }
}

/// The assembler for one source file / output section
pub struct Assembler {
    config: AsmConfig,
    catalog: Catalog,
    symtab: SymbolTable,
    section: Section,
    pred: PredContext,
    inst: Inst,
    diagnostics: Vec<Diag>,
}

impl Assembler {
    pub fn new(config: AsmConfig) -> Self {
        Self {
            config,
            catalog: Catalog::with_defaults(),
            symtab: SymbolTable::new(),
            section: Section::new(),
            pred: PredContext::new(config.implicit_blocks),
            inst: Inst::new(),
            diagnostics: Vec::new(),
        }
    }

    /// Assemble a whole source text into bytes, relocations and
    /// diagnostics. A failed line emits nothing and processing continues.
    pub fn assemble(mut self, source: &str) -> Output {
        let mut offset = 0usize;
        for line in source.split('\n') {
            self.process_line(line.trim_end_matches('\r'), offset);
            offset += line.len() + 1;
        }

        let end_span = Span::new(source.len(), source.len());
        if let Some((message, span)) = self.pred.finish_segment(end_span) {
            self.diagnostics.push(Diag::warning(message, span));
        }

        // The convergence loop is driven from here: sweep until the
        // engine reports no further growth, then freeze.
        let engine = RelaxEngine::new(self.config.features, 0);
        while engine.relax_pass(&mut self.section, &self.symtab) {}
        for error in engine.finalize(&mut self.section, &self.symtab) {
            self.diagnostics.push(Diag::error(&error, end_span));
        }

        let layout = self.section.layout(0);
        let symbols = self
            .symtab
            .sorted_defs()
            .into_iter()
            .map(|(sym, value)| {
                (
                    self.symtab.name(sym).to_string(),
                    self.section.addr_of(&layout, value),
                )
            })
            .collect();

        let (data, relocations, errors) = self.section.resolve(0, &self.symtab);
        for error in errors {
            self.diagnostics.push(Diag::error(&error, end_span));
        }

        Output {
            data,
            symbols,
            relocations,
            diagnostics: self.diagnostics,
        }
    }

    fn process_line(&mut self, raw: &str, base: usize) {
        // Comments run to end of line
        let line = match raw.find([';', '@']) {
            Some(at) => &raw[..at],
            None => raw,
        };

        let mut pos = 0usize;
        loop {
            while line[pos..].starts_with([' ', '\t']) {
                pos += 1;
            }
            match take_label(&line[pos..]) {
                Some((name, consumed)) => {
                    let span = Span::new(base + pos, base + pos + name.len());
                    self.define_label(name, span);
                    pos += consumed;
                }
                None => break,
            }
        }

        let rest = &line[pos..];
        let trimmed = rest.trim_start();
        if trimmed.is_empty() {
            return;
        }
        let word_start = pos + (rest.len() - trimmed.len());
        let word_len = trimmed
            .find(|c: char| c.is_whitespace())
            .unwrap_or(trimmed.len());
        let word = &trimmed[..word_len];
        let operand_text = &trimmed[word_len..];
        let operand_base = base + word_start + word_len;
        let word_span = Span::new(base + word_start, base + word_start + word_len);

        self.inst.clear();
        self.inst.span = word_span;

        // Width and element-type qualifiers sit after the full mnemonic
        let word_lower = word.to_ascii_lowercase();
        let mut parts = word_lower.split('.');
        let name = parts.next().expect("split yields at least one part");
        self.inst.mnemonic = name.to_string();
        for qualifier in parts {
            match qualifier {
                "n" => self.inst.forced = Some(Width::Narrow),
                "w" => self.inst.forced = Some(Width::Wide),
                other => match VecElem::from_suffix(other) {
                    Some(elem) => self.inst.elem = Some(elem),
                    None => {
                        self.error(AsmError::syntax(
                            format!("unknown mnemonic qualifier `.{}`", other),
                            word_span,
                        ));
                        return;
                    }
                },
            }
        }

        let Some(resolved) = resolver::resolve(&self.catalog, self.config.features, name) else {
            self.error(AsmError::UnknownMnemonic {
                mnemonic: name.to_string(),
                span: word_span,
            });
            return;
        };
        let entry = resolved.entry;
        if resolved.deprecated {
            self.diagnostics.push(Diag::warning(
                "conditional infix mnemonics are deprecated; use the suffix spelling",
                word_span,
            ));
        }
        if !self.config.features.has_all(entry.required) {
            let missing = self
                .config
                .features
                .first_missing(entry.required)
                .expect("has_all failed");
            self.error(AsmError::MissingFeature {
                mnemonic: name.to_string(),
                feature: missing.name(),
                span: word_span,
            });
            return;
        }
        self.inst.cond = resolved.cond;
        self.inst.vpred = resolved.vpred;
        self.inst.pred_class = entry.pred_class;

        let mut tokens = match tokenize(operand_text) {
            Ok(tokens) => tokens,
            Err(span) => {
                self.error(AsmError::syntax(
                    "unrecognized character in operands",
                    span.offset(operand_base),
                ));
                return;
            }
        };
        for token in &mut tokens {
            token.span = token.span.offset(operand_base);
        }
        let mut cursor = Cursor::new(tokens, base + line.len());

        if !match_operands(&mut self.inst, entry.shapes, &mut cursor, &mut self.symtab) {
            let error = self
                .inst
                .take_error()
                .unwrap_or_else(|| AsmError::syntax("invalid operands", word_span));
            self.error(error);
            return;
        }

        self.pred.prepare(entry.pred_class, self.inst.cond);
        let ctx = EncodeCtx {
            features: self.config.features,
            in_block: self.pred.in_block(),
            predicated: self.pred.in_block()
                || (self.config.implicit_blocks
                    && self.inst.cond != Cond::Al
                    && entry.pred_class == PredClass::InBlock),
        };
        encode(&mut self.inst, entry, &ctx);

        if let Some(error) = self.inst.take_error() {
            self.pred.abort();
            self.error(error);
            return;
        }

        let commit = match self.pred.commit(&self.inst) {
            Ok(commit) => commit,
            Err(error) => {
                self.error(error);
                return;
            }
        };

        for (message, span) in self.inst.warnings.drain(..) {
            self.diagnostics.push(Diag::warning(message, span));
        }
        if let Some(message) = commit.warning {
            self.diagnostics.push(Diag::warning(message, word_span));
        }
        if let Some(bytes) = commit.synthesized {
            self.section.emit(&bytes);
        }

        match self.inst.relax {
            Some(request) => {
                self.section
                    .start_relax(RelaxUnit::new(request.kind, request.target));
            }
            None => {
                let at = self.section.here();
                self.section.emit(&self.inst.to_bytes());
                for reloc in &self.inst.relocs {
                    debug_assert_eq!(reloc.pc_rel, reloc.kind.pc_rel());
                    self.section.add_fixup(at, reloc.kind, reloc.target);
                }
            }
        }
    }

    fn define_label(&mut self, name: &str, span: Span) {
        if self.pred.in_block() {
            self.diagnostics
                .push(Diag::warning("label inside a conditional block", span));
        }
        let sym = self.symtab.intern(name);
        if !self.symtab.define(sym, self.section.here()) {
            self.error(AsmError::DuplicateSymbol {
                name: name.to_string(),
                span,
            });
        }
    }

    fn error(&mut self, error: AsmError) {
        let span = error.span().unwrap_or(self.inst.span);
        self.diagnostics.push(Diag::error(&error, span));
    }
}

/// Leading `name:` label, returning the name and bytes consumed
fn take_label(s: &str) -> Option<(&str, usize)> {
    let mut indices = s.char_indices();
    let (_, first) = indices.next()?;
    if !(first.is_ascii_alphabetic() || first == '_' || first == '.') {
        return None;
    }
    let mut end = first.len_utf8();
    for (at, c) in indices {
        if c.is_ascii_alphanumeric() || c == '_' || c == '.' {
            end = at + c.len_utf8();
        } else {
            break;
        }
    }
    s[end..].starts_with(':').then(|| (&s[..end], end + 1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn assemble(source: &str) -> Output {
        Assembler::new(AsmConfig::default()).assemble(source)
    }

    fn assemble_with(config: AsmConfig, source: &str) -> Output {
        Assembler::new(config).assemble(source)
    }

    fn ok_bytes(source: &str) -> Vec<u8> {
        let output = assemble(source);
        assert!(
            !output.has_errors(),
            "unexpected diagnostics: {:?}",
            output.diagnostics
        );
        output.data
    }

    fn first_error(output: &Output) -> &Diag {
        output
            .diagnostics
            .iter()
            .find(|d| d.severity == Severity::Error)
            .expect("expected an error")
    }

    #[test]
    fn test_simple_program() {
        let data = ok_bytes("start:\n    movs r0, #0\n    adds r0, #1\n    bx lr\n");
        assert_eq!(
            data,
            vec![0x00, 0x20, 0x01, 0x30, 0x70, 0x47] // movs; adds; bx lr
        );
    }

    #[test]
    fn test_comments_and_blanks() {
        let data = ok_bytes("; header\n\n  @ another\nnop ; trailing\n");
        assert_eq!(data, vec![0x00, 0xBF]);
    }

    #[test]
    fn test_mul_optional_operand_equivalence() {
        assert_eq!(ok_bytes("muls r2, r4\n"), ok_bytes("muls r2, r4, r2\n"));
    }

    #[test]
    fn test_mem_zero_offset_equivalence() {
        assert_eq!(
            ok_bytes("ldr r0, [r1]\n"),
            ok_bytes("ldr r0, [r1, #0]\n")
        );
    }

    #[test]
    fn test_backward_branch_resolves() {
        let data = ok_bytes("loop:\n    nop\n    b loop\n");
        // nop at 0, b at 2 -> offset = 0 - (2+4) = -6 -> imm11 = -3
        assert_eq!(data, vec![0x00, 0xBF, 0xFD, 0xE7]);
    }

    #[test]
    fn test_forward_branch_narrow_and_wide() {
        // Forward over one nop: narrow
        let data = ok_bytes("    b over\n    nop\nover:\n    nop\n");
        assert_eq!(&data[0..2], &[0x00, 0xE0]);

        // Forward over 1500 halfwords of padding: wide
        let mut source = String::from("    b over\n");
        for _ in 0..1500 {
            source.push_str("    nop\n");
        }
        source.push_str("over:\n    nop\n");
        let data = ok_bytes(&source);
        // b.w over 3000 bytes: value = 3004 - 4 = 3000, imm11 = 1500
        assert_eq!(&data[0..2], &[0x00, 0xF0]);
        assert_eq!(&data[2..4], &[0xDC, 0xBD]);
    }

    #[test]
    fn test_it_block_accepts_schedule() {
        let data = ok_bytes(
            "    itte eq\n    addeq r0, #1\n    addeq r1, #1\n    addne r2, #1\n    nop\n",
        );
        // itte eq; add r0,#1; add r1,#1; add r2,#1; nop
        assert_eq!(
            data,
            vec![0x06, 0xBF, 0x01, 0x30, 0x01, 0x31, 0x01, 0x32, 0x00, 0xBF]
        );
    }

    #[test]
    fn test_it_block_condition_mismatch() {
        let output = assemble("    ite eq\n    addeq r0, #1\n    addeq r1, #1\n");
        let error = first_error(&output);
        assert!(error.message.contains("expected `ne`"), "{}", error.message);
    }

    #[test]
    fn test_conditional_outside_block_rejected_then_synthesized() {
        let output = assemble("    addeq r0, #1\n");
        assert!(
            first_error(&output)
                .message
                .contains("not in a conditional block")
        );

        let config = AsmConfig {
            implicit_blocks: true,
            ..AsmConfig::default()
        };
        let output = assemble_with(config, "    addeq r0, #1\n");
        assert!(!output.has_errors());
        // Synthesized `it eq` ahead of the narrow add
        assert_eq!(output.data, vec![0x08, 0xBF, 0x01, 0x30]);
    }

    #[test]
    fn test_branch_conditional_outside_block_is_fine() {
        let data = ok_bytes("    beq next\nnext:\n    nop\n");
        // beq with offset -... value = 2 - 4 = -2 -> imm8 = 0xFF
        assert_eq!(&data[0..2], &[0xFF, 0xD0]);
    }

    #[test]
    fn test_open_block_at_end_is_warning() {
        let output = assemble("    itt eq\n    addeq r0, #1\n");
        assert!(!output.has_errors());
        assert!(
            output
                .diagnostics
                .iter()
                .any(|d| d.severity == Severity::Warning && d.message.contains("still open"))
        );
    }

    #[test]
    fn test_label_in_block_warns() {
        let output = assemble("    itt eq\n    addeq r0, #1\nmid:\n    addeq r1, #1\n");
        assert!(!output.has_errors());
        assert!(
            output
                .diagnostics
                .iter()
                .any(|d| d.message.contains("label inside a conditional block"))
        );
    }

    #[test]
    fn test_duplicate_label() {
        let output = assemble("a:\na:\n    nop\n");
        assert!(
            first_error(&output)
                .message
                .contains("defined more than once")
        );
    }

    #[test]
    fn test_unknown_mnemonic() {
        let output = assemble("    frobnicate r0\n");
        assert!(first_error(&output).message.contains("frobnicate"));
    }

    #[test]
    fn test_error_line_emits_nothing_and_continues() {
        let output = assemble("    adds r0, #999\n    nop\n");
        assert!(output.has_errors());
        // Only the nop made it out
        assert_eq!(output.data, vec![0x00, 0xBF]);
    }

    #[test]
    fn test_undefined_symbol_becomes_relocation() {
        let output = assemble("    bl helper\n");
        assert!(!output.has_errors());
        assert_eq!(output.relocations.len(), 1);
        assert_eq!(output.relocations[0].symbol, "helper");
        assert!(output.relocations[0].pc_rel);
    }

    #[test]
    fn test_symbols_reported_in_address_order() {
        let output = assemble("a:\n    nop\nb:\n    nop\n");
        assert_eq!(
            output.symbols,
            vec![("a".to_string(), 0), ("b".to_string(), 2)]
        );
    }

    #[test]
    fn test_legacy_infix_warns_and_encodes() {
        let output = assemble("    itt eq\n    ldreqb r0, [r1]\n    addeq r0, #1\n");
        assert!(!output.has_errors());
        assert!(
            output
                .diagnostics
                .iter()
                .any(|d| d.message.contains("deprecated"))
        );
        assert_eq!(&output.data[2..4], &[0x08, 0x78]); // ldrb r0, [r1]
    }

    #[test]
    fn test_width_qualifiers() {
        // Forcing wide on a branch that fits narrow
        let data = ok_bytes("    b.w next\nnext:\n    nop\n");
        assert_eq!(&data[0..4], &[0x00, 0xF0, 0x00, 0xB8]);

        // Forcing narrow on an out-of-range branch is a hard error
        let mut source = String::from("    b.n over\n");
        for _ in 0..2000 {
            source.push_str("    nop\n");
        }
        source.push_str("over:\n    nop\n");
        let output = assemble(&source);
        assert!(output.has_errors());
    }

    #[test]
    fn test_adr_and_literal_load() {
        let data = ok_bytes("    adr r0, data\n    ldr r1, data\ndata:\n    nop\n");
        // adr at 0: target 4, pc base 4 -> imm8 = 0
        assert_eq!(&data[0..2], &[0x00, 0xA0]);
        // ldr at 2: pc base (2+4)&!3 = 4 -> imm8 = 0
        assert_eq!(&data[2..4], &[0x00, 0x49]);
    }

    #[test]
    fn test_vector_block() {
        let config = AsmConfig {
            features: FeatureSet::full(),
            ..AsmConfig::default()
        };
        let output = assemble_with(
            config,
            "    vpstt\n    vaddt.i32 q0, q1, q2\n    vaddt.i32 q3, q1, q2\n",
        );
        assert!(
            !output.has_errors(),
            "diagnostics: {:?}",
            output.diagnostics
        );

        // Wrong predicate letter for the schedule
        let output = assemble_with(config, "    vpste\n    vaddt.i32 q0, q1, q2\n    vaddt.i32 q3, q1, q2\n");
        assert!(output.has_errors());
    }

    #[test]
    fn test_vector_requires_feature() {
        let output = assemble("    vpst\n");
        assert!(
            first_error(&output)
                .message
                .contains("vector-predication")
        );
    }

    #[test]
    fn test_determinism() {
        let source = "start:\n    movs r0, #0\nloop:\n    adds r0, #1\n    cmp r0, #10\n    bne loop\n    bl finish\n    b start\n";
        let first = assemble(source);
        let second = assemble(source);
        assert_eq!(first.data, second.data);
        assert_eq!(first.symbols, second.symbols);
        assert_eq!(first.relocations, second.relocations);
    }
}

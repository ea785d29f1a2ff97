//! Built-in instruction catalog
//!
//! Covers the dual-width core subset: data processing, memory access,
//! branches, conditional blocks and the vector-predication extension.
//! Bit layouts for these entries live in the family encoders and the
//! relaxation finalizer; this table only declares shapes and dispatch tags.

use super::{
    Affix, BlockPattern, Catalog, LogicalOp, LsSize, OpFamily, OpcodeEntry, PredClass, Shape,
    ShiftOp,
};
use crate::isa::{Feature, FeatureSet};

const REG_FLEX: &[Shape] = &[Shape::Reg, Shape::Flex];
const REG3_OPT_MID: &[Shape] = &[Shape::RegLo, Shape::OptRegLo, Shape::Flex];
const REG3_LOGICAL: &[Shape] = &[Shape::RegLo, Shape::OptRegLo, Shape::RegLo];
const REG2_OPT_SHIFT: &[Shape] = &[Shape::RegLo, Shape::RegLo, Shape::OptImm];
const REG3_OPT_LAST: &[Shape] = &[Shape::RegLo, Shape::RegLo, Shape::OptRegLo];
const REG_MEM: &[Shape] = &[Shape::Reg, Shape::Mem];
const MULTI: &[Shape] = &[Shape::RegWb, Shape::RegList];
const LIST_ONLY: &[Shape] = &[Shape::RegList];
const TARGET_ONLY: &[Shape] = &[Shape::Target];
const REG_ONLY: &[Shape] = &[Shape::Reg];
const REG_TARGET: &[Shape] = &[Shape::Reg, Shape::Target];
const COND_ONLY: &[Shape] = &[Shape::CondName];
const IMM_ONLY: &[Shape] = &[Shape::Imm];
const OPT_IMM_ONLY: &[Shape] = &[Shape::OptImm];
const NO_OPERANDS: &[Shape] = &[];
const QREG3: &[Shape] = &[Shape::QReg, Shape::QReg, Shape::QReg];

struct Def {
    name: &'static str,
    family: OpFamily,
    shapes: &'static [Shape],
    affix: Affix,
    legacy_infix: bool,
    required: FeatureSet,
    pred_class: PredClass,
}

impl Def {
    fn entry(&self) -> OpcodeEntry {
        OpcodeEntry {
            name: self.name,
            family: self.family,
            shapes: self.shapes,
            affix: self.affix,
            legacy_infix: self.legacy_infix,
            required: self.required,
            pred_class: self.pred_class,
        }
    }
}

fn data_op(name: &'static str, family: OpFamily, shapes: &'static [Shape]) -> Def {
    Def {
        name,
        family,
        shapes,
        affix: Affix::CondSuffix,
        legacy_infix: false,
        required: FeatureSet::default(),
        pred_class: PredClass::InBlock,
    }
}

/// `it`, `itt`, `ite`, ... with their slot patterns
const IT_PATTERNS: &[(&str, &str)] = &[
    ("it", ""),
    ("itt", "t"),
    ("ite", "e"),
    ("ittt", "tt"),
    ("itte", "te"),
    ("itet", "et"),
    ("itee", "ee"),
    ("itttt", "ttt"),
    ("ittte", "tte"),
    ("ittet", "tet"),
    ("ittee", "tee"),
    ("itett", "ett"),
    ("itete", "ete"),
    ("iteet", "eet"),
    ("iteee", "eee"),
];

const VPST_PATTERNS: &[(&str, &str)] = &[
    ("vpst", ""),
    ("vpstt", "t"),
    ("vpste", "e"),
    ("vpsttt", "tt"),
    ("vpstte", "te"),
    ("vpstet", "et"),
    ("vpstee", "ee"),
    ("vpstttt", "ttt"),
    ("vpsttte", "tte"),
    ("vpsttet", "tet"),
    ("vpsttee", "tee"),
    ("vpstett", "ett"),
    ("vpstete", "ete"),
    ("vpsteet", "eet"),
    ("vpsteee", "eee"),
];

pub(super) fn register(catalog: &mut Catalog) {
    let mut defs = vec![
        data_op("mov", OpFamily::Mov { flags: false }, REG_FLEX),
        data_op("movs", OpFamily::Mov { flags: true }, REG_FLEX),
        data_op("cmp", OpFamily::Cmp, REG_FLEX),
        data_op(
            "add",
            OpFamily::AddSub {
                sub: false,
                flags: false,
            },
            REG3_OPT_MID,
        ),
        data_op(
            "adds",
            OpFamily::AddSub {
                sub: false,
                flags: true,
            },
            REG3_OPT_MID,
        ),
        data_op(
            "sub",
            OpFamily::AddSub {
                sub: true,
                flags: false,
            },
            REG3_OPT_MID,
        ),
        data_op(
            "subs",
            OpFamily::AddSub {
                sub: true,
                flags: true,
            },
            REG3_OPT_MID,
        ),
    ];

    for (name, sname, op) in [
        ("and", "ands", LogicalOp::And),
        ("orr", "orrs", LogicalOp::Orr),
        ("eor", "eors", LogicalOp::Eor),
        ("bic", "bics", LogicalOp::Bic),
    ] {
        defs.push(data_op(
            name,
            OpFamily::Logical { op, flags: false },
            REG3_LOGICAL,
        ));
        defs.push(data_op(
            sname,
            OpFamily::Logical { op, flags: true },
            REG3_LOGICAL,
        ));
    }

    for (name, sname, op) in [
        ("lsl", "lsls", ShiftOp::Lsl),
        ("lsr", "lsrs", ShiftOp::Lsr),
        ("asr", "asrs", ShiftOp::Asr),
        ("ror", "rors", ShiftOp::Ror),
    ] {
        defs.push(data_op(
            name,
            OpFamily::Shift { op, flags: false },
            REG2_OPT_SHIFT,
        ));
        defs.push(data_op(
            sname,
            OpFamily::Shift { op, flags: true },
            REG2_OPT_SHIFT,
        ));
    }

    for (name, flags) in [("mul", false), ("muls", true)] {
        defs.push(Def {
            required: FeatureSet::from(Feature::Multiply),
            ..data_op(name, OpFamily::Mul { flags }, REG3_OPT_LAST)
        });
    }

    for (name, load, size) in [
        ("ldr", true, LsSize::Word),
        ("str", false, LsSize::Word),
        ("ldrb", true, LsSize::Byte),
        ("strb", false, LsSize::Byte),
    ] {
        defs.push(Def {
            // `ldreqb`-style spellings resolve to the byte entries
            legacy_infix: size == LsSize::Byte,
            ..data_op(name, OpFamily::LoadStore { load, size }, REG_MEM)
        });
    }

    defs.push(data_op(
        "ldm",
        OpFamily::LoadStoreMulti { load: true },
        MULTI,
    ));
    defs.push(data_op(
        "stm",
        OpFamily::LoadStoreMulti { load: false },
        MULTI,
    ));
    defs.push(data_op("push", OpFamily::PushPop { pop: false }, LIST_ONLY));
    defs.push(data_op("pop", OpFamily::PushPop { pop: true }, LIST_ONLY));

    defs.push(Def {
        pred_class: PredClass::LastInBlock,
        ..data_op("b", OpFamily::Branch { link: false }, TARGET_ONLY)
    });
    defs.push(Def {
        pred_class: PredClass::LastInBlock,
        required: FeatureSet::from(Feature::Wide),
        ..data_op("bl", OpFamily::Branch { link: true }, TARGET_ONLY)
    });
    defs.push(Def {
        pred_class: PredClass::LastInBlock,
        ..data_op("bx", OpFamily::BranchExchange, REG_ONLY)
    });

    defs.push(data_op("adr", OpFamily::Adr, REG_TARGET));

    defs.push(Def {
        pred_class: PredClass::Unpredicated,
        ..data_op("nop", OpFamily::Hint, NO_OPERANDS)
    });
    defs.push(data_op("svc", OpFamily::Exception { svc: true }, IMM_ONLY));
    defs.push(Def {
        affix: Affix::None,
        pred_class: PredClass::Unpredicated,
        ..data_op("bkpt", OpFamily::Exception { svc: false }, OPT_IMM_ONLY)
    });

    // Legacy infix spellings (`addeqs`, `moveqs`) land on the s-forms
    for legacy in ["adds", "subs", "movs"] {
        if let Some(def) = defs.iter_mut().find(|d| d.name == legacy) {
            def.legacy_infix = true;
        }
    }

    for &(name, letters) in IT_PATTERNS {
        let pattern = BlockPattern::from_letters(letters).expect("static pattern");
        defs.push(Def {
            name,
            family: OpFamily::BlockStart { pattern },
            shapes: COND_ONLY,
            affix: Affix::None,
            legacy_infix: false,
            required: FeatureSet::default(),
            pred_class: PredClass::BlockStart,
        });
    }

    for &(name, letters) in VPST_PATTERNS {
        let pattern = BlockPattern::from_letters(letters).expect("static pattern");
        defs.push(Def {
            name,
            family: OpFamily::VectorBlockStart { pattern },
            shapes: NO_OPERANDS,
            affix: Affix::None,
            legacy_infix: false,
            required: FeatureSet::from(Feature::VectorPredication),
            pred_class: PredClass::VectorBlockStart,
        });
    }

    for (name, sub) in [("vadd", false), ("vsub", true)] {
        defs.push(Def {
            name,
            family: OpFamily::VecArith { sub },
            shapes: QREG3,
            affix: Affix::VecSuffix,
            legacy_infix: false,
            required: FeatureSet::from(Feature::VectorPredication),
            pred_class: PredClass::Neutral,
        });
    }

    for def in &defs {
        catalog.register(def.entry());
    }
}

//! Condition codes

/// Condition code, as used in suffixes and `it` blocks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cond {
    Eq, // Equal
    Ne, // Not equal
    Cs, // Carry set (unsigned >=), alias hs
    Cc, // Carry clear (unsigned <), alias lo
    Mi, // Minus (negative)
    Pl, // Plus (positive or zero)
    Vs, // Overflow set
    Vc, // Overflow clear
    Hi, // Unsigned >
    Ls, // Unsigned <=
    Ge, // Signed >=
    Lt, // Signed <
    Gt, // Signed >
    Le, // Signed <=
    Al, // Always
}

impl Cond {
    /// 4-bit encoding of the condition
    pub fn bits(self) -> u8 {
        match self {
            Cond::Eq => 0,
            Cond::Ne => 1,
            Cond::Cs => 2,
            Cond::Cc => 3,
            Cond::Mi => 4,
            Cond::Pl => 5,
            Cond::Vs => 6,
            Cond::Vc => 7,
            Cond::Hi => 8,
            Cond::Ls => 9,
            Cond::Ge => 10,
            Cond::Lt => 11,
            Cond::Gt => 12,
            Cond::Le => 13,
            Cond::Al => 14,
        }
    }

    /// The logically opposite condition. `al` has no inverse.
    pub fn inverse(self) -> Cond {
        match self {
            Cond::Eq => Cond::Ne,
            Cond::Ne => Cond::Eq,
            Cond::Cs => Cond::Cc,
            Cond::Cc => Cond::Cs,
            Cond::Mi => Cond::Pl,
            Cond::Pl => Cond::Mi,
            Cond::Vs => Cond::Vc,
            Cond::Vc => Cond::Vs,
            Cond::Hi => Cond::Ls,
            Cond::Ls => Cond::Hi,
            Cond::Ge => Cond::Lt,
            Cond::Lt => Cond::Ge,
            Cond::Gt => Cond::Le,
            Cond::Le => Cond::Gt,
            Cond::Al => Cond::Al,
        }
    }

    /// Parse a two-letter condition suffix, accepting the hs/lo aliases
    pub fn from_suffix(s: &str) -> Option<Cond> {
        let lower = s.to_ascii_lowercase();
        let cond = match lower.as_str() {
            "eq" => Cond::Eq,
            "ne" => Cond::Ne,
            "cs" | "hs" => Cond::Cs,
            "cc" | "lo" => Cond::Cc,
            "mi" => Cond::Mi,
            "pl" => Cond::Pl,
            "vs" => Cond::Vs,
            "vc" => Cond::Vc,
            "hi" => Cond::Hi,
            "ls" => Cond::Ls,
            "ge" => Cond::Ge,
            "lt" => Cond::Lt,
            "gt" => Cond::Gt,
            "le" => Cond::Le,
            "al" => Cond::Al,
            _ => return None,
        };
        Some(cond)
    }
}

impl std::fmt::Display for Cond {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Cond::Eq => "eq",
            Cond::Ne => "ne",
            Cond::Cs => "cs",
            Cond::Cc => "cc",
            Cond::Mi => "mi",
            Cond::Pl => "pl",
            Cond::Vs => "vs",
            Cond::Vc => "vc",
            Cond::Hi => "hi",
            Cond::Ls => "ls",
            Cond::Ge => "ge",
            Cond::Lt => "lt",
            Cond::Gt => "gt",
            Cond::Le => "le",
            Cond::Al => "al",
        };
        write!(f, "{}", s)
    }
}

/// Then/else predicate letter inside a vector-predication block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VecPred {
    Then,
    Else,
}

impl std::fmt::Display for VecPred {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VecPred::Then => write!(f, "t"),
            VecPred::Else => write!(f, "e"),
        }
    }
}

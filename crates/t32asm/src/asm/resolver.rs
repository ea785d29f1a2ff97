//! Mnemonic resolution
//!
//! Finds the catalog entry and condition for a raw mnemonic, trying the
//! accepted spellings in a fixed order: exact name, two-letter condition
//! suffix, single-letter vector-predicate suffix, and the legacy infix
//! spelling with the condition embedded after the third character. The
//! first strategy that lands on a willing entry wins.

use crate::catalog::{Affix, Catalog, OpcodeEntry};
use crate::isa::{Cond, Feature, FeatureSet, VecPred};

/// A resolved mnemonic
pub struct Resolved<'a> {
    pub entry: &'a OpcodeEntry,
    pub cond: Cond,
    pub vpred: Option<VecPred>,
    /// The infix spelling is accepted but reported as deprecated
    pub deprecated: bool,
}

impl<'a> Resolved<'a> {
    fn plain(entry: &'a OpcodeEntry) -> Self {
        Self {
            entry,
            cond: Cond::Al,
            vpred: None,
            deprecated: false,
        }
    }
}

/// Resolve a mnemonic (lower-cased, with any width or element-type
/// qualifier already stripped). `None` means "not an instruction".
pub fn resolve<'a>(
    catalog: &'a Catalog,
    features: FeatureSet,
    name: &str,
) -> Option<Resolved<'a>> {
    // 1. Exact name, including names with the condition baked in
    if let Some(entry) = catalog.lookup(name) {
        return Some(Resolved::plain(entry));
    }

    // 2. Trailing two-letter condition suffix
    if name.len() > 2 {
        let (prefix, suffix) = name.split_at(name.len() - 2);
        if let (Some(cond), Some(entry)) = (Cond::from_suffix(suffix), catalog.lookup(prefix)) {
            if entry.affix == Affix::CondSuffix {
                return Some(Resolved {
                    cond,
                    ..Resolved::plain(entry)
                });
            }
        }
    }

    // 3. Trailing vector-predicate letter, only under the vector extension
    if name.len() > 1 && features.has(Feature::VectorPredication) {
        let (prefix, suffix) = name.split_at(name.len() - 1);
        let vpred = match suffix {
            "t" => Some(VecPred::Then),
            "e" => Some(VecPred::Else),
            _ => None,
        };
        if let (Some(vpred), Some(entry)) = (vpred, catalog.lookup(prefix)) {
            if entry.affix == Affix::VecSuffix {
                return Some(Resolved {
                    vpred: Some(vpred),
                    ..Resolved::plain(entry)
                });
            }
        }
    }

    // 4. Legacy spelling with the condition after the third character
    if name.len() >= 5 {
        if let Some(cond) = Cond::from_suffix(&name[3..5]) {
            let candidate = format!("{}{}", &name[..3], &name[5..]);
            if let Some(entry) = catalog.lookup(&candidate) {
                if entry.legacy_infix {
                    return Some(Resolved {
                        cond,
                        deprecated: true,
                        ..Resolved::plain(entry)
                    });
                }
            }
        }
    }

    None
}

//! Instruction-set extension selection
//!
//! A `FeatureSet` is fixed for the lifetime of an assembly session and is
//! read-only while instructions are processed.

/// An instruction-set extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feature {
    /// 32-bit (wide) encodings
    Wide,
    /// Hardware multiply
    Multiply,
    /// Vector-predication extension (q registers, `vpst` blocks)
    VectorPredication,
}

impl Feature {
    fn bit(self) -> u32 {
        match self {
            Feature::Wide => 1 << 0,
            Feature::Multiply => 1 << 1,
            Feature::VectorPredication => 1 << 2,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Feature::Wide => "wide-encoding",
            Feature::Multiply => "multiply",
            Feature::VectorPredication => "vector-predication",
        }
    }
}

/// Bitset of enabled extensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FeatureSet(u32);

impl FeatureSet {
    /// Narrow-only baseline: no extensions
    pub fn baseline() -> Self {
        FeatureSet(0).with(Feature::Multiply)
    }

    /// Baseline plus wide encodings
    pub fn dual_width() -> Self {
        Self::baseline().with(Feature::Wide)
    }

    /// Everything, including vector predication
    pub fn full() -> Self {
        Self::dual_width().with(Feature::VectorPredication)
    }

    pub fn with(self, feature: Feature) -> Self {
        FeatureSet(self.0 | feature.bit())
    }

    pub fn has(self, feature: Feature) -> bool {
        self.0 & feature.bit() != 0
    }

    /// True when every feature in `mask` is enabled
    pub fn has_all(self, mask: FeatureSet) -> bool {
        self.0 & mask.0 == mask.0
    }

    /// First feature in `mask` that is missing from `self`, for diagnostics
    pub fn first_missing(self, mask: FeatureSet) -> Option<Feature> {
        [Feature::Wide, Feature::Multiply, Feature::VectorPredication]
            .into_iter()
            .find(|f| mask.has(*f) && !self.has(*f))
    }
}

impl From<Feature> for FeatureSet {
    fn from(f: Feature) -> Self {
        FeatureSet(f.bit())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profiles() {
        assert!(!FeatureSet::baseline().has(Feature::Wide));
        assert!(FeatureSet::dual_width().has(Feature::Wide));
        assert!(!FeatureSet::dual_width().has(Feature::VectorPredication));
        assert!(FeatureSet::full().has(Feature::VectorPredication));
    }

    #[test]
    fn test_first_missing() {
        let need = FeatureSet::from(Feature::VectorPredication);
        assert_eq!(
            FeatureSet::dual_width().first_missing(need),
            Some(Feature::VectorPredication)
        );
        assert_eq!(FeatureSet::full().first_missing(need), None);
    }
}

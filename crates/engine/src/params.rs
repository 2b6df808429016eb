//! Parameter space: the tunable genes and their quantized numeric domains
//!
//! Genes form a closed enum indexed into a fixed-size array. Names are only
//! resolved when loading configuration (overrides, named gene maps); the
//! optimizer itself works on `GeneValues` by index.

use std::collections::BTreeMap;
use std::ops::{Index, IndexMut};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const GENE_COUNT: usize = 26;

/// Factor weights share a group that always sums to 1.0
pub const WEIGHT_GENES: [Gene; 8] = [
    Gene::WeightTechnical,
    Gene::WeightMomentum,
    Gene::WeightVolatility,
    Gene::WeightVolume,
    Gene::WeightSentiment,
    Gene::WeightPattern,
    Gene::WeightBreadth,
    Gene::WeightMeanReversion,
];

/// Every tunable parameter of the signal model and the portfolio rules
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gene {
    WeightTechnical,
    WeightMomentum,
    WeightVolatility,
    WeightVolume,
    WeightSentiment,
    WeightPattern,
    WeightBreadth,
    WeightMeanReversion,
    RsiPeriod,
    RsiOversold,
    RsiOverbought,
    MacdFast,
    MacdSlow,
    MacdSignal,
    BollingerPeriod,
    BollingerStd,
    MomentumLookback,
    VolatilityLookback,
    AtrPeriod,
    StopLossAtr,
    TakeProfitAtr,
    BuyThreshold,
    ConfidenceThreshold,
    MaxPositions,
    MaxPositionPct,
    RequireVolumeConfirmation,
}

impl Gene {
    pub const ALL: [Gene; GENE_COUNT] = [
        Gene::WeightTechnical,
        Gene::WeightMomentum,
        Gene::WeightVolatility,
        Gene::WeightVolume,
        Gene::WeightSentiment,
        Gene::WeightPattern,
        Gene::WeightBreadth,
        Gene::WeightMeanReversion,
        Gene::RsiPeriod,
        Gene::RsiOversold,
        Gene::RsiOverbought,
        Gene::MacdFast,
        Gene::MacdSlow,
        Gene::MacdSignal,
        Gene::BollingerPeriod,
        Gene::BollingerStd,
        Gene::MomentumLookback,
        Gene::VolatilityLookback,
        Gene::AtrPeriod,
        Gene::StopLossAtr,
        Gene::TakeProfitAtr,
        Gene::BuyThreshold,
        Gene::ConfidenceThreshold,
        Gene::MaxPositions,
        Gene::MaxPositionPct,
        Gene::RequireVolumeConfirmation,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Gene::WeightTechnical => "weight_technical",
            Gene::WeightMomentum => "weight_momentum",
            Gene::WeightVolatility => "weight_volatility",
            Gene::WeightVolume => "weight_volume",
            Gene::WeightSentiment => "weight_sentiment",
            Gene::WeightPattern => "weight_pattern",
            Gene::WeightBreadth => "weight_breadth",
            Gene::WeightMeanReversion => "weight_mean_reversion",
            Gene::RsiPeriod => "rsi_period",
            Gene::RsiOversold => "rsi_oversold",
            Gene::RsiOverbought => "rsi_overbought",
            Gene::MacdFast => "macd_fast",
            Gene::MacdSlow => "macd_slow",
            Gene::MacdSignal => "macd_signal",
            Gene::BollingerPeriod => "bollinger_period",
            Gene::BollingerStd => "bollinger_std",
            Gene::MomentumLookback => "momentum_lookback",
            Gene::VolatilityLookback => "volatility_lookback",
            Gene::AtrPeriod => "atr_period",
            Gene::StopLossAtr => "stop_loss_atr",
            Gene::TakeProfitAtr => "take_profit_atr",
            Gene::BuyThreshold => "buy_threshold",
            Gene::ConfidenceThreshold => "confidence_threshold",
            Gene::MaxPositions => "max_positions",
            Gene::MaxPositionPct => "max_position_pct",
            Gene::RequireVolumeConfirmation => "require_volume_confirmation",
        }
    }

    /// Resolve a configuration name. Only used at load time.
    pub fn from_name(name: &str) -> Option<Gene> {
        Gene::ALL.iter().copied().find(|g| g.name() == name)
    }

    pub fn is_weight(self) -> bool {
        WEIGHT_GENES.contains(&self)
    }
}

/// Numeric domain of one gene
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub name: String,
    pub min: f64,
    pub max: f64,
    pub step: f64,
    pub is_integer: bool,
    pub is_boolean: bool,
}

/// Values are rounded to this many decimals after snapping to a grid, so
/// `0.05 + 25 * 0.01` stores as `0.3` rather than `0.30000000000000004`.
const GRID_DECIMALS: f64 = 1e9;
const GRID_TOLERANCE: f64 = 1e-7;

impl ParameterSpec {
    pub fn float(gene: Gene, min: f64, max: f64, step: f64) -> Self {
        Self {
            name: gene.name().to_string(),
            min,
            max,
            step,
            is_integer: false,
            is_boolean: false,
        }
    }

    pub fn integer(gene: Gene, min: f64, max: f64) -> Self {
        Self {
            name: gene.name().to_string(),
            min,
            max,
            step: 1.0,
            is_integer: true,
            is_boolean: false,
        }
    }

    pub fn boolean(gene: Gene) -> Self {
        Self {
            name: gene.name().to_string(),
            min: 0.0,
            max: 1.0,
            step: 1.0,
            is_integer: true,
            is_boolean: true,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.step > 0.0) || !self.step.is_finite() {
            return Err(ConfigError::NonPositiveStep {
                name: self.name.clone(),
                step: self.step,
            });
        }
        if !(self.min <= self.max) {
            return Err(ConfigError::InvertedRange {
                name: self.name.clone(),
                min: self.min,
                max: self.max,
            });
        }
        Ok(())
    }

    /// Highest grid index `k` such that `min + k*step <= max`
    pub fn grid_len(&self) -> u64 {
        ((self.max - self.min) / self.step + GRID_TOLERANCE).floor().max(0.0) as u64
    }

    /// Value of grid point `k` (clamped to the grid)
    pub fn value_at(&self, k: u64) -> f64 {
        let k = k.min(self.grid_len());
        let raw = self.min + k as f64 * self.step;
        let value = if self.is_integer {
            raw.round()
        } else {
            (raw * GRID_DECIMALS).round() / GRID_DECIMALS
        };
        value.clamp(self.min, self.max)
    }

    /// Grid index nearest to `value` after clamping to `[min, max]`
    pub fn grid_index(&self, value: f64) -> u64 {
        if !value.is_finite() {
            return 0;
        }
        let clamped = value.clamp(self.min, self.max);
        let k = ((clamped - self.min) / self.step).round().max(0.0) as u64;
        k.min(self.grid_len())
    }

    /// Clamp to `[min, max]` and snap to the nearest grid point
    pub fn quantize(&self, value: f64) -> f64 {
        self.value_at(self.grid_index(value))
    }

    pub fn contains(&self, value: f64) -> bool {
        if !value.is_finite() || value < self.min - GRID_TOLERANCE || value > self.max + GRID_TOLERANCE {
            return false;
        }
        let steps = (value - self.min) / self.step;
        (steps - steps.round()).abs() < 1e-6
    }
}

/// Named bundles of gene domains
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpaceVariant {
    #[default]
    Standard,
    /// Wider period, threshold and risk ranges
    Wide,
}

/// Partial override of a gene's domain loaded from configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpecOverride {
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub step: Option<f64>,
}

/// One [`ParameterSpec`] per gene; immutable once built
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpace {
    specs: Vec<ParameterSpec>,
}

impl ParameterSpace {
    pub fn new(variant: SpaceVariant) -> Self {
        let wide = variant == SpaceVariant::Wide;
        let pick = |standard: (f64, f64), wide_range: (f64, f64)| {
            if wide {
                wide_range
            } else {
                standard
            }
        };

        let specs = Gene::ALL
            .iter()
            .map(|&gene| match gene {
                Gene::WeightTechnical
                | Gene::WeightMomentum
                | Gene::WeightVolatility
                | Gene::WeightVolume
                | Gene::WeightSentiment
                | Gene::WeightPattern
                | Gene::WeightBreadth
                | Gene::WeightMeanReversion => ParameterSpec::float(gene, 0.0, 1.0, 0.01),
                Gene::RsiPeriod => {
                    let (lo, hi) = pick((7.0, 28.0), (5.0, 35.0));
                    ParameterSpec::integer(gene, lo, hi)
                }
                Gene::RsiOversold => {
                    let (lo, hi) = pick((20.0, 40.0), (15.0, 45.0));
                    ParameterSpec::integer(gene, lo, hi)
                }
                Gene::RsiOverbought => {
                    let (lo, hi) = pick((60.0, 80.0), (55.0, 85.0));
                    ParameterSpec::integer(gene, lo, hi)
                }
                Gene::MacdFast => ParameterSpec::integer(gene, 8.0, 16.0),
                Gene::MacdSlow => ParameterSpec::integer(gene, 20.0, 34.0),
                Gene::MacdSignal => ParameterSpec::integer(gene, 5.0, 12.0),
                Gene::BollingerPeriod => {
                    let (lo, hi) = pick((10.0, 30.0), (10.0, 40.0));
                    ParameterSpec::integer(gene, lo, hi)
                }
                Gene::BollingerStd => ParameterSpec::float(gene, 1.5, 3.0, 0.1),
                Gene::MomentumLookback => {
                    let (lo, hi) = pick((5.0, 20.0), (3.0, 30.0));
                    ParameterSpec::integer(gene, lo, hi)
                }
                Gene::VolatilityLookback => {
                    let (lo, hi) = pick((10.0, 40.0), (10.0, 45.0));
                    ParameterSpec::integer(gene, lo, hi)
                }
                Gene::AtrPeriod => ParameterSpec::integer(gene, 7.0, 21.0),
                Gene::StopLossAtr => {
                    let (lo, hi) = pick((1.0, 4.0), (0.5, 5.0));
                    ParameterSpec::float(gene, lo, hi, 0.25)
                }
                Gene::TakeProfitAtr => {
                    let (lo, hi) = pick((1.5, 6.0), (1.0, 8.0));
                    ParameterSpec::float(gene, lo, hi, 0.25)
                }
                Gene::BuyThreshold => {
                    let (lo, hi) = pick((0.05, 0.30), (0.02, 0.40));
                    ParameterSpec::float(gene, lo, hi, 0.01)
                }
                Gene::ConfidenceThreshold => {
                    let (lo, hi) = pick((0.0, 0.30), (0.0, 0.40));
                    ParameterSpec::float(gene, lo, hi, 0.01)
                }
                Gene::MaxPositions => {
                    let (lo, hi) = pick((3.0, 15.0), (2.0, 20.0));
                    ParameterSpec::integer(gene, lo, hi)
                }
                Gene::MaxPositionPct => {
                    let (lo, hi) = pick((0.05, 0.25), (0.03, 0.35));
                    ParameterSpec::float(gene, lo, hi, 0.01)
                }
                Gene::RequireVolumeConfirmation => ParameterSpec::boolean(gene),
            })
            .collect();

        Self { specs }
    }

    /// Build a variant and apply per-name overrides from configuration
    pub fn with_overrides(
        variant: SpaceVariant,
        overrides: &BTreeMap<String, SpecOverride>,
    ) -> Result<Self, ConfigError> {
        let mut space = Self::new(variant);
        for (name, patch) in overrides {
            let gene =
                Gene::from_name(name).ok_or_else(|| ConfigError::UnknownParameter(name.clone()))?;
            if gene.is_weight() {
                return Err(ConfigError::invalid(
                    "parameter_overrides",
                    format!("free of weight genes ('{name}' has a fixed 0.01 grid)"),
                ));
            }
            let spec = &mut space.specs[gene.index()];
            if spec.is_boolean {
                continue;
            }
            if let Some(min) = patch.min {
                spec.min = min;
            }
            if let Some(max) = patch.max {
                spec.max = max;
            }
            if let Some(step) = patch.step {
                spec.step = if spec.is_integer { step.round().max(1.0) } else { step };
            }
        }
        space.validate()?;
        Ok(space)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.specs.iter().try_for_each(ParameterSpec::validate)
    }

    pub fn spec(&self, gene: Gene) -> &ParameterSpec {
        &self.specs[gene.index()]
    }

    pub fn specs(&self) -> &[ParameterSpec] {
        &self.specs
    }
}

impl Default for ParameterSpace {
    fn default() -> Self {
        Self::new(SpaceVariant::Standard)
    }
}

/// Fixed-size gene value array indexed by [`Gene`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeneValues([f64; GENE_COUNT]);

impl GeneValues {
    pub fn zeroed() -> Self {
        Self([0.0; GENE_COUNT])
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    pub fn get(&self, gene: Gene) -> f64 {
        self.0[gene.index()]
    }

    pub fn usize(&self, gene: Gene) -> usize {
        self.0[gene.index()].round().max(0.0) as usize
    }

    pub fn flag(&self, gene: Gene) -> bool {
        self.0[gene.index()] >= 0.5
    }

    /// Gene map keyed by name, in declaration order
    pub fn to_named(&self) -> BTreeMap<String, f64> {
        Gene::ALL
            .iter()
            .map(|g| (g.name().to_string(), self.get(*g)))
            .collect()
    }

    /// Build from a name → value map. Unknown names are rejected; missing
    /// genes take `fallback`'s values.
    pub fn from_named(
        values: &BTreeMap<String, f64>,
        fallback: &GeneValues,
    ) -> Result<Self, ConfigError> {
        let mut genes = *fallback;
        for (name, value) in values {
            let gene =
                Gene::from_name(name).ok_or_else(|| ConfigError::UnknownParameter(name.clone()))?;
            genes[gene] = *value;
        }
        Ok(genes)
    }
}

impl Index<Gene> for GeneValues {
    type Output = f64;

    fn index(&self, gene: Gene) -> &f64 {
        &self.0[gene.index()]
    }
}

impl IndexMut<Gene> for GeneValues {
    fn index_mut(&mut self, gene: Gene) -> &mut f64 {
        &mut self.0[gene.index()]
    }
}

impl Serialize for GeneValues {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_named().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for GeneValues {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let named = BTreeMap::<String, f64>::deserialize(deserializer)?;
        GeneValues::from_named(&named, &GeneValues::zeroed()).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gene_table_is_consistent() {
        for (i, gene) in Gene::ALL.iter().enumerate() {
            assert_eq!(gene.index(), i);
            assert_eq!(Gene::from_name(gene.name()), Some(*gene));
        }
        assert_eq!(Gene::from_name("no_such_gene"), None);
    }

    #[test]
    fn test_default_space_is_valid() {
        assert!(ParameterSpace::new(SpaceVariant::Standard).validate().is_ok());
        assert!(ParameterSpace::new(SpaceVariant::Wide).validate().is_ok());
    }

    #[test]
    fn test_quantize_clamps_out_of_range() {
        let space = ParameterSpace::default();
        let spec = space.spec(Gene::BuyThreshold);
        assert!((spec.quantize(1.1) - 0.3).abs() < 1e-12);
        assert!((spec.quantize(-4.0) - 0.05).abs() < 1e-12);
        assert!((spec.quantize(0.1349) - 0.13).abs() < 1e-12);
        assert!(spec.contains(spec.quantize(0.1349)));
    }

    #[test]
    fn test_integer_specs_snap_to_integers() {
        let space = ParameterSpace::default();
        let spec = space.spec(Gene::RsiPeriod);
        assert_eq!(spec.quantize(13.6), 14.0);
        assert_eq!(spec.grid_len(), 21);
        assert_eq!(spec.value_at(spec.grid_len()), 28.0);
    }

    #[test]
    fn test_boolean_spec_has_two_points() {
        let space = ParameterSpace::default();
        let spec = space.spec(Gene::RequireVolumeConfirmation);
        assert!(spec.is_boolean);
        assert_eq!(spec.grid_len(), 1);
        assert_eq!(spec.quantize(0.7), 1.0);
    }

    #[test]
    fn test_overrides_by_name() {
        let mut overrides = BTreeMap::new();
        overrides.insert(
            "buy_threshold".to_string(),
            SpecOverride {
                min: Some(0.1),
                max: Some(0.2),
                step: None,
            },
        );
        let space = ParameterSpace::with_overrides(SpaceVariant::Standard, &overrides).unwrap();
        assert_eq!(space.spec(Gene::BuyThreshold).min, 0.1);
        assert_eq!(space.spec(Gene::BuyThreshold).max, 0.2);
    }

    #[test]
    fn test_invalid_overrides_rejected() {
        let mut unknown = BTreeMap::new();
        unknown.insert("bogus".to_string(), SpecOverride::default());
        assert_eq!(
            ParameterSpace::with_overrides(SpaceVariant::Standard, &unknown),
            Err(ConfigError::UnknownParameter("bogus".to_string()))
        );

        let mut inverted = BTreeMap::new();
        inverted.insert(
            "atr_period".to_string(),
            SpecOverride {
                min: Some(30.0),
                max: Some(10.0),
                step: None,
            },
        );
        assert!(matches!(
            ParameterSpace::with_overrides(SpaceVariant::Standard, &inverted),
            Err(ConfigError::InvertedRange { .. })
        ));
    }

    #[test]
    fn test_gene_values_serialize_by_name() {
        let mut genes = GeneValues::zeroed();
        genes[Gene::RsiPeriod] = 14.0;
        let json = serde_json::to_value(genes).unwrap();
        assert_eq!(json["rsi_period"], 14.0);
        let back: GeneValues = serde_json::from_value(json).unwrap();
        assert_eq!(back.get(Gene::RsiPeriod), 14.0);
    }
}

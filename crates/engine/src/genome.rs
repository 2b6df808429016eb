//! Genome: an encoded parameter assignment plus lineage and fitness metadata

use std::collections::BTreeMap;

use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::ConfigError;
use crate::params::{Gene, GeneValues, ParameterSpace, WEIGHT_GENES};
use crate::types::RiskMetrics;

/// Fitness of a genome that has not been evaluated yet
pub const UNEVALUATED_FITNESS: f64 = f64::NEG_INFINITY;

/// One candidate parameter assignment under optimization
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Genome {
    pub id: u64,
    pub genes: GeneValues,
    pub fitness: f64,
    pub risk_metrics: RiskMetrics,
    pub generation: u32,
    pub island_id: usize,
    pub parent_ids: Vec<u64>,
    pub mutation_log: Vec<String>,
    pub evaluated: bool,
}

impl Genome {
    /// Wrap raw gene values, snapping them onto the space's grid and
    /// renormalizing the weight group.
    pub fn new(id: u64, genes: GeneValues, space: &ParameterSpace, island_id: usize) -> Self {
        let mut genome = Self {
            id,
            genes,
            fitness: UNEVALUATED_FITNESS,
            risk_metrics: RiskMetrics::default(),
            generation: 0,
            island_id,
            parent_ids: Vec::new(),
            mutation_log: Vec::new(),
            evaluated: false,
        };
        genome.repair(space);
        genome
    }

    /// Uniform draw over every gene's quantized grid
    pub fn random(id: u64, space: &ParameterSpace, island_id: usize, rng: &mut impl Rng) -> Self {
        let mut genes = GeneValues::zeroed();
        for gene in Gene::ALL {
            let spec = space.spec(gene);
            let k = rng.gen_range(0..=spec.grid_len());
            genes[gene] = spec.value_at(k);
        }
        Self::new(id, genes, space, island_id)
    }

    /// Build from a name → value map (e.g. a seed configuration). Values are
    /// clamped and quantized; missing genes come from the middle of their range.
    pub fn from_named(
        id: u64,
        values: &BTreeMap<String, f64>,
        space: &ParameterSpace,
    ) -> Result<Self, ConfigError> {
        let mut midpoint = GeneValues::zeroed();
        for gene in Gene::ALL {
            let spec = space.spec(gene);
            midpoint[gene] = spec.value_at(spec.grid_len() / 2);
        }
        let genes = GeneValues::from_named(values, &midpoint)?;
        Ok(Self::new(id, genes, space, 0))
    }

    /// Restore the encoding invariants after any change to `genes`
    pub fn repair(&mut self, space: &ParameterSpace) {
        for gene in Gene::ALL {
            self.genes[gene] = space.spec(gene).quantize(self.genes[gene]);
        }
        normalize_weights(&mut self.genes, space);
    }

    /// Drop evaluation results so the genome is scored again
    pub fn reset_evaluation(&mut self) {
        self.fitness = UNEVALUATED_FITNESS;
        self.risk_metrics = RiskMetrics::default();
        self.evaluated = false;
    }

    /// Hex SHA-256 over the serialized gene map; equal genotypes share it
    pub fn fingerprint(&self) -> String {
        genotype_fingerprint(&self.genes)
    }

    pub fn weight_sum(&self) -> f64 {
        WEIGHT_GENES.iter().map(|g| self.genes[*g]).sum()
    }
}

pub fn genotype_fingerprint(genes: &GeneValues) -> String {
    let json = serde_json::to_string(genes).unwrap_or_default();
    format!("{:x}", Sha256::digest(json.as_bytes()))
}

/// Renormalize the weight group so it sums to 1.0 while staying on the
/// weight grid. Weights are apportioned in grid units with the
/// largest-remainder method; a zero-sum group becomes an equal split.
pub fn normalize_weights(genes: &mut GeneValues, space: &ParameterSpace) {
    let spec = space.spec(WEIGHT_GENES[0]);
    let total_units = (1.0 / spec.step).round() as u64;
    let max_units = spec.grid_len();

    let raw: Vec<f64> = WEIGHT_GENES.iter().map(|g| genes[*g].max(0.0)).collect();
    let sum: f64 = raw.iter().sum();
    let shares: Vec<f64> = if sum > 0.0 && sum.is_finite() {
        raw.iter().map(|w| w / sum).collect()
    } else {
        vec![1.0 / WEIGHT_GENES.len() as f64; WEIGHT_GENES.len()]
    };

    let exact: Vec<f64> = shares.iter().map(|s| s * total_units as f64).collect();
    let mut units: Vec<u64> = exact
        .iter()
        .map(|e| (e.floor() as u64).min(max_units))
        .collect();

    let mut assigned: u64 = units.iter().sum();
    let mut order: Vec<usize> = (0..units.len()).collect();
    // Largest fractional remainder first; stable sort keeps lower indices ahead on ties.
    order.sort_by(|&a, &b| {
        let ra = exact[a] - exact[a].floor();
        let rb = exact[b] - exact[b].floor();
        rb.total_cmp(&ra)
    });
    let mut cursor = 0usize;
    while assigned < total_units && cursor < order.len() * 2 {
        let i = order[cursor % order.len()];
        if units[i] < max_units {
            units[i] += 1;
            assigned += 1;
        }
        cursor += 1;
    }

    for (gene, u) in WEIGHT_GENES.iter().zip(units) {
        genes[*gene] = spec.value_at(u);
    }
}

/// Panics unless every gene is on its grid and the weight group sums to 1.0
#[cfg(test)]
pub(crate) fn assert_genome_valid(genome: &Genome, space: &ParameterSpace) {
    for gene in Gene::ALL {
        let spec = space.spec(gene);
        let value = genome.genes[gene];
        assert!(
            spec.contains(value),
            "{} = {} not on grid [{}, {}] step {}",
            spec.name,
            value,
            spec.min,
            spec.max,
            spec.step
        );
    }
    assert!(
        (genome.weight_sum() - 1.0).abs() < 1e-9,
        "weights sum to {}",
        genome.weight_sum()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_random_genomes_respect_invariants() {
        let space = ParameterSpace::default();
        let mut rng = StdRng::seed_from_u64(7);
        for id in 0..200 {
            let genome = Genome::random(id, &space, 0, &mut rng);
            assert_genome_valid(&genome, &space);
            assert!(!genome.evaluated);
        }
    }

    #[test]
    fn test_out_of_range_value_is_clamped_on_construction() {
        let space = ParameterSpace::default();
        let mut values = BTreeMap::new();
        values.insert("buy_threshold".to_string(), 1.1);
        let genome = Genome::from_named(1, &values, &space).unwrap();
        assert!((genome.genes[Gene::BuyThreshold] - 0.3).abs() < 1e-12);
        assert_genome_valid(&genome, &space);
    }

    #[test]
    fn test_unknown_gene_name_rejected() {
        let space = ParameterSpace::default();
        let mut values = BTreeMap::new();
        values.insert("moon_phase".to_string(), 1.0);
        assert!(Genome::from_named(1, &values, &space).is_err());
    }

    #[test]
    fn test_zero_weights_become_equal_split() {
        let space = ParameterSpace::default();
        let mut genes = GeneValues::zeroed();
        normalize_weights(&mut genes, &space);
        let weights: Vec<f64> = WEIGHT_GENES.iter().map(|g| genes[*g]).collect();
        let sum: f64 = weights.iter().sum();
        assert!((sum - 1.0).abs() < 1e-9);
        for w in &weights {
            assert!((*w - 0.125).abs() <= 0.005 + 1e-12, "weight {w}");
        }
    }

    #[test]
    fn test_normalization_preserves_proportions() {
        let space = ParameterSpace::default();
        let mut genes = GeneValues::zeroed();
        genes[Gene::WeightTechnical] = 0.6;
        genes[Gene::WeightMomentum] = 0.2;
        genes[Gene::WeightVolume] = 0.2;
        normalize_weights(&mut genes, &space);
        assert!((genes[Gene::WeightTechnical] - 0.6).abs() < 1e-12);
        assert!((genes[Gene::WeightMomentum] - 0.2).abs() < 1e-12);
        assert_eq!(genes[Gene::WeightPattern], 0.0);
    }

    #[test]
    fn test_fingerprint_tracks_genotype() {
        let space = ParameterSpace::default();
        let mut rng = StdRng::seed_from_u64(3);
        let a = Genome::random(1, &space, 0, &mut rng);
        let mut b = a.clone();
        b.id = 99;
        b.fitness = 12.0;
        assert_eq!(a.fingerprint(), b.fingerprint());
        b.genes[Gene::RsiPeriod] = if a.genes[Gene::RsiPeriod] == 7.0 { 8.0 } else { 7.0 };
        assert_ne!(a.fingerprint(), b.fingerprint());
    }
}

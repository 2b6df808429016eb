//! Run configuration and presets
//!
//! One engine serves every search profile: a [`RunConfig`] bundles the
//! population shape, operator rates, migration cadence, parameter-space
//! variant and fitness settings. Presets provide tested starting points;
//! JSON files and CLI flags override individual fields.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::adaptive::AdaptiveConfig;
use crate::error::ConfigError;
use crate::fitness::FitnessConfig;
use crate::judge::JudgeConfig;
use crate::params::{ParameterSpace, SpaceVariant, SpecOverride};
use crate::scorer::MIN_SCORING_BARS;
use crate::simulator::SimulationConfig;

/// Smallest island that can hold an elite, a migrant and offspring
const MIN_ISLAND_CAPACITY: usize = 4;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPreset {
    #[default]
    Standard,
    /// Larger population over the wide space, stricter trade minimum
    Extended,
    /// Small and fast, for smoke runs
    Quick,
}

impl RunPreset {
    pub fn name(self) -> &'static str {
        match self {
            RunPreset::Standard => "standard",
            RunPreset::Extended => "extended",
            RunPreset::Quick => "quick",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "standard" => Some(RunPreset::Standard),
            "extended" => Some(RunPreset::Extended),
            "quick" => Some(RunPreset::Quick),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub seed: u64,

    // Population shape
    /// Total genomes across all islands
    pub population_size: usize,
    pub island_count: usize,
    pub max_generations: u32,
    /// Stop once this many evaluations have run
    pub max_evaluations: Option<u64>,

    // Reproduction
    /// Elites across the whole population; split evenly over islands
    pub elite_count: usize,
    pub tournament_size: usize,
    pub crossover_rate: f64,
    /// Chance a crossover child is also mutated
    pub post_crossover_mutation: f64,
    /// Base per-gene mutation probability
    pub mutation_rate: f64,
    /// Rate multiplier for mutation-only offspring
    pub mutation_only_multiplier: f64,
    pub adaptive: AdaptiveConfig,

    // Island exchange and diversity
    pub migration_interval: u32,
    pub migration_count: usize,
    pub diversity_threshold: f64,
    pub diversity_min_generation: u32,
    pub diversity_injection_count: usize,

    // Learning
    pub learning_interval: u32,
    pub guided_mutation_fraction: f64,
    pub insight_threshold: f64,
    pub insight_history_limit: usize,

    // Execution
    pub batch_size: usize,
    /// Evaluation threads; 0 uses one per core
    pub workers: usize,
    pub min_symbols: usize,
    pub top_n: usize,

    // Search space and scoring
    pub space_variant: SpaceVariant,
    pub parameter_overrides: BTreeMap<String, SpecOverride>,
    /// Named gene maps planted into the initial population
    pub seed_genomes: Vec<BTreeMap<String, f64>>,
    pub fitness: FitnessConfig,
    pub simulation: SimulationConfig,
    pub judge: JudgeConfig,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            population_size: 200,
            island_count: 4,
            max_generations: 100,
            max_evaluations: None,
            elite_count: 8,
            tournament_size: 5,
            crossover_rate: 0.8,
            post_crossover_mutation: 0.3,
            mutation_rate: 0.1,
            mutation_only_multiplier: 2.0,
            adaptive: AdaptiveConfig::default(),
            migration_interval: 10,
            migration_count: 3,
            diversity_threshold: 0.1,
            diversity_min_generation: 10,
            diversity_injection_count: 2,
            learning_interval: 5,
            guided_mutation_fraction: 0.3,
            insight_threshold: 0.1,
            insight_history_limit: 200,
            batch_size: 32,
            workers: 0,
            min_symbols: 5,
            top_n: 10,
            space_variant: SpaceVariant::Standard,
            parameter_overrides: BTreeMap::new(),
            seed_genomes: Vec::new(),
            fitness: FitnessConfig::default(),
            simulation: SimulationConfig::default(),
            judge: JudgeConfig::default(),
        }
    }
}

impl RunConfig {
    pub fn preset(preset: RunPreset) -> Self {
        let base = Self::default();
        match preset {
            RunPreset::Standard => base,
            RunPreset::Extended => Self {
                population_size: 400,
                island_count: 8,
                max_generations: 250,
                elite_count: 16,
                migration_interval: 15,
                diversity_min_generation: 20,
                space_variant: SpaceVariant::Wide,
                fitness: FitnessConfig {
                    min_trades: 50,
                    drawdown_cap: 0.30,
                    ..FitnessConfig::default()
                },
                ..base
            },
            RunPreset::Quick => Self {
                population_size: 60,
                island_count: 3,
                max_generations: 25,
                elite_count: 3,
                migration_interval: 5,
                diversity_min_generation: 5,
                learning_interval: 3,
                batch_size: 16,
                fitness: FitnessConfig {
                    min_trades: 20,
                    drawdown_cap: 0.35,
                    ..FitnessConfig::default()
                },
                ..base
            },
        }
    }

    /// Genomes per island
    pub fn island_capacity(&self) -> usize {
        self.population_size / self.island_count.max(1)
    }

    /// Elites kept per island (at least one)
    pub fn elites_per_island(&self) -> usize {
        (self.elite_count / self.island_count.max(1)).max(1)
    }

    /// Build the parameter space this run searches
    pub fn parameter_space(&self) -> Result<ParameterSpace, ConfigError> {
        ParameterSpace::with_overrides(self.space_variant, &self.parameter_overrides)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let unit = |field: &'static str, v: f64| -> Result<(), ConfigError> {
            if (0.0..=1.0).contains(&v) {
                Ok(())
            } else {
                Err(ConfigError::invalid(field, format!("within [0, 1], got {v}")))
            }
        };

        if self.island_count == 0 {
            return Err(ConfigError::invalid("island_count", "at least 1"));
        }
        let capacity = self.island_capacity();
        if capacity < MIN_ISLAND_CAPACITY {
            return Err(ConfigError::invalid(
                "population_size",
                format!("at least {} per island", MIN_ISLAND_CAPACITY),
            ));
        }
        if self.elites_per_island() >= capacity {
            return Err(ConfigError::invalid("elite_count", "smaller than the island capacity"));
        }
        if self.migration_count >= capacity {
            return Err(ConfigError::invalid("migration_count", "smaller than the island capacity"));
        }
        if self.diversity_injection_count >= capacity {
            return Err(ConfigError::invalid(
                "diversity_injection_count",
                "smaller than the island capacity",
            ));
        }
        if self.max_generations == 0 {
            return Err(ConfigError::invalid("max_generations", "at least 1"));
        }
        if self.tournament_size == 0 {
            return Err(ConfigError::invalid("tournament_size", "at least 1"));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::invalid("batch_size", "at least 1"));
        }
        if self.migration_interval == 0 {
            return Err(ConfigError::invalid("migration_interval", "at least 1"));
        }
        if self.learning_interval == 0 {
            return Err(ConfigError::invalid("learning_interval", "at least 1"));
        }
        if self.min_symbols == 0 {
            return Err(ConfigError::invalid("min_symbols", "at least 1"));
        }

        unit("crossover_rate", self.crossover_rate)?;
        unit("post_crossover_mutation", self.post_crossover_mutation)?;
        unit("mutation_rate", self.mutation_rate)?;
        unit("guided_mutation_fraction", self.guided_mutation_fraction)?;
        unit("diversity_threshold", self.diversity_threshold)?;
        if !(self.mutation_only_multiplier >= 1.0) {
            return Err(ConfigError::invalid("mutation_only_multiplier", "at least 1.0"));
        }
        if !(self.insight_threshold > 0.0 && self.insight_threshold < 1.0) {
            return Err(ConfigError::invalid("insight_threshold", "within (0, 1)"));
        }
        if self.adaptive.floor_multiplier > 1.0 || self.adaptive.ceiling_multiplier < 1.0 {
            return Err(ConfigError::invalid(
                "adaptive",
                "floor_multiplier <= 1.0 <= ceiling_multiplier",
            ));
        }

        if !(self.fitness.drawdown_cap > 0.0 && self.fitness.drawdown_cap <= 1.0) {
            return Err(ConfigError::invalid("fitness.drawdown_cap", "within (0, 1]"));
        }
        if !(self.simulation.initial_capital > 0.0) {
            return Err(ConfigError::invalid("simulation.initial_capital", "positive"));
        }
        if self.simulation.warmup_bars < MIN_SCORING_BARS {
            return Err(ConfigError::invalid(
                "simulation.warmup_bars",
                format!("at least {MIN_SCORING_BARS}"),
            ));
        }
        if self.simulation.scoring_window < MIN_SCORING_BARS {
            return Err(ConfigError::invalid(
                "simulation.scoring_window",
                format!("at least {MIN_SCORING_BARS}"),
            ));
        }

        self.parameter_space()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets_are_valid() {
        for preset in [RunPreset::Standard, RunPreset::Extended, RunPreset::Quick] {
            let config = RunConfig::preset(preset);
            assert!(config.validate().is_ok(), "{} invalid", preset.name());
            assert_eq!(RunPreset::from_name(preset.name()), Some(preset));
        }
    }

    #[test]
    fn test_presets_carry_fitness_variants() {
        assert_eq!(RunConfig::preset(RunPreset::Extended).fitness.min_trades, 50);
        assert_eq!(RunConfig::preset(RunPreset::Quick).fitness.min_trades, 20);
        assert_eq!(RunConfig::preset(RunPreset::Quick).fitness.drawdown_cap, 0.35);
        assert_eq!(RunConfig::preset(RunPreset::Extended).space_variant, SpaceVariant::Wide);
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let json = r#"{ "population_size": 40, "island_count": 2, "fitness": { "min_trades": 10 } }"#;
        let config: RunConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.island_capacity(), 20);
        assert_eq!(config.fitness.min_trades, 10);
        assert_eq!(config.fitness.drawdown_cap, 0.30);
        assert_eq!(config.simulation.initial_capital, 100_000.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_settings_rejected() {
        let tiny = RunConfig {
            population_size: 6,
            island_count: 3,
            ..RunConfig::default()
        };
        assert!(tiny.validate().is_err());

        let rate = RunConfig {
            crossover_rate: 1.5,
            ..RunConfig::default()
        };
        assert!(matches!(rate.validate(), Err(ConfigError::Invalid { field: "crossover_rate", .. })));

        let mut overrides = BTreeMap::new();
        overrides.insert(
            "rsi_period".to_string(),
            SpecOverride {
                min: Some(30.0),
                max: Some(10.0),
                step: None,
            },
        );
        let inverted = RunConfig {
            parameter_overrides: overrides,
            ..RunConfig::default()
        };
        assert!(matches!(inverted.validate(), Err(ConfigError::InvertedRange { .. })));
    }
}

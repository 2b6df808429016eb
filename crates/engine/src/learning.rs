//! Learning engine: decile statistics over the population
//!
//! Compares the best and worst deciles gene by gene. A gene whose decile
//! averages differ by more than `insight_threshold` of its span yields a
//! [`LearningInsight`]. Guidance hints hold the correlations of the latest
//! pass only; a gene that drops under the threshold stops steering mutation.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::genome::Genome;
use crate::params::{Gene, ParameterSpace, GENE_COUNT};

/// Evaluated genomes required before deciles are meaningful
const MIN_SAMPLE: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningInsight {
    pub parameter_name: String,
    /// Signed, in `[-1, 1]`: positive means higher values sit in the top decile
    pub directional_correlation: f64,
    /// Genomes compared (both deciles)
    pub sample_size: usize,
    /// Average fitness gap between the top and bottom deciles
    pub fitness_delta: f64,
    pub confidence: f64,
    pub generation: u32,
}

/// Directional correlation per gene from the latest learning pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GuidanceHints {
    correlations: [Option<f64>; GENE_COUNT],
}

impl GuidanceHints {
    pub fn direction(&self, gene: Gene) -> Option<f64> {
        self.correlations[gene.index()]
    }

    pub fn set(&mut self, gene: Gene, correlation: f64) {
        self.correlations[gene.index()] = Some(correlation);
    }

    pub fn is_empty(&self) -> bool {
        self.correlations.iter().all(Option::is_none)
    }
}

#[derive(Debug, Clone)]
pub struct LearningEngine {
    insight_threshold: f64,
    history_limit: usize,
    insights: VecDeque<LearningInsight>,
    hints: GuidanceHints,
}

impl LearningEngine {
    pub fn new(insight_threshold: f64, history_limit: usize) -> Self {
        Self {
            insight_threshold,
            history_limit: history_limit.max(1),
            insights: VecDeque::new(),
            hints: GuidanceHints::default(),
        }
    }

    pub fn hints(&self) -> &GuidanceHints {
        &self.hints
    }

    pub fn insights(&self) -> impl Iterator<Item = &LearningInsight> {
        self.insights.iter()
    }

    /// Compare top and bottom deciles of the evaluated genomes. Returns
    /// the insights recorded by this pass.
    pub fn analyze<'a>(
        &mut self,
        population: impl IntoIterator<Item = &'a Genome>,
        space: &ParameterSpace,
        generation: u32,
    ) -> Vec<LearningInsight> {
        let mut ranked: Vec<&Genome> = population.into_iter().filter(|g| g.evaluated).collect();
        if ranked.len() < MIN_SAMPLE {
            return Vec::new();
        }
        ranked.sort_by(|a, b| b.fitness.total_cmp(&a.fitness));
        self.hints = GuidanceHints::default();

        let decile = (ranked.len() / 10).max(1);
        let top = &ranked[..decile];
        let bottom = &ranked[ranked.len() - decile..];
        let fitness_delta = group_mean(top, |g| g.fitness) - group_mean(bottom, |g| g.fitness);
        let sample_size = decile * 2;

        let mut recorded = Vec::new();
        for gene in Gene::ALL {
            let spec = space.spec(gene);
            let span = spec.max - spec.min;
            if span <= 0.0 {
                continue;
            }
            let relative =
                (group_mean(top, |g| g.genes[gene]) - group_mean(bottom, |g| g.genes[gene])) / span;
            if relative.abs() <= self.insight_threshold {
                continue;
            }

            let correlation = relative.clamp(-1.0, 1.0);
            let insight = LearningInsight {
                parameter_name: gene.name().to_string(),
                directional_correlation: correlation,
                sample_size,
                fitness_delta,
                confidence: (correlation.abs() * (sample_size as f64 / 20.0).min(1.0)).min(1.0),
                generation,
            };
            self.hints.set(gene, correlation);
            recorded.push(insight);
        }

        for insight in &recorded {
            if self.insights.len() == self.history_limit {
                self.insights.pop_front();
            }
            self.insights.push_back(insight.clone());
        }

        debug!(generation, insights = recorded.len(), sample_size, "Learning pass complete");
        recorded
    }
}

fn group_mean(group: &[&Genome], value: impl Fn(&Genome) -> f64) -> f64 {
    group.iter().map(|g| value(g)).sum::<f64>() / group.len() as f64
}

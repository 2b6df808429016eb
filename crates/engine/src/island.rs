//! Island population manager
//!
//! Owns every island, the run-wide best candidate and the single seeded
//! random source. One generation runs:
//!
//! 1. evaluate pending genomes (rayon batches, results applied serially)
//! 2. migrate every `migration_interval` generations
//! 3. inject random genomes when genotype diversity collapses
//! 4. evaluate migrants and injected genomes
//! 5. record statistics, learning pass, adaptive rate, convergence
//! 6. reproduce into the next generation
//!
//! All randomness is drawn on the control thread; evaluation is pure, so a
//! fixed seed reproduces a run exactly regardless of worker count.

use std::collections::HashSet;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::adaptive::AdaptiveMutationController;
use crate::config::RunConfig;
use crate::dataset::MarketDataset;
use crate::error::{EngineError, EngineResult};
use crate::fitness::{Evaluation, Evaluator};
use crate::genome::Genome;
use crate::judge::{Judge, Verdict};
use crate::learning::{LearningEngine, LearningInsight};
use crate::operators::{self, MutationParams};
use crate::params::ParameterSpace;
use crate::types::BacktestResult;

// ============================================================================
// Island
// ============================================================================

/// One independently evolving subpopulation
#[derive(Debug, Clone)]
pub struct Island {
    pub id: usize,
    pub genomes: Vec<Genome>,
}

impl Island {
    pub fn new(id: usize, genomes: Vec<Genome>) -> Self {
        Self { id, genomes }
    }

    pub fn len(&self) -> usize {
        self.genomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.genomes.is_empty()
    }

    /// Indices ordered by fitness, best first; ties keep population order
    pub fn ranked_indices(&self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.genomes.len()).collect();
        order.sort_by(|&a, &b| self.genomes[b].fitness.total_cmp(&self.genomes[a].fitness));
        order
    }

    /// The `n` fittest genomes
    pub fn top(&self, n: usize) -> Vec<&Genome> {
        self.ranked_indices()
            .into_iter()
            .take(n)
            .map(|i| &self.genomes[i])
            .collect()
    }

    /// Append migrants; the island may exceed its capacity until trimmed
    pub fn admit(&mut self, migrants: Vec<Genome>) {
        self.genomes.extend(migrants);
    }

    /// Remove the lowest-fitness evaluated residents until `capacity` remain.
    /// Unevaluated genomes (fresh migrants) are only removed if nothing else
    /// is left. Returns the removed genome ids.
    pub fn trim_to(&mut self, capacity: usize) -> Vec<u64> {
        let mut removed = Vec::new();
        while self.genomes.len() > capacity {
            let any_evaluated = self.genomes.iter().any(|g| g.evaluated);
            let mut worst: Option<usize> = None;
            for (i, genome) in self.genomes.iter().enumerate() {
                if any_evaluated && !genome.evaluated {
                    continue;
                }
                // `<=` picks the later of equal genomes, keeping the earlier one
                if worst.map_or(true, |w| genome.fitness <= self.genomes[w].fitness) {
                    worst = Some(i);
                }
            }
            match worst {
                Some(i) => removed.push(self.genomes.remove(i).id),
                None => break,
            }
        }
        removed
    }
}

// ============================================================================
// Run records
// ============================================================================

/// Best candidate the judge accepted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BestCandidate {
    pub genome: Genome,
    pub result: BacktestResult,
    pub verdict: Verdict,
    /// Generation in which it was recorded
    pub found_at: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationStats {
    pub generation: u32,
    pub best_fitness: f64,
    pub average_fitness: f64,
    pub worst_fitness: f64,
    /// Distinct genotypes / population
    pub diversity: f64,
    /// Mutation rate used to breed the next generation
    pub mutation_rate: f64,
    /// Evaluations so far in the run
    pub evaluations: u64,
    pub global_best_fitness: Option<f64>,
    pub migrated: usize,
    pub injected: usize,
    pub insights: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    Converged,
    MaxGenerations,
    EvaluationBudget,
    Cancelled,
}

impl TerminationReason {
    pub fn as_str(self) -> &'static str {
        match self {
            TerminationReason::Converged => "converged",
            TerminationReason::MaxGenerations => "max_generations",
            TerminationReason::EvaluationBudget => "evaluation_budget",
            TerminationReason::Cancelled => "cancelled",
        }
    }
}

/// Everything a finished run reports
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvolutionOutcome {
    /// Fittest evaluated genomes across all islands, best first
    pub top_genomes: Vec<Genome>,
    pub best: Option<BestCandidate>,
    pub insights: Vec<LearningInsight>,
    pub generations: Vec<GenerationStats>,
    pub termination: TerminationReason,
    pub evaluations: u64,
}

// ============================================================================
// Island model
// ============================================================================

pub struct IslandModel {
    config: RunConfig,
    space: ParameterSpace,
    evaluator: Evaluator,
    pool: rayon::ThreadPool,
    rng: StdRng,
    islands: Vec<Island>,
    next_id: u64,
    generation: u32,
    evaluations: u64,
    best: Option<BestCandidate>,
    controller: AdaptiveMutationController,
    learning: LearningEngine,
    judge: Judge,
    history: Vec<GenerationStats>,
    /// Insights recorded by the most recent learning pass
    latest_insights: Vec<LearningInsight>,
}

impl IslandModel {
    /// Validate the configuration, check the symbol universe and seed the
    /// initial islands.
    pub fn new(config: RunConfig, dataset: Arc<MarketDataset>) -> EngineResult<Self> {
        config.validate()?;
        let space = config.parameter_space()?;

        let eligible = dataset.eligible_symbols(config.simulation.warmup_bars);
        if eligible < config.min_symbols {
            return Err(EngineError::InsufficientUniverse {
                eligible,
                required: config.min_symbols,
            });
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.workers)
            .thread_name(|i| format!("evo-eval-{i}"))
            .build()
            .map_err(|e| EngineError::WorkerPool(e.to_string()))?;

        let evaluator = Evaluator::new(dataset, config.simulation.clone(), config.fitness.clone());
        let controller = AdaptiveMutationController::new(config.mutation_rate, config.adaptive.clone());
        let learning = LearningEngine::new(config.insight_threshold, config.insight_history_limit);
        let judge = Judge::new(config.judge.clone());

        let mut model = Self {
            rng: StdRng::seed_from_u64(config.seed),
            config,
            space,
            evaluator,
            pool,
            islands: Vec::new(),
            next_id: 0,
            generation: 0,
            evaluations: 0,
            best: None,
            controller,
            learning,
            judge,
            history: Vec::new(),
            latest_insights: Vec::new(),
        };
        model.initialize()?;
        Ok(model)
    }

    fn initialize(&mut self) -> EngineResult<()> {
        let capacity = self.config.island_capacity();
        let mut islands: Vec<Island> = (0..self.config.island_count)
            .map(|id| Island::new(id, Vec::with_capacity(capacity)))
            .collect();

        // Seed genomes are dealt round-robin ahead of random ones
        let seeds = self.config.seed_genomes.clone();
        for (k, values) in seeds.iter().enumerate() {
            let island = k % islands.len();
            if islands[island].len() >= capacity {
                continue;
            }
            let id = self.next_id();
            let mut genome = Genome::from_named(id, values, &self.space)?;
            genome.island_id = island;
            genome.mutation_log.push("seeded".to_string());
            islands[island].genomes.push(genome);
        }

        for island in islands.iter_mut() {
            while island.len() < capacity {
                let id = self.next_id();
                island.genomes.push(Genome::random(id, &self.space, island.id, &mut self.rng));
            }
        }

        info!(
            islands = islands.len(),
            capacity,
            seeded = seeds.len(),
            "Initialized island populations"
        );
        self.islands = islands;
        Ok(())
    }

    fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    pub fn evaluations(&self) -> u64 {
        self.evaluations
    }

    pub fn islands(&self) -> &[Island] {
        &self.islands
    }

    pub fn best(&self) -> Option<&BestCandidate> {
        self.best.as_ref()
    }

    pub fn history(&self) -> &[GenerationStats] {
        &self.history
    }

    pub fn space(&self) -> &ParameterSpace {
        &self.space
    }

    /// Insights found during the last completed generation
    pub fn latest_insights(&self) -> &[LearningInsight] {
        &self.latest_insights
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    // ------------------------------------------------------------------
    // Evaluation
    // ------------------------------------------------------------------

    /// Evaluate every unevaluated genome in batches of `batch_size`. The
    /// global best is updated after each batch, on this thread only.
    /// Returns the number of evaluations run.
    pub fn evaluate_pending(&mut self) -> usize {
        let pending: Vec<(usize, usize)> = self
            .islands
            .iter()
            .enumerate()
            .flat_map(|(i, island)| {
                island
                    .genomes
                    .iter()
                    .enumerate()
                    .filter(|(_, g)| !g.evaluated)
                    .map(move |(j, _)| (i, j))
            })
            .collect();

        for batch in pending.chunks(self.config.batch_size) {
            let evaluator = &self.evaluator;
            let islands = &self.islands;
            let results: Vec<Evaluation> = self.pool.install(|| {
                batch
                    .par_iter()
                    .map(|&(i, j)| evaluator.evaluate(&islands[i].genomes[j].genes))
                    .collect()
            });

            let mut candidates = Vec::new();
            for (&(i, j), evaluation) in batch.iter().zip(results) {
                let genome = &mut self.islands[i].genomes[j];
                genome.fitness = evaluation.fitness;
                genome.risk_metrics = evaluation.risk_metrics;
                genome.evaluated = true;
                self.evaluations += 1;
                if let Some(result) = evaluation.result {
                    candidates.push((i, j, result));
                }
            }

            for (i, j, result) in candidates {
                self.offer_best(i, j, result);
            }
        }
        pending.len()
    }

    /// Replace the global best if this genome is strictly fitter and the
    /// judge does not find it suspicious
    fn offer_best(&mut self, island: usize, index: usize, result: BacktestResult) -> bool {
        let genome = &self.islands[island].genomes[index];
        if let Some(best) = &self.best {
            if genome.fitness <= best.genome.fitness {
                return false;
            }
        }

        let verdict = self.judge.verdict(&genome.risk_metrics);
        if verdict.is_suspicious() {
            debug!(
                genome_id = genome.id,
                fitness = genome.fitness,
                sharpe = genome.risk_metrics.sharpe,
                win_rate = genome.risk_metrics.win_rate,
                "Judge rejected suspicious candidate"
            );
            return false;
        }

        debug!(
            genome_id = genome.id,
            island,
            fitness = genome.fitness,
            verdict = %verdict,
            "New global best"
        );
        self.best = Some(BestCandidate {
            genome: genome.clone(),
            result,
            verdict,
            found_at: self.generation,
        });
        true
    }

    // ------------------------------------------------------------------
    // Migration and diversity
    // ------------------------------------------------------------------

    /// Copy each island's top `migration_count` into the next island (ring)
    /// with fitness reset, then trim every island back to capacity.
    /// Returns the number of migrants moved.
    pub fn migrate(&mut self) -> usize {
        let n = self.islands.len();
        let count = self.config.migration_count;
        if n < 2 || count == 0 {
            return 0;
        }

        let outgoing: Vec<Vec<Genome>> = self
            .islands
            .iter()
            .map(|island| island.top(count).into_iter().cloned().collect())
            .collect();

        let mut moved = 0;
        for (source, migrants) in outgoing.into_iter().enumerate() {
            let target = (source + 1) % n;
            let arriving: Vec<Genome> = migrants
                .into_iter()
                .map(|original| {
                    let mut migrant = original.clone();
                    migrant.id = self.next_id();
                    migrant.island_id = target;
                    migrant.parent_ids = vec![original.id];
                    migrant.mutation_log = vec![format!("migrated from island {source}")];
                    migrant.reset_evaluation();
                    migrant
                })
                .collect();
            moved += arriving.len();
            self.islands[target].admit(arriving);
        }

        let capacity = self.config.island_capacity();
        for island in self.islands.iter_mut() {
            let removed = island.trim_to(capacity);
            debug!(island = island.id, removed = removed.len(), "Trimmed after migration");
        }
        moved
    }

    /// Distinct genotype fingerprints over the whole population
    pub fn diversity(&self) -> f64 {
        let total: usize = self.islands.iter().map(Island::len).sum();
        if total == 0 {
            return 0.0;
        }
        let distinct: HashSet<String> = self
            .islands
            .iter()
            .flat_map(|island| island.genomes.iter().map(Genome::fingerprint))
            .collect();
        distinct.len() as f64 / total as f64
    }

    /// Replace the worst genomes of every island with random ones when
    /// diversity has collapsed. Returns the number of genomes replaced.
    pub fn inject_diversity(&mut self) -> usize {
        if self.generation < self.config.diversity_min_generation {
            return 0;
        }
        let diversity = self.diversity();
        if diversity >= self.config.diversity_threshold {
            return 0;
        }

        let capacity = self.config.island_capacity();
        let count = self.config.diversity_injection_count;
        let mut injected = 0;
        for i in 0..self.islands.len() {
            let target = capacity.saturating_sub(count);
            self.islands[i].trim_to(target);
            while self.islands[i].len() < capacity {
                let id = self.next_id();
                let mut genome = Genome::random(id, &self.space, i, &mut self.rng);
                genome.generation = self.generation;
                genome.mutation_log.push("diversity injection".to_string());
                self.islands[i].genomes.push(genome);
                injected += 1;
            }
        }
        debug!(generation = self.generation, diversity, injected, "Injected random genomes");
        injected
    }

    // ------------------------------------------------------------------
    // Reproduction
    // ------------------------------------------------------------------

    /// Breed the next generation of every island: elites survive, the rest
    /// are crossover or mutation-only offspring of tournament winners.
    pub fn reproduce(&mut self) {
        let next_generation = self.generation + 1;
        let capacity = self.config.island_capacity();
        let elites = self.config.elites_per_island();
        let rate = self.controller.rate();
        let hints = if self.learning.hints().is_empty() {
            None
        } else {
            Some(self.learning.hints())
        };

        for island in self.islands.iter_mut() {
            let order = island.ranked_indices();
            let ranked: Vec<Genome> = order.iter().map(|&i| island.genomes[i].clone()).collect();
            let mut next: Vec<Genome> = Vec::with_capacity(capacity);

            for elite in ranked.iter().take(elites) {
                let mut survivor = elite.clone();
                survivor.generation = next_generation;
                next.push(survivor);
            }

            while next.len() < capacity {
                let id = self.next_id;
                self.next_id += 1;

                let child = if self.rng.gen_bool(self.config.crossover_rate) {
                    let a = operators::tournament_select(&ranked, self.config.tournament_size, &mut self.rng);
                    let b = operators::tournament_select(&ranked, self.config.tournament_size, &mut self.rng);
                    let mut child = operators::crossover(
                        id,
                        &ranked[a],
                        &ranked[b],
                        &self.space,
                        next_generation,
                        island.id,
                        &mut self.rng,
                    );
                    if self.rng.gen_bool(self.config.post_crossover_mutation) {
                        let params = MutationParams {
                            rate,
                            guided_fraction: self.config.guided_mutation_fraction,
                            hints,
                        };
                        operators::mutate(&mut child, params, &self.space, &mut self.rng);
                    }
                    child
                } else {
                    let p = operators::tournament_select(&ranked, self.config.tournament_size, &mut self.rng);
                    let parent = &ranked[p];
                    let mut child = Genome::new(id, parent.genes, &self.space, island.id);
                    child.generation = next_generation;
                    child.parent_ids = vec![parent.id];
                    child.mutation_log.push(format!("mutation-only of {}", parent.id));
                    let params = MutationParams {
                        rate: (rate * self.config.mutation_only_multiplier).min(1.0),
                        guided_fraction: self.config.guided_mutation_fraction,
                        hints,
                    };
                    operators::mutate(&mut child, params, &self.space, &mut self.rng);
                    child
                };
                next.push(child);
            }

            island.genomes = next;
        }
        self.generation = next_generation;
    }

    // ------------------------------------------------------------------
    // Generation loop
    // ------------------------------------------------------------------

    fn record_stats(&mut self, migrated: usize, injected: usize, insights: usize) -> f64 {
        let fitness: Vec<f64> = self
            .islands
            .iter()
            .flat_map(|island| island.genomes.iter())
            .filter(|g| g.evaluated)
            .map(|g| g.fitness)
            .collect();
        let best = fitness.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let worst = fitness.iter().copied().fold(f64::INFINITY, f64::min);
        let average = if fitness.is_empty() {
            0.0
        } else {
            fitness.iter().sum::<f64>() / fitness.len() as f64
        };

        let mutation_rate = self.controller.record(average);
        let stats = GenerationStats {
            generation: self.generation,
            best_fitness: best,
            average_fitness: average,
            worst_fitness: worst,
            diversity: self.diversity(),
            mutation_rate,
            evaluations: self.evaluations,
            global_best_fitness: self.best.as_ref().map(|b| b.genome.fitness),
            migrated,
            injected,
            insights,
        };
        info!(
            generation = stats.generation,
            best = stats.best_fitness,
            avg = stats.average_fitness,
            diversity = stats.diversity,
            mutation_rate,
            evaluations = stats.evaluations,
            "Generation complete"
        );
        self.history.push(stats);
        average
    }

    /// Run one full generation. Returns why the run should stop, if it should;
    /// otherwise the next generation has been bred.
    pub fn run_generation(&mut self) -> Option<TerminationReason> {
        self.evaluate_pending();

        let migrated = if self.generation > 0 && self.generation % self.config.migration_interval == 0 {
            self.migrate()
        } else {
            0
        };
        let injected = self.inject_diversity();
        if migrated + injected > 0 {
            self.evaluate_pending();
        }

        self.latest_insights = if self.generation % self.config.learning_interval == 0 {
            let population = self.islands.iter().flat_map(|island| island.genomes.iter());
            self.learning.analyze(population, &self.space, self.generation)
        } else {
            Vec::new()
        };
        let insights = self.latest_insights.len();

        self.record_stats(migrated, injected, insights);

        let termination = if self.controller.is_converged() {
            Some(TerminationReason::Converged)
        } else if self.generation + 1 >= self.config.max_generations {
            Some(TerminationReason::MaxGenerations)
        } else if self
            .config
            .max_evaluations
            .is_some_and(|budget| self.evaluations >= budget)
        {
            Some(TerminationReason::EvaluationBudget)
        } else {
            None
        };

        if termination.is_none() {
            self.reproduce();
        }
        termination
    }

    /// Snapshot of the run's results
    pub fn outcome(&self, termination: TerminationReason) -> EvolutionOutcome {
        let mut all: Vec<&Genome> = self
            .islands
            .iter()
            .flat_map(|island| island.genomes.iter())
            .filter(|g| g.evaluated)
            .collect();
        all.sort_by(|a, b| b.fitness.total_cmp(&a.fitness));

        let mut seen = HashSet::new();
        let top_genomes = all
            .into_iter()
            .filter(|g| seen.insert(g.fingerprint()))
            .take(self.config.top_n)
            .cloned()
            .collect();

        EvolutionOutcome {
            top_genomes,
            best: self.best.clone(),
            insights: self.learning.insights().cloned().collect(),
            generations: self.history.clone(),
            termination,
            evaluations: self.evaluations,
        }
    }

    /// Run generations until a termination condition holds
    pub fn run(&mut self) -> EvolutionOutcome {
        loop {
            if let Some(reason) = self.run_generation() {
                return self.outcome(reason);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::fixtures::synthetic_dataset;
    use crate::fitness::FitnessConfig;
    use crate::genome::assert_genome_valid;
    use crate::judge::JudgeConfig;
    use crate::types::RiskMetrics;

    fn small_config() -> RunConfig {
        RunConfig {
            seed: 7,
            population_size: 16,
            island_count: 2,
            max_generations: 3,
            elite_count: 2,
            migration_interval: 1,
            migration_count: 3,
            min_symbols: 3,
            batch_size: 5,
            workers: 2,
            learning_interval: 1,
            fitness: FitnessConfig {
                min_trades: 1,
                drawdown_cap: 0.9,
                ..FitnessConfig::default()
            },
            ..RunConfig::default()
        }
    }

    fn dataset() -> Arc<MarketDataset> {
        Arc::new(synthetic_dataset(4, 110))
    }

    fn scored_island(id: usize, base_id: u64, fitness: &[f64]) -> Island {
        let space = ParameterSpace::default();
        let mut rng = StdRng::seed_from_u64(base_id);
        let genomes = fitness
            .iter()
            .enumerate()
            .map(|(k, f)| {
                let mut g = Genome::random(base_id + k as u64, &space, id, &mut rng);
                g.fitness = *f;
                g.evaluated = true;
                g
            })
            .collect();
        Island::new(id, genomes)
    }

    #[test]
    fn test_insufficient_universe_aborts() {
        let config = RunConfig {
            min_symbols: 10,
            ..small_config()
        };
        match IslandModel::new(config, dataset()) {
            Err(EngineError::InsufficientUniverse { eligible, required }) => {
                assert_eq!(eligible, 4);
                assert_eq!(required, 10);
            }
            _ => panic!("expected InsufficientUniverse"),
        }
    }

    #[test]
    fn test_migration_overflow_then_trim_worst_residents() {
        let source = scored_island(0, 0, &[5.0, 9.0, 1.0, 8.0, 7.0, 2.0]);
        let mut target = scored_island(1, 100, &[50.0, 10.0, 40.0, 11.0, 30.0, 12.0]);

        let migrants: Vec<Genome> = source
            .top(3)
            .into_iter()
            .map(|g| {
                let mut m = g.clone();
                m.reset_evaluation();
                m
            })
            .collect();
        let migrant_ids: Vec<u64> = migrants.iter().map(|g| g.id).collect();
        assert_eq!(migrant_ids, vec![1, 3, 4]);

        target.admit(migrants);
        assert_eq!(target.len(), 9);

        let removed = target.trim_to(6);
        assert_eq!(target.len(), 6);
        // Residents with fitness 10, 11, 12
        let mut removed_sorted = removed.clone();
        removed_sorted.sort();
        assert_eq!(removed_sorted, vec![101, 103, 105]);
        for id in migrant_ids {
            assert!(target.genomes.iter().any(|g| g.id == id));
        }
    }

    #[test]
    fn test_model_migration_keeps_capacity() {
        let mut model = IslandModel::new(small_config(), dataset()).unwrap();
        model.evaluate_pending();
        let moved = model.migrate();
        assert_eq!(moved, 6);
        for island in model.islands() {
            assert_eq!(island.len(), 8);
            assert_eq!(island.genomes.iter().filter(|g| !g.evaluated).count(), 3);
            assert!(island.genomes.iter().all(|g| g.island_id == island.id));
        }
    }

    #[test]
    fn test_generations_keep_capacity_and_invariants() {
        let mut model = IslandModel::new(small_config(), dataset()).unwrap();
        let space = model.space().clone();
        let mut best_so_far = f64::NEG_INFINITY;
        loop {
            for island in model.islands() {
                assert_eq!(island.len(), 8);
                for genome in &island.genomes {
                    assert_genome_valid(genome, &space);
                }
            }
            let done = model.run_generation();
            if let Some(best) = model.best() {
                assert!(best.genome.fitness >= best_so_far);
                best_so_far = best.genome.fitness;
            }
            if let Some(reason) = done {
                assert_eq!(reason, TerminationReason::MaxGenerations);
                break;
            }
        }
        assert_eq!(model.history().len(), 3);
        let outcome = model.outcome(TerminationReason::MaxGenerations);
        assert!(!outcome.top_genomes.is_empty());
        assert!(outcome
            .top_genomes
            .windows(2)
            .all(|w| w[0].fitness >= w[1].fitness));
    }

    #[test]
    fn test_same_seed_reproduces_run() {
        let a = IslandModel::new(small_config(), dataset()).unwrap().run();
        let b = IslandModel::new(
            RunConfig {
                workers: 1,
                batch_size: 3,
                ..small_config()
            },
            dataset(),
        )
        .unwrap()
        .run();

        assert_eq!(a.evaluations, b.evaluations);
        let fa: Vec<u64> = a.top_genomes.iter().map(|g| g.fitness.to_bits()).collect();
        let fb: Vec<u64> = b.top_genomes.iter().map(|g| g.fitness.to_bits()).collect();
        assert_eq!(fa, fb);
        let ga: Vec<String> = a.top_genomes.iter().map(Genome::fingerprint).collect();
        let gb: Vec<String> = b.top_genomes.iter().map(Genome::fingerprint).collect();
        assert_eq!(ga, gb);
    }

    #[test]
    fn test_suspicious_candidate_never_becomes_best() {
        let mut model = IslandModel::new(small_config(), dataset()).unwrap();
        let dummy = model.evaluator.evaluate(&model.islands[0].genomes[0].genes);
        let result = dummy.result.clone().unwrap();

        {
            let honest = &mut model.islands[0].genomes[0];
            honest.fitness = 1.0;
            honest.risk_metrics = RiskMetrics {
                sharpe: 1.2,
                win_rate: 0.55,
                trade_count: 80,
                max_drawdown: 0.1,
                total_return: 0.2,
                ..RiskMetrics::default()
            };
            honest.evaluated = true;
        }
        assert!(model.offer_best(0, 0, result.clone()));

        {
            let cheat = &mut model.islands[0].genomes[1];
            cheat.fitness = 100.0;
            cheat.risk_metrics = RiskMetrics {
                sharpe: 4.5,
                win_rate: 0.9,
                trade_count: 200,
                ..RiskMetrics::default()
            };
            cheat.evaluated = true;
        }
        assert!(!model.offer_best(0, 1, result));
        assert_eq!(model.best().unwrap().genome.fitness, 1.0);
        assert_eq!(model.best().unwrap().verdict, Verdict::Good);
    }

    #[test]
    fn test_paranoid_judge_blocks_every_best() {
        let config = RunConfig {
            judge: JudgeConfig {
                max_plausible_sharpe: f64::NEG_INFINITY,
                ..JudgeConfig::default()
            },
            max_generations: 1,
            ..small_config()
        };
        let outcome = IslandModel::new(config, dataset()).unwrap().run();
        assert!(outcome.best.is_none());
        assert!(!outcome.top_genomes.is_empty());
    }

    #[test]
    fn test_diversity_injection_replaces_worst() {
        let config = RunConfig {
            diversity_threshold: 1.0,
            diversity_min_generation: 0,
            diversity_injection_count: 2,
            ..small_config()
        };
        let mut model = IslandModel::new(config, dataset()).unwrap();
        // Clone one genotype across every island to collapse diversity
        let clone = model.islands[0].genomes[0].clone();
        for island in model.islands.iter_mut() {
            for (k, g) in island.genomes.iter_mut().enumerate() {
                g.genes = clone.genes;
                g.fitness = k as f64;
                g.evaluated = true;
            }
        }
        assert!(model.diversity() < 0.2);
        let injected = model.inject_diversity();
        assert_eq!(injected, 4);
        for island in model.islands() {
            assert_eq!(island.len(), 8);
            assert_eq!(island.genomes.iter().filter(|g| !g.evaluated).count(), 2);
            // Fitness 0 and 1 were the worst
            assert!(island.genomes.iter().filter(|g| g.evaluated).all(|g| g.fitness >= 2.0));
        }
    }
}

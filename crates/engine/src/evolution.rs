//! Async run driver
//!
//! Runs an [`IslandModel`] one generation at a time on the blocking pool,
//! publishes progress for pollers and streams checkpoints to SQLite.

use std::sync::{
    atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering},
    Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard,
};

use persistence::repository::OptimizationRunRecord;
use persistence::SqlitePool;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::checkpoint::{CheckpointEvent, CheckpointWriter};
use crate::config::{RunConfig, RunPreset};
use crate::dataset::MarketDataset;
use crate::error::{EngineError, EngineResult};
use crate::genome::Genome;
use crate::island::{EvolutionOutcome, GenerationStats, IslandModel, TerminationReason};
use crate::judge::Judge;

// ============================================================================
// Types
// ============================================================================

/// Request to start an optimization run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvolutionRequest {
    pub config: RunConfig,
    /// Preset the config was derived from, recorded with the run
    pub preset: Option<RunPreset>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvolutionStatus {
    Idle,
    Running,
    Complete,
    Cancelled,
    Error,
}

/// Shared progress tracker between the caller and the run task
pub struct EvolutionProgress {
    pub status: RwLock<EvolutionStatus>,
    pub run_id: RwLock<Option<String>>,
    pub max_generations: AtomicU32,
    /// Generations completed so far
    pub generation: AtomicU32,
    pub evaluations: AtomicU64,
    pub cancelled: AtomicBool,
    pub latest: RwLock<Option<GenerationStats>>,
    pub best_fitness: RwLock<Option<f64>>,
    pub top_results: RwLock<Vec<Genome>>,
    pub error_message: RwLock<Option<String>>,
}

// Progress is read from other threads while a generation runs; a panic in a
// reader must not take the run down with it.
fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

impl EvolutionProgress {
    pub fn new() -> Self {
        Self {
            status: RwLock::new(EvolutionStatus::Idle),
            run_id: RwLock::new(None),
            max_generations: AtomicU32::new(0),
            generation: AtomicU32::new(0),
            evaluations: AtomicU64::new(0),
            cancelled: AtomicBool::new(false),
            latest: RwLock::new(None),
            best_fitness: RwLock::new(None),
            top_results: RwLock::new(Vec::new()),
            error_message: RwLock::new(None),
        }
    }

    /// Clear everything, including a pending cancellation
    pub fn reset(&self) {
        *write(&self.status) = EvolutionStatus::Idle;
        *write(&self.run_id) = None;
        self.max_generations.store(0, Ordering::Relaxed);
        self.generation.store(0, Ordering::Relaxed);
        self.evaluations.store(0, Ordering::Relaxed);
        self.cancelled.store(false, Ordering::Relaxed);
        *write(&self.latest) = None;
        *write(&self.best_fitness) = None;
        *write(&self.top_results) = Vec::new();
        *write(&self.error_message) = None;
    }

    /// Mark a new run as started. A cancellation requested before the run
    /// began is kept.
    fn begin(&self, run_id: &str, max_generations: u32) {
        *write(&self.status) = EvolutionStatus::Running;
        *write(&self.run_id) = Some(run_id.to_string());
        self.max_generations.store(max_generations, Ordering::Relaxed);
        self.generation.store(0, Ordering::Relaxed);
        self.evaluations.store(0, Ordering::Relaxed);
        *write(&self.latest) = None;
        *write(&self.best_fitness) = None;
        *write(&self.top_results) = Vec::new();
        *write(&self.error_message) = None;
    }

    fn record_generation(&self, stats: &GenerationStats) {
        self.generation.store(stats.generation + 1, Ordering::Relaxed);
        self.evaluations.store(stats.evaluations, Ordering::Relaxed);
        *write(&self.best_fitness) = stats.global_best_fitness;
        *write(&self.latest) = Some(stats.clone());
    }

    fn finish(&self, outcome: &EvolutionOutcome) {
        *write(&self.top_results) = outcome.top_genomes.clone();
        *write(&self.status) = match outcome.termination {
            TerminationReason::Cancelled => EvolutionStatus::Cancelled,
            _ => EvolutionStatus::Complete,
        };
    }

    fn fail(&self, error: &EngineError) {
        *write(&self.error_message) = Some(error.to_string());
        *write(&self.status) = EvolutionStatus::Error;
    }

    /// Ask the run to stop after the current generation
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    pub fn status(&self) -> EvolutionStatus {
        *read(&self.status)
    }

    pub fn run_id(&self) -> Option<String> {
        read(&self.run_id).clone()
    }

    pub fn latest(&self) -> Option<GenerationStats> {
        read(&self.latest).clone()
    }

    pub fn best_fitness(&self) -> Option<f64> {
        *read(&self.best_fitness)
    }

    pub fn top_results(&self) -> Vec<Genome> {
        read(&self.top_results).clone()
    }

    pub fn error_message(&self) -> Option<String> {
        read(&self.error_message).clone()
    }

    /// Get progress as percentage of the generation cap
    pub fn progress_pct(&self) -> f32 {
        let total = self.max_generations.load(Ordering::Relaxed);
        let done = self.generation.load(Ordering::Relaxed);
        if total == 0 {
            0.0
        } else {
            (done as f32 / total as f32 * 100.0).min(100.0)
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self.status(), EvolutionStatus::Running)
    }
}

impl Default for EvolutionProgress {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Runner
// ============================================================================

/// Run a full optimization.
///
/// Each generation runs inside `spawn_blocking`; cancellation is checked
/// between generations. With a pool, progress is checkpointed in the
/// background and the queue is drained before returning.
pub async fn run_evolution(
    request: EvolutionRequest,
    dataset: Arc<MarketDataset>,
    progress: Arc<EvolutionProgress>,
    db_pool: Option<SqlitePool>,
) -> EngineResult<EvolutionOutcome> {
    let EvolutionRequest { config, preset } = request;
    let run_id = format!(
        "evo-{}-{}",
        chrono::Utc::now().format("%Y%m%d-%H%M%S%3f"),
        config.seed
    );

    info!(
        run_id = %run_id,
        preset = preset.map(RunPreset::name).unwrap_or("custom"),
        symbols = dataset.symbol_count(),
        population = config.population_size,
        islands = config.island_count,
        max_generations = config.max_generations,
        "Starting evolution run"
    );
    progress.begin(&run_id, config.max_generations);

    let (writer, writer_handle) = match db_pool {
        Some(pool) => {
            let (writer, handle) = CheckpointWriter::spawn(pool);
            (Some(writer), Some(handle))
        }
        None => (None, None),
    };
    if let Some(w) = &writer {
        w.send(CheckpointEvent::RunStarted(OptimizationRunRecord::started(
            &run_id,
            preset.map(RunPreset::name),
            serde_json::to_string(&config).unwrap_or_default(),
            config.seed,
            dataset.symbol_count(),
        )));
    }

    let result = drive(config, dataset, &progress, &run_id, writer.as_ref()).await;

    match &result {
        Ok(outcome) => {
            progress.finish(outcome);
            info!(
                run_id = %run_id,
                termination = outcome.termination.as_str(),
                generations = outcome.generations.len(),
                evaluations = outcome.evaluations,
                best = outcome.best.as_ref().map(|b| b.genome.fitness),
                "Evolution run finished"
            );
        }
        Err(e) => {
            progress.fail(e);
            warn!(run_id = %run_id, error = %e, "Evolution run failed");
            if let Some(w) = &writer {
                w.send(CheckpointEvent::RunFailed {
                    run_id: run_id.clone(),
                    generations: progress.generation.load(Ordering::Relaxed),
                    evaluations: progress.evaluations.load(Ordering::Relaxed),
                    error: e.to_string(),
                });
            }
        }
    }

    drop(writer);
    if let Some(handle) = writer_handle {
        if let Err(e) = handle.await {
            warn!(error = %e, "Checkpoint writer task ended abnormally");
        }
    }

    result
}

async fn drive(
    config: RunConfig,
    dataset: Arc<MarketDataset>,
    progress: &EvolutionProgress,
    run_id: &str,
    writer: Option<&CheckpointWriter>,
) -> EngineResult<EvolutionOutcome> {
    let mut model = IslandModel::new(config, dataset)?;

    let termination = loop {
        if progress.is_cancelled() {
            info!(run_id = %run_id, generation = model.generation(), "Evolution run cancelled");
            break TerminationReason::Cancelled;
        }

        let (returned, step) = tokio::task::spawn_blocking(move || {
            let step = model.run_generation();
            (model, step)
        })
        .await
        .map_err(|e| EngineError::TaskJoin(e.to_string()))?;
        model = returned;

        if let Some(stats) = model.history().last() {
            progress.record_generation(stats);
            if let Some(w) = writer {
                w.send(CheckpointEvent::Generation {
                    run_id: run_id.to_string(),
                    stats: stats.clone(),
                });
                if !model.latest_insights().is_empty() {
                    w.send(CheckpointEvent::Insights {
                        run_id: run_id.to_string(),
                        insights: model.latest_insights().to_vec(),
                    });
                }
            }
        }

        if let Some(reason) = step {
            break reason;
        }
    };

    let outcome = model.outcome(termination);
    if let Some(w) = writer {
        let judge = Judge::new(model.config().judge.clone());
        let verdicts = outcome
            .top_genomes
            .iter()
            .map(|g| judge.verdict(&g.risk_metrics))
            .collect();
        w.send(CheckpointEvent::RunFinished {
            run_id: run_id.to_string(),
            outcome: Box::new(outcome.clone()),
            verdicts,
        });
    }
    Ok(outcome)
}

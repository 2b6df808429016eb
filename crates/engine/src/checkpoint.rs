//! Fire-and-forget run checkpoints
//!
//! The optimizer never waits on SQLite. Events go over an unbounded channel
//! to a background task that owns the pool; write errors are logged and
//! dropped.

use persistence::repository::{
    GenerationStatsRecord, GenomeRepository, GenomeResultRecord, InsightRecord,
    OptimizationRunRecord, RunCompletion, RunRepository,
};
use persistence::{DbResult, SqlitePool};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::island::{EvolutionOutcome, GenerationStats, TerminationReason};
use crate::judge::Verdict;
use crate::learning::LearningInsight;

/// Progress events recorded for a run
#[derive(Debug, Clone)]
pub enum CheckpointEvent {
    RunStarted(OptimizationRunRecord),
    Generation {
        run_id: String,
        stats: GenerationStats,
    },
    Insights {
        run_id: String,
        insights: Vec<LearningInsight>,
    },
    RunFinished {
        run_id: String,
        outcome: Box<EvolutionOutcome>,
        /// Judge verdict per entry of `outcome.top_genomes`
        verdicts: Vec<Verdict>,
    },
    RunFailed {
        run_id: String,
        generations: u32,
        evaluations: u64,
        error: String,
    },
}

impl CheckpointEvent {
    fn kind(&self) -> &'static str {
        match self {
            CheckpointEvent::RunStarted(_) => "run_started",
            CheckpointEvent::Generation { .. } => "generation",
            CheckpointEvent::Insights { .. } => "insights",
            CheckpointEvent::RunFinished { .. } => "run_finished",
            CheckpointEvent::RunFailed { .. } => "run_failed",
        }
    }
}

/// Sending half of the checkpoint channel
#[derive(Debug, Clone)]
pub struct CheckpointWriter {
    tx: mpsc::UnboundedSender<CheckpointEvent>,
}

impl CheckpointWriter {
    /// Start the background writer. The task ends once every writer is
    /// dropped and the queue is drained.
    pub fn spawn(pool: SqlitePool) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<CheckpointEvent>();
        let handle = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let kind = event.kind();
                if let Err(e) = write_event(&pool, event).await {
                    warn!(event = kind, error = %e, "Checkpoint write failed, dropping");
                }
            }
            debug!("Checkpoint writer stopped");
        });
        (Self { tx }, handle)
    }

    /// Queue an event; never blocks
    pub fn send(&self, event: CheckpointEvent) {
        if let Err(e) = self.tx.send(event) {
            warn!(event = e.0.kind(), "Checkpoint channel closed, dropping event");
        }
    }
}

async fn write_event(pool: &SqlitePool, event: CheckpointEvent) -> DbResult<()> {
    let runs = RunRepository::new(pool);
    match event {
        CheckpointEvent::RunStarted(record) => {
            runs.insert(&record).await?;
        }
        CheckpointEvent::Generation { run_id, stats } => {
            runs.save_generation(&stats_record(&run_id, &stats)).await?;
            runs.update_progress(
                &run_id,
                stats.generation as i64 + 1,
                stats.evaluations as i64,
                stats.global_best_fitness,
            )
            .await?;
        }
        CheckpointEvent::Insights { run_id, insights } => {
            let genomes = GenomeRepository::new(pool);
            for insight in &insights {
                genomes.save_insight(&insight_record(&run_id, insight)).await?;
            }
        }
        CheckpointEvent::RunFinished {
            run_id,
            outcome,
            verdicts,
        } => {
            let genomes = GenomeRepository::new(pool);
            for (rank, genome) in outcome.top_genomes.iter().enumerate() {
                let record = GenomeResultRecord {
                    id: None,
                    run_id: run_id.clone(),
                    genome_id: genome.id as i64,
                    fingerprint: genome.fingerprint(),
                    rank: rank as i64 + 1,
                    fitness: genome.fitness,
                    genes_json: serde_json::to_string(&genome.genes.to_named())?,
                    sharpe: genome.risk_metrics.sharpe,
                    sortino: genome.risk_metrics.sortino,
                    calmar: genome.risk_metrics.calmar,
                    win_rate: genome.risk_metrics.win_rate,
                    total_return: genome.risk_metrics.total_return,
                    max_drawdown: genome.risk_metrics.max_drawdown,
                    trade_count: genome.risk_metrics.trade_count as i64,
                    island_id: genome.island_id as i64,
                    generation: genome.generation as i64,
                    verdict: verdicts.get(rank).map(|v| v.as_str().to_string()),
                };
                genomes.save(&record).await?;
            }

            let best_genome_json = match &outcome.best {
                Some(best) => Some(serde_json::to_string(&best.genome.genes.to_named())?),
                None => None,
            };
            let status = match outcome.termination {
                TerminationReason::Cancelled => "cancelled",
                _ => "complete",
            };
            let completion = RunCompletion {
                status: status.to_string(),
                termination: Some(outcome.termination.as_str().to_string()),
                generations: outcome.generations.len() as i64,
                evaluations: outcome.evaluations as i64,
                best_fitness: outcome.best.as_ref().map(|b| b.genome.fitness),
                best_genome_json,
                best_verdict: outcome.best.as_ref().map(|b| b.verdict.as_str().to_string()),
                error_message: None,
            };
            runs.finish(&run_id, &completion).await?;
        }
        CheckpointEvent::RunFailed {
            run_id,
            generations,
            evaluations,
            error,
        } => {
            let completion = RunCompletion {
                status: "error".to_string(),
                termination: None,
                generations: generations as i64,
                evaluations: evaluations as i64,
                best_fitness: None,
                best_genome_json: None,
                best_verdict: None,
                error_message: Some(error),
            };
            runs.finish(&run_id, &completion).await?;
        }
    }
    Ok(())
}

fn stats_record(run_id: &str, stats: &GenerationStats) -> GenerationStatsRecord {
    GenerationStatsRecord {
        run_id: run_id.to_string(),
        generation: stats.generation as i64,
        best_fitness: finite_or(stats.best_fitness, 0.0),
        average_fitness: stats.average_fitness,
        worst_fitness: finite_or(stats.worst_fitness, 0.0),
        diversity: stats.diversity,
        mutation_rate: stats.mutation_rate,
        evaluations: stats.evaluations as i64,
        global_best_fitness: stats.global_best_fitness,
        migrated: stats.migrated as i64,
        injected: stats.injected as i64,
        insights: stats.insights as i64,
    }
}

fn insight_record(run_id: &str, insight: &LearningInsight) -> InsightRecord {
    InsightRecord {
        run_id: run_id.to_string(),
        generation: insight.generation as i64,
        parameter_name: insight.parameter_name.clone(),
        directional_correlation: insight.directional_correlation,
        sample_size: insight.sample_size as i64,
        fitness_delta: insight.fitness_delta,
        confidence: insight.confidence,
    }
}

// SQLite stores non-finite REALs as NULL, which the NOT NULL columns reject
fn finite_or(value: f64, fallback: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        fallback
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use persistence::Database;

    fn stats(generation: u32) -> GenerationStats {
        GenerationStats {
            generation,
            best_fitness: 1.5,
            average_fitness: 0.4,
            worst_fitness: f64::NEG_INFINITY,
            diversity: 0.8,
            mutation_rate: 0.1,
            evaluations: 40,
            global_best_fitness: Some(1.5),
            migrated: 0,
            injected: 0,
            insights: 0,
        }
    }

    #[tokio::test]
    async fn test_writer_persists_generations() {
        let db = Database::in_memory().await.unwrap();
        let (writer, handle) = CheckpointWriter::spawn(db.pool_clone());

        writer.send(CheckpointEvent::RunStarted(OptimizationRunRecord::started(
            "ckpt-1",
            Some("quick"),
            "{}".to_string(),
            3,
            5,
        )));
        for generation in 0..2 {
            writer.send(CheckpointEvent::Generation {
                run_id: "ckpt-1".to_string(),
                stats: stats(generation),
            });
        }
        writer.send(CheckpointEvent::RunFailed {
            run_id: "ckpt-1".to_string(),
            generations: 2,
            evaluations: 40,
            error: "boom".to_string(),
        });
        drop(writer);
        handle.await.unwrap();

        let runs = RunRepository::new(db.pool());
        let run = runs.get("ckpt-1").await.unwrap().unwrap();
        assert_eq!(run.status, "error");
        assert_eq!(run.error_message.as_deref(), Some("boom"));

        let rows = runs.generations("ckpt-1").await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].worst_fitness, 0.0);
    }

    #[tokio::test]
    async fn test_write_errors_do_not_stop_the_writer() {
        let db = Database::in_memory().await.unwrap();
        let (writer, handle) = CheckpointWriter::spawn(db.pool_clone());

        // No run row yet: the foreign key rejects this insight
        writer.send(CheckpointEvent::Insights {
            run_id: "orphan".to_string(),
            insights: vec![LearningInsight {
                parameter_name: "rsi_period".to_string(),
                directional_correlation: 0.5,
                sample_size: 20,
                fitness_delta: 1.0,
                confidence: 0.5,
                generation: 0,
            }],
        });
        writer.send(CheckpointEvent::RunStarted(OptimizationRunRecord::started(
            "ckpt-2",
            None,
            "{}".to_string(),
            1,
            5,
        )));
        drop(writer);
        handle.await.unwrap();

        assert!(RunRepository::new(db.pool()).get("ckpt-2").await.unwrap().is_some());
    }
}

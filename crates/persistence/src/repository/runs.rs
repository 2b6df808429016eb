//! Optimization runs and their per-generation statistics

use crate::DbResult;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

/// One optimization run
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct OptimizationRunRecord {
    pub id: Option<i64>,
    pub run_id: String,
    pub preset: Option<String>,
    pub config_json: String,
    pub seed: i64,
    pub symbol_count: i64,
    pub status: String,
    pub termination: Option<String>,
    pub generations: i64,
    pub evaluations: i64,
    pub best_fitness: Option<f64>,
    pub best_genome_json: Option<String>,
    pub error_message: Option<String>,
    pub started_at: Option<i64>,
    pub finished_at: Option<i64>,
    pub best_verdict: Option<String>,
}

impl OptimizationRunRecord {
    /// A freshly started run
    pub fn started(run_id: &str, preset: Option<&str>, config_json: String, seed: u64, symbol_count: usize) -> Self {
        Self {
            id: None,
            run_id: run_id.to_string(),
            preset: preset.map(str::to_string),
            config_json,
            seed: seed as i64,
            symbol_count: symbol_count as i64,
            status: "running".to_string(),
            termination: None,
            generations: 0,
            evaluations: 0,
            best_fitness: None,
            best_genome_json: None,
            error_message: None,
            started_at: None,
            finished_at: None,
            best_verdict: None,
        }
    }
}

/// Final state of a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunCompletion {
    pub status: String,
    pub termination: Option<String>,
    pub generations: i64,
    pub evaluations: i64,
    pub best_fitness: Option<f64>,
    pub best_genome_json: Option<String>,
    pub best_verdict: Option<String>,
    pub error_message: Option<String>,
}

/// Statistics of one generation
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct GenerationStatsRecord {
    pub run_id: String,
    pub generation: i64,
    pub best_fitness: f64,
    pub average_fitness: f64,
    pub worst_fitness: f64,
    pub diversity: f64,
    pub mutation_rate: f64,
    pub evaluations: i64,
    pub global_best_fitness: Option<f64>,
    pub migrated: i64,
    pub injected: i64,
    pub insights: i64,
}

/// Repository for runs and generation statistics
pub struct RunRepository<'a> {
    pool: &'a SqlitePool,
}

const RUN_COLUMNS: &str = r#"
    id, run_id, preset, config_json, seed, symbol_count, status, termination,
    generations, evaluations, best_fitness, best_genome_json, error_message,
    started_at, finished_at, best_verdict
"#;

impl<'a> RunRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a new run (INSERT OR IGNORE; a repeated run_id is a no-op)
    pub async fn insert(&self, record: &OptimizationRunRecord) -> DbResult<i64> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO optimization_runs (
                run_id, preset, config_json, seed, symbol_count, status,
                termination, generations, evaluations, best_fitness,
                best_genome_json, error_message, best_verdict
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.run_id)
        .bind(&record.preset)
        .bind(&record.config_json)
        .bind(record.seed)
        .bind(record.symbol_count)
        .bind(&record.status)
        .bind(&record.termination)
        .bind(record.generations)
        .bind(record.evaluations)
        .bind(record.best_fitness)
        .bind(&record.best_genome_json)
        .bind(&record.error_message)
        .bind(&record.best_verdict)
        .execute(self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Record progress after a generation
    pub async fn update_progress(
        &self,
        run_id: &str,
        generations: i64,
        evaluations: i64,
        best_fitness: Option<f64>,
    ) -> DbResult<()> {
        sqlx::query(
            r#"
            UPDATE optimization_runs
            SET generations = ?, evaluations = ?, best_fitness = COALESCE(?, best_fitness)
            WHERE run_id = ?
            "#,
        )
        .bind(generations)
        .bind(evaluations)
        .bind(best_fitness)
        .bind(run_id)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    /// Mark a run finished (completed, cancelled or failed)
    pub async fn finish(&self, run_id: &str, completion: &RunCompletion) -> DbResult<()> {
        sqlx::query(
            r#"
            UPDATE optimization_runs
            SET status = ?, termination = ?, generations = ?, evaluations = ?,
                best_fitness = ?, best_genome_json = ?, best_verdict = ?,
                error_message = ?, finished_at = strftime('%s', 'now')
            WHERE run_id = ?
            "#,
        )
        .bind(&completion.status)
        .bind(&completion.termination)
        .bind(completion.generations)
        .bind(completion.evaluations)
        .bind(completion.best_fitness)
        .bind(&completion.best_genome_json)
        .bind(&completion.best_verdict)
        .bind(&completion.error_message)
        .bind(run_id)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    pub async fn get(&self, run_id: &str) -> DbResult<Option<OptimizationRunRecord>> {
        let sql = format!("SELECT {RUN_COLUMNS} FROM optimization_runs WHERE run_id = ?");
        let record = sqlx::query_as::<_, OptimizationRunRecord>(&sql)
            .bind(run_id)
            .fetch_optional(self.pool)
            .await?;
        Ok(record)
    }

    /// Most recent runs first
    pub async fn list_recent(&self, limit: i64) -> DbResult<Vec<OptimizationRunRecord>> {
        let sql = format!("SELECT {RUN_COLUMNS} FROM optimization_runs ORDER BY id DESC LIMIT ?");
        let records = sqlx::query_as::<_, OptimizationRunRecord>(&sql)
            .bind(limit)
            .fetch_all(self.pool)
            .await?;
        Ok(records)
    }

    /// Delete a run; its statistics, genomes and insights cascade
    pub async fn delete(&self, run_id: &str) -> DbResult<bool> {
        let result = sqlx::query("DELETE FROM optimization_runs WHERE run_id = ?")
            .bind(run_id)
            .execute(self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Insert or replace one generation's statistics
    pub async fn save_generation(&self, record: &GenerationStatsRecord) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO generation_stats (
                run_id, generation, best_fitness, average_fitness, worst_fitness,
                diversity, mutation_rate, evaluations, global_best_fitness,
                migrated, injected, insights
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.run_id)
        .bind(record.generation)
        .bind(record.best_fitness)
        .bind(record.average_fitness)
        .bind(record.worst_fitness)
        .bind(record.diversity)
        .bind(record.mutation_rate)
        .bind(record.evaluations)
        .bind(record.global_best_fitness)
        .bind(record.migrated)
        .bind(record.injected)
        .bind(record.insights)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    pub async fn generations(&self, run_id: &str) -> DbResult<Vec<GenerationStatsRecord>> {
        let records = sqlx::query_as::<_, GenerationStatsRecord>(
            r#"
            SELECT run_id, generation, best_fitness, average_fitness, worst_fitness,
                   diversity, mutation_rate, evaluations, global_best_fitness,
                   migrated, injected, insights
            FROM generation_stats
            WHERE run_id = ?
            ORDER BY generation ASC
            "#,
        )
        .bind(run_id)
        .fetch_all(self.pool)
        .await?;
        Ok(records)
    }
}

//! Ranked genomes and learning insights of a run

use std::collections::BTreeMap;

use crate::DbResult;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

/// One ranked genome of a run
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct GenomeResultRecord {
    pub id: Option<i64>,
    pub run_id: String,
    pub genome_id: i64,
    pub fingerprint: String,
    pub rank: i64,
    pub fitness: f64,
    pub genes_json: String,
    pub sharpe: f64,
    pub sortino: f64,
    pub calmar: f64,
    pub win_rate: f64,
    pub total_return: f64,
    pub max_drawdown: f64,
    pub trade_count: i64,
    pub island_id: i64,
    pub generation: i64,
    pub verdict: Option<String>,
}

impl GenomeResultRecord {
    /// Decode the stored gene map
    pub fn genes(&self) -> DbResult<BTreeMap<String, f64>> {
        Ok(serde_json::from_str(&self.genes_json)?)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct InsightRecord {
    pub run_id: String,
    pub generation: i64,
    pub parameter_name: String,
    pub directional_correlation: f64,
    pub sample_size: i64,
    pub fitness_delta: f64,
    pub confidence: f64,
}

/// Repository for genome results and insights
pub struct GenomeRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> GenomeRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Save a genome (INSERT OR IGNORE; skips a genotype already stored for
    /// this run). Returns whether a row was inserted.
    pub async fn save(&self, record: &GenomeResultRecord) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO genome_results (
                run_id, genome_id, fingerprint, rank, fitness, genes_json,
                sharpe, sortino, calmar, win_rate, total_return, max_drawdown,
                trade_count, island_id, generation, verdict
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.run_id)
        .bind(record.genome_id)
        .bind(&record.fingerprint)
        .bind(record.rank)
        .bind(record.fitness)
        .bind(&record.genes_json)
        .bind(record.sharpe)
        .bind(record.sortino)
        .bind(record.calmar)
        .bind(record.win_rate)
        .bind(record.total_return)
        .bind(record.max_drawdown)
        .bind(record.trade_count)
        .bind(record.island_id)
        .bind(record.generation)
        .bind(&record.verdict)
        .execute(self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Check whether a genotype was already stored for this run
    pub async fn exists(&self, run_id: &str, fingerprint: &str) -> DbResult<bool> {
        let row: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM genome_results WHERE run_id = ? AND fingerprint = ?",
        )
        .bind(run_id)
        .bind(fingerprint)
        .fetch_one(self.pool)
        .await?;

        Ok(row.0 > 0)
    }

    /// Ranked genomes of a run, best rank first
    pub async fn top_for_run(&self, run_id: &str, limit: i64) -> DbResult<Vec<GenomeResultRecord>> {
        let records = sqlx::query_as::<_, GenomeResultRecord>(
            r#"
            SELECT id, run_id, genome_id, fingerprint, rank, fitness, genes_json,
                   sharpe, sortino, calmar, win_rate, total_return, max_drawdown,
                   trade_count, island_id, generation, verdict
            FROM genome_results
            WHERE run_id = ?
            ORDER BY rank ASC
            LIMIT ?
            "#,
        )
        .bind(run_id)
        .bind(limit)
        .fetch_all(self.pool)
        .await?;
        Ok(records)
    }

    pub async fn save_insight(&self, record: &InsightRecord) -> DbResult<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO learning_insights (
                run_id, generation, parameter_name, directional_correlation,
                sample_size, fitness_delta, confidence
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.run_id)
        .bind(record.generation)
        .bind(&record.parameter_name)
        .bind(record.directional_correlation)
        .bind(record.sample_size)
        .bind(record.fitness_delta)
        .bind(record.confidence)
        .execute(self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Insights of a run in recording order
    pub async fn insights_for_run(&self, run_id: &str) -> DbResult<Vec<InsightRecord>> {
        let records = sqlx::query_as::<_, InsightRecord>(
            r#"
            SELECT run_id, generation, parameter_name, directional_correlation,
                   sample_size, fitness_delta, confidence
            FROM learning_insights
            WHERE run_id = ?
            ORDER BY id ASC
            "#,
        )
        .bind(run_id)
        .fetch_all(self.pool)
        .await?;
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::{OptimizationRunRecord, RunRepository};
    use crate::Database;

    fn genome(run_id: &str, rank: i64, fingerprint: &str) -> GenomeResultRecord {
        GenomeResultRecord {
            id: None,
            run_id: run_id.to_string(),
            genome_id: 100 + rank,
            fingerprint: fingerprint.to_string(),
            rank,
            fitness: 3.0 - rank as f64,
            genes_json: r#"{"rsi_period":14.0,"buy_threshold":0.12}"#.to_string(),
            sharpe: 1.4,
            sortino: 2.0,
            calmar: 0.8,
            win_rate: 0.55,
            total_return: 0.21,
            max_drawdown: 0.12,
            trade_count: 64,
            island_id: 1,
            generation: 12,
            verdict: Some("good".to_string()),
        }
    }

    async fn setup(run_id: &str) -> Database {
        let db = Database::in_memory().await.unwrap();
        RunRepository::new(db.pool())
            .insert(&OptimizationRunRecord::started(run_id, None, "{}".to_string(), 7, 5))
            .await
            .unwrap();
        db
    }

    #[tokio::test]
    async fn test_genomes_deduplicated_by_fingerprint() {
        let db = setup("run-g").await;
        let repo = GenomeRepository::new(db.pool());

        assert!(repo.save(&genome("run-g", 1, "aaa")).await.unwrap());
        assert!(repo.save(&genome("run-g", 2, "bbb")).await.unwrap());
        assert!(!repo.save(&genome("run-g", 3, "aaa")).await.unwrap());
        assert!(repo.exists("run-g", "bbb").await.unwrap());

        let top = repo.top_for_run("run-g", 10).await.unwrap();
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].rank, 1);
        assert_eq!(top[0].genes().unwrap().get("rsi_period"), Some(&14.0));
    }

    #[tokio::test]
    async fn test_insights_round_trip() {
        let db = setup("run-i").await;
        let repo = GenomeRepository::new(db.pool());
        for generation in 0..3 {
            repo.save_insight(&InsightRecord {
                run_id: "run-i".to_string(),
                generation,
                parameter_name: "macd_fast".to_string(),
                directional_correlation: -0.4,
                sample_size: 20,
                fitness_delta: 1.25,
                confidence: 0.4,
            })
            .await
            .unwrap();
        }
        let insights = repo.insights_for_run("run-i").await.unwrap();
        assert_eq!(insights.len(), 3);
        assert_eq!(insights[2].generation, 2);
        assert_eq!(insights[0].directional_correlation, -0.4);
    }
}

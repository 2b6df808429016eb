//! Database schema definitions

/// SQL to create all tables
/// NOTE: fitness and risk metrics are stored as REAL; gene maps and configs as JSON TEXT
pub const CREATE_TABLES: &str = r#"
-- One row per optimization run
CREATE TABLE IF NOT EXISTS optimization_runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id TEXT NOT NULL UNIQUE,
    preset TEXT,
    config_json TEXT NOT NULL,
    seed INTEGER NOT NULL,
    symbol_count INTEGER NOT NULL DEFAULT 0,
    status TEXT NOT NULL DEFAULT 'running',
    termination TEXT,
    generations INTEGER NOT NULL DEFAULT 0,
    evaluations INTEGER NOT NULL DEFAULT 0,
    best_fitness REAL,
    best_genome_json TEXT,
    error_message TEXT,
    best_verdict TEXT,
    started_at INTEGER DEFAULT (strftime('%s', 'now')),
    finished_at INTEGER
);

-- Per-generation population statistics
CREATE TABLE IF NOT EXISTS generation_stats (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id TEXT NOT NULL REFERENCES optimization_runs(run_id) ON DELETE CASCADE,
    generation INTEGER NOT NULL,
    best_fitness REAL NOT NULL,
    average_fitness REAL NOT NULL,
    worst_fitness REAL NOT NULL,
    diversity REAL NOT NULL,
    mutation_rate REAL NOT NULL,
    evaluations INTEGER NOT NULL,
    global_best_fitness REAL,
    migrated INTEGER NOT NULL DEFAULT 0,
    injected INTEGER NOT NULL DEFAULT 0,
    insights INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER DEFAULT (strftime('%s', 'now')),
    UNIQUE(run_id, generation)
);

-- Ranked genomes of a run (de-duplicated by genotype fingerprint)
CREATE TABLE IF NOT EXISTS genome_results (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id TEXT NOT NULL REFERENCES optimization_runs(run_id) ON DELETE CASCADE,
    genome_id INTEGER NOT NULL,
    fingerprint TEXT NOT NULL,
    rank INTEGER NOT NULL,
    fitness REAL NOT NULL,
    genes_json TEXT NOT NULL,
    sharpe REAL NOT NULL DEFAULT 0,
    sortino REAL NOT NULL DEFAULT 0,
    calmar REAL NOT NULL DEFAULT 0,
    win_rate REAL NOT NULL DEFAULT 0,
    total_return REAL NOT NULL DEFAULT 0,
    max_drawdown REAL NOT NULL DEFAULT 0,
    trade_count INTEGER NOT NULL DEFAULT 0,
    island_id INTEGER NOT NULL,
    generation INTEGER NOT NULL,
    verdict TEXT,
    created_at INTEGER DEFAULT (strftime('%s', 'now')),
    UNIQUE(run_id, fingerprint)
);

-- Learning engine insights
CREATE TABLE IF NOT EXISTS learning_insights (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id TEXT NOT NULL REFERENCES optimization_runs(run_id) ON DELETE CASCADE,
    generation INTEGER NOT NULL,
    parameter_name TEXT NOT NULL,
    directional_correlation REAL NOT NULL,
    sample_size INTEGER NOT NULL,
    fitness_delta REAL NOT NULL,
    confidence REAL NOT NULL,
    created_at INTEGER DEFAULT (strftime('%s', 'now'))
);

-- ========== INDEXES ==========

CREATE INDEX IF NOT EXISTS idx_runs_started ON optimization_runs(started_at DESC);
CREATE INDEX IF NOT EXISTS idx_generation_run ON generation_stats(run_id, generation);
CREATE INDEX IF NOT EXISTS idx_genome_run_rank ON genome_results(run_id, rank);
CREATE INDEX IF NOT EXISTS idx_genome_fitness ON genome_results(fitness DESC);
CREATE INDEX IF NOT EXISTS idx_insight_run ON learning_insights(run_id, generation)
"#;

//! evo-signal: island-model genetic optimizer for a multi-factor signal scorer
//!
//! Usage:
//!   evo-signal run --data bars.json --preset quick   Optimize over a bar file
//!   evo-signal history                               List recorded runs

mod input;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chrono::{TimeZone, Utc};
use clap::{Parser, Subcommand};
use engine::{
    run_evolution, EvolutionOutcome, EvolutionProgress, EvolutionRequest, EvolutionStatus, Judge,
    RunPreset,
};
use persistence::repository::{GenomeRepository, RunRepository};
use serde::Serialize;
use tracing::info;

use crate::input::{build_config, load_dataset, ConfigOverrides};

const APP_VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), "-", env!("GIT_HASH"));

#[derive(Parser)]
#[command(name = "evo-signal")]
#[command(about = "Island-model genetic optimizer for multi-factor trading signals", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an optimization over a bar file
    Run {
        /// JSON file mapping symbols to daily bars
        #[arg(long)]
        data: PathBuf,
        /// Preset: standard, extended, quick
        #[arg(long, default_value = "standard")]
        preset: String,
        /// JSON file overriding preset fields
        #[arg(long)]
        config: Option<PathBuf>,
        /// Generation cap
        #[arg(long)]
        generations: Option<u32>,
        /// Total population across islands
        #[arg(long)]
        population: Option<usize>,
        #[arg(long)]
        islands: Option<usize>,
        #[arg(long)]
        seed: Option<u64>,
        /// Evaluation threads (0 = one per core)
        #[arg(long)]
        workers: Option<usize>,
        /// Stop after this many evaluations
        #[arg(long)]
        max_evaluations: Option<u64>,
        /// Number of top genomes to report
        #[arg(long)]
        top_n: Option<usize>,
        /// Optional JSON export path
        #[arg(long)]
        export: Option<PathBuf>,
        /// Skip the checkpoint database
        #[arg(long)]
        no_db: bool,
    },
    /// List recorded runs, or show one run in detail
    History {
        /// Number of runs to list
        #[arg(long, default_value_t = 10)]
        limit: i64,
        /// Show this run's generations, genomes and insights
        #[arg(long)]
        run_id: Option<String>,
    },
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let default = if verbose {
        "debug,engine=debug,persistence=debug,evo_signal=debug,sqlx=warn"
    } else {
        "info,engine=info,evo_signal=info,sqlx=warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).compact())
        .with(filter)
        .init();
}

fn db_path() -> String {
    std::env::var("EVO_SIGNAL_DB_PATH").unwrap_or_else(|_| "data/evolution.db".to_string())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Run {
            data,
            preset,
            config,
            generations,
            population,
            islands,
            seed,
            workers,
            max_evaluations,
            top_n,
            export,
            no_db,
        } => {
            let preset = RunPreset::from_name(&preset)
                .with_context(|| format!("Unknown preset '{preset}' (standard, extended, quick)"))?;
            let overrides = ConfigOverrides {
                generations,
                population,
                islands,
                seed,
                workers,
                top_n,
                max_evaluations,
            };
            cmd_run(data, preset, config, overrides, export, no_db).await?;
        }
        Commands::History { limit, run_id } => {
            cmd_history(limit, run_id).await?;
        }
    }

    Ok(())
}

// ============================================================================
// run
// ============================================================================

async fn cmd_run(
    data: PathBuf,
    preset: RunPreset,
    config_file: Option<PathBuf>,
    overrides: ConfigOverrides,
    export: Option<PathBuf>,
    no_db: bool,
) -> anyhow::Result<()> {
    println!("\n=== evo-signal v{} ===", APP_VERSION);

    let config = build_config(preset, config_file.as_deref(), &overrides)?;
    let dataset = Arc::new(load_dataset(&data)?);
    let judge = Judge::new(config.judge.clone());
    let top_n = config.top_n;

    let db = if no_db {
        None
    } else {
        let path = db_path();
        let db = persistence::Database::new(&path)
            .await
            .with_context(|| format!("Database initialization failed ({path})"))?;
        println!("Database: {}", path);
        Some(db)
    };

    println!(
        "Data: {} ({} symbols, {} days)",
        data.display(),
        dataset.symbol_count(),
        dataset.calendar().len()
    );
    println!(
        "Preset: {} | Population: {} x {} islands | Generations: {} | Seed: {}",
        preset.name(),
        config.population_size,
        config.island_count,
        config.max_generations,
        config.seed
    );
    println!("Press Ctrl+C to stop after the current generation\n");

    let progress = Arc::new(EvolutionProgress::new());
    let progress_for_ctrlc = progress.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Ctrl+C received, requesting cancel...");
        progress_for_ctrlc.cancel();
    });

    let request = EvolutionRequest {
        config,
        preset: Some(preset),
    };
    let db_pool = db.as_ref().map(|db| db.pool_clone());
    let progress_clone = progress.clone();
    let handle =
        tokio::spawn(async move { run_evolution(request, dataset, progress_clone, db_pool).await });

    // Progress display loop
    while !handle.is_finished() {
        tokio::time::sleep(tokio::time::Duration::from_millis(500)).await;
        if progress.status() != EvolutionStatus::Running {
            continue;
        }
        let Some(latest) = progress.latest() else {
            continue;
        };
        let pct = progress.progress_pct();
        let bar_len = 30;
        let filled = ((pct as usize) * bar_len / 100).min(bar_len);
        let bar: String = "=".repeat(filled) + &" ".repeat(bar_len - filled);
        let best = progress
            .best_fitness()
            .map(|f| format!("{f:.3}"))
            .unwrap_or_else(|| "-".to_string());
        print!(
            "\r  Gen {:>4} [{}] {:.0}% | best {} | avg {:.3} | div {:.2} | mut {:.3} | {} evals   ",
            latest.generation + 1,
            bar,
            pct,
            best,
            latest.average_fitness,
            latest.diversity,
            latest.mutation_rate,
            latest.evaluations
        );
    }
    println!();

    let outcome = match handle.await.context("Evolution task panicked")? {
        Ok(outcome) => outcome,
        Err(e) => {
            println!("  Error: {}", e);
            return Err(e.into());
        }
    };

    println!(
        "  {} after {} generations ({} evaluations)",
        match progress.status() {
            EvolutionStatus::Cancelled => "Cancelled",
            _ => "Complete",
        },
        outcome.generations.len(),
        outcome.evaluations
    );
    print_outcome(&outcome, &judge, top_n);

    if let Some(export_path) = export {
        let export = ExportDocument {
            version: APP_VERSION,
            run_id: progress.run_id(),
            exported_at: Utc::now().to_rfc3339(),
            outcome: &outcome,
        };
        let json = serde_json::to_string_pretty(&export)?;
        std::fs::write(&export_path, &json)
            .with_context(|| format!("Failed to write {}", export_path.display()))?;
        println!("\nResults exported to {}", export_path.display());
    }

    Ok(())
}

#[derive(Serialize)]
struct ExportDocument<'a> {
    version: &'a str,
    run_id: Option<String>,
    exported_at: String,
    outcome: &'a EvolutionOutcome,
}

fn print_outcome(outcome: &EvolutionOutcome, judge: &Judge, top_n: usize) {
    if outcome.top_genomes.is_empty() {
        println!("\nNo evaluated genomes.");
        return;
    }

    println!("\nTop {} Genomes:", outcome.top_genomes.len().min(top_n));
    println!(
        "  {:>3}  {:>6} {:>9} {:>7} {:>8} {:>8} {:>7} {:>6} {:>6}  {}",
        "#", "Id", "Fitness", "Sharpe", "Return%", "MaxDD%", "WR%", "Trades", "Island", "Verdict"
    );
    println!("  {}", "-".repeat(90));
    for (i, g) in outcome.top_genomes.iter().take(top_n).enumerate() {
        let m = &g.risk_metrics;
        println!(
            "  {:>3}  {:>6} {:>9.3} {:>7.2} {:>+8.1} {:>8.1} {:>6.1}% {:>6} {:>6}  {}",
            i + 1,
            g.id,
            g.fitness,
            m.sharpe,
            m.total_return * 100.0,
            m.max_drawdown * 100.0,
            m.win_rate * 100.0,
            m.trade_count,
            g.island_id,
            judge.verdict(m),
        );
    }

    match &outcome.best {
        Some(best) => {
            println!(
                "\nBest genome #{} (generation {}, {}): fitness {:.3}, CAGR {:.1}%, profit factor {:.2}",
                best.genome.id,
                best.found_at,
                best.verdict,
                best.genome.fitness,
                best.result.cagr * 100.0,
                best.result.profit_factor
            );
            for (name, value) in best.genome.genes.to_named() {
                println!("  {:<28} {}", name, value);
            }
        }
        None => println!("\nNo genome passed the plausibility judge."),
    }

    if !outcome.insights.is_empty() {
        println!("\nLatest insights:");
        for insight in outcome.insights.iter().rev().take(5) {
            println!(
                "  gen {:>4}  {:<28} corr {:>+.2}  conf {:.2}",
                insight.generation,
                insight.parameter_name,
                insight.directional_correlation,
                insight.confidence
            );
        }
    }
}

// ============================================================================
// history
// ============================================================================

async fn cmd_history(limit: i64, run_id: Option<String>) -> anyhow::Result<()> {
    let path = db_path();
    let db = persistence::Database::new(&path)
        .await
        .with_context(|| format!("Database initialization failed ({path})"))?;
    let runs = RunRepository::new(db.pool());

    let Some(run_id) = run_id else {
        let recent = runs.list_recent(limit).await.context("Failed to list runs")?;
        if recent.is_empty() {
            println!("No runs recorded in {}", path);
            return Ok(());
        }
        println!(
            "  {:<34} {:<9} {:<10} {:<17} {:>5} {:>8} {:>9}  {}",
            "Run", "Preset", "Status", "Termination", "Gens", "Evals", "Best", "Started"
        );
        println!("  {}", "-".repeat(110));
        for run in recent {
            println!(
                "  {:<34} {:<9} {:<10} {:<17} {:>5} {:>8} {:>9}  {}",
                run.run_id,
                run.preset.as_deref().unwrap_or("custom"),
                run.status,
                run.termination.as_deref().unwrap_or("-"),
                run.generations,
                run.evaluations,
                run.best_fitness
                    .map(|f| format!("{f:.3}"))
                    .unwrap_or_else(|| "-".to_string()),
                format_timestamp(run.started_at)
            );
        }
        return Ok(());
    };

    let run = runs
        .get(&run_id)
        .await?
        .with_context(|| format!("No run '{run_id}' in {path}"))?;
    println!("Run {} ({})", run.run_id, run.status);
    println!(
        "  seed {} | {} symbols | {} generations | {} evaluations",
        run.seed, run.symbol_count, run.generations, run.evaluations
    );
    if let Some(err) = &run.error_message {
        println!("  error: {}", err);
    }

    let generations = runs.generations(&run_id).await?;
    if let (Some(first), Some(last)) = (generations.first(), generations.last()) {
        println!(
            "  average fitness {:.3} -> {:.3}, diversity {:.2} -> {:.2}",
            first.average_fitness, last.average_fitness, first.diversity, last.diversity
        );
    }

    let genomes = GenomeRepository::new(db.pool());
    let top = genomes.top_for_run(&run_id, limit).await?;
    if !top.is_empty() {
        println!("\n  {:>3} {:>9} {:>7} {:>8} {:>7}  {}", "#", "Fitness", "Sharpe", "Return%", "Trades", "Verdict");
        for g in &top {
            println!(
                "  {:>3} {:>9.3} {:>7.2} {:>+8.1} {:>7}  {}",
                g.rank,
                g.fitness,
                g.sharpe,
                g.total_return * 100.0,
                g.trade_count,
                g.verdict.as_deref().unwrap_or("-")
            );
        }
    }

    let insights = genomes.insights_for_run(&run_id).await?;
    println!("\n  {} insights recorded", insights.len());
    Ok(())
}

fn format_timestamp(ts: Option<i64>) -> String {
    ts.and_then(|t| Utc.timestamp_opt(t, 0).single())
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string())
}

//! evo-signal engine: island-model genetic optimization of a multi-factor
//! signal scorer
//!
//! Provides:
//! - Parameter space, genome and genetic operators
//! - Eight-factor signal scorer over `ta` indicators
//! - Daily multi-symbol portfolio simulator and risk metrics
//! - Island manager with migration, diversity injection, adaptive mutation
//!   and a learning engine that steers mutation
//! - Async run driver with progress tracking and SQLite checkpoints

pub mod adaptive;
pub mod checkpoint;
pub mod config;
pub mod dataset;
pub mod error;
pub mod evolution;
pub mod fitness;
pub mod genome;
pub mod indicators;
pub mod island;
pub mod judge;
pub mod learning;
pub mod metrics;
pub mod operators;
pub mod params;
pub mod scorer;
pub mod simulator;
pub mod types;

// Re-exports for convenience
pub use adaptive::{AdaptiveConfig, AdaptiveMutationController};
pub use checkpoint::{CheckpointEvent, CheckpointWriter};
pub use config::{RunConfig, RunPreset};
pub use dataset::{MarketDataset, SeriesWindow, SymbolSeries};
pub use error::{ConfigError, EngineError, EngineResult};
pub use evolution::{run_evolution, EvolutionProgress, EvolutionRequest, EvolutionStatus};
pub use fitness::{aggregate, Evaluation, Evaluator, FitnessConfig, FitnessWeights};
pub use genome::Genome;
pub use island::{
    BestCandidate, EvolutionOutcome, GenerationStats, Island, IslandModel, TerminationReason,
};
pub use judge::{Judge, JudgeConfig, Verdict};
pub use learning::{GuidanceHints, LearningEngine, LearningInsight};
pub use params::{Gene, GeneValues, ParameterSpace, ParameterSpec, SpaceVariant, SpecOverride};
pub use scorer::{score_symbol, FactorScores, SignalScore};
pub use simulator::{run_backtest, SimulationConfig, Simulation};
pub use types::*;

//! Fitness aggregation: one scalar per backtest, with penalty branches
//!
//! Penalties are checked before the weighted objective. A run with too few
//! trades scores `-1000 + trades` (more trades still rank higher among
//! failures); a run over the drawdown cap scores `-500 * drawdown`.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::dataset::MarketDataset;
use crate::params::GeneValues;
use crate::simulator::{run_backtest, SimulationConfig};
use crate::types::{BacktestResult, RiskMetrics};

/// Fitness assigned when a simulation fails or yields a non-finite score
pub const EVALUATION_FAILURE_FITNESS: f64 = -10_000.0;

/// Trade count at which the activity bonus saturates
const TRADE_BONUS_SATURATION: f64 = 300.0;

/// Constant weights of the objective; not evolved
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FitnessWeights {
    pub sharpe: f64,
    pub sortino: f64,
    pub calmar: f64,
    pub win_rate: f64,
    pub total_return: f64,
    pub drawdown: f64,
    pub profit_factor: f64,
    pub trade_bonus: f64,
}

impl Default for FitnessWeights {
    fn default() -> Self {
        Self {
            sharpe: 0.30,
            sortino: 0.15,
            calmar: 0.10,
            win_rate: 0.10,
            total_return: 0.10,
            drawdown: 0.10,
            profit_factor: 0.10,
            trade_bonus: 0.05,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FitnessConfig {
    pub min_trades: u32,
    /// Highest tolerated max drawdown (fraction)
    pub drawdown_cap: f64,
    /// Profit factor contributes at most this much
    pub profit_factor_cap: f64,
    pub weights: FitnessWeights,
}

impl Default for FitnessConfig {
    fn default() -> Self {
        Self {
            min_trades: 30,
            drawdown_cap: 0.30,
            profit_factor_cap: 3.0,
            weights: FitnessWeights::default(),
        }
    }
}

/// Scalar fitness of a backtest result
pub fn aggregate(result: &BacktestResult, config: &FitnessConfig) -> f64 {
    let trades = result.trade_count();
    if trades < config.min_trades {
        return -1000.0 + trades as f64;
    }
    if result.max_drawdown > config.drawdown_cap {
        return -500.0 * result.max_drawdown;
    }

    let w = &config.weights;
    let profit_factor = result.profit_factor.min(config.profit_factor_cap);
    let trade_bonus = (trades as f64 / TRADE_BONUS_SATURATION).min(1.0);

    let fitness = w.sharpe * result.sharpe
        + w.sortino * result.sortino
        + w.calmar * result.calmar
        + w.win_rate * result.win_rate
        + w.total_return * result.total_return
        + w.drawdown * (1.0 - result.max_drawdown)
        + w.profit_factor * profit_factor
        + w.trade_bonus * trade_bonus;

    if fitness.is_finite() {
        fitness
    } else {
        EVALUATION_FAILURE_FITNESS
    }
}

/// Outcome of evaluating one genotype
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub fitness: f64,
    pub risk_metrics: RiskMetrics,
    /// Absent when the simulation failed
    pub result: Option<BacktestResult>,
}

impl Evaluation {
    fn failed() -> Self {
        Self {
            fitness: EVALUATION_FAILURE_FITNESS,
            risk_metrics: RiskMetrics::default(),
            result: None,
        }
    }
}

/// Backtest + aggregation against a shared, read-only dataset
#[derive(Debug, Clone)]
pub struct Evaluator {
    dataset: Arc<MarketDataset>,
    simulation: SimulationConfig,
    fitness: FitnessConfig,
}

impl Evaluator {
    pub fn new(dataset: Arc<MarketDataset>, simulation: SimulationConfig, fitness: FitnessConfig) -> Self {
        Self {
            dataset,
            simulation,
            fitness,
        }
    }

    pub fn dataset(&self) -> &MarketDataset {
        &self.dataset
    }

    /// Never fails: simulation errors become the failure sentinel
    pub fn evaluate(&self, genes: &GeneValues) -> Evaluation {
        match run_backtest(&self.dataset, genes, &self.simulation) {
            Ok(result) => Evaluation {
                fitness: aggregate(&result, &self.fitness),
                risk_metrics: result.risk_metrics(),
                result: Some(result),
            },
            Err(e) => {
                warn!(error = %e, "Genome evaluation failed");
                Evaluation::failed()
            }
        }
    }
}

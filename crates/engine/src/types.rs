//! Core value types shared by the simulator, the fitness layer and the optimizer

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A single daily bar (OHLCV) as supplied by the market-data collaborator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bar {
    pub date: NaiveDate,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

/// Why a simulated position was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    StopLoss,
    TakeProfit,
    EndOfData,
}

/// A closed simulated position
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub symbol: String,
    pub entry_price: f64,
    pub exit_price: f64,
    pub quantity: f64,
    pub entry_date: NaiveDate,
    pub exit_date: NaiveDate,
    pub pnl: f64,
    /// Fractional return of the trade (0.05 = +5%)
    pub pnl_percent: f64,
    /// Signal confidence at entry
    pub confidence: f64,
    pub exit_reason: ExitReason,
}

/// Risk summary attached to an evaluated genome
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RiskMetrics {
    pub sharpe: f64,
    pub sortino: f64,
    pub calmar: f64,
    pub win_rate: f64,
    pub total_return: f64,
    pub max_drawdown: f64,
    pub trade_count: u32,
}

/// Result of one simulation of one genome over one dataset
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestResult {
    pub initial_capital: f64,
    pub final_equity: f64,
    pub trading_days: usize,
    pub equity_curve: Vec<f64>,
    pub daily_returns: Vec<f64>,
    pub trades: Vec<Trade>,
    pub sharpe: f64,
    pub sortino: f64,
    pub calmar: f64,
    pub cagr: f64,
    pub total_return: f64,
    /// Peak-to-trough decline as a fraction (0.2 = 20%)
    pub max_drawdown: f64,
    /// Fraction of trades with positive PnL
    pub win_rate: f64,
    /// Gross profit / gross loss; `f64::INFINITY` when there are no losing trades
    pub profit_factor: f64,
}

impl BacktestResult {
    pub fn trade_count(&self) -> u32 {
        self.trades.len() as u32
    }

    pub fn risk_metrics(&self) -> RiskMetrics {
        RiskMetrics {
            sharpe: self.sharpe,
            sortino: self.sortino,
            calmar: self.calmar,
            win_rate: self.win_rate,
            total_return: self.total_return,
            max_drawdown: self.max_drawdown,
            trade_count: self.trade_count(),
        }
    }
}

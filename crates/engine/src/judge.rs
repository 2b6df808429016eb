//! Judge: fixed-threshold verdicts over a candidate's risk metrics
//!
//! A `Suspicious` verdict keeps a candidate out of the recorded global best
//! while leaving it in its island.

use serde::{Deserialize, Serialize};

use crate::types::RiskMetrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Excellent,
    Good,
    Acceptable,
    Poor,
    Suspicious,
}

impl Verdict {
    pub fn is_suspicious(self) -> bool {
        self == Verdict::Suspicious
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Verdict::Excellent => "excellent",
            Verdict::Good => "good",
            Verdict::Acceptable => "acceptable",
            Verdict::Poor => "poor",
            Verdict::Suspicious => "suspicious",
        }
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JudgeConfig {
    /// Sharpe above this is implausible for a daily backtest
    pub max_plausible_sharpe: f64,
    pub max_plausible_win_rate: f64,
    /// Win-rate rule only applies from this many trades
    pub win_rate_min_trades: u32,
}

impl Default for JudgeConfig {
    fn default() -> Self {
        Self {
            max_plausible_sharpe: 4.0,
            max_plausible_win_rate: 0.85,
            win_rate_min_trades: 50,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Judge {
    config: JudgeConfig,
}

impl Judge {
    pub fn new(config: JudgeConfig) -> Self {
        Self { config }
    }

    pub fn verdict(&self, m: &RiskMetrics) -> Verdict {
        if m.sharpe > self.config.max_plausible_sharpe
            || (m.win_rate > self.config.max_plausible_win_rate
                && m.trade_count >= self.config.win_rate_min_trades)
        {
            return Verdict::Suspicious;
        }

        if m.sharpe >= 2.0 && m.max_drawdown <= 0.15 && m.total_return > 0.0 {
            Verdict::Excellent
        } else if m.sharpe >= 1.0 && m.max_drawdown <= 0.25 && m.total_return > 0.0 {
            Verdict::Good
        } else if m.sharpe >= 0.5 && m.total_return > 0.0 {
            Verdict::Acceptable
        } else {
            Verdict::Poor
        }
    }
}

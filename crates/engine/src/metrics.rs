//! Risk and performance metrics over an equity curve and its trades
//!
//! Degenerate inputs map to defined values instead of dividing by zero:
//! zero variance gives a Sharpe of 0, no negative returns gives a Sortino
//! of 0, zero drawdown gives a Calmar of 0 and a trade list without losses
//! gives an infinite profit factor (or 0 when nothing was won either).

use crate::indicators::TRADING_DAYS_PER_YEAR;
use crate::types::Trade;

/// Deviations below this are treated as zero variance
const VARIANCE_EPSILON: f64 = 1e-12;

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Sample standard deviation (n - 1)
pub fn sample_std(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    var.sqrt()
}

/// Annualized Sharpe ratio of daily returns
pub fn sharpe_ratio(daily_returns: &[f64]) -> f64 {
    let std = sample_std(daily_returns);
    if std < VARIANCE_EPSILON {
        return 0.0;
    }
    mean(daily_returns) * TRADING_DAYS_PER_YEAR / (std * TRADING_DAYS_PER_YEAR.sqrt())
}

/// Annualized Sortino ratio; downside deviation is taken over the
/// negative returns only
pub fn sortino_ratio(daily_returns: &[f64]) -> f64 {
    let downside: Vec<f64> = daily_returns.iter().copied().filter(|r| *r < 0.0).collect();
    if downside.is_empty() {
        return 0.0;
    }
    let downside_dev = (downside.iter().map(|r| r * r).sum::<f64>() / downside.len() as f64).sqrt();
    if downside_dev < VARIANCE_EPSILON {
        return 0.0;
    }
    mean(daily_returns) * TRADING_DAYS_PER_YEAR / (downside_dev * TRADING_DAYS_PER_YEAR.sqrt())
}

/// Largest peak-to-trough decline as a fraction of the peak
pub fn max_drawdown(equity_curve: &[f64]) -> f64 {
    let mut peak = f64::MIN;
    let mut worst = 0.0f64;
    for &equity in equity_curve {
        if equity > peak {
            peak = equity;
        }
        if peak > 0.0 {
            worst = worst.max((peak - equity) / peak);
        }
    }
    worst
}

/// Compound annual growth rate over `trading_days` days
pub fn cagr(initial: f64, final_equity: f64, trading_days: usize) -> f64 {
    if trading_days == 0 || initial <= 0.0 {
        return 0.0;
    }
    if final_equity <= 0.0 {
        return -1.0;
    }
    (final_equity / initial).powf(TRADING_DAYS_PER_YEAR / trading_days as f64) - 1.0
}

pub fn calmar_ratio(cagr: f64, max_drawdown: f64) -> f64 {
    if max_drawdown <= 0.0 {
        0.0
    } else {
        cagr / max_drawdown
    }
}

pub fn win_rate(trades: &[Trade]) -> f64 {
    if trades.is_empty() {
        return 0.0;
    }
    trades.iter().filter(|t| t.pnl > 0.0).count() as f64 / trades.len() as f64
}

/// Gross profit over gross loss
pub fn profit_factor(trades: &[Trade]) -> f64 {
    let gross_profit: f64 = trades.iter().filter(|t| t.pnl > 0.0).map(|t| t.pnl).sum();
    let gross_loss: f64 = trades.iter().filter(|t| t.pnl < 0.0).map(|t| -t.pnl).sum();
    if gross_loss > 0.0 {
        gross_profit / gross_loss
    } else if gross_profit > 0.0 {
        f64::INFINITY
    } else {
        0.0
    }
}

//! Day-by-day portfolio backtest driven by the signal scorer
//!
//! The simulation is an explicit state machine over the shared trading
//! calendar: `Warmup` skips the first `warmup_bars` days, `Trading(day)`
//! runs exits, entries and mark-to-market for one day, and `Closed`
//! force-closes whatever is still open and derives the metrics.

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::dataset::MarketDataset;
use crate::error::EngineResult;
use crate::indicators;
use crate::metrics;
use crate::params::{Gene, GeneValues};
use crate::scorer::{self, MIN_SCORING_BARS};
use crate::types::{BacktestResult, ExitReason, Trade};

/// Simulation constants shared by every evaluation of a run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub initial_capital: f64,
    /// Calendar days skipped before the first trading day
    pub warmup_bars: usize,
    /// Longest trailing window handed to the scorer
    pub scoring_window: usize,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            initial_capital: 100_000.0,
            warmup_bars: 50,
            scoring_window: 120,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimPhase {
    Warmup,
    Trading(usize),
    Closed,
}

#[derive(Debug, Clone)]
struct Position {
    symbol_idx: usize,
    quantity: f64,
    entry_price: f64,
    entry_day: usize,
    stop_loss: f64,
    take_profit: f64,
    confidence: f64,
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    symbol_idx: usize,
    score: f64,
    confidence: f64,
    price: f64,
    atr: f64,
}

/// One in-flight simulation of one genome
pub struct Simulation<'a> {
    dataset: &'a MarketDataset,
    genes: &'a GeneValues,
    config: &'a SimulationConfig,
    phase: SimPhase,
    cash: f64,
    positions: Vec<Position>,
    /// Last known close per symbol; missing bars reuse it
    last_close: Vec<Option<f64>>,
    equity_curve: Vec<f64>,
    daily_returns: Vec<f64>,
    trades: Vec<Trade>,
}

impl<'a> Simulation<'a> {
    pub fn new(dataset: &'a MarketDataset, genes: &'a GeneValues, config: &'a SimulationConfig) -> Self {
        Self {
            dataset,
            genes,
            config,
            phase: SimPhase::Warmup,
            cash: config.initial_capital,
            positions: Vec::new(),
            last_close: vec![None; dataset.symbol_count()],
            equity_curve: vec![config.initial_capital],
            daily_returns: Vec::new(),
            trades: Vec::new(),
        }
    }

    pub fn phase(&self) -> SimPhase {
        self.phase
    }

    /// Advance one state transition
    pub fn step(&mut self) -> EngineResult<()> {
        let days = self.dataset.calendar().len();
        self.phase = match self.phase {
            SimPhase::Warmup => {
                for day in 0..self.config.warmup_bars.min(days) {
                    self.observe_closes(day);
                }
                if self.config.warmup_bars < days {
                    SimPhase::Trading(self.config.warmup_bars)
                } else {
                    SimPhase::Closed
                }
            }
            SimPhase::Trading(day) => {
                self.trade_day(day)?;
                if day + 1 < days {
                    SimPhase::Trading(day + 1)
                } else {
                    SimPhase::Closed
                }
            }
            SimPhase::Closed => SimPhase::Closed,
        };
        Ok(())
    }

    /// Run to completion and derive metrics
    pub fn run(mut self) -> EngineResult<BacktestResult> {
        while self.phase != SimPhase::Closed {
            self.step()?;
        }
        Ok(self.finish())
    }

    fn observe_closes(&mut self, day: usize) {
        for (sym, series) in self.dataset.series().iter().enumerate() {
            if let Some(bar) = self.dataset.bar_index(sym, day) {
                self.last_close[sym] = Some(series.close[bar]);
            }
        }
    }

    fn equity(&self) -> f64 {
        self.cash
            + self
                .positions
                .iter()
                .map(|p| p.quantity * self.last_close[p.symbol_idx].unwrap_or(p.entry_price))
                .sum::<f64>()
    }

    fn close_position(&mut self, position: Position, price: f64, exit_day: usize, reason: ExitReason) {
        let calendar = self.dataset.calendar();
        let pnl = (price - position.entry_price) * position.quantity;
        self.cash += price * position.quantity;
        self.trades.push(Trade {
            symbol: self.dataset.series()[position.symbol_idx].symbol.clone(),
            entry_price: position.entry_price,
            exit_price: price,
            quantity: position.quantity,
            entry_date: calendar[position.entry_day],
            exit_date: calendar[exit_day],
            pnl,
            pnl_percent: price / position.entry_price - 1.0,
            confidence: position.confidence,
            exit_reason: reason,
        });
    }

    fn trade_day(&mut self, day: usize) -> EngineResult<()> {
        self.observe_closes(day);
        self.check_exits(day);
        self.check_entries(day)?;

        let equity = self.equity();
        let previous = self.equity_curve.last().copied().unwrap_or(self.config.initial_capital);
        let daily_return = if previous > 0.0 { equity / previous - 1.0 } else { 0.0 };
        self.equity_curve.push(equity);
        self.daily_returns.push(daily_return);
        Ok(())
    }

    /// Stop first, then target; both fixed at entry
    fn check_exits(&mut self, day: usize) {
        let open = std::mem::take(&mut self.positions);
        for position in open {
            let Some(bar) = self.dataset.bar_index(position.symbol_idx, day) else {
                self.positions.push(position);
                continue;
            };
            let series = &self.dataset.series()[position.symbol_idx];
            if series.low[bar] <= position.stop_loss {
                let price = position.stop_loss;
                self.close_position(position, price, day, ExitReason::StopLoss);
            } else if series.high[bar] >= position.take_profit {
                let price = position.take_profit;
                self.close_position(position, price, day, ExitReason::TakeProfit);
            } else {
                self.positions.push(position);
            }
        }
    }

    fn check_entries(&mut self, day: usize) -> EngineResult<()> {
        if self.positions.len() >= self.genes.usize(Gene::MaxPositions) {
            return Ok(());
        }
        let candidates = self.collect_candidates(day)?;
        self.open_positions(day, candidates);
        Ok(())
    }

    /// Symbols without a position, with enough history, passing the entry filters
    fn collect_candidates(&self, day: usize) -> EngineResult<Vec<Candidate>> {
        let buy_threshold = self.genes[Gene::BuyThreshold];
        let confidence_threshold = self.genes[Gene::ConfidenceThreshold];
        let require_volume = self.genes.flag(Gene::RequireVolumeConfirmation);
        let atr_period = self.genes.usize(Gene::AtrPeriod);

        let mut candidates = Vec::new();
        for (sym, series) in self.dataset.series().iter().enumerate() {
            if self.positions.iter().any(|p| p.symbol_idx == sym) {
                continue;
            }
            let Some(bar) = self.dataset.bar_index(sym, day) else {
                continue;
            };
            if bar + 1 < MIN_SCORING_BARS {
                continue;
            }

            let window = series.window(bar, self.config.scoring_window);
            let signal = scorer::score_symbol(&window, self.genes)?;
            if signal.score < buy_threshold || signal.confidence < confidence_threshold {
                continue;
            }
            if require_volume && signal.factors.volume <= 0.0 {
                continue;
            }
            let atr = indicators::atr(&window, atr_period)?;
            if atr <= 0.0 {
                continue;
            }
            candidates.push(Candidate {
                symbol_idx: sym,
                score: signal.score,
                confidence: signal.confidence,
                price: series.close[bar],
                atr,
            });
        }
        Ok(candidates)
    }

    /// Open the best-scoring candidates until the position limit is reached.
    /// Candidates that cannot buy a single share do not use up a slot.
    fn open_positions(&mut self, day: usize, mut candidates: Vec<Candidate>) {
        candidates.sort_by(|a, b| b.score.total_cmp(&a.score));

        let max_positions = self.genes.usize(Gene::MaxPositions);
        let equity = self.equity();
        let position_pct = self.genes[Gene::MaxPositionPct];
        for candidate in candidates {
            if self.positions.len() >= max_positions {
                break;
            }
            let by_allocation = (equity * position_pct / candidate.price).floor();
            let affordable = (self.cash / candidate.price).floor();
            let quantity = by_allocation.min(affordable);
            if quantity < 1.0 {
                continue;
            }
            self.cash -= quantity * candidate.price;
            trace!(
                symbol = %self.dataset.series()[candidate.symbol_idx].symbol,
                day,
                quantity,
                score = candidate.score,
                "Opened position"
            );
            self.positions.push(Position {
                symbol_idx: candidate.symbol_idx,
                quantity,
                entry_price: candidate.price,
                entry_day: day,
                stop_loss: candidate.price - candidate.atr * self.genes[Gene::StopLossAtr],
                take_profit: candidate.price + candidate.atr * self.genes[Gene::TakeProfitAtr],
                confidence: candidate.confidence,
            });
        }
    }

    fn finish(mut self) -> BacktestResult {
        let last_day = self.dataset.calendar().len().saturating_sub(1);
        let open = std::mem::take(&mut self.positions);
        for position in open {
            let price = self.last_close[position.symbol_idx].unwrap_or(position.entry_price);
            self.close_position(position, price, last_day, ExitReason::EndOfData);
        }

        let initial = self.config.initial_capital;
        let final_equity = self.cash;
        let trading_days = self.daily_returns.len();
        let max_drawdown = metrics::max_drawdown(&self.equity_curve);
        let cagr = metrics::cagr(initial, final_equity, trading_days);

        BacktestResult {
            initial_capital: initial,
            final_equity,
            trading_days,
            sharpe: metrics::sharpe_ratio(&self.daily_returns),
            sortino: metrics::sortino_ratio(&self.daily_returns),
            calmar: metrics::calmar_ratio(cagr, max_drawdown),
            cagr,
            total_return: if initial > 0.0 { final_equity / initial - 1.0 } else { 0.0 },
            max_drawdown,
            win_rate: metrics::win_rate(&self.trades),
            profit_factor: metrics::profit_factor(&self.trades),
            equity_curve: self.equity_curve,
            daily_returns: self.daily_returns,
            trades: self.trades,
        }
    }
}

/// Simulate `genes` over the whole dataset
pub fn run_backtest(
    dataset: &MarketDataset,
    genes: &GeneValues,
    config: &SimulationConfig,
) -> EngineResult<BacktestResult> {
    Simulation::new(dataset, genes, config).run()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::fixtures::{synthetic_bars, synthetic_dataset};
    use crate::dataset::SymbolSeries;
    use crate::genome::Genome;
    use crate::params::{ParameterSpace, WEIGHT_GENES};
    use crate::types::Bar;
    use chrono::{Duration, NaiveDate};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::BTreeMap;

    fn aggressive_genes() -> GeneValues {
        let space = ParameterSpace::default();
        let mut rng = StdRng::seed_from_u64(21);
        let mut genome = Genome::random(1, &space, 0, &mut rng);
        for w in WEIGHT_GENES {
            genome.genes[w] = 0.0;
        }
        genome.genes[Gene::WeightMomentum] = 0.5;
        genome.genes[Gene::WeightBreadth] = 0.5;
        genome.genes[Gene::BuyThreshold] = 0.05;
        genome.genes[Gene::ConfidenceThreshold] = 0.0;
        genome.genes[Gene::MaxPositions] = 5.0;
        genome.genes[Gene::MaxPositionPct] = 0.2;
        genome.genes[Gene::RequireVolumeConfirmation] = 0.0;
        genome.repair(&space);
        genome.genes
    }

    /// Constant-price series trading from `first_day` for `len` days
    fn flat_series(symbol: &str, first_day: i64, len: usize, price: f64) -> SymbolSeries {
        let start = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap() + Duration::days(first_day);
        SymbolSeries {
            symbol: symbol.to_string(),
            dates: (0..len).map(|i| start + Duration::days(i as i64)).collect(),
            open: vec![price; len],
            high: vec![price + 1.0; len],
            low: vec![price - 1.0; len],
            close: vec![price; len],
            volume: vec![1_000_000.0; len],
        }
    }

    fn open_position(symbol_idx: usize, entry_day: usize) -> Position {
        Position {
            symbol_idx,
            quantity: 10.0,
            entry_price: 100.0,
            entry_day,
            stop_loss: 95.0,
            take_profit: 105.0,
            confidence: 0.5,
        }
    }

    #[test]
    fn test_state_machine_phases() {
        let dataset = synthetic_dataset(3, 60);
        let genes = aggressive_genes();
        let config = SimulationConfig::default();
        let mut sim = Simulation::new(&dataset, &genes, &config);
        assert_eq!(sim.phase(), SimPhase::Warmup);
        sim.step().unwrap();
        assert_eq!(sim.phase(), SimPhase::Trading(50));
        while sim.phase() != SimPhase::Closed {
            sim.step().unwrap();
        }
        let result = sim.run().unwrap();
        assert_eq!(result.trading_days, 10);
        assert_eq!(result.equity_curve.len(), 11);
    }

    #[test]
    fn test_short_dataset_yields_no_trades() {
        let dataset = synthetic_dataset(2, 40);
        let result = run_backtest(&dataset, &aggressive_genes(), &SimulationConfig::default()).unwrap();
        assert_eq!(result.trade_count(), 0);
        assert_eq!(result.trading_days, 0);
        assert_eq!(result.sharpe, 0.0);
        assert_eq!(result.final_equity, 100_000.0);
    }

    #[test]
    fn test_backtest_is_deterministic_and_consistent() {
        let dataset = synthetic_dataset(6, 260);
        let genes = aggressive_genes();
        let config = SimulationConfig::default();
        let a = run_backtest(&dataset, &genes, &config).unwrap();
        let b = run_backtest(&dataset, &genes, &config).unwrap();

        assert_eq!(a.equity_curve, b.equity_curve);
        assert_eq!(a.sharpe.to_bits(), b.sharpe.to_bits());
        assert_eq!(a.trade_count(), b.trade_count());
        assert!(a.trade_count() > 0);

        let realized: f64 = a.trades.iter().map(|t| t.pnl).sum();
        assert!((a.final_equity - (100_000.0 + realized)).abs() < 1e-6);
        let last = *a.equity_curve.last().unwrap();
        assert!((a.final_equity - last).abs() < 1e-6);
        assert!(a.max_drawdown >= 0.0 && a.max_drawdown <= 1.0);
    }

    #[test]
    fn test_position_limits_and_cash_respected() {
        let dataset = synthetic_dataset(8, 200);
        let genes = aggressive_genes();
        let result = run_backtest(&dataset, &genes, &SimulationConfig::default()).unwrap();
        for trade in &result.trades {
            assert!(trade.quantity >= 1.0);
            assert!(trade.quantity == trade.quantity.floor());
            assert!(trade.exit_date >= trade.entry_date);
        }
        // No more than max_positions open on any given day
        for day in dataset.calendar() {
            let open = result
                .trades
                .iter()
                .filter(|t| t.entry_date <= *day && t.exit_date > *day)
                .count();
            assert!(open <= 5);
        }
    }

    #[test]
    fn test_exits_fill_at_levels_stop_first() {
        let mut both = flat_series("AAA", 0, 60, 100.0);
        both.low[55] = 90.0;
        both.high[55] = 110.0;
        let mut target = flat_series("BBB", 0, 60, 100.0);
        target.high[55] = 110.0;
        let quiet = flat_series("CCC", 0, 60, 100.0);
        let dataset = MarketDataset::from_series(vec![both, target, quiet]).unwrap();

        let genes = aggressive_genes();
        let config = SimulationConfig::default();
        let mut sim = Simulation::new(&dataset, &genes, &config);
        sim.positions = vec![open_position(0, 50), open_position(1, 50), open_position(2, 50)];
        sim.check_exits(55);

        let exits: Vec<_> = sim
            .trades
            .iter()
            .map(|t| (t.symbol.as_str(), t.exit_reason, t.exit_price, t.exit_date))
            .collect();
        let day = dataset.calendar()[55];
        assert_eq!(
            exits,
            vec![
                ("AAA", ExitReason::StopLoss, 95.0, day),
                ("BBB", ExitReason::TakeProfit, 105.0, day),
            ]
        );
        assert_eq!(sim.positions.len(), 1);
        assert_eq!(sim.positions[0].symbol_idx, 2);
        assert_eq!(sim.trades[0].pnl, -50.0);
        assert_eq!(sim.trades[1].pnl, 50.0);
    }

    #[test]
    fn test_end_of_data_closes_at_last_known_close() {
        let full = flat_series("AAA", 0, 60, 100.0);
        let mut delisted = flat_series("BBB", 0, 40, 100.0);
        delisted.close[39] = 123.0;
        let dataset = MarketDataset::from_series(vec![full, delisted]).unwrap();

        let genes = aggressive_genes();
        let config = SimulationConfig::default();
        let mut sim = Simulation::new(&dataset, &genes, &config);
        sim.positions = vec![open_position(0, 50), open_position(1, 20)];
        for day in 0..dataset.calendar().len() {
            sim.observe_closes(day);
        }
        let result = sim.finish();

        let last_day = dataset.calendar()[59];
        assert_eq!(result.trades.len(), 2);
        for trade in &result.trades {
            assert_eq!(trade.exit_reason, ExitReason::EndOfData);
            assert_eq!(trade.exit_date, last_day);
        }
        assert_eq!(result.trades[0].exit_price, 100.0);
        assert_eq!(result.trades[1].exit_price, 123.0);
    }

    #[test]
    fn test_symbol_with_short_history_is_skipped() {
        let mut bars: BTreeMap<String, Vec<Bar>> = (0..6)
            .map(|i| {
                let drift = if i % 2 == 0 { 0.0008 } else { -0.0003 };
                (format!("SYM{i:02}"), synthetic_bars(260, i as f64 * 0.9, drift))
            })
            .collect();
        let late: Vec<Bar> = synthetic_bars(260, 0.0, 0.0008).into_iter().skip(200).collect();
        bars.insert("ZZZ".to_string(), late);
        let dataset = MarketDataset::from_bars(&bars).unwrap();
        let late_idx = 6;
        assert_eq!(dataset.bar_index(late_idx, 200), Some(0));
        assert_eq!(dataset.bar_index(late_idx, 249), Some(49));

        let genes = aggressive_genes();
        let config = SimulationConfig::default();
        let sim = Simulation::new(&dataset, &genes, &config);
        for day in 200..249 {
            let candidates = sim.collect_candidates(day).unwrap();
            assert!(candidates.iter().all(|c| c.symbol_idx != late_idx));
        }

        let result = run_backtest(&dataset, &genes, &config).unwrap();
        let eligible_from = dataset.calendar()[249];
        assert!(result.trades.iter().any(|t| t.symbol != "ZZZ"));
        for trade in result.trades.iter().filter(|t| t.symbol == "ZZZ") {
            assert!(trade.entry_date >= eligible_from);
        }
    }

    #[test]
    fn test_unaffordable_candidate_does_not_take_a_slot() {
        let dataset = MarketDataset::from_series(vec![
            flat_series("AAA", 0, 60, 100.0),
            flat_series("BBB", 0, 60, 50.0),
        ])
        .unwrap();
        let mut genes = aggressive_genes();
        genes[Gene::MaxPositions] = 1.0;
        let config = SimulationConfig::default();
        let mut sim = Simulation::new(&dataset, &genes, &config);

        let expensive = Candidate {
            symbol_idx: 0,
            score: 0.9,
            confidence: 0.9,
            price: 500_000.0,
            atr: 1.0,
        };
        let cheap = Candidate {
            symbol_idx: 1,
            score: 0.4,
            confidence: 0.6,
            price: 50.0,
            atr: 1.0,
        };
        sim.open_positions(55, vec![cheap, expensive]);

        assert_eq!(sim.positions.len(), 1);
        let opened = &sim.positions[0];
        assert_eq!(opened.symbol_idx, 1);
        assert_eq!(opened.quantity, (100_000.0 * genes[Gene::MaxPositionPct] / 50.0).floor());
        assert_eq!(sim.cash, 100_000.0 - opened.quantity * 50.0);
    }
}

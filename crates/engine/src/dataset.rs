//! Read-only market dataset shared by every evaluation
//!
//! Bars arrive with `Decimal` prices; they are converted once to `f64`
//! columns so the scorer and simulator never touch `Decimal` in the hot loop.
//! A shared trading calendar (sorted union of all dates) drives the
//! simulator, with a per-symbol map from calendar day to bar index.

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::error::{EngineError, EngineResult};
use crate::types::Bar;

/// Columnar price history for one symbol
#[derive(Debug, Clone)]
pub struct SymbolSeries {
    pub symbol: String,
    pub dates: Vec<NaiveDate>,
    pub open: Vec<f64>,
    pub high: Vec<f64>,
    pub low: Vec<f64>,
    pub close: Vec<f64>,
    pub volume: Vec<f64>,
}

/// Borrowed trailing window of one symbol's columns
#[derive(Debug, Clone, Copy)]
pub struct SeriesWindow<'a> {
    pub open: &'a [f64],
    pub high: &'a [f64],
    pub low: &'a [f64],
    pub close: &'a [f64],
    pub volume: &'a [f64],
}

impl SeriesWindow<'_> {
    pub fn len(&self) -> usize {
        self.close.len()
    }

    pub fn is_empty(&self) -> bool {
        self.close.is_empty()
    }

    pub fn last_close(&self) -> f64 {
        self.close.last().copied().unwrap_or(0.0)
    }
}

fn to_f64(value: Decimal, symbol: &str, field: &str, date: NaiveDate) -> EngineResult<f64> {
    value
        .to_f64()
        .filter(|v| v.is_finite())
        .ok_or_else(|| {
            EngineError::Dataset(format!("{symbol} {date}: {field} is not representable"))
        })
}

impl SymbolSeries {
    /// Convert and validate a symbol's bars. Bars must be strictly increasing
    /// in date with positive prices and `low <= high`.
    pub fn from_bars(symbol: &str, bars: &[Bar]) -> EngineResult<Self> {
        let mut series = SymbolSeries {
            symbol: symbol.to_string(),
            dates: Vec::with_capacity(bars.len()),
            open: Vec::with_capacity(bars.len()),
            high: Vec::with_capacity(bars.len()),
            low: Vec::with_capacity(bars.len()),
            close: Vec::with_capacity(bars.len()),
            volume: Vec::with_capacity(bars.len()),
        };

        for bar in bars {
            if let Some(prev) = series.dates.last() {
                if bar.date <= *prev {
                    return Err(EngineError::Dataset(format!(
                        "{symbol}: bars out of order at {}",
                        bar.date
                    )));
                }
            }

            let open = to_f64(bar.open, symbol, "open", bar.date)?;
            let high = to_f64(bar.high, symbol, "high", bar.date)?;
            let low = to_f64(bar.low, symbol, "low", bar.date)?;
            let close = to_f64(bar.close, symbol, "close", bar.date)?;
            let volume = to_f64(bar.volume, symbol, "volume", bar.date)?;

            if close <= 0.0 || open <= 0.0 || low <= 0.0 || low > high || volume < 0.0 {
                return Err(EngineError::Dataset(format!(
                    "{symbol} {}: malformed bar",
                    bar.date
                )));
            }

            series.dates.push(bar.date);
            series.open.push(open);
            series.high.push(high);
            series.low.push(low);
            series.close.push(close);
            series.volume.push(volume);
        }

        Ok(series)
    }

    pub fn len(&self) -> usize {
        self.close.len()
    }

    pub fn is_empty(&self) -> bool {
        self.close.is_empty()
    }

    /// Window ending at `end` (inclusive), at most `max_len` bars long
    pub fn window(&self, end: usize, max_len: usize) -> SeriesWindow<'_> {
        let stop = (end + 1).min(self.len());
        let start = stop.saturating_sub(max_len);
        SeriesWindow {
            open: &self.open[start..stop],
            high: &self.high[start..stop],
            low: &self.low[start..stop],
            close: &self.close[start..stop],
            volume: &self.volume[start..stop],
        }
    }
}

/// Immutable multi-symbol dataset with a shared trading calendar
#[derive(Debug, Clone)]
pub struct MarketDataset {
    series: Vec<SymbolSeries>,
    calendar: Vec<NaiveDate>,
    /// `bar_index[symbol][day]` = index into that symbol's series, if it traded that day
    bar_index: Vec<Vec<Option<usize>>>,
}

impl MarketDataset {
    /// Build from raw bars keyed by symbol. Symbol order follows the map
    /// order, which keeps simulations reproducible.
    pub fn from_bars(bars: &BTreeMap<String, Vec<Bar>>) -> EngineResult<Self> {
        let series = bars
            .iter()
            .map(|(symbol, bars)| SymbolSeries::from_bars(symbol, bars))
            .collect::<EngineResult<Vec<_>>>()?;
        Self::from_series(series)
    }

    pub fn from_series(series: Vec<SymbolSeries>) -> EngineResult<Self> {
        let series: Vec<SymbolSeries> = series.into_iter().filter(|s| !s.is_empty()).collect();
        if series.is_empty() {
            return Err(EngineError::Dataset("no symbol has any bars".to_string()));
        }

        let calendar: Vec<NaiveDate> = series
            .iter()
            .flat_map(|s| s.dates.iter().copied())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let bar_index = series
            .iter()
            .map(|s| {
                let mut cursor = 0usize;
                calendar
                    .iter()
                    .map(|day| {
                        if cursor < s.dates.len() && s.dates[cursor] == *day {
                            cursor += 1;
                            Some(cursor - 1)
                        } else {
                            None
                        }
                    })
                    .collect()
            })
            .collect();

        Ok(Self {
            series,
            calendar,
            bar_index,
        })
    }

    pub fn series(&self) -> &[SymbolSeries] {
        &self.series
    }

    pub fn calendar(&self) -> &[NaiveDate] {
        &self.calendar
    }

    pub fn symbol_count(&self) -> usize {
        self.series.len()
    }

    pub fn bar_index(&self, symbol_idx: usize, day: usize) -> Option<usize> {
        self.bar_index
            .get(symbol_idx)
            .and_then(|days| days.get(day).copied().flatten())
    }

    /// Number of symbols with strictly more than `warmup_bars` bars, i.e.
    /// symbols that can be traded at least once after warmup.
    pub fn eligible_symbols(&self, warmup_bars: usize) -> usize {
        self.series.iter().filter(|s| s.len() > warmup_bars).count()
    }
}

//! Indicator helpers over trailing price windows
//!
//! Each helper streams a window through a `ta` indicator and returns the
//! value at the last bar. Windows are short (the scorer caps them), so
//! rebuilding the indicator per call keeps every helper a pure function.

use ta::indicators::{
    AverageTrueRange, BollingerBands, MovingAverageConvergenceDivergence, OnBalanceVolume,
    RelativeStrengthIndex, SimpleMovingAverage, StandardDeviation,
};
use ta::{Close, High, Low, Next, Open, Volume};

use crate::dataset::SeriesWindow;
use crate::error::EngineResult;

/// Trading days per year used for annualization
pub const TRADING_DAYS_PER_YEAR: f64 = 252.0;

// ============================================================================
// Bar adapter
// ============================================================================

/// One bar of a window, borrowed as the `ta` OHLCV traits
#[derive(Debug, Clone, Copy)]
struct WindowBar {
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
}

impl Open for WindowBar {
    fn open(&self) -> f64 {
        self.open
    }
}

impl High for WindowBar {
    fn high(&self) -> f64 {
        self.high
    }
}

impl Low for WindowBar {
    fn low(&self) -> f64 {
        self.low
    }
}

impl Close for WindowBar {
    fn close(&self) -> f64 {
        self.close
    }
}

impl Volume for WindowBar {
    fn volume(&self) -> f64 {
        self.volume
    }
}

fn bars<'a>(window: &'a SeriesWindow<'_>) -> impl Iterator<Item = WindowBar> + 'a {
    (0..window.len()).map(move |i| WindowBar {
        open: window.open[i],
        high: window.high[i],
        low: window.low[i],
        close: window.close[i],
        volume: window.volume[i],
    })
}

// ============================================================================
// Oscillators and bands
// ============================================================================

/// RSI (0–100) at the last close
pub fn rsi(close: &[f64], period: usize) -> EngineResult<f64> {
    let mut rsi = RelativeStrengthIndex::new(period)?;
    let mut last = 50.0;
    for &c in close {
        last = rsi.next(c);
    }
    Ok(last)
}

/// MACD histogram at the previous and the last close
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MacdHistogram {
    pub previous: f64,
    pub current: f64,
}

pub fn macd_histogram(
    close: &[f64],
    fast: usize,
    slow: usize,
    signal: usize,
) -> EngineResult<MacdHistogram> {
    let mut macd = MovingAverageConvergenceDivergence::new(fast, slow, signal)?;
    let mut out = MacdHistogram {
        previous: 0.0,
        current: 0.0,
    };
    for &c in close {
        out.previous = out.current;
        out.current = macd.next(c).histogram;
    }
    Ok(out)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BandLevels {
    pub average: f64,
    pub upper: f64,
    pub lower: f64,
}

impl BandLevels {
    pub fn width(&self) -> f64 {
        self.upper - self.lower
    }
}

/// Bollinger bands at the last close
pub fn bollinger(close: &[f64], period: usize, multiplier: f64) -> EngineResult<BandLevels> {
    let mut bb = BollingerBands::new(period, multiplier)?;
    let mut levels = BandLevels {
        average: close.last().copied().unwrap_or(0.0),
        upper: 0.0,
        lower: 0.0,
    };
    for &c in close {
        let out = bb.next(c);
        levels = BandLevels {
            average: out.average,
            upper: out.upper,
            lower: out.lower,
        };
    }
    Ok(levels)
}

/// Average true range at the last bar
pub fn atr(window: &SeriesWindow<'_>, period: usize) -> EngineResult<f64> {
    let mut atr = AverageTrueRange::new(period)?;
    let mut last = 0.0;
    for bar in bars(window) {
        last = atr.next(&bar);
    }
    Ok(last)
}

/// Simple moving average of the last `period` values (or fewer if the
/// slice is shorter)
pub fn sma(values: &[f64], period: usize) -> EngineResult<f64> {
    let mut sma = SimpleMovingAverage::new(period)?;
    let mut last = 0.0;
    for &v in values {
        last = sma.next(v);
    }
    Ok(last)
}

// ============================================================================
// Returns, volatility, volume
// ============================================================================

/// Percentage return over the last `lookback` bars; 0 when the window is too short
pub fn pct_return(close: &[f64], lookback: usize) -> f64 {
    if lookback == 0 || close.len() <= lookback {
        return 0.0;
    }
    let last = close[close.len() - 1];
    let base = close[close.len() - 1 - lookback];
    if base <= 0.0 {
        return 0.0;
    }
    last / base - 1.0
}

/// Annualized standard deviation of daily returns over the last `lookback` returns
pub fn annualized_volatility(close: &[f64], lookback: usize) -> EngineResult<f64> {
    if close.len() < 2 {
        return Ok(0.0);
    }
    let mut stddev = StandardDeviation::new(lookback.max(1))?;
    let mut last = 0.0;
    for pair in close.windows(2) {
        if pair[0] > 0.0 {
            last = stddev.next(pair[1] / pair[0] - 1.0);
        }
    }
    Ok(last * TRADING_DAYS_PER_YEAR.sqrt())
}

/// Sign of the on-balance-volume change over the last `lookback` bars
pub fn obv_direction(window: &SeriesWindow<'_>, lookback: usize) -> f64 {
    let mut obv = OnBalanceVolume::new();
    let series: Vec<f64> = bars(window).map(|bar| obv.next(&bar)).collect();
    if series.len() <= lookback || lookback == 0 {
        return 0.0;
    }
    let change = series[series.len() - 1] - series[series.len() - 1 - lookback];
    if change > 0.0 {
        1.0
    } else if change < 0.0 {
        -1.0
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(n: usize, start: f64, step: f64) -> Vec<f64> {
        (0..n).map(|i| start + step * i as f64).collect()
    }

    fn window_of<'a>(close: &'a [f64], high: &'a [f64], low: &'a [f64], vol: &'a [f64]) -> SeriesWindow<'a> {
        SeriesWindow {
            open: close,
            high,
            low,
            close,
            volume: vol,
        }
    }

    #[test]
    fn test_rsi_extremes() {
        let rising = ramp(60, 100.0, 1.0);
        let falling = ramp(60, 200.0, -1.0);
        assert!(rsi(&rising, 14).unwrap() > 70.0);
        assert!(rsi(&falling, 14).unwrap() < 30.0);
    }

    #[test]
    fn test_zero_period_is_indicator_error() {
        let close = ramp(60, 100.0, 1.0);
        assert!(rsi(&close, 0).is_err());
        assert!(sma(&close, 0).is_err());
    }

    #[test]
    fn test_bollinger_brackets_average() {
        let close: Vec<f64> = (0..60).map(|i| 100.0 + (i as f64 / 3.0).sin() * 5.0).collect();
        let bands = bollinger(&close, 20, 2.0).unwrap();
        assert!(bands.lower < bands.average && bands.average < bands.upper);
    }

    #[test]
    fn test_sma_of_constant_series() {
        let close = vec![42.0; 30];
        assert!((sma(&close, 10).unwrap() - 42.0).abs() < 1e-12);
    }

    #[test]
    fn test_flat_series_has_zero_volatility() {
        let close = vec![50.0; 40];
        assert_eq!(annualized_volatility(&close, 20).unwrap(), 0.0);
    }

    #[test]
    fn test_pct_return_and_short_window() {
        let close = vec![100.0, 105.0, 110.0];
        assert!((pct_return(&close, 2) - 0.10).abs() < 1e-12);
        assert_eq!(pct_return(&close, 5), 0.0);
    }

    #[test]
    fn test_atr_and_obv_on_rising_window() {
        let close = ramp(40, 100.0, 1.0);
        let high: Vec<f64> = close.iter().map(|c| c + 1.0).collect();
        let low: Vec<f64> = close.iter().map(|c| c - 1.0).collect();
        let vol = vec![1_000.0; 40];
        let window = window_of(&close, &high, &low, &vol);
        assert!(atr(&window, 14).unwrap() > 0.0);
        assert_eq!(obv_direction(&window, 20), 1.0);
    }
}

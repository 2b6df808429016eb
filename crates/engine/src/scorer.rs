//! Multi-factor signal scorer
//!
//! Scores one symbol on one day from its trailing window and a genome's
//! genes. Eight factor scores in `[-1, 1]` are combined with the genome's
//! normalized weight genes; confidence is the fraction of factors agreeing
//! with the combined direction times its magnitude.

use serde::{Deserialize, Serialize};

use crate::dataset::SeriesWindow;
use crate::error::EngineResult;
use crate::indicators::{self, BandLevels};
use crate::params::{Gene, GeneValues};

/// Fewest bars the scorer accepts
pub const MIN_SCORING_BARS: usize = 50;

const SHORT_MOMENTUM_BARS: usize = 5;
const LONG_MOMENTUM_BARS: usize = 20;
const VOLUME_AVERAGE_BARS: usize = 20;
const BREAKOUT_BARS: usize = 20;

/// Per-factor scores, each clipped to `[-1, 1]`
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FactorScores {
    pub technical: f64,
    pub momentum: f64,
    pub volatility: f64,
    pub volume: f64,
    pub sentiment: f64,
    pub pattern: f64,
    pub breadth: f64,
    pub mean_reversion: f64,
}

impl FactorScores {
    /// Factor values in weight-gene order
    pub fn as_array(&self) -> [f64; 8] {
        [
            self.technical,
            self.momentum,
            self.volatility,
            self.volume,
            self.sentiment,
            self.pattern,
            self.breadth,
            self.mean_reversion,
        ]
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SignalScore {
    /// Weighted directional score in `[-1, 1]`; positive is bullish
    pub score: f64,
    pub confidence: f64,
    pub factors: FactorScores,
}

fn clip(v: f64) -> f64 {
    if v.is_finite() {
        v.clamp(-1.0, 1.0)
    } else {
        0.0
    }
}

fn sign(v: f64) -> f64 {
    if v > 0.0 {
        1.0
    } else if v < 0.0 {
        -1.0
    } else {
        0.0
    }
}

/// Score the last bar of `window`. Windows shorter than
/// [`MIN_SCORING_BARS`] score neutral.
pub fn score_symbol(window: &SeriesWindow<'_>, genes: &GeneValues) -> EngineResult<SignalScore> {
    if window.len() < MIN_SCORING_BARS {
        return Ok(SignalScore::default());
    }

    let bands = indicators::bollinger(
        window.close,
        genes.usize(Gene::BollingerPeriod),
        genes[Gene::BollingerStd],
    )?;

    let factors = FactorScores {
        technical: technical_factor(window, genes, &bands)?,
        momentum: momentum_factor(window.close, genes.usize(Gene::MomentumLookback)),
        volatility: clip(
            0.5 - indicators::annualized_volatility(
                window.close,
                genes.usize(Gene::VolatilityLookback),
            )?,
        ),
        volume: volume_factor(window),
        sentiment: sentiment_factor(window),
        pattern: pattern_factor(window),
        breadth: breadth_factor(window.close)?,
        mean_reversion: mean_reversion_factor(window.last_close(), &bands),
    };

    let weights = [
        genes[Gene::WeightTechnical],
        genes[Gene::WeightMomentum],
        genes[Gene::WeightVolatility],
        genes[Gene::WeightVolume],
        genes[Gene::WeightSentiment],
        genes[Gene::WeightPattern],
        genes[Gene::WeightBreadth],
        genes[Gene::WeightMeanReversion],
    ];
    let values = factors.as_array();
    let score = clip(weights.iter().zip(values.iter()).map(|(w, f)| w * f).sum());

    let direction = sign(score);
    let confidence = if direction == 0.0 {
        0.0
    } else {
        let agreeing = values.iter().filter(|f| sign(**f) == direction).count();
        agreeing as f64 / values.len() as f64 * score.abs()
    };

    Ok(SignalScore {
        score,
        confidence,
        factors,
    })
}

// ============================================================================
// Factors
// ============================================================================

/// RSI threshold deviation + MACD histogram acceleration + band penetration
fn technical_factor(
    window: &SeriesWindow<'_>,
    genes: &GeneValues,
    bands: &BandLevels,
) -> EngineResult<f64> {
    let close = window.last_close();

    let rsi = indicators::rsi(window.close, genes.usize(Gene::RsiPeriod))?;
    let oversold = genes[Gene::RsiOversold];
    let overbought = genes[Gene::RsiOverbought];
    let rsi_score = if rsi < oversold && oversold > 0.0 {
        (oversold - rsi) / oversold
    } else if rsi > overbought && overbought < 100.0 {
        -(rsi - overbought) / (100.0 - overbought)
    } else {
        0.0
    };

    let macd = indicators::macd_histogram(
        window.close,
        genes.usize(Gene::MacdFast),
        genes.usize(Gene::MacdSlow),
        genes.usize(Gene::MacdSignal),
    )?;
    let macd_score = if close > 0.0 {
        clip((macd.current - macd.previous) / close * 200.0)
    } else {
        0.0
    };

    let width = bands.width();
    let band_score = if width <= 0.0 {
        0.0
    } else if close < bands.lower {
        clip((bands.lower - close) / width * 4.0)
    } else if close > bands.upper {
        -clip((close - bands.upper) / width * 4.0)
    } else {
        0.0
    };

    Ok(clip((rsi_score + macd_score + band_score) / 3.0 * 2.0))
}

/// Blend of 5-bar, tunable and 20-bar returns
fn momentum_factor(close: &[f64], lookback: usize) -> f64 {
    let short = indicators::pct_return(close, SHORT_MOMENTUM_BARS);
    let medium = indicators::pct_return(close, lookback);
    let long = indicators::pct_return(close, LONG_MOMENTUM_BARS);
    clip((0.3 * short + 0.4 * medium + 0.3 * long) * 10.0)
}

/// Volume surge in the direction of the day's move plus OBV trend
fn volume_factor(window: &SeriesWindow<'_>) -> f64 {
    let n = window.len();
    let recent = &window.volume[n.saturating_sub(VOLUME_AVERAGE_BARS)..];
    let average = recent.iter().sum::<f64>() / recent.len() as f64;
    let ratio = if average > 0.0 {
        window.volume[n - 1] / average
    } else {
        1.0
    };
    let day_direction = sign(window.close[n - 1] - window.close[n - 2]);
    let obv = indicators::obv_direction(window, VOLUME_AVERAGE_BARS);
    clip(0.5 * clip(ratio - 1.0) * day_direction + 0.5 * obv)
}

/// Opening gap plus the balance of up and down closes over the last week
fn sentiment_factor(window: &SeriesWindow<'_>) -> f64 {
    let n = window.len();
    let prev_close = window.close[n - 2];
    let gap = if prev_close > 0.0 {
        (window.open[n - 1] - prev_close) / prev_close
    } else {
        0.0
    };

    let recent = &window.close[n - 6..];
    let balance: f64 = recent.windows(2).map(|p| sign(p[1] - p[0])).sum::<f64>() / 5.0;

    clip(0.5 * clip(gap * 20.0) + 0.5 * balance)
}

/// Breakouts, double tops/bottoms and flags over the trailing window
fn pattern_factor(window: &SeriesWindow<'_>) -> f64 {
    let n = window.len();
    let close = window.last_close();
    let mut score = 0.0;

    let prior_high = window.high[n - 1 - BREAKOUT_BARS..n - 1]
        .iter()
        .copied()
        .fold(f64::MIN, f64::max);
    let prior_low = window.low[n - 1 - BREAKOUT_BARS..n - 1]
        .iter()
        .copied()
        .fold(f64::MAX, f64::min);
    if close > prior_high {
        score += 0.6;
    } else if close < prior_low {
        score -= 0.6;
    }

    // Double bottom / top: the two halves of the last 40 bars reach
    // matching extremes and price has moved away from them.
    let span = &window.close[n - 40..];
    let (first, second) = span.split_at(20);
    let min_a = first.iter().copied().fold(f64::MAX, f64::min);
    let min_b = second.iter().copied().fold(f64::MAX, f64::min);
    let max_a = first.iter().copied().fold(f64::MIN, f64::max);
    let max_b = second.iter().copied().fold(f64::MIN, f64::max);
    if min_a > 0.0 && ((min_a - min_b) / min_a).abs() < 0.02 && close > min_a.max(min_b) * 1.03 {
        score += 0.4;
    }
    if max_a > 0.0 && ((max_a - max_b) / max_a).abs() < 0.02 && close < max_a.min(max_b) * 0.97 {
        score -= 0.4;
    }

    // Flag: a strong pole followed by a tight five-bar consolidation
    let pole = window.close[n - 6] / window.close[n - 16] - 1.0;
    let flag = &window.close[n - 5..];
    let flag_high = flag.iter().copied().fold(f64::MIN, f64::max);
    let flag_low = flag.iter().copied().fold(f64::MAX, f64::min);
    let tight = close > 0.0 && (flag_high - flag_low) / close < 0.03;
    if tight && pole > 0.08 {
        score += 0.3;
    } else if tight && pole < -0.08 {
        score -= 0.3;
    }

    clip(score)
}

/// Price above or below the 10, 20 and 50 bar averages
fn breadth_factor(close: &[f64]) -> EngineResult<f64> {
    let last = close.last().copied().unwrap_or(0.0);
    let mut score = 0.0;
    for period in [10, 20, 50] {
        let average = indicators::sma(close, period)?;
        score += sign(last - average) / 3.0;
    }
    Ok(clip(score))
}

/// Distance below (positive) or above (negative) the middle band, in half-widths
fn mean_reversion_factor(close: f64, bands: &BandLevels) -> f64 {
    let half_width = bands.upper - bands.average;
    if half_width <= 0.0 {
        return 0.0;
    }
    clip(-(close - bands.average) / half_width)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::fixtures::synthetic_bars;
    use crate::dataset::SymbolSeries;
    use crate::genome::Genome;
    use crate::params::{ParameterSpace, WEIGHT_GENES};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn series(days: usize, drift: f64) -> SymbolSeries {
        SymbolSeries::from_bars("TEST", &synthetic_bars(days, 0.4, drift)).unwrap()
    }

    fn genome_with_weight(gene: Gene) -> GeneValues {
        let space = ParameterSpace::default();
        let mut rng = StdRng::seed_from_u64(11);
        let mut genome = Genome::random(1, &space, 0, &mut rng);
        for w in WEIGHT_GENES {
            genome.genes[w] = 0.0;
        }
        genome.genes[gene] = 1.0;
        genome.repair(&space);
        genome.genes
    }

    #[test]
    fn test_short_window_scores_neutral() {
        let s = series(30, 0.0);
        let genes = genome_with_weight(Gene::WeightMomentum);
        let score = score_symbol(&s.window(29, 120), &genes).unwrap();
        assert_eq!(score, SignalScore::default());
    }

    #[test]
    fn test_scores_are_bounded_and_deterministic() {
        let s = series(200, 0.001);
        let space = ParameterSpace::default();
        let mut rng = StdRng::seed_from_u64(5);
        for id in 0..20 {
            let genome = Genome::random(id, &space, 0, &mut rng);
            for day in (60..200).step_by(13) {
                let window = s.window(day, 120);
                let a = score_symbol(&window, &genome.genes).unwrap();
                let b = score_symbol(&window, &genome.genes).unwrap();
                assert_eq!(a, b);
                assert!((-1.0..=1.0).contains(&a.score));
                assert!((0.0..=1.0).contains(&a.confidence));
                for f in a.factors.as_array() {
                    assert!((-1.0..=1.0).contains(&f));
                }
            }
        }
    }

    #[test]
    fn test_single_weight_score_equals_that_factor() {
        let s = series(150, 0.002);
        let genes = genome_with_weight(Gene::WeightBreadth);
        let score = score_symbol(&s.window(149, 120), &genes).unwrap();
        assert!((score.score - score.factors.breadth).abs() < 1e-12);
    }

    #[test]
    fn test_confidence_counts_agreeing_factors() {
        let s = series(150, 0.002);
        let genes = genome_with_weight(Gene::WeightMomentum);
        let score = score_symbol(&s.window(120, 120), &genes).unwrap();
        if score.score != 0.0 {
            let agreeing = score
                .factors
                .as_array()
                .iter()
                .filter(|f| sign(**f) == sign(score.score))
                .count();
            let expected = agreeing as f64 / 8.0 * score.score.abs();
            assert!((score.confidence - expected).abs() < 1e-12);
        }
    }

    #[test]
    fn test_rising_prices_score_positive_breadth_and_momentum() {
        let close: Vec<f64> = (0..80).map(|i| 100.0 * 1.01f64.powi(i)).collect();
        let high: Vec<f64> = close.iter().map(|c| c * 1.005).collect();
        let low: Vec<f64> = close.iter().map(|c| c * 0.995).collect();
        let volume = vec![1_000.0; 80];
        let window = SeriesWindow {
            open: &close,
            high: &high,
            low: &low,
            close: &close,
            volume: &volume,
        };
        assert_eq!(breadth_factor(window.close).unwrap(), 1.0);
        assert!(momentum_factor(window.close, 10) > 0.0);
    }
}

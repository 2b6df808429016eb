//! Bar files and run configuration loading

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Context;
use engine::{Bar, MarketDataset, RunConfig, RunPreset};
use serde_json::Value;

/// Individual settings overridden from the command line
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub generations: Option<u32>,
    pub population: Option<usize>,
    pub islands: Option<usize>,
    pub seed: Option<u64>,
    pub workers: Option<usize>,
    pub top_n: Option<usize>,
    pub max_evaluations: Option<u64>,
}

/// Parse a `{ "SYMBOL": [bar, ...] }` document
pub fn parse_bars(json: &str) -> anyhow::Result<BTreeMap<String, Vec<Bar>>> {
    let mut bars: BTreeMap<String, Vec<Bar>> =
        serde_json::from_str(json).context("Bar file must map symbols to bar arrays")?;
    for series in bars.values_mut() {
        series.sort_by_key(|b| b.date);
    }
    Ok(bars)
}

pub fn load_dataset(path: &Path) -> anyhow::Result<MarketDataset> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read bar file {}", path.display()))?;
    let bars = parse_bars(&raw)?;
    let dataset = MarketDataset::from_bars(&bars)
        .with_context(|| format!("Invalid market data in {}", path.display()))?;
    Ok(dataset)
}

/// Start from the preset, overlay the JSON config file (if any) field by
/// field, then apply command-line overrides and validate.
pub fn build_config(
    preset: RunPreset,
    file: Option<&Path>,
    overrides: &ConfigOverrides,
) -> anyhow::Result<RunConfig> {
    let mut config = RunConfig::preset(preset);

    if let Some(path) = file {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        config = overlay_config(config, &raw)
            .with_context(|| format!("Invalid config file {}", path.display()))?;
    }

    if let Some(v) = overrides.generations {
        config.max_generations = v;
    }
    if let Some(v) = overrides.population {
        config.population_size = v;
    }
    if let Some(v) = overrides.islands {
        config.island_count = v;
    }
    if let Some(v) = overrides.seed {
        config.seed = v;
    }
    if let Some(v) = overrides.workers {
        config.workers = v;
    }
    if let Some(v) = overrides.top_n {
        config.top_n = v;
    }
    if overrides.max_evaluations.is_some() {
        config.max_evaluations = overrides.max_evaluations;
    }

    config.validate().context("Run configuration rejected")?;
    Ok(config)
}

fn overlay_config(base: RunConfig, json: &str) -> anyhow::Result<RunConfig> {
    let overlay: Value = serde_json::from_str(json)?;
    if !overlay.is_object() {
        anyhow::bail!("config must be a JSON object");
    }
    let mut merged = serde_json::to_value(base)?;
    merge_json(&mut merged, overlay);
    Ok(serde_json::from_value(merged)?)
}

/// Recursive object merge; non-object values replace
fn merge_json(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge_json(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_parse_bars_sorts_by_date() {
        let json = r#"{
            "AAA": [
                {"date": "2024-01-03", "open": "11", "high": "12", "low": "10", "close": "11.5", "volume": "900"},
                {"date": "2024-01-02", "open": 10, "high": 11, "low": 9.5, "close": 10.5, "volume": 1000}
            ]
        }"#;
        let bars = parse_bars(json).unwrap();
        let series = &bars["AAA"];
        assert_eq!(series.len(), 2);
        assert_eq!(series[0].close, dec!(10.5));
        assert_eq!(series[1].close, dec!(11.5));
    }

    #[test]
    fn test_parse_bars_rejects_wrong_shape() {
        assert!(parse_bars(r#"[1, 2, 3]"#).is_err());
    }

    #[test]
    fn test_overlay_keeps_preset_fields() {
        let base = RunConfig::preset(RunPreset::Quick);
        let merged = overlay_config(
            base,
            r#"{ "seed": 99, "fitness": { "min_trades": 12 }, "simulation": { "initial_capital": 50000.0 } }"#,
        )
        .unwrap();

        assert_eq!(merged.seed, 99);
        assert_eq!(merged.fitness.min_trades, 12);
        // Untouched nested fields come from the preset, not the defaults
        assert_eq!(merged.fitness.drawdown_cap, 0.35);
        assert_eq!(merged.population_size, 60);
        assert_eq!(merged.simulation.initial_capital, 50_000.0);
    }

    #[test]
    fn test_overrides_applied_and_validated() {
        let overrides = ConfigOverrides {
            generations: Some(7),
            seed: Some(5),
            ..ConfigOverrides::default()
        };
        let config = build_config(RunPreset::Standard, None, &overrides).unwrap();
        assert_eq!(config.max_generations, 7);
        assert_eq!(config.seed, 5);

        let broken = ConfigOverrides {
            population: Some(3),
            ..ConfigOverrides::default()
        };
        assert!(build_config(RunPreset::Standard, None, &broken).is_err());
    }
}

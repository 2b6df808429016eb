//! Adaptive mutation rate and convergence detection

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::metrics::{mean, sample_std};

/// Generations compared for the short-term improvement signal
const IMPROVEMENT_WINDOW: usize = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptiveConfig {
    /// Relative improvement below which the search counts as stagnating
    pub stagnation_threshold: f64,
    /// Relative improvement above which the search counts as productive
    pub high_improvement_threshold: f64,
    pub raise_factor: f64,
    pub lower_factor: f64,
    /// Rate never exceeds `ceiling_multiplier * base`
    pub ceiling_multiplier: f64,
    /// Rate never drops below `floor_multiplier * base`
    pub floor_multiplier: f64,
    /// Generations in the long convergence window
    pub convergence_window: usize,
    /// Coefficient of variation under which the long window counts as converged
    pub convergence_cv: f64,
    /// Consecutive converged generations required to stop early
    pub convergence_patience: u32,
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self {
            stagnation_threshold: 0.01,
            high_improvement_threshold: 0.10,
            raise_factor: 1.5,
            lower_factor: 0.75,
            ceiling_multiplier: 2.5,
            floor_multiplier: 0.5,
            convergence_window: 30,
            convergence_cv: 0.001,
            convergence_patience: 5,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AdaptiveMutationController {
    config: AdaptiveConfig,
    base_rate: f64,
    current_rate: f64,
    history: VecDeque<f64>,
    converged_streak: u32,
}

impl AdaptiveMutationController {
    pub fn new(base_rate: f64, config: AdaptiveConfig) -> Self {
        Self {
            config,
            base_rate,
            current_rate: base_rate,
            history: VecDeque::new(),
            converged_streak: 0,
        }
    }

    pub fn rate(&self) -> f64 {
        self.current_rate
    }

    pub fn base_rate(&self) -> f64 {
        self.base_rate
    }

    /// Record one generation's average fitness and return the rate for the
    /// next generation.
    pub fn record(&mut self, average_fitness: f64) -> f64 {
        if !average_fitness.is_finite() {
            return self.current_rate;
        }
        let capacity = self.config.convergence_window.max(IMPROVEMENT_WINDOW);
        if self.history.len() == capacity {
            self.history.pop_front();
        }
        self.history.push_back(average_fitness);

        if let Some(improvement) = self.recent_improvement() {
            let ceiling = self.base_rate * self.config.ceiling_multiplier;
            let floor = self.base_rate * self.config.floor_multiplier;
            self.current_rate = if improvement.abs() < self.config.stagnation_threshold {
                (self.current_rate * self.config.raise_factor).min(ceiling)
            } else if improvement > self.config.high_improvement_threshold {
                (self.current_rate * self.config.lower_factor).max(floor)
            } else {
                self.base_rate
            };
        }

        if self.long_window_converged() {
            self.converged_streak += 1;
        } else {
            self.converged_streak = 0;
        }
        self.current_rate
    }

    /// Relative change between the oldest and newest of the last 10 entries
    pub fn recent_improvement(&self) -> Option<f64> {
        if self.history.len() < IMPROVEMENT_WINDOW {
            return None;
        }
        let oldest = self.history[self.history.len() - IMPROVEMENT_WINDOW];
        let newest = self.history[self.history.len() - 1];
        Some(if oldest.abs() > 1e-9 {
            (newest - oldest) / oldest.abs()
        } else {
            newest - oldest
        })
    }

    fn long_window_converged(&self) -> bool {
        let window = self.config.convergence_window;
        if window == 0 || self.history.len() < window {
            return false;
        }
        let recent: Vec<f64> = self.history.iter().skip(self.history.len() - window).copied().collect();
        let m = mean(&recent);
        let std = sample_std(&recent);
        if m.abs() < 1e-12 {
            std < self.config.convergence_cv
        } else {
            std / m.abs() < self.config.convergence_cv
        }
    }

    /// True once the long window has been stable for `convergence_patience`
    /// consecutive generations
    pub fn is_converged(&self) -> bool {
        self.converged_streak >= self.config.convergence_patience.max(1)
    }
}

// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/tourguard

//! Descriptive statistics over movement series

use serde::{Deserialize, Serialize};
use statrs::statistics::{Data, OrderStatistics, Statistics};

/// Statistical summary
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatisticalSummary {
    pub count: usize,
    pub mean: f64,
    pub variance: f64,
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
}

/// Statistical analyzer
#[derive(Debug, Clone, Default)]
pub struct StatisticalAnalyzer;

impl StatisticalAnalyzer {
    pub fn new() -> Self {
        Self
    }

    /// Population statistics. Empty input yields an all-zero summary.
    pub fn summarize(&self, data: &[f64]) -> StatisticalSummary {
        if data.is_empty() {
            return StatisticalSummary::default();
        }

        let variance = population_variance(data);

        StatisticalSummary {
            count: data.len(),
            mean: mean(data),
            variance,
            std_dev: variance.sqrt(),
            min: data.iter().cloned().fold(f64::INFINITY, f64::min),
            max: data.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
        }
    }

    /// Fraction of samples whose |z| exceeds `threshold`.
    pub fn outlier_fraction(&self, data: &[f64], threshold: f64) -> f64 {
        let summary = self.summarize(data);
        if summary.count < 2 || summary.std_dev < 1e-10 {
            return 0.0;
        }

        let outliers = data
            .iter()
            .filter(|&&x| ((x - summary.mean) / summary.std_dev).abs() > threshold)
            .count();

        outliers as f64 / summary.count as f64
    }
}

/// Arithmetic mean, 0 for empty input.
pub fn mean(data: &[f64]) -> f64 {
    if data.is_empty() {
        0.0
    } else {
        data.iter().mean()
    }
}

/// Population variance, 0 with fewer than two samples.
pub fn population_variance(data: &[f64]) -> f64 {
    if data.len() < 2 {
        0.0
    } else {
        data.iter().population_variance()
    }
}

/// Quantile `tau` in `[0, 1]`, 0 for empty input.
pub fn quantile(data: &[f64], tau: f64) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    let mut sorted = Data::new(data.to_vec());
    sorted.quantile(tau.clamp(0.0, 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_population_variance() {
        let data = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert!((population_variance(&data) - 4.0).abs() < 1e-12);
        assert!((mean(&data) - 5.0).abs() < 1e-12);
        assert_eq!(population_variance(&[3.0]), 0.0);
        assert_eq!(mean(&[]), 0.0);
    }

    #[test]
    fn test_summarize() {
        let summary = StatisticalAnalyzer::new().summarize(&[1.0, 3.0, 5.0]);
        assert_eq!(summary.count, 3);
        assert_eq!(summary.min, 1.0);
        assert_eq!(summary.max, 5.0);
        assert!((summary.mean - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_outlier_fraction() {
        let mut data = vec![1.0; 19];
        data.push(50.0);
        let fraction = StatisticalAnalyzer::new().outlier_fraction(&data, 2.0);
        assert!((fraction - 0.05).abs() < 1e-12);
        assert_eq!(StatisticalAnalyzer::new().outlier_fraction(&[4.0; 10], 2.0), 0.0);
    }

    #[test]
    fn test_quantile_bounds() {
        let data: Vec<f64> = (1..=100).map(|x| x as f64).collect();
        assert_eq!(quantile(&data, 0.0), 1.0);
        assert_eq!(quantile(&data, 1.0), 100.0);
        let q = quantile(&data, 0.1);
        assert!(q > 9.0 && q < 12.0);
    }
}

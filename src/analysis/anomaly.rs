// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/tourguard

//! Anomaly scoring - standard scaler plus a seeded isolation forest

use ndarray::{Array1, Array2, ArrayView1, Axis};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::features::{FeatureVector, FEATURE_COUNT};
use super::statistics::quantile;
use crate::config::AnomalyConfig;
use crate::error::{Result, SafetyError};

/// Confidence with a fitted model and a real observation
pub const CONFIDENCE_MODEL: f64 = 0.85;

/// Confidence without a model or without enough history
pub const CONFIDENCE_NO_MODEL: f64 = 0.3;

/// Confidence after a caught fault or timeout
pub const CONFIDENCE_FAULT: f64 = 0.1;

const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

/// Average path length of an unsuccessful BST search over `n` items
pub fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

/// Per-column standardisation fitted on training data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    mean: Array1<f64>,
    scale: Array1<f64>,
}

impl StandardScaler {
    /// Population statistics; zero-variance columns keep scale 1.
    pub fn fit(x: &Array2<f64>) -> Result<Self> {
        let mean = x
            .mean_axis(Axis(0))
            .ok_or_else(|| SafetyError::Computation("cannot fit scaler on empty matrix".into()))?;
        let scale = x
            .std_axis(Axis(0), 0.0)
            .mapv(|s| if s.is_finite() && s > 1e-12 { s } else { 1.0 });

        Ok(Self { mean, scale })
    }

    pub fn transform(&self, x: &Array2<f64>) -> Array2<f64> {
        (x - &self.mean) / &self.scale
    }

    pub fn transform_row(&self, row: ArrayView1<f64>) -> Array1<f64> {
        (&row - &self.mean) / &self.scale
    }

    pub fn n_features(&self) -> usize {
        self.mean.len()
    }
}

/// Isolation tree node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum IsolationTree {
    Internal {
        feature: usize,
        threshold: f64,
        left: Box<IsolationTree>,
        right: Box<IsolationTree>,
    },
    External {
        size: usize,
    },
}

impl IsolationTree {
    fn build(
        x: &Array2<f64>,
        indices: &[usize],
        height: usize,
        max_height: usize,
        rng: &mut ChaCha8Rng,
    ) -> Self {
        let n_samples = indices.len();
        if height >= max_height || n_samples <= 1 {
            return IsolationTree::External { size: n_samples };
        }

        // Only columns that still vary inside this node can split it
        let ranges: Vec<(usize, f64, f64)> = (0..x.ncols())
            .filter_map(|feature| {
                let (lo, hi) = indices.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &i| {
                    let v = x[[i, feature]];
                    (lo.min(v), hi.max(v))
                });
                (hi - lo > 1e-10).then_some((feature, lo, hi))
            })
            .collect();

        let Some(&(feature, lo, hi)) = ranges.choose(rng) else {
            return IsolationTree::External { size: n_samples };
        };

        let threshold = rng.gen_range(lo..hi);
        let (left, right): (Vec<usize>, Vec<usize>) =
            indices.iter().partition(|&&i| x[[i, feature]] < threshold);

        if left.is_empty() || right.is_empty() {
            return IsolationTree::External { size: n_samples };
        }

        IsolationTree::Internal {
            feature,
            threshold,
            left: Box::new(Self::build(x, &left, height + 1, max_height, rng)),
            right: Box::new(Self::build(x, &right, height + 1, max_height, rng)),
        }
    }

    fn path_length(&self, sample: ArrayView1<f64>, height: usize) -> f64 {
        match self {
            IsolationTree::External { size } => height as f64 + average_path_length(*size),
            IsolationTree::Internal { feature, threshold, left, right } => {
                if sample[*feature] < *threshold {
                    left.path_length(sample, height + 1)
                } else {
                    right.path_length(sample, height + 1)
                }
            }
        }
    }
}

/// Isolation forest over standardised feature rows
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsolationForest {
    trees: Vec<IsolationTree>,
    sample_size: usize,
    offset: f64,
    n_features: usize,
}

impl IsolationForest {
    /// Fit on an already-scaled matrix. One ChaCha stream per tree keeps the
    /// result reproducible regardless of thread scheduling.
    pub fn fit(x: &Array2<f64>, config: &AnomalyConfig) -> Result<Self> {
        let n = x.nrows();
        if n < 2 {
            return Err(SafetyError::Computation(format!("isolation forest needs at least 2 rows, got {}", n)));
        }

        let sample_size = config.max_samples.max(2).min(n);
        let max_height = (sample_size as f64).log2().ceil() as usize;
        let seed = config.seed;

        let trees: Vec<IsolationTree> = (0..config.n_estimators.max(1))
            .into_par_iter()
            .map(|i| {
                let mut rng = ChaCha8Rng::seed_from_u64(seed.wrapping_add(i as u64));
                let indices = rand::seq::index::sample(&mut rng, n, sample_size).into_vec();
                IsolationTree::build(x, &indices, 0, max_height, &mut rng)
            })
            .collect();

        let mut forest = Self {
            trees,
            sample_size,
            offset: 0.0,
            n_features: x.ncols(),
        };

        let training_scores = forest.score_samples(x);
        forest.offset = quantile(training_scores.as_slice().unwrap_or(&[]), config.contamination);
        if !forest.offset.is_finite() {
            return Err(SafetyError::Computation("non-finite isolation forest offset".into()));
        }

        Ok(forest)
    }

    /// Negated anomaly score, `-2^(-E[h]/c(psi))`; lower is more abnormal.
    pub fn score_row(&self, row: ArrayView1<f64>) -> f64 {
        let mean_depth = self
            .trees
            .iter()
            .map(|tree| tree.path_length(row, 0))
            .sum::<f64>()
            / self.trees.len() as f64;

        let c = average_path_length(self.sample_size);
        if c <= 0.0 {
            return -0.5;
        }
        -(2.0_f64.powf(-mean_depth / c))
    }

    pub fn score_samples(&self, x: &Array2<f64>) -> Array1<f64> {
        let scores: Vec<f64> = (0..x.nrows())
            .into_par_iter()
            .map(|i| self.score_row(x.row(i)))
            .collect();
        Array1::from(scores)
    }

    /// Positive for inliers, negative for outliers.
    pub fn decision_row(&self, row: ArrayView1<f64>) -> f64 {
        self.score_row(row) - self.offset
    }

    pub fn offset(&self) -> f64 {
        self.offset
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }
}

/// Fitted scaler and forest, swapped wholesale on retrain
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsolationModel {
    pub scaler: StandardScaler,
    pub forest: IsolationForest,
}

impl IsolationModel {
    /// Fit from feature vectors. Rejects undersized, non-finite or
    /// insufficient-data input.
    pub fn fit(vectors: &[FeatureVector], config: &AnomalyConfig, min_rows: usize) -> Result<Self> {
        if vectors.iter().any(|v| !v.is_finite()) {
            return Err(SafetyError::Computation("training matrix contains non-finite values".into()));
        }
        let usable: Vec<&FeatureVector> = vectors.iter().filter(|v| !v.is_degenerate()).collect();
        if usable.len() < min_rows.max(2) {
            return Err(SafetyError::Computation(format!(
                "{} usable training rows, need {}",
                usable.len(),
                min_rows
            )));
        }

        let flat: Vec<f64> = usable.iter().flat_map(|v| v.values().iter().copied()).collect();
        let x = Array2::from_shape_vec((usable.len(), FEATURE_COUNT), flat)
            .map_err(|e| SafetyError::Computation(e.to_string()))?;

        Self::fit_matrix(&x, config)
    }

    pub fn fit_matrix(x: &Array2<f64>, config: &AnomalyConfig) -> Result<Self> {
        if x.ncols() != FEATURE_COUNT {
            return Err(SafetyError::Computation(format!(
                "expected {} feature columns, got {}",
                FEATURE_COUNT,
                x.ncols()
            )));
        }
        if x.iter().any(|v| !v.is_finite()) {
            return Err(SafetyError::Computation("training matrix contains non-finite values".into()));
        }

        let scaler = StandardScaler::fit(x)?;
        let forest = IsolationForest::fit(&scaler.transform(x), config)?;

        debug!(
            "Fitted isolation forest: {} trees, {} rows, offset {:.4}",
            forest.n_trees(),
            x.nrows(),
            forest.offset()
        );

        Ok(Self { scaler, forest })
    }

    /// Raw decision value for one vector, scaled with the fitted scaler.
    pub fn decision(&self, features: &FeatureVector) -> Result<f64> {
        if self.scaler.n_features() != FEATURE_COUNT || self.forest.n_features() != FEATURE_COUNT {
            return Err(SafetyError::Computation("model feature width mismatch".into()));
        }
        let row = Array1::from(features.values().to_vec());
        let scaled = self.scaler.transform_row(row.view());
        let decision = self.forest.decision_row(scaled.view());
        if decision.is_finite() {
            Ok(decision)
        } else {
            Err(SafetyError::Computation("non-finite decision value".into()))
        }
    }
}

/// Anomaly scorer output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyAssessment {
    pub anomaly_score: f64,
    pub is_anomaly: bool,
    pub confidence: f64,
    pub raw_score: Option<f64>,
}

impl AnomalyAssessment {
    pub fn fallback(confidence: f64) -> Self {
        Self {
            anomaly_score: 0.0,
            is_anomaly: false,
            confidence,
            raw_score: None,
        }
    }
}

/// Maps model output onto the `[0, 1]` contract; never fails.
#[derive(Debug, Clone, Default)]
pub struct AnomalyScorer;

impl AnomalyScorer {
    pub fn new() -> Self {
        Self
    }

    pub fn score(&self, model: Option<&IsolationModel>, features: &FeatureVector) -> AnomalyAssessment {
        let Some(model) = model else {
            return AnomalyAssessment::fallback(CONFIDENCE_NO_MODEL);
        };
        if features.is_degenerate() {
            return AnomalyAssessment::fallback(CONFIDENCE_NO_MODEL);
        }
        if !features.is_finite() {
            warn!("Non-finite feature vector, anomaly scoring skipped");
            return AnomalyAssessment::fallback(CONFIDENCE_FAULT);
        }

        match model.decision(features) {
            Ok(raw) => AnomalyAssessment {
                anomaly_score: (0.5 - raw).clamp(0.0, 1.0),
                is_anomaly: raw < 0.0,
                confidence: CONFIDENCE_MODEL,
                raw_score: Some(raw),
            },
            Err(e) => {
                warn!("Anomaly scoring fault: {}", e);
                AnomalyAssessment::fallback(CONFIDENCE_FAULT)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CENTER: [f64; FEATURE_COUNT] = [4.0, 5.0, 0.1, 0.5, 6.0, 0.2, 0.3, 0.95];
    const SPREAD: [f64; FEATURE_COUNT] = [1.0, 5.0, 0.1, 0.5, 1.0, 0.1, 0.1, 0.05];

    fn walking_vectors(n: usize) -> Vec<FeatureVector> {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        (0..n)
            .map(|_| {
                let mut values = CENTER;
                for (v, spread) in values.iter_mut().zip(SPREAD) {
                    *v += rng.gen_range(-1.0..1.0) * spread;
                }
                FeatureVector::new(values)
            })
            .collect()
    }

    #[test]
    fn test_average_path_length() {
        assert_eq!(average_path_length(0), 0.0);
        assert_eq!(average_path_length(1), 0.0);
        assert_eq!(average_path_length(2), 1.0);
        // sklearn reference value for n = 256
        assert!((average_path_length(256) - 10.2448).abs() < 1e-3);
    }

    #[test]
    fn test_scaler_zero_variance_column() {
        let x = Array2::from_shape_vec((3, 2), vec![1.0, 5.0, 2.0, 5.0, 3.0, 5.0]).unwrap();
        let scaler = StandardScaler::fit(&x).unwrap();
        let scaled = scaler.transform(&x);
        assert!(scaled.column(1).iter().all(|&v| v == 0.0));
        assert!((scaled[[0, 0]] + 1.224_744_871).abs() < 1e-6);
    }

    #[test]
    fn test_forest_flags_outlier() {
        let model = IsolationModel::fit(&walking_vectors(200), &AnomalyConfig::default(), 25).unwrap();
        let scorer = AnomalyScorer::new();

        let normal = scorer.score(Some(&model), &FeatureVector::new(CENTER));
        let odd = FeatureVector::new([120.0, 80.0, 1.0, 400.0, 1.0, 0.9, 0.8, 0.0]);
        let outlier = scorer.score(Some(&model), &odd);

        assert!(outlier.is_anomaly);
        assert!(outlier.anomaly_score > normal.anomaly_score);
        assert_eq!(outlier.confidence, CONFIDENCE_MODEL);
        assert!((0.0..=1.0).contains(&normal.anomaly_score));
    }

    #[test]
    fn test_fit_is_reproducible() {
        let config = AnomalyConfig::default();
        let a = IsolationModel::fit(&walking_vectors(60), &config, 25).unwrap();
        let b = IsolationModel::fit(&walking_vectors(60), &config, 25).unwrap();
        let probe = FeatureVector::new([9.0, 10.0, 0.4, 3.0, 4.0, 0.3, 0.8, 0.7]);
        assert_eq!(a.decision(&probe).unwrap(), b.decision(&probe).unwrap());
    }

    #[test]
    fn test_identical_rows_score_neutral() {
        let rows = vec![FeatureVector::new([3.0, 0.0, 0.0, 0.0, 5.0, 0.1, 0.2, 1.0]); 30];
        let model = IsolationModel::fit(&rows, &AnomalyConfig::default(), 25).unwrap();
        let result = AnomalyScorer::new().score(Some(&model), &rows[0]);
        assert!((result.anomaly_score - 0.5).abs() < 1e-9);
        assert!(!result.is_anomaly);
    }

    #[test]
    fn test_fit_rejects_bad_input() {
        let config = AnomalyConfig::default();
        assert!(IsolationModel::fit(&walking_vectors(24), &config, 25).is_err());

        let mut rows = walking_vectors(30);
        rows[3] = FeatureVector::new([f64::NAN, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
        assert!(IsolationModel::fit(&rows, &config, 25).is_err());

        let degenerate = vec![FeatureVector::insufficient(); 40];
        assert!(IsolationModel::fit(&degenerate, &config, 25).is_err());

        let narrow = Array2::<f64>::zeros((30, 3));
        assert!(IsolationModel::fit_matrix(&narrow, &config).is_err());
    }

    #[test]
    fn test_fallbacks() {
        let scorer = AnomalyScorer::new();
        let result = scorer.score(None, &walking_vectors(1)[0]);
        assert_eq!(result, AnomalyAssessment::fallback(CONFIDENCE_NO_MODEL));

        let model = IsolationModel::fit(&walking_vectors(40), &AnomalyConfig::default(), 25).unwrap();
        let result = scorer.score(Some(&model), &FeatureVector::insufficient());
        assert_eq!(result.anomaly_score, 0.0);
        assert!(!result.is_anomaly);
        assert!(result.confidence <= 0.3);

        let bad = FeatureVector::new([f64::INFINITY, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 1.0]);
        assert_eq!(scorer.score(Some(&model), &bad).confidence, CONFIDENCE_FAULT);
    }

    #[test]
    fn test_model_survives_bincode() {
        let model = IsolationModel::fit(&walking_vectors(40), &AnomalyConfig::default(), 25).unwrap();
        let bytes = bincode::serialize(&model).unwrap();
        let restored: IsolationModel = bincode::deserialize(&bytes).unwrap();
        let probe = walking_vectors(2)[1];
        assert_eq!(model.decision(&probe).unwrap(), restored.decision(&probe).unwrap());
    }
}

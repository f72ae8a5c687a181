//! Melody/non-melody track classifier.
//!
//! Segmentation only needs "probability that this feature vector is the
//! melody", so the classifier is a trait handed to the segmenter. The
//! shipped implementation is a standardised logistic regression read from a
//! JSON artifact:
//!
//! ```json
//! {
//!   "scaler": { "mean": [18 values], "scale": [18 values] },
//!   "coefficients": [18 values],
//!   "intercept": -1.5
//! }
//! ```
//!
//! `scaler` is optional; without it the raw features are used.

use crate::ErrorClass;
use crate::features::{FEATURE_DIM, FeatureVector};
use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid model file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Model field `{field}` has {actual} values, expected {expected}")]
    Shape {
        field: &'static str,
        actual: usize,
        expected: usize,
    },
    #[error("Model parameter `{field}[{index}]` is not usable ({value})")]
    BadParameter {
        field: &'static str,
        index: usize,
        value: f64,
    },
    #[error("Classifier produced a non-finite score")]
    NonFinite,
}

impl ClassifierError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Io(_) | Self::Parse(_) | Self::Shape { .. } | Self::BadParameter { .. } => ErrorClass::Input,
            Self::NonFinite => ErrorClass::DegenerateSignal,
        }
    }
}

/// Scores a track's feature vector as melody.
pub trait MelodyClassifier: Send + Sync {
    /// Probability in `[0, 1]` that the track carries the melody.
    fn predict_melody_probability(&self, features: &FeatureVector) -> Result<f64, ClassifierError>;

    /// Score every row of a feature matrix, preserving row order.
    fn predict_matrix(&self, rows: &[FeatureVector]) -> Result<Vec<f64>, ClassifierError> {
        rows.iter().map(|r| self.predict_melody_probability(r)).collect()
    }
}

/// Per-feature standardisation applied before the linear model.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Scaler {
    pub mean: Vec<f64>,
    pub scale: Vec<f64>,
}

/// Binary logistic regression over the 18 track features.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LogisticClassifier {
    #[serde(default)]
    pub scaler: Option<Scaler>,
    pub coefficients: Vec<f64>,
    pub intercept: f64,
}

impl LogisticClassifier {
    /// Load and validate a model artifact.
    pub fn load(path: &Path) -> Result<Self, ClassifierError> {
        let contents = std::fs::read_to_string(path)?;
        let model = Self::from_json(&contents)?;
        log::info!("Loaded melody classifier from {}", path.display());
        Ok(model)
    }

    pub fn from_json(json: &str) -> Result<Self, ClassifierError> {
        let model: Self = serde_json::from_str(json)?;
        model.validate()?;
        Ok(model)
    }

    fn validate(&self) -> Result<(), ClassifierError> {
        check_len("coefficients", &self.coefficients)?;
        check_finite("coefficients", &self.coefficients)?;
        if !self.intercept.is_finite() {
            return Err(ClassifierError::BadParameter {
                field: "intercept",
                index: 0,
                value: self.intercept,
            });
        }
        if let Some(scaler) = &self.scaler {
            check_len("scaler.mean", &scaler.mean)?;
            check_len("scaler.scale", &scaler.scale)?;
            check_finite("scaler.mean", &scaler.mean)?;
            if let Some((index, &value)) = scaler
                .scale
                .iter()
                .enumerate()
                .find(|&(_, &s)| !s.is_finite() || s == 0.0)
            {
                return Err(ClassifierError::BadParameter {
                    field: "scaler.scale",
                    index,
                    value,
                });
            }
        }
        Ok(())
    }

    /// Linear decision value before the logistic link.
    pub fn decision(&self, features: &FeatureVector) -> f64 {
        let x = features.to_array();
        let mut z = self.intercept;
        for (d, &coef) in self.coefficients.iter().enumerate() {
            let v = match &self.scaler {
                Some(s) => (x[d] - s.mean[d]) / s.scale[d],
                None => x[d],
            };
            z += coef * v;
        }
        z
    }
}

impl MelodyClassifier for LogisticClassifier {
    fn predict_melody_probability(&self, features: &FeatureVector) -> Result<f64, ClassifierError> {
        let z = self.decision(features);
        if !z.is_finite() {
            return Err(ClassifierError::NonFinite);
        }
        Ok(sigmoid(z))
    }
}

fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

fn check_len(field: &'static str, values: &[f64]) -> Result<(), ClassifierError> {
    if values.len() != FEATURE_DIM {
        return Err(ClassifierError::Shape {
            field,
            actual: values.len(),
            expected: FEATURE_DIM,
        });
    }
    Ok(())
}

fn check_finite(field: &'static str, values: &[f64]) -> Result<(), ClassifierError> {
    match values.iter().position(|v| !v.is_finite()) {
        Some(index) => Err(ClassifierError::BadParameter {
            field,
            index,
            value: values[index],
        }),
        None => Ok(()),
    }
}

//! Fitted feature scalers applied before classification.

use ndarray::{Array1, ArrayView1};
use serde::Deserialize;

use crate::error::{IdsError, Result};
use crate::features::Schema;

pub trait Transform: Send + Sync {
    /// Input width the transform was fitted on.
    fn n_features(&self) -> usize;

    fn transform(&self, input: &[f64]) -> Result<Vec<f64>>;
}

fn check_width(expected: usize, input: &[f64]) -> Result<()> {
    if input.len() != expected {
        return Err(IdsError::TransformError(format!(
            "expected {} features, got {}",
            expected,
            input.len()
        )));
    }
    Ok(())
}

/// `(x - mean) / scale`, per column.
#[derive(Debug, Clone)]
pub struct StandardScaler {
    mean: Array1<f64>,
    scale: Array1<f64>,
}

impl StandardScaler {
    pub fn new(mean: Vec<f64>, scale: Vec<f64>) -> Result<Self> {
        check_params("mean", &mean, "scale", &scale)?;
        // Constant columns are fitted with a zero scale; they pass through centred.
        let scale = scale
            .into_iter()
            .map(|s| if s == 0.0 { 1.0 } else { s })
            .collect::<Vec<_>>();
        Ok(StandardScaler {
            mean: Array1::from(mean),
            scale: Array1::from(scale),
        })
    }
}

impl Transform for StandardScaler {
    fn n_features(&self) -> usize {
        self.mean.len()
    }

    fn transform(&self, input: &[f64]) -> Result<Vec<f64>> {
        check_width(self.n_features(), input)?;
        let x = ArrayView1::from(input);
        Ok(((&x - &self.mean) / &self.scale).to_vec())
    }
}

/// `x * scale + min`, per column.
#[derive(Debug, Clone)]
pub struct MinMaxScaler {
    min: Array1<f64>,
    scale: Array1<f64>,
}

impl MinMaxScaler {
    pub fn new(min: Vec<f64>, scale: Vec<f64>) -> Result<Self> {
        check_params("min", &min, "scale", &scale)?;
        Ok(MinMaxScaler {
            min: Array1::from(min),
            scale: Array1::from(scale),
        })
    }
}

impl Transform for MinMaxScaler {
    fn n_features(&self) -> usize {
        self.min.len()
    }

    fn transform(&self, input: &[f64]) -> Result<Vec<f64>> {
        check_width(self.n_features(), input)?;
        let x = ArrayView1::from(input);
        Ok((&x * &self.scale + &self.min).to_vec())
    }
}

fn check_params(a_name: &str, a: &[f64], b_name: &str, b: &[f64]) -> Result<()> {
    if a.is_empty() || a.len() != b.len() {
        return Err(IdsError::ModelLoadError(format!(
            "scaler has {} {} values and {} {} values",
            a.len(),
            a_name,
            b.len(),
            b_name
        )));
    }
    if a.iter().chain(b.iter()).any(|v| !v.is_finite()) {
        return Err(IdsError::ModelLoadError(
            "scaler parameters must be finite".to_string(),
        ));
    }
    Ok(())
}

/// On-disk form of `preprocessor.json`.
#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PreprocessorFile {
    StandardScaler {
        feature_names: Vec<String>,
        mean: Vec<f64>,
        scale: Vec<f64>,
    },
    MinMaxScaler {
        feature_names: Vec<String>,
        min: Vec<f64>,
        scale: Vec<f64>,
    },
}

impl PreprocessorFile {
    /// Builds the transform together with the feature schema it was fitted on.
    pub fn build(self) -> Result<(Schema, Box<dyn Transform>)> {
        let (names, transform) = match self {
            PreprocessorFile::StandardScaler { feature_names, mean, scale } => (
                feature_names,
                Box::new(StandardScaler::new(mean, scale)?) as Box<dyn Transform>,
            ),
            PreprocessorFile::MinMaxScaler { feature_names, min, scale } => (
                feature_names,
                Box::new(MinMaxScaler::new(min, scale)?) as Box<dyn Transform>,
            ),
        };

        let schema = Schema::new(names).map_err(|e| IdsError::ModelLoadError(e.to_string()))?;
        if schema.len() != transform.n_features() {
            return Err(IdsError::ModelLoadError(format!(
                "preprocessor names {} features but was fitted on {}",
                schema.len(),
                transform.n_features()
            )));
        }
        Ok((schema, transform))
    }
}

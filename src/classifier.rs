use std::collections::BTreeMap;
use std::fmt;

use ndarray::{Array2, ArrayView1};
use serde::Deserialize;

use crate::error::{IdsError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Label {
    Benign,
    Malicious,
}

impl Label {
    /// Class 0 is bona fide traffic; every other class is an attack.
    pub fn from_class(class: i64) -> Self {
        if class == 0 {
            Label::Benign
        } else {
            Label::Malicious
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Label::Benign => write!(f, "benign"),
            Label::Malicious => write!(f, "malicious"),
        }
    }
}

pub trait Classifier: Send + Sync {
    fn n_features(&self) -> usize;

    fn classify(&self, input: &[f64]) -> Result<Label>;
}

fn check_width(expected: usize, input: &[f64]) -> Result<()> {
    if input.len() != expected {
        return Err(IdsError::TransformError(format!(
            "classifier expects {} features, got {}",
            expected,
            input.len()
        )));
    }
    Ok(())
}

/// Majority vote of the `k` closest fitted samples (Euclidean distance).
#[derive(Debug, Clone)]
pub struct KNearest {
    k: usize,
    samples: Array2<f64>,
    classes: Vec<i64>,
}

impl KNearest {
    pub fn new(k: usize, samples: Vec<Vec<f64>>, classes: Vec<i64>) -> Result<Self> {
        if k == 0 {
            return Err(IdsError::ModelLoadError("k must be at least 1".to_string()));
        }
        if samples.is_empty() || samples.len() != classes.len() {
            return Err(IdsError::ModelLoadError(format!(
                "{} samples with {} classes",
                samples.len(),
                classes.len()
            )));
        }

        let width = samples[0].len();
        if width == 0 || samples.iter().any(|row| row.len() != width) {
            return Err(IdsError::ModelLoadError(
                "samples must share one non-zero width".to_string(),
            ));
        }

        let rows = samples.len();
        let flat: Vec<f64> = samples.into_iter().flatten().collect();
        let samples = Array2::from_shape_vec((rows, width), flat)
            .map_err(|e| IdsError::ModelLoadError(e.to_string()))?;

        Ok(KNearest { k, samples, classes })
    }
}

impl Classifier for KNearest {
    fn n_features(&self) -> usize {
        self.samples.ncols()
    }

    fn classify(&self, input: &[f64]) -> Result<Label> {
        check_width(self.n_features(), input)?;
        let x = ArrayView1::from(input);

        let mut distances: Vec<(f64, usize)> = self
            .samples
            .rows()
            .into_iter()
            .enumerate()
            .map(|(i, row)| ((&row - &x).mapv(|d| d * d).sum(), i))
            .collect();
        // Equal distances keep fitted sample order.
        distances.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));

        let mut votes: BTreeMap<i64, usize> = BTreeMap::new();
        for &(_, i) in distances.iter().take(self.k) {
            *votes.entry(self.classes[i]).or_insert(0) += 1;
        }

        // Ascending class order, so a tied vote goes to the lowest class.
        let mut winner = (0i64, 0usize);
        for (&class, &count) in &votes {
            if count > winner.1 {
                winner = (class, count);
            }
        }
        Ok(Label::from_class(winner.0))
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum TreeNode {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        class: i64,
    },
}

/// Binary tree stored as a flat node array, root first.
#[derive(Debug, Clone)]
pub struct DecisionTree {
    n_features: usize,
    nodes: Vec<TreeNode>,
}

impl DecisionTree {
    pub fn new(n_features: usize, nodes: Vec<TreeNode>) -> Result<Self> {
        if n_features == 0 || nodes.is_empty() {
            return Err(IdsError::ModelLoadError(
                "decision tree needs features and at least one node".to_string(),
            ));
        }

        // Children must come after their parent; that rules out cycles, so
        // every walk from the root ends on a leaf.
        for (i, node) in nodes.iter().enumerate() {
            if let TreeNode::Split { feature, left, right, threshold } = node {
                if *feature >= n_features {
                    return Err(IdsError::ModelLoadError(format!(
                        "node {} splits on feature {} of {}",
                        i, feature, n_features
                    )));
                }
                if *left <= i || *right <= i || *left >= nodes.len() || *right >= nodes.len() {
                    return Err(IdsError::ModelLoadError(format!(
                        "node {} has bad children {} / {}",
                        i, left, right
                    )));
                }
                if threshold.is_nan() {
                    return Err(IdsError::ModelLoadError(format!("node {} has a NaN threshold", i)));
                }
            }
        }

        Ok(DecisionTree { n_features, nodes })
    }
}

impl Classifier for DecisionTree {
    fn n_features(&self) -> usize {
        self.n_features
    }

    fn classify(&self, input: &[f64]) -> Result<Label> {
        check_width(self.n_features, input)?;
        let mut idx = 0;
        loop {
            match &self.nodes[idx] {
                TreeNode::Leaf { class } => return Ok(Label::from_class(*class)),
                TreeNode::Split { feature, threshold, left, right } => {
                    idx = if input[*feature] <= *threshold { *left } else { *right };
                }
            }
        }
    }
}

/// On-disk form of `knn.json` / `dt.json`.
#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ClassifierFile {
    KNearest {
        k: usize,
        samples: Vec<Vec<f64>>,
        classes: Vec<i64>,
    },
    DecisionTree {
        n_features: usize,
        nodes: Vec<TreeNode>,
    },
}

impl ClassifierFile {
    pub fn build(self) -> Result<Box<dyn Classifier>> {
        let classifier: Box<dyn Classifier> = match self {
            ClassifierFile::KNearest { k, samples, classes } => {
                Box::new(KNearest::new(k, samples, classes)?)
            }
            ClassifierFile::DecisionTree { n_features, nodes } => {
                Box::new(DecisionTree::new(n_features, nodes)?)
            }
        };
        Ok(classifier)
    }
}

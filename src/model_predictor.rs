use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use log::info;
use serde::de::DeserializeOwned;

use crate::classifier::{Classifier, ClassifierFile, Label};
use crate::error::{IdsError, Result};
use crate::features::{FeatureVector, Schema};
use crate::preprocess::{PreprocessorFile, Transform};

pub const PREPROCESSOR_FILE: &str = "preprocessor.json";

/// Pretrained classifiers shipped next to the shared preprocessor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelName {
    Knn,
    Dt,
}

impl ModelName {
    pub const ALL: [ModelName; 2] = [ModelName::Knn, ModelName::Dt];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelName::Knn => "knn",
            ModelName::Dt => "dt",
        }
    }

    pub fn parse(name: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|model| model.as_str() == name)
            .ok_or_else(|| {
                IdsError::UsageError(format!(
                    "wrong model name '{}'; available models: {}",
                    name,
                    Self::ALL.map(|m| m.as_str()).join(", ")
                ))
            })
    }

    pub fn file_name(&self) -> String {
        format!("{}.json", self.as_str())
    }
}

impl fmt::Display for ModelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fitted preprocessor + classifier pair and the feature order both expect.
///
/// Loaded once at startup and only ever read afterwards.
pub struct ModelPredictor {
    name: String,
    schema: Schema,
    transform: Box<dyn Transform>,
    classifier: Box<dyn Classifier>,
}

impl ModelPredictor {
    pub fn new(
        name: impl Into<String>,
        schema: Schema,
        transform: Box<dyn Transform>,
        classifier: Box<dyn Classifier>,
    ) -> Result<Self> {
        let name = name.into();
        if transform.n_features() != schema.len() {
            return Err(IdsError::ModelLoadError(format!(
                "{}: preprocessor expects {} features, schema has {}",
                name,
                transform.n_features(),
                schema.len()
            )));
        }
        if classifier.n_features() != schema.len() {
            return Err(IdsError::ModelLoadError(format!(
                "{}: classifier expects {} features, schema has {}",
                name,
                classifier.n_features(),
                schema.len()
            )));
        }

        Ok(ModelPredictor {
            name,
            schema,
            transform,
            classifier,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn normalize(&self, features: &FeatureVector) -> Result<Vec<f64>> {
        if features.schema() != &self.schema {
            return Err(IdsError::SchemaError(format!(
                "vector columns {:?} do not match model columns {:?}",
                features.schema().names(),
                self.schema.names()
            )));
        }
        self.transform.transform(features.values())
    }

    pub fn classify(&self, normalized: &[f64]) -> Result<Label> {
        self.classifier.classify(normalized)
    }

    pub fn predict(&self, features: &FeatureVector) -> Result<Label> {
        let normalized = self.normalize(features)?;
        self.classify(&normalized)
    }
}

impl fmt::Debug for ModelPredictor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelPredictor")
            .field("name", &self.name)
            .field("schema", &self.schema.names())
            .finish()
    }
}

/// Where model artifacts come from.
pub trait ArtifactLoader {
    fn load(&self, model: ModelName) -> Result<ModelPredictor>;
}

/// Reads `preprocessor.json` and `<model>.json` from one directory.
#[derive(Debug, Clone)]
pub struct JsonArtifactLoader {
    dir: PathBuf,
}

impl JsonArtifactLoader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        JsonArtifactLoader { dir: dir.into() }
    }

    fn read<T: DeserializeOwned>(&self, file: &str) -> Result<T> {
        let path = self.dir.join(file);
        let reader = File::open(&path)
            .map(BufReader::new)
            .map_err(|e| load_error(&path, e))?;
        serde_json::from_reader(reader).map_err(|e| load_error(&path, e))
    }
}

fn load_error(path: &Path, err: impl fmt::Display) -> IdsError {
    IdsError::ModelLoadError(format!("{}: {}", path.display(), err))
}

impl ArtifactLoader for JsonArtifactLoader {
    fn load(&self, model: ModelName) -> Result<ModelPredictor> {
        info!("Loading {} model from {}", model, self.dir.display());

        let preprocessor: PreprocessorFile = self.read(PREPROCESSOR_FILE)?;
        let (schema, transform) = preprocessor.build()?;

        let classifier: ClassifierFile = self.read(&model.file_name())?;
        let classifier = classifier.build()?;

        let predictor = ModelPredictor::new(model.as_str(), schema, transform, classifier)?;
        info!(
            "Model {} loaded ({} features: {})",
            model,
            predictor.schema().len(),
            predictor.schema().names().join(", ")
        );
        Ok(predictor)
    }
}

#[cfg(test)]
pub(crate) mod test_artifacts {
    //! Small fixed artifacts over the default flow schema.

    use super::*;
    use crate::classifier::{DecisionTree, TreeNode};
    use crate::preprocess::StandardScaler;

    /// Port 443 traffic is benign, everything else malicious.
    pub fn port_tree() -> ModelPredictor {
        let mut mean = vec![0.0; 10];
        mean[0] = 443.0;
        let transform = StandardScaler::new(mean, vec![1.0; 10]).unwrap();
        let tree = DecisionTree::new(
            10,
            vec![
                TreeNode::Split { feature: 0, threshold: -0.5, left: 1, right: 2 },
                TreeNode::Leaf { class: 1 },
                TreeNode::Split { feature: 0, threshold: 0.5, left: 3, right: 4 },
                TreeNode::Leaf { class: 0 },
                TreeNode::Leaf { class: 1 },
            ],
        )
        .unwrap();
        ModelPredictor::new("dt", Schema::flow(), Box::new(transform), Box::new(tree)).unwrap()
    }

    pub const PREPROCESSOR_JSON: &str = r#"{
        "kind": "standard_scaler",
        "feature_names": ["dst_port", "ip_prot", "flow_duration", "down_up_ratio", "pkt_len_max",
                          "bytes_per_s", "pkt_per_s", "fwd_pkt_cnt", "fwd_pkt_len_tot", "fwd_pkt_len_max"],
        "mean":  [8000.0, 10.0, 0.0, 0.0, 500.0, 0.0, 0.0, 1.0, 500.0, 500.0],
        "scale": [16000.0, 5.0, 1.0, 1.0, 400.0, 1.0, 1.0, 1.0, 400.0, 400.0]
    }"#;

    /// Small packets to low ports are benign; large ones are attacks.
    pub const DT_JSON: &str = r#"{
        "kind": "decision_tree",
        "n_features": 10,
        "nodes": [
            {"feature": 4, "threshold": 0.0, "left": 1, "right": 2},
            {"class": 0},
            {"class": 1}
        ]
    }"#;

    pub const KNN_JSON: &str = r#"{
        "kind": "k_nearest",
        "k": 3,
        "samples": [
            [-0.47, -0.8, 0, 0, -1.15, 0, 0, 0, -1.15, -1.15],
            [-0.49, -0.8, 0, 0, -1.1, 0, 0, 0, -1.1, -1.1],
            [-0.44, 1.4, 0, 0, -1.0, 0, 0, 0, -1.0, -1.0],
            [3.5, -0.8, 0, 0, 2.5, 0, 0, 0, 2.5, 2.5],
            [3.6, -0.8, 0, 0, 2.4, 0, 0, 0, 2.4, 2.4]
        ],
        "classes": [0, 0, 0, 1, 1]
    }"#;

    pub fn write_model_dir(dir: &Path) {
        std::fs::write(dir.join(PREPROCESSOR_FILE), PREPROCESSOR_JSON).unwrap();
        std::fs::write(dir.join("dt.json"), DT_JSON).unwrap();
        std::fs::write(dir.join("knn.json"), KNN_JSON).unwrap();
    }
}

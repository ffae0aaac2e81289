//! Image classification behind a small trait.
//!
//! The model itself is opaque: a [`Classifier`] turns an RGB image into one
//! logit per class and knows the label of each class id. Everything after that
//! (softmax, top-k, label lookup) lives here so it can be exercised without a
//! model file.

pub mod hub;
pub mod onnx;
pub mod preprocess;

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use image::RgbImage;
use serde::Deserialize;
use thiserror::Error;

pub use hub::{ModelFiles, ModelSource};
pub use onnx::OnnxClassifier;
pub use preprocess::{PreprocessorConfig, Preprocessor};

/// Number of classes returned per prediction.
pub const TOP_K: usize = 3;

/// Errors raised while classifying a single image.
#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("model runtime error: {0}")]
    Runtime(String),

    #[error("model produced {got} logits but has {expected} labels")]
    LogitCount { expected: usize, got: usize },

    #[error("requested top {k} of only {classes} classes")]
    NotEnoughClasses { k: usize, classes: usize },
}

/// Errors raised while locating or loading a checkpoint. All of them are
/// fatal at startup.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model file {0} not found")]
    MissingFile(PathBuf),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid id2label table: {0}")]
    Labels(String),

    #[error("failed to fetch {file} from {model_id}: {source}")]
    Hub {
        model_id: String,
        file: String,
        #[source]
        source: hf_hub::api::sync::ApiError,
    },

    #[error("failed to load ONNX graph {path}: {reason}")]
    Onnx { path: PathBuf, reason: String },

    #[error("model check failed: {0}")]
    Check(#[from] ClassifierError),
}

/// Class names indexed by class id.
#[derive(Debug, Clone, PartialEq)]
pub struct Labels(Vec<String>);

#[derive(Deserialize)]
struct CheckpointConfig {
    id2label: HashMap<String, String>,
}

impl Labels {
    pub fn new(names: Vec<String>) -> Self {
        Self(names)
    }

    /// Builds the table from a checkpoint's `id2label` map. Ids are JSON
    /// object keys and must cover `0..n` without gaps.
    pub fn from_id2label(map: HashMap<String, String>) -> Result<Self, ModelError> {
        if map.is_empty() {
            return Err(ModelError::Labels("table is empty".to_string()));
        }

        let mut slots: Vec<Option<String>> = vec![None; map.len()];
        for (key, label) in map {
            let id: usize = key
                .trim()
                .parse()
                .map_err(|_| ModelError::Labels(format!("class id {key:?} is not an integer")))?;
            let slot = slots.get_mut(id).ok_or_else(|| {
                ModelError::Labels(format!("class id {id} is out of range"))
            })?;
            *slot = Some(label);
        }

        // map.len() slots and every key landed in range, so a hole means a duplicate.
        slots
            .into_iter()
            .enumerate()
            .map(|(id, slot)| {
                slot.ok_or_else(|| ModelError::Labels(format!("class id {id} is missing")))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Self)
    }

    /// Parses the `config.json` shipped with a checkpoint.
    pub fn from_config_json(json: &str) -> Result<Self, serde_json::Error> {
        let config: CheckpointConfig = serde_json::from_str(json)?;
        Self::from_id2label(config.id2label).map_err(serde::de::Error::custom)
    }

    pub fn from_path(path: &Path) -> Result<Self, ModelError> {
        let json = std::fs::read_to_string(path).map_err(|source| ModelError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_config_json(&json).map_err(|source| ModelError::Json {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn get(&self, id: usize) -> Option<&str> {
        self.0.get(id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A loaded image classifier. Shared read-only between workers.
pub trait Classifier: Send + Sync {
    /// Raw, unnormalized score per class id.
    fn logits(&self, image: &RgbImage) -> Result<Vec<f32>, ClassifierError>;

    fn labels(&self) -> &Labels;
}

/// A class id with its label and softmax probability.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassScore {
    pub class_id: usize,
    pub label: String,
    pub probability: f32,
}

/// Numerically stable softmax.
pub fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|&l| (l - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// Indices of the `k` largest values, largest first. Equal values keep the
/// lower index first.
pub fn top_k(values: &[f32], k: usize) -> Vec<usize> {
    let mut indices: Vec<usize> = (0..values.len()).collect();
    // sort_by is stable, so ties stay in id order
    indices.sort_by(|&a, &b| values[b].total_cmp(&values[a]));
    indices.truncate(k);
    indices
}

/// Runs `classifier` on `image` and returns its `k` most probable classes.
pub fn classify<C>(
    classifier: &C,
    image: &RgbImage,
    k: usize,
) -> Result<Vec<ClassScore>, ClassifierError>
where
    C: Classifier + ?Sized,
{
    let labels = classifier.labels();
    if k > labels.len() {
        return Err(ClassifierError::NotEnoughClasses {
            k,
            classes: labels.len(),
        });
    }

    let logits = classifier.logits(image)?;
    if logits.len() != labels.len() {
        return Err(ClassifierError::LogitCount {
            expected: labels.len(),
            got: logits.len(),
        });
    }

    let probabilities = softmax(&logits);
    Ok(top_k(&probabilities, k)
        .into_iter()
        .map(|class_id| ClassScore {
            class_id,
            label: labels.get(class_id).unwrap_or_default().to_string(),
            probability: probabilities[class_id],
        })
        .collect())
}

use image::RgbImage;
use tract_onnx::prelude::*;
use tracing::{debug, info};

use super::{
    Classifier, ClassifierError, Labels, ModelError, ModelFiles, Preprocessor, PreprocessorConfig,
    TOP_K,
};

type RunnableGraph = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// Classifier backed by an ONNX export of the checkpoint, run with tract.
pub struct OnnxClassifier {
    model: RunnableGraph,
    preprocessor: Preprocessor,
    labels: Labels,
}

impl OnnxClassifier {
    /// Loads, optimizes and smoke-tests the graph. Runs once at startup.
    pub fn load(files: &ModelFiles) -> Result<Self, ModelError> {
        let labels = Labels::from_path(&files.config)?;
        if labels.len() < TOP_K {
            return Err(ClassifierError::NotEnoughClasses {
                k: TOP_K,
                classes: labels.len(),
            }
            .into());
        }

        let preprocessor = Preprocessor::new(&PreprocessorConfig::from_path(&files.preprocessor)?);
        let (height, width) = preprocessor.output_size();

        let onnx_error = |e: TractError| ModelError::Onnx {
            path: files.onnx.clone(),
            reason: format!("{e:#}"),
        };

        let model = tract_onnx::onnx()
            .model_for_path(&files.onnx)
            .map_err(onnx_error)?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, height as usize, width as usize),
                ),
            )
            .map_err(onnx_error)?
            .into_optimized()
            .map_err(onnx_error)?
            .into_runnable()
            .map_err(onnx_error)?;

        let classifier = Self {
            model,
            preprocessor,
            labels,
        };

        // A graph whose head disagrees with id2label would fail every request.
        let logits = classifier.logits(&RgbImage::new(width, height))?;
        if logits.len() != classifier.labels.len() {
            return Err(ClassifierError::LogitCount {
                expected: classifier.labels.len(),
                got: logits.len(),
            }
            .into());
        }

        info!(
            classes = classifier.labels.len(),
            input = %format!("1x3x{height}x{width}"),
            "ONNX classifier ready"
        );
        Ok(classifier)
    }
}

impl Classifier for OnnxClassifier {
    fn logits(&self, image: &RgbImage) -> Result<Vec<f32>, ClassifierError> {
        let input = self.preprocessor.tensor(image);

        let outputs = self
            .model
            .run(tvec!(input.into_tensor().into()))
            .map_err(|e| ClassifierError::Runtime(format!("{e:#}")))?;

        let output = outputs
            .first()
            .ok_or_else(|| ClassifierError::Runtime("model produced no outputs".to_string()))?;
        let logits: Vec<f32> = output
            .to_array_view::<f32>()
            .map_err(|e| ClassifierError::Runtime(format!("{e:#}")))?
            .iter()
            .copied()
            .collect();

        debug!(logits = logits.len(), "Forward pass complete");
        Ok(logits)
    }

    fn labels(&self) -> &Labels {
        &self.labels
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use image::Rgb;

    use super::*;
    use crate::classifier::classify;
    use crate::classifier::hub::{CONFIG_FILE, DEFAULT_ONNX_FILE, PREPROCESSOR_FILE};
    use crate::classifier::ModelSource;

    /// GlobalAveragePool -> Flatten -> Gemm(3x4): four logits for any input size.
    const TINY_GRAPH: &str = concat!(
        env!("CARGO_MANIFEST_DIR"),
        "/tests/fixtures/tiny_classifier.onnx"
    );

    fn checkpoint(dir: &Path, labels: &[&str], preprocessor: &str) -> ModelFiles {
        let id2label: serde_json::Map<String, serde_json::Value> = labels
            .iter()
            .enumerate()
            .map(|(id, label)| (id.to_string(), serde_json::Value::from(*label)))
            .collect();
        let config = serde_json::json!({ "id2label": id2label });

        fs::write(dir.join(CONFIG_FILE), config.to_string()).unwrap();
        fs::write(dir.join(PREPROCESSOR_FILE), preprocessor).unwrap();
        fs::copy(TINY_GRAPH, dir.join(DEFAULT_ONNX_FILE)).unwrap();

        ModelSource::Local(dir.to_path_buf())
            .resolve(DEFAULT_ONNX_FILE)
            .unwrap()
    }

    #[test]
    fn loads_graph_and_produces_one_logit_per_label() {
        let dir = tempfile::tempdir().unwrap();
        let files = checkpoint(
            dir.path(),
            &["apple", "banana", "carrot", "durian"],
            r#"{"size": {"height": 32, "width": 32}}"#,
        );

        let classifier = OnnxClassifier::load(&files).unwrap();
        assert_eq!(classifier.labels().len(), 4);

        let image = RgbImage::from_pixel(20, 10, Rgb([120, 200, 40]));
        let logits = classifier.logits(&image).unwrap();
        assert_eq!(logits.len(), 4);
        assert!(logits.iter().all(|l| l.is_finite()));

        let ranked = classify(&classifier, &image, TOP_K).unwrap();
        assert_eq!(ranked.len(), TOP_K);
        assert!(ranked.windows(2).all(|w| w[0].probability >= w[1].probability));
    }

    #[test]
    fn rejects_label_table_that_disagrees_with_graph() {
        let dir = tempfile::tempdir().unwrap();
        let files = checkpoint(
            dir.path(),
            &["apple", "banana", "carrot", "durian", "eggplant"],
            "{}",
        );

        let err = OnnxClassifier::load(&files).err().unwrap();
        assert!(matches!(
            err,
            ModelError::Check(ClassifierError::LogitCount {
                expected: 5,
                got: 4
            })
        ));
    }

    #[test]
    fn rejects_checkpoint_with_fewer_classes_than_top_k() {
        let dir = tempfile::tempdir().unwrap();
        let files = checkpoint(dir.path(), &["apple", "banana"], "{}");

        let err = OnnxClassifier::load(&files).err().unwrap();
        assert!(matches!(
            err,
            ModelError::Check(ClassifierError::NotEnoughClasses {
                k: TOP_K,
                classes: 2
            })
        ));
    }
}

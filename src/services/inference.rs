//! Inference engine wrapping the pretrained leaf classifier.
//!
//! The ONNX model is loaded exactly once at process start and shared as
//! read-only state (`Arc<dyn Classifier>`); `classify` takes `&self` and is
//! safe for unlimited concurrent callers. A load failure is fatal: `main`
//! exits before the server binds, so the service never reports ready
//! without a model. The engine never retries; retry policy belongs to the
//! caller.

use std::collections::BTreeMap;
use std::path::Path;

use tract_onnx::prelude::*;

use crate::error::{AppError, AppResult};
use crate::models::DiseaseLabel;

/// Two probabilities within this distance are considered tied; ties resolve
/// to the lexicographically-first label.
pub const TIE_EPSILON: f64 = 1e-6;

/// Tolerance for validating that a probability vector sums to 1.
pub const SUM_TOLERANCE: f64 = 1e-6;

/// Input image side expected by the classifier.
const INPUT_SIZE: u32 = 224;

/// Per-channel normalization applied before inference (ImageNet statistics,
/// matching the classifier's training pipeline).
const CHANNEL_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const CHANNEL_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// The classifier's verdict for one image.
#[derive(Debug, Clone)]
pub struct Prediction {
    /// Probability per label; sums to 1 within `SUM_TOLERANCE`
    pub probabilities: BTreeMap<DiseaseLabel, f64>,
    /// Arg-max label, lexicographically-first on ties
    pub label: DiseaseLabel,
    /// Probability of the predicted label
    pub confidence: f64,
}

impl Prediction {
    /// Build a prediction from the classifier's raw probability vector,
    /// indexed in the model's output order.
    pub fn from_model_output(probabilities: &[f64]) -> AppResult<Self> {
        if probabilities.len() != DiseaseLabel::MODEL_OUTPUT_ORDER.len() {
            return Err(AppError::Inference(format!(
                "Model returned {} probabilities, expected {}",
                probabilities.len(),
                DiseaseLabel::MODEL_OUTPUT_ORDER.len()
            )));
        }

        let sum: f64 = probabilities.iter().sum();
        if (sum - 1.0).abs() > SUM_TOLERANCE {
            return Err(AppError::Inference(format!(
                "Probability vector sums to {}, expected 1",
                sum
            )));
        }

        let by_label: BTreeMap<DiseaseLabel, f64> = DiseaseLabel::MODEL_OUTPUT_ORDER
            .iter()
            .copied()
            .zip(probabilities.iter().copied())
            .collect();

        let (label, confidence) = arg_max(&by_label);

        Ok(Prediction {
            probabilities: by_label,
            label,
            confidence,
        })
    }
}

/// Pick the arg-max label. Labels within `TIE_EPSILON` of the maximum are
/// tied; the lexicographically-first of them wins, deterministically.
fn arg_max(probabilities: &BTreeMap<DiseaseLabel, f64>) -> (DiseaseLabel, f64) {
    let max = probabilities
        .values()
        .copied()
        .fold(f64::NEG_INFINITY, f64::max);

    // DiseaseLabel::ALL is in lexicographic wire-name order
    for label in DiseaseLabel::ALL {
        let p = probabilities.get(&label).copied().unwrap_or(f64::NEG_INFINITY);
        if max - p <= TIE_EPSILON {
            return (label, p);
        }
    }

    unreachable!("the maximum is always within TIE_EPSILON of itself")
}

/// Numerically-stable softmax over raw logits.
pub fn softmax(logits: &[f32]) -> Vec<f64> {
    let max_logit = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exp: Vec<f64> = logits
        .iter()
        .map(|&x| ((x - max_logit) as f64).exp())
        .collect();
    let sum: f64 = exp.iter().sum();
    exp.iter().map(|&x| x / sum).collect()
}

/// The classifier boundary: one pretrained model, treated as an immutable
/// black-box function from image bytes to a probability vector.
pub trait Classifier: Send + Sync {
    /// Model identifier reported by analytics.
    fn version(&self) -> &str;

    /// Classify one image. Pure over immutable weights; no internal retries.
    fn classify(&self, image_bytes: &[u8]) -> AppResult<Prediction>;
}

type OnnxModel = TypedRunnableModel<TypedModel>;

/// Production classifier backed by a tract-onnx plan.
pub struct TractClassifier {
    model: OnnxModel,
    version: String,
}

impl TractClassifier {
    /// Load the ONNX model from disk. Fatal on failure: callers are expected
    /// to abort startup rather than run without a model.
    pub fn load(path: &Path, version: &str) -> AppResult<Self> {
        let model = tract_onnx::onnx()
            .model_for_path(path)
            .map_err(|e| AppError::Inference(format!("Failed to load model: {}", e)))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, INPUT_SIZE as usize, INPUT_SIZE as usize),
                ),
            )
            .map_err(|e| AppError::Inference(format!("Failed to fix model input: {}", e)))?
            .into_optimized()
            .map_err(|e| AppError::Inference(format!("Failed to optimize model: {}", e)))?
            .into_runnable()
            .map_err(|e| AppError::Inference(format!("Model is not runnable: {}", e)))?;

        Ok(TractClassifier {
            model,
            version: version.to_string(),
        })
    }
}

impl Classifier for TractClassifier {
    fn version(&self) -> &str {
        &self.version
    }

    fn classify(&self, image_bytes: &[u8]) -> AppResult<Prediction> {
        let input = decode_and_preprocess(image_bytes)?;

        let outputs = self
            .model
            .run(tvec!(input.into()))
            .map_err(|e| AppError::Inference(format!("Inference failed: {}", e)))?;

        let view = outputs[0]
            .to_array_view::<f32>()
            .map_err(|e| AppError::Inference(format!("Unexpected model output: {}", e)))?;
        let logits: Vec<f32> = view.iter().copied().collect();

        Prediction::from_model_output(&softmax(&logits))
    }
}

/// Decode image bytes and build the normalized NCHW input tensor.
fn decode_and_preprocess(image_bytes: &[u8]) -> AppResult<Tensor> {
    let decoded = image::load_from_memory(image_bytes)
        .map_err(|e| AppError::Decode(format!("Cannot decode image: {}", e)))?;

    let rgb = decoded.to_rgb8();
    let resized = image::imageops::resize(
        &rgb,
        INPUT_SIZE,
        INPUT_SIZE,
        image::imageops::FilterType::Triangle,
    );

    let tensor = tract_ndarray::Array4::from_shape_fn(
        (1, 3, INPUT_SIZE as usize, INPUT_SIZE as usize),
        |(_, c, y, x)| {
            let value = resized.get_pixel(x as u32, y as u32)[c] as f32 / 255.0;
            (value - CHANNEL_MEAN[c]) / CHANNEL_STD[c]
        },
    );

    Ok(tensor.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prediction_maps_model_output_order() {
        // Model order: brown_rust, yellow_rust, septoria, healthy, mildew
        let p = Prediction::from_model_output(&[0.87, 0.05, 0.04, 0.03, 0.01]).unwrap();
        assert_eq!(p.label, DiseaseLabel::BrownRust);
        assert!((p.confidence - 0.87).abs() < 1e-12);
        assert!((p.probabilities[&DiseaseLabel::YellowRust] - 0.05).abs() < 1e-12);
        assert!((p.probabilities[&DiseaseLabel::Mildew] - 0.01).abs() < 1e-12);
    }

    #[test]
    fn test_probabilities_must_sum_to_one() {
        assert!(Prediction::from_model_output(&[0.5, 0.2, 0.1, 0.1, 0.05]).is_err());
        assert!(Prediction::from_model_output(&[0.5, 0.2]).is_err());
        assert!(Prediction::from_model_output(&[0.2, 0.2, 0.2, 0.2, 0.2]).is_ok());
    }

    #[test]
    fn test_exact_tie_resolves_lexicographically_first() {
        // septoria (index 2) and healthy (index 3) share the maximum;
        // "healthy" sorts before "septoria"
        let p = Prediction::from_model_output(&[0.1, 0.1, 0.35, 0.35, 0.1]).unwrap();
        assert_eq!(p.label, DiseaseLabel::Healthy);
    }

    #[test]
    fn test_near_tie_resolves_lexicographically_first() {
        // yellow_rust edges out brown_rust by less than TIE_EPSILON;
        // "brown_rust" sorts first and must win
        let p = Prediction::from_model_output(&[
            0.349_999_999_9,
            0.35,
            0.1,
            0.1,
            0.100_000_000_1,
        ])
        .unwrap();
        assert_eq!(p.label, DiseaseLabel::BrownRust);
    }

    #[test]
    fn test_clear_maximum_ignores_tie_break() {
        let p = Prediction::from_model_output(&[0.05, 0.9, 0.02, 0.02, 0.01]).unwrap();
        assert_eq!(p.label, DiseaseLabel::YellowRust);
        assert!((p.confidence - 0.9).abs() < 1e-12);
    }

    #[test]
    fn test_softmax_sums_to_one() {
        let probs = softmax(&[2.0, 1.0, 0.1, -1.0, 3.5]);
        let sum: f64 = probs.iter().sum();
        assert!((sum - 1.0).abs() < SUM_TOLERANCE);
        // Largest logit keeps the largest probability
        assert!(probs[4] > probs[0]);
    }

    #[test]
    fn test_softmax_is_stable_for_large_logits() {
        let probs = softmax(&[1000.0, 999.0, 998.0, 0.0, -1000.0]);
        assert!(probs.iter().all(|p| p.is_finite()));
        let sum: f64 = probs.iter().sum();
        assert!((sum - 1.0).abs() < SUM_TOLERANCE);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let result = decode_and_preprocess(b"definitely not an image");
        assert!(matches!(result, Err(AppError::Decode(_))));
    }

    #[test]
    fn test_load_rejects_missing_model() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.onnx");
        assert!(TractClassifier::load(&missing, "test").is_err());
    }

    #[test]
    fn test_load_rejects_corrupt_model() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corrupt.onnx");
        std::fs::write(&path, b"not an onnx graph").unwrap();
        assert!(TractClassifier::load(&path, "test").is_err());
    }
}

// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Classifier adapter: the pre-trained leaf model and the gate that bounds access to it

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tract_onnx::prelude::*;
use tracing::{debug, info, warn};

use crate::config::{ModelConfig, TensorLayout};
use crate::knowledge::DiseaseLabel;
use crate::preprocess::ImageTensor;
use crate::{LeafscanError, Result};

const PROBABILITY_TOLERANCE: f32 = 1e-4;

/// A pure function from image tensor to per-label probabilities
pub trait Classifier: Send + Sync {
    fn classify(&self, tensor: &ImageTensor) -> Result<Vec<f32>>;

    /// Short description used in logs
    fn name(&self) -> &str {
        "classifier"
    }
}

/// ONNX model executed with tract
pub struct OnnxClassifier {
    plan: TypedRunnableModel<TypedModel>,
    layout: TensorLayout,
    apply_softmax: bool,
    description: String,
}

impl OnnxClassifier {
    /// Load and optimize the model. Any failure here is fatal for the service.
    pub fn load(config: &ModelConfig) -> Result<Self> {
        let path: &Path = &config.path;
        if !path.exists() {
            return Err(LeafscanError::Startup(format!("model file {:?} does not exist", path)));
        }

        let size = config.input_size as usize;
        let shape = match config.layout {
            TensorLayout::Nhwc => tvec!(1, size, size, ImageTensor::CHANNELS),
            TensorLayout::Nchw => tvec!(1, ImageTensor::CHANNELS, size, size),
        };

        let plan = tract_onnx::onnx()
            .model_for_path(path)
            .map_err(|e| LeafscanError::Startup(format!("Failed to load ONNX model {:?}: {}", path, e)))?
            .with_input_fact(0, InferenceFact::dt_shape(f32::datum_type(), shape))
            .map_err(|e| LeafscanError::Startup(format!("Model rejected input shape: {}", e)))?
            .into_optimized()
            .map_err(|e| LeafscanError::Startup(format!("Model optimization failed: {}", e)))?
            .into_runnable()
            .map_err(|e| LeafscanError::Startup(format!("Model not runnable: {}", e)))?;

        info!("Loaded classifier from {:?} ({:?}, {}px)", path, config.layout, size);

        Ok(Self {
            plan,
            layout: config.layout,
            apply_softmax: config.apply_softmax,
            description: path.display().to_string(),
        })
    }
}

impl Classifier for OnnxClassifier {
    fn classify(&self, tensor: &ImageTensor) -> Result<Vec<f32>> {
        let input = Tensor::from_shape(&tensor.shape_for(self.layout), &tensor.to_layout(self.layout))
            .map_err(|e| LeafscanError::Inference(format!("Failed to build input tensor: {}", e)))?;

        let outputs = self
            .plan
            .run(tvec!(input.into()))
            .map_err(|e| LeafscanError::Inference(format!("Model execution failed: {}", e)))?;

        let first = outputs
            .first()
            .ok_or_else(|| LeafscanError::Inference("model produced no outputs".to_string()))?;
        let view = first
            .to_array_view::<f32>()
            .map_err(|e| LeafscanError::Inference(format!("Unexpected output type: {}", e)))?;

        let raw: Vec<f32> = view.iter().copied().collect();
        Ok(if self.apply_softmax { softmax(&raw) } else { raw })
    }

    fn name(&self) -> &str {
        &self.description
    }
}

pub fn softmax(values: &[f32]) -> Vec<f32> {
    let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = values.iter().map(|v| (v - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// Check a probability vector against the fixed label set
pub fn validate_probabilities(probabilities: &[f32]) -> Result<()> {
    if probabilities.len() != DiseaseLabel::ALL.len() {
        return Err(LeafscanError::Inference(format!(
            "model returned {} scores for {} labels",
            probabilities.len(),
            DiseaseLabel::ALL.len()
        )));
    }
    let in_range = |p: &f32| {
        p.is_finite() && *p >= -PROBABILITY_TOLERANCE && *p <= 1.0 + PROBABILITY_TOLERANCE
    };
    if !probabilities.iter().all(in_range) {
        return Err(LeafscanError::Inference(format!(
            "model returned values outside [0, 1]: {:?}",
            probabilities
        )));
    }
    Ok(())
}

/// Bounded, time-limited access to a shared classifier.
///
/// `run_slots` limits how many calls execute at once; `admission` caps
/// running plus waiting calls. Past the cap callers are turned away.
#[derive(Clone)]
pub struct InferenceGate {
    classifier: Arc<dyn Classifier>,
    run_slots: Arc<Semaphore>,
    admission: Arc<Semaphore>,
    max_pending: usize,
    timeout: Duration,
}

impl InferenceGate {
    pub fn new(
        classifier: Arc<dyn Classifier>,
        max_concurrent: usize,
        max_pending: usize,
        timeout: Duration,
    ) -> Self {
        let max_concurrent = max_concurrent.max(1);
        let max_pending = max_pending.max(max_concurrent);
        Self {
            classifier,
            run_slots: Arc::new(Semaphore::new(max_concurrent)),
            admission: Arc::new(Semaphore::new(max_pending)),
            max_pending,
            timeout,
        }
    }

    pub fn from_config(classifier: Arc<dyn Classifier>, config: &ModelConfig) -> Self {
        Self::new(
            classifier,
            config.max_concurrent,
            config.max_pending,
            Duration::from_millis(config.timeout_ms),
        )
    }

    /// Run the classifier on the blocking pool and validate its output
    pub async fn classify(&self, tensor: ImageTensor) -> Result<Vec<f32>> {
        let admitted = self
            .admission
            .clone()
            .try_acquire_owned()
            .map_err(|_| LeafscanError::Overloaded(self.max_pending))?;

        let run = async {
            let slot = self
                .run_slots
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| LeafscanError::Inference("inference gate closed".to_string()))?;

            let classifier = Arc::clone(&self.classifier);
            // Permits move into the task so they are released only when the
            // runtime call returns, even if this request already timed out.
            tokio::task::spawn_blocking(move || {
                let _slot = slot;
                let _admitted = admitted;
                classifier.classify(&tensor)
            })
            .await?
        };

        let probabilities = match tokio::time::timeout(self.timeout, run).await {
            Ok(result) => result?,
            Err(_) => {
                warn!("Classifier {} exceeded {:?}", self.classifier.name(), self.timeout);
                return Err(LeafscanError::Inference(format!(
                    "inference timed out after {} ms",
                    self.timeout.as_millis()
                )));
            }
        };

        validate_probabilities(&probabilities)?;
        debug!("Classifier output: {:?}", probabilities);
        Ok(probabilities)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Returns a fixed probability vector
    pub struct FixedClassifier(pub Vec<f32>);

    impl Classifier for FixedClassifier {
        fn classify(&self, _tensor: &ImageTensor) -> Result<Vec<f32>> {
            Ok(self.0.clone())
        }
    }

    /// Sleeps before answering
    pub struct SlowClassifier(pub Duration);

    impl Classifier for SlowClassifier {
        fn classify(&self, _tensor: &ImageTensor) -> Result<Vec<f32>> {
            std::thread::sleep(self.0);
            Ok(vec![0.0, 0.0, 0.0, 1.0])
        }
    }

    pub fn tiny_tensor() -> ImageTensor {
        ImageTensor::from_nhwc(vec![0.5; 12], 2, 2).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    #[test]
    fn test_softmax_sums_to_one() {
        let probs = softmax(&[1.0, 2.0, 3.0, 4.0]);
        let sum: f32 = probs.iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);
        assert!(probs[3] > probs[2]);
    }

    #[test]
    fn test_validate_rejects_wrong_length() {
        assert!(validate_probabilities(&[0.5, 0.5]).is_err());
    }

    #[test]
    fn test_validate_rejects_logits() {
        assert!(validate_probabilities(&[2.5, -1.0, 0.0, 0.1]).is_err());
        assert!(validate_probabilities(&[f32::NAN, 0.0, 0.0, 0.0]).is_err());
        assert!(validate_probabilities(&[0.1, 0.2, 0.3, 0.4]).is_ok());
    }

    #[tokio::test]
    async fn test_gate_returns_probabilities() {
        let gate = InferenceGate::new(
            Arc::new(FixedClassifier(vec![0.1, 0.2, 0.6, 0.1])),
            1,
            4,
            Duration::from_secs(5),
        );
        let probs = gate.classify(tiny_tensor()).await.unwrap();
        assert_eq!(probs, vec![0.1, 0.2, 0.6, 0.1]);
    }

    #[tokio::test]
    async fn test_gate_rejects_invalid_output() {
        let gate = InferenceGate::new(
            Arc::new(FixedClassifier(vec![0.5, 0.5])),
            1,
            4,
            Duration::from_secs(5),
        );
        let err = gate.classify(tiny_tensor()).await.unwrap_err();
        assert!(matches!(err, LeafscanError::Inference(_)));
    }

    #[tokio::test]
    async fn test_gate_times_out() {
        let gate = InferenceGate::new(
            Arc::new(SlowClassifier(Duration::from_millis(300))),
            1,
            4,
            Duration::from_millis(20),
        );
        let err = gate.classify(tiny_tensor()).await.unwrap_err();
        assert!(matches!(err, LeafscanError::Inference(msg) if msg.contains("timed out")));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_gate_rejects_when_full() {
        let gate = InferenceGate::new(
            Arc::new(SlowClassifier(Duration::from_millis(300))),
            1,
            1,
            Duration::from_secs(5),
        );

        let busy = gate.clone();
        let first = tokio::spawn(async move { busy.classify(tiny_tensor()).await });
        tokio::time::sleep(Duration::from_millis(50)).await;

        let err = gate.classify(tiny_tensor()).await.unwrap_err();
        assert!(matches!(err, LeafscanError::Overloaded(1)));

        assert!(first.await.unwrap().is_ok());
        // Capacity comes back once the first call finishes
        assert!(gate.classify(tiny_tensor()).await.is_ok());
    }

    #[test]
    fn test_missing_model_is_startup_error() {
        let config = ModelConfig {
            path: "/nonexistent/leaf.onnx".into(),
            ..ModelConfig::default()
        };
        assert!(matches!(OnnxClassifier::load(&config), Err(LeafscanError::Startup(_))));
    }
}

use ndarray::Array4;
use std::path::Path;

use super::preprocess::INPUT_SHAPE;

#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error("Input tensor has shape {actual:?}, model expects {expected:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },
    #[error("Model produced {actual} scores, expected {expected}")]
    OutputMismatch { expected: usize, actual: usize },
    #[error("Model error: {0}")]
    Model(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ModelLoadError {
    #[error("Failed to read labels: {0}")]
    Labels(#[from] super::labels::ManifestError),
    #[error("Failed to load weights from {path}: {reason}")]
    Weights { path: String, reason: String },
    #[error("Model outputs {outputs} classes but the manifest lists {labels}")]
    ClassCountMismatch { outputs: usize, labels: usize },
    #[error("Model probe failed: {0}")]
    Probe(#[from] InferenceError),
}

/// A frozen classifier that evaluates one forward pass.
pub trait Classifier: Send + Sync {
    /// Returns unnormalized class scores for the single batch element.
    fn forward(&self, input: &Array4<f32>) -> Result<Vec<f32>, InferenceError>;
}

/// Builds a [`Classifier`] in inference mode from a weights file.
pub trait ModelLoader: Send + Sync {
    fn load(&self, weights: &Path) -> Result<Box<dyn Classifier>, ModelLoadError>;
}

/// Runs a forward pass and checks the score vector against `num_classes`.
pub fn infer(
    model: &dyn Classifier,
    tensor: &Array4<f32>,
    num_classes: usize,
) -> Result<Vec<f32>, InferenceError> {
    if tensor.shape() != &INPUT_SHAPE[..] {
        return Err(InferenceError::ShapeMismatch {
            expected: INPUT_SHAPE.to_vec(),
            actual: tensor.shape().to_vec(),
        });
    }
    let scores = model.forward(tensor)?;
    if scores.len() != num_classes {
        return Err(InferenceError::OutputMismatch {
            expected: num_classes,
            actual: scores.len(),
        });
    }
    Ok(scores)
}

#[cfg(feature = "torch")]
pub use torch::TorchScriptLoader;

/// Stands in when the binary is built without a tensor backend; every load
/// fails so the service never reports ready.
#[cfg(not(feature = "torch"))]
pub struct UnavailableLoader;

#[cfg(not(feature = "torch"))]
impl ModelLoader for UnavailableLoader {
    fn load(&self, weights: &Path) -> Result<Box<dyn Classifier>, ModelLoadError> {
        Err(ModelLoadError::Weights {
            path: weights.display().to_string(),
            reason: "built without the `torch` feature".into(),
        })
    }
}

#[cfg(feature = "torch")]
mod torch {
    use super::*;
    use tch::{CModule, Device, Kind, Tensor};

    /// Loads TorchScript exports on the CPU.
    #[derive(Clone, Copy, Default)]
    pub struct TorchScriptLoader;

    struct TorchScriptModel {
        module: CModule,
        device: Device,
    }

    impl ModelLoader for TorchScriptLoader {
        fn load(&self, weights: &Path) -> Result<Box<dyn Classifier>, ModelLoadError> {
            let device = Device::Cpu;
            let mut module =
                CModule::load_on_device(weights, device).map_err(|e| ModelLoadError::Weights {
                    path: weights.display().to_string(),
                    reason: e.to_string(),
                })?;
            module.set_eval();
            Ok(Box::new(TorchScriptModel { module, device }))
        }
    }

    impl Classifier for TorchScriptModel {
        fn forward(&self, input: &Array4<f32>) -> Result<Vec<f32>, InferenceError> {
            let shape: Vec<i64> = input.shape().iter().map(|&d| d as i64).collect();
            let data = input
                .as_slice()
                .ok_or_else(|| InferenceError::Model("input tensor is not contiguous".into()))?;

            let output = tch::no_grad(|| {
                let tensor = Tensor::from_slice(data)
                    .view(shape.as_slice())
                    .to_device(self.device);
                self.module.forward_ts(&[tensor])
            })
            .map_err(|e| InferenceError::Model(e.to_string()))?;

            let output_flat = output.to_kind(Kind::Float).view([-1]);
            Vec::<f32>::try_from(&output_flat).map_err(|e| InferenceError::Model(e.to_string()))
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Scores derived from the mean of each input channel, so different
    /// images rank differently while staying deterministic.
    pub struct ChannelMeanClassifier {
        pub num_classes: usize,
    }

    impl Classifier for ChannelMeanClassifier {
        fn forward(&self, input: &Array4<f32>) -> Result<Vec<f32>, InferenceError> {
            let means: Vec<f32> = (0..3)
                .map(|c| {
                    input
                        .index_axis(ndarray::Axis(1), c)
                        .mean()
                        .unwrap_or_default()
                })
                .collect();
            Ok((0..self.num_classes)
                .map(|i| means[i % 3] * (i as f32 + 1.0) / self.num_classes as f32)
                .collect())
        }
    }

    /// Loader that reads a class count from the weights file and builds a
    /// [`ChannelMeanClassifier`] of that width.
    #[derive(Default)]
    pub struct FakeLoader {
        pub loads: AtomicUsize,
    }

    impl ModelLoader for FakeLoader {
        fn load(&self, weights: &Path) -> Result<Box<dyn Classifier>, ModelLoadError> {
            let weights_err = |reason: String| ModelLoadError::Weights {
                path: weights.display().to_string(),
                reason,
            };
            let contents =
                std::fs::read_to_string(weights).map_err(|e| weights_err(e.to_string()))?;
            let num_classes: usize = contents
                .trim()
                .parse()
                .map_err(|_| weights_err("not a checkpoint".into()))?;
            self.loads.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(ChannelMeanClassifier { num_classes }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::ChannelMeanClassifier;
    use super::*;

    #[test]
    fn infer_returns_one_score_per_class() {
        let model = ChannelMeanClassifier { num_classes: 4 };
        let tensor = Array4::from_elem(INPUT_SHAPE, 0.5f32);
        let scores = infer(&model, &tensor, 4).unwrap();
        assert_eq!(scores.len(), 4);
    }

    #[test]
    fn infer_rejects_wrong_input_shape() {
        let model = ChannelMeanClassifier { num_classes: 4 };
        let tensor = Array4::<f32>::zeros([1, 3, 32, 32]);
        let err = infer(&model, &tensor, 4).unwrap_err();
        assert!(matches!(err, InferenceError::ShapeMismatch { .. }));
    }

    #[test]
    fn infer_rejects_wrong_output_width() {
        let model = ChannelMeanClassifier { num_classes: 4 };
        let tensor = Array4::<f32>::zeros(INPUT_SHAPE);
        let err = infer(&model, &tensor, 7).unwrap_err();
        assert!(matches!(
            err,
            InferenceError::OutputMismatch {
                expected: 7,
                actual: 4
            }
        ));
    }

    #[test]
    fn infer_is_deterministic() {
        let model = ChannelMeanClassifier { num_classes: 5 };
        let tensor = Array4::from_shape_fn(INPUT_SHAPE, |(_, c, y, x)| {
            (c * 7 + y * 3 + x) as f32 / 1000.0
        });
        let a = infer(&model, &tensor, 5).unwrap();
        let b = infer(&model, &tensor, 5).unwrap();
        assert_eq!(a, b);
    }
}

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde::Serialize;
use serde::ser::SerializeMap;
use shared::ClassPrediction;
use std::sync::Arc;

use crate::inference::model::{InferenceError, infer};
use crate::inference::preprocess::{DecodeError, preprocess};
use crate::inference::ranker::rank;
use crate::inference::registry::{ModelRegistry, RegistryError};

#[derive(Debug, thiserror::Error)]
pub enum PredictionError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Inference(#[from] InferenceError),
    #[error("Inference worker failed: {0}")]
    Worker(String),
}

#[derive(Serialize)]
struct ErrorResponse {
    detail: String,
}

impl ResponseError for PredictionError {
    fn status_code(&self) -> StatusCode {
        match self {
            PredictionError::Registry(RegistryError::NotReady) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ErrorResponse {
            detail: self.to_string(),
        })
    }
}

/// Top-K predictions for one image, most confident first.
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionResult {
    pub top_k: usize,
    pub predictions: Vec<ClassPrediction>,
}

impl PredictionResult {
    pub fn top(&self) -> Option<&ClassPrediction> {
        self.predictions.first()
    }
}

/// Serializes as `{predicted_class, confidence, top_<k>_predictions}`.
impl Serialize for PredictionResult {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(3))?;
        map.serialize_entry("predicted_class", &self.top().map(|p| p.class.as_str()))?;
        map.serialize_entry("confidence", &self.top().map(|p| p.confidence))?;
        map.serialize_entry(
            &format!("top_{}_predictions", self.top_k),
            &self.predictions,
        )?;
        map.end()
    }
}

#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<ModelRegistry>,
}

impl Dispatcher {
    pub fn new(registry: Arc<ModelRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    /// Runs the whole pipeline for one image. CPU bound; callers on an async
    /// executor should go through [`Dispatcher::predict_blocking`].
    pub fn predict(&self, task_id: &str, image: &[u8]) -> Result<PredictionResult, PredictionError> {
        let model = self.registry.get_model(task_id)?;
        let tensor = preprocess(image)?;
        let scores = infer(model.classifier(), &tensor, model.num_classes())?;
        let predictions = rank(&scores, model.labels(), model.top_k());

        if let Some(top) = predictions.first() {
            log::debug!(
                "Task '{}' predicted {} ({:.4})",
                model.id(),
                top.class,
                top.confidence
            );
        }
        Ok(PredictionResult {
            top_k: model.top_k(),
            predictions,
        })
    }

    /// Runs [`Dispatcher::predict`] on the blocking thread pool.
    pub async fn predict_blocking(
        &self,
        task_id: String,
        image: Vec<u8>,
    ) -> Result<PredictionResult, PredictionError> {
        let dispatcher = self.clone();
        actix_web::web::block(move || dispatcher.predict(&task_id, &image))
            .await
            .map_err(|e| PredictionError::Worker(e.to_string()))?
    }
}

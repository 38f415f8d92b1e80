use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Clone)]
pub struct PredictionRequest {
    /// Base64 encoded image bytes.
    pub image: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ClassPrediction {
    pub class: String,
    pub confidence: f32,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct HealthResponse {
    pub status: String,
}

impl HealthResponse {
    pub fn healthy() -> Self {
        Self {
            status: "healthy".into(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct TaskSummary {
    pub id: String,
    pub num_classes: usize,
    pub top_k: usize,
}

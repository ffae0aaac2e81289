use serde::{Deserialize, Serialize};

/// One ranked class returned by `/predict`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Prediction {
    pub label: String,
    /// Softmax probability in `[0, 1]`.
    pub confidence: f32,
}

/// Body of a successful `/predict` call, highest confidence first.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PredictionsResponse {
    pub predictions: Vec<Prediction>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct HealthResponse {
    pub status: String,
}

impl HealthResponse {
    pub fn ok() -> Self {
        Self {
            status: "ok".to_string(),
        }
    }
}

/// Error body. Clients read the `detail` field.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ErrorResponse {
    pub detail: String,
}

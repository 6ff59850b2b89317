use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Normalized (0-1) rectangle of a detected object, top-left origin.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Prediction {
    pub probability: f64,
    pub tag_id: usize,
    pub tag_name: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub bounding_box: Option<BoundingBox>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PredictionResponse {
    pub id: Uuid,
    pub project: String,
    pub iteration: String,
    pub created: DateTime<Utc>,
    pub predictions: Vec<Prediction>,
}

impl PredictionResponse {
    pub fn new(predictions: Vec<Prediction>) -> Self {
        Self {
            id: Uuid::new_v4(),
            project: String::new(),
            iteration: String::new(),
            created: Utc::now(),
            predictions,
        }
    }
}

/// Body of the `/url` routes.
#[derive(Debug, Deserialize)]
pub struct UrlRequest {
    #[serde(alias = "Url")]
    pub url: String,
}

/// Path captures of the aliased routes. Only ever logged.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteScope {
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub published_name: Option<String>,
}

use std::path::PathBuf;

use clap::Parser;

use crate::inference::InferenceSettings;
use crate::postprocess::DetectionParams;
use crate::preprocess::{TensorLayout, DEFAULT_INPUT_AREA, DEFAULT_STRIDE};

/// 4 MiB
pub const DEFAULT_MAX_BODY_BYTES: usize = 4 * 1024 * 1024;

/// Hosts an exported vision model behind prediction-API shaped routes.
#[derive(Debug, Clone, Parser)]
#[command(name = "customvision-host", version, about)]
pub struct Config {
    /// Frozen graph (.pb) or ONNX (.onnx) model file
    #[arg(long, env = "MODEL_PATH", default_value = "model.pb")]
    pub model: PathBuf,

    /// Newline-delimited label list, one tag per output class
    #[arg(long, env = "LABELS_PATH", default_value = "labels.txt")]
    pub labels: PathBuf,

    #[arg(long, env = "BIND_HOST", default_value = "0.0.0.0")]
    pub host: String,

    #[arg(long, env = "BIND_PORT", default_value_t = 80)]
    pub port: u16,

    /// Requests with a larger body are rejected before inference
    #[arg(long, env = "MAX_BODY_BYTES", default_value_t = DEFAULT_MAX_BODY_BYTES)]
    pub max_body_bytes: usize,

    /// Target width x height of the network input
    #[arg(long, env = "INPUT_AREA", default_value_t = DEFAULT_INPUT_AREA)]
    pub input_area: u32,

    /// Input sides are snapped to a multiple of this
    #[arg(long, env = "INPUT_STRIDE", default_value_t = DEFAULT_STRIDE)]
    pub stride: u32,

    /// Input tensor layout; derived from the model format when omitted
    #[arg(long, env = "INPUT_LAYOUT", value_enum)]
    pub layout: Option<TensorLayout>,

    /// Graph node to read predictions from
    #[arg(long, env = "OUTPUT_NAME")]
    pub output_name: Option<String>,

    #[arg(long, env = "PROB_THRESHOLD", default_value_t = 0.10)]
    pub prob_threshold: f32,

    #[arg(long, env = "IOU_THRESHOLD", default_value_t = 0.45)]
    pub iou_threshold: f32,

    #[arg(long, env = "MAX_DETECTIONS", default_value_t = 20)]
    pub max_detections: usize,

    /// HTTP worker threads (actix default when omitted)
    #[arg(long, env = "WORKERS")]
    pub workers: Option<usize>,

    /// Fallback tracing filter when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    pub log_filter: String,
}

impl Config {
    pub fn bind_addr(&self) -> (String, u16) {
        (self.host.clone(), self.port)
    }

    pub fn inference_settings(&self) -> InferenceSettings {
        InferenceSettings {
            input_area: self.input_area,
            stride: self.stride,
            layout: self.layout,
            output_name: self.output_name.clone(),
            detection: DetectionParams {
                prob_threshold: self.prob_threshold,
                iou_threshold: self.iou_threshold,
                max_detections: self.max_detections,
            },
        }
    }
}

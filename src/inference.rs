use std::fs;
use std::path::Path;

use image::DynamicImage;
use tracing::{debug, info, warn};
use tract_onnx::prelude::*;

use crate::error::{VisionError, VisionResult};
use crate::models::Prediction;
use crate::postprocess::{decode_output, DetectionParams};
use crate::preprocess::{
    resize_to, resize_to_area, square_dimensions, to_input_array, TensorLayout,
};

/// Node the object detection exports publish their region grid on.
const DETECTION_OUTPUT: &str = "model_outputs";

/// Anything that can turn a decoded image into predictions.
///
/// Implementations are shared read-only between HTTP workers.
pub trait Predictor: Send + Sync {
    fn predict(&self, image: &DynamicImage) -> VisionResult<Vec<Prediction>>;
}

#[derive(Debug, Clone)]
pub struct InferenceSettings {
    pub input_area: u32,
    pub stride: u32,
    pub layout: Option<TensorLayout>,
    pub output_name: Option<String>,
    pub detection: DetectionParams,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelFormat {
    /// Frozen TensorFlow `GraphDef`
    TensorFlow,
    Onnx,
}

impl ModelFormat {
    pub fn from_path(path: &Path) -> VisionResult<Self> {
        match path.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase) {
            Some(ext) if ext == "pb" => Ok(ModelFormat::TensorFlow),
            Some(ext) if ext == "onnx" => Ok(ModelFormat::Onnx),
            _ => Err(VisionError::Load(format!(
                "cannot tell the model format of {} (expected .pb or .onnx)",
                path.display()
            ))),
        }
    }

    pub fn default_layout(self) -> TensorLayout {
        match self {
            ModelFormat::TensorFlow => TensorLayout::Nhwc,
            ModelFormat::Onnx => TensorLayout::Nchw,
        }
    }
}

/// Reads one tag per line. Trailing blank lines are ignored, inner ones are
/// kept so tag ids stay aligned with the model's classes.
pub fn load_labels(path: &Path) -> VisionResult<Vec<String>> {
    let text = fs::read_to_string(path)
        .map_err(|e| VisionError::Load(format!("{}: {}", path.display(), e)))?;

    let mut labels: Vec<String> = text.lines().map(|l| l.trim().to_string()).collect();
    while labels.last().map_or(false, |l| l.is_empty()) {
        labels.pop();
    }
    if labels.is_empty() {
        return Err(VisionError::Load(format!("{} has no labels", path.display())));
    }
    Ok(labels)
}

/// Input height and width the plan was built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputSize {
    Dynamic,
    /// `(width, height)`
    Fixed(u32, u32),
}

type Plan = tract_core::prelude::TypedRunnableModel<tract_core::prelude::TypedModel>;

/// A graph loaded once at startup and executed for every request.
pub struct TractPredictor {
    plan: Plan,
    labels: Vec<String>,
    layout: TensorLayout,
    input_size: InputSize,
    settings: InferenceSettings,
}

impl TractPredictor {
    pub fn load(
        model_path: &Path,
        labels_path: &Path,
        settings: InferenceSettings,
    ) -> VisionResult<Self> {
        info!(path = %labels_path.display(), "loading labels");
        let labels = load_labels(labels_path)?;
        info!(count = labels.len(), "labels loaded");

        let format = ModelFormat::from_path(model_path)?;
        let layout = settings.layout.unwrap_or_else(|| format.default_layout());
        info!(path = %model_path.display(), ?format, ?layout, "loading model");

        let mut model = match format {
            ModelFormat::TensorFlow => tract_tensorflow::tensorflow().model_for_path(model_path),
            ModelFormat::Onnx => tract_onnx::onnx().model_for_path(model_path),
        }
        .map_err(load_error)?;

        let output_name = settings.output_name.clone().or_else(|| {
            (format == ModelFormat::TensorFlow && model.node_by_name(DETECTION_OUTPUT).is_ok())
                .then(|| DETECTION_OUTPUT.to_string())
        });
        if let Some(name) = &output_name {
            debug!(output = %name, "binding model output");
            model.set_output_names([name.as_str()]).map_err(load_error)?;
        }

        let (plan, input_size) = match build_plan(model.clone(), layout, None) {
            Ok(plan) => (plan, InputSize::Dynamic),
            Err(e) => {
                // Some graphs (global pooling over H*W) cannot be typed with
                // symbolic sides under tract; pin a square input instead.
                let (width, height) = square_dimensions(settings.input_area, settings.stride);
                warn!(
                    error = %format!("{:#}", e),
                    width, height, "graph rejects a variable input size, using a fixed one"
                );
                let plan = build_plan(model, layout, Some((width, height))).map_err(load_error)?;
                (plan, InputSize::Fixed(width, height))
            }
        };
        info!("model ready");

        Ok(Self {
            plan,
            labels,
            layout,
            input_size,
            settings,
        })
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn input_size(&self) -> InputSize {
        self.input_size
    }
}

/// `fixed` is `(width, height)`; `None` leaves both sides symbolic so every
/// request can use its own aspect-preserving size with the same plan.
fn build_plan(
    model: InferenceModel,
    layout: TensorLayout,
    fixed: Option<(u32, u32)>,
) -> TractResult<Plan> {
    let (height, width) = match fixed {
        Some((w, h)) => (TDim::Val(h as i64), TDim::Val(w as i64)),
        None => (
            TDim::Sym(model.symbol_table.sym("H")),
            TDim::Sym(model.symbol_table.sym("W")),
        ),
    };
    let shape: TVec<TDim> = match layout {
        TensorLayout::Nhwc => tvec!(TDim::Val(1), height, width, TDim::Val(3)),
        TensorLayout::Nchw => tvec!(TDim::Val(1), TDim::Val(3), height, width),
    };

    model
        .with_input_fact(0, InferenceFact::dt_shape(f32::datum_type(), shape))?
        .into_optimized()?
        .into_runnable()
}

impl Predictor for TractPredictor {
    fn predict(&self, image: &DynamicImage) -> VisionResult<Vec<Prediction>> {
        let resized = match self.input_size {
            InputSize::Dynamic => {
                resize_to_area(image, self.settings.input_area, self.settings.stride)?
            }
            InputSize::Fixed(width, height) => resize_to(image, (width, height))?,
        };
        info!(
            width = image.width(),
            height = image.height(),
            input_width = resized.width(),
            input_height = resized.height(),
            "predicting image"
        );

        let input = to_input_array(&resized, self.layout);
        let data = input
            .as_slice()
            .ok_or_else(|| VisionError::Inference("input tensor is not contiguous".into()))?;
        let tensor = Tensor::from_shape(input.shape(), data).map_err(inference_error)?;

        let outputs = self.plan.run(tvec!(tensor.into())).map_err(inference_error)?;
        let output = outputs
            .first()
            .ok_or_else(|| VisionError::Output("model produced no outputs".into()))?;
        let scores = output.as_slice::<f32>().map_err(inference_error)?;
        debug!(shape = ?output.shape(), "model output");

        decode_output(
            output.shape(),
            scores,
            &self.labels,
            self.layout,
            &self.settings.detection,
        )
    }
}

fn load_error(e: TractError) -> VisionError {
    VisionError::Load(format!("{:#}", e))
}

fn inference_error(e: TractError) -> VisionError {
    VisionError::Inference(format!("{:#}", e))
}

//! Maps raw output tensors onto tagged prediction records.
//!
//! Classification exports emit one probability per label. Detection exports
//! emit a YOLOv2-style region grid: for every cell and anchor, box offsets,
//! an objectness logit and one logit per label.

use ndarray::{ArrayView4, Axis};
use tracing::debug;

use crate::error::{VisionError, VisionResult};
use crate::models::{BoundingBox, Prediction};
use crate::preprocess::TensorLayout;

/// Anchor (width, height) priors in grid-cell units.
pub const ANCHORS: [(f32, f32); 5] = [
    (0.573, 0.677),
    (1.87, 2.06),
    (3.34, 5.47),
    (7.88, 3.53),
    (9.77, 9.17),
];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectionParams {
    pub prob_threshold: f32,
    pub iou_threshold: f32,
    pub max_detections: usize,
}

impl Default for DetectionParams {
    fn default() -> Self {
        Self {
            prob_threshold: 0.10,
            iou_threshold: 0.45,
            max_detections: 20,
        }
    }
}

/// Rank-4 outputs are detection grids, anything else is a score vector.
pub fn decode_output(
    shape: &[usize],
    data: &[f32],
    labels: &[String],
    layout: TensorLayout,
    params: &DetectionParams,
) -> VisionResult<Vec<Prediction>> {
    if shape.len() == 4 {
        decode_detections(shape, data, labels, layout, params)
    } else {
        decode_classification(data, labels)
    }
}

pub fn decode_classification(scores: &[f32], labels: &[String]) -> VisionResult<Vec<Prediction>> {
    if scores.len() != labels.len() {
        return Err(VisionError::Output(format!(
            "{} scores for {} labels",
            scores.len(),
            labels.len()
        )));
    }

    let mut predictions: Vec<Prediction> = scores
        .iter()
        .zip(labels)
        .enumerate()
        .map(|(tag_id, (&p, name))| Prediction {
            probability: round8(p),
            tag_id,
            tag_name: name.clone(),
            bounding_box: None,
        })
        .collect();
    predictions.sort_by(|a, b| b.probability.total_cmp(&a.probability));
    Ok(predictions)
}

pub fn decode_detections(
    shape: &[usize],
    data: &[f32],
    labels: &[String],
    layout: TensorLayout,
    params: &DetectionParams,
) -> VisionResult<Vec<Prediction>> {
    let view = ArrayView4::from_shape((shape[0], shape[1], shape[2], shape[3]), data)
        .map_err(|e| VisionError::Output(e.to_string()))?;
    if shape[0] != 1 {
        return Err(VisionError::Output(format!("expected a batch of 1, got {}", shape[0])));
    }

    let grid = view.index_axis_move(Axis(0), 0);
    let grid = match layout {
        TensorLayout::Nhwc => grid,
        TensorLayout::Nchw => grid.permuted_axes([1, 2, 0]),
    };
    let (height, width, channels) = grid.dim();

    let num_anchor = ANCHORS.len();
    if channels % num_anchor != 0 || channels / num_anchor < 5 {
        return Err(VisionError::Output(format!(
            "{} channels do not split into {} anchors",
            channels, num_anchor
        )));
    }
    let num_class = channels / num_anchor - 5;
    if num_class != labels.len() {
        return Err(VisionError::Output(format!(
            "model predicts {} classes but {} labels are loaded",
            num_class,
            labels.len()
        )));
    }

    let mut boxes = Vec::new();
    let mut class_probs = Vec::new();
    for y in 0..height {
        for x in 0..width {
            for (a, &(anchor_w, anchor_h)) in ANCHORS.iter().enumerate() {
                let base = a * (num_class + 5);
                let at = |i: usize| grid[[y, x, base + i]];

                let cx = (sigmoid(at(0)) + x as f32) / width as f32;
                let cy = (sigmoid(at(1)) + y as f32) / height as f32;
                let w = at(2).exp() * anchor_w / width as f32;
                let h = at(3).exp() * anchor_h / height as f32;
                let objectness = sigmoid(at(4));

                let logits: Vec<f32> = (0..num_class).map(|c| at(5 + c)).collect();
                let probs = softmax(&logits)
                    .into_iter()
                    .map(|p| p * objectness)
                    .collect::<Vec<_>>();

                boxes.push([cx - w / 2.0, cy - h / 2.0, w, h]);
                class_probs.push(probs);
            }
        }
    }

    // Drop weak candidates, strongest first.
    let mut index: Vec<usize> = (0..boxes.len())
        .filter(|&i| max_index(&class_probs[i]).1 > params.prob_threshold)
        .collect();
    index.sort_by(|&i, &j| max_index(&class_probs[j]).1.total_cmp(&max_index(&class_probs[i]).1));
    debug!(grid = ?(height, width), candidates = index.len(), "decoded region grid");

    let boxes: Vec<[f32; 4]> = index.iter().map(|&i| boxes[i]).collect();
    let class_probs: Vec<Vec<f32>> = index.iter().map(|&i| class_probs[i].clone()).collect();

    let selected = non_max_suppression(&boxes, class_probs, params);
    Ok(selected
        .into_iter()
        .map(|(i, tag_id, p)| {
            let [left, top, width, height] = boxes[i];
            Prediction {
                probability: round8(p),
                tag_id,
                tag_name: labels[tag_id].clone(),
                bounding_box: Some(BoundingBox {
                    left: round8(left),
                    top: round8(top),
                    width: round8(width),
                    height: round8(height),
                }),
            }
        })
        .collect())
}

/// Greedy per-class suppression. Each pick zeroes its class on every box that
/// overlaps it more than `iou_threshold` (itself included), so a suppressed
/// box may still be picked later for its next best class.
///
/// Returns `(box index, class, probability)` in selection order.
pub fn non_max_suppression(
    boxes: &[[f32; 4]],
    mut class_probs: Vec<Vec<f32>>,
    params: &DetectionParams,
) -> Vec<(usize, usize, f32)> {
    let max_detections = params.max_detections.min(boxes.len());
    let areas: Vec<f32> = boxes.iter().map(|b| b[2] * b[3]).collect();
    let mut best: Vec<(usize, f32)> = class_probs.iter().map(|p| max_index(p)).collect();

    let mut selected = Vec::new();
    while selected.len() < max_detections {
        let (i, &(class, prob)) = match best
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| a.1.total_cmp(&b.1))
        {
            Some(found) => found,
            None => break,
        };
        if prob < params.prob_threshold {
            break;
        }
        selected.push((i, class, prob));

        for j in 0..boxes.len() {
            if j == i || iou(&boxes[i], &boxes[j], areas[i], areas[j]) > params.iou_threshold {
                class_probs[j][class] = 0.0;
                best[j] = max_index(&class_probs[j]);
            }
        }
    }
    selected
}

fn iou(a: &[f32; 4], b: &[f32; 4], area_a: f32, area_b: f32) -> f32 {
    let x1 = a[0].max(b[0]);
    let y1 = a[1].max(b[1]);
    let x2 = (a[0] + a[2]).min(b[0] + b[2]);
    let y2 = (a[1] + a[3]).min(b[1] + b[3]);
    let overlap = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union = area_a + area_b - overlap;
    if union <= 0.0 {
        0.0
    } else {
        overlap / union
    }
}

fn max_index(values: &[f32]) -> (usize, f32) {
    values
        .iter()
        .copied()
        .enumerate()
        .fold((0, f32::NEG_INFINITY), |best, (i, v)| if v > best.1 { (i, v) } else { best })
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|&l| (l - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

fn round8(v: f32) -> f64 {
    (v as f64 * 1e8).round() / 1e8
}

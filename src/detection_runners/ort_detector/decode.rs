//! Raw DETR-style outputs to detections in source-image coordinates.
//!
//! Box convention: `pred_boxes` rows are `(cx, cy, w, h)`, normalized to the
//! model input (padding included). Class convention: with softmax heads the last
//! logit column is "no object" and never becomes a label.
//!
//! Queries whose box is not finite are dropped here, so every detection that
//! reaches the writer has real coordinates. Scores are left alone; a NaN score
//! is dropped by the threshold filter instead.

use anyhow::{bail, Result};
use ndarray::{Array2, ArrayView1, Axis};

use crate::common::{BBox, Detection, DetectionSet, ModelSpec, ScoreActivation};
use crate::detection_runners::image_ops::LetterboxTransform;

/// Outputs of one forward pass for a single image.
#[derive(Debug, Clone, PartialEq)]
pub struct RawOutput {
    /// `[queries, head_width]`
    pub logits: Array2<f32>,
    /// `[queries, 4]`
    pub boxes: Array2<f32>,
}

impl RawOutput {
    pub fn new(logits: Array2<f32>, boxes: Array2<f32>) -> Self {
        Self { logits, boxes }
    }

    pub fn num_queries(&self) -> usize {
        self.logits.nrows()
    }
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Numerically stable softmax of one row.
fn softmax(row: ArrayView1<f32>) -> Vec<f32> {
    let max = row.fold(f32::NEG_INFINITY, |m, &x| m.max(x));
    let exps: Vec<f32> = row.iter().map(|&x| (x - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// Best class and its score among the first `num_classes` entries.
///
/// NaN scores are kept: they fail every threshold comparison downstream.
fn best_class(scores: &[f32], num_classes: usize) -> (usize, f32) {
    let mut best = (0usize, f32::NAN);
    for (i, &s) in scores.iter().take(num_classes).enumerate() {
        if best.1.is_nan() || s > best.1 {
            best = (i, s);
        }
    }
    best
}

/// Scores one query row: `(class_id, confidence)`.
pub fn score_query(logits: ArrayView1<f32>, spec: &ModelSpec) -> (usize, f32) {
    match spec.activation {
        ScoreActivation::Softmax => best_class(&softmax(logits), spec.num_classes),
        ScoreActivation::Sigmoid => {
            let probs: Vec<f32> = logits.iter().map(|&x| sigmoid(x)).collect();
            best_class(&probs, spec.num_classes)
        }
    }
}

/// Converts raw outputs into an unfiltered detection set in source-image pixels.
pub fn decode(raw: &RawOutput, spec: &ModelSpec, transform: &LetterboxTransform) -> Result<DetectionSet> {
    if raw.logits.ncols() != spec.head_width() {
        bail!(
            "logits width {} does not match the {}-class head ({})",
            raw.logits.ncols(),
            spec.num_classes,
            spec.head_width()
        );
    }
    if raw.boxes.ncols() != 4 || raw.boxes.nrows() != raw.logits.nrows() {
        bail!(
            "pred_boxes shape {:?} does not pair with logits shape {:?}",
            raw.boxes.shape(),
            raw.logits.shape()
        );
    }

    let (in_w, in_h) = (transform.input_width as f32, transform.input_height as f32);
    let detections = raw
        .logits
        .axis_iter(Axis(0))
        .zip(raw.boxes.axis_iter(Axis(0)))
        .enumerate()
        .filter_map(|(query, (logits, b))| {
            // clamping would turn an infinite edge into a finite one, so check the raw row
            if !b.iter().all(|v| v.is_finite()) {
                log::debug!("Dropping query {query}: non-finite box {:?}", b.to_vec());
                return None;
            }
            let input_box = BBox::from_cxcy_wh(b[0] * in_w, b[1] * in_h, b[2] * in_w, b[3] * in_h);
            let bbox = transform.inverse_box(&input_box);
            let (class_id, confidence) = score_query(logits, spec);
            Some(Detection::new(class_id, spec.label(class_id), confidence, bbox))
        })
        .collect();

    Ok(detections)
}

use anyhow::Context;
use ndarray::{Axis, Ix2};

use crate::common::{InferenceDevice, ModelConfig, ModelSpec};
use crate::detection_runners::decode::RawOutput;
use crate::detection_runners::inference_process::DetectionModel;
use crate::detection_runners::input_wrapper::{PreparedTensor, X};
use crate::detection_runners::ort_detector::checkpoint::{
    discover_checkpoint, Checkpoint, LOGITS, PIXEL_MASK, PIXEL_VALUES, PRED_BOXES,
};
use crate::detection_runners::ort_detector::OrtEngine;
use crate::error::Result;

/// DETR-family detector exported to ONNX and run through ONNX Runtime.
#[derive(Debug)]
pub struct OrtDetr {
    engine: OrtEngine,
    spec: ModelSpec,
    input_hw: Option<(usize, usize)>,
}

impl OrtDetr {
    /// Finds, verifies and loads the checkpoint under `config.result_dir`.
    ///
    /// The graph is checked against `spec` before a runtime session is created.
    pub fn load(spec: ModelSpec, config: &ModelConfig) -> Result<Self> {
        let path = discover_checkpoint(&config.result_dir, &config.checkpoint_pattern, config.selection)?;
        log::info!("Using checkpoint {}", path.display());

        let checkpoint = Checkpoint::read(&path)?;
        checkpoint.verify(&spec)?;

        let input_hw = checkpoint.input(PIXEL_VALUES).and_then(|x| match x.dims.as_slice() {
            [_, _, Some(h), Some(w)] => Some((*h, *w)),
            _ => None,
        });

        let engine = OrtEngine::new(checkpoint, config.inference_device, config.ort_lib_path.as_deref())?;

        Ok(Self { engine, spec, input_hw })
    }

    /// `(height, width)` when the exported graph fixes the spatial input size.
    pub fn static_input_size(&self) -> Option<(usize, usize)> {
        self.input_hw
    }
}

/// Drops the batch axis of a `[1, rows, cols]` output.
fn first_of_batch(x: &X, name: &str) -> anyhow::Result<ndarray::Array2<f32>> {
    if x.ndim() != 3 || x.shape()[0] != 1 {
        anyhow::bail!("`{}` has shape {:?}, expected [1, _, _]", name, x.shape());
    }
    x.index_axis(Axis(0), 0)
        .to_owned()
        .into_dimensionality::<Ix2>()
        .with_context(|| format!("reshaping `{name}`"))
}

impl DetectionModel for OrtDetr {
    fn spec(&self) -> &ModelSpec {
        &self.spec
    }

    fn device(&self) -> InferenceDevice {
        self.engine.device()
    }

    fn forward(&mut self, x: &PreparedTensor) -> anyhow::Result<RawOutput> {
        let ys = self.engine.run(
            &[(PIXEL_VALUES, &x.pixel_values), (PIXEL_MASK, &x.pixel_mask)],
            &[LOGITS, PRED_BOXES],
        )?;
        let logits = ys.get(LOGITS).context("missing `logits` output")?;
        let boxes = ys.get(PRED_BOXES).context("missing `pred_boxes` output")?;

        Ok(RawOutput::new(first_of_batch(logits, LOGITS)?, first_of_batch(boxes, PRED_BOXES)?))
    }
}

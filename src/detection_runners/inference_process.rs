use anyhow::Result;

use crate::common::{InferenceDevice, ModelSpec};
use crate::detection_runners::decode::RawOutput;
use crate::detection_runners::input_wrapper::PreparedTensor;

/// A loaded detector in evaluation mode.
///
/// `forward` takes `&mut self` because runtime sessions need exclusive access to
/// run; implementations never change their parameters.
pub trait DetectionModel {
    /// Architecture the model was built from.
    fn spec(&self) -> &ModelSpec;

    /// Where the forward pass runs. May differ from the requested device after a fallback.
    fn device(&self) -> InferenceDevice;

    /// One forward pass on a prepared single-image batch.
    fn forward(&mut self, x: &PreparedTensor) -> Result<RawOutput>;
}

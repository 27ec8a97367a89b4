//! Batch driver: one model, images processed strictly one after another.
//!
//! `Idle -> ModelLoaded -> (Processing(i) | Skipped(i))... -> Done`. Unreadable images
//! and failed writes move to `Skipped(i)` and the batch carries on with the next
//! image; every other error ends the batch.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::common::{InferenceDevice, InputImage};
use crate::data::{Stage, TimeCalc};
use crate::detection_processing::filter_by_confidence;
use crate::detection_runners::decode::decode;
use crate::detection_runners::image_ops::{prepare, PreprocessConfig};
use crate::detection_runners::inference_process::DetectionModel;
use crate::error::{InferError, Result};
use crate::result_writer::ResultWriter;
use crate::utils;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    ModelLoaded,
    Processing(usize),
    /// Image `i` produced no artifact; the next image moves back to `Processing`.
    Skipped(usize),
    Done,
}

/// Everything a per-image call needs besides the model.
#[derive(Debug, Clone)]
pub struct InferenceContext {
    pub threshold: f32,
    pub preprocess: PreprocessConfig,
    /// Requested device. The loaded model reports where it actually runs.
    pub device: InferenceDevice,
    pub writer: ResultWriter,
}

impl InferenceContext {
    pub fn new(threshold: f32, preprocess: PreprocessConfig, device: InferenceDevice, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            threshold,
            preprocess,
            device,
            writer: ResultWriter::new(output_dir),
        }
    }

    pub fn with_writer(mut self, writer: ResultWriter) -> Self {
        self.writer = writer;
        self
    }

    pub fn input_size(&self) -> (u32, u32) {
        self.preprocess.input_size
    }

    pub fn output_dir(&self) -> &Path {
        self.writer.output_dir()
    }
}

/// An image that produced no artifact, and why.
#[derive(Debug, Clone, PartialEq)]
pub struct SkipRecord {
    pub image: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub processed: usize,
    pub skipped: Vec<SkipRecord>,
    /// Set when the batch stopped early at a cancellation request.
    pub cancelled: bool,
    pub timings: TimeCalc,
}

impl RunSummary {
    pub fn log(&self) {
        log::info!(
            "Processed: {} | Skipped: {}{}",
            self.processed,
            self.skipped.len(),
            if self.cancelled { " | Cancelled" } else { "" }
        );
        for skip in self.skipped.iter() {
            log::warn!("Skipped {}: {}", skip.image.display(), skip.reason);
        }
        if self.timings.n() > 0 {
            log::info!("> Avg per image {:.2?} | {}", self.timings.avg(), self.timings.summary());
        }
    }
}

pub struct Pipeline<M: DetectionModel> {
    model: Option<M>,
    ctx: InferenceContext,
    state: PipelineState,
    timings: TimeCalc,
}

impl<M: DetectionModel> Pipeline<M> {
    pub fn new(ctx: InferenceContext) -> Self {
        Self {
            model: None,
            ctx,
            state: PipelineState::Idle,
            timings: TimeCalc::default(),
        }
    }

    /// A pipeline whose model is already loaded.
    pub fn with_model(model: M, ctx: InferenceContext) -> Self {
        Self {
            model: Some(model),
            ctx,
            state: PipelineState::ModelLoaded,
            timings: TimeCalc::default(),
        }
    }

    /// Loads the model. Only valid once, from `Idle`.
    pub fn load<F>(&mut self, loader: F) -> Result<()>
    where
        F: FnOnce() -> Result<M>,
    {
        if self.state != PipelineState::Idle {
            return Err(InferError::Config(format!("model cannot be loaded in state {:?}", self.state)));
        }
        let model = loader()?;
        let spec = model.spec();
        if model.device() != self.ctx.device {
            log::warn!("Requested {} but the model runs on {}", self.ctx.device, model.device());
        }
        log::info!(
            "Model loaded: {} | {} classes | {} queries | device {}",
            spec.model_type,
            spec.num_classes,
            spec.num_queries,
            model.device()
        );
        self.model = Some(model);
        self.state = PipelineState::ModelLoaded;
        Ok(())
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn context(&self) -> &InferenceContext {
        &self.ctx
    }

    pub fn model(&self) -> Option<&M> {
        self.model.as_ref()
    }

    /// The device of the loaded model, or the requested one before loading.
    pub fn device(&self) -> InferenceDevice {
        self.model.as_ref().map_or(self.ctx.device, |m| m.device())
    }

    /// Runs one image end to end and returns the path of its result record.
    pub fn run_inference(&mut self, path: &Path) -> Result<PathBuf> {
        let model = match self.model.as_mut() {
            Some(model) => model,
            None => return Err(InferError::Config("no model loaded".to_string())),
        };
        let detect_time = Instant::now();

        let t = Instant::now();
        let image = InputImage::open(path)?;
        self.timings.add(Stage::Load, t.elapsed());
        let mut _detect_elapsed = utils::trace("TIME", "Loading image", detect_time, Duration::ZERO);

        let t = Instant::now();
        let x = prepare(&image, &self.ctx.preprocess)?;
        self.timings.add(Stage::Preprocess, t.elapsed());
        _detect_elapsed = utils::trace("TIME", "Preprocessing input", detect_time, _detect_elapsed);

        let t = Instant::now();
        let raw = model.forward(&x)?;
        self.timings.add(Stage::Forward, t.elapsed());
        _detect_elapsed = utils::trace("TIME", "Detection run", detect_time, _detect_elapsed);

        let t = Instant::now();
        let all = decode(&raw, model.spec(), &x.transform)?;
        let kept = filter_by_confidence(&all, self.ctx.threshold);
        self.timings.add(Stage::Decode, t.elapsed());
        _detect_elapsed = utils::trace("TIME", "Postprocessing", detect_time, _detect_elapsed);

        let t = Instant::now();
        let written = self.ctx.writer.write(&image, &kept, self.ctx.threshold)?;
        self.timings.add(Stage::Write, t.elapsed());
        utils::trace("TIME", "Writing results", detect_time, _detect_elapsed);

        self.timings.tick();
        log::debug!(
            "{}: {} of {} candidates kept at {}",
            path.display(),
            kept.len(),
            all.len(),
            self.ctx.threshold
        );
        Ok(written)
    }

    /// Runs image `index` of a batch. Per-image failures come back as a skip and
    /// leave the pipeline in `Skipped(index)`; fatal errors are returned.
    pub fn process_image(&mut self, index: usize, path: &Path) -> Result<Option<SkipRecord>> {
        if self.model.is_none() {
            return Err(InferError::Config("no model loaded".to_string()));
        }
        self.state = PipelineState::Processing(index);

        match self.run_inference(path) {
            Ok(_) => Ok(None),
            Err(e) if !e.is_fatal() => {
                log::warn!("{e}");
                self.state = PipelineState::Skipped(index);
                Ok(Some(SkipRecord {
                    image: path.to_path_buf(),
                    reason: e.to_string(),
                }))
            }
            Err(e) => Err(e),
        }
    }

    /// Runs every path in order. `cancel` is only consulted between images.
    pub fn run_batch(&mut self, paths: &[PathBuf], cancel: &AtomicBool) -> Result<RunSummary> {
        if self.model.is_none() {
            return Err(InferError::Config("no model loaded".to_string()));
        }
        let mut summary = RunSummary::default();

        for (i, path) in paths.iter().enumerate() {
            if cancel.load(Ordering::SeqCst) {
                log::warn!("Cancelled after {} of {} images", i, paths.len());
                summary.cancelled = true;
                break;
            }
            match self.process_image(i, path) {
                Ok(None) => summary.processed += 1,
                Ok(Some(skip)) => summary.skipped.push(skip),
                Err(e) => {
                    self.state = PipelineState::Done;
                    return Err(e);
                }
            }
        }

        self.state = PipelineState::Done;
        summary.timings = self.timings.clone();
        Ok(summary)
    }

    /// Releases the model and its device memory.
    pub fn finish(self) {
        if let Some(model) = self.model {
            drop(model);
            log::debug!("Model released");
        }
    }
}

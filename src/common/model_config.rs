use std::path::PathBuf;
use serde::{Deserialize, Serialize};
use crate::common::InferenceDevice;

pub const DEFAULT_CHECKPOINT_PATTERN: &str = "*best.onnx";

/// What to do when more than one file matches the checkpoint pattern.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointSelection {
    /// Exactly one match is required.
    #[default] Unique,
    /// Greatest file name wins.
    Lexicographic,
    /// Newest modification time wins, ties broken by file name.
    MostRecent,
}

/// Everything the checkpoint loader needs to build a model once at startup.
#[derive(Debug, Clone)]
pub struct ModelConfig {
    /// Training run directory holding `config.json` and the exported checkpoint.
    pub result_dir: PathBuf,
    pub checkpoint_pattern: String,
    pub selection: CheckpointSelection,
    pub ort_lib_path: Option<PathBuf>,
    pub inference_device: InferenceDevice,
}

impl ModelConfig {
    pub fn new(result_dir: impl Into<PathBuf>, inference_device: InferenceDevice) -> Self {
        Self {
            result_dir: result_dir.into(),
            checkpoint_pattern: DEFAULT_CHECKPOINT_PATTERN.to_string(),
            selection: CheckpointSelection::default(),
            ort_lib_path: None,
            inference_device,
        }
    }

    pub fn with_pattern(mut self, pattern: &str) -> Self {
        self.checkpoint_pattern = pattern.to_string();
        self
    }

    pub fn with_selection(mut self, selection: CheckpointSelection) -> Self {
        self.selection = selection;
        self
    }

    pub fn with_ort_lib_path(mut self, path: Option<PathBuf>) -> Self {
        self.ort_lib_path = path;
        self
    }

    pub fn architecture_path(&self) -> PathBuf {
        self.result_dir.join("config.json")
    }
}

impl std::fmt::Display for ModelConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Result Dir: {}\n\
        Checkpoint Pattern: {} ({:?})\n\
        OnnxRuntime Lib Path: {}\n\
        Inference Device: {}",
               self.result_dir.display(), self.checkpoint_pattern, self.selection,
               self.ort_lib_path.as_ref().map(|p| p.display().to_string()).unwrap_or_else(|| "<default>".into()),
               self.inference_device)
    }
}

//! Run configuration: `inference_config.toml` plus the training run's `train_config.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::common::{CheckpointSelection, InferenceDevice, ModelConfig, DEFAULT_CHECKPOINT_PATTERN};
use crate::detection_processing::valid_threshold;
use crate::detection_runners::image_ops::{PreprocessConfig, ResizeMode, DEFAULT_FILL, IMAGENET_MEAN, IMAGENET_STD};
use crate::error::{InferError, Result};

pub const DEFAULT_CONFIG_PATH: &str = "./config/inference_config.toml";
pub const TRAIN_CONFIG_FILE: &str = "train_config.toml";

pub fn load_toml_config<T>(path: &Path) -> Result<T>
where
    T: DeserializeOwned,
{
    let content = fs::read_to_string(path)
        .map_err(|e| InferError::Config(format!("Failed to read config {}: {e}", path.display())))?;

    toml::from_str(&content)
        .map_err(|e| InferError::Config(format!("Failed to parse config {}: {e}", path.display())))
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ParameterSection {
    pub threshold: f32,
}

/// `[preprocess]`. Missing keys take the `PreprocessConfig::new` defaults.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PreprocessSection {
    pub mode: ResizeMode,
    pub mean: [f32; 3],
    pub std: [f32; 3],
    pub fill: u8,
    pub center: bool,
}

impl Default for PreprocessSection {
    fn default() -> Self {
        Self {
            mode: ResizeMode::default(),
            mean: IMAGENET_MEAN,
            std: IMAGENET_STD,
            fill: DEFAULT_FILL,
            center: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ModelSection {
    #[serde(default = "default_pattern")]
    pub checkpoint_pattern: String,
    #[serde(default)]
    pub selection: CheckpointSelection,
    #[serde(default)]
    pub ort_lib_path: Option<PathBuf>,
    /// Accelerator kind used when `gpu >= 0`: `cuda`, `tensorrt` or `coreml`.
    #[serde(default = "default_device_kind")]
    pub device_kind: String,
}

fn default_pattern() -> String { DEFAULT_CHECKPOINT_PATTERN.to_string() }
fn default_device_kind() -> String { "cuda".to_string() }

impl Default for ModelSection {
    fn default() -> Self {
        Self {
            checkpoint_pattern: default_pattern(),
            selection: CheckpointSelection::default(),
            ort_lib_path: None,
            device_kind: default_device_kind(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct OutputSection {
    #[serde(default)]
    pub save_visualization: bool,
}

/// Contents of `inference_config.toml`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InferenceConfig {
    pub train_result_path: PathBuf,
    pub input_path: PathBuf,
    /// Empty means `<train_result_path>/inference`.
    #[serde(default)]
    pub output_path: String,
    /// Accelerator index, negative for CPU.
    #[serde(default)]
    pub gpu: i32,
    #[serde(default)]
    pub seed: u64,
    pub parameter: ParameterSection,
    #[serde(default)]
    pub preprocess: PreprocessSection,
    #[serde(default)]
    pub model: ModelSection,
    #[serde(default)]
    pub output: OutputSection,
}

impl InferenceConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let cfg: Self = load_toml_config(path)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let cfg: Self = toml::from_str(text).map_err(|e| InferError::Config(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if !valid_threshold(self.parameter.threshold) {
            return Err(InferError::Config(format!(
                "threshold must be within [0, 1], got {}",
                self.parameter.threshold
            )));
        }
        self.device()?;
        Ok(())
    }

    pub fn with_threshold(mut self, threshold: f32) -> Result<Self> {
        self.parameter.threshold = threshold;
        self.validate()?;
        Ok(self)
    }

    pub fn with_gpu(mut self, gpu: i32) -> Self {
        self.gpu = gpu;
        self
    }

    pub fn threshold(&self) -> f32 {
        self.parameter.threshold
    }

    pub fn output_dir(&self) -> PathBuf {
        if self.output_path.trim().is_empty() {
            self.train_result_path.join("inference")
        } else {
            PathBuf::from(&self.output_path)
        }
    }

    pub fn device(&self) -> Result<InferenceDevice> {
        InferenceDevice::from_gpu_index(&self.model.device_kind, self.gpu)
            .ok_or_else(|| InferError::Config(format!("unknown device kind `{}`", self.model.device_kind)))
    }

    pub fn model_config(&self) -> Result<ModelConfig> {
        Ok(ModelConfig::new(&self.train_result_path, self.device()?)
            .with_pattern(&self.model.checkpoint_pattern)
            .with_selection(self.model.selection)
            .with_ort_lib_path(self.model.ort_lib_path.clone()))
    }

    /// Preprocessing for a model trained at `input_size` `(height, width)`.
    pub fn preprocess_config(&self, input_size: (u32, u32)) -> Result<PreprocessConfig> {
        let p = &self.preprocess;
        let cfg = PreprocessConfig {
            input_size,
            mode: p.mode,
            mean: p.mean,
            std: p.std,
            fill: p.fill,
            center: p.center,
        };
        cfg.validate().map_err(|e| InferError::Config(e.to_string()))?;
        Ok(cfg)
    }
}

/// `input_size` as written by training: a single side or `[height, width]`.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum InputSize {
    Square(u32),
    Pair([u32; 2]),
}

impl InputSize {
    pub fn hw(&self) -> (u32, u32) {
        match *self {
            InputSize::Square(s) => (s, s),
            InputSize::Pair([h, w]) => (h, w),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TrainParameters {
    pub input_size: InputSize,
}

/// The subset of `train_config.toml` inference depends on. Other keys are ignored.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TrainConfig {
    pub parameters: TrainParameters,
}

impl TrainConfig {
    pub fn load(result_dir: &Path) -> Result<Self> {
        load_toml_config(&result_dir.join(TRAIN_CONFIG_FILE))
    }

    pub fn input_size(&self) -> (u32, u32) {
        self.parameters.input_size.hw()
    }
}

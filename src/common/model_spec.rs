use std::collections::BTreeMap;
use std::path::Path;
use serde::Deserialize;
use crate::error::{InferError, Result};

/// How raw class logits become `[0, 1]` confidences.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreActivation {
    /// Softmax over `num_classes + 1` logits, the trailing one being "no object".
    Softmax,
    /// Independent sigmoid per class, no "no object" column.
    Sigmoid,
}

impl ScoreActivation {
    pub fn from_model_type(model_type: &str) -> Option<Self> {
        match model_type.to_lowercase().as_str() {
            "detr" | "conditional_detr" | "table-transformer" => Some(ScoreActivation::Softmax),
            "deformable_detr" | "rt_detr" | "dab_detr" => Some(ScoreActivation::Sigmoid),
            _ => None,
        }
    }
}

// Mirror of the training run's `config.json`. Unknown keys are ignored.
#[derive(Debug, Deserialize)]
struct ModelSpecFile {
    #[serde(default = "default_model_type")]
    model_type: String,
    #[serde(default)]
    num_labels: Option<usize>,
    #[serde(default)]
    id2label: Option<BTreeMap<String, String>>,
    #[serde(default = "default_num_queries")]
    num_queries: usize,
    #[serde(default = "default_d_model")]
    d_model: usize,
    #[serde(default = "default_layers")]
    encoder_layers: usize,
    #[serde(default = "default_layers")]
    decoder_layers: usize,
    #[serde(default = "default_num_channels")]
    num_channels: usize,
}

fn default_model_type() -> String { "detr".to_string() }
fn default_num_queries() -> usize { 100 }
fn default_d_model() -> usize { 256 }
fn default_layers() -> usize { 6 }
fn default_num_channels() -> usize { 3 }

/// Architecture hyperparameters of a trained detector. Immutable once resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelSpec {
    pub model_type: String,
    pub num_classes: usize,
    pub num_queries: usize,
    pub d_model: usize,
    pub encoder_layers: usize,
    pub decoder_layers: usize,
    pub num_channels: usize,
    pub activation: ScoreActivation,
    names: Vec<String>,
}

impl ModelSpec {
    /// A plain DETR spec with generated class names.
    pub fn detr(num_classes: usize, num_queries: usize) -> Self {
        Self {
            model_type: default_model_type(),
            num_classes,
            num_queries,
            d_model: default_d_model(),
            encoder_layers: default_layers(),
            decoder_layers: default_layers(),
            num_channels: default_num_channels(),
            activation: ScoreActivation::Softmax,
            names: n2s(num_classes),
        }
    }

    pub fn with_names(mut self, names: &[&str]) -> Self {
        self.names = names.iter().map(|x| x.to_string()).collect();
        self.num_classes = self.names.len();
        self
    }

    pub fn with_activation(mut self, activation: ScoreActivation) -> Self {
        self.activation = activation;
        self
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| InferError::Config(format!("failed to read {}: {e}", path.display())))?;
        Self::from_json_str(&text)
            .map_err(|e| InferError::Config(format!("{}: {e}", path.display())))
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        let raw: ModelSpecFile = serde_json::from_str(text)
            .map_err(|e| InferError::Config(format!("invalid model config: {e}")))?;

        let activation = ScoreActivation::from_model_type(&raw.model_type).ok_or_else(|| {
            InferError::Config(format!("unsupported model_type `{}`", raw.model_type))
        })?;

        let id2label = match raw.id2label {
            Some(map) => {
                let mut parsed = BTreeMap::new();
                for (k, v) in map {
                    let id: usize = k.trim().parse().map_err(|_| {
                        InferError::Config(format!("id2label key `{k}` is not a class index"))
                    })?;
                    parsed.insert(id, v);
                }
                Some(parsed)
            }
            None => None,
        };

        let num_classes = match (raw.num_labels, &id2label) {
            (Some(n), Some(map)) if n != map.len() => {
                return Err(InferError::Config(format!(
                    "num_labels ({n}) disagrees with id2label ({} entries)",
                    map.len()
                )))
            }
            (Some(n), _) => n,
            (None, Some(map)) => map.len(),
            (None, None) => {
                return Err(InferError::Config(
                    "model config declares neither num_labels nor id2label".to_string(),
                ))
            }
        };
        if num_classes == 0 {
            return Err(InferError::Config("model config declares zero classes".to_string()));
        }

        let names = match id2label {
            Some(map) => (0..num_classes)
                .map(|i| map.get(&i).cloned().unwrap_or_else(|| format!("# {}", i)))
                .collect(),
            None => n2s(num_classes),
        };

        Ok(Self {
            model_type: raw.model_type,
            num_classes,
            num_queries: raw.num_queries,
            d_model: raw.d_model,
            encoder_layers: raw.encoder_layers,
            decoder_layers: raw.decoder_layers,
            num_channels: raw.num_channels,
            activation,
            names,
        })
    }

    /// Width of the classification head's output.
    pub fn head_width(&self) -> usize {
        match self.activation {
            ScoreActivation::Softmax => self.num_classes + 1,
            ScoreActivation::Sigmoid => self.num_classes,
        }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn label(&self, class_id: usize) -> &str {
        self.names.get(class_id).map(String::as_str).unwrap_or("Unknown")
    }
}

fn n2s(n: usize) -> Vec<String> {
    (0..n).map(|x| format!("# {}", x)).collect::<Vec<String>>()
}

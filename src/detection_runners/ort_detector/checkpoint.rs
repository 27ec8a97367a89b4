//! Checkpoint discovery and architecture verification.
//!
//! An exported checkpoint is inspected through its ONNX graph before any runtime
//! session exists, so a checkpoint that disagrees with `config.json` is rejected
//! without touching the device.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use prost::Message;
use regex::Regex;

use crate::common::{CheckpointSelection, ModelSpec};
use crate::detection_runners::ort_detector::onnx;
use crate::error::{InferError, Result};

pub const LOGITS: &str = "logits";
pub const PRED_BOXES: &str = "pred_boxes";
pub const PIXEL_VALUES: &str = "pixel_values";
pub const PIXEL_MASK: &str = "pixel_mask";

const CLASS_HEAD_WEIGHT: &str = "class_labels_classifier.weight";
const CLASS_HEAD_BIAS: &str = "class_labels_classifier.bias";
const QUERY_EMBEDDINGS: &str = "query_position_embeddings.weight";

/// Name, element type and shape of one graph input or output. `None` marks a dynamic axis.
#[derive(Debug, Clone, PartialEq)]
pub struct TensorAttr {
    pub name: String,
    pub elem_type: i32,
    pub dims: Vec<Option<usize>>,
}

/// A serialized model: its bytes plus what the graph says about its shape.
///
/// Owned by the loader until the runtime session is built from it, then dropped.
#[derive(Debug)]
pub struct Checkpoint {
    pub path: PathBuf,
    bytes: Vec<u8>,
    params: BTreeMap<String, Vec<usize>>,
    inputs: Vec<TensorAttr>,
    outputs: Vec<TensorAttr>,
    opset: i64,
    n_params: usize,
}

impl Checkpoint {
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)?;
        Self::from_bytes(path, bytes)
    }

    pub fn from_bytes<P: AsRef<Path>>(path: P, bytes: Vec<u8>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let proto = onnx::ModelProto::decode(bytes.as_slice())
            .map_err(|e| anyhow::anyhow!("failed to decode ONNX model {}: {}", path.display(), e))?;
        let graph = match &proto.graph {
            Some(graph) => graph,
            None => return Err(anyhow::anyhow!("no graph found in {}", path.display()).into()),
        };

        let mut params = BTreeMap::new();
        let mut n_params = 0usize;
        for tensor in graph.initializer.iter() {
            let dims: Vec<usize> = tensor.dims.iter().map(|&d| d.max(0) as usize).collect();
            n_params += dims.iter().product::<usize>();
            params.insert(tensor.name.clone(), dims);
        }

        // Older exporters list initializers among the graph inputs as well.
        let inputs = io_from_value_info(&graph.input)
            .into_iter()
            .filter(|x| !params.contains_key(&x.name))
            .collect();
        let outputs = io_from_value_info(&graph.output);
        let opset = proto
            .opset_import
            .iter()
            .find(|o| o.domain.is_empty() || o.domain == "ai.onnx")
            .map(|o| o.version)
            .unwrap_or_default();

        Ok(Self {
            path,
            bytes,
            params,
            inputs,
            outputs,
            opset,
            n_params,
        })
    }

    /// Checks the graph against the architecture from `config.json`.
    pub fn verify(&self, spec: &ModelSpec) -> Result<()> {
        let head = spec.head_width();
        let queries = spec.num_queries;

        let pixels = self.input(PIXEL_VALUES).ok_or_else(|| missing(PIXEL_VALUES, "graph input"))?;
        expect_dims(pixels, &[None, Some(spec.num_channels), None, None])?;

        let logits = self.output(LOGITS).ok_or_else(|| missing(LOGITS, "graph output"))?;
        expect_dims(logits, &[None, Some(queries), Some(head)])?;

        let boxes = self.output(PRED_BOXES).ok_or_else(|| missing(PRED_BOXES, "graph output"))?;
        expect_dims(boxes, &[None, Some(queries), Some(4)])?;

        if let Some(dims) = self.params.get(CLASS_HEAD_WEIGHT) {
            if dims.len() != 2 || dims[0] != head || dims[1] != spec.d_model {
                return Err(mismatch(CLASS_HEAD_WEIGHT, &fmt_static(&[head, spec.d_model]), &fmt_static(dims)));
            }
        }
        if let Some(dims) = self.params.get(CLASS_HEAD_BIAS) {
            if dims.as_slice() != [head] {
                return Err(mismatch(CLASS_HEAD_BIAS, &fmt_static(&[head]), &fmt_static(dims)));
            }
        }
        if let Some(dims) = self.params.get(QUERY_EMBEDDINGS) {
            if dims.as_slice() != [queries, spec.d_model] {
                return Err(mismatch(QUERY_EMBEDDINGS, &fmt_static(&[queries, spec.d_model]), &fmt_static(dims)));
            }
        }

        log::debug!(
            "Checkpoint {} matches {} ({} classes, {} queries)",
            self.path.display(),
            spec.model_type,
            spec.num_classes,
            queries
        );
        Ok(())
    }

    pub fn input(&self, name: &str) -> Option<&TensorAttr> {
        self.inputs.iter().find(|x| x.name == name)
    }

    pub fn output(&self, name: &str) -> Option<&TensorAttr> {
        self.outputs.iter().find(|x| x.name == name)
    }

    pub fn inputs(&self) -> &[TensorAttr] {
        &self.inputs
    }

    pub fn param_shape(&self, name: &str) -> Option<&[usize]> {
        self.params.get(name).map(Vec::as_slice)
    }

    pub fn opset(&self) -> i64 {
        self.opset
    }

    pub fn parameters(&self) -> usize {
        self.n_params
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

fn io_from_value_info(value_info: &[onnx::ValueInfoProto]) -> Vec<TensorAttr> {
    let mut attrs = Vec::new();
    for v in value_info.iter() {
        let tensor = match v.r#type.as_ref().and_then(|t| t.value.as_ref()) {
            Some(onnx::TypeValue::TensorType(tensor)) => tensor,
            None => continue,
        };
        let dims = match &tensor.shape {
            Some(shape) => shape
                .dim
                .iter()
                .map(|d| match &d.value {
                    Some(onnx::DimensionValue::DimValue(x)) if *x > 0 => Some(*x as usize),
                    _ => None,
                })
                .collect(),
            None => Vec::new(),
        };
        attrs.push(TensorAttr {
            name: v.name.clone(),
            elem_type: tensor.elem_type,
            dims,
        });
    }
    attrs
}

fn expect_dims(attr: &TensorAttr, expected: &[Option<usize>]) -> Result<()> {
    // A graph without shape info cannot contradict anything.
    if attr.dims.is_empty() {
        return Ok(());
    }
    let agrees = attr.dims.len() == expected.len()
        && attr.dims.iter().zip(expected).all(|(a, e)| match (a, e) {
            (Some(a), Some(e)) => a == e,
            _ => true,
        });
    if agrees {
        Ok(())
    } else {
        Err(mismatch(&attr.name, &fmt_dims(expected), &fmt_dims(&attr.dims)))
    }
}

fn mismatch(tensor: &str, expected: &str, actual: &str) -> InferError {
    InferError::ArchitectureMismatch {
        tensor: tensor.to_string(),
        expected: expected.to_string(),
        actual: actual.to_string(),
    }
}

fn missing(tensor: &str, what: &str) -> InferError {
    mismatch(tensor, what, "missing")
}

fn fmt_dims(dims: &[Option<usize>]) -> String {
    let parts: Vec<String> = dims
        .iter()
        .map(|d| d.map(|x| x.to_string()).unwrap_or_else(|| "?".to_string()))
        .collect();
    format!("[{}]", parts.join(", "))
}

fn fmt_static(dims: &[usize]) -> String {
    format!("{:?}", dims)
}

/// Compiles a file-name glob (`*`, `?`) into an anchored regex.
pub fn glob_to_regex(pattern: &str) -> Result<Regex> {
    let mut re = String::from("^");
    for c in pattern.chars() {
        match c {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            c => re.push_str(&regex::escape(&c.to_string())),
        }
    }
    re.push('$');
    Regex::new(&re).map_err(|e| InferError::Config(format!("invalid checkpoint pattern `{pattern}`: {e}")))
}

/// Finds the checkpoint in `dir` whose file name matches `pattern`.
///
/// Candidates are sorted by file name first, so the outcome never depends on
/// directory iteration order.
pub fn discover_checkpoint(dir: &Path, pattern: &str, selection: CheckpointSelection) -> Result<PathBuf> {
    let re = glob_to_regex(pattern)?;
    let not_found = || InferError::CheckpointNotFound {
        dir: dir.to_path_buf(),
        pattern: pattern.to_string(),
    };

    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(not_found()),
        Err(e) => return Err(e.into()),
    };

    let mut candidates = Vec::new();
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name();
        if re.is_match(&name.to_string_lossy()) {
            candidates.push(entry.path());
        }
    }
    candidates.sort();

    match (candidates.len(), selection) {
        (0, _) => Err(not_found()),
        (1, _) => Ok(candidates.remove(0)),
        (_, CheckpointSelection::Unique) => Err(InferError::AmbiguousCheckpoint {
            pattern: pattern.to_string(),
            candidates,
        }),
        (_, CheckpointSelection::Lexicographic) => Ok(candidates.pop().unwrap_or_default()),
        (_, CheckpointSelection::MostRecent) => {
            let mut newest: Option<(std::time::SystemTime, PathBuf)> = None;
            for path in candidates {
                let modified = std::fs::metadata(&path)?.modified()?;
                // >= keeps the later (greater) name on ties since candidates are sorted
                if newest.as_ref().map_or(true, |(t, _)| modified >= *t) {
                    newest = Some((modified, path));
                }
            }
            newest.map(|(_, p)| p).ok_or_else(not_found)
        }
    }
}

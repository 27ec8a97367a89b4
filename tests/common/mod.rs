#![allow(dead_code)]

use std::cell::Cell;
use std::path::Path;
use std::rc::Rc;

use image::{Rgb, RgbImage};
use ndarray::Array2;
use prost::Message;

use detr_batch::common::{InferenceDevice, ModelSpec};
use detr_batch::detection_runners::decode::RawOutput;
use detr_batch::detection_runners::inference_process::DetectionModel;
use detr_batch::detection_runners::input_wrapper::PreparedTensor;
use detr_batch::detection_runners::onnx::{
    data_type, Dimension, DimensionValue, GraphProto, ModelProto, OperatorSetIdProto, TensorProto,
    TensorShapeProto, TensorTypeProto, TypeProto, TypeValue, ValueInfoProto,
};

/// Returns the same raw output for every image and counts forward passes.
pub struct ScriptedModel {
    pub spec: ModelSpec,
    pub output: RawOutput,
    pub calls: Rc<Cell<usize>>,
    pub expect_hw: Option<(usize, usize)>,
    pub fail: bool,
    pub device: InferenceDevice,
}

impl ScriptedModel {
    pub fn new(spec: ModelSpec, logits: Array2<f32>, boxes: Array2<f32>) -> Self {
        Self {
            spec,
            output: RawOutput::new(logits, boxes),
            calls: Rc::new(Cell::new(0)),
            expect_hw: None,
            fail: false,
            device: InferenceDevice::CPU,
        }
    }

    pub fn expecting_input(mut self, h: usize, w: usize) -> Self {
        self.expect_hw = Some((h, w));
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    pub fn on_device(mut self, device: InferenceDevice) -> Self {
        self.device = device;
        self
    }
}

impl DetectionModel for ScriptedModel {
    fn spec(&self) -> &ModelSpec {
        &self.spec
    }

    fn device(&self) -> InferenceDevice {
        self.device
    }

    fn forward(&mut self, x: &PreparedTensor) -> anyhow::Result<RawOutput> {
        self.calls.set(self.calls.get() + 1);
        if self.fail {
            anyhow::bail!("device lost");
        }
        if let Some((h, w)) = self.expect_hw {
            assert_eq!(x.pixel_values.shape(), &[1, 3, h, w]);
            assert_eq!(x.pixel_mask.shape(), &[1, h, w]);
        }
        Ok(self.output.clone())
    }
}

/// Three queries against cat/dog/bird with a trailing no-object logit:
/// a confident dog (~0.95), a background query and a weak cat (~0.37).
pub fn three_class_model() -> ScriptedModel {
    let spec = ModelSpec::detr(3, 3).with_names(&["cat", "dog", "bird"]);
    let logits = ndarray::array![
        [0.0, 4.0, 0.0, 0.0],
        [0.0, 0.0, 0.0, 5.0],
        [1.0, 0.0, 0.0, 1.0],
    ];
    let boxes = ndarray::array![
        [0.5, 0.375, 0.25, 0.1875],
        [0.2, 0.2, 0.1, 0.1],
        [0.7, 0.3, 0.2, 0.2],
    ];
    ScriptedModel::new(spec, logits, boxes)
}

pub fn write_png(path: &Path, w: u32, h: u32) {
    let img = RgbImage::from_fn(w, h, |x, y| Rgb([(x % 256) as u8, (y % 256) as u8, 128]));
    img.save(path).unwrap();
}

pub fn write_garbage(path: &Path) {
    std::fs::write(path, b"this is not an image at all").unwrap();
}

fn dim(d: Option<i64>) -> Dimension {
    Dimension {
        value: Some(match d {
            Some(v) => DimensionValue::DimValue(v),
            None => DimensionValue::DimParam("dyn".to_string()),
        }),
    }
}

fn value_info(name: &str, elem_type: i32, dims: &[Option<i64>]) -> ValueInfoProto {
    ValueInfoProto {
        name: name.to_string(),
        r#type: Some(TypeProto {
            value: Some(TypeValue::TensorType(TensorTypeProto {
                elem_type,
                shape: Some(TensorShapeProto {
                    dim: dims.iter().map(|d| dim(*d)).collect(),
                }),
            })),
        }),
    }
}

fn initializer(name: &str, dims: &[i64]) -> TensorProto {
    TensorProto {
        dims: dims.to_vec(),
        data_type: data_type::FLOAT,
        name: name.to_string(),
    }
}

/// Shapes a synthetic DETR export declares.
#[derive(Debug, Clone)]
pub struct GraphShapes {
    pub queries: Option<i64>,
    pub head: Option<i64>,
    pub d_model: i64,
    pub head_weight: Option<(i64, i64)>,
    pub query_embed: Option<(i64, i64)>,
    pub with_boxes: bool,
}

impl GraphShapes {
    /// A graph consistent with `ModelSpec::detr(num_classes, queries)`.
    pub fn detr(num_classes: i64, queries: i64) -> Self {
        Self {
            queries: Some(queries),
            head: Some(num_classes + 1),
            d_model: 256,
            head_weight: Some((num_classes + 1, 256)),
            query_embed: Some((queries, 256)),
            with_boxes: true,
        }
    }
}

pub fn onnx_bytes(shapes: &GraphShapes) -> Vec<u8> {
    let mut initializers = vec![initializer("backbone.conv1.weight", &[64, 3, 7, 7])];
    if let Some((h, d)) = shapes.head_weight {
        initializers.push(initializer("class_labels_classifier.weight", &[h, d]));
        initializers.push(initializer("class_labels_classifier.bias", &[h]));
    }
    if let Some((q, d)) = shapes.query_embed {
        initializers.push(initializer("query_position_embeddings.weight", &[q, d]));
    }

    let mut outputs = vec![value_info("logits", data_type::FLOAT, &[None, shapes.queries, shapes.head])];
    if shapes.with_boxes {
        outputs.push(value_info("pred_boxes", data_type::FLOAT, &[None, shapes.queries, Some(4)]));
    }

    let model = ModelProto {
        ir_version: 8,
        producer_name: "pytorch".to_string(),
        producer_version: "2.1.0".to_string(),
        model_version: 0,
        graph: Some(GraphProto {
            name: "main_graph".to_string(),
            initializer: initializers,
            input: vec![
                value_info("pixel_values", data_type::FLOAT, &[None, Some(3), None, None]),
                value_info("pixel_mask", data_type::INT64, &[None, None, None]),
                // older exporters repeat initializers among the inputs
                value_info("backbone.conv1.weight", data_type::FLOAT, &[Some(64), Some(3), Some(7), Some(7)]),
            ],
            output: outputs,
        }),
        opset_import: vec![OperatorSetIdProto {
            domain: String::new(),
            version: 17,
        }],
        metadata_props: vec![],
    };
    model.encode_to_vec()
}

pub fn write_onnx(path: &Path, shapes: &GraphShapes) {
    std::fs::write(path, onnx_bytes(shapes)).unwrap();
}

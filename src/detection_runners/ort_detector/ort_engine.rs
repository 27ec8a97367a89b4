//! ONNX Runtime session owned by a loaded detector.

use std::collections::BTreeMap;
use std::path::Path;
use anyhow::Result;
use half::{bf16, f16};
use ndarray::{Array, IxDyn};
use ort::{
    execution_providers::{ExecutionProvider,
                          CPUExecutionProvider,
                          CUDAExecutionProvider,
                          TensorRTExecutionProvider,
                          CoreMLExecutionProvider},
    session::builder::{GraphOptimizationLevel, SessionBuilder},
    session::{Session, SessionInputValue},
    value::{DynValue, Tensor},
};

use crate::common::InferenceDevice;
use crate::data::CROSS_MARK;
use crate::detection_runners::input_wrapper::X;
use crate::detection_runners::ort_detector::checkpoint::{Checkpoint, TensorAttr};
use crate::detection_runners::ort_detector::onnx::data_type;
use crate::utils::human_bytes;

/// ONNXRuntime Backend
#[derive(Debug)]
pub struct OrtEngine {
    session: Session,
    device: InferenceDevice,
    inputs_attrs: Vec<TensorAttr>,
}

impl OrtEngine {
    /// Builds a session from the checkpoint on `device`, consuming the checkpoint bytes.
    ///
    /// Accelerators that fail to register fall back to CPU with a warning.
    pub fn new(checkpoint: Checkpoint, device: InferenceDevice, ort_lib_path: Option<&Path>) -> Result<Self> {
        if let Some(lib) = ort_lib_path {
            let ort_init = ort::init_from(lib.to_string_lossy().to_string());
            match ort_init.commit() {
                Ok(_) => {},
                Err(e) => {
                    return Err(anyhow::anyhow!("Failed to commit ORT from {}: {:?}", lib.display(), e));
                }
            };
        }

        let mut builder = Session::builder()?;

        let mut device = device;
        match device {
            InferenceDevice::TensorRT(device_id) => {
                Self::build_trt(&mut builder, device_id).unwrap_or_else(|err| {
                    log::warn!("{err}, Using cpu");
                    device = InferenceDevice::CPU;
                })
            }
            InferenceDevice::CUDA(device_id) => {
                Self::build_cuda(&mut builder, device_id).unwrap_or_else(|err| {
                    log::warn!("{err}, Using cpu");
                    device = InferenceDevice::CPU;
                })
            }
            InferenceDevice::CoreML(_) => Self::build_coreml(&mut builder).unwrap_or_else(|err| {
                log::warn!("{err}, Using cpu");
                device = InferenceDevice::CPU;
            }),
            InferenceDevice::CPU => {
                Self::build_cpu(&mut builder)?;
            }
        }

        let inputs_attrs = checkpoint.inputs().to_vec();
        let params = checkpoint.parameters();
        let opset = checkpoint.opset();
        let path = checkpoint.path.clone();
        let bytes = checkpoint.into_bytes();

        let session = builder
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .commit_from_memory(&bytes)?;
        drop(bytes);

        log::info!(
            "Backend: ONNXRuntime | Model: {} | Opset: {} | Device: {} | Params: {}",
            path.display(),
            opset,
            device,
            human_bytes(params as f64),
        );

        Ok(Self {
            session,
            device,
            inputs_attrs,
        })
    }

    fn build_trt(builder: &mut SessionBuilder, device_id: usize) -> Result<()> {
        let trt = TensorRTExecutionProvider::default()
            .with_device_id(device_id as i32)
            .with_fp16(false)
            .with_engine_cache(true)
            .with_engine_cache_path("trt-cache");
        if trt.is_available()? {
            match trt.register(builder) {
                Ok(_) => { }
                Err(err) => { anyhow::bail!("{CROSS_MARK} TensorRT initialization failed: {:?}", err) }
            }
            log::info!("Initial model serialization with TensorRT may take some time...");
            Ok(())
        } else {
            anyhow::bail!("{CROSS_MARK} TensorRT execution provider not available")
        }
    }

    fn build_cuda(builder: &mut SessionBuilder, device_id: usize) -> Result<()> {
        let ep = CUDAExecutionProvider::default()
            .with_device_id(device_id as i32);
        if ep.is_available()? {
            match ep.register(builder) {
                Ok(_) => { }
                Err(err) => { anyhow::bail!("{CROSS_MARK} CUDA initialization failed: {:?}", err) }
            }
            Ok(())
        } else {
            anyhow::bail!("{CROSS_MARK} CUDA execution provider not available")
        }
    }

    fn build_coreml(builder: &mut SessionBuilder) -> Result<()> {
        let ep = CoreMLExecutionProvider::default();
        if ep.is_available()? {
            match ep.register(builder) {
                Ok(_) => { }
                Err(err) => { anyhow::bail!("{CROSS_MARK} CoreML initialization failed: {:?}", err) }
            }
            Ok(())
        } else {
            anyhow::bail!("{CROSS_MARK} CoreML execution provider not available")
        }
    }

    fn build_cpu(builder: &mut SessionBuilder) -> Result<()> {
        let ep = CPUExecutionProvider::default();
        if ep.is_available()? {
            match ep.register(builder) {
                Ok(_) => { }
                Err(err) => { anyhow::bail!("{CROSS_MARK} CPU initialization failed: {:?}", err) }
            }
            Ok(())
        } else {
            anyhow::bail!("{CROSS_MARK} CPU execution provider not available")
        }
    }

    fn tensor_preprocess(x: &X, elem_type: i32) -> Result<DynValue> {
        let x = match elem_type {
            data_type::FLOAT => Tensor::from_array(x.0.clone())?.into_dyn(),
            data_type::DOUBLE => Tensor::from_array(x.mapv(|x_| x_ as f64))?.into_dyn(),
            data_type::FLOAT16 => Tensor::from_array(x.mapv(f16::from_f32))?.into_dyn(),
            data_type::BFLOAT16 => Tensor::from_array(x.mapv(bf16::from_f32))?.into_dyn(),
            data_type::INT8 => Tensor::from_array(x.mapv(|x_| x_ as i8))?.into_dyn(),
            data_type::INT32 => Tensor::from_array(x.mapv(|x_| x_ as i32))?.into_dyn(),
            data_type::INT64 => Tensor::from_array(x.mapv(|x_| x_ as i64))?.into_dyn(),
            data_type::UINT8 => Tensor::from_array(x.mapv(|x_| x_ as u8))?.into_dyn(),
            data_type::BOOL => Tensor::from_array(x.mapv(|x_| x_ != 0.))?.into_dyn(),
            other => anyhow::bail!("Unsupported model input element type: {}", other),
        };
        Ok(x)
    }

    fn tensor_postprocess(x: &DynValue) -> Result<Array<f32, IxDyn>> {
        if let Ok(y) = x.try_extract_array::<f32>() {
            return Ok(y.view().into_owned());
        }
        if let Ok(y) = x.try_extract_array::<f16>() {
            return Ok(y.view().mapv(f16::to_f32));
        }
        let y = x.try_extract_array::<f64>()?;
        Ok(y.view().mapv(|v| v as f32))
    }

    /// Runs the session on named inputs and returns the requested outputs as `f32`.
    ///
    /// Inputs the graph does not declare are dropped, so optional inputs such as a
    /// pixel mask can be offered unconditionally.
    pub fn run(&mut self, xs: &[(&str, &X)], output_names: &[&str]) -> Result<BTreeMap<String, X>> {
        let mut feeds: Vec<(String, SessionInputValue<'static>)> = Vec::new();
        for attr in self.inputs_attrs.iter() {
            let x = match xs.iter().find(|(name, _)| *name == attr.name) {
                Some((_, x)) => *x,
                None => anyhow::bail!("No value supplied for model input `{}`", attr.name),
            };
            feeds.push((attr.name.clone(), SessionInputValue::from(Self::tensor_preprocess(x, attr.elem_type)?)));
        }

        let outputs = self.session.run(feeds)?;

        let mut ys = BTreeMap::new();
        for name in output_names {
            let y = Self::tensor_postprocess(&outputs[*name])?;
            ys.insert(name.to_string(), X::from(y));
        }
        Ok(ys)
    }

    /// The device the session actually runs on, after any CPU fallback.
    pub fn device(&self) -> InferenceDevice {
        self.device
    }
}

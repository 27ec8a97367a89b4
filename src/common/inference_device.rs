use serde::{Deserialize, Serialize};

/// Execution target for the forward pass. Chosen once per process and passed by value.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InferenceDevice {
    #[default] CPU,
    CUDA(usize),
    TensorRT(usize),
    CoreML(usize),
}

// Hardcoded device names, as written in config files and logs.
const CPU: &str = "cpu";
const CUDA: &str = "cuda";
const TENSOR_RT: &str = "tensorrt";
const CORE_ML: &str = "coreml";

impl InferenceDevice {
    pub fn from_str(device: &str, device_id: usize) -> Option<Self> {
        match device.to_lowercase().as_str() {
            CPU => Some(InferenceDevice::CPU),
            CUDA => Some(InferenceDevice::CUDA(device_id)),
            TENSOR_RT => Some(InferenceDevice::TensorRT(device_id)),
            CORE_ML => Some(InferenceDevice::CoreML(device_id)),
            _ => None,
        }
    }

    /// Maps the training-style `gpu` index onto a device. Negative means CPU.
    pub fn from_gpu_index(kind: &str, gpu: i32) -> Option<Self> {
        if gpu < 0 {
            return Some(InferenceDevice::CPU);
        }
        Self::from_str(kind, gpu as usize)
    }

    pub fn str_lowercase(&self) -> &'static str {
        match self {
            InferenceDevice::CPU => CPU,
            InferenceDevice::CUDA(_) => CUDA,
            InferenceDevice::TensorRT(_) => TENSOR_RT,
            InferenceDevice::CoreML(_) => CORE_ML,
        }
    }

    pub fn device_id(&self) -> Option<usize> {
        match self {
            InferenceDevice::CPU => None,
            InferenceDevice::CUDA(id) | InferenceDevice::TensorRT(id) | InferenceDevice::CoreML(id) => Some(*id),
        }
    }
}

impl std::fmt::Display for InferenceDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.device_id() {
            Some(id) => write!(f, "{}:{}", self.str_lowercase(), id),
            None => f.write_str(self.str_lowercase()),
        }
    }
}

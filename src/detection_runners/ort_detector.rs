pub mod onnx;
pub mod checkpoint;
pub mod decode;
pub mod image_ops;
pub mod input_wrapper;
mod ort_engine;
mod ort_detr;

pub use ort_engine::*;
pub use ort_detr::*;

//! Batch object-detection inference for DETR-family checkpoints exported to ONNX.

mod utils;
mod colours;
pub mod common;
pub mod config;
pub mod data;
pub mod detection_processing;
pub mod detection_runners;
pub mod error;
pub mod pipeline;
pub mod result_writer;

pub use colours::Palette;
pub use error::{InferError, Result};

mod bbox;
mod detection;
mod inference_device;
mod input_image;
mod model_config;
mod model_spec;

pub use bbox::*;
pub use detection::*;
pub use inference_device::*;
pub use input_image::*;
pub use model_config::*;
pub use model_spec::*;

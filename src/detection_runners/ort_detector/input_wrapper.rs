use anyhow::Result;
use ndarray::{Array, IxDyn};
use crate::detection_runners::ort_detector::image_ops::LetterboxTransform;

/// Model input, wrapper over [`Array<f32, IxDyn>`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct X(pub Array<f32, IxDyn>);

impl From<Array<f32, IxDyn>> for X {
    fn from(x: Array<f32, IxDyn>) -> Self {
        Self(x)
    }
}

impl std::ops::Deref for X {
    type Target = Array<f32, IxDyn>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl X {
    pub fn from_shape_vec(shape: &[usize], xs: Vec<f32>) -> Result<Self> {
        Ok(Self::from(Array::from_shape_vec(shape, xs)?))
    }

    pub fn ndim(&self) -> usize {
        self.0.ndim()
    }
}

/// Fixed-geometry model input for one image plus the mapping back to source pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedTensor {
    /// `[1, 3, H, W]`, normalized.
    pub pixel_values: X,
    /// `[1, H, W]`, 1 over image content and 0 over padding.
    pub pixel_mask: X,
    pub transform: LetterboxTransform,
}

impl PreparedTensor {
    pub fn input_size(&self) -> (u32, u32) {
        (self.transform.input_height, self.transform.input_width)
    }
}

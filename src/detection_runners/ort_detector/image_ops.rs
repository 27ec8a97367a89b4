//! Functions to preprocess images.

use anyhow::{bail, Result};
use fast_image_resize::{
    images::{CroppedImageMut, Image as FirImage},
    pixels::PixelType,
    FilterType, ResizeAlg, ResizeOptions, Resizer,
};
use ndarray::{Array2, Array3, Axis};
use rayon::prelude::*;
use serde::Deserialize;

use crate::common::{BBox, InputImage};
use crate::detection_runners::input_wrapper::{PreparedTensor, X};

pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];
/// Grey used for letterbox padding.
pub const DEFAULT_FILL: u8 = 114;

/// Resize mode enum.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResizeMode {
    /// Scale each axis independently to the target size.
    Stretch,
    /// Preserve aspect ratio and pad the remainder.
    #[default] Letterbox,
}

/// Training-time input geometry and normalization statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct PreprocessConfig {
    /// Target `(height, width)`.
    pub input_size: (u32, u32),
    pub mode: ResizeMode,
    pub mean: [f32; 3],
    pub std: [f32; 3],
    pub fill: u8,
    pub center: bool,
}

impl PreprocessConfig {
    pub fn new(height: u32, width: u32) -> Self {
        Self {
            input_size: (height, width),
            mode: ResizeMode::default(),
            mean: IMAGENET_MEAN,
            std: IMAGENET_STD,
            fill: DEFAULT_FILL,
            center: false,
        }
    }

    pub fn with_mode(mut self, mode: ResizeMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_center(mut self, center: bool) -> Self {
        self.center = center;
        self
    }

    pub fn with_stats(mut self, mean: [f32; 3], std: [f32; 3]) -> Self {
        self.mean = mean;
        self.std = std;
        self
    }

    pub fn validate(&self) -> Result<()> {
        let (h, w) = self.input_size;
        if h == 0 || w == 0 {
            bail!("input_size must be non-zero, got {}x{}", h, w);
        }
        if self.std.iter().any(|s| !s.is_finite() || *s <= 0.) {
            bail!("normalization std must be positive, got {:?}", self.std);
        }
        if self.mean.iter().any(|m| !m.is_finite()) {
            bail!("normalization mean must be finite, got {:?}", self.mean);
        }
        Ok(())
    }
}

/// Scale and padding applied to go from source pixels to model-input pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LetterboxTransform {
    pub scale_x: f32,
    pub scale_y: f32,
    pub pad_left: f32,
    pub pad_top: f32,
    pub orig_width: u32,
    pub orig_height: u32,
    pub input_width: u32,
    pub input_height: u32,
}

impl LetterboxTransform {
    pub fn forward(&self, x: f32, y: f32) -> (f32, f32) {
        (x * self.scale_x + self.pad_left, y * self.scale_y + self.pad_top)
    }

    pub fn inverse(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_left) / self.scale_x, (y - self.pad_top) / self.scale_y)
    }

    pub fn forward_box(&self, b: &BBox) -> BBox {
        let (x1, y1) = self.forward(b.x1, b.y1);
        let (x2, y2) = self.forward(b.x2, b.y2);
        BBox::new(x1, y1, x2, y2)
    }

    /// Maps a model-input box back to source pixels, clamped to the source image.
    pub fn inverse_box(&self, b: &BBox) -> BBox {
        let (x1, y1) = self.inverse(b.x1, b.y1);
        let (x2, y2) = self.inverse(b.x2, b.y2);
        BBox::new(x1, y1, x2, y2).clamp_to(self.orig_width as f32, self.orig_height as f32)
    }

    /// Region of the model input covered by the source image: `(left, top, width, height)`.
    fn content_rect(&self) -> (u32, u32, u32, u32) {
        let w = (self.orig_width as f32 * self.scale_x).round() as u32;
        let h = (self.orig_height as f32 * self.scale_y).round() as u32;
        (self.pad_left as u32, self.pad_top as u32, w, h)
    }
}

/// Computes the transform without touching pixels.
pub fn plan_transform(orig_width: u32, orig_height: u32, cfg: &PreprocessConfig) -> LetterboxTransform {
    let (target_h, target_w) = cfg.input_size;
    let (new_w, new_h) = match cfg.mode {
        ResizeMode::Stretch => (target_w, target_h),
        ResizeMode::Letterbox => {
            let scale = (target_w as f32 / orig_width as f32).min(target_h as f32 / orig_height as f32);
            (
                ((orig_width as f32 * scale).round() as u32).clamp(1, target_w),
                ((orig_height as f32 * scale).round() as u32).clamp(1, target_h),
            )
        }
    };
    let (left, top) = if cfg.center {
        ((target_w - new_w) / 2, (target_h - new_h) / 2)
    } else {
        (0, 0)
    };

    LetterboxTransform {
        scale_x: new_w as f32 / orig_width as f32,
        scale_y: new_h as f32 / orig_height as f32,
        pad_left: left as f32,
        pad_top: top as f32,
        orig_width,
        orig_height,
        input_width: target_w,
        input_height: target_h,
    }
}

/// Main preprocessing entry point.
pub fn prepare(image: &InputImage, cfg: &PreprocessConfig) -> Result<PreparedTensor> {
    if image.img_width == 0 || image.img_height == 0 {
        bail!("cannot preprocess an empty image");
    }
    let transform = plan_transform(image.img_width, image.img_height, cfg);

    let src = FirImage::from_vec_u8(
        image.img_width,
        image.img_height,
        image.image.as_raw().clone(),
        PixelType::U8x3,
    )?;
    let options = ResizeOptions::new().resize_alg(ResizeAlg::Convolution(FilterType::Bilinear));
    let mut resizer = Resizer::new();
    let resized = letterbox_image(&src, &transform, cfg.fill, &mut resizer, &options)?;

    let pixel_values = normalize_nchw(&resized, &cfg.mean, &cfg.std)?;
    let pixel_mask = content_mask(&transform);

    Ok(PreparedTensor {
        pixel_values,
        pixel_mask,
        transform,
    })
}

fn letterbox_image<'a>(
    img: &FirImage,
    transform: &LetterboxTransform,
    bg: u8,
    resizer: &mut Resizer,
    resize_options: &ResizeOptions,
) -> Result<FirImage<'a>> {
    let (target_w, target_h) = (transform.input_width, transform.input_height);
    let (left, top, new_w, new_h) = transform.content_rect();

    let mut padded = FirImage::from_vec_u8(
        target_w,
        target_h,
        vec![bg; (target_w * target_h * 3) as usize],
        PixelType::U8x3,
    )?;

    let mut cropped = CroppedImageMut::new(&mut padded, left, top, new_w, new_h)?;
    resizer.resize(img, &mut cropped, resize_options)?;

    Ok(padded)
}

fn normalize_nchw(img: &FirImage, mean: &[f32; 3], std: &[f32; 3]) -> Result<X> {
    let buf = img.buffer();
    let w = img.width() as usize;
    let h = img.height() as usize;

    if buf.len() != w * h * 3 {
        bail!("Unexpected buffer size: got {}, expected {}", buf.len(), w * h * 3);
    }

    let mut chw = Array3::<f32>::zeros((3, h, w));
    chw.axis_iter_mut(Axis(0))
        .into_par_iter()
        .enumerate()
        .for_each(|(c, mut plane)| {
            for ((y, x), v) in plane.indexed_iter_mut() {
                let px = buf[3 * (y * w + x) + c] as f32 / 255.0;
                *v = (px - mean[c]) / std[c];
            }
        });

    Ok(X::from(chw.insert_axis(Axis(0)).into_dyn()))
}

fn content_mask(transform: &LetterboxTransform) -> X {
    let (left, top, new_w, new_h) = transform.content_rect();
    let (left, top) = (left as usize, top as usize);
    let mut mask = Array2::<f32>::zeros((transform.input_height as usize, transform.input_width as usize));
    mask.slice_mut(ndarray::s![top..top + new_h as usize, left..left + new_w as usize])
        .fill(1.0);
    X::from(mask.insert_axis(Axis(0)).into_dyn())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn solid(w: u32, h: u32, px: [u8; 3]) -> InputImage {
        InputImage::from_rgb("solid.png", RgbImage::from_pixel(w, h, Rgb(px)))
    }

    #[test]
    fn letterbox_keeps_aspect_and_pads_bottom_right() {
        let t = plan_transform(640, 480, &PreprocessConfig::new(800, 800));
        assert_eq!(t.scale_x, 1.25);
        assert_eq!(t.scale_y, 1.25);
        assert_eq!((t.pad_left, t.pad_top), (0., 0.));
        assert_eq!(t.content_rect(), (0, 0, 800, 600));
    }

    #[test]
    fn centered_letterbox_splits_padding() {
        let t = plan_transform(640, 480, &PreprocessConfig::new(800, 800).with_center(true));
        assert_eq!((t.pad_left, t.pad_top), (0., 100.));
    }

    #[test]
    fn stretch_scales_axes_independently() {
        let cfg = PreprocessConfig::new(320, 320).with_mode(ResizeMode::Stretch);
        let t = plan_transform(640, 480, &cfg);
        assert_eq!(t.scale_x, 0.5);
        assert!((t.scale_y - 320. / 480.).abs() < 1e-6);
    }

    #[test]
    fn box_round_trip_within_tolerance() {
        for cfg in [
            PreprocessConfig::new(800, 800),
            PreprocessConfig::new(800, 800).with_center(true),
            PreprocessConfig::new(512, 768).with_mode(ResizeMode::Stretch),
            PreprocessConfig::new(333, 517).with_center(true),
        ] {
            let t = plan_transform(640, 480, &cfg);
            let truth = BBox::new(100., 50., 300., 420.);
            let back = t.inverse_box(&t.forward_box(&truth));
            for (a, b) in [(back.x1, truth.x1), (back.y1, truth.y1), (back.x2, truth.x2), (back.y2, truth.y2)] {
                assert!((a - b).abs() < 1e-3, "{:?} -> {:?} with {:?}", truth, back, cfg);
            }
        }
    }

    #[test]
    fn prepared_tensor_has_exact_geometry_and_stats() {
        let cfg = PreprocessConfig::new(64, 48).with_stats([0.5, 0.5, 0.5], [0.5, 0.25, 1.0]);
        let prepared = prepare(&solid(40, 20, [255, 255, 0]), &cfg).unwrap();
        assert_eq!(prepared.pixel_values.shape(), &[1, 3, 64, 48]);
        assert_eq!(prepared.pixel_mask.shape(), &[1, 64, 48]);

        // content occupies the top 24 rows (20 * 48/40)
        let near = |a: f32, b: f32| (a - b).abs() < 0.02;
        assert!(near(prepared.pixel_values[[0, 0, 0, 0]], 1.0));
        assert!(near(prepared.pixel_values[[0, 1, 10, 10]], 2.0));
        assert!(near(prepared.pixel_values[[0, 2, 10, 10]], -0.5));
        assert_eq!(prepared.pixel_mask[[0, 23, 47]], 1.0);
        assert_eq!(prepared.pixel_mask[[0, 24, 0]], 0.0);
        assert_eq!(prepared.pixel_mask.iter().filter(|&&m| m == 1.0).count(), 24 * 48);
    }

    #[test]
    fn invalid_geometry_is_rejected() {
        assert!(PreprocessConfig::new(0, 800).validate().is_err());
        assert!(PreprocessConfig::new(800, 800).with_stats(IMAGENET_MEAN, [0.2, 0., 0.2]).validate().is_err());
        assert!(PreprocessConfig::new(800, 800).validate().is_ok());
    }
}

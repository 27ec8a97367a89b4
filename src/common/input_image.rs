use std::path::{Path, PathBuf};
use image::{DynamicImage, ImageReader, RgbImage};
use crate::error::{InferError, Result};

/// Decoded source image plus its native resolution. Lives for one inference call.
#[derive(Debug, Clone)]
pub struct InputImage {
    pub path: PathBuf,
    pub image: RgbImage,
    pub img_width: u32,
    pub img_height: u32,
}

impl InputImage {
    /// Decodes `path`, sniffing the format from content rather than the extension.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let reader = ImageReader::open(path)
            .map_err(|e| InferError::unreadable(path, e))?
            .with_guessed_format()
            .map_err(|e| InferError::unreadable(path, e))?;
        if reader.format().is_none() {
            return Err(InferError::unreadable(path, "unrecognized image format"));
        }
        let image = reader.decode().map_err(|e| InferError::unreadable(path, e))?;
        if image.width() == 0 || image.height() == 0 {
            return Err(InferError::unreadable(path, "image has zero extent"));
        }
        Ok(Self::from_dynamic(path, image))
    }

    pub fn from_dynamic<P: AsRef<Path>>(path: P, image: DynamicImage) -> Self {
        Self::from_rgb(path, image.to_rgb8())
    }

    pub fn from_rgb<P: AsRef<Path>>(path: P, image: RgbImage) -> Self {
        let (img_width, img_height) = image.dimensions();
        Self {
            path: path.as_ref().to_path_buf(),
            image,
            img_width,
            img_height,
        }
    }
}

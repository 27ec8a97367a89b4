//! Per-image result persistence.
//!
//! Every artifact is written to a sibling `.tmp` file and renamed into place, so
//! an image's output is either complete or absent.

use std::fs;
use std::path::{Path, PathBuf};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;
use serde::{Deserialize, Serialize};

use crate::colours::Palette;
use crate::common::{Detection, InputImage};
use crate::error::{InferError, Result};

/// The JSON document written for one image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub image: String,
    pub width: u32,
    pub height: u32,
    pub threshold: f32,
    pub detections: Vec<Detection>,
}

#[derive(Debug, Clone)]
pub struct ResultWriter {
    output_dir: PathBuf,
    palette: Option<Palette>,
}

impl ResultWriter {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            palette: None,
        }
    }

    /// Also draw boxes onto a PNG copy of every image, coloured per class.
    pub fn with_visualization(mut self, palette: Palette) -> Self {
        self.palette = Some(palette);
        self
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// `<output_dir>/<file name>.json`
    pub fn record_path(&self, image_path: &Path) -> Result<PathBuf> {
        let name = file_name(image_path)?;
        Ok(self.output_dir.join(format!("{name}.json")))
    }

    /// `<output_dir>/<stem>_<ext>.png`
    pub fn visualization_path(&self, image_path: &Path) -> Result<PathBuf> {
        let stem = image_path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .ok_or_else(|| InferError::write_failure(image_path, "input path has no file name"))?;
        let name = match image_path.extension() {
            Some(ext) => format!("{stem}_{}.png", ext.to_string_lossy()),
            None => format!("{stem}.png"),
        };
        Ok(self.output_dir.join(name))
    }

    /// Persists the filtered detections of one image and returns the record path.
    pub fn write(&self, image: &InputImage, detections: &[Detection], threshold: f32) -> Result<PathBuf> {
        let record = ResultRecord {
            image: file_name(&image.path)?,
            width: image.img_width,
            height: image.img_height,
            threshold,
            detections: detections.to_vec(),
        };
        let path = self.record_path(&image.path)?;
        let mut bytes = serde_json::to_vec_pretty(&record).map_err(|e| InferError::write_failure(&path, e))?;
        bytes.push(b'\n');

        // The record is committed last; a skipped image must not leave one behind.
        let mut staged = Vec::with_capacity(2);
        if let Some(palette) = &self.palette {
            let vis_path = self.visualization_path(&image.path)?;
            let canvas = self.draw(image, detections, palette);
            staged.push(stage(&vis_path, |tmp| {
                canvas
                    .save_with_format(tmp, image::ImageFormat::Png)
                    .map_err(|e| e.to_string())
            })?);
        }
        match stage(&path, |tmp| fs::write(tmp, &bytes).map_err(|e| e.to_string())) {
            Ok(s) => staged.push(s),
            Err(e) => {
                discard(&staged);
                return Err(e);
            }
        }
        commit(&staged)?;

        log::debug!("Wrote {} detections to {}", detections.len(), path.display());
        Ok(path)
    }

    fn draw(&self, image: &InputImage, detections: &[Detection], palette: &Palette) -> image::RgbImage {
        let mut canvas = image.image.clone();
        for det in detections {
            let (x, y, w, h) = det.bbox.as_xy_wh_i32();
            if w <= 0 || h <= 0 {
                continue;
            }
            let rect = Rect::at(x, y).of_size(w as u32, h as u32);
            draw_hollow_rect_mut(&mut canvas, rect, palette.get_class_colour(det.class_id));
        }
        canvas
    }
}

fn file_name(path: &Path) -> Result<String> {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .ok_or_else(|| InferError::write_failure(path, "input path has no file name"))
}

/// An artifact written to its `.tmp` sibling but not yet renamed into place.
struct Staged {
    tmp: PathBuf,
    target: PathBuf,
}

/// Runs `write` against `<path>.tmp`. The temporary file is removed on failure.
fn stage<F>(path: &Path, write: F) -> Result<Staged>
where
    F: FnOnce(&Path) -> std::result::Result<(), String>,
{
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    if let Err(reason) = write(&tmp) {
        let _ = fs::remove_file(&tmp);
        return Err(InferError::write_failure(path, reason));
    }
    Ok(Staged {
        tmp,
        target: path.to_path_buf(),
    })
}

fn discard(staged: &[Staged]) {
    for s in staged {
        let _ = fs::remove_file(&s.tmp);
    }
}

/// Renames every staged file in order. If one rename fails, the targets already
/// renamed and the remaining temporaries are removed.
fn commit(staged: &[Staged]) -> Result<()> {
    for (i, s) in staged.iter().enumerate() {
        if let Err(e) = fs::rename(&s.tmp, &s.target) {
            for done in &staged[..i] {
                let _ = fs::remove_file(&done.target);
            }
            discard(&staged[i..]);
            return Err(InferError::write_failure(&s.target, e));
        }
    }
    Ok(())
}

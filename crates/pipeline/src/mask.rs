//! Inpaint inputs: mask extraction and staging images into ComfyUI's
//! input directory.
//!
//! White mask pixels mark the area to repaint, black pixels are kept.

use std::path::{Path, PathBuf};

use image::{DynamicImage, GrayImage, ImageFormat, Luma};

use crate::error::PipelineError;

/// Average luma above which a layer is read as dark strokes on a light
/// background and inverted.
const LIGHT_LAYER_THRESHOLD: f64 = 128.0;

/// Build the inpaint mask for `base` from the first editor layer.
///
/// * A layer with an alpha channel uses its alpha: painted (opaque) pixels
///   become white.
/// * Any other layer is converted to luma. If it is mostly light it is
///   inverted so that the strokes come out white.
/// * `invert` flips the result of either rule.
/// * Without a layer the mask is all black, the size of `base`, and
///   `invert` does not apply.
pub fn build_mask(base: &DynamicImage, layer: Option<&DynamicImage>, invert: bool) -> GrayImage {
    let Some(layer) = layer else {
        tracing::debug!("No mask layer, using an empty mask");
        return GrayImage::new(base.width(), base.height());
    };

    let mut mask = if layer.color().has_alpha() {
        alpha_mask(layer)
    } else {
        let mut luma = layer.to_luma8();
        let brightness = average_luma(&luma);
        tracing::debug!(brightness, "Mask layer without alpha");
        if brightness > LIGHT_LAYER_THRESHOLD {
            image::imageops::invert(&mut luma);
        }
        luma
    };

    if invert {
        image::imageops::invert(&mut mask);
    }
    mask
}

fn alpha_mask(layer: &DynamicImage) -> GrayImage {
    let rgba = layer.to_rgba8();
    GrayImage::from_fn(rgba.width(), rgba.height(), |x, y| Luma([rgba.get_pixel(x, y)[3]]))
}

fn average_luma(image: &GrayImage) -> f64 {
    let pixels = u64::from(image.width()) * u64::from(image.height());
    if pixels == 0 {
        return 0.0;
    }
    let total: u64 = image.pixels().map(|p| u64::from(p[0])).sum();
    total as f64 / pixels as f64
}

/// An image written into ComfyUI's input directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedImage {
    /// Where the file was written.
    pub path: PathBuf,
    /// How a `LoadImage` node refers to it: `<subfolder>/<file>`.
    pub reference: String,
}

/// Save `image` as `<prefix>_<uuid>.png` in `input_dir`.
pub fn stage_image(
    image: &DynamicImage,
    prefix: &str,
    input_dir: &Path,
    subfolder: &str,
) -> Result<StagedImage, PipelineError> {
    std::fs::create_dir_all(input_dir).map_err(|source| PipelineError::CreateDir {
        path: input_dir.to_path_buf(),
        source,
    })?;

    let filename = format!("{prefix}_{}.png", uuid::Uuid::new_v4());
    let path = input_dir.join(&filename);
    image
        .save_with_format(&path, ImageFormat::Png)
        .map_err(|source| PipelineError::ImageWrite {
            path: path.clone(),
            source,
        })?;

    let reference = if subfolder.is_empty() {
        filename
    } else {
        format!("{}/{filename}", subfolder.trim_end_matches(['/', '\\']))
    };
    tracing::debug!(path = %path.display(), reference = %reference, "Staged input image");

    Ok(StagedImage { path, reference })
}

/// Open an image from disk.
pub fn open_image(path: &Path) -> Result<DynamicImage, PipelineError> {
    image::open(path).map_err(|source| PipelineError::ImageRead {
        path: path.to_path_buf(),
        source,
    })
}

use std::path::Path;

use image::DynamicImage;
use image::imageops::FilterType;
use tracing::debug;

use crate::error::{Result, TilerError};

/// Narrow collaborator interface for the image operations the tiler needs:
/// reading pixel dimensions and resampled copies. Keeping this surface small
/// lets the rest of the crate stay independent of the imaging backend and
/// lets tests substitute their own implementation.
pub trait ImageOps: Sync {
    /// Return the (width, height) of the image at `path` without decoding
    /// the full pixel data where possible.
    fn dimensions(&self, path: &Path) -> Result<(u32, u32)>;

    /// Read the image at `input`, scale both axes by `factor`, and write the
    /// result to `output`. The output format follows the output extension.
    fn resize_scale(&self, factor: f64, input: &Path, output: &Path) -> Result<()>;

    /// Read the image at `input`, resize so it fits within `max_dim`
    /// (width, height) while preserving aspect ratio, and write the result
    /// to `output`.
    ///
    /// `scale_limit`, if given, caps the applied scale factor. That keeps
    /// the output from exceeding the source resolution, which would waste
    /// space without adding detail. Returns the scale factor actually
    /// applied.
    fn resize_to(
        &self,
        max_dim: (u32, u32),
        input: &Path,
        output: &Path,
        scale_limit: Option<f64>,
    ) -> Result<f64>;
}

/// Default `ImageOps` backed by the filesystem, using Catmull-Rom
/// (bicubic-class) resampling.
pub struct DiskImages;

impl DiskImages {
    fn open(&self, path: &Path) -> Result<DynamicImage> {
        let img = image::open(path)
            .map_err(|e| TilerError::BadTexture(format!("{}: {e}", path.display())))?;
        if img.width() == 0 || img.height() == 0 {
            return Err(TilerError::BadTexture(format!(
                "{}: zero-sized image",
                path.display()
            )));
        }
        Ok(img)
    }

    fn save(&self, img: &DynamicImage, path: &Path) -> Result<()> {
        // JPEG has no alpha channel; flatten before encoding.
        let is_jpeg = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("jpg") || e.eq_ignore_ascii_case("jpeg"));

        let result = if is_jpeg {
            DynamicImage::ImageRgb8(img.to_rgb8()).save(path)
        } else {
            img.save(path)
        };
        result.map_err(|e| TilerError::BadTexture(format!("{}: {e}", path.display())))
    }

    fn resample(&self, img: &DynamicImage, scale: f64) -> DynamicImage {
        let w = ((img.width() as f64 * scale).round() as u32).max(1);
        let h = ((img.height() as f64 * scale).round() as u32).max(1);
        img.resize_exact(w, h, FilterType::CatmullRom)
    }
}

impl ImageOps for DiskImages {
    fn dimensions(&self, path: &Path) -> Result<(u32, u32)> {
        let (w, h) = image::image_dimensions(path)
            .map_err(|e| TilerError::BadTexture(format!("{}: {e}", path.display())))?;
        if w == 0 || h == 0 {
            return Err(TilerError::BadTexture(format!(
                "{}: zero-sized image",
                path.display()
            )));
        }
        Ok((w, h))
    }

    fn resize_scale(&self, factor: f64, input: &Path, output: &Path) -> Result<()> {
        debug!(factor, input = %input.display(), output = %output.display(), "resize_scale");
        let img = self.open(input)?;
        let out = self.resample(&img, factor);
        self.save(&out, output)
    }

    fn resize_to(
        &self,
        max_dim: (u32, u32),
        input: &Path,
        output: &Path,
        scale_limit: Option<f64>,
    ) -> Result<f64> {
        debug!(?max_dim, input = %input.display(), output = %output.display(), "resize_to");
        let img = self.open(input)?;
        let (in_w, in_h) = (img.width() as f64, img.height() as f64);

        let mut scale = (max_dim.0 as f64 / in_w).min(max_dim.1 as f64 / in_h);
        if let Some(limit) = scale_limit {
            scale = scale.min(limit);
        }

        let out = self.resample(&img, scale);
        self.save(&out, output)?;
        Ok(scale)
    }
}

//! Source image handling: transposition, pyramid resizing, cropping and
//! conversion to normalized NCHW tensors.

use image::imageops::{self, FilterType};
use image::{DynamicImage, RgbImage};
use ndarray::{Array3, Array4};

use super::geometry::Rect;

const PIXEL_MEAN: f32 = 127.5;
const PIXEL_SCALE: f32 = 0.0078125;

/// An RGB image stored in the transposed pipeline frame.
///
/// Pixel `(x, y)` of the stored buffer is pixel `(y, x)` of the source, so the
/// buffer width is the source height.
pub struct CascadeImage {
    pixels: RgbImage,
}

impl CascadeImage {
    pub fn from_image(img: &DynamicImage) -> Self {
        Self::from_rgb(&img.to_rgb8())
    }

    pub fn from_rgb(rgb: &RgbImage) -> Self {
        let pixels = RgbImage::from_fn(rgb.height(), rgb.width(), |x, y| *rgb.get_pixel(y, x));
        Self { pixels }
    }

    /// Width of the source image.
    pub fn width(&self) -> u32 {
        self.pixels.height()
    }

    /// Height of the source image.
    pub fn height(&self) -> u32 {
        self.pixels.width()
    }

    pub fn min_dimension(&self) -> u32 {
        self.width().min(self.height())
    }

    /// Resize by `scale` for the proposal network.
    ///
    /// Returns the `[1, 3, H, W]` tensor plus the resized width and height in
    /// the pipeline frame.
    pub fn scaled_tensor(&self, scale: f32) -> (Array4<f32>, u32, u32) {
        let w = (self.pixels.width() as f32 * scale).ceil().max(1.0) as u32;
        let h = (self.pixels.height() as f32 * scale).ceil().max(1.0) as u32;
        let resized = imageops::resize(&self.pixels, w, h, FilterType::Triangle);
        let tensor = to_tensor(&resized).insert_axis(ndarray::Axis(0));
        (tensor, w, h)
    }

    /// Crop a padded rect (1-based, inclusive) and resize it to `size` x `size`.
    ///
    /// Returns `None` when nothing of the rect lies inside the image.
    pub fn crop_tensor(&self, rect: &Rect, size: u32) -> Option<Array3<f32>> {
        let x0 = (rect.x1 as i64 - 1).max(0);
        let y0 = (rect.y1 as i64 - 1).max(0);
        let x1 = (rect.x2 as i64).min(self.pixels.width() as i64);
        let y1 = (rect.y2 as i64).min(self.pixels.height() as i64);
        if x1 <= x0 || y1 <= y0 {
            return None;
        }

        let crop = imageops::crop_imm(
            &self.pixels,
            x0 as u32,
            y0 as u32,
            (x1 - x0) as u32,
            (y1 - y0) as u32,
        )
        .to_image();
        let resized = imageops::resize(&crop, size, size, FilterType::Triangle);
        Some(to_tensor(&resized))
    }
}

/// `[3, H, W]` tensor with `(pixel - 127.5) / 128` normalization.
fn to_tensor(img: &RgbImage) -> Array3<f32> {
    Array3::from_shape_fn(
        (3, img.height() as usize, img.width() as usize),
        |(c, y, x)| (img.get_pixel(x as u32, y as u32)[c] as f32 - PIXEL_MEAN) * PIXEL_SCALE,
    )
}

use std::borrow::Cow;

use image::{imageops::{self, FilterType}, GrayImage, Luma, Rgb, RgbImage};
use imageproc::{contrast::equalize_histogram, geometric_transformations::{rotate_about_center, Interpolation}};
use serde::Serialize;

use crate::{error::RsResult, Error};


#[derive(Debug, Serialize, Clone, Copy, PartialEq)]
#[serde(rename_all = "camelCase")]
pub enum VariantKind {
    Original,
    Contrast,
    Rotated(f32),
}

/// Decodes uploaded bytes, enforcing the payload limit before touching the decoder.
pub fn decode_image(bytes: &[u8], max_bytes: usize) -> RsResult<RgbImage> {
    if bytes.is_empty() {
        return Err(Error::InvalidImage);
    }
    if bytes.len() > max_bytes {
        return Err(Error::ImageTooLarge { size: bytes.len(), max: max_bytes });
    }
    let image = image::load_from_memory(bytes).map_err(|_| Error::InvalidImage)?;
    Ok(image.to_rgb8())
}

/// Original first, then the contrast-normalized copy, then one rotation per angle (degrees).
pub fn variant_plan(contrast: bool, rotations: &[f32]) -> Vec<VariantKind> {
    let mut plan = vec![VariantKind::Original];
    if contrast {
        plan.push(VariantKind::Contrast);
    }
    plan.extend(rotations.iter().filter(|a| **a != 0.0).map(|a| VariantKind::Rotated(*a)));
    plan
}

/// Renders a variant. The original is returned unchanged so callers can borrow it.
pub fn render_variant(image: &RgbImage, kind: VariantKind) -> Cow<'_, RgbImage> {
    match kind {
        VariantKind::Original => Cow::Borrowed(image),
        VariantKind::Contrast => Cow::Owned(equalize_luminance(image)),
        VariantKind::Rotated(angle) => Cow::Owned(rotate_degrees(image, angle)),
    }
}

/// Histogram equalization of the luma channel, chroma is left untouched.
pub fn equalize_luminance(image: &RgbImage) -> RgbImage {
    let (width, height) = image.dimensions();
    let mut luma = GrayImage::new(width, height);
    for (x, y, pixel) in image.enumerate_pixels() {
        let (l, _, _) = rgb_to_ycbcr(pixel);
        luma.put_pixel(x, y, Luma([l.round().clamp(0.0, 255.0) as u8]));
    }
    let equalized = equalize_histogram(&luma);

    let mut output = RgbImage::new(width, height);
    for (x, y, pixel) in image.enumerate_pixels() {
        let (_, cb, cr) = rgb_to_ycbcr(pixel);
        let l = equalized.get_pixel(x, y)[0] as f32;
        output.put_pixel(x, y, ycbcr_to_rgb(l, cb, cr));
    }
    output
}

pub fn rotate_degrees(image: &RgbImage, degrees: f32) -> RgbImage {
    rotate_about_center(image, degrees.to_radians(), Interpolation::Bilinear, Rgb([0, 0, 0]))
}

fn rgb_to_ycbcr(pixel: &Rgb<u8>) -> (f32, f32, f32) {
    let [r, g, b] = pixel.0.map(|c| c as f32);
    let y = 0.299 * r + 0.587 * g + 0.114 * b;
    let cb = 128.0 - 0.168736 * r - 0.331264 * g + 0.5 * b;
    let cr = 128.0 + 0.5 * r - 0.418688 * g - 0.081312 * b;
    (y, cb, cr)
}

fn ycbcr_to_rgb(y: f32, cb: f32, cr: f32) -> Rgb<u8> {
    let r = y + 1.402 * (cr - 128.0);
    let g = y - 0.344136 * (cb - 128.0) - 0.714136 * (cr - 128.0);
    let b = y + 1.772 * (cb - 128.0);
    Rgb([r, g, b].map(|c| c.round().clamp(0.0, 255.0) as u8))
}

/// Crops a region clamped to the image bounds. `None` when nothing is left.
pub fn crop_region(image: &RgbImage, x1: f32, y1: f32, x2: f32, y2: f32) -> Option<RgbImage> {
    let (width, height) = image.dimensions();
    let left = x1.max(0.0).floor() as u32;
    let top = y1.max(0.0).floor() as u32;
    let right = (x2.max(0.0).ceil() as u32).min(width);
    let bottom = (y2.max(0.0).ceil() as u32).min(height);
    if right <= left || bottom <= top {
        return None;
    }
    Some(imageops::crop_imm(image, left, top, right - left, bottom - top).to_image())
}

pub fn resize_exact(image: &RgbImage, width: u32, height: u32) -> RgbImage {
    imageops::resize(image, width, height, FilterType::Triangle)
}

//! Image preprocessing and coordinate mapping for the pipeline graph.

use image::imageops::FilterType;
use image::DynamicImage;
use ndarray::Array4;
use rollcall_core::types::BoundingBox;

pub(crate) const PIPELINE_MEAN: f32 = 127.5;
pub(crate) const PIPELINE_STD: f32 = 128.0;

/// Scale and padding used to map between source pixels and tensor space.
pub(crate) struct LetterboxInfo {
    pub scale: f32,
    pub pad_x: f32,
    pub pad_y: f32,
}

/// Resize to fit `size` x `size` preserving aspect ratio, center with
/// padding, and normalize into a NCHW float tensor.
///
/// Padding pixels carry the mean value, which normalizes to 0.0.
pub(crate) fn to_input_tensor(image: &DynamicImage, size: usize) -> (Array4<f32>, LetterboxInfo) {
    let width = image.width() as usize;
    let height = image.height() as usize;
    let scale = (size as f32 / width as f32).min(size as f32 / height as f32);
    let new_w = ((width as f32 * scale).round() as usize).clamp(1, size);
    let new_h = ((height as f32 * scale).round() as usize).clamp(1, size);
    let pad_x = (size - new_w) as f32 / 2.0;
    let pad_y = (size - new_h) as f32 / 2.0;

    let resized = image
        .resize_exact(new_w as u32, new_h as u32, FilterType::Triangle)
        .to_rgb8();

    let pad_x_start = pad_x.floor() as usize;
    let pad_y_start = pad_y.floor() as usize;

    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    for y in 0..size {
        for x in 0..size {
            let inside = y >= pad_y_start
                && y < pad_y_start + new_h
                && x >= pad_x_start
                && x < pad_x_start + new_w;
            for c in 0..3 {
                let value = if inside {
                    resized.get_pixel((x - pad_x_start) as u32, (y - pad_y_start) as u32)[c] as f32
                } else {
                    PIPELINE_MEAN
                };
                tensor[[0, c, y, x]] = (value - PIPELINE_MEAN) / PIPELINE_STD;
            }
        }
    }

    (tensor, LetterboxInfo { scale, pad_x, pad_y })
}

/// Map a corner-coordinate box from tensor space back to source pixels,
/// clamped to the image bounds.
pub(crate) fn to_source_box(
    raw: [f32; 4],
    letterbox: &LetterboxInfo,
    src_w: u32,
    src_h: u32,
) -> BoundingBox {
    let map_x = |v: f32| ((v - letterbox.pad_x) / letterbox.scale).clamp(0.0, src_w as f32);
    let map_y = |v: f32| ((v - letterbox.pad_y) / letterbox.scale).clamp(0.0, src_h as f32);
    let x1 = map_x(raw[0]);
    let y1 = map_y(raw[1]);
    let x2 = map_x(raw[2]);
    let y2 = map_y(raw[3]);
    BoundingBox {
        x: x1,
        y: y1,
        width: (x2 - x1).max(0.0),
        height: (y2 - y1).max(0.0),
    }
}

/// L2-normalize a raw embedding slice into a unit vector.
pub(crate) fn l2_normalized(raw: &[f32]) -> Vec<f32> {
    let norm: f32 = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        raw.iter().map(|x| x / norm).collect()
    } else {
        raw.to_vec()
    }
}

//! Image to input-tensor conversion for the backbone
//!
//! Steps: exact resize to a square, grayscale replicated to three channels,
//! alpha dropped, per-channel normalization, batch axis added.

use image::imageops::{self, FilterType};
use image::DynamicImage;
use ndarray::Array4;

use crate::config::{Preprocessing, TensorLayout};

/// ImageNet channel means in BGR order, 0..255 scale (Keras "caffe" mode)
const CAFFE_MEAN_BGR: [f32; 3] = [103.939, 116.779, 123.68];

/// ImageNet channel statistics in RGB order, 0..1 scale (torchvision)
const TORCH_MEAN_RGB: [f32; 3] = [0.485, 0.456, 0.406];
const TORCH_STD_RGB: [f32; 3] = [0.229, 0.224, 0.225];

/// How to turn a decoded image into a model input
#[derive(Debug, Clone, Copy)]
pub struct PreprocessOptions {
    pub image_size: u32,
    pub mode: Preprocessing,
    pub layout: TensorLayout,
}

/// Output tensor shape for these options
pub fn input_shape(options: &PreprocessOptions) -> [usize; 4] {
    let s = options.image_size as usize;
    match options.layout {
        TensorLayout::Nhwc => [1, s, s, 3],
        TensorLayout::Nchw => [1, 3, s, s],
    }
}

/// Convert a decoded image into a normalized `[1, ...]` f32 tensor
pub fn image_to_tensor(image: &DynamicImage, options: &PreprocessOptions) -> Array4<f32> {
    let size = options.image_size;

    // to_rgb8 replicates luma into three channels and discards alpha
    let rgb = imageops::resize(&image.to_rgb8(), size, size, FilterType::Triangle);

    let s = size as usize;
    let mut tensor = Array4::<f32>::zeros(input_shape(options));

    for (x, y, pixel) in rgb.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        let normalized = normalize_pixel(pixel.0, options.mode);
        for (c, value) in normalized.iter().enumerate() {
            match options.layout {
                TensorLayout::Nhwc => tensor[[0, y, x, c]] = *value,
                TensorLayout::Nchw => tensor[[0, c, y, x]] = *value,
            }
        }
    }

    debug_assert_eq!(tensor.len(), 3 * s * s);
    tensor
}

/// Normalize one RGB pixel; channel order of the result follows the mode
fn normalize_pixel(rgb: [u8; 3], mode: Preprocessing) -> [f32; 3] {
    let [r, g, b] = rgb.map(|v| v as f32);
    match mode {
        Preprocessing::Caffe => [
            b - CAFFE_MEAN_BGR[0],
            g - CAFFE_MEAN_BGR[1],
            r - CAFFE_MEAN_BGR[2],
        ],
        Preprocessing::Torch => [
            (r / 255.0 - TORCH_MEAN_RGB[0]) / TORCH_STD_RGB[0],
            (g / 255.0 - TORCH_MEAN_RGB[1]) / TORCH_STD_RGB[1],
            (b / 255.0 - TORCH_MEAN_RGB[2]) / TORCH_STD_RGB[2],
        ],
    }
}

//! Image preprocessing driven by a checkpoint's `preprocessor_config.json`.
//!
//! Only the fields image classifiers actually use are parsed. Anything missing
//! falls back to ImageNet defaults.

use std::collections::HashMap;
use std::path::Path;

use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use ndarray::Array4;
use serde::Deserialize;

use super::ModelError;

pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];
pub const DEFAULT_SIZE: u32 = 224;

/// `crop_pct` only applies below this shortest edge.
const CROP_PCT_MAX_EDGE: u32 = 384;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct PreprocessorConfig {
    #[serde(default)]
    pub do_resize: Option<bool>,

    /// `{"height": H, "width": W}` or `{"shortest_edge": S}`
    #[serde(default)]
    pub size: Option<HashMap<String, u32>>,

    #[serde(default)]
    pub do_center_crop: Option<bool>,

    #[serde(default)]
    pub crop_size: Option<HashMap<String, u32>>,

    /// ConvNeXt-style: resize to `floor(shortest_edge / crop_pct)`, then crop
    /// back. Ignored from a 384 shortest edge up, where the image is warped to a
    /// square instead.
    #[serde(default)]
    pub crop_pct: Option<f32>,

    #[serde(default)]
    pub do_rescale: Option<bool>,

    #[serde(default)]
    pub rescale_factor: Option<f32>,

    #[serde(default)]
    pub do_normalize: Option<bool>,

    #[serde(default, alias = "norm_mean")]
    pub image_mean: Option<Vec<f32>>,

    #[serde(default, alias = "norm_std")]
    pub image_std: Option<Vec<f32>>,

    /// PIL resampling enum.
    #[serde(default, alias = "resampling")]
    pub resample: Option<u32>,
}

impl PreprocessorConfig {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn from_path(path: &Path) -> Result<Self, ModelError> {
        let json = std::fs::read_to_string(path).map_err(|source| ModelError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&json).map_err(|source| ModelError::Json {
            path: path.to_path_buf(),
            source,
        })
    }
}

fn channels(values: &Option<Vec<f32>>, default: [f32; 3]) -> [f32; 3] {
    match values.as_deref() {
        Some([r, g, b, ..]) => [*r, *g, *b],
        Some([v]) => [*v; 3],
        _ => default,
    }
}

/// PIL resampling ids: 0 nearest, 1 lanczos, 2 bilinear, 3 bicubic, 4 box, 5 hamming.
fn pil_filter(resample: Option<u32>) -> FilterType {
    match resample {
        Some(0) => FilterType::Nearest,
        Some(1) => FilterType::Lanczos3,
        Some(3) => FilterType::CatmullRom,
        _ => FilterType::Triangle,
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Resize {
    Exact { height: u32, width: u32 },
    ShortestEdge(u32),
}

/// Turns decoded images into the `1x3xHxW` float tensor a classifier expects.
#[derive(Debug, Clone)]
pub struct Preprocessor {
    resize: Resize,
    output: (u32, u32),
    filter: FilterType,
    rescale: Option<f32>,
    normalize: Option<([f32; 3], [f32; 3])>,
}

impl Preprocessor {
    pub fn new(config: &PreprocessorConfig) -> Self {
        let size = config.size.as_ref();
        let shortest_edge = size.and_then(|s| s.get("shortest_edge").copied());
        let exact = size.and_then(|s| match (s.get("height"), s.get("width")) {
            (Some(&height), Some(&width)) => Some((height, width)),
            _ => None,
        });

        let crop = if config.do_center_crop.unwrap_or(false) {
            config
                .crop_size
                .as_ref()
                .and_then(|c| match (c.get("height"), c.get("width")) {
                    (Some(&h), Some(&w)) => Some((h, w)),
                    _ => None,
                })
        } else {
            None
        };

        // The graph has a fixed input shape, so the output is always a known size.
        let output = match (crop, exact, shortest_edge) {
            (Some(crop), _, _) => crop,
            (None, Some(exact), _) => exact,
            (None, None, Some(edge)) => (edge, edge),
            (None, None, None) => (DEFAULT_SIZE, DEFAULT_SIZE),
        };

        let resize = if !config.do_resize.unwrap_or(true) {
            Resize::Exact {
                height: output.0,
                width: output.1,
            }
        } else if let Some((height, width)) = exact {
            Resize::Exact { height, width }
        } else if let Some(edge) = shortest_edge {
            match config.crop_pct {
                // ConvNeXt warps large inputs straight to a square, no crop.
                Some(_) if edge >= CROP_PCT_MAX_EDGE => Resize::Exact {
                    height: edge,
                    width: edge,
                },
                Some(pct) if pct > 0.0 => Resize::ShortestEdge((edge as f32 / pct).floor() as u32),
                _ => Resize::ShortestEdge(edge),
            }
        } else {
            Resize::Exact {
                height: output.0,
                width: output.1,
            }
        };

        let rescale = if config.do_rescale.unwrap_or(true) {
            Some(config.rescale_factor.unwrap_or(1.0 / 255.0))
        } else {
            None
        };

        let normalize = if config.do_normalize.unwrap_or(true) {
            Some((
                channels(&config.image_mean, IMAGENET_MEAN),
                channels(&config.image_std, IMAGENET_STD),
            ))
        } else {
            None
        };

        Self {
            resize,
            output,
            filter: pil_filter(config.resample),
            rescale,
            normalize,
        }
    }

    /// `(height, width)` of the produced tensor.
    pub fn output_size(&self) -> (u32, u32) {
        self.output
    }

    /// Resizes and crops `image` to [`output_size`](Self::output_size).
    pub fn prepare(&self, image: &RgbImage) -> RgbImage {
        let resized = match self.resize {
            Resize::Exact { height, width } => {
                if image.dimensions() == (width, height) {
                    image.clone()
                } else {
                    imageops::resize(image, width, height, self.filter)
                }
            }
            Resize::ShortestEdge(edge) => {
                let (width, height) = image.dimensions();
                let (new_width, new_height) = if width < height {
                    (edge, scale_edge(height, edge, width))
                } else {
                    (scale_edge(width, edge, height), edge)
                };
                imageops::resize(image, new_width, new_height, self.filter)
            }
        };

        center_crop(&resized, self.output.1, self.output.0)
    }

    /// Full pipeline: resize, crop, rescale, normalize, NCHW.
    pub fn tensor(&self, image: &RgbImage) -> Array4<f32> {
        let prepared = self.prepare(image);
        let (height, width) = self.output;
        let scale = self.rescale.unwrap_or(1.0);

        let mut tensor = Array4::zeros((1, 3, height as usize, width as usize));
        for (x, y, pixel) in prepared.enumerate_pixels() {
            for c in 0..3 {
                let mut value = pixel[c] as f32 * scale;
                if let Some((mean, std)) = &self.normalize {
                    value = (value - mean[c]) / std[c];
                }
                tensor[[0, c, y as usize, x as usize]] = value;
            }
        }
        tensor
    }
}

fn scale_edge(long: u32, edge: u32, short: u32) -> u32 {
    ((long as u64 * edge as u64) / short.max(1) as u64).max(1) as u32
}

/// Crops the centre `width x height` region. Sides shorter than the target are
/// padded with black instead.
fn center_crop(image: &RgbImage, width: u32, height: u32) -> RgbImage {
    let (src_width, src_height) = image.dimensions();
    if (src_width, src_height) == (width, height) {
        return image.clone();
    }

    let crop_width = src_width.min(width);
    let crop_height = src_height.min(height);
    let left = (src_width - crop_width) / 2;
    let top = (src_height - crop_height) / 2;
    let cropped = imageops::crop_imm(image, left, top, crop_width, crop_height).to_image();

    if (crop_width, crop_height) == (width, height) {
        return cropped;
    }

    let mut canvas = RgbImage::from_pixel(width, height, Rgb([0, 0, 0]));
    let pad_x = (width - crop_width) / 2;
    let pad_y = (height - crop_height) / 2;
    imageops::replace(&mut canvas, &cropped, pad_x as i64, pad_y as i64);
    canvas
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_imagenet_224() {
        let pre = Preprocessor::new(&PreprocessorConfig::default());
        assert_eq!(pre.output_size(), (224, 224));

        let image = RgbImage::from_pixel(50, 30, Rgb([255, 255, 255]));
        let tensor = pre.tensor(&image);
        assert_eq!(tensor.shape(), &[1, 3, 224, 224]);

        let expected = (1.0 - IMAGENET_MEAN[0]) / IMAGENET_STD[0];
        assert!((tensor[[0, 0, 100, 100]] - expected).abs() < 2e-2);
    }

    #[test]
    fn vit_style_exact_size() {
        let json = r#"{
            "do_normalize": true,
            "do_resize": true,
            "image_mean": [0.5, 0.5, 0.5],
            "image_std": [0.5, 0.5, 0.5],
            "resample": 2,
            "rescale_factor": 0.00392156862745098,
            "size": {"height": 64, "width": 48}
        }"#;
        let pre = Preprocessor::new(&PreprocessorConfig::from_json(json).unwrap());
        assert_eq!(pre.output_size(), (64, 48));

        let image = RgbImage::from_pixel(10, 10, Rgb([0, 255, 0]));
        let tensor = pre.tensor(&image);
        assert_eq!(tensor.shape(), &[1, 3, 64, 48]);
        assert!((tensor[[0, 0, 5, 5]] - -1.0).abs() < 1e-2);
        assert!((tensor[[0, 1, 5, 5]] - 1.0).abs() < 1e-2);
    }

    #[test]
    fn convnext_style_crop_pct() {
        let json = r#"{
            "crop_pct": 0.875,
            "do_normalize": true,
            "do_rescale": true,
            "do_resize": true,
            "resample": 3,
            "size": {"shortest_edge": 224}
        }"#;
        let config = PreprocessorConfig::from_json(json).unwrap();
        let pre = Preprocessor::new(&config);
        assert_eq!(pre.resize, Resize::ShortestEdge(256));
        assert_eq!(pre.output_size(), (224, 224));

        let prepared = pre.prepare(&RgbImage::new(400, 300));
        assert_eq!(prepared.dimensions(), (224, 224));
    }

    #[test]
    fn crop_pct_resize_truncates() {
        let json = r#"{"crop_pct": 0.9, "size": {"shortest_edge": 224}}"#;
        let pre = Preprocessor::new(&PreprocessorConfig::from_json(json).unwrap());
        // 224 / 0.9 = 248.88
        assert_eq!(pre.resize, Resize::ShortestEdge(248));
    }

    #[test]
    fn crop_pct_ignored_for_large_edges() {
        let json = r#"{"crop_pct": 0.875, "size": {"shortest_edge": 384}}"#;
        let pre = Preprocessor::new(&PreprocessorConfig::from_json(json).unwrap());
        assert_eq!(
            pre.resize,
            Resize::Exact {
                height: 384,
                width: 384
            }
        );
        assert_eq!(pre.output_size(), (384, 384));

        let image = RgbImage::from_pixel(400, 200, Rgb([10, 20, 30]));
        assert_eq!(pre.prepare(&image).dimensions(), (384, 384));
    }

    #[test]
    fn explicit_center_crop() {
        let json = r#"{
            "do_center_crop": true,
            "crop_size": {"height": 32, "width": 32},
            "size": {"shortest_edge": 40}
        }"#;
        let pre = Preprocessor::new(&PreprocessorConfig::from_json(json).unwrap());
        assert_eq!(pre.output_size(), (32, 32));
        assert_eq!(pre.prepare(&RgbImage::new(80, 40)).dimensions(), (32, 32));
    }

    #[test]
    fn disabled_normalization_only_rescales() {
        let json = r#"{"do_normalize": false, "size": {"height": 2, "width": 2}}"#;
        let pre = Preprocessor::new(&PreprocessorConfig::from_json(json).unwrap());
        let tensor = pre.tensor(&RgbImage::from_pixel(2, 2, Rgb([255, 0, 51])));
        assert!((tensor[[0, 0, 0, 0]] - 1.0).abs() < 1e-6);
        assert!((tensor[[0, 2, 1, 1]] - 0.2).abs() < 1e-6);
    }

    #[test]
    fn crop_pads_small_images() {
        let image = RgbImage::from_pixel(4, 2, Rgb([255, 255, 255]));
        let cropped = center_crop(&image, 6, 6);
        assert_eq!(cropped.dimensions(), (6, 6));
        assert_eq!(cropped.get_pixel(0, 0), &Rgb([0, 0, 0]));
        assert_eq!(cropped.get_pixel(2, 2), &Rgb([255, 255, 255]));
    }
}

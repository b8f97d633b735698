//! Input preparation for encoder networks.
//!
//! Turns an aligned face crop into the NCHW tensor a given encoder expects:
//! optional grayscale conversion, antialiased resize, a configurable value
//! range adjustment and per-channel mean/std normalization.

use std::fmt;
use std::str::FromStr;

use image::imageops::FilterType;
use image::RgbImage;
use ndarray::Array4;

use crate::error::IdentifyError;

/// Value-range adjustment applied before the encoder's mean/std, selected by
/// the `normalization` configuration field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Normalization {
    /// Scale to [0, 1].
    Base,
    /// Leave values in [0, 255].
    Raw,
    /// Per-image standardization (subtract mean, divide by stddev).
    Facenet,
    /// Scale to [-1, 1].
    Facenet2018,
    /// Subtract the VGGFace channel means.
    VggFace,
    /// Subtract the VGGFace2 channel means.
    VggFace2,
    /// `(v - 127.5) / 128`.
    ArcFace,
}

impl Normalization {
    const ALL: [Normalization; 7] = [
        Normalization::Base,
        Normalization::Raw,
        Normalization::Facenet,
        Normalization::Facenet2018,
        Normalization::VggFace,
        Normalization::VggFace2,
        Normalization::ArcFace,
    ];

    pub fn config_name(&self) -> &'static str {
        match self {
            Normalization::Base => "base",
            Normalization::Raw => "raw",
            Normalization::Facenet => "facenet",
            Normalization::Facenet2018 => "facenet2018",
            Normalization::VggFace => "vggface",
            Normalization::VggFace2 => "vggface2",
            Normalization::ArcFace => "arcface",
        }
    }
}

impl FromStr for Normalization {
    type Err = IdentifyError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|n| n.config_name() == name)
            .ok_or_else(|| {
                let names = Self::ALL
                    .iter()
                    .map(|n| format!("'{}'", n.config_name()))
                    .collect::<Vec<_>>()
                    .join(", ");
                IdentifyError::Configuration(format!(
                    "normalization must be one of: {names}, got '{name}'"
                ))
            })
    }
}

impl fmt::Display for Normalization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.config_name())
    }
}

/// Decode encoded image bytes into an RGB frame.
pub fn decode_image(bytes: &[u8]) -> Result<RgbImage, IdentifyError> {
    let decoded = image::load_from_memory(bytes)
        .map_err(|e| IdentifyError::InvalidImage(e.to_string()))?;
    Ok(decoded.to_rgb8())
}

/// Prepare a face crop for one encoder forward pass.
///
/// Converts to single-channel luma (replicated) when `grayscale` is set,
/// resizes to `target_size` with antialiasing, applies the normalization
/// mode's value-range adjustment and then `(v - mean) / std` per channel,
/// and returns an NCHW tensor with a leading batch dimension.
pub fn prepare(
    crop: &RgbImage,
    norm: Normalization,
    mean: [f32; 3],
    std: [f32; 3],
    target_size: u32,
    grayscale: bool,
) -> Result<Array4<f32>, IdentifyError> {
    if crop.width() == 0 || crop.height() == 0 {
        return Err(IdentifyError::InvalidImage(
            "empty face crop".to_string(),
        ));
    }

    let resized = image::imageops::resize(crop, target_size, target_size, FilterType::Triangle);
    let size = target_size as usize;

    // Collect raw channel values (0–255) first so per-image modes can see
    // the whole crop.
    let mut values = vec![[0.0f32; 3]; size * size];
    for (i, pixel) in resized.pixels().enumerate() {
        let [r, g, b] = pixel.0.map(|v| v as f32);
        values[i] = if grayscale {
            let luma = 0.299 * r + 0.587 * g + 0.114 * b;
            [luma, luma, luma]
        } else {
            [r, g, b]
        };
    }

    apply_norm(&mut values, norm);

    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    for y in 0..size {
        for x in 0..size {
            let v = values[y * size + x];
            for c in 0..3 {
                tensor[[0, c, y, x]] = (v[c] - mean[c]) / std[c];
            }
        }
    }

    Ok(tensor)
}

fn apply_norm(values: &mut [[f32; 3]], norm: Normalization) {
    match norm {
        Normalization::Base => {
            for v in values.iter_mut() {
                for c in v.iter_mut() {
                    *c /= 255.0;
                }
            }
        }
        Normalization::Raw => {}
        Normalization::Facenet => {
            let n = (values.len() * 3) as f32;
            let mean = values.iter().flatten().sum::<f32>() / n;
            let var = values
                .iter()
                .flatten()
                .map(|v| (v - mean).powi(2))
                .sum::<f32>()
                / n;
            let std = var.sqrt().max(1e-6);
            for v in values.iter_mut() {
                for c in v.iter_mut() {
                    *c = (*c - mean) / std;
                }
            }
        }
        Normalization::Facenet2018 => {
            for v in values.iter_mut() {
                for c in v.iter_mut() {
                    *c = *c / 127.5 - 1.0;
                }
            }
        }
        Normalization::VggFace => subtract_channel_means(values, [93.5940, 104.7624, 129.1863]),
        Normalization::VggFace2 => subtract_channel_means(values, [91.4953, 103.8827, 131.0912]),
        Normalization::ArcFace => {
            for v in values.iter_mut() {
                for c in v.iter_mut() {
                    *c = (*c - 127.5) / 128.0;
                }
            }
        }
    }
}

fn subtract_channel_means(values: &mut [[f32; 3]], means: [f32; 3]) {
    for v in values.iter_mut() {
        for c in 0..3 {
            v[c] -= means[c];
        }
    }
}

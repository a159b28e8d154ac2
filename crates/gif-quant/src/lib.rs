//! Palette reduction for GIF frames.
//!
//! Both quantizers work on RGBA input. Pixels below
//! [`TRANSPARENCY_THRESHOLD`] are kept out of the palette search and mapped to
//! one reserved entry appended after the quantized colors.

use common_types::{Algorithm, GifPipeError, BYTES_PER_PIXEL, MAX_PALETTE_SIZE, TRANSPARENCY_THRESHOLD};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use tracing::debug;

mod neuquant;
mod octree;

pub use octree::Octree;

/// NeuQuant sample factor range accepted by `color_quant` (1 = best).
pub const MIN_SAMPLE_FACTOR: u32 = 1;
pub const MAX_SAMPLE_FACTOR: u32 = 30;

/// Indexed frame ready for a GIF image block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Quantized {
    /// RGB triplets, at most 256 entries.
    pub palette_rgb: Vec<u8>,
    pub indices: Vec<u8>,
    pub transparent_index: Option<u8>,
}

impl Quantized {
    pub fn palette_len(&self) -> usize {
        self.palette_rgb.len() / 3
    }
}

/// Maps encoder quality (1..=100) onto the NeuQuant sample factor.
pub fn sample_factor(quality: u32) -> i32 {
    quality.clamp(MIN_SAMPLE_FACTOR, MAX_SAMPLE_FACTOR) as i32
}

/// Quantize one RGBA frame with the selected algorithm.
pub fn quantize_rgba(rgba: &[u8], algorithm: Algorithm, quality: u32) -> Result<Quantized, GifPipeError> {
    if rgba.is_empty() || rgba.len() % BYTES_PER_PIXEL != 0 {
        return Err(GifPipeError::QuantizationFailed {
            message: format!("RGBA length {} is not a positive multiple of 4", rgba.len()),
        });
    }

    let pixel_count = rgba.len() / BYTES_PER_PIXEL;
    let opaque: Vec<[u8; 3]> = rgba
        .chunks_exact(BYTES_PER_PIXEL)
        .filter(|px| px[3] >= TRANSPARENCY_THRESHOLD)
        .map(|px| [px[0], px[1], px[2]])
        .collect();
    let has_transparency = opaque.len() < pixel_count;

    if opaque.is_empty() {
        debug!(stage = "quantize", pixels = pixel_count, "Frame is fully transparent");
        return Ok(Quantized {
            palette_rgb: vec![0, 0, 0],
            indices: vec![0; pixel_count],
            transparent_index: Some(0),
        });
    }

    let max_colors = if has_transparency {
        MAX_PALETTE_SIZE - 1
    } else {
        MAX_PALETTE_SIZE
    };

    let (mut palette_rgb, opaque_indices) = match exact_palette(&opaque, max_colors) {
        Some(exact) => exact,
        None => match algorithm {
            Algorithm::NeuQuant => neuquant::quantize(&opaque, max_colors, sample_factor(quality)),
            Algorithm::Octree => octree::quantize(&opaque, max_colors),
        },
    };

    let transparent_index = if has_transparency {
        let index = (palette_rgb.len() / 3) as u8;
        palette_rgb.extend_from_slice(&[0, 0, 0]);
        Some(index)
    } else {
        None
    };

    let mut opaque_iter = opaque_indices.into_iter();
    let mut indices = Vec::with_capacity(pixel_count);
    for px in rgba.chunks_exact(BYTES_PER_PIXEL) {
        match transparent_index {
            Some(t) if px[3] < TRANSPARENCY_THRESHOLD => indices.push(t),
            _ => indices.push(opaque_iter.next().ok_or_else(|| GifPipeError::QuantizationFailed {
                message: "palette mapping produced fewer indices than opaque pixels".to_string(),
            })?),
        }
    }

    debug!(
        stage = "quantize",
        algorithm = %algorithm,
        pixels = pixel_count,
        palette_size = palette_rgb.len() / 3,
        transparent = has_transparency,
        "Frame quantized"
    );

    Ok(Quantized {
        palette_rgb,
        indices,
        transparent_index,
    })
}

/// Lossless palette in first-seen order, or `None` when the frame has more
/// than `max_colors` distinct colors.
fn exact_palette(pixels: &[[u8; 3]], max_colors: usize) -> Option<(Vec<u8>, Vec<u8>)> {
    let mut lookup: HashMap<[u8; 3], u8> = HashMap::new();
    let mut palette = Vec::new();
    let mut indices = Vec::with_capacity(pixels.len());

    for &rgb in pixels {
        let next = lookup.len();
        let index = match lookup.entry(rgb) {
            Entry::Occupied(entry) => *entry.get(),
            Entry::Vacant(entry) => {
                if next >= max_colors {
                    return None;
                }
                palette.extend_from_slice(&rgb);
                *entry.insert(next as u8)
            }
        };
        indices.push(index);
    }

    Some((palette, indices))
}

use common_types::{Algorithm, Dimensions, GifPipeError, BYTES_PER_PIXEL, TRANSPARENCY_THRESHOLD};
use gif::{DisposalMethod, Frame};
use std::borrow::Cow;

/// Rectangle of the logical screen written by one image block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub left: u16,
    pub top: u16,
    pub width: u16,
    pub height: u16,
}

impl Region {
    pub fn full(dims: Dimensions) -> Self {
        Self {
            left: 0,
            top: 0,
            width: dims.width_u16(),
            height: dims.height_u16(),
        }
    }

    pub fn is_full(&self, dims: Dimensions) -> bool {
        *self == Self::full(dims)
    }
}

/// True when no pixel falls under the transparency threshold.
pub fn is_opaque(rgba: &[u8]) -> bool {
    rgba.chunks_exact(BYTES_PER_PIXEL)
        .all(|px| px[3] >= TRANSPARENCY_THRESHOLD)
}

/// Bounding box of pixels that differ between two full frames.
/// An unchanged frame still yields a 1x1 region so a block is written.
pub fn changed_region(previous: &[u8], current: &[u8], dims: Dimensions) -> Region {
    let width = dims.width as usize;
    let (mut min_x, mut min_y) = (usize::MAX, usize::MAX);
    let (mut max_x, mut max_y) = (0usize, 0usize);

    for (i, (a, b)) in previous
        .chunks_exact(BYTES_PER_PIXEL)
        .zip(current.chunks_exact(BYTES_PER_PIXEL))
        .enumerate()
    {
        if a != b {
            let (x, y) = (i % width, i / width);
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
        }
    }

    if min_x == usize::MAX {
        return Region {
            left: 0,
            top: 0,
            width: 1,
            height: 1,
        };
    }

    Region {
        left: min_x as u16,
        top: min_y as u16,
        width: (max_x - min_x + 1) as u16,
        height: (max_y - min_y + 1) as u16,
    }
}

/// Copies a region out of a full-size RGBA frame.
pub fn crop(rgba: &[u8], dims: Dimensions, region: Region) -> Vec<u8> {
    let row_bytes = region.width as usize * BYTES_PER_PIXEL;
    let mut out = Vec::with_capacity(row_bytes * region.height as usize);
    for y in region.top as usize..(region.top + region.height) as usize {
        let start = (y * dims.width as usize + region.left as usize) * BYTES_PER_PIXEL;
        out.extend_from_slice(&rgba[start..start + row_bytes]);
    }
    out
}

/// Quantizes a region and wraps it in a GIF image block with a local palette.
///
/// `dispose` says what happens after the block is shown, so the caller picks
/// it from the block that follows.
pub fn encode_region(
    rgba: &[u8],
    dims: Dimensions,
    region: Region,
    delay_cs: u16,
    dispose: DisposalMethod,
    algorithm: Algorithm,
    quality: u32,
) -> Result<Frame<'static>, GifPipeError> {
    let pixels = if region.is_full(dims) {
        Cow::Borrowed(rgba)
    } else {
        Cow::Owned(crop(rgba, dims, region))
    };

    let quantized = gif_quant::quantize_rgba(&pixels, algorithm, quality)?;

    let mut frame = Frame::default();
    frame.left = region.left;
    frame.top = region.top;
    frame.width = region.width;
    frame.height = region.height;
    frame.buffer = Cow::Owned(quantized.indices);
    frame.palette = Some(quantized.palette_rgb);
    frame.transparent = quantized.transparent_index;
    frame.delay = delay_cs;
    frame.dispose = dispose;
    Ok(frame)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dims(w: u32, h: u32) -> Dimensions {
        Dimensions::new(w, h).unwrap()
    }

    #[test]
    fn test_changed_region_bounds() {
        let d = dims(4, 4);
        let previous = vec![0u8; d.rgba_len()];
        let mut current = previous.clone();
        // Pixels (1,1) and (2,3) change.
        current[(4 + 1) * 4] = 9;
        current[(3 * 4 + 2) * 4 + 1] = 9;

        let region = changed_region(&previous, &current, d);
        assert_eq!(
            region,
            Region {
                left: 1,
                top: 1,
                width: 2,
                height: 3
            }
        );
    }

    #[test]
    fn test_unchanged_frame_yields_single_pixel() {
        let d = dims(3, 3);
        let frame = vec![7u8; d.rgba_len()];
        let region = changed_region(&frame, &frame, d);
        assert_eq!((region.width, region.height), (1, 1));
    }

    #[test]
    fn test_crop_rows() {
        let d = dims(3, 2);
        let rgba: Vec<u8> = (0..d.rgba_len() as u8).collect();
        let region = Region {
            left: 1,
            top: 1,
            width: 2,
            height: 1,
        };
        assert_eq!(crop(&rgba, d, region), (16..24).collect::<Vec<u8>>());
    }

    #[test]
    fn test_block_uses_requested_disposal() {
        let d = dims(2, 1);
        let opaque = [10, 10, 10, 255, 20, 20, 20, 255];
        let frame = encode_region(&opaque, d, Region::full(d), 3, DisposalMethod::Background, Algorithm::Octree, 1)
            .unwrap();
        assert_eq!(frame.dispose, DisposalMethod::Background);
        assert_eq!(frame.transparent, None);
        assert_eq!(frame.delay, 3);

        // Transparency alone does not change the disposal.
        let holey = [10, 10, 10, 255, 0, 0, 0, 0];
        let frame =
            encode_region(&holey, d, Region::full(d), 3, DisposalMethod::Keep, Algorithm::Octree, 1).unwrap();
        assert_eq!(frame.dispose, DisposalMethod::Keep);
        assert!(frame.transparent.is_some());
    }

    #[test]
    fn test_is_opaque() {
        assert!(is_opaque(&[0, 0, 0, 255, 1, 1, 1, 200]));
        assert!(!is_opaque(&[0, 0, 0, 255, 1, 1, 1, 10]));
    }
}

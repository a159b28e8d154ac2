use color_quant::NeuQuant;

/// Runs NeuQuant over opaque pixels, returns (RGB palette, one index per pixel).
pub(crate) fn quantize(pixels: &[[u8; 3]], max_colors: usize, sample_factor: i32) -> (Vec<u8>, Vec<u8>) {
    // NeuQuant expects RGBA data (4 bytes per pixel)
    let rgba: Vec<u8> = pixels
        .iter()
        .flat_map(|&[r, g, b]| [r, g, b, 255])
        .collect();

    let nq = NeuQuant::new(sample_factor, max_colors, &rgba);
    let palette = nq.color_map_rgb();

    let indices = rgba
        .chunks_exact(4)
        .map(|px| nq.index_of(px) as u8)
        .collect();

    (palette, indices)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_palette_size_and_indices() {
        let pixels: Vec<[u8; 3]> = (0..64u8).map(|i| [i * 4, 255 - i * 4, i]).collect();
        let (palette, indices) = quantize(&pixels, 16, 1);

        assert_eq!(palette.len(), 16 * 3);
        assert_eq!(indices.len(), 64);
        assert!(indices.iter().all(|&i| (i as usize) < 16));
    }
}

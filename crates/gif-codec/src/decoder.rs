use common_types::{DecodedFrame, DecodedGif, Dimensions, GifPipeError, BYTES_PER_PIXEL};
use gif::{ColorOutput, DecodeOptions, DisposalMethod};
use std::io::Cursor;
use tracing::{debug, info};

/// Parses an encoded animation into full-size RGBA frames.
pub trait FrameDecoder {
    fn decode(&self, bytes: &[u8]) -> Result<DecodedGif, GifPipeError>;
}

/// GIF decoder backed by the `gif` crate.
///
/// Every frame is placed at its offset on a transparent canvas of the logical
/// screen size. Frames are not composited with their predecessors, so delta
/// encoded input needs a normalizer first.
#[derive(Debug, Clone, Copy, Default)]
pub struct GifFrameDecoder;

impl FrameDecoder for GifFrameDecoder {
    #[tracing::instrument(level = "info", skip_all, fields(bytes = bytes.len()))]
    fn decode(&self, bytes: &[u8]) -> Result<DecodedGif, GifPipeError> {
        let (dimensions, raw_frames) = read_raw_frames(bytes)?;

        let frames: Vec<DecodedFrame> = raw_frames
            .iter()
            .enumerate()
            .map(|(index, raw)| {
                let mut rgba = vec![0u8; dimensions.rgba_len()];
                raw.blit(&mut rgba, dimensions, |_, _| true);
                DecodedFrame {
                    index,
                    rgba,
                    delay_cs: raw.delay_cs,
                }
            })
            .collect();

        info!(
            stage = "decode",
            width = dimensions.width,
            height = dimensions.height,
            frames = frames.len(),
            "GIF decoded"
        );

        Ok(DecodedGif { dimensions, frames })
    }
}

/// One image block as stored in the file: a sub-rectangle plus its disposal.
#[derive(Debug, Clone)]
pub(crate) struct RawFrame {
    pub left: u16,
    pub top: u16,
    pub width: u16,
    pub height: u16,
    pub rgba: Vec<u8>,
    pub delay_cs: u16,
    pub dispose: DisposalMethod,
}

impl RawFrame {
    /// Copies this frame's pixels onto a full-size canvas, clipped to the
    /// screen. `keep(dst, src)` decides per pixel whether the source wins.
    pub fn blit<F>(&self, canvas: &mut [u8], screen: Dimensions, keep: F)
    where
        F: Fn(&[u8], &[u8]) -> bool,
    {
        let screen_w = screen.width as usize;
        let screen_h = screen.height as usize;
        let left = self.left as usize;
        let top = self.top as usize;
        let width = self.width as usize;

        for row in 0..self.height as usize {
            let y = top + row;
            if y >= screen_h {
                break;
            }
            for col in 0..width {
                let x = left + col;
                if x >= screen_w {
                    break;
                }
                let src = (row * width + col) * BYTES_PER_PIXEL;
                let dst = (y * screen_w + x) * BYTES_PER_PIXEL;
                let Some(src_px) = self.rgba.get(src..src + BYTES_PER_PIXEL) else {
                    continue;
                };
                if keep(&canvas[dst..dst + BYTES_PER_PIXEL], src_px) {
                    canvas[dst..dst + BYTES_PER_PIXEL].copy_from_slice(src_px);
                }
            }
        }
    }

    /// Resets this frame's rectangle on the canvas to transparent.
    pub fn clear(&self, canvas: &mut [u8], screen: Dimensions) {
        let screen_w = screen.width as usize;
        let x_end = (self.left as usize + self.width as usize).min(screen_w);
        let y_end = (self.top as usize + self.height as usize).min(screen.height as usize);
        for y in self.top as usize..y_end {
            for x in self.left as usize..x_end {
                let dst = (y * screen_w + x) * BYTES_PER_PIXEL;
                canvas[dst..dst + BYTES_PER_PIXEL].fill(0);
            }
        }
    }
}

fn decode_error(err: impl std::fmt::Display) -> GifPipeError {
    GifPipeError::DecodeFailed {
        message: err.to_string(),
    }
}

/// Reads the screen size and every image block, expanded to RGBA.
pub(crate) fn read_raw_frames(bytes: &[u8]) -> Result<(Dimensions, Vec<RawFrame>), GifPipeError> {
    let mut options = DecodeOptions::new();
    options.set_color_output(ColorOutput::RGBA);
    let mut decoder = options.read_info(Cursor::new(bytes)).map_err(decode_error)?;

    let dimensions = Dimensions::new(decoder.width() as u32, decoder.height() as u32).map_err(decode_error)?;

    let mut frames = Vec::new();
    while let Some(frame) = decoder.read_next_frame().map_err(decode_error)? {
        debug!(
            stage = "decode",
            frame = frames.len(),
            left = frame.left,
            top = frame.top,
            width = frame.width,
            height = frame.height,
            dispose = ?frame.dispose,
            "Image block read"
        );
        frames.push(RawFrame {
            left: frame.left,
            top: frame.top,
            width: frame.width,
            height: frame.height,
            rgba: frame.buffer.to_vec(),
            delay_cs: frame.delay,
            dispose: frame.dispose,
        });
    }

    if frames.is_empty() {
        return Err(GifPipeError::DecodeFailed {
            message: "GIF contains no frames".to_string(),
        });
    }

    Ok((dimensions, frames))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{delta_gif, solid_gif};

    #[test]
    fn test_decodes_frame_count_and_size() {
        let bytes = solid_gif(10, 10, &[[255, 0, 0], [0, 255, 0], [0, 0, 255]]);
        let decoded = GifFrameDecoder.decode(&bytes).unwrap();

        assert_eq!(decoded.dimensions, Dimensions::new(10, 10).unwrap());
        assert_eq!(decoded.frame_count(), 3);
        for (i, frame) in decoded.frames.iter().enumerate() {
            assert_eq!(frame.index, i);
            assert_eq!(frame.rgba.len(), 10 * 10 * 4);
        }
        assert_eq!(&decoded.frames[1].rgba[..4], &[0, 255, 0, 255]);
    }

    #[test]
    fn test_partial_frame_is_not_composited() {
        let bytes = delta_gif();
        let decoded = GifFrameDecoder.decode(&bytes).unwrap();
        assert_eq!(decoded.frame_count(), 2);

        let second = &decoded.frames[1].rgba;
        // Top-left pixel lies outside the 2x2 delta rectangle.
        assert_eq!(&second[..4], &[0, 0, 0, 0]);
        let inside = (2 * 4 + 2) * 4;
        assert_eq!(&second[inside..inside + 4], &[0, 0, 255, 255]);
    }

    #[test]
    fn test_rejects_garbage() {
        let err = GifFrameDecoder.decode(b"definitely not a gif").unwrap_err();
        assert_eq!(err.code(), "E_DECODE");
    }

    #[test]
    fn test_rejects_truncated_input() {
        let bytes = solid_gif(4, 4, &[[1, 2, 3]]);
        let err = GifFrameDecoder.decode(&bytes[..8]).unwrap_err();
        assert_eq!(err.code(), "E_DECODE");
    }
}

use common_types::{DecodedFrame, Dimensions, GifPipeError};
use gif_codec::FrameEncoder;
use image::RgbaImage;
use tracing::debug;

/// Position of the surface being edited within the whole animation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameContext {
    pub width: u32,
    pub height: u32,
    /// Decoded plus appended frames.
    pub total_frames: usize,
    /// 1-based.
    pub current_frame: usize,
}

/// Caller logic that draws on each decoded frame.
pub trait FrameEditor {
    fn edit(&mut self, surface: &mut RgbaImage, ctx: &FrameContext);
}

impl<F> FrameEditor for F
where
    F: FnMut(&mut RgbaImage, &FrameContext),
{
    fn edit(&mut self, surface: &mut RgbaImage, ctx: &FrameContext) {
        self(surface, ctx)
    }
}

/// Leaves every frame untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEditor;

impl FrameEditor for NoopEditor {
    fn edit(&mut self, _surface: &mut RgbaImage, _ctx: &FrameContext) {}
}

/// Wraps a decoded frame in a surface of the screen size.
pub fn surface_from_frame(frame: DecodedFrame, dims: Dimensions) -> Result<RgbaImage, GifPipeError> {
    let len = frame.rgba.len();
    RgbaImage::from_raw(dims.width, dims.height, frame.rgba).ok_or_else(|| GifPipeError::InvalidFrameData {
        message: format!("frame {} has {} bytes, expected {}", frame.index, len, dims.rgba_len()),
    })
}

/// Runs the editor over every decoded frame in order and feeds the encoder.
///
/// `total_frames` is the encoder's declared total, which may exceed
/// `frames.len()` when appended frames follow.
#[tracing::instrument(level = "info", skip_all, fields(frames = frames.len(), total_frames = total_frames))]
pub fn render_frames<E, Ed>(
    frames: Vec<DecodedFrame>,
    dims: Dimensions,
    total_frames: usize,
    editor: &mut Ed,
    encoder: &mut E,
) -> Result<(), GifPipeError>
where
    E: FrameEncoder,
    Ed: FrameEditor,
{
    for (i, frame) in frames.into_iter().enumerate() {
        let mut surface = surface_from_frame(frame, dims)?;
        let ctx = FrameContext {
            width: dims.width,
            height: dims.height,
            total_frames,
            current_frame: i + 1,
        };
        editor.edit(&mut surface, &ctx);
        encoder.add_frame(&surface)?;
        debug!(stage = "render", frame = ctx.current_frame, total_frames, "Frame rendered");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[derive(Default)]
    struct RecordingEncoder {
        frames: Vec<RgbaImage>,
    }

    impl FrameEncoder for RecordingEncoder {
        fn set_delay(&mut self, _: u32) -> Result<(), GifPipeError> {
            Ok(())
        }
        fn set_repeat(&mut self, _: u32) -> Result<(), GifPipeError> {
            Ok(())
        }
        fn set_frame_rate(&mut self, _: u32) -> Result<(), GifPipeError> {
            Ok(())
        }
        fn set_quality(&mut self, _: u32) -> Result<(), GifPipeError> {
            Ok(())
        }
        fn start(&mut self) -> Result<(), GifPipeError> {
            Ok(())
        }
        fn add_frame(&mut self, surface: &RgbaImage) -> Result<(), GifPipeError> {
            self.frames.push(surface.clone());
            Ok(())
        }
        fn finish(self) -> Result<Vec<u8>, GifPipeError> {
            Ok(Vec::new())
        }
    }

    fn frames(dims: Dimensions, n: usize) -> Vec<DecodedFrame> {
        (0..n)
            .map(|index| DecodedFrame {
                index,
                rgba: vec![index as u8; dims.rgba_len()],
                delay_cs: 0,
            })
            .collect()
    }

    #[test]
    fn test_callback_sees_ascending_context() {
        let dims = Dimensions::new(3, 2).unwrap();
        let mut seen = Vec::new();
        let mut editor = |_: &mut RgbaImage, ctx: &FrameContext| seen.push(*ctx);
        let mut encoder = RecordingEncoder::default();

        render_frames(frames(dims, 3), dims, 4, &mut editor, &mut encoder).unwrap();

        let indices: Vec<usize> = seen.iter().map(|c| c.current_frame).collect();
        assert_eq!(indices, vec![1, 2, 3]);
        assert!(seen.iter().all(|c| c.total_frames == 4 && c.width == 3 && c.height == 2));
        assert_eq!(encoder.frames.len(), 3);
    }

    #[test]
    fn test_edits_reach_encoder() {
        let dims = Dimensions::new(2, 2).unwrap();
        let mut editor = |surface: &mut RgbaImage, _: &FrameContext| {
            surface.put_pixel(0, 0, Rgba([1, 2, 3, 255]));
        };
        let mut encoder = RecordingEncoder::default();

        render_frames(frames(dims, 2), dims, 2, &mut editor, &mut encoder).unwrap();

        assert_eq!(encoder.frames[1].get_pixel(0, 0), &Rgba([1, 2, 3, 255]));
        assert_eq!(encoder.frames[1].get_pixel(1, 1), &Rgba([1, 1, 1, 1]));
    }

    #[test]
    fn test_short_frame_rejected() {
        let dims = Dimensions::new(2, 2).unwrap();
        let bad = vec![DecodedFrame {
            index: 0,
            rgba: vec![0; 3],
            delay_cs: 0,
        }];
        let mut encoder = RecordingEncoder::default();
        let err = render_frames(bad, dims, 1, &mut NoopEditor, &mut encoder).unwrap_err();
        assert_eq!(err.code(), "E_FRAME");
    }
}

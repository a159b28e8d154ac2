use crate::frame::{self, Region};
use common_types::{Algorithm, Dimensions, GifPipeError, MAX_QUALITY, MIN_QUALITY};
use gif::{DisposalMethod, Encoder, Repeat};
use image::RgbaImage;
use tracing::{debug, info};

/// Fixed parameters of one encoder instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncoderSpec {
    pub dimensions: Dimensions,
    pub algorithm: Algorithm,
    pub optimiser: bool,
    /// Exact number of `add_frame` calls before `finish`.
    pub total_frames: usize,
}

/// Incremental animation writer.
///
/// Call order: setters, `start`, `add_frame` exactly `total_frames` times,
/// `finish`. Anything else is an `EncoderState` error.
pub trait FrameEncoder {
    fn set_delay(&mut self, delay_ms: u32) -> Result<(), GifPipeError>;
    fn set_repeat(&mut self, repeat: u32) -> Result<(), GifPipeError>;
    fn set_frame_rate(&mut self, fps: u32) -> Result<(), GifPipeError>;
    fn set_quality(&mut self, quality: u32) -> Result<(), GifPipeError>;
    fn start(&mut self) -> Result<(), GifPipeError>;
    fn add_frame(&mut self, surface: &RgbaImage) -> Result<(), GifPipeError>;
    fn finish(self) -> Result<Vec<u8>, GifPipeError>;
}

/// Creates encoders; the seam the orchestrator is generic over.
pub trait EncoderFactory {
    type Encoder: FrameEncoder;

    fn create(&self, spec: EncoderSpec) -> Result<Self::Encoder, GifPipeError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GifEncoderFactory;

impl EncoderFactory for GifEncoderFactory {
    type Encoder = GifAccumulator;

    fn create(&self, spec: EncoderSpec) -> Result<GifAccumulator, GifPipeError> {
        Ok(GifAccumulator::new(spec))
    }
}

enum State {
    Configuring,
    Encoding(Encoder<Vec<u8>>),
    Done,
}

/// Last added frame. It is written once the next frame (or `finish`)
/// decides its disposal.
struct PendingFrame {
    rgba: Vec<u8>,
    opaque: bool,
    region: Region,
}

/// GIF89a accumulator writing into memory.
pub struct GifAccumulator {
    spec: EncoderSpec,
    delay_cs: u16,
    repeat: Repeat,
    quality: u32,
    state: State,
    added: usize,
    written: usize,
    pending: Option<PendingFrame>,
    pixels_skipped: usize,
}

fn state_error(message: impl Into<String>) -> GifPipeError {
    GifPipeError::EncoderState {
        message: message.into(),
    }
}

fn encoding_error(err: impl std::fmt::Display) -> GifPipeError {
    GifPipeError::EncodingFailed {
        message: err.to_string(),
    }
}

impl GifAccumulator {
    pub fn new(spec: EncoderSpec) -> Self {
        Self {
            spec,
            delay_cs: 0,
            repeat: Repeat::Infinite,
            quality: 10,
            state: State::Configuring,
            added: 0,
            written: 0,
            pending: None,
            pixels_skipped: 0,
        }
    }

    pub fn spec(&self) -> EncoderSpec {
        self.spec
    }

    /// Per-frame delay that will be written, in centiseconds.
    pub fn delay_cs(&self) -> u16 {
        self.delay_cs
    }

    pub fn repeat(&self) -> Repeat {
        self.repeat
    }

    pub fn quality(&self) -> u32 {
        self.quality
    }

    pub fn frames_added(&self) -> usize {
        self.added
    }

    fn ensure_configuring(&self, setter: &str) -> Result<(), GifPipeError> {
        match self.state {
            State::Configuring => Ok(()),
            _ => Err(state_error(format!("{} called after start", setter))),
        }
    }

    /// Chooses the block to write: the changed rectangle when the optimiser can
    /// rely on the previous frame staying on screen, otherwise the full frame.
    fn region_for(&self, rgba: &[u8], opaque: bool) -> Region {
        let dims = self.spec.dimensions;
        match &self.pending {
            Some(prev) if self.spec.optimiser && opaque && prev.opaque => {
                frame::changed_region(&prev.rgba, rgba, dims)
            }
            _ => Region::full(dims),
        }
    }

    /// Writes the pending frame. When the next block is a sub-rectangle the
    /// pending picture must stay on screen (`Keep`); otherwise the whole
    /// screen is cleared after it (`Background`), so a full frame is written
    /// even if only a rectangle changed.
    fn flush_pending(&mut self, next_keeps: bool) -> Result<(), GifPipeError> {
        let Some(pending) = self.pending.take() else {
            return Ok(());
        };
        let dims = self.spec.dimensions;
        let (region, dispose) = if next_keeps {
            (pending.region, DisposalMethod::Keep)
        } else {
            (Region::full(dims), DisposalMethod::Background)
        };

        let block = frame::encode_region(
            &pending.rgba,
            dims,
            region,
            self.delay_cs,
            dispose,
            self.spec.algorithm,
            self.quality,
        )?;

        let State::Encoding(encoder) = &mut self.state else {
            return Err(state_error("encoder left the encoding state"));
        };
        encoder
            .write_frame(&block)
            .map_err(|e| encoding_error(format!("frame {}: {}", self.written, e)))?;

        if !region.is_full(dims) {
            self.pixels_skipped += dims.pixel_count() - region.width as usize * region.height as usize;
        }
        debug!(
            stage = "encode",
            frame = self.written,
            left = region.left,
            top = region.top,
            width = region.width,
            height = region.height,
            dispose = ?dispose,
            "Frame written"
        );
        self.written += 1;
        Ok(())
    }
}

impl FrameEncoder for GifAccumulator {
    fn set_delay(&mut self, delay_ms: u32) -> Result<(), GifPipeError> {
        self.ensure_configuring("set_delay")?;
        self.delay_cs = (delay_ms.saturating_add(5) / 10).min(u16::MAX as u32) as u16;
        Ok(())
    }

    fn set_repeat(&mut self, repeat: u32) -> Result<(), GifPipeError> {
        self.ensure_configuring("set_repeat")?;
        self.repeat = match repeat {
            0 => Repeat::Infinite,
            n => Repeat::Finite(n.min(u16::MAX as u32) as u16),
        };
        Ok(())
    }

    fn set_frame_rate(&mut self, fps: u32) -> Result<(), GifPipeError> {
        self.ensure_configuring("set_frame_rate")?;
        if fps > 0 {
            self.delay_cs = ((100 + fps / 2) / fps) as u16;
        }
        Ok(())
    }

    fn set_quality(&mut self, quality: u32) -> Result<(), GifPipeError> {
        self.ensure_configuring("set_quality")?;
        self.quality = quality.clamp(MIN_QUALITY, MAX_QUALITY);
        Ok(())
    }

    fn start(&mut self) -> Result<(), GifPipeError> {
        self.ensure_configuring("start")?;
        let dims = self.spec.dimensions;
        let mut encoder =
            Encoder::new(Vec::new(), dims.width_u16(), dims.height_u16(), &[]).map_err(encoding_error)?;
        encoder.set_repeat(self.repeat).map_err(encoding_error)?;

        info!(
            stage = "encode",
            width = dims.width,
            height = dims.height,
            total_frames = self.spec.total_frames,
            algorithm = %self.spec.algorithm,
            optimiser = self.spec.optimiser,
            delay_cs = self.delay_cs,
            quality = self.quality,
            "Encoder started"
        );

        self.state = State::Encoding(encoder);
        Ok(())
    }

    fn add_frame(&mut self, surface: &RgbaImage) -> Result<(), GifPipeError> {
        let dims = self.spec.dimensions;
        if !matches!(self.state, State::Encoding(_)) {
            return Err(state_error("add_frame called before start or after finish"));
        }
        if self.added >= self.spec.total_frames {
            return Err(state_error(format!(
                "frame {} exceeds declared total of {}",
                self.added + 1,
                self.spec.total_frames
            )));
        }
        if surface.dimensions() != (dims.width, dims.height) {
            return Err(GifPipeError::InvalidFrameData {
                message: format!(
                    "surface is {}x{}, encoder expects {}",
                    surface.width(),
                    surface.height(),
                    dims
                ),
            });
        }

        let rgba = surface.as_raw();
        let opaque = frame::is_opaque(rgba);
        let region = self.region_for(rgba, opaque);
        self.flush_pending(!region.is_full(dims))?;

        self.added += 1;
        self.pending = Some(PendingFrame {
            rgba: rgba.to_vec(),
            opaque,
            region,
        });
        Ok(())
    }

    fn finish(mut self) -> Result<Vec<u8>, GifPipeError> {
        if self.added != self.spec.total_frames {
            return Err(state_error(format!(
                "finish after {} of {} frames",
                self.added, self.spec.total_frames
            )));
        }
        if !matches!(self.state, State::Encoding(_)) {
            return Err(state_error("finish called before start"));
        }
        // Nothing follows the last frame, so it is written whole.
        self.flush_pending(false)?;
        let State::Encoding(encoder) = std::mem::replace(&mut self.state, State::Done) else {
            return Err(state_error("finish called before start"));
        };
        let bytes = encoder.into_inner().map_err(encoding_error)?;

        info!(
            stage = "encode",
            frames = self.added,
            size_bytes = bytes.len(),
            pixels_skipped = self.pixels_skipped,
            "GIF encoding complete"
        );
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::count_image_blocks;
    use image::codecs::gif::GifDecoder;
    use image::{AnimationDecoder, Rgba};
    use std::io::Cursor;

    fn spec(total: usize, optimiser: bool) -> EncoderSpec {
        EncoderSpec {
            dimensions: Dimensions::new(8, 8).unwrap(),
            algorithm: Algorithm::Octree,
            optimiser,
            total_frames: total,
        }
    }

    fn surface(color: [u8; 4]) -> RgbaImage {
        RgbaImage::from_pixel(8, 8, Rgba(color))
    }

    fn encode_all(frames: &[RgbaImage], optimiser: bool) -> Vec<u8> {
        let mut enc = GifAccumulator::new(spec(frames.len(), optimiser));
        enc.start().unwrap();
        for f in frames {
            enc.add_frame(f).unwrap();
        }
        enc.finish().unwrap()
    }

    /// What a viewer shows for each frame, disposal applied.
    fn displayed(bytes: &[u8]) -> Vec<RgbaImage> {
        GifDecoder::new(Cursor::new(bytes))
            .unwrap()
            .into_frames()
            .collect_frames()
            .unwrap()
            .into_iter()
            .map(|f| f.into_buffer())
            .collect()
    }

    fn assert_shows(actual: &RgbaImage, expected: &RgbaImage, frame: usize) {
        for (x, y, want) in expected.enumerate_pixels() {
            let got = actual.get_pixel(x, y);
            if want[3] == 0 {
                assert_eq!(got[3], 0, "frame {} pixel ({},{}) should be clear", frame, x, y);
            } else {
                assert_eq!(got, want, "frame {} pixel ({},{})", frame, x, y);
            }
        }
    }

    #[test]
    fn test_delay_from_frame_rate() {
        let mut enc = GifAccumulator::new(spec(1, false));
        enc.set_delay(250).unwrap();
        assert_eq!(enc.delay_cs(), 25);
        enc.set_frame_rate(30).unwrap();
        assert_eq!(enc.delay_cs(), 3);
        enc.set_frame_rate(60).unwrap();
        assert_eq!(enc.delay_cs(), 2);
    }

    #[test]
    fn test_delay_saturates() {
        let mut enc = GifAccumulator::new(spec(1, false));
        enc.set_delay(u32::MAX).unwrap();
        assert_eq!(enc.delay_cs(), u16::MAX);
        enc.set_delay(u32::MAX - 4).unwrap();
        assert_eq!(enc.delay_cs(), u16::MAX);
    }

    #[test]
    fn test_zero_frame_rate_keeps_delay() {
        let mut enc = GifAccumulator::new(spec(1, false));
        enc.set_delay(100).unwrap();
        enc.set_frame_rate(0).unwrap();
        assert_eq!(enc.delay_cs(), 10);
    }

    #[test]
    fn test_repeat_and_quality_mapping() {
        let mut enc = GifAccumulator::new(spec(1, false));
        enc.set_repeat(0).unwrap();
        assert!(matches!(enc.repeat(), Repeat::Infinite));
        enc.set_repeat(3).unwrap();
        assert!(matches!(enc.repeat(), Repeat::Finite(3)));
        enc.set_quality(0).unwrap();
        assert_eq!(enc.quality(), 1);
        enc.set_quality(500).unwrap();
        assert_eq!(enc.quality(), 100);
    }

    #[test]
    fn test_full_lifecycle() {
        let mut enc = GifAccumulator::new(spec(2, false));
        enc.start().unwrap();
        enc.add_frame(&surface([255, 0, 0, 255])).unwrap();
        enc.add_frame(&surface([0, 0, 255, 255])).unwrap();
        let bytes = enc.finish().unwrap();

        assert_eq!(&bytes[..6], b"GIF89a");
        assert_eq!(bytes.last(), Some(&0x3B));
        assert_eq!(count_image_blocks(&bytes), 2);
    }

    #[test]
    fn test_out_of_order_calls_rejected() {
        let mut enc = GifAccumulator::new(spec(1, false));
        let err = enc.add_frame(&surface([0, 0, 0, 255])).unwrap_err();
        assert_eq!(err.code(), "E_ENCODER_STATE");

        enc.start().unwrap();
        assert_eq!(enc.set_delay(10).unwrap_err().code(), "E_ENCODER_STATE");
        assert_eq!(enc.start().unwrap_err().code(), "E_ENCODER_STATE");
    }

    #[test]
    fn test_frame_count_enforced() {
        let mut enc = GifAccumulator::new(spec(1, false));
        enc.start().unwrap();
        enc.add_frame(&surface([0, 0, 0, 255])).unwrap();
        let err = enc.add_frame(&surface([0, 0, 0, 255])).unwrap_err();
        assert_eq!(err.code(), "E_ENCODER_STATE");

        let mut short = GifAccumulator::new(spec(2, false));
        short.start().unwrap();
        short.add_frame(&surface([0, 0, 0, 255])).unwrap();
        assert_eq!(short.finish().unwrap_err().code(), "E_ENCODER_STATE");
    }

    #[test]
    fn test_surface_size_checked() {
        let mut enc = GifAccumulator::new(spec(1, false));
        enc.start().unwrap();
        let wrong = RgbaImage::new(4, 4);
        assert_eq!(enc.add_frame(&wrong).unwrap_err().code(), "E_FRAME");
    }

    #[test]
    fn test_optimiser_shrinks_output() {
        let frames: Vec<RgbaImage> = (0..4u8)
            .map(|i| {
                let mut img = surface([30, 60, 90, 255]);
                img.put_pixel(i as u32, i as u32, Rgba([255, 255, 255, 255]));
                img
            })
            .collect();

        let plain = encode_all(&frames, false);
        let optimised = encode_all(&frames, true);
        assert_eq!(count_image_blocks(&optimised), 4);
        assert!(optimised.len() < plain.len());
    }

    #[test]
    fn test_transparent_pixel_after_opaque_frame_stays_clear() {
        let red = surface([255, 0, 0, 255]);
        let mut blue = surface([0, 0, 255, 255]);
        blue.put_pixel(0, 0, Rgba([0, 0, 0, 0]));

        for optimiser in [false, true] {
            let shown = displayed(&encode_all(&[red.clone(), blue.clone()], optimiser));
            assert_eq!(shown.len(), 2);
            assert_eq!(shown[1].get_pixel(0, 0)[3], 0, "optimiser {}", optimiser);
            assert_eq!(shown[1].get_pixel(1, 1), &Rgba([0, 0, 255, 255]));
        }
    }

    #[test]
    fn test_optimised_frames_display_as_added() {
        let base = surface([30, 60, 90, 255]);
        let mut one = base.clone();
        one.put_pixel(2, 3, Rgba([255, 255, 255, 255]));
        let mut two = one.clone();
        two.put_pixel(6, 1, Rgba([0, 200, 0, 255]));
        let mut holey = two.clone();
        holey.put_pixel(4, 4, Rgba([0, 0, 0, 0]));
        let frames = [base, one, two, holey];

        let shown = displayed(&encode_all(&frames, true));
        assert_eq!(shown.len(), frames.len());
        for (i, (actual, expected)) in shown.iter().zip(&frames).enumerate() {
            assert_shows(actual, expected, i);
        }
    }

    #[test]
    fn test_optimiser_writes_sub_rectangles_between_opaque_frames() {
        let base = surface([30, 60, 90, 255]);
        let mut next = base.clone();
        next.put_pixel(1, 1, Rgba([255, 255, 255, 255]));
        let mut last = next.clone();
        last.put_pixel(5, 5, Rgba([255, 255, 255, 255]));
        let bytes = encode_all(&[base, next, last], true);

        let mut decoder = gif::DecodeOptions::new().read_info(Cursor::new(&bytes)).unwrap();
        let mut blocks = Vec::new();
        while let Some(frame) = decoder.read_next_frame().unwrap() {
            blocks.push((frame.width, frame.height, frame.dispose));
        }
        assert_eq!(
            blocks,
            vec![
                (8, 8, DisposalMethod::Keep),
                (1, 1, DisposalMethod::Keep),
                (8, 8, DisposalMethod::Background),
            ]
        );
    }
}

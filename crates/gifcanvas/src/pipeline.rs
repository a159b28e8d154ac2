use crate::diagnostics::{Diagnostic, DiagnosticSink, TracingSink};
use crate::input::Input;
use crate::options::RenderOptions;
use crate::renderer::{render_frames, FrameEditor};
use common_types::{Dimensions, GifPipeError};
use gif_codec::{
    Coalescer, EncoderFactory, EncoderSpec, FrameDecoder, FrameEncoder, GifEncoderFactory, GifFrameDecoder,
    Normalizer,
};
use image::RgbaImage;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

pub const DEFAULT_NORMALIZE_TIMEOUT: Duration = Duration::from_secs(30);

/// Result of one render.
#[derive(Debug, Clone, Serialize)]
pub struct RenderOutput {
    #[serde(skip)]
    pub bytes: Vec<u8>,
    pub dimensions: Dimensions,
    pub decoded_frames: usize,
    pub appended_frames: usize,
    pub size_bytes: usize,
    pub processing_time_ms: u64,
}

impl RenderOutput {
    pub fn total_frames(&self) -> usize {
        self.decoded_frames + self.appended_frames
    }
}

/// Normalize, decode, edit and re-encode an animation.
///
/// Holds no per-render state, so one pipeline can serve concurrent renders.
pub struct Pipeline<D = GifFrameDecoder, F = GifEncoderFactory> {
    normalizer: Arc<dyn Normalizer>,
    decoder: D,
    encoder_factory: F,
    diagnostics: Arc<dyn DiagnosticSink>,
    normalize_timeout: Duration,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self {
            normalizer: Arc::new(Coalescer::default()),
            decoder: GifFrameDecoder,
            encoder_factory: GifEncoderFactory,
            diagnostics: Arc::new(TracingSink),
            normalize_timeout: DEFAULT_NORMALIZE_TIMEOUT,
        }
    }
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<D, F> Pipeline<D, F>
where
    D: FrameDecoder,
    F: EncoderFactory,
{
    pub fn with_normalizer(mut self, normalizer: impl Normalizer + 'static) -> Self {
        self.normalizer = Arc::new(normalizer);
        self
    }

    pub fn with_diagnostics(mut self, sink: Arc<dyn DiagnosticSink>) -> Self {
        self.diagnostics = sink;
        self
    }

    pub fn with_normalize_timeout(mut self, timeout: Duration) -> Self {
        self.normalize_timeout = timeout;
        self
    }

    pub fn with_decoder<D2: FrameDecoder>(self, decoder: D2) -> Pipeline<D2, F> {
        Pipeline {
            normalizer: self.normalizer,
            decoder,
            encoder_factory: self.encoder_factory,
            diagnostics: self.diagnostics,
            normalize_timeout: self.normalize_timeout,
        }
    }

    pub fn with_encoder_factory<F2: EncoderFactory>(self, encoder_factory: F2) -> Pipeline<D, F2> {
        Pipeline {
            normalizer: self.normalizer,
            decoder: self.decoder,
            encoder_factory,
            diagnostics: self.diagnostics,
            normalize_timeout: self.normalize_timeout,
        }
    }

    #[tracing::instrument(level = "info", skip_all, fields(coalesce = options.coalesce, appended = options.frames.len()))]
    pub async fn render<Ed: FrameEditor>(
        &self,
        input: impl Into<Input>,
        mut editor: Ed,
        options: &RenderOptions,
    ) -> Result<RenderOutput, GifPipeError> {
        let start_time = Instant::now();

        let (config, corrections) = options.resolve();
        for diagnostic in corrections {
            self.diagnostics.report(diagnostic);
        }

        let mut bytes = input.into().load().await?;
        if options.coalesce {
            bytes = self.normalize(bytes).await;
        }

        let decoded = self.decoder.decode(&bytes)?;
        drop(bytes);
        let dims = decoded.dimensions;
        let decoded_frames = decoded.frame_count();

        let appended = decode_appended(&options.frames, dims)?;
        let total_frames = decoded_frames + appended.len();

        let mut encoder = self.encoder_factory.create(EncoderSpec {
            dimensions: dims,
            algorithm: config.algorithm,
            optimiser: config.optimiser,
            total_frames,
        })?;
        encoder.set_delay(config.delay_ms)?;
        encoder.set_repeat(config.repeat)?;
        encoder.set_frame_rate(config.frame_rate)?;
        encoder.set_quality(config.quality)?;
        encoder.start()?;

        render_frames(decoded.frames, dims, total_frames, &mut editor, &mut encoder)?;
        for surface in &appended {
            encoder.add_frame(surface)?;
        }

        let bytes = encoder.finish()?;
        let processing_time_ms = start_time.elapsed().as_millis() as u64;

        info!(
            stage = "pipeline",
            dimensions = %dims,
            decoded_frames,
            appended_frames = appended.len(),
            size_bytes = bytes.len(),
            duration_ms = processing_time_ms,
            "Render completed"
        );

        Ok(RenderOutput {
            size_bytes: bytes.len(),
            bytes,
            dimensions: dims,
            decoded_frames,
            appended_frames: appended.len(),
            processing_time_ms,
        })
    }

    /// Runs the normalizer on the blocking pool. Never fails: any problem is
    /// reported and the original bytes come back.
    async fn normalize(&self, bytes: Vec<u8>) -> Vec<u8> {
        let normalizer = Arc::clone(&self.normalizer);
        let name = normalizer.name().to_string();
        let source = bytes.clone();
        let task = tokio::task::spawn_blocking(move || normalizer.normalize(&source));

        let outcome = match tokio::time::timeout(self.normalize_timeout, task).await {
            Ok(Ok(Ok(normalized))) if !normalized.is_empty() => Ok(normalized),
            Ok(Ok(Ok(_))) => Err(GifPipeError::NormalizationFailed {
                message: "normalizer returned no data".to_string(),
            }),
            Ok(Ok(Err(err))) if err.is_recoverable() => Err(err),
            Ok(Ok(Err(err))) => Err(GifPipeError::NormalizationFailed {
                message: err.to_string(),
            }),
            Ok(Err(join_err)) => Err(GifPipeError::NormalizationFailed {
                message: join_err.to_string(),
            }),
            Err(_) => Err(GifPipeError::TimeoutExceeded {
                timeout_ms: self.normalize_timeout.as_millis() as u64,
            }),
        };

        match outcome {
            Ok(normalized) => {
                debug!(
                    stage = "normalize",
                    normalizer = %name,
                    before = bytes.len(),
                    after = normalized.len(),
                    "Input normalized"
                );
                normalized
            }
            Err(err) => {
                self.diagnostics.report(Diagnostic::NormalizationFailed {
                    normalizer: name,
                    code: err.code().to_string(),
                    message: err.to_string(),
                });
                bytes
            }
        }
    }
}

/// Decodes appended stills, each drawn at the origin of a fresh transparent
/// surface of the screen size.
fn decode_appended(frames: &[Vec<u8>], dims: Dimensions) -> Result<Vec<RgbaImage>, GifPipeError> {
    frames
        .iter()
        .enumerate()
        .map(|(i, encoded)| {
            let still = image::load_from_memory(encoded).map_err(|e| GifPipeError::InvalidFrameData {
                message: format!("appended frame {}: {}", i, e),
            })?;
            let mut surface = RgbaImage::new(dims.width, dims.height);
            image::imageops::replace(&mut surface, &still.to_rgba8(), 0, 0);
            Ok(surface)
        })
        .collect()
}

/// Renders with the default pipeline and returns the encoded GIF.
pub async fn render_gif<Ed: FrameEditor>(
    input: impl Into<Input>,
    editor: Ed,
    options: &RenderOptions,
) -> Result<Vec<u8>, GifPipeError> {
    Pipeline::default()
        .render(input, editor, options)
        .await
        .map(|output| output.bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgba};
    use std::io::Cursor;

    fn png(width: u32, height: u32, color: [u8; 4]) -> Vec<u8> {
        let img = RgbaImage::from_pixel(width, height, Rgba(color));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    #[test]
    fn test_appended_frame_drawn_at_origin() {
        let dims = Dimensions::new(4, 3).unwrap();
        let surfaces = decode_appended(&[png(2, 2, [9, 8, 7, 255])], dims).unwrap();

        assert_eq!(surfaces.len(), 1);
        assert_eq!(surfaces[0].dimensions(), (4, 3));
        assert_eq!(surfaces[0].get_pixel(1, 1), &Rgba([9, 8, 7, 255]));
        assert_eq!(surfaces[0].get_pixel(3, 2), &Rgba([0, 0, 0, 0]));
    }

    #[test]
    fn test_oversized_appended_frame_clipped() {
        let dims = Dimensions::new(2, 2).unwrap();
        let surfaces = decode_appended(&[png(5, 5, [1, 1, 1, 255])], dims).unwrap();
        assert_eq!(surfaces[0].dimensions(), (2, 2));
        assert_eq!(surfaces[0].get_pixel(1, 1), &Rgba([1, 1, 1, 255]));
    }

    #[test]
    fn test_undecodable_appended_frame() {
        let dims = Dimensions::new(2, 2).unwrap();
        let err = decode_appended(&[b"nope".to_vec()], dims).unwrap_err();
        assert_eq!(err.code(), "E_FRAME");
    }

    #[test]
    fn test_each_appended_frame_gets_own_surface() {
        let dims = Dimensions::new(3, 3).unwrap();
        let surfaces =
            decode_appended(&[png(3, 3, [255, 0, 0, 255]), png(1, 1, [0, 255, 0, 255])], dims).unwrap();
        // The second still must not show the first through its empty area.
        assert_eq!(surfaces[1].get_pixel(2, 2), &Rgba([0, 0, 0, 0]));
    }
}

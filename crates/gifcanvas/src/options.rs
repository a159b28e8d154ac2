use crate::diagnostics::Diagnostic;
use common_types::{
    Algorithm, EncoderConfig, DEFAULT_DELAY_MS, DEFAULT_FRAME_RATE, DEFAULT_QUALITY, DEFAULT_REPEAT, MAX_QUALITY,
    MIN_QUALITY,
};
use serde::{Deserialize, Serialize};

/// Caller-facing render options. Every field has a default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderOptions {
    /// Normalize the input before decoding.
    pub coalesce: bool,
    /// Per-frame delay in milliseconds.
    pub delay: u32,
    /// Loop count, 0 loops forever.
    pub repeat: u32,
    /// `neuquant` or `octree`, case-insensitive.
    pub algorithm: String,
    /// Write only changed rectangles between opaque frames.
    pub optimiser: bool,
    /// Frame rate; when non-zero it overrides `delay`.
    pub fps: u32,
    /// 1..=100, lower is better.
    pub quality: u32,
    /// Encoded still images appended after the decoded frames.
    #[serde(skip)]
    pub frames: Vec<Vec<u8>>,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            coalesce: false,
            delay: DEFAULT_DELAY_MS,
            repeat: DEFAULT_REPEAT,
            algorithm: Algorithm::default().as_str().to_string(),
            optimiser: false,
            fps: DEFAULT_FRAME_RATE,
            quality: DEFAULT_QUALITY,
            frames: Vec::new(),
        }
    }
}

impl RenderOptions {
    /// Validated encoder settings plus a diagnostic for every correction made.
    pub fn resolve(&self) -> (EncoderConfig, Vec<Diagnostic>) {
        let mut diagnostics = Vec::new();

        let algorithm = Algorithm::parse(&self.algorithm).unwrap_or_else(|| {
            let fallback = Algorithm::default();
            diagnostics.push(Diagnostic::InvalidAlgorithm {
                requested: self.algorithm.clone(),
                used: fallback.as_str().to_string(),
            });
            fallback
        });

        let quality = self.quality.clamp(MIN_QUALITY, MAX_QUALITY);
        if quality != self.quality {
            diagnostics.push(Diagnostic::QualityClamped {
                requested: self.quality,
                used: quality,
            });
        }

        let config = EncoderConfig {
            algorithm,
            optimiser: self.optimiser,
            delay_ms: self.delay,
            repeat: self.repeat,
            frame_rate: self.fps,
            quality,
        };
        (config, diagnostics)
    }
}

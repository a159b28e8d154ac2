use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Bytes per pixel of every decoded frame and drawable surface (RGBA8).
pub const BYTES_PER_PIXEL: usize = 4;
/// Largest palette a GIF frame can carry.
pub const MAX_PALETTE_SIZE: usize = 256;
/// Pixels with alpha below this are written as the transparent palette entry.
pub const TRANSPARENCY_THRESHOLD: u8 = 128;

pub const DEFAULT_DELAY_MS: u32 = 0;
pub const DEFAULT_REPEAT: u32 = 0;
pub const DEFAULT_FRAME_RATE: u32 = 60;
pub const DEFAULT_QUALITY: u32 = 1;
pub const MIN_QUALITY: u32 = 1;
pub const MAX_QUALITY: u32 = 100;

/// Logical screen size shared by every frame of one render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    /// Both sides must be positive and fit the 16-bit GIF screen descriptor.
    pub fn new(width: u32, height: u32) -> Result<Self, GifPipeError> {
        if width == 0 || height == 0 {
            return Err(GifPipeError::InvalidDimensions {
                message: format!("{}x{} has a zero side", width, height),
            });
        }
        if width > u16::MAX as u32 || height > u16::MAX as u32 {
            return Err(GifPipeError::InvalidDimensions {
                message: format!("{}x{} exceeds the GIF limit of {}", width, height, u16::MAX),
            });
        }
        Ok(Self { width, height })
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Exact byte length of one RGBA frame of this size.
    pub fn rgba_len(&self) -> usize {
        self.pixel_count() * BYTES_PER_PIXEL
    }

    pub fn width_u16(&self) -> u16 {
        self.width as u16
    }

    pub fn height_u16(&self) -> u16 {
        self.height as u16
    }
}

impl fmt::Display for Dimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// One decoded frame, full screen size, not composited with its neighbours.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedFrame {
    pub index: usize,
    pub rgba: Vec<u8>,
    /// Source delay in centiseconds, kept for normalizers that re-encode.
    pub delay_cs: u16,
}

/// Output of a decoder: screen size plus frames in presentation order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedGif {
    pub dimensions: Dimensions,
    pub frames: Vec<DecodedFrame>,
}

impl DecodedGif {
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }
}

/// Palette reduction strategy used by the encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Algorithm {
    /// Neural-net quantizer, good on continuous-tone frames.
    #[default]
    NeuQuant,
    /// Octree quantizer, exact on flat-color frames.
    Octree,
}

impl Algorithm {
    /// Case-insensitive lookup; `None` for anything unrecognized.
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "neuquant" => Some(Algorithm::NeuQuant),
            "octree" => Some(Algorithm::Octree),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::NeuQuant => "neuquant",
            Algorithm::Octree => "octree",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolved encoder settings after defaults and corrections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncoderConfig {
    pub algorithm: Algorithm,
    pub optimiser: bool,
    pub delay_ms: u32,
    /// 0 loops forever.
    pub repeat: u32,
    /// 0 leaves `delay_ms` in effect.
    pub frame_rate: u32,
    /// 1..=100, lower is better for NeuQuant.
    pub quality: u32,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::NeuQuant,
            optimiser: false,
            delay_ms: DEFAULT_DELAY_MS,
            repeat: DEFAULT_REPEAT,
            frame_rate: DEFAULT_FRAME_RATE,
            quality: DEFAULT_QUALITY,
        }
    }
}

/// Structured error taxonomy with stable codes
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GifPipeError {
    // Normalization (recoverable, reported through diagnostics)
    #[error("E_NORMALIZE: normalization failed: {message}")]
    NormalizationFailed { message: String },

    #[error("E_NORMALIZE_TIMEOUT: normalization exceeded {timeout_ms} ms")]
    TimeoutExceeded { timeout_ms: u64 },

    // Decoding (fatal)
    #[error("E_DECODE: input is not a decodable animated GIF: {message}")]
    DecodeFailed { message: String },

    #[error("E_DIMENSIONS: invalid dimensions: {message}")]
    InvalidDimensions { message: String },

    #[error("E_FRAME: invalid frame data: {message}")]
    InvalidFrameData { message: String },

    // Quantization
    #[error("E_QUANT: quantization failed: {message}")]
    QuantizationFailed { message: String },

    // Encoding
    #[error("E_ENCODER_STATE: encoder used out of order: {message}")]
    EncoderState { message: String },

    #[error("E_ENCODE: GIF encoding failed: {message}")]
    EncodingFailed { message: String },

    // Infrastructure
    #[error("E_IO: I/O operation failed: {message}")]
    IoFailed { message: String },
}

impl GifPipeError {
    /// Get structured error code for logging and monitoring
    pub fn code(&self) -> &'static str {
        match self {
            GifPipeError::NormalizationFailed { .. } => "E_NORMALIZE",
            GifPipeError::TimeoutExceeded { .. } => "E_NORMALIZE_TIMEOUT",
            GifPipeError::DecodeFailed { .. } => "E_DECODE",
            GifPipeError::InvalidDimensions { .. } => "E_DIMENSIONS",
            GifPipeError::InvalidFrameData { .. } => "E_FRAME",
            GifPipeError::QuantizationFailed { .. } => "E_QUANT",
            GifPipeError::EncoderState { .. } => "E_ENCODER_STATE",
            GifPipeError::EncodingFailed { .. } => "E_ENCODE",
            GifPipeError::IoFailed { .. } => "E_IO",
        }
    }

    /// Errors the pipeline absorbs with a fallback instead of returning.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            GifPipeError::NormalizationFailed { .. } | GifPipeError::TimeoutExceeded { .. }
        )
    }
}

impl From<std::io::Error> for GifPipeError {
    fn from(err: std::io::Error) -> Self {
        GifPipeError::IoFailed {
            message: err.to_string(),
        }
    }
}

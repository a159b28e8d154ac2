//! GIF decoding, normalization and incremental encoding.

pub mod decoder;
pub mod encoder;
pub mod frame;
pub mod normalize;

pub use decoder::{FrameDecoder, GifFrameDecoder};
pub use encoder::{EncoderFactory, EncoderSpec, FrameEncoder, GifAccumulator, GifEncoderFactory};
pub use frame::Region;
pub use normalize::{Coalescer, ExternalCoalescer, Normalizer};

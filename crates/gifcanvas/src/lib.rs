//! Per-frame editing of animated GIFs.
//!
//! Normalize (optional), decode, hand each frame to caller drawing code,
//! append extra stills, and re-encode.

pub mod diagnostics;
pub mod input;
pub mod options;
pub mod pipeline;
pub mod renderer;

use std::sync::Once;
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

pub use common_types::{Algorithm, DecodedFrame, DecodedGif, Dimensions, EncoderConfig, GifPipeError};
pub use diagnostics::{Diagnostic, DiagnosticSink, MemorySink, TracingSink};
pub use gif_codec::{
    Coalescer, EncoderFactory, EncoderSpec, ExternalCoalescer, FrameDecoder, FrameEncoder, GifAccumulator,
    GifEncoderFactory, GifFrameDecoder, Normalizer,
};
pub use input::Input;
pub use options::RenderOptions;
pub use pipeline::{render_gif, Pipeline, RenderOutput, DEFAULT_NORMALIZE_TIMEOUT};
pub use renderer::{FrameContext, FrameEditor, NoopEditor};

static INIT: Once = Once::new();

/// Install the fmt subscriber once (`RUST_LOG` overrides the `info` default)
/// and return a fresh session id.
pub fn init_tracing() -> String {
    let session_id = Uuid::new_v4();

    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        // Another subscriber may already be installed by the host application.
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init();
    });

    info!("Initialized tracing with session {}", session_id);
    session_id.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_tracing_is_idempotent() {
        let first = init_tracing();
        let second = init_tracing();
        assert!(!first.is_empty());
        assert_ne!(first, second);
        assert!(Uuid::parse_str(&first).is_ok());
    }
}

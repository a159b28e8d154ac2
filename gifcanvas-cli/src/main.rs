use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use gifcanvas::{
    init_tracing, Coalescer, ExternalCoalescer, FrameContext, Pipeline, RenderOptions, RenderOutput,
};
use image::{Rgba, RgbaImage};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "gifcanvas")]
#[command(about = "Edit every frame of an animated GIF and re-encode it")]
struct Args {
    /// Input GIF
    #[arg(value_name = "INPUT")]
    input: PathBuf,

    /// Output GIF file path
    #[arg(short, long, value_name = "FILE")]
    out: PathBuf,

    /// Rewrite delta frames into full frames before decoding
    #[arg(long)]
    coalesce: bool,

    /// Which normalizer runs when --coalesce is set
    #[arg(long, value_enum, default_value_t = NormalizerKind::Builtin)]
    normalizer: NormalizerKind,

    /// Give up on normalization after this many milliseconds
    #[arg(long, default_value = "30000")]
    normalize_timeout_ms: u64,

    /// Frame delay in milliseconds (used when --fps is 0)
    #[arg(long, default_value = "0")]
    delay: u32,

    /// Loop count, 0 loops forever
    #[arg(long, default_value = "0")]
    repeat: u32,

    /// Palette algorithm: neuquant or octree
    #[arg(long, default_value = "neuquant")]
    algorithm: String,

    /// Only write changed rectangles between opaque frames
    #[arg(long)]
    optimiser: bool,

    /// Frames per second, overrides --delay when non-zero
    #[arg(long, default_value = "60")]
    fps: u32,

    /// 1 (best) to 100 (fastest)
    #[arg(long, default_value = "1")]
    quality: u32,

    /// Still image appended after the decoded frames (repeatable)
    #[arg(long = "append", value_name = "PATH")]
    append: Vec<PathBuf>,

    /// Draw a progress bar of this color (RRGGBB or RRGGBBAA) along the bottom
    #[arg(long, value_name = "HEX")]
    progress_bar: Option<String>,

    /// Print a JSON summary to stdout
    #[arg(long)]
    json: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum NormalizerKind {
    /// In-process compositor
    Builtin,
    /// GraphicsMagick `gm convert -coalesce`
    Gm,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let session_id = init_tracing();

    info!(session = %session_id, "Input: {:?}, Output: {:?}", args.input, args.out);

    let bar_color = args.progress_bar.as_deref().map(parse_hex_color).transpose()?;

    let mut frames = Vec::with_capacity(args.append.len());
    for path in &args.append {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read appended frame {:?}", path))?;
        frames.push(bytes);
    }

    let options = RenderOptions {
        coalesce: args.coalesce,
        delay: args.delay,
        repeat: args.repeat,
        algorithm: args.algorithm.clone(),
        optimiser: args.optimiser,
        fps: args.fps,
        quality: args.quality,
        frames,
    };

    let normalize_timeout = Duration::from_millis(args.normalize_timeout_ms);
    let pipeline = Pipeline::new().with_normalize_timeout(normalize_timeout);
    let pipeline = match args.normalizer {
        NormalizerKind::Builtin => pipeline.with_normalizer(Coalescer::default()),
        // The child is killed at the same deadline the pipeline stops waiting.
        NormalizerKind::Gm => pipeline.with_normalizer(ExternalCoalescer::default().with_timeout(normalize_timeout)),
    };

    let editor = |surface: &mut RgbaImage, ctx: &FrameContext| {
        if let Some(color) = bar_color {
            draw_progress_bar(surface, ctx, color);
        }
    };

    let output = pipeline
        .render(args.input.clone(), editor, &options)
        .await
        .with_context(|| format!("Failed to render {:?}", args.input))?;

    tokio::fs::write(&args.out, &output.bytes)
        .await
        .with_context(|| format!("Failed to write {:?}", args.out))?;

    info!(
        "Wrote {:?}: {} frames ({} appended), {} bytes",
        args.out,
        output.total_frames(),
        output.appended_frames,
        output.size_bytes
    );

    if args.json {
        println!("{}", summary_json(&output, &args.out)?);
    }

    Ok(())
}

fn summary_json(output: &RenderOutput, out: &std::path::Path) -> Result<String> {
    let mut value = serde_json::to_value(output)?;
    if let Some(map) = value.as_object_mut() {
        map.insert("output".to_string(), serde_json::json!(out.display().to_string()));
        map.insert("total_frames".to_string(), serde_json::json!(output.total_frames()));
    }
    Ok(serde_json::to_string_pretty(&value)?)
}

/// Accepts `RRGGBB` or `RRGGBBAA`, with or without a leading `#`.
fn parse_hex_color(hex: &str) -> Result<Rgba<u8>> {
    let digits = hex.trim().trim_start_matches('#');
    if !matches!(digits.len(), 6 | 8) || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        bail!("invalid color {:?}, expected RRGGBB or RRGGBBAA", hex);
    }
    let channel = |i: usize| u8::from_str_radix(&digits[i..i + 2], 16);
    let alpha = if digits.len() == 8 { channel(6)? } else { 255 };
    Ok(Rgba([channel(0)?, channel(2)?, channel(4)?, alpha]))
}

/// Fills the bottom rows up to `current_frame / total_frames` of the width.
fn draw_progress_bar(surface: &mut RgbaImage, ctx: &FrameContext, color: Rgba<u8>) {
    if ctx.total_frames == 0 {
        return;
    }
    let bar_height = (ctx.height / 20).max(1);
    let bar_width = (ctx.width as u64 * ctx.current_frame as u64 / ctx.total_frames as u64) as u32;
    for y in ctx.height - bar_height..ctx.height {
        for x in 0..bar_width.min(ctx.width) {
            surface.put_pixel(x, y, color);
        }
    }
}

use crate::decoder::read_raw_frames;
use crate::frame::{self, Region};
use common_types::{Algorithm, Dimensions, GifPipeError, TRANSPARENCY_THRESHOLD};
use gif::{DisposalMethod, Encoder, Repeat};
use std::io::{Read, Write};
use std::process::{Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Rewrites an animation so every frame is a complete picture.
///
/// Implementations run on a blocking thread; they may be slow or shell out.
pub trait Normalizer: Send + Sync {
    fn name(&self) -> &str;

    fn normalize(&self, input: &[u8]) -> Result<Vec<u8>, GifPipeError>;
}

fn normalize_error(err: impl std::fmt::Display) -> GifPipeError {
    GifPipeError::NormalizationFailed {
        message: err.to_string(),
    }
}

/// In-process coalescer.
///
/// Composites each image block over a running canvas, honoring disposal
/// methods, and writes every canvas snapshot back as a full-size frame.
#[derive(Debug, Clone)]
pub struct Coalescer {
    /// NeuQuant sample factor used when re-encoding snapshots.
    pub quality: u32,
}

impl Default for Coalescer {
    fn default() -> Self {
        Self { quality: 10 }
    }
}

impl Coalescer {
    /// Full canvas snapshots with their source delays.
    pub fn composite(&self, input: &[u8]) -> Result<(Dimensions, Vec<(Vec<u8>, u16)>), GifPipeError> {
        let (dims, raw_frames) = read_raw_frames(input).map_err(normalize_error)?;

        let mut canvas = vec![0u8; dims.rgba_len()];
        let mut snapshots = Vec::with_capacity(raw_frames.len());

        for raw in &raw_frames {
            let restore = match raw.dispose {
                DisposalMethod::Previous => Some(canvas.clone()),
                _ => None,
            };

            raw.blit(&mut canvas, dims, |_, src| src[3] >= TRANSPARENCY_THRESHOLD);
            snapshots.push((canvas.clone(), raw.delay_cs));

            match raw.dispose {
                DisposalMethod::Background => raw.clear(&mut canvas, dims),
                DisposalMethod::Previous => {
                    if let Some(saved) = restore {
                        canvas = saved;
                    }
                }
                DisposalMethod::Keep | DisposalMethod::Any => {}
            }
        }

        Ok((dims, snapshots))
    }
}

impl Normalizer for Coalescer {
    fn name(&self) -> &str {
        "coalescer"
    }

    #[tracing::instrument(level = "info", skip_all, fields(bytes = input.len()))]
    fn normalize(&self, input: &[u8]) -> Result<Vec<u8>, GifPipeError> {
        let (dims, snapshots) = self.composite(input)?;

        let mut encoder =
            Encoder::new(Vec::new(), dims.width_u16(), dims.height_u16(), &[]).map_err(normalize_error)?;
        encoder.set_repeat(Repeat::Infinite).map_err(normalize_error)?;

        for (idx, (rgba, delay_cs)) in snapshots.iter().enumerate() {
            let block = frame::encode_region(
                rgba,
                dims,
                Region::full(dims),
                *delay_cs,
                DisposalMethod::Background,
                Algorithm::NeuQuant,
                self.quality,
            )?;
            encoder
                .write_frame(&block)
                .map_err(|e| normalize_error(format!("frame {}: {}", idx, e)))?;
        }

        let bytes = encoder.into_inner().map_err(normalize_error)?;
        info!(
            stage = "normalize",
            frames = snapshots.len(),
            size_bytes = bytes.len(),
            "Coalesced GIF"
        );
        Ok(bytes)
    }
}

const CHILD_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Coalesces through an external program reading stdin and writing stdout.
/// Defaults to GraphicsMagick: `gm convert - -coalesce gif:-`.
///
/// A child still running after `timeout` is killed.
#[derive(Debug, Clone)]
pub struct ExternalCoalescer {
    pub program: String,
    pub args: Vec<String>,
    pub timeout: Duration,
}

impl Default for ExternalCoalescer {
    fn default() -> Self {
        Self::new(
            "gm",
            ["convert", "-", "-coalesce", "gif:-"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        )
    }
}

impl ExternalCoalescer {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

fn drain<R: Read + Send + 'static>(mut pipe: R) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Err(e) = pipe.read_to_end(&mut buf) {
            debug!(stage = "normalize", error = %e, "child pipe read failed");
        }
        buf
    })
}

fn join_output(handle: JoinHandle<Vec<u8>>) -> Result<Vec<u8>, GifPipeError> {
    handle.join().map_err(|_| normalize_error("child pipe reader panicked"))
}

impl Normalizer for ExternalCoalescer {
    fn name(&self) -> &str {
        &self.program
    }

    #[tracing::instrument(level = "info", skip_all, fields(program = %self.program, bytes = input.len()))]
    fn normalize(&self, input: &[u8]) -> Result<Vec<u8>, GifPipeError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| normalize_error(format!("failed to spawn {}: {}", self.program, e)))?;

        // Every pipe gets its own thread so a full pipe cannot stall the child.
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| normalize_error("child stdin unavailable"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| normalize_error("child stdout unavailable"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| normalize_error("child stderr unavailable"))?;
        let payload = input.to_vec();
        let writer = thread::spawn(move || stdin.write_all(&payload));
        let stdout = drain(stdout);
        let stderr = drain(stderr);

        let deadline = Instant::now() + self.timeout;
        let status = loop {
            if let Some(status) = child.try_wait().map_err(normalize_error)? {
                break status;
            }
            if Instant::now() >= deadline {
                if let Err(e) = child.kill() {
                    debug!(stage = "normalize", error = %e, "kill failed");
                }
                // Reap the child; its pipes close and the reader threads end.
                let _ = child.wait();
                let _ = writer.join();
                let _ = join_output(stdout);
                let _ = join_output(stderr);
                warn!(
                    stage = "normalize",
                    program = %self.program,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "External coalescer killed"
                );
                return Err(GifPipeError::TimeoutExceeded {
                    timeout_ms: self.timeout.as_millis() as u64,
                });
            }
            thread::sleep(CHILD_POLL_INTERVAL);
        };

        match writer.join() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(stage = "normalize", error = %e, "stdin closed early"),
            Err(_) => return Err(normalize_error("stdin writer panicked")),
        }
        let stdout = join_output(stdout)?;
        let stderr = join_output(stderr)?;

        if !status.success() {
            return Err(normalize_error(format!(
                "{} exited with {}: {}",
                self.program,
                status,
                String::from_utf8_lossy(&stderr).trim()
            )));
        }
        if stdout.is_empty() {
            return Err(normalize_error(format!("{} produced no output", self.program)));
        }

        info!(stage = "normalize", size_bytes = stdout.len(), "External coalesce done");
        Ok(stdout)
    }
}

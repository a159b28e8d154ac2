use serde::Serialize;
use std::fmt;
use std::sync::Mutex;
use tracing::warn;

/// Non-fatal events reported while a render keeps going.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Diagnostic {
    /// The normalizer failed or timed out; the original bytes were decoded.
    NormalizationFailed { normalizer: String, code: String, message: String },
    /// The requested algorithm was not recognized and was replaced.
    InvalidAlgorithm { requested: String, used: String },
    /// Quality was outside the accepted range and was clamped.
    QualityClamped { requested: u32, used: u32 },
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::NormalizationFailed { normalizer, code, message } => write!(
                f,
                "{}: normalizer '{}' failed, using original input: {}",
                code, normalizer, message
            ),
            Diagnostic::InvalidAlgorithm { requested, used } => {
                write!(f, "unknown algorithm '{}', falling back to {}", requested, used)
            }
            Diagnostic::QualityClamped { requested, used } => {
                write!(f, "quality {} out of range, using {}", requested, used)
            }
        }
    }
}

/// Receives diagnostics. Shared across concurrent renders.
pub trait DiagnosticSink: Send + Sync {
    fn report(&self, diagnostic: Diagnostic);
}

/// Emits each diagnostic as a `tracing` warning.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn report(&self, diagnostic: Diagnostic) {
        warn!(stage = "diagnostic", "{}", diagnostic);
    }
}

/// Collects diagnostics in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    entries: Mutex<Vec<Diagnostic>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<Diagnostic> {
        match self.entries.lock() {
            Ok(entries) => entries.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}

impl DiagnosticSink for MemorySink {
    fn report(&self, diagnostic: Diagnostic) {
        match self.entries.lock() {
            Ok(mut entries) => entries.push(diagnostic),
            Err(poisoned) => poisoned.into_inner().push(diagnostic),
        }
    }
}

use common_types::GifPipeError;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Source animation: a file to read or bytes already in memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Path(PathBuf),
    Bytes(Vec<u8>),
}

impl Input {
    /// Reads the input into memory.
    pub async fn load(self) -> Result<Vec<u8>, GifPipeError> {
        match self {
            Input::Bytes(bytes) => Ok(bytes),
            Input::Path(path) => {
                let bytes = tokio::fs::read(&path).await.map_err(|e| GifPipeError::IoFailed {
                    message: format!("{}: {}", path.display(), e),
                })?;
                debug!(stage = "load", path = %path.display(), bytes = bytes.len(), "Input read");
                Ok(bytes)
            }
        }
    }
}

impl From<PathBuf> for Input {
    fn from(path: PathBuf) -> Self {
        Input::Path(path)
    }
}

impl From<&Path> for Input {
    fn from(path: &Path) -> Self {
        Input::Path(path.to_path_buf())
    }
}

impl From<&str> for Input {
    fn from(path: &str) -> Self {
        Input::Path(PathBuf::from(path))
    }
}

impl From<Vec<u8>> for Input {
    fn from(bytes: Vec<u8>) -> Self {
        Input::Bytes(bytes)
    }
}

impl From<&[u8]> for Input {
    fn from(bytes: &[u8]) -> Self {
        Input::Bytes(bytes.to_vec())
    }
}

//! Core types, error definitions, and data structures for pair_dataset.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

pub type DatasetResult<T> = Result<T, PairDatasetError>;

#[derive(Debug, Error)]
pub enum PairDatasetError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("image decode error at {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("shape mismatch at {path}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        path: PathBuf,
        expected: (u32, u32),
        actual: (u32, u32),
    },
    #[error("no counterpart found for {path}")]
    UnpairedFile { path: PathBuf },
    #[error("no images found under {root}")]
    EmptyDataset { root: PathBuf },
    #[error("{0}")]
    Other(String),
}

/// One (input, target) training pair in CHW layout, normalized to [-1, 1].
#[derive(Debug, Clone)]
pub struct PairSample {
    pub input_chw: Vec<f32>,
    pub target_chw: Vec<f32>,
    pub width: u32,
    pub height: u32,
}

/// Where the two halves of a pair live on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PairSource {
    /// One file holding `target | input` side by side.
    Composite(PathBuf),
    /// Two files holding the input and the target separately.
    Separate { input: PathBuf, target: PathBuf },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairIndex {
    pub source: PairSource,
    /// Exchange input and target after loading.
    pub swap: bool,
}

impl PairIndex {
    /// Path used in log lines and errors.
    pub fn display_path(&self) -> &std::path::Path {
        match &self.source {
            PairSource::Composite(path) => path,
            PairSource::Separate { input, .. } => input,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Split {
    /// Random jitter (resize, joint crop, joint flip).
    Train,
    /// Plain resize, no randomness.
    Test,
}

//! Error taxonomy for the BeatSight core pipeline.
//!
//! Mirrors the per-concern split used elsewhere in this workspace (a
//! top-level error that wraps stage-specific variants), so a caller can match
//! on `BeatSightError` without needing to know which stage produced it while
//! still being able to drill into the original cause.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PreprocessError {
    #[error("failed to read audio file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to decode audio: {0}")]
    Decode(#[from] rodio::decoder::DecoderError),
    #[error("failed to resample audio: {0}")]
    Resample(#[from] rubato::ResampleError),
    #[error("failed to construct resampler: {0}")]
    ResamplerConstruction(#[from] rubato::ResamplerConstructionError),
    #[error("decoded audio buffer is empty")]
    EmptyAudio,
}

#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("ML classifier requested but no model artifact is available at {0:?}")]
    ModelUnavailable(Option<std::path::PathBuf>),
    #[error("failed to load ONNX model: {0}")]
    ModelLoad(String),
    #[error("ML inference failed: {0}")]
    Inference(String),
}

#[derive(Error, Debug)]
pub enum AssemblerError {
    #[error("quantization step degenerated to a non-positive value")]
    QuantizationDegenerate,
}

#[derive(Error, Debug)]
pub enum BeatSightError {
    #[error("invalid audio: {0}")]
    InvalidAudio(String),
    #[error(transparent)]
    Preprocess(#[from] PreprocessError),
    #[error("invalid options: {0}")]
    InvalidOptions(String),
    #[error(transparent)]
    Classifier(#[from] ClassifierError),
    #[error(transparent)]
    Assembler(#[from] AssemblerError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to serialize output: {0}")]
    Serialize(#[from] serde_json::Error),
}

pub type BeatSightResult<T> = Result<T, BeatSightError>;

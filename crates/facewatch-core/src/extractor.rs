use crate::types::Descriptor;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("no usable face in image")]
    NoFaceDetected,
    #[error("image could not be decoded: {0}")]
    InvalidImage(String),
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    Inference(String),
}

/// Converts raw image bytes into a face descriptor.
///
/// Implementations may hold heavy, non-thread-safe state (an inference
/// session), so extraction takes `&mut self` and each engine worker owns
/// its own instance.
pub trait Extractor {
    fn extract(&mut self, image: &[u8]) -> Result<Descriptor, ExtractError>;
}
